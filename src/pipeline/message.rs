//! Inbound message and query types.
//!
//! These are transport-neutral: the Telegram layer converts its updates into
//! [`InboundMessage`] and everything downstream only sees these types.

use crate::pipeline::context;

/// The message an inbound message replies to.
#[derive(Debug, Clone)]
pub struct ReplyTo {
    pub message_id: i64,
    /// Sender of the replied-to message, if known.
    pub author_id: Option<i64>,
    /// Text, or caption for media messages.
    pub text: Option<String>,
}

/// A voice note as referenced by the chat transport.
#[derive(Debug, Clone)]
pub struct VoiceRef {
    /// Handle used to fetch the file.
    pub file_id: String,
    /// Stable per-file identifier, used to name scratch files.
    pub file_unique_id: String,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Voice(VoiceRef),
}

/// A user message delivered by the chat transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub payload: Payload,
    pub reply_to: Option<ReplyTo>,
}

/// One question headed for the answer backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub chat_id: i64,
    /// Message the final answer replies to.
    pub message_id: i64,
    /// Earlier bot answer this question follows up on.
    pub reply_context: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>, chat_id: i64, message_id: i64, reply_context: Option<String>) -> Self {
        Self {
            text: text.into(),
            chat_id,
            message_id,
            reply_context,
        }
    }

    /// The text actually submitted, with any follow-up context folded in.
    pub fn submission_text(&self) -> String {
        context::augment(&self.text, self.reply_context.as_deref())
    }
}

/// First `max_chars` characters of `s`, with an ellipsis if anything was cut.
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
