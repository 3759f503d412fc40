//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, LinkPreviewOptions, MessageId, ParseMode, ReplyParameters};
use tracing::{debug, info, warn};

use crate::pipeline::error::PipelineError;
use crate::pipeline::message::{InboundMessage, Payload, ReplyTo, VoiceRef};
use crate::pipeline::transport::{ChatTransport, ReplyOptions, TextFormat};

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn transport_error(action: &str, e: teloxide::RequestError) -> PipelineError {
    let msg = format!("Failed to {action}: {e}");
    warn!("{}", msg);
    PipelineError::Transport(msg)
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn reply(&self, chat_id: i64, text: &str, options: ReplyOptions) -> Result<i64, PipelineError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if options.format == TextFormat::Html {
            request = request.parse_mode(ParseMode::Html);
        }

        if let Some(msg_id) = options.reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        if options.disable_link_preview {
            request = request.link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            });
        }

        request
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| transport_error("send", e))
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), PipelineError> {
        debug!("Editing message {} in chat {}", message_id, chat_id);

        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .await
            .map_err(|e| transport_error("edit message", e))?;

        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PipelineError> {
        debug!("🗑️ Deleting message {} in chat {}", message_id, chat_id);

        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map_err(|e| transport_error("delete message", e))?;

        Ok(())
    }

    async fn file_path(&self, file_id: &str) -> Result<String, PipelineError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| transport_error("get file info", e))?;

        if file.path.is_empty() {
            return Err(PipelineError::Transport(format!("Telegram returned no path for file {file_id}")));
        }
        Ok(file.path)
    }

    async fn download_file(&self, path: &str, dst: &mut tokio::fs::File) -> Result<(), PipelineError> {
        self.bot
            .download_file(path, dst)
            .await
            .map_err(|e| PipelineError::Transport(format!("Failed to download file: {e}")))?;

        info!("📥 Downloaded {}", path);
        Ok(())
    }
}

/// Convert a Telegram message into the pipeline's input type.
///
/// Returns `None` for messages that are neither text nor voice.
pub fn inbound_message(msg: &Message) -> Option<InboundMessage> {
    let payload = if let Some(text) = msg.text() {
        Payload::Text(text.to_string())
    } else if let Some(voice) = msg.voice() {
        Payload::Voice(VoiceRef {
            file_id: voice.file.id.0.clone(),
            file_unique_id: voice.file.unique_id.0.clone(),
        })
    } else {
        return None;
    };

    let reply_to = msg.reply_to_message().map(|reply| ReplyTo {
        message_id: reply.id.0 as i64,
        author_id: reply.from.as_ref().map(|u| u.id.0 as i64),
        text: reply.text().or_else(|| reply.caption()).map(str::to_string),
    });

    Some(InboundMessage {
        message_id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
        sender_id: msg.from.as_ref().map(|u| u.id.0 as i64),
        payload,
        reply_to,
    })
}
