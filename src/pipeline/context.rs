//! Follow-up detection: a reply to one of the bot's own answers carries that
//! answer along so the backend can see what is being asked about.

use tracing::debug;

use crate::pipeline::message::ReplyTo;

/// Fold the bot's earlier answer into a follow-up question.
///
/// Without a prior answer the question is returned unchanged.
pub fn augment(current: &str, prior_bot_text: Option<&str>) -> String {
    match prior_bot_text {
        Some(prior) if !prior.trim().is_empty() => {
            format!("Мой предыдущий ответ: \"{prior}\". Уточняющий вопрос пользователя: \"{current}\"")
        }
        _ => current.to_string(),
    }
}

/// Knows the bot's own identity, so it can tell replies to the bot apart from
/// replies to anyone else (other bots included).
#[derive(Debug, Clone, Copy)]
pub struct ContextAugmenter {
    bot_user_id: i64,
}

impl ContextAugmenter {
    pub fn new(bot_user_id: i64) -> Self {
        Self { bot_user_id }
    }

    /// Text of the replied-to message, if it is a non-empty bot message.
    pub fn prior_bot_text<'a>(&self, reply: Option<&'a ReplyTo>) -> Option<&'a str> {
        let reply = reply?;
        if reply.author_id != Some(self.bot_user_id) {
            return None;
        }
        let text = reply.text.as_deref().filter(|t| !t.trim().is_empty())?;
        debug!(reply_to = reply.message_id, "Reply to own answer, adding context");
        Some(text)
    }
}
