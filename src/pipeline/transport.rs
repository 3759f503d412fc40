//! What the pipeline needs from the chat platform.

use async_trait::async_trait;

use crate::pipeline::error::PipelineError;

/// How the text of an outgoing message should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyOptions {
    /// Message to thread the reply under.
    pub reply_to: Option<i64>,
    pub format: TextFormat,
    pub disable_link_preview: bool,
}

impl ReplyOptions {
    pub fn plain() -> Self {
        Self {
            reply_to: None,
            format: TextFormat::Plain,
            disable_link_preview: false,
        }
    }

    pub fn html() -> Self {
        Self {
            format: TextFormat::Html,
            ..Self::plain()
        }
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn without_link_preview(mut self) -> Self {
        self.disable_link_preview = true;
        self
    }
}

/// Chat platform operations used while answering a message.
///
/// Message and file identifiers are opaque keys to the pipeline.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message to `chat_id`, returning the new message's id.
    async fn reply(&self, chat_id: i64, text: &str, options: ReplyOptions) -> Result<i64, PipelineError>;

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), PipelineError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PipelineError>;

    /// Resolve a file id to a downloadable path on the platform's file store.
    async fn file_path(&self, file_id: &str) -> Result<String, PipelineError>;

    /// Stream the file at `path` into `dst`.
    async fn download_file(&self, path: &str, dst: &mut tokio::fs::File) -> Result<(), PipelineError>;
}
