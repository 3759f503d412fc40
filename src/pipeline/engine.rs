//! Query pipeline - turns one inbound message into one answer.
//!
//! Voice notes are transcribed first. The question then gets any follow-up
//! context, a status message is posted, the backend is asked and polled, and
//! the rendered answer is delivered as a reply to the original message. The
//! status message goes away on every path out of [`QueryPipeline::process_query`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::config::Replies;
use crate::pipeline::answer::AnswerClient;
use crate::pipeline::context::ContextAugmenter;
use crate::pipeline::error::PipelineError;
use crate::pipeline::message::{preview, InboundMessage, Payload, Query, VoiceRef};
use crate::pipeline::render::{collapse_fenced_citations, escape_html, render_or_raw};
use crate::pipeline::scratch::ScratchFile;
use crate::pipeline::transcribe::TranscriptionClient;
use crate::pipeline::transport::{ChatTransport, ReplyOptions};

/// How long the "recognized" notice stays up before it is deleted.
const RECOGNIZED_NOTICE_TTL: Duration = Duration::from_secs(2);

/// Characters of the question shown in the status message.
const STATUS_PREVIEW_CHARS: usize = 100;

/// Everything the pipeline needs besides its clients.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bot_user_id: i64,
    /// Where downloaded voice notes are buffered.
    pub scratch_dir: PathBuf,
    /// Language code sent to the speech backend.
    pub locale: String,
    pub replies: Replies,
}

pub struct QueryPipeline {
    transport: Arc<dyn ChatTransport>,
    answers: AnswerClient,
    transcriber: Option<TranscriptionClient>,
    augmenter: ContextAugmenter,
    scratch_dir: PathBuf,
    locale: String,
    replies: Replies,
}

impl QueryPipeline {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        answers: AnswerClient,
        transcriber: Option<TranscriptionClient>,
        settings: PipelineSettings,
    ) -> Self {
        if transcriber.is_none() {
            warn!("No transcription client, voice messages will be declined");
        }
        Self {
            transport,
            answers,
            transcriber,
            augmenter: ContextAugmenter::new(settings.bot_user_id),
            scratch_dir: settings.scratch_dir,
            locale: settings.locale,
            replies: settings.replies,
        }
    }

    /// Reply to `/start`, threaded under the command message.
    pub async fn welcome(&self, chat_id: i64, command_message_id: i64) {
        if let Err(e) = self
            .transport
            .reply(
                chat_id,
                &self.replies.welcome,
                ReplyOptions::plain().reply_to(command_message_id),
            )
            .await
        {
            warn!(chat_id, "Failed to send welcome: {e}");
        }
    }

    /// Handle one inbound message through to its terminal reply.
    pub async fn handle(&self, msg: InboundMessage) {
        debug!(chat_id = msg.chat_id, message_id = msg.message_id, sender_id = ?msg.sender_id, "Handling message");

        match &msg.payload {
            Payload::Text(text) => {
                info!(chat_id = msg.chat_id, query = %preview(text, 50), "📨 Text query");
                let query = self.query_for(&msg, text.clone());
                self.process_query(query).await;
            }
            Payload::Voice(voice) => self.handle_voice(&msg, voice).await,
        }
    }

    fn query_for(&self, msg: &InboundMessage, text: String) -> Query {
        let reply_context = self
            .augmenter
            .prior_bot_text(msg.reply_to.as_ref())
            .map(str::to_string);
        Query::new(text, msg.chat_id, msg.message_id, reply_context)
    }

    async fn handle_voice(&self, msg: &InboundMessage, voice: &VoiceRef) {
        let chat_id = msg.chat_id;
        let Some(transcriber) = &self.transcriber else {
            self.reply_or_log(chat_id, &self.replies.voice_unavailable, msg.message_id)
                .await;
            return;
        };

        info!(chat_id, file_unique_id = %voice.file_unique_id, "🎙️ Voice query");

        let status_id = match self
            .transport
            .reply(
                chat_id,
                &self.replies.recognizing,
                ReplyOptions::plain().reply_to(msg.message_id),
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(chat_id, "Could not post recognition status: {e}");
                None
            }
        };

        let text = match self.transcribe_voice(transcriber, voice).await {
            Ok(text) => text,
            Err(e) => {
                error!(chat_id, error = %e, recognition = e.is_recognition_failure(), "Voice processing failed");
                self.report_voice_failure(chat_id, msg.message_id, status_id).await;
                return;
            }
        };

        if let Some(status_id) = status_id {
            self.show_recognized(chat_id, status_id).await;
        }

        if text.trim().is_empty() {
            info!(chat_id, "Nothing recognized in voice message");
            self.reply_or_log(chat_id, &self.replies.nothing_recognized, msg.message_id)
                .await;
            return;
        }

        info!(chat_id, transcript = %preview(&text, 100), "Voice transcribed");
        let query = self.query_for(msg, text);
        self.process_query(query).await;
    }

    /// Download the voice note into a scratch file and transcribe it.
    ///
    /// The scratch file is removed when this returns, on success or failure.
    async fn transcribe_voice(
        &self,
        transcriber: &TranscriptionClient,
        voice: &VoiceRef,
    ) -> Result<String, PipelineError> {
        let path = self.transport.file_path(&voice.file_id).await?;
        let (scratch, mut file) = ScratchFile::create(&self.scratch_dir, &voice.file_unique_id, &path).await?;

        self.transport.download_file(&path, &mut file).await?;
        file.flush().await?;
        drop(file);

        let audio = scratch.read().await?;
        debug!(path = %scratch.path().display(), bytes = audio.len(), "Voice note buffered");

        transcriber.transcribe(audio, &self.locale).await
    }

    async fn show_recognized(&self, chat_id: i64, status_id: i64) {
        if let Err(e) = self
            .transport
            .edit_message(chat_id, status_id, &self.replies.recognized)
            .await
        {
            debug!(chat_id, "Could not mark voice as recognized: {e}");
        }

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            tokio::time::sleep(RECOGNIZED_NOTICE_TTL).await;
            if let Err(e) = transport.delete_message(chat_id, status_id).await {
                debug!(chat_id, "Could not delete recognition notice: {e}");
            }
        });
    }

    async fn report_voice_failure(&self, chat_id: i64, message_id: i64, status_id: Option<i64>) {
        let Some(status_id) = status_id else {
            self.reply_or_log(chat_id, &self.replies.voice_failed, message_id)
                .await;
            return;
        };

        if let Err(e) = self
            .transport
            .edit_message(chat_id, status_id, &self.replies.recognition_failed)
            .await
        {
            debug!(chat_id, "Could not edit recognition status, replying instead: {e}");
            self.reply_or_log(chat_id, &self.replies.recognition_failed, message_id)
                .await;
        }
    }

    /// Ask the backend and deliver the answer, or the generic failure reply.
    pub async fn process_query(&self, query: Query) {
        let status = self.post_status(&query).await;

        let submission = query.submission_text();
        let outcome = match self.answer(&submission).await {
            Ok(html) => self.deliver(&query, &html).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            error!(
                chat_id = query.chat_id,
                query = %preview(&query.text, 50),
                error = %e,
                "Query failed"
            );
            self.reply_or_log(query.chat_id, &self.replies.generic_failure, query.message_id)
                .await;
        }

        status.clear().await;
    }

    async fn post_status(&self, query: &Query) -> StatusMessage {
        let text = status_text(&self.replies, &query.text);
        let message_id = match self
            .transport
            .reply(query.chat_id, &text, ReplyOptions::html())
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(chat_id = query.chat_id, "Could not post status message: {e}");
                None
            }
        };

        StatusMessage {
            transport: Arc::clone(&self.transport),
            chat_id: query.chat_id,
            message_id,
        }
    }

    /// Submit, poll and render. Returns Telegram-safe HTML.
    async fn answer(&self, submission: &str) -> Result<String, PipelineError> {
        let id = self.answers.submit(submission).await?;
        let result = self.answers.fetch_result(&id).await?;

        let markdown = collapse_fenced_citations(&result.markdown_text);
        let html = render_or_raw(&markdown, &result.citation_links);
        if html.trim().is_empty() {
            return Ok(escape_html(&result.markdown_text));
        }
        Ok(html)
    }

    async fn deliver(&self, query: &Query, html: &str) -> Result<(), PipelineError> {
        let options = ReplyOptions::html()
            .reply_to(query.message_id)
            .without_link_preview();
        let sent = self.transport.reply(query.chat_id, html, options).await?;
        info!(chat_id = query.chat_id, message_id = sent, "✅ Answer delivered");
        Ok(())
    }

    async fn reply_or_log(&self, chat_id: i64, text: &str, reply_to: i64) {
        if let Err(e) = self
            .transport
            .reply(chat_id, text, ReplyOptions::plain().reply_to(reply_to))
            .await
        {
            error!(chat_id, "Failed to send reply: {e}");
        }
    }
}

/// `<b>label</b> <code>question</code>` followed by the processing notice.
fn status_text(replies: &Replies, question: &str) -> String {
    format!(
        "<b>{}</b> <code>{}</code>\n\n<b>{}</b>",
        escape_html(&replies.query_label),
        escape_html(&preview(question, STATUS_PREVIEW_CHARS)),
        escape_html(&replies.processing)
    )
}

/// The transient "processing" message of one query.
///
/// Deleted by [`StatusMessage::clear`]; if the owning task unwinds or is
/// dropped first, `Drop` schedules the deletion instead.
struct StatusMessage {
    transport: Arc<dyn ChatTransport>,
    chat_id: i64,
    message_id: Option<i64>,
}

impl StatusMessage {
    async fn clear(mut self) {
        if let Some(message_id) = self.message_id.take() {
            if let Err(e) = self.transport.delete_message(self.chat_id, message_id).await {
                debug!(chat_id = self.chat_id, message_id, "Could not delete status message: {e}");
            }
        }
    }
}

impl Drop for StatusMessage {
    fn drop(&mut self) {
        let Some(message_id) = self.message_id.take() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let chat_id = self.chat_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = transport.delete_message(chat_id, message_id).await;
                });
            }
            Err(_) => warn!(chat_id, message_id, "No runtime left to delete status message"),
        }
    }
}
