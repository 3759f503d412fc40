//! Tracing layer that mirrors log events into a Telegram chat.
//!
//! WARN and ERROR go out at once. Lower levels are batched and flushed every
//! few seconds, or early once enough lines pile up.

use std::fmt::Write as _;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCHED_LINES: usize = 50;
/// Telegram allows 4096; leave room for the ellipsis.
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, PartialEq, Eq)]
enum LogLine {
    Urgent(String),
    Batched(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
    min_level: Level,
}

impl TelegramLogLayer {
    /// Forward INFO and above to `chat_id`.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self::with_level(bot, chat_id, Level::INFO)
    }

    /// Forward events at `min_level` and above. Must be called inside a runtime.
    pub fn with_level(bot: Bot, chat_id: ChatId, min_level: Level) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();

        tokio::spawn(async move {
            let mut batch: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(LogLine::Urgent(text)) => send_log(&bot, chat_id, &text).await,
                        Some(LogLine::Batched(text)) => {
                            batch.push(text);
                            if batch.len() >= MAX_BATCHED_LINES {
                                flush(&bot, chat_id, &mut batch).await;
                            }
                        }
                        None => {
                            flush(&bot, chat_id, &mut batch).await;
                            break;
                        }
                    },
                    _ = interval.tick() => flush(&bot, chat_id, &mut batch).await,
                }
            }
        });

        Self { tx, min_level }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    if let Err(e) = bot.send_message(chat_id, fit_message(text)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let combined = batch.join("\n");
    batch.clear();
    send_log(bot, chat_id, &combined).await;
}

/// Cut `text` to Telegram's message size, on a char boundary.
fn fit_message(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX_MESSAGE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Module path without the crate name: `xplora::pipeline::answer` -> `pipeline::answer`.
fn short_target(target: &str) -> &str {
    target.split_once("::").map_or(target, |(_, rest)| rest)
}

fn format_line(level: Level, target: &str, message: &str) -> LogLine {
    let target = short_target(target);
    match level {
        Level::ERROR => LogLine::Urgent(format!("❌ [{target}] {message}")),
        Level::WARN => LogLine::Urgent(format!("⚠️ [{target}] {message}")),
        _ => LogLine::Batched(format!("[{target}] {message}")),
    }
}

/// Collects the event message followed by its structured fields.
#[derive(Default)]
struct EventText {
    message: String,
    fields: String,
}

impl EventText {
    fn push_field(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push_str(", ");
        }
        let _ = write!(self.fields, "{name}={value}");
    }

    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} ({})", self.message, self.fields),
        }
    }
}

impl Visit for EventText {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Lower levels compare greater: TRACE > DEBUG > INFO.
        if *metadata.level() > self.min_level {
            return;
        }

        let mut text = EventText::default();
        event.record(&mut text);

        let line = format_line(*metadata.level(), metadata.target(), &text.finish());
        if self.tx.send(line).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
