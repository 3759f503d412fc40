//! Query pipeline - answers Telegram questions through the neural-search backend.

pub mod answer;
pub mod context;
pub mod engine;
pub mod error;
pub mod message;
pub mod poll;
pub mod render;
pub mod scratch;
pub mod telegram;
pub mod transcribe;
pub mod transport;

pub use answer::{AnswerClient, AnswerResult, CorrelationId};
pub use context::ContextAugmenter;
pub use engine::{PipelineSettings, QueryPipeline};
pub use error::PipelineError;
pub use message::{InboundMessage, Payload, Query, ReplyTo, VoiceRef};
pub use telegram::TelegramClient;
pub use transcribe::{JobId, TranscriptionClient};
pub use transport::{ChatTransport, ReplyOptions, TextFormat};
