//! Shared fixtures: stub HTTP backends and a recording chat transport.

#![allow(dead_code)]

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use tiny_http::{Header, Response, Server};
use tokio::io::AsyncWriteExt;

use xplora::config::{AnswerSettings, Replies, TranscriptionSettings};
use xplora::pipeline::{
    AnswerClient, ChatTransport, InboundMessage, Payload, PipelineError, PipelineSettings, QueryPipeline,
    ReplyOptions, ReplyTo, TranscriptionClient, VoiceRef,
};

pub const BOT_ID: i64 = 4242;
pub const CHAT_ID: i64 = -100;

/// One request as seen by a [`StubServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// A blocking HTTP server on a background thread. The handler maps each
/// request to `(status, json body)`.
pub struct StubServer {
    server: Arc<Server>,
    thread: Option<JoinHandle<()>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    pub base_url: String,
}

impl StubServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (u16, String) + Send + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let thread = {
            let server = Arc::clone(&server);
            let requests = Arc::clone(&requests);
            std::thread::spawn(move || {
                while let Ok(mut request) = server.recv() {
                    let mut body = Vec::new();
                    request.as_reader().read_to_end(&mut body).unwrap();
                    let recorded = RecordedRequest {
                        method: request.method().to_string(),
                        path: request.url().to_string(),
                        authorization: request
                            .headers()
                            .iter()
                            .find(|h| h.field.equiv("authorization"))
                            .map(|h| h.value.to_string()),
                        body,
                    };

                    let (status, payload) = handler(&recorded);
                    requests.lock().unwrap().push(recorded);

                    let header = Header::from_bytes("Content-Type", "application/json").unwrap();
                    let response = Response::from_string(payload)
                        .with_status_code(status)
                        .with_header(header);
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            server,
            thread: Some(thread),
            requests,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose path starts with `prefix`.
    pub fn hits(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with(prefix))
            .collect()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A base URL nothing listens on: the port was bound and released.
pub fn dead_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn answer_settings(base_url: &str) -> AnswerSettings {
    AnswerSettings {
        base_url: base_url.to_string(),
        style_directive: "(кратко)".to_string(),
        poll_interval_ms: 10,
        max_attempts: 6,
    }
}

pub fn transcription_settings(base_url: &str) -> TranscriptionSettings {
    TranscriptionSettings {
        base_url: base_url.to_string(),
        locale: "ru".to_string(),
        speech_model: "universal".to_string(),
        poll_interval_ms: 10,
        max_attempts: 30,
    }
}

/// What the pipeline did to the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Reply {
        message_id: i64,
        text: String,
        options: ReplyOptions,
    },
    Edit {
        message_id: i64,
        text: String,
    },
    Delete {
        message_id: i64,
    },
}

/// Records every call; serves `audio` for any file download.
pub struct MockTransport {
    next_id: AtomicI64,
    events: Mutex<Vec<Sent>>,
    audio: Vec<u8>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1000),
            events: Mutex::new(Vec::new()),
            audio: b"OggS fake voice".to_vec(),
        })
    }

    pub fn events(&self) -> Vec<Sent> {
        self.events.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(i64, String, ReplyOptions)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Sent::Reply { message_id, text, options } => Some((message_id, text, options)),
                _ => None,
            })
            .collect()
    }

    pub fn reply_texts(&self) -> Vec<String> {
        self.replies().into_iter().map(|(_, text, _)| text).collect()
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Sent::Delete { message_id } => Some(message_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn reply(&self, _chat_id: i64, text: &str, options: ReplyOptions) -> Result<i64, PipelineError> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(Sent::Reply {
            message_id,
            text: text.to_string(),
            options,
        });
        Ok(message_id)
    }

    async fn edit_message(&self, _chat_id: i64, message_id: i64, text: &str) -> Result<(), PipelineError> {
        self.events.lock().unwrap().push(Sent::Edit {
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, _chat_id: i64, message_id: i64) -> Result<(), PipelineError> {
        self.events.lock().unwrap().push(Sent::Delete { message_id });
        Ok(())
    }

    async fn file_path(&self, file_id: &str) -> Result<String, PipelineError> {
        Ok(format!("voice/{file_id}.oga"))
    }

    async fn download_file(&self, _path: &str, dst: &mut tokio::fs::File) -> Result<(), PipelineError> {
        dst.write_all(&self.audio).await?;
        Ok(())
    }
}

pub fn pipeline(
    transport: Arc<MockTransport>,
    answer_url: &str,
    transcribe_url: Option<&str>,
    scratch_dir: &Path,
) -> QueryPipeline {
    let http = reqwest::Client::new();
    let transcriber = transcribe_url
        .map(|url| TranscriptionClient::new(http.clone(), "test-key".to_string(), &transcription_settings(url)));
    QueryPipeline::new(
        transport,
        AnswerClient::new(http, &answer_settings(answer_url)),
        transcriber,
        PipelineSettings {
            bot_user_id: BOT_ID,
            scratch_dir: scratch_dir.to_path_buf(),
            locale: "ru".to_string(),
            replies: Replies::default(),
        },
    )
}

pub fn text_message(message_id: i64, text: &str, reply_to: Option<ReplyTo>) -> InboundMessage {
    InboundMessage {
        message_id,
        chat_id: CHAT_ID,
        sender_id: Some(7),
        payload: Payload::Text(text.to_string()),
        reply_to,
    }
}

pub fn voice_message(message_id: i64) -> InboundMessage {
    InboundMessage {
        message_id,
        chat_id: CHAT_ID,
        sender_id: Some(7),
        payload: Payload::Voice(VoiceRef {
            file_id: "file-abc".to_string(),
            file_unique_id: "uniq-abc".to_string(),
        }),
        reply_to: None,
    }
}
