//! The query pipeline end to end, with stub backends and a recording transport.

mod common;

use std::path::Path;

use serde_json::json;

use common::{pipeline, text_message, voice_message, MockTransport, Sent, StubServer, BOT_ID, CHAT_ID};
use xplora::config::Replies;
use xplora::pipeline::{ReplyTo, TextFormat};

/// Answer backend that answers `markdown` on the first poll.
fn answering(markdown: &'static str, links: serde_json::Value) -> StubServer {
    StubServer::start(move |req| match req.path.as_str() {
        "/send_to_dialog" => (200, json!({ "ResponseMessageId": "rm-7" }).to_string()),
        "/get_fresh_message" => (
            200,
            json!({ "TargetMarkdownText": markdown, "LinksData": links }).to_string(),
        ),
        _ => (404, "{}".to_string()),
    })
}

fn never_answering() -> StubServer {
    StubServer::start(|req| match req.path.as_str() {
        "/send_to_dialog" => (200, json!({ "ResponseMessageId": "rm-7" }).to_string()),
        _ => (200, json!({}).to_string()),
    })
}

/// Speech backend whose single poll returns `status`.
fn speech(status: serde_json::Value) -> StubServer {
    StubServer::start(move |req| match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/upload") => (200, json!({ "upload_url": "https://cdn.example/u" }).to_string()),
        ("POST", "/transcript") => (200, json!({ "id": "job-1" }).to_string()),
        ("GET", _) => (200, status.to_string()),
        _ => (404, "{}".to_string()),
    })
}

fn scratch_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true,
    }
}

fn submitted_query(server: &StubServer) -> String {
    let submits = server.hits("/send_to_dialog");
    assert_eq!(submits.len(), 1);
    submits[0].json()["UserRequest"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_text_query_delivers_single_citation() {
    let backend = answering("The capital is [1](https://example.com/paris)", json!(["https://example.com/paris"]));
    let transport = MockTransport::new();
    let scratch = tempfile::tempdir().unwrap();

    pipeline(transport.clone(), &backend.base_url, None, scratch.path())
        .handle(text_message(10, "What is the capital of France?", None))
        .await;

    let events = transport.events();
    assert_eq!(events.len(), 3, "{events:?}");

    // Status first, not threaded, HTML.
    let Sent::Reply { message_id: status_id, text, options } = &events[0] else {
        panic!("expected status reply, got {:?}", events[0]);
    };
    assert!(text.contains("<code>What is the capital of France?</code>"));
    assert_eq!(options.format, TextFormat::Html);
    assert_eq!(options.reply_to, None);

    // Then the answer, threaded under the user's message.
    let Sent::Reply { text, options, .. } = &events[1] else {
        panic!("expected answer reply, got {:?}", events[1]);
    };
    assert_eq!(text, r#"The capital is <a href="https://example.com/paris">[1]</a>"#);
    assert_eq!(text.matches("<a ").count(), 1);
    assert_eq!(options.reply_to, Some(10));
    assert_eq!(options.format, TextFormat::Html);
    assert!(options.disable_link_preview);

    assert_eq!(events[2], Sent::Delete { message_id: *status_id });
}

#[tokio::test]
async fn test_fenced_citations_resolve_against_links() {
    let backend = answering("Paris ```1``` and Lyon ```2```", json!(["https://p.example", { "Url": "https://l.example" }]));
    let transport = MockTransport::new();
    let scratch = tempfile::tempdir().unwrap();

    pipeline(transport.clone(), &backend.base_url, None, scratch.path())
        .handle(text_message(10, "cities", None))
        .await;

    let replies = transport.reply_texts();
    assert_eq!(
        replies[1],
        r#"Paris <a href="https://p.example">[1]</a> and Lyon <a href="https://l.example">[2]</a>"#
    );
}

#[tokio::test]
async fn test_backend_timeout_sends_generic_failure_and_clears_status() {
    let backend = never_answering();
    let transport = MockTransport::new();
    let scratch = tempfile::tempdir().unwrap();

    pipeline(transport.clone(), &backend.base_url, None, scratch.path())
        .handle(text_message(11, "slow question", None))
        .await;

    assert_eq!(backend.hits("/get_fresh_message").len(), 6);

    let replies = transport.replies();
    assert_eq!(replies.len(), 2);
    let (status_id, _, _) = &replies[0];
    let (_, text, options) = &replies[1];
    assert_eq!(text, &Replies::default().generic_failure);
    assert_eq!(options.reply_to, Some(11));
    assert_eq!(transport.deleted(), vec![*status_id]);
}

#[tokio::test]
async fn test_backend_down_still_clears_status() {
    let backend = StubServer::start(|_| (503, "{}".to_string()));
    let transport = MockTransport::new();
    let scratch = tempfile::tempdir().unwrap();

    pipeline(transport.clone(), &backend.base_url, None, scratch.path())
        .handle(text_message(12, "anything", None))
        .await;

    let replies = transport.reply_texts();
    assert_eq!(replies.last().unwrap(), &Replies::default().generic_failure);
    assert_eq!(transport.deleted().len(), 1);
}

#[tokio::test]
async fn test_reply_to_bot_adds_context() {
    let backend = answering("ok", json!([]));
    let transport = MockTransport::new();
    let scratch = tempfile::tempdir().unwrap();
    let reply_to = ReplyTo {
        message_id: 3,
        author_id: Some(BOT_ID),
        text: Some("Rust is a language".to_string()),
    };

    pipeline(transport.clone(), &backend.base_url, None, scratch.path())
        .handle(text_message(13, "Who made it?", Some(reply_to)))
        .await;

    assert_eq!(
        submitted_query(&backend),
        "Мой предыдущий ответ: \"Rust is a language\". Уточняющий вопрос пользователя: \"Who made it?\" (кратко)"
    );
    // The status message shows what the user typed.
    assert!(transport.reply_texts()[0].contains("<code>Who made it?</code>"));
}

#[tokio::test]
async fn test_reply_to_someone_else_is_unchanged() {
    let backend = answering("ok", json!([]));
    let transport = MockTransport::new();
    let scratch = tempfile::tempdir().unwrap();
    let reply_to = ReplyTo {
        message_id: 3,
        author_id: Some(BOT_ID + 1),
        text: Some("another bot".to_string()),
    };

    pipeline(transport.clone(), &backend.base_url, None, scratch.path())
        .handle(text_message(14, "Who made it?", Some(reply_to)))
        .await;

    assert_eq!(submitted_query(&backend), "Who made it? (кратко)");
}

#[tokio::test]
async fn test_voice_recognition_error_reports_recognition_failure() {
    let backend = answering("unused", json!([]));
    let speech = speech(json!({ "status": "error", "error": "bad audio" }));
    let transport = MockTransport::new();
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("temp_audio");
    let replies = Replies::default();

    pipeline(transport.clone(), &backend.base_url, Some(&speech.base_url), &scratch)
        .handle(voice_message(20))
        .await;

    let events = transport.events();
    let Sent::Reply { message_id: status_id, text, options } = &events[0] else {
        panic!("expected recognizing notice, got {:?}", events[0]);
    };
    assert_eq!(text, &replies.recognizing);
    assert_eq!(options.reply_to, Some(20));
    assert_eq!(
        events[1],
        Sent::Edit {
            message_id: *status_id,
            text: replies.recognition_failed.clone(),
        }
    );
    assert_eq!(events.len(), 2, "{events:?}");

    let shown: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            Sent::Reply { text, .. } | Sent::Edit { text, .. } => Some(text.clone()),
            Sent::Delete { .. } => None,
        })
        .collect();
    assert!(!shown.contains(&replies.generic_failure));

    assert!(backend.requests().is_empty());
    assert_eq!(speech.hits("/upload")[0].body, b"OggS fake voice");
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_voice_transcript_is_answered() {
    let backend = answering("Answer", json!([]));
    let speech = speech(json!({ "status": "completed", "text": "what is rust" }));
    let transport = MockTransport::new();
    let dir = tempfile::tempdir().unwrap();
    let replies = Replies::default();

    pipeline(transport.clone(), &backend.base_url, Some(&speech.base_url), dir.path())
        .handle(voice_message(21))
        .await;

    assert_eq!(submitted_query(&backend), "what is rust (кратко)");

    let events = transport.events();
    let Sent::Reply { message_id: notice_id, .. } = &events[0] else {
        panic!("expected recognizing notice, got {:?}", events[0]);
    };
    assert_eq!(
        events[1],
        Sent::Edit {
            message_id: *notice_id,
            text: replies.recognized.clone(),
        }
    );

    let answer = transport
        .replies()
        .into_iter()
        .find(|(_, text, _)| text == "Answer")
        .unwrap();
    assert_eq!(answer.2.reply_to, Some(21));
    assert!(scratch_is_empty(dir.path()));
}

#[tokio::test]
async fn test_recognized_notice_removed_later() {
    let backend = answering("Answer", json!([]));
    let speech = speech(json!({ "status": "completed", "text": "hi" }));
    let transport = MockTransport::new();
    let dir = tempfile::tempdir().unwrap();

    pipeline(transport.clone(), &backend.base_url, Some(&speech.base_url), dir.path())
        .handle(voice_message(22))
        .await;

    let notice_id = transport.replies()[0].0;
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    assert!(transport.deleted().contains(&notice_id));
}

#[tokio::test]
async fn test_empty_transcript_short_circuits() {
    let backend = answering("unused", json!([]));
    let speech = speech(json!({ "status": "completed", "text": "  " }));
    let transport = MockTransport::new();
    let dir = tempfile::tempdir().unwrap();

    pipeline(transport.clone(), &backend.base_url, Some(&speech.base_url), dir.path())
        .handle(voice_message(23))
        .await;

    let replies = transport.replies();
    let (_, text, options) = replies.last().unwrap();
    assert_eq!(text, &Replies::default().nothing_recognized);
    assert_eq!(options.reply_to, Some(23));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_voice_without_transcriber_is_declined() {
    let backend = answering("unused", json!([]));
    let transport = MockTransport::new();
    let dir = tempfile::tempdir().unwrap();

    pipeline(transport.clone(), &backend.base_url, None, dir.path())
        .handle(voice_message(24))
        .await;

    assert_eq!(transport.reply_texts(), vec![Replies::default().voice_unavailable]);
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_welcome_is_threaded_under_command() {
    let backend = answering("unused", json!([]));
    let transport = MockTransport::new();
    let dir = tempfile::tempdir().unwrap();

    pipeline(transport.clone(), &backend.base_url, None, dir.path())
        .welcome(CHAT_ID, 31)
        .await;

    let replies = transport.replies();
    assert_eq!(replies.len(), 1);
    let (_, text, options) = &replies[0];
    assert_eq!(text, &Replies::default().welcome);
    assert_eq!(options.reply_to, Some(31));
    assert_eq!(options.format, TextFormat::Plain);
    assert!(backend.requests().is_empty());
}
