//! Client for the neural-search answer backend.
//!
//! The backend is asynchronous: `send_to_dialog` accepts a question and hands
//! back a response id straight away, `get_fresh_message` is then polled with
//! that id until the markdown answer shows up.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AnswerSettings;
use crate::pipeline::error::PipelineError;
use crate::pipeline::message::preview;
use crate::pipeline::poll::{poll_until, PollOutcome, PollPolicy, Probe};

/// Opaque handle for a submitted question. Never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finished answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerResult {
    pub markdown_text: String,
    /// Sources in the order the backend lists them; `[n]` refers to entry n-1.
    pub citation_links: Vec<String>,
}

#[derive(Serialize)]
struct SubmitRequest {
    #[serde(rename = "UserRequest")]
    user_request: String,
    #[serde(rename = "EditLastMessageMode")]
    edit_last_message_mode: bool,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "ResponseMessageId")]
    response_message_id: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct PollRequest<'a> {
    #[serde(rename = "ResponseMessageId")]
    response_message_id: &'a str,
}

#[derive(Deserialize, Debug)]
struct PollResponse {
    #[serde(rename = "TargetMarkdownText")]
    target_markdown_text: Option<String>,
    #[serde(rename = "LinksData", default)]
    links_data: Option<Vec<serde_json::Value>>,
}

pub struct AnswerClient {
    base_url: String,
    style_directive: String,
    policy: PollPolicy,
    http: reqwest::Client,
}

impl AnswerClient {
    pub fn new(http: reqwest::Client, settings: &AnswerSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            style_directive: settings.style_directive.clone(),
            policy: settings.poll_policy(),
            http,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Submit a question and wait for its answer.
    pub async fn ask(&self, query: &str) -> Result<AnswerResult, PipelineError> {
        let id = self.submit(query).await?;
        self.fetch_result(&id).await
    }

    /// Submit a question. Returns as soon as the backend has accepted it.
    pub async fn submit(&self, query: &str) -> Result<CorrelationId, PipelineError> {
        info!(query = %preview(query, 50), "Submitting query");

        let user_request = if self.style_directive.is_empty() {
            query.to_string()
        } else {
            format!("{query} {}", self.style_directive)
        };
        let request = SubmitRequest {
            user_request,
            edit_last_message_mode: false,
        };

        let response = self
            .http
            .post(format!("{}/send_to_dialog", self.base_url))
            .header("accept", "*/*")
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::BackendUnavailable(format!("submit: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::BackendUnavailable(format!(
                "submit returned {status}: {}",
                preview(&body, 200)
            )));
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::BackendUnavailable(format!("submit response: {e}")))?;

        let id = match parsed.response_message_id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(PipelineError::BackendUnavailable(
                    "submit response carried no ResponseMessageId".to_string(),
                ));
            }
        };

        debug!(correlation_id = %id, "Query accepted");
        Ok(CorrelationId(id))
    }

    /// Poll until the answer text is available.
    ///
    /// Gives up with [`PipelineError::BackendTimeout`] once the policy's
    /// attempts are spent. Transport or status errors abort immediately.
    pub async fn fetch_result(&self, id: &CorrelationId) -> Result<AnswerResult, PipelineError> {
        let max = self.policy.max_attempts;
        let outcome = poll_until(self.policy, |attempt| async move {
            match self.poll_once(id).await {
                Err(e) => Probe::Fail(e),
                Ok(response) => {
                    let links = extract_links(response.links_data.as_deref().unwrap_or_default());
                    match response.target_markdown_text {
                        Some(text) if !text.trim().is_empty() => Probe::Ready(AnswerResult {
                            markdown_text: text,
                            citation_links: links,
                        }),
                        _ => {
                            info!(
                                correlation_id = %id,
                                "Waiting for answer... attempt {attempt} of {max}"
                            );
                            debug!(correlation_id = %id, links = ?links, "Links so far");
                            Probe::Pending
                        }
                    }
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Done(result) => {
                info!(
                    correlation_id = %id,
                    chars = result.markdown_text.len(),
                    links = result.citation_links.len(),
                    "Answer received"
                );
                Ok(result)
            }
            PollOutcome::Failed(e) => {
                warn!(correlation_id = %id, error = %e, "Polling aborted");
                Err(e)
            }
            PollOutcome::TimedOut { attempts } => {
                warn!(correlation_id = %id, attempts, "Answer not ready, giving up");
                Err(PipelineError::BackendTimeout {
                    correlation_id: id.to_string(),
                    attempts,
                })
            }
        }
    }

    async fn poll_once(&self, id: &CorrelationId) -> Result<PollResponse, PipelineError> {
        let response = self
            .http
            .post(format!("{}/get_fresh_message", self.base_url))
            .header("accept", "*/*")
            .json(&PollRequest { response_message_id: id.as_str() })
            .send()
            .await
            .map_err(|e| PipelineError::BackendUnavailable(format!("poll {id}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::BackendUnavailable(format!(
                "poll {id} returned {status}: {}",
                preview(&body, 200)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::BackendUnavailable(format!("poll {id} response: {e}")))
    }
}

/// Pull URLs out of `LinksData`, which may hold bare strings or objects.
fn extract_links(links_data: &[serde_json::Value]) -> Vec<String> {
    links_data
        .iter()
        .filter_map(|entry| match entry {
            serde_json::Value::String(url) => Some(url.clone()),
            serde_json::Value::Object(map) => ["Url", "url", "Link", "link"]
                .iter()
                .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
                .map(str::to_string),
            _ => None,
        })
        .filter(|url| !url.is_empty())
        .collect()
}
