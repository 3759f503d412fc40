//! Speech-to-text through AssemblyAI.
//!
//! Three round trips, each of which can fail on its own: upload the raw
//! audio, request a transcript for the uploaded URL, then poll the transcript
//! until it is `completed` or `error`. A failure in any phase ends the whole
//! call; nothing is retried across phases.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::TranscriptionSettings;
use crate::pipeline::error::PipelineError;
use crate::pipeline::message::preview;
use crate::pipeline::poll::{poll_until, PollOutcome, PollPolicy, Probe};

/// Opaque transcript id handed out by the speech backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    upload_url: Option<String>,
}

#[derive(Serialize)]
struct JobRequest<'a> {
    audio_url: &'a str,
    language_code: &'a str,
    speech_model: &'a str,
}

#[derive(Deserialize)]
struct JobResponse {
    id: Option<String>,
}

/// One status poll of a transcript.
#[derive(Debug, Deserialize)]
pub struct JobStatus {
    pub status: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a single status poll means for the loop.
pub fn classify_status(job_id: &JobId, job: JobStatus) -> Probe<String, PipelineError> {
    match job.status.as_str() {
        "queued" | "processing" => Probe::Pending,
        "completed" => Probe::Ready(job.text.unwrap_or_default()),
        "error" => Probe::Fail(PipelineError::TranscriptionFailed {
            job_id: job_id.to_string(),
            detail: job.error.unwrap_or_else(|| "no error detail".to_string()),
        }),
        _ => Probe::Fail(PipelineError::UnknownTranscriptionStatus {
            job_id: job_id.to_string(),
            status: job.status,
        }),
    }
}

pub struct TranscriptionClient {
    api_key: String,
    base_url: String,
    speech_model: String,
    policy: PollPolicy,
    http: reqwest::Client,
}

impl TranscriptionClient {
    pub fn new(http: reqwest::Client, api_key: String, settings: &TranscriptionSettings) -> Self {
        Self {
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            speech_model: settings.speech_model.clone(),
            policy: settings.poll_policy(),
            http,
        }
    }

    /// Upload, request and poll. An empty string means nothing was recognized.
    pub async fn transcribe(&self, audio: Vec<u8>, locale: &str) -> Result<String, PipelineError> {
        let uploaded_url = self.upload(audio).await?;
        let job_id = self.request_job(&uploaded_url, locale).await?;
        self.poll_job(&job_id).await
    }

    pub async fn upload(&self, audio: Vec<u8>) -> Result<String, PipelineError> {
        info!(bytes = audio.len(), "Uploading audio for transcription");

        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .header("authorization", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(audio)
            .send()
            .await
            .map_err(|e| PipelineError::TranscriptionUnavailable(format!("upload: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            error!(%status, body = %preview(&body, 200), "Audio upload failed");
            return Err(PipelineError::UploadFailed { status: status.as_u16(), body });
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::TranscriptionUnavailable(format!("upload response: {e}")))?;
        let url = parsed
            .upload_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PipelineError::TranscriptionUnavailable("upload response had no upload_url".into()))?;

        debug!(upload_url = %url, "Audio uploaded");
        Ok(url)
    }

    pub async fn request_job(&self, uploaded_url: &str, locale: &str) -> Result<JobId, PipelineError> {
        info!(locale, model = %self.speech_model, "Requesting transcription");

        let request = JobRequest {
            audio_url: uploaded_url,
            language_code: locale,
            speech_model: &self.speech_model,
        };

        let response = self
            .http
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::TranscriptionUnavailable(format!("transcript request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            error!(%status, body = %preview(&body, 200), "Transcription request failed");
            return Err(PipelineError::JobRequestFailed { status: status.as_u16(), body });
        }

        let parsed: JobResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::TranscriptionUnavailable(format!("transcript response: {e}")))?;
        let id = parsed
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PipelineError::TranscriptionUnavailable("transcript response had no id".into()))?;

        info!(job_id = %id, "Transcription requested");
        Ok(JobId(id))
    }

    /// Poll a transcript until it finishes.
    pub async fn poll_job(&self, job_id: &JobId) -> Result<String, PipelineError> {
        let outcome = poll_until(self.policy, |attempt| async move {
            match self.fetch_status(job_id).await {
                Ok(job) => {
                    debug!(%job_id, attempt, status = %job.status, "Transcription status");
                    classify_status(job_id, job)
                }
                Err(e) => Probe::Fail(e),
            }
        })
        .await;

        match outcome {
            PollOutcome::Done(text) => {
                info!(%job_id, text = %preview(&text, 100), "Transcription completed");
                Ok(text)
            }
            PollOutcome::Failed(e) => {
                error!(%job_id, error = %e, "Transcription failed");
                Err(e)
            }
            PollOutcome::TimedOut { attempts } => {
                warn!(
                    %job_id,
                    attempts,
                    ceiling_secs = self.policy.ceiling().as_secs(),
                    "Transcription timed out"
                );
                Err(PipelineError::TranscriptionTimeout {
                    job_id: job_id.to_string(),
                    attempts,
                })
            }
        }
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatus, PipelineError> {
        let response = self
            .http
            .get(format!("{}/transcript/{}", self.base_url, job_id))
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::TranscriptionUnavailable(format!("poll {job_id}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            return Err(PipelineError::TranscriptionUnavailable(format!(
                "poll {job_id} returned {status}: {}",
                preview(&body, 200)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::TranscriptionUnavailable(format!("poll {job_id} response: {e}")))
    }
}
