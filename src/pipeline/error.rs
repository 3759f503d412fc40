//! Error taxonomy for the query pipeline.

/// Everything that can abort (or, for rendering, degrade) one pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Answer backend unreachable, returned a non-success status, or sent
    /// something we could not parse.
    #[error("answer backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("answer {correlation_id} not ready after {attempts} polls")]
    BackendTimeout {
        correlation_id: String,
        attempts: u32,
    },

    #[error("audio upload failed: {status}: {body}")]
    UploadFailed { status: u16, body: String },

    #[error("transcription request failed: {status}: {body}")]
    JobRequestFailed { status: u16, body: String },

    #[error("transcription {job_id} failed: {detail}")]
    TranscriptionFailed { job_id: String, detail: String },

    #[error("transcription {job_id} not finished after {attempts} polls")]
    TranscriptionTimeout { job_id: String, attempts: u32 },

    #[error("unknown transcription status {status:?} for {job_id}")]
    UnknownTranscriptionStatus { job_id: String, status: String },

    /// Speech backend unreachable or answering polls with a non-success status.
    #[error("transcription backend unavailable: {0}")]
    TranscriptionUnavailable(String),

    #[error("markup rendering failed: {0}")]
    RenderFailure(String),

    /// The chat collaborator refused a send/edit/delete/download.
    #[error("chat transport error: {0}")]
    Transport(String),

    #[error("scratch file I/O: {0}")]
    Scratch(#[from] std::io::Error),
}

impl PipelineError {
    /// Errors raised while turning a voice message into text.
    ///
    /// These get the voice-specific user message rather than the generic one.
    pub fn is_recognition_failure(&self) -> bool {
        matches!(
            self,
            Self::UploadFailed { .. }
                | Self::JobRequestFailed { .. }
                | Self::TranscriptionFailed { .. }
                | Self::TranscriptionTimeout { .. }
                | Self::UnknownTranscriptionStatus { .. }
                | Self::TranscriptionUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognition_failures_are_classified() {
        let err = PipelineError::TranscriptionFailed {
            job_id: "j1".into(),
            detail: "bad audio".into(),
        };
        assert!(err.is_recognition_failure());
        assert!(err.to_string().contains("bad audio"));

        let err = PipelineError::UploadFailed { status: 413, body: "too large".into() };
        assert!(err.is_recognition_failure());
    }

    #[test]
    fn test_backend_errors_are_not_recognition_failures() {
        assert!(!PipelineError::BackendUnavailable("down".into()).is_recognition_failure());
        let timeout = PipelineError::BackendTimeout {
            correlation_id: "abc".into(),
            attempts: 6,
        };
        assert!(!timeout.is_recognition_failure());
        assert_eq!(timeout.to_string(), "answer abc not ready after 6 polls");
    }
}
