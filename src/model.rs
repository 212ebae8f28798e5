//! Domain types shared by the gateway, the stream consumer and the workflow.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing pipeline selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Assemble the folder's images into a PDF ebook. (default)
    #[default]
    Pdf,
    /// OCR the images with the user's Gemini key and return text files.
    Ocr,
}

impl ConversionMode {
    /// Whether this mode sends the OCR credential with the submission.
    pub fn requires_credential(self) -> bool {
        matches!(self, ConversionMode::Ocr)
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionMode::Pdf => f.write_str("pdf"),
            ConversionMode::Ocr => f.write_str("ocr"),
        }
    }
}

/// What the user asked to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub mode: ConversionMode,
    /// Drive folder link as pasted. Only checked for emptiness here; the
    /// backend decides whether it is a usable folder.
    pub source_reference: String,
    pub credential: Option<String>,
}

impl JobRequest {
    pub fn pdf(source_reference: impl Into<String>) -> Self {
        Self {
            mode: ConversionMode::Pdf,
            source_reference: source_reference.into(),
            credential: None,
        }
    }

    pub fn ocr(source_reference: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            mode: ConversionMode::Ocr,
            source_reference: source_reference.into(),
            credential: Some(credential.into()),
        }
    }

    /// The credential if one was given and it is not blank.
    pub fn non_empty_credential(&self) -> Option<&str> {
        self.credential.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Local checks run before any network call.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_reference.trim().is_empty() {
            return Err(ValidationError::EmptySourceReference);
        }
        if self.mode.requires_credential() && self.non_empty_credential().is_none() {
            return Err(ValidationError::MissingCredential);
        }
        Ok(())
    }
}

/// Terminal status of a job. `None` while it is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    #[default]
    None,
    Complete,
    Error,
}

/// The active conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: u64,
    pub mode: ConversionMode,
    pub source_reference: String,
    #[serde(skip)]
    pub credential: Option<String>,
    /// 0–100, owned by the progress stream while it is open.
    pub progress_percent: u8,
    pub progress_message: String,
    pub terminal: TerminalStatus,
    pub error_detail: Option<String>,
    /// The progress stream reported `complete`/`error`/`cancelled` ahead of
    /// the submission response. Advisory only: lets a UI stop its spinner.
    pub stream_finished: bool,
}

impl Job {
    pub(crate) fn new(id: u64, request: &JobRequest) -> Self {
        Self {
            id,
            mode: request.mode,
            source_reference: request.source_reference.clone(),
            credential: request.non_empty_credential().map(str::to_owned),
            progress_percent: 0,
            progress_message: "Starting...".to_string(),
            terminal: TerminalStatus::None,
            error_detail: None,
            stream_finished: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal != TerminalStatus::None
    }
}

/// Downloadable output of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub locator: String,
}

/// Controller states.
///
/// ```text
/// LoggedOut ─▶ Idle ─▶ Submitting ─▶ Streaming ─▶ Completed | Failed
///                          │             │
///                          └─▶ Cancelling ◀┘ ─▶ Completed | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum WorkflowState {
    #[default]
    LoggedOut,
    Idle,
    Submitting,
    Streaming,
    Cancelling,
    Completed,
    Failed,
}

impl WorkflowState {
    /// A job is in flight; `start` is refused and `cancel` is accepted.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            WorkflowState::Submitting | WorkflowState::Streaming | WorkflowState::Cancelling
        )
    }

    pub fn is_settled(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }
}

/// Everything a presentation layer needs to render the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    pub authenticated: bool,
    pub mode: ConversionMode,
    pub job: Option<Job>,
    pub artifact: Option<ResultArtifact>,
    /// User-facing status line.
    pub status_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_rejected_before_credential() {
        let req = JobRequest {
            mode: ConversionMode::Ocr,
            source_reference: "  ".into(),
            credential: None,
        };
        assert_eq!(req.validate(), Err(ValidationError::EmptySourceReference));
    }

    #[test]
    fn ocr_needs_non_blank_credential() {
        for cred in [None, Some(""), Some("   ")] {
            let req = JobRequest {
                mode: ConversionMode::Ocr,
                source_reference: "https://drive/folder/abc".into(),
                credential: cred.map(str::to_owned),
            };
            assert_eq!(req.validate(), Err(ValidationError::MissingCredential));
        }
        assert!(JobRequest::ocr("https://drive/folder/abc", "key").validate().is_ok());
    }

    #[test]
    fn pdf_ignores_missing_credential() {
        assert!(JobRequest::pdf("https://drive/folder/abc").validate().is_ok());
    }

    #[test]
    fn mode_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&ConversionMode::Ocr).unwrap(), "\"ocr\"");
        assert_eq!(ConversionMode::Pdf.to_string(), "pdf");
    }

    #[test]
    fn active_states() {
        assert!(WorkflowState::Cancelling.is_active());
        assert!(!WorkflowState::Failed.is_active());
        assert!(WorkflowState::Completed.is_settled());
    }
}
