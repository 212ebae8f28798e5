//! Error types for the drive2ebook client.
//!
//! Failures fall into the buckets the workflow reacts to differently:
//!
//! * [`ValidationError`]: the user's input is rejected before any network
//!   call. Nothing changes in the controller.
//! * [`GatewayError`]: a backend call failed. Mid-job this drives the
//!   controller to `Failed`; during a session check it is logged and the
//!   prior session state stays.
//! * [`StartRejected`]: why a `start` command did not create a job.
//! * [`StorageError`]: the durable credential store could not be read or
//!   written. Always non-fatal for the workflow.

use std::path::PathBuf;
use thiserror::Error;

/// Generic message shown when the backend cannot be reached at all.
pub const CONNECTIVITY_MESSAGE: &str = "Failed to connect to server";

/// Errors returned by [`crate::gateway::Gateway`] calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The backend was unreachable or the connection broke mid-request.
    #[error("Failed to connect to server: {reason}")]
    Connectivity { reason: String },

    /// The backend answered with a non-2xx status.
    ///
    /// `message` is taken from the response body when it carries one, so it
    /// can be shown to the user verbatim.
    #[error("{message}")]
    RemoteRejected { status: u16, message: String },

    /// The client-side ceiling elapsed before the backend answered.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A 2xx response whose body did not have the expected shape.
    #[error("Unexpected response from server: {detail}")]
    InvalidResponse { detail: String },
}

impl GatewayError {
    /// Text suitable for the job's `errorDetail` / the status line.
    ///
    /// Remote messages pass through untouched; connectivity failures collapse
    /// to a generic message because the transport detail means nothing to
    /// the user (it is logged instead).
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Connectivity { .. } => CONNECTIVITY_MESSAGE.to_string(),
            GatewayError::RemoteRejected { message, .. } => message.clone(),
            GatewayError::Timeout { secs } => {
                format!("Conversion timed out after {secs}s without a response from the server")
            }
            GatewayError::InvalidResponse { .. } => self.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}

/// Input rejected before anything is sent to the backend.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please paste a Google Drive folder link")]
    EmptySourceReference,

    #[error("Gemini API Key is required for Smart OCR mode")]
    MissingCredential,
}

/// Why [`crate::workflow::WorkflowController::start`] refused to create a job.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StartRejected {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A job is already submitting, streaming or cancelling.
    #[error("A conversion is already in progress")]
    Busy,

    #[error("Connect your Google Drive account first")]
    NotAuthenticated,
}

/// Failures of the durable credential store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access state file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

/// Invalid client configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_rejected_message_is_verbatim() {
        let e = GatewayError::RemoteRejected {
            status: 400,
            message: "quota exceeded".into(),
        };
        assert_eq!(e.to_string(), "quota exceeded");
        assert_eq!(e.user_message(), "quota exceeded");
    }

    #[test]
    fn connectivity_hides_transport_detail_from_user() {
        let e = GatewayError::Connectivity {
            reason: "tcp connect error: Connection refused".into(),
        };
        assert_eq!(e.user_message(), CONNECTIVITY_MESSAGE);
        assert!(e.to_string().contains("Connection refused"));
    }

    #[test]
    fn timeout_message_names_the_ceiling() {
        let e = GatewayError::Timeout { secs: 600 };
        assert!(e.is_timeout());
        assert!(e.user_message().contains("600s"), "got: {}", e.user_message());
    }

    #[test]
    fn validation_converts_into_start_rejected() {
        let r: StartRejected = ValidationError::MissingCredential.into();
        assert_eq!(r, StartRejected::Validation(ValidationError::MissingCredential));
        assert!(r.to_string().contains("API Key"));
    }
}
