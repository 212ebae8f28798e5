//! Remote gateway: the backend's endpoint families behind one trait.
//!
//! ```text
//! identity   GET  /api/user          → {"logged_in": bool}
//! auth       GET  /auth/login        → {"url": "..."}
//!            GET  /auth/logout       (best effort)
//! submission POST /api/convert       {"url"}            → {"success", "error"?}
//!            POST /api/ocr/convert   {"url", "api_key"} → {"success", "error"?}
//! control    POST /api/cancel
//! progress   GET  /api/progress      text/event-stream of progress events
//! result     GET  /api/download      the PDF ebook or OCR ZIP
//! ```
//!
//! The gateway is stateless and never retries. Retry and sequencing policy
//! belong to [`crate::workflow::WorkflowController`]. [`HttpGateway`] is the
//! real implementation; tests substitute scripted ones through the
//! [`Gateway`] trait.

mod http;
pub mod sse;

pub use http::HttpGateway;

use crate::error::GatewayError;
use crate::model::{ConversionMode, ResultArtifact};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Raw `data` payloads of the progress channel, one item per event.
///
/// The channel is lazy: nothing connects until the stream is first polled,
/// and dropping the stream closes the connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// Identity endpoint payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub logged_in: bool,
}

/// Body of a submission response that came back with a 2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Relative path the backend serves the artifact from. Informational.
    #[serde(default)]
    pub download_url: Option<String>,
}

/// A fetched result artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub bytes: Vec<u8>,
    /// Filename suggested by the server through `Content-Disposition`.
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

/// Request/response and streaming access to the conversion backend.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Ask the identity endpoint whether the backend holds Drive credentials.
    async fn get_session(&self) -> Result<SessionInfo, GatewayError>;

    /// URL the user must visit to grant Drive access.
    async fn authorization_url(&self) -> Result<String, GatewayError>;

    /// Drop the backend's Drive credentials.
    async fn logout(&self) -> Result<(), GatewayError>;

    /// Submit a folder for conversion and wait for the job to finish.
    ///
    /// `credential` is only sent in OCR mode. Bounded by the configured
    /// submission ceiling; exceeding it yields [`GatewayError::Timeout`].
    async fn submit(
        &self,
        mode: ConversionMode,
        source_reference: &str,
        credential: Option<&str>,
    ) -> Result<SubmitResponse, GatewayError>;

    /// Ask the backend to stop the running job. Advisory.
    async fn cancel(&self) -> Result<(), GatewayError>;

    /// Open the server-push progress channel.
    fn progress_events(&self) -> EventStream;

    /// Fetch a completed job's artifact.
    async fn download(&self, artifact: &ResultArtifact) -> Result<DownloadedArtifact, GatewayError>;
}

/// JSON body of a submission request.
#[derive(Debug, Serialize)]
pub(crate) struct SubmitBody<'a> {
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<&'a str>,
}

impl<'a> SubmitBody<'a> {
    pub(crate) fn new(mode: ConversionMode, url: &'a str, credential: Option<&'a str>) -> Self {
        Self {
            url,
            api_key: if mode.requires_credential() { credential } else { None },
        }
    }
}
