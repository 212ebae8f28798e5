//! # drive2ebook
//!
//! Client for the Drive-to-Ebook service: authorise access to a Google Drive
//! account, submit a folder of page images for conversion, follow live
//! progress, then download or cancel the result.
//!
//! The backend does the actual work (listing and downloading images,
//! assembling a PDF, running OCR). This crate is the orchestration around it.
//!
//! ## Workflow Overview
//!
//! ```text
//!            start                      submit settles
//! Idle ──────────────▶ Submitting ─────────────────────▶ Completed | Failed
//!   ▲                     │  first progress event           │
//!   │                     ▼                                 │
//!   │                 Streaming ── cancel ──▶ Cancelling ───┘
//!   └─────────────────────────── reset ◀────────────────────┘
//! ```
//!
//! Two modes share the same workflow:
//!
//! | Mode | Endpoint | Needs credential | Result |
//! |------|----------|------------------|--------|
//! | `Pdf` | `POST /api/convert` | no | PDF ebook |
//! | `Ocr` | `POST /api/ocr/convert` | Gemini API key | ZIP of text files |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use drive2ebook::{
//!     GatewayConfig, HttpGateway, JobRequest, JsonFileStorage, SessionStore, WorkflowController,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::default();
//!     let gateway = Arc::new(HttpGateway::new(config.clone())?);
//!     let storage = Arc::new(JsonFileStorage::new("state.json"));
//!     let session = Arc::new(SessionStore::new(gateway.clone(), storage));
//!     let controller = WorkflowController::new(gateway, session, config.download_url());
//!
//!     controller.wait_for_session(1, std::time::Duration::ZERO).await;
//!     let ticket = controller.start(JobRequest::pdf("https://drive.google.com/drive/folders/abc"))?;
//!     println!("{:?}", ticket.wait().await);
//!     Ok(())
//! }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod progress;
pub mod session;
pub mod stream;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{GatewayConfig, GatewayConfigBuilder, CREDENTIAL_KEY};
pub use error::{ConfigError, GatewayError, StartRejected, StorageError, ValidationError};
pub use gateway::{DownloadedArtifact, EventStream, Gateway, HttpGateway, SessionInfo, SubmitResponse};
pub use model::{
    ConversionMode, Job, JobRequest, ResultArtifact, TerminalStatus, WorkflowSnapshot,
    WorkflowState,
};
pub use progress::{ProgressUpdate, StreamStatus};
pub use session::{CredentialStorage, HostEnvironment, JsonFileStorage, MemoryStorage, SessionStore};
pub use stream::ProgressSubscription;
pub use workflow::{JobOutcome, JobTicket, WorkflowController};
