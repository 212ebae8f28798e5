//! Typed progress events carried by the server-push channel.
//!
//! The backend pushes one JSON object per event:
//!
//! ```json
//! {"status": "processing", "percent": 42, "message": "Downloading 5/12: p005.jpg"}
//! ```
//!
//! [`parse_event`] turns the `data` payload of one event into a
//! [`ProgressUpdate`]. Anything that does not carry a numeric `percent` and a
//! string `message` is treated as malformed and returns `None`; the consumer
//! drops it and keeps the channel open.

use serde::{Deserialize, Serialize};

/// Stream-side status attached to a progress event.
///
/// Only the terminal variants matter to the client. They make the consumer
/// close its channel; overall job success is still decided by the
/// submission response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Complete,
    Error,
    /// The backend ends its stream with this after a cancel request.
    Cancelled,
}

impl StreamStatus {
    fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "complete" => Some(StreamStatus::Complete),
            "error" => Some(StreamStatus::Error),
            "cancelled" => Some(StreamStatus::Cancelled),
            // "idle", "starting", "processing", or anything newer.
            _ => None,
        }
    }
}

/// One progress event after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Clamped to 0–100.
    pub percent: u8,
    pub message: String,
    pub status: Option<StreamStatus>,
}

impl ProgressUpdate {
    pub fn is_terminal(&self) -> bool {
        self.status.is_some()
    }
}

#[derive(Deserialize)]
struct WireEvent {
    percent: f64,
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Parse the `data` payload of one server-push event.
///
/// Returns `None` for payloads that are not a progress event.
pub fn parse_event(data: &str) -> Option<ProgressUpdate> {
    let wire: WireEvent = serde_json::from_str(data).ok()?;
    if !wire.percent.is_finite() {
        return None;
    }
    Some(ProgressUpdate {
        percent: wire.percent.clamp(0.0, 100.0).round() as u8,
        message: wire.message,
        status: wire.status.as_deref().and_then(StreamStatus::from_wire),
    })
}
