//! Progress stream consumer.
//!
//! A [`ProgressSubscription`] owns the server-push channel of exactly one
//! job. It turns raw event payloads into [`ProgressUpdate`]s, drops payloads
//! that do not parse, and closes itself as soon as it sees a terminal
//! status or the transport fails.
//!
//! Closing is enforced by the type, not by callers: [`ProgressSubscription::close`]
//! releases the channel the first time and is a no-op afterwards, and `Drop`
//! calls it, so a subscription abandoned on any path (completion, error,
//! cancellation, teardown) still releases its connection exactly once.

use crate::gateway::{EventStream, Gateway};
use crate::progress::{parse_event, ProgressUpdate};
use futures::StreamExt;
use tracing::{debug, warn};

/// The progress channel of one job.
///
/// The backend keeps replaying the last job's final event until a new
/// submission resets its tracker, so a channel that connects ahead of the
/// submission can see a stale `complete` and close itself early. That only
/// affects the bar: the submission response still decides the outcome.
pub struct ProgressSubscription {
    job_id: u64,
    events: Option<EventStream>,
}

impl std::fmt::Debug for ProgressSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSubscription")
            .field("job_id", &self.job_id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ProgressSubscription {
    /// Open the progress channel for `job_id`.
    pub fn open(gateway: &dyn Gateway, job_id: u64) -> Self {
        debug!("Job {}: opening progress channel", job_id);
        Self::from_events(job_id, gateway.progress_events())
    }

    pub(crate) fn from_events(job_id: u64, events: EventStream) -> Self {
        Self {
            job_id,
            events: Some(events),
        }
    }

    pub fn is_open(&self) -> bool {
        self.events.is_some()
    }

    /// Release the channel. Returns `true` only for the call that closed it.
    pub fn close(&mut self) -> bool {
        match self.events.take() {
            Some(events) => {
                drop(events);
                debug!("Job {}: progress channel closed", self.job_id);
                true
            }
            None => false,
        }
    }

    /// Wait for the next well-formed update.
    ///
    /// Returns `None` once the channel is closed, including when it closes
    /// itself because the server ended the stream or the transport failed.
    /// A terminal update is returned after the channel has been closed, so
    /// it is always the last one. Cancel-safe.
    pub async fn next_update(&mut self) -> Option<ProgressUpdate> {
        loop {
            let events = self.events.as_mut()?;
            match events.next().await {
                Some(Ok(data)) => match parse_event(&data) {
                    Some(update) => {
                        if update.is_terminal() {
                            self.close();
                        }
                        return Some(update);
                    }
                    None => debug!("Job {}: dropping malformed progress event {:?}", self.job_id, data),
                },
                Some(Err(e)) => {
                    warn!("Job {}: progress channel failed: {}", self.job_id, e);
                    self.close();
                    return None;
                }
                None => {
                    debug!("Job {}: progress channel ended by server", self.job_id);
                    self.close();
                    return None;
                }
            }
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::{DownloadedArtifact, SessionInfo, SubmitResponse};
    use crate::model::{ConversionMode, ResultArtifact};
    use crate::progress::StreamStatus;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// Serves one canned event stream.
    struct CannedEvents(Mutex<Option<Vec<Result<String, GatewayError>>>>);

    impl CannedEvents {
        fn new(events: Vec<Result<&str, GatewayError>>) -> Self {
            Self(Mutex::new(Some(
                events.into_iter().map(|e| e.map(str::to_owned)).collect(),
            )))
        }
    }

    #[async_trait]
    impl Gateway for CannedEvents {
        async fn get_session(&self) -> Result<SessionInfo, GatewayError> {
            unimplemented!()
        }
        async fn authorization_url(&self) -> Result<String, GatewayError> {
            unimplemented!()
        }
        async fn logout(&self) -> Result<(), GatewayError> {
            unimplemented!()
        }
        async fn submit(
            &self,
            _: ConversionMode,
            _: &str,
            _: Option<&str>,
        ) -> Result<SubmitResponse, GatewayError> {
            unimplemented!()
        }
        async fn cancel(&self) -> Result<(), GatewayError> {
            unimplemented!()
        }
        fn progress_events(&self) -> EventStream {
            let events = self.0.lock().unwrap().take().unwrap_or_default();
            Box::pin(stream::iter(events))
        }
        async fn download(&self, _: &ResultArtifact) -> Result<DownloadedArtifact, GatewayError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let gw = CannedEvents::new(vec![
            Ok("garbage"),
            Ok(r#"{"percent":40,"message":"scanning"}"#),
        ]);
        let mut sub = ProgressSubscription::open(&gw, 1);
        let update = sub.next_update().await.unwrap();
        assert_eq!(update.percent, 40);
        assert!(sub.is_open());
    }

    #[tokio::test]
    async fn terminal_event_closes_channel_and_is_last() {
        let gw = CannedEvents::new(vec![
            Ok(r#"{"status":"complete","percent":100,"message":"Done!"}"#),
            Ok(r#"{"percent":7,"message":"stale"}"#),
        ]);
        let mut sub = ProgressSubscription::open(&gw, 1);
        let update = sub.next_update().await.unwrap();
        assert_eq!(update.status, Some(StreamStatus::Complete));
        assert!(!sub.is_open());
        assert_eq!(sub.next_update().await, None);
    }

    #[tokio::test]
    async fn transport_failure_closes_silently() {
        let gw = CannedEvents::new(vec![
            Err(GatewayError::Connectivity {
                reason: "reset".into(),
            }),
            Ok(r#"{"percent":7,"message":"never seen"}"#),
        ]);
        let mut sub = ProgressSubscription::open(&gw, 1);
        assert_eq!(sub.next_update().await, None);
        assert!(!sub.is_open());
    }

    #[test]
    fn close_reports_only_first_call() {
        let gw = CannedEvents::new(vec![]);
        let mut sub = ProgressSubscription::open(&gw, 1);
        assert!(sub.close());
        assert!(!sub.close());
        assert!(!sub.is_open());
    }
}
