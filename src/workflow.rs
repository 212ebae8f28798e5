//! Conversion workflow controller.
//!
//! The controller owns the job lifecycle and is the only component that
//! moves the overall state. A presentation layer drives it through a handful
//! of commands (`start`, `cancel`, `reset`, `sign_out`, …) and renders the
//! [`WorkflowSnapshot`] it publishes through [`WorkflowController::subscribe`].
//!
//! ## One job, two outcomes
//!
//! Starting a job opens the progress channel and issues the submission
//! concurrently. Both finish independently, and [`reconcile`] folds them into
//! one result:
//!
//! * progress updates are applied in arrival order while the submission is
//!   pending;
//! * the submission result is authoritative. When it settles the channel is
//!   closed, and any update still in flight is discarded;
//! * the channel's own `complete`/`error` signal only moves the bar and marks
//!   `stream_finished`. A dead or silent channel changes nothing.
//!
//! Cancellation is advisory: the cancel request is fired without waiting and
//! the job still ends when the original submission settles (bounded by the
//! submission timeout). Sign-out and [`WorkflowController::shutdown`] are the
//! only paths that abandon a pending submission.

use crate::error::{GatewayError, StartRejected};
use crate::gateway::{Gateway, SubmitResponse};
use crate::model::{
    ConversionMode, Job, JobRequest, ResultArtifact, TerminalStatus, WorkflowSnapshot,
    WorkflowState,
};
use crate::progress::ProgressUpdate;
use crate::session::{HostEnvironment, SessionStore};
use crate::stream::ProgressSubscription;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const STATUS_CONNECTED: &str = "Successfully connected to Google Drive!";
pub const STATUS_CANCELLING: &str = "Cancelling...";
pub const STATUS_SUCCESS: &str = "Conversion successful!";
pub const STATUS_BACKEND_UNREACHABLE: &str =
    "Error connecting to backend. Make sure the server is running.";

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(ResultArtifact),
    Failed(String),
}

/// Handle returned by [`WorkflowController::start`].
#[derive(Debug)]
pub struct JobTicket {
    job_id: u64,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Wait for the job to settle.
    ///
    /// `None` when the job was torn down (sign-out, shutdown) before its
    /// submission settled.
    pub async fn wait(self) -> Option<JobOutcome> {
        self.outcome.await.ok()
    }
}

/// Drive `submit` to completion while feeding progress updates to `apply`.
///
/// The submission wins every race: it is polled first, and once it settles
/// the subscription is closed before returning, so no update can land after
/// the terminal result. A subscription that closes early (terminal event,
/// transport failure) simply stops contributing.
pub async fn reconcile<F, T>(
    submit: F,
    subscription: &mut ProgressSubscription,
    mut apply: impl FnMut(ProgressUpdate),
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(submit);
    loop {
        tokio::select! {
            biased;
            result = &mut submit => {
                subscription.close();
                return result;
            }
            update = subscription.next_update(), if subscription.is_open() => {
                if let Some(update) = update {
                    apply(update);
                }
            }
        }
    }
}

struct ActiveJob {
    id: u64,
    teardown: oneshot::Sender<()>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    snapshot: WorkflowSnapshot,
    active: Option<ActiveJob>,
    next_job_id: u64,
}

struct Shared {
    gateway: Arc<dyn Gateway>,
    session: Arc<SessionStore>,
    artifact_locator: String,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<WorkflowSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate under the lock and publish the snapshot if it changed.
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.lock();
        let out = f(&mut inner);
        let snapshot = &inner.snapshot;
        self.state_tx.send_if_modified(|current| {
            if current != snapshot {
                *current = snapshot.clone();
                true
            } else {
                false
            }
        });
        out
    }

    /// Mirror the session store's flag into the snapshot.
    fn sync_session(&self) {
        let authenticated = self.session.is_authenticated();
        self.update(|inner| {
            let snapshot = &mut inner.snapshot;
            snapshot.authenticated = authenticated;
            match (authenticated, snapshot.state) {
                (true, WorkflowState::LoggedOut) => snapshot.state = WorkflowState::Idle,
                (false, state) if !state.is_active() => {
                    snapshot.state = WorkflowState::LoggedOut;
                    snapshot.job = None;
                    snapshot.artifact = None;
                }
                _ => {}
            }
        });
    }

    fn apply_progress(&self, job_id: u64, update: ProgressUpdate) {
        self.update(|inner| {
            let snapshot = &mut inner.snapshot;
            let Some(job) = snapshot.job.as_mut().filter(|job| job.id == job_id) else {
                return;
            };
            if job.is_terminal() {
                return;
            }
            job.progress_percent = update.percent;
            job.progress_message = update.message;
            if update.status.is_some() {
                job.stream_finished = true;
            }
            if snapshot.state == WorkflowState::Submitting {
                snapshot.state = WorkflowState::Streaming;
            }
        });
    }

    /// Apply the submission result. `None` if the job is no longer current.
    fn settle(
        &self,
        job_id: u64,
        result: Result<SubmitResponse, GatewayError>,
    ) -> Option<JobOutcome> {
        let locator = self.artifact_locator.clone();
        self.update(|inner| {
            if inner.active.as_ref().map(|a| a.id) == Some(job_id) {
                inner.active = None;
            }
            let snapshot = &mut inner.snapshot;
            let job = snapshot.job.as_mut().filter(|job| job.id == job_id)?;
            if job.is_terminal() {
                return None;
            }

            let failure = match result {
                Ok(response) if response.success => None,
                Ok(response) => Some(
                    response
                        .error
                        .filter(|e| !e.is_empty())
                        .unwrap_or_else(|| "Conversion failed".to_string()),
                ),
                Err(e) => {
                    warn!("Job {}: submission failed: {}", job_id, e);
                    Some(e.user_message())
                }
            };

            match failure {
                None => {
                    info!("Job {}: completed", job_id);
                    job.terminal = TerminalStatus::Complete;
                    let artifact = ResultArtifact { locator };
                    snapshot.artifact = Some(artifact.clone());
                    snapshot.state = WorkflowState::Completed;
                    snapshot.status_message = Some(STATUS_SUCCESS.to_string());
                    Some(JobOutcome::Completed(artifact))
                }
                Some(detail) => {
                    info!("Job {}: failed: {}", job_id, detail);
                    job.terminal = TerminalStatus::Error;
                    job.error_detail = Some(detail.clone());
                    snapshot.artifact = None;
                    snapshot.state = WorkflowState::Failed;
                    snapshot.status_message = Some(format!("Error: {detail}"));
                    Some(JobOutcome::Failed(detail))
                }
            }
        })
    }

    /// Detach the active job (if any) and signal its task to stop.
    fn take_active(inner: &mut Inner) -> Option<JoinHandle<()>> {
        let mut active = inner.active.take()?;
        debug!("Job {}: tearing down", active.id);
        let _ = active.teardown.send(());
        active.task.take()
    }
}

async fn run_job(
    shared: Arc<Shared>,
    job_id: u64,
    request: JobRequest,
    // Fires on an explicit teardown and also if the sender is dropped.
    mut teardown: oneshot::Receiver<()>,
    outcome_tx: oneshot::Sender<JobOutcome>,
) {
    let mut subscription = ProgressSubscription::open(shared.gateway.as_ref(), job_id);
    let credential = request.non_empty_credential();
    let submit = shared
        .gateway
        .submit(request.mode, &request.source_reference, credential);

    let result = tokio::select! {
        biased;
        _ = &mut teardown => {
            subscription.close();
            debug!("Job {}: abandoned before the submission settled", job_id);
            return;
        }
        result = reconcile(submit, &mut subscription, |update| shared.apply_progress(job_id, update)) => result,
    };

    if let Some(outcome) = shared.settle(job_id, result) {
        let _ = outcome_tx.send(outcome);
    }
}

/// The conversion workflow state machine.
///
/// Cheap to clone; clones share state. Commands that spawn work (`start`,
/// `cancel`) must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct WorkflowController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowController")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl WorkflowController {
    /// `artifact_locator` is where a completed job's result is downloaded
    /// from, normally [`crate::GatewayConfig::download_url`].
    pub fn new(
        gateway: Arc<dyn Gateway>,
        session: Arc<SessionStore>,
        artifact_locator: impl Into<String>,
    ) -> Self {
        let snapshot = WorkflowSnapshot {
            authenticated: session.is_authenticated(),
            state: if session.is_authenticated() {
                WorkflowState::Idle
            } else {
                WorkflowState::LoggedOut
            },
            ..WorkflowSnapshot::default()
        };
        let (state_tx, _) = watch::channel(snapshot.clone());
        Self {
            shared: Arc::new(Shared {
                gateway,
                session,
                artifact_locator: artifact_locator.into(),
                inner: Mutex::new(Inner {
                    snapshot,
                    active: None,
                    next_job_id: 1,
                }),
                state_tx,
            }),
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.shared.session
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.shared.lock().snapshot.clone()
    }

    pub fn state(&self) -> WorkflowState {
        self.shared.lock().snapshot.state
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.shared.state_tx.subscribe()
    }

    /// Startup: consume the redirect marker (once), then ask the backend
    /// whether we are signed in. Returns the resulting authentication flag.
    pub async fn initialize(&self, host: &dyn HostEnvironment) -> bool {
        if self.shared.session.complete_authorization(host) {
            self.shared.update(|inner| {
                inner.snapshot.status_message = Some(STATUS_CONNECTED.to_string());
            });
        }
        self.shared.sync_session();
        self.shared.session.check_session().await;
        self.shared.sync_session();
        self.shared.session.is_authenticated()
    }

    /// Poll the identity endpoint until it reports a session.
    ///
    /// Used after [`Self::begin_authorization`] by hosts that cannot receive
    /// the redirect marker.
    pub async fn wait_for_session(&self, attempts: u32, interval: Duration) -> bool {
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(interval).await;
            }
            let authenticated = self.shared.session.check_session().await;
            self.shared.sync_session();
            if authenticated {
                return true;
            }
            debug!("Session not established yet ({}/{})", attempt + 1, attempts);
        }
        false
    }

    /// Send the host to the authorization page.
    pub async fn begin_authorization(&self, host: &dyn HostEnvironment) -> Result<(), GatewayError> {
        let result = self.shared.session.begin_authorization(host).await;
        if let Err(e) = &result {
            warn!("Could not start authorization: {}", e);
            self.shared.update(|inner| {
                inner.snapshot.status_message = Some(STATUS_BACKEND_UNREACHABLE.to_string());
            });
        }
        result
    }

    /// Remember the preferred mode. Does not touch an in-flight job.
    pub fn select_mode(&self, mode: ConversionMode) {
        self.shared.update(|inner| inner.snapshot.mode = mode);
    }

    /// Start a conversion.
    ///
    /// Rejected without any network call when signed out, when a job is
    /// already in flight, or when the request fails validation. Otherwise
    /// the credential is saved, the previous result is cleared, and the
    /// progress channel and the submission are started together.
    pub fn start(&self, request: JobRequest) -> Result<JobTicket, StartRejected> {
        let (job_id, teardown_rx, outcome_tx, outcome_rx) = self.shared.update(|inner| {
            if inner.snapshot.state.is_active() || inner.active.is_some() {
                return Err(StartRejected::Busy);
            }
            if !inner.snapshot.authenticated {
                return Err(StartRejected::NotAuthenticated);
            }
            request.validate()?;

            let job_id = inner.next_job_id;
            inner.next_job_id += 1;
            info!("Job {}: starting {} conversion", job_id, request.mode);

            let snapshot = &mut inner.snapshot;
            snapshot.mode = request.mode;
            snapshot.job = Some(Job::new(job_id, &request));
            snapshot.artifact = None;
            snapshot.status_message = None;
            snapshot.state = WorkflowState::Submitting;

            let (teardown_tx, teardown_rx) = oneshot::channel();
            let (outcome_tx, outcome_rx) = oneshot::channel();
            inner.active = Some(ActiveJob {
                id: job_id,
                teardown: teardown_tx,
                task: None,
            });
            Ok((job_id, teardown_rx, outcome_tx, outcome_rx))
        })?;

        if let Some(credential) = request.non_empty_credential() {
            if let Err(e) = self.shared.session.save_credential(credential) {
                warn!("Could not persist credential: {}", e);
            }
        }

        let task = tokio::spawn(run_job(
            Arc::clone(&self.shared),
            job_id,
            request,
            teardown_rx,
            outcome_tx,
        ));
        // The job may already have been torn down or settled; its task
        // then finishes on its own.
        if let Some(active) = self.shared.lock().active.as_mut().filter(|a| a.id == job_id) {
            active.task = Some(task);
        }

        Ok(JobTicket {
            job_id,
            outcome: outcome_rx,
        })
    }

    /// Ask the backend to stop the running job.
    ///
    /// Only valid while submitting or streaming. The request is fired in the
    /// background and its result ignored; the job still ends when its
    /// submission settles. Returns whether the command was accepted.
    pub fn cancel(&self) -> bool {
        let accepted = self.shared.update(|inner| {
            let snapshot = &mut inner.snapshot;
            if !matches!(
                snapshot.state,
                WorkflowState::Submitting | WorkflowState::Streaming
            ) {
                return false;
            }
            snapshot.state = WorkflowState::Cancelling;
            snapshot.status_message = Some(STATUS_CANCELLING.to_string());
            true
        });

        if accepted {
            info!("Cancel requested");
            let gateway = Arc::clone(&self.shared.gateway);
            tokio::spawn(async move {
                if let Err(e) = gateway.cancel().await {
                    warn!("Cancel request failed: {}", e);
                }
            });
        }
        accepted
    }

    /// Back to `Idle` after a job completed or failed.
    pub fn reset(&self) -> bool {
        self.shared.update(|inner| {
            let snapshot = &mut inner.snapshot;
            if !snapshot.state.is_settled() {
                return false;
            }
            snapshot.job = None;
            snapshot.artifact = None;
            snapshot.status_message = None;
            snapshot.state = WorkflowState::Idle;
            true
        })
    }

    /// Sign out and drop everything tied to the session.
    ///
    /// Local state is cleared and any in-flight job torn down right away;
    /// the backend logout runs alongside and is best effort. The progress
    /// channel is closed before this returns.
    pub async fn sign_out(&self) {
        let task = self.shared.update(|inner| {
            let task = Shared::take_active(inner);
            let snapshot = &mut inner.snapshot;
            snapshot.authenticated = false;
            snapshot.job = None;
            snapshot.artifact = None;
            snapshot.status_message = None;
            snapshot.state = WorkflowState::LoggedOut;
            task
        });
        let abandon = async {
            if let Some(task) = task {
                let _ = task.await;
            }
        };
        tokio::join!(self.shared.session.sign_out(), abandon);
        self.shared.sync_session();
        info!("Signed out");
    }

    /// Component teardown: abandon any in-flight job and close its channel.
    /// The session is left as is.
    pub async fn shutdown(&self) {
        let task = self.shared.update(|inner| {
            let task = Shared::take_active(inner);
            let snapshot = &mut inner.snapshot;
            if snapshot.state.is_active() {
                snapshot.job = None;
                snapshot.status_message = None;
                snapshot.state = if snapshot.authenticated {
                    WorkflowState::Idle
                } else {
                    WorkflowState::LoggedOut
                };
            }
            task
        });
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
