use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use client_logging::{client_debug, client_info, client_warn};
use docsearch_core::{ClientError, JobId, JobRecord, JobStatus, PollOutcome};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::PollSettings;

/// Where the poller reads a job's current status from.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn check(&self, job_id: JobId) -> Result<JobStatus, ClientError>;
}

pub struct JobPoller {
    source: Arc<dyn StatusSource>,
    settings: PollSettings,
}

impl JobPoller {
    pub fn new(source: Arc<dyn StatusSource>, settings: PollSettings) -> Self {
        Self { source, settings }
    }

    /// Polls `job_id` on a background task until it reaches a terminal state,
    /// a check fails, or the maximum duration passes. `on_terminal` receives
    /// that outcome exactly once; it is not called when the watch is cancelled.
    pub fn watch<F>(&self, job_id: JobId, on_terminal: F) -> PollHandle
    where
        F: FnOnce(PollOutcome) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (latest_tx, latest_rx) = watch::channel(JobRecord::new(job_id));
        let source = self.source.clone();
        let settings = self.settings;
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let polling = poll_until_terminal(source.as_ref(), settings, job_id, latest_tx);
            let outcome = tokio::select! {
                _ = token.cancelled() => PollOutcome::Cancelled,
                outcome = with_deadline(settings.max_duration, polling) => outcome,
            };
            match &outcome {
                PollOutcome::Cancelled => client_debug!("Stopped watching job {}", job_id),
                other => {
                    client_info!("Job {} finished watching: {:?}", job_id, other);
                    on_terminal(outcome.clone());
                }
            }
            outcome
        });

        PollHandle {
            job_id,
            cancel,
            latest: latest_rx,
            task,
        }
    }
}

async fn with_deadline(
    max_duration: Option<Duration>,
    polling: impl Future<Output = PollOutcome>,
) -> PollOutcome {
    match max_duration {
        Some(limit) => tokio::time::timeout(limit, polling)
            .await
            .unwrap_or(PollOutcome::TimedOut),
        None => polling.await,
    }
}

async fn poll_until_terminal(
    source: &dyn StatusSource,
    settings: PollSettings,
    job_id: JobId,
    latest: watch::Sender<JobRecord>,
) -> PollOutcome {
    let mut record = JobRecord::new(job_id);
    tokio::time::sleep(settings.initial_delay).await;
    loop {
        let status = match source.check(job_id).await {
            Ok(status) => status,
            Err(err) => {
                client_warn!("Status check for job {} failed: {}", job_id, err);
                return PollOutcome::Unknown(err);
            }
        };
        if !record.advance(&status) {
            client_warn!(
                "Ignoring status {} for job {} already at {}",
                status.process_status,
                job_id,
                record.state
            );
        }
        latest.send_replace(record);

        if let Some(outcome) = PollOutcome::from_terminal(record.state) {
            return outcome;
        }
        client_debug!("Job {} is {} ({}%)", job_id, record.state, record.progress);
        tokio::time::sleep(settings.interval).await;
    }
}

/// Cancellable handle to one watch. Dropping it leaves the watch running;
/// only [`PollHandle::cancel`] stops it.
pub struct PollHandle {
    job_id: JobId,
    cancel: CancellationToken,
    latest: watch::Receiver<JobRecord>,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Most recent view of the job; `pending` until the first check returns.
    pub fn latest(&self) -> JobRecord {
        *self.latest.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Lets the watch run to completion in the background.
    pub fn detach(self) {}

    pub async fn wait(self) -> PollOutcome {
        self.task.await.unwrap_or(PollOutcome::Cancelled)
    }
}
