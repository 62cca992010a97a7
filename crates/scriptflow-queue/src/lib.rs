mod job;

pub use job::{Job, JobFailure, JobView, ProcessOutcome, QueueStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use scriptflow_core::{JobId, JobStatus, JobType, QueueSettings};
use serde_json::Value;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    #[error("Invalid job transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Runs the work behind a job. Errors and panics both end the job as FAILED.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> std::result::Result<Value, JobFailure>;
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// FIFO queue of jobs advanced one at a time by [`process_next`](JobQueue::process_next).
pub struct JobQueue {
    jobs: Arc<DashMap<JobId, Job>>,
    pending: Mutex<VecDeque<JobId>>,
    processor: Arc<dyn JobProcessor>,
    settings: QueueSettings,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("jobs", &self.jobs.len())
            .field("pending", &self.pending.lock().len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl JobQueue {
    pub fn new(processor: Arc<dyn JobProcessor>, settings: QueueSettings) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            processor,
            settings,
            worker: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn enqueue(&self, job_type: JobType, payload: Value) -> JobId {
        self.sweep_expired_at(Utc::now());

        let job = Job::new(job_type, payload);
        let id = job.id;
        self.jobs.insert(id, job);
        let depth = {
            let mut pending = self.pending.lock();
            pending.push_back(id);
            pending.len()
        };

        counter!("jobs_enqueued", "type" => job_type.as_str()).increment(1);
        gauge!("job_queue_depth").set(depth as f64);
        info!(job_id = %id, job_type = %job_type, "Job enqueued");
        id
    }

    pub fn get_status(&self, id: JobId) -> Result<JobView> {
        self.jobs
            .get(&id)
            .map(|job| job.view())
            .ok_or(QueueError::JobNotFound(id))
    }

    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).map(|job| job.clone())
    }

    /// Claim the oldest queued job, run it to a terminal state and report what happened.
    ///
    /// An empty queue yields `processed: false`. A job that fails still counts
    /// as processed; its error is recorded on the job. The job runs on its own
    /// task, so dropping the returned future does not strand it in PROCESSING.
    pub async fn process_next(&self) -> ProcessOutcome {
        self.sweep_expired_at(Utc::now());

        let job = match self.claim_next() {
            Some(job) => job,
            None => return ProcessOutcome::idle(),
        };
        let id = job.id;
        info!(job_id = %id, job_type = %job.job_type, "Processing job");

        let task = tokio::spawn(run_job(
            Arc::clone(&self.jobs),
            Arc::clone(&self.processor),
            job,
        ));
        let (status, message) = match task.await {
            Ok(finished) => finished,
            Err(e) => {
                let message = format!("Job task aborted: {}", e);
                record_outcome(&self.jobs, id, JobStatus::Failed, None, Some(message.clone()));
                error!(job_id = %id, "{}", message);
                (JobStatus::Failed, format!("Job {} failed: {}", id, message))
            }
        };

        ProcessOutcome {
            processed: true,
            message,
            job_id: Some(id),
            status: Some(status),
        }
    }

    /// Pop and mark PROCESSING under the pending lock so no two callers claim the same job.
    fn claim_next(&self) -> Option<Job> {
        let mut pending = self.pending.lock();
        while let Some(id) = pending.pop_front() {
            let Some(mut job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Queued {
                debug!(job_id = %id, status = %job.status, "skipping non-queued job");
                continue;
            }
            job.status = JobStatus::Processing;
            job.progress = JobStatus::Processing.progress();
            job.started_at = Some(Utc::now());
            gauge!("job_queue_depth").set(pending.len() as f64);
            return Some(job.clone());
        }
        gauge!("job_queue_depth").set(0.0);
        None
    }

    #[cfg(test)]
    fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        transition(&self.jobs, id, to, result, error)
    }

    /// Evict terminal jobs older than their retention. Returns the number removed.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let completed = self.settings.completed_retention();
        let failed = self.settings.failed_retention();
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            let retention = match job.status {
                JobStatus::Completed => completed,
                JobStatus::Failed => failed,
                _ => return true,
            };
            match job.completed_at.map(|at| (now - at).to_std()) {
                Some(Ok(age)) => age < retention,
                _ => true,
            }
        });
        let removed = before.saturating_sub(self.jobs.len());
        if removed > 0 {
            debug!(removed, "evicted expired jobs");
        }
        removed
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.jobs.iter() {
            stats.total += 1;
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every job, queued or not.
    pub fn reset(&self) {
        self.pending.lock().clear();
        self.jobs.clear();
        gauge!("job_queue_depth").set(0.0);
        info!("Job queue reset");
    }

    /// Start a task that drains the queue and then sleeps for the poll interval.
    /// Returns `false` when a worker is already running.
    pub fn spawn_worker(self: &Arc<Self>) -> bool {
        let mut slot = self.worker.lock();
        if slot.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            Arc::downgrade(self),
            token.clone(),
            self.settings.poll_interval(),
        ));
        *slot = Some(Worker { token, handle });
        info!(
            poll_interval_ms = self.settings.poll_interval_ms,
            "Background job worker started"
        );
        true
    }

    pub fn worker_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Stop the background worker, waiting for the job it is running to finish.
    pub async fn dispose(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.token.cancel();
            if let Err(e) = worker.handle.await {
                error!("Job worker terminated abnormally: {}", e);
            }
            info!("Background job worker stopped");
        }
    }
}

async fn run_worker(queue: Weak<JobQueue>, token: CancellationToken, poll_interval: Duration) {
    while !token.is_cancelled() {
        let processed = match queue.upgrade() {
            Some(queue) => queue.process_next().await.processed,
            None => break,
        };
        if processed {
            continue;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Runs one claimed job to a terminal state and records the outcome.
async fn run_job(
    jobs: Arc<DashMap<JobId, Job>>,
    processor: Arc<dyn JobProcessor>,
    job: Job,
) -> (JobStatus, String) {
    let id = job.id;
    let started = Instant::now();
    let outcome = AssertUnwindSafe(processor.process(&job))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(JobFailure::new(panic_message(panic))));

    histogram!("job_processing_time").record(started.elapsed());

    match outcome {
        Ok(result) => {
            record_outcome(&jobs, id, JobStatus::Completed, Some(result), None);
            counter!("jobs_completed", "type" => job.job_type.as_str()).increment(1);
            info!(job_id = %id, "Job completed");
            (JobStatus::Completed, format!("Job {} completed", id))
        }
        Err(failure) => {
            record_outcome(&jobs, id, JobStatus::Failed, None, Some(failure.message.clone()));
            counter!("jobs_failed", "type" => job.job_type.as_str()).increment(1);
            warn!(job_id = %id, error = %failure, "Job failed");
            (JobStatus::Failed, format!("Job {} failed: {}", id, failure))
        }
    }
}

fn record_outcome(
    jobs: &DashMap<JobId, Job>,
    id: JobId,
    to: JobStatus,
    result: Option<Value>,
    error: Option<String>,
) {
    if let Err(e) = transition(jobs, id, to, result, error) {
        error!("Failed to record job outcome: {}", e);
    }
}

fn transition(
    jobs: &DashMap<JobId, Job>,
    id: JobId,
    to: JobStatus,
    result: Option<Value>,
    error: Option<String>,
) -> Result<()> {
    let mut job = jobs.get_mut(&id).ok_or(QueueError::JobNotFound(id))?;
    if !job.status.can_transition_to(to) {
        return Err(QueueError::InvalidTransition {
            id,
            from: job.status,
            to,
        });
    }
    job.status = to;
    job.progress = to.progress();
    job.result = result;
    job.error = error;
    if to.is_terminal() {
        job.completed_at = Some(Utc::now());
    }
    Ok(())
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Job processor panicked: {}", detail)
}
