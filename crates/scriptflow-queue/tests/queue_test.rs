use async_trait::async_trait;
use dashmap::DashMap;
use scriptflow_core::{JobStatus, JobType, QueueMode, QueueSettings};
use scriptflow_queue::*;
use serde_json::{json, Value};
use std::result::Result;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use tokio_test::{assert_err, assert_ok};

/// Records every job it sees and reacts to a few magic payloads.
#[derive(Default)]
struct Recorder {
    calls: DashMap<Uuid, usize>,
    order: parking_lot::Mutex<Vec<Value>>,
}

#[async_trait]
impl JobProcessor for Recorder {
    async fn process(&self, job: &Job) -> Result<Value, JobFailure> {
        *self.calls.entry(job.id).or_insert(0) += 1;
        self.order.lock().push(job.payload.clone());
        match job.payload.as_str() {
            Some("fail") => Err(JobFailure::new("analysis service timed out")),
            Some("panic") => panic!("processor exploded"),
            Some("long") => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!({ "long": true }))
            }
            Some("slow") => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({ "ok": true }))
            }
            _ => Ok(json!({ "echo": job.payload })),
        }
    }
}

fn queue_with(recorder: Arc<Recorder>) -> Arc<JobQueue> {
    Arc::new(JobQueue::new(recorder, QueueSettings::default()))
}

#[tokio::test]
async fn test_enqueue_then_process_completes() {
    let queue = queue_with(Arc::new(Recorder::default()));

    let id = queue.enqueue(JobType::Analysis, json!("script text"));
    let view = assert_ok!(queue.get_status(id));
    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.progress, 0);
    assert!(view.result.is_none());

    let outcome = queue.process_next().await;
    assert!(outcome.processed);
    assert_eq!(outcome.job_id, Some(id));
    assert_eq!(outcome.status, Some(JobStatus::Completed));

    let view = queue.get_status(id).unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.progress, 100);
    assert_eq!(view.result, Some(json!({ "echo": "script text" })));
    assert!(view.error.is_none());
    assert!(view.started_at.is_some());
    assert!(view.completed_at.is_some());
}

#[tokio::test]
async fn test_empty_queue_is_not_an_error() {
    let queue = queue_with(Arc::new(Recorder::default()));
    let outcome = queue.process_next().await;
    assert!(!outcome.processed);
    assert!(outcome.job_id.is_none());
    assert_eq!(outcome.message, "No jobs in queue");
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let queue = queue_with(Arc::new(Recorder::default()));
    let err = assert_err!(queue.get_status(Uuid::new_v4()));
    assert!(matches!(err, QueueError::JobNotFound(_)));
}

#[tokio::test]
async fn test_jobs_run_in_fifo_order() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(recorder.clone());
    for n in 0..4 {
        queue.enqueue(JobType::Iteration, json!(n));
    }
    while queue.process_next().await.processed {}
    assert_eq!(
        *recorder.order.lock(),
        vec![json!(0), json!(1), json!(2), json!(3)]
    );
}

#[tokio::test]
async fn test_processor_error_is_recorded_not_raised() {
    let queue = queue_with(Arc::new(Recorder::default()));
    let id = queue.enqueue(JobType::Synthesis, json!("fail"));

    let outcome = queue.process_next().await;
    assert!(outcome.processed);
    assert_eq!(outcome.status, Some(JobStatus::Failed));
    assert!(outcome.message.contains("timed out"));

    let view = queue.get_status(id).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.progress, 0);
    assert_eq!(view.error.as_deref(), Some("analysis service timed out"));
    assert!(view.result.is_none());
}

#[tokio::test]
async fn test_processor_panic_fails_the_job() {
    let queue = queue_with(Arc::new(Recorder::default()));
    let id = queue.enqueue(JobType::Analysis, json!("panic"));
    let next = queue.enqueue(JobType::Analysis, json!("after"));

    let outcome = queue.process_next().await;
    assert_eq!(outcome.status, Some(JobStatus::Failed));
    let view = queue.get_status(id).unwrap();
    assert!(view.error.unwrap().contains("processor exploded"));

    queue.process_next().await;
    assert_eq!(queue.get_status(next).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_strand_job() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(recorder.clone());
    let id = queue.enqueue(JobType::Synthesis, json!("long"));

    let dropped = tokio::time::timeout(Duration::from_millis(20), queue.process_next()).await;
    assert!(dropped.is_err());
    assert_eq!(queue.get_status(id).unwrap().status, JobStatus::Processing);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let view = queue.get_status(id).unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.result, Some(json!({ "long": true })));
    assert_eq!(recorder.calls.get(&id).map(|c| *c), Some(1));
    assert!(!queue.process_next().await.processed);
    assert_eq!(queue.stats().processing, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_process_next_never_double_processes() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(recorder.clone());
    let ids: Vec<_> = (0..12)
        .map(|_| queue.enqueue(JobType::Analysis, json!("slow")))
        .collect();

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut handled = 0;
                while queue.process_next().await.processed {
                    handled += 1;
                }
                handled
            })
        })
        .collect();

    let mut total = 0;
    for worker in workers {
        total += worker.await.unwrap();
    }
    assert_eq!(total, ids.len());
    for id in ids {
        assert_eq!(recorder.calls.get(&id).map(|c| *c), Some(1));
        assert_eq!(queue.get_status(id).unwrap().status, JobStatus::Completed);
    }
}

#[tokio::test]
async fn test_stats_and_reset() {
    let queue = queue_with(Arc::new(Recorder::default()));
    queue.enqueue(JobType::Analysis, json!("ok"));
    queue.enqueue(JobType::Analysis, json!("fail"));
    queue.enqueue(JobType::Analysis, json!("waiting"));
    queue.process_next().await;
    queue.process_next().await;

    let stats = queue.stats();
    assert_eq!(
        stats,
        QueueStats {
            total: 3,
            queued: 1,
            processing: 0,
            completed: 1,
            failed: 1,
        }
    );

    queue.reset();
    assert_eq!(queue.stats().total, 0);
    assert_eq!(queue.pending_len(), 0);
    assert!(!queue.process_next().await.processed);
}

#[tokio::test]
async fn test_background_worker_drains_queue() {
    let settings = QueueSettings {
        mode: QueueMode::Background,
        poll_interval_ms: 10,
        ..QueueSettings::default()
    };
    let queue = Arc::new(JobQueue::new(Arc::new(Recorder::default()), settings));
    assert!(queue.spawn_worker());
    assert!(!queue.spawn_worker());

    let id = queue.enqueue(JobType::Analysis, json!("hello"));
    let mut status = JobStatus::Queued;
    for _ in 0..100 {
        status = queue.get_status(id).unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, JobStatus::Completed);

    queue.dispose().await;
    assert!(!queue.worker_running());
}
