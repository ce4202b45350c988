//! Mutex-protected job map, dedup index, and FIFO (spec §4.6).
//!
//! Grounded on `original_source/rayvault/agent/worker_server.py`'s
//! `WorkerState`: a `jobs` map, a `jobs_by_hash` dedup index keyed by
//! `"{step_name}:{inputs_hash}"`, and a FIFO queue. The Python uses a
//! `threading.Lock` + `queue.Queue`; this crate uses a `std::sync::Mutex`
//! for the maps (handlers run on a dedicated blocking task, never while
//! holding the lock) and a `tokio::sync::mpsc` channel for the FIFO.

use dispatch_core::{utc_now_iso, JobRecord, JobStatus};
use dispatch_receipt::ReceiptStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Result of an `enqueue` call (spec §4.6 `enqueue()`).
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    /// `true` if this call was deduplicated against an existing job.
    pub idempotent: bool,
    /// The job_id this was deduplicated against, if `idempotent`.
    pub cached_job_id: Option<String>,
    /// The (existing or freshly created) job record.
    pub job: JobRecord,
}

struct Shared {
    jobs: Mutex<HashMap<String, JobRecord>>,
    dedup: Mutex<HashMap<String, String>>,
    receipts: Arc<ReceiptStore>,
}

fn dedup_key(step_name: &str, inputs_hash: &str) -> String {
    format!("{step_name}:{inputs_hash}")
}

/// Handle shared by the HTTP surface and the background runner.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<String>,
    worker_id: String,
}

/// The receiving half, owned exclusively by the background runner task.
pub struct JobFifo {
    rx: mpsc::UnboundedReceiver<String>,
}

impl JobFifo {
    /// Pop the next `job_id`, waiting for one to arrive.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl JobQueue {
    /// Construct a fresh, empty queue plus its FIFO receiving half.
    ///
    /// `receipts` backs the worker log append the queue itself owns (the
    /// `queued` line in `enqueue()`); the runner loop appends the later
    /// `running`/finished lines against the same store.
    #[must_use]
    pub fn new(worker_id: impl Into<String>, receipts: Arc<ReceiptStore>) -> (Self, JobFifo) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: Arc::new(Shared {
                    jobs: Mutex::new(HashMap::new()),
                    dedup: Mutex::new(HashMap::new()),
                    receipts,
                }),
                tx,
                worker_id: worker_id.into(),
            },
            JobFifo { rx },
        )
    }

    /// Enqueue a validated job (spec §4.6 `enqueue()` steps 1-3).
    ///
    /// First-wins dedup, by `(step_name, inputs_hash)` then by `job_id`
    /// replay — concurrent submission of the same `job_id` resolves to
    /// whichever enqueue call takes the lock first; the loser becomes
    /// `idempotent: true` against the winner's record (spec §9 Open
    /// Question 2 / SPEC_FULL.md §G.2). No locking beyond this mutex.
    pub fn enqueue(
        &self,
        run_id: &str,
        job_id: &str,
        step_name: &str,
        inputs_hash: &str,
        payload: serde_json::Value,
    ) -> EnqueueOutcome {
        let key = dedup_key(step_name, inputs_hash);
        let mut jobs = self.shared.jobs.lock().unwrap();
        let mut dedup = self.shared.dedup.lock().unwrap();

        if let Some(existing_id) = dedup.get(&key).cloned() {
            if let Some(existing) = jobs.get_mut(&existing_id) {
                existing.idempotent = true;
                return EnqueueOutcome {
                    idempotent: true,
                    cached_job_id: Some(existing_id),
                    job: existing.clone(),
                };
            }
        }

        if let Some(existing) = jobs.get(job_id) {
            return EnqueueOutcome {
                idempotent: true,
                cached_job_id: Some(job_id.to_string()),
                job: existing.clone(),
            };
        }

        let record = JobRecord::new_queued(run_id, job_id, step_name, inputs_hash, payload, self.worker_id.clone());
        jobs.insert(job_id.to_string(), record.clone());
        dedup.insert(key, job_id.to_string());
        drop(jobs);
        drop(dedup);

        let line = log_line(job_id, "worker_log", "info", "queued");
        if let Err(e) = self.shared.receipts.append_log(run_id, job_id, &line) {
            tracing::warn!(job_id = %job_id, error = %e, "failed to append queued log line");
        }

        let _ = self.tx.send(job_id.to_string());

        EnqueueOutcome {
            idempotent: false,
            cached_job_id: None,
            job: record,
        }
    }

    /// Fetch a copy of the current record for `job_id`.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.shared.jobs.lock().unwrap().get(job_id).cloned()
    }

    /// Apply `f` to the job's record under the lock, if it still exists.
    pub fn update<F: FnOnce(&mut JobRecord)>(&self, job_id: &str, f: F) {
        if let Some(rec) = self.shared.jobs.lock().unwrap().get_mut(job_id) {
            f(rec);
        }
    }

    /// Number of jobs not yet in a terminal state — the worker's `/health`
    /// `queue_depth` (SPEC_FULL.md §F.3, grounded on `worker_server.py`'s
    /// `state.q.qsize()`).
    #[must_use]
    pub fn queue_depth(&self) -> u64 {
        self.shared
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.status.is_terminal())
            .count() as u64
    }
}

/// Build the `[ts] event msg` style line the original's `append_log` writes,
/// as a JSON line (worker log is a protocol artifact, see crate docs).
#[must_use]
pub fn log_line(job_id: &str, event: &str, level: &str, message: &str) -> String {
    serde_json::json!({
        "ts": utc_now_iso(),
        "job_id": job_id,
        "event": event,
        "level": level,
        "message": message,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue() -> (JobQueue, JobFifo, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let receipts = Arc::new(ReceiptStore::new(tmp.path()));
        let (queue, fifo) = JobQueue::new("worker-1", receipts);
        (queue, fifo, tmp)
    }

    #[test]
    fn enqueue_creates_a_fresh_queued_record() {
        let (queue, _fifo, _tmp) = test_queue();
        let out = queue.enqueue("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), serde_json::Value::Null);
        assert!(!out.idempotent);
        assert_eq!(out.job.status, JobStatus::Queued);
        assert_eq!(queue.queue_depth(), 1);
    }

    #[test]
    fn enqueue_appends_a_queued_log_line() {
        let (queue, _fifo, tmp) = test_queue();
        queue.enqueue("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), serde_json::Value::Null);
        let store = ReceiptStore::new(tmp.path());
        let log = std::fs::read_to_string(store.log_path("run1", "job1")).unwrap();
        assert!(log.contains("queued"), "log did not contain a queued line: {log}");
    }

    #[test]
    fn repeat_fingerprint_is_deduplicated() {
        let (queue, _fifo, _tmp) = test_queue();
        let first = queue.enqueue("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), serde_json::Value::Null);
        let second = queue.enqueue("run1", "job2", "FFMPEG_PROBE", &"a".repeat(16), serde_json::Value::Null);
        assert!(!first.idempotent);
        assert!(second.idempotent);
        assert_eq!(second.cached_job_id, Some("job1".to_string()));
    }

    #[test]
    fn replaying_same_job_id_is_deduplicated() {
        let (queue, _fifo, _tmp) = test_queue();
        queue.enqueue("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), serde_json::Value::Null);
        let replay = queue.enqueue("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), serde_json::Value::Null);
        assert!(replay.idempotent);
        assert_eq!(replay.cached_job_id, Some("job1".to_string()));
    }

    #[test]
    fn queue_depth_excludes_terminal_jobs() {
        let (queue, _fifo, _tmp) = test_queue();
        queue.enqueue("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), serde_json::Value::Null);
        queue.update("job1", |r| r.status = JobStatus::Succeeded);
        assert_eq!(queue.queue_depth(), 0);
    }

    #[tokio::test]
    async fn enqueued_job_id_is_delivered_on_the_fifo() {
        let (queue, mut fifo, _tmp) = test_queue();
        queue.enqueue("run1", "job1", "FFMPEG_PROBE", &"a".repeat(16), serde_json::Value::Null);
        assert_eq!(fifo.recv().await, Some("job1".to_string()));
    }
}
