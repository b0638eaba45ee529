//! Job lifecycle management and progress event fan-out
//!
//! The manager owns an authoritative job map plus a hot cache for reads
//! during long writes. Progress events go to per-job channels and a global
//! firehose; channel delivery means an emission can never block or re-enter
//! the caller. Terminal state is sticky and terminal events are always the
//! last event a subscriber sees for a job.

use crate::error::{JobError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the global firehose channel
const FIREHOSE_CAPACITY: usize = 256;

/// Kinds of background work tracked by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FetchRepo,
    FetchFile,
    WatchAdd,
    WatchChange,
    WatchRemove,
}

/// Job lifecycle states; terminal states are sticky
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Snapshot of one tracked job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Percent complete in `[0, 100]`
    pub progress: f32,
    pub message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

/// A progress or terminal event for one job
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: f32,
    pub message: Option<String>,
    pub terminal: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counters over all tracked jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatistics {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

struct Inner {
    jobs: RwLock<HashMap<String, Job>>,
    /// Read cache kept in lockstep with the job map; readers hit this so
    /// long-held write intents on the map do not stall status queries
    cache: RwLock<HashMap<String, Job>>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<ProgressEvent>>>>,
    cancel_flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
    firehose: broadcast::Sender<ProgressEvent>,
    terminal_linger_ms: u64,
}

/// Process-wide job registry and progress bus
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(terminal_linger_ms: u64) -> Self {
        let (firehose, _) = broadcast::channel(FIREHOSE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                cache: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(HashMap::new()),
                cancel_flags: RwLock::new(HashMap::new()),
                firehose,
                terminal_linger_ms,
            }),
        }
    }

    /// Create a RUNNING job at progress 0 and return its id
    pub fn create(&self, kind: JobKind, metadata: serde_json::Value) -> String {
        let id = Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            kind,
            status: JobStatus::Running,
            progress: 0.0,
            message: None,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
            metadata,
        };

        self.inner
            .jobs
            .write()
            .expect("job map lock poisoned")
            .insert(id.clone(), job.clone());
        self.inner
            .cache
            .write()
            .expect("job cache lock poisoned")
            .insert(id.clone(), job);
        self.inner
            .cancel_flags
            .write()
            .expect("cancel flag lock poisoned")
            .insert(id.clone(), Arc::new(AtomicBool::new(false)));

        info!(job_id = %id, ?kind, "Created job");
        id
    }

    /// Update a RUNNING job's progress, clamped to `[0, 100]`
    ///
    /// A `meta` object is merged key-by-key into the job's metadata; any
    /// other JSON value replaces it wholesale.
    pub fn update_progress(
        &self,
        id: &str,
        percent: f32,
        message: Option<&str>,
        meta: Option<serde_json::Value>,
    ) -> Result<()> {
        let event = {
            let mut jobs = self.inner.jobs.write().expect("job map lock poisoned");
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| JobError::UnknownJob(id.to_string()))?;
            if job.status.is_terminal() {
                return Err(JobError::InvalidTransition {
                    id: id.to_string(),
                    from: job.status.to_string(),
                    to: "RUNNING".to_string(),
                }
                .into());
            }

            job.progress = percent.clamp(0.0, 100.0);
            if let Some(message) = message {
                job.message = Some(message.to_string());
            }
            if let Some(meta) = meta {
                merge_metadata(&mut job.metadata, meta);
            }
            self.refresh_cache(job);
            self.event_for(job, false)
        };

        self.emit(event);
        Ok(())
    }

    /// Transition a job to COMPLETED with its result payload
    pub fn complete(&self, id: &str, result: serde_json::Value) -> Result<()> {
        self.finish(id, JobStatus::Completed, Some(result), None)
    }

    /// Transition a job to FAILED with an error message
    pub fn fail(&self, id: &str, error: &str) -> Result<()> {
        self.finish(id, JobStatus::Failed, None, Some(error.to_string()))
    }

    /// Cooperatively cancel a RUNNING job
    ///
    /// Flips the job to FAILED with `error = "cancelled"` and raises the
    /// in-flight cancellation flag checked by pipeline stages. Returns
    /// whether the cancellation took effect.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        {
            let jobs = self.inner.jobs.read().expect("job map lock poisoned");
            let job = jobs
                .get(id)
                .ok_or_else(|| JobError::UnknownJob(id.to_string()))?;
            if job.status.is_terminal() {
                return Ok(false);
            }
        }

        if let Some(flag) = self
            .inner
            .cancel_flags
            .read()
            .expect("cancel flag lock poisoned")
            .get(id)
        {
            flag.store(true, Ordering::SeqCst);
        }
        // A racing complete/fail wins; that is still "no cancellation"
        match self.finish(id, JobStatus::Failed, None, Some("cancelled".to_string())) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// The cooperative cancellation flag for a job
    pub fn cancellation_flag(&self, id: &str) -> Option<Arc<AtomicBool>> {
        self.inner
            .cancel_flags
            .read()
            .expect("cancel flag lock poisoned")
            .get(id)
            .cloned()
    }

    /// Snapshot one job, served from the read cache when possible
    pub fn get(&self, id: &str) -> Option<Job> {
        if let Some(job) = self
            .inner
            .cache
            .read()
            .expect("job cache lock poisoned")
            .get(id)
        {
            return Some(job.clone());
        }
        self.inner
            .jobs
            .read()
            .expect("job map lock poisoned")
            .get(id)
            .cloned()
    }

    /// All currently RUNNING jobs
    pub fn list_active(&self) -> Vec<Job> {
        let mut active: Vec<Job> = self
            .inner
            .jobs
            .read()
            .expect("job map lock poisoned")
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .cloned()
            .collect();
        active.sort_by_key(|j| j.start_time);
        active
    }

    /// Aggregate counters for external backpressure policies
    pub fn statistics(&self) -> JobStatistics {
        let jobs = self.inner.jobs.read().expect("job map lock poisoned");
        let mut stats = JobStatistics {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Evict terminal jobs whose end time is older than `max_age`
    ///
    /// RUNNING jobs are never evicted.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut jobs = self.inner.jobs.write().expect("job map lock poisoned");
        let mut cache = self.inner.cache.write().expect("job cache lock poisoned");
        let mut flags = self
            .inner
            .cancel_flags
            .write()
            .expect("cancel flag lock poisoned");

        let evictable: Vec<String> = jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.end_time.map(|t| t < cutoff).unwrap_or(false))
            .map(|j| j.id.clone())
            .collect();

        for id in &evictable {
            jobs.remove(id);
            cache.remove(id);
            flags.remove(id);
        }
        if !evictable.is_empty() {
            debug!(evicted = evictable.len(), "Cleaned up terminal jobs");
        }
        evictable.len()
    }

    /// Subscribe to the events of one job
    pub fn subscribe_job(&self, id: &str) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .write()
            .expect("subscriber lock poisoned")
            .entry(id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Subscribe to the global firehose of all job events
    pub fn subscribe_all(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.firehose.subscribe()
    }

    fn finish(
        &self,
        id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<()> {
        let event = {
            let mut jobs = self.inner.jobs.write().expect("job map lock poisoned");
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| JobError::UnknownJob(id.to_string()))?;
            if job.status.is_terminal() {
                return Err(JobError::InvalidTransition {
                    id: id.to_string(),
                    from: job.status.to_string(),
                    to: status.to_string(),
                }
                .into());
            }

            job.status = status;
            job.end_time = Some(Utc::now());
            if status == JobStatus::Completed {
                job.progress = 100.0;
            }
            job.result = result;
            job.error = error;
            self.refresh_cache(job);
            self.event_for(job, true)
        };

        info!(job_id = %id, status = %status, "Job finished");
        self.emit(event);
        self.schedule_terminal_cleanup(id.to_string());
        Ok(())
    }

    fn refresh_cache(&self, job: &Job) {
        self.inner
            .cache
            .write()
            .expect("job cache lock poisoned")
            .insert(job.id.clone(), job.clone());
    }

    fn event_for(&self, job: &Job, terminal: bool) -> ProgressEvent {
        ProgressEvent {
            job_id: job.id.clone(),
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            message: job.message.clone().or_else(|| job.error.clone()),
            terminal,
            timestamp: Utc::now(),
        }
    }

    /// Deliver an event to per-job subscribers and the firehose
    ///
    /// Channel sends enqueue only; subscriber tasks observe the event on
    /// their next poll, so delivery cannot re-enter or block the emitter.
    /// Closed subscribers are pruned rather than propagated as errors.
    fn emit(&self, event: ProgressEvent) {
        {
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .expect("subscriber lock poisoned");
            if let Some(senders) = subscribers.get_mut(&event.job_id) {
                senders.retain(|tx| match tx.send(event.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        debug!(job_id = %event.job_id, "Dropping closed subscriber");
                        false
                    }
                });
            }
        }

        if self.inner.firehose.send(event.clone()).is_err() {
            // No firehose listeners; normal during batch indexing
        }
    }

    /// Keep terminal subscription state around briefly so late subscribers
    /// can still observe the final event, then drop it
    fn schedule_terminal_cleanup(&self, id: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(job_id = %id, "No runtime for terminal cleanup; state kept until cleanup()");
            return;
        };
        let inner = Arc::clone(&self.inner);
        let linger = std::time::Duration::from_millis(self.inner.terminal_linger_ms);
        handle.spawn(async move {
            tokio::time::sleep(linger).await;
            inner
                .subscribers
                .write()
                .expect("subscriber lock poisoned")
                .remove(&id);
            inner
                .cache
                .write()
                .expect("job cache lock poisoned")
                .remove(&id);
        });
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(5000)
    }
}

/// Merge an update into existing job metadata
///
/// Object-into-object merges per key; any other combination replaces the
/// previous value.
fn merge_metadata(existing: &mut serde_json::Value, update: serde_json::Value) {
    match (existing, update) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(update)) => {
            for (key, value) in update {
                existing.insert(key, value);
            }
        }
        (existing, update) => *existing = update,
    }
}
