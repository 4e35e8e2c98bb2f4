// queue/queue.rs
//
// Priority job scheduler over the model store, engine, and result cache.
// Jobs run on spawned tokio tasks; a bounded number are active at once and
// the rest wait in a heap ordered by (priority, submission order).

use super::item::{JobEvent, JobId, JobRecord, JobStatus, Priority};
use crate::cache::{fingerprint_request, Fingerprint, ResultCache};
use crate::config::QueueConfig;
use crate::engine::{TranscriptionEngine, TranscriptionRequest, TranscriptionResult};
use crate::error::QueueError;
use crate::model::{ModelDescriptor, ModelStore, ProgressFn};
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Mutex};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Heap key; higher priority wins, earlier submission breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingKey {
    priority: Priority,
    seq: u64,
    id: JobId,
}

impl Ord for PendingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shared outcome delivered to jobs waiting on an identical in-flight job.
type FollowerOutcome = Result<Arc<TranscriptionResult>, String>;

struct SchedulerState {
    pending: BinaryHeap<PendingKey>,
    /// Requests still eligible to run. Cancel removes the entry here; the
    /// matching heap key is skipped when popped.
    pending_jobs: HashMap<JobId, TranscriptionRequest>,
    active: usize,
    paused: bool,
    next_seq: u64,
    /// Terminal job ids in completion order, for bounded retention.
    terminal_order: VecDeque<JobId>,
}

pub struct JobQueue {
    config: QueueConfig,
    engine: Arc<TranscriptionEngine>,
    models: Arc<ModelStore>,
    cache: Arc<ResultCache>,
    catalog: Vec<ModelDescriptor>,
    records: DashMap<JobId, JobRecord>,
    scheduler: Mutex<SchedulerState>,
    in_flight: Mutex<HashMap<Fingerprint, Vec<oneshot::Sender<FollowerOutcome>>>>,
    events: broadcast::Sender<JobEvent>,
}

impl JobQueue {
    pub fn new(
        config: QueueConfig,
        engine: Arc<TranscriptionEngine>,
        models: Arc<ModelStore>,
        cache: Arc<ResultCache>,
        catalog: Vec<ModelDescriptor>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            engine,
            models,
            cache,
            catalog,
            records: DashMap::new(),
            scheduler: Mutex::new(SchedulerState {
                pending: BinaryHeap::new(),
                pending_jobs: HashMap::new(),
                active: 0,
                paused: false,
                next_seq: 0,
                terminal_order: VecDeque::new(),
            }),
            in_flight: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Enqueue a job and return its handle immediately.
    pub async fn submit(self: &Arc<Self>, request: TranscriptionRequest) -> JobId {
        let id = JobId::new();
        self.records.insert(
            id,
            JobRecord {
                id,
                request: request.clone(),
                status: JobStatus::Pending,
                submitted_at: Utc::now(),
                finished_at: None,
                result: None,
                deduplicated: false,
            },
        );
        self.emit_status(id, JobStatus::Pending);

        {
            let mut scheduler = self.scheduler.lock().await;
            let seq = scheduler.next_seq;
            scheduler.next_seq += 1;
            scheduler.pending.push(PendingKey {
                priority: request.priority,
                seq,
                id,
            });
            scheduler.pending_jobs.insert(id, request);
        }
        debug!("job {} submitted", id);
        self.pump().await;
        id
    }

    /// Cancel a job that has not started. Running jobs are not interrupted.
    pub async fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.pending_jobs.remove(&id).is_some() {
            drop(scheduler);
            self.set_status(id, JobStatus::Cancelled);
            self.retain_terminal(id).await;
            info!("job {} cancelled", id);
            return Ok(());
        }
        drop(scheduler);

        match self.records.get(&id) {
            Some(record) => Err(QueueError::InvalidState(id, record.status.clone())),
            None => Err(QueueError::NotFound(id)),
        }
    }

    pub fn job(&self, id: JobId) -> Result<JobRecord, QueueError> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or(QueueError::NotFound(id))
    }

    pub fn status(&self, id: JobId) -> Result<JobStatus, QueueError> {
        self.job(id).map(|record| record.status)
    }

    /// Retrieve a completed job's result. Jobs in any other state report
    /// [`QueueError::InvalidState`].
    pub fn result(&self, id: JobId) -> Result<Arc<TranscriptionResult>, QueueError> {
        let record = self.job(id)?;
        match record.result {
            Some(result) if record.status == JobStatus::Completed => Ok(result),
            _ => Err(QueueError::InvalidState(id, record.status)),
        }
    }

    /// Drop every retained terminal record now instead of waiting for the
    /// retention bound to push them out.
    pub async fn purge_terminal(&self) {
        let drained: Vec<JobId> = {
            let mut scheduler = self.scheduler.lock().await;
            scheduler.terminal_order.drain(..).collect()
        };
        let count = drained.len();
        for id in drained {
            self.records.remove(&id);
        }
        debug!("purged {} terminal job records", count);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Stop starting new jobs; running jobs finish normally.
    pub async fn pause(&self) {
        self.scheduler.lock().await.paused = true;
        info!("queue paused");
    }

    pub async fn resume(self: &Arc<Self>) {
        self.scheduler.lock().await.paused = false;
        info!("queue resumed");
        self.pump().await;
    }

    pub async fn pending_count(&self) -> usize {
        self.scheduler.lock().await.pending_jobs.len()
    }

    pub async fn active_count(&self) -> usize {
        self.scheduler.lock().await.active
    }

    /// Start jobs while capacity allows. Heap keys whose job was cancelled
    /// are discarded here.
    ///
    /// Returns a boxed future: pump and the tasks it spawns call each other,
    /// and the indirection breaks the resulting Send auto-trait cycle.
    fn pump<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        loop {
            let (id, request) = {
                let mut scheduler = self.scheduler.lock().await;
                if scheduler.paused || scheduler.active >= self.config.max_concurrent {
                    return;
                }
                let next = loop {
                    match scheduler.pending.pop() {
                        Some(key) => {
                            if let Some(request) = scheduler.pending_jobs.remove(&key.id) {
                                break Some((key.id, request));
                            }
                            // Stale key from a cancelled job.
                        }
                        None => break None,
                    }
                };
                let Some(next) = next else { return };
                scheduler.active += 1;
                next
            };

            self.set_status(id, JobStatus::Processing);
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_job(id, request).await;
                queue.scheduler.lock().await.active -= 1;
                queue.pump().await;
            });
        }
        })
    }

    async fn run_job(self: &Arc<Self>, id: JobId, request: TranscriptionRequest) {
        let audio = match tokio::fs::read(&request.audio_path).await {
            Ok(audio) => audio,
            Err(e) => {
                self.fail_job(
                    id,
                    format!("cannot read {}: {}", request.audio_path.display(), e),
                )
                .await;
                return;
            }
        };
        let fingerprint = fingerprint_request(&audio, &request);

        if let Some(cached) = self.cache.lookup(&fingerprint).await {
            debug!("job {} served from cache", id);
            self.complete_job(id, Arc::new(cached), true).await;
            return;
        }

        // Identical request already running: wait for its outcome instead
        // of decoding twice.
        let follower = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get_mut(&fingerprint) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    in_flight.insert(fingerprint.clone(), Vec::new());
                    None
                }
            }
        };
        if let Some(rx) = follower {
            debug!("job {} joins in-flight fingerprint {}", id, fingerprint);
            match rx.await {
                Ok(Ok(result)) => self.complete_job(id, result, true).await,
                Ok(Err(reason)) => self.fail_job(id, reason).await,
                Err(_) => self.fail_job(id, "in-flight job abandoned".to_string()).await,
            }
            return;
        }

        let outcome = self.decode(id, &request).await;
        match &outcome {
            Ok(result) => {
                self.cache
                    .store(fingerprint.clone(), result.as_ref().clone(), &request.model)
                    .await;
                self.complete_job(id, Arc::clone(result), false).await;
            }
            Err(reason) => self.fail_job(id, reason.clone()).await,
        }

        // Always drain followers, success or failure.
        let waiters = self.in_flight.lock().await.remove(&fingerprint);
        for waiter in waiters.unwrap_or_default() {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Model resolution, download, and decode for a leader job.
    async fn decode(
        self: &Arc<Self>,
        id: JobId,
        request: &TranscriptionRequest,
    ) -> Result<Arc<TranscriptionResult>, String> {
        let descriptor = self
            .catalog
            .iter()
            .find(|d| d.id == request.model)
            .ok_or_else(|| format!("unknown model '{}'", request.model))?;

        let progress = self.download_progress(id, &request.model);
        let model_path = self
            .models
            .ensure_available_with_progress(descriptor, Some(progress))
            .await
            .map_err(|e| format!("model '{}' unavailable: {}", request.model, e))?;

        let result = self
            .engine
            .transcribe(request, &model_path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Arc::new(result))
    }

    fn download_progress(&self, id: JobId, model: &str) -> ProgressFn {
        let events = self.events.clone();
        let model = model.to_string();
        Arc::new(move |received, total| {
            let _ = events.send(JobEvent::DownloadProgress {
                id,
                model: model.clone(),
                received,
                total,
            });
        })
    }

    async fn complete_job(&self, id: JobId, result: Arc<TranscriptionResult>, deduplicated: bool) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.status = JobStatus::Completed;
            record.finished_at = Some(Utc::now());
            record.result = Some(result);
            record.deduplicated = deduplicated;
        }
        self.emit_status(id, JobStatus::Completed);
        self.retain_terminal(id).await;
        info!("job {} completed (deduplicated: {})", id, deduplicated);
    }

    async fn fail_job(&self, id: JobId, reason: String) {
        warn!("job {} failed: {}", id, reason);
        self.set_status(id, JobStatus::Failed(reason));
        self.retain_terminal(id).await;
    }

    fn set_status(&self, id: JobId, status: JobStatus) {
        if let Some(mut record) = self.records.get_mut(&id) {
            if record.status.is_terminal() {
                return;
            }
            record.status = status.clone();
            if status.is_terminal() {
                record.finished_at = Some(Utc::now());
            }
        }
        self.emit_status(id, status);
    }

    /// Bound the set of retained terminal records, dropping the oldest.
    async fn retain_terminal(&self, id: JobId) {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.terminal_order.push_back(id);
        while scheduler.terminal_order.len() > self.config.max_retained_results {
            if let Some(evicted) = scheduler.terminal_order.pop_front() {
                self.records.remove(&evicted);
                debug!("dropped retained record for job {}", evicted);
            }
        }
    }

    fn emit_status(&self, id: JobId, status: JobStatus) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent::StatusChanged { id, status });
    }
}
