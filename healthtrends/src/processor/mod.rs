//! Background trend processing
//!
//! A single dispatcher task owns the priority queue. It hands tasks to at most
//! `worker_count` workers, never two for the same metric, and runs the
//! staleness sweep whenever the queue has been empty for a whole poll
//! interval. Results land in both cache tiers and a [`TrendEvent`] is
//! broadcast when each task finishes.

mod status;
mod task;

pub use status::{ProcessingStatus, TrendEvent};
pub use task::{
    TrendProcessingTask, PRIORITY_DEFAULT, PRIORITY_IMPORT, PRIORITY_INTERACTIVE, PRIORITY_SWEEP,
};

use crate::cache::{CacheManager, DiskCache};
use crate::config::Config;
use crate::error::{ErrorChainExt, HealthTrendsError, Result};
use crate::metrics::MetricId;
use crate::providers::{HistoricalComparator, MetricDataSource, TrendAnalysisEngine};
use crate::trends::TrendResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lookback used for the historical comparison merged into each result
const HISTORY_LOOKBACK_DAYS: i64 = 365;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared in-memory trend cache
pub type TrendCache = CacheManager<Arc<TrendResult>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct InFlight {
    task_id: String,
    started_at: DateTime<Utc>,
    /// Priority of a forced refresh that arrived mid-run
    refresh_pending: Option<i32>,
}

enum TaskOutcome {
    Ready { from_cache: bool },
    Insufficient { points: usize },
}

/// Builder for [`BackgroundTrendProcessor`]
pub struct TrendProcessorBuilder {
    config: Config,
    data_source: Arc<dyn MetricDataSource>,
    analyzer: Arc<dyn TrendAnalysisEngine>,
    memory_cache: Option<Arc<TrendCache>>,
    comparator: Option<Arc<dyn HistoricalComparator>>,
}

impl TrendProcessorBuilder {
    /// Share an existing memory cache instead of creating one
    pub fn memory_cache(mut self, cache: Arc<TrendCache>) -> Self {
        self.memory_cache = Some(cache);
        self
    }

    /// Attach historical comparisons to computed results
    pub fn comparator(mut self, comparator: Arc<dyn HistoricalComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Build the processor without starting the dispatcher
    pub fn build(self) -> Arc<BackgroundTrendProcessor> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let disk_cache = DiskCache::new(self.config.cache_dir.clone(), self.config.cache_expiry());
        let known_metrics: Vec<MetricId> = self
            .config
            .known_metrics
            .iter()
            .map(|m| MetricId::new(m.as_str()))
            .collect();

        Arc::new(BackgroundTrendProcessor {
            workers: Arc::new(Semaphore::new(self.config.worker_count.max(1))),
            known_set: known_metrics.iter().cloned().collect(),
            known_metrics,
            data_source: self.data_source,
            analyzer: self.analyzer,
            comparator: self.comparator,
            memory_cache: self.memory_cache.unwrap_or_default(),
            disk_cache,
            queue: Mutex::new(BinaryHeap::new()),
            queue_notify: Notify::new(),
            sequence: AtomicU64::new(0),
            processing: Mutex::new(HashMap::new()),
            last_processed: DashMap::new(),
            sweep_requeued: DashMap::new(),
            worker_tasks: Mutex::new(JoinSet::new()),
            events,
            cancel: CancellationToken::new(),
            dispatcher: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            config: self.config,
        })
    }

    /// Build and start the dispatcher on the current tokio runtime
    pub fn spawn(self) -> Arc<BackgroundTrendProcessor> {
        let processor = self.build();
        processor.start();
        processor
    }
}

/// Priority-queued, cached trend computation
pub struct BackgroundTrendProcessor {
    config: Config,
    known_metrics: Vec<MetricId>,
    known_set: HashSet<MetricId>,
    data_source: Arc<dyn MetricDataSource>,
    analyzer: Arc<dyn TrendAnalysisEngine>,
    comparator: Option<Arc<dyn HistoricalComparator>>,
    memory_cache: Arc<TrendCache>,
    disk_cache: DiskCache,
    queue: Mutex<BinaryHeap<TrendProcessingTask>>,
    queue_notify: Notify,
    sequence: AtomicU64,
    /// Only the dispatcher inserts; workers remove on completion
    processing: Mutex<HashMap<MetricId, InFlight>>,
    last_processed: DashMap<MetricId, DateTime<Utc>>,
    sweep_requeued: DashMap<MetricId, Instant>,
    workers: Arc<Semaphore>,
    worker_tasks: Mutex<JoinSet<()>>,
    events: broadcast::Sender<TrendEvent>,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for BackgroundTrendProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTrendProcessor")
            .field("worker_count", &self.config.worker_count)
            .field("cache_dir", &self.disk_cache.dir())
            .field("queue_size", &lock(&self.queue).len())
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

/// Clears a metric's processing entry when the worker ends, even by panic
struct ProcessingGuard {
    processor: Arc<BackgroundTrendProcessor>,
    metric: MetricId,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.processor.finish(&self.metric);
    }
}

impl BackgroundTrendProcessor {
    /// Start building a processor
    pub fn builder(
        config: Config,
        data_source: Arc<dyn MetricDataSource>,
        analyzer: Arc<dyn TrendAnalysisEngine>,
    ) -> TrendProcessorBuilder {
        TrendProcessorBuilder {
            config,
            data_source,
            analyzer,
            memory_cache: None,
            comparator: None,
        }
    }

    /// Spawn the dispatcher. Does nothing if it is already running or the
    /// processor has been shut down. Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut slot = lock(&self.dispatcher);
        if slot.is_some() || self.is_shut_down() {
            return;
        }
        let this = Arc::clone(self);
        *slot = Some(tokio::spawn(this.run_dispatcher()));
        info!(workers = self.config.worker_count, "Trend processor started");
    }

    /// Whether the dispatcher is running
    pub fn is_running(&self) -> bool {
        !self.is_shut_down()
            && lock(&self.dispatcher)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics this processor accepts
    pub fn known_metrics(&self) -> &[MetricId] {
        &self.known_metrics
    }

    /// Receive lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<TrendEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TrendEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Queue a trend computation.
    ///
    /// Returns `false`, after logging a warning, when the metric is unknown or
    /// the processor has shut down. Never fails otherwise.
    pub fn queue_trend_calculation(
        &self,
        metric: impl Into<MetricId>,
        priority: i32,
        force_refresh: bool,
    ) -> bool {
        let metric = metric.into();

        if self.is_shut_down() {
            warn!(metric = %metric, "Trend processor is shut down, dropping request");
            return false;
        }
        if !self.known_set.contains(&metric) {
            warn!(metric = %metric, "Unknown metric, dropping trend request");
            return false;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let task = TrendProcessingTask::new(metric, priority, force_refresh, sequence);
        debug!(
            task_id = task.task_id(),
            priority,
            force_refresh,
            "Queued trend calculation"
        );

        lock(&self.queue).push(task);
        self.queue_notify.notify_one();
        true
    }

    /// Queue every known metric; returns how many were accepted
    pub fn queue_all_metrics(&self, priority: i32) -> usize {
        self.known_metrics
            .iter()
            .filter(|metric| self.queue_trend_calculation((*metric).clone(), priority, false))
            .count()
    }

    /// Force a refresh of each metric touched by an import
    pub fn on_data_import_complete(&self, metrics_affected: &[MetricId]) -> usize {
        info!(
            count = metrics_affected.len(),
            "Data import complete, refreshing affected trends"
        );
        metrics_affected
            .iter()
            .filter(|metric| self.queue_trend_calculation((*metric).clone(), PRIORITY_IMPORT, true))
            .count()
    }

    /// Cached result, or `None` after queueing a computation.
    ///
    /// With `wait`, blocks until the metric's next task finishes or the wait
    /// timeout passes. Timeouts and failures are logged and return `None`.
    pub async fn get_trend(&self, metric: &MetricId, wait: bool) -> Option<Arc<TrendResult>> {
        // Subscribe first so a completion between the cache check and the
        // wait is not missed
        let mut events = self.events.subscribe();

        if let Some(result) = self.read_cache(metric) {
            debug!(metric = %metric, "Trend served from cache");
            return Some(result);
        }

        let in_flight = lock(&self.processing).contains_key(metric);
        if !in_flight && !self.queue_trend_calculation(metric.clone(), PRIORITY_INTERACTIVE, false)
        {
            return None;
        }

        if !wait {
            return None;
        }

        let wait_for_completion = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.metric() == metric && event.is_terminal() => {
                        return Some(event);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Trend event receiver lagged");
                        if self.memory_cache.contains(&metric.cache_key()) {
                            return None;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(metric = %metric, "Processor shut down while waiting for trend");
                return None;
            }
            outcome = tokio::time::timeout(self.config.wait_timeout(), wait_for_completion) => outcome,
        };

        match outcome {
            Ok(Some(TrendEvent::ProcessingFailed { error, .. })) => {
                error!(metric = %metric, "Trend computation failed: {}", error);
                None
            }
            Ok(Some(TrendEvent::Cancelled { .. })) => None,
            Ok(_) => self.read_cache(metric),
            Err(_) => {
                error!(
                    metric = %metric,
                    timeout_secs = self.config.wait_timeout_secs,
                    "Timed out waiting for trend computation"
                );
                None
            }
        }
    }

    /// Remove one metric from both tiers, or clear both tiers entirely
    pub fn clear_cache(&self, metric: Option<&MetricId>) {
        match metric {
            Some(metric) => {
                let key = metric.cache_key();
                self.memory_cache.delete(&key);
                self.disk_cache.remove(&key);
                info!(metric = %metric, "Cleared trend cache");
            }
            None => {
                self.memory_cache.clear();
                let removed = self.disk_cache.clear();
                info!(files = removed, "Cleared all trend caches");
            }
        }
    }

    /// Snapshot for observability. Touches no state.
    pub fn get_processing_status(&self) -> ProcessingStatus {
        let queue_size = lock(&self.queue).len();

        let mut processing: Vec<MetricId> = lock(&self.processing).keys().cloned().collect();
        processing.sort();

        let cached: BTreeSet<MetricId> = self
            .memory_cache
            .keys()
            .into_iter()
            .chain(self.disk_cache.entries().into_iter().map(|e| e.key))
            .filter_map(|key| MetricId::from_cache_key(&key))
            .collect();

        let now = Utc::now();
        let cache_age: BTreeMap<MetricId, f64> = self
            .last_processed
            .iter()
            .map(|entry| {
                let hours = (now - *entry.value()).num_seconds() as f64 / 3600.0;
                (entry.key().clone(), hours)
            })
            .collect();

        ProcessingStatus {
            queue_size,
            processing,
            cached_metrics: cached.into_iter().collect(),
            cache_age,
        }
    }

    /// Stop dispatching, cancel queued tasks and join workers.
    ///
    /// Workers still running after the shutdown timeout are aborted. Safe to
    /// call more than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Trend processor already shut down");
            return;
        }
        info!("Shutting down trend processor");
        self.cancel.cancel();

        let timeout = self.config.shutdown_timeout();

        let dispatcher = lock(&self.dispatcher).take();
        if let Some(mut handle) = dispatcher {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("Dispatcher did not stop in time, aborting");
                handle.abort();
            }
        }

        let pending = std::mem::take(&mut *lock(&self.queue)).into_vec();
        if !pending.is_empty() {
            info!(count = pending.len(), "Cancelling queued trend tasks");
        }
        for task in pending {
            self.emit(TrendEvent::Cancelled {
                metric: task.metric().clone(),
                task_id: task.task_id().to_string(),
            });
        }

        let mut workers = std::mem::take(&mut *lock(&self.worker_tasks));
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Trend worker panicked during shutdown: {}", e);
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "Trend workers did not finish in time, aborting"
            );
            workers.abort_all();
        }

        info!("Trend processor shut down");
    }

    /// Re-queue metrics whose last computation is older than the cache
    /// expiry. A metric is not re-queued again until `stale_retry` has passed.
    /// Returns how many were queued.
    pub fn sweep_stale(&self) -> usize {
        let now = Utc::now();
        let expiry = chrono::Duration::from_std(self.config.cache_expiry())
            .unwrap_or_else(|_| chrono::Duration::hours(24));

        let stale: Vec<MetricId> = self
            .last_processed
            .iter()
            .filter(|entry| now - *entry.value() > expiry)
            .map(|entry| entry.key().clone())
            .collect();

        let mut queued = 0;
        for metric in stale {
            if lock(&self.processing).contains_key(&metric) {
                continue;
            }
            let recently_requeued = self
                .sweep_requeued
                .get(&metric)
                .is_some_and(|at| at.elapsed() < self.config.stale_retry());
            if recently_requeued {
                continue;
            }
            if self.queue_trend_calculation(metric.clone(), PRIORITY_SWEEP, true) {
                self.sweep_requeued.insert(metric, Instant::now());
                queued += 1;
            }
        }

        if queued > 0 {
            info!(count = queued, "Re-queued stale trends");
        }
        queued
    }

    fn pop_task(&self) -> Option<TrendProcessingTask> {
        lock(&self.queue).pop()
    }

    async fn run_dispatcher(self: Arc<Self>) {
        debug!("Trend dispatcher running");
        loop {
            {
                let mut finished = lock(&self.worker_tasks);
                while finished.try_join_next().is_some() {}
            }

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.pop_task() {
                Some(task) => self.dispatch(task, permit),
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.queue_notify.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval()) => {
                            self.sweep_stale();
                        }
                    }
                }
            }
        }
        debug!("Trend dispatcher stopped");
    }

    fn dispatch(self: &Arc<Self>, task: TrendProcessingTask, permit: OwnedSemaphorePermit) {
        {
            let mut processing = lock(&self.processing);
            if let Some(flight) = processing.get_mut(task.metric()) {
                if task.force_refresh() {
                    // the running computation may have fetched before new data landed
                    let priority = flight
                        .refresh_pending
                        .map_or(task.priority(), |p| p.max(task.priority()));
                    flight.refresh_pending = Some(priority);
                    debug!(
                        task_id = task.task_id(),
                        "Metric already processing, refresh deferred until it finishes"
                    );
                } else {
                    debug!(
                        task_id = task.task_id(),
                        "Metric already processing, dropping duplicate task"
                    );
                }
                return;
            }
            processing.insert(
                task.metric().clone(),
                InFlight {
                    task_id: task.task_id().to_string(),
                    started_at: Utc::now(),
                    refresh_pending: None,
                },
            );
        }

        debug!(task_id = task.task_id(), priority = task.priority(), "Dispatching trend task");
        self.emit(TrendEvent::ProcessingStarted {
            metric: task.metric().clone(),
            task_id: task.task_id().to_string(),
        });

        let guard = ProcessingGuard {
            processor: Arc::clone(self),
            metric: task.metric().clone(),
        };
        let worker = Arc::clone(self);

        lock(&self.worker_tasks).spawn(async move {
            let _permit = permit;
            let metric = task.metric().clone();
            let processor = Arc::clone(&worker);

            let joined = tokio::task::spawn_blocking(move || processor.process_task(&task)).await;
            let event = joined.unwrap_or_else(|e| {
                error!(metric = %metric, "Trend worker crashed: {}", e);
                TrendEvent::ProcessingFailed {
                    metric,
                    error: e.to_string(),
                }
            });

            // listeners that react to the event must not see the metric in flight
            drop(guard);
            worker.emit(event);
        });
    }

    /// Clear the processing entry and queue any refresh deferred behind it
    fn finish(&self, metric: &MetricId) {
        let Some(flight) = lock(&self.processing).remove(metric) else {
            return;
        };
        debug!(
            task_id = %flight.task_id,
            elapsed_ms = (Utc::now() - flight.started_at).num_milliseconds(),
            "Trend task finished"
        );
        if let Some(priority) = flight.refresh_pending {
            if !self.is_shut_down() {
                self.queue_trend_calculation(metric.clone(), priority, true);
            }
        }
    }

    /// Run one task on a blocking thread and describe how it ended
    fn process_task(&self, task: &TrendProcessingTask) -> TrendEvent {
        let metric = task.metric();
        match self.compute(task) {
            Ok(TaskOutcome::Ready { from_cache }) => {
                debug!(metric = %metric, from_cache, "Trend ready");
                TrendEvent::TrendReady {
                    metric: metric.clone(),
                    from_cache,
                }
            }
            Ok(TaskOutcome::Insufficient { points }) => {
                warn!(
                    metric = %metric,
                    points,
                    required = self.config.min_data_points,
                    "Insufficient data for trend analysis"
                );
                TrendEvent::InsufficientData {
                    metric: metric.clone(),
                    points,
                }
            }
            Err(HealthTrendsError::Shutdown) => {
                debug!(metric = %metric, "Discarding trend computed after shutdown");
                TrendEvent::Cancelled {
                    metric: metric.clone(),
                    task_id: task.task_id().to_string(),
                }
            }
            Err(e) => {
                let error = e.error_chain().to_string();
                error!(metric = %metric, task_id = task.task_id(), "Trend processing failed: {}", error);
                TrendEvent::ProcessingFailed {
                    metric: metric.clone(),
                    error,
                }
            }
        }
    }

    fn compute(&self, task: &TrendProcessingTask) -> Result<TaskOutcome> {
        let metric = task.metric();

        if !task.force_refresh() && self.read_cache(metric).is_some() {
            return Ok(TaskOutcome::Ready { from_cache: true });
        }

        let end = Utc::now();
        let start = end - chrono::Duration::days(self.config.analysis_lookback_days);
        let data = self.data_source.get_metric_data(metric, start, end)?;
        if data.len() < self.config.min_data_points {
            return Ok(TaskOutcome::Insufficient { points: data.len() });
        }

        let mut result = self
            .analyzer
            .analyze(&data, metric, self.config.forecast_days)?;

        if let Some(comparator) = &self.comparator {
            let history = comparator.compare_to_historical(metric, end, HISTORY_LOOKBACK_DAYS)?;
            result = result.with_comparative_data(history.comparative_data());
        }

        // a blocking worker cannot be aborted, so it checks before writing
        if self.is_shut_down() {
            return Err(HealthTrendsError::Shutdown);
        }
        self.store(metric, Arc::new(result));
        Ok(TaskOutcome::Ready { from_cache: false })
    }

    fn store(&self, metric: &MetricId, result: Arc<TrendResult>) {
        let key = metric.cache_key();
        if let Err(e) = self.disk_cache.write(&key, result.as_ref()) {
            error!(metric = %metric, "Failed to write trend to disk cache: {}", e);
        }
        self.memory_cache
            .set(key, result, self.config.memory_cache_ttl());
        self.last_processed.insert(metric.clone(), Utc::now());
        self.sweep_requeued.remove(metric);
    }

    /// Memory tier, then disk tier. A disk hit repopulates memory for no
    /// longer than the file has left before it expires.
    fn read_cache(&self, metric: &MetricId) -> Option<Arc<TrendResult>> {
        let key = metric.cache_key();
        if let Some(result) = self.memory_cache.get(&key) {
            return Some(result);
        }

        let (result, age) = self.disk_cache.read_with_age::<TrendResult>(&key)?;
        let result = Arc::new(result);
        let remaining = self.disk_cache.expiry().saturating_sub(age);
        let ttl = self.config.memory_cache_ttl().min(remaining);
        debug!(metric = %metric, ttl_secs = ttl.as_secs(), "Trend loaded from disk cache");
        self.memory_cache.set(key, Arc::clone(&result), ttl);
        Some(result)
    }

    #[cfg(test)]
    fn record_processed(&self, metric: &MetricId, at: DateTime<Utc>) {
        self.last_processed.insert(metric.clone(), at);
    }

    #[cfg(test)]
    fn in_flight(&self) -> Vec<(MetricId, String, DateTime<Utc>)> {
        lock(&self.processing)
            .iter()
            .map(|(m, f)| (m.clone(), f.task_id.clone(), f.started_at))
            .collect()
    }
}
