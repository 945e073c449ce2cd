use std::sync::Arc;
use std::time::Instant;

use roadmap_common::messages::{EnrichedResult, ProfileEvent};
use roadmap_common::sink::{ResultSink, ResultStore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::RoadmapCache;
use crate::dedup::DedupTracker;
use crate::ingress::IngressReceiver;
use crate::stats::StatsAggregator;

/// What happened to a single profile event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Enriched, counted, and handed to the publisher and the store.
    Completed(EnrichedResult),
    /// The profile was already processed by this process.
    Duplicate,
    /// The event's class has no roadmap in the cache.
    UnknownClass,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed(_) => "completed",
            Outcome::Duplicate => "duplicate",
            Outcome::UnknownClass => "unknown_class",
        }
    }
}

/// Everything a worker needs to process an event. Shared by all workers of a pool.
pub struct Pipeline {
    cache: Arc<RoadmapCache>,
    dedup: DedupTracker,
    stats: StatsAggregator,
    results: Arc<dyn ResultSink>,
    store: Arc<dyn ResultStore>,
}

impl Pipeline {
    pub fn new(
        cache: Arc<RoadmapCache>,
        stats: StatsAggregator,
        results: Arc<dyn ResultSink>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            cache,
            dedup: DedupTracker::new(),
            stats,
            results,
            store,
        }
    }

    pub fn cache(&self) -> &RoadmapCache {
        &self.cache
    }

    pub fn dedup(&self) -> &DedupTracker {
        &self.dedup
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    /// Process a single event.
    ///
    /// Publishing and persisting are attempted independently of each other, and a failure of
    /// either is logged and dropped. The event is counted once it made it past the dedup
    /// check and the cache lookup, whatever the outcome of those two calls.
    pub async fn process(&self, event: ProfileEvent) -> Outcome {
        if !self.dedup.try_mark(event.profile_id) {
            warn!(profile_id = event.profile_id, "duplicate profile, skipping");
            return Outcome::Duplicate;
        }

        let Some(roadmap_id) = self.cache.lookup(event.class_id) else {
            warn!(
                profile_id = event.profile_id,
                class_id = event.class_id,
                "class not found in cache, skipping"
            );
            return Outcome::UnknownClass;
        };

        let result = event.enrich(roadmap_id);

        if let Err(error) = self.results.publish(&result).await {
            metrics::counter!("roadmap_publish_failures_total").increment(1);
            error!(
                profile_id = result.profile_id,
                "failed to publish result: {}", error
            );
        }

        self.stats.increment().await;

        if let Err(error) = self.store.save(&result).await {
            metrics::counter!("roadmap_persist_failures_total").increment(1);
            error!(
                profile_id = result.profile_id,
                "failed to save result: {}", error
            );
        }

        Outcome::Completed(result)
    }
}

/// A fixed number of tasks draining one `IngressQueue`.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers. Each one runs until the queue behind `receiver` is closed and drained.
    pub fn start(size: usize, receiver: IngressReceiver, pipeline: Arc<Pipeline>) -> Self {
        let handles = (0..size)
            .map(|worker| tokio::spawn(run_worker(worker, receiver.clone(), pipeline.clone())))
            .collect();

        info!(workers = size, "worker pool started");

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Returns how many exited cleanly.
    pub async fn join(self) -> usize {
        let mut clean = 0;

        for handle in self.handles {
            match handle.await {
                Ok(_) => clean += 1,
                Err(error) => error!("worker did not exit cleanly: {}", error),
            }
        }

        clean
    }
}

async fn run_worker(worker: usize, receiver: IngressReceiver, pipeline: Arc<Pipeline>) {
    debug!(worker, "worker started");

    while let Some(event) = receiver.recv().await {
        let start = Instant::now();
        let outcome = pipeline.process(event).await;

        metrics::counter!("roadmap_events_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("roadmap_event_processing_duration_seconds")
            .record(start.elapsed().as_secs_f64());
    }

    debug!(worker, "ingress queue drained, worker exiting");
}
