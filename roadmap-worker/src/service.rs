use std::sync::{Arc, Mutex, PoisonError};

use roadmap_common::messages::{ProfileEvent, StatsSnapshot};
use roadmap_common::sink::{ResultSink, ResultStore, RoadmapSource, StatsSink};
use thiserror::Error;
use tracing::{error, info};

use crate::cache::{LoadError, RoadmapCache};
use crate::ingress::{IngressError, IngressQueue, DEFAULT_CAPACITY};
use crate::stats::{StatsAggregator, DEFAULT_EMIT_EVERY};
use crate::worker::{Pipeline, WorkerPool};

/// Lifecycle of the pipeline. States only move forward; a stopped pipeline cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    CacheLoading,
    Running,
    Draining,
    Stopped,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    LoadError(#[from] LoadError),
    #[error("cannot {operation} a pipeline that is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },
}

/// The external systems the pipeline reads from and writes to.
pub struct Collaborators {
    pub source: Arc<dyn RoadmapSource>,
    pub results: Arc<dyn ResultSink>,
    pub store: Arc<dyn ResultStore>,
    pub stats: Arc<dyn StatsSink>,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub stats_interval: i32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: DEFAULT_CAPACITY,
            stats_interval: DEFAULT_EMIT_EVERY,
        }
    }
}

/// Owns the ingress queue and the worker pool, and drives them through their lifecycle.
pub struct Service {
    state: Mutex<PipelineState>,
    workers: usize,
    queue: IngressQueue,
    pipeline: Arc<Pipeline>,
    pool: Mutex<Option<WorkerPool>>,
    source: Arc<dyn RoadmapSource>,
}

impl Service {
    pub fn new(options: ServiceOptions, collaborators: Collaborators) -> Self {
        let stats = StatsAggregator::with_interval(collaborators.stats, options.stats_interval);
        let pipeline = Pipeline::new(
            Arc::new(RoadmapCache::new()),
            stats,
            collaborators.results,
            collaborators.store,
        );

        Self {
            state: Mutex::new(PipelineState::Uninitialized),
            workers: options.workers.max(1),
            queue: IngressQueue::new(options.queue_capacity),
            pipeline: Arc::new(pipeline),
            pool: Mutex::new(None),
            source: collaborators.source,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Load the roadmap cache, then start the workers.
    ///
    /// Workers are never started without a loaded cache: if the load fails the pipeline is
    /// stopped for good and the error is returned. Returns the number of cached roadmaps.
    pub async fn start(&self) -> Result<usize, ServiceError> {
        self.transition(
            "start",
            PipelineState::Uninitialized,
            PipelineState::CacheLoading,
        )?;

        let entries = match self.pipeline.cache().load(self.source.as_ref()).await {
            Ok(entries) => entries,
            Err(load_error) => {
                error!("failed to load roadmap cache: {}", load_error);
                self.force(PipelineState::Stopped);
                return Err(load_error.into());
            }
        };

        let pool = WorkerPool::start(self.workers, self.queue.receiver(), self.pipeline.clone());
        *self.pool.lock().unwrap_or_else(PoisonError::into_inner) = Some(pool);

        self.transition("start", PipelineState::CacheLoading, PipelineState::Running)?;

        Ok(entries)
    }

    /// Hand an event to the workers, waiting while the ingress queue is full.
    pub async fn submit(&self, event: ProfileEvent) -> Result<(), IngressError> {
        self.queue.enqueue(event).await
    }

    /// Replace the cached roadmaps with a fresh read of the source, atomically.
    pub async fn reload_cache(&self) -> Result<usize, ServiceError> {
        let state = self.state();
        if state != PipelineState::Running {
            return Err(ServiceError::InvalidState {
                operation: "reload",
                state,
            });
        }

        Ok(self.pipeline.cache().load(self.source.as_ref()).await?)
    }

    /// Close the ingress queue, wait for every worker to drain it and exit, then publish the
    /// final stats. Only the first call does anything; later calls return an error.
    pub async fn stop(&self) -> Result<StatsSnapshot, ServiceError> {
        self.transition("stop", PipelineState::Running, PipelineState::Draining)?;

        self.queue.close();
        info!("ingress queue closed, draining workers");

        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            let expected = pool.size();
            let joined = pool.join().await;
            info!(joined, expected, "workers drained");
        }

        let snapshot = self.pipeline.stats().final_flush().await;

        self.transition("stop", PipelineState::Draining, PipelineState::Stopped)?;

        Ok(snapshot)
    }

    fn transition(
        &self,
        operation: &'static str,
        from: PipelineState,
        to: PipelineState,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(ServiceError::InvalidState {
                operation,
                state: *state,
            });
        }

        *state = to;
        info!(?from, ?to, "pipeline state changed");

        Ok(())
    }

    fn force(&self, to: PipelineState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        info!(from = ?*state, ?to, "pipeline state changed");
        *state = to;
    }
}
