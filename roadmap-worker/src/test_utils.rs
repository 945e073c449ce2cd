//! In-memory collaborators for exercising the pipeline without a broker or a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use roadmap_common::messages::{EnrichedResult, StatsSnapshot};
use roadmap_common::sink::{
    ResultSink, ResultStore, RoadmapSource, SinkError, SqlxError, StatsSink,
};

/// A `RoadmapSource` serving a fixed table, or failing every load.
pub struct MemorySource {
    roadmaps: Option<HashMap<u8, u8>>,
}

impl MemorySource {
    pub fn new(roadmaps: impl IntoIterator<Item = (u8, u8)>) -> Self {
        Self {
            roadmaps: Some(roadmaps.into_iter().collect()),
        }
    }

    pub fn failing() -> Self {
        Self { roadmaps: None }
    }
}

#[async_trait]
impl RoadmapSource for MemorySource {
    async fn load_roadmaps(&self) -> Result<HashMap<u8, u8>, SinkError> {
        self.roadmaps
            .clone()
            .ok_or(SinkError::ConnectionError {
                error: SqlxError::PoolClosed,
            })
    }
}

/// Records every result it is handed, both as a `ResultSink` and as a `ResultStore`.
/// A failing instance still counts attempts but rejects every call.
#[derive(Default)]
pub struct RecordingSink {
    fail: bool,
    attempts: AtomicUsize,
    results: Mutex<Vec<EnrichedResult>>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn results(&self) -> Vec<EnrichedResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn record(&self, result: &EnrichedResult) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return false;
        }
        self.results.lock().unwrap().push(*result);
        true
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn publish(&self, result: &EnrichedResult) -> Result<(), SinkError> {
        match self.record(result) {
            true => Ok(()),
            false => Err(SinkError::ChannelClosed),
        }
    }
}

#[async_trait]
impl ResultStore for RecordingSink {
    async fn save(&self, result: &EnrichedResult) -> Result<(), SinkError> {
        match self.record(result) {
            true => Ok(()),
            false => Err(SinkError::QueryError {
                command: "INSERT".to_owned(),
                error: SqlxError::PoolClosed,
            }),
        }
    }
}

/// Records published stats snapshots in emission order.
#[derive(Default)]
pub struct RecordingStatsSink {
    fail: bool,
    attempts: AtomicUsize,
    snapshots: Mutex<Vec<StatsSnapshot>>,
}

impl RecordingStatsSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatsSink for RecordingStatsSink {
    async fn publish_stats(&self, snapshot: StatsSnapshot) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SinkError::ChannelClosed);
        }
        self.snapshots.lock().unwrap().push(snapshot);
        Ok(())
    }
}
