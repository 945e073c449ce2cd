use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use roadmap_common::sink::{RoadmapSource, SinkError};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
#[error("failed to load roadmap cache: {0}")]
pub struct LoadError(#[from] pub SinkError);

/// Class to roadmap lookup table.
///
/// Readers always see a complete snapshot: the table is only ever replaced as a whole, by
/// swapping the `Arc` it lives behind. Lookups never block on a swap in progress.
pub struct RoadmapCache {
    snapshot: ArcSwap<HashMap<u8, u8>>,
}

impl Default for RoadmapCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RoadmapCache {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Read every mapping from `source` and install them as the active snapshot.
    /// On failure the previous snapshot stays in place.
    pub async fn load(&self, source: &dyn RoadmapSource) -> Result<usize, LoadError> {
        let roadmaps = source.load_roadmaps().await?;
        let entries = roadmaps.len();

        self.replace(roadmaps);
        info!(entries, "roadmap cache loaded");

        Ok(entries)
    }

    pub fn replace(&self, roadmaps: HashMap<u8, u8>) {
        metrics::gauge!("roadmap_cache_entries").set(roadmaps.len() as f64);
        self.snapshot.store(Arc::new(roadmaps));
    }

    /// Roadmap for `class_id`. `None` means the class is unknown, not that something failed.
    pub fn lookup(&self, class_id: u8) -> Option<u8> {
        self.snapshot.load().get(&class_id).copied()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
