use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use roadmap_common::messages::StatsSnapshot;
use roadmap_common::sink::StatsSink;
use tracing::{debug, error, info};

/// Emit a snapshot every this many completed events.
pub const DEFAULT_EMIT_EVERY: i32 = 10;

/// Counter of completed events, periodically published through a `StatsSink`.
///
/// The increment is atomic, but the emission that follows it is not: two workers crossing
/// consecutive multiples at the same time may publish their snapshots in either order.
/// Each multiple is still published exactly once, carrying the value that triggered it.
pub struct StatsAggregator {
    count: AtomicI32,
    emit_every: i32,
    sink: Arc<dyn StatsSink>,
}

impl StatsAggregator {
    pub fn new(sink: Arc<dyn StatsSink>) -> Self {
        Self::with_interval(sink, DEFAULT_EMIT_EVERY)
    }

    pub fn with_interval(sink: Arc<dyn StatsSink>, emit_every: i32) -> Self {
        Self {
            count: AtomicI32::new(0),
            emit_every: emit_every.max(1),
            sink,
        }
    }

    /// Add one completed event and return the new count, publishing a snapshot first
    /// if the new count is a multiple of the emission interval.
    pub async fn increment(&self) -> i32 {
        // Wraps on overflow, like the atomic add itself.
        let count = self.count.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        debug!(count, "incremented event count");

        if count % self.emit_every == 0 {
            self.emit(StatsSnapshot { count }).await;
        }

        count
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Publish the current count one last time. Only call once every worker has exited.
    pub async fn final_flush(&self) -> StatsSnapshot {
        let snapshot = StatsSnapshot {
            count: self.count(),
        };

        self.emit(snapshot).await;
        info!(count = snapshot.count, "final event count");

        snapshot
    }

    async fn emit(&self, snapshot: StatsSnapshot) {
        match self.sink.publish_stats(snapshot).await {
            Ok(_) => info!(count = snapshot.count, "stats published"),
            Err(error) => {
                metrics::counter!("roadmap_stats_publish_failures_total").increment(1);
                error!(count = snapshot.count, "failed to publish stats: {}", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingStatsSink;

    fn counts(sink: &RecordingStatsSink) -> Vec<i32> {
        sink.snapshots().iter().map(|s| s.count).collect()
    }

    #[tokio::test]
    async fn emits_on_multiples_of_ten() {
        let sink = Arc::new(RecordingStatsSink::default());
        let stats = StatsAggregator::new(sink.clone());

        for expected in 1..=29 {
            assert_eq!(stats.increment().await, expected);
        }

        assert_eq!(counts(&sink), vec![10, 20]);
        assert_eq!(stats.count(), 29);
    }

    #[tokio::test]
    async fn final_flush_carries_current_count() {
        let sink = Arc::new(RecordingStatsSink::default());
        let stats = StatsAggregator::new(sink.clone());

        for _ in 0..13 {
            stats.increment().await;
        }
        let snapshot = stats.final_flush().await;

        assert_eq!(snapshot, StatsSnapshot { count: 13 });
        assert_eq!(counts(&sink), vec![10, 13]);
    }

    #[tokio::test]
    async fn final_flush_with_no_events() {
        let sink = Arc::new(RecordingStatsSink::default());
        let stats = StatsAggregator::new(sink.clone());

        stats.final_flush().await;

        assert_eq!(counts(&sink), vec![0]);
    }

    #[tokio::test]
    async fn publish_failures_do_not_stop_counting() {
        let sink = Arc::new(RecordingStatsSink::failing());
        let stats = StatsAggregator::new(sink.clone());

        for _ in 0..25 {
            stats.increment().await;
        }

        assert_eq!(stats.count(), 25);
        assert_eq!(sink.attempts(), 2);
        assert!(sink.snapshots().is_empty());
    }

    #[tokio::test]
    async fn increment_wraps_at_max() {
        let sink = Arc::new(RecordingStatsSink::default());
        let stats = StatsAggregator::new(sink.clone());
        stats.count.store(i32::MAX, Ordering::SeqCst);

        assert_eq!(stats.increment().await, i32::MIN);
        assert_eq!(stats.count(), i32::MIN);
        assert!(sink.snapshots().is_empty());
    }

    #[tokio::test]
    async fn custom_interval() {
        let sink = Arc::new(RecordingStatsSink::default());
        let stats = StatsAggregator::with_interval(sink.clone(), 3);

        for _ in 0..7 {
            stats.increment().await;
        }

        assert_eq!(counts(&sink), vec![3, 6]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_emit_each_multiple_once() {
        let sink = Arc::new(RecordingStatsSink::default());
        let stats = Arc::new(StatsAggregator::new(sink.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        stats.increment().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(stats.count(), 200);

        // Emission order across workers is not guaranteed, only the set of emitted values.
        let mut emitted = counts(&sink);
        emitted.sort_unstable();
        assert_eq!(emitted, (1..=20).map(|n| n * 10).collect::<Vec<_>>());
    }
}
