use dashmap::DashSet;

/// Once-only guard over profile identifiers.
///
/// Identifiers are kept for the lifetime of the process. There is no eviction, so the set
/// grows with the number of distinct profiles seen; its size is exported as the
/// `roadmap_dedup_tracked_profiles` gauge.
#[derive(Default)]
pub struct DedupTracker {
    seen: DashSet<i64>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `profile_id` is marked, `false` on every later call.
    ///
    /// The check and the insert happen under the same shard lock, so two concurrent callers
    /// can never both see a new identifier.
    pub fn try_mark(&self, profile_id: i64) -> bool {
        let inserted = self.seen.insert(profile_id);
        if inserted {
            metrics::gauge!("roadmap_dedup_tracked_profiles").increment(1.0);
        }
        inserted
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn marks_once() {
        let tracker = DedupTracker::new();

        assert!(tracker.try_mark(42));
        assert!(!tracker.try_mark(42));
        assert!(!tracker.try_mark(42));
        assert!(tracker.try_mark(43));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn concurrent_marks_of_one_profile_admit_exactly_one() {
        const THREADS: usize = 16;

        for profile_id in 0..50 {
            let tracker = Arc::new(DedupTracker::new());
            let barrier = Arc::new(Barrier::new(THREADS));

            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let tracker = tracker.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        tracker.try_mark(profile_id)
                    })
                })
                .collect();

            let admitted = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|admitted| *admitted)
                .count();

            assert_eq!(admitted, 1);
            assert_eq!(tracker.len(), 1);
        }
    }

    #[test]
    fn concurrent_marks_of_distinct_profiles_all_admitted() {
        let tracker = Arc::new(DedupTracker::new());

        let handles: Vec<_> = (0..8_i64)
            .map(|shard| {
                let tracker = tracker.clone();
                thread::spawn(move || {
                    (0..1000_i64)
                        .filter(|n| tracker.try_mark(shard * 1000 + n))
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 8000);
        assert_eq!(tracker.len(), 8000);
    }
}
