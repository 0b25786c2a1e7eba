//! # Correlation Store Races
//!
//! Hand-off guarantees of the correlation store when stores, finds and
//! deadlines interleave across threads.
//!
//! ## Properties Tested:
//!
//! 1. **At-most-once**: one store, two concurrent finds, exactly one value
//! 2. **No lost wake-up**: a store inside the find window is always seen
//! 3. **Deadline races**: a store racing the deadline is either delivered or
//!    reported as a late arrival, never both and never neither
//! 4. **Key isolation**: a slow key never delays an unrelated one

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    use rand::Rng;
    use reply_bridge::{BridgeConfig, CorrelationStore, StoreOutcome};

    use crate::integration::fixtures::init_test_tracing;

    fn store() -> Arc<CorrelationStore<u64>> {
        init_test_tracing();
        Arc::new(CorrelationStore::new("races", &BridgeConfig::default()))
    }

    // =============================================================================
    // AT-MOST-ONCE
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_finders_one_value() {
        for round in 0..50 {
            let store = store();

            let finders: Vec<_> = (0..2)
                .map(|_| {
                    let store = store.clone();
                    tokio::spawn(async move { store.find("K", Duration::from_millis(100)).await })
                })
                .collect();
            store.store("K", round);

            let mut delivered = 0;
            for finder in finders {
                if let Some(value) = finder.await.unwrap() {
                    assert_eq!(value, round);
                    delivered += 1;
                }
            }
            assert_eq!(delivered, 1, "round {round}");
        }
    }

    // =============================================================================
    // NO LOST WAKE-UP
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_store_within_window_is_seen() {
        for window in [Duration::ZERO, Duration::from_millis(1), Duration::from_millis(100)] {
            let store = store();

            let finder = {
                let store = store.clone();
                tokio::spawn(async move { store.find("K", window).await })
            };

            if window.is_zero() {
                // A zero window only covers a store that completed first
                store.store("K", 7);
            } else {
                tokio::task::yield_now().await;
                if window >= Duration::from_millis(10) {
                    tokio::time::sleep(window / 2).await;
                }
                assert_eq!(store.store("K", 7), StoreOutcome::HandedOff);
            }

            assert_eq!(finder.await.unwrap(), Some(7), "window {window:?}");
        }
    }

    // =============================================================================
    // DEADLINE RACES
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_store_at_exact_deadline_is_consistent() {
        let store = store();
        let window = Duration::from_millis(100);

        let finder = {
            let store = store.clone();
            tokio::spawn(async move { store.find("K", window).await })
        };
        let storer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                store.store("K", 1)
            })
        };

        let found = finder.await.unwrap();
        let outcome = storer.await.unwrap();
        match outcome {
            StoreOutcome::HandedOff | StoreOutcome::Buffered => assert_eq!(found, Some(1)),
            StoreOutcome::LateDropped => assert_eq!(found, None),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stores_racing_deadlines_are_never_lost() {
        let store = store();
        let window = Duration::from_millis(20);

        let races: Vec<_> = (0..100u64)
            .map(|i| {
                let store = store.clone();
                let delay = Duration::from_millis(rand::thread_rng().gen_range(10..30));
                tokio::spawn(async move {
                    let key = format!("K{i}");
                    let finder = {
                        let store = store.clone();
                        let key = key.clone();
                        tokio::spawn(async move { store.find(&key, window).await })
                    };
                    tokio::time::sleep(delay).await;
                    let outcome = store.store(&key, i);
                    (outcome, finder.await.unwrap())
                })
            })
            .collect();

        for (i, race) in races.into_iter().enumerate() {
            let (outcome, found) = race.await.unwrap();
            match outcome {
                StoreOutcome::HandedOff | StoreOutcome::Buffered => {
                    assert_eq!(found, Some(i as u64), "delivered store lost for K{i}")
                }
                StoreOutcome::LateDropped => assert_eq!(found, None, "late store delivered for K{i}"),
                other => panic!("unexpected outcome {other:?} for K{i}"),
            }
        }

        let stats = store.stats();
        let delivered = stats.total_found.load(Ordering::Relaxed);
        let late = stats.total_late_dropped.load(Ordering::Relaxed);
        assert_eq!(delivered + late, 100);
    }

    // =============================================================================
    // KEY ISOLATION
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_key_does_not_block_other_keys() {
        let store = store();

        // Parked for a long time on an unrelated key
        let slow = {
            let store = store.clone();
            tokio::spawn(async move { store.find("slow", Duration::from_secs(2)).await })
        };

        let fast = {
            let store = store.clone();
            tokio::spawn(async move { store.find("fast", Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let start = Instant::now();
        store.store("fast", 1);
        assert_eq!(fast.await.unwrap(), Some(1));
        assert!(start.elapsed() < Duration::from_millis(500));

        assert!(store.evict("slow"));
        assert_eq!(slow.await.unwrap(), None);
    }
}
