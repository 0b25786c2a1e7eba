//! # Single-Slot Event Future
//!
//! Competing value and error sources racing for one slot, and late readers.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bridge_types::BridgeError;
    use futures::stream;
    use reply_bridge::EventFuture;

    use crate::integration::fixtures::init_test_tracing;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exactly_one_racing_writer_wins() {
        init_test_tracing();
        let future: EventFuture<usize> = EventFuture::new("race");

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let future = future.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        future.try_set(i)
                    } else {
                        future.try_set_error(format!("writer {i} failed"))
                    }
                })
            })
            .collect();

        let mut winners = 0;
        for writer in writers {
            if writer.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        // Every reader sees the same result
        let first = future.get(Duration::ZERO).await;
        for _ in 0..10 {
            assert_eq!(future.get(Duration::ZERO).await, first);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_minutes_later_sees_first_value() {
        init_test_tracing();
        let future = EventFuture::new("status");

        future.try_set("v1");
        future.try_set("v2");
        assert_eq!(future.get(Duration::from_secs(1)).await.unwrap(), "v1");

        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(future.get(Duration::from_secs(1)).await.unwrap(), "v1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_and_error_watches_race() {
        init_test_tracing();
        let future: EventFuture<String> = EventFuture::new("pod");

        // Error source fires first, value source later
        let errors = stream::iter(vec![Err::<String, _>("pod deleted")]);
        let values = stream::iter(vec![Ok::<_, &str>("Running".to_string())]);

        future.watch(errors).await.unwrap();
        future.watch(values).await.unwrap();

        assert_eq!(
            future.get(Duration::from_secs(1)).await.unwrap_err(),
            BridgeError::EventFailed("pod deleted".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unset_slot_times_out_every_time() {
        init_test_tracing();
        let future: EventFuture<u8> = EventFuture::new("never");

        for _ in 0..3 {
            let err = future.get(Duration::from_millis(50)).await.unwrap_err();
            assert!(err.is_timeout());
        }
        assert!(!future.is_completed());
    }
}
