//! # Synchronous Round Trips
//!
//! A producer sends a request, a consumer (or an inbound handler) answers,
//! and the producer's `receive` returns the correlated reply.
//!
//! ## Flows Tested:
//!
//! 1. **External store**: reply stored directly under the key after 50ms
//! 2. **Timeout**: no reply ever, `ReplyTimeout` after the call timeout
//! 3. **Consumer echo**: request/reply through temporary reply channels
//! 4. **Concurrent calls**: many calls through one producer and one consumer
//! 5. **Late replies**: replies after a timeout never reach a later call

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    use async_trait::async_trait;
    use bridge_types::{BridgeError, CallContext, CallState, Message, TransportError};
    use reply_bridge::{StoreOutcome, SyncProducer, Transport};

    use crate::integration::fixtures::{bridge, request, spawn_echo_responder, test_config};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Transport whose broker is down
    struct UnreachableBroker;

    #[async_trait]
    impl Transport for UnreachableBroker {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn send(&self, _message: Message) -> Result<(), TransportError> {
            Err(TransportError::Unavailable("connection refused".into()))
        }

        async fn receive(&self, timeout: Duration) -> Result<Message, TransportError> {
            Err(TransportError::Timeout {
                endpoint: "unreachable".into(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    // =============================================================================
    // EXTERNAL STORE
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_reply_stored_after_50ms_returns_in_50ms() {
        let bridge = bridge();
        let mut ctx = CallContext::new();

        bridge.producer.send(request("K7", "hello"), &mut ctx).await.unwrap();

        let store = bridge.producer.store().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.store("K7", Message::new("reply"));
        });

        let start = Instant::now();
        let reply = bridge
            .producer
            .receive(&mut ctx, Duration::from_millis(5000))
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(reply.payload_as_str(), Some("reply"));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100), "took {elapsed:?}");
    }

    // =============================================================================
    // TIMEOUT
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_no_reply_times_out_after_200ms() {
        let bridge = bridge();
        let mut ctx = CallContext::new();

        bridge.producer.send(request("K8", "hello"), &mut ctx).await.unwrap();

        let start = Instant::now();
        let err = bridge
            .producer
            .receive(&mut ctx, Duration::from_millis(200))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, BridgeError::ReplyTimeout { timeout_ms: 200, .. }));
        assert!(err.is_timeout());
        assert!(!err.is_send_failure());
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed <= Duration::from_millis(200) + test_config().polling_interval);
        assert_eq!(ctx.call_state(&bridge.producer.key_name()), CallState::TimedOut);
    }

    #[tokio::test]
    async fn test_send_failure_reported_distinctly() {
        let bridge = bridge();
        let producer = SyncProducer::new(
            "helloEndpoint",
            Arc::new(UnreachableBroker),
            bridge.registry.clone(),
            test_config(),
        );
        let mut ctx = CallContext::new();

        let err = producer.send(request("K1", "hello"), &mut ctx).await.unwrap_err();

        assert!(err.is_send_failure());
        assert!(!err.is_timeout());
        assert_eq!(ctx.call_state(&producer.key_name()), CallState::Failed);
    }

    // =============================================================================
    // CONSUMER ECHO
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_echo_through_consumer() {
        let bridge = bridge();
        let responder = spawn_echo_responder(bridge.consumer.clone(), 1, Duration::from_millis(30));
        let mut ctx = CallContext::new();

        bridge.producer.send(request("K2", "hello"), &mut ctx).await.unwrap();
        let reply = bridge
            .producer
            .receive(&mut ctx, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(reply.payload_as_str(), Some("echo: hello"));
        assert_eq!(reply.header_as_string("key").as_deref(), Some("K2"));
        assert_eq!(ctx.call_state(&bridge.producer.key_name()), CallState::Replied);
        assert_eq!(responder.await.unwrap(), 1);

        // Only the request channel is left
        assert_eq!(bridge.registry.len(), 1);
        assert_eq!(bridge.consumer.pending_replies(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_get_their_own_replies() {
        const CALLS: usize = 20;

        let bridge = bridge();
        let responder = spawn_echo_responder(bridge.consumer.clone(), CALLS, Duration::ZERO);
        let producer = Arc::new(bridge.producer);

        let calls: Vec<_> = (0..CALLS)
            .map(|i| {
                let producer = producer.clone();
                tokio::spawn(async move {
                    let mut ctx = CallContext::new();
                    producer
                        .send(request(&format!("K{i}"), &format!("payload-{i}")), &mut ctx)
                        .await
                        .unwrap();
                    producer.receive(&mut ctx, Duration::from_secs(5)).await
                })
            })
            .collect();

        for (i, call) in calls.into_iter().enumerate() {
            let reply = call.await.unwrap().unwrap();
            assert_eq!(reply.payload_as_str(), Some(format!("echo: payload-{i}").as_str()));
        }
        assert_eq!(responder.await.unwrap(), CALLS);
    }

    // =============================================================================
    // LATE REPLIES
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_does_not_reach_next_call() {
        let bridge = bridge();

        let mut first = CallContext::new();
        bridge.producer.send(request("K9", "first"), &mut first).await.unwrap();
        assert!(bridge
            .producer
            .receive(&mut first, Duration::from_millis(100))
            .await
            .is_err());

        // Reply for the timed-out call shows up late
        let outcome = bridge
            .producer
            .on_reply(request("K9", "stale reply"))
            .unwrap();
        assert_eq!(outcome, StoreOutcome::LateDropped);

        // Retried call with the same key does not see the stale reply
        let mut second = CallContext::new();
        bridge.producer.send(request("K9", "second"), &mut second).await.unwrap();
        assert!(bridge
            .producer
            .receive(&mut second, Duration::from_millis(100))
            .await
            .unwrap_err()
            .is_timeout());

        let stats = bridge.producer.store().stats();
        assert_eq!(stats.total_late_dropped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_receive_without_send_is_programmer_error() {
        let bridge = bridge();
        let err = bridge
            .producer
            .receive(&mut CallContext::new(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::CorrelationNotInitialized { .. }));
    }
}
