//! Shared wiring for integration scenarios: one registry, a producer sending
//! on the request channel and a consumer answering from it.

use bridge_telemetry::{endpoint_span, init_tracing, TelemetryConfig};
use bridge_types::{CallContext, Message};
use reply_bridge::{BridgeConfig, ChannelRegistry, SelectiveChannel, SyncConsumer, SyncProducer};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Request channel shared by producer and consumer.
pub const REQUESTS: &str = "helloRequests";

/// Header carrying the correlation key in these scenarios.
pub const KEY_HEADER: &str = "key";

static TRACING: Once = Once::new();

/// Install quiet logging once per test binary.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        // Another harness may already own the global subscriber
        let _ = init_tracing(&TelemetryConfig::for_tests());
    });
}

/// Endpoint configuration used by every scenario.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        correlation_header_name: KEY_HEADER.to_string(),
        polling_interval: Duration::from_millis(20),
        ..BridgeConfig::default()
    }
}

/// Producer and consumer wired through one registry.
pub struct Bridge {
    pub registry: Arc<ChannelRegistry>,
    pub requests: Arc<SelectiveChannel>,
    pub producer: SyncProducer,
    pub consumer: Arc<SyncConsumer>,
}

/// Build a fresh bridge.
pub fn bridge() -> Bridge {
    init_test_tracing();

    let config = test_config();
    let registry = Arc::new(ChannelRegistry::from_config(&config));
    let requests = registry.get_or_create(REQUESTS);

    let producer = SyncProducer::new("helloEndpoint", requests.clone(), registry.clone(), config.clone());
    let consumer = Arc::new(SyncConsumer::new("helloService", requests.clone(), registry.clone(), config));

    Bridge {
        registry,
        requests,
        producer,
        consumer,
    }
}

/// Request carrying a correlation key.
pub fn request(key: &str, payload: &str) -> Message {
    Message::new(payload.to_string()).with_header(KEY_HEADER, key)
}

/// Answer `count` requests with `echo: <payload>` after `delay` each.
///
/// Resolves to the number of requests answered.
pub fn spawn_echo_responder(consumer: Arc<SyncConsumer>, count: usize, delay: Duration) -> JoinHandle<usize> {
    let span = endpoint_span!(consumer.name(), role = "responder");
    tokio::spawn(async move {
        let mut answered = 0;
        for _ in 0..count {
            let mut ctx = CallContext::new();
            let Ok(request) = consumer.receive(&mut ctx, Duration::from_secs(5)).await else {
                break;
            };

            tokio::time::sleep(delay).await;
            let payload = request.payload_as_str().unwrap_or_default();
            let reply = Message::new(format!("echo: {payload}"));
            if consumer.send(reply, &ctx).await.is_ok() {
                answered += 1;
            }
        }
        answered
    }
    .instrument(span))
}
