//! Relay pipeline tests
//!
//! These tests run the relay sender against an in-process management server
//! that records every request and tracks how many are in flight at once.

use super::*;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{ContainerSnapshot, Credential, RelayUnit, CONTAINERS_PATH, IMAGES_PATH};
use crate::observability::StructuredLogger;
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::StatusCode,
    Router,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
struct Received {
    path: String,
    authorization: Option<String>,
    body: Bytes,
}

/// Management server stand-in
#[derive(Default)]
struct StubServer {
    received: Mutex<Vec<Received>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    failing_paths: HashSet<String>,
    delay: Duration,
}

impl StubServer {
    fn failing(paths: &[&str]) -> Self {
        Self {
            failing_paths: paths.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    fn paths(&self) -> Vec<String> {
        self.received().into_iter().map(|r| r.path).collect()
    }
}

async fn record(State(stub): State<Arc<StubServer>>, request: Request) -> StatusCode {
    let now = stub.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stub.max_in_flight.fetch_max(now, Ordering::SeqCst);

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    if !stub.delay.is_zero() {
        tokio::time::sleep(stub.delay).await;
    }

    let path = parts.uri.path().to_string();
    stub.received.lock().unwrap().push(Received {
        path: path.clone(),
        authorization: parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    stub.in_flight.fetch_sub(1, Ordering::SeqCst);

    if stub.failing_paths.contains(&path) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn start_stub(stub: Arc<StubServer>) -> Url {
    let app = Router::new().fallback(record).with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{}", addr)).unwrap()
}

fn sender_for(base: Url, consumer: QueueConsumer) -> RelaySender {
    RelaySender::new(
        base,
        Arc::new(Credential::new("test-key")),
        Duration::from_secs(5),
        consumer,
        StructuredLogger::new("test-host"),
    )
    .unwrap()
}

fn image_unit(tag: &str) -> RelayUnit {
    RelayUnit::images(vec![serde_json::from_value(json!({ "Id": tag })).unwrap()])
}

fn container_unit(ids: &[&str]) -> RelayUnit {
    RelayUnit::containers(
        ids.iter()
            .map(|id| ContainerSnapshot {
                summary: serde_json::from_value(json!({
                    "Id": id,
                    "Names": [format!("/{}", id)],
                    "Ports": [{"PrivatePort": 8080, "Type": "tcp"}],
                    "Labels": {"env": "test"}
                }))
                .unwrap(),
                detail: serde_json::from_value(json!({
                    "Id": id,
                    "Name": format!("/{}", id),
                    "State": {"Running": true, "Pid": 4242},
                    "Config": {"Env": ["A=1"]},
                    "NetworkSettings": {"IPAddress": "172.17.0.2"}
                }))
                .unwrap(),
            })
            .collect(),
    )
}

fn image_tag(body: &Bytes) -> String {
    let value: serde_json::Value = serde_json::from_slice(body).unwrap();
    value[0]["Id"].as_str().unwrap().to_string()
}

mod sender_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_order_matches_queue_order() {
        let stub = Arc::new(StubServer::default());
        let base = start_stub(stub.clone()).await;
        let (producer, consumer) = delivery_queue(2).unwrap();
        let sender = tokio::spawn(sender_for(base, consumer).run());

        let mut enqueued = Vec::new();
        for i in 0..6 {
            let tag = format!("img-{}", i);
            producer.enqueue(image_unit(&tag)).await.unwrap();
            enqueued.push(tag);
        }
        drop(producer);

        let stats = sender.await.unwrap();
        assert_eq!(stats.sent, 6);

        let delivered: Vec<String> = stub.received().iter().map(|r| image_tag(&r.body)).collect();
        assert_eq!(delivered, enqueued);
    }

    #[tokio::test]
    async fn test_posts_never_overlap() {
        let stub = Arc::new(StubServer::slow(Duration::from_millis(30)));
        let base = start_stub(stub.clone()).await;
        let (producer, consumer) = delivery_queue(2).unwrap();
        let sender = tokio::spawn(sender_for(base, consumer).run());

        let mut producers = Vec::new();
        for p in 0..3 {
            let producer = producer.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..3 {
                    producer
                        .enqueue(image_unit(&format!("{}-{}", p, i)))
                        .await
                        .unwrap();
                }
            }));
        }
        drop(producer);
        for handle in producers {
            handle.await.unwrap();
        }

        let stats = sender.await.unwrap();
        assert_eq!(stats.sent, 9);
        assert_eq!(stub.received().len(), 9);
        assert_eq!(stub.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_does_not_block_next_unit() {
        let stub = Arc::new(StubServer::failing(&[CONTAINERS_PATH]));
        let base = start_stub(stub.clone()).await;
        let (producer, consumer) = delivery_queue(2).unwrap();
        let health = HealthRegistry::new();
        health.register(components::RELAY_SENDER).await;
        let sender = sender_for(base, consumer).with_health(health.clone());
        let stats_handle = sender.stats_handle();

        producer.enqueue(container_unit(&["a"])).await.unwrap();
        producer.enqueue(image_unit("img")).await.unwrap();
        drop(producer);

        let stats = sender.run().await;

        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stub.paths(), vec![CONTAINERS_PATH, IMAGES_PATH]);
        assert!(stats_handle.read().await.last_error.is_none());

        // The image delivery after the failure restores health
        let health = health.health().await;
        assert_eq!(
            health.components[components::RELAY_SENDER].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_failure_marks_sender_degraded() {
        let stub = Arc::new(StubServer::failing(&[IMAGES_PATH]));
        let base = start_stub(stub.clone()).await;
        let (producer, consumer) = delivery_queue(1).unwrap();
        let health = HealthRegistry::new();
        health.register(components::RELAY_SENDER).await;

        producer.enqueue(image_unit("img")).await.unwrap();
        drop(producer);
        let stats = sender_for(base, consumer).with_health(health.clone()).run().await;

        assert_eq!(stats.failed, 1);
        assert!(stats.last_error.unwrap().contains("500"));
        let health = health.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_unreachable_server_drops_units() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        let (producer, consumer) = delivery_queue(2).unwrap();
        producer.enqueue(image_unit("a")).await.unwrap();
        producer.enqueue(image_unit("b")).await.unwrap();
        drop(producer);

        let stats = sender_for(base, consumer).run().await;

        assert_eq!(stats.sent, 0);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn test_requests_carry_agent_key() {
        let stub = Arc::new(StubServer::default());
        let base = start_stub(stub.clone()).await;
        let (producer, consumer) = delivery_queue(1).unwrap();

        producer.enqueue(image_unit("a")).await.unwrap();
        drop(producer);
        sender_for(base, consumer).run().await;

        let received = stub.received();
        assert_eq!(received[0].authorization.as_deref(), Some("AgentKey:test-key"));
    }

    #[tokio::test]
    async fn test_base_url_prefix_is_kept() {
        let stub = Arc::new(StubServer::default());
        let base = start_stub(stub.clone()).await.join("shipyard").unwrap();
        let (producer, consumer) = delivery_queue(1).unwrap();

        producer.enqueue(image_unit("a")).await.unwrap();
        drop(producer);
        sender_for(base, consumer).run().await;

        assert_eq!(stub.paths(), vec!["/shipyard/agent/images/"]);
    }

    #[tokio::test]
    async fn test_container_payload_round_trip() {
        let stub = Arc::new(StubServer::default());
        let base = start_stub(stub.clone()).await;
        let (producer, consumer) = delivery_queue(1).unwrap();

        let unit = container_unit(&["web", "db", "cache"]);
        let expected = match unit.payload() {
            crate::models::RelayPayload::Containers(snapshots) => snapshots.clone(),
            other => panic!("unexpected payload {:?}", other),
        };
        producer.enqueue(unit).await.unwrap();
        drop(producer);
        sender_for(base, consumer).run().await;

        let received = stub.received();
        let parsed: Vec<ContainerSnapshot> = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(parsed, expected);

        let raw: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(raw[0]["Container"]["Labels"]["env"], "test");
        assert_eq!(raw[0]["Meta"]["NetworkSettings"]["IPAddress"], "172.17.0.2");
    }
}

mod pipeline_tests {
    use super::*;
    use crate::collector::tests::MockRuntime;
    use crate::collector::CollectionLoopBuilder;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_image_relay_survives_container_relay_failure() {
        let stub = Arc::new(StubServer::failing(&[CONTAINERS_PATH]));
        let base = start_stub(stub.clone()).await;
        let (producer, consumer) = delivery_queue(DEFAULT_QUEUE_CAPACITY).unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let scheduler = CollectionLoopBuilder::new()
            .runtime(Arc::new(MockRuntime::with_containers(&["a", "b"])))
            .producer(producer)
            .interval(Duration::from_millis(50))
            .build()
            .unwrap();
        let scheduler = tokio::spawn(scheduler.run(shutdown_rx));
        let sender = tokio::spawn(sender_for(base, consumer).run());

        // Wait for two full ticks to reach the server
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let paths = stub.paths();
                let images = paths.iter().filter(|p| *p == IMAGES_PATH).count();
                let containers = paths.iter().filter(|p| *p == CONTAINERS_PATH).count();
                if images >= 2 && containers >= 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        scheduler.await.unwrap();
        let stats = sender.await.unwrap();

        let paths = stub.paths();
        let containers = paths.iter().filter(|p| *p == CONTAINERS_PATH).count() as u64;
        let images = paths.iter().filter(|p| *p == IMAGES_PATH).count() as u64;
        assert_eq!(stats.failed, containers);
        assert_eq!(stats.sent, images);
        assert_eq!(stub.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
