//! Broker subcommands against real nng sockets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fieldwatch_broker::{publish_once, run_broker, BrokerConfig, PublishConfig};
use fieldwatch_proto::{Document, Value};
use fieldwatch_relay::{Delivery, NngConfig, NngSubscriber, RelayConfig, RelayContext};
use tokio::sync::{broadcast, mpsc};

struct TestContext {
    _dir: tempfile::TempDir,
    ingress: String,
    egress: String,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ingress = format!("ipc://{}", dir.path().join("in.ipc").display());
        let egress = format!("ipc://{}", dir.path().join("out.ipc").display());
        Self {
            _dir: dir,
            ingress,
            egress,
        }
    }

    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig::new(&self.ingress, &self.egress).with_timeout(Duration::from_millis(50))
    }

    fn publish_config(&self, payload: &str) -> PublishConfig {
        PublishConfig {
            ingress: NngConfig::new(&self.ingress).with_send_timeout(Duration::from_millis(200)),
            channel: "BlogPost.created".into(),
            payload: payload.into(),
            relay: RelayConfig::new(),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_reaches_watcher_through_broker() {
    let ctx = TestContext::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let broker = tokio::spawn(run_broker(ctx.broker_config(), shutdown_rx));

    let (subscriber, inbound) = NngSubscriber::connect(
        NngConfig::new(&ctx.egress).with_recv_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    let context = RelayContext::new(subscriber, RelayConfig::new());
    context.spawn_inbound(inbound);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _disposer = context
        .subscribe("BlogPost.*", move |payload: &Document, delivery: &Delivery| {
            let _ = tx.send((delivery.channel.clone(), payload.clone()));
        })
        .unwrap();

    // The broker binds inside the spawned task; retry until its sockets are up.
    let mut received = None;
    for _ in 0..30 {
        let _ = publish_once(ctx.publish_config(r#"{"name":"A"}"#));
        if let Ok(Some(message)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            received = Some(message);
            break;
        }
    }

    let (channel, payload) = received.expect("nothing crossed the broker");
    assert_eq!(channel, "BlogPost.created");
    assert_eq!(payload.get("name"), Some(&Value::String("A".into())));

    shutdown_tx.send(()).unwrap();
    let forwarded = broker.await.unwrap().unwrap();
    assert!(forwarded >= 1);
}

#[tokio::test]
async fn test_broker_stops_on_shutdown() {
    let ctx = TestContext::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    shutdown_tx.send(()).unwrap();

    let forwarded = run_broker(ctx.broker_config(), shutdown_rx).await.unwrap();
    assert_eq!(forwarded, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn test_broker_stop_keeps_runtime_responsive() {
    let ctx = TestContext::new();
    let config = BrokerConfig::new(&ctx.ingress, &ctx.egress).with_timeout(Duration::from_millis(200));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    shutdown_tx.send(()).unwrap();

    let ticks = Arc::new(AtomicU64::new(0));
    let counter = ticks.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(5));
        loop {
            interval.tick().await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    run_broker(config, shutdown_rx).await.unwrap();

    // The only runtime thread was free while the forwarder shut down.
    assert!(ticks.load(Ordering::SeqCst) > 0);
    ticker.abort();
}
