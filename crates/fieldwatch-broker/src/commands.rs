//! Subcommand implementations.

use std::time::Duration;

use fieldwatch_proto::{Codec, Document};
use fieldwatch_relay::{
    Delivery, NngBroker, NngPublisher, NngSubscriber, PublishConnection, RelayContext,
};
use tokio::sync::broadcast;

use crate::config::{BrokerConfig, PublishConfig, WatchConfig};
use crate::error::Error;

/// How long a one-shot publisher stays open after sending.
///
/// nng discards frames still queued on a socket when it closes.
const PUBLISH_LINGER: Duration = Duration::from_millis(100);

/// Run the forwarder until a shutdown signal arrives.
///
/// Returns the number of frames forwarded.
pub async fn run_broker(
    config: BrokerConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<u64, Error> {
    config.validate().map_err(Error::Config)?;

    let broker = NngBroker::bind(&config.ingress, &config.egress)?;
    broker.start()?;
    tracing::info!("broker ready, forwarding events");

    let _ = shutdown.recv().await;

    // Stopping joins the forwarding thread, which can take a receive timeout.
    let forwarded = tokio::task::spawn_blocking(move || {
        broker.stop();
        broker.forwarded()
    })
    .await
    .map_err(|e| Error::Task(format!("broker stop failed: {}", e)))?;
    Ok(forwarded)
}

/// Print every event matching the configured pattern until shutdown.
pub async fn run_watch(
    config: WatchConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Error> {
    let codec = config.relay.codec();
    let (subscriber, inbound) = NngSubscriber::connect(config.egress)?;
    let context = RelayContext::new(subscriber, config.relay);
    let inbound_task = context.spawn_inbound(inbound);

    let print = move |payload: &Document, delivery: &Delivery| {
        match format_delivery(codec, payload, delivery) {
            Ok(line) => println!("{}", line),
            Err(e) => {
                tracing::warn!(channel = %delivery.channel, error = %e, "failed to print event")
            }
        }
    };
    let disposer = context.subscribe(config.pattern.clone(), print)?;
    tracing::info!(pattern = %config.pattern, "watching");

    let _ = shutdown.recv().await;
    disposer.dispose();
    context.shutdown()?;
    drop(context);
    inbound_task.abort();
    Ok(())
}

/// Validate the payload and publish it once.
pub fn publish_once(config: PublishConfig) -> Result<(), Error> {
    let codec = config.relay.codec();
    let document = codec.decode(config.payload.as_bytes())?;
    let payload = codec.encode(&document)?;

    let publisher = NngPublisher::connect(config.ingress)?;
    publisher.publish(&config.channel, payload)?;
    std::thread::sleep(PUBLISH_LINGER);
    tracing::info!(channel = %config.channel, "payload published");
    Ok(())
}

/// Render one delivery as `<channel> <json>`.
pub fn format_delivery(
    codec: Codec,
    payload: &Document,
    delivery: &Delivery,
) -> Result<String, Error> {
    let bytes = codec.encode(payload)?;
    Ok(format!(
        "{} {}",
        delivery.channel,
        String::from_utf8_lossy(&bytes)
    ))
}

/// Shared shutdown signal wired to ctrl-c.
pub fn shutdown_on_ctrl_c() -> broadcast::Sender<()> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = signal_tx.send(());
    });

    shutdown_tx
}
