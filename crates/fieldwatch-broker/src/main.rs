//! fieldwatch broker - forwards relayed change events between processes.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldwatch_broker::{publish_once, run_broker, run_watch, shutdown_on_ctrl_c, Args, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Broker(broker) => {
            let config = broker.into_config();
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                ingress = %config.ingress.address,
                egress = %config.egress.address,
                "starting fieldwatch broker"
            );

            let shutdown_tx = shutdown_on_ctrl_c();
            match run_broker(config, shutdown_tx.subscribe()).await {
                Ok(forwarded) => {
                    tracing::info!(forwarded, "broker shutdown complete");
                }
                Err(e) => {
                    tracing::error!(error = %e, "broker error");
                    return Err(e.into());
                }
            }
        }
        Command::Watch(watch) => {
            let config = watch.into_config();
            tracing::info!(egress = %config.egress.address, "connecting to broker");

            let shutdown_tx = shutdown_on_ctrl_c();
            run_watch(config, shutdown_tx.subscribe()).await?;
        }
        Command::Publish(publish) => {
            publish_once(publish.into_config())?;
        }
    }

    Ok(())
}
