use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use zk_discovery::AddressUpdate;
use zk_discovery::DiscoveryConfig;
use zk_discovery::Error;
use zk_discovery::Result;
use zk_discovery::ServiceDiscovery;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();

    let settings = DiscoveryConfig::new()?.validate()?;

    // Initializing Shutdown Signal
    let (graceful_tx, mut graceful_rx) = watch::channel(());

    if settings.monitoring.prometheus_enabled {
        let addr = settings.monitoring.listen_addr()?;
        tokio::spawn(zk_discovery::start_server(addr, graceful_rx.clone()));
    }

    let discovery = ServiceDiscovery::connect(&settings).await?;

    if let Some(port) = settings.registration.service_port {
        let registration = discovery.register_service(port, None).await?;
        info!(path = registration.path(), address = registration.address(), "service registered");
    }

    let watcher = if settings.registration.watch_members {
        let mut subscription = discovery.client().watch_registered_addresses(discovery.base_path()).await?;
        Some(tokio::spawn(async move {
            while let Some(update) = subscription.recv().await {
                match update {
                    AddressUpdate::Snapshot(addresses) => {
                        info!(count = addresses.len(), ?addresses, "membership changed")
                    }
                    AddressUpdate::Ended => break,
                }
            }
        }))
    } else {
        None
    };

    info!("Application started. Waiting for CTRL+C signal...");
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    let _ = graceful_rx.changed().await;

    if let Err(e) = discovery.unregister().await {
        warn!("closing discovery client failed: {}", e);
    }
    if let Some(watcher) = watcher {
        watcher.await?;
    }

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::SignalSenderClosed(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::SignalSenderClosed(e.to_string()))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::SignalSenderClosed(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

fn init_observability() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
