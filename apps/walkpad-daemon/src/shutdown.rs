use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::device::Device;

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Final stop-then-disconnect. Never fails and never outlives `budget`.
pub async fn run(device: &Device, watchdog: Option<JoinHandle<()>>, budget: Duration) {
    info!("shutting down; stopping walking pad");
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    let sequence = async {
        let lease = device.lease().await;
        let snapshot = lease.snapshot();
        if snapshot.connected && snapshot.running {
            match lease.stop().await {
                Ok(()) => info!("walking pad stopped"),
                Err(err) => warn!(error = %err, "error stopping walking pad"),
            }
        }
        if lease.snapshot().connected {
            match lease.disconnect().await {
                Ok(()) => info!("walking pad disconnected"),
                Err(err) => warn!(error = %err, "error disconnecting walking pad"),
            }
        }
    };

    if tokio::time::timeout(budget, sequence).await.is_err() {
        warn!(
            budget_ms = budget.as_millis() as u64,
            "shutdown sequence timed out; exiting anyway"
        );
    }
}
