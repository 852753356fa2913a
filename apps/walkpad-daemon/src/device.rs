use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use walkpad_gateway::{BridgeGateway, DeviceGateway, DeviceSnapshot, GatewayError, SimulatedPad};

use crate::cli::GatewayKind;
use crate::config::{DeviceConfig, ServerConfig};
use crate::metrics;

pub fn build_gateway(config: &ServerConfig) -> Result<Arc<dyn DeviceGateway>, GatewayError> {
    match config.gateway {
        GatewayKind::Simulated => {
            info!("using simulated walking pad; no hardware will move");
            Ok(SimulatedPad::new())
        }
        GatewayKind::Bridge => {
            let gateway = BridgeGateway::new(&config.bridge_url, config.device.command_timeout)?;
            info!(bridge = %gateway.base_url(), "using BLE bridge gateway");
            Ok(Arc::new(gateway))
        }
    }
}

/// The one walking pad this process owns.
///
/// Commands go through a [`DeviceLease`], which holds the command lock for
/// as long as it lives, so at most one command is in flight. The lock is
/// independent of the controller state lock.
pub struct Device {
    gateway: Arc<dyn DeviceGateway>,
    commands: Mutex<()>,
    config: DeviceConfig,
}

pub struct DeviceLease<'a> {
    device: &'a Device,
    _guard: MutexGuard<'a, ()>,
}

impl Device {
    pub fn new(gateway: Arc<dyn DeviceGateway>, config: DeviceConfig) -> Self {
        Self {
            gateway,
            commands: Mutex::new(()),
            config,
        }
    }

    /// Last observed state. Never waits on the command lock.
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.gateway.snapshot()
    }

    pub async fn lease(&self) -> DeviceLease<'_> {
        DeviceLease {
            device: self,
            _guard: self.commands.lock().await,
        }
    }
}

impl DeviceLease<'_> {
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.device.gateway.snapshot()
    }

    /// Connects unless already connected, retrying a bounded number of times.
    pub async fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.snapshot().connected {
            return Ok(());
        }
        let config = &self.device.config;
        let mut last_err = GatewayError::ConnectFailed("no connect attempt made".into());
        for attempt in 1..=config.connect_attempts {
            match self.timed("connect", self.device.gateway.connect()).await {
                Ok(()) => {
                    info!(attempt, "walking pad connected");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, error = %err, "walking pad connect failed");
                    last_err = err;
                }
            }
            if attempt < config.connect_attempts {
                tokio::time::sleep(config.connect_backoff).await;
            }
        }
        Err(last_err)
    }

    pub async fn start(&self, speed: f64) -> Result<(), GatewayError> {
        self.require_connected()?;
        self.timed("start", self.device.gateway.start(speed)).await
    }

    pub async fn stop(&self) -> Result<(), GatewayError> {
        self.require_connected()?;
        self.timed("stop", self.device.gateway.stop()).await
    }

    pub async fn set_speed(&self, speed: f64) -> Result<(), GatewayError> {
        self.require_connected()?;
        self.timed("set_speed", self.device.gateway.set_speed(speed))
            .await
    }

    pub async fn disconnect(&self) -> Result<(), GatewayError> {
        self.timed("disconnect", self.device.gateway.disconnect())
            .await
    }

    fn require_connected(&self) -> Result<(), GatewayError> {
        if self.snapshot().connected {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }

    async fn timed(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<(), GatewayError>>,
    ) -> Result<(), GatewayError> {
        let after = self.device.config.command_timeout;
        let result = match tokio::time::timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                operation,
                after_ms: after.as_millis() as u64,
            }),
        };
        let label = match &result {
            Ok(()) => "ok",
            Err(GatewayError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        metrics::DEVICE_COMMANDS
            .with_label_values(&[operation, label])
            .inc();
        debug!(operation, result = label, "device operation finished");
        result
    }
}
