use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{DeviceGateway, DeviceSnapshot, GatewayError};

/// Drives the pad through the local BLE bridge process.
///
/// The bridge owns the radio and exposes one POST endpoint per command
/// (`/connect`, `/disconnect`, `/start`, `/stop`, `/speed`). Each answers
/// with the pad state after the command; that answer is cached so the
/// observable properties never touch the network.
pub struct BridgeGateway {
    client: reqwest::Client,
    base_url: String,
    state: Mutex<DeviceSnapshot>,
}

#[derive(Debug, Deserialize)]
struct BridgeStatus {
    connected: bool,
    running: bool,
    #[serde(default)]
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct BridgeErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct SpeedBody {
    speed: f64,
}

impl BridgeGateway {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            state: Mutex::new(DeviceSnapshot::default()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn mark_link_lost(&self) {
        self.state.lock().connected = false;
    }

    fn require_link(&self) -> Result<(), GatewayError> {
        if self.state.lock().connected {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }

    async fn post(
        &self,
        command: &'static str,
        body: Option<SpeedBody>,
    ) -> Result<DeviceSnapshot, GatewayError> {
        let url = format!("{}/{}", self.base_url, command);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                // Anything below HTTP means the bridge or the radio is gone.
                self.mark_link_lost();
                return Err(GatewayError::Transport(err.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<BridgeErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or_else(|_| {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        status.to_string()
                    } else {
                        trimmed.to_string()
                    }
                });
            debug!(command, %status, %reason, "bridge rejected command");
            return Err(GatewayError::Command { command, reason });
        }

        let reported: BridgeStatus = response
            .json()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        let snapshot = DeviceSnapshot {
            connected: reported.connected,
            running: reported.running,
            speed: reported.speed,
        };
        *self.state.lock() = snapshot;
        Ok(snapshot)
    }
}

#[async_trait]
impl DeviceGateway for BridgeGateway {
    async fn connect(&self) -> Result<(), GatewayError> {
        let snapshot = self.post("connect", None).await.map_err(|err| match err {
            GatewayError::Command { reason, .. } | GatewayError::Transport(reason) => {
                GatewayError::ConnectFailed(reason)
            }
            other => other,
        })?;
        if snapshot.connected {
            Ok(())
        } else {
            Err(GatewayError::ConnectFailed(
                "bridge answered but pad is not connected".into(),
            ))
        }
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        let result = self.post("disconnect", None).await.map(|_| ());
        if let Err(err) = &result {
            warn!(error = %err, "bridge disconnect failed; dropping cached link state");
        }
        *self.state.lock() = DeviceSnapshot::default();
        result
    }

    async fn start(&self, speed: f64) -> Result<(), GatewayError> {
        self.require_link()?;
        self.post("start", Some(SpeedBody { speed })).await.map(|_| ())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.require_link()?;
        self.post("stop", None).await.map(|_| ())
    }

    async fn set_speed(&self, speed: f64) -> Result<(), GatewayError> {
        self.require_link()?;
        self.post("speed", Some(SpeedBody { speed })).await.map(|_| ())
    }

    fn snapshot(&self) -> DeviceSnapshot {
        *self.state.lock()
    }
}
