//! Narrow capability set the controller uses to drive a walking pad.
//!
//! The controller never talks to a concrete driver. It holds an
//! `Arc<dyn DeviceGateway>` and only observes the device through
//! [`DeviceSnapshot`]. Two adapters ship with the crate: [`SimulatedPad`]
//! for tests and dry runs, and [`BridgeGateway`] for the BLE bridge that
//! owns the radio link to the physical pad.

pub mod bridge;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use bridge::BridgeGateway;
pub use simulated::{Command, SimulatedPad};

/// Observable device state. Read without suspending.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub connected: bool,
    pub running: bool,
    /// Speed reported by the device in km/h.
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("device not connected")]
    NotConnected,
    #[error("{command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait DeviceGateway: Send + Sync {
    async fn connect(&self) -> Result<(), GatewayError>;

    /// Best effort. Implementations must not block indefinitely.
    async fn disconnect(&self) -> Result<(), GatewayError>;

    async fn start(&self, speed: f64) -> Result<(), GatewayError>;

    async fn stop(&self) -> Result<(), GatewayError>;

    async fn set_speed(&self, speed: f64) -> Result<(), GatewayError>;

    fn snapshot(&self) -> DeviceSnapshot;

    fn connected(&self) -> bool {
        self.snapshot().connected
    }

    fn running(&self) -> bool {
        self.snapshot().running
    }
}
