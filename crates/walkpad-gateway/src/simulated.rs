use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::{DeviceGateway, DeviceSnapshot, GatewayError};

/// A command as received by [`SimulatedPad`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Connect,
    Disconnect,
    Start(f64),
    Stop,
    SetSpeed(f64),
}

/// In-memory pad used by tests and `--gateway simulated`.
///
/// Every command that reaches the pad is recorded, including the ones that
/// were scripted to fail. Commands rejected because the link is down are
/// not recorded: they never left the controller.
#[derive(Default)]
pub struct SimulatedPad {
    inner: Mutex<SimulatedInner>,
}

#[derive(Default)]
struct SimulatedInner {
    snapshot: DeviceSnapshot,
    commands: Vec<Command>,
    connect_failures: usize,
    command_failures: usize,
    latency: Duration,
}

impl SimulatedPad {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every operation sleeps for `latency` before taking effect.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        let pad = Self::default();
        pad.inner.lock().latency = latency;
        Arc::new(pad)
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.inner.lock().connect_failures = count;
    }

    pub fn fail_next_commands(&self, count: usize) {
        self.inner.lock().command_failures = count;
    }

    /// Simulates the radio link dropping. The belt keeps whatever motion it had.
    pub fn drop_link(&self) {
        self.inner.lock().snapshot.connected = false;
    }

    pub fn commands(&self) -> Vec<Command> {
        self.inner.lock().commands.clone()
    }

    pub fn count(&self, matches: impl Fn(&Command) -> bool) -> usize {
        self.inner.lock().commands.iter().filter(|c| matches(c)).count()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().commands.clear();
    }

    async fn delay(&self) {
        let latency = self.inner.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn apply(
        &self,
        command: Command,
        name: &'static str,
        effect: impl FnOnce(&mut DeviceSnapshot),
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        if !inner.snapshot.connected {
            return Err(GatewayError::NotConnected);
        }
        inner.commands.push(command);
        if inner.command_failures > 0 {
            inner.command_failures -= 1;
            return Err(GatewayError::Command {
                command: name,
                reason: "simulated command failure".into(),
            });
        }
        effect(&mut inner.snapshot);
        debug!(?command, "simulated pad applied command");
        Ok(())
    }
}

#[async_trait]
impl DeviceGateway for SimulatedPad {
    async fn connect(&self) -> Result<(), GatewayError> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.commands.push(Command::Connect);
        if inner.connect_failures > 0 {
            inner.connect_failures -= 1;
            return Err(GatewayError::ConnectFailed("pad not found".into()));
        }
        inner.snapshot.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.commands.push(Command::Disconnect);
        inner.snapshot = DeviceSnapshot::default();
        Ok(())
    }

    async fn start(&self, speed: f64) -> Result<(), GatewayError> {
        self.delay().await;
        self.apply(Command::Start(speed), "start", |snapshot| {
            snapshot.running = true;
            snapshot.speed = speed;
        })
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.delay().await;
        self.apply(Command::Stop, "stop", |snapshot| {
            snapshot.running = false;
            snapshot.speed = 0.0;
        })
    }

    async fn set_speed(&self, speed: f64) -> Result<(), GatewayError> {
        self.delay().await;
        self.apply(Command::SetSpeed(speed), "set_speed", |snapshot| {
            snapshot.speed = speed;
        })
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.inner.lock().snapshot
    }
}
