use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use walkpad_gateway::GatewayError;

use crate::device::Device;
use crate::metrics;
use crate::state::{ControllerState, DEFAULT_SESSION};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("{command} failed: {reason}")]
    CommandFailure {
        command: &'static str,
        reason: String,
    },
}

impl ControlError {
    fn unavailable(err: GatewayError) -> Self {
        match err {
            GatewayError::ConnectFailed(reason) => ControlError::GatewayUnavailable(reason),
            other => ControlError::GatewayUnavailable(other.to_string()),
        }
    }

    fn command(command: &'static str, err: GatewayError) -> Self {
        warn!(command, error = %err, "device command failed");
        ControlError::CommandFailure {
            command,
            reason: err.to_string(),
        }
    }

    /// Human readable cause, without the variant prefix.
    pub fn reason(&self) -> &str {
        match self {
            ControlError::GatewayUnavailable(reason) => reason,
            ControlError::CommandFailure { reason, .. } => reason,
        }
    }
}

/// Combined controller and device view returned by every operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub running: bool,
    pub speed: f64,
    pub target_speed: f64,
    pub sessions: usize,
    /// Seconds since the last heartbeat, one decimal; `None` when unset.
    pub last_heartbeat_ago: Option<f64>,
}

/// Control surface over the shared state and the device.
///
/// State mutations happen under the state lock only; device I/O happens
/// under the device lease only. Values read before a lease was acquired are
/// re-read afterwards.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    state: Mutex<ControllerState>,
    device: Device,
    default_speed: f64,
}

impl Controller {
    pub fn new(device: Device, default_speed: f64) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(ControllerState::new(default_speed)),
                device,
                default_speed,
            }),
        }
    }

    pub(crate) fn state(&self) -> &Mutex<ControllerState> {
        &self.inner.state
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Liveness signal from a session. Starts the pad if it is not running.
    pub async fn heartbeat(
        &self,
        session: Option<String>,
        speed: Option<f64>,
    ) -> Result<StatusSnapshot, ControlError> {
        let session = session.unwrap_or_else(|| DEFAULT_SESSION.to_string());
        {
            let mut state = self.inner.state.lock();
            if state.join(&session) {
                debug!(%session, "session joined");
            }
            state.touch(Instant::now());
            if let Some(speed) = speed {
                state.set_target_speed(speed);
            }
            metrics::ACTIVE_SESSIONS.set(state.session_count() as i64);
        }
        metrics::HEARTBEATS.inc();

        let device = self.inner.device.lease().await;
        device
            .ensure_connected()
            .await
            .map_err(ControlError::unavailable)?;

        let target = self.inner.state.lock().target_speed();
        if !device.snapshot().running {
            device
                .start(target)
                .await
                .map_err(|err| ControlError::command("start", err))?;
            info!(%session, speed = target, "walking pad started");
        } else if speed.is_some() {
            device
                .set_speed(target)
                .await
                .map_err(|err| ControlError::command("set_speed", err))?;
            debug!(%session, speed = target, "speed updated from heartbeat");
        }
        drop(device);

        Ok(self.status())
    }

    /// Explicit start. Ignores session bookkeeping.
    pub async fn start(
        &self,
        session: Option<String>,
        speed: Option<f64>,
    ) -> Result<StatusSnapshot, ControlError> {
        {
            let mut state = self.inner.state.lock();
            state.set_target_speed(speed.unwrap_or(self.inner.default_speed));
            state.touch(Instant::now());
        }
        if let Some(session) = &session {
            debug!(%session, "explicit start carries a session; not tracked");
        }

        let device = self.inner.device.lease().await;
        device
            .ensure_connected()
            .await
            .map_err(ControlError::unavailable)?;

        let target = self.inner.state.lock().target_speed();
        device
            .start(target)
            .await
            .map_err(|err| ControlError::command("start", err))?;
        info!(speed = target, "walking pad started");
        drop(device);

        Ok(self.status())
    }

    /// Stops the pad when no token is given (forced) or when the given
    /// session was the last one. Either way the clock and sessions reset,
    /// unless a heartbeat arrived while the stop was in flight.
    pub async fn stop(&self, session: Option<String>) -> Result<StatusSnapshot, ControlError> {
        let forced = session.is_none();
        let (should_stop, generation) = {
            let mut state = self.inner.state.lock();
            if let Some(session) = &session {
                state.leave(session);
            }
            metrics::ACTIVE_SESSIONS.set(state.session_count() as i64);
            (forced || !state.has_sessions(), state.generation())
        };
        if !should_stop {
            debug!(session = ?session, "other sessions still active; pad keeps running");
            return Ok(self.status());
        }

        let device = self.inner.device.lease().await;
        let rejoined = self.inner.state.lock().has_sessions();
        if !forced && rejoined {
            debug!(session = ?session, "a session re-joined while waiting; not stopping");
            return Ok(self.status());
        }

        let snapshot = device.snapshot();
        if snapshot.connected && snapshot.running {
            // Leave the clock armed on failure so the watchdog retries the stop.
            device
                .stop()
                .await
                .map_err(|err| ControlError::command("stop", err))?;
            info!("walking pad stopped");
        }

        {
            let mut state = self.inner.state.lock();
            // A heartbeat that landed after the decision owns the clock and
            // its session now; it restarts the pad once it gets the lease.
            if state.generation() == generation {
                state.reset();
            } else {
                debug!("heartbeat arrived during stop; keeping its clock and session");
            }
            metrics::ACTIVE_SESSIONS.set(state.session_count() as i64);
        }
        drop(device);

        Ok(self.status())
    }

    /// Changes the target speed and pushes it to a running pad.
    pub async fn set_speed(&self, speed: Option<f64>) -> Result<StatusSnapshot, ControlError> {
        {
            let mut state = self.inner.state.lock();
            state.set_target_speed(speed.unwrap_or(self.inner.default_speed));
            state.touch(Instant::now());
        }

        let device = self.inner.device.lease().await;
        let snapshot = device.snapshot();
        if snapshot.connected && snapshot.running {
            let target = self.inner.state.lock().target_speed();
            device
                .set_speed(target)
                .await
                .map_err(|err| ControlError::command("set_speed", err))?;
            info!(speed = target, "walking pad speed changed");
        }
        drop(device);

        Ok(self.status())
    }

    /// Pure read: no device I/O and no waiting on the device lease.
    pub fn status(&self) -> StatusSnapshot {
        let device = self.inner.device.snapshot();
        let state = self.inner.state.lock();
        StatusSnapshot {
            connected: device.connected,
            running: device.running,
            speed: device.speed,
            target_speed: state.target_speed(),
            sessions: state.session_count(),
            last_heartbeat_ago: state
                .since_heartbeat(Instant::now())
                .map(|ago| (ago.as_secs_f64() * 10.0).round() / 10.0),
        }
    }

    /// Natural wind-down of one session. Stops the pad when it was the last
    /// one, but leaves the heartbeat clock alone.
    pub async fn session_end(
        &self,
        session: Option<String>,
    ) -> Result<StatusSnapshot, ControlError> {
        let session = session.unwrap_or_else(|| DEFAULT_SESSION.to_string());
        let remaining = {
            let mut state = self.inner.state.lock();
            state.leave(&session);
            metrics::ACTIVE_SESSIONS.set(state.session_count() as i64);
            state.session_count()
        };
        info!(%session, remaining, "session ended");

        if remaining == 0 {
            let device = self.inner.device.lease().await;
            let snapshot = device.snapshot();
            let rejoined = self.inner.state.lock().has_sessions();
            if rejoined {
                debug!("a session joined while waiting; not stopping");
            } else if snapshot.connected && snapshot.running {
                device
                    .stop()
                    .await
                    .map_err(|err| ControlError::command("stop", err))?;
                info!("all sessions ended; walking pad stopped");
            }
        }

        Ok(self.status())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_timeout::tokio_timeout_test;
    use walkpad_gateway::{Command, DeviceGateway, SimulatedPad};

    use super::*;
    use crate::config::{DecayPolicy, DeviceConfig};
    use crate::watchdog::{TickOutcome, Watchdog};

    fn controller(pad: &Arc<SimulatedPad>) -> Controller {
        let device = Device::new(
            pad.clone(),
            DeviceConfig {
                command_timeout: Duration::from_secs(1),
                connect_attempts: 1,
                connect_backoff: Duration::from_millis(10),
            },
        );
        Controller::new(device, 2.0)
    }

    /// A moving belt always has a heartbeat clock the watchdog can act on.
    fn assert_attended(controller: &Controller, pad: &SimulatedPad) {
        if pad.running() {
            assert!(
                controller.state().lock().last_heartbeat().is_some(),
                "pad running without a heartbeat clock"
            );
        }
    }

    fn starts(pad: &SimulatedPad) -> usize {
        pad.count(|c| matches!(c, Command::Start(_)))
    }

    fn stops(pad: &SimulatedPad) -> usize {
        pad.count(|c| *c == Command::Stop)
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn heartbeat_connects_and_starts_at_default_speed() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);

        let status = controller.heartbeat(Some("a".into()), None).await.unwrap();
        assert!(status.connected);
        assert!(status.running);
        assert_eq!(status.speed, 2.0);
        assert_eq!(status.sessions, 1);
        assert_eq!(status.last_heartbeat_ago, Some(0.0));
        assert_eq!(pad.commands(), vec![Command::Connect, Command::Start(2.0)]);

        let status = controller
            .heartbeat(Some("a".into()), Some(4.0))
            .await
            .unwrap();
        assert_eq!(status.target_speed, 4.0);
        assert_eq!(status.sessions, 1);
        assert_eq!(
            pad.commands(),
            vec![Command::Connect, Command::Start(2.0), Command::SetSpeed(4.0)]
        );
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn heartbeat_without_speed_does_not_touch_running_pad() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        controller.heartbeat(None, None).await.unwrap();
        controller.heartbeat(None, None).await.unwrap();
        assert_eq!(starts(&pad), 1);
        assert_eq!(pad.count(|c| matches!(c, Command::SetSpeed(_))), 0);
        assert_eq!(controller.status().sessions, 1);
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn heartbeat_reports_unavailable_gateway() {
        let pad = SimulatedPad::new();
        pad.fail_next_connects(1);
        let controller = controller(&pad);

        let err = controller
            .heartbeat(Some("a".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::GatewayUnavailable(_)));
        assert_eq!(err.reason(), "pad not found");
        assert_eq!(starts(&pad), 0);
        // Liveness is still recorded.
        assert_eq!(controller.status().sessions, 1);
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn command_failure_is_surfaced() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        pad.connect().await.unwrap();
        pad.fail_next_commands(1);

        let err = controller.heartbeat(None, None).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::CommandFailure {
                command: "start",
                ..
            }
        ));
        assert!(!pad.running());
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn start_clamps_speed() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        let status = controller.start(None, Some(10.0)).await.unwrap();
        assert_eq!(status.target_speed, 6.0);
        assert_eq!(pad.commands(), vec![Command::Connect, Command::Start(6.0)]);

        let status = controller.start(None, Some(-1.0)).await.unwrap();
        assert_eq!(status.target_speed, 0.5);
        assert_eq!(status.sessions, 0);
        assert!(status.last_heartbeat_ago.is_some());
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn start_defaults_speed() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        controller.set_speed(Some(5.0)).await.unwrap();
        let status = controller.start(Some("x".into()), None).await.unwrap();
        assert_eq!(status.target_speed, 2.0);
        assert_eq!(status.sessions, 0);
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn session_scoped_stop_waits_for_last_session() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        controller.heartbeat(Some("a".into()), None).await.unwrap();
        controller.heartbeat(Some("b".into()), None).await.unwrap();

        let status = controller.stop(Some("a".into())).await.unwrap();
        assert!(status.running);
        assert_eq!(status.sessions, 1);
        assert_eq!(stops(&pad), 0);

        let status = controller.stop(Some("b".into())).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.sessions, 0);
        assert_eq!(status.last_heartbeat_ago, None);
        assert_eq!(stops(&pad), 1);
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn forced_stop_resets_everything() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        controller.heartbeat(Some("a".into()), None).await.unwrap();
        controller.heartbeat(Some("b".into()), None).await.unwrap();

        let status = controller.stop(None).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.sessions, 0);
        assert_eq!(status.last_heartbeat_ago, None);
        assert_eq!(stops(&pad), 1);

        // Nothing running: no command, still a full reset.
        let status = controller.stop(None).await.unwrap();
        assert_eq!(status.sessions, 0);
        assert_eq!(stops(&pad), 1);
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn failed_stop_keeps_clock_armed() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        controller.heartbeat(Some("a".into()), None).await.unwrap();
        pad.fail_next_commands(1);

        let err = controller.stop(None).await.unwrap_err();
        assert!(matches!(err, ControlError::CommandFailure { command: "stop", .. }));
        let status = controller.status();
        assert!(status.running);
        assert!(status.last_heartbeat_ago.is_some());
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn set_speed_only_commands_running_pad() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);

        let status = controller.set_speed(Some(3.0)).await.unwrap();
        assert_eq!(status.target_speed, 3.0);
        assert!(pad.commands().is_empty());
        assert!(status.last_heartbeat_ago.is_some());

        controller.heartbeat(None, None).await.unwrap();
        assert_eq!(pad.commands(), vec![Command::Connect, Command::Start(3.0)]);

        let status = controller.set_speed(Some(0.1)).await.unwrap();
        assert_eq!(status.target_speed, 0.5);
        assert_eq!(pad.commands().last(), Some(&Command::SetSpeed(0.5)));

        controller.set_speed(None).await.unwrap();
        assert_eq!(pad.commands().last(), Some(&Command::SetSpeed(2.0)));
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn session_end_stops_on_last_session_without_clearing_clock() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        controller.heartbeat(Some("a".into()), None).await.unwrap();
        controller.heartbeat(Some("b".into()), None).await.unwrap();

        let status = controller.session_end(Some("a".into())).await.unwrap();
        assert!(status.running);
        assert_eq!(status.sessions, 1);

        let status = controller.session_end(Some("b".into())).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.sessions, 0);
        assert!(status.last_heartbeat_ago.is_some());
        assert_eq!(stops(&pad), 1);

        // Unknown session on an idle pad is a no-op.
        controller.session_end(None).await.unwrap();
        assert_eq!(stops(&pad), 1);
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn status_reports_heartbeat_age() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        assert_eq!(controller.status().last_heartbeat_ago, None);

        controller.heartbeat(None, None).await.unwrap();
        tokio::time::advance(Duration::from_millis(12_340)).await;
        assert_eq!(controller.status().last_heartbeat_ago, Some(12.3));
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn distinct_sessions_are_counted_once() {
        let pad = SimulatedPad::new();
        let controller = controller(&pad);
        for session in ["a", "b", "a", "c", "b"] {
            controller.heartbeat(Some(session.into()), None).await.unwrap();
        }
        assert_eq!(controller.status().sessions, 3);
        controller.session_end(Some("c".into())).await.unwrap();
        controller.stop(Some("a".into())).await.unwrap();
        assert_eq!(controller.status().sessions, 1);
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn heartbeat_during_forced_stop_keeps_the_pad_attended() {
        let pad = SimulatedPad::with_latency(Duration::from_millis(200));
        let controller = controller(&pad);
        controller.heartbeat(Some("a".into()), None).await.unwrap();

        let stopping = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.stop(None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = controller.heartbeat(Some("b".into()), None).await.unwrap();
        stopping.await.unwrap().unwrap();

        assert!(status.running);
        assert!(status.last_heartbeat_ago.is_some());
        assert!(status.sessions >= 1);
        assert_eq!(stops(&pad), 1);
        assert_eq!(starts(&pad), 2);
        assert_attended(&controller, &pad);

        let watchdog = Watchdog::new(controller.clone(), DecayPolicy::default());
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(watchdog.tick().await, TickOutcome::Stopped);
        assert!(!pad.running());
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn heartbeat_during_last_session_stop_keeps_its_session() {
        let pad = SimulatedPad::with_latency(Duration::from_millis(200));
        let controller = controller(&pad);
        controller.heartbeat(Some("a".into()), None).await.unwrap();

        let stopping = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.stop(Some("a".into())).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = controller.heartbeat(Some("b".into()), None).await.unwrap();
        stopping.await.unwrap().unwrap();

        assert!(status.running);
        assert_eq!(status.sessions, 1);
        assert!(status.last_heartbeat_ago.is_some());
        assert_attended(&controller, &pad);

        // The surviving session can still wind the pad down.
        let status = controller.stop(Some("b".into())).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.last_heartbeat_ago, None);
    }

    #[tokio_timeout_test(secs = 5, paused)]
    async fn heartbeat_during_watchdog_stop_restarts_under_watch() {
        let pad = SimulatedPad::with_latency(Duration::from_millis(200));
        let controller = controller(&pad);
        let watchdog = Watchdog::new(controller.clone(), DecayPolicy::default());
        controller.heartbeat(Some("a".into()), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let ticking = {
            let watchdog = watchdog.clone();
            tokio::spawn(async move { watchdog.tick().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = controller.heartbeat(Some("b".into()), None).await.unwrap();
        assert_eq!(ticking.await.unwrap(), TickOutcome::Stopped);

        assert!(status.running);
        assert_eq!(status.sessions, 2);
        assert_eq!(stops(&pad), 1);
        assert_attended(&controller, &pad);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(watchdog.tick().await, TickOutcome::Stopped);
        assert!(!pad.running());
        assert_eq!(controller.status().sessions, 0);
    }
}
