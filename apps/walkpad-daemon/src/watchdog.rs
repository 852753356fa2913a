use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::DecayPolicy;
use crate::controller::Controller;
use crate::metrics;

/// What a single watchdog pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No heartbeat clock, the pad is not moving, or a stop was due but
    /// there was neither a link to command nor a session to clear.
    Idle,
    /// Within the grace window, or already slowed.
    Steady,
    Slowed,
    Stopped,
    /// The device rejected the decay command; the next tick tries again.
    Failed,
}

/// Decays the pad's motion once heartbeats stop: slow after `slow_after`,
/// stop after `stop_after`.
#[derive(Clone)]
pub struct Watchdog {
    controller: Controller,
    policy: DecayPolicy,
}

impl Watchdog {
    pub fn new(controller: Controller, policy: DecayPolicy) -> Self {
        Self { controller, policy }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let period = self.policy.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = self.tick().await;
                if outcome != TickOutcome::Idle {
                    debug!(?outcome, "watchdog tick");
                }
            }
        })
    }

    pub async fn tick(&self) -> TickOutcome {
        let device = self.controller.device().lease().await;
        let snapshot = device.snapshot();
        let now = Instant::now();

        let (heartbeat, generation, decayed) = {
            let mut state = self.controller.state().lock();
            match state.last_heartbeat() {
                Some(heartbeat) if snapshot.running => {
                    (heartbeat, state.generation(), state.is_decayed())
                }
                _ => {
                    state.clear_decay();
                    return TickOutcome::Idle;
                }
            }
        };
        let elapsed = now.saturating_duration_since(heartbeat);

        if elapsed > self.policy.stop_after {
            let mut acted = false;
            if snapshot.connected {
                if let Err(err) = device.stop().await {
                    warn!(error = %err, "watchdog stop failed; retrying next tick");
                    metrics::WATCHDOG_ACTIONS
                        .with_label_values(&["stop_failed"])
                        .inc();
                    return TickOutcome::Failed;
                }
                info!(
                    silent_secs = elapsed.as_secs(),
                    "no heartbeat for {}s; walking pad stopped",
                    self.policy.stop_after.as_secs()
                );
                acted = true;
            }
            let mut state = self.controller.state().lock();
            // A heartbeat that landed during the stop starts a new idle period.
            if state.generation() == generation && state.has_sessions() {
                state.clear_sessions();
                metrics::ACTIVE_SESSIONS.set(0);
                acted = true;
            }
            state.clear_decay();
            if !acted {
                // Link dropped with the belt moving and nobody left to forget.
                return TickOutcome::Idle;
            }
            metrics::WATCHDOG_ACTIONS
                .with_label_values(&["stop"])
                .inc();
            return TickOutcome::Stopped;
        }

        if elapsed > self.policy.slow_after && !decayed {
            if snapshot.connected {
                if let Err(err) = device.set_speed(self.policy.min_speed).await {
                    warn!(error = %err, "watchdog slow-down failed; retrying next tick");
                    metrics::WATCHDOG_ACTIONS
                        .with_label_values(&["slow_failed"])
                        .inc();
                    return TickOutcome::Failed;
                }
                info!(
                    silent_secs = elapsed.as_secs(),
                    speed = self.policy.min_speed,
                    "no heartbeat for {}s; walking pad slowed",
                    self.policy.slow_after.as_secs()
                );
            }
            self.controller.state().lock().mark_decayed(heartbeat);
            metrics::WATCHDOG_ACTIONS
                .with_label_values(&["slow"])
                .inc();
            return TickOutcome::Slowed;
        }

        TickOutcome::Steady
    }
}
