use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

pub const MIN_TARGET_SPEED: f64 = 0.5;
pub const MAX_TARGET_SPEED: f64 = 6.0;
pub const DEFAULT_SESSION: &str = "default";

/// Clamps a requested speed into `[MIN_TARGET_SPEED, MAX_TARGET_SPEED]`.
/// Non-finite input lands on one of the bounds, never passes through.
pub fn clamp_speed(speed: f64) -> f64 {
    speed.min(MAX_TARGET_SPEED).max(MIN_TARGET_SPEED)
}

/// Everything the control surface and the watchdog share.
///
/// Lives behind one `parking_lot::Mutex` in the controller. The guard is
/// not `Send`, so it cannot be carried across a device await by accident.
#[derive(Debug)]
pub struct ControllerState {
    last_heartbeat: Option<Instant>,
    /// Bumped by every touch. Lets a caller that suspended tell whether the
    /// clock moved meanwhile, even when two touches share an instant.
    generation: u64,
    target_speed: f64,
    sessions: HashSet<String>,
    /// Heartbeat instant the slow-down was applied for. The decay flag is
    /// only considered set while this still equals `last_heartbeat`, so any
    /// fresh heartbeat clears it without the request path writing it.
    decayed_for: Option<Instant>,
}

impl ControllerState {
    pub fn new(default_speed: f64) -> Self {
        Self {
            last_heartbeat: None,
            generation: 0,
            target_speed: clamp_speed(default_speed),
            sessions: HashSet::new(),
            decayed_for: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_heartbeat = Some(now);
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    pub fn since_heartbeat(&self, now: Instant) -> Option<Duration> {
        self.last_heartbeat
            .map(|heartbeat| now.saturating_duration_since(heartbeat))
    }

    pub fn target_speed(&self) -> f64 {
        self.target_speed
    }

    /// Stores the clamped speed and returns it.
    pub fn set_target_speed(&mut self, speed: f64) -> f64 {
        self.target_speed = clamp_speed(speed);
        self.target_speed
    }

    /// Returns true when the session was not active yet.
    pub fn join(&mut self, session: &str) -> bool {
        if self.sessions.contains(session) {
            return false;
        }
        self.sessions.insert(session.to_string())
    }

    pub fn leave(&mut self, session: &str) -> bool {
        self.sessions.remove(session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn clear_sessions(&mut self) {
        self.sessions.clear();
    }

    /// Forced stop: forget every session and the heartbeat clock.
    pub fn reset(&mut self) {
        self.last_heartbeat = None;
        self.sessions.clear();
    }

    pub fn is_decayed(&self) -> bool {
        matches!(
            (self.decayed_for, self.last_heartbeat),
            (Some(decayed), Some(heartbeat)) if decayed == heartbeat
        )
    }

    pub(crate) fn mark_decayed(&mut self, heartbeat: Instant) {
        self.decayed_for = Some(heartbeat);
    }

    pub(crate) fn clear_decay(&mut self) {
        self.decayed_for = None;
    }
}
