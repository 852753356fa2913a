use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::cli::{GatewayKind, ServeArgs};
use crate::state::{MAX_TARGET_SPEED, MIN_TARGET_SPEED};

/// Slow-then-stop policy applied when heartbeats go quiet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPolicy {
    pub slow_after: Duration,
    pub stop_after: Duration,
    /// Speed the pad is dropped to once `slow_after` has passed.
    pub min_speed: f64,
    pub poll_interval: Duration,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            slow_after: Duration::from_secs(30),
            stop_after: Duration::from_secs(60),
            min_speed: 1.0,
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    /// Upper bound for any single connect or command.
    pub command_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            connect_attempts: 2,
            connect_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub default_speed: f64,
    pub decay: DecayPolicy,
    pub device: DeviceConfig,
    pub shutdown_timeout: Duration,
    pub gateway: GatewayKind,
    pub bridge_url: String,
    pub log_filter: String,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;

        if args.stop_after_secs <= args.slow_after_secs {
            bail!(
                "stop-after ({}s) must be longer than slow-after ({}s)",
                args.stop_after_secs,
                args.slow_after_secs
            );
        }
        if args.watchdog_interval_secs == 0 {
            bail!("watchdog interval must be at least one second");
        }
        if args.device_timeout_ms == 0 {
            bail!("device timeout must be greater than zero");
        }
        if args.connect_attempts == 0 {
            bail!("connect attempts must be at least one");
        }
        for (name, speed) in [
            ("min-speed", args.min_speed),
            ("default-speed", args.default_speed),
        ] {
            if !(MIN_TARGET_SPEED..=MAX_TARGET_SPEED).contains(&speed) {
                bail!(
                    "{name} {speed} is outside [{MIN_TARGET_SPEED}, {MAX_TARGET_SPEED}] km/h"
                );
            }
        }

        Ok(ServerConfig {
            listen_addr,
            default_speed: args.default_speed,
            decay: DecayPolicy {
                slow_after: Duration::from_secs(args.slow_after_secs),
                stop_after: Duration::from_secs(args.stop_after_secs),
                min_speed: args.min_speed,
                poll_interval: Duration::from_secs(args.watchdog_interval_secs),
            },
            device: DeviceConfig {
                command_timeout: Duration::from_millis(args.device_timeout_ms),
                connect_attempts: args.connect_attempts,
                ..DeviceConfig::default()
            },
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            gateway: args.gateway,
            bridge_url: args.bridge_url,
            log_filter: args.log_filter,
        })
    }
}
