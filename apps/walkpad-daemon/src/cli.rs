use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "walkpad-daemon",
    author,
    version,
    about = "Walks while the assistant works: heartbeat-driven walking pad controller"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Forward one assistant lifecycle event (JSON on stdin) to a running daemon
    Hook {
        /// Base URL of the daemon
        #[arg(long, env = "WALKPAD_DAEMON_URL", default_value = "http://127.0.0.1:7463")]
        url: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GatewayKind {
    /// Local BLE bridge process reached over HTTP
    Bridge,
    /// In-memory pad, nothing physical moves
    Simulated,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address the control API binds to.
    #[arg(long, env = "WALKPAD_LISTEN_ADDR", default_value = "127.0.0.1:7463")]
    pub listen_addr: String,

    /// Seconds without a heartbeat before the pad slows down.
    #[arg(long, env = "WALKPAD_SLOW_AFTER_SECS", default_value_t = 30)]
    pub slow_after_secs: u64,

    /// Seconds without a heartbeat before the pad stops.
    #[arg(long, env = "WALKPAD_STOP_AFTER_SECS", default_value_t = 60)]
    pub stop_after_secs: u64,

    /// Speed in km/h the pad slows to.
    #[arg(long, env = "WALKPAD_MIN_SPEED", default_value_t = 1.0)]
    pub min_speed: f64,

    /// Speed in km/h used when a request does not carry one.
    #[arg(long, env = "WALKPAD_DEFAULT_SPEED", default_value_t = 2.0)]
    pub default_speed: f64,

    /// Watchdog poll period.
    #[arg(long, env = "WALKPAD_WATCHDOG_INTERVAL_SECS", default_value_t = 5)]
    pub watchdog_interval_secs: u64,

    /// Timeout applied to every connect and device command.
    #[arg(long, env = "WALKPAD_DEVICE_TIMEOUT_MS", default_value_t = 5000)]
    pub device_timeout_ms: u64,

    /// Connect attempts per request before reporting the gateway unavailable.
    #[arg(long, env = "WALKPAD_CONNECT_ATTEMPTS", default_value_t = 2)]
    pub connect_attempts: u32,

    /// Budget for the stop-then-disconnect sequence on exit.
    #[arg(long, env = "WALKPAD_SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,

    /// Which device gateway drives the pad.
    #[arg(long, env = "WALKPAD_GATEWAY", value_enum, default_value_t = GatewayKind::Bridge)]
    pub gateway: GatewayKind,

    /// Base URL of the BLE bridge.
    #[arg(long, env = "WALKPAD_BRIDGE_URL", default_value = "http://127.0.0.1:7464")]
    pub bridge_url: String,

    /// tracing filter directive.
    #[arg(long, env = "RUST_LOG", default_value = "info,walkpad_daemon=debug")]
    pub log_filter: String,
}
