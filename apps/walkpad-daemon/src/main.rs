use anyhow::Context;
use clap::Parser;
use tracing::info;
use walkpad_daemon::cli::{Cli, Commands};
use walkpad_daemon::config::ServerConfig;
use walkpad_daemon::controller::Controller;
use walkpad_daemon::device::{self, Device};
use walkpad_daemon::hook;
use walkpad_daemon::routes;
use walkpad_daemon::shutdown;
use walkpad_daemon::telemetry::{init_hook_tracing, init_tracing};
use walkpad_daemon::watchdog::Watchdog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Hook { url }) = cli.command {
        init_hook_tracing("warn");
        hook::run(&url).await;
        return Ok(());
    }

    let cfg = ServerConfig::try_from(cli.serve)?;
    init_tracing(&cfg.log_filter);

    let gateway = device::build_gateway(&cfg).context("failed to build device gateway")?;
    let controller = Controller::new(Device::new(gateway, cfg.device), cfg.default_speed);
    let watchdog = Watchdog::new(controller.clone(), cfg.decay).spawn();
    let app = routes::router(controller.clone());

    info!(
        addr = %cfg.listen_addr,
        gateway = ?cfg.gateway,
        slow_after_secs = cfg.decay.slow_after.as_secs(),
        stop_after_secs = cfg.decay.stop_after.as_secs(),
        min_speed = cfg.decay.min_speed,
        default_speed = cfg.default_speed,
        "starting walkpad-daemon"
    );
    let listener = tokio::net::TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen_addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown::signal())
        .await
        .context("server error")?;

    shutdown::run(controller.device(), Some(watchdog), cfg.shutdown_timeout).await;
    info!("walkpad-daemon stopped");
    Ok(())
}
