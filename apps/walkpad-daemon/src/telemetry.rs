use tracing::Subscriber;
use tracing_subscriber::{
    fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

pub fn init_tracing(filter: &str) {
    subscriber(filter, std::io::stdout).init();
}

/// The assistant may read a hook's stdout, so hook logs go to stderr.
pub fn init_hook_tracing(filter: &str) {
    subscriber(filter, std::io::stderr).init();
}

fn subscriber<W>(filter: &str, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(writer);
    Registry::default().with(env_filter).with(fmt_layer)
}
