//! Video API Edge - Entry Point
//!
//! Loads configuration, installs the tracing subscriber, resolves the
//! identity provider project and hands over to [`video_api_edge::run`].
//! An error returned from `main` exits the process with code 1.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use video_api_edge::config::{Config, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load_default()?;
    init_logging(&config.logging)?;

    config.resolve_project_id()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %config.server.env,
        port = config.server.port,
        project_id = %config.firebase.project_id,
        "Starting Video API Edge"
    );

    video_api_edge::run(config).await
}

/// Install the global subscriber; `RUST_LOG` overrides the configured level
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let formatter = if config.format == "json" {
        fmt::layer().json().flatten_event(true).boxed()
    } else {
        fmt::layer().pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(formatter.with_filter(filter))
        .try_init()?;

    Ok(())
}
