//! Relational database bootstrap.
//!
//! Builds the bounded Postgres pool, retries the initial connect, applies
//! the embedded migrations, and runs the periodic health ping.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;

/// Delay between startup connect attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Connection options derived from the DSN parts
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, sqlx::Error> {
    let ssl_mode = PgSslMode::from_str(&config.ssl_mode)?;

    Ok(PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.name)
        .ssl_mode(ssl_mode))
}

/// Connect the pool, retrying up to `connect_retries` times, then migrate
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let options = connect_options(config)?;
    let pool_options = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs));

    let attempts = config.connect_retries.max(1);
    let mut attempt = 0;

    let pool = loop {
        attempt += 1;
        match pool_options.clone().connect_with(options.clone()).await {
            Ok(pool) => break pool,
            Err(e) if attempt < attempts => {
                warn!(attempt, error = %e, "Database connection failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    };

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!(
        host = %config.host,
        database = %config.name,
        max_connections = config.max_connections,
        "Database connected"
    );

    Ok(pool)
}

/// Liveness check
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Background task pinging the pool until shutdown
pub async fn ping_task(pool: PgPool, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match ping(&pool).await {
                    Ok(()) => debug!("Database ping ok"),
                    Err(e) => warn!(error = %e, "Database ping failed"),
                }
            }
        }
    }
}
