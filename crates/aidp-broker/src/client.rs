use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use tracing::info;

use crate::config::BrokerConfig;

/// Create a Redis connection manager with sensible defaults.
///
/// `ConnectionManager` transparently reconnects on transport errors, so a
/// single instance is shared across every worker and monitor goroutine
/// rather than pooled like a SQL connection.
pub async fn create_client(config: &BrokerConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.redis_url.as_str())
        .with_context(|| format!("invalid redis url {}", config.redis_url))?;
    let manager = client
        .get_connection_manager()
        .await
        .with_context(|| format!("failed to connect to redis at {}", config.redis_url))?;
    Ok(manager)
}

/// Ping the broker to confirm it is reachable.
pub async fn health_check(conn: &mut ConnectionManager) -> Result<()> {
    let pong: String = redis::cmd("PING")
        .query_async(conn)
        .await
        .context("redis PING failed")?;
    if pong != "PONG" {
        anyhow::bail!("unexpected PING response: {pong}");
    }
    info!("broker reachable");
    Ok(())
}
