//! Shared test utilities for aidp integration tests.
//!
//! Provides a Redis instance shared across tests. Because the broker's keys
//! are namespaced by `(agent_kind, repo, issue)`, tests isolate themselves by
//! using unique repo/issue values rather than a fresh database per test.
//!
//! Two modes:
//! - **`AIDP_TEST_REDIS_URL`** set (nextest setup script): use the external
//!   container directly. No testcontainers overhead per process.
//! - **No env var** (`cargo test`): spin up a container via testcontainers,
//!   shared per binary through a `OnceCell`.

use redis::aio::ConnectionManager;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

/// Shared container state: base URL and optional container handle (kept alive).
struct SharedRedis {
    base_url: String,
    /// Held to keep the container alive. `None` when using an external URL.
    _container: Option<ContainerAsync<Redis>>,
}

/// Lazily-initialized shared Redis instance.
static SHARED_REDIS: OnceCell<SharedRedis> = OnceCell::const_new();

async fn init_shared_redis() -> SharedRedis {
    if let Ok(url) = std::env::var("AIDP_TEST_REDIS_URL") {
        return SharedRedis {
            base_url: url,
            _container: None,
        };
    }

    let container = Redis::default()
        .start()
        .await
        .expect("failed to start redis container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to get mapped port");

    SharedRedis {
        base_url: format!("redis://{host}:{port}"),
        _container: Some(container),
    }
}

/// Base URL for the shared Redis instance.
///
/// Lazily starts a container on first call (unless `AIDP_TEST_REDIS_URL` is
/// set).
pub async fn redis_url() -> &'static str {
    let shared = SHARED_REDIS.get_or_init(init_shared_redis).await;
    &shared.base_url
}

/// Connect a fresh [`ConnectionManager`] to the shared Redis instance.
pub async fn connection() -> ConnectionManager {
    let url = redis_url().await;
    let client = redis::Client::open(url).expect("valid redis url");
    client
        .get_connection_manager()
        .await
        .expect("failed to connect to shared redis")
}

/// Generate a unique repository name for test isolation, e.g.
/// `test-repo-3f2a9c`.
pub fn unique_repo(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}
