use std::env;

/// Broker connection configuration.
///
/// Reads from the `AIDP_REDIS_URL` environment variable, falling back to
/// `redis://127.0.0.1:6379` when unset.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Full Redis connection URL.
    pub redis_url: String,
}

impl BrokerConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "redis://127.0.0.1:6379";

    /// Build a config from the environment.
    ///
    /// Priority: `AIDP_REDIS_URL` env var, then the compile-time default.
    pub fn from_env() -> Self {
        let redis_url =
            env::var("AIDP_REDIS_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { redis_url }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        let cfg = BrokerConfig::new(BrokerConfig::DEFAULT_URL);
        assert_eq!(cfg.redis_url, "redis://127.0.0.1:6379");
    }

    #[test]
    fn explicit_new() {
        let cfg = BrokerConfig::new("redis://otherhost:6380");
        assert_eq!(cfg.redis_url, "redis://otherhost:6380");
    }
}
