//! Connection parameters for the store adapters

use std::time::Duration;

use dcache_core::{CacheError, CacheResult};
use redis::sentinel::SentinelNodeConnectionInfo;
use redis::{IntoConnectionInfo, RedisConnectionInfo, TlsMode};
use serde::{Deserialize, Serialize};

/// Redis connection parameters.
///
/// When `sentinel` is set the master is resolved through the sentinels and
/// `host`/`port`/`url` are ignored. Otherwise `url` wins over the discrete
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub db: i64,
    /// Bound on connecting (and on the sentinel master lookup). 0 waits forever.
    pub socket_timeout_ms: u64,
    pub sentinel: Option<SentinelConfig>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            use_tls: false,
            db: 0,
            socket_timeout_ms: 5_000,
            sentinel: None,
        }
    }
}

/// Sentinel discovery of the Redis master
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// `host:port` pairs or `redis://` URLs
    pub sentinels: Vec<String>,
    pub master_name: String,
    pub sentinel_username: Option<String>,
    pub sentinel_password: Option<String>,
}

impl RedisConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn connection_info(&self) -> CacheResult<redis::ConnectionInfo> {
        if let Some(url) = &self.url {
            return Ok(url.as_str().into_connection_info()?);
        }

        let mut info =
            format!("{}://{}:{}", self.scheme(), self.host, self.port).into_connection_info()?;
        info.redis = self.redis_info();
        Ok(info)
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        (self.socket_timeout_ms > 0).then(|| Duration::from_millis(self.socket_timeout_ms))
    }

    /// Connection info for every configured sentinel, carrying the sentinel
    /// credentials rather than the master's.
    pub fn sentinel_nodes(&self) -> CacheResult<Vec<redis::ConnectionInfo>> {
        let sentinel = self.sentinel_config()?;
        sentinel
            .sentinels
            .iter()
            .map(|addr| {
                let mut info = if addr.contains("://") {
                    addr.as_str().into_connection_info()?
                } else {
                    format!("{}://{}", self.scheme(), addr).into_connection_info()?
                };
                if sentinel.sentinel_username.is_some() {
                    info.redis.username = sentinel.sentinel_username.clone();
                }
                if sentinel.sentinel_password.is_some() {
                    info.redis.password = sentinel.sentinel_password.clone();
                }
                Ok(info)
            })
            .collect()
    }

    /// How to talk to the master once the sentinels have named it
    pub fn master_node_info(&self) -> SentinelNodeConnectionInfo {
        SentinelNodeConnectionInfo {
            tls_mode: self.use_tls.then_some(TlsMode::Secure),
            redis_connection_info: Some(self.redis_info()),
        }
    }

    /// The sentinel block, checked for the fields discovery cannot do without
    pub fn sentinel_config(&self) -> CacheResult<&SentinelConfig> {
        let sentinel = self
            .sentinel
            .as_ref()
            .ok_or_else(|| CacheError::Config("sentinel mode is not configured".to_string()))?;
        if sentinel.sentinels.is_empty() {
            return Err(CacheError::Config(
                "sentinel mode needs at least one sentinel address".to_string(),
            ));
        }
        if sentinel.master_name.is_empty() {
            return Err(CacheError::Config("sentinel mode needs a master_name".to_string()));
        }
        Ok(sentinel)
    }

    fn scheme(&self) -> &'static str {
        if self.use_tls {
            "rediss"
        } else {
            "redis"
        }
    }

    fn redis_info(&self) -> RedisConnectionInfo {
        let mut info = RedisConnectionInfo::default();
        info.db = self.db;
        info.username = self.username.clone();
        info.password = self.password.clone();
        info
    }

    /// Address for log lines, never including credentials
    pub fn display_addr(&self) -> String {
        if let Some(sentinel) = &self.sentinel {
            let nodes: Vec<&str> =
                sentinel.sentinels.iter().map(|addr| strip_credentials(addr)).collect();
            return format!("master {} via sentinels {}", sentinel.master_name, nodes.join(","));
        }
        match &self.url {
            Some(url) => strip_credentials(url).to_string(),
            None => format!("{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

fn strip_credentials(addr: &str) -> &str {
    match addr.rsplit_once('@') {
        Some((_, host)) => host,
        None => addr,
    }
}

/// SQL (SQLite) connection and emulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub url: String,
    pub max_connections: u32,
    /// Create the four cache tables if they are missing
    pub create_schema: bool,
    pub busy_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    pub sweep_initial_delay_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_batch_size: u32,
    /// Messages older than this are removed by the sweeper. `None` keeps the log forever.
    pub message_retention_secs: Option<u64>,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://dcache.db".to_string(),
            max_connections: 5,
            create_schema: true,
            busy_timeout_ms: 5_000,
            sweep_interval_secs: 60,
            sweep_initial_delay_secs: 300,
            poll_interval_ms: 100,
            poll_batch_size: 10,
            message_retention_secs: Some(24 * 60 * 60),
        }
    }
}

impl SqlConfig {
    /// Private in-memory database, mostly for tests and local tooling
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn sweep_initial_delay(&self) -> Duration {
        Duration::from_secs(self.sweep_initial_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn message_retention(&self) -> Option<Duration> {
        self.message_retention_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_defaults() {
        let info = RedisConfig::default().connection_info().unwrap();
        assert!(matches!(
            info.addr,
            redis::ConnectionAddr::Tcp(ref host, 6379) if host == "127.0.0.1"
        ));
        assert_eq!(info.redis.db, 0);
        assert_eq!(info.redis.password, None);
    }

    #[test]
    fn test_redis_discrete_fields() {
        let config = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            username: Some("svc".to_string()),
            password: Some("p@ss:word".to_string()),
            db: 3,
            ..RedisConfig::default()
        };
        let info = config.connection_info().unwrap();
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.username.as_deref(), Some("svc"));
        assert_eq!(info.redis.password.as_deref(), Some("p@ss:word"));
        assert_eq!(config.display_addr(), "cache.internal:6380/3");
    }

    #[test]
    fn test_redis_tls_scheme() {
        let config = RedisConfig {
            use_tls: true,
            ..RedisConfig::default()
        };
        let info = config.connection_info().unwrap();
        assert!(matches!(info.addr, redis::ConnectionAddr::TcpTls { .. }));
    }

    #[test]
    fn test_redis_url_wins() {
        let config = RedisConfig::from_url("redis://:secret@10.0.0.5:6390/2");
        let info = config.connection_info().unwrap();
        assert!(matches!(
            info.addr,
            redis::ConnectionAddr::Tcp(ref host, 6390) if host == "10.0.0.5"
        ));
        assert_eq!(info.redis.db, 2);
        assert_eq!(config.display_addr(), "10.0.0.5:6390/2");
    }

    fn sentinel_config() -> RedisConfig {
        RedisConfig {
            username: Some("app".to_string()),
            password: Some("master-secret".to_string()),
            db: 4,
            sentinel: Some(SentinelConfig {
                sentinels: vec![
                    "10.0.0.1:26379".to_string(),
                    "redis://:node-secret@10.0.0.2:26380".to_string(),
                ],
                master_name: "mymaster".to_string(),
                sentinel_username: Some("watcher".to_string()),
                sentinel_password: Some("sentinel-secret".to_string()),
            }),
            ..RedisConfig::default()
        }
    }

    #[test]
    fn test_sentinel_nodes_use_sentinel_credentials() {
        let nodes = sentinel_config().sentinel_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(matches!(
            nodes[0].addr,
            redis::ConnectionAddr::Tcp(ref host, 26379) if host == "10.0.0.1"
        ));
        assert!(matches!(
            nodes[1].addr,
            redis::ConnectionAddr::Tcp(ref host, 26380) if host == "10.0.0.2"
        ));
        for node in &nodes {
            assert_eq!(node.redis.username.as_deref(), Some("watcher"));
            assert_eq!(node.redis.password.as_deref(), Some("sentinel-secret"));
        }
    }

    #[test]
    fn test_sentinel_master_info() {
        let mut config = sentinel_config();
        let master = config.master_node_info();
        assert!(master.tls_mode.is_none());
        let info = master.redis_connection_info.unwrap();
        assert_eq!(info.db, 4);
        assert_eq!(info.username.as_deref(), Some("app"));
        assert_eq!(info.password.as_deref(), Some("master-secret"));

        config.use_tls = true;
        assert!(matches!(config.master_node_info().tls_mode, Some(TlsMode::Secure)));
        assert!(matches!(
            config.sentinel_nodes().unwrap()[0].addr,
            redis::ConnectionAddr::TcpTls { .. }
        ));
    }

    #[test]
    fn test_sentinel_display_hides_credentials() {
        let shown = sentinel_config().display_addr();
        assert_eq!(shown, "master mymaster via sentinels 10.0.0.1:26379,10.0.0.2:26380");
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_sentinel_requires_addresses_and_master() {
        let mut config = sentinel_config();
        if let Some(sentinel) = config.sentinel.as_mut() {
            sentinel.master_name.clear();
        }
        assert!(matches!(config.sentinel_nodes(), Err(CacheError::Config(_))));

        let config = RedisConfig {
            sentinel: Some(SentinelConfig {
                master_name: "mymaster".to_string(),
                ..SentinelConfig::default()
            }),
            ..RedisConfig::default()
        };
        assert!(matches!(config.sentinel_config(), Err(CacheError::Config(_))));
        assert!(matches!(RedisConfig::default().sentinel_config(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_socket_timeout() {
        assert_eq!(RedisConfig::default().socket_timeout(), Some(Duration::from_millis(5_000)));
        let config = RedisConfig {
            socket_timeout_ms: 0,
            ..RedisConfig::default()
        };
        assert_eq!(config.socket_timeout(), None);
    }

    #[test]
    fn test_sentinel_deserialize() {
        let config: RedisConfig = serde_json::from_str(
            r#"{"db":1,"sentinel":{"sentinels":["s1:26379"],"master_name":"cache"}}"#,
        )
        .unwrap();
        let sentinel = config.sentinel_config().unwrap();
        assert_eq!(sentinel.master_name, "cache");
        assert_eq!(sentinel.sentinel_password, None);
        assert_eq!(config.db, 1);
    }

    #[test]
    fn test_sql_defaults() {
        let config = SqlConfig::default();
        assert!(!config.is_in_memory());
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.message_retention(), Some(Duration::from_secs(86_400)));

        let memory = SqlConfig::in_memory();
        assert!(memory.is_in_memory());
        assert_eq!(memory.max_connections, 1);
    }

    #[test]
    fn test_sql_deserialize_partial() {
        let config: SqlConfig =
            serde_json::from_str(r#"{"url":"sqlite://x.db","poll_interval_ms":250}"#).unwrap();
        assert_eq!(config.url, "sqlite://x.db");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.max_connections, 5);
    }
}
