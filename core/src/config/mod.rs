pub mod settings;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Root directory; each virtual host gets `<data_dir>/<vhost>/`
    pub data_dir: String,
    pub vhost: String,
    /// Threads serving asynchronous delivery tasks
    pub worker_threads: usize,
    /// fsync every durable append
    pub sync_writes: bool,
    /// Minimum durable records in a queue log before compaction is considered
    pub gc_min_records: usize,
    pub max_frame_size: usize,
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            data_dir: "./data".to_string(),
            vhost: "default".to_string(),
            worker_threads: 4,
            sync_writes: true,
            gc_min_records: 2000,
            max_frame_size: 16 * 1024 * 1024, // 16MB
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, data_dir: P) -> Self {
        self.data_dir = data_dir.into().to_string_lossy().into_owned();
        self
    }

    pub fn with_vhost(mut self, vhost: &str) -> Self {
        self.vhost = vhost.to_string();
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Disable per-append fsync (faster, loses the last writes on power failure)
    pub fn without_sync(mut self) -> Self {
        self.sync_writes = false;
        self
    }

    pub fn with_gc_min_records(mut self, records: usize) -> Self {
        self.gc_min_records = records;
        self
    }

    /// Directory holding everything the configured virtual host persists
    pub fn vhost_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.vhost)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate configuration bounds before the server starts
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.port == 0 {
            return Err("port must be > 0".to_string());
        }
        if self.worker_threads == 0 {
            return Err("worker_threads must be > 0".to_string());
        }
        if self.vhost.is_empty() {
            return Err("vhost must not be empty".to_string());
        }
        if self.max_frame_size < 1024 {
            return Err("max_frame_size must be at least 1024 bytes".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BrokerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gc_min_records, 2000);
        assert!(config.sync_writes);
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        assert!(BrokerConfig::default().with_port(0).validate().is_err());
        assert!(BrokerConfig::default()
            .with_worker_threads(0)
            .validate()
            .is_err());
        assert!(BrokerConfig::default().with_vhost("").validate().is_err());

        let mut config = BrokerConfig::default();
        config.max_frame_size = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vhost_dir() {
        let config = BrokerConfig::default()
            .with_data_dir("/var/lib/tidemq")
            .with_vhost("orders");
        assert_eq!(config.vhost_dir(), PathBuf::from("/var/lib/tidemq/orders"));
        assert_eq!(
            BrokerConfig::default().with_host("127.0.0.1").bind_addr(),
            "127.0.0.1:8085"
        );
    }
}
