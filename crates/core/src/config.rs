//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Accumulator sizing and routing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Minimum aggregate size in bytes before it may be marked ready.
    #[serde(default = "default_min_size")]
    pub min_size: u64,
    /// Hard cap on aggregate size in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Upper bound on routing retries when racing for the current
    /// ingesting aggregate. The conditional add is the correctness guard;
    /// this only bounds pointer churn.
    #[serde(default = "default_max_route_attempts")]
    pub max_route_attempts: u32,
}

impl AggregatorConfig {
    /// Validate size bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_size == 0 {
            return Err("min_size must be greater than zero".to_string());
        }
        if self.min_size > self.max_size {
            return Err(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            ));
        }
        if self.max_route_attempts == 0 {
            return Err("max_route_attempts must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            max_size: default_max_size(),
            max_route_attempts: default_max_route_attempts(),
        }
    }
}

fn default_max_size() -> u64 {
    // 127 sectors of 256 MiB.
    127 * (1 << 28)
}

fn default_min_size() -> u64 {
    1 + 127 * (1 << 27)
}

fn default_max_route_attempts() -> u32 {
    8
}

/// Record table configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecordsConfig {
    /// SQLite database (recommended for testing and small deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL.
        url: String,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

/// Content store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO
        /// and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl StorageConfig {
    /// Validate credential pairing.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregator_defaults_are_valid() {
        let config = AggregatorConfig::default();
        config.validate().unwrap();
        assert!(config.min_size <= config.max_size);
        assert_eq!(config.max_size, 127 * (1 << 28));
    }

    #[test]
    fn test_aggregator_rejects_inverted_bounds() {
        let config = AggregatorConfig {
            min_size: 100,
            max_size: 50,
            max_route_attempts: 8,
        };
        assert!(config.validate().is_err());

        let config = AggregatorConfig {
            min_size: 0,
            max_size: 50,
            max_route_attempts: 8,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_records_config_deserializes_tagged() {
        let config: RecordsConfig =
            serde_json::from_str(r#"{"type":"sqlite","path":"/tmp/records.db"}"#).unwrap();
        match config {
            RecordsConfig::Sqlite { path } => assert_eq!(path, PathBuf::from("/tmp/records.db")),
            _ => panic!("expected sqlite config"),
        }
    }
}
