//! Configuration for the shard migration service.
//!
//! Generalized from the teacher's single `BackendConfig` (filesystem vs.
//! one S3 bucket) into the source allowlist plus the destination
//! bucket triple and block-index table location that SPEC_FULL.md §6
//! names explicitly. Layering (`from_file` → `from_env` → defaults) and
//! the `ConfigError` split follow the teacher's `Config::load` shape.

use crate::errors::WorkerError;
use crate::model::{ObjectRef, StaticCredentials};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Source regions Hash/Copy/Reindex will accept (SPEC_FULL.md §6).
    #[serde(default = "default_allowed_source_regions")]
    pub allowed_source_regions: Vec<String>,

    /// Required prefix for source bucket names.
    #[serde(default = "default_source_bucket_prefix")]
    pub source_bucket_prefix: String,

    #[serde(default)]
    pub dest: DestConfig,

    #[serde(default)]
    pub block_index: BlockIndexConfig,
}

/// Destination store configuration, populated by `DEST_*` and
/// `*_BUCKET` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_dest_region")]
    pub region: String,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    #[serde(default = "default_carpark_bucket")]
    pub carpark_bucket: String,

    #[serde(default = "default_satnav_bucket")]
    pub satnav_bucket: String,

    #[serde(default = "default_dudewhere_bucket")]
    pub dudewhere_bucket: String,
}

/// Block-index table location, populated by `BLOCK_INDEX_REGION` and
/// `BLOCK_INDEX_TABLE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIndexConfig {
    #[serde(default = "default_block_index_region")]
    pub region: String,

    #[serde(default = "default_block_index_table")]
    pub table: String,
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn default_allowed_source_regions() -> Vec<String> {
    vec!["us-east-2".to_string(), "us-west-2".to_string()]
}

fn default_source_bucket_prefix() -> String {
    "dotstorage".to_string()
}

fn default_dest_region() -> String {
    "us-east-1".to_string()
}

fn default_carpark_bucket() -> String {
    "carpark-prod-0".to_string()
}

fn default_satnav_bucket() -> String {
    "satnav-prod-0".to_string()
}

fn default_dudewhere_bucket() -> String {
    "dudewhere-prod-0".to_string()
}

fn default_block_index_region() -> String {
    "us-east-1".to_string()
}

fn default_block_index_table() -> String {
    "block-index-prod-0".to_string()
}

impl Default for DestConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_dest_region(),
            access_key_id: None,
            secret_access_key: None,
            carpark_bucket: default_carpark_bucket(),
            satnav_bucket: default_satnav_bucket(),
            dudewhere_bucket: default_dudewhere_bucket(),
        }
    }
}

impl Default for BlockIndexConfig {
    fn default() -> Self {
        Self {
            region: default_block_index_region(),
            table: default_block_index_table(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            allowed_source_regions: default_allowed_source_regions(),
            source_bucket_prefix: default_source_bucket_prefix(),
            dest: DestConfig::default(),
            block_index: BlockIndexConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from the environment variables named in
    /// SPEC_FULL.md §6, falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        config.dest.endpoint = std::env::var("DEST_ENDPOINT").ok();
        if let Ok(region) = std::env::var("DEST_REGION") {
            config.dest.region = region;
        }
        config.dest.access_key_id = std::env::var("DEST_ACCESS_KEY_ID").ok();
        config.dest.secret_access_key = std::env::var("DEST_SECRET_ACCESS_KEY").ok();
        if let Ok(bucket) = std::env::var("CARPARK_BUCKET") {
            config.dest.carpark_bucket = bucket;
        }
        if let Ok(bucket) = std::env::var("SATNAV_BUCKET") {
            config.dest.satnav_bucket = bucket;
        }
        if let Ok(bucket) = std::env::var("DUDEWHERE_BUCKET") {
            config.dest.dudewhere_bucket = bucket;
        }

        if let Ok(region) = std::env::var("BLOCK_INDEX_REGION") {
            config.block_index.region = region;
        }
        if let Ok(table) = std::env::var("BLOCK_INDEX_TABLE") {
            config.block_index.table = table;
        }

        config
    }

    /// File first (`CONFIG_PATH` or a couple of default locations), then
    /// environment variables, matching the teacher's `Config::load`.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("CONFIG_PATH") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["carshift.toml", "/etc/carshift/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// Validates a Hash/Copy/Reindex request's `region`/`bucket`/`key`
    /// triple against the source allowlist (SPEC_FULL.md §4.1, §6).
    pub fn validate_source(&self, region: &str, bucket: &str, key: &str) -> Result<(), WorkerError> {
        if !self.allowed_source_regions.iter().any(|r| r == region) {
            return Err(WorkerError::validation(format!("region not allowed: {region}")));
        }
        if !bucket.starts_with(&self.source_bucket_prefix) {
            return Err(WorkerError::validation(format!(
                "bucket must start with {}: {bucket}",
                self.source_bucket_prefix
            )));
        }
        if !key.ends_with(".car") {
            return Err(WorkerError::validation(format!("key must end with .car: {key}")));
        }
        Ok(())
    }

    fn dest_credentials(&self) -> Option<StaticCredentials> {
        match (&self.dest.access_key_id, &self.dest.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
            }),
            _ => None,
        }
    }

    fn dest_object(&self, bucket: &str, key: impl Into<String>) -> ObjectRef {
        let mut obj = ObjectRef::new(self.dest.region.clone(), bucket.to_string(), key);
        if let Some(endpoint) = &self.dest.endpoint {
            obj = obj.with_endpoint(endpoint.clone());
        }
        if let Some(creds) = self.dest_credentials() {
            obj = obj.with_credentials(creds);
        }
        obj
    }

    /// `{carparkBucket}/{shard}/{shard}.car` (SPEC_FULL.md §6 destination
    /// key layout).
    pub fn carpark_object(&self, shard: &str) -> ObjectRef {
        self.dest_object(&self.dest.carpark_bucket, format!("{shard}/{shard}.car"))
    }

    /// `{satnavBucket}/{shard}/{shard}.car.idx`.
    pub fn satnav_object(&self, shard: &str) -> ObjectRef {
        self.dest_object(&self.dest.satnav_bucket, format!("{shard}/{shard}.car.idx"))
    }

    /// `{dudewhereBucket}/{root}/{shard}`.
    pub fn dudewhere_object(&self, root: &str, shard: &str) -> ObjectRef {
        self.dest_object(&self.dest.dudewhere_bucket, format!("{root}/{shard}"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}
