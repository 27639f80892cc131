use std::time::Duration;

use crate::{UploadError, UploadResult};

const MIB: u64 = 1024 * 1024;

/// Prefix for environment overrides, e.g. `DOG_UPLOAD__BUCKET`.
pub const ENV_PREFIX: &str = "DOG_UPLOAD__";

/// Configuration for the upload coordinator
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Bucket that receives multipart uploads
    pub bucket: String,

    /// Region of the bucket, recorded on every session
    pub region: String,

    /// Rules for slicing files into parts
    pub chunk_rules: ChunkRules,

    /// Max presigned URLs minted per call
    pub url_batch_size: usize,

    /// Lifetime of a presigned part URL
    pub presign_ttl: Duration,

    /// Session lifetime. Matches the store's multipart-upload retention window.
    pub session_ttl: Duration,

    /// Upper bound on any single blob store call
    pub store_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: "uploads".to_string(),
            region: "us-east-1".to_string(),
            chunk_rules: ChunkRules::default(),
            url_batch_size: 50,
            presign_ttl: Duration::from_secs(60 * 60), // 1 hour
            session_ttl: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            store_timeout: Duration::from_secs(30),
        }
    }
}

/// Rules for choosing a chunk size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRules {
    /// Chunk size used for files under `small_file_threshold`
    pub default_chunk_size: u64,

    /// Smallest accepted chunk (the store's minimum part size)
    pub min_chunk_size: u64,

    /// Largest accepted chunk
    pub max_chunk_size: u64,

    /// Files at or above this size get a chunk scaled to keep the part count bounded
    pub small_file_threshold: u64,

    /// Upper bound on parts per upload
    pub max_parts: u32,
}

impl Default for ChunkRules {
    fn default() -> Self {
        Self {
            default_chunk_size: 10 * MIB,
            min_chunk_size: 5 * MIB,
            max_chunk_size: 100 * MIB,
            small_file_threshold: 100 * MIB,
            max_parts: 10_000,
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `DOG_UPLOAD__*` environment variables.
    pub fn from_env() -> UploadResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Same as [`UploadConfig::from_env`] but over an explicit variable set.
    pub fn from_vars<I>(vars: I) -> UploadResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match name {
                "BUCKET" => config.bucket = value,
                "REGION" => config.region = value,
                "URL_BATCH_SIZE" => config.url_batch_size = parse_var(&key, &value)?,
                "PRESIGN_TTL_SECS" => {
                    config.presign_ttl = Duration::from_secs(parse_var(&key, &value)?)
                }
                "SESSION_TTL_SECS" => {
                    config.session_ttl = Duration::from_secs(parse_var(&key, &value)?)
                }
                "STORE_TIMEOUT_SECS" => {
                    config.store_timeout = Duration::from_secs(parse_var(&key, &value)?)
                }
                "DEFAULT_CHUNK_SIZE" => {
                    config.chunk_rules.default_chunk_size = parse_var(&key, &value)?
                }
                _ => tracing::debug!(variable = %key, "ignoring unknown upload setting"),
            }
        }

        if config.url_batch_size == 0 {
            return Err(UploadError::bad_request(format!(
                "{}URL_BATCH_SIZE must be at least 1",
                ENV_PREFIX
            )));
        }

        Ok(config)
    }

    pub fn with_bucket<S: Into<String>>(mut self, bucket: S) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_chunk_rules(mut self, rules: ChunkRules) -> Self {
        self.chunk_rules = rules;
        self
    }

    pub fn with_url_batch_size(mut self, size: usize) -> Self {
        self.url_batch_size = size.max(1);
        self
    }

    pub fn with_presign_ttl(mut self, ttl: Duration) -> Self {
        self.presign_ttl = ttl;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

impl ChunkRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_chunk_size(mut self, bytes: u64) -> Self {
        self.default_chunk_size = bytes;
        self
    }

    /// Set the accepted chunk size window
    pub fn with_bounds(mut self, min: u64, max: u64) -> Self {
        self.min_chunk_size = min;
        self.max_chunk_size = max.max(min);
        self
    }

    pub fn with_small_file_threshold(mut self, bytes: u64) -> Self {
        self.small_file_threshold = bytes;
        self
    }

    pub fn with_max_parts(mut self, max: u32) -> Self {
        self.max_parts = max.max(1);
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> UploadResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| UploadError::bad_request(format!("{} has an invalid value: {:?}", key, value)))
}
