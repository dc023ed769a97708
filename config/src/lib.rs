//! Typed configuration structs for the encoder, the batch indexer
//! framework, and the resume loader (§6).
//!
//! One struct per subsystem, defaults supplied in Rust, validated once
//! at construction rather than scattered through the code that reads
//! these values.

use evochora_error::ConfigError;
use serde::Deserialize;

/// Encoder sampling configuration (§4.1).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Samples between ACCUMULATED deltas within a chunk. Must be >= 1.
    pub accumulated_delta_interval: u32,
    /// Number of accumulated-delta windows per chunk head snapshot. Must be >= 1.
    pub snapshot_interval: u32,
    /// Number of snapshot windows per emitted chunk. Must be >= 1.
    pub chunk_interval: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            accumulated_delta_interval: 10,
            snapshot_interval: 10,
            chunk_interval: 1,
        }
    }
}

impl EncoderConfig {
    /// Total samples a single chunk spans, head snapshot included.
    pub fn samples_per_chunk(&self) -> u64 {
        u64::from(self.accumulated_delta_interval)
            * u64::from(self.snapshot_interval)
            * u64::from(self.chunk_interval)
    }

    /// Configuration errors are fatal at construction (§4.1, §7).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accumulated_delta_interval < 1 {
            return Err(ConfigError::InvalidInterval {
                field: "accumulated_delta_interval",
                value: self.accumulated_delta_interval as i64,
            });
        }
        if self.snapshot_interval < 1 {
            return Err(ConfigError::InvalidInterval {
                field: "snapshot_interval",
                value: self.snapshot_interval as i64,
            });
        }
        if self.chunk_interval < 1 {
            return Err(ConfigError::InvalidInterval {
                field: "chunk_interval",
                value: self.chunk_interval as i64,
            });
        }
        Ok(())
    }
}

/// Batch indexer framework configuration (§6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Commit window, in staged chunks.
    pub insert_batch_size: usize,
    /// Also used as the topic-poll timeout.
    pub flush_timeout_ms: u64,
    pub metadata_poll_interval_ms: u64,
    pub metadata_max_poll_duration_ms: u64,
    /// DLQ retry budget.
    pub max_retries: u32,
    /// Divisors used to build the object store's folder fan-out (§6).
    pub folder_structure_levels: Vec<u64>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: 5,
            flush_timeout_ms: 5_000,
            metadata_poll_interval_ms: 500,
            metadata_max_poll_duration_ms: 60_000,
            max_retries: 3,
            folder_structure_levels: vec![100_000_000, 100_000],
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.insert_batch_size < 1 {
            return Err(ConfigError::InvalidInterval {
                field: "insert_batch_size",
                value: self.insert_batch_size as i64,
            });
        }
        if self.folder_structure_levels.is_empty() {
            return Err(ConfigError::MissingResource {
                name: "folder_structure_levels".to_string(),
            });
        }
        Ok(())
    }
}

/// Resume-from-checkpoint configuration (§4.5, §6).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    pub enabled: bool,
    pub run_id: Option<String>,
}

/// Loads a `toml` document into `T`, leaning on `T`'s `Default` for any
/// field the document omits.
pub fn load_toml<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, ConfigError> {
    toml::from_str(raw).map_err(|e| ConfigError::MissingResource {
        name: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_samples_per_chunk() {
        let cfg = EncoderConfig::default();
        assert_eq!(cfg.samples_per_chunk(), 10 * 10 * 1);
    }

    #[test]
    fn rejects_zero_interval() {
        let cfg = EncoderConfig {
            snapshot_interval: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidInterval { field: "snapshot_interval", .. })
        ));
    }

    #[test]
    fn indexer_defaults_match_spec() {
        let cfg = IndexerConfig::default();
        assert_eq!(cfg.insert_batch_size, 5);
        assert_eq!(cfg.folder_structure_levels, vec![100_000_000, 100_000]);
    }
}
