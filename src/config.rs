use serde::{Deserialize, Serialize};

use crate::error::{Result, VellumError};

/// Storage engine configuration.
///
/// The format parameters (`index_interval`, `skip_interval`,
/// `max_skip_levels`) are persisted in every segment file header, so readers
/// always reproduce the exact parameters a segment was written with. The
/// values here only apply to newly written segments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Every n-th term dictionary entry is mirrored into the sampled index.
    pub index_interval: u32,
    /// Keep every n-th sample when materializing the in-memory sampled
    /// index. Trades memory for seek granularity; fixed at reader open.
    pub index_divisor: u32,
    /// Level-0 skip entries are written every `skip_interval` documents.
    /// Terms with `doc_freq < skip_interval` carry no skip data.
    pub skip_interval: u32,
    /// Upper bound on skip list depth.
    pub max_skip_levels: u32,
    /// Flush the write buffer once it holds this many documents.
    pub buffer_max_docs: u32,
    /// Maximum number of merges running on background workers at once.
    pub max_concurrent_merges: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_interval: 128,
            index_divisor: 1,
            skip_interval: 16,
            max_skip_levels: 10,
            buffer_max_docs: 10_000,
            max_concurrent_merges: 2,
        }
    }
}

impl StorageConfig {
    /// Validate configuration before the index is opened.
    pub fn validate(&self) -> Result<()> {
        if self.index_interval == 0 {
            return Err(VellumError::InvalidConfig(
                "index_interval must be >= 1".to_string(),
            ));
        }
        if self.index_divisor == 0 {
            return Err(VellumError::InvalidConfig(
                "index_divisor must be >= 1".to_string(),
            ));
        }
        if self.skip_interval < 2 {
            return Err(VellumError::InvalidConfig(
                "skip_interval must be >= 2".to_string(),
            ));
        }
        if self.max_skip_levels == 0 {
            return Err(VellumError::InvalidConfig(
                "max_skip_levels must be >= 1".to_string(),
            ));
        }
        if self.max_concurrent_merges == 0 {
            return Err(VellumError::InvalidConfig(
                "max_concurrent_merges must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StorageConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = StorageConfig::default();
        config.index_divisor = 0;
        assert!(config.validate().is_err());

        let mut config = StorageConfig::default();
        config.skip_interval = 1;
        assert!(config.validate().is_err());
    }
}
