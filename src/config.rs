//! Tunables: slice/block sizing, cache thresholds, cache TTLs.
//!
//! Loadable from a TOML file (`FsConfig::from_toml_str` / `load`) with
//! `clap`-derived CLI flags layered on top via [`CliOverrides::apply`].
//! Test code constructs scaled-down configs directly so suites do not need
//! to move gigabytes of data — see `FsConfig::for_tests`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Minimum multipart part size most S3/OSS-compatible stores enforce.
pub const BLOCK_SIZE: u64 = 5 * (1 << 20);
/// Near the single-object multipart ceiling most stores enforce.
pub const SLICE_SIZE: u64 = 5 * (1 << 30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Slice granularity in bytes. Must match across the lifetime of a bucket.
    pub slice_size: u64,
    /// Staged-block size in bytes. Must match the store's multipart minimum.
    pub block_size: u64,
    /// `CacheBuffer` capacity in bytes; must be `>= block_size`.
    pub cache_capacity: u64,
    /// Number of staged blocks accumulated before an eager `SliceFile::append`.
    pub eager_flush_blocks: usize,
    /// TTL for positive directory-cache entries.
    pub dir_cache_short_ttl: Duration,
    /// Synthetic statfs block size, reported to callers.
    pub statfs_block_size: u64,
    /// Synthetic statfs total block count, reported to callers.
    pub statfs_blocks: u64,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            slice_size: SLICE_SIZE,
            block_size: BLOCK_SIZE,
            cache_capacity: BLOCK_SIZE + (1 << 20),
            eager_flush_blocks: 1024,
            dir_cache_short_ttl: Duration::from_secs(10),
            statfs_block_size: 4096,
            statfs_blocks: 1 << 40,
        }
    }
}

impl FsConfig {
    /// A configuration with scaled-down slice/block sizes for fast tests.
    /// Deliberately uses a much smaller `slice_size / block_size` ratio (4,
    /// versus production's 1024) so the multi-slice promotion path exercises
    /// in a handful of blocks instead of a thousand.
    pub fn for_tests() -> Self {
        let block_size = 64;
        Self {
            slice_size: block_size * 4,
            block_size,
            cache_capacity: block_size + 16,
            eager_flush_blocks: 4,
            dir_cache_short_ttl: Duration::from_millis(50),
            statfs_block_size: 4096,
            statfs_blocks: 1 << 20,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::error::ObjfsError::Io(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
            .map_err(|e| crate::error::ObjfsError::Invalid(format!("parsing {}: {e}", path.display())))
    }
}

/// CLI flags that may override individual config fields.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CliOverrides {
    #[arg(long)]
    pub eager_flush_blocks: Option<usize>,
    #[arg(long)]
    pub statfs_blocks: Option<u64>,
}

impl CliOverrides {
    pub fn apply(&self, cfg: &mut FsConfig) {
        if let Some(v) = self.eager_flush_blocks {
            cfg.eager_flush_blocks = v;
        }
        if let Some(v) = self.statfs_blocks {
            cfg.statfs_blocks = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_respects_block_minimum() {
        let cfg = FsConfig::default();
        assert!(cfg.cache_capacity >= cfg.block_size);
    }

    #[test]
    fn toml_round_trip_overrides_fields() {
        let cfg = FsConfig::from_toml_str("eager_flush_blocks = 7\n").unwrap();
        assert_eq!(cfg.eager_flush_blocks, 7);
        assert_eq!(cfg.block_size, BLOCK_SIZE);
    }

    #[test]
    fn load_reads_a_config_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objfs.toml");
        std::fs::write(&path, "statfs_blocks = 42\n").unwrap();

        let cfg = FsConfig::load(&path).unwrap();
        assert_eq!(cfg.statfs_blocks, 42);
        assert_eq!(cfg.slice_size, SLICE_SIZE);
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, crate::error::ObjfsError::Io(_)));
    }
}
