//! On-disk configuration for the strata binary.

use std::{
    fs,
    path::{Path, PathBuf},
};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use strata_blockstore::{BlockStoreConfig, VolumeConfig};

/// Where the hash index lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct IndexConfig {
    /// redb database file. Defaults to `index.redb` beside the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) path: Option<PathBuf>,
    /// Keep the index in memory only.
    pub(crate) memory: bool,
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StrataConfig {
    pub(crate) store: BlockStoreConfig,
    pub(crate) index: IndexConfig,
}

impl StrataConfig {
    /// Load from `path`, or defaults if the file does not exist.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(path)
                    .wrap_err_with(|| format!("failed to read config: {}", path.display()))?;
                toml::from_str(&content)
                    .wrap_err_with(|| format!("failed to parse config: {}", path.display()))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save the configuration to the given path.
    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply command line overrides. Volumes given on the command line
    /// replace the configured ones.
    pub(crate) fn apply_args(
        &mut self,
        volumes: &[VolumeConfig],
        index: Option<&Path>,
        memory_index: bool,
    ) {
        if !volumes.is_empty() {
            self.store.volumes = volumes.to_vec();
        }
        if let Some(index) = index {
            self.index.path = Some(index.to_path_buf());
        }
        if memory_index {
            self.index.memory = true;
        }
    }

    /// Resolved index database path.
    pub(crate) fn index_path(&self, config_path: Option<&Path>) -> PathBuf {
        if let Some(path) = &self.index.path {
            return path.clone();
        }
        config_path
            .and_then(Path::parent)
            .map(|dir| dir.join("index.redb"))
            .unwrap_or_else(|| PathBuf::from("index.redb"))
    }
}

/// Parse a byte count with an optional binary suffix (`K`, `M`, `G`, `T`).
pub(crate) fn parse_capacity(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);
    let base: u64 = digits
        .parse()
        .map_err(|_| format!("invalid capacity: {value:?}"))?;
    let shift = match suffix.trim().to_ascii_uppercase().trim_end_matches("IB").trim_end_matches('B') {
        "" => 0,
        "K" => 10,
        "M" => 20,
        "G" => 30,
        "T" => 40,
        other => return Err(format!("unknown capacity suffix: {other:?}")),
    };
    base.checked_mul(1u64 << shift)
        .ok_or_else(|| format!("capacity overflows: {value:?}"))
}

/// Parse `PATH:CAPACITY`.
pub(crate) fn parse_volume(value: &str) -> Result<VolumeConfig, String> {
    let (path, capacity) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected PATH:CAPACITY, got {value:?}"))?;
    if path.is_empty() {
        return Err(format!("empty volume path in {value:?}"));
    }
    Ok(VolumeConfig {
        path: PathBuf::from(path),
        capacity_bytes: parse_capacity(capacity)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capacity() {
        assert_eq!(parse_capacity("4096").unwrap(), 4096);
        assert_eq!(parse_capacity("10M").unwrap(), 10 << 20);
        assert_eq!(parse_capacity("2GiB").unwrap(), 2 << 30);
        assert_eq!(parse_capacity("1kb").unwrap(), 1024);
        assert!(parse_capacity("lots").is_err());
        assert!(parse_capacity("5X").is_err());
        assert!(parse_capacity("99999999999T").is_err());
    }

    #[test]
    fn test_parse_volume() {
        let volume = parse_volume("/srv/a:1G").unwrap();
        assert_eq!(volume.path, PathBuf::from("/srv/a"));
        assert_eq!(volume.capacity_bytes, 1 << 30);
        assert!(parse_volume("/srv/a").is_err());
        assert!(parse_volume(":1G").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("strata.toml");

        let mut config = StrataConfig::default();
        config.apply_args(
            &[parse_volume("/srv/a:64M").unwrap()],
            None,
            false,
        );
        config.store.max_wasted_space = 1024;
        config.save(&path).unwrap();

        let loaded = StrataConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.index_path(Some(path.as_path())), dir.path().join("conf").join("index.redb"));

        // Missing files fall back to defaults.
        let missing = StrataConfig::load(Some(dir.path().join("nope.toml").as_path())).unwrap();
        assert_eq!(missing, StrataConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: StrataConfig = toml::from_str(
            r#"
            [store]
            max_chunk_size = 2048

            [[store.volumes]]
            path = "/srv/a"
            capacity_bytes = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.store.max_chunk_size, 2048);
        assert_eq!(config.store.volumes.len(), 1);
        assert_eq!(config.store.cache_capacity, BlockStoreConfig::default().cache_capacity);
        assert!(!config.index.memory);
    }
}
