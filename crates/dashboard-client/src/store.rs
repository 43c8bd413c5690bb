use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use dashboard_core::{FetchError, FetchResult, KeyValueStore};

/// Persistent cache tier: one JSON file per key under the platform data
/// directory. Failures surface as `FetchError::Storage`; the cache layer
/// above decides whether to swallow them.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new() -> FetchResult<Self> {
        let root = dirs::data_dir()
            .ok_or_else(|| FetchError::Storage("no platform data directory".to_string()))?
            .join("stockdash")
            .join("cache");
        Self::at(root)
    }

    pub fn at(root: impl Into<PathBuf>) -> FetchResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| FetchError::Storage(e.to_string()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are prefix + stock code; sanitize anyway so no key can
        // escape the cache directory.
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{safe}.json"))
    }
}

impl KeyValueStore for DiskStore {
    fn load(&self, key: &str) -> FetchResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FetchError::Storage(e.to_string())),
        }
    }

    fn save(&self, key: &str, value: &str) -> FetchResult<()> {
        fs::write(self.path_for(key), value).map_err(|e| FetchError::Storage(e.to_string()))
    }

    fn remove(&self, key: &str) {
        if let Err(e) = fs::remove_file(self.path_for(key)) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("failed to remove cache file for {key}: {e}");
            }
        }
    }
}
