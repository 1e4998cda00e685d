//! Storage configuration.

use std::path::PathBuf;

/// Locations of the on-disk stores.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base path under which both stores live.
    pub base_path: PathBuf,
    /// Root against which relative catalog paths are resolved. `None`
    /// passes relative paths through untouched.
    pub dedup_root: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(".seedmatch"),
            dedup_root: None,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration rooted at the given base path.
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            ..Default::default()
        }
    }

    /// Sets the deduplication root used to resolve relative catalog paths.
    pub fn with_dedup_root(mut self, root: PathBuf) -> Self {
        self.dedup_root = Some(root);
        self
    }

    /// Returns the path of the file catalog database.
    pub fn catalog_path(&self) -> PathBuf {
        self.base_path.join("catalog")
    }

    /// Returns the path of the piece-hash database.
    pub fn pieces_path(&self) -> PathBuf {
        self.base_path.join("pieces")
    }

    /// Creates all necessary directories.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_base() {
        let config = StoreConfig::new(PathBuf::from("/tmp/sm"));
        assert_eq!(config.catalog_path(), PathBuf::from("/tmp/sm/catalog"));
        assert_eq!(config.pieces_path(), PathBuf::from("/tmp/sm/pieces"));
        assert!(config.dedup_root.is_none());
    }

    #[test]
    fn dedup_root_setter() {
        let config = StoreConfig::default().with_dedup_root(PathBuf::from("/data"));
        assert_eq!(config.dedup_root, Some(PathBuf::from("/data")));
    }
}
