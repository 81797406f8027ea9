//! On-disk naming of stored files and their renditions.

use std::path::{Path, PathBuf};

/// Maps a file ID to its locations under the storage root. Performs no I/O.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encrypted original bytes: `<root>/<id>`.
    pub fn original(&self, file_id: &str) -> PathBuf {
        self.root.join(file_id)
    }

    /// Web-optimized rendition: `<root>/<id>_web`.
    pub fn web(&self, file_id: &str) -> PathBuf {
        self.root.join(format!("{}_web", file_id))
    }

    /// Thumbnail rendition: `<root>/<id>_thumb`.
    pub fn thumbnail(&self, file_id: &str) -> PathBuf {
        self.root.join(format!("{}_thumb", file_id))
    }

    /// Original, web and thumbnail paths, in that order.
    pub fn all(&self, file_id: &str) -> [PathBuf; 3] {
        [
            self.original(file_id),
            self.web(file_id),
            self.thumbnail(file_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_deterministic() {
        let paths = StoragePaths::new("/data/storage");
        assert_eq!(paths.original("abc"), PathBuf::from("/data/storage/abc"));
        assert_eq!(paths.web("abc"), PathBuf::from("/data/storage/abc_web"));
        assert_eq!(paths.thumbnail("abc"), PathBuf::from("/data/storage/abc_thumb"));
        assert_eq!(paths.all("abc"), paths.all("abc"));
        assert_eq!(paths.all("abc")[0], paths.original("abc"));
    }
}
