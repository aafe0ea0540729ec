//! Object store kept as files under a local directory.

use super::ObjectStore;
use crate::config::ProgressSink;
use crate::error::{StorageError, StorageResult};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// An object store mapping each key to a file below a root directory.
///
/// Keys use `/` as separator and become nested directories. Mirrors how a
/// bucket is laid out when synced to disk, which makes it a handy local
/// stand-in for a remote store.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    /// Creates a store rooted at `root`. The directory is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::config(format!("invalid object key {key:?}")));
        }
        Ok(self.root.join(relative))
    }

    fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect_files(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

impl ObjectStore for DirectoryObjectStore {
    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.object_path(key)?.is_file())
    }

    fn download(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.object_path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn upload(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    fn clear(&self, prefix: &str, progress: Option<&dyn ProgressSink>) -> StorageResult<u64> {
        if !self.root.is_dir() {
            return Ok(0);
        }

        let mut files = Vec::new();
        Self::collect_files(&self.root, &mut files)?;

        let mut removed = 0;
        for path in files {
            let matches = self
                .key_of(&path)
                .is_some_and(|key| key.starts_with(prefix));
            if matches {
                fs::remove_file(&path)?;
                removed += 1;
                if let Some(sink) = progress {
                    sink.on_progress(1);
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn nested_keys_become_files() {
        let dir = tempdir().unwrap();
        let store = DirectoryObjectStore::new(dir.path());

        store.upload("heap/b0", b"block").unwrap();
        assert!(dir.path().join("heap").join("b0").is_file());
        assert!(store.exists("heap/b0").unwrap());
        assert_eq!(store.download("heap/b0").unwrap().unwrap(), b"block");
        assert_eq!(store.download("heap/b1").unwrap(), None);
    }

    #[test]
    fn clear_with_prefix() {
        let dir = tempdir().unwrap();
        let store = DirectoryObjectStore::new(dir.path());
        for key in ["x/header", "x/b0", "x/b1", "y/b0"] {
            store.upload(key, b"1").unwrap();
        }

        assert_eq!(store.clear("x/", None).unwrap(), 3);
        assert!(!store.exists("x/b0").unwrap());
        assert!(store.exists("y/b0").unwrap());
    }

    #[test]
    fn escaping_keys_rejected() {
        let dir = tempdir().unwrap();
        let store = DirectoryObjectStore::new(dir.path());
        assert!(matches!(
            store.upload("../evil", b"x"),
            Err(StorageError::Config { .. })
        ));
        assert!(store.upload("/abs", b"x").is_err());
    }

    #[test]
    fn clear_missing_root() {
        let dir = tempdir().unwrap();
        let store = DirectoryObjectStore::new(dir.path().join("nope"));
        assert_eq!(store.clear("", None).unwrap(), 0);
    }
}
