//! Filesystem adapter. Files carry their own modification times, so tracking
//! is always on and cannot be turned off or cleared.

use crate::adapter::Adapter;
use crate::config::BackendKind;
use crate::db::TrackedOperation;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the adapter knows about a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

/// The few file operations the adapter needs from a storage system.
pub trait FileStore: Send + Sync {
    /// `None` when nothing exists at `path`.
    fn stat(&self, path: &str) -> Result<Option<FileStat>>;

    /// Create or overwrite the file at `path`.
    fn create(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Remove `path`, recursively for directories. Missing paths are fine.
    fn delete(&self, path: &str) -> Result<()>;
}

/// Files on the local disk, relative to an optional base directory.
#[derive(Debug, Clone, Default)]
pub struct LocalFileStore {
    base_path: PathBuf,
}

impl LocalFileStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

impl FileStore for LocalFileStore {
    fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let meta = match fs::metadata(self.resolve(path)) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(FileStat {
            modified: DateTime::<Utc>::from(meta.modified()?),
            is_dir: meta.is_dir(),
        }))
    }

    fn create(&self, path: &str, contents: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!(path = %full.display(), bytes = contents.len(), "writing file");
        fs::write(full, contents)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        let result = if full.is_dir() {
            fs::remove_dir_all(&full)
        } else {
            fs::remove_file(&full)
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

pub struct FilesystemAdapter {
    store: Box<dyn FileStore>,
}

impl FilesystemAdapter {
    pub fn new(store: Box<dyn FileStore>) -> Self {
        Self { store }
    }

    pub fn local(base_path: impl AsRef<Path>) -> Self {
        Self::new(Box::new(LocalFileStore::new(base_path)))
    }
}

impl Adapter for FilesystemAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    fn is_tracking(&self, _scope: Option<&str>) -> Result<bool> {
        Ok(true)
    }

    fn set_up_tracking(&self, _scope: Option<&str>, _force: bool) -> Result<()> {
        Ok(())
    }

    fn tear_down_tracking(&self, _scope: Option<&str>) -> Result<()> {
        Err(Error::Unsupported(
            "file modification times cannot be switched off".into(),
        ))
    }

    fn reset_tracking(&self, _scope: Option<&str>) -> Result<()> {
        Err(Error::Unsupported(
            "file modification times cannot be cleared".into(),
        ))
    }

    fn data_exists(&self, name: &str, _schemas: Option<&[String]>) -> Result<bool> {
        Ok(self.store.stat(name)?.is_some())
    }

    fn data_mtime(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store.stat(name)?.map(|s| s.modified))
    }

    /// Writes `definition` as the file contents; the column spec has no meaning here.
    fn create_data(
        &self,
        name: &str,
        definition: Option<&str>,
        _column_spec: &str,
        _track: bool,
    ) -> Result<()> {
        self.store
            .create(name, definition.unwrap_or_default().as_bytes())
    }

    fn drop_data(&self, name: &str) -> Result<()> {
        self.store.delete(name)
    }

    fn truncate_data(&self, name: &str) -> Result<()> {
        match self.store.stat(name)? {
            Some(stat) if !stat.is_dir => self.store.create(name, &[]),
            Some(_) => Err(self.unsupported("truncate", name)),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{name} does not exist"),
            ))),
        }
    }

    fn tracked_operations(&self, name: &str) -> Result<Vec<TrackedOperation>> {
        Err(self.unsupported("operation history", name))
    }

    fn transaction(&self, _commit: bool, _body: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        Err(Error::Unsupported("transactions on the filesystem".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::TempDir;

    fn adapter() -> (FilesystemAdapter, TempDir) {
        let dir = TempDir::new().unwrap();
        (FilesystemAdapter::local(dir.path()), dir)
    }

    #[test]
    fn test_always_tracking() {
        let (a, _dir) = adapter();
        assert!(a.is_tracking(None).unwrap());
        a.set_up_tracking(None, true).unwrap();
        assert!(matches!(a.tear_down_tracking(None), Err(Error::Unsupported(_))));
        assert!(matches!(a.reset_tracking(None), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_create_exists_and_mtime() {
        let (a, dir) = adapter();
        assert!(!a.data_exists("out/report.csv", None).unwrap());
        assert_eq!(a.data_mtime("out/report.csv").unwrap(), None);

        a.create_data("out/report.csv", Some("a,b\n"), "", true).unwrap();
        assert!(a.data_exists("out/report.csv", None).unwrap());
        assert!(a.data_mtime("out/report.csv").unwrap().is_some());
        assert_eq!(
            fs::read_to_string(dir.path().join("out/report.csv")).unwrap(),
            "a,b\n"
        );
    }

    #[test]
    fn test_truncate_advances_mtime() {
        let (a, dir) = adapter();
        a.create_data("f", Some("data"), "", true).unwrap();
        let before = a.data_mtime("f").unwrap().unwrap();
        sleep(Duration::from_millis(20));
        a.truncate_data("f").unwrap();

        assert!(a.data_mtime("f").unwrap().unwrap() > before);
        assert_eq!(fs::read(dir.path().join("f")).unwrap().len(), 0);
    }

    #[test]
    fn test_drop_is_recursive_and_idempotent() {
        let (a, _dir) = adapter();
        a.create_data("d/one", None, "", true).unwrap();
        a.drop_data("d").unwrap();
        assert!(!a.data_exists("d", None).unwrap());
        a.drop_data("d").unwrap();
    }

    #[test]
    fn test_transactions_unsupported() {
        let (a, _dir) = adapter();
        let result = crate::adapter::with_transaction(&a, true, || Ok(()));
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }
}
