//! Read-only access to the files that back a database.

pub mod cache;

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::Path;

pub use cache::{CacheStats, FileCache};

/// What a path in a database's home folder refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// Storage backend used by databases. Every storage access is a suspension
/// point; nothing else in a query yields.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Returns `None` when nothing exists at `path`.
    async fn stat(&self, path: &Path) -> io::Result<Option<EntryKind>>;

    async fn read(&self, path: &Path) -> io::Result<Bytes>;
}

/// The local disk, accessed through tokio's non-blocking file API.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => Ok(Some(EntryKind::Directory)),
            Ok(_) => Ok(Some(EntryKind::File)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, path: &Path) -> io::Result<Bytes> {
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }
}

fn is_missing(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stat_distinguishes_files_folders_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();
        std::fs::write(dir.path().join("file.txt"), b"hello").unwrap();

        let fs = LocalFileSystem;
        assert_eq!(fs.stat(&dir.path().join("folder")).await.unwrap(), Some(EntryKind::Directory));
        assert_eq!(fs.stat(&dir.path().join("file.txt")).await.unwrap(), Some(EntryKind::File));
        assert_eq!(fs.stat(&dir.path().join("nothing")).await.unwrap(), None);
        assert_eq!(fs.stat(&dir.path().join("file.txt/below")).await.unwrap(), None);
        assert_eq!(&fs.read(&dir.path().join("file.txt")).await.unwrap()[..], b"hello");
    }
}
