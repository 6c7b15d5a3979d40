//! Content-addressed, disk-resident object store: one file per distinct
//! digest under `<root>/objects/`. Append-only: a put of an already
//! present digest is a no-op, and nothing ever overwrites an existing
//! object.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::internals::{digest, ContentDigest, Result};

pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, hash: ContentDigest) -> PathBuf {
        self.root.join(hash.to_string())
    }

    /// Persists `bytes` under their content digest. No I/O if the object
    /// is already present.
    pub fn put(&self, bytes: &[u8]) -> Result<ContentDigest> {
        let hash = digest(bytes);

        if !self.has(hash) {
            write_atomic(&self.path_for(hash), bytes)?;
        }

        Ok(hash)
    }

    /// Reads the object named by `hash`, or `None` if it's absent.
    pub fn get(&self, hash: ContentDigest) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(hash)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn has(&self, hash: ContentDigest) -> bool {
        self.path_for(hash).exists()
    }
}

/// Writes `bytes` to `path` via a temp file in the same directory followed
/// by a rename, so concurrent readers never observe a partial write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        super::internals::Error::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "object path has no parent",
        ))
    })?;

    let tmp = tempfile_path(dir, path);
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;

    Ok(())
}

fn tempfile_path(dir: &Path, target: &Path) -> PathBuf {
    let pid = std::process::id();
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("object");
    dir.join(format!(".{}.{}.tmp", name, pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path()).unwrap();

        let hash = store.put(b"hello world").unwrap();
        assert_eq!(store.get(hash).unwrap().unwrap(), b"hello world");
    }

    #[test]
    fn put_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path()).unwrap();

        let h1 = store.put(b"same bytes").unwrap();
        let h2 = store.put(b"same bytes").unwrap();
        assert_eq!(h1, h2);

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path()).unwrap();
        let hash = digest(b"never stored");
        assert!(store.get(hash).unwrap().is_none());
    }
}
