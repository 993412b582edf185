//! Content-addressed cache for rendered annotation images.

use crate::model::{ItemKey, LibraryId};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ImageCache {
    root: PathBuf,
}

impl ImageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, library: LibraryId, key: &ItemKey) -> PathBuf {
        self.root.join(format!("{}-{}.png", library.0, key))
    }

    /// Write `bytes` for the given annotation. Rewriting identical content
    /// is a no-op, so repeated saves of an unchanged image never touch disk.
    pub fn write(&self, library: LibraryId, key: &ItemKey, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.path_for(library, key);

        if file_matches(&path, bytes)? {
            return Ok(path);
        }

        fs::create_dir_all(&self.root)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

fn file_matches(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == bytes.len() as u64 => Ok(fs::read(path)? == bytes),
        Ok(_) => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_rewrite_identical_is_noop() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = ImageCache::new(temp.path());

        let key = ItemKey::new("ANNO1234");
        let path = cache.write(LibraryId(1), &key, b"png-bytes").expect("write should succeed");
        assert!(path.exists());

        let before = fs::metadata(&path).unwrap().modified().unwrap();
        let again = cache.write(LibraryId(1), &key, b"png-bytes").expect("rewrite should succeed");
        assert_eq!(path, again);
        let after = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn changed_content_replaces_file() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = ImageCache::new(temp.path());

        let key = ItemKey::new("ANNO1234");
        cache.write(LibraryId(1), &key, b"old").expect("write should succeed");
        cache.write(LibraryId(1), &key, b"new-bytes").expect("write should succeed");

        let stored = fs::read(cache.path_for(LibraryId(1), &key)).unwrap();
        assert_eq!(stored, b"new-bytes");
    }
}
