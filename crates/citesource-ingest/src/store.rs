use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use citesource_core::PaperId;

/// Downloaded source archives, one file per normalized identifier.
///
/// Files only ever appear complete: writers fill a temporary file in the
/// same directory and rename it into place.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &PaperId) -> PathBuf {
        self.dir.join(id.normalized())
    }

    pub fn contains(&self, id: &PaperId) -> bool {
        self.path_for(id).is_file()
    }

    pub fn read(&self, id: &PaperId) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_for(id))
    }

    /// A temporary file in the store directory, for streaming a download into.
    pub fn temp_file(&self) -> std::io::Result<NamedTempFile> {
        std::fs::create_dir_all(&self.dir)?;
        tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&self.dir)
    }

    /// Move a completed temporary file to `id`'s final path.
    pub fn commit(&self, id: &PaperId, tmp: NamedTempFile) -> std::io::Result<PathBuf> {
        let path = self.path_for(id);
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    /// Replace `id`'s archive with `data`.
    pub fn write(&self, id: &PaperId, data: &[u8]) -> std::io::Result<PathBuf> {
        let mut tmp = self.temp_file()?;
        tmp.write_all(data)?;
        tmp.flush()?;
        self.commit(id, tmp)
    }

    pub fn remove(&self, id: &PaperId) -> std::io::Result<bool> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path().join("source"));
        let id = PaperId::new("2402.00898").unwrap();

        assert!(!store.contains(&id));
        let path = store.write(&id, b"first").unwrap();
        assert_eq!(path, dir.path().join("source").join("240200898"));
        assert_eq!(store.read(&id).unwrap(), b"first");

        store.write(&id, b"second").unwrap();
        assert_eq!(store.read(&id).unwrap(), b"second");

        // No temporary files left behind
        let names: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["240200898"]);
    }

    #[test]
    fn remove_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let id = PaperId::new("1111.11111").unwrap();
        assert!(!store.remove(&id).unwrap());
        store.write(&id, b"x").unwrap();
        assert!(store.remove(&id).unwrap());
        assert!(!store.contains(&id));
    }

    #[test]
    fn dropped_temp_file_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        {
            let mut tmp = store.temp_file().unwrap();
            tmp.write_all(b"partial").unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
