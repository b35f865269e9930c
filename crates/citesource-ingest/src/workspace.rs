use std::path::Path;

use tempfile::TempDir;

/// Exclusive extraction directory for one pipeline run.
///
/// Each workspace gets a fresh uniquely named directory, removed with
/// everything in it when the value is dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a workspace under `parent`, or under the system temp dir.
    pub fn new(parent: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("citesource-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        tracing::trace!(path = %dir.path().display(), "workspace created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting any failure.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_and_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let a = Workspace::new(Some(parent.path())).unwrap();
        let b = Workspace::new(Some(parent.path())).unwrap();
        assert_ne!(a.path(), b.path());

        std::fs::create_dir_all(a.path().join("nested")).unwrap();
        std::fs::write(a.path().join("nested/file.tex"), "x").unwrap();
        let a_path = a.path().to_path_buf();
        drop(a);
        assert!(!a_path.exists());

        b.close().unwrap();
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn removed_during_panic_unwind() {
        let parent = tempfile::tempdir().unwrap();
        let parent_path = parent.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let ws = Workspace::new(Some(&parent_path)).unwrap();
            std::fs::write(ws.path().join("main.tex"), "x").unwrap();
            panic!("mid-run fault");
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }
}
