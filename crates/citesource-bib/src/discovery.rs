use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Every regular file under `root` whose extension equals `ext` (case-insensitive).
///
/// Directory entries are visited in file-name order, so the result is stable
/// across runs. Symlinks are not followed; unreadable entries are skipped.
pub fn find_files_by_extension(root: &Path, ext: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        })
        .map(|entry| entry.into_path())
        .collect()
}
