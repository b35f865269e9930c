use std::io::{Cursor, Read};
use std::path::{Component, Path};

use tar::{Archive, EntryType};

use citesource_core::RunLog;

use crate::classify::PackageKind;

/// Counts from one extraction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files: usize,
    /// Entry names that were refused or skipped.
    pub rejected: Vec<String>,
}

/// True when `path` stays inside the directory it is joined to.
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Extract a tar or zip package into `dest`.
///
/// Entries that would land outside `dest` (absolute paths, `..`, links) are
/// skipped and logged. Device files, FIFOs and unreadable archives abort the
/// extraction with an error message.
pub fn extract_package(
    kind: PackageKind,
    data: &[u8],
    dest: &Path,
    log: &mut RunLog,
) -> Result<ExtractionSummary, String> {
    let summary = match kind {
        PackageKind::Tar => extract_from_tar(data, dest, log)?,
        PackageKind::Zip => extract_from_zip(data, dest, log)?,
    };
    log.log(format!(
        "Extracted {} files ({} skipped)",
        summary.files,
        summary.rejected.len()
    ));
    Ok(summary)
}

fn reject(summary: &mut ExtractionSummary, log: &mut RunLog, name: String, reason: &str) {
    log.warn(format!("Skipping archive entry {}: {}", name, reason));
    summary.rejected.push(name);
}

fn extract_from_tar(
    data: &[u8],
    dest: &Path,
    log: &mut RunLog,
) -> Result<ExtractionSummary, String> {
    let mut archive = Archive::new(Cursor::new(data));
    let entries = archive
        .entries()
        .map_err(|e| format!("Failed to read tar: {}", e))?;

    let mut summary = ExtractionSummary::default();

    for entry in entries {
        let mut entry = entry.map_err(|e| format!("Failed to read tar entry: {}", e))?;

        let path = entry
            .path()
            .map_err(|e| format!("Failed to read entry path: {}", e))?
            .to_path_buf();
        let name = path.to_string_lossy().to_string();
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::Regular
            | EntryType::Continuous
            | EntryType::GNUSparse
            | EntryType::Directory => {}
            EntryType::Symlink | EntryType::Link => {
                reject(&mut summary, log, name, "links are not extracted");
                continue;
            }
            EntryType::XGlobalHeader => continue,
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                return Err(format!("Unsupported special file in archive: {}", name));
            }
            other => {
                return Err(format!(
                    "Unsupported tar entry type {:?} for {}",
                    other, name
                ));
            }
        }

        if !is_contained(&path) {
            reject(&mut summary, log, name, "path escapes the workspace");
            continue;
        }

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| format!("Failed to extract {}: {}", name, e))?;
        if !unpacked {
            reject(&mut summary, log, name, "path escapes the workspace");
            continue;
        }
        if !entry_type.is_dir() {
            summary.files += 1;
        }
    }

    Ok(summary)
}

fn extract_from_zip(
    data: &[u8],
    dest: &Path,
    log: &mut RunLog,
) -> Result<ExtractionSummary, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| format!("Failed to open ZIP: {}", e))?;

    let mut summary = ExtractionSummary::default();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| format!("Failed to read ZIP entry: {}", e))?;
        let name = file.name().to_string();

        if file.is_symlink() {
            reject(&mut summary, log, name, "links are not extracted");
            continue;
        }
        let rel = match file.enclosed_name() {
            Some(p) if is_contained(&p) => p,
            _ => {
                reject(&mut summary, log, name, "path escapes the workspace");
                continue;
            }
        };
        let out_path = dest.join(&rel);

        if file.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| format!("Failed to create {}: {}", name, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| format!("Failed to extract {}: {}", name, e))?;
        std::fs::write(&out_path, &buf)
            .map_err(|e| format!("Failed to write {}: {}", out_path.display(), e))?;
        summary.files += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data).unwrap();
    }

    /// Write `name` straight into the header bytes, bypassing the builder's path checks.
    fn append_raw_name(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_old();
        {
            let bytes = header.as_old_mut();
            bytes.name[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }

    #[test]
    fn tar_extracts_nested_files() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "main.tex", b"\\cite{a}");
        append(&mut builder, "sections/intro.tex", b"\\cite{b}");
        append(&mut builder, "refs.bib", b"@misc{a, title={A}}");
        let data = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new();
        let summary = extract_package(PackageKind::Tar, &data, dir.path(), &mut log).unwrap();
        assert_eq!(summary.files, 3);
        assert!(summary.rejected.is_empty());
        assert_eq!(
            std::fs::read(dir.path().join("sections/intro.tex")).unwrap(),
            b"\\cite{b}"
        );
    }

    #[test]
    fn tar_rejects_escaping_paths() {
        let mut builder = tar::Builder::new(Vec::new());
        append_raw_name(&mut builder, "../evil.tex", b"x");
        append_raw_name(&mut builder, "/abs/evil.tex", b"x");
        append(&mut builder, "ok.tex", b"fine");
        let data = builder.into_inner().unwrap();

        let outer = tempfile::tempdir().unwrap();
        let dest = outer.path().join("ws");
        std::fs::create_dir(&dest).unwrap();
        let mut log = RunLog::new();
        let summary = extract_package(PackageKind::Tar, &data, &dest, &mut log).unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.rejected.len(), 2);
        assert!(!outer.path().join("evil.tex").exists());
        assert!(!dest.join("abs/evil.tex").exists());
        assert!(dest.join("ok.tex").exists());
        assert!(log.lines().iter().any(|l| l.contains("../evil.tex")));
    }

    #[test]
    fn tar_skips_symlinks() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder
            .append_link(&mut header, "link.bib", "/etc/passwd")
            .unwrap();
        append(&mut builder, "main.tex", b"x");
        let data = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new();
        let summary = extract_package(PackageKind::Tar, &data, dir.path(), &mut log).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.rejected, vec!["link.bib"]);
        assert!(std::fs::symlink_metadata(dir.path().join("link.bib")).is_err());
    }

    #[test]
    fn tar_device_entry_is_fatal() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "main.tex", b"x");
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Char);
        header.set_size(0);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "dev/tty0", std::io::empty())
            .unwrap();
        let data = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new();
        let err = extract_package(PackageKind::Tar, &data, dir.path(), &mut log).unwrap_err();
        assert!(err.contains("dev/tty0"));
    }

    #[test]
    fn zip_extracts_and_rejects_traversal() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("sub/", options).unwrap();
        writer.start_file("sub/paper.tex", options).unwrap();
        writer.write_all(b"\\cite{k}").unwrap();
        writer.start_file("../escape.bib", options).unwrap();
        writer.write_all(b"@misc{k}").unwrap();
        let data = writer.finish().unwrap().into_inner();

        let outer = tempfile::tempdir().unwrap();
        let dest = outer.path().join("ws");
        std::fs::create_dir(&dest).unwrap();
        let mut log = RunLog::new();
        let summary = extract_package(PackageKind::Zip, &data, &dest, &mut log).unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.rejected, vec!["../escape.bib"]);
        assert!(dest.join("sub/paper.tex").exists());
        assert!(!outer.path().join("escape.bib").exists());
    }

    #[test]
    fn truncated_tar_is_an_error() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "main.tex", &[b'x'; 2048]);
        let mut data = builder.into_inner().unwrap();
        data.truncate(1024);

        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new();
        assert!(extract_package(PackageKind::Tar, &data, dir.path(), &mut log).is_err());
    }
}
