//! Structural archive detection.
//!
//! Formats are recognized by parsing, not by name: a tar archive must yield a
//! first header with a valid checksum, a zip archive must have a readable
//! central directory. Anything else that is gzip-wrapped is decompressed once
//! and tested again.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;

use citesource_core::{PaperId, ResolveFailure, RunLog};

use crate::store::ArchiveStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Tar,
    Zip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Directly extractable.
    Package(PackageKind),
    /// A gzip stream that may contain a package.
    CompressedWrapper,
    /// Neither; the description names what the bytes look like.
    Unrecognized(String),
}

pub fn detect_package(data: &[u8]) -> Option<PackageKind> {
    if is_tar(data) {
        Some(PackageKind::Tar)
    } else if is_zip(data) {
        Some(PackageKind::Zip)
    } else {
        None
    }
}

fn is_tar(data: &[u8]) -> bool {
    if data.len() < 512 {
        return false;
    }
    let mut archive = tar::Archive::new(Cursor::new(data));
    match archive.entries() {
        Ok(mut entries) => matches!(entries.next(), Some(Ok(_))),
        Err(_) => false,
    }
}

fn is_zip(data: &[u8]) -> bool {
    data.starts_with(b"PK") && zip::ZipArchive::new(Cursor::new(data)).is_ok()
}

fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&[0x1f, 0x8b])
}

pub fn classify(data: &[u8]) -> ArchiveFormat {
    match detect_package(data) {
        Some(kind) => ArchiveFormat::Package(kind),
        None if is_gzip(data) => ArchiveFormat::CompressedWrapper,
        None => ArchiveFormat::Unrecognized(describe_bytes(data)),
    }
}

pub fn decompress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// A short `file(1)`-style description of a byte payload.
pub fn describe_bytes(data: &[u8]) -> String {
    const MAGIC: &[(&[u8], &str)] = &[
        (b"%PDF-", "PDF document"),
        (&[0x1f, 0x8b], "gzip compressed data"),
        (b"BZh", "bzip2 compressed data"),
        (&[0xfd, b'7', b'z', b'X', b'Z', 0x00], "XZ compressed data"),
        (&[0x28, 0xb5, 0x2f, 0xfd], "Zstandard compressed data"),
        (b"7z\xbc\xaf\x27\x1c", "7-zip archive data"),
        (b"PK\x03\x04", "Zip archive data"),
        (b"%!PS", "PostScript document"),
        (b"\x89PNG", "PNG image data"),
        (b"<!DOCTYPE html", "HTML document"),
        (b"<html", "HTML document"),
    ];

    if data.is_empty() {
        return "empty".to_string();
    }
    if let Some((_, name)) = MAGIC.iter().find(|(magic, _)| data.starts_with(magic)) {
        return name.to_string();
    }

    let head = &data[..data.len().min(8192)];
    let encoding = if head.is_ascii() {
        "ASCII text"
    } else if std::str::from_utf8(head).is_ok() {
        "UTF-8 Unicode text"
    } else {
        return "data".to_string();
    };
    if head.iter().any(|&b| b < 0x09 || (0x0e..0x20).contains(&b)) {
        return "data".to_string();
    }

    let text = String::from_utf8_lossy(head);
    let latex_markers = ["\\documentclass", "\\begin{document}", "\\section", "\\input{", "\\usepackage"];
    if latex_markers.iter().any(|m| text.contains(m)) {
        format!("LaTeX document, {}", encoding)
    } else {
        encoding.to_string()
    }
}

/// Get `id`'s stored archive into an extractable form.
///
/// A gzip wrapper is decompressed and the store file is replaced with the
/// decompressed bytes before testing again. Returns the package kind and its
/// bytes, or the failure to report when no package can be found.
pub fn prepare_package(
    store: &ArchiveStore,
    id: &PaperId,
    log: &mut RunLog,
) -> std::io::Result<Result<(PackageKind, Vec<u8>), ResolveFailure>> {
    let data = store.read(id)?;

    match classify(&data) {
        ArchiveFormat::Package(kind) => {
            tracing::debug!(paper_id = %id, ?kind, "archive is directly extractable");
            Ok(Ok((kind, data)))
        }
        ArchiveFormat::Unrecognized(file_type) => Ok(Err(unrecognized(file_type, log))),
        ArchiveFormat::CompressedWrapper => {
            let inner = match decompress_gzip(&data) {
                Ok(inner) => inner,
                Err(e) => {
                    log.warn(format!("Could not decompress archive: {}", e));
                    return Ok(Err(unrecognized(describe_bytes(&data), log)));
                }
            };
            log.log(format!(
                "Decompressed gzip wrapper ({} -> {} bytes)",
                data.len(),
                inner.len()
            ));
            store.write(id, &inner)?;

            match detect_package(&inner) {
                Some(kind) => Ok(Ok((kind, inner))),
                None => Ok(Err(unrecognized(describe_bytes(&inner), log))),
            }
        }
    }
}

fn unrecognized(file_type: String, log: &mut RunLog) -> ResolveFailure {
    let failure = ResolveFailure::UnrecognizedFormat { file_type };
    log.warn(failure.to_string());
    failure
}
