//! BibTeX parsing and citation matching.
//!
//! `.bib` files are parsed with `biblatex`; entries not cited in the document
//! body are dropped, duplicates are dropped (the first file to define a key
//! wins), and survivors are numbered from 1 in file order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use biblatex::{Bibliography, Pair, RawBibliography, RawChunk, RawEntry, Spanned};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use citesource_core::{BibliographyEntry, RunLog};

pub mod citations;
pub mod discovery;

pub use citations::{CitationKeySet, extract_citation_keys, harvest_citation_keys};
pub use discovery::find_files_by_extension;

#[derive(Error, Debug)]
pub enum BibError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is {size} bytes, over the {limit} byte limit")]
    Oversized { size: u64, limit: u64 },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no BibTeX entries found")]
    NoEntries,
}

/// Fields kept as written instead of being resolved by `biblatex`.
///
/// `biblatex` follows `crossref`/`xdata` links recursively with no cycle check,
/// and a malformed `ids` field panics while the entry is inserted.
const LINK_FIELDS: &[&str] = &["crossref", "xdata", "ids"];

/// Entries parsed from one `.bib` file, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBibliography {
    pub entries: Vec<BibliographyEntry>,
    /// Keys kept with their raw field text because a value could not be
    /// resolved, usually an `@string` macro defined in another file.
    pub degraded: Vec<String>,
    /// Keys of entries whose source could not be parsed at all.
    pub dropped: Vec<String>,
}

/// Parse `.bib` content.
///
/// The whole file is read into raw entries first; if that fails, each `@entry`
/// is read on its own and the ones that parse are kept. Abbreviations are
/// resolved per entry, so one unresolvable field only degrades its own entry.
pub fn parse_bib_str(content: &str) -> Result<ParsedBibliography, BibError> {
    match RawBibliography::parse(content) {
        Ok(raw) => {
            let parsed = convert_raw(raw.entries, &raw.abbreviations);
            if parsed.entries.is_empty() && content.contains('@') {
                return Err(BibError::NoEntries);
            }
            Ok(parsed)
        }
        Err(e) => {
            tracing::debug!(error = %e, "whole-file parse failed, parsing entries individually");
            parse_entries_individually(content, &e.to_string())
        }
    }
}

/// Split `.bib` content at each `@type` line start and parse each piece.
///
/// `@string` definitions from every piece that parses are shared by all
/// entries, wherever they appear in the file.
fn parse_entries_individually(
    content: &str,
    whole_file_error: &str,
) -> Result<ParsedBibliography, BibError> {
    static ENTRY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*@[a-zA-Z]").unwrap());
    static KEY_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*@\s*[a-zA-Z]+\s*[{(]\s*([^,\s]+)").unwrap());

    let positions: Vec<usize> = ENTRY_RE.find_iter(content).map(|m| m.start()).collect();
    if positions.is_empty() {
        return Err(BibError::Parse(whole_file_error.to_string()));
    }

    let mut raw_entries = Vec::new();
    let mut abbreviations = Vec::new();
    let mut dropped = Vec::new();
    for (i, &start) in positions.iter().enumerate() {
        let end = positions.get(i + 1).copied().unwrap_or(content.len());
        let piece = &content[start..end];
        match RawBibliography::parse(piece) {
            Ok(raw) => {
                raw_entries.extend(raw.entries);
                abbreviations.extend(raw.abbreviations);
            }
            Err(_) => dropped.push(
                KEY_RE
                    .captures(piece)
                    .map(|caps| caps[1].to_string())
                    .unwrap_or_else(|| "(unnamed entry)".to_string()),
            ),
        }
    }

    let mut parsed = convert_raw(raw_entries, &abbreviations);
    if parsed.entries.is_empty() {
        return Err(BibError::Parse(whole_file_error.to_string()));
    }
    if !dropped.is_empty() {
        tracing::debug!(
            dropped = dropped.len(),
            recovered = parsed.entries.len(),
            "some BibTeX entries could not be parsed"
        );
    }
    parsed.dropped = dropped;
    Ok(parsed)
}

fn convert_raw<'s>(
    entries: Vec<Spanned<RawEntry<'s>>>,
    abbreviations: &[Pair<'s>],
) -> ParsedBibliography {
    let mut parsed = ParsedBibliography::default();

    for entry in entries {
        let RawEntry { key, kind, fields } = entry.v;
        let (links, fields): (Vec<Pair<'s>>, Vec<Pair<'s>>) = fields
            .into_iter()
            .partition(|pair| LINK_FIELDS.contains(&pair.key.v.to_ascii_lowercase().as_str()));

        let raw = RawEntry {
            key: key.clone(),
            kind: kind.clone(),
            fields: fields.clone(),
        };
        let mut converted = match resolve_entry(raw, abbreviations) {
            Some(converted) => converted,
            None => {
                tracing::debug!(key = key.v, "keeping raw field text for unresolvable entry");
                parsed.degraded.push(key.v.to_string());
                BibliographyEntry {
                    key: key.v.to_string(),
                    entry_type: kind.v.to_lowercase(),
                    fields: raw_fields(&fields),
                }
            }
        };
        converted.fields.extend(raw_fields(&links));
        parsed.entries.push(converted);
    }

    inherit_crossref_fields(&mut parsed.entries);
    parsed
}

/// Resolve one link-free entry against the file's abbreviations.
fn resolve_entry<'s>(
    entry: RawEntry<'s>,
    abbreviations: &[Pair<'s>],
) -> Option<BibliographyEntry> {
    let raw = RawBibliography {
        preamble: String::new(),
        entries: vec![Spanned::zero(entry)],
        abbreviations: abbreviations.to_vec(),
    };
    let bibliography = Bibliography::from_raw(raw).ok()?;
    bibliography.iter().next().map(convert_entry)
}

fn raw_fields(pairs: &[Pair<'_>]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|pair| {
            let value: String = pair
                .value
                .v
                .iter()
                .map(|chunk| match &chunk.v {
                    RawChunk::Normal(s) | RawChunk::Abbreviation(s) => *s,
                })
                .collect();
            (pair.key.v.to_ascii_lowercase(), value)
        })
        .collect()
}

/// Fill missing fields from the entry named by `crossref`, one level deep.
///
/// Parents contribute the fields they were written with, so link cycles end
/// after a single step.
fn inherit_crossref_fields(entries: &mut [BibliographyEntry]) {
    let wanted: HashSet<String> = entries
        .iter()
        .filter_map(|e| e.field("crossref"))
        .map(|k| k.trim().to_string())
        .collect();
    if wanted.is_empty() {
        return;
    }

    let mut parents: HashMap<String, BTreeMap<String, String>> = HashMap::new();
    for entry in entries.iter().filter(|e| wanted.contains(&e.key)) {
        parents
            .entry(entry.key.clone())
            .or_insert_with(|| entry.fields.clone());
    }

    for entry in entries.iter_mut() {
        let Some(parent) = entry
            .field("crossref")
            .and_then(|k| parents.get(k.trim()))
        else {
            continue;
        };
        for (name, value) in parent {
            if !LINK_FIELDS.contains(&name.as_str()) {
                entry
                    .fields
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }
}

fn convert_entry(entry: &biblatex::Entry) -> BibliographyEntry {
    let fields: BTreeMap<String, String> = entry
        .fields
        .iter()
        .map(|(name, chunks)| (name.to_lowercase(), chunks_to_string(chunks)))
        .collect();
    BibliographyEntry {
        key: entry.key.clone(),
        entry_type: entry.entry_type.to_string().to_lowercase(),
        fields,
    }
}

/// Convert biblatex chunks to a plain string.
fn chunks_to_string(chunks: &[biblatex::Spanned<biblatex::Chunk>]) -> String {
    chunks
        .iter()
        .map(|c| match &c.v {
            biblatex::Chunk::Normal(s) => s.as_str(),
            biblatex::Chunk::Verbatim(s) => s.as_str(),
            biblatex::Chunk::Math(s) => s.as_str(),
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Parse a `.bib` file, refusing files larger than `max_size` bytes.
pub fn parse_bib_file(path: &Path, max_size: u64) -> Result<ParsedBibliography, BibError> {
    let size = std::fs::metadata(path)?.len();
    if size > max_size {
        return Err(BibError::Oversized {
            size,
            limit: max_size,
        });
    }
    let bytes = std::fs::read(path)?;
    parse_bib_str(&String::from_utf8_lossy(&bytes))
}

/// A bibliography entry that survived matching, with its presentation index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    pub index: usize,
    pub entry: BibliographyEntry,
}

/// Filters entries to cited keys across any number of files.
///
/// Indexes start at 1 and continue across files; a key matched once is never
/// matched again.
#[derive(Debug)]
pub struct CitationMatcher<'a> {
    keys: &'a CitationKeySet,
    seen: HashSet<String>,
    next_index: usize,
}

impl<'a> CitationMatcher<'a> {
    pub fn new(keys: &'a CitationKeySet) -> Self {
        Self {
            keys,
            seen: HashSet::new(),
            next_index: 1,
        }
    }

    /// Keep the cited, not-yet-seen entries of one file, in file order.
    pub fn match_entries(&mut self, entries: Vec<BibliographyEntry>) -> Vec<IndexedEntry> {
        let mut matched = Vec::new();
        for entry in entries {
            if !self.keys.contains(&entry.key) || self.seen.contains(&entry.key) {
                continue;
            }
            self.seen.insert(entry.key.clone());
            matched.push(IndexedEntry {
                index: self.next_index,
                entry,
            });
            self.next_index += 1;
        }
        matched
    }

    pub fn matched_count(&self) -> usize {
        self.seen.len()
    }
}

/// Parse and match every file in `files`, in order.
///
/// Oversized and unparseable files are reported in `log` and contribute nothing.
pub fn match_bibliography_files(
    files: &[PathBuf],
    root: &Path,
    keys: &CitationKeySet,
    max_size: u64,
    log: &mut RunLog,
) -> Vec<IndexedEntry> {
    let mut matcher = CitationMatcher::new(keys);
    let mut matched = Vec::new();

    for path in files {
        let name = path.strip_prefix(root).unwrap_or(path).display().to_string();
        match parse_bib_file(path, max_size) {
            Ok(parsed) => {
                let total = parsed.entries.len();
                let kept = matcher.match_entries(parsed.entries);
                log.log(format!(
                    "Parsed {}: {} entries, {} cited",
                    name,
                    total,
                    kept.len()
                ));
                if !parsed.degraded.is_empty() {
                    log.warn(format!(
                        "{}: kept {} entries with unresolved fields ({})",
                        name,
                        parsed.degraded.len(),
                        parsed.degraded.join(", ")
                    ));
                }
                if !parsed.dropped.is_empty() {
                    log.warn(format!(
                        "{}: could not parse {} entries ({})",
                        name,
                        parsed.dropped.len(),
                        parsed.dropped.join(", ")
                    ));
                }
                matched.extend(kept);
            }
            Err(BibError::Oversized { size, limit }) => {
                log.warn(format!(
                    "Skipping {}: {:.1} MB exceeds the {:.1} MB limit",
                    name,
                    size as f64 / (1024.0 * 1024.0),
                    limit as f64 / (1024.0 * 1024.0)
                ));
            }
            Err(e) => {
                log.warn(format!("Could not parse {}: {}", name, e));
            }
        }
    }

    matched
}
