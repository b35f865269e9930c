//! Paper identifiers and arXiv cross-reference enrichment.
//!
//! A [`PaperId`] keeps the identifier exactly as requested (`raw`) and derives
//! the filesystem/cache key from it (`normalized`). Enrichment scans a
//! bibliography entry's `journal`, `doi` and `eprint` fields, in that order,
//! for a new-style arXiv identifier (`dddd.ddddd`).

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{BibliographyEntry, CoreError, IdSource, Reference};

/// An arXiv paper identifier such as `2402.00898` or `hep-th/9901001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperId {
    raw: String,
}

impl PaperId {
    pub fn new(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidId(raw.to_string()));
        }
        // `_` stands in for `/` in the normalized form, so it is never valid raw.
        let valid = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '/'));
        if !valid || trimmed.contains("..") {
            return Err(CoreError::InvalidId(raw.to_string()));
        }
        Ok(Self {
            raw: trimmed.to_string(),
        })
    }

    /// The identifier as requested, used in remote URLs.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Filesystem and cache key: dots removed, slashes replaced by `_`.
    pub fn normalized(&self) -> String {
        normalize_id(&self.raw)
    }
}

/// Normalize an identifier string. Idempotent.
pub fn normalize_id(raw: &str) -> String {
    raw.chars()
        .filter(|&c| c != '.')
        .map(|c| if c == '/' { '_' } else { c })
        .collect()
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PaperId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PaperId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PaperId> for String {
    fn from(id: PaperId) -> Self {
        id.raw
    }
}

/// Find an arXiv identifier in the entry's metadata.
///
/// `journal` is checked first, then `doi`, then `eprint`; the first hit wins.
pub fn extract_arxiv_id(entry: &BibliographyEntry) -> Option<(String, IdSource)> {
    static JOURNAL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"arxiv:\s*(\d{4})\.(\d{5})").unwrap());
    static DOI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"arxiv\.(\d{4})\.(\d{5})").unwrap());
    static EPRINT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})\.(\d{5})$").unwrap());

    let checks: [(&str, &Lazy<Regex>, IdSource); 3] = [
        ("journal", &JOURNAL_RE, IdSource::Journal),
        ("doi", &DOI_RE, IdSource::Doi),
        ("eprint", &EPRINT_RE, IdSource::Eprint),
    ];

    for (field, re, source) in checks {
        let Some(value) = entry.field(field) else {
            continue;
        };
        let lower = value.trim().to_lowercase();
        if let Some(caps) = re.captures(&lower) {
            return Some((format!("{}.{}", &caps[1], &caps[2]), source));
        }
    }
    None
}

/// Publication date implied by a `yymm.nnnnn` identifier, in the current century.
pub fn published_date(arxiv_id: &str) -> Option<NaiveDate> {
    published_date_in(arxiv_id, chrono::Local::now().year())
}

/// Like [`published_date`], with the reference year supplying the century.
pub fn published_date_in(arxiv_id: &str, reference_year: i32) -> Option<NaiveDate> {
    let digits = arxiv_id.get(..4)?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let yy: i32 = digits[..2].parse().ok()?;
    let month: u32 = digits[2..].parse().ok()?;
    let year = (reference_year / 100) * 100 + yy;
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Turn a matched bibliography entry into a [`Reference`] at `index`.
pub fn enrich_entry(entry: BibliographyEntry, index: usize) -> Reference {
    let found = extract_arxiv_id(&entry);
    let published = found.as_ref().and_then(|(id, _)| published_date(id));
    if let Some((id, source)) = &found {
        tracing::debug!(key = %entry.key, arxiv_id = %id, ?source, "enriched reference");
    }
    let (arxiv_id, arxiv_id_source) = match found {
        Some((id, source)) => (Some(id), Some(source)),
        None => (None, None),
    };
    Reference {
        index,
        key: entry.key,
        entry_type: entry.entry_type,
        arxiv_id,
        arxiv_id_source,
        published,
        fields: entry.fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(fields: &[(&str, &str)]) -> BibliographyEntry {
        BibliographyEntry {
            key: "k".into(),
            entry_type: "article".into(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn paper_id_trims_and_normalizes() {
        let id = PaperId::new("  2402.00898 ").unwrap();
        assert_eq!(id.raw(), "2402.00898");
        assert_eq!(id.normalized(), "240200898");
        assert_eq!(normalize_id(&id.normalized()), id.normalized());
    }

    #[test]
    fn paper_id_old_style() {
        let id: PaperId = "hep-th/9901001".parse().unwrap();
        assert_eq!(id.normalized(), "hep-th_9901001");
    }

    #[test]
    fn paper_id_rejects_bad_input() {
        assert!(PaperId::new("").is_err());
        assert!(PaperId::new("   ").is_err());
        assert!(PaperId::new("../etc/passwd").is_err());
        assert!(PaperId::new("2402 00898").is_err());
        assert!(PaperId::new("hep-th_9901001").is_err());
    }

    #[test]
    fn distinct_ids_have_distinct_keys() {
        let ids = [
            "2402.00898",
            "2402.00898v2",
            "0704.0001",
            "hep-th/9901001",
            "hep-th/9901001v3",
            "hep-th9901001",
            "math.GT/0309136",
        ];
        let keys: std::collections::HashSet<String> = ids
            .iter()
            .map(|raw| PaperId::new(raw).unwrap().normalized())
            .collect();
        assert_eq!(keys.len(), ids.len());
    }

    #[test]
    fn paper_id_serde_transparent() {
        let id = PaperId::new("2402.00898").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"2402.00898\"");
        let back: PaperId = serde_json::from_str("\"2402.00898\"").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<PaperId>("\"\"").is_err());
    }

    #[test]
    fn journal_field() {
        let e = entry(&[("journal", "arXiv preprint arXiv:2106.01345")]);
        assert_eq!(
            extract_arxiv_id(&e),
            Some(("2106.01345".into(), IdSource::Journal))
        );
    }

    #[test]
    fn doi_field() {
        let e = entry(&[("doi", "10.48550/arXiv.2303.08774")]);
        assert_eq!(extract_arxiv_id(&e), Some(("2303.08774".into(), IdSource::Doi)));
    }

    #[test]
    fn eprint_must_match_whole_field() {
        let e = entry(&[("eprint", "2201.11903")]);
        assert_eq!(
            extract_arxiv_id(&e),
            Some(("2201.11903".into(), IdSource::Eprint))
        );
        let e = entry(&[("eprint", "see 2201.11903")]);
        assert_eq!(extract_arxiv_id(&e), None);
    }

    #[test]
    fn journal_wins_over_doi_and_eprint() {
        let e = entry(&[
            ("journal", "arXiv:1111.11111"),
            ("doi", "10.48550/arXiv.2222.22222"),
            ("eprint", "3333.33333"),
        ]);
        assert_eq!(
            extract_arxiv_id(&e),
            Some(("1111.11111".into(), IdSource::Journal))
        );

        let e = entry(&[
            ("journal", "Nature"),
            ("doi", "10.48550/arXiv.2222.22222"),
            ("eprint", "3333.33333"),
        ]);
        assert_eq!(extract_arxiv_id(&e), Some(("2222.22222".into(), IdSource::Doi)));
    }

    #[test]
    fn no_identifier_is_not_an_error() {
        let e = entry(&[("journal", "Nature"), ("title", "Something")]);
        assert_eq!(extract_arxiv_id(&e), None);
        let r = enrich_entry(e, 3);
        assert_eq!(r.index, 3);
        assert!(r.arxiv_id.is_none());
        assert!(r.published.is_none());
        assert_eq!(r.title(), Some("Something"));
    }

    #[test]
    fn date_from_identifier() {
        assert_eq!(
            published_date_in("2106.01345", 2026),
            NaiveDate::from_ymd_opt(2021, 6, 1)
        );
        assert_eq!(published_date_in("2113.01345", 2026), None);
        assert_eq!(published_date_in("2100.01345", 2026), None);
        assert_eq!(published_date_in("ab", 2026), None);
    }

    #[test]
    fn enrich_sets_date_and_source() {
        let e = entry(&[("eprint", "1706.03762")]);
        let r = enrich_entry(e, 1);
        assert_eq!(r.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(r.arxiv_id_source, Some(IdSource::Eprint));
        let date = r.published.unwrap();
        assert_eq!((date.year() % 100, date.month(), date.day()), (17, 6, 1));
    }
}
