use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod config_file;
pub mod identifiers;
pub mod lookup;
pub mod matching;
pub mod metadata;
pub mod runlog;

// Re-export for convenience
pub use cache::{CacheError, CachedReferences, ReferenceCache};
pub use identifiers::{PaperId, enrich_entry, extract_arxiv_id, published_date};
pub use lookup::{ArxivTitleLookup, IdentifierLookup};
pub use metadata::{AbsPageMetadata, MetadataSource, PaperMetadata};
pub use runlog::RunLog;

/// Default remote host serving `/e-print/<id>` and `/abs/<id>`.
pub const DEFAULT_BASE_URL: &str = "https://arxiv.org";

/// Default arXiv Atom API endpoint used by the title lookup.
pub const DEFAULT_LOOKUP_API_URL: &str = "http://export.arxiv.org/api/query";

/// Bibliography files larger than this are skipped (10 MiB).
pub const DEFAULT_MAX_BIB_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid paper identifier {0:?}")]
    InvalidId(String),
    #[error("unexpected response: {0}")]
    Response(String),
}

/// A record parsed from a `.bib` database: key, entry type and raw field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibliographyEntry {
    pub key: String,
    pub entry_type: String,
    pub fields: BTreeMap<String, String>,
}

impl BibliographyEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Which metadata field produced a reference's arXiv identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    Journal,
    Doi,
    Eprint,
    /// Guessed from the title by an [`IdentifierLookup`].
    Lookup,
}

/// A cited bibliography entry, enriched and ready to cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// 1-based position in bibliography file order.
    pub index: usize,
    pub key: String,
    pub entry_type: String,
    pub arxiv_id: Option<String>,
    pub arxiv_id_source: Option<IdSource>,
    pub published: Option<NaiveDate>,
    pub fields: BTreeMap<String, String>,
}

impl Reference {
    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").map(String::as_str)
    }

    pub fn author(&self) -> Option<&str> {
        self.fields.get("author").map(String::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.fields.get("url").map(String::as_str)
    }

    /// Attach an identifier found outside the entry itself.
    pub fn set_looked_up_id(&mut self, arxiv_id: String) {
        self.published = published_date(&arxiv_id);
        self.arxiv_id = Some(arxiv_id);
        self.arxiv_id_source = Some(IdSource::Lookup);
    }
}

/// Why a resolution run stopped without producing a reference list.
///
/// None of these are persisted; the next request re-runs the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolveFailure {
    #[error("Could not download arxiv archive: {url} returned 404")]
    ArchiveNotFound { url: String },
    #[error("Downloaded archive is not the correct type (file type: {file_type})")]
    UnrecognizedFormat { file_type: String },
    #[error("Could not extract archive: {message}")]
    Extraction { message: String },
    #[error("Could not find .bib file in source")]
    MissingBibliography,
}

/// Result of one resolution: the ordered references, or why there are none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(Vec<Reference>),
    Failed(ResolveFailure),
}

impl Resolution {
    pub fn references(&self) -> Option<&[Reference]> {
        match self {
            Resolution::Resolved(refs) => Some(refs),
            Resolution::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ResolveFailure> {
        match self {
            Resolution::Resolved(_) => None,
            Resolution::Failed(f) => Some(f),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Runtime configuration for the resolver and its collaborators.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for everything persisted between runs.
    pub data_dir: PathBuf,
    /// Archive store directory (one file per normalized identifier).
    pub source_dir: PathBuf,
    /// SQLite reference cache. `None` keeps the cache in memory only.
    pub cache_path: Option<PathBuf>,
    /// Paper metadata JSON store.
    pub metadata_dir: PathBuf,
    /// Parent directory for per-run workspaces; system temp dir when unset.
    pub workspace_dir: Option<PathBuf>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Size guard for `.bib` files, in bytes.
    pub max_bib_size: u64,
    pub lookup_enabled: bool,
    pub lookup_api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self::with_data_dir(data_dir)
    }
}

impl Config {
    /// Defaults with every persisted path rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            source_dir: data_dir.join("source"),
            cache_path: Some(data_dir.join("references.db")),
            metadata_dir: data_dir.join("papers"),
            workspace_dir: None,
            data_dir,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
            user_agent: format!("citesource/{}", env!("CARGO_PKG_VERSION")),
            max_bib_size: DEFAULT_MAX_BIB_SIZE,
            lookup_enabled: false,
            lookup_api_url: DEFAULT_LOOKUP_API_URL.to_string(),
        }
    }

    /// Apply the values present in a config file on top of these.
    pub fn apply_file(mut self, file: &config_file::ConfigFile) -> Self {
        if let Some(paths) = &file.paths {
            if let Some(dir) = &paths.data_dir {
                let rooted = Self::with_data_dir(PathBuf::from(dir));
                self.source_dir = rooted.source_dir;
                self.cache_path = rooted.cache_path;
                self.metadata_dir = rooted.metadata_dir;
                self.data_dir = rooted.data_dir;
            }
            if let Some(dir) = &paths.source_dir {
                self.source_dir = PathBuf::from(dir);
            }
            if let Some(path) = &paths.cache_path {
                self.cache_path = Some(PathBuf::from(path));
            }
            if let Some(dir) = &paths.workspace_dir {
                self.workspace_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(fetch) = &file.fetch {
            if let Some(url) = &fetch.base_url {
                self.base_url = url.trim_end_matches('/').to_string();
            }
            if let Some(secs) = fetch.timeout_secs {
                self.timeout_secs = secs;
            }
            if let Some(ua) = &fetch.user_agent {
                self.user_agent = ua.clone();
            }
        }
        if let Some(mb) = file.bibliography.as_ref().and_then(|b| b.max_size_mb) {
            self.max_bib_size = mb.saturating_mul(1024 * 1024);
        }
        if let Some(lookup) = &file.lookup {
            if let Some(enabled) = lookup.enabled {
                self.lookup_enabled = enabled;
            }
            if let Some(url) = &lookup.api_url {
                self.lookup_api_url = url.clone();
            }
        }
        self
    }
}

/// Platform data directory: `<data_dir>/citesource`, or `.citesource` in the CWD.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("citesource"))
        .unwrap_or_else(|| PathBuf::from(".citesource"))
}
