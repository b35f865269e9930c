//! The reference resolution pipeline.
//!
//! `cache → fetch → classify → extract → harvest keys → match .bib → enrich → cache`.
//! The network fetch and optional title lookups run on the async runtime; the
//! filesystem phase runs in one blocking task that owns the run's workspace.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use citesource_bib::{find_files_by_extension, harvest_citation_keys, match_bibliography_files};
use citesource_core::matching::strip_latex;
use citesource_core::{
    ArxivTitleLookup, CacheError, Config, IdentifierLookup, PaperId, Reference, ReferenceCache,
    Resolution, ResolveFailure, RunLog, enrich_entry,
};

use crate::archive::extract_package;
use crate::classify::prepare_package;
use crate::fetch::{ArchiveSource, FetchError, FetchOutcome, HttpArchiveSource};
use crate::store::ArchiveStore;
use crate::workspace::Workspace;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("upstream fault: {url} returned HTTP {status}")]
    Upstream { url: String, status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl From<FetchError> for PipelineError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Upstream { url, status } => PipelineError::Upstream { url, status },
            FetchError::Transport { .. } => PipelineError::Transport(e.to_string()),
            FetchError::Io(e) => PipelineError::Io(e),
        }
    }
}

/// A run that stopped on a fault, with the log it wrote up to that point.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ResolveError {
    #[source]
    pub error: PipelineError,
    pub log: RunLog,
}

impl ResolveError {
    fn new(error: impl Into<PipelineError>, mut log: RunLog) -> Self {
        let error = error.into();
        log.warn(format!("Pipeline fault: {}", error));
        Self { error, log }
    }
}

/// One resolution's result, its log, and whether it came from the cache.
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub resolution: Resolution,
    pub log: RunLog,
    pub from_cache: bool,
}

impl ResolveOutcome {
    fn failed(failure: ResolveFailure, log: RunLog) -> Self {
        Self {
            resolution: Resolution::Failed(failure),
            log,
            from_cache: false,
        }
    }
}

/// Drives the pipeline for paper identifiers.
pub struct Resolver {
    store: ArchiveStore,
    source: Arc<dyn ArchiveSource>,
    cache: Arc<ReferenceCache>,
    lookup: Option<Arc<dyn IdentifierLookup>>,
    workspace_dir: Option<PathBuf>,
    max_bib_size: u64,
}

impl Resolver {
    /// Build a resolver with the HTTP archive source and the configured cache.
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        let cache = match &config.cache_path {
            Some(path) => ReferenceCache::open(path)?,
            None => ReferenceCache::new(),
        };
        let lookup: Option<Arc<dyn IdentifierLookup>> = config.lookup_enabled.then(|| {
            Arc::new(ArxivTitleLookup::new(
                client.clone(),
                config.lookup_api_url.clone(),
                Duration::from_secs(config.timeout_secs),
            )) as Arc<dyn IdentifierLookup>
        });
        let source = Arc::new(HttpArchiveSource::new(client, config.base_url.clone()));

        Ok(Self::from_parts(config, source, Arc::new(cache), lookup))
    }

    pub fn from_parts(
        config: &Config,
        source: Arc<dyn ArchiveSource>,
        cache: Arc<ReferenceCache>,
        lookup: Option<Arc<dyn IdentifierLookup>>,
    ) -> Self {
        Self {
            store: ArchiveStore::new(config.source_dir.clone()),
            source,
            cache,
            lookup,
            workspace_dir: config.workspace_dir.clone(),
            max_bib_size: config.max_bib_size,
        }
    }

    pub fn cache(&self) -> &ReferenceCache {
        &self.cache
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Cached references for `id`, or run the pipeline and cache a success.
    pub async fn resolve(&self, id: &PaperId) -> Result<ResolveOutcome, ResolveError> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(ResolveOutcome {
                resolution: Resolution::Resolved(hit.references),
                log: hit.log,
                from_cache: true,
            });
        }
        self.resolve_fresh(id).await
    }

    /// Run the pipeline without consulting the cache; a success still replaces
    /// the cached record.
    pub async fn resolve_fresh(&self, id: &PaperId) -> Result<ResolveOutcome, ResolveError> {
        let mut log = RunLog::new();
        log.log(format!("Resolving references for {}", id));

        if self.store.contains(id) {
            log.log(format!("Using stored archive {}", self.store.path_for(id).display()));
        } else {
            log.log(format!("Downloading archive for {} ({})", id, self.source.name()));
            match self.source.fetch(id, &self.store).await {
                Ok(FetchOutcome::Fetched { bytes }) => {
                    log.log(format!("Downloaded {} bytes", bytes));
                }
                Ok(FetchOutcome::NotFound { url }) => {
                    let failure = ResolveFailure::ArchiveNotFound { url };
                    log.warn(failure.to_string());
                    return Ok(ResolveOutcome::failed(failure, log));
                }
                Err(e) => {
                    tracing::warn!(paper_id = %id, error = %e, "archive download failed");
                    return Err(ResolveError::new(e, log));
                }
            }
        }

        let job = SourceJob {
            store: self.store.clone(),
            id: id.clone(),
            workspace_dir: self.workspace_dir.clone(),
            max_bib_size: self.max_bib_size,
        };
        let before_job = log.clone();
        let (resolution, mut log) = match tokio::task::spawn_blocking(move || job.run(log)).await {
            Ok((Ok(resolution), log)) => (resolution, log),
            Ok((Err(e), log)) => return Err(ResolveError::new(e, log)),
            Err(e) => {
                return Err(ResolveError::new(
                    PipelineError::Task(e.to_string()),
                    before_job,
                ));
            }
        };

        let references = match resolution {
            Resolution::Resolved(references) => references,
            Resolution::Failed(failure) => return Ok(ResolveOutcome::failed(failure, log)),
        };
        let references = self.lookup_missing_ids(references, &mut log).await;

        if let Err(e) = self.cache.insert(id, references.clone(), log.clone()) {
            tracing::warn!(paper_id = %id, error = %e, "could not cache references");
        }

        Ok(ResolveOutcome {
            resolution: Resolution::Resolved(references),
            log,
            from_cache: false,
        })
    }

    async fn lookup_missing_ids(
        &self,
        mut references: Vec<Reference>,
        log: &mut RunLog,
    ) -> Vec<Reference> {
        let Some(lookup) = &self.lookup else {
            return references;
        };

        let mut found = 0usize;
        for reference in references.iter_mut().filter(|r| r.arxiv_id.is_none()) {
            let Some(title) = reference.title().map(strip_latex) else {
                continue;
            };
            match lookup.lookup(&title).await {
                Ok(Some(arxiv_id)) => {
                    tracing::debug!(key = %reference.key, arxiv_id = %arxiv_id, "identifier found by title");
                    reference.set_looked_up_id(arxiv_id);
                    found += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    log.warn(format!(
                        "{} lookup failed for {}: {}",
                        lookup.name(),
                        reference.key,
                        e
                    ));
                }
            }
        }
        log.log(format!("Title lookup found {} additional identifiers", found));
        references
    }
}

/// The filesystem phase of one run, moved into a blocking task.
struct SourceJob {
    store: ArchiveStore,
    id: PaperId,
    workspace_dir: Option<PathBuf>,
    max_bib_size: u64,
}

impl SourceJob {
    /// The log is returned on both paths so a fault keeps what was recorded.
    fn run(self, mut log: RunLog) -> (Result<Resolution, PipelineError>, RunLog) {
        let resolution = self.resolve_from_store(&mut log);
        (resolution, log)
    }

    fn resolve_from_store(&self, log: &mut RunLog) -> Result<Resolution, PipelineError> {
        let (kind, data) = match prepare_package(&self.store, &self.id, log)? {
            Ok(package) => package,
            Err(failure) => return Ok(Resolution::Failed(failure)),
        };

        // Dropped (and removed) on every return path below.
        let workspace = Workspace::new(self.workspace_dir.as_deref())?;

        if let Err(message) = extract_package(kind, &data, workspace.path(), log) {
            log.warn(format!("Extraction failed: {}", message));
            return Ok(Resolution::Failed(ResolveFailure::Extraction { message }));
        }

        let keys = harvest_citation_keys(workspace.path());
        log.log(format!("Found {} citations", keys.len()));

        let bib_files = find_files_by_extension(workspace.path(), "bib");
        if bib_files.is_empty() {
            let failure = ResolveFailure::MissingBibliography;
            log.warn(failure.to_string());
            return Ok(Resolution::Failed(failure));
        }
        log.log(format!("Found {} bibliography files", bib_files.len()));

        let matched =
            match_bibliography_files(&bib_files, workspace.path(), &keys, self.max_bib_size, log);
        let references: Vec<Reference> = matched
            .into_iter()
            .map(|m| enrich_entry(m.entry, m.index))
            .collect();
        let enriched = references.iter().filter(|r| r.arxiv_id.is_some()).count();
        log.log(format!(
            "Matched {} references ({} with arXiv identifiers)",
            references.len(),
            enriched
        ));

        Ok(Resolution::Resolved(references))
    }
}
