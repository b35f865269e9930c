//! Remote retrieval of source archives.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use futures_util::StreamExt;
use thiserror::Error;

use citesource_core::PaperId;

use crate::store::ArchiveStore;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Upstream { url: String, status: u16 },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a fetch produced, when it did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The archive is now in the store.
    Fetched { bytes: u64 },
    /// The remote has no archive for this identifier.
    NotFound { url: String },
}

/// Somewhere source archives can be downloaded from.
///
/// On success the implementation leaves the complete archive in `store`.
pub trait ArchiveSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch<'a>(
        &'a self,
        id: &'a PaperId,
        store: &'a ArchiveStore,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutcome, FetchError>> + Send + 'a>>;
}

/// `GET <base_url>/e-print/<id>`, streamed into the store.
pub struct HttpArchiveSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArchiveSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, id: &PaperId) -> String {
        format!("{}/e-print/{}", self.base_url, id.raw())
    }
}

impl ArchiveSource for HttpArchiveSource {
    fn name(&self) -> &str {
        "arXiv e-print"
    }

    fn fetch<'a>(
        &'a self,
        id: &'a PaperId,
        store: &'a ArchiveStore,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutcome, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url_for(id);
            tracing::debug!(url = %url, "downloading source archive");

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|source| FetchError::Transport {
                    url: url.clone(),
                    source,
                })?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(FetchOutcome::NotFound { url });
            }
            if !status.is_success() {
                return Err(FetchError::Upstream {
                    url,
                    status: status.as_u16(),
                });
            }

            // Stream into a temp file; it is only renamed into place once complete.
            let mut tmp = store.temp_file()?;
            let mut stream = response.bytes_stream();
            let mut bytes: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|source| FetchError::Transport {
                    url: url.clone(),
                    source,
                })?;
                tmp.write_all(&chunk)?;
                bytes += chunk.len() as u64;
            }
            tmp.flush()?;
            let path = store.commit(id, tmp)?;
            tracing::debug!(path = %path.display(), bytes, "archive stored");

            Ok(FetchOutcome::Fetched { bytes })
        })
    }
}
