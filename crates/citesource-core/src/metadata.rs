//! Paper title and abstract, scraped from the arXiv abstract page.
//!
//! Results are stored as `<metadata_dir>/<normalized-id>.json`; a stored file
//! short-circuits the request.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Config, CoreError, PaperId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

pub trait MetadataSource: Send + Sync {
    fn get_metadata<'a>(
        &'a self,
        id: &'a PaperId,
    ) -> Pin<Box<dyn Future<Output = Result<PaperMetadata, CoreError>> + Send + 'a>>;
}

pub struct AbsPageMetadata {
    client: reqwest::Client,
    base_url: String,
    store_dir: PathBuf,
    timeout: Duration,
}

impl AbsPageMetadata {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        store_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            store_dir: store_dir.into(),
            timeout,
        }
    }

    /// Build a source from the runtime config's base URL, store dir and client settings.
    pub fn from_config(config: &Config) -> Result<Self, CoreError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::new(
            client,
            config.base_url.clone(),
            config.metadata_dir.clone(),
            timeout,
        ))
    }

    fn stored_path(&self, id: &PaperId) -> PathBuf {
        self.store_dir.join(format!("{}.json", id.normalized()))
    }

    async fn fetch(&self, id: &PaperId) -> Result<PaperMetadata, CoreError> {
        let url = format!("{}/abs/{}", self.base_url, id.raw());
        tracing::debug!(url = %url, "fetching abstract page");
        let resp = self.client.get(&url).timeout(self.timeout).send().await?;
        if !resp.status().is_success() {
            return Err(CoreError::Response(format!(
                "{} returned HTTP {}",
                url,
                resp.status()
            )));
        }
        let html = resp.text().await?;
        Ok(parse_abs_page(&html, id))
    }
}

impl MetadataSource for AbsPageMetadata {
    fn get_metadata<'a>(
        &'a self,
        id: &'a PaperId,
    ) -> Pin<Box<dyn Future<Output = Result<PaperMetadata, CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.stored_path(id);
            if let Some(stored) = read_stored(&path).await {
                tracing::trace!(paper_id = %id, "metadata store hit");
                return Ok(stored);
            }

            let metadata = self.fetch(id).await?;
            tokio::fs::create_dir_all(&self.store_dir).await?;
            tokio::fs::write(&path, serde_json::to_vec_pretty(&metadata)?).await?;
            Ok(metadata)
        })
    }
}

async fn read_stored(path: &Path) -> Option<PaperMetadata> {
    let content = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&content) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt metadata file");
            None
        }
    }
}

/// Extract the title (without the `[id]` prefix) and the abstract text.
fn parse_abs_page(html: &str, id: &PaperId) -> PaperMetadata {
    let document = scraper::Html::parse_document(html);
    let title_sel = scraper::Selector::parse("title").unwrap();
    let abstract_sel = scraper::Selector::parse("blockquote.abstract").unwrap();

    let collapse = |s: String| s.split_whitespace().collect::<Vec<_>>().join(" ");

    let raw_title = document
        .select(&title_sel)
        .next()
        .map(|el| collapse(el.text().collect()))
        .unwrap_or_default();
    let title = match raw_title.strip_prefix('[') {
        Some(rest) => rest
            .split_once("] ")
            .map(|(_, t)| t.to_string())
            .unwrap_or(raw_title.clone()),
        None => raw_title,
    };

    let abstract_text = document
        .select(&abstract_sel)
        .next()
        .map(|el| collapse(el.text().collect()))
        .unwrap_or_default();
    let abstract_text = abstract_text
        .strip_prefix("Abstract:")
        .map(|s| s.trim().to_string())
        .unwrap_or(abstract_text);

    PaperMetadata {
        id: id.raw().to_string(),
        title,
        abstract_text,
    }
}
