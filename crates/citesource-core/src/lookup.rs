//! Best-effort arXiv identifier lookup by title.
//!
//! Used for references whose bibliography entry carries no arXiv identifier.
//! A failed lookup is never fatal: callers log it and leave the identifier unset.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::CoreError;
use crate::matching::{query_words, titles_match};

/// Guess an arXiv identifier for a reference from its title.
pub trait IdentifierLookup: Send + Sync {
    fn name(&self) -> &str;

    fn lookup<'a>(
        &'a self,
        title: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, CoreError>> + Send + 'a>>;
}

/// Queries the arXiv Atom API with a title search.
pub struct ArxivTitleLookup {
    client: reqwest::Client,
    api_url: String,
    timeout: Duration,
}

impl ArxivTitleLookup {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            timeout,
        }
    }
}

impl IdentifierLookup for ArxivTitleLookup {
    fn name(&self) -> &str {
        "arXiv"
    }

    fn lookup<'a>(
        &'a self,
        title: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, CoreError>> + Send + 'a>> {
        Box::pin(async move {
            let words = query_words(title, 8);
            if words.is_empty() {
                return Ok(None);
            }
            let query = format!("ti:\"{}\"", words.join(" "));
            let url = format!(
                "{}?search_query={}&start=0&max_results=5",
                self.api_url,
                urlencoding::encode(&query)
            );

            let resp = self.client.get(&url).timeout(self.timeout).send().await?;
            if !resp.status().is_success() {
                return Err(CoreError::Response(format!(
                    "arXiv API returned HTTP {}",
                    resp.status()
                )));
            }
            let body = resp.text().await?;
            let found = parse_atom_feed(&body, title)?;
            tracing::debug!(title, found = ?found, "arXiv title lookup");
            Ok(found)
        })
    }
}

/// Identifier from an Atom `<id>` URL: `http://arxiv.org/abs/2106.01345v2` → `2106.01345`.
fn id_from_abs_url(url: &str) -> Option<String> {
    static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());
    let (_, tail) = url.trim().split_once("/abs/")?;
    let id = VERSION_RE.replace(tail, "");
    (!id.is_empty()).then(|| id.into_owned())
}

/// First entry of an Atom feed whose title matches `title`.
fn parse_atom_feed(xml: &str, title: &str) -> Result<Option<String>, CoreError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);

    let mut in_entry = false;
    let mut in_title = false;
    let mut in_id = false;

    let mut current_title = String::new();
    let mut current_id = String::new();

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"entry" => {
                    in_entry = true;
                    current_title.clear();
                    current_id.clear();
                }
                b"title" if in_entry => in_title = true,
                b"id" if in_entry => in_id = true,
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default();
                if in_title {
                    current_title.push_str(&text);
                } else if in_id {
                    current_id.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if titles_match(title, current_title.trim())
                        && let Some(id) = id_from_abs_url(&current_id)
                    {
                        return Ok(Some(id));
                    }
                    in_entry = false;
                }
                b"title" => in_title = false,
                b"id" => in_id = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(CoreError::Response(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(None)
}
