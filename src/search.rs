//! Paged access to the TIND search interface
//!
//! The search URL is whatever a user would type into a browser. Each page
//! request rewrites it to ask for MARCXML (`of=xm`), a page size (`rg`),
//! and a 1-based start offset (`jrec`). It also drops any `ot` output-tag
//! filter, which yields records without the fields we need.

use crate::config::{EngineConfig, COURTESY_DELAY};
use crate::error::{Result, TurfError};
use crate::marc::{parse_batch, Batch};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, LOCATION, USER_AGENT};
use reqwest::{redirect, Client, StatusCode};
use std::time::Instant;
use tracing::debug;
use url::Url;

const FORMAT_PARAM: &str = "of";
const FORMAT_MARCXML: &str = "xm";
const SIZE_PARAM: &str = "rg";
const OFFSET_PARAM: &str = "jrec";
const TAG_FILTER_PARAM: &str = "ot";

/// A user-supplied search URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    url: Url,
}

impl SearchQuery {
    pub fn parse(search: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(search.trim())?,
        })
    }

    /// URL for one page of MARCXML results.
    pub fn page(&self, offset: usize, size: usize) -> Url {
        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| {
                ![FORMAT_PARAM, SIZE_PARAM, OFFSET_PARAM, TAG_FILTER_PARAM].contains(&&**k)
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut url = self.url.clone();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(FORMAT_PARAM, FORMAT_MARCXML)
            .append_pair(SIZE_PARAM, &size.to_string())
            .append_pair(OFFSET_PARAM, &offset.max(1).to_string());
        url
    }
}

impl std::fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Fetches pages of search results one at a time
pub struct SearchPager {
    client: Client,
    last_fetch: Option<Instant>,
}

impl SearchPager {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/xml, text/xml"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("turf/", env!("CARGO_PKG_VERSION"))),
        );

        // A redirect from the search endpoint means the session is gone;
        // it has to surface instead of being followed.
        let client = Client::builder()
            .default_headers(headers)
            .redirect(redirect::Policy::none())
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            last_fetch: None,
        })
    }

    /// Fetch one page. `Ok(None)` means there are no more pages.
    pub async fn fetch(&mut self, query: &SearchQuery, offset: usize, size: usize) -> Result<Option<Batch>> {
        if let Some(last) = self.last_fetch {
            let elapsed = last.elapsed();
            if elapsed < COURTESY_DELAY {
                tokio::time::sleep(COURTESY_DELAY - elapsed).await;
            }
        }

        let url = query.page(offset, size);
        debug!(%url, "fetching search page");

        let response = self.client.get(url).send().await;
        self.last_fetch = Some(Instant::now());
        let response = response?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::ACCEPTED => {
                let body = response.text().await?;
                Ok(Some(parse_batch(&body)?))
            }
            s if s.is_redirection() => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("(no location)")
                    .to_string();
                Err(TurfError::SessionRedirect {
                    status: s.as_u16(),
                    location,
                })
            }
            s => {
                debug!(status = s.as_u16(), "search returned no page");
                Ok(None)
            }
        }
    }
}
