//! URL resolution
//!
//! `Resolver` is the seam the engines call through. It must never fail:
//! every problem with a URL ends up in that URL's `ResolvedUrl::error`.
//! `HttpResolver` is the stock implementation built on reqwest.

use crate::config::VendorConfig;
use crate::schema::{ProxyCredential, ResolvedUrl};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{redirect, Client};
use std::time::Duration;
use tracing::debug;

const MAX_REDIRECTS: usize = 10;

/// Everything sent along with a resolution request
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub cookies: Option<String>,
    pub headers: Vec<(String, String)>,
    pub proxy: Option<ProxyCredential>,
}

impl ResolveContext {
    pub fn new(vendor: &VendorConfig, proxy: Option<ProxyCredential>) -> Self {
        Self {
            cookies: Some(vendor.session_cookie.clone()).filter(|c| !c.is_empty()),
            headers: Vec::new(),
            proxy,
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve each URL to its final destination. Returns exactly one
    /// entry per input, in input order.
    async fn resolve(&self, urls: &[String], ctx: &ResolveContext) -> Vec<ResolvedUrl>;
}

/// Follows redirects over HTTP
///
/// A proxy credential is sent as basic auth only on requests whose URL is
/// on the proxy host. Normalization strips the usual proxy prefix, so this
/// covers catalog links that point at the proxy in some other shape. It is
/// not re-sent on redirect hops.
pub struct HttpResolver {
    client: Client,
    proxy_host: Option<String>,
}

impl HttpResolver {
    pub fn new(timeout: Duration, vendor: &VendorConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("turf/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            proxy_host: vendor.proxy_host(),
        })
    }

    async fn resolve_one(&self, url: &str, headers: &HeaderMap, ctx: &ResolveContext) -> ResolvedUrl {
        let mut request = self.client.get(url).headers(headers.clone());

        if let (Some(cred), Some(proxy_host)) = (&ctx.proxy, &self.proxy_host) {
            let host = url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(String::from));
            if host.as_deref() == Some(proxy_host.as_str()) {
                request = request.basic_auth(&cred.user, Some(&cred.secret));
            }
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_client_error() || status.is_server_error() {
                    let reason = status.canonical_reason().unwrap_or("");
                    ResolvedUrl::failed(
                        url,
                        Some(status.as_u16()),
                        format!("HTTP {} {}", status.as_u16(), reason).trim_end().to_string(),
                    )
                } else {
                    ResolvedUrl::resolved(url, response.url().as_str(), status.as_u16())
                }
            }
            Err(e) => {
                debug!(url, error = %e, "resolution failed");
                ResolvedUrl::failed(url, None, format!("{}: {}", classify(&e), e))
            }
        }
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn resolve(&self, urls: &[String], ctx: &ResolveContext) -> Vec<ResolvedUrl> {
        let headers = build_headers(ctx);
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            results.push(self.resolve_one(url, &headers, ctx).await);
        }
        results
    }
}

/// Header names or values that are not valid HTTP are dropped.
fn build_headers(ctx: &ResolveContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &ctx.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    if let Some(cookie) = ctx.cookies.as_deref().and_then(|c| HeaderValue::from_str(c).ok()) {
        headers.insert(COOKIE, cookie);
    }
    headers
}

fn classify(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "TIMEOUT"
    } else if e.is_redirect() {
        "TOO_MANY_REDIRECTS"
    } else if e.is_connect() {
        "CONNECTION_FAILED"
    } else if e.is_builder() {
        "INVALID_URL"
    } else {
        "NETWORK_ERROR"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_headers() {
        let ctx = ResolveContext {
            cookies: Some("EBSESSIONID=abc".to_string()),
            headers: vec![
                ("Referer".to_string(), "https://caltech.tind.io".to_string()),
                ("bad header".to_string(), "x".to_string()),
            ],
            proxy: None,
        };
        let headers = build_headers(&ctx);
        assert_eq!(headers.get(COOKIE).unwrap(), "EBSESSIONID=abc");
        assert_eq!(headers.get("referer").unwrap(), "https://caltech.tind.io");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_context_from_vendor() {
        let ctx = ResolveContext::new(&VendorConfig::default(), None);
        assert_eq!(
            ctx.cookies.as_deref(),
            Some(crate::config::DEFAULT_SESSION_COOKIE)
        );

        let vendor = VendorConfig {
            session_cookie: String::new(),
            ..VendorConfig::default()
        };
        assert!(ResolveContext::new(&vendor, None).cookies.is_none());
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_requests() {
        let resolver = HttpResolver::new(Duration::from_secs(1), &VendorConfig::default()).unwrap();
        let out = resolver.resolve(&[], &ResolveContext::default()).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_url_is_captured() {
        let resolver = HttpResolver::new(Duration::from_secs(1), &VendorConfig::default()).unwrap();
        let out = resolver
            .resolve(&["not a url".to_string()], &ResolveContext::default())
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].original, "not a url");
        assert!(out[0].final_url.is_none());
        assert!(out[0].error.as_deref().unwrap().starts_with("INVALID_URL"));
    }
}
