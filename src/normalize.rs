//! Unwrapping of proxy and vendor URLs
//!
//! Catalog links usually look like
//! `https://clsproxy.library.caltech.edu/login?url=http://search.ebscohost.com/login.aspx?CustID=s8984125&db=edspub&type=44&bQuery=AN%2065536&direct=true&site=pfi-live`.
//! What the resolver should see is the EBSCO deep link built from the
//! `db` and `bQuery` values. Both passes here are total: anything that
//! does not match is returned as-is.

use crate::config::VendorConfig;
use crate::schema::ResolvedUrl;
use regex::Regex;
use std::borrow::Cow;

pub struct UrlNormalizer {
    proxy_prefix: String,
    vendor_root: String,
    interstitial: Regex,
}

impl UrlNormalizer {
    pub fn new(vendor: &VendorConfig) -> Self {
        let interstitial =
            Regex::new(r"(?i)^https?://[^/?#]*ebscohost\.com/[^?#]*maintenance[^?#]*\?(?:[^#]*&)?returnurl=([^&#]+)")
                .unwrap();

        Self {
            proxy_prefix: vendor.proxy_prefix.clone(),
            vendor_root: vendor.vendor_root.clone(),
            interstitial,
        }
    }

    /// Rewrite a raw catalog URL into the form handed to the resolver.
    pub fn normalize(&self, raw: &str) -> String {
        let url = raw.strip_prefix(self.proxy_prefix.as_str()).unwrap_or(raw);

        let (Some(db), Some(token)) = (query_value(url, "db"), query_value(url, "bQuery")) else {
            return url.to_string();
        };

        // "AN 65536" becomes "AN=65536"
        let token = decode(token).replace(' ', "=");
        format!("{}{}&db={}", self.vendor_root, token, db)
    }

    /// Replace a maintenance-page destination with the page it would
    /// have returned to.
    pub fn rewrite_resolved(&self, resolved: ResolvedUrl) -> ResolvedUrl {
        if resolved.error.is_some() {
            return resolved;
        }
        let Some(target) = resolved
            .final_url
            .as_deref()
            .and_then(|f| self.interstitial.captures(f))
            .and_then(|caps| caps.get(1))
            .map(|m| urlencoding::decode(m.as_str()).map(Cow::into_owned))
        else {
            return resolved;
        };

        match target {
            Ok(target) if !target.is_empty() => ResolvedUrl {
                final_url: Some(target),
                ..resolved
            },
            _ => resolved,
        }
    }
}

/// Value of `key` in the query portion of `url`, undecoded.
fn query_value<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// Undo percent and HTML entity encoding, keeping whatever fails to decode.
fn decode(value: &str) -> String {
    let decoded = urlencoding::decode(value).unwrap_or(Cow::Borrowed(value));
    match quick_xml::escape::unescape(&decoded) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => decoded.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> UrlNormalizer {
        UrlNormalizer::new(&VendorConfig::default())
    }

    #[test]
    fn test_proxy_wrapped_vendor_link() {
        let raw = "https://clsproxy.library.caltech.edu/login?url=http://search.ebscohost.com/login.aspx?CustID=s8984125&db=edspub&type=44&bQuery=AN%2065536&direct=true&site=pfi-live";
        assert_eq!(
            normalizer().normalize(raw),
            "http://web.b.ebscohost.com/pfi/detail/detail?vid=4&bdata=JnNjb3BlPXNpdGU%3d#AN=65536&db=edspub"
        );
    }

    #[test]
    fn test_vendor_link_without_proxy() {
        let raw = "http://search.ebscohost.com/login.aspx?direct=true&db=ABC&bQuery=AN%2012345";
        let out = normalizer().normalize(raw);
        assert!(out.starts_with(crate::config::DEFAULT_VENDOR_ROOT));
        assert!(out.contains("AN=12345"));
        assert!(out.contains("db=ABC"));
        assert_eq!(out, normalizer().normalize(raw));
    }

    #[test]
    fn test_html_entities_in_token() {
        let raw = "http://search.ebscohost.com/login.aspx?db=x&bQuery=JN%20%26quot;Nature%26quot;";
        assert_eq!(
            normalizer().normalize(raw),
            format!("{}JN=\"Nature\"&db=x", crate::config::DEFAULT_VENDOR_ROOT)
        );
    }

    #[test]
    fn test_proxy_only() {
        let raw = "https://clsproxy.library.caltech.edu/login?url=https://doi.org/10.1000/182";
        assert_eq!(normalizer().normalize(raw), "https://doi.org/10.1000/182");
    }

    #[test]
    fn test_unrecognized_shapes_unchanged() {
        let n = normalizer();
        for url in [
            "https://example.com/path?x=1",
            "http://search.ebscohost.com/login.aspx?db=only",
            "http://search.ebscohost.com/login.aspx?bQuery=AN%201",
            "http://host.test/?xdb=1&abQuery=2",
            "not a url",
            "",
        ] {
            let once = n.normalize(url);
            assert_eq!(once, url);
            assert_eq!(n.normalize(&once), once);
        }
    }

    #[test]
    fn test_bad_percent_escape_kept() {
        let raw = "http://search.ebscohost.com/login.aspx?db=d&bQuery=AN%FF1";
        let out = normalizer().normalize(raw);
        assert!(out.ends_with("AN%FF1&db=d"));
    }

    #[test]
    fn test_rewrite_interstitial() {
        let resolved = ResolvedUrl::resolved(
            "http://web.b.ebscohost.com/pfi/detail/detail#AN=1&db=x",
            "https://search.ebscohost.com/Maintenance/Index?returnUrl=https%3A%2F%2Fweb.b.ebscohost.com%2Fpfi%2Fdetail%3Fdb%3Dx",
            200,
        );
        let rewritten = normalizer().rewrite_resolved(resolved);
        assert_eq!(
            rewritten.final_url.as_deref(),
            Some("https://web.b.ebscohost.com/pfi/detail?db=x")
        );
        assert_eq!(rewritten.status, Some(200));
    }

    #[test]
    fn test_rewrite_passthrough() {
        let n = normalizer();
        let plain = ResolvedUrl::resolved("http://a.test", "https://a.test/", 200);
        assert_eq!(n.rewrite_resolved(plain.clone()), plain);

        let failed = ResolvedUrl::failed("http://a.test", Some(404), "HTTP 404 Not Found");
        assert_eq!(n.rewrite_resolved(failed.clone()), failed);

        let elsewhere = ResolvedUrl::resolved(
            "http://a.test",
            "https://other.test/maintenance?returnUrl=https%3A%2F%2Fa.test",
            200,
        );
        assert_eq!(n.rewrite_resolved(elsewhere.clone()), elsewhere);
    }
}
