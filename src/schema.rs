//! Record and resolution types
//!
//! Everything here is transient: produced and consumed within one run.

use serde::{Deserialize, Serialize};

/// One catalog record as extracted from MARCXML: its 001 id and the
/// 856/u URLs in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub id: String,
    pub urls: Vec<String>,
}

/// Outcome of resolving a single URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUrl {
    /// URL exactly as it appears in the catalog record
    #[serde(default)]
    pub catalog: String,
    /// URL as handed to the resolver (after normalization)
    pub original: String,
    /// Final destination; meaningless when `error` is set
    #[serde(rename = "final")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolvedUrl {
    pub fn resolved(original: impl Into<String>, final_url: impl Into<String>, status: u16) -> Self {
        let original = original.into();
        Self {
            catalog: original.clone(),
            original,
            final_url: Some(final_url.into()),
            status: Some(status),
            error: None,
        }
    }

    pub fn failed(original: impl Into<String>, status: Option<u16>, error: impl Into<String>) -> Self {
        let original = original.into();
        Self {
            catalog: original.clone(),
            original,
            final_url: None,
            status,
            error: Some(error.into()),
        }
    }

    /// Record the URL the catalog actually holds, when it differs from
    /// what was resolved.
    pub fn with_catalog(self, catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            ..self
        }
    }

    /// True when the URL reached a usable destination.
    pub fn is_resolved(&self) -> bool {
        self.error.is_none() && self.final_url.as_deref().is_some_and(|f| !f.is_empty())
    }

    /// True when the destination differs from what was requested.
    pub fn changed(&self) -> bool {
        self.is_resolved() && self.final_url.as_deref() != Some(self.original.as_str())
    }
}

/// Unit emitted to consumers: a record id plus its resolved URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResult {
    pub id: String,
    pub urls: Vec<ResolvedUrl>,
}

impl RecordResult {
    /// No URLs at all, or none that resolved.
    pub fn is_unresolved(&self) -> bool {
        !self.urls.iter().any(ResolvedUrl::is_resolved)
    }
}

/// Login for the institutional access proxy. Passed through to the
/// resolver untouched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProxyCredential {
    pub user: String,
    pub secret: String,
    /// Persist in the system credential store
    pub use_keyring: bool,
    /// Ignore any stored value and ask again
    pub reset: bool,
}

impl std::fmt::Debug for ProxyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredential")
            .field("user", &self.user)
            .field("secret", &"***")
            .field("use_keyring", &self.use_keyring)
            .field("reset", &self.reset)
            .finish()
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// The remote interface (or the file) had nothing more
    Exhausted,
    /// The configured record budget was reached
    Budget,
    /// A record id came around a second time
    Duplicate,
    /// Too many consecutive records without a resolvable URL
    Stalled,
    /// The caller asked us to stop
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "exhausted"),
            StopReason::Budget => write!(f, "budget"),
            StopReason::Duplicate => write!(f, "duplicate"),
            StopReason::Stalled => write!(f, "stalled"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}
