//! Run configuration
//!
//! Built once by the CLI and handed to each component. Nothing in the
//! library reads global state.

use std::time::Duration;

/// Largest page the search interface is asked for
pub const MAX_BATCH_SIZE: usize = 1000;

/// Records per page unless told otherwise
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Consecutive unresolved records tolerated before giving up
pub const DEFAULT_STALL_THRESHOLD: usize = 10;

/// Network timeout for search and resolution requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause between consecutive search page requests
pub const COURTESY_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_PROXY_PREFIX: &str = "https://clsproxy.library.caltech.edu/login?url=";
pub const DEFAULT_VENDOR_ROOT: &str =
    "http://web.b.ebscohost.com/pfi/detail/detail?vid=4&bdata=JnNjb3BlPXNpdGU%3d#";
// Reused from an old session; the vendor only checks that the cookie is well formed.
pub const DEFAULT_SESSION_COOKIE: &str = "EBSESSIONID=92991f926e3b4796a115da4505a01cfc";
pub const DEFAULT_RECORD_BASE: &str = "https://caltech.tind.io/record/";

/// Paging and termination settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub batch_size: usize,
    /// 1-based offset of the first record to request
    pub start: usize,
    pub max_records: Option<usize>,
    /// `None` disables the stall guard
    pub stall_threshold: Option<usize>,
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            start: 1,
            max_records: None,
            stall_threshold: Some(DEFAULT_STALL_THRESHOLD),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Page size for the next request given how many records were
    /// already emitted.
    pub fn page_size(&self, emitted: usize) -> usize {
        let size = self.batch_size.clamp(1, MAX_BATCH_SIZE);
        match self.max_records {
            Some(max) => size.min(max.saturating_sub(emitted)),
            None => size,
        }
    }
}

/// Institution- and vendor-specific constants
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub proxy_prefix: String,
    pub vendor_root: String,
    pub session_cookie: String,
    pub record_base: String,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            proxy_prefix: DEFAULT_PROXY_PREFIX.to_string(),
            vendor_root: DEFAULT_VENDOR_ROOT.to_string(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            record_base: DEFAULT_RECORD_BASE.to_string(),
        }
    }
}

impl VendorConfig {
    /// Host of the institutional proxy, if the prefix parses.
    pub fn proxy_host(&self) -> Option<String> {
        url::Url::parse(&self.proxy_prefix)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
    }

    pub fn record_link(&self, id: &str) -> String {
        format!("{}{}", self.record_base, id)
    }
}

/// Console logging settings
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    pub quiet: bool,
    pub color: bool,
    pub debug: bool,
}
