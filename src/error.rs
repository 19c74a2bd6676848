//! Fatal pipeline errors
//!
//! Per-URL failures are not errors; they travel inside `ResolvedUrl`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurfError {
    #[error("invalid search URL: {0}")]
    InvalidQuery(#[from] url::ParseError),

    #[error("malformed MARCXML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed MARCXML: {0}")]
    MalformedDocument(String),

    #[error(
        "search redirected (HTTP {status}) to {location}; the session has expired or automated access is being blocked"
    )]
    SessionRedirect { status: u16, location: String },

    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TurfError>;
