//! turf: find and update resource links in TIND catalog records
//!
//! Records come from a MARCXML file or from paging through a TIND search.
//! Each 856/u link is unwrapped from the library proxy and vendor login
//! URLs, resolved to its final destination, and reported alongside the
//! original so stale links can be fixed.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod marc;
pub mod normalize;
pub mod output;
pub mod resolve;
pub mod schema;
pub mod search;

pub use config::{EngineConfig, LogConfig, VendorConfig};
pub use engine::{FileEngine, PagingEngine};
pub use error::{Result, TurfError};
pub use normalize::UrlNormalizer;
pub use resolve::{HttpResolver, ResolveContext, Resolver};
pub use schema::{ProxyCredential, RawRecord, RecordResult, ResolvedUrl, StopReason};
pub use search::{SearchPager, SearchQuery};
