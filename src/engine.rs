//! Record pipelines
//!
//! Both engines turn MARCXML into a lazy stream of `RecordResult`s:
//! extract the record, normalize its URLs, resolve them, rewrite
//! maintenance interstitials, and emit. Nothing past the current record is
//! fetched or resolved until the stream is polled again. Dropping the
//! stream or cancelling the token stops the run at the next record boundary.
//!
//! `PagingEngine` pages through the search interface. The interface
//! reports no total count and wraps around at the end, so a repeated
//! record id is taken as the end of the results. `FileEngine` reads one
//! document and only honors the record budget.

use crate::config::{EngineConfig, VendorConfig};
use crate::error::{Result, TurfError};
use crate::marc::{self, Records};
use crate::normalize::UrlNormalizer;
use crate::resolve::{ResolveContext, Resolver};
use crate::schema::{RawRecord, RecordResult, StopReason};
use crate::search::{SearchPager, SearchQuery};
use futures::stream::{self, Stream};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Normalize, resolve, and rewrite the URLs of one record
struct RecordPipeline {
    normalizer: UrlNormalizer,
    resolver: Arc<dyn Resolver>,
    ctx: ResolveContext,
}

impl RecordPipeline {
    async fn process(&self, raw: RawRecord) -> RecordResult {
        let urls: Vec<String> = raw
            .urls
            .iter()
            .map(|u| self.normalizer.normalize(u))
            .collect();

        let resolved = if urls.is_empty() {
            Vec::new()
        } else {
            self.resolver.resolve(&urls, &self.ctx).await
        };

        let urls: Vec<_> = resolved
            .into_iter()
            .zip(&raw.urls)
            .map(|(r, catalog)| self.normalizer.rewrite_resolved(r).with_catalog(catalog.as_str()))
            .collect();

        for url in &urls {
            match (&url.final_url, &url.error) {
                (_, Some(err)) => info!("{}: {} => error: {}", raw.id, url.catalog, err),
                (Some(fin), None) => info!("{}: {} => {}", raw.id, url.catalog, fin),
                (None, None) => info!("{}: {} => (none)", raw.id, url.catalog),
            }
        }
        if urls.is_empty() {
            info!("{}: no URLs", raw.id);
        }

        RecordResult { id: raw.id, urls }
    }
}

/// Where a run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Stopping(StopReason),
    Done,
}

/// Pagination bookkeeping, private to one run
#[derive(Debug)]
struct PagingState {
    offset: usize,
    max_records: Option<usize>,
    emitted: usize,
    seen: HashSet<String>,
    consecutive_unresolved: usize,
    stall_threshold: Option<usize>,
    phase: Phase,
}

impl PagingState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            offset: config.start.max(1),
            max_records: config.max_records,
            emitted: 0,
            seen: HashSet::new(),
            consecutive_unresolved: 0,
            stall_threshold: config.stall_threshold,
            phase: Phase::Running,
        }
    }

    fn budget_spent(&self) -> bool {
        self.max_records.is_some_and(|max| self.emitted >= max)
    }

    /// Remember `id`; false if it was already emitted this run.
    fn first_sighting(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            self.phase = Phase::Stopping(StopReason::Duplicate);
            false
        } else {
            self.seen.insert(id.to_string());
            true
        }
    }

    /// Account for an emitted record and decide whether to keep going.
    fn record_emitted(&mut self, result: &RecordResult) {
        self.emitted += 1;
        if result.is_unresolved() {
            self.consecutive_unresolved += 1;
        } else {
            self.consecutive_unresolved = 0;
        }

        if self
            .stall_threshold
            .is_some_and(|t| t > 0 && self.consecutive_unresolved >= t)
        {
            self.phase = Phase::Stopping(StopReason::Stalled);
        } else if self.budget_spent() {
            self.phase = Phase::Stopping(StopReason::Budget);
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Done;
    }
}

/// Pages through a search and resolves every record it returns
pub struct PagingEngine {
    query: SearchQuery,
    config: EngineConfig,
    pager: SearchPager,
    pipeline: RecordPipeline,
    cancel: CancellationToken,
}

impl PagingEngine {
    pub fn new(
        query: SearchQuery,
        config: EngineConfig,
        vendor: &VendorConfig,
        resolver: Arc<dyn Resolver>,
        ctx: ResolveContext,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            pager: SearchPager::new(&config)?,
            query,
            config,
            pipeline: RecordPipeline {
                normalizer: UrlNormalizer::new(vendor),
                resolver,
                ctx,
            },
            cancel,
        })
    }

    /// Lazy stream of results. A fatal error is yielded once and ends
    /// the stream.
    pub fn records(self) -> impl Stream<Item = Result<RecordResult>> {
        let run = PagingRun {
            state: PagingState::new(&self.config),
            engine: self,
            page: None,
        };
        stream::try_unfold(run, |mut run| async move {
            Ok::<_, TurfError>(run.next_record().await?.map(|result| (result, run)))
        })
    }
}

struct PagingRun {
    engine: PagingEngine,
    state: PagingState,
    page: Option<Records>,
}

impl PagingRun {
    async fn next_record(&mut self) -> Result<Option<RecordResult>> {
        loop {
            match self.state.phase {
                Phase::Running => {}
                Phase::Stopping(reason) => {
                    self.stop(reason);
                    return Ok(None);
                }
                Phase::Done => return Ok(None),
            }

            if self.engine.cancel.is_cancelled() {
                self.stop(StopReason::Cancelled);
                return Ok(None);
            }

            let next = self.page.as_mut().and_then(Iterator::next);
            let Some(raw) = next else {
                if !self.fetch_page().await? {
                    self.stop(StopReason::Exhausted);
                    return Ok(None);
                }
                continue;
            };

            if !self.state.first_sighting(&raw.id) {
                debug!(id = %raw.id, "record already seen; results have wrapped around");
                self.page = None;
                continue;
            }

            let result = self.engine.pipeline.process(raw).await;
            self.state.record_emitted(&result);
            return Ok(Some(result));
        }
    }

    /// Load the next page. False when the search has nothing more.
    async fn fetch_page(&mut self) -> Result<bool> {
        let size = self.engine.config.page_size(self.state.emitted);
        if size == 0 {
            return Ok(false);
        }

        let offset = self.state.offset;
        let batch = self
            .engine
            .pager
            .fetch(&self.engine.query, offset, size)
            .await?;

        match batch {
            Some(batch) if !batch.is_empty() => {
                debug!(offset, count = batch.len(), "got search page");
                self.state.offset += batch.len();
                self.page = Some(marc::extract(batch));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn stop(&mut self, reason: StopReason) {
        match reason {
            StopReason::Stalled => warn!(
                "Stopping: {} records in a row had no resolvable URL; the remote service may be failing",
                self.state.consecutive_unresolved
            ),
            StopReason::Duplicate => info!(
                "Stopping: search results started repeating after {} records",
                self.state.emitted
            ),
            StopReason::Budget => info!("Stopping: reached {} records", self.state.emitted),
            StopReason::Exhausted => info!("No more results after {} records", self.state.emitted),
            StopReason::Cancelled => warn!("Cancelled after {} records", self.state.emitted),
        }
        self.state.finish();
    }
}

/// Resolves the records of one MARCXML file
pub struct FileEngine {
    path: PathBuf,
    max_records: Option<usize>,
    pipeline: RecordPipeline,
    cancel: CancellationToken,
}

impl FileEngine {
    pub fn new(
        path: impl Into<PathBuf>,
        config: &EngineConfig,
        vendor: &VendorConfig,
        resolver: Arc<dyn Resolver>,
        ctx: ResolveContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            max_records: config.max_records,
            pipeline: RecordPipeline {
                normalizer: UrlNormalizer::new(vendor),
                resolver,
                ctx,
            },
            cancel,
        }
    }

    /// Lazy stream of results. The file is read and parsed on first poll;
    /// a read or parse failure is the only error the stream yields.
    pub fn records(self) -> impl Stream<Item = Result<RecordResult>> {
        let run = FileRun {
            engine: self,
            records: None,
            emitted: 0,
        };
        stream::try_unfold(run, |mut run| async move {
            Ok::<_, TurfError>(run.next_record().await?.map(|result| (result, run)))
        })
    }
}

struct FileRun {
    engine: FileEngine,
    records: Option<Records>,
    emitted: usize,
}

impl FileRun {
    async fn next_record(&mut self) -> Result<Option<RecordResult>> {
        if self.engine.max_records.is_some_and(|max| self.emitted >= max) {
            info!("Stopping: reached {} records", self.emitted);
            return Ok(None);
        }
        if self.engine.cancel.is_cancelled() {
            warn!("Cancelled after {} records", self.emitted);
            return Ok(None);
        }

        if self.records.is_none() {
            let path = &self.engine.path;
            let xml = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| TurfError::Io {
                    path: path.clone(),
                    source,
                })?;
            let batch = marc::parse_batch(&xml)?;
            debug!(path = %path.display(), count = batch.len(), "read MARCXML file");
            self.records = Some(marc::extract(batch));
        }

        let Some(raw) = self.records.as_mut().and_then(Iterator::next) else {
            return Ok(None);
        };
        let result = self.engine.pipeline.process(raw).await;
        self.emitted += 1;
        Ok(Some(result))
    }
}
