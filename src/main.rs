//! turf CLI
//!
//! Looks for TIND records containing URLs and reports where those URLs
//! lead today. Results go to stdout as JSON lines unless `--output` is given.

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::stream::{LocalBoxStream, StreamExt};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use turf::config::DEFAULT_STALL_THRESHOLD;
use turf::logging::init_logging;
use turf::output::{OutputFormat, ResultSink};
use turf::{
    EngineConfig, FileEngine, HttpResolver, LogConfig, PagingEngine, ProxyCredential,
    RecordResult, ResolveContext, Resolver, SearchQuery, VendorConfig,
};

#[derive(Parser)]
#[command(name = "turf")]
#[command(author = "Caltech Library")]
#[command(version)]
#[command(about = "Find URLs in TIND records and report where they lead now")]
#[command(long_about = "Find URLs in TIND records and report where they lead now.\n\n\
If given a search query, it should be a complete search URL as would be typed\n\
into a web browser. If given a file, it should be in MARC XML format.")]
struct Cli {
    /// Complete TIND search URL
    #[arg(value_name = "SEARCH")]
    search: Option<String>,

    /// Read MARC XML from a file instead of doing a search
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Stop after this many records
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    max_records: Option<u64>,

    /// Record number to start from
    #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    start: u64,

    /// Records to request per search page (1-1000)
    #[arg(short = 'c', long, default_value = "100", value_parser = clap::value_parser!(u64).range(1..=1000))]
    batch_size: u64,

    /// Give up after this many records in a row without a resolvable URL (0 = never)
    #[arg(long, default_value_t = DEFAULT_STALL_THRESHOLD as u64)]
    stall: u64,

    /// Write results to a .json or .jsonl file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Include records that have no URLs
    #[arg(short, long)]
    all: bool,

    /// Do not print progress messages
    #[arg(short, long)]
    quiet: bool,

    /// Do not color-code terminal output
    #[arg(short = 'C', long)]
    no_color: bool,

    /// Log debugging detail
    #[arg(long)]
    debug: bool,

    /// User name for the library proxy login
    #[arg(short, long, env = "TURF_PROXY_USER")]
    user: Option<String>,

    /// Password for the library proxy login
    #[arg(short, long, env = "TURF_PROXY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Do not store the proxy login in the system keyring
    #[arg(long)]
    no_keyring: bool,

    /// Ask for the proxy login again instead of using a stored one
    #[arg(long)]
    reset: bool,
}

enum Source {
    Search(SearchQuery),
    File(PathBuf),
}

impl Cli {
    fn source(&self) -> Result<Source> {
        match (&self.search, &self.input) {
            (Some(_), Some(_)) => bail!("Cannot use a file and search string simultaneously"),
            (None, None) => bail!("Must provide either a file or a search term"),
            (Some(search), None) => Ok(Source::Search(
                SearchQuery::parse(search).context("Search must be a complete URL")?,
            )),
            (None, Some(file)) => {
                if !is_xml(file) {
                    bail!("\"{}\" does not appear to be an XML file", file.display());
                }
                Ok(Source::File(file.clone()))
            }
        }
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            batch_size: self.batch_size as usize,
            start: self.start as usize,
            max_records: self.max_records.map(|m| m as usize),
            stall_threshold: Some(self.stall as usize).filter(|&t| t > 0),
            ..EngineConfig::default()
        }
    }

    fn proxy_credential(&self) -> Result<Option<ProxyCredential>> {
        match (&self.user, &self.password) {
            (Some(user), Some(secret)) => Ok(Some(ProxyCredential {
                user: user.clone(),
                secret: secret.clone(),
                use_keyring: !self.no_keyring,
                reset: self.reset,
            })),
            (None, None) => Ok(None),
            _ => bail!("Proxy login needs both --user and --password"),
        }
    }
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig {
        quiet: cli.quiet,
        color: !cli.no_color && std::io::stderr().is_terminal(),
        debug: cli.debug,
    });

    let source = cli.source()?;
    if let Some(output) = &cli.output {
        OutputFormat::from_path(output)?;
        info!("Output will be written to {}", output.display());
    } else {
        info!("No output file specified; results go to stdout");
    }

    let config = cli.engine_config();
    let vendor = VendorConfig::default();
    let resolver: Arc<dyn Resolver> = Arc::new(
        HttpResolver::new(config.timeout, &vendor).context("Failed to set up HTTP client")?,
    );
    let ctx = ResolveContext::new(&vendor, cli.proxy_credential()?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut records: LocalBoxStream<'static, turf::Result<RecordResult>> = match source {
        Source::Search(query) => {
            info!("Will fetch results in batches of {}", config.batch_size);
            PagingEngine::new(query, config, &vendor, resolver, ctx, cancel)?
                .records()
                .boxed_local()
        }
        Source::File(path) => {
            info!("Reading MARC XML from {}", path.display());
            FileEngine::new(path, &config, &vendor, resolver, ctx, cancel)
                .records()
                .boxed_local()
        }
    };

    let mut sink = ResultSink::open(cli.output.as_deref(), cli.all, vendor.clone()).await?;
    let mut seen = 0usize;
    let mut failure = None;
    while let Some(result) = records.next().await {
        match result {
            Ok(result) => {
                sink.write(result).await?;
                seen += 1;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    // Records delivered before a fatal error still belong in the output.
    let written = sink.finish().await?;
    if let Some(e) = failure {
        warn!("Run stopped early; {} records were written", written);
        return Err(e.into());
    }

    if seen == 0 {
        warn!("No results returned.");
    }
    info!("Done: {} records, {} written", seen, written);

    Ok(())
}
