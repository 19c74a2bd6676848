//! Writing results
//!
//! Records are written as they arrive, one compact JSON object per line,
//! either to stdout or to a `.jsonl` file. A `.json` destination gets a
//! single document once the run is over.

use crate::config::VendorConfig;
use crate::schema::{RecordResult, ResolvedUrl};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Destination format, chosen from the output file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    JsonLines,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("jsonl") | Some("ndjson") => Ok(Self::JsonLines),
            _ => bail!(
                "\"{}\" has an unrecognized file extension (expected .json or .jsonl)",
                path.display()
            ),
        }
    }
}

/// One output row
#[derive(Debug, Serialize)]
pub struct OutputRow<'a> {
    pub id: &'a str,
    pub record: String,
    pub urls: &'a [ResolvedUrl],
}

#[derive(Debug, Serialize)]
struct OutputDocument<'a> {
    generated: String,
    total: usize,
    records: Vec<OutputRow<'a>>,
}

/// Consumer side of the pipeline
pub struct ResultSink {
    target: Target,
    include_empty: bool,
    vendor: VendorConfig,
    written: usize,
}

enum Target {
    Stream(Box<dyn AsyncWrite + Unpin + Send>),
    Document { path: PathBuf, kept: Vec<RecordResult> },
}

impl ResultSink {
    /// Write to stdout, or to `path` when given.
    pub async fn open(path: Option<&Path>, include_empty: bool, vendor: VendorConfig) -> Result<Self> {
        let target = match path {
            None => Target::Stream(Box::new(tokio::io::stdout())),
            Some(path) => match OutputFormat::from_path(path)? {
                OutputFormat::JsonLines => {
                    let file = tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    Target::Stream(Box::new(file))
                }
                OutputFormat::Json => Target::Document {
                    path: path.to_path_buf(),
                    kept: Vec::new(),
                },
            },
        };

        Ok(Self {
            target,
            include_empty,
            vendor,
            written: 0,
        })
    }

    fn row<'a>(&self, result: &'a RecordResult) -> OutputRow<'a> {
        OutputRow {
            id: &result.id,
            record: self.vendor.record_link(&result.id),
            urls: &result.urls,
        }
    }

    pub async fn write(&mut self, result: RecordResult) -> Result<()> {
        if result.urls.is_empty() && !self.include_empty {
            return Ok(());
        }

        let line = match &self.target {
            Target::Stream(_) => Some(format!("{}\n", serde_json::to_string(&self.row(&result))?)),
            Target::Document { .. } => None,
        };

        match (&mut self.target, line) {
            (Target::Stream(out), Some(line)) => {
                out.write_all(line.as_bytes()).await?;
                out.flush().await?;
            }
            (Target::Document { kept, .. }, _) => kept.push(result),
            _ => {}
        }
        self.written += 1;
        Ok(())
    }

    /// Flush and, for `.json` output, write the document. Returns the
    /// number of records written.
    pub async fn finish(self) -> Result<usize> {
        match &self.target {
            Target::Stream(_) => {}
            Target::Document { path, kept } => {
                let doc = OutputDocument {
                    generated: Utc::now().to_rfc3339(),
                    total: kept.len(),
                    records: kept.iter().map(|r| self.row(r)).collect(),
                };
                let json = serde_json::to_string_pretty(&doc)?;
                tokio::fs::write(path, json)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_path() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out.json")).unwrap(),
            OutputFormat::Json
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("OUT.JSONL")).unwrap(),
            OutputFormat::JsonLines
        );
        assert!(OutputFormat::from_path(Path::new("out.xlsx")).is_err());
        assert!(OutputFormat::from_path(Path::new("out")).is_err());
    }

    #[test]
    fn test_row_serialization() {
        let result = RecordResult {
            id: "65536".to_string(),
            urls: vec![ResolvedUrl::resolved("http://old.test", "https://new.test/", 200)],
        };
        let vendor = VendorConfig::default();
        let row = OutputRow {
            id: &result.id,
            record: vendor.record_link(&result.id),
            urls: &result.urls,
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.starts_with(r#"{"id":"65536","record":"https://caltech.tind.io/record/65536""#));
        assert!(json.contains(r#""original":"http://old.test""#));
    }

    #[tokio::test]
    async fn test_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        let mut sink = ResultSink::open(Some(&path), false, VendorConfig::default())
            .await
            .unwrap();
        sink.write(RecordResult {
            id: "100".to_string(),
            urls: vec![],
        })
        .await
        .unwrap();
        sink.write(RecordResult {
            id: "101".to_string(),
            urls: vec![ResolvedUrl::resolved("http://a.test", "http://a.test", 200)],
        })
        .await
        .unwrap();
        assert_eq!(sink.finish().await.unwrap(), 1);

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["total"], 1);
        assert_eq!(doc["records"][0]["id"], "101");
    }

    #[tokio::test]
    async fn test_jsonl_includes_empty_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");

        let mut sink = ResultSink::open(Some(&path), true, VendorConfig::default())
            .await
            .unwrap();
        for id in ["100", "101"] {
            sink.write(RecordResult {
                id: id.to_string(),
                urls: vec![],
            })
            .await
            .unwrap();
        }
        assert_eq!(sink.finish().await.unwrap(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(r#""id":"101""#));
    }
}
