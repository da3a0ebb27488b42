//! Source enumeration + CSV row parsing for per-company problem exports.
//!
//! Each company directory holds up to five time-window CSVs. The walker picks
//! the files that exist, the reader streams rows into `Sighting`s, and the
//! remote source fetches the same layout over HTTP for repository-hosted
//! exports.

use std::io::{BufRead, Lines};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use probcat_core::{normalize_difficulty, Sighting};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "probcat-sources";

/// Historical export windows, narrowest first. The ordering matters: canonical
/// file selection prefers the widest window present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeWindow {
    ThirtyDays,
    ThreeMonths,
    SixMonths,
    MoreThanSixMonths,
    AllTime,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 5] = [
        TimeWindow::ThirtyDays,
        TimeWindow::ThreeMonths,
        TimeWindow::SixMonths,
        TimeWindow::MoreThanSixMonths,
        TimeWindow::AllTime,
    ];

    /// File name used by the company-wise export layout.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::ThirtyDays => "1. Thirty Days.csv",
            Self::ThreeMonths => "2. Three Months.csv",
            Self::SixMonths => "3. Six Months.csv",
            Self::MoreThanSixMonths => "4. More Than Six Months.csv",
            Self::AllTime => "5. All.csv",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected at least 6 fields, got {0}")]
    TooFewFields(usize),
    #[error("empty title")]
    EmptyTitle,
    #[error("empty url")]
    EmptyUrl,
}

/// Splits one CSV line on commas outside quotes. Quoted fields may contain
/// embedded commas; `""` inside a quoted field unescapes to `"`. Surrounding
/// quotes are consumed by the state machine.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parses the topics field: strip one layer of surrounding quotes, split on
/// comma, trim, drop empties, keep first occurrence only.
pub fn parse_topics(field: &str) -> Vec<String> {
    let inner = field.trim();
    let inner = inner
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(inner);
    let mut topics: Vec<String> = Vec::new();
    for part in inner.split(',') {
        let topic = part.trim();
        if topic.is_empty() || topics.iter().any(|t| t == topic) {
            continue;
        }
        topics.push(topic.to_string());
    }
    topics
}

fn parse_float_or_zero(raw: &str) -> f64 {
    raw.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

/// Parses one non-header CSV row into a `Sighting`. Column order is
/// `[Difficulty, Title, Frequency, Acceptance Rate, Link, Topics]`. Numeric
/// fields that fail to parse default to 0 rather than failing the row.
pub fn parse_sighting(line: &str, company: &str) -> Result<Sighting, ParseError> {
    let fields = split_csv_line(line);
    if fields.len() < 6 {
        return Err(ParseError::TooFewFields(fields.len()));
    }
    let title = fields[1].trim();
    if title.is_empty() {
        return Err(ParseError::EmptyTitle);
    }
    let url = fields[4].trim();
    if url.is_empty() {
        return Err(ParseError::EmptyUrl);
    }
    Ok(Sighting {
        difficulty: normalize_difficulty(&fields[0]),
        title: title.to_string(),
        frequency: parse_float_or_zero(&fields[2]),
        acceptance_rate: parse_float_or_zero(&fields[3]),
        url: url.to_string(),
        topics: parse_topics(&fields[5]),
        source_company: company.to_string(),
    })
}

/// Streams `Sighting`s from one CSV source, skipping the header row and any
/// malformed rows. Skips are logged and tallied, never fatal. Finite and not
/// restartable: one pass per reader.
pub struct CsvSightingReader<R: BufRead> {
    lines: Lines<R>,
    company: String,
    header_skipped: bool,
    skipped_rows: usize,
}

impl<R: BufRead> CsvSightingReader<R> {
    pub fn new(reader: R, company: &str) -> Self {
        Self {
            lines: reader.lines(),
            company: company.to_string(),
            header_skipped: false,
            skipped_rows: 0,
        }
    }

    /// Malformed or unreadable rows dropped so far.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }
}

impl<R: BufRead> Iterator for CsvSightingReader<R> {
    type Item = Sighting;

    fn next(&mut self) -> Option<Sighting> {
        loop {
            let line = match self.lines.next() {
                None => return None,
                Some(Err(err)) => {
                    warn!(company = %self.company, %err, "read error; abandoning source");
                    self.skipped_rows += 1;
                    return None;
                }
                Some(Ok(line)) => line,
            };
            if !self.header_skipped {
                self.header_skipped = true;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            match parse_sighting(&line, &self.company) {
                Ok(sighting) => return Some(sighting),
                Err(err) => {
                    warn!(company = %self.company, %err, "skipping malformed row");
                    self.skipped_rows += 1;
                }
            }
        }
    }
}

/// Ordered company identifiers supplied to the walker, loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub companies: Vec<String>,
}

impl SourceRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut registry: SourceRegistry = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        let mut seen = Vec::with_capacity(registry.companies.len());
        for company in registry.companies.drain(..) {
            if !seen.contains(&company) {
                seen.push(company);
            }
        }
        registry.companies = seen;
        Ok(registry)
    }
}

/// Whether to read every available window file or exactly one per company.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    AllWindows,
    Canonical,
}

/// Enumerates the window files that actually exist under a local export tree.
/// Missing files are business-normal and simply absent from the result.
#[derive(Debug, Clone)]
pub struct SourceWalker {
    root: PathBuf,
    mode: WindowMode,
}

impl SourceWalker {
    pub fn new(root: impl Into<PathBuf>, mode: WindowMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Window files present for one company, narrowest first. In canonical
    /// mode returns at most one file, preferring the widest window present.
    pub fn files_for(&self, company: &str) -> Vec<(TimeWindow, PathBuf)> {
        let dir = self.root.join(company);
        let mut found: Vec<(TimeWindow, PathBuf)> = TimeWindow::ALL
            .iter()
            .filter_map(|window| {
                let path = dir.join(window.file_name());
                path.is_file().then_some((*window, path))
            })
            .collect();
        if self.mode == WindowMode::Canonical {
            if let Some(widest) = found.pop() {
                found = vec![widest];
            }
        }
        found
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Fetches the same per-company window layout from an HTTP base URL. A 404
/// means the export does not exist for that window and maps to `Ok(None)`.
#[derive(Debug)]
pub struct RemoteCsvSource {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteCsvSource {
    pub fn new(base_url: impl Into<String>, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, company: &str, window: TimeWindow) -> String {
        let file = window.file_name().replace(' ', "%20");
        let company = company.replace(' ', "%20");
        format!("{}/{}/{}", self.base_url, company, file)
    }

    pub async fn fetch_window(
        &self,
        company: &str,
        window: TimeWindow,
    ) -> Result<Option<String>, FetchError> {
        let url = self.url_for(company, window);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        Ok(Some(resp.text().await?))
    }
}
