//! Batch ingestion: fold all sightings into one deduplicated catalog and
//! hand it to the store as a fresh load.
//!
//! One pipeline run owns its reconciliation map exclusively. Runs are
//! idempotent over the same inputs; the caller is responsible for never
//! racing two runs against the same destination.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use probcat_core::{DifficultyBreakdown, ProblemKey, ProblemRecord, Sighting};
use probcat_sources::{
    CsvSightingReader, RemoteCsvSource, SourceRegistry, SourceWalker, TimeWindow, WindowMode,
};
use probcat_store::{BatchLoader, CatalogStore, LoadMode};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "probcat-ingest";

/// Single-pass fold of sightings into identity-keyed records. Not thread
/// safe by design: producers funnel through one consumer before merging.
#[derive(Debug, Default)]
pub struct ReconcileEngine {
    records: HashMap<ProblemKey, ProblemRecord>,
}

impl ReconcileEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one sighting. First sighting of an identity seeds the record;
    /// repeats add the company (set semantics), take the max frequency, and
    /// union the topics. `url` and `acceptance_rate` keep the first-seen
    /// value: no rule favors a later source, so the first writer wins.
    pub fn observe(&mut self, sighting: Sighting) {
        match self.records.entry(ProblemKey::of(&sighting)) {
            Entry::Occupied(mut entry) => merge_into(entry.get_mut(), sighting),
            Entry::Vacant(entry) => {
                entry.insert(ProblemRecord::from_sighting(sighting));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Releases the run's map into an immutable snapshot, ordered by
    /// identity so identical re-runs produce identical batches.
    pub fn finalize(self) -> CatalogSnapshot {
        let mut entries: Vec<(ProblemKey, ProblemRecord)> = self.records.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        CatalogSnapshot {
            records: entries.into_iter().map(|(_, record)| record).collect(),
        }
    }
}

fn merge_into(record: &mut ProblemRecord, sighting: Sighting) {
    record.companies.insert(sighting.source_company);
    if sighting.frequency > record.frequency {
        record.frequency = sighting.frequency;
    }
    for topic in sighting.topics {
        if !record.topics.contains(&topic) {
            record.topics.push(topic);
        }
    }
}

/// Finalized output of one reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    records: Vec<ProblemRecord>,
}

impl CatalogSnapshot {
    pub fn records(&self) -> &[ProblemRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ProblemRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn difficulty_breakdown(&self) -> DifficultyBreakdown {
        let mut breakdown = DifficultyBreakdown::default();
        for record in &self.records {
            breakdown.record(&record.difficulty);
        }
        breakdown
    }
}

/// Per-company result, kept explicit so the run summary can be reconstructed
/// deterministically. A company with zero files contributes zero sightings
/// and is absent from every record.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyOutcome {
    pub company: String,
    pub files_read: usize,
    pub sightings: usize,
    pub skipped_rows: usize,
}

impl CompanyOutcome {
    pub fn is_missing(&self) -> bool {
        self.files_read == 0
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    pub companies_file: PathBuf,
    pub window_mode: WindowMode,
    pub batch_size: usize,
    pub remote_base_url: Option<String>,
    pub fetch_batch_size: usize,
    pub fetch_pause: Duration,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("PROBCAT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            companies_file: std::env::var("PROBCAT_COMPANIES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("companies.yaml")),
            window_mode: if std::env::var("PROBCAT_CANONICAL_ONLY")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false)
            {
                WindowMode::Canonical
            } else {
                WindowMode::AllWindows
            },
            batch_size: std::env::var("PROBCAT_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            remote_base_url: std::env::var("PROBCAT_REMOTE_BASE_URL").ok(),
            fetch_batch_size: std::env::var("PROBCAT_FETCH_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            fetch_pause: Duration::from_millis(
                std::env::var("PROBCAT_FETCH_PAUSE_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
            user_agent: std::env::var("PROBCAT_USER_AGENT")
                .unwrap_or_else(|_| "probcat/0.1".to_string()),
            http_timeout_secs: std::env::var("PROBCAT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub companies_processed: usize,
    pub companies_missing: usize,
    pub unique_problems: usize,
    pub by_difficulty: DifficultyBreakdown,
    pub batches: usize,
    pub inserted: usize,
    pub rejected: usize,
    pub outcomes: Vec<CompanyOutcome>,
}

pub struct IngestPipeline {
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Runs one fresh-load ingestion: walk sources, fold sightings, load
    /// batches. Missing files and malformed rows recover locally; a store
    /// failure aborts the run.
    pub async fn run_once(&self, store: &dyn CatalogStore) -> Result<IngestSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let registry = SourceRegistry::load(&self.config.companies_file)?;
        info!(%run_id, companies = registry.companies.len(), "starting ingestion run");

        let mut engine = ReconcileEngine::new();
        let mut outcomes = Vec::with_capacity(registry.companies.len());
        if let Some(base_url) = &self.config.remote_base_url {
            self.ingest_remote(base_url, &registry, &mut engine, &mut outcomes)
                .await?;
        } else {
            self.ingest_local(&registry, &mut engine, &mut outcomes);
        }

        let snapshot = engine.finalize();
        let by_difficulty = snapshot.difficulty_breakdown();
        let unique_problems = snapshot.len();

        let loader = BatchLoader::new(self.config.batch_size);
        let report = loader
            .load(store, snapshot.into_records(), LoadMode::Fresh)
            .await
            .context("loading catalog batches")?;

        let companies_missing = outcomes.iter().filter(|o| o.is_missing()).count();
        let summary = IngestSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            companies_processed: outcomes.len(),
            companies_missing,
            unique_problems,
            by_difficulty,
            batches: report.batches,
            inserted: report.inserted,
            rejected: report.rejected,
            outcomes,
        };
        info!(
            %run_id,
            unique_problems = summary.unique_problems,
            inserted = summary.inserted,
            rejected = summary.rejected,
            "ingestion run complete"
        );
        Ok(summary)
    }

    fn ingest_local(
        &self,
        registry: &SourceRegistry,
        engine: &mut ReconcileEngine,
        outcomes: &mut Vec<CompanyOutcome>,
    ) {
        let walker = SourceWalker::new(&self.config.data_dir, self.config.window_mode);
        for company in &registry.companies {
            let files = walker.files_for(company);
            if files.is_empty() {
                warn!(company = %company, "no source files found; company contributes nothing");
                outcomes.push(CompanyOutcome {
                    company: company.clone(),
                    files_read: 0,
                    sightings: 0,
                    skipped_rows: 0,
                });
                continue;
            }

            let mut files_read = 0usize;
            let mut sightings = 0usize;
            let mut skipped_rows = 0usize;
            for (window, path) in &files {
                let file = match File::open(path) {
                    Ok(file) => file,
                    Err(err) => {
                        warn!(company = %company, window = ?window, %err, "source file vanished; skipping");
                        continue;
                    }
                };
                files_read += 1;
                let mut reader = CsvSightingReader::new(BufReader::new(file), company);
                for sighting in reader.by_ref() {
                    engine.observe(sighting);
                    sightings += 1;
                }
                skipped_rows += reader.skipped_rows();
            }
            info!(company = %company, files_read, sightings, skipped_rows, "company ingested");
            outcomes.push(CompanyOutcome {
                company: company.clone(),
                files_read,
                sightings,
                skipped_rows,
            });
        }
    }

    /// Remote fetches go in bounded batches of companies with a pause in
    /// between, per the rate constraints of repository-hosted exports. All
    /// parsed sightings still funnel through the single engine fold.
    async fn ingest_remote(
        &self,
        base_url: &str,
        registry: &SourceRegistry,
        engine: &mut ReconcileEngine,
        outcomes: &mut Vec<CompanyOutcome>,
    ) -> Result<()> {
        let source = RemoteCsvSource::new(
            base_url,
            &self.config.user_agent,
            Duration::from_secs(self.config.http_timeout_secs),
        )?;
        let windows: &[TimeWindow] = match self.config.window_mode {
            WindowMode::Canonical => &[TimeWindow::AllTime],
            WindowMode::AllWindows => &TimeWindow::ALL,
        };

        let batch_size = self.config.fetch_batch_size.max(1);
        let batches = registry.companies.chunks(batch_size).count();
        for (index, batch) in registry.companies.chunks(batch_size).enumerate() {
            for company in batch {
                let mut files_read = 0usize;
                let mut sightings = 0usize;
                let mut skipped_rows = 0usize;
                for window in windows {
                    match source.fetch_window(company, *window).await {
                        Ok(Some(text)) => {
                            files_read += 1;
                            let mut reader = CsvSightingReader::new(text.as_bytes(), company);
                            for sighting in reader.by_ref() {
                                engine.observe(sighting);
                                sightings += 1;
                            }
                            skipped_rows += reader.skipped_rows();
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(company = %company, window = ?window, %err, "fetch failed; skipping window");
                        }
                    }
                }
                if files_read == 0 {
                    warn!(company = %company, "no remote source files; company contributes nothing");
                } else {
                    info!(company = %company, files_read, sightings, skipped_rows, "company ingested");
                }
                outcomes.push(CompanyOutcome {
                    company: company.clone(),
                    files_read,
                    sightings,
                    skipped_rows,
                });
            }
            if index + 1 < batches && !self.config.fetch_pause.is_zero() {
                tokio::time::sleep(self.config.fetch_pause).await;
            }
        }
        Ok(())
    }
}

pub async fn run_ingest_from_env(store: &dyn CatalogStore) -> Result<IngestSummary> {
    let config = IngestConfig::from_env();
    IngestPipeline::new(config).run_once(store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use probcat_core::normalize_difficulty;
    use probcat_store::{MemoryCatalog, ProblemFilter};
    use std::fs;
    use tempfile::tempdir;

    fn sighting(title: &str, difficulty: &str, frequency: f64, company: &str) -> Sighting {
        Sighting {
            difficulty: normalize_difficulty(difficulty),
            title: title.to_string(),
            frequency,
            acceptance_rate: 52.0,
            url: format!("https://example.com/{}", title.replace(' ', "-")),
            topics: vec!["Array".to_string()],
            source_company: company.to_string(),
        }
    }

    #[test]
    fn two_companies_merge_into_one_record() {
        let mut engine = ReconcileEngine::new();
        engine.observe(sighting("Two Sum", "Easy", 80.0, "Google"));
        engine.observe(sighting("Two Sum", "Easy", 65.0, "Amazon"));

        let snapshot = engine.finalize();
        assert_eq!(snapshot.len(), 1);
        let record = &snapshot.records()[0];
        assert!(record.companies.contains("Google"));
        assert!(record.companies.contains("Amazon"));
        assert_eq!(record.frequency, 80.0);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut once = ReconcileEngine::new();
        once.observe(sighting("Two Sum", "Easy", 80.0, "Google"));
        let mut twice = ReconcileEngine::new();
        twice.observe(sighting("Two Sum", "Easy", 80.0, "Google"));
        twice.observe(sighting("Two Sum", "Easy", 80.0, "Google"));

        assert_eq!(once.finalize(), twice.finalize());
    }

    #[test]
    fn identity_partitions_on_title_and_difficulty() {
        let mut engine = ReconcileEngine::new();
        engine.observe(sighting("Two Sum", "Easy", 80.0, "Google"));
        engine.observe(sighting("  Two Sum  ", "Easy", 70.0, "Amazon"));
        engine.observe(sighting("two sum", "Easy", 70.0, "Amazon"));
        engine.observe(sighting("Two Sum", "Medium", 70.0, "Amazon"));
        assert_eq!(engine.len(), 3);
    }

    #[test]
    fn frequency_is_monotonic_max() {
        let mut engine = ReconcileEngine::new();
        for frequency in [12.0, 99.5, 40.0, 0.0] {
            engine.observe(sighting("Two Sum", "Easy", frequency, "Google"));
        }
        let snapshot = engine.finalize();
        assert_eq!(snapshot.records()[0].frequency, 99.5);
    }

    #[test]
    fn topics_union_without_duplicates() {
        let mut engine = ReconcileEngine::new();
        let mut first = sighting("Two Sum", "Easy", 80.0, "Google");
        first.topics = vec!["Array".into(), "Hash Table".into()];
        let mut second = sighting("Two Sum", "Easy", 65.0, "Amazon");
        second.topics = vec!["Hash Table".into(), "Two Pointers".into()];
        engine.observe(first);
        engine.observe(second);

        let snapshot = engine.finalize();
        assert_eq!(
            snapshot.records()[0].topics,
            vec![
                "Array".to_string(),
                "Hash Table".to_string(),
                "Two Pointers".to_string()
            ]
        );
    }

    #[test]
    fn first_writer_wins_for_url_and_acceptance_rate() {
        let mut engine = ReconcileEngine::new();
        let mut first = sighting("Two Sum", "Easy", 80.0, "Google");
        first.url = "https://example.com/first".into();
        first.acceptance_rate = 52.0;
        let mut second = sighting("Two Sum", "Easy", 99.0, "Amazon");
        second.url = "https://example.com/second".into();
        second.acceptance_rate = 61.0;
        engine.observe(first);
        engine.observe(second);

        let catalog = engine.finalize();
        let record = &catalog.records()[0];
        assert_eq!(record.url, "https://example.com/first");
        assert_eq!(record.acceptance_rate, 52.0);
        assert_eq!(record.frequency, 99.0);
    }

    #[test]
    fn finalize_orders_by_identity() {
        let mut engine = ReconcileEngine::new();
        engine.observe(sighting("Zig Zag", "Medium", 10.0, "Google"));
        engine.observe(sighting("Alpha", "Hard", 10.0, "Google"));
        engine.observe(sighting("Alpha", "Easy", 10.0, "Google"));

        let titles: Vec<(String, String)> = engine
            .finalize()
            .into_records()
            .into_iter()
            .map(|r| (r.title, r.difficulty))
            .collect();
        assert_eq!(
            titles,
            vec![
                ("Alpha".to_string(), "Easy".to_string()),
                ("Alpha".to_string(), "Hard".to_string()),
                ("Zig Zag".to_string(), "Medium".to_string()),
            ]
        );
    }

    fn write_export(root: &std::path::Path, company: &str, window: TimeWindow, rows: &[&str]) {
        let dir = root.join(company);
        fs::create_dir_all(&dir).unwrap();
        let mut text = String::from("Difficulty,Title,Frequency,Acceptance Rate,Link,Topics\n");
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        fs::write(dir.join(window.file_name()), text).unwrap();
    }

    fn test_config(root: &std::path::Path) -> IngestConfig {
        IngestConfig {
            data_dir: root.join("data"),
            companies_file: root.join("companies.yaml"),
            window_mode: WindowMode::AllWindows,
            batch_size: 2,
            remote_base_url: None,
            fetch_batch_size: 5,
            fetch_pause: Duration::ZERO,
            user_agent: "probcat-test/0.1".to_string(),
            http_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn missing_company_is_skipped_without_aborting() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fs::write(
            dir.path().join("companies.yaml"),
            "companies:\n  - Google\n  - Beta\n  - Amazon\n",
        )
        .unwrap();
        write_export(
            &data_dir,
            "Google",
            TimeWindow::AllTime,
            &["Easy,Two Sum,80,52,http://x,\"Array,Hash Table\""],
        );
        write_export(
            &data_dir,
            "Amazon",
            TimeWindow::AllTime,
            &[
                "Easy,Two Sum,65,52,http://x,Array",
                "Hard,Median of Arrays,30,41,http://y,Heap",
            ],
        );

        let store = MemoryCatalog::new();
        let pipeline = IngestPipeline::new(test_config(dir.path()));
        let summary = pipeline.run_once(&store).await.unwrap();

        assert_eq!(summary.companies_processed, 3);
        assert_eq!(summary.companies_missing, 1);
        assert_eq!(summary.unique_problems, 2);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.rejected, 0);
        let beta = summary
            .outcomes
            .iter()
            .find(|o| o.company == "Beta")
            .unwrap();
        assert!(beta.is_missing());

        let beta_filter = ProblemFilter {
            company: Some("Beta".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count_matching(&beta_filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rerun_replaces_catalog_identically() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fs::write(dir.path().join("companies.yaml"), "companies:\n  - Google\n").unwrap();
        write_export(
            &data_dir,
            "Google",
            TimeWindow::ThirtyDays,
            &["Easy,Two Sum,80,52,http://x,Array"],
        );
        write_export(
            &data_dir,
            "Google",
            TimeWindow::AllTime,
            &[
                "Easy,Two Sum,65,52,http://x,Array",
                "Medium,Three Sum,55,33,http://z,Array",
            ],
        );

        let store = MemoryCatalog::new();
        let pipeline = IngestPipeline::new(test_config(dir.path()));
        let first = pipeline.run_once(&store).await.unwrap();
        let second = pipeline.run_once(&store).await.unwrap();

        assert_eq!(first.unique_problems, 2);
        assert_eq!(second.unique_problems, 2);
        assert_eq!(
            store.count_matching(&ProblemFilter::default()).await.unwrap(),
            2
        );
        // Max across windows survives the re-run untouched.
        let found = store
            .find_matching(&ProblemFilter::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(found[0].title, "Two Sum");
        assert_eq!(found[0].frequency, 80.0);
    }

    #[tokio::test]
    async fn unvalidated_difficulty_is_rejected_at_the_store() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fs::write(dir.path().join("companies.yaml"), "companies:\n  - Google\n").unwrap();
        write_export(
            &data_dir,
            "Google",
            TimeWindow::AllTime,
            &[
                "Easy,Two Sum,80,52,http://x,Array",
                "TRICKY,Mystery,10,10,http://m,Array",
            ],
        );

        let store = MemoryCatalog::new();
        let pipeline = IngestPipeline::new(test_config(dir.path()));
        let summary = pipeline.run_once(&store).await.unwrap();

        // The row parses (validation is deferred) but the store rejects it.
        assert_eq!(summary.unique_problems, 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.rejected, 1);
    }
}
