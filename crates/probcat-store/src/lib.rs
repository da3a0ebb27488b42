//! Persistent-store boundary for the catalog.
//!
//! The core only needs four capabilities from whatever store backs the
//! catalog: bulk insert, delete-all, count/find with a filter, and the
//! grouping queries behind the company index and statistics. `CatalogStore`
//! is that boundary; `MemoryCatalog` is the in-process implementation used
//! by tests and the default serve path.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use probcat_core::{
    CatalogStats, CompanyAggregate, Difficulty, DifficultyBreakdown, ProblemRecord,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "probcat-store";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Cannot connect or persist at all. Fatal to an ingestion run.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A record failed store-side schema validation.
    #[error("validation rejected: {0}")]
    Validation(String),
}

/// Read-path filter. All clauses are conjunctive; `search` is a
/// case-insensitive substring match over the title.
#[derive(Debug, Clone, Default)]
pub struct ProblemFilter {
    pub difficulty: Option<Difficulty>,
    pub company: Option<String>,
    pub search: Option<String>,
}

impl ProblemFilter {
    pub fn matches(&self, record: &ProblemRecord) -> bool {
        if let Some(difficulty) = self.difficulty {
            if record.difficulty != difficulty.as_str() {
                return false;
            }
        }
        if let Some(company) = &self.company {
            if !record.companies.contains(company) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !record
                .title
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Per-batch insert outcome. Rejections are per-item, never per-batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    pub rejected: usize,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts what validates, skips and logs what does not.
    async fn bulk_insert(&self, batch: Vec<ProblemRecord>) -> Result<InsertReport, StoreError>;

    /// Clears the catalog, returning the number of records removed.
    async fn delete_all(&self) -> Result<u64, StoreError>;

    async fn count_matching(&self, filter: &ProblemFilter) -> Result<u64, StoreError>;

    /// Matching records ordered by descending frequency then ascending title,
    /// windowed by `skip`/`limit`.
    async fn find_matching(
        &self,
        filter: &ProblemFilter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<ProblemRecord>, StoreError>;

    /// Per-company counts sorted by descending problem count.
    async fn company_aggregates(&self) -> Result<Vec<CompanyAggregate>, StoreError>;

    async fn stats(&self) -> Result<CatalogStats, StoreError>;
}

/// Store-side schema check: difficulty must be a known level and the
/// required fields must be present. Deferred here from parsing on purpose.
pub fn validate_record(record: &ProblemRecord) -> Result<(), StoreError> {
    if record.title.trim().is_empty() {
        return Err(StoreError::Validation("missing title".to_string()));
    }
    if record.url.trim().is_empty() {
        return Err(StoreError::Validation(format!(
            "missing url for {:?}",
            record.title
        )));
    }
    if record.companies.is_empty() {
        return Err(StoreError::Validation(format!(
            "no companies for {:?}",
            record.title
        )));
    }
    if Difficulty::parse(&record.difficulty).is_none() {
        return Err(StoreError::Validation(format!(
            "unknown difficulty {:?} for {:?}",
            record.difficulty, record.title
        )));
    }
    Ok(())
}

fn read_order(a: &ProblemRecord, b: &ProblemRecord) -> Ordering {
    b.frequency
        .total_cmp(&a.frequency)
        .then_with(|| a.title.cmp(&b.title))
}

/// In-memory catalog behind the store boundary.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: RwLock<Vec<ProblemRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn bulk_insert(&self, batch: Vec<ProblemRecord>) -> Result<InsertReport, StoreError> {
        let mut report = InsertReport::default();
        let mut records = self.records.write().await;
        for record in batch {
            match validate_record(&record) {
                Ok(()) => {
                    records.push(record);
                    report.inserted += 1;
                }
                Err(err) => {
                    warn!(%err, "skipping record rejected by store");
                    report.rejected += 1;
                }
            }
        }
        Ok(report)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }

    async fn count_matching(&self, filter: &ProblemFilter) -> Result<u64, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn find_matching(
        &self,
        filter: &ProblemFilter,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<ProblemRecord>, StoreError> {
        let records = self.records.read().await;
        let mut matching: Vec<ProblemRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(read_order);
        Ok(matching.into_iter().skip(skip).take(limit).collect())
    }

    async fn company_aggregates(&self) -> Result<Vec<CompanyAggregate>, StoreError> {
        let records = self.records.read().await;
        let mut by_company: BTreeMap<String, CompanyAggregate> = BTreeMap::new();
        for record in records.iter() {
            for company in &record.companies {
                let entry = by_company
                    .entry(company.clone())
                    .or_insert_with(|| CompanyAggregate {
                        name: company.clone(),
                        problem_count: 0,
                        easy: 0,
                        medium: 0,
                        hard: 0,
                    });
                entry.problem_count += 1;
                match Difficulty::parse(&record.difficulty) {
                    Some(Difficulty::Easy) => entry.easy += 1,
                    Some(Difficulty::Medium) => entry.medium += 1,
                    Some(Difficulty::Hard) => entry.hard += 1,
                    None => {}
                }
            }
        }
        let mut aggregates: Vec<CompanyAggregate> = by_company.into_values().collect();
        aggregates.sort_by(|a, b| {
            b.problem_count
                .cmp(&a.problem_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(aggregates)
    }

    async fn stats(&self) -> Result<CatalogStats, StoreError> {
        let records = self.records.read().await;
        let mut by_difficulty = DifficultyBreakdown::default();
        let mut companies: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
        for record in records.iter() {
            by_difficulty.record(&record.difficulty);
            for company in &record.companies {
                companies.insert(company.as_str());
            }
        }
        Ok(CatalogStats {
            total_problems: records.len() as u64,
            total_companies: companies.len() as u64,
            by_difficulty,
        })
    }
}

/// Fresh replaces the whole catalog; additive inserts on top of it. Both
/// tolerate per-item validation rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Fresh,
    Additive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub cleared: u64,
    pub batches: usize,
    pub inserted: usize,
    pub rejected: usize,
}

/// Partitions finalized records into fixed-size batches and hands each to the
/// store. Never inspects record contents beyond passing them through.
#[derive(Debug, Clone, Copy)]
pub struct BatchLoader {
    batch_size: usize,
}

impl BatchLoader {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub async fn load(
        &self,
        store: &dyn CatalogStore,
        records: Vec<ProblemRecord>,
        mode: LoadMode,
    ) -> Result<LoadReport, StoreError> {
        let mut report = LoadReport::default();
        if mode == LoadMode::Fresh {
            report.cleared = store.delete_all().await?;
            info!(cleared = report.cleared, "cleared catalog for fresh load");
        }
        for chunk in records.chunks(self.batch_size) {
            let insert = store.bulk_insert(chunk.to_vec()).await?;
            report.batches += 1;
            report.inserted += insert.inserted;
            report.rejected += insert.rejected;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(title: &str, difficulty: &str, frequency: f64, companies: &[&str]) -> ProblemRecord {
        ProblemRecord {
            title: title.to_string(),
            difficulty: difficulty.to_string(),
            companies: companies.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
            topics: vec!["Array".to_string()],
            url: format!("https://example.com/{}", title.replace(' ', "-")),
            frequency,
            acceptance_rate: 50.0,
        }
    }

    #[tokio::test]
    async fn insert_validates_per_item_and_continues() {
        let store = MemoryCatalog::new();
        let batch = vec![
            record("Two Sum", "Easy", 80.0, &["Google"]),
            record("Mystery", "Tricky", 10.0, &["Google"]),
            record("", "Easy", 10.0, &["Google"]),
            record("Orphan", "Easy", 10.0, &[]),
            record("Median", "Hard", 30.0, &["Meta"]),
        ];
        let report = store.bulk_insert(batch).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.rejected, 3);
        assert_eq!(
            store.count_matching(&ProblemFilter::default()).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn find_orders_by_frequency_then_title() {
        let store = MemoryCatalog::new();
        store
            .bulk_insert(vec![
                record("Bravo", "Easy", 50.0, &["Google"]),
                record("Alpha", "Easy", 50.0, &["Google"]),
                record("Charlie", "Easy", 90.0, &["Google"]),
            ])
            .await
            .unwrap();
        let found = store
            .find_matching(&ProblemFilter::default(), 0, 10)
            .await
            .unwrap();
        let titles: Vec<&str> = found.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Charlie", "Alpha", "Bravo"]);
    }

    #[tokio::test]
    async fn filters_compose() {
        let store = MemoryCatalog::new();
        store
            .bulk_insert(vec![
                record("Two Sum", "Easy", 80.0, &["Google", "Amazon"]),
                record("Three Sum", "Medium", 60.0, &["Google"]),
                record("Median of Arrays", "Hard", 40.0, &["Amazon"]),
            ])
            .await
            .unwrap();

        let filter = ProblemFilter {
            difficulty: Some(Difficulty::Easy),
            company: Some("Amazon".to_string()),
            search: Some("sum".to_string()),
        };
        assert_eq!(store.count_matching(&filter).await.unwrap(), 1);
        let found = store.find_matching(&filter, 0, 10).await.unwrap();
        assert_eq!(found[0].title, "Two Sum");

        let search_only = ProblemFilter {
            search: Some("SUM".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count_matching(&search_only).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn aggregates_group_by_company_membership() {
        let store = MemoryCatalog::new();
        store
            .bulk_insert(vec![
                record("Two Sum", "Easy", 80.0, &["Google", "Amazon"]),
                record("Three Sum", "Medium", 60.0, &["Google"]),
                record("Median of Arrays", "Hard", 40.0, &["Amazon"]),
            ])
            .await
            .unwrap();

        let aggregates = store.company_aggregates().await.unwrap();
        assert_eq!(aggregates.len(), 2);
        // Equal counts break ties on name.
        assert_eq!(aggregates[0].name, "Amazon");
        assert_eq!(aggregates[0].problem_count, 2);
        assert_eq!(aggregates[0].easy, 1);
        assert_eq!(aggregates[0].hard, 1);
        assert_eq!(aggregates[1].name, "Google");
        assert_eq!(aggregates[1].easy, 1);
        assert_eq!(aggregates[1].medium, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_problems, 3);
        assert_eq!(stats.total_companies, 2);
        assert_eq!(stats.by_difficulty.easy, 1);
        assert_eq!(stats.by_difficulty.medium, 1);
        assert_eq!(stats.by_difficulty.hard, 1);
    }

    #[tokio::test]
    async fn fresh_load_replaces_and_is_idempotent() {
        let store = MemoryCatalog::new();
        let loader = BatchLoader::new(2);
        let records = vec![
            record("Two Sum", "Easy", 80.0, &["Google"]),
            record("Three Sum", "Medium", 60.0, &["Google"]),
            record("Median of Arrays", "Hard", 40.0, &["Amazon"]),
        ];

        let first = loader
            .load(&store, records.clone(), LoadMode::Fresh)
            .await
            .unwrap();
        assert_eq!(first.cleared, 0);
        assert_eq!(first.batches, 2);
        assert_eq!(first.inserted, 3);

        let second = loader.load(&store, records, LoadMode::Fresh).await.unwrap();
        assert_eq!(second.cleared, 3);
        assert_eq!(second.inserted, 3);
        assert_eq!(
            store.count_matching(&ProblemFilter::default()).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn additive_load_keeps_existing_records() {
        let store = MemoryCatalog::new();
        let loader = BatchLoader::new(10);
        loader
            .load(
                &store,
                vec![record("Two Sum", "Easy", 80.0, &["Google"])],
                LoadMode::Fresh,
            )
            .await
            .unwrap();
        let report = loader
            .load(
                &store,
                vec![
                    record("Three Sum", "Medium", 60.0, &["Google"]),
                    record("Mystery", "Tricky", 10.0, &["Google"]),
                ],
                LoadMode::Additive,
            )
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(
            store.count_matching(&ProblemFilter::default()).await.unwrap(),
            2
        );
    }
}
