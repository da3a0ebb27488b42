//! Core domain model for the problem catalog.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "probcat-core";

/// Validated difficulty levels. Parsing keeps difficulty as a normalized
/// string; this enum is used by query filters and store-side validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_difficulty(raw).as_str() {
            "Easy" => Some(Self::Easy),
            "Medium" => Some(Self::Medium),
            "Hard" => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        }
    }
}

/// Uppercases the first character and lowercases the rest ("EASY" -> "Easy").
/// Unrecognized values pass through normalized; validation happens at the
/// store boundary, not here.
pub fn normalize_difficulty(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
    }
}

/// One raw observation of a problem from one company's source file.
/// Produced per CSV row and consumed immediately by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub difficulty: String,
    pub title: String,
    pub frequency: f64,
    pub acceptance_rate: f64,
    pub url: String,
    pub topics: Vec<String>,
    pub source_company: String,
}

/// Deduplication key: trimmed title (case-sensitive) plus normalized
/// difficulty. Two titles differing only in case are distinct on purpose.
/// `Ord` gives the deterministic finalize order for batch loads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProblemKey {
    pub title: String,
    pub difficulty: String,
}

impl ProblemKey {
    pub fn of(sighting: &Sighting) -> Self {
        Self {
            title: sighting.title.trim().to_string(),
            difficulty: sighting.difficulty.clone(),
        }
    }
}

/// The deduplicated, merged catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemRecord {
    pub title: String,
    pub difficulty: String,
    pub companies: BTreeSet<String>,
    pub topics: Vec<String>,
    pub url: String,
    pub frequency: f64,
    pub acceptance_rate: f64,
}

impl ProblemRecord {
    /// Seeds a record from the first sighting of its identity.
    pub fn from_sighting(sighting: Sighting) -> Self {
        let mut companies = BTreeSet::new();
        companies.insert(sighting.source_company);
        let mut topics = Vec::new();
        for topic in sighting.topics {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        Self {
            title: sighting.title.trim().to_string(),
            difficulty: sighting.difficulty,
            companies,
            topics,
            url: sighting.url,
            frequency: sighting.frequency,
            acceptance_rate: sighting.acceptance_rate,
        }
    }

}

/// Per-company counts derived by grouping records on `companies` membership.
/// Never stored; recomputed per query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyAggregate {
    pub name: String,
    pub problem_count: u64,
    pub easy: u64,
    pub medium: u64,
    pub hard: u64,
}

/// Counts per difficulty level, serialized with the level names as keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyBreakdown {
    #[serde(rename = "Easy")]
    pub easy: u64,
    #[serde(rename = "Medium")]
    pub medium: u64,
    #[serde(rename = "Hard")]
    pub hard: u64,
}

impl DifficultyBreakdown {
    /// Counts one record. Difficulty strings outside the enum are ignored;
    /// they never survive store-side validation anyway.
    pub fn record(&mut self, difficulty: &str) {
        match Difficulty::parse(difficulty) {
            Some(Difficulty::Easy) => self.easy += 1,
            Some(Difficulty::Medium) => self.medium += 1,
            Some(Difficulty::Hard) => self.hard += 1,
            None => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.easy + self.medium + self.hard
    }
}

/// Whole-catalog statistics for the read path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_problems: u64,
    pub total_companies: u64,
    pub by_difficulty: DifficultyBreakdown,
}
