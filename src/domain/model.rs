//! Domain Model
//!
//! Value objects shared by every tier: the student record itself, the
//! relational row shapes it is split into, and the popularity counter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Subject name to score. A `BTreeMap` keeps serialization deterministic.
pub type Scores = BTreeMap<String, f64>;

/// Storage tier enumeration, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Process-local volatile store
    Volatile,
    /// Shared distributed cache
    Cache,
    /// Relational system of record
    Relational,
}

impl TierKind {
    /// All tiers in lookup order.
    pub const ALL: [TierKind; 3] = [TierKind::Volatile, TierKind::Cache, TierKind::Relational];

    /// Stable label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Volatile => "volatile",
            TierKind::Cache => "cache",
            TierKind::Relational => "relational",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A student record: the unit of storage across all tiers.
///
/// The identifier never changes once created. Scores only grow or merge:
/// an update that names some subjects leaves the others untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub grades: Scores,
    /// TTL hint in seconds for the volatile tier; 0 never expires.
    #[serde(default)]
    pub expiration: u64,
}

impl Student {
    /// Create a record with no scores and no expiration.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        gender: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            gender: gender.into(),
            class: class.into(),
            grades: Scores::new(),
            expiration: 0,
        }
    }

    /// Builder: add one subject score.
    pub fn with_grade(mut self, subject: impl Into<String>, score: f64) -> Self {
        self.grades.insert(subject.into(), score);
        self
    }

    /// Builder: set the volatile-tier TTL hint.
    pub fn with_expiration(mut self, seconds: u64) -> Self {
        self.expiration = seconds;
        self
    }

    /// Apply a partial update in place.
    ///
    /// Non-empty attributes overwrite, empty ones keep the stored value.
    /// Scores are merged subject by subject. A zero TTL hint keeps the
    /// stored one.
    pub fn merge_from(&mut self, update: &Student) {
        if !update.name.is_empty() {
            self.name = update.name.clone();
        }
        if !update.gender.is_empty() {
            self.gender = update.gender.clone();
        }
        if !update.class.is_empty() {
            self.class = update.class.clone();
        }
        for (subject, score) in &update.grades {
            self.grades.insert(subject.clone(), *score);
        }
        if update.expiration > 0 {
            self.expiration = update.expiration;
        }
    }

    /// Return a merged copy without touching `self`.
    pub fn merged(&self, update: &Student) -> Student {
        let mut merged = self.clone();
        merged.merge_from(update);
        merged
    }

    /// Split into the relational row shapes.
    pub fn to_rows(&self) -> (StudentRow, Vec<GradeRow>) {
        let row = StudentRow {
            id: self.id.clone(),
            name: self.name.clone(),
            gender: self.gender.clone(),
            class: self.class.clone(),
            expiration: self.expiration,
        };
        let grades = self
            .grades
            .iter()
            .map(|(subject, score)| GradeRow {
                student_id: self.id.clone(),
                subject: subject.clone(),
                score: *score,
            })
            .collect();
        (row, grades)
    }

    /// Rebuild a record from its relational rows.
    pub fn from_rows(row: StudentRow, grades: Vec<GradeRow>) -> Self {
        Self {
            id: row.id,
            name: row.name,
            gender: row.gender,
            class: row.class,
            grades: grades.into_iter().map(|g| (g.subject, g.score)).collect(),
            expiration: row.expiration,
        }
    }
}

/// Row in the `student` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub gender: String,
    pub class: String,
    pub expiration: u64,
}

/// Row in the `grade` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRow {
    pub student_id: String,
    pub subject: String,
    pub score: f64,
}

/// Per-student popularity counter persisted in the relational tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCount {
    pub student_id: String,
    pub count: u64,
}
