//! In-Memory Relational Gateway
//!
//! A transactional stand-in for the relational system of record, used by the
//! binary's single-host mode and by tests. Three tables (`student`, `grade`,
//! `student_count`) live behind one lock. Transactions buffer their
//! statements and apply them atomically on commit; a transaction dropped
//! without commit is discarded.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::faults::FaultPlan;
use crate::domain::model::{AccessCount, GradeRow, StudentRow};
use crate::domain::ports::{RelationalError, RelationalGateway, RelationalTx, Statement};

/// Operations that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationalOp {
    Begin,
    Exec,
    Commit,
    Read,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    students: BTreeMap<String, StudentRow>,
    grades: BTreeMap<String, BTreeMap<String, f64>>,
    access: BTreeMap<String, u64>,
}

impl Tables {
    fn apply(&mut self, statement: &Statement) -> Result<(), RelationalError> {
        match statement {
            Statement::InsertStudent(row) => {
                if self.students.contains_key(&row.id) {
                    return Err(duplicate("student", &row.id));
                }
                self.students.insert(row.id.clone(), row.clone());
            }
            Statement::InsertGrade(grade) => {
                if !self.students.contains_key(&grade.student_id) {
                    return Err(RelationalError::Constraint(format!(
                        "grade references unknown student '{}'",
                        grade.student_id
                    )));
                }
                let subjects = self.grades.entry(grade.student_id.clone()).or_default();
                if subjects.contains_key(&grade.subject) {
                    return Err(duplicate(
                        "grade",
                        &format!("{}/{}", grade.student_id, grade.subject),
                    ));
                }
                subjects.insert(grade.subject.clone(), grade.score);
            }
            Statement::UpdateStudent(row) => {
                // Zero rows affected is not an error
                if let Some(stored) = self.students.get_mut(&row.id) {
                    if !row.name.is_empty() {
                        stored.name = row.name.clone();
                    }
                    if !row.gender.is_empty() {
                        stored.gender = row.gender.clone();
                    }
                    if !row.class.is_empty() {
                        stored.class = row.class.clone();
                    }
                    if row.expiration > 0 {
                        stored.expiration = row.expiration;
                    }
                }
            }
            Statement::UpsertGrade(grade) => {
                if self.students.contains_key(&grade.student_id) {
                    self.grades
                        .entry(grade.student_id.clone())
                        .or_default()
                        .insert(grade.subject.clone(), grade.score);
                }
            }
            Statement::DeleteStudent { id } => {
                self.students.remove(id);
            }
            Statement::DeleteGrades { student_id } => {
                self.grades.remove(student_id);
            }
            Statement::InsertAccessCount { student_id } => {
                if self.access.contains_key(student_id) {
                    return Err(duplicate("student_count", student_id));
                }
                self.access.insert(student_id.clone(), 1);
            }
            Statement::IncrementAccessCount { student_id } => {
                *self.access.entry(student_id.clone()).or_insert(0) += 1;
            }
            Statement::UpdateAccessCount(record) => {
                if let Some(count) = self.access.get_mut(&record.student_id) {
                    *count = record.count;
                }
            }
            Statement::DeleteAccessCount { student_id } => {
                self.access.remove(student_id);
            }
            Statement::Truncate => {
                *self = Tables::default();
            }
        }
        Ok(())
    }
}

fn duplicate(table: &str, key: &str) -> RelationalError {
    RelationalError::Constraint(format!("duplicate entry '{}' in {}", key, table))
}

fn injected(op: RelationalOp) -> RelationalError {
    match op {
        RelationalOp::Commit => RelationalError::Transaction("injected commit failure".into()),
        other => RelationalError::Connection(format!("injected {:?} failure", other)),
    }
}

/// Shared counters for transaction outcomes.
#[derive(Debug, Default)]
struct TxCounters {
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// In-memory relational backend
pub struct InMemoryRelationalGateway {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<FaultPlan<RelationalOp>>,
    counters: Arc<TxCounters>,
    student_reads: AtomicU64,
}

impl Default for InMemoryRelationalGateway {
    fn default() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            faults: Arc::new(FaultPlan::new()),
            counters: Arc::new(TxCounters::default()),
            student_reads: AtomicU64::new(0),
        }
    }
}

impl InMemoryRelationalGateway {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: RelationalOp, times: usize) {
        self.faults.arm(op, times);
    }

    /// Disarm every pending fault.
    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Number of committed student rows.
    pub fn student_count(&self) -> usize {
        self.tables.read().students.len()
    }

    /// Whether a committed student row exists.
    pub fn has_student(&self, id: &str) -> bool {
        self.tables.read().students.contains_key(id)
    }

    /// Committed access count for `id`.
    pub fn access_count_of(&self, id: &str) -> Option<u64> {
        self.tables.read().access.get(id).copied()
    }

    /// Number of `student`/`grade` row reads served so far.
    pub fn student_reads(&self) -> u64 {
        self.student_reads.load(Ordering::Relaxed)
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> u64 {
        self.counters.commits.load(Ordering::Relaxed)
    }

    /// Number of transactions rolled back, explicitly or on drop.
    pub fn rollbacks(&self) -> u64 {
        self.counters.rollbacks.load(Ordering::Relaxed)
    }

    fn check(&self, op: RelationalOp) -> Result<(), RelationalError> {
        if self.faults.trip(op) {
            return Err(injected(op));
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalGateway for InMemoryRelationalGateway {
    async fn begin(&self) -> Result<Box<dyn RelationalTx>, RelationalError> {
        self.check(RelationalOp::Begin)?;
        Ok(Box::new(InMemoryTx {
            tables: Arc::clone(&self.tables),
            faults: Arc::clone(&self.faults),
            counters: Arc::clone(&self.counters),
            staged: Vec::new(),
            finished: false,
        }))
    }

    async fn execute(&self, statement: Statement) -> Result<(), RelationalError> {
        self.check(RelationalOp::Exec)?;
        self.tables.write().apply(&statement)
    }

    async fn fetch_student(&self, id: &str) -> Result<Option<StudentRow>, RelationalError> {
        self.check(RelationalOp::Read)?;
        self.student_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.tables.read().students.get(id).cloned())
    }

    async fn fetch_grades(&self, student_id: &str) -> Result<Vec<GradeRow>, RelationalError> {
        self.check(RelationalOp::Read)?;
        self.student_reads.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        Ok(tables
            .grades
            .get(student_id)
            .map(|subjects| {
                subjects
                    .iter()
                    .map(|(subject, score)| GradeRow {
                        student_id: student_id.to_string(),
                        subject: subject.clone(),
                        score: *score,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_access_count(
        &self,
        student_id: &str,
    ) -> Result<Option<AccessCount>, RelationalError> {
        self.check(RelationalOp::Read)?;
        Ok(self
            .tables
            .read()
            .access
            .get(student_id)
            .map(|count| AccessCount {
                student_id: student_id.to_string(),
                count: *count,
            }))
    }

    async fn top_access_counts(&self, limit: usize) -> Result<Vec<AccessCount>, RelationalError> {
        let mut counts = self.list_access_counts().await?;
        // Highest first; ties broken by id for a stable order
        counts.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.student_id.cmp(&b.student_id))
        });
        counts.truncate(limit);
        Ok(counts)
    }

    async fn list_access_counts(&self) -> Result<Vec<AccessCount>, RelationalError> {
        self.check(RelationalOp::Read)?;
        Ok(self
            .tables
            .read()
            .access
            .iter()
            .map(|(student_id, count)| AccessCount {
                student_id: student_id.clone(),
                count: *count,
            })
            .collect())
    }

    async fn list_student_ids(&self) -> Result<Vec<String>, RelationalError> {
        self.check(RelationalOp::Read)?;
        Ok(self.tables.read().students.keys().cloned().collect())
    }
}

/// Buffered transaction over [`InMemoryRelationalGateway`].
struct InMemoryTx {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<FaultPlan<RelationalOp>>,
    counters: Arc<TxCounters>,
    staged: Vec<Statement>,
    finished: bool,
}

impl InMemoryTx {
    fn finish(&mut self, committed: bool) {
        self.finished = true;
        self.staged.clear();
        if committed {
            self.counters.commits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl RelationalTx for InMemoryTx {
    async fn exec(&mut self, statement: Statement) -> Result<(), RelationalError> {
        if self.faults.trip(RelationalOp::Exec) {
            return Err(injected(RelationalOp::Exec));
        }
        // Surface primary-key violations at statement time, as a real database would
        if let Statement::InsertStudent(row) = &statement {
            let staged_insert = self
                .staged
                .iter()
                .any(|s| matches!(s, Statement::InsertStudent(r) if r.id == row.id));
            let truncated = self.staged.iter().any(|s| matches!(s, Statement::Truncate));
            if staged_insert || (!truncated && self.tables.read().students.contains_key(&row.id)) {
                return Err(duplicate("student", &row.id));
            }
        }
        self.staged.push(statement);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), RelationalError> {
        if self.faults.trip(RelationalOp::Commit) {
            self.finish(false);
            return Err(injected(RelationalOp::Commit));
        }

        let applied = {
            let mut tables = self.tables.write();
            let mut scratch = tables.clone();
            let result = self
                .staged
                .iter()
                .try_for_each(|statement| scratch.apply(statement));
            if result.is_ok() {
                *tables = scratch;
            }
            result
        };

        if applied.is_ok() {
            debug!(statements = self.staged.len(), "Committed transaction");
        }
        self.finish(applied.is_ok());
        applied
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), RelationalError> {
        debug!(statements = self.staged.len(), "Rolled back transaction");
        self.finish(false);
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            debug!(statements = self.staged.len(), "Transaction dropped without commit, rolling back");
            self.finish(false);
        }
    }
}
