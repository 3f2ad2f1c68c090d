//! Relational Tier Adapter
//!
//! Translates student-level operations into statements and row queries on a
//! [`RelationalGateway`], joining the `student` and `grade` tables, and owns
//! the access-count bookkeeping.
//!
//! Writes go through [`RelationalTxn`], a scoped transaction: it is owned by
//! the single call stack that opened it, and it rolls back on every exit path
//! that does not reach [`commit`](RelationalTxn::commit).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::model::{AccessCount, Student, TierKind};
use crate::domain::ports::{RelationalError, RelationalGateway, RelationalTx, Statement};
use crate::error::{Error, Result};

/// Student view over the relational system of record.
#[derive(Clone)]
pub struct RelationalTier {
    gateway: Arc<dyn RelationalGateway>,
}

impl RelationalTier {
    pub fn new(gateway: Arc<dyn RelationalGateway>) -> Self {
        Self { gateway }
    }

    /// Open a scoped transaction.
    pub async fn begin(&self) -> Result<RelationalTxn> {
        let tx = self.gateway.begin().await.map_err(classify)?;
        Ok(RelationalTxn { tx })
    }

    /// Fetch a full student, joining its grade rows.
    pub async fn get(&self, id: &str) -> Result<Student> {
        let row = self
            .gateway
            .fetch_student(id)
            .await
            .map_err(classify)?
            .ok_or_else(|| Error::not_found(TierKind::Relational, id))?;
        let grades = self.gateway.fetch_grades(id).await.map_err(classify)?;
        Ok(Student::from_rows(row, grades))
    }

    /// Fail with `NotFound` unless `id` exists.
    pub async fn ensure_exists(&self, id: &str) -> Result<()> {
        match self.gateway.fetch_student(id).await.map_err(classify)? {
            Some(_) => Ok(()),
            None => Err(Error::not_found(TierKind::Relational, id)),
        }
    }

    /// Current access count for `id`, if one was ever recorded.
    pub async fn access_count(&self, id: &str) -> Result<Option<u64>> {
        Ok(self
            .gateway
            .fetch_access_count(id)
            .await
            .map_err(classify)?
            .map(|c| c.count))
    }

    /// Increment the popularity counter, creating it on first access.
    ///
    /// One statement, so concurrent lookups never lose an increment.
    pub async fn record_access(&self, id: &str) -> Result<()> {
        self.gateway
            .execute(Statement::IncrementAccessCount {
                student_id: id.to_string(),
            })
            .await
            .map_err(classify)?;
        debug!(id = %id, "Recorded access");
        Ok(())
    }

    /// Drop the popularity counter for `id`.
    pub async fn drop_access_count(&self, id: &str) -> Result<()> {
        self.gateway
            .execute(Statement::DeleteAccessCount {
                student_id: id.to_string(),
            })
            .await
            .map_err(classify)
    }

    /// The `limit` most accessed students, most accessed first.
    ///
    /// Counters whose student has disappeared are skipped.
    pub async fn hottest(&self, limit: usize) -> Result<Vec<(Student, u64)>> {
        let counts = self
            .gateway
            .top_access_counts(limit)
            .await
            .map_err(classify)?;

        let mut hottest = Vec::with_capacity(counts.len());
        for AccessCount { student_id, count } in counts {
            match self.get(&student_id).await {
                Ok(student) => hottest.push((student, count)),
                Err(e) if e.is_not_found() => {
                    warn!(id = %student_id, "Access counter has no student row");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(hottest)
    }

    /// Every student and every counter, for snapshots.
    pub async fn dump(&self) -> Result<(Vec<Student>, Vec<AccessCount>)> {
        let ids = self.gateway.list_student_ids().await.map_err(classify)?;
        let mut students = Vec::with_capacity(ids.len());
        for id in ids {
            students.push(self.get(&id).await?);
        }
        let counts = self.gateway.list_access_counts().await.map_err(classify)?;
        Ok((students, counts))
    }
}

/// A relational transaction scoped to one coordinator operation.
///
/// Dropping it without committing rolls it back.
pub struct RelationalTxn {
    tx: Box<dyn RelationalTx>,
}

impl RelationalTxn {
    /// Insert the student row and one grade row per subject.
    pub async fn insert_student(&mut self, student: &Student) -> Result<()> {
        let (row, grades) = student.to_rows();
        self.exec(Statement::InsertStudent(row)).await?;
        for grade in grades {
            self.exec(Statement::InsertGrade(grade)).await?;
        }
        Ok(())
    }

    /// Update non-empty attributes and upsert every supplied subject.
    pub async fn update_student(&mut self, update: &Student) -> Result<()> {
        let (row, grades) = update.to_rows();
        self.exec(Statement::UpdateStudent(row)).await?;
        for grade in grades {
            self.exec(Statement::UpsertGrade(grade)).await?;
        }
        Ok(())
    }

    /// Delete the student row and its grade rows.
    pub async fn delete_student(&mut self, id: &str) -> Result<()> {
        self.exec(Statement::DeleteStudent { id: id.to_string() })
            .await?;
        self.exec(Statement::DeleteGrades {
            student_id: id.to_string(),
        })
        .await
    }

    /// Replace every table's contents.
    pub async fn replace_all(&mut self, students: &[Student], counts: &[AccessCount]) -> Result<()> {
        self.exec(Statement::Truncate).await?;
        for student in students {
            self.insert_student(student).await?;
        }
        for count in counts {
            self.exec(Statement::InsertAccessCount {
                student_id: count.student_id.clone(),
            })
            .await?;
            self.exec(Statement::UpdateAccessCount(count.clone())).await?;
        }
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(classify)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(classify)
    }

    async fn exec(&mut self, statement: Statement) -> Result<()> {
        self.tx.exec(statement).await.map_err(classify)
    }
}

fn classify(err: RelationalError) -> Error {
    Error::backend(TierKind::Relational, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryRelationalGateway, RelationalOp};

    fn tier() -> (Arc<InMemoryRelationalGateway>, RelationalTier) {
        let gateway = Arc::new(InMemoryRelationalGateway::new());
        (gateway.clone(), RelationalTier::new(gateway))
    }

    async fn seed(tier: &RelationalTier, student: &Student) {
        let mut tx = tier.begin().await.unwrap();
        tx.insert_student(student).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_get_joins_grades() {
        let (_, tier) = tier();
        let student = Student::new("s1", "Ada", "f", "1A")
            .with_grade("math", 80.0)
            .with_grade("art", 60.0);
        seed(&tier, &student).await;

        assert_eq!(tier.get("s1").await.unwrap(), student);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_, tier) = tier();
        assert!(tier.get("nobody").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let (_, tier) = tier();
        {
            let mut tx = tier.begin().await.unwrap();
            tx.insert_student(&Student::new("s1", "Ada", "f", "1A"))
                .await
                .unwrap();
        }
        assert!(tier.get("s1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_merges_grades() {
        let (_, tier) = tier();
        seed(&tier, &Student::new("s1", "Ada", "f", "1A").with_grade("math", 80.0)).await;

        let mut tx = tier.begin().await.unwrap();
        tx.update_student(&Student::new("s1", "", "", "2B").with_grade("physics", 90.0))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = tier.get("s1").await.unwrap();
        assert_eq!(stored.name, "Ada");
        assert_eq!(stored.class, "2B");
        assert_eq!(stored.grades.len(), 2);
    }

    #[tokio::test]
    async fn test_record_access_creates_then_increments() {
        let (_, tier) = tier();
        tier.record_access("s1").await.unwrap();
        assert_eq!(tier.access_count("s1").await.unwrap(), Some(1));
        tier.record_access("s1").await.unwrap();
        assert_eq!(tier.access_count("s1").await.unwrap(), Some(2));

        tier.drop_access_count("s1").await.unwrap();
        assert_eq!(tier.access_count("s1").await.unwrap(), None);
    }

    /// Yields to the scheduler before every call so concurrent callers
    /// interleave between statements.
    struct YieldingGateway(Arc<InMemoryRelationalGateway>);

    #[async_trait::async_trait]
    impl RelationalGateway for YieldingGateway {
        async fn begin(&self) -> std::result::Result<Box<dyn RelationalTx>, RelationalError> {
            tokio::task::yield_now().await;
            self.0.begin().await
        }

        async fn execute(&self, statement: Statement) -> std::result::Result<(), RelationalError> {
            tokio::task::yield_now().await;
            self.0.execute(statement).await
        }

        async fn fetch_student(
            &self,
            id: &str,
        ) -> std::result::Result<Option<crate::domain::model::StudentRow>, RelationalError> {
            tokio::task::yield_now().await;
            self.0.fetch_student(id).await
        }

        async fn fetch_grades(
            &self,
            student_id: &str,
        ) -> std::result::Result<Vec<crate::domain::model::GradeRow>, RelationalError> {
            tokio::task::yield_now().await;
            self.0.fetch_grades(student_id).await
        }

        async fn fetch_access_count(
            &self,
            student_id: &str,
        ) -> std::result::Result<Option<AccessCount>, RelationalError> {
            tokio::task::yield_now().await;
            self.0.fetch_access_count(student_id).await
        }

        async fn top_access_counts(
            &self,
            limit: usize,
        ) -> std::result::Result<Vec<AccessCount>, RelationalError> {
            tokio::task::yield_now().await;
            self.0.top_access_counts(limit).await
        }

        async fn list_access_counts(
            &self,
        ) -> std::result::Result<Vec<AccessCount>, RelationalError> {
            tokio::task::yield_now().await;
            self.0.list_access_counts().await
        }

        async fn list_student_ids(&self) -> std::result::Result<Vec<String>, RelationalError> {
            tokio::task::yield_now().await;
            self.0.list_student_ids().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_accesses_are_all_counted() {
        let tier = RelationalTier::new(Arc::new(YieldingGateway(Arc::new(
            InMemoryRelationalGateway::new(),
        ))));

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let tier = tier.clone();
                tokio::spawn(async move { tier.record_access("s1").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(tier.access_count("s1").await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_hottest_orders_by_count() {
        let (_, tier) = tier();
        for id in ["a", "b", "c"] {
            seed(&tier, &Student::new(id, id, "x", "1A")).await;
        }
        for _ in 0..3 {
            tier.record_access("b").await.unwrap();
        }
        tier.record_access("c").await.unwrap();
        tier.record_access("c").await.unwrap();
        tier.record_access("a").await.unwrap();

        let ids: Vec<_> = tier
            .hottest(2)
            .await
            .unwrap()
            .into_iter()
            .map(|(s, _)| s.id)
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_backend_failure_is_classified() {
        let (gateway, tier) = tier();
        gateway.fail_next(RelationalOp::Read, 1);

        let err = tier.get("s1").await.unwrap_err();
        assert!(!err.is_not_found());
    }
}
