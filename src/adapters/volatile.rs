//! Volatile Tier Adapter
//!
//! Implements the `EntityTier` port over the in-process [`VolatileStore`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::model::{Student, TierKind};
use crate::domain::ports::EntityTier;
use crate::error::{Error, Result};
use crate::volatile::VolatileStore;

/// Entity view over the volatile store, keyed by student id.
#[derive(Clone)]
pub struct VolatileTier {
    store: Arc<VolatileStore<Student>>,
}

impl VolatileTier {
    pub fn new(store: Arc<VolatileStore<Student>>) -> Self {
        Self { store }
    }

    /// Get the underlying store
    pub fn store(&self) -> &Arc<VolatileStore<Student>> {
        &self.store
    }
}

#[async_trait]
impl EntityTier for VolatileTier {
    fn kind(&self) -> TierKind {
        TierKind::Volatile
    }

    async fn get(&self, id: &str) -> Result<Student> {
        self.store
            .get(id)
            .ok_or_else(|| Error::not_found(TierKind::Volatile, id))
    }

    async fn put(&self, student: &Student) -> Result<()> {
        debug!(id = %student.id, ttl = student.expiration, "Storing student in volatile tier");
        self.store
            .set(student.id.clone(), student.clone(), student.expiration);
        Ok(())
    }

    async fn merge(&self, update: &Student) -> Result<Student> {
        let merged = self.get(&update.id).await?.merged(update);
        if !self.store.update(&update.id, merged.clone()) {
            return Err(Error::not_found(TierKind::Volatile, &update.id));
        }
        Ok(merged)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.store.delete(id) {
            Ok(())
        } else {
            Err(Error::not_found(TierKind::Volatile, id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> VolatileTier {
        VolatileTier::new(Arc::new(VolatileStore::new()))
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let err = tier().get("s1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_merge_keeps_existing_subjects() {
        let tier = tier();
        tier.put(&Student::new("s1", "Ada", "f", "1A").with_grade("math", 80.0))
            .await
            .unwrap();

        let merged = tier
            .merge(&Student::new("s1", "", "", "").with_grade("physics", 90.0))
            .await
            .unwrap();

        assert_eq!(merged.grades.len(), 2);
        assert_eq!(tier.get("s1").await.unwrap(), merged);
    }

    #[tokio::test]
    async fn test_merge_missing_is_not_found() {
        let err = tier().merge(&Student::new("s1", "", "", "")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete() {
        let tier = tier();
        tier.put(&Student::new("s1", "Ada", "f", "1A")).await.unwrap();

        tier.delete("s1").await.unwrap();
        assert!(tier.delete("s1").await.unwrap_err().is_not_found());
    }
}
