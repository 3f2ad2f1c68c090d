//! Distributed Cache Tier Adapter
//!
//! Implements the `EntityTier` port over a [`DistributedCacheGateway`].
//! Each student is a field map under `student:<id>`; scores are stored as a
//! JSON object in the `grade` field.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::model::{Scores, Student, TierKind};
use crate::domain::ports::{CacheError, CacheFields, DistributedCacheGateway, EntityTier};
use crate::error::{Error, Result};

/// Key prefix for student entries
pub const STUDENT_KEY_PREFIX: &str = "student:";

/// Entity view over the distributed cache.
#[derive(Clone)]
pub struct CacheTier {
    gateway: Arc<dyn DistributedCacheGateway>,
}

impl CacheTier {
    pub fn new(gateway: Arc<dyn DistributedCacheGateway>) -> Self {
        Self { gateway }
    }

    /// Cache key for a student id.
    pub fn key(id: &str) -> String {
        format!("{}{}", STUDENT_KEY_PREFIX, id)
    }

    /// Every cached student.
    ///
    /// Keys that vanish between listing and reading are skipped.
    pub async fn list_all(&self) -> Result<Vec<Student>> {
        let keys = self
            .gateway
            .list_keys(STUDENT_KEY_PREFIX)
            .await
            .map_err(classify)?;

        let mut students = Vec::with_capacity(keys.len());
        for key in keys {
            match self.gateway.get_all(&key).await.map_err(classify)? {
                Some(fields) => students.push(decode(&fields)?),
                None => debug!(key = %key, "Cache key vanished while listing"),
            }
        }
        Ok(students)
    }

    /// Replace the entire cache contents with `students`.
    pub async fn replace_all(&self, students: &[Student]) -> Result<()> {
        self.gateway.flush_all().await.map_err(classify)?;
        for student in students {
            self.put(student).await?;
        }
        info!(count = students.len(), "Reloaded distributed cache");
        Ok(())
    }

    /// Remove every key.
    pub async fn flush(&self) -> Result<()> {
        self.gateway.flush_all().await.map_err(classify)
    }
}

#[async_trait]
impl EntityTier for CacheTier {
    fn kind(&self) -> TierKind {
        TierKind::Cache
    }

    async fn get(&self, id: &str) -> Result<Student> {
        match self.gateway.get_all(&Self::key(id)).await.map_err(classify)? {
            Some(fields) => decode(&fields),
            None => Err(Error::not_found(TierKind::Cache, id)),
        }
    }

    async fn put(&self, student: &Student) -> Result<()> {
        self.gateway
            .set(&Self::key(&student.id), encode(student)?)
            .await
            .map_err(|e| {
                warn!(id = %student.id, error = %e, "Failed to write student to cache");
                classify(e)
            })
    }

    async fn merge(&self, update: &Student) -> Result<Student> {
        let merged = self.get(&update.id).await?.merged(update);
        self.put(&merged).await?;
        Ok(merged)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.gateway.delete(&Self::key(id)).await.map_err(classify)? {
            Ok(())
        } else {
            Err(Error::not_found(TierKind::Cache, id))
        }
    }
}

/// Every cache client failure is a backend failure; absence is never an error here.
fn classify(err: CacheError) -> Error {
    Error::backend(TierKind::Cache, err)
}

fn encode(student: &Student) -> Result<CacheFields> {
    let mut fields = CacheFields::new();
    fields.insert("id".into(), student.id.clone());
    fields.insert("name".into(), student.name.clone());
    fields.insert("gender".into(), student.gender.clone());
    fields.insert("class".into(), student.class.clone());
    fields.insert("grade".into(), serde_json::to_string(&student.grades)?);
    fields.insert("expiration".into(), student.expiration.to_string());
    Ok(fields)
}

fn decode(fields: &CacheFields) -> Result<Student> {
    let field = |name: &str| fields.get(name).cloned().unwrap_or_default();

    let id = field("id");
    if id.is_empty() {
        return Err(Error::backend(TierKind::Cache, "cached entry has no id field"));
    }

    let grades: Scores = match fields.get("grade") {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
            .map_err(|e| Error::backend(TierKind::Cache, format!("bad grade field: {}", e)))?,
        _ => Scores::new(),
    };

    let expiration = match fields.get("expiration") {
        Some(raw) if !raw.is_empty() => raw.parse().map_err(|e| {
            Error::backend(TierKind::Cache, format!("bad expiration field: {}", e))
        })?,
        _ => 0,
    };

    Ok(Student {
        id,
        name: field("name"),
        gender: field("gender"),
        class: field("class"),
        grades,
        expiration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{CacheOp, InMemoryCacheGateway};
    use assert_matches::assert_matches;

    fn tier() -> (Arc<InMemoryCacheGateway>, CacheTier) {
        let gateway = Arc::new(InMemoryCacheGateway::new());
        (gateway.clone(), CacheTier::new(gateway))
    }

    #[test]
    fn test_field_layout() {
        let student = Student::new("s1", "Ada", "f", "1A")
            .with_grade("math", 80.0)
            .with_expiration(30);
        let fields = encode(&student).unwrap();

        assert_eq!(fields["id"], "s1");
        assert_eq!(fields["grade"], r#"{"math":80.0}"#);
        assert_eq!(fields["expiration"], "30");
        assert_eq!(decode(&fields).unwrap(), student);
    }

    #[test]
    fn test_decode_rejects_corrupt_grades() {
        let mut fields = encode(&Student::new("s1", "Ada", "f", "1A")).unwrap();
        fields.insert("grade".into(), "not json".into());

        assert_matches!(
            decode(&fields),
            Err(Error::Backend {
                tier: TierKind::Cache,
                ..
            })
        );
    }

    #[tokio::test]
    async fn test_put_get_uses_prefixed_key() {
        let (gateway, tier) = tier();
        tier.put(&Student::new("s1", "Ada", "f", "1A")).await.unwrap();

        assert!(gateway.contains_key("student:s1"));
        assert_eq!(tier.get("s1").await.unwrap().name, "Ada");
    }

    #[tokio::test]
    async fn test_gateway_failure_is_backend_not_miss() {
        let (gateway, tier) = tier();
        gateway.fail_next(CacheOp::Get, 1);

        let err = tier.get("s1").await.unwrap_err();
        assert!(!err.is_not_found());
        assert_matches!(err, Error::Backend { tier: TierKind::Cache, .. });
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_, tier) = tier();
        assert!(tier.delete("s1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_replace_all_drops_stale_entries() {
        let (_, tier) = tier();
        tier.put(&Student::new("old", "Old", "m", "9Z")).await.unwrap();

        tier.replace_all(&[Student::new("s1", "Ada", "f", "1A")])
            .await
            .unwrap();

        let ids: Vec<_> = tier.list_all().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["s1".to_string()]);
    }
}
