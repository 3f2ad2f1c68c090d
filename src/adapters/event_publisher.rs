//! Event Publisher Adapter
//!
//! Implements the `EventPublisher` port. Each replica logs its events with
//! [`LoggingEventPublisher`] and, through a [`CompositeEventPublisher`], also
//! keeps them in an [`InMemoryEventCollector`] for inspection.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Writes every tier-protocol event to the log as structured fields.
///
/// Rollbacks and failed compensations are warnings; the rest is routine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher;

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        match &event {
            DomainEvent::StudentCreated { student_id, .. } => {
                info!(id = %student_id, operation = "add", "Student committed");
            }
            DomainEvent::StudentUpdated {
                student_id,
                subjects,
                ..
            } => {
                info!(
                    id = %student_id,
                    operation = "update",
                    subjects = ?subjects,
                    "Student committed"
                );
            }
            DomainEvent::StudentRemoved { student_id, .. } => {
                info!(id = %student_id, operation = "delete", "Student committed");
            }
            DomainEvent::MutationRolledBack {
                student_id,
                operation,
                reason,
                ..
            } => {
                warn!(
                    id = %student_id,
                    tier = "relational",
                    operation = %operation,
                    cause = %reason,
                    "Mutation rolled back"
                );
            }
            DomainEvent::CacheCompensated {
                student_id,
                succeeded,
                ..
            } => {
                if *succeeded {
                    info!(id = %student_id, tier = "cache", "Cache entry compensated");
                } else {
                    warn!(id = %student_id, tier = "cache", "Cache compensation failed");
                }
            }
            DomainEvent::CacheRewarmed { student_ids, .. } => {
                info!(tier = "cache", count = student_ids.len(), ids = ?student_ids, "Cache rewarmed");
            }
            DomainEvent::ExpiredKeysSwept { removed, .. } => {
                debug!(tier = "volatile", removed, "Expired keys swept");
            }
            DomainEvent::SnapshotRestored { students, .. } => {
                info!(students, "Snapshot restored");
            }
        }
        Ok(())
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events concerning one student, oldest first.
    pub fn events_for(&self, student_id: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.student_id() == Some(student_id))
            .cloned()
            .collect()
    }

    /// Events of one kind, e.g. `"MutationRolledBack"`.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}

/// Hands each event to several publishers in order, stopping at the first error.
#[derive(Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(event.clone()).await?;
        }
        Ok(())
    }
}
