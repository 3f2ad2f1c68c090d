//! Domain Layer
//!
//! The tiered-storage vocabulary shared by adapters, the coordinator and the
//! command log.
//!
//! - **Model** (`model.rs`) - Student records and their relational rows
//! - **Ports** (`ports.rs`) - Trait abstractions for tiers and collaborators
//! - **Events** (`events.rs`) - Domain events for audit and observability

pub mod events;
pub mod model;
pub mod ports;

pub use events::DomainEvent;
pub use model::{AccessCount, GradeRow, Scores, Student, StudentRow, TierKind};
pub use ports::{
    CacheError, CacheFields, CommandApplier, ConsensusError, ConsensusProvider,
    DistributedCacheGateway, EntityTier, EventPublisher, RelationalError, RelationalGateway,
    RelationalTx, StateMachine, Statement,
};
