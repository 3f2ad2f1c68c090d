//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  EntityTier │ RelationalGateway │ DistributedCacheGateway  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ VolatileTier │ CacheTier │ RelationalTier                  │ │
//! │  │ InMemoryRelationalGateway │ InMemoryCacheGateway           │ │
//! │  │ LoggingEventPublisher │ InMemoryEventCollector             │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rollcall::adapters::{CacheTier, InMemoryCacheGateway};
//! use rollcall::domain::ports::EntityTier;
//!
//! let cache = CacheTier::new(Arc::new(InMemoryCacheGateway::new()));
//! let student = cache.get("s1").await?;
//! ```

mod cache;
mod faults;
mod memory_cache;
mod memory_relational;
mod relational;
mod volatile;

pub use cache::{CacheTier, STUDENT_KEY_PREFIX};
pub use memory_cache::{CacheOp, InMemoryCacheGateway};
pub use memory_relational::{InMemoryRelationalGateway, RelationalOp};
pub use relational::{RelationalTier, RelationalTxn};
pub use volatile::VolatileTier;

// Re-export event publishers for convenience
mod event_publisher;
pub use event_publisher::{CompositeEventPublisher, InMemoryEventCollector, LoggingEventPublisher};
