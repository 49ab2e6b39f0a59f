//! Graphcache: aggregate-aware object-graph cache and unit of work
//!
//! Entities are plain serde structs persisted in an embedded key-value store.
//! A [`ContextProvider`](context::ContextProvider) hands out persistence
//! contexts: units of work with an identity map, change tracking and lazily
//! loaded navigations. Reads are served from the cheapest consistent source
//! (a per-aggregate cache, a full-table cache or the store), and every commit
//! is propagated incrementally into those caches.

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod logging;
pub mod model;
pub mod propagation;
pub mod repository;
pub mod schema;
pub mod store;
pub mod types;

pub use context::{Context, ContextProvider, ContextPurpose};
pub use entity::{Entity, EntityRef};
pub use error::{PersistenceError, Result};
pub use repository::Repository;
pub use types::{EntityType, Id};
