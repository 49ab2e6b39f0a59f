//! Schema
//!
//! Startup-time registry of entity types: relationship metadata per type key,
//! the per-type constructor table, and the memoized edit-type closures.

pub mod registry;
pub mod relationship;

pub use registry::{Schema, SchemaBuilder, TypeHandle};
pub use relationship::{Multiplicity, ParentLink, Relationship, TypeDescriptor};
