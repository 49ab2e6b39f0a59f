//! Declarative relationship metadata
//!
//! One `Relationship` per navigation field, built once at startup from the
//! typed navigation tables and consulted by graph traversals instead of any
//! runtime reflection.

use crate::types::EntityType;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Multiplicity {
    /// Scalar navigation; the foreign key lives on the owner.
    One,
    /// Collection navigation; the foreign key lives on each target.
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub field: &'static str,
    pub target: EntityType,
    pub multiplicity: Multiplicity,
    /// Name of the foreign-key property that implements the edge.
    pub foreign_key: &'static str,
    /// Traversing this edge stays inside the owner's aggregate.
    pub aggregate_member: bool,
    /// Explicitly marked as pointing back toward an owner.
    pub back_reference: bool,
}

impl Relationship {
    pub fn is_collection(&self) -> bool {
        self.multiplicity == Multiplicity::Many
    }
}

/// The single foreign-key property of a type that links it to its owning parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParentLink {
    pub foreign_key: &'static str,
    pub parent: EntityType,
}

/// Type-level metadata of one entity type.
#[derive(Debug, Clone, Serialize)]
pub struct TypeDescriptor {
    pub entity_type: EntityType,
    pub relationships: Vec<Relationship>,
    pub parent_link: Option<ParentLink>,
}

impl TypeDescriptor {
    pub fn relationship(&self, field: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.field == field)
    }

    /// The collection navigation on this type whose items are `child`, joined by `foreign_key`.
    pub fn collection_for(&self, child: EntityType, foreign_key: &str) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|r| r.is_collection() && r.target == child && r.foreign_key == foreign_key)
    }
}
