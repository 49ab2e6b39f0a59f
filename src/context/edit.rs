//! Edit-type closure of an aggregate-scoped edit context.

use crate::error::SchemaError;
use crate::schema::Schema;
use crate::types::EntityType;
use serde::Serialize;
use std::collections::BTreeSet;

/// Which types a context scoped to `root` may write, and which it may only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditTypeClosure {
    pub root: EntityType,
    pub edit_types: BTreeSet<EntityType>,
    pub back_reference_types: BTreeSet<EntityType>,
    pub read_only_types: BTreeSet<EntityType>,
    /// Collection on the aggregate root type that holds instances of `root`.
    pub parent_collection_navigation: Option<&'static str>,
}

impl EditTypeClosure {
    /// Walk the relationship graph from `root`.
    ///
    /// Aggregate-member edges are followed. Back-edges (explicitly marked, or
    /// the inverse of a member edge) contribute a readable type and stop.
    /// Every other edge contributes a read-only type and stops. Additional
    /// edit types of `root` are walked the same way afterwards.
    pub fn compute(schema: &Schema, root: EntityType) -> Result<Self, SchemaError> {
        if !schema.contains(root) {
            return Err(SchemaError::UnknownType(root));
        }

        let mut edit_types = BTreeSet::new();
        let mut back_reference_types = BTreeSet::new();
        let mut read_only_types = BTreeSet::new();

        let starts = std::iter::once(root).chain(schema.additional_types(root).iter().copied());
        for start in starts {
            if !edit_types.insert(start) {
                continue;
            }
            let mut pending = vec![start];
            while let Some(owner) = pending.pop() {
                let Some(descriptor) = schema.descriptor(owner) else {
                    return Err(SchemaError::UnknownType(owner));
                };
                for relationship in &descriptor.relationships {
                    if relationship.aggregate_member {
                        if edit_types.insert(relationship.target) {
                            pending.push(relationship.target);
                        }
                    } else if relationship.back_reference
                        || schema.is_inverse_of_aggregate_member(owner, relationship)
                    {
                        back_reference_types.insert(relationship.target);
                    } else {
                        read_only_types.insert(relationship.target);
                    }
                }
            }
        }

        back_reference_types.retain(|ty| !edit_types.contains(ty));
        read_only_types.retain(|ty| !edit_types.contains(ty) && !back_reference_types.contains(ty));

        let parent_collection_navigation = schema
            .aggregate_root()
            .filter(|aggregate_root| *aggregate_root != root)
            .and_then(|aggregate_root| schema.descriptor(aggregate_root))
            .and_then(|descriptor| {
                descriptor
                    .relationships
                    .iter()
                    .find(|r| r.is_collection() && r.target == root)
            })
            .map(|r| r.field);

        Ok(EditTypeClosure {
            root,
            edit_types,
            back_reference_types,
            read_only_types,
            parent_collection_navigation,
        })
    }

    pub fn is_editable(&self, entity_type: EntityType) -> bool {
        self.edit_types.contains(&entity_type)
    }

    /// Reachable at all: editable, back-reference or read-only.
    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.edit_types.contains(&entity_type)
            || self.back_reference_types.contains(&entity_type)
            || self.read_only_types.contains(&entity_type)
    }
}
