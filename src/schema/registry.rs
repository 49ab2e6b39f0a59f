//! Type registry and per-type constructor table

use crate::context::edit::EditTypeClosure;
use crate::context::provider::Shared;
use crate::entity::{navigations_of, Entity, EntityRef, ErasedRef};
use crate::error::{SchemaError, StorageError};
use crate::repository::cache::{EntityCache, ErasedCache};
use crate::repository::cached::{CachedRepository, FullCache};
use crate::schema::{ParentLink, Relationship, TypeDescriptor};
use crate::types::{EntityType, Id};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Factory and codec of one registered entity type, resolved by type key.
pub trait TypeHandle: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// A default instance with a fresh id.
    fn create_default(&self) -> ErasedRef;

    fn decode(&self, bytes: &[u8]) -> Result<ErasedRef, StorageError>;

    fn to_json(&self, bytes: &[u8]) -> Result<serde_json::Value, StorageError>;

    fn new_cache(&self, indexed: Vec<&'static str>) -> Arc<dyn ErasedCache>;

    fn new_full_cache(&self, shared: Weak<Shared>, indexed: Vec<&'static str>) -> Arc<dyn FullCache>;
}

struct Handle<T>(PhantomData<fn() -> T>);

impl<T: Entity> Handle<T> {
    fn decode_value(bytes: &[u8]) -> Result<T, StorageError> {
        bincode::deserialize(bytes).map_err(|e| StorageError::Decode {
            entity_type: T::TYPE,
            reason: e.to_string(),
        })
    }
}

impl<T: Entity + Default> TypeHandle for Handle<T> {
    fn entity_type(&self) -> EntityType {
        T::TYPE
    }

    fn create_default(&self) -> ErasedRef {
        let mut value = T::default();
        value.set_id(Id::new());
        EntityRef::new(value).erase()
    }

    fn decode(&self, bytes: &[u8]) -> Result<ErasedRef, StorageError> {
        Ok(EntityRef::new(Self::decode_value(bytes)?).erase())
    }

    fn to_json(&self, bytes: &[u8]) -> Result<serde_json::Value, StorageError> {
        let value = Self::decode_value(bytes)?;
        serde_json::to_value(&value).map_err(|e| StorageError::Decode {
            entity_type: T::TYPE,
            reason: e.to_string(),
        })
    }

    fn new_cache(&self, indexed: Vec<&'static str>) -> Arc<dyn ErasedCache> {
        Arc::new(EntityCache::<T>::new(indexed))
    }

    fn new_full_cache(&self, shared: Weak<Shared>, indexed: Vec<&'static str>) -> Arc<dyn FullCache> {
        Arc::new(CachedRepository::<T>::new(shared, indexed))
    }
}

struct RegisteredType {
    descriptor: TypeDescriptor,
    handle: Arc<dyn TypeHandle>,
    indexed: Vec<&'static str>,
}

/// Relationship metadata and factories of every entity type, built once at startup.
pub struct Schema {
    types: HashMap<EntityType, RegisteredType>,
    order: Vec<EntityType>,
    aggregate_root: Option<EntityType>,
    additional_types: HashMap<EntityType, Vec<EntityType>>,
    closures: RwLock<HashMap<EntityType, Arc<EditTypeClosure>>>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("types", &self.order)
            .field("aggregate_root", &self.aggregate_root)
            .finish()
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Registered types in registration order.
    pub fn types(&self) -> &[EntityType] {
        &self.order
    }

    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.types.contains_key(&entity_type)
    }

    /// Look up a registered type by its key name.
    pub fn find_type(&self, name: &str) -> Option<EntityType> {
        self.order.iter().copied().find(|ty| ty.name() == name)
    }

    pub fn descriptor(&self, entity_type: EntityType) -> Option<&TypeDescriptor> {
        self.types.get(&entity_type).map(|t| &t.descriptor)
    }

    pub fn handle(&self, entity_type: EntityType) -> Result<Arc<dyn TypeHandle>, SchemaError> {
        self.types
            .get(&entity_type)
            .map(|t| Arc::clone(&t.handle))
            .ok_or(SchemaError::UnknownType(entity_type))
    }

    /// Foreign-key properties of `entity_type` that caches index.
    pub fn indexed_properties(&self, entity_type: EntityType) -> Vec<&'static str> {
        self.types
            .get(&entity_type)
            .map(|t| t.indexed.clone())
            .unwrap_or_default()
    }

    pub fn parent_link(&self, entity_type: EntityType) -> Option<ParentLink> {
        self.descriptor(entity_type).and_then(|d| d.parent_link)
    }

    /// Name of the parent's collection navigation that holds `child` through `link`.
    pub fn parent_collection(&self, child: EntityType, link: &ParentLink) -> Option<&'static str> {
        self.descriptor(link.parent)
            .and_then(|parent| parent.collection_for(child, link.foreign_key))
            .map(|r| r.field)
    }

    pub fn aggregate_root(&self) -> Option<EntityType> {
        self.aggregate_root
    }

    /// Types pulled into the edit closure of `root` beyond its aggregate edges.
    pub fn additional_types(&self, root: EntityType) -> &[EntityType] {
        self.additional_types
            .get(&root)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when `relationship` of `owner` is the back-edge of an aggregate-member
    /// navigation on its target (same foreign key, opposite multiplicity).
    pub fn is_inverse_of_aggregate_member(&self, owner: EntityType, relationship: &Relationship) -> bool {
        self.descriptor(relationship.target).is_some_and(|target| {
            target.relationships.iter().any(|inverse| {
                inverse.aggregate_member
                    && inverse.target == owner
                    && inverse.foreign_key == relationship.foreign_key
                    && inverse.multiplicity != relationship.multiplicity
            })
        })
    }

    /// Edit-type closure of `root`, computed on first use and shared afterwards.
    pub fn edit_closure(&self, root: EntityType) -> Result<Arc<EditTypeClosure>, SchemaError> {
        if let Some(closure) = self.closures.read().get(&root) {
            return Ok(Arc::clone(closure));
        }
        let computed = Arc::new(EditTypeClosure::compute(self, root)?);
        let mut closures = self.closures.write();
        Ok(Arc::clone(closures.entry(root).or_insert(computed)))
    }
}

type PendingType = (TypeDescriptor, Arc<dyn TypeHandle>, Vec<ParentLink>);

#[derive(Default)]
pub struct SchemaBuilder {
    pending: Vec<PendingType>,
    aggregate_root: Option<EntityType>,
    additional_types: HashMap<EntityType, Vec<EntityType>>,
}

impl SchemaBuilder {
    pub fn register<T: Entity + Default>(mut self) -> Self {
        let navigations = navigations_of::<T>();
        let parent_links = navigations.parent_links().to_vec();
        let descriptor = TypeDescriptor {
            entity_type: T::TYPE,
            relationships: navigations.relationships(),
            parent_link: parent_links.first().copied(),
        };
        self.pending
            .push((descriptor, Arc::new(Handle::<T>(PhantomData)), parent_links));
        self
    }

    /// The type whose instances own independent per-root caches.
    pub fn aggregate_root(mut self, entity_type: EntityType) -> Self {
        self.aggregate_root = Some(entity_type);
        self
    }

    pub fn additional_edit_types(
        mut self,
        root: EntityType,
        types: impl IntoIterator<Item = EntityType>,
    ) -> Self {
        self.additional_types.entry(root).or_default().extend(types);
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut types = HashMap::new();
        let mut order = Vec::new();
        for (descriptor, handle, parent_links) in self.pending {
            let entity_type = descriptor.entity_type;
            if let [first, second, ..] = parent_links.as_slice() {
                return Err(SchemaError::MultipleParentLinks {
                    entity_type,
                    first: first.foreign_key,
                    second: second.foreign_key,
                });
            }
            if types.contains_key(&entity_type) {
                return Err(SchemaError::DuplicateType(entity_type));
            }
            order.push(entity_type);
            types.insert(
                entity_type,
                RegisteredType {
                    descriptor,
                    handle,
                    indexed: Vec::new(),
                },
            );
        }

        let mut indexed: HashMap<EntityType, Vec<&'static str>> = HashMap::new();
        for ty in &order {
            let descriptor = &types[ty].descriptor;
            for relationship in &descriptor.relationships {
                if !types.contains_key(&relationship.target) {
                    return Err(SchemaError::UnknownTarget {
                        owner: *ty,
                        field: relationship.field,
                        target: relationship.target,
                    });
                }
                if relationship.is_collection() {
                    indexed
                        .entry(relationship.target)
                        .or_default()
                        .push(relationship.foreign_key);
                }
            }
            if let Some(link) = descriptor.parent_link {
                if !types.contains_key(&link.parent) {
                    return Err(SchemaError::UnknownTarget {
                        owner: *ty,
                        field: link.foreign_key,
                        target: link.parent,
                    });
                }
                indexed.entry(*ty).or_default().push(link.foreign_key);
            }
        }
        for (ty, mut properties) in indexed {
            properties.sort_unstable();
            properties.dedup();
            if let Some(registered) = types.get_mut(&ty) {
                registered.indexed = properties;
            }
        }

        if let Some(root) = self.aggregate_root {
            if !types.contains_key(&root) {
                return Err(SchemaError::UnknownType(root));
            }
        }
        for (root, extra) in &self.additional_types {
            for ty in std::iter::once(root).chain(extra) {
                if !types.contains_key(ty) {
                    return Err(SchemaError::UnknownType(*ty));
                }
            }
        }

        Ok(Schema {
            types,
            order,
            aggregate_root: self.aggregate_root,
            additional_types: self.additional_types,
            closures: RwLock::new(HashMap::new()),
        })
    }
}
