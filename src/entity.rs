use crate::tag::TagIdx;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Stable, user-visible identity of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Index into `Context`'s entity arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityIdx(pub usize);

/// An element bearing a set of directly attached tags.
#[derive(Debug)]
pub struct Entity {
    pub id: EntityId,
    pub tags: HashSet<TagIdx>,
}

impl Entity {
    pub fn new(id: EntityId) -> Self {
        Self { id, tags: HashSet::new() }
    }
}
