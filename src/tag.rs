use crate::meta_node::MetaNodeIdx;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Stable, user-visible identity of a tag. Never reused once allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagId(pub u64);

/// Index into `Context`'s tag arena. Stable for the lifetime of the Context,
/// since tags are never removed (only meta-node membership changes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagIdx(pub usize);

/// A label, plus its membership in the implication graph.
#[derive(Debug)]
pub struct Tag {
    pub id: TagId,
    /// `B ∈ implies` iff this tag directly asserts `self ⇒ B`.
    pub implies: HashSet<TagIdx>,
    /// `A ∈ implied_by` iff `A` directly asserts `A ⇒ self`.
    pub implied_by: HashSet<TagIdx>,
    pub meta_node: Option<MetaNodeIdx>,
    pub entity_count: u64,
}

impl Tag {
    pub fn new(id: TagId) -> Self {
        Self {
            id,
            implies: HashSet::new(),
            implied_by: HashSet::new(),
            meta_node: None,
            entity_count: 0,
        }
    }

    /// A tag has a meta-node iff it participates in at least one implication
    /// edge, in either direction.
    pub fn participates_in_implications(&self) -> bool {
        !self.implies.is_empty() || !self.implied_by.is_empty()
    }
}
