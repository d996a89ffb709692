use crate::tag::TagIdx;
use std::collections::HashSet;

/// Index into `Context`'s meta-node arena. Unlike tags and entities,
/// meta-nodes are created and destroyed continuously as the condensation
/// changes; freed slots are recycled by `Context`, so a `MetaNodeIdx` is only
/// meaningful while the meta-node it names is still listed in `meta_nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetaNodeIdx(pub usize);

/// One strongly connected component of the tag-implication graph.
#[derive(Debug)]
pub struct MetaNode {
    pub tags: HashSet<TagIdx>,
    pub children: HashSet<MetaNodeIdx>,
    pub parents: HashSet<MetaNodeIdx>,
}

impl MetaNode {
    pub fn singleton(tag: TagIdx) -> Self {
        let mut tags = HashSet::new();
        tags.insert(tag);
        Self { tags, children: HashSet::new(), parents: HashSet::new() }
    }

    pub fn empty() -> Self {
        Self { tags: HashSet::new(), children: HashSet::new(), parents: HashSet::new() }
    }

    pub fn is_sink(&self) -> bool {
        self.children.is_empty()
    }
}
