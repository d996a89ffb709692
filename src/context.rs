use crate::entity::{Entity, EntityId, EntityIdx};
use crate::error::{Error, Result};
use crate::id::IdAllocator;
use crate::meta_node::{MetaNode, MetaNodeIdx};
use crate::query::ast::QueryAst;
use crate::tag::{Tag, TagId, TagIdx};
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet};

/// Owns every [`Tag`], [`Entity`] and [`MetaNode`], and maintains the
/// condensation of the tag-implication graph either incrementally or via a
/// full [`Context::make_clean`] rebuild.
///
/// Tags and entities are never removed once created; meta-nodes are created
/// and destroyed continuously as the condensation changes, so their slots are
/// recycled through a free list.
pub struct Context {
    tags: Vec<Tag>,
    tag_ids: HashMap<TagId, TagIdx>,
    tag_id_alloc: IdAllocator,

    entities: Vec<Entity>,
    entity_ids: HashMap<EntityId, EntityIdx>,
    entity_id_alloc: IdAllocator,

    meta_node_slots: Vec<Option<MetaNode>>,
    meta_node_free: Vec<MetaNodeIdx>,
    live_meta_nodes: HashSet<MetaNodeIdx>,
    sink_meta_nodes: HashSet<MetaNodeIdx>,

    dirty: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            tags: Vec::new(),
            tag_ids: HashMap::new(),
            tag_id_alloc: IdAllocator::new(),
            entities: Vec::new(),
            entity_ids: HashMap::new(),
            entity_id_alloc: IdAllocator::new(),
            meta_node_slots: Vec::new(),
            meta_node_free: Vec::new(),
            live_meta_nodes: HashSet::new(),
            sink_meta_nodes: HashSet::new(),
            dirty: false,
        }
    }

    // ---- identity and ownership (§4.1) ----------------------------------

    pub fn new_tag(&mut self, id: Option<TagId>) -> Result<TagId> {
        let id = match id {
            Some(id) => {
                if !self.tag_id_alloc.reserve(id.0) {
                    return Err(Error::DuplicateTagId(id.0));
                }
                id
            }
            None => TagId(self.tag_id_alloc.alloc()),
        };
        let idx = TagIdx(self.tags.len());
        self.tags.push(Tag::new(id));
        self.tag_ids.insert(id, idx);
        Ok(id)
    }

    pub fn new_entity(&mut self, id: Option<EntityId>) -> Result<EntityId> {
        let id = match id {
            Some(id) => {
                if !self.entity_id_alloc.reserve(id.0) {
                    return Err(Error::DuplicateEntityId(id.0));
                }
                id
            }
            None => EntityId(self.entity_id_alloc.alloc()),
        };
        let idx = EntityIdx(self.entities.len());
        self.entities.push(Entity::new(id));
        self.entity_ids.insert(id, idx);
        Ok(id)
    }

    pub fn tag_by_id(&self, id: TagId) -> Result<&Tag> {
        let idx = self.tag_idx(id)?;
        Ok(&self.tags[idx.0])
    }

    pub fn entity_by_id(&self, id: EntityId) -> Result<&Entity> {
        let idx = self.entity_idx(id)?;
        Ok(&self.entities[idx.0])
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    pub fn num_meta_nodes(&self) -> usize {
        self.live_meta_nodes.len()
    }

    pub fn num_sink_meta_nodes(&self) -> usize {
        self.sink_meta_nodes.len()
    }

    pub fn meta_node_by_idx(&self, idx: MetaNodeIdx) -> &MetaNode {
        self.meta_node(idx)
    }

    pub fn sink_meta_node_ids(&self) -> impl Iterator<Item = MetaNodeIdx> + '_ {
        self.sink_meta_nodes.iter().copied()
    }

    pub fn live_meta_node_ids(&self) -> impl Iterator<Item = MetaNodeIdx> + '_ {
        self.live_meta_nodes.iter().copied()
    }

    fn tag_idx(&self, id: TagId) -> Result<TagIdx> {
        self.tag_ids.get(&id).copied().ok_or(Error::TagNotFound(id.0))
    }

    fn entity_idx(&self, id: EntityId) -> Result<EntityIdx> {
        self.entity_ids.get(&id).copied().ok_or(Error::EntityNotFound(id.0))
    }

    pub(crate) fn tag_idx_of(&self, id: TagId) -> Result<TagIdx> {
        self.tag_idx(id)
    }

    pub(crate) fn tag_by_idx(&self, idx: TagIdx) -> &Tag {
        &self.tags[idx.0]
    }

    // ---- Tag / Entity mutation (§4.3) -----------------------------------

    pub fn add_tag(&mut self, entity: EntityId, tag: TagId) -> Result<bool> {
        let entity_idx = self.entity_idx(entity)?;
        let tag_idx = self.tag_idx(tag)?;
        let changed = self.entities[entity_idx.0].tags.insert(tag_idx);
        if changed {
            self.tags[tag_idx.0].entity_count += 1;
        }
        Ok(changed)
    }

    pub fn remove_tag(&mut self, entity: EntityId, tag: TagId) -> Result<bool> {
        let entity_idx = self.entity_idx(entity)?;
        let tag_idx = self.tag_idx(tag)?;
        let changed = self.entities[entity_idx.0].tags.remove(&tag_idx);
        if changed {
            self.tags[tag_idx.0].entity_count -= 1;
        }
        Ok(changed)
    }

    pub fn get_implies(&self, tag: TagId) -> Result<Vec<TagId>> {
        let idx = self.tag_idx(tag)?;
        Ok(self.tags[idx.0].implies.iter().map(|&t| self.tags[t.0].id).collect())
    }

    pub fn get_implied_by(&self, tag: TagId) -> Result<Vec<TagId>> {
        let idx = self.tag_idx(tag)?;
        Ok(self.tags[idx.0].implied_by.iter().map(|&t| self.tags[t.0].id).collect())
    }

    // ---- implication graph (§4.2) ----------------------------------------

    pub fn imply(&mut self, a: TagId, b: TagId) -> Result<bool> {
        let a_idx = self.tag_idx(a)?;
        let b_idx = self.tag_idx(b)?;
        let changed_a = self.tags[a_idx.0].implies.insert(b_idx);
        let changed_b = self.tags[b_idx.0].implied_by.insert(a_idx);
        debug_assert_eq!(changed_a, changed_b, "implies/implied_by fell out of sync");
        if changed_a {
            self.on_imply_gained(a_idx, b_idx);
        }
        Ok(changed_a)
    }

    pub fn unimply(&mut self, a: TagId, b: TagId) -> Result<bool> {
        let a_idx = self.tag_idx(a)?;
        let b_idx = self.tag_idx(b)?;
        let changed_a = self.tags[a_idx.0].implies.remove(&b_idx);
        let changed_b = self.tags[b_idx.0].implied_by.remove(&a_idx);
        debug_assert_eq!(changed_a, changed_b, "implies/implied_by fell out of sync");
        if changed_a {
            self.on_imply_lost(a_idx, b_idx);
        }
        Ok(changed_a)
    }

    fn on_imply_gained(&mut self, a: TagIdx, b: TagIdx) {
        if self.dirty {
            tracing::warn!("context already dirty; deferring incremental update to make_clean");
            return;
        }
        if a == b {
            if self.tags[a.0].meta_node.is_none() {
                let mn = self.alloc_meta_node(MetaNode::singleton(a));
                self.tags[a.0].meta_node = Some(mn);
                self.sink_meta_nodes.insert(mn);
            }
            return;
        }

        match (self.tags[a.0].meta_node, self.tags[b.0].meta_node) {
            (None, None) => {
                let ma = self.alloc_meta_node(MetaNode::singleton(a));
                self.tags[a.0].meta_node = Some(ma);
                let mb = self.alloc_meta_node(MetaNode::singleton(b));
                self.tags[b.0].meta_node = Some(mb);
                self.add_child_edge(ma, mb);
                self.refresh_sink_status(ma);
                self.refresh_sink_status(mb);
            }
            (Some(ma), None) => {
                let mb = self.alloc_meta_node(MetaNode::singleton(b));
                self.tags[b.0].meta_node = Some(mb);
                self.add_child_edge(ma, mb);
                self.refresh_sink_status(ma);
                self.refresh_sink_status(mb);
            }
            (None, Some(mb)) => {
                let ma = self.alloc_meta_node(MetaNode::singleton(a));
                self.tags[a.0].meta_node = Some(ma);
                self.add_child_edge(ma, mb);
                self.refresh_sink_status(ma);
                self.refresh_sink_status(mb);
            }
            (Some(ma), Some(mb)) if ma == mb => {
                // Already in the same SCC; no structural change.
            }
            (Some(ma), Some(mb)) => {
                let frontier = self.collapse_frontier(mb, ma);
                if !frontier.is_empty() {
                    tracing::debug!("closing a cycle; collapsing meta-nodes");
                    self.collapse_cycle(frontier);
                } else {
                    self.add_child_edge(ma, mb);
                    self.refresh_sink_status(ma);
                    self.refresh_sink_status(mb);
                }
            }
        }
    }

    fn on_imply_lost(&mut self, a: TagIdx, b: TagIdx) {
        if self.dirty {
            return;
        }
        if a == b {
            if !self.tags[a.0].participates_in_implications() {
                if let Some(mn) = self.tags[a.0].meta_node.take() {
                    self.free_meta_node(mn);
                }
            }
            return;
        }

        let m_a = self.tags[a.0]
            .meta_node
            .expect("tag losing an implication edge must already have a meta-node");
        let m_b = self.tags[b.0]
            .meta_node
            .expect("tag losing an implication edge must already have a meta-node");

        if m_a == m_b {
            tracing::debug!("implication removed within a single SCC; forcing a rebuild");
            self.dirty = true;
            return;
        }

        let other_edge_remains = self.meta_node(m_a).tags.iter().any(|&t| {
            self.tags[t.0]
                .implies
                .iter()
                .any(|&target| self.tags[target.0].meta_node == Some(m_b))
        });
        if other_edge_remains {
            return;
        }

        self.remove_child_edge(m_a, m_b);
        self.check_scc(m_a);
        self.check_scc(m_b);
    }

    /// Collapses every meta-node in `frontier` (a non-empty set returned by
    /// `collapse_frontier`) into one new meta-node.
    fn collapse_cycle(&mut self, frontier: HashSet<MetaNodeIdx>) {
        let mut inedges = HashSet::new();
        let mut outedges = HashSet::new();
        let mut tags_to_move = Vec::new();

        for &node in &frontier {
            let (parents, children) = {
                let mn = self.meta_node(node);
                (mn.parents.clone(), mn.children.clone())
            };
            for p in parents {
                if frontier.contains(&p) {
                    continue;
                }
                inedges.insert(p);
                self.remove_child_edge(p, node);
            }
            for c in children {
                if frontier.contains(&c) {
                    continue;
                }
                outedges.insert(c);
                self.remove_child_edge(node, c);
            }
            tags_to_move.extend(self.meta_node(node).tags.iter().copied());
        }

        let mut new_node = MetaNode::empty();
        new_node.tags.extend(tags_to_move.iter().copied());
        let new_idx = self.alloc_meta_node(new_node);
        for &t in &tags_to_move {
            self.tags[t.0].meta_node = Some(new_idx);
        }

        for node in frontier {
            self.free_meta_node(node);
        }

        for o in outedges {
            self.add_child_edge(new_idx, o);
        }
        for i in inedges {
            // `i` just gained `new_idx` as a child, so it can't be a sink;
            // no `refresh_sink_status` needed here.
            self.add_child_edge(i, new_idx);
        }
        self.refresh_sink_status(new_idx);
    }

    /// Removes the meta-node if it has decayed to an isolated singleton
    /// whose tag no longer participates in any implication (a lone
    /// self-implying tag stays in its singleton with no self-edge, per
    /// §4.2.3), otherwise keeps the sink set in sync with its current
    /// child set.
    fn check_scc(&mut self, idx: MetaNodeIdx) {
        let (single_tag, isolated) = {
            let mn = self.meta_node(idx);
            (mn.tags.len() == 1, mn.children.is_empty() && mn.parents.is_empty())
        };
        let only_tag = single_tag.then(|| *self.meta_node(idx).tags.iter().next().unwrap());
        if isolated && only_tag.is_some_and(|t| !self.tags[t.0].participates_in_implications()) {
            self.tags[only_tag.unwrap().0].meta_node = None;
            self.free_meta_node(idx);
        } else {
            self.refresh_sink_status(idx);
        }
    }

    /// Single combined DFS (per DESIGN.md's Open Question resolution):
    /// one pass computes which nodes can reach `to`, a second pass walks
    /// forward from `from` restricted to that set. Empty iff no path
    /// `from ⇝ to` exists, which callers use in place of a separate
    /// reachability check.
    fn collapse_frontier(&self, from: MetaNodeIdx, to: MetaNodeIdx) -> HashSet<MetaNodeIdx> {
        let can_reach_to = self.ancestors_of(to);

        let mut frontier = HashSet::new();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if !can_reach_to.contains(&n) {
                continue;
            }
            if frontier.insert(n) {
                stack.extend(self.meta_node(n).children.iter().copied());
            }
        }
        frontier
    }

    /// Every meta-node that can reach `target` by following `children`
    /// edges, including `target` itself. Used both to find a collapse
    /// frontier and, by the query compiler, to widen a tag literal to
    /// everything that implies it.
    pub(crate) fn ancestors_of(&self, target: MetaNodeIdx) -> HashSet<MetaNodeIdx> {
        let mut seen = HashSet::new();
        let mut stack = vec![target];
        while let Some(n) = stack.pop() {
            if seen.insert(n) {
                stack.extend(self.meta_node(n).parents.iter().copied());
            }
        }
        seen
    }

    // ---- full rebuild (§4.2.3) --------------------------------------------

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn make_clean(&mut self) {
        if !self.dirty {
            return;
        }
        let _span = tracing::debug_span!("make_clean", tags = self.tags.len()).entered();

        let participating: Vec<TagIdx> = (0..self.tags.len())
            .map(TagIdx)
            .filter(|&idx| self.tags[idx.0].participates_in_implications())
            .collect();

        let mut graph = DiGraph::<TagIdx, ()>::new();
        let mut node_of = HashMap::with_capacity(participating.len());
        for &idx in &participating {
            node_of.insert(idx, graph.add_node(idx));
        }
        for &idx in &participating {
            for &target in &self.tags[idx.0].implies {
                graph.add_edge(node_of[&idx], node_of[&target], ());
            }
        }

        let sccs = petgraph::algo::tarjan_scc(&graph);

        for tag in &mut self.tags {
            tag.meta_node = None;
        }
        let old_nodes: Vec<MetaNodeIdx> = self.live_meta_nodes.drain().collect();
        for idx in old_nodes {
            self.meta_node_slots[idx.0] = None;
            self.meta_node_free.push(idx);
        }
        self.sink_meta_nodes.clear();

        let mut meta_of_tag = HashMap::with_capacity(participating.len());
        for component in sccs {
            let mut node = MetaNode::empty();
            for node_idx in &component {
                node.tags.insert(graph[*node_idx]);
            }
            let mn_idx = self.alloc_meta_node(node);
            for node_idx in component {
                let tag_idx = graph[node_idx];
                self.tags[tag_idx.0].meta_node = Some(mn_idx);
                meta_of_tag.insert(tag_idx, mn_idx);
            }
        }

        for &idx in &participating {
            let mn = meta_of_tag[&idx];
            let targets: Vec<TagIdx> = self.tags[idx.0].implies.iter().copied().collect();
            for target in targets {
                let target_mn = meta_of_tag[&target];
                if target_mn != mn {
                    self.add_child_edge(mn, target_mn);
                }
            }
        }

        let live: Vec<MetaNodeIdx> = self.live_meta_nodes.iter().copied().collect();
        for idx in live {
            self.refresh_sink_status(idx);
        }

        self.dirty = false;
    }

    // ---- query entry point (§4.7) -----------------------------------------

    pub fn query(&self, clause: &QueryAst, mut visitor: impl FnMut(EntityId)) -> Result<()> {
        if self.dirty {
            return Err(Error::ContextDirty);
        }
        let _span = tracing::debug_span!("query").entered();
        let mut matched = 0usize;
        for entity in &self.entities {
            if clause.matches(&entity.tags) {
                matched += 1;
                visitor(entity.id);
            }
        }
        tracing::debug!(matched, "query complete");
        Ok(())
    }

    pub(crate) fn meta_node(&self, idx: MetaNodeIdx) -> &MetaNode {
        self.meta_node_slots[idx.0].as_ref().expect("meta-node index must be live")
    }

    fn meta_node_mut(&mut self, idx: MetaNodeIdx) -> &mut MetaNode {
        self.meta_node_slots[idx.0].as_mut().expect("meta-node index must be live")
    }

    fn alloc_meta_node(&mut self, node: MetaNode) -> MetaNodeIdx {
        let idx = match self.meta_node_free.pop() {
            Some(idx) => {
                self.meta_node_slots[idx.0] = Some(node);
                idx
            }
            None => {
                let idx = MetaNodeIdx(self.meta_node_slots.len());
                self.meta_node_slots.push(Some(node));
                idx
            }
        };
        self.live_meta_nodes.insert(idx);
        idx
    }

    fn free_meta_node(&mut self, idx: MetaNodeIdx) {
        self.sink_meta_nodes.remove(&idx);
        self.live_meta_nodes.remove(&idx);
        self.meta_node_slots[idx.0] = None;
        self.meta_node_free.push(idx);
    }

    fn add_child_edge(&mut self, parent: MetaNodeIdx, child: MetaNodeIdx) -> bool {
        if parent == child {
            return false;
        }
        let a = self.meta_node_mut(parent).children.insert(child);
        let b = self.meta_node_mut(child).parents.insert(parent);
        debug_assert_eq!(a, b, "children/parents fell out of sync");
        a
    }

    fn remove_child_edge(&mut self, parent: MetaNodeIdx, child: MetaNodeIdx) -> bool {
        let a = self.meta_node_mut(parent).children.remove(&child);
        let b = self.meta_node_mut(child).parents.remove(&parent);
        debug_assert_eq!(a, b, "children/parents fell out of sync");
        a
    }

    fn refresh_sink_status(&mut self, idx: MetaNodeIdx) {
        if self.meta_node(idx).is_sink() {
            self.sink_meta_nodes.insert(idx);
        } else {
            self.sink_meta_nodes.remove(&idx);
        }
    }
}
