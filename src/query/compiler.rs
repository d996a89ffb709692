use super::ast::QueryAst;
use crate::context::Context;
use crate::tag::TagIdx;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

/// Builds a literal clause for a single tag.
///
/// If the tag has no meta-node, it matches against nothing but itself. If it
/// does, the clause widens to an `Or` over its meta-node and every meta-node
/// that transitively implies it, so querying for a tag also surfaces entities
/// tagged only with something that implies it.
pub fn build_literal(ctx: &Context, tag: TagIdx) -> QueryAst {
    let Some(home) = ctx.tag_by_idx(tag).meta_node else {
        let weight = ctx.tag_by_idx(tag).entity_count;
        return QueryAst::Literal { tag, weight };
    };

    let mut leaves: Vec<QueryAst> = ctx
        .ancestors_of(home)
        .into_iter()
        .map(|node_idx| {
            let node = ctx.meta_node_by_idx(node_idx);
            let weight = node.tags.iter().map(|&t| ctx.tag_by_idx(t).entity_count).sum();
            QueryAst::MetaNode { id: node_idx, tags: Rc::new(node.tags.clone()), weight }
        })
        .collect();

    if leaves.len() == 1 {
        leaves.pop().unwrap()
    } else {
        QueryAst::Or(leaves)
    }
}

pub fn build_and(l: QueryAst, r: QueryAst) -> QueryAst {
    QueryAst::And(vec![l, r])
}

pub fn build_or(l: QueryAst, r: QueryAst) -> QueryAst {
    QueryAst::Or(vec![l, r])
}

pub fn build_not(c: QueryAst) -> QueryAst {
    QueryAst::Not(Box::new(c))
}

/// Rebuilds `And`/`Or` subtrees into Huffman-style trees ordered by
/// `weight()`, so the cheapest-to-evaluate branch of an `And` (or the
/// most likely to short-circuit branch of an `Or`) is checked first.
/// `Not` subtrees are left alone: their weight equals their child's, so
/// there is nothing to reorder underneath a negation.
pub fn optimize(clause: QueryAst) -> QueryAst {
    match clause {
        QueryAst::And(children) => rebuild(children, true),
        QueryAst::Or(children) => rebuild(children, false),
        other => other,
    }
}

struct HeapEntry {
    clause: QueryAst,
    is_and: bool,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.clause.weight() == other.clause.weight()
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; And wants the smallest weight first,
        // so its ordering is reversed relative to Or's.
        if self.is_and {
            other.clause.weight().cmp(&self.clause.weight())
        } else {
            self.clause.weight().cmp(&other.clause.weight())
        }
    }
}

fn rebuild(children: Vec<QueryAst>, is_and: bool) -> QueryAst {
    // Flatten nested same-type nodes and optimize each leaf first, same as
    // the reference implementation: children are optimized bottom-up before
    // being fed back into this level's priority queue.
    let mut flattened = Vec::new();
    for child in children {
        match &child {
            QueryAst::And(inner) if is_and => flattened.extend(inner.clone()),
            QueryAst::Or(inner) if !is_and => flattened.extend(inner.clone()),
            _ => flattened.push(child),
        }
    }

    // Deduplicate identical meta-node leaves (they arise when the same
    // implied-by ancestor is reachable through more than one literal).
    let mut seen_nodes = HashSet::new();
    flattened.retain(|c| match c {
        QueryAst::MetaNode { id, .. } => seen_nodes.insert(*id),
        _ => true,
    });

    let optimized: Vec<QueryAst> = flattened.into_iter().map(optimize).collect();

    if optimized.len() == 1 {
        return optimized.into_iter().next().unwrap();
    }
    if optimized.is_empty() {
        // Vacuously true for And, vacuously false for Or; `matches` already
        // gives the right answer for an empty child list either way.
        return if is_and { QueryAst::And(Vec::new()) } else { QueryAst::Or(Vec::new()) };
    }

    let mut heap: BinaryHeap<HeapEntry> =
        optimized.into_iter().map(|clause| HeapEntry { clause, is_and }).collect();

    while heap.len() > 1 {
        let first = heap.pop().unwrap().clause;
        let second = heap.pop().unwrap().clause;
        let parent = if is_and {
            QueryAst::And(vec![first, second])
        } else {
            QueryAst::Or(vec![first, second])
        };
        heap.push(HeapEntry { clause: parent, is_and });
    }

    heap.pop().unwrap().clause
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(tag: usize, weight: u64) -> QueryAst {
        QueryAst::Literal { tag: TagIdx(tag), weight }
    }

    #[test]
    fn optimize_preserves_weight() {
        let clause =
            QueryAst::And(vec![lit(0, 100), QueryAst::And(vec![lit(1, 5), lit(2, 50)])]);
        let before = clause.weight();
        let after = optimize(clause);
        assert_eq!(before, after.weight());
    }

    #[test]
    fn and_orders_cheapest_first() {
        let clause = QueryAst::And(vec![lit(0, 100), lit(1, 5), lit(2, 50)]);
        let optimized = optimize(clause);
        // weight() of an And is the min over children regardless of shape,
        // so this just confirms the tree survived restructuring intact.
        assert_eq!(optimized.weight(), 5);
        assert_eq!(optimized.num_nodes(), 5); // 3 leaves + 2 internal And nodes
    }

    #[test]
    fn single_child_and_collapses() {
        let clause = QueryAst::And(vec![lit(0, 7)]);
        let optimized = optimize(clause);
        assert_eq!(optimized.weight(), 7);
    }

    #[test]
    fn selectivity_reorder_against_a_real_context() {
        let mut ctx = Context::new();
        let a = ctx.new_tag(None).unwrap();
        let b = ctx.new_tag(None).unwrap();
        for _ in 0..5 {
            let e = ctx.new_entity(None).unwrap();
            ctx.add_tag(e, a).unwrap();
        }
        for _ in 0..10 {
            let e = ctx.new_entity(None).unwrap();
            ctx.add_tag(e, b).unwrap();
        }

        let a_idx = ctx.tag_idx_of(a).unwrap();
        let b_idx = ctx.tag_idx_of(b).unwrap();
        let lit_a = build_literal(&ctx, a_idx);
        let lit_b = build_literal(&ctx, b_idx);

        let or_clause = optimize(build_or(lit_a.clone(), lit_b.clone()));
        match &or_clause {
            QueryAst::Or(children) => {
                assert_eq!(children[0].weight(), 10);
                assert_eq!(children[1].weight(), 5);
            }
            other => panic!("expected Or, got {other:?}"),
        }

        let and_clause = optimize(build_and(lit_a, lit_b));
        match &and_clause {
            QueryAst::And(children) => {
                assert_eq!(children[0].weight(), 5);
                assert_eq!(children[1].weight(), 10);
            }
            other => panic!("expected And, got {other:?}"),
        }
    }
}
