//! The external API facade (§6): the only layer permitted to deal in raw
//! numeric ids and a wire-friendly clause description instead of the typed
//! arena handles the core uses internally.

use crate::concurrency::ContextLock;
use crate::context::Context;
use crate::entity::EntityId;
use crate::error::{Error, Result};
use crate::query::{ast::QueryAst, compiler};
use crate::tag::{TagId, TagIdx};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type ContextHandle = Arc<ContextLock>;

pub fn new_context() -> ContextHandle {
    Arc::new(ContextLock::new(Context::new()))
}

/// Language-neutral clause description. Incidental `serde` plumbing for
/// moving a clause across a process boundary as JSON; not a stability
/// guarantee this module makes about wire formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExternalClause {
    Literal(u64),
    Not(Box<ExternalClause>),
    And(Box<ExternalClause>, Box<ExternalClause>),
    Or(Box<ExternalClause>, Box<ExternalClause>),
    Any,
}

impl ExternalClause {
    /// Parses a JSON-encoded clause, mapping any deserialization failure to
    /// the facade's own `Error::MalformedClause` rather than leaking a
    /// `serde_json` error type across the boundary.
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::MalformedClause(e.to_string()))
    }
}

fn compile_external(ctx: &Context, clause: &ExternalClause) -> Result<QueryAst> {
    match clause {
        ExternalClause::Literal(id) => {
            let idx = ctx.tag_idx_of(TagId(*id))?;
            Ok(compiler::build_literal(ctx, idx))
        }
        ExternalClause::Not(inner) => Ok(compiler::build_not(compile_external(ctx, inner)?)),
        ExternalClause::And(l, r) => {
            Ok(compiler::build_and(compile_external(ctx, l)?, compile_external(ctx, r)?))
        }
        ExternalClause::Or(l, r) => {
            Ok(compiler::build_or(compile_external(ctx, l)?, compile_external(ctx, r)?))
        }
        ExternalClause::Any => Ok(QueryAst::Any),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Direct,
    Implied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTagEntry {
    pub tag: u64,
    pub kind: TagKind,
    /// Non-empty only for `kind == Implied`: the entity's direct tags that
    /// (directly or transitively) imply this one.
    pub impliers: Vec<u64>,
}

pub fn new_tag(ctx: &ContextLock, id: Option<u64>) -> Result<u64> {
    ctx.write().new_tag(id.map(TagId)).map(|t| t.0)
}

pub fn new_entity(ctx: &ContextLock, id: Option<u64>) -> Result<u64> {
    ctx.write().new_entity(id.map(EntityId)).map(|e| e.0)
}

pub fn num_tags(ctx: &ContextLock) -> usize {
    ctx.read().num_tags()
}

pub fn num_entities(ctx: &ContextLock) -> usize {
    ctx.read().num_entities()
}

pub fn add_tag(ctx: &ContextLock, entity: u64, tag: u64) -> Result<bool> {
    ctx.write().add_tag(EntityId(entity), TagId(tag))
}

pub fn remove_tag(ctx: &ContextLock, entity: u64, tag: u64) -> Result<bool> {
    ctx.write().remove_tag(EntityId(entity), TagId(tag))
}

pub fn imply_tag(ctx: &ContextLock, a: u64, b: u64) -> Result<bool> {
    ctx.write().imply(TagId(a), TagId(b))
}

pub fn unimply_tag(ctx: &ContextLock, a: u64, b: u64) -> Result<bool> {
    ctx.write().unimply(TagId(a), TagId(b))
}

pub fn get_implies(ctx: &ContextLock, tag: u64) -> Result<Vec<u64>> {
    Ok(ctx.read().get_implies(TagId(tag))?.into_iter().map(|t| t.0).collect())
}

pub fn get_implied_by(ctx: &ContextLock, tag: u64) -> Result<Vec<u64>> {
    Ok(ctx.read().get_implied_by(TagId(tag))?.into_iter().map(|t| t.0).collect())
}

pub fn is_dirty(ctx: &ContextLock) -> bool {
    ctx.read().is_dirty()
}

pub fn mark_dirty(ctx: &ContextLock) {
    ctx.write().mark_dirty()
}

/// Direct tags plus everything reachable by transitive implication from
/// them, each annotated with the direct tags responsible for it.
pub fn entity_tags(ctx: &ContextLock, entity: u64) -> Result<Vec<EntityTagEntry>> {
    let guard = ctx.read();
    let entity_id = EntityId(entity);
    let direct: HashSet<TagIdx> = guard.entity_by_id(entity_id)?.tags.clone();

    let mut impliers_of: HashMap<TagIdx, HashSet<TagId>> = HashMap::new();
    for &d in &direct {
        let d_id = guard.tag_by_idx(d).id;
        let mut seen = HashSet::new();
        let mut stack = vec![d];
        while let Some(t) = stack.pop() {
            if seen.insert(t) {
                for &next in &guard.tag_by_idx(t).implies {
                    impliers_of.entry(next).or_default().insert(d_id);
                    stack.push(next);
                }
            }
        }
    }

    let mut out = Vec::with_capacity(direct.len() + impliers_of.len());
    for &d in &direct {
        out.push(EntityTagEntry { tag: guard.tag_by_idx(d).id.0, kind: TagKind::Direct, impliers: Vec::new() });
    }
    for (&t_idx, impliers) in &impliers_of {
        if direct.contains(&t_idx) {
            continue;
        }
        let mut impliers: Vec<u64> = impliers.iter().map(|t| t.0).collect();
        impliers.sort_unstable();
        out.push(EntityTagEntry { tag: guard.tag_by_idx(t_idx).id.0, kind: TagKind::Implied, impliers });
    }
    Ok(out)
}

pub fn do_query(ctx: &ContextLock, clause: &ExternalClause) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    ctx.do_query(|guard| compile_external(guard, clause), |id| out.push(id.0))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_tags_reports_direct_and_implied() {
        let ctx = new_context();
        let a = new_tag(&ctx, None).unwrap();
        let b = new_tag(&ctx, None).unwrap();
        imply_tag(&ctx, a, b).unwrap();
        let e = new_entity(&ctx, None).unwrap();
        add_tag(&ctx, e, a).unwrap();

        let mut tags = entity_tags(&ctx, e).unwrap();
        tags.sort_by_key(|t| t.tag);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].kind, TagKind::Direct);
        assert_eq!(tags[1].kind, TagKind::Implied);
        assert_eq!(tags[1].impliers, vec![a]);
    }

    #[test]
    fn do_query_runs_through_dirty_context() {
        let ctx = new_context();
        let a = new_tag(&ctx, None).unwrap();
        let b = new_tag(&ctx, None).unwrap();
        let c = new_tag(&ctx, None).unwrap();
        imply_tag(&ctx, a, b).unwrap();
        imply_tag(&ctx, b, c).unwrap();
        imply_tag(&ctx, c, a).unwrap();
        unimply_tag(&ctx, c, a).unwrap();
        assert!(is_dirty(&ctx));

        let e = new_entity(&ctx, None).unwrap();
        add_tag(&ctx, e, a).unwrap();

        let result = do_query(&ctx, &ExternalClause::Literal(c)).unwrap();
        assert_eq!(result, vec![e]);
        assert!(!is_dirty(&ctx));
    }

    #[test]
    fn unknown_tag_literal_is_not_found() {
        let ctx = new_context();
        let err = do_query(&ctx, &ExternalClause::Literal(999)).unwrap_err();
        assert_eq!(err, Error::TagNotFound(999));
    }

    #[test]
    fn malformed_json_clause_is_rejected() {
        assert!(ExternalClause::from_json("not json").is_err());
    }
}
