use tagdag_engine::{
    add_tag, do_query, get_implies, imply_tag, is_dirty, new_context, new_entity, new_tag,
    num_entities, num_tags, unimply_tag, Error, ExternalClause,
};

#[test]
fn duplicate_id_rejection() {
    let ctx = new_context();
    assert_eq!(new_tag(&ctx, Some(1)).unwrap(), 1);
    assert_eq!(new_tag(&ctx, Some(1)).unwrap_err(), Error::DuplicateTagId(1));
    assert_eq!(new_tag(&ctx, Some(2)).unwrap(), 2);
    assert_eq!(num_tags(&ctx), 2);
}

#[test]
fn transitive_implication() {
    let ctx = new_context();
    let a = new_tag(&ctx, None).unwrap();
    let b = new_tag(&ctx, None).unwrap();
    imply_tag(&ctx, a, b).unwrap();
    let e = new_entity(&ctx, None).unwrap();
    add_tag(&ctx, e, a).unwrap();

    let result = do_query(&ctx, &ExternalClause::Literal(b)).unwrap();
    assert_eq!(result, vec![e]);
    assert_eq!(num_entities(&ctx), 1);
}

#[test]
fn three_cycle_collapses_to_single_sink_meta_node() {
    let ctx = new_context();
    let a = new_tag(&ctx, None).unwrap();
    let b = new_tag(&ctx, None).unwrap();
    let c = new_tag(&ctx, None).unwrap();
    imply_tag(&ctx, a, b).unwrap();
    imply_tag(&ctx, b, c).unwrap();
    imply_tag(&ctx, c, a).unwrap();

    let guard = ctx.read();
    assert_eq!(guard.num_meta_nodes(), 1);
    assert_eq!(guard.num_sink_meta_nodes(), 1);
}

#[test]
fn diamond_with_back_edge_collapses() {
    let ctx = new_context();
    let a = new_tag(&ctx, None).unwrap();
    let b = new_tag(&ctx, None).unwrap();
    let c = new_tag(&ctx, None).unwrap();
    let d = new_tag(&ctx, None).unwrap();
    imply_tag(&ctx, a, b).unwrap();
    imply_tag(&ctx, a, c).unwrap();
    imply_tag(&ctx, b, d).unwrap();
    imply_tag(&ctx, c, d).unwrap();

    {
        let guard = ctx.read();
        assert_eq!(guard.num_meta_nodes(), 4);
        assert_eq!(guard.num_sink_meta_nodes(), 1);
    }

    imply_tag(&ctx, d, a).unwrap();
    let guard = ctx.read();
    assert_eq!(guard.num_meta_nodes(), 1);
}

#[test]
fn edge_removal_inside_scc_forces_rebuild() {
    let ctx = new_context();
    let a = new_tag(&ctx, None).unwrap();
    let b = new_tag(&ctx, None).unwrap();
    let c = new_tag(&ctx, None).unwrap();
    imply_tag(&ctx, a, b).unwrap();
    imply_tag(&ctx, b, c).unwrap();
    imply_tag(&ctx, c, a).unwrap();

    unimply_tag(&ctx, c, a).unwrap();
    assert!(is_dirty(&ctx));

    ctx.write().make_clean();
    assert!(!is_dirty(&ctx));

    let guard = ctx.read();
    assert_eq!(guard.num_meta_nodes(), 3);
    assert_eq!(guard.num_sink_meta_nodes(), 1);
    assert_eq!(get_implies(&ctx, a).unwrap(), vec![b]);
    assert_eq!(get_implies(&ctx, b).unwrap(), vec![c]);
    assert!(get_implies(&ctx, c).unwrap().is_empty());
}

// Scenario 6 (selectivity reorder) exercises `query::compiler` directly
// against a `Context`, which is internal API — see
// `query::compiler::tests::selectivity_reorder_against_a_real_context`.
