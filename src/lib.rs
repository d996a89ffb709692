pub mod concurrency;
pub mod context;
pub mod entity;
pub mod error;
pub mod external;
pub mod id;
pub mod meta_node;
pub mod query;
pub mod tag;

pub use concurrency::ContextLock;
pub use context::Context;
pub use entity::{Entity, EntityId};
pub use error::{Error, Result};
pub use external::{
    add_tag, do_query, entity_tags, get_implied_by, get_implies, imply_tag, is_dirty, mark_dirty,
    new_context, new_entity, new_tag, num_entities, num_tags, remove_tag, unimply_tag,
    ContextHandle, EntityTagEntry, ExternalClause, TagKind,
};
pub use query::QueryAst;
pub use tag::{Tag, TagId};
