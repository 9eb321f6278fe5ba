use crate::ids::NodeId;
use thiserror::Error;

/// A structural command the tree refused. The tree is untouched when one of
/// these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("item '{0}' does not exist")]
    NotFound(NodeId),

    #[error("item '{0}' already exists")]
    DuplicateId(NodeId),

    #[error("cannot move '{id}' under '{parent}': target is the item itself or one of its descendants")]
    Cycle { id: NodeId, parent: NodeId },

    #[error("item '{0}' has no preceding sibling to indent under")]
    NoPrecedingSibling(NodeId),

    #[error("item '{0}' is already at root level")]
    AlreadyRoot(NodeId),
}

/// A broken tree invariant, reported by `Tree::validate`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("'{child}' is listed under '{parent}' but points to another parent")]
    ParentMismatch { parent: NodeId, child: NodeId },

    #[error("'{child}' points to parent '{parent}' which does not list it exactly once")]
    MissingChild { parent: NodeId, child: NodeId },

    #[error("'{0}' references an item that is not in the tree")]
    Dangling(NodeId),

    #[error("root '{0}' is missing from, or repeated in, the root list")]
    RootListMismatch(NodeId),

    #[error("'{id}' has level {actual}, expected {expected}")]
    LevelMismatch {
        id: NodeId,
        expected: u32,
        actual: u32,
    },

    #[error("{0} item(s) are unreachable from the roots")]
    Unreachable(usize),
}
