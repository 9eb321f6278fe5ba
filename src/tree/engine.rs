//! Pure structural commands.
//!
//! Every function takes the current tree and returns a new one. A command the
//! tree refuses (unknown id, move into own subtree, indent without a preceding
//! sibling, ...) returns an unchanged copy and is logged at debug level.

use super::{MutationError, Tree};
use crate::ids::NodeId;
use crate::models::{Formatting, Node, Style};

/// UI event that committed an edit buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitTrigger {
    Blur,
    Enter,
    Escape,
}

fn apply<T>(
    tree: &Tree,
    op: &'static str,
    f: impl FnOnce(&mut Tree) -> Result<T, MutationError>,
) -> Tree {
    let mut next = tree.clone();
    match f(&mut next) {
        Ok(_) => next,
        Err(e) => {
            tracing::debug!(op, error = %e, "outline command ignored");
            tree.clone()
        }
    }
}

pub fn insert_after(tree: &Tree, anchor: Option<&NodeId>, node: Node) -> Tree {
    apply(tree, "insert_after", |t| t.insert_after(anchor, node))
}

pub fn insert_child(tree: &Tree, parent: Option<&NodeId>, position: usize, node: Node) -> Tree {
    apply(tree, "insert_child", |t| t.insert_at(node, parent, position))
}

pub fn remove_node(tree: &Tree, id: &NodeId) -> Tree {
    apply(tree, "remove_node", |t| t.remove(id))
}

pub fn indent(tree: &Tree, id: &NodeId) -> Tree {
    apply(tree, "indent", |t| t.indent(id))
}

pub fn outdent(tree: &Tree, id: &NodeId) -> Tree {
    apply(tree, "outdent", |t| t.outdent(id))
}

pub fn move_node(tree: &Tree, id: &NodeId, new_parent: Option<&NodeId>, position: usize) -> Tree {
    apply(tree, "move_node", |t| t.relocate(id, new_parent, position))
}

pub fn toggle_expanded(tree: &Tree, id: &NodeId) -> Tree {
    apply(tree, "toggle_expanded", |t| t.toggle_expanded(id))
}

pub fn set_style(
    tree: &Tree,
    id: &NodeId,
    style: Style,
    formatting: Option<Formatting>,
    now_ms: i64,
) -> Tree {
    apply(tree, "set_style", |t| t.set_style(id, style, formatting, now_ms))
}

pub fn set_text(tree: &Tree, id: &NodeId, text: &str, now_ms: i64) -> Tree {
    apply(tree, "set_text", |t| t.set_text(id, text, now_ms))
}

/// Commit an edit buffer. Blank text deletes the node and its subtree; the
/// trigger does not influence the result.
pub fn commit_text(tree: &Tree, id: &NodeId, text: &str, _trigger: CommitTrigger, now_ms: i64) -> Tree {
    if text.trim().is_empty() {
        remove_node(tree, id)
    } else {
        set_text(tree, id, text, now_ms)
    }
}

pub fn rewrite_id(tree: &Tree, old: &NodeId, new: &NodeId) -> Tree {
    apply(tree, "rewrite_id", |t| t.rewrite_id(old, new))
}

pub fn recalc_levels(tree: &Tree) -> Tree {
    let mut next = tree.clone();
    next.recalc_levels();
    next
}
