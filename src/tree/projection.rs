//! Read-side helpers for views: the flattened visible rows and the mapping
//! from a drag gesture to a `move_node` target.

use super::Tree;
use crate::ids::NodeId;
use crate::models::{Formatting, Style};

#[derive(Clone, Debug, PartialEq)]
pub struct VisibleRow {
    pub id: NodeId,
    pub text: String,
    pub level: u32,
    pub style: Style,
    pub formatting: Option<Formatting>,
    pub has_children: bool,
    pub expanded: bool,
}

/// Depth-first rows; children of collapsed nodes are skipped.
pub fn visible_rows(tree: &Tree) -> Vec<VisibleRow> {
    fn walk(tree: &Tree, ids: &[NodeId], out: &mut Vec<VisibleRow>) {
        for id in ids {
            let Some(n) = tree.get(id) else {
                continue;
            };
            out.push(VisibleRow {
                id: n.id.clone(),
                text: n.text.clone(),
                level: n.level,
                style: n.style,
                formatting: n.formatting.clone(),
                has_children: !n.children.is_empty(),
                expanded: n.expanded,
            });
            if n.expanded {
                walk(tree, &n.children, out);
            }
        }
    }

    let mut out = Vec::with_capacity(tree.len());
    walk(tree, tree.roots(), &mut out);
    out
}

fn visible_ids(tree: &Tree) -> Vec<NodeId> {
    visible_rows(tree).into_iter().map(|r| r.id).collect()
}

/// Row above `id` in the visible order (arrow-up / focus after delete).
pub fn prev_visible(tree: &Tree, id: &NodeId) -> Option<NodeId> {
    let ids = visible_ids(tree);
    let idx = ids.iter().position(|x| x == id)?;
    idx.checked_sub(1).map(|i| ids[i].clone())
}

/// Row below `id` in the visible order.
pub fn next_visible(tree: &Tree, id: &NodeId) -> Option<NodeId> {
    let ids = visible_ids(tree);
    let idx = ids.iter().position(|x| x == id)?;
    ids.get(idx + 1).cloned()
}

/// Where a dragged row was dropped relative to the row under the pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropPosition {
    Before,
    After,
    /// Onto the row: becomes its last child.
    Inside,
}

/// Translate a drop into `(new_parent, position)` for `move_node`.
///
/// Returns `None` for drops that would be no-ops or would put the dragged
/// item inside its own subtree. `position` already accounts for the dragged
/// item leaving its old place.
pub fn drop_target(
    tree: &Tree,
    dragged: &NodeId,
    target: &NodeId,
    at: DropPosition,
) -> Option<(Option<NodeId>, usize)> {
    if dragged == target {
        return None;
    }
    let dragged_node = tree.get(dragged)?;
    let target_node = tree.get(target)?;
    if tree.is_within(target, dragged) {
        return None;
    }

    let (new_parent, position) = match at {
        DropPosition::Inside => {
            let end = target_node
                .children
                .iter()
                .filter(|c| *c != dragged)
                .count();
            (Some(target.clone()), end)
        }
        DropPosition::Before | DropPosition::After => {
            let parent = target_node.parent.clone();
            // Siblings in the destination, excluding the dragged node since it will move.
            let sibs: Vec<&NodeId> = tree
                .siblings_under(parent.as_ref())?
                .iter()
                .filter(|x| *x != dragged)
                .collect();
            let tidx = sibs.iter().position(|x| *x == target)?;
            let idx = if at == DropPosition::After { tidx + 1 } else { tidx };
            (parent, idx)
        }
    };

    // Same parent and same slot: nothing to do.
    if dragged_node.parent == new_parent && tree.position_of(dragged) == Some(position) {
        return None;
    }
    Some((new_parent, position))
}
