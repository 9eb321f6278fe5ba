//! Arena representation of an outline.
//!
//! Nodes live in a map keyed by id; structure is expressed only through id
//! references (`parent`, `children`, `roots`). Relinking a subtree is a pair of
//! vector edits plus a level rewrite of the moved subtree, and cycle checks are
//! a walk up the parent chain.

mod error;
pub mod engine;
pub mod projection;

pub use error::{InvariantViolation, MutationError};

use crate::ids::NodeId;
use crate::models::{Formatting, ItemRecord, Node, Style};
use std::collections::{HashMap, HashSet};

/// Where a node ended up after a structural command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub parent: Option<NodeId>,
    pub position: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    roots: Vec<NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Children of `parent`, or the root list for `None`.
    pub fn siblings_under(&self, parent: Option<&NodeId>) -> Option<&[NodeId]> {
        match parent {
            None => Some(&self.roots),
            Some(p) => self.nodes.get(p).map(|n| n.children.as_slice()),
        }
    }

    fn siblings_under_mut(&mut self, parent: Option<&NodeId>) -> Option<&mut Vec<NodeId>> {
        match parent {
            None => Some(&mut self.roots),
            Some(p) => self.nodes.get_mut(p).map(|n| &mut n.children),
        }
    }

    /// Index of `id` among its siblings.
    pub fn position_of(&self, id: &NodeId) -> Option<usize> {
        let node = self.nodes.get(id)?;
        self.siblings_under(node.parent.as_ref())?
            .iter()
            .position(|x| x == id)
    }

    pub fn placement_of(&self, id: &NodeId) -> Option<Placement> {
        let node = self.nodes.get(id)?;
        Some(Placement {
            parent: node.parent.clone(),
            position: self.position_of(id)?,
        })
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.nodes.get(id).and_then(|n| n.parent.clone());
        while let Some(p) = cur {
            // A corrupted parent chain must not hang the walk.
            if out.contains(&p) || out.len() > self.nodes.len() {
                break;
            }
            cur = self.nodes.get(&p).and_then(|n| n.parent.clone());
            out.push(p);
        }
        out
    }

    /// True if `candidate` is `ancestor` or lies somewhere below it.
    pub fn is_within(&self, candidate: &NodeId, ancestor: &NodeId) -> bool {
        candidate == ancestor || self.ancestors(candidate).iter().any(|a| a == ancestor)
    }

    /// `id` and all its descendants, pre-order.
    pub fn subtree_ids(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.nodes.contains_key(id) {
            self.collect_preorder(id, &mut out);
        }
        out
    }

    fn collect_preorder(&self, id: &NodeId, out: &mut Vec<NodeId>) {
        out.push(id.clone());
        if let Some(n) = self.nodes.get(id) {
            for c in &n.children {
                self.collect_preorder(c, out);
            }
        }
    }

    /// Every node, depth-first in display order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for r in &self.roots {
            self.collect_preorder(r, &mut out);
        }
        out
    }

    fn level_under(&self, parent: Option<&NodeId>) -> u32 {
        parent
            .and_then(|p| self.nodes.get(p))
            .map(|p| p.level + 1)
            .unwrap_or(0)
    }

    /// Insert a detached node at `position` under `parent` (clamped to the
    /// sibling count). Ancestors are expanded so the node is visible.
    pub fn insert_at(
        &mut self,
        mut node: Node,
        parent: Option<&NodeId>,
        position: usize,
    ) -> Result<Placement, MutationError> {
        if self.nodes.contains_key(&node.id) {
            return Err(MutationError::DuplicateId(node.id));
        }
        let Some(len) = self.siblings_under(parent).map(|s| s.len()) else {
            return Err(MutationError::NotFound(parent.cloned().unwrap_or(node.id)));
        };
        let position = position.min(len);

        node.parent = parent.cloned();
        node.level = self.level_under(parent);
        node.children.clear();
        let id = node.id.clone();

        if let Some(list) = self.siblings_under_mut(parent) {
            list.insert(position, id.clone());
        }
        self.nodes.insert(id.clone(), node);
        self.reveal(&id);

        Ok(Placement {
            parent: parent.cloned(),
            position,
        })
    }

    /// Insert `node` as the next sibling of `anchor`, or append it at root.
    pub fn insert_after(
        &mut self,
        anchor: Option<&NodeId>,
        node: Node,
    ) -> Result<Placement, MutationError> {
        match anchor {
            None => {
                let end = self.roots.len();
                self.insert_at(node, None, end)
            }
            Some(a) => {
                let parent = self
                    .nodes
                    .get(a)
                    .ok_or_else(|| MutationError::NotFound(a.clone()))?
                    .parent
                    .clone();
                let pos = self
                    .position_of(a)
                    .ok_or_else(|| MutationError::NotFound(a.clone()))?;
                self.insert_at(node, parent.as_ref(), pos + 1)
            }
        }
    }

    /// Expand every ancestor of `id`.
    pub fn reveal(&mut self, id: &NodeId) {
        for a in self.ancestors(id) {
            if let Some(n) = self.nodes.get_mut(&a) {
                n.expanded = true;
            }
        }
    }

    /// Remove `id` and its whole subtree. Returns the removed nodes, pre-order.
    pub fn remove(&mut self, id: &NodeId) -> Result<Vec<Node>, MutationError> {
        let parent = self
            .nodes
            .get(id)
            .ok_or_else(|| MutationError::NotFound(id.clone()))?
            .parent
            .clone();

        let ids = self.subtree_ids(id);
        if let Some(list) = self.siblings_under_mut(parent.as_ref()) {
            list.retain(|x| x != id);
        }
        Ok(ids.iter().filter_map(|x| self.nodes.remove(x)).collect())
    }

    /// Move `id` with its subtree to `position` under `new_parent`.
    ///
    /// `position` is an index into the destination list *after* the node has
    /// been taken out of its old place, clamped to that list's length.
    pub fn relocate(
        &mut self,
        id: &NodeId,
        new_parent: Option<&NodeId>,
        position: usize,
    ) -> Result<Placement, MutationError> {
        let old_parent = self
            .nodes
            .get(id)
            .ok_or_else(|| MutationError::NotFound(id.clone()))?
            .parent
            .clone();

        if let Some(p) = new_parent {
            if !self.nodes.contains_key(p) {
                return Err(MutationError::NotFound(p.clone()));
            }
            if self.is_within(p, id) {
                return Err(MutationError::Cycle {
                    id: id.clone(),
                    parent: p.clone(),
                });
            }
        }

        if let Some(list) = self.siblings_under_mut(old_parent.as_ref()) {
            list.retain(|x| x != id);
        }
        let position = match self.siblings_under_mut(new_parent) {
            Some(list) => {
                let position = position.min(list.len());
                list.insert(position, id.clone());
                position
            }
            None => 0,
        };
        if let Some(n) = self.nodes.get_mut(id) {
            n.parent = new_parent.cloned();
        }
        self.relevel_subtree(id);

        Ok(Placement {
            parent: new_parent.cloned(),
            position,
        })
    }

    /// Make `id` the last child of its preceding sibling, which is expanded.
    pub fn indent(&mut self, id: &NodeId) -> Result<Placement, MutationError> {
        let pos = self
            .position_of(id)
            .ok_or_else(|| MutationError::NotFound(id.clone()))?;
        if pos == 0 {
            return Err(MutationError::NoPrecedingSibling(id.clone()));
        }
        let parent = self.nodes.get(id).and_then(|n| n.parent.clone());
        let prev = self
            .siblings_under(parent.as_ref())
            .and_then(|s| s.get(pos - 1))
            .cloned()
            .ok_or_else(|| MutationError::NoPrecedingSibling(id.clone()))?;

        let end = self.nodes.get(&prev).map(|p| p.children.len()).unwrap_or(0);
        let placement = self.relocate(id, Some(&prev), end)?;
        if let Some(p) = self.nodes.get_mut(&prev) {
            p.expanded = true;
        }
        Ok(placement)
    }

    /// Make `id` the next sibling of its parent.
    pub fn outdent(&mut self, id: &NodeId) -> Result<Placement, MutationError> {
        let parent = self
            .nodes
            .get(id)
            .ok_or_else(|| MutationError::NotFound(id.clone()))?
            .parent
            .clone()
            .ok_or_else(|| MutationError::AlreadyRoot(id.clone()))?;
        let grand = self.nodes.get(&parent).and_then(|p| p.parent.clone());
        let parent_pos = self
            .position_of(&parent)
            .ok_or_else(|| MutationError::NotFound(parent.clone()))?;
        self.relocate(id, grand.as_ref(), parent_pos + 1)
    }

    /// Flip `expanded`; returns the new value.
    pub fn toggle_expanded(&mut self, id: &NodeId) -> Result<bool, MutationError> {
        let n = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| MutationError::NotFound(id.clone()))?;
        n.expanded = !n.expanded;
        Ok(n.expanded)
    }

    /// Returns whether anything changed.
    pub fn set_style(
        &mut self,
        id: &NodeId,
        style: Style,
        formatting: Option<Formatting>,
        now_ms: i64,
    ) -> Result<bool, MutationError> {
        let n = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| MutationError::NotFound(id.clone()))?;
        if n.style == style && n.formatting == formatting {
            return Ok(false);
        }
        n.style = style;
        n.formatting = formatting;
        n.updated_ms = now_ms;
        Ok(true)
    }

    /// Returns whether the text changed.
    pub fn set_text(&mut self, id: &NodeId, text: &str, now_ms: i64) -> Result<bool, MutationError> {
        let n = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| MutationError::NotFound(id.clone()))?;
        if n.text == text {
            return Ok(false);
        }
        n.text = text.to_string();
        n.updated_ms = now_ms;
        Ok(true)
    }

    /// Replace `old` with `new` everywhere it is referenced.
    ///
    /// Returns `Ok(false)` when `old` is not in the tree, which makes a repeated
    /// call a no-op.
    pub fn rewrite_id(&mut self, old: &NodeId, new: &NodeId) -> Result<bool, MutationError> {
        if old == new || !self.nodes.contains_key(old) {
            return Ok(false);
        }
        if self.nodes.contains_key(new) {
            return Err(MutationError::DuplicateId(new.clone()));
        }
        let Some(mut node) = self.nodes.remove(old) else {
            return Ok(false);
        };

        node.id = new.clone();
        for c in &node.children {
            if let Some(child) = self.nodes.get_mut(c) {
                child.parent = Some(new.clone());
            }
        }
        if let Some(list) = self.siblings_under_mut(node.parent.as_ref()) {
            if let Some(x) = list.iter_mut().find(|x| **x == *old) {
                *x = new.clone();
            }
        }
        self.nodes.insert(new.clone(), node);
        Ok(true)
    }

    /// Rewrite the level of `id` and its descendants from its parent's level.
    pub fn relevel_subtree(&mut self, id: &NodeId) {
        let Some(parent) = self.nodes.get(id).map(|n| n.parent.clone()) else {
            return;
        };
        let base = self.level_under(parent.as_ref());
        let mut stack = vec![(id.clone(), base)];
        while let Some((cur, level)) = stack.pop() {
            if let Some(n) = self.nodes.get_mut(&cur) {
                n.level = level;
                stack.extend(n.children.iter().map(|c| (c.clone(), level + 1)));
            }
        }
    }

    /// Rewrite every level from the parent chain.
    pub fn recalc_levels(&mut self) {
        for r in self.roots.clone() {
            self.relevel_subtree(&r);
        }
    }

    /// Check every structural invariant.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut seen_roots = HashSet::new();
        for r in &self.roots {
            let node = self
                .nodes
                .get(r)
                .ok_or_else(|| InvariantViolation::Dangling(r.clone()))?;
            if node.parent.is_some() || !seen_roots.insert(r) {
                return Err(InvariantViolation::RootListMismatch(r.clone()));
            }
        }

        for (id, node) in &self.nodes {
            match &node.parent {
                None => {
                    if !seen_roots.contains(id) {
                        return Err(InvariantViolation::RootListMismatch(id.clone()));
                    }
                }
                Some(p) => {
                    let parent = self
                        .nodes
                        .get(p)
                        .ok_or_else(|| InvariantViolation::Dangling(p.clone()))?;
                    if parent.children.iter().filter(|c| *c == id).count() != 1 {
                        return Err(InvariantViolation::MissingChild {
                            parent: p.clone(),
                            child: id.clone(),
                        });
                    }
                }
            }

            for c in &node.children {
                let child = self
                    .nodes
                    .get(c)
                    .ok_or_else(|| InvariantViolation::Dangling(c.clone()))?;
                if child.parent.as_ref() != Some(id) {
                    return Err(InvariantViolation::ParentMismatch {
                        parent: id.clone(),
                        child: c.clone(),
                    });
                }
            }

            let expected = match &node.parent {
                None => 0,
                Some(p) => self.nodes.get(p).map(|p| p.level + 1).unwrap_or(0),
            };
            if node.level != expected {
                return Err(InvariantViolation::LevelMismatch {
                    id: id.clone(),
                    expected,
                    actual: node.level,
                });
            }
        }

        let reachable = self.preorder().len();
        if reachable != self.nodes.len() {
            return Err(InvariantViolation::Unreachable(
                self.nodes.len().abs_diff(reachable),
            ));
        }
        Ok(())
    }

    /// Build a tree from flat records.
    ///
    /// Siblings are ordered by `position`. Records whose parent is missing are
    /// promoted to root; duplicate ids and records caught in a parent cycle are
    /// dropped. Both cases are logged.
    pub fn from_records(records: Vec<ItemRecord>) -> Self {
        let mut by_id: HashMap<NodeId, ItemRecord> = HashMap::with_capacity(records.len());
        let mut order: Vec<NodeId> = Vec::with_capacity(records.len());
        for r in records {
            if by_id.contains_key(&r.id) {
                tracing::warn!(id = %r.id, "duplicate item id in snapshot, keeping the first");
                continue;
            }
            order.push(r.id.clone());
            by_id.insert(r.id.clone(), r);
        }

        let mut children: HashMap<Option<NodeId>, Vec<&ItemRecord>> = HashMap::new();
        for id in &order {
            let r = &by_id[id];
            let parent = match &r.parent_id {
                Some(p) if by_id.contains_key(p) => Some(p.clone()),
                Some(p) => {
                    tracing::warn!(id = %r.id, parent = %p, "orphaned item promoted to root");
                    None
                }
                None => None,
            };
            children.entry(parent).or_default().push(r);
        }
        for list in children.values_mut() {
            list.sort_by_key(|r| r.position);
        }

        let mut tree = Tree::new();
        let mut stack: Vec<(Option<NodeId>, Vec<&ItemRecord>)> =
            vec![(None, children.get(&None).cloned().unwrap_or_default())];
        while let Some((parent, list)) = stack.pop() {
            for r in list {
                let node = Node {
                    id: r.id.clone(),
                    text: r.content.clone(),
                    parent: None,
                    level: 0,
                    children: Vec::new(),
                    expanded: r.expanded,
                    style: r.style,
                    formatting: r.formatting.clone(),
                    created_ms: r.created_ms,
                    updated_ms: r.updated_ms,
                };
                let end = tree
                    .siblings_under(parent.as_ref())
                    .map(|s| s.len())
                    .unwrap_or(0);
                let Some(list) = tree.siblings_under_mut(parent.as_ref()) else {
                    continue;
                };
                list.insert(end, r.id.clone());
                tree.nodes.insert(r.id.clone(), Node { parent: parent.clone(), ..node });
                let kids = children
                    .get(&Some(r.id.clone()))
                    .cloned()
                    .unwrap_or_default();
                stack.push((Some(r.id.clone()), kids));
            }
        }

        let dropped = by_id.len() - tree.nodes.len();
        if dropped > 0 {
            tracing::warn!(dropped, "items in a parent cycle were dropped from the snapshot");
        }
        tree.recalc_levels();
        tree
    }

    /// Flat records for every node, pre-order.
    pub fn to_records(&self) -> Vec<ItemRecord> {
        self.preorder()
            .into_iter()
            .filter_map(|id| self.record_of(&id))
            .collect()
    }

    pub fn record_of(&self, id: &NodeId) -> Option<ItemRecord> {
        let n = self.nodes.get(id)?;
        Some(ItemRecord {
            id: n.id.clone(),
            parent_id: n.parent.clone(),
            position: self.position_of(id)? as u32,
            content: n.text.clone(),
            style: n.style,
            formatting: n.formatting.clone(),
            expanded: n.expanded,
            created_ms: n.created_ms,
            updated_ms: n.updated_ms,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn node(id: &str, text: &str) -> Node {
        Node::new(id.parse().expect("non-empty id"), text, 0)
    }

    pub fn id(s: &str) -> NodeId {
        s.parse().expect("non-empty id")
    }

    /// Build a tree from `(id, parent, text)` rows in display order.
    pub fn tree(rows: &[(&str, Option<&str>, &str)]) -> Tree {
        let mut t = Tree::new();
        for (i, p, text) in rows {
            let parent = p.map(id);
            let end = t.siblings_under(parent.as_ref()).map(|s| s.len()).unwrap_or(0);
            t.insert_at(node(i, text), parent.as_ref(), end)
                .expect("test rows are well-formed");
        }
        t
    }

    pub fn texts(t: &Tree, parent: Option<&str>) -> Vec<String> {
        let parent = parent.map(id);
        t.siblings_under(parent.as_ref())
            .unwrap_or_default()
            .iter()
            .map(|c| t.get(c).map(|n| n.text.clone()).unwrap_or_default())
            .collect()
    }
}
