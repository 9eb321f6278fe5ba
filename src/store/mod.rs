//! Explicit outline state: owns the tree, applies commands, and reports what
//! the backend needs to hear about.

mod intent;

pub use intent::SyncIntent;

use crate::api::ItemPatch;
use crate::ids::{IdMinter, NodeId};
use crate::models::{Formatting, Node, Outline, Style};
use crate::tree::engine::CommitTrigger;
use crate::tree::projection::{visible_rows, VisibleRow};
use crate::tree::{MutationError, Placement, Tree};
use crate::util::{normalize_text, now_ms};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

pub type SharedStore = Rc<RefCell<OutlineStore>>;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// New bullet after `anchor` (same parent), or at the end of the roots.
    InsertAfter { anchor: Option<NodeId>, text: String },
    InsertChild {
        parent: Option<NodeId>,
        position: usize,
        text: String,
    },
    Remove { id: NodeId },
    Indent { id: NodeId },
    Outdent { id: NodeId },
    Move {
        id: NodeId,
        parent: Option<NodeId>,
        position: usize,
    },
    ToggleExpanded { id: NodeId },
    SetStyle {
        id: NodeId,
        style: Style,
        formatting: Option<Formatting>,
    },
    SetText { id: NodeId, text: String },
    CommitText {
        id: NodeId,
        text: String,
        trigger: CommitTrigger,
    },
}

/// Result of applying a command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Applied {
    pub changed: bool,
    /// Ids minted for new bullets, in creation order.
    pub created: Vec<NodeId>,
    pub intents: Vec<SyncIntent>,
}

impl Applied {
    fn merge(&mut self, other: Applied) {
        self.changed |= other.changed;
        self.created.extend(other.created);
        self.intents.extend(other.intents);
    }
}

/// Generated or transcribed content to graft into the outline.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ItemDraft {
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default)]
    pub style: Option<Style>,
    #[serde(default)]
    pub formatting: Option<Formatting>,
    #[serde(default)]
    pub children: Vec<ItemDraft>,
}

#[derive(Clone, Debug, Default)]
pub struct OutlineStore {
    outline_id: String,
    title: String,
    tree: Tree,
    minter: IdMinter,
}

impl OutlineStore {
    pub fn new(outline_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            outline_id: outline_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn from_outline(outline: Outline) -> Self {
        Self {
            outline_id: outline.id,
            title: outline.title,
            tree: outline.tree,
            minter: IdMinter::new(),
        }
    }

    pub fn shared(self) -> SharedStore {
        Rc::new(RefCell::new(self))
    }

    pub fn outline_id(&self) -> &str {
        &self.outline_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn outline(&self) -> Outline {
        Outline {
            id: self.outline_id.clone(),
            title: self.title.clone(),
            tree: self.tree.clone(),
        }
    }

    /// Swap in a freshly loaded tree. Queued intents are not touched.
    pub fn replace_tree(&mut self, tree: Tree) {
        self.tree = tree;
    }

    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        visible_rows(&self.tree)
    }

    /// Install a permanent id. A missing `old` is a no-op; a `new` that is
    /// already taken is refused and logged.
    pub fn rewrite_id(&mut self, old: &NodeId, new: &NodeId) -> bool {
        match self.tree.rewrite_id(old, new) {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(old = %old, new = %new, error = %e, "id rewrite refused");
                false
            }
        }
    }

    pub fn apply(&mut self, cmd: Command) -> Applied {
        self.apply_at(cmd, now_ms())
    }

    /// Apply a command; a refused command leaves the tree untouched and is
    /// logged at debug level.
    pub fn apply_at(&mut self, cmd: Command, now: i64) -> Applied {
        let op = command_name(&cmd);
        match self.try_apply_at(cmd, now) {
            Ok(applied) => applied,
            Err(e) => {
                tracing::debug!(op, error = %e, "outline command ignored");
                Applied::default()
            }
        }
    }

    /// Fallible form of [`apply_at`](Self::apply_at). Every check runs before
    /// the tree is touched.
    pub fn try_apply_at(&mut self, cmd: Command, now: i64) -> Result<Applied, MutationError> {
        match cmd {
            Command::InsertAfter { anchor, text } => {
                let parent = match &anchor {
                    Some(a) => self
                        .tree
                        .get(a)
                        .ok_or_else(|| MutationError::NotFound(a.clone()))?
                        .parent
                        .clone(),
                    None => None,
                };
                let collapsed = self.collapsed_chain(parent.as_ref());
                let id = self.minter.mint_at(now);
                let placement = self
                    .tree
                    .insert_after(anchor.as_ref(), Node::new(id.clone(), text, now))?;
                Ok(self.created(id, placement, collapsed))
            }
            Command::InsertChild {
                parent,
                position,
                text,
            } => {
                let collapsed = self.collapsed_chain(parent.as_ref());
                let id = self.minter.mint_at(now);
                let placement =
                    self.tree
                        .insert_at(Node::new(id.clone(), text, now), parent.as_ref(), position)?;
                Ok(self.created(id, placement, collapsed))
            }
            Command::Remove { id } => self.remove(&id),
            Command::Indent { id } => {
                let collapsed = self
                    .tree
                    .placement_of(&id)
                    .filter(|p| p.position > 0)
                    .and_then(|p| {
                        self.tree
                            .siblings_under(p.parent.as_ref())
                            .and_then(|s| s.get(p.position - 1))
                            .cloned()
                    })
                    .filter(|prev| self.tree.get(prev).is_some_and(|n| !n.expanded))
                    .into_iter()
                    .collect::<Vec<_>>();
                let placement = self.tree.indent(&id)?;
                let mut applied = moved(id, placement);
                applied.intents.extend(self.expanded_intents(collapsed));
                Ok(applied)
            }
            Command::Outdent { id } => {
                let placement = self.tree.outdent(&id)?;
                Ok(moved(id, placement))
            }
            Command::Move {
                id,
                parent,
                position,
            } => {
                let before = self.tree.placement_of(&id);
                let placement = self.tree.relocate(&id, parent.as_ref(), position)?;
                if before.as_ref() == Some(&placement) {
                    return Ok(Applied::default());
                }
                Ok(moved(id, placement))
            }
            Command::ToggleExpanded { id } => {
                let expanded = self.tree.toggle_expanded(&id)?;
                Ok(updated(
                    id,
                    ItemPatch {
                        expanded: Some(expanded),
                        ..Default::default()
                    },
                ))
            }
            Command::SetStyle {
                id,
                style,
                formatting,
            } => {
                if !self.tree.set_style(&id, style, formatting.clone(), now)? {
                    return Ok(Applied::default());
                }
                Ok(updated(
                    id,
                    ItemPatch {
                        style: Some(style),
                        formatting: Some(formatting),
                        ..Default::default()
                    },
                ))
            }
            Command::SetText { id, text } => self.set_text(id, text, now),
            Command::CommitText { id, text, .. } => {
                if text.trim().is_empty() {
                    self.remove(&id)
                } else {
                    self.set_text(id, text, now)
                }
            }
        }
    }

    /// Graft drafts at the end of `parent`'s children. Top-level drafts whose
    /// text matches an existing sibling (case and spacing ignored) are skipped.
    pub fn import_drafts(&mut self, parent: Option<&NodeId>, drafts: Vec<ItemDraft>) -> Applied {
        self.import_drafts_at(parent, drafts, now_ms())
    }

    pub fn import_drafts_at(
        &mut self,
        parent: Option<&NodeId>,
        drafts: Vec<ItemDraft>,
        now: i64,
    ) -> Applied {
        let Some(siblings) = self.tree.siblings_under(parent) else {
            tracing::warn!(parent = ?parent, "import target not found");
            return Applied::default();
        };
        let mut seen: HashSet<String> = siblings
            .iter()
            .filter_map(|id| self.tree.get(id))
            .map(|n| normalize_text(&n.text))
            .collect();

        let mut applied = Applied::default();
        for draft in drafts {
            let key = normalize_text(&draft.text);
            if key.is_empty() {
                continue;
            }
            if !seen.insert(key) {
                tracing::warn!(text = %draft.text, "duplicate draft skipped");
                continue;
            }
            applied.merge(self.insert_draft(parent, draft, now));
        }
        applied
    }

    fn insert_draft(&mut self, parent: Option<&NodeId>, draft: ItemDraft, now: i64) -> Applied {
        let collapsed = self.collapsed_chain(parent);
        let id = self.minter.mint_at(now);
        let node = Node::new(id.clone(), draft.text, now)
            .with_style(draft.style.unwrap_or_default())
            .with_formatting(draft.formatting);
        let end = self.tree.siblings_under(parent).map(|s| s.len()).unwrap_or(0);
        let mut applied = match self.tree.insert_at(node, parent, end) {
            Ok(placement) => self.created(id.clone(), placement, collapsed),
            Err(e) => {
                tracing::warn!(error = %e, "draft could not be inserted");
                return Applied::default();
            }
        };
        for child in draft.children {
            if child.text.trim().is_empty() {
                continue;
            }
            applied.merge(self.insert_draft(Some(&id), child, now));
        }
        applied
    }

    fn remove(&mut self, id: &NodeId) -> Result<Applied, MutationError> {
        let removed = self.tree.remove(id)?;
        Ok(Applied {
            changed: true,
            created: vec![],
            intents: vec![SyncIntent::Delete {
                id: id.clone(),
                descendants: removed.into_iter().skip(1).map(|n| n.id).collect(),
            }],
        })
    }

    fn set_text(&mut self, id: NodeId, text: String, now: i64) -> Result<Applied, MutationError> {
        if !self.tree.set_text(&id, &text, now)? {
            return Ok(Applied::default());
        }
        Ok(updated(
            id,
            ItemPatch {
                content: Some(text),
                ..Default::default()
            },
        ))
    }

    /// `parent` and its ancestors that are currently collapsed.
    fn collapsed_chain(&self, parent: Option<&NodeId>) -> Vec<NodeId> {
        let Some(p) = parent else {
            return vec![];
        };
        std::iter::once(p.clone())
            .chain(self.tree.ancestors(p))
            .filter(|x| self.tree.get(x).is_some_and(|n| !n.expanded))
            .collect()
    }

    fn expanded_intents(&self, was_collapsed: Vec<NodeId>) -> Vec<SyncIntent> {
        was_collapsed
            .into_iter()
            .filter(|x| self.tree.get(x).is_some_and(|n| n.expanded))
            .map(|id| SyncIntent::Update {
                id,
                patch: ItemPatch {
                    expanded: Some(true),
                    ..Default::default()
                },
            })
            .collect()
    }

    fn created(&self, id: NodeId, placement: Placement, collapsed: Vec<NodeId>) -> Applied {
        let mut intents = self.expanded_intents(collapsed);
        if let Some(n) = self.tree.get(&id) {
            intents.push(SyncIntent::Create {
                id: id.clone(),
                parent: placement.parent,
                text: n.text.clone(),
                position: placement.position,
                style: n.style,
                formatting: n.formatting.clone(),
            });
        }
        Applied {
            changed: true,
            created: vec![id],
            intents,
        }
    }
}

fn moved(id: NodeId, placement: Placement) -> Applied {
    Applied {
        changed: true,
        created: vec![],
        intents: vec![SyncIntent::Move {
            id,
            parent: placement.parent,
            position: placement.position,
        }],
    }
}

fn updated(id: NodeId, patch: ItemPatch) -> Applied {
    Applied {
        changed: true,
        created: vec![],
        intents: vec![SyncIntent::Update { id, patch }],
    }
}

fn command_name(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertAfter { .. } => "insert_after",
        Command::InsertChild { .. } => "insert_child",
        Command::Remove { .. } => "remove",
        Command::Indent { .. } => "indent",
        Command::Outdent { .. } => "outdent",
        Command::Move { .. } => "move",
        Command::ToggleExpanded { .. } => "toggle_expanded",
        Command::SetStyle { .. } => "set_style",
        Command::SetText { .. } => "set_text",
        Command::CommitText { .. } => "commit_text",
    }
}
