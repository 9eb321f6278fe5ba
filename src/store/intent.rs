use crate::api::ItemPatch;
use crate::ids::NodeId;
use crate::models::{Formatting, Style};

/// Backend side effect of one applied command.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncIntent {
    Create {
        id: NodeId,
        parent: Option<NodeId>,
        text: String,
        position: usize,
        style: Style,
        formatting: Option<Formatting>,
    },
    Update {
        id: NodeId,
        patch: ItemPatch,
    },
    Move {
        id: NodeId,
        parent: Option<NodeId>,
        position: usize,
    },
    /// `descendants` are the nodes removed along with `id`; the backend
    /// deletes them by cascade, but queued work for them must be cancelled.
    Delete {
        id: NodeId,
        descendants: Vec<NodeId>,
    },
}

impl SyncIntent {
    pub fn target(&self) -> &NodeId {
        match self {
            SyncIntent::Create { id, .. }
            | SyncIntent::Update { id, .. }
            | SyncIntent::Move { id, .. }
            | SyncIntent::Delete { id, .. } => id,
        }
    }

    pub fn parent_ref(&self) -> Option<&NodeId> {
        match self {
            SyncIntent::Create { parent, .. } | SyncIntent::Move { parent, .. } => parent.as_ref(),
            SyncIntent::Update { .. } | SyncIntent::Delete { .. } => None,
        }
    }

    /// True while the intent still names a node the backend does not know yet.
    /// A create only waits for its parent.
    pub fn waits_for_id(&self) -> bool {
        let parent_tmp = self.parent_ref().is_some_and(NodeId::is_temporary);
        match self {
            SyncIntent::Create { .. } => parent_tmp,
            _ => parent_tmp || self.target().is_temporary(),
        }
    }

    pub fn references(&self, id: &NodeId) -> bool {
        self.target() == id || self.parent_ref() == Some(id)
    }

    /// Replace `old` in the target and parent reference.
    pub fn rewrite_id(&mut self, old: &NodeId, new: &NodeId) -> bool {
        let mut changed = false;
        let (target, parent) = match self {
            SyncIntent::Create { id, parent, .. } | SyncIntent::Move { id, parent, .. } => {
                (id, Some(parent))
            }
            SyncIntent::Update { id, .. } | SyncIntent::Delete { id, .. } => (id, None),
        };
        if target == old {
            *target = new.clone();
            changed = true;
        }
        if let Some(p) = parent {
            if p.as_ref() == Some(old) {
                *p = Some(new.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncIntent::Create { .. } => "create",
            SyncIntent::Update { .. } => "update",
            SyncIntent::Move { .. } => "move",
            SyncIntent::Delete { .. } => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(ms: u64) -> NodeId {
        NodeId::Temporary(ms)
    }

    #[test]
    fn create_waits_only_for_a_temporary_parent() {
        let root_create = SyncIntent::Create {
            id: tmp(1),
            parent: None,
            text: "a".into(),
            position: 0,
            style: Style::Normal,
            formatting: None,
        };
        assert!(!root_create.waits_for_id());

        let child_create = SyncIntent::Create {
            id: tmp(2),
            parent: Some(tmp(1)),
            text: "b".into(),
            position: 0,
            style: Style::Normal,
            formatting: None,
        };
        assert!(child_create.waits_for_id());

        let update = SyncIntent::Update {
            id: tmp(1),
            patch: ItemPatch::default(),
        };
        assert!(update.waits_for_id());
    }

    #[test]
    fn rewrite_touches_target_and_parent() {
        let mut m = SyncIntent::Move {
            id: tmp(2),
            parent: Some(tmp(1)),
            position: 3,
        };
        assert!(m.rewrite_id(&tmp(1), &NodeId::permanent("p1")));
        assert!(m.rewrite_id(&tmp(2), &NodeId::permanent("p2")));
        assert!(!m.waits_for_id());
        assert_eq!(
            m,
            SyncIntent::Move {
                id: NodeId::permanent("p2"),
                parent: Some(NodeId::permanent("p1")),
                position: 3,
            }
        );
        assert!(!m.rewrite_id(&tmp(1), &NodeId::permanent("x")));
    }
}
