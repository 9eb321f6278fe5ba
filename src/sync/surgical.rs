use super::{move_patch, SyncEnv, SyncReport, SyncStrategy};
use crate::api::{ApiError, ApiResult, DeleteItemRequest, NewItem, UpdateItemRequest};
use crate::config::StrategyKind;
use crate::ids::NodeId;
use crate::queue::QueuedAction;
use crate::store::{SharedStore, SyncIntent};
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};

#[derive(Clone, Debug)]
struct Pending {
    intent: SyncIntent,
    attempts: u32,
    not_before_ms: i64,
}

impl Pending {
    fn new(intent: SyncIntent) -> Self {
        Self {
            intent,
            attempts: 0,
            not_before_ms: 0,
        }
    }
}

/// Sends one backend call per intent, in FIFO order.
///
/// An intent naming a node whose create has not come back yet stays queued,
/// and so does everything after it for the same node. When the permanent id
/// arrives it is written into the tree, the snapshot and every queued intent.
#[derive(Debug, Default)]
pub struct SurgicalSync {
    queue: RefCell<VecDeque<Pending>>,
    /// Temporary ids whose create request is on the wire.
    creating: RefCell<HashSet<NodeId>>,
    /// Nodes with actions in the offline queue. Their later intents follow
    /// them there until the queue has been replayed.
    offloaded: RefCell<HashSet<NodeId>>,
    flushing: Cell<bool>,
}

impl SurgicalSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued(&self) -> Vec<SyncIntent> {
        self.queue.borrow().iter().map(|p| p.intent.clone()).collect()
    }

    fn enqueue(&self, intent: SyncIntent) {
        match intent {
            SyncIntent::Update { id, patch } => self.enqueue_update(id, patch),
            SyncIntent::Delete { id, descendants } => self.enqueue_delete(id, descendants),
            other => self.queue.borrow_mut().push_back(Pending::new(other)),
        }
    }

    /// Fold into the newest unsent intent for the same node when that is an
    /// update, or a create that can carry the fields.
    fn enqueue_update(&self, id: NodeId, patch: crate::api::ItemPatch) {
        let mut q = self.queue.borrow_mut();
        if let Some(last) = q.iter_mut().rev().find(|p| p.intent.target() == &id) {
            match &mut last.intent {
                SyncIntent::Update { patch: queued, .. } => {
                    queued.merge(patch);
                    return;
                }
                SyncIntent::Create {
                    text,
                    style,
                    formatting,
                    ..
                } if patch.expanded.is_none() && patch.parent_id.is_none() && patch.order.is_none() => {
                    if let Some(c) = patch.content {
                        *text = c;
                    }
                    if let Some(s) = patch.style {
                        *style = s;
                    }
                    if let Some(f) = patch.formatting {
                        *formatting = f;
                    }
                    return;
                }
                _ => {}
            }
        }
        q.push_back(Pending::new(SyncIntent::Update { id, patch }));
    }

    fn enqueue_delete(&self, id: NodeId, descendants: Vec<NodeId>) {
        let removed: HashSet<NodeId> = std::iter::once(id.clone()).chain(descendants).collect();
        let mut q = self.queue.borrow_mut();

        // A node created under the removed subtree and later moved out of it
        // gets placed by its own queued move; create it at root meanwhile.
        for p in q.iter_mut() {
            if let SyncIntent::Create { id: c, parent, .. } = &mut p.intent {
                if !removed.contains(c) && parent.as_ref().is_some_and(|x| removed.contains(x)) {
                    *parent = None;
                }
            }
        }

        let mut resurrected: Vec<NodeId> = Vec::new();
        q.retain(|p| {
            let target = p.intent.target();
            if removed.contains(target) {
                // An unsent move means the backend still has this node
                // somewhere else; the cascade will not reach it.
                if matches!(p.intent, SyncIntent::Move { .. })
                    && !target.is_temporary()
                    && target != &id
                    && !resurrected.contains(target)
                {
                    resurrected.push(target.clone());
                }
                return false;
            }
            !matches!(p.intent, SyncIntent::Move { .. })
                || !p.intent.parent_ref().is_some_and(|x| removed.contains(x))
        });

        for d in resurrected {
            q.push_back(Pending::new(SyncIntent::Delete {
                id: d,
                descendants: vec![],
            }));
        }

        // A temporary root only exists on the backend if its create is on
        // the wire; otherwise cancelling the queue was enough.
        if !id.is_temporary() || self.creating.borrow().contains(&id) {
            q.push_back(Pending::new(SyncIntent::Delete {
                id,
                descendants: vec![],
            }));
        }
    }

    /// First intent that may go out now, with its queue index.
    fn take_ready(&self, now: i64) -> Option<(usize, Pending)> {
        let mut q = self.queue.borrow_mut();
        let mut waiting: HashSet<NodeId> = HashSet::new();
        let mut found = None;
        for (i, p) in q.iter().enumerate() {
            let target = p.intent.target();
            let ready = !p.intent.waits_for_id()
                && p.not_before_ms <= now
                && !waiting.contains(target)
                && !p.intent.parent_ref().is_some_and(|x| waiting.contains(x));
            if ready {
                found = Some(i);
                break;
            }
            waiting.insert(target.clone());
        }
        let idx = found?;
        let p = q.remove(idx)?;
        if let SyncIntent::Create { id, .. } = &p.intent {
            self.creating.borrow_mut().insert(id.clone());
        }
        Some((idx, p))
    }

    /// Put a failed intent back ahead of anything queued for the same node
    /// since it was taken.
    fn requeue(&self, idx: usize, p: Pending) {
        let mut q = self.queue.borrow_mut();
        let target = p.intent.target();
        let idx = q
            .iter()
            .position(|x| x.intent.references(target))
            .map_or(idx, |first| first.min(idx))
            .min(q.len());
        q.insert(idx, p);
    }

    fn offload(&self, outline_id: &str, intent: &SyncIntent, env: &SyncEnv, now: i64) -> bool {
        let Some(action) = offline_action(outline_id, intent, now) else {
            return false;
        };
        env.offline.enqueue(action);
        self.offloaded.borrow_mut().insert(intent.target().clone());
        true
    }

    /// While the backend is unreachable, hand every intent that names only
    /// permanent ids to the offline queue, in queue order. Intents behind one
    /// that has to stay (a create, or anything waiting on a temporary id) stay
    /// with it.
    fn offload_queued(&self, outline_id: &str, env: &SyncEnv, now: i64) -> usize {
        let mut q = self.queue.borrow_mut();
        let mut waiting: HashSet<NodeId> = HashSet::new();
        let mut kept = VecDeque::with_capacity(q.len());
        let mut moved = 0;
        for p in q.drain(..) {
            let blocked = waiting.contains(p.intent.target())
                || p.intent.parent_ref().is_some_and(|x| waiting.contains(x));
            if !blocked && self.offload(outline_id, &p.intent, env, now) {
                moved += 1;
            } else {
                waiting.insert(p.intent.target().clone());
                kept.push_back(p);
            }
        }
        *q = kept;
        moved
    }

    fn rewrite_queued(&self, old: &NodeId, new: &NodeId) {
        for p in self.queue.borrow_mut().iter_mut() {
            p.intent.rewrite_id(old, new);
        }
    }

    /// Drop every queued intent that can only run once `id` exists, together
    /// with the intents depending on those in turn.
    fn drop_dependents(&self, id: &NodeId) -> usize {
        let mut dead: HashSet<NodeId> = HashSet::from([id.clone()]);
        let mut q = self.queue.borrow_mut();
        let before = q.len();
        q.retain(|p| {
            let depends = dead.contains(p.intent.target())
                || p.intent.parent_ref().is_some_and(|x| dead.contains(x));
            if depends {
                if let SyncIntent::Create { id, .. } = &p.intent {
                    dead.insert(id.clone());
                }
            }
            !depends
        });
        before - q.len()
    }

    async fn send(&self, outline_id: &str, intent: &SyncIntent, env: &SyncEnv) -> ApiResult<Option<NodeId>> {
        match intent {
            SyncIntent::Create {
                parent,
                text,
                position,
                style,
                formatting,
                ..
            } => {
                let item = NewItem {
                    content: text.clone(),
                    parent_id: parent.as_ref().map(|p| p.to_string()),
                    order: Some(*position as u32),
                    style: Some(*style),
                    formatting: formatting.clone(),
                };
                let created = env.backend.create_item(outline_id, item).await?;
                let id: NodeId = created.id.parse().map_err(ApiError::parse)?;
                if id.is_temporary() {
                    return Err(ApiError::parse(format!(
                        "backend answered with a client-style id: {id}"
                    )));
                }
                Ok(Some(id))
            }
            SyncIntent::Update { id, patch } => {
                env.backend
                    .update_item(outline_id, &id.to_string(), patch.clone())
                    .await?;
                Ok(None)
            }
            SyncIntent::Move {
                id,
                parent,
                position,
            } => {
                env.backend
                    .update_item(outline_id, &id.to_string(), move_patch(parent.as_ref(), *position))
                    .await?;
                Ok(None)
            }
            SyncIntent::Delete { id, .. } => {
                env.backend.delete_item(outline_id, &id.to_string()).await?;
                Ok(None)
            }
        }
    }

    fn on_success(
        &self,
        outline_id: &str,
        intent: &SyncIntent,
        created: Option<NodeId>,
        store: &SharedStore,
        env: &SyncEnv,
        now: i64,
    ) {
        match (intent, created) {
            (SyncIntent::Create { id: tmp, .. }, Some(real)) => {
                self.creating.borrow_mut().remove(tmp);
                let record = {
                    let mut s = store.borrow_mut();
                    s.rewrite_id(tmp, &real);
                    s.tree().record_of(&real)
                };
                self.rewrite_queued(tmp, &real);
                env.snapshots.update(outline_id, now, |snap| {
                    snap.swap_tmp_id(tmp, &real);
                    if let Some(r) = record {
                        snap.upsert(r);
                    }
                    true
                });
                tracing::debug!(tmp = %tmp, id = %real, "item created");
            }
            (SyncIntent::Update { id, patch }, _) => {
                env.snapshots
                    .update(outline_id, now, |snap| snap.apply_patch(id, patch));
            }
            (SyncIntent::Move { id, parent, position }, _) => {
                let patch = move_patch(parent.as_ref(), *position);
                env.snapshots
                    .update(outline_id, now, |snap| snap.apply_patch(id, &patch));
            }
            (SyncIntent::Delete { id, .. }, _) => {
                env.snapshots.remove_subtree(outline_id, id, now);
            }
            (SyncIntent::Create { .. }, None) => {}
        }
    }

    /// Out of attempts: intents that only name permanent ids can still be
    /// replayed later from the offline queue; the rest are lost.
    fn give_up(&self, outline_id: &str, p: Pending, env: &SyncEnv, now: i64, report: &mut SyncReport) {
        if self.offload(outline_id, &p.intent, env, now) {
            tracing::warn!(kind = p.intent.kind(), id = %p.intent.target(), attempts = p.attempts, "moving change to the offline queue");
            report.offloaded += 1;
            return;
        }
        tracing::error!(kind = p.intent.kind(), id = %p.intent.target(), attempts = p.attempts, "giving up on change");
        report.dropped += 1;
        if let SyncIntent::Create { id, .. } = &p.intent {
            report.skipped += self.drop_dependents(id);
        }
    }
}

/// The offline queue form of an intent. Creates have none: a replayed create
/// could not hand its id back to the tree.
fn offline_action(outline_id: &str, intent: &SyncIntent, now: i64) -> Option<QueuedAction> {
    if intent.waits_for_id() {
        return None;
    }
    match intent {
        SyncIntent::Create { .. } => None,
        SyncIntent::Update { id, patch } => Some(QueuedAction::update(
            &UpdateItemRequest {
                outline_id: outline_id.to_string(),
                item_id: id.to_string(),
                patch: patch.clone(),
            },
            now,
        )),
        SyncIntent::Move { id, parent, position } => Some(QueuedAction::update(
            &UpdateItemRequest {
                outline_id: outline_id.to_string(),
                item_id: id.to_string(),
                patch: move_patch(parent.as_ref(), *position),
            },
            now,
        )),
        SyncIntent::Delete { id, .. } => Some(QueuedAction::delete(
            &DeleteItemRequest {
                outline_id: outline_id.to_string(),
                item_id: id.to_string(),
            },
            now,
        )),
    }
}

#[async_trait(?Send)]
impl SyncStrategy for SurgicalSync {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Surgical
    }

    fn record(&self, intents: &[SyncIntent]) {
        for intent in intents {
            self.enqueue(intent.clone());
        }
    }

    fn pending(&self) -> usize {
        self.queue.borrow().len() + self.creating.borrow().len()
    }

    async fn flush(&self, store: &SharedStore, env: &SyncEnv, now: i64) -> SyncReport {
        let mut report = SyncReport::default();
        if self.flushing.replace(true) {
            return report;
        }
        let outline_id = store.borrow().outline_id().to_string();
        if env.offline.is_empty() {
            self.offloaded.borrow_mut().clear();
        }

        if !env.status.should_probe_offline(now) {
            report.waiting_offline = true;
            report.offloaded = self.offload_queued(&outline_id, env, now);
            if report.offloaded > 0 {
                tracing::info!(count = report.offloaded, "backend offline, changes moved to the offline queue");
            }
            self.flushing.set(false);
            return report;
        }

        for _ in 0..env.config.batch_size {
            let Some((idx, mut p)) = self.take_ready(now) else {
                break;
            };
            let behind_offline = self.offloaded.borrow().contains(p.intent.target());
            if behind_offline && self.offload(&outline_id, &p.intent, env, now) {
                tracing::debug!(kind = p.intent.kind(), id = %p.intent.target(), "queued behind an offline change");
                report.offloaded += 1;
                continue;
            }

            env.status.begin_request();
            let res = self.send(&outline_id, &p.intent, env).await;
            env.status.end_request();

            match res {
                Ok(created) => {
                    env.status.mark_backend_online();
                    self.on_success(&outline_id, &p.intent, created, store, env, now);
                    report.succeeded += 1;
                }
                Err(e) => {
                    env.status.mark_backend_error(&e);
                    if let SyncIntent::Create { id, .. } = &p.intent {
                        self.creating.borrow_mut().remove(id);
                    }

                    if e.is_retryable() {
                        p.attempts += 1;
                        if p.attempts >= env.config.max_attempts {
                            self.give_up(&outline_id, p, env, now, &mut report);
                        } else {
                            p.not_before_ms = now + env.config.backoff_ms(p.attempts);
                            tracing::warn!(kind = p.intent.kind(), id = %p.intent.target(), attempts = p.attempts, error = %e, "backend unreachable, will retry");
                            self.requeue(idx, p);
                            report.rescheduled += 1;
                        }
                        env.status
                            .schedule_next_offline_probe(now, env.config.offline_probe_ms);
                        break;
                    }

                    tracing::error!(kind = p.intent.kind(), id = %p.intent.target(), error = %e, "backend rejected change, dropping it");
                    report.dropped += 1;
                    if let SyncIntent::Create { id, .. } = &p.intent {
                        report.skipped += self.drop_dependents(id);
                    }
                }
            }
        }

        self.flushing.set(false);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::SyncCoordinator;
    use super::*;
    use crate::api::ItemStore;
    use crate::config::SyncConfig;
    use crate::queue::{ActionKind, OfflineQueue};
    use crate::store::Command;
    use crate::tree::engine::CommitTrigger;

    fn insert_after(sync: &SyncCoordinator, anchor: Option<&NodeId>, text: &str) -> NodeId {
        sync.apply_at(
            Command::InsertAfter {
                anchor: anchor.cloned(),
                text: text.to_string(),
            },
            T0,
        )
        .created[0]
            .clone()
    }

    fn insert_child(sync: &SyncCoordinator, parent: &NodeId, text: &str) -> NodeId {
        sync.apply_at(
            Command::InsertChild {
                parent: Some(parent.clone()),
                position: usize::MAX,
                text: text.to_string(),
            },
            T0,
        )
        .created[0]
            .clone()
    }

    fn root_ids(sync: &SyncCoordinator) -> Vec<NodeId> {
        sync.store().borrow().tree().roots().to_vec()
    }

    #[tokio::test]
    async fn child_create_waits_for_parent_id() {
        let h = harness(SyncConfig::default());
        let a = insert_after(&h.sync, None, "A");
        insert_child(&h.sync, &a, "A1");
        h.sync.apply_at(
            Command::SetText {
                id: a.clone(),
                text: "A!".into(),
            },
            T0,
        );

        let report = h.sync.flush_at(T0).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(h.backend.calls(), vec!["create", "create"]);
        assert_eq!(
            backend_shape(&h.backend),
            shape(&[("A!", None), ("A1", Some("A!"))])
        );

        let store = h.sync.store().borrow();
        assert!(store.tree().preorder().iter().all(|id| !id.is_temporary()));
        assert!(store.tree().validate().is_ok());
        assert!(!h.sync.status().is_saving());
    }

    #[tokio::test]
    async fn intents_queued_during_create_are_rewritten() {
        let h = harness(SyncConfig::default());
        let a = insert_after(&h.sync, None, "A");
        h.sync.apply_at(Command::ToggleExpanded { id: a.clone() }, T0);
        assert_eq!(h.sync.status().pending(), 2);

        h.sync.flush_at(T0).await;
        let a_real = root_ids(&h.sync)[0].clone();
        assert!(!a_real.is_temporary());
        assert_ne!(a, a_real);
        assert_eq!(h.backend.calls(), vec!["create".to_string(), format!("update:{a_real}")]);
        assert!(!h.backend.items("o")[0].expanded);

        let snap = h.sync.snapshot().unwrap();
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.records[0].id, a_real);
        assert!(!snap.records[0].expanded);
    }

    #[tokio::test]
    async fn content_updates_coalesce() {
        let h = harness(SyncConfig::default());
        insert_after(&h.sync, None, "A");
        h.sync.flush_at(T0).await;
        let a = root_ids(&h.sync)[0].clone();

        for text in ["A", "Ab", "Abc"] {
            h.sync.apply_at(
                Command::SetText {
                    id: a.clone(),
                    text: text.into(),
                },
                T0,
            );
        }
        let report = h.sync.flush_at(T0).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(h.backend.items("o")[0].content, "Abc");
    }

    #[tokio::test]
    async fn deleting_an_unsent_node_cancels_its_subtree() {
        let h = harness(SyncConfig::default());
        let a = insert_after(&h.sync, None, "A");
        insert_child(&h.sync, &a, "A1");
        h.sync.apply_at(
            Command::CommitText {
                id: a,
                text: " ".into(),
                trigger: CommitTrigger::Escape,
            },
            T0,
        );

        assert_eq!(h.sync.status().pending(), 0);
        let report = h.sync.flush_at(T0).await;
        assert_eq!(report, SyncReport::default());
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn move_into_cancelled_subtree_becomes_delete() {
        let h = harness(SyncConfig::default());
        insert_after(&h.sync, None, "B");
        h.sync.flush_at(T0).await;
        let b = root_ids(&h.sync)[0].clone();

        let t = insert_after(&h.sync, None, "T");
        h.sync.apply_at(
            Command::Move {
                id: b.clone(),
                parent: Some(t.clone()),
                position: 0,
            },
            T0,
        );
        h.sync.apply_at(Command::Remove { id: t }, T0);

        let report = h.sync.flush_at(T0).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(h.backend.calls().last().unwrap(), &format!("delete:{b}"));
        assert!(h.backend.items("o").is_empty());
    }

    #[test]
    fn delete_waits_for_an_in_flight_create() {
        let tmp = NodeId::Temporary(T0 as u64);
        let surgical = SurgicalSync::new();
        surgical.record(&[SyncIntent::Create {
            id: tmp.clone(),
            parent: None,
            text: "A".into(),
            position: 0,
            style: Default::default(),
            formatting: None,
        }]);
        let (idx, _sent) = surgical.take_ready(T0).unwrap();
        assert_eq!(idx, 0);

        surgical.record(&[SyncIntent::Delete {
            id: tmp.clone(),
            descendants: vec![],
        }]);
        assert_eq!(surgical.queued().len(), 1);
        assert!(surgical.take_ready(T0).is_none());

        surgical.creating.borrow_mut().remove(&tmp);
        surgical.rewrite_queued(&tmp, &NodeId::permanent("srv-a"));
        let (_, next) = surgical.take_ready(T0).unwrap();
        assert_eq!(next.intent.target(), &NodeId::permanent("srv-a"));
    }

    #[tokio::test]
    async fn network_failure_backs_off_and_recovers() {
        let h = harness(fast_config(StrategyKind::Surgical));
        insert_after(&h.sync, None, "A");
        h.backend.fail_next(ApiError::network("down"));

        let report = h.sync.flush_at(T0).await;
        assert_eq!(report.rescheduled, 1);
        let status = h.sync.status();
        assert!(!status.is_backend_online());
        assert!(status.last_error().is_some());
        assert!(status.is_saving());
        assert!(root_ids(&h.sync)[0].is_temporary());

        let report = h.sync.flush_at(T0 + 500).await;
        assert!(report.waiting_offline);
        assert_eq!(h.backend.calls().len(), 1);

        let report = h.sync.flush_at(T0 + 1_000).await;
        assert_eq!(report.succeeded, 1);
        assert!(h.sync.status().is_backend_online());
        assert!(!root_ids(&h.sync)[0].is_temporary());
    }

    #[tokio::test]
    async fn exhausted_updates_move_to_offline_queue() {
        let mut config = fast_config(StrategyKind::Surgical);
        config.max_attempts = 2;
        let h = harness(config);
        insert_after(&h.sync, None, "A");
        h.sync.flush_at(T0).await;
        let a = root_ids(&h.sync)[0].clone();

        h.sync.apply_at(
            Command::SetText {
                id: a.clone(),
                text: "offline edit".into(),
            },
            T0,
        );
        h.backend.fail_next(ApiError::network("down"));
        h.backend.fail_next(ApiError::network("down"));

        assert_eq!(h.sync.flush_at(T0).await.rescheduled, 1);
        let report = h.sync.flush_at(T0 + 2_000).await;
        assert_eq!(report.offloaded, 1);
        assert_eq!(h.sync.status().pending(), 0);

        let queued = h.offline.drain();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, ActionKind::Update);
        assert_eq!(queued[0].data["item-id"], a.to_string());
        assert_eq!(queued[0].data["content"], "offline edit");
        assert!(h.offline.is_empty());
    }

    #[tokio::test]
    async fn exhausted_creates_are_dropped_with_dependents() {
        let mut config = fast_config(StrategyKind::Surgical);
        config.max_attempts = 1;
        let h = harness(config);
        let a = insert_after(&h.sync, None, "A");
        insert_child(&h.sync, &a, "A1");
        h.backend.fail_next(ApiError::network("down"));

        let report = h.sync.flush_at(T0).await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.skipped, 1);
        assert!(h.offline.is_empty());
        // The local tree keeps both bullets.
        assert_eq!(h.sync.store().borrow().tree().len(), 2);
    }

    #[tokio::test]
    async fn rejected_changes_are_dropped_without_rollback() {
        let h = harness(SyncConfig::default());
        insert_after(&h.sync, None, "A");
        h.sync.flush_at(T0).await;
        let a = root_ids(&h.sync)[0].clone();

        h.sync.apply_at(
            Command::SetText {
                id: a.clone(),
                text: "kept locally".into(),
            },
            T0,
        );
        h.backend
            .fail_next(ApiError::http(500, "boom", "Request failed"));
        let report = h.sync.flush_at(T0).await;
        assert_eq!(report.dropped, 1);
        assert!(h.sync.status().is_backend_online());
        assert_eq!(
            h.sync.status().last_error().as_deref(),
            Some("Request failed (500): boom")
        );
        assert_eq!(
            h.sync.store().borrow().tree().get(&a).unwrap().text,
            "kept locally"
        );
        assert_eq!(h.backend.items("o")[0].content, "A");
    }

    #[tokio::test]
    async fn structural_edits_reach_the_backend() {
        let h = harness(SyncConfig::default());
        let a = insert_after(&h.sync, None, "A");
        let b = insert_after(&h.sync, Some(&a), "B");
        let c = insert_after(&h.sync, Some(&b), "C");
        h.sync.apply_at(Command::Indent { id: b.clone() }, T0);
        h.sync.apply_at(Command::Indent { id: c.clone() }, T0);
        h.sync.apply_at(Command::Indent { id: c.clone() }, T0);
        h.sync.apply_at(Command::ToggleExpanded { id: a.clone() }, T0);

        h.sync.flush_at(T0).await;
        assert_eq!(
            backend_shape(&h.backend),
            shape(&[("A", None), ("B", Some("A")), ("C", Some("B"))])
        );
        assert!(!h.backend.items("o")[0].expanded);

        let c_real = {
            let store = h.sync.store().borrow();
            let a_real = &store.tree().roots()[0];
            let b_real = &store.tree().get(a_real).unwrap().children[0];
            store.tree().get(b_real).unwrap().children[0].clone()
        };
        h.sync.apply_at(Command::Outdent { id: c_real.clone() }, T0);
        h.sync.apply_at(Command::Outdent { id: c_real }, T0);
        h.sync.flush_at(T0).await;
        assert_eq!(
            backend_shape(&h.backend),
            shape(&[("A", None), ("B", Some("A")), ("C", None)])
        );

        let fetched = h.backend.get_outline_items("o").await.unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[test]
    fn failed_create_goes_back_ahead_of_later_intents() {
        let x = NodeId::Temporary(T0 as u64);
        let a = NodeId::Temporary(T0 as u64 + 1);
        let create = |id: &NodeId| SyncIntent::Create {
            id: id.clone(),
            parent: None,
            text: "new".into(),
            position: 0,
            style: Default::default(),
            formatting: None,
        };
        let surgical = SurgicalSync::new();
        surgical.record(&[create(&x), create(&a)]);

        let (idx, mut first) = surgical.take_ready(T0).unwrap();
        first.not_before_ms = T0 + 10_000;
        surgical.creating.borrow_mut().remove(&x);
        surgical.requeue(idx, first);

        let (idx, sent) = surgical.take_ready(T0).unwrap();
        assert_eq!((idx, sent.intent.target()), (1, &a));

        // While the create for `a` is on the wire, `x` goes away and `a` is edited.
        surgical.record(&[
            SyncIntent::Delete {
                id: x.clone(),
                descendants: vec![],
            },
            SyncIntent::Update {
                id: a.clone(),
                patch: crate::api::ItemPatch {
                    content: Some("edited".into()),
                    ..Default::default()
                },
            },
        ]);
        surgical.creating.borrow_mut().remove(&a);
        surgical.requeue(idx, sent);

        let kinds: Vec<_> = surgical.queued().iter().map(|i| i.kind()).collect();
        assert_eq!(kinds, vec!["create", "update"]);
        let (_, retried) = surgical.take_ready(T0).unwrap();
        assert_eq!(retried.intent.target(), &a);
        assert_eq!(surgical.pending(), 2);
    }

    #[tokio::test]
    async fn edits_after_an_offloaded_change_follow_it() {
        let mut config = fast_config(StrategyKind::Surgical);
        config.max_attempts = 1;
        let h = harness(config);
        insert_after(&h.sync, None, "A");
        h.sync.flush_at(T0).await;
        let a = root_ids(&h.sync)[0].clone();
        let set_text = |text: &str| {
            h.sync.apply_at(
                Command::SetText {
                    id: a.clone(),
                    text: text.into(),
                },
                T0,
            );
        };

        set_text("old");
        h.backend.fail_next(ApiError::network("down"));
        assert_eq!(h.sync.flush_at(T0).await.offloaded, 1);

        set_text("new");
        let report = h.sync.flush_at(T0 + 1_000).await;
        assert_eq!(report.offloaded, 1);
        assert_eq!(report.succeeded, 0);
        assert_eq!(h.backend.items("o")[0].content, "A");

        let replay = h.offline.flush(&*h.backend).await;
        assert_eq!(replay.delivered, 2);
        assert_eq!(h.backend.items("o")[0].content, "new");

        // Once the offline queue is empty, edits go straight out again.
        set_text("newest");
        let report = h.sync.flush_at(T0 + 2_000).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(h.backend.items("o")[0].content, "newest");
    }

    #[tokio::test]
    async fn offline_edits_go_to_the_offline_queue() {
        let h = harness(fast_config(StrategyKind::Surgical));
        let a = insert_after(&h.sync, None, "A");
        insert_after(&h.sync, Some(&a), "B");
        h.sync.flush_at(T0).await;
        let (a, b) = {
            let ids = root_ids(&h.sync);
            (ids[0].clone(), ids[1].clone())
        };

        h.sync.apply_at(
            Command::SetText {
                id: a.clone(),
                text: "a".into(),
            },
            T0,
        );
        h.backend.fail_next(ApiError::network("down"));
        assert_eq!(h.sync.flush_at(T0).await.rescheduled, 1);

        h.sync.apply_at(
            Command::SetText {
                id: b.clone(),
                text: "b".into(),
            },
            T0,
        );
        let c = insert_after(&h.sync, Some(&b), "C");
        h.sync.apply_at(Command::ToggleExpanded { id: c }, T0);

        let report = h.sync.flush_at(T0 + 500).await;
        assert!(report.waiting_offline);
        assert_eq!(report.offloaded, 2);
        assert_eq!(h.sync.status().pending(), 2);

        let actions = h.offline.actions();
        let targets: Vec<_> = actions.iter().map(|q| q.data["item-id"].clone()).collect();
        assert_eq!(targets, vec![a.to_string(), b.to_string()]);

        h.offline.flush(&*h.backend).await;
        let report = h.sync.flush_at(T0 + 1_000).await;
        assert_eq!(report.succeeded, 2);
        let contents: Vec<_> = h.backend.items("o").into_iter().map(|i| i.content).collect();
        assert_eq!(contents, vec!["a", "b", "C"]);
        assert!(!h.backend.items("o")[2].expanded);
    }
}
