use super::{SyncEnv, SyncReport, SyncStrategy};
use crate::api::{ApiError, ItemPatch, NewItem};
use crate::config::StrategyKind;
use crate::ids::{is_temporary_id, NodeId};
use crate::models::ItemRecord;
use crate::store::{SharedStore, SyncIntent};
use crate::tree::Tree;
use async_trait::async_trait;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

/// Backend calls that bring the last known backend state up to the tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiffPlan {
    /// Items with temporary ids, parents first.
    pub creates: Vec<ItemRecord>,
    /// Changed fields only.
    pub updates: Vec<(NodeId, ItemPatch)>,
    /// Topmost removed items; the backend deletes their subtrees.
    pub deletes: Vec<NodeId>,
}

impl DiffPlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

fn changed_fields(old: &ItemRecord, new: &ItemRecord) -> ItemPatch {
    let mut patch = ItemPatch::default();
    if old.content != new.content {
        patch.content = Some(new.content.clone());
    }
    if old.parent_id != new.parent_id {
        patch.parent_id = Some(new.parent_id.as_ref().map(|p| p.to_string()));
    }
    if old.parent_id != new.parent_id || old.position != new.position {
        patch.order = Some(new.position);
    }
    if old.style != new.style {
        patch.style = Some(new.style);
    }
    if old.formatting != new.formatting {
        patch.formatting = Some(new.formatting.clone());
    }
    if old.expanded != new.expanded {
        patch.expanded = Some(new.expanded);
    }
    patch
}

fn all_fields(r: &ItemRecord) -> ItemPatch {
    ItemPatch {
        content: Some(r.content.clone()),
        parent_id: Some(r.parent_id.as_ref().map(|p| p.to_string())),
        order: Some(r.position),
        style: Some(r.style),
        formatting: Some(r.formatting.clone()),
        expanded: Some(r.expanded),
    }
}

/// Compare the tree with the snapshot of what the backend holds.
pub fn plan_diff(tree: &Tree, snapshot: &[ItemRecord]) -> DiffPlan {
    let current = tree.to_records();
    let known: HashMap<&NodeId, &ItemRecord> = snapshot.iter().map(|r| (&r.id, r)).collect();
    let mut plan = DiffPlan::default();

    for r in &current {
        if r.id.is_temporary() {
            plan.creates.push(r.clone());
            continue;
        }
        let patch = match known.get(&r.id) {
            Some(old) => changed_fields(old, r),
            // Present locally but unknown to the snapshot: resend everything.
            None => all_fields(r),
        };
        if !patch.is_empty() {
            plan.updates.push((r.id.clone(), patch));
        }
    }

    let live: HashSet<&NodeId> = current.iter().map(|r| &r.id).collect();
    let gone: HashSet<&NodeId> = snapshot
        .iter()
        .map(|r| &r.id)
        .filter(|id| !live.contains(id))
        .collect();
    plan.deletes = snapshot
        .iter()
        .filter(|r| gone.contains(&r.id))
        .filter(|r| r.parent_id.as_ref().map_or(true, |p| !gone.contains(p)))
        .map(|r| r.id.clone())
        .collect();

    plan
}

/// Whole-tree reconciliation against the stored snapshot.
///
/// Creates run first (so moved items have their new parents), then updates,
/// then deletes (so items moved out of a deleted subtree survive the
/// cascade). The snapshot only ever records calls that succeeded.
#[derive(Debug, Default)]
pub struct DiffSync {
    dirty: Cell<usize>,
    flushing: Cell<bool>,
}

impl DiffSync {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot_records(env: &SyncEnv, outline_id: &str) -> Vec<ItemRecord> {
        env.snapshots
            .load(outline_id)
            .map(|s| s.records)
            .unwrap_or_default()
    }

    /// Returns false when the backend went away and the run must stop.
    fn on_error(
        env: &SyncEnv,
        e: &ApiError,
        what: &str,
        id: &NodeId,
        now: i64,
        report: &mut SyncReport,
    ) -> bool {
        env.status.mark_backend_error(e);
        if e.is_retryable() {
            tracing::warn!(what, id = %id, error = %e, "backend unreachable, diff sync paused");
            env.status
                .schedule_next_offline_probe(now, env.config.offline_probe_ms);
            report.rescheduled += 1;
            return false;
        }
        tracing::error!(what, id = %id, error = %e, "backend rejected change");
        report.dropped += 1;
        true
    }

    async fn run(
        &self,
        store: &SharedStore,
        env: &SyncEnv,
        now: i64,
        report: &mut SyncReport,
    ) -> bool {
        let outline_id = store.borrow().outline_id().to_string();
        let mut budget = env.config.batch_size;

        let creates = {
            let s = store.borrow();
            plan_diff(s.tree(), &Self::snapshot_records(env, &outline_id)).creates
        };
        let mut failed: HashSet<NodeId> = HashSet::new();
        let mut rewritten: HashMap<NodeId, NodeId> = HashMap::new();

        for record in creates {
            let parent = record
                .parent_id
                .as_ref()
                .map(|p| rewritten.get(p).cloned().unwrap_or_else(|| p.clone()));
            if parent.as_ref().is_some_and(|p| failed.contains(p) || p.is_temporary()) {
                failed.insert(record.id.clone());
                report.skipped += 1;
                continue;
            }
            if budget == 0 {
                return false;
            }
            budget -= 1;

            let item = NewItem {
                content: record.content.clone(),
                parent_id: parent.as_ref().map(|p| p.to_string()),
                order: Some(record.position),
                style: Some(record.style),
                formatting: record.formatting.clone(),
            };
            env.status.begin_request();
            let res = env.backend.create_item(&outline_id, item).await;
            env.status.end_request();

            let created = res.and_then(|c| {
                c.id.parse::<NodeId>()
                    .map_err(ApiError::parse)
                    .and_then(|id| {
                        if id.is_temporary() {
                            Err(ApiError::parse(format!("backend answered with a client-style id: {id}")))
                        } else {
                            Ok(id)
                        }
                    })
            });
            match created {
                Ok(real) => {
                    env.status.mark_backend_online();
                    let saved = {
                        let mut s = store.borrow_mut();
                        s.rewrite_id(&record.id, &real);
                        s.tree().record_of(&real)
                    };
                    env.snapshots.update(&outline_id, now, |snap| {
                        snap.upsert(saved.unwrap_or(ItemRecord {
                            id: real.clone(),
                            parent_id: parent.clone(),
                            ..record.clone()
                        }));
                        true
                    });
                    rewritten.insert(record.id.clone(), real);
                    report.succeeded += 1;
                }
                Err(e) => {
                    failed.insert(record.id.clone());
                    if !Self::on_error(env, &e, "create", &record.id, now, report) {
                        return false;
                    }
                }
            }
        }

        // Ids are permanent now wherever creates succeeded; plan the rest.
        let plan = {
            let s = store.borrow();
            plan_diff(s.tree(), &Self::snapshot_records(env, &outline_id))
        };

        for (id, patch) in plan.updates {
            let waits = matches!(&patch.parent_id, Some(Some(p)) if is_temporary_id(p));
            if waits {
                report.skipped += 1;
                continue;
            }
            if budget == 0 {
                return false;
            }
            budget -= 1;

            env.status.begin_request();
            let res = env
                .backend
                .update_item(&outline_id, &id.to_string(), patch.clone())
                .await;
            env.status.end_request();
            match res {
                Ok(_) => {
                    env.status.mark_backend_online();
                    env.snapshots.update(&outline_id, now, |snap| {
                        if !snap.apply_patch(&id, &patch) {
                            if let Some(r) = store.borrow().tree().record_of(&id) {
                                snap.upsert(r);
                            }
                        }
                        true
                    });
                    report.succeeded += 1;
                }
                Err(e) => {
                    if !Self::on_error(env, &e, "update", &id, now, report) {
                        return false;
                    }
                }
            }
        }

        for id in plan.deletes {
            if budget == 0 {
                return false;
            }
            budget -= 1;

            env.status.begin_request();
            let res = env.backend.delete_item(&outline_id, &id.to_string()).await;
            env.status.end_request();
            match res {
                Ok(()) => {
                    env.status.mark_backend_online();
                    env.snapshots.remove_subtree(&outline_id, &id, now);
                    report.succeeded += 1;
                }
                Err(e) => {
                    if !Self::on_error(env, &e, "delete", &id, now, report) {
                        return false;
                    }
                }
            }
        }

        report.dropped == 0 && report.skipped == 0
    }
}

#[async_trait(?Send)]
impl SyncStrategy for DiffSync {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Diff
    }

    fn record(&self, intents: &[SyncIntent]) {
        self.dirty.set(self.dirty.get() + intents.len());
    }

    fn pending(&self) -> usize {
        self.dirty.get()
    }

    async fn flush(&self, store: &SharedStore, env: &SyncEnv, now: i64) -> SyncReport {
        let mut report = SyncReport::default();
        if self.flushing.replace(true) {
            return report;
        }
        if !env.status.should_probe_offline(now) {
            report.waiting_offline = true;
            self.flushing.set(false);
            return report;
        }

        if self.run(store, env, now, &mut report).await {
            self.dirty.set(0);
        }
        self.flushing.set(false);
        report
    }
}
