//! Reconciliation of local outline edits with the backend item store.
//!
//! Edits are applied to the local tree first; a [`SyncStrategy`] later pushes
//! them to the backend. A coordinator runs exactly one strategy.

mod diff;
mod status;
mod surgical;

pub use diff::{plan_diff, DiffPlan, DiffSync};
pub use status::SyncStatus;
pub use surgical::SurgicalSync;

use crate::api::{flatten_items, ApiErrorKind, ApiResult, ItemPatch, ItemStore};
use crate::cache::{OutlineSnapshot, SnapshotCache};
use crate::config::{StrategyKind, SyncConfig};
use crate::ids::NodeId;
use crate::queue::OfflineQueue;
use crate::storage::KeyValueStore;
use crate::store::{Applied, Command, ItemDraft, SharedStore, SyncIntent};
use crate::tree::Tree;
use crate::util::now_ms;
use async_trait::async_trait;
use std::rc::Rc;

/// Collaborators shared by the strategies.
pub struct SyncEnv {
    pub backend: Rc<dyn ItemStore>,
    pub snapshots: SnapshotCache,
    pub offline: Rc<dyn OfflineQueue>,
    pub status: SyncStatus,
    pub config: SyncConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub succeeded: usize,
    /// Network failures put back with a backoff.
    pub rescheduled: usize,
    /// Handed to the offline queue after the last attempt.
    pub offloaded: usize,
    pub dropped: usize,
    /// Not attempted because something they depend on failed.
    pub skipped: usize,
    /// The backend is offline and the next probe is not due yet.
    pub waiting_offline: bool,
}

#[async_trait(?Send)]
pub trait SyncStrategy {
    fn kind(&self) -> StrategyKind;

    /// Called with the intents of every applied command.
    fn record(&self, intents: &[SyncIntent]);

    /// Local changes not yet confirmed by the backend.
    fn pending(&self) -> usize;

    async fn flush(&self, store: &SharedStore, env: &SyncEnv, now_ms: i64) -> SyncReport;
}

pub(crate) fn move_patch(parent: Option<&NodeId>, position: usize) -> ItemPatch {
    ItemPatch {
        parent_id: Some(parent.map(|p| p.to_string())),
        order: Some(position as u32),
        ..Default::default()
    }
}

/// Where [`SyncCoordinator::load`] got the outline from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadSource {
    Backend,
    Cache,
}

pub struct SyncCoordinator {
    store: SharedStore,
    env: SyncEnv,
    strategy: Box<dyn SyncStrategy>,
}

impl SyncCoordinator {
    pub fn new(
        store: SharedStore,
        backend: Rc<dyn ItemStore>,
        storage: Rc<dyn KeyValueStore>,
        offline: Rc<dyn OfflineQueue>,
        config: SyncConfig,
    ) -> Self {
        let strategy: Box<dyn SyncStrategy> = match config.strategy {
            StrategyKind::Surgical => Box::new(SurgicalSync::new()),
            StrategyKind::Diff => Box::new(DiffSync::new()),
        };
        Self {
            store,
            env: SyncEnv {
                backend,
                snapshots: SnapshotCache::new(storage),
                offline,
                status: SyncStatus::new(),
                config,
            },
            strategy,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn status(&self) -> SyncStatus {
        self.env.status.clone()
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn snapshot(&self) -> Option<OutlineSnapshot> {
        let outline_id = self.store.borrow().outline_id().to_string();
        self.env.snapshots.load(&outline_id)
    }

    /// Apply a command locally and queue its backend side effects.
    pub fn apply(&self, cmd: Command) -> Applied {
        self.apply_at(cmd, now_ms())
    }

    pub fn apply_at(&self, cmd: Command, now: i64) -> Applied {
        let applied = self.store.borrow_mut().apply_at(cmd, now);
        self.record(&applied);
        applied
    }

    pub fn import_drafts(&self, parent: Option<&NodeId>, drafts: Vec<ItemDraft>) -> Applied {
        let applied = self.store.borrow_mut().import_drafts(parent, drafts);
        self.record(&applied);
        applied
    }

    fn record(&self, applied: &Applied) {
        if applied.intents.is_empty() {
            return;
        }
        self.strategy.record(&applied.intents);
        self.env.status.set_pending(self.strategy.pending());
    }

    /// Replace the local tree with the backend's. When the backend is
    /// unreachable the last saved snapshot is used instead.
    pub async fn load(&self) -> ApiResult<LoadSource> {
        let (outline_id, title) = {
            let s = self.store.borrow();
            (s.outline_id().to_string(), s.title().to_string())
        };

        self.env.status.begin_request();
        let res = self.env.backend.get_outline_items(&outline_id).await;
        self.env.status.end_request();

        match res {
            Ok(items) => {
                self.env.status.mark_backend_online();
                let records = flatten_items(&items);
                let tree = Tree::from_records(records);
                let snap = OutlineSnapshot {
                    saved_ms: now_ms(),
                    outline_id: outline_id.clone(),
                    title: Some(title),
                    records: tree.to_records(),
                };
                self.env.snapshots.save(&snap);
                self.store.borrow_mut().replace_tree(tree);
                tracing::debug!(outline_id = %outline_id, items = snap.records.len(), "outline loaded");
                Ok(LoadSource::Backend)
            }
            Err(e) => {
                self.env.status.mark_backend_error(&e);
                if e.kind != ApiErrorKind::Network {
                    return Err(e);
                }
                let Some(snap) = self.env.snapshots.load(&outline_id) else {
                    return Err(e);
                };
                tracing::warn!(outline_id = %outline_id, error = %e, "backend unreachable, using cached snapshot");
                self.store
                    .borrow_mut()
                    .replace_tree(Tree::from_records(snap.records));
                Ok(LoadSource::Cache)
            }
        }
    }

    pub async fn flush(&self) -> SyncReport {
        self.flush_at(now_ms()).await
    }

    /// Push pending work. Never blocks edits: the store is only borrowed
    /// between backend calls.
    pub async fn flush_at(&self, now: i64) -> SyncReport {
        let report = self.strategy.flush(&self.store, &self.env, now).await;
        self.env.status.set_pending(self.strategy.pending());
        if report.dropped > 0 || report.offloaded > 0 {
            tracing::warn!(
                dropped = report.dropped,
                offloaded = report.offloaded,
                "some outline changes did not reach the backend"
            );
        }
        report
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::api::{ApiError, Item, MemoryItemStore};

    fn seeded(backend: &MemoryItemStore) {
        let item = |id: &str, content: &str, children: Vec<Item>| Item {
            id: id.to_string(),
            parent_id: None,
            order: None,
            content: content.to_string(),
            style: Default::default(),
            formatting: None,
            expanded: true,
            created_at: 0,
            updated_at: 0,
            children,
        };
        backend.seed(
            "o",
            vec![
                item("srv-a", "A", vec![item("srv-a1", "A1", vec![])]),
                item("srv-b", "B", vec![]),
            ],
        );
    }

    #[test]
    fn config_picks_the_single_strategy() {
        let h = harness(fast_config(StrategyKind::Diff));
        assert_eq!(h.sync.strategy(), StrategyKind::Diff);
        let h = harness(SyncConfig::default());
        assert_eq!(h.sync.strategy(), StrategyKind::Surgical);
    }

    #[tokio::test]
    async fn load_builds_tree_and_snapshot() {
        let h = harness(SyncConfig::default());
        seeded(&h.backend);

        assert_eq!(h.sync.load().await, Ok(LoadSource::Backend));
        let store = h.sync.store().borrow();
        let rows: Vec<_> = store.visible_rows().into_iter().map(|r| (r.text, r.level)).collect();
        assert_eq!(rows, vec![("A".into(), 0), ("A1".into(), 1), ("B".into(), 0)]);
        assert_eq!(h.sync.snapshot().unwrap().records.len(), 3);
    }

    #[tokio::test]
    async fn load_falls_back_to_snapshot_when_offline() {
        let h = harness(SyncConfig::default());
        seeded(&h.backend);
        h.sync.load().await.unwrap();
        h.sync.store().borrow_mut().replace_tree(Tree::new());

        h.backend.fail_next(ApiError::network("offline"));
        assert_eq!(h.sync.load().await, Ok(LoadSource::Cache));
        assert_eq!(h.sync.store().borrow().tree().len(), 3);
        assert!(!h.sync.status().is_backend_online());
    }

    #[tokio::test]
    async fn load_without_cache_reports_the_error() {
        let h = harness(SyncConfig::default());
        h.backend.fail_next(ApiError::network("offline"));
        assert!(h.sync.load().await.is_err());

        h.backend.fail_next(ApiError::unauthorized());
        assert_eq!(
            h.sync.load().await.unwrap_err().kind,
            ApiErrorKind::Unauthorized
        );
    }

    #[test]
    fn apply_updates_the_saving_indicator() {
        let h = harness(SyncConfig::default());
        let applied = h.sync.apply(Command::InsertAfter {
            anchor: None,
            text: "A".into(),
        });
        assert!(applied.changed);
        assert!(h.sync.status().is_saving());
        assert_eq!(h.sync.status().pending(), 1);
    }
}
