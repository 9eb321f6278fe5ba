//! Durable queue of backend actions that could not be delivered.

use crate::api::{
    ApiError, ApiErrorKind, ApiResult, CreateItemRequest, DeleteItemRequest, ItemStore,
    UpdateItemRequest, DELETE_ITEM_PATH, UPDATE_ITEM_PATH,
};
use crate::storage::{load_json_from_storage, save_json_to_storage, KeyValueStore, OFFLINE_QUEUE_KEY};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

/// One backend request, kept as its JSON body so it can be replayed verbatim.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueuedAction {
    pub action: ActionKind,
    pub endpoint: String,
    pub data: serde_json::Value,
    #[serde(rename = "queued-ms", default)]
    pub queued_ms: i64,
}

impl QueuedAction {
    pub fn update(req: &UpdateItemRequest, queued_ms: i64) -> Self {
        Self {
            action: ActionKind::Update,
            endpoint: UPDATE_ITEM_PATH.to_string(),
            data: serde_json::to_value(req).unwrap_or_default(),
            queued_ms,
        }
    }

    pub fn delete(req: &DeleteItemRequest, queued_ms: i64) -> Self {
        Self {
            action: ActionKind::Delete,
            endpoint: DELETE_ITEM_PATH.to_string(),
            data: serde_json::to_value(req).unwrap_or_default(),
            queued_ms,
        }
    }

    /// Send this action to `store`.
    pub async fn replay(&self, store: &dyn ItemStore) -> ApiResult<()> {
        match self.action {
            ActionKind::Create => {
                let req: CreateItemRequest =
                    serde_json::from_value(self.data.clone()).map_err(ApiError::parse)?;
                store.create_item(&req.outline_id, req.item).await.map(|_| ())
            }
            ActionKind::Update => {
                let req: UpdateItemRequest =
                    serde_json::from_value(self.data.clone()).map_err(ApiError::parse)?;
                store
                    .update_item(&req.outline_id, &req.item_id, req.patch)
                    .await
                    .map(|_| ())
            }
            ActionKind::Delete => {
                let req: DeleteItemRequest =
                    serde_json::from_value(self.data.clone()).map_err(ApiError::parse)?;
                store.delete_item(&req.outline_id, &req.item_id).await
            }
        }
    }
}

pub trait OfflineQueue {
    fn enqueue(&self, action: QueuedAction);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub delivered: usize,
    pub dropped: usize,
    pub remaining: usize,
}

/// Offline queue persisted as a JSON array under one storage key.
#[derive(Clone)]
pub struct StoredOfflineQueue {
    store: Rc<dyn KeyValueStore>,
}

impl StoredOfflineQueue {
    pub fn new(store: Rc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn actions(&self) -> Vec<QueuedAction> {
        load_json_from_storage(self.store.as_ref(), OFFLINE_QUEUE_KEY).unwrap_or_default()
    }

    fn save(&self, actions: &[QueuedAction]) {
        if actions.is_empty() {
            self.store.remove_item(OFFLINE_QUEUE_KEY);
        } else {
            save_json_to_storage(self.store.as_ref(), OFFLINE_QUEUE_KEY, &actions);
        }
    }

    /// Take every queued action, oldest first, leaving the queue empty.
    pub fn drain(&self) -> Vec<QueuedAction> {
        let actions = self.actions();
        self.save(&[]);
        actions
    }

    /// Replay queued actions in order. Stops at the first network failure and
    /// keeps that action and everything after it; rejected actions are dropped.
    pub async fn flush(&self, store: &dyn ItemStore) -> ReplayReport {
        let mut report = ReplayReport::default();
        let mut actions = self.drain().into_iter();

        while let Some(action) = actions.next() {
            match action.replay(store).await {
                Ok(()) => report.delivered += 1,
                Err(e) if e.kind == ApiErrorKind::Network => {
                    tracing::warn!(error = %e, "offline queue replay paused, backend unreachable");
                    let rest: Vec<_> = std::iter::once(action).chain(actions).collect();
                    report.remaining = rest.len();
                    let mut all = rest;
                    // Actions enqueued while we were replaying go last.
                    all.extend(self.actions());
                    self.save(&all);
                    return report;
                }
                Err(e) => {
                    tracing::error!(endpoint = %action.endpoint, error = %e, "offline action rejected, dropping it");
                    report.dropped += 1;
                }
            }
        }
        report
    }
}

impl OfflineQueue for StoredOfflineQueue {
    fn enqueue(&self, action: QueuedAction) {
        let mut actions = self.actions();
        actions.push(action);
        self.save(&actions);
    }

    fn len(&self) -> usize {
        self.actions().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ItemPatch, MemoryItemStore, NewItem};
    use crate::storage::MemoryStorage;

    fn queue() -> StoredOfflineQueue {
        StoredOfflineQueue::new(Rc::new(MemoryStorage::new()))
    }

    fn update_action(item_id: &str, content: &str) -> QueuedAction {
        QueuedAction::update(
            &UpdateItemRequest {
                outline_id: "o".into(),
                item_id: item_id.into(),
                patch: ItemPatch {
                    content: Some(content.into()),
                    ..Default::default()
                },
            },
            1,
        )
    }

    #[test]
    fn enqueue_persists_and_drain_empties() {
        let q = queue();
        assert!(q.is_empty());
        q.enqueue(update_action("a", "x"));
        q.enqueue(QueuedAction::delete(
            &DeleteItemRequest {
                outline_id: "o".into(),
                item_id: "b".into(),
            },
            2,
        ));
        assert_eq!(q.len(), 2);

        let drained = q.drain();
        assert_eq!(drained[0].action, ActionKind::Update);
        assert_eq!(drained[0].endpoint, UPDATE_ITEM_PATH);
        assert_eq!(drained[0].data["item-id"], "a");
        assert_eq!(drained[1].action, ActionKind::Delete);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn flush_replays_and_keeps_the_rest_on_network_failure() {
        let backend = MemoryItemStore::new();
        let created = backend
            .create_item(
                "o",
                NewItem {
                    content: "A".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let q = queue();
        q.enqueue(update_action(&created.id, "first"));
        q.enqueue(update_action(&created.id, "second"));

        backend.fail_next(ApiError::network("down"));
        let report = q.flush(&backend).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(q.len(), 2);

        let report = q.flush(&backend).await;
        assert_eq!(report.delivered, 2);
        assert!(q.is_empty());
        assert_eq!(backend.items("o")[0].content, "second");
    }

    #[tokio::test]
    async fn rejected_actions_are_dropped() {
        let backend = MemoryItemStore::new();
        let q = queue();
        q.enqueue(update_action("missing", "x"));
        let report = q.flush(&backend).await;
        assert_eq!(report.dropped, 1);
        assert!(q.is_empty());
    }
}
