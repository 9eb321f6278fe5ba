use crate::api::ItemPatch;
use crate::ids::NodeId;
use crate::models::ItemRecord;
use crate::storage::{
    load_json_from_storage, save_json_to_storage, KeyValueStore, SNAPSHOT_INDEX_KEY,
    SNAPSHOT_KEY_PREFIX,
};
use crate::util::upsert_lru_by_key;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;

const RECENT_SNAPSHOTS: usize = 20;

fn key(outline_id: &str) -> String {
    format!("{SNAPSHOT_KEY_PREFIX}::{outline_id}")
}

/// Last known backend state of one outline, as flat records.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OutlineSnapshot {
    pub saved_ms: i64,
    pub outline_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub records: Vec<ItemRecord>,
}

impl OutlineSnapshot {
    pub fn new(outline_id: impl Into<String>, records: Vec<ItemRecord>) -> Self {
        Self {
            outline_id: outline_id.into(),
            records,
            ..Default::default()
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&ItemRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    /// Replace a temporary id in both the record and its children's parent refs.
    pub fn swap_tmp_id(&mut self, tmp_id: &NodeId, real_id: &NodeId) -> bool {
        let mut changed = false;
        for r in self.records.iter_mut() {
            if &r.id == tmp_id {
                r.id = real_id.clone();
                changed = true;
            }
            if r.parent_id.as_ref() == Some(tmp_id) {
                r.parent_id = Some(real_id.clone());
                changed = true;
            }
        }
        changed
    }

    /// Insert a record the backend just created, splicing it in among its
    /// siblings. Replacing a known record leaves sibling positions alone.
    pub fn upsert(&mut self, mut record: ItemRecord) {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(r) => *r = record,
            None => {
                record.position = self.open_slot(&record.parent_id, record.position, &record.id);
                self.records.push(record);
            }
        }
    }

    /// Apply a confirmed update. A new parent or order moves the record the
    /// way the backend does: out of its old sibling list, then into the new
    /// one at the clamped position.
    pub fn apply_patch(&mut self, id: &NodeId, patch: &ItemPatch) -> bool {
        let Some(idx) = self.records.iter().position(|r| &r.id == id) else {
            return false;
        };
        let old_parent = self.records[idx].parent_id.clone();
        let old_position = self.records[idx].position;
        patch.apply_to(&mut self.records[idx]);

        if patch.parent_id.is_some() || patch.order.is_some() {
            self.close_gap(&old_parent, old_position, id);
            let parent = self.records[idx].parent_id.clone();
            // Without an order the backend appends.
            let wanted = match patch.order {
                Some(_) => self.records[idx].position,
                None => u32::MAX,
            };
            let position = self.open_slot(&parent, wanted, id);
            self.records[idx].position = position;
        }
        true
    }

    /// Drop `id` and every record below it, mirroring the backend cascade.
    pub fn remove_subtree(&mut self, id: &NodeId) -> bool {
        let Some(top) = self.get(id).map(|r| (r.parent_id.clone(), r.position)) else {
            return false;
        };
        let mut gone: HashSet<NodeId> = HashSet::from([id.clone()]);
        loop {
            let before = gone.len();
            for r in &self.records {
                if r.parent_id.as_ref().is_some_and(|p| gone.contains(p)) {
                    gone.insert(r.id.clone());
                }
            }
            if gone.len() == before {
                break;
            }
        }

        self.records.retain(|r| !gone.contains(&r.id));
        self.close_gap(&top.0, top.1, id);
        true
    }

    fn close_gap(&mut self, parent: &Option<NodeId>, position: u32, except: &NodeId) {
        for r in self.records.iter_mut() {
            if &r.parent_id == parent && &r.id != except && r.position > position {
                r.position -= 1;
            }
        }
    }

    /// Make room at `position` (clamped to the sibling count) and return it.
    fn open_slot(&mut self, parent: &Option<NodeId>, position: u32, except: &NodeId) -> u32 {
        let siblings = self
            .records
            .iter()
            .filter(|r| &r.parent_id == parent && &r.id != except)
            .count() as u32;
        let position = position.min(siblings);
        for r in self.records.iter_mut() {
            if &r.parent_id == parent && &r.id != except && r.position >= position {
                r.position += 1;
            }
        }
        position
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub outline_id: String,
    pub saved_ms: i64,
}

/// Snapshots persisted in a key/value store, plus an index of the most
/// recently saved outlines.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Rc<dyn KeyValueStore>,
}

impl SnapshotCache {
    pub fn new(store: Rc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, snap: &OutlineSnapshot) {
        if snap.outline_id.trim().is_empty() {
            return;
        }
        save_json_to_storage(self.store.as_ref(), &key(&snap.outline_id), snap);

        let recent = upsert_lru_by_key(
            self.recent(),
            SnapshotMeta {
                outline_id: snap.outline_id.clone(),
                saved_ms: snap.saved_ms,
            },
            |a, b| a.outline_id == b.outline_id,
            RECENT_SNAPSHOTS,
        );
        save_json_to_storage(self.store.as_ref(), SNAPSHOT_INDEX_KEY, &recent);
    }

    pub fn load(&self, outline_id: &str) -> Option<OutlineSnapshot> {
        if outline_id.trim().is_empty() {
            return None;
        }
        load_json_from_storage(self.store.as_ref(), &key(outline_id))
    }

    pub fn remove(&self, outline_id: &str) {
        self.store.remove_item(&key(outline_id));
        let mut recent = self.recent();
        recent.retain(|m| m.outline_id != outline_id);
        save_json_to_storage(self.store.as_ref(), SNAPSHOT_INDEX_KEY, &recent);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<SnapshotMeta> {
        load_json_from_storage(self.store.as_ref(), SNAPSHOT_INDEX_KEY).unwrap_or_default()
    }

    /// Load, mutate and save back when `f` reports a change. A missing snapshot
    /// is started empty.
    pub fn update(
        &self,
        outline_id: &str,
        saved_ms: i64,
        f: impl FnOnce(&mut OutlineSnapshot) -> bool,
    ) -> bool {
        if outline_id.trim().is_empty() {
            return false;
        }
        let mut snap = self
            .load(outline_id)
            .unwrap_or_else(|| OutlineSnapshot::new(outline_id, vec![]));
        if !f(&mut snap) {
            return false;
        }
        snap.saved_ms = saved_ms;
        self.save(&snap);
        true
    }

    pub fn swap_tmp_id(&self, outline_id: &str, tmp_id: &NodeId, real_id: &NodeId, now: i64) {
        self.update(outline_id, now, |s| s.swap_tmp_id(tmp_id, real_id));
    }

    pub fn remove_subtree(&self, outline_id: &str, id: &NodeId, now: i64) {
        self.update(outline_id, now, |s| s.remove_subtree(id));
    }
}
