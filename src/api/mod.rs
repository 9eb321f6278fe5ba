//! Backend item store contract and wire types.

mod http;
mod memory;

pub use http::ApiClient;
pub use memory::MemoryItemStore;

use crate::ids::NodeId;
use crate::models::{Formatting, ItemRecord, Style};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const CREATE_ITEM_PATH: &str = "/outline/create-item";
pub const UPDATE_ITEM_PATH: &str = "/outline/update-item";
pub const DELETE_ITEM_PATH: &str = "/outline/delete-item";
pub const GET_OUTLINE_ITEMS_PATH: &str = "/outline/get-outline-items";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    Network,
    Http,
    Parse,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn network(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            message: e.to_string(),
        }
    }

    pub fn parse(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            message: e.to_string(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            message: "Unauthorized".to_string(),
        }
    }

    pub fn http(status: u16, body: impl std::fmt::Display, ctx: &str) -> Self {
        Self {
            kind: ApiErrorKind::Http,
            message: format!("{ctx} ({status}): {body}"),
        }
    }

    /// Only transport failures are worth retrying; the backend rejecting a
    /// request will reject it again.
    pub fn is_retryable(&self) -> bool {
        self.kind == ApiErrorKind::Network
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

fn default_true() -> bool {
    true
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// One backend item with its nested children.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Item {
    pub id: String,

    #[serde(rename = "parent-id", default)]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub order: Option<u32>,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub style: Style,

    #[serde(default)]
    pub formatting: Option<Formatting>,

    #[serde(default = "default_true")]
    pub expanded: bool,

    #[serde(rename = "created-at", default)]
    pub created_at: i64,

    #[serde(rename = "updated-at", default)]
    pub updated_at: i64,

    #[serde(default)]
    pub children: Vec<Item>,
}

/// Flatten a hierarchical item list into records. Nesting wins over the
/// items' own `parent-id`; list order wins over `order`.
pub fn flatten_items(items: &[Item]) -> Vec<ItemRecord> {
    fn walk(items: &[Item], parent: Option<&NodeId>, out: &mut Vec<ItemRecord>) {
        for (position, item) in items.iter().enumerate() {
            let Ok(id) = item.id.parse::<NodeId>() else {
                tracing::warn!("backend item without id skipped");
                continue;
            };
            out.push(ItemRecord {
                id: id.clone(),
                parent_id: parent.cloned(),
                position: position as u32,
                content: item.content.clone(),
                style: item.style,
                formatting: item.formatting.clone(),
                expanded: item.expanded,
                created_ms: item.created_at,
                updated_ms: item.updated_at,
            });
            walk(&item.children, Some(&id), out);
        }
    }

    let mut out = Vec::new();
    walk(items, None, &mut out);
    out
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NewItem {
    pub content: String,

    #[serde(rename = "parent-id")]
    pub parent_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub order: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub style: Option<Style>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub formatting: Option<Formatting>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CreatedItem {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "created-at", default)]
    pub created_at: i64,
    #[serde(rename = "updated-at", default)]
    pub updated_at: i64,
}

/// Partial update of one item. `None` leaves a field untouched; for the
/// doubly optional fields `Some(None)` clears it (root parent, no formatting).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,

    #[serde(
        rename = "parent-id",
        skip_serializing_if = "Option::is_none",
        default,
        deserialize_with = "double_option"
    )]
    pub parent_id: Option<Option<String>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub order: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub style: Option<Style>,

    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        deserialize_with = "double_option"
    )]
    pub formatting: Option<Option<Formatting>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expanded: Option<bool>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == ItemPatch::default()
    }

    /// Fold a later patch into this one; fields set in `later` win.
    pub fn merge(&mut self, later: ItemPatch) {
        if later.content.is_some() {
            self.content = later.content;
        }
        if later.parent_id.is_some() {
            self.parent_id = later.parent_id;
        }
        if later.order.is_some() {
            self.order = later.order;
        }
        if later.style.is_some() {
            self.style = later.style;
        }
        if later.formatting.is_some() {
            self.formatting = later.formatting;
        }
        if later.expanded.is_some() {
            self.expanded = later.expanded;
        }
    }

    /// Apply to a snapshot record. Parent ids that do not parse are ignored.
    pub fn apply_to(&self, record: &mut ItemRecord) {
        if let Some(c) = &self.content {
            record.content = c.clone();
        }
        if let Some(p) = &self.parent_id {
            record.parent_id = p.as_deref().and_then(|s| s.parse().ok());
        }
        if let Some(o) = self.order {
            record.position = o;
        }
        if let Some(s) = self.style {
            record.style = s;
        }
        if let Some(f) = &self.formatting {
            record.formatting = f.clone();
        }
        if let Some(e) = self.expanded {
            record.expanded = e;
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CreateItemRequest {
    #[serde(rename = "outline-id")]
    pub outline_id: String,
    #[serde(flatten)]
    pub item: NewItem,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UpdateItemRequest {
    #[serde(rename = "outline-id")]
    pub outline_id: String,
    #[serde(rename = "item-id")]
    pub item_id: String,
    #[serde(flatten)]
    pub patch: ItemPatch,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeleteItemRequest {
    #[serde(rename = "outline-id")]
    pub outline_id: String,
    #[serde(rename = "item-id")]
    pub item_id: String,
}

/// The authoritative item store.
///
/// Futures are not `Send`: the store is driven from a single-threaded event
/// loop (browser `spawn_local`, or a current-thread runtime natively).
#[async_trait(?Send)]
pub trait ItemStore {
    async fn create_item(&self, outline_id: &str, item: NewItem) -> ApiResult<CreatedItem>;

    async fn update_item(
        &self,
        outline_id: &str,
        item_id: &str,
        patch: ItemPatch,
    ) -> ApiResult<Item>;

    /// Deletes the item and its whole subtree.
    async fn delete_item(&self, outline_id: &str, item_id: &str) -> ApiResult<()>;

    async fn get_outline_items(&self, outline_id: &str) -> ApiResult<Vec<Item>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_serializes_only_set_fields() {
        let patch = ItemPatch {
            parent_id: Some(None),
            order: Some(2),
            ..Default::default()
        };
        let v = serde_json::to_value(&patch).unwrap();
        assert!(v["parent-id"].is_null());
        assert_eq!(v["order"], 2);
        assert!(v.get("content").is_none());

        let back: ItemPatch = serde_json::from_value(v).unwrap();
        assert_eq!(back, patch);
    }

    #[test]
    fn merge_prefers_later_fields() {
        let mut a = ItemPatch {
            content: Some("one".into()),
            expanded: Some(false),
            ..Default::default()
        };
        a.merge(ItemPatch {
            content: Some("two".into()),
            ..Default::default()
        });
        assert_eq!(a.content.as_deref(), Some("two"));
        assert_eq!(a.expanded, Some(false));
        assert!(!a.is_empty());
        assert!(ItemPatch::default().is_empty());
    }

    #[test]
    fn update_request_flattens_patch() {
        let req = UpdateItemRequest {
            outline_id: "o1".into(),
            item_id: "i1".into(),
            patch: ItemPatch {
                content: Some("x".into()),
                ..Default::default()
            },
        };
        let v = serde_json::to_value(req).unwrap();
        assert_eq!(v["outline-id"], "o1");
        assert_eq!(v["item-id"], "i1");
        assert_eq!(v["content"], "x");
    }

    #[test]
    fn flatten_uses_nesting_and_list_order() {
        let json = r#"[
            {"id": "a", "content": "A", "order": 9, "children": [
                {"id": "a1", "content": "A1", "parent-id": "wrong"},
                {"id": "a2", "content": "A2", "style": "header"}
            ]},
            {"id": "b", "content": "B", "expanded": false}
        ]"#;
        let items: Vec<Item> = serde_json::from_str(json).unwrap();
        let records = flatten_items(&items);
        let ids: Vec<_> = records.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "a1", "a2", "b"]);
        assert_eq!(records[0].position, 0);
        assert_eq!(records[1].parent_id, Some(NodeId::permanent("a")));
        assert_eq!(records[2].style, Style::Header);
        assert_eq!(records[2].position, 1);
        assert!(!records[3].expanded);
    }

    #[test]
    fn only_network_errors_retry() {
        assert!(ApiError::network("reset").is_retryable());
        assert!(!ApiError::http(500, "boom", "Request failed").is_retryable());
        assert!(!ApiError::unauthorized().is_retryable());
    }
}
