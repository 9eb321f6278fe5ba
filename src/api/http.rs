use super::{
    ApiError, ApiResult, CreateItemRequest, CreatedItem, DeleteItemRequest, Item, ItemPatch,
    ItemStore, NewItem, UpdateItemRequest, CREATE_ITEM_PATH, DELETE_ITEM_PATH,
    GET_OUTLINE_ITEMS_PATH, UPDATE_ITEM_PATH,
};
use crate::config::EnvConfig;
use async_trait::async_trait;

/// JSON-over-HTTP item store.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) base_url: String,
    pub(crate) token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EnvConfig::new().api_url)
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn get_token(&self) -> Option<&String> {
        self.token.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn get_auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {t}"))
    }

    async fn request_api<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.post(url).json(body);
        if let Some(auth) = self.get_auth_header() {
            req = req.header("Authorization", auth);
        }

        let res = req.send().await.map_err(ApiError::network)?;

        if res.status().is_success() {
            res.json().await.map_err(ApiError::parse)
        } else if res.status().as_u16() == 401 {
            Err(ApiError::unauthorized())
        } else {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::http(status, body, "Request failed"))
        }
    }

    /// The backend has answered creates with a few different shapes; accept
    /// `{id}`, `{item-id}` and `{item: {...}}`.
    pub(crate) fn parse_created_item(data: serde_json::Value) -> ApiResult<CreatedItem> {
        let item = data.get("item").cloned().unwrap_or_else(|| data.clone());
        let get_s = |k: &str| item.get(k).and_then(|v| v.as_str()).map(|s| s.to_string());
        let get_i = |k: &str| item.get(k).and_then(|v| v.as_i64()).unwrap_or_default();

        let id = get_s("id")
            .or_else(|| get_s("item-id"))
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                ApiError::parse(format!(
                    "Create item succeeded but response is missing item id: {data}"
                ))
            })?;

        Ok(CreatedItem {
            id,
            content: get_s("content").unwrap_or_default(),
            created_at: get_i("created-at"),
            updated_at: get_i("updated-at"),
        })
    }

    /// Accepts a bare array or `{items: [...]}` / `{item-list: [...]}`.
    pub(crate) fn parse_item_list(data: serde_json::Value) -> ApiResult<Vec<Item>> {
        let list = if data.is_array() {
            data
        } else {
            data.get("items")
                .or_else(|| data.get("item-list"))
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Array(vec![]))
        };
        serde_json::from_value(list).map_err(ApiError::parse)
    }
}

#[async_trait(?Send)]
impl ItemStore for ApiClient {
    async fn create_item(&self, outline_id: &str, item: NewItem) -> ApiResult<CreatedItem> {
        let data: serde_json::Value = self
            .request_api(
                CREATE_ITEM_PATH,
                &CreateItemRequest {
                    outline_id: outline_id.to_string(),
                    item,
                },
            )
            .await?;
        Self::parse_created_item(data)
    }

    async fn update_item(
        &self,
        outline_id: &str,
        item_id: &str,
        patch: ItemPatch,
    ) -> ApiResult<Item> {
        let data: serde_json::Value = self
            .request_api(
                UPDATE_ITEM_PATH,
                &UpdateItemRequest {
                    outline_id: outline_id.to_string(),
                    item_id: item_id.to_string(),
                    patch,
                },
            )
            .await?;
        let item = data.get("item").cloned().unwrap_or(data);
        serde_json::from_value(item).map_err(ApiError::parse)
    }

    async fn delete_item(&self, outline_id: &str, item_id: &str) -> ApiResult<()> {
        let _: serde_json::Value = self
            .request_api(
                DELETE_ITEM_PATH,
                &DeleteItemRequest {
                    outline_id: outline_id.to_string(),
                    item_id: item_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn get_outline_items(&self, outline_id: &str) -> ApiResult<Vec<Item>> {
        let data: serde_json::Value = self
            .request_api(
                GET_OUTLINE_ITEMS_PATH,
                &serde_json::json!({ "outline-id": outline_id }),
            )
            .await?;
        Self::parse_item_list(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiErrorKind;

    #[test]
    fn new_trims_trailing_slash() {
        let client = ApiClient::new("http://localhost:6689/".to_string());
        assert_eq!(client.base_url, "http://localhost:6689");
        assert!(client.token.is_none());
    }

    #[test]
    fn auth_header_requires_token() {
        let mut client = ApiClient::new("http://localhost:6689".to_string());
        assert!(client.get_auth_header().is_none());
        assert!(!client.is_authenticated());

        client.set_token("my-jwt-token".to_string());
        assert_eq!(client.get_auth_header().as_deref(), Some("Bearer my-jwt-token"));
        assert!(client.is_authenticated());
        assert_eq!(client.get_token().map(|s| s.as_str()), Some("my-jwt-token"));
    }

    #[test]
    fn created_item_accepts_known_shapes() {
        let flat = serde_json::json!({"id": "srv-1", "content": "A", "created-at": 5});
        let parsed = ApiClient::parse_created_item(flat).unwrap();
        assert_eq!(parsed.id, "srv-1");
        assert_eq!(parsed.created_at, 5);

        let nested = serde_json::json!({"item": {"item-id": "srv-2"}});
        assert_eq!(ApiClient::parse_created_item(nested).unwrap().id, "srv-2");

        let missing = serde_json::json!({"ok": true});
        let err = ApiClient::parse_created_item(missing).unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Parse);
    }

    #[test]
    fn item_list_accepts_wrapped_and_bare() {
        let bare = serde_json::json!([{"id": "a", "content": "A"}]);
        assert_eq!(ApiClient::parse_item_list(bare).unwrap().len(), 1);

        let wrapped = serde_json::json!({"item-list": [
            {"id": "a", "content": "A", "children": [{"id": "b", "content": "B"}]}
        ]});
        let items = ApiClient::parse_item_list(wrapped).unwrap();
        assert_eq!(items[0].children[0].id, "b");

        let empty = serde_json::json!({"other": 1});
        assert!(ApiClient::parse_item_list(empty).unwrap().is_empty());
    }
}
