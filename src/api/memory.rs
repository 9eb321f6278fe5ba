use super::{ApiError, ApiResult, CreatedItem, Item, ItemPatch, ItemStore, NewItem};
use crate::models::{Formatting, Style};
use crate::util::now_ms;
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Debug)]
struct StoredItem {
    content: String,
    style: Style,
    formatting: Option<Formatting>,
    expanded: bool,
    created_at: i64,
    updated_at: i64,
    parent: Option<String>,
    children: Vec<String>,
}

#[derive(Clone, Debug, Default)]
struct OutlineItems {
    items: HashMap<String, StoredItem>,
    roots: Vec<String>,
}

impl OutlineItems {
    fn list_mut(&mut self, parent: Option<&str>) -> Option<&mut Vec<String>> {
        match parent {
            None => Some(&mut self.roots),
            Some(p) => self.items.get_mut(p).map(|i| &mut i.children),
        }
    }

    fn is_within(&self, candidate: &str, ancestor: &str) -> bool {
        let mut cur = Some(candidate.to_string());
        let mut hops = 0;
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.items.len() {
                return false;
            }
            cur = self.items.get(&c).and_then(|i| i.parent.clone());
        }
        false
    }

    fn build(&self, ids: &[String], parent: Option<&str>) -> Vec<Item> {
        ids.iter()
            .enumerate()
            .filter_map(|(order, id)| {
                let s = self.items.get(id)?;
                Some(Item {
                    id: id.clone(),
                    parent_id: parent.map(str::to_string),
                    order: Some(order as u32),
                    content: s.content.clone(),
                    style: s.style,
                    formatting: s.formatting.clone(),
                    expanded: s.expanded,
                    created_at: s.created_at,
                    updated_at: s.updated_at,
                    children: self.build(&s.children, Some(id)),
                })
            })
            .collect()
    }

    fn insert_tree(&mut self, items: Vec<Item>, parent: Option<&str>) {
        for item in items {
            let id = item.id.clone();
            self.items.insert(
                id.clone(),
                StoredItem {
                    content: item.content,
                    style: item.style,
                    formatting: item.formatting,
                    expanded: item.expanded,
                    created_at: item.created_at,
                    updated_at: item.updated_at,
                    parent: parent.map(str::to_string),
                    children: Vec::new(),
                },
            );
            if let Some(list) = self.list_mut(parent) {
                list.push(id.clone());
            }
            self.insert_tree(item.children, Some(&id));
        }
    }

    fn remove_subtree(&mut self, id: &str) {
        if let Some(s) = self.items.remove(id) {
            for c in s.children {
                self.remove_subtree(&c);
            }
        }
    }
}

/// In-process item store with server semantics: permanent id minting,
/// positional children, cascading deletes. Failures can be injected to
/// exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    outlines: RefCell<HashMap<String, OutlineItems>>,
    seq: Cell<u64>,
    failures: RefCell<VecDeque<ApiError>>,
    calls: RefCell<Vec<String>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an outline's content.
    pub fn seed(&self, outline_id: &str, items: Vec<Item>) {
        let mut o = OutlineItems::default();
        o.insert_tree(items, None);
        self.outlines.borrow_mut().insert(outline_id.to_string(), o);
    }

    /// The next call (of any kind) fails with `err`.
    pub fn fail_next(&self, err: ApiError) {
        self.failures.borrow_mut().push_back(err);
    }

    /// Log of calls that reached the store, e.g. `create`, `update:ID`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn items(&self, outline_id: &str) -> Vec<Item> {
        self.outlines
            .borrow()
            .get(outline_id)
            .map(|o| o.build(&o.roots, None))
            .unwrap_or_default()
    }

    pub fn item_count(&self, outline_id: &str) -> usize {
        self.outlines
            .borrow()
            .get(outline_id)
            .map(|o| o.items.len())
            .unwrap_or(0)
    }

    fn begin(&self, call: String) -> ApiResult<()> {
        self.calls.borrow_mut().push(call);
        match self.failures.borrow_mut().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn mint_id(&self, now: i64) -> String {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        format!("item_{now}{:03}_{seq}", seq % 1000)
    }
}

fn not_found(what: &str, id: &str) -> ApiError {
    ApiError::http(404, format!("{what} '{id}' not found"), "Request failed")
}

#[async_trait(?Send)]
impl ItemStore for MemoryItemStore {
    async fn create_item(&self, outline_id: &str, item: NewItem) -> ApiResult<CreatedItem> {
        self.begin("create".to_string())?;
        let now = now_ms();
        let id = self.mint_id(now);

        let mut outlines = self.outlines.borrow_mut();
        let o = outlines.entry(outline_id.to_string()).or_default();
        let parent = item.parent_id.as_deref();
        if let Some(p) = parent {
            if !o.items.contains_key(p) {
                return Err(not_found("parent", p));
            }
        }

        o.items.insert(
            id.clone(),
            StoredItem {
                content: item.content.clone(),
                style: item.style.unwrap_or_default(),
                formatting: item.formatting,
                expanded: true,
                created_at: now,
                updated_at: now,
                parent: item.parent_id.clone(),
                children: Vec::new(),
            },
        );
        if let Some(list) = o.list_mut(parent) {
            let at = item.order.map(|x| x as usize).unwrap_or(list.len()).min(list.len());
            list.insert(at, id.clone());
        }

        Ok(CreatedItem {
            id,
            content: item.content,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_item(
        &self,
        outline_id: &str,
        item_id: &str,
        patch: ItemPatch,
    ) -> ApiResult<Item> {
        self.begin(format!("update:{item_id}"))?;
        let now = now_ms();

        let mut outlines = self.outlines.borrow_mut();
        let o = outlines
            .get_mut(outline_id)
            .ok_or_else(|| not_found("outline", outline_id))?;
        let current_parent = o
            .items
            .get(item_id)
            .ok_or_else(|| not_found("item", item_id))?
            .parent
            .clone();

        if patch.parent_id.is_some() || patch.order.is_some() {
            let new_parent = patch.parent_id.clone().unwrap_or(current_parent.clone());
            if let Some(p) = &new_parent {
                if !o.items.contains_key(p) {
                    return Err(not_found("parent", p));
                }
                if o.is_within(p, item_id) {
                    return Err(ApiError::http(400, "move would create a cycle", "Request failed"));
                }
            }
            if let Some(list) = o.list_mut(current_parent.as_deref()) {
                list.retain(|x| x != item_id);
            }
            if let Some(list) = o.list_mut(new_parent.as_deref()) {
                let at = patch.order.map(|x| x as usize).unwrap_or(list.len()).min(list.len());
                list.insert(at, item_id.to_string());
            }
            if let Some(s) = o.items.get_mut(item_id) {
                s.parent = new_parent;
            }
        }

        let s = o
            .items
            .get_mut(item_id)
            .ok_or_else(|| not_found("item", item_id))?;
        if let Some(c) = patch.content {
            s.content = c;
        }
        if let Some(st) = patch.style {
            s.style = st;
        }
        if let Some(f) = patch.formatting {
            s.formatting = f;
        }
        if let Some(e) = patch.expanded {
            s.expanded = e;
        }
        s.updated_at = now;

        let parent = s.parent.clone();
        let siblings = match &parent {
            None => o.roots.clone(),
            Some(p) => o.items.get(p).map(|i| i.children.clone()).unwrap_or_default(),
        };
        let item = o
            .build(&siblings, parent.as_deref())
            .into_iter()
            .find(|i| i.id == item_id)
            .ok_or_else(|| not_found("item", item_id))?;
        Ok(item)
    }

    async fn delete_item(&self, outline_id: &str, item_id: &str) -> ApiResult<()> {
        self.begin(format!("delete:{item_id}"))?;
        let mut outlines = self.outlines.borrow_mut();
        let Some(o) = outlines.get_mut(outline_id) else {
            return Ok(());
        };
        let Some(parent) = o.items.get(item_id).map(|s| s.parent.clone()) else {
            return Ok(());
        };
        if let Some(list) = o.list_mut(parent.as_deref()) {
            list.retain(|x| x != item_id);
        }
        o.remove_subtree(item_id);
        Ok(())
    }

    async fn get_outline_items(&self, outline_id: &str) -> ApiResult<Vec<Item>> {
        self.begin("get".to_string())?;
        Ok(self.items(outline_id))
    }
}
