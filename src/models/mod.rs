use crate::ids::NodeId;
use serde::{Deserialize, Serialize};

/// Block style of a bullet. Orthogonal to tree structure.
#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Style {
    #[default]
    Normal,
    Header,
    Code,
    Quote,
}

#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TextSize {
    Small,
    Normal,
    Large,
}

/// Inline formatting applied to the whole bullet.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Formatting {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<TextSize>,
}

/// One bullet of an outline, stored in the tree arena.
///
/// `parent` and `children` are id references into the same arena. `level` is a
/// cache of the ancestor chain depth and is rewritten by the tree whenever the
/// node's ancestry changes.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub text: String,
    pub parent: Option<NodeId>,
    pub level: u32,
    pub children: Vec<NodeId>,
    pub expanded: bool,
    pub style: Style,
    pub formatting: Option<Formatting>,
    pub created_ms: i64,
    pub updated_ms: i64,
}

impl Node {
    /// A fresh, detached node. Parent, level and children are filled in by the
    /// tree when the node is inserted.
    pub fn new(id: NodeId, text: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id,
            text: text.into(),
            parent: None,
            level: 0,
            children: Vec::new(),
            expanded: true,
            style: Style::Normal,
            formatting: None,
            created_ms: now_ms,
            updated_ms: now_ms,
        }
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn with_formatting(mut self, formatting: Option<Formatting>) -> Self {
        self.formatting = formatting;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whitespace-only text counts as empty.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn default_true() -> bool {
    true
}

/// Flat form of one item, as persisted in the backend snapshot.
///
/// Sibling order is `position` under `parent_id`; root items have no parent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemRecord {
    pub id: NodeId,

    #[serde(rename = "parent-id", default)]
    pub parent_id: Option<NodeId>,

    #[serde(default)]
    pub position: u32,

    pub content: String,

    #[serde(default)]
    pub style: Style,

    #[serde(default)]
    pub formatting: Option<Formatting>,

    #[serde(default = "default_true")]
    pub expanded: bool,

    #[serde(rename = "created-ms", default)]
    pub created_ms: i64,

    #[serde(rename = "updated-ms", default)]
    pub updated_ms: i64,
}

impl ItemRecord {
    /// Same stored fields, ignoring timestamps.
    pub fn same_fields(&self, other: &ItemRecord) -> bool {
        self.id == other.id
            && self.parent_id == other.parent_id
            && self.position == other.position
            && self.content == other.content
            && self.style == other.style
            && self.formatting == other.formatting
            && self.expanded == other.expanded
    }
}

/// A user-owned outline: identifying metadata plus its tree of bullets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outline {
    pub id: String,
    pub title: String,
    pub tree: crate::tree::Tree,
}

impl Outline {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            tree: crate::tree::Tree::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn style_wire_form_is_lowercase() {
        assert_eq!(Style::Header.to_string(), "header");
        assert_eq!(Style::from_str("quote").unwrap(), Style::Quote);
        assert_eq!(serde_json::to_value(Style::Code).unwrap(), "code");
    }

    #[test]
    fn formatting_omits_missing_size() {
        let f = Formatting {
            bold: true,
            italic: false,
            size: None,
        };
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["bold"], true);
        assert!(v.get("size").is_none());

        let parsed: Formatting = serde_json::from_str(r#"{"size":"large"}"#).unwrap();
        assert_eq!(parsed.size, Some(TextSize::Large));
        assert!(!parsed.bold);
    }

    #[test]
    fn blank_text_is_whitespace_only() {
        let n = Node::new(NodeId::Temporary(1_700_000_000_000), "  \t", 0);
        assert!(n.is_blank());
        assert!(n.is_root());
    }
}
