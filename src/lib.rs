//! Outline editing with optimistic local edits and backend reconciliation.
//!
//! The local [`tree::Tree`] is always authoritative for what the user sees.
//! Edits go through [`store::OutlineStore`], which emits [`store::SyncIntent`]s;
//! a [`sync::SyncCoordinator`] replays those against an [`api::ItemStore`]
//! using one of two strategies, keeping a snapshot of the backend state in
//! local storage and an offline queue for work the backend never confirmed.

pub mod api;
pub mod cache;
pub mod config;
pub mod ids;
pub mod models;
pub mod queue;
pub mod storage;
pub mod store;
pub mod sync;
pub mod tree;
pub mod util;

pub use api::{ApiClient, ApiError, ApiErrorKind, ItemStore};
pub use config::{EnvConfig, StrategyKind, SyncConfig};
pub use ids::NodeId;
pub use models::{Formatting, ItemRecord, Node, Outline, Style};
pub use store::{Command, OutlineStore, SharedStore, SyncIntent};
pub use sync::{SyncCoordinator, SyncReport, SyncStatus};
pub use tree::Tree;
