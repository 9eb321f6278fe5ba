mod outline_snapshot;

pub use outline_snapshot::{OutlineSnapshot, SnapshotCache, SnapshotMeta};
