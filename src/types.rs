//! Core identifier and timestamp types for the cell store.

/// Opaque document id assigned by the backing store.
pub type NodeId = String;

/// Tenant (cell) id.
pub type CellId = String;

/// Sub-tenant (box) id.
pub type BoxId = String;

/// Epoch milliseconds.
pub type Timestamp = i64;

/// Generate a fresh document id.
pub fn new_id() -> NodeId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
