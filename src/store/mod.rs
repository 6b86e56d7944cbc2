//! Document-store gateway.
//!
//! The node tree persists through these traits; the underlying store is an
//! external keyed document service with versioned single-document writes and
//! read-after-write consistency. No cross-document transactions are assumed:
//! multi-step sequences are ordered by the callers so that a crash leaves an
//! orphan rather than a dangling reference.

pub mod memory;

use crate::error::Result;
use crate::node::NodeRecord;
use crate::types::{BoxId, CellId, NodeId};
use async_trait::async_trait;

/// A node document as returned by the store: body plus store-assigned identity
/// and monotonically increasing version.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: NodeId,
    pub version: u64,
    pub record: NodeRecord,
}

/// Gateway to the node document collection.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a document by id.
    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Create a new document under the given id. Fails on id collision.
    async fn create(&self, id: &str, record: &NodeRecord) -> Result<Document>;

    /// Overwrite a document unconditionally, bumping its version.
    async fn update(&self, id: &str, record: &NodeRecord) -> Result<Document>;

    /// Overwrite a document only if its current version matches `expect`;
    /// otherwise fails with a version conflict.
    async fn update_with_version(
        &self,
        id: &str,
        record: &NodeRecord,
        expect: u64,
    ) -> Result<Document>;

    /// Delete a document by id.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Bulk-fetch the direct children of a collection in one query, bounded by
    /// `limit`.
    async fn find_children(&self, parent_id: &str, limit: usize) -> Result<Vec<Document>>;

    /// Page through the ids of all file-type nodes owned by a cell.
    async fn list_file_node_ids(
        &self,
        cell_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<NodeId>>;

    /// Delete every node document owned by a cell; returns the count removed.
    async fn delete_by_cell(&self, cell_id: &str) -> Result<u64>;
}

/// A role record as the resolver sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDoc {
    pub cell_id: CellId,
    /// Present when the role is scoped to a box.
    pub box_id: Option<BoxId>,
    pub name: String,
}

/// Lookup into the cell's role collection.
#[async_trait]
pub trait RoleIndex: Send + Sync {
    /// Fetch a role by id; `None` when the role has been deleted.
    async fn get(&self, role_id: &str) -> Result<Option<RoleDoc>>;

    /// Find role ids by name within a cell, optionally scoped to a box.
    /// Role names are expected unique per (cell, box) scope; more than one hit
    /// is an upstream consistency fault surfaced by the caller.
    async fn find(&self, cell_id: &str, name: &str, box_id: Option<&str>) -> Result<Vec<NodeId>>;
}

/// A box record as seen through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxDoc {
    pub name: String,
    pub schema: Option<String>,
}

/// Lookup and lifecycle of cell and box entity records.
#[async_trait]
pub trait CellIndex: Send + Sync {
    /// Fetch a box by id.
    async fn box_by_id(&self, box_id: &str) -> Result<Option<BoxDoc>>;

    /// Find a box id by name within a cell.
    async fn box_by_name(&self, cell_id: &str, name: &str) -> Result<Option<NodeId>>;

    /// Remove the cell's own entity record. The cell's subtree is cascaded
    /// separately.
    async fn delete_cell(&self, cell_id: &str) -> Result<()>;
}
