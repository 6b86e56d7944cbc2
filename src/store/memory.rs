//! In-memory document store.
//!
//! Reference implementation of the gateway traits: versioned documents behind a
//! single lock, so every write is atomic at document granularity and readers
//! never observe a torn record. Used by the test suites and by embedders that
//! want a self-contained store.

use crate::error::{Error, Result};
use crate::node::{NodeRecord, NodeType};
use crate::store::{BoxDoc, CellIndex, Document, NodeStore, RoleDoc, RoleIndex};
use crate::types::NodeId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct VersionedDoc {
    version: u64,
    record: NodeRecord,
}

/// In-memory `NodeStore` with CAS update semantics.
#[derive(Default)]
pub struct MemoryNodeStore {
    docs: RwLock<HashMap<NodeId, VersionedDoc>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().get(id).map(|d| Document {
            id: id.to_string(),
            version: d.version,
            record: d.record.clone(),
        }))
    }

    async fn create(&self, id: &str, record: &NodeRecord) -> Result<Document> {
        let mut docs = self.docs.write();
        if docs.contains_key(id) {
            return Err(Error::Storage(format!("document id collision: {id}")));
        }
        docs.insert(
            id.to_string(),
            VersionedDoc {
                version: 1,
                record: record.clone(),
            },
        );
        Ok(Document {
            id: id.to_string(),
            version: 1,
            record: record.clone(),
        })
    }

    async fn update(&self, id: &str, record: &NodeRecord) -> Result<Document> {
        let mut docs = self.docs.write();
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| Error::Storage(format!("update of missing document: {id}")))?;
        doc.version += 1;
        doc.record = record.clone();
        Ok(Document {
            id: id.to_string(),
            version: doc.version,
            record: doc.record.clone(),
        })
    }

    async fn update_with_version(
        &self,
        id: &str,
        record: &NodeRecord,
        expect: u64,
    ) -> Result<Document> {
        let mut docs = self.docs.write();
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| Error::Storage(format!("update of missing document: {id}")))?;
        if doc.version != expect {
            return Err(Error::VersionConflict);
        }
        doc.version += 1;
        doc.record = record.clone();
        Ok(Document {
            id: id.to_string(),
            version: doc.version,
            record: doc.record.clone(),
        })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.docs.write().remove(id);
        Ok(())
    }

    async fn find_children(&self, parent_id: &str, limit: usize) -> Result<Vec<Document>> {
        let docs = self.docs.read();
        Ok(docs
            .iter()
            .filter(|(_, d)| d.record.parent_id.as_deref() == Some(parent_id))
            .take(limit)
            .map(|(id, d)| Document {
                id: id.clone(),
                version: d.version,
                record: d.record.clone(),
            })
            .collect())
    }

    async fn list_file_node_ids(
        &self,
        cell_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<NodeId>> {
        let docs = self.docs.read();
        let mut ids: Vec<NodeId> = docs
            .iter()
            .filter(|(_, d)| d.record.cell_id == cell_id && d.record.node_type == NodeType::File)
            .map(|(id, _)| id.clone())
            .collect();
        // Deterministic paging order.
        ids.sort();
        Ok(ids.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_by_cell(&self, cell_id: &str) -> Result<u64> {
        let mut docs = self.docs.write();
        let before = docs.len();
        docs.retain(|_, d| d.record.cell_id != cell_id);
        Ok((before - docs.len()) as u64)
    }
}

/// In-memory role index for tests and embedders.
#[derive(Default)]
pub struct MemoryRoleIndex {
    roles: RwLock<HashMap<NodeId, RoleDoc>>,
}

impl MemoryRoleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a role record.
    pub fn put(&self, id: impl Into<NodeId>, doc: RoleDoc) {
        self.roles.write().insert(id.into(), doc);
    }

    /// Remove a role record (simulates role deletion).
    pub fn remove(&self, id: &str) {
        self.roles.write().remove(id);
    }
}

#[async_trait]
impl RoleIndex for MemoryRoleIndex {
    async fn get(&self, role_id: &str) -> Result<Option<RoleDoc>> {
        Ok(self.roles.read().get(role_id).cloned())
    }

    async fn find(&self, cell_id: &str, name: &str, box_id: Option<&str>) -> Result<Vec<NodeId>> {
        let roles = self.roles.read();
        let mut hits: Vec<NodeId> = roles
            .iter()
            .filter(|(_, r)| {
                r.cell_id == cell_id && r.name == name && r.box_id.as_deref() == box_id
            })
            .map(|(id, _)| id.clone())
            .collect();
        hits.sort();
        Ok(hits)
    }
}

/// In-memory cell/box index for tests and embedders.
#[derive(Default)]
pub struct MemoryCellIndex {
    boxes: RwLock<HashMap<NodeId, (String, BoxDoc)>>,
    cells: RwLock<HashMap<String, ()>>,
}

impl MemoryCellIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_cell(&self, cell_id: impl Into<String>) {
        self.cells.write().insert(cell_id.into(), ());
    }

    pub fn cell_exists(&self, cell_id: &str) -> bool {
        self.cells.read().contains_key(cell_id)
    }

    pub fn put_box(&self, box_id: impl Into<NodeId>, cell_id: impl Into<String>, doc: BoxDoc) {
        self.boxes
            .write()
            .insert(box_id.into(), (cell_id.into(), doc));
    }
}

#[async_trait]
impl CellIndex for MemoryCellIndex {
    async fn box_by_id(&self, box_id: &str) -> Result<Option<BoxDoc>> {
        Ok(self.boxes.read().get(box_id).map(|(_, d)| d.clone()))
    }

    async fn box_by_name(&self, cell_id: &str, name: &str) -> Result<Option<NodeId>> {
        Ok(self
            .boxes
            .read()
            .iter()
            .find(|(_, (c, d))| c == cell_id && d.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn delete_cell(&self, cell_id: &str) -> Result<()> {
        self.cells.write().remove(cell_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> NodeRecord {
        NodeRecord::collection("cell1", None, NodeType::WebdavCollection, None)
    }

    #[tokio::test]
    async fn create_assigns_version_one_and_updates_bump() {
        let store = MemoryNodeStore::new();
        let doc = store.create("n1", &record()).await.unwrap();
        assert_eq!(doc.version, 1);

        let doc = store.update("n1", &record()).await.unwrap();
        assert_eq!(doc.version, 2);
    }

    #[tokio::test]
    async fn cas_update_rejects_stale_version() {
        let store = MemoryNodeStore::new();
        store.create("n1", &record()).await.unwrap();
        store.update("n1", &record()).await.unwrap();

        let err = store.update_with_version("n1", &record(), 1).await.unwrap_err();
        assert!(matches!(err, Error::VersionConflict));

        let doc = store.update_with_version("n1", &record(), 2).await.unwrap();
        assert_eq!(doc.version, 3);
    }

    #[tokio::test]
    async fn find_children_is_bounded() {
        let store = MemoryNodeStore::new();
        store.create("parent", &record()).await.unwrap();
        for i in 0..5 {
            let mut child = record();
            child.parent_id = Some("parent".into());
            store.create(&format!("c{i}"), &child).await.unwrap();
        }
        assert_eq!(store.find_children("parent", 3).await.unwrap().len(), 3);
        assert_eq!(store.find_children("parent", 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn delete_by_cell_removes_only_that_cell() {
        let store = MemoryNodeStore::new();
        store.create("a", &record()).await.unwrap();
        let mut other = record();
        other.cell_id = "cell2".into();
        store.create("b", &other).await.unwrap();

        assert_eq!(store.delete_by_cell("cell1").await.unwrap(), 1);
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
    }
}
