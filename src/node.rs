//! Node Record data model.
//!
//! One record per collection, file or placeholder in a cell's tree. Records are
//! persisted as single JSON documents with the short field keys the backing
//! store indexes (`c` cell, `b` box, `t` type, `s` parent, `o` children,
//! `d` dead properties, `a` acl, `f` file, `p` published, `u` updated). The
//! store-maintained version counter travels alongside the document, not in it.

use crate::acl::Acl;
use crate::error::{Error, Result};
use crate::types::{now_millis, BoxId, CellId, NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed set of node kinds. `Null` is the in-memory sentinel for "addressed
/// but not materialized" and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    #[serde(rename = "webdav-collection")]
    WebdavCollection,
    #[serde(rename = "odata-collection")]
    OdataCollection,
    #[serde(rename = "service-collection")]
    ServiceCollection,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "null")]
    Null,
}

impl NodeType {
    /// True for the three collection kinds.
    pub fn is_collection(self) -> bool {
        matches!(
            self,
            NodeType::WebdavCollection | NodeType::OdataCollection | NodeType::ServiceCollection
        )
    }
}

/// Reserved child name holding a service collection's source tree.
pub const SERVICE_SRC_COLLECTION: &str = "__src";

/// Namespace of the reserved owner-representative-accounts property.
pub const OWNER_REPRESENTATIVE_NS: &str = "urn:x-cell:xmlns";
/// Local name of the reserved owner-representative-accounts property.
pub const OWNER_REPRESENTATIVE_NAME: &str = "ownerRepresentativeAccounts";

/// Content metadata for file-type nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// MIME content type supplied on PUT.
    #[serde(rename = "ct")]
    pub content_type: String,
    /// Byte length of the stored payload.
    #[serde(rename = "length")]
    pub length: u64,
}

/// Key of a dead property: local name plus namespace.
///
/// Stored as `"<name>@<namespace>"` in the document body.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropKey {
    pub name: String,
    pub namespace: String,
}

impl PropKey {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        PropKey {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Document-body key form.
    pub fn storage_key(&self) -> String {
        format!("{}@{}", self.name, self.namespace)
    }

    /// Parse a stored `"<name>@<namespace>"` key.
    pub fn from_storage_key(key: &str) -> Result<Self> {
        let idx = key
            .find('@')
            .ok_or_else(|| Error::Inconsistency(format!("property key without namespace: {key}")))?;
        Ok(PropKey {
            name: key[..idx].to_string(),
            namespace: key[idx + 1..].to_string(),
        })
    }
}

/// Persisted unit of the tree: identity scoping, type, parent pointer,
/// children index, dead properties, ACL and file metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "c")]
    pub cell_id: CellId,
    /// Absent only for cell-root level nodes.
    #[serde(rename = "b", skip_serializing_if = "Option::is_none", default)]
    pub box_id: Option<BoxId>,
    #[serde(rename = "t")]
    pub node_type: NodeType,
    /// Owning collection's document id; root collections point at the box root.
    #[serde(rename = "s", skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<NodeId>,
    /// Child name -> child document id. Names are unique within the parent.
    #[serde(rename = "o", default)]
    pub children: BTreeMap<String, NodeId>,
    /// Dead properties keyed by `"<name>@<namespace>"`.
    #[serde(rename = "d", default)]
    pub properties: BTreeMap<String, String>,
    #[serde(rename = "a", skip_serializing_if = "Option::is_none", default)]
    pub acl: Option<Acl>,
    /// Present only for `NodeType::File`.
    #[serde(rename = "f", skip_serializing_if = "Option::is_none", default)]
    pub file: Option<FileMeta>,
    #[serde(rename = "p")]
    pub published: Timestamp,
    /// Bumped on every mutation.
    #[serde(rename = "u")]
    pub updated: Timestamp,
}

impl NodeRecord {
    /// New collection record of the given kind under `parent_id`.
    pub fn collection(
        cell_id: impl Into<CellId>,
        box_id: Option<BoxId>,
        node_type: NodeType,
        parent_id: Option<NodeId>,
    ) -> Self {
        let now = now_millis();
        NodeRecord {
            cell_id: cell_id.into(),
            box_id,
            node_type,
            parent_id,
            children: BTreeMap::new(),
            properties: BTreeMap::new(),
            acl: None,
            file: None,
            published: now,
            updated: now,
        }
    }

    /// New file record under `parent_id`; payload metadata is filled in after
    /// the payload write reports its length.
    pub fn file(
        cell_id: impl Into<CellId>,
        box_id: Option<BoxId>,
        parent_id: Option<NodeId>,
        meta: FileMeta,
    ) -> Self {
        let now = now_millis();
        NodeRecord {
            cell_id: cell_id.into(),
            box_id,
            node_type: NodeType::File,
            parent_id,
            children: BTreeMap::new(),
            properties: BTreeMap::new(),
            acl: None,
            file: Some(meta),
            published: now,
            updated: now,
        }
    }

    /// Look up a dead property by typed key.
    pub fn property(&self, key: &PropKey) -> Option<&String> {
        self.properties.get(&key.storage_key())
    }

    /// Extract the reserved owner-representative account list. The value is a
    /// JSON string array; a node without the property yields an empty list, a
    /// malformed value is a consistency fault.
    pub fn owner_representative_accounts(&self) -> Result<Vec<String>> {
        let key = PropKey::new(OWNER_REPRESENTATIVE_NAME, OWNER_REPRESENTATIVE_NS);
        match self.property(&key) {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                Error::Inconsistency(format!("malformed owner representative accounts: {e}"))
            }),
        }
    }
}
