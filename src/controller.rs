//! Node tree controller.
//!
//! One controller instance per addressed node, bound to a cell (and usually a
//! box) and navigated by name from a root collection. A controller caches the
//! document snapshot it loaded; tree-mutating operations take the owning
//! collection's advisory lock, reload the latest snapshot under it, and only
//! then decide.
//!
//! Multi-step sequences are ordered so a crash leaves an orphan document or
//! payload, never a dangling reference: payloads are written before the
//! metadata that points at them, children are unlinked from their parent
//! before their documents are removed.

use crate::acl::resolver::RoleResolver;
use crate::acl::Acl;
use crate::binary::BinaryDataStore;
use crate::cell::{BoxContext, CellContext};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::etag;
use crate::lock::{LockCategory, LockCoordinator, LockGuard};
use crate::node::{FileMeta, NodeRecord, NodeType, PropKey, SERVICE_SRC_COLLECTION};
use crate::propfind::{
    Depth, Multistatus, PropPatch, PropStatus, ProppatchResult, ResourceDescriptor, ResourceKind,
};
use crate::range::{self, RangeOutcome};
use crate::store::{CellIndex, Document, NodeStore, RoleIndex};
use crate::types::{new_id, now_millis, NodeId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Emptiness counters for structured-data collections, implemented by the
/// schema engine that owns entity and complex type definitions.
#[async_trait]
pub trait SchemaCounter: Send + Sync {
    /// Number of entity types defined under a structured-data collection.
    async fn entity_type_count(&self, collection_id: &str) -> Result<u64>;

    /// Number of complex types defined under a structured-data collection.
    async fn complex_type_count(&self, collection_id: &str) -> Result<u64>;
}

/// Shared collaborators every controller in a process uses.
pub struct TreeEnv {
    pub store: Arc<dyn NodeStore>,
    pub roles: Arc<dyn RoleIndex>,
    pub cells: Arc<dyn CellIndex>,
    pub schema: Arc<dyn SchemaCounter>,
    pub blobs: Arc<BinaryDataStore>,
    pub locks: Arc<LockCoordinator>,
    pub config: Arc<StoreConfig>,
}

impl TreeEnv {
    /// Role resolver over this environment's indexes.
    pub fn resolver(&self) -> RoleResolver {
        RoleResolver::new(Arc::clone(&self.roles), Arc::clone(&self.cells))
    }
}

/// Outcome of a PUT routed through [`NodeController::put_for_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new file node was materialized.
    Created { etag: String },
    /// The create lost a name race and fell through to update semantics.
    Updated { etag: String },
}

/// Outcome of a conditional, possibly ranged GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    /// If-None-Match matched the current ETag; no body.
    NotModified { etag: String },
    /// Entire payload.
    Full {
        etag: String,
        content_type: String,
        body: Vec<u8>,
    },
    /// One satisfiable range of the payload.
    Partial {
        etag: String,
        content_type: String,
        content_range: String,
        body: Vec<u8>,
    },
}

/// Controller for one node of a cell's tree.
///
/// A controller whose node does not exist (yet) is a placeholder: it carries
/// the parent link and name needed to materialize the node, and read
/// operations on it fail not-found.
pub struct NodeController {
    env: Arc<TreeEnv>,
    cell: CellContext,
    box_ctx: Option<BoxContext>,
    name: String,
    /// Collection levels below the root this controller was navigated from.
    depth: usize,
    parent_id: Option<NodeId>,
    node_id: Option<NodeId>,
    version: u64,
    record: Option<NodeRecord>,
}

impl NodeController {
    /// Bind to a box's root collection and load it.
    pub async fn box_root(
        env: Arc<TreeEnv>,
        cell: CellContext,
        box_ctx: BoxContext,
        root_id: &str,
    ) -> Result<Self> {
        let mut controller = NodeController {
            env,
            cell,
            box_ctx: Some(box_ctx),
            name: String::new(),
            depth: 0,
            parent_id: None,
            node_id: Some(root_id.to_string()),
            version: 0,
            record: None,
        };
        controller.load().await?;
        Ok(controller)
    }

    /// Bind to the cell's own root collection (box-less scope) and load it.
    pub async fn cell_root(env: Arc<TreeEnv>, cell: CellContext, root_id: &str) -> Result<Self> {
        let mut controller = NodeController {
            env,
            cell,
            box_ctx: None,
            name: String::new(),
            depth: 0,
            parent_id: None,
            node_id: Some(root_id.to_string()),
            version: 0,
            record: None,
        };
        controller.load().await?;
        Ok(controller)
    }

    /// Navigate to a direct child by name. Always succeeds: a name with no
    /// backing node yields a placeholder controller.
    pub fn get_child(&self, name: &str) -> NodeController {
        let child_id = self
            .record
            .as_ref()
            .and_then(|r| r.children.get(name).cloned());
        NodeController {
            env: Arc::clone(&self.env),
            cell: self.cell.clone(),
            box_ctx: self.box_ctx.clone(),
            name: name.to_string(),
            depth: self.depth + 1,
            parent_id: self.node_id.clone(),
            node_id: child_id,
            version: 0,
            record: None,
        }
    }

    /// Fetch the current document snapshot. Fails not-found on a placeholder
    /// and flags a linked-but-missing document as store divergence.
    pub async fn load(&mut self) -> Result<()> {
        let id = self.node_id.clone().ok_or(Error::NodeNotFound)?;
        let doc = self.env.store.get(&id).await?.ok_or_else(|| {
            Error::Inconsistency(format!("node {id} is linked but has no document"))
        })?;
        self.version = doc.version;
        self.record = Some(doc.record);
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.node_id.is_some()
    }

    /// Type of the loaded node; `Null` for placeholders.
    pub fn node_type(&self) -> NodeType {
        self.record
            .as_ref()
            .map(|r| r.node_type)
            .unwrap_or(NodeType::Null)
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cell(&self) -> &CellContext {
        &self.cell
    }

    pub fn box_context(&self) -> Option<&BoxContext> {
        self.box_ctx.as_ref()
    }

    /// True for controllers bound outside any box.
    pub fn is_cell_level(&self) -> bool {
        self.box_ctx.is_none()
    }

    pub fn children_count(&self) -> usize {
        self.record.as_ref().map(|r| r.children.len()).unwrap_or(0)
    }

    /// Current ETag, `None` until loaded.
    pub fn etag(&self) -> Option<String> {
        self.record
            .as_ref()
            .map(|r| etag::render(self.version, r.updated))
    }

    fn current(&self) -> Result<&NodeRecord> {
        self.record.as_ref().ok_or(Error::NodeNotFound)
    }

    fn current_id(&self) -> Result<&str> {
        self.node_id.as_deref().ok_or(Error::NodeNotFound)
    }

    fn current_etag(&self) -> Result<String> {
        Ok(etag::render(self.version, self.current()?.updated))
    }

    /// All node-tree mutations within one box serialize on the box id; the
    /// cell-level tree serializes on the cell id.
    fn lock_key(&self) -> &str {
        match &self.box_ctx {
            Some(b) => b.id.as_str(),
            None => self.cell.id.as_str(),
        }
    }

    async fn lock(&self) -> LockGuard {
        self.env.locks.lock(LockCategory::Dav, self.lock_key()).await
    }

    fn apply(&mut self, doc: Document) {
        self.node_id = Some(doc.id);
        self.version = doc.version;
        self.record = Some(doc.record);
    }

    // -- reads --------------------------------------------------------------

    /// Describe this node and, at depth 1, its direct children.
    ///
    /// The node must be loaded. Children are fetched in one bulk query bounded
    /// by the configured page size; linked children beyond that bound are
    /// omitted from the listing.
    pub async fn propfind(
        &self,
        depth_header: Option<&str>,
        href: &str,
        include_acl: bool,
    ) -> Result<Multistatus> {
        let depth = Depth::parse(depth_header)?;
        let rec = self.current()?;
        let base = href.trim_end_matches('/');
        let resolver = self.env.resolver();

        let mut responses = vec![
            self.describe(rec, base.to_string(), include_acl, &resolver)
                .await?,
        ];
        if depth == Depth::One {
            let id = self.current_id()?;
            let fetched = self
                .env
                .store
                .find_children(id, self.env.config.search_page_size)
                .await?;
            let by_id: HashMap<&str, &Document> =
                fetched.iter().map(|d| (d.id.as_str(), d)).collect();
            for (child_name, child_id) in &rec.children {
                match by_id.get(child_id.as_str()) {
                    Some(doc) => responses.push(
                        self.describe(
                            &doc.record,
                            format!("{base}/{child_name}"),
                            include_acl,
                            &resolver,
                        )
                        .await?,
                    ),
                    None => {
                        debug!(child = %child_name, "child outside the bulk query bound, omitted")
                    }
                }
            }
        }
        Ok(Multistatus { responses })
    }

    async fn describe(
        &self,
        rec: &NodeRecord,
        href: String,
        include_acl: bool,
        resolver: &RoleResolver,
    ) -> Result<ResourceDescriptor> {
        let kind = match rec.node_type {
            NodeType::WebdavCollection => ResourceKind::Collection,
            NodeType::OdataCollection => ResourceKind::OdataCollection,
            NodeType::ServiceCollection => ResourceKind::ServiceCollection,
            NodeType::File => ResourceKind::File,
            NodeType::Null => return Err(Error::Unreachable("describing an unmaterialized node")),
        };
        let mut properties = Vec::with_capacity(rec.properties.len());
        for (key, value) in &rec.properties {
            properties.push((PropKey::from_storage_key(key)?, value.clone()));
        }
        let acl = match (&rec.acl, include_acl) {
            (Some(acl), true) => Some(
                resolver
                    .rewrite_for_render(acl, &self.cell, self.box_ctx.as_ref())
                    .await?,
            ),
            _ => None,
        };
        Ok(ResourceDescriptor {
            href,
            kind,
            created: rec.published,
            last_modified: rec.updated,
            content_type: rec.file.as_ref().map(|f| f.content_type.clone()),
            content_length: rec.file.as_ref().map(|f| f.length),
            properties,
            acl,
        })
    }

    /// Conditional, possibly ranged payload read. File nodes only; the node
    /// must be loaded.
    pub async fn get(
        &self,
        if_none_match: Option<&str>,
        range_header: Option<&str>,
    ) -> Result<GetOutcome> {
        let rec = self.current()?;
        let etag = self.current_etag()?;
        if etag::is_not_modified(if_none_match, &etag) {
            return Ok(GetOutcome::NotModified { etag });
        }
        let meta = rec
            .file
            .as_ref()
            .ok_or(Error::Unreachable("payload read on a collection"))?;
        let id = self.current_id()?;
        let size = self
            .env
            .blobs
            .size(id)
            .await
            .map_err(|e| payload_divergence(id, e))?;

        match range::resolve(range_header, size) {
            RangeOutcome::Full => {
                let body = self
                    .env
                    .blobs
                    .read_range(id, 0, size)
                    .await
                    .map_err(|e| payload_divergence(id, e))?;
                Ok(GetOutcome::Full {
                    etag,
                    content_type: meta.content_type.clone(),
                    body,
                })
            }
            RangeOutcome::Single(r) => {
                let body = self
                    .env
                    .blobs
                    .read_range(id, r.start, r.content_length())
                    .await
                    .map_err(|e| payload_divergence(id, e))?;
                Ok(GetOutcome::Partial {
                    etag,
                    content_type: meta.content_type.clone(),
                    content_range: r.content_range(),
                    body,
                })
            }
            RangeOutcome::Unsatisfiable => Err(Error::RangeNotSatisfiable(format!(
                "{}/{size}",
                range_header.unwrap_or_default()
            ))),
            RangeOutcome::Multipart => Err(Error::NotImplemented("multi-range requests")),
        }
    }

    /// Emptiness by collection kind: no children for a plain collection, no
    /// schema definitions for a structured-data collection, an empty source
    /// tree for a service collection.
    pub async fn is_empty(&self) -> Result<bool> {
        let rec = self.current()?;
        match rec.node_type {
            NodeType::WebdavCollection => Ok(rec.children.is_empty()),
            NodeType::OdataCollection => {
                let id = self.current_id()?;
                Ok(self.env.schema.entity_type_count(id).await? == 0
                    && self.env.schema.complex_type_count(id).await? == 0)
            }
            NodeType::ServiceCollection => {
                let src_id = rec.children.get(SERVICE_SRC_COLLECTION).ok_or_else(|| {
                    Error::Inconsistency("service collection without a source tree".into())
                })?;
                let src = self.env.store.get(src_id).await?.ok_or_else(|| {
                    Error::Inconsistency(format!("source tree {src_id} missing"))
                })?;
                Ok(src.record.children.is_empty())
            }
            NodeType::File | NodeType::Null => {
                Err(Error::Unreachable("emptiness check on a non-collection"))
            }
        }
    }

    // -- property and ACL writes --------------------------------------------

    /// Apply a property patch atomically: sets and removes land together or
    /// not at all, and a null entry rejects the whole request.
    pub async fn proppatch(&mut self, patch: &PropPatch, href: &str) -> Result<ProppatchResult> {
        let _guard = self.lock().await;
        self.load().await?;
        let mut rec = self.current()?.clone();

        let mut results = Vec::with_capacity(patch.set.len() + patch.remove.len());
        for entry in &patch.set {
            let (key, value) = entry.as_ref().ok_or_else(|| {
                Error::MalformedContent("null entry in property set list".into())
            })?;
            rec.properties.insert(key.storage_key(), value.clone());
            results.push((key.clone(), PropStatus::Ok));
        }
        for entry in &patch.remove {
            let key = entry.as_ref().ok_or_else(|| {
                Error::MalformedContent("null entry in property remove list".into())
            })?;
            let status = match rec.properties.remove(&key.storage_key()) {
                Some(_) => PropStatus::Ok,
                None => PropStatus::NotFound,
            };
            results.push((key.clone(), status));
        }

        rec.updated = now_millis();
        let id = self.current_id()?.to_string();
        let doc = self
            .env
            .store
            .update_with_version(&id, &rec, self.version)
            .await?;
        self.apply(doc);
        Ok(ProppatchResult {
            href: href.trim_end_matches('/').to_string(),
            etag: self.current_etag()?,
            results,
        })
    }

    /// Replace the node's ACL. Incoming role references are resolved to role
    /// ids before persisting; returns the new ETag.
    pub async fn set_acl(&mut self, acl: Acl) -> Result<String> {
        acl.validate(self.is_cell_level())?;
        let _guard = self.lock().await;
        self.load().await?;

        let stored = self.env.resolver().rewrite_for_store(acl, &self.cell).await?;
        let mut rec = self.current()?.clone();
        rec.acl = Some(stored);
        rec.updated = now_millis();

        let id = self.current_id()?.to_string();
        let doc = self
            .env
            .store
            .update_with_version(&id, &rec, self.version)
            .await?;
        self.apply(doc);
        info!(name = %self.name, "acl replaced");
        self.current_etag()
    }

    // -- file writes --------------------------------------------------------

    /// PUT addressed at a name with no backing node. If a sibling with the
    /// name appears before the lock is taken, falls through to update
    /// semantics against it instead of failing.
    pub async fn put_for_create(&mut self, content_type: &str, payload: &[u8]) -> Result<PutOutcome> {
        let _guard = self.lock().await;
        let parent_id = self
            .parent_id
            .clone()
            .ok_or(Error::Unreachable("file create without a parent collection"))?;
        let parent = self.env.store.get(&parent_id).await?.ok_or_else(|| {
            Error::Inconsistency(format!("parent {parent_id} vanished during create"))
        })?;

        if let Some(existing) = parent.record.children.get(&self.name) {
            debug!(name = %self.name, "create raced an existing sibling, updating it instead");
            self.node_id = Some(existing.clone());
            let etag = self.overwrite_payload(content_type, payload, None).await?;
            return Ok(PutOutcome::Updated { etag });
        }
        if parent.record.children.len() >= self.env.config.max_child_resource_count {
            return Err(Error::ChildResourceLimit);
        }

        // Payload first: a crash here leaves an orphan blob, not a file node
        // without content.
        let id = new_id();
        let written = self.env.blobs.create(&id, payload).await?;
        let rec = NodeRecord::file(
            self.cell.id.clone(),
            self.box_ctx.as_ref().map(|b| b.id.clone()),
            Some(parent_id.clone()),
            FileMeta {
                content_type: content_type.to_string(),
                length: written,
            },
        );
        let doc = self.env.store.create(&id, &rec).await?;
        self.apply(doc);
        self.link_into(&parent_id, parent.record).await?;

        info!(name = %self.name, bytes = written, "file created");
        Ok(PutOutcome::Created {
            etag: self.current_etag()?,
        })
    }

    /// PUT addressed at an existing file node, honoring If-Match.
    pub async fn put_for_update(
        &mut self,
        content_type: &str,
        payload: &[u8],
        if_match: Option<&str>,
    ) -> Result<String> {
        let _guard = self.lock().await;
        self.overwrite_payload(content_type, payload, if_match).await
    }

    /// Caller holds the tree lock.
    async fn overwrite_payload(
        &mut self,
        content_type: &str,
        payload: &[u8],
        if_match: Option<&str>,
    ) -> Result<String> {
        self.load().await?;
        etag::check_if_match(if_match, &self.current_etag()?)?;
        if self.current()?.node_type != NodeType::File {
            return Err(Error::Unreachable("payload write on a collection"));
        }

        let id = self.current_id()?.to_string();
        let written = self.env.blobs.update(&id, payload).await?;
        let mut rec = self.current()?.clone();
        rec.file = Some(FileMeta {
            content_type: content_type.to_string(),
            length: written,
        });
        rec.updated = now_millis();
        let doc = self
            .env
            .store
            .update_with_version(&id, &rec, self.version)
            .await?;
        self.apply(doc);
        self.current_etag()
    }

    // -- tree structure -----------------------------------------------------

    /// Create a collection of the given kind at this controller's name.
    ///
    /// Service collections are materialized with their reserved source tree
    /// already in place.
    pub async fn mkcol(&mut self, node_type: NodeType) -> Result<String> {
        if !node_type.is_collection() {
            return Err(Error::MalformedContent(
                "MKCOL requires a collection type".into(),
            ));
        }
        let _guard = self.lock().await;
        let parent_id = self
            .parent_id
            .clone()
            .ok_or(Error::Unreachable("collection create without a parent"))?;
        let parent = self.env.store.get(&parent_id).await?.ok_or_else(|| {
            Error::Inconsistency(format!("parent {parent_id} vanished during create"))
        })?;

        if parent.record.children.contains_key(&self.name) {
            return Err(Error::NameExists);
        }
        if self.depth > self.env.config.max_collection_depth {
            return Err(Error::CollectionDepthLimit);
        }
        if parent.record.children.len() >= self.env.config.max_child_resource_count {
            return Err(Error::ChildResourceLimit);
        }

        let id = new_id();
        let box_id = self.box_ctx.as_ref().map(|b| b.id.clone());
        let mut rec = NodeRecord::collection(
            self.cell.id.clone(),
            box_id.clone(),
            node_type,
            Some(parent_id.clone()),
        );
        if node_type == NodeType::ServiceCollection {
            let src_id = new_id();
            let src = NodeRecord::collection(
                self.cell.id.clone(),
                box_id,
                NodeType::WebdavCollection,
                Some(id.clone()),
            );
            self.env.store.create(&src_id, &src).await?;
            rec.children.insert(SERVICE_SRC_COLLECTION.to_string(), src_id);
        }
        let doc = self.env.store.create(&id, &rec).await?;
        self.apply(doc);
        self.link_into(&parent_id, parent.record).await?;

        info!(name = %self.name, kind = ?node_type, "collection created");
        self.current_etag()
    }

    /// Delete this node, honoring If-Match against the loaded snapshot.
    pub async fn delete(&mut self, if_match: Option<&str>) -> Result<()> {
        etag::check_if_match(if_match, &self.current_etag()?)?;
        let _guard = self.lock().await;
        self.load().await?;
        let rec = self.current()?.clone();
        let id = self.current_id()?.to_string();

        if rec.node_type == NodeType::WebdavCollection && !rec.children.is_empty() {
            return Err(Error::HasChildren);
        }

        // Reconfirm the link under the lock; a concurrent delete may have won.
        let parent_id = self
            .parent_id
            .clone()
            .ok_or(Error::Unreachable("delete of a root collection"))?;
        let mut parent = self
            .env
            .store
            .get(&parent_id)
            .await?
            .ok_or_else(|| {
                Error::Inconsistency(format!("parent {parent_id} vanished during delete"))
            })?
            .record;
        if parent.children.get(&self.name).map(String::as_str) != Some(id.as_str()) {
            return Err(Error::AlreadyUnlinked);
        }

        if rec.node_type == NodeType::ServiceCollection {
            let src_id = rec.children.get(SERVICE_SRC_COLLECTION).ok_or_else(|| {
                Error::Inconsistency(format!("service collection {id} without a source tree"))
            })?;
            self.env.store.delete(src_id).await?;
        }

        // Unlink before removing the document: a crash between the two leaves
        // an orphan, never a dangling reference.
        parent.children.remove(&self.name);
        parent.updated = now_millis();
        self.env.store.update(&parent_id, &parent).await?;

        self.env.store.delete(&id).await?;
        if rec.node_type == NodeType::File {
            self.env
                .blobs
                .delete(&id)
                .await
                .map_err(|e| payload_divergence(&id, e))?;
        }

        self.node_id = None;
        self.record = None;
        self.version = 0;
        info!(name = %self.name, "node deleted");
        Ok(())
    }

    /// Link an externally created node under this collection.
    pub async fn link_child(&mut self, name: &str, child_id: &str) -> Result<()> {
        let _guard = self.lock().await;
        self.load().await?;
        let mut rec = self.current()?.clone();
        if rec.children.contains_key(name) {
            return Err(Error::NameExists);
        }
        rec.children.insert(name.to_string(), child_id.to_string());
        rec.updated = now_millis();
        let id = self.current_id()?.to_string();
        let doc = self
            .env
            .store
            .update_with_version(&id, &rec, self.version)
            .await?;
        self.apply(doc);
        Ok(())
    }

    /// Remove a child link without touching the child's document.
    pub async fn unlink_child(&mut self, name: &str) -> Result<()> {
        let _guard = self.lock().await;
        self.load().await?;
        let mut rec = self.current()?.clone();
        if rec.children.remove(name).is_none() {
            return Err(Error::AlreadyUnlinked);
        }
        rec.updated = now_millis();
        let id = self.current_id()?.to_string();
        let doc = self
            .env
            .store
            .update_with_version(&id, &rec, self.version)
            .await?;
        self.apply(doc);
        Ok(())
    }

    async fn link_into(&self, parent_id: &str, mut parent: NodeRecord) -> Result<()> {
        let child_id = self.current_id()?.to_string();
        parent.children.insert(self.name.clone(), child_id);
        parent.updated = now_millis();
        self.env.store.update(parent_id, &parent).await?;
        Ok(())
    }
}

/// The metadata and payload stores disagreeing about a node is fatal, never
/// auto-repaired.
fn payload_divergence(node_id: &str, e: Error) -> Error {
    match e {
        e @ (Error::PayloadNotFound(_) | Error::PayloadAccess(_)) => {
            Error::Inconsistency(format!("payload for node {node_id} unavailable: {e}"))
        }
        other => other,
    }
}
