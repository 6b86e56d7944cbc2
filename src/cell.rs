//! Cell (tenant) lifecycle.
//!
//! A cell is the unit of tenancy: every node, role and box belongs to exactly
//! one cell. This module carries the cell/box context values threaded through
//! the tree controllers, plus the bulk-deletion pipeline: access gate,
//! recursive-delete confirmation, access drain, entity removal, durable
//! deletion ledger and the background cascade that sweeps the cell's documents
//! and payloads.
//!
//! The pipeline deletes the cell entity synchronously; the subtree cascade
//! runs on a spawned task so the caller can return as soon as the cell stops
//! resolving. Per-item cascade failures are logged and counted, never
//! propagated.

use crate::binary::BinaryDataStore;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::lock::CellAccessTracker;
use crate::store::{CellIndex, NodeStore};
use crate::types::{now_millis, BoxId, CellId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Resolved cell identity, threaded through every controller touching the
/// cell's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellContext {
    pub id: CellId,
    pub name: String,
    /// Canonical cell root URL, used as the anchor for role resource URLs.
    pub url: String,
    /// Owner subject URL; `None` for ownerless cells.
    pub owner: Option<String>,
}

/// Resolved box identity for box-scoped trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxContext {
    pub id: BoxId,
    pub name: String,
}

/// Classified authentication result for an incoming request, as the protocol
/// adapter hands it to the storage core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessKind {
    /// No credentials presented.
    Anonymous,
    /// Credentials presented but not valid.
    Invalid,
    /// Unit master credentials: full administrative access.
    UnitMaster,
    /// Unit-user token; carries the principal's subject URL.
    UnitUser { subject: String },
    /// Unit-local token; carries the principal's subject URL.
    UnitLocal { subject: String },
    /// Valid token scoped to a cell rather than the unit.
    CellScoped,
}

/// Gate for cell bulk deletion: only the unit master, or a unit-level
/// principal whose subject is the cell owner, may delete a cell.
pub fn check_deletion_access(access: &AccessKind, cell: &CellContext) -> Result<()> {
    match access {
        AccessKind::Invalid => Err(Error::InvalidToken),
        AccessKind::Anonymous => Err(Error::AuthorizationRequired),
        AccessKind::CellScoped => Err(Error::UnitAccessRequired),
        AccessKind::UnitMaster => Ok(()),
        AccessKind::UnitUser { subject } | AccessKind::UnitLocal { subject } => {
            match &cell.owner {
                Some(owner) if owner == subject => Ok(()),
                _ => Err(Error::NotOwner),
            }
        }
    }
}

/// Token naming the owner's storage partition. Ownerless cells share the
/// anonymous partition; owner subject URLs are hex-encoded so the name stays
/// safe for index and path use.
pub fn unit_user_name(owner: Option<&str>) -> String {
    match owner {
        None => "anon".to_string(),
        Some(owner) => hex::encode(owner.as_bytes()),
    }
}

/// Name-keyed cache of resolved cells. Invalidated when a cell is deleted.
#[derive(Default)]
pub struct CellCache {
    entries: Mutex<HashMap<String, CellContext>>,
}

impl CellCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<CellContext> {
        self.entries.lock().get(name).cloned()
    }

    pub fn put(&self, cell: CellContext) {
        self.entries.lock().insert(cell.name.clone(), cell);
    }

    pub fn remove(&self, name: &str) {
        self.entries.lock().remove(name);
    }
}

/// One recorded cell deletion awaiting (or surviving) cascade cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub cell_id: CellId,
    pub unit_user_name: String,
    pub requested_at: Timestamp,
}

/// Durable journal of cell deletions, kept so an embedder can resume cascade
/// cleanup for cells whose sweep was cut short by a restart.
pub struct DeletionLedger {
    tree: sled::Tree,
}

impl DeletionLedger {
    /// Open (or create) the ledger at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("opening deletion ledger: {e}")))?;
        let tree = db
            .open_tree("cell-deletions")
            .map_err(|e| Error::Storage(format!("opening deletion ledger tree: {e}")))?;
        Ok(DeletionLedger { tree })
    }

    /// Record a deletion. Flushed before returning.
    pub fn record(&self, unit_user_name: &str, cell_id: &str) -> Result<()> {
        let entry = LedgerEntry {
            cell_id: cell_id.to_string(),
            unit_user_name: unit_user_name.to_string(),
            requested_at: now_millis(),
        };
        let value = serde_json::to_vec(&entry)
            .map_err(|e| Error::Storage(format!("encoding ledger entry: {e}")))?;
        self.tree
            .insert(cell_id.as_bytes(), value)
            .map_err(|e| Error::Storage(format!("writing ledger entry: {e}")))?;
        self.tree
            .flush()
            .map_err(|e| Error::Storage(format!("flushing deletion ledger: {e}")))?;
        Ok(())
    }

    /// Drop a cell's entry once its cascade has completed.
    pub fn clear(&self, cell_id: &str) -> Result<()> {
        self.tree
            .remove(cell_id.as_bytes())
            .map_err(|e| Error::Storage(format!("clearing ledger entry: {e}")))?;
        Ok(())
    }

    /// Deletions recorded but not yet cleared.
    pub fn pending(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (_, value) =
                item.map_err(|e| Error::Storage(format!("reading deletion ledger: {e}")))?;
            let entry = serde_json::from_slice(&value)
                .map_err(|e| Error::Storage(format!("decoding ledger entry: {e}")))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Counters returned by a finished cascade sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Node documents removed by the bulk delete.
    pub docs_deleted: u64,
    /// Payloads removed.
    pub blobs_deleted: u64,
    /// Payloads that could not be removed; logged and skipped.
    pub blob_failures: u64,
}

/// Orchestrates cell bulk deletion.
pub struct CellDeletionPipeline {
    store: Arc<dyn NodeStore>,
    cells: Arc<dyn CellIndex>,
    blobs: Arc<BinaryDataStore>,
    tracker: Arc<CellAccessTracker>,
    cache: Arc<CellCache>,
    ledger: Arc<DeletionLedger>,
    config: Arc<StoreConfig>,
}

impl CellDeletionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn NodeStore>,
        cells: Arc<dyn CellIndex>,
        blobs: Arc<BinaryDataStore>,
        tracker: Arc<CellAccessTracker>,
        cache: Arc<CellCache>,
        ledger: Arc<DeletionLedger>,
        config: Arc<StoreConfig>,
    ) -> Self {
        CellDeletionPipeline {
            store,
            cells,
            blobs,
            tracker,
            cache,
            ledger,
            config,
        }
    }

    /// Delete a cell and everything in it.
    ///
    /// The caller must already hold its own access guard for the cell; that
    /// guard is the one reference the drain wait tolerates. On success the
    /// cell entity is gone and the returned handle resolves when the
    /// background cascade has swept the cell's documents and payloads.
    pub async fn delete(
        &self,
        cell: &CellContext,
        access: &AccessKind,
        recursive_header: Option<&str>,
    ) -> Result<JoinHandle<CascadeReport>> {
        check_deletion_access(access, cell)?;
        if recursive_header != Some("true") {
            return Err(Error::PreconditionRequired("X-Recursive: true header"));
        }

        self.wait_for_drain(&cell.id).await?;

        self.tracker.set_bulk_deletion(&cell.id);
        let deleted = self.cells.delete_cell(&cell.id).await;
        // Cache and mark are cleaned up whether or not the delete landed.
        self.cache.remove(&cell.name);
        self.tracker.clear_bulk_deletion(&cell.id);
        deleted?;

        let unit_user = unit_user_name(cell.owner.as_deref());
        if let Err(e) = self.ledger.record(&unit_user, &cell.id) {
            warn!(cell_id = %cell.id, error = %e, "deletion ledger write failed");
        }

        info!(cell_id = %cell.id, cell = %cell.name, "cell deleted, cascade scheduled");
        Ok(self.spawn_cascade(cell.clone()))
    }

    /// Poll until the caller's own guard is the only live reference to the
    /// cell, up to the configured retry budget.
    async fn wait_for_drain(&self, cell_id: &str) -> Result<()> {
        let interval = Duration::from_millis(self.config.cell_drain_retry_interval_ms);
        for attempt in 0..self.config.cell_drain_retry_count {
            if self.tracker.reference_count(cell_id) <= 1 {
                return Ok(());
            }
            debug!(cell_id, attempt, "waiting for concurrent cell access to drain");
            tokio::time::sleep(interval).await;
        }
        if self.tracker.reference_count(cell_id) <= 1 {
            Ok(())
        } else {
            Err(Error::CellAccessConflict)
        }
    }

    /// Background sweep: page through the cell's file nodes deleting payloads,
    /// then bulk-delete the node documents, then clear the ledger entry.
    fn spawn_cascade(&self, cell: CellContext) -> JoinHandle<CascadeReport> {
        let store = Arc::clone(&self.store);
        let blobs = Arc::clone(&self.blobs);
        let ledger = Arc::clone(&self.ledger);
        let page_size = self.config.cascade_page_size;

        tokio::spawn(async move {
            let mut report = CascadeReport::default();
            // Documents are only removed by the final bulk delete, so the
            // offset can advance past pages already swept.
            let mut offset = 0usize;
            loop {
                let ids = match store.list_file_node_ids(&cell.id, offset, page_size).await {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!(cell_id = %cell.id, error = %e, "cascade paging failed, sweep aborted");
                        return report;
                    }
                };
                if ids.is_empty() {
                    break;
                }
                offset += ids.len();
                for id in ids {
                    match blobs.delete(&id).await {
                        Ok(()) => report.blobs_deleted += 1,
                        Err(e) => {
                            warn!(cell_id = %cell.id, node_id = %id, error = %e, "cascade payload delete failed");
                            report.blob_failures += 1;
                        }
                    }
                }
            }

            // The ledger entry outlives any failed sweep so cleanup can be
            // re-run; it is only cleared once the documents are gone.
            match store.delete_by_cell(&cell.id).await {
                Ok(n) => {
                    report.docs_deleted = n;
                    if let Err(e) = ledger.clear(&cell.id) {
                        warn!(cell_id = %cell.id, error = %e, "deletion ledger clear failed");
                    }
                }
                Err(e) => {
                    warn!(cell_id = %cell.id, error = %e, "cascade document delete failed, ledger entry kept");
                }
            }

            info!(
                cell_id = %cell.id,
                docs = report.docs_deleted,
                blobs = report.blobs_deleted,
                failures = report.blob_failures,
                "cell cascade finished"
            );
            report
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> CellContext {
        CellContext {
            id: "cell1".into(),
            name: "alpha".into(),
            url: "https://unit.example/alpha/".into(),
            owner: Some("https://unit.example/#admin".into()),
        }
    }

    #[test]
    fn deletion_gate_matrix() {
        let cell = cell();
        assert!(matches!(
            check_deletion_access(&AccessKind::Invalid, &cell),
            Err(Error::InvalidToken)
        ));
        assert!(matches!(
            check_deletion_access(&AccessKind::Anonymous, &cell),
            Err(Error::AuthorizationRequired)
        ));
        assert!(matches!(
            check_deletion_access(&AccessKind::CellScoped, &cell),
            Err(Error::UnitAccessRequired)
        ));
        check_deletion_access(&AccessKind::UnitMaster, &cell).unwrap();

        let owner = AccessKind::UnitUser {
            subject: "https://unit.example/#admin".into(),
        };
        check_deletion_access(&owner, &cell).unwrap();

        let stranger = AccessKind::UnitLocal {
            subject: "https://unit.example/#other".into(),
        };
        assert!(matches!(
            check_deletion_access(&stranger, &cell),
            Err(Error::NotOwner)
        ));
    }

    #[test]
    fn ownerless_cell_rejects_unit_user() {
        let mut cell = cell();
        cell.owner = None;
        let access = AccessKind::UnitUser {
            subject: "https://unit.example/#admin".into(),
        };
        assert!(matches!(
            check_deletion_access(&access, &cell),
            Err(Error::NotOwner)
        ));
        // The unit master can still delete it.
        check_deletion_access(&AccessKind::UnitMaster, &cell).unwrap();
    }

    #[test]
    fn unit_user_name_encodes_owner() {
        assert_eq!(unit_user_name(None), "anon");
        let encoded = unit_user_name(Some("https://unit.example/#admin"));
        assert_eq!(encoded, hex::encode("https://unit.example/#admin"));
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_round_trip_and_invalidation() {
        let cache = CellCache::new();
        cache.put(cell());
        assert_eq!(cache.get("alpha").unwrap().id, "cell1");
        cache.remove("alpha");
        assert!(cache.get("alpha").is_none());
    }

    #[test]
    fn ledger_records_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DeletionLedger::open(&dir.path().join("ledger")).unwrap();

        ledger.record("anon", "cell1").unwrap();
        ledger.record("anon", "cell2").unwrap();
        let pending = ledger.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|e| e.cell_id == "cell1"));

        ledger.clear("cell1").unwrap();
        let pending = ledger.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].cell_id, "cell2");
    }
}
