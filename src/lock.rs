//! Lock coordination.
//!
//! Cooperative advisory locks scoped by category and owning-collection key.
//! Acquisition returns an owned guard that releases on drop, so every exit
//! path of a caller, including error propagation, releases the lock. Guards
//! are `tokio` mutex guards and may be held across store round trips.
//!
//! Also tracks per-cell live reference counts and the bulk-deletion mark used
//! by the tenant deletion pipeline.

use crate::types::CellId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock namespaces: storage-tree locks are distinct from other subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockCategory {
    /// Node-tree mutations, keyed by the owning box (or cell for cell-level
    /// collections).
    Dav,
    /// Structured-data subsystem locks (held by the external schema engine).
    Odata,
    /// Cell-wide exclusivity.
    Cell,
}

/// Held lock; released when dropped.
pub struct LockGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Category-scoped advisory lock table.
#[derive(Default)]
pub struct LockCoordinator {
    table: Mutex<HashMap<(LockCategory, String), Arc<AsyncMutex<()>>>>,
}

impl LockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, category: LockCategory, key: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock();
        table
            .entry((category, key.to_string()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the lock for `(category, key)`, waiting until it is free.
    pub async fn lock(&self, category: LockCategory, key: &str) -> LockGuard {
        let handle = self.handle(category, key);
        LockGuard {
            _guard: handle.lock_owned().await,
        }
    }
}

/// Live per-cell access accounting and bulk-deletion marks.
///
/// Every request flow touching a cell holds an [`CellAccessGuard`] for its
/// duration; the deletion pipeline polls [`reference_count`] to drain access
/// before removing the cell.
///
/// [`reference_count`]: CellAccessTracker::reference_count
#[derive(Default)]
pub struct CellAccessTracker {
    counts: Mutex<HashMap<CellId, u64>>,
    bulk_deleting: Mutex<HashSet<CellId>>,
}

/// Decrements its cell's reference count on drop.
pub struct CellAccessGuard {
    tracker: Arc<CellAccessTracker>,
    cell_id: CellId,
}

impl Drop for CellAccessGuard {
    fn drop(&mut self) {
        let mut counts = self.tracker.counts.lock();
        if let Some(count) = counts.get_mut(&self.cell_id) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.cell_id);
            }
        }
    }
}

impl CellAccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request flow against the cell.
    pub fn begin_access(self: &Arc<Self>, cell_id: &str) -> CellAccessGuard {
        *self.counts.lock().entry(cell_id.to_string()).or_insert(0) += 1;
        CellAccessGuard {
            tracker: Arc::clone(self),
            cell_id: cell_id.to_string(),
        }
    }

    /// Number of flows currently holding the cell (the caller's own guard
    /// counts too).
    pub fn reference_count(&self, cell_id: &str) -> u64 {
        self.counts.lock().get(cell_id).copied().unwrap_or(0)
    }

    /// Mark the cell as bulk-deletion in progress.
    pub fn set_bulk_deletion(&self, cell_id: &str) {
        self.bulk_deleting.lock().insert(cell_id.to_string());
    }

    /// Clear the bulk-deletion mark. Idempotent.
    pub fn clear_bulk_deletion(&self, cell_id: &str) {
        self.bulk_deleting.lock().remove(cell_id);
    }

    /// True while a bulk deletion is running for the cell; adapters reject new
    /// operations on it.
    pub fn is_bulk_deleting(&self, cell_id: &str) -> bool {
        self.bulk_deleting.lock().contains(cell_id)
    }
}
