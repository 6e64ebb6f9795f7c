//! Row identifier sets.
//!
//! One lock per table guards the rows already claimed for the slice. A
//! claim inserts the new identifiers and numbers them as the table's next
//! part in the same critical section, so every row lands in exactly one
//! part no matter how many workers discover it.

use crate::db::RowId;
use crate::schema::TableId;
use ahash::AHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Rows newly claimed by one discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub table: TableId,
    pub index: u32,
    pub rows: Vec<RowId>,
}

#[derive(Debug, Default)]
struct TableRows {
    ids: AHashSet<RowId>,
    parts: u32,
}

#[derive(Debug)]
pub struct RowSets {
    tables: Vec<Mutex<TableRows>>,
    total: AtomicU64,
}

impl RowSets {
    pub fn new(table_count: usize) -> Self {
        Self {
            tables: (0..table_count).map(|_| Mutex::default()).collect(),
            total: AtomicU64::new(0),
        }
    }

    fn lock(&self, table: TableId) -> Option<MutexGuard<'_, TableRows>> {
        // Insertion is idempotent, so a poisoned set is still consistent
        self.tables
            .get(table.0 as usize)
            .map(|m| m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Claim rows of a table. Returns the rows not claimed before as a new
    /// part, or `None` when every row was already present.
    pub fn claim(&self, table: TableId, rows: &[RowId]) -> Option<Part> {
        let mut set = self.lock(table)?;
        let new: Vec<RowId> = rows.iter().copied().filter(|id| set.ids.insert(*id)).collect();
        if new.is_empty() {
            return None;
        }
        let index = set.parts;
        set.parts += 1;
        drop(set);

        self.total.fetch_add(new.len() as u64, Ordering::Relaxed);
        Some(Part {
            table,
            index,
            rows: new,
        })
    }

    /// Rows claimed in a table
    pub fn len(&self, table: TableId) -> usize {
        self.lock(table).map_or(0, |set| set.ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Rows claimed across all tables
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Sorted row identifiers per table, indexed by table id
    pub fn to_sorted(&self) -> Vec<Vec<RowId>> {
        (0..self.tables.len())
            .map(|t| {
                let mut ids: Vec<RowId> = self
                    .lock(TableId(t as u32))
                    .map(|set| set.ids.iter().copied().collect())
                    .unwrap_or_default();
                ids.sort_unstable();
                ids
            })
            .collect()
    }
}
