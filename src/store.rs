use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::RwLock;

use crate::common::error::{Result, SyncError};

pub use record::{Record, RecordKind};

mod record;

pub type SharedStore = Arc<RwLock<RecordStore>>;

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<String, Record>,
    order: Vec<String>,
    item_total: Option<u64>,
}

impl Table {
    fn upsert(&mut self, record: Record) {
        if !self.rows.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.rows.insert(record.id.clone(), record);
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.order.clear();
    }
}

fn check_kind(kind: RecordKind, records: &[Record]) -> Result<()> {
    match records.iter().find(|record| record.kind != kind) {
        Some(record) => Err(SyncError::KindMismatch {
            id: record.id.clone(),
            expected: kind,
            actual: record.kind,
        }),
        None => Ok(()),
    }
}

/// Id-indexed, table-per-kind record store.
///
/// Records are always replaced whole; there is no field-level patching.
#[derive(Debug, Default)]
pub struct RecordStore {
    tables: HashMap<RecordKind, Table>,
    last_applied: HashMap<String, u64>,
}

impl RecordStore {
    pub fn new() -> RecordStore {
        RecordStore::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(RwLock::new(RecordStore::new()))
    }

    /// Inserts or replaces every record by id. Returns how many were written.
    /// A record of another kind rejects the whole batch.
    pub fn upsert_many(&mut self, kind: RecordKind, records: impl IntoIterator<Item = Record>) -> Result<usize> {
        let records: Vec<Record> = records.into_iter().collect();
        check_kind(kind, &records)?;
        Ok(self.write_all(kind, records))
    }

    /// Replaces the whole table with `records`. The table is untouched when
    /// the batch is rejected.
    pub fn load_many(&mut self, kind: RecordKind, records: impl IntoIterator<Item = Record>) -> Result<usize> {
        let records: Vec<Record> = records.into_iter().collect();
        check_kind(kind, &records)?;
        self.clear(kind);
        Ok(self.write_all(kind, records))
    }

    fn write_all(&mut self, kind: RecordKind, records: Vec<Record>) -> usize {
        let table = self.tables.entry(kind).or_default();
        let written = records.len();
        for record in records {
            table.upsert(record);
        }
        debug!("upserted {} {} records", written, kind);
        written
    }

    pub fn clear(&mut self, kind: RecordKind) {
        if let Some(table) = self.tables.get_mut(&kind) {
            table.clear();
        }
    }

    pub fn find(&self, kind: RecordKind, id: &str) -> Option<&Record> {
        self.tables.get(&kind)?.rows.get(id)
    }

    /// All records of `kind` in first-insertion order.
    pub fn find_all(&self, kind: RecordKind) -> Vec<&Record> {
        match self.tables.get(&kind) {
            Some(table) => table.order.iter().filter_map(|id| table.rows.get(id)).collect(),
            None => vec![],
        }
    }

    pub fn len(&self, kind: RecordKind) -> usize {
        self.tables.get(&kind).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, kind: RecordKind) -> bool {
        self.len(kind) == 0
    }

    /// Total count the server reported for the last paged fetch of `kind`.
    pub fn item_total(&self, kind: RecordKind) -> Option<u64> {
        self.tables.get(&kind)?.item_total
    }

    pub fn set_item_total(&mut self, kind: RecordKind, total: u64) {
        self.tables.entry(kind).or_default().item_total = Some(total);
    }

    /// Accepts `sequence` for `resource` unless a newer one was already applied.
    pub fn admit(&mut self, resource: &str, sequence: u64) -> bool {
        match self.last_applied.get(resource) {
            Some(last) if *last > sequence => false,
            _ => {
                self.last_applied.insert(resource.to_string(), sequence);
                true
            }
        }
    }
}
