use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::common::config::{Supports, SyncConfig};
use crate::common::error::Result;
use crate::store::{Record, RecordKind, RecordStore};

pub use hosts::HostsMapper;
pub use path::{FieldPath, FieldTable};
pub use services::ServicesMapper;
pub use upgrade::{UpgradeItemMapper, UpgradeMapper};

pub mod hosts;
pub mod path;
pub mod services;
pub mod upgrade;

pub type SharedContext = Arc<RwLock<MapContext>>;

/// Which part of the UI the data is being fetched for.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum View {
    #[default]
    HostList,
    HostDetails(String),
    Other,
}

/// State outside the payload that mappers consult.
#[derive(Debug, Clone, Default)]
pub struct MapContext {
    pub cluster_name: Option<String>,
    pub selected_hosts: HashSet<String>,
    pub supports: Supports,
    pub view: View,
}

impl MapContext {
    pub fn from_config(config: &SyncConfig) -> MapContext {
        MapContext {
            supports: config.supports.clone(),
            ..Default::default()
        }
    }

    pub fn shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }

    pub fn in_host_details(&self) -> bool {
        matches!(self.view, View::HostDetails(_))
    }
}

/// Output of one mapping pass, grouped in commit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapped {
    pub records: Vec<Record>,
    pub item_total: Option<u64>,
}

impl Mapped {
    pub fn of_kind(&self, kind: RecordKind) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    pub fn take_kind(&mut self, kind: RecordKind) -> Vec<Record> {
        let (taken, kept) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| r.kind == kind);
        self.records = kept;
        taken
    }
}

/// A transformation from one API payload shape into normalized records.
pub trait Mapper: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pure mapping; never touches the store.
    fn map(&self, payload: &Value, ctx: &MapContext) -> Mapped;

    /// Writes a mapping result into the store. The default upserts every kind
    /// in the order it first appears.
    fn commit(&self, mut mapped: Mapped, _ctx: &MapContext, store: &mut RecordStore) -> Result<()> {
        let mut kinds: Vec<RecordKind> = vec![];
        for record in &mapped.records {
            if !kinds.contains(&record.kind) {
                kinds.push(record.kind);
            }
        }
        for kind in kinds {
            store.upsert_many(kind, mapped.take_kind(kind))?;
        }
        Ok(())
    }

    /// Maps `payload` and, unless `return_only` is set, commits the result.
    fn apply(&self, payload: &Value, ctx: &MapContext, store: &mut RecordStore, return_only: bool) -> Result<Mapped> {
        let mapped = self.map(payload, ctx);
        if !return_only {
            self.commit(mapped.clone(), ctx, store)?;
        }
        Ok(mapped)
    }
}

/// `CRITICAL + WARNING`, each missing counter (or summary) counting as zero.
pub fn critical_warning_count(alerts_summary: Option<&Value>) -> u64 {
    match alerts_summary {
        Some(summary) => {
            let count = |name: &str| summary.get(name).and_then(Value::as_u64).unwrap_or(0);
            count("CRITICAL") + count("WARNING")
        }
        None => 0,
    }
}

/// Elements of `payload.items`, or nothing for any other shape.
pub fn items(payload: &Value) -> &[Value] {
    payload
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
