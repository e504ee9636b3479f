use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Host,
    HostComponent,
    StackVersion,
    Service,
    Upgrade,
    UpgradeGroup,
    UpgradeItem,
    UpgradeTask,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A normalized entity. Cross references are kept as id lists, never as
/// embedded records.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub kind: RecordKind,
    pub attributes: Map<String, Value>,
    pub references: BTreeMap<String, Vec<String>>,
}

impl Record {
    pub fn new(kind: RecordKind, id: impl Into<String>) -> Record {
        Record {
            id: id.into(),
            kind,
            attributes: Map::new(),
            references: BTreeMap::new(),
        }
    }

    pub fn with_attributes(kind: RecordKind, id: impl Into<String>, attributes: Map<String, Value>) -> Record {
        Record {
            attributes,
            ..Record::new(kind, id)
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    /// Ids held under `name`; an unknown list reads as empty.
    pub fn refs(&self, name: &str) -> &[String] {
        self.references.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_refs(&mut self, name: &str, ids: Vec<String>) {
        self.references.insert(name.to_string(), ids);
    }
}
