use log::{debug, warn};
use serde_json::{json, Value};

use crate::common::error::Result;
use crate::common::util::id_string;
use crate::mapper::{FieldTable, MapContext, Mapped, Mapper};
use crate::store::{Record, RecordKind, RecordStore};

const UPGRADE_FIELDS: &[(&str, &str)] = &[
    ("request_id", "Upgrade.request_id"),
    ("request_status", "Upgrade.request_status"),
    ("progress_percent", "Upgrade.progress_percent"),
    ("direction", "Upgrade.direction"),
    ("from_version", "Upgrade.from_version"),
    ("to_version", "Upgrade.to_version"),
];

const GROUP_FIELDS: &[(&str, &str)] = &[
    ("group_id", "UpgradeGroup.group_id"),
    ("name", "UpgradeGroup.name"),
    ("title", "UpgradeGroup.title"),
    ("status", "UpgradeGroup.status"),
    ("progress_percent", "UpgradeGroup.progress_percent"),
    ("request_id", "UpgradeGroup.request_id"),
];

const ITEM_FIELDS: &[(&str, &str)] = &[
    ("stage_id", "UpgradeItem.stage_id"),
    ("group_id", "UpgradeItem.group_id"),
    ("request_id", "UpgradeItem.request_id"),
    ("status", "UpgradeItem.status"),
    ("progress_percent", "UpgradeItem.progress_percent"),
    ("context", "UpgradeItem.context"),
    ("text", "UpgradeItem.text"),
];

const TASK_FIELDS: &[(&str, &str)] = &[
    ("id", "Tasks.id"),
    ("status", "Tasks.status"),
    ("progress_percent", "Tasks.progress_percent"),
    ("command_detail", "Tasks.command_detail"),
    ("host_name", "Tasks.host_name"),
    ("role", "Tasks.role"),
    ("stage_id", "Tasks.stage_id"),
    ("request_id", "Tasks.request_id"),
];

/// Field tables shared by both upgrade mappers.
struct UpgradeTables {
    upgrade: FieldTable,
    group: FieldTable,
    item: FieldTable,
    task: FieldTable,
}

impl UpgradeTables {
    fn new() -> UpgradeTables {
        UpgradeTables {
            upgrade: FieldTable::new(UPGRADE_FIELDS),
            group: FieldTable::new(GROUP_FIELDS),
            item: FieldTable::new(ITEM_FIELDS),
            task: FieldTable::new(TASK_FIELDS),
        }
    }

    fn map_tasks(&self, tasks: &[Value], mapped: &mut Mapped) -> Vec<String> {
        let mut ids = vec![];
        for task in tasks {
            let Some(id) = task.pointer("/Tasks/id").and_then(id_string) else {
                warn!("Skipping upgrade task without Tasks.id");
                continue;
            };
            let mut record = Record::with_attributes(RecordKind::UpgradeTask, id.clone(), self.task.apply(task));
            record.set("type", "TASK");
            ids.push(id);
            mapped.records.push(record);
        }
        ids
    }

    /// Maps one `{UpgradeItem, tasks}` element. Task refs are only set when
    /// the payload carries `tasks`.
    fn map_item(&self, item: &Value, group_id: Option<&Value>, mapped: &mut Mapped) -> Option<String> {
        let Some(id) = item.pointer("/UpgradeItem/stage_id").and_then(id_string) else {
            warn!("Skipping upgrade item without UpgradeItem.stage_id");
            return None;
        };
        let mut record = Record::with_attributes(RecordKind::UpgradeItem, id.clone(), self.item.apply(item));
        record.set("type", "ITEM");
        if record.get("group_id").is_none() {
            if let Some(group_id) = group_id {
                record.set("group_id", group_id.clone());
            }
        }
        if let Some(tasks) = item.get("tasks").and_then(Value::as_array) {
            let task_ids = self.map_tasks(tasks, mapped);
            record.set_refs("tasks", task_ids);
        }
        mapped.records.push(record);
        Some(id)
    }
}

/// Items without a `tasks` list, or without a group id, keep what the store
/// already holds for them.
fn carry_over_items(items: Vec<Record>, store: &RecordStore) -> Vec<Record> {
    items
        .into_iter()
        .map(|mut item| {
            if let Some(existing) = store.find(RecordKind::UpgradeItem, &item.id) {
                if !item.references.contains_key("tasks") {
                    item.set_refs("tasks", existing.refs("tasks").to_vec());
                }
                if item.get("group_id").is_none() {
                    if let Some(group_id) = existing.get("group_id") {
                        item.set("group_id", group_id.clone());
                    }
                }
            }
            item
        })
        .collect()
}

fn commit_upgrade_records(mut mapped: Mapped, store: &mut RecordStore) -> Result<()> {
    store.upsert_many(RecordKind::UpgradeTask, mapped.take_kind(RecordKind::UpgradeTask))?;
    let items = carry_over_items(mapped.take_kind(RecordKind::UpgradeItem), store);
    store.upsert_many(RecordKind::UpgradeItem, items)?;
    store.upsert_many(RecordKind::UpgradeGroup, mapped.take_kind(RecordKind::UpgradeGroup))?;
    store.upsert_many(RecordKind::Upgrade, mapped.take_kind(RecordKind::Upgrade))?;
    Ok(())
}

/// Maps the full upgrade payload: `Upgrade` plus nested
/// `upgrade_groups[].upgrade_items[].tasks[]`.
pub struct UpgradeMapper {
    tables: UpgradeTables,
}

impl Default for UpgradeMapper {
    fn default() -> Self {
        UpgradeMapper::new()
    }
}

impl UpgradeMapper {
    pub fn new() -> UpgradeMapper {
        UpgradeMapper {
            tables: UpgradeTables::new(),
        }
    }
}

impl Mapper for UpgradeMapper {
    fn name(&self) -> &'static str {
        "upgrade"
    }

    fn map(&self, payload: &Value, _ctx: &MapContext) -> Mapped {
        let mut mapped = Mapped::default();
        let Some(upgrade_id) = payload.pointer("/Upgrade/request_id").and_then(id_string) else {
            warn!("Upgrade payload has no Upgrade.request_id");
            return mapped;
        };

        let mut group_ids = vec![];
        for group in payload
            .get("upgrade_groups")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let group_id_value = group.pointer("/UpgradeGroup/group_id");
            let Some(group_id) = group_id_value.and_then(id_string) else {
                warn!("Skipping upgrade group without UpgradeGroup.group_id");
                continue;
            };
            let mut item_ids = vec![];
            for item in group.get("upgrade_items").and_then(Value::as_array).into_iter().flatten() {
                if let Some(item_id) = self.tables.map_item(item, group_id_value, &mut mapped) {
                    item_ids.push(item_id);
                }
            }
            let mut record = Record::with_attributes(RecordKind::UpgradeGroup, group_id.clone(), self.tables.group.apply(group));
            record.set("type", "GROUP");
            record.set_refs("upgrade_items", item_ids);
            mapped.records.push(record);
            group_ids.push(group_id);
        }

        let mut upgrade = Record::with_attributes(RecordKind::Upgrade, upgrade_id, self.tables.upgrade.apply(payload));
        upgrade.set_refs("upgrade_groups", group_ids);
        mapped.records.push(upgrade);
        debug!("upgrade mapper produced {} records", mapped.records.len());
        mapped
    }

    fn commit(&self, mapped: Mapped, _ctx: &MapContext, store: &mut RecordStore) -> Result<()> {
        commit_upgrade_records(mapped, store)
    }
}

/// Maps a single `{UpgradeItem, tasks}` payload from the nested details poll.
pub struct UpgradeItemMapper {
    tables: UpgradeTables,
}

impl Default for UpgradeItemMapper {
    fn default() -> Self {
        UpgradeItemMapper::new()
    }
}

impl UpgradeItemMapper {
    pub fn new() -> UpgradeItemMapper {
        UpgradeItemMapper {
            tables: UpgradeTables::new(),
        }
    }
}

impl Mapper for UpgradeItemMapper {
    fn name(&self) -> &'static str {
        "upgrade_item"
    }

    fn map(&self, payload: &Value, _ctx: &MapContext) -> Mapped {
        let mut mapped = Mapped::default();
        self.tables.map_item(payload, None, &mut mapped);
        mapped
    }

    fn commit(&self, mapped: Mapped, _ctx: &MapContext, store: &mut RecordStore) -> Result<()> {
        commit_upgrade_records(mapped, store)
    }
}

/// Builds `{"UpgradeItem":{"status": <status>}}` for the item status update.
pub fn item_status_body(status: &str) -> Value {
    json!({"UpgradeItem": {"status": status}})
}
