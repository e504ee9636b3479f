use serde_json::Value;

use crate::store::{Record, RecordKind, RecordStore};
use crate::upgrade::status::UpgradeStatus;

pub const SUBITEM_FAILED: &str = "SUBITEM_FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Group,
    Item,
    Task,
}

/// One node of the upgrade tree with its children resolved from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeEntity {
    pub id: String,
    pub entity_type: EntityType,
    pub status: UpgradeStatus,
    pub progress_percent: f64,
    pub title: Option<String>,
    pub context: Option<String>,
    pub group_id: Option<String>,
    pub command_detail: Option<String>,
    pub host_name: Option<String>,
    pub children: Vec<UpgradeEntity>,
}

fn attribute_string(record: &Record, name: &str) -> Option<String> {
    match record.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl UpgradeEntity {
    fn from_record(record: &Record, entity_type: EntityType, children: Vec<UpgradeEntity>) -> UpgradeEntity {
        UpgradeEntity {
            id: record.id.clone(),
            entity_type,
            status: UpgradeStatus::parse_lossy(record.get_str("status").unwrap_or("PENDING")),
            progress_percent: record.get_f64("progress_percent").unwrap_or(0.0),
            title: record.get_str("title").map(str::to_string),
            context: record.get_str("context").map(str::to_string),
            group_id: attribute_string(record, "group_id"),
            command_detail: record.get_str("command_detail").map(str::to_string),
            host_name: record.get_str("host_name").map(str::to_string),
            children,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    pub fn is_visible(&self) -> bool {
        self.status.is_visible()
    }

    pub fn progress(&self) -> u64 {
        self.progress_percent.max(0.0).floor() as u64
    }

    pub fn is_expandable_item(&self) -> bool {
        self.entity_type == EntityType::Item && self.is_active() && self.status != UpgradeStatus::Completed
    }

    pub fn has_expandable_items(&self) -> bool {
        self.children.iter().any(UpgradeEntity::is_expandable_item)
    }

    pub fn is_expandable_group(&self) -> bool {
        self.entity_type == EntityType::Group && (self.is_active() || self.has_expandable_items())
    }

    /// A group that settled while an item still needs attention reports
    /// SUBITEM_FAILED instead of its own status.
    pub fn display_status(&self) -> &'static str {
        let settled = !self.is_active() || self.status == UpgradeStatus::Completed;
        if self.entity_type == EntityType::Group && settled && self.has_expandable_items() {
            SUBITEM_FAILED
        } else {
            self.status.as_str()
        }
    }
}

/// Snapshot of one upgrade read out of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeTree {
    pub upgrade_id: String,
    pub request_status: UpgradeStatus,
    pub progress_percent: f64,
    pub direction: Option<String>,
    pub groups: Vec<UpgradeEntity>,
}

impl UpgradeTree {
    pub fn from_store(store: &RecordStore, upgrade_id: &str) -> Option<UpgradeTree> {
        let upgrade = store.find(RecordKind::Upgrade, upgrade_id)?;
        let groups = upgrade
            .refs("upgrade_groups")
            .iter()
            .filter_map(|group_id| store.find(RecordKind::UpgradeGroup, group_id))
            .map(|group| {
                let items = group
                    .refs("upgrade_items")
                    .iter()
                    .filter_map(|item_id| store.find(RecordKind::UpgradeItem, item_id))
                    .map(|item| {
                        let tasks = item
                            .refs("tasks")
                            .iter()
                            .filter_map(|task_id| store.find(RecordKind::UpgradeTask, task_id))
                            .map(|task| UpgradeEntity::from_record(task, EntityType::Task, vec![]))
                            .collect();
                        let mut item = UpgradeEntity::from_record(item, EntityType::Item, tasks);
                        if item.group_id.is_none() {
                            item.group_id = Some(group.id.clone());
                        }
                        item
                    })
                    .collect();
                UpgradeEntity::from_record(group, EntityType::Group, items)
            })
            .collect();

        Some(UpgradeTree {
            upgrade_id: upgrade.id.clone(),
            request_status: UpgradeStatus::parse_lossy(upgrade.get_str("request_status").unwrap_or("PENDING")),
            progress_percent: upgrade.get_f64("progress_percent").unwrap_or(0.0),
            direction: upgrade.get_str("direction").map(str::to_string),
            groups,
        })
    }

    pub fn is_downgrade(&self) -> bool {
        self.direction.as_deref() == Some("DOWNGRADE")
    }

    pub fn overall_progress(&self) -> u64 {
        self.progress_percent.max(0.0).floor() as u64
    }

    pub fn visible_groups(&self) -> impl Iterator<Item = &UpgradeEntity> {
        self.groups.iter().filter(|g| g.is_visible())
    }

    pub fn active_group(&self) -> Option<&UpgradeEntity> {
        self.groups.iter().find(|g| g.status.is_group_active())
    }

    fn active_item(&self, predicate: impl Fn(&UpgradeEntity) -> bool) -> Option<&UpgradeEntity> {
        self.active_group()?.children.iter().find(|item| predicate(*item))
    }

    pub fn running_item(&self) -> Option<&UpgradeEntity> {
        self.active_item(UpgradeEntity::is_running)
    }

    pub fn failed_item(&self) -> Option<&UpgradeEntity> {
        self.active_item(UpgradeEntity::is_failed)
    }

    pub fn manual_item(&self) -> Option<&UpgradeEntity> {
        self.active_item(|item| item.status == UpgradeStatus::Holding)
    }

    pub fn find_item(&self, stage_id: &str) -> Option<&UpgradeEntity> {
        self.groups
            .iter()
            .flat_map(|g| g.children.iter())
            .find(|item| item.id == stage_id)
    }

    /// Running task of the running item, else the failed task of the failed item.
    pub fn task_details(&self) -> Option<&UpgradeEntity> {
        if let Some(item) = self.running_item() {
            item.children.iter().find(|t| t.is_running())
        } else if let Some(item) = self.failed_item() {
            item.children.iter().find(|t| t.is_failed())
        } else {
            None
        }
    }

    /// The failed item can be retried or skipped.
    pub fn is_holding_state(&self) -> bool {
        self.failed_item().map(|item| item.status.is_holding()).unwrap_or(false)
    }

    pub fn is_finalize_item(&self, finalize_context: &str) -> bool {
        self.manual_item().and_then(|item| item.context.as_deref()) == Some(finalize_context)
    }

    pub fn no_active_item(&self) -> bool {
        self.failed_item().is_none()
            && self.running_item().is_none()
            && self.manual_item().is_none()
            && !matches!(self.request_status, UpgradeStatus::Completed | UpgradeStatus::Aborted)
    }

    pub fn status_label(&self) -> String {
        let state = match self.request_status {
            UpgradeStatus::Queued | UpgradeStatus::Pending | UpgradeStatus::InProgress => "in Progress",
            UpgradeStatus::Completed => "Finished",
            UpgradeStatus::Aborted => "Aborted",
            UpgradeStatus::TimedOut
            | UpgradeStatus::Failed
            | UpgradeStatus::HoldingFailed
            | UpgradeStatus::HoldingTimedout
            | UpgradeStatus::Holding => "Paused",
        };
        let action = if self.is_downgrade() { "Downgrade" } else { "Upgrade" };
        format!("{} {}", action, state)
    }
}
