use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::{Record, RecordKind};

pub const PASSIVE_STATE_OFF: &str = "OFF";

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkStatus {
    Init,
    Installing,
    Installed,
    Starting,
    Started,
    Stopping,
    InstallFailed,
    UpgradeFailed,
    Unknown,
    Disabled,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Init => "INIT",
            WorkStatus::Installing => "INSTALLING",
            WorkStatus::Installed => "INSTALLED",
            WorkStatus::Starting => "STARTING",
            WorkStatus::Started => "STARTED",
            WorkStatus::Stopping => "STOPPING",
            WorkStatus::InstallFailed => "INSTALL_FAILED",
            WorkStatus::UpgradeFailed => "UPGRADE_FAILED",
            WorkStatus::Unknown => "UNKNOWN",
            WorkStatus::Disabled => "DISABLED",
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, WorkStatus::Started | WorkStatus::Starting)
    }

    /// INSTALLED is reported for a stopped component.
    pub fn is_stop(&self) -> bool {
        *self == WorkStatus::Installed
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, WorkStatus::Starting | WorkStatus::Stopping)
    }

    pub fn no_action_available(&self) -> bool {
        matches!(
            self,
            WorkStatus::Starting | WorkStatus::Stopping | WorkStatus::Unknown | WorkStatus::Disabled
        )
    }

    pub fn is_delete_disabled(&self) -> bool {
        !matches!(
            self,
            WorkStatus::Installed
                | WorkStatus::Unknown
                | WorkStatus::InstallFailed
                | WorkStatus::UpgradeFailed
                | WorkStatus::Init
        )
    }

    pub fn is_restart_disabled(&self) -> bool {
        *self != WorkStatus::Started
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("Unknown work status: {}", s))
    }
}

pub fn host_component_id(component_name: &str, host_name: &str) -> String {
    format!("{}_{}", component_name, host_name)
}

/// Typed view over a HostComponent record.
#[derive(Debug, Clone, PartialEq)]
pub struct HostComponentState {
    pub id: String,
    pub component_name: String,
    pub host_name: String,
    pub work_status: Option<WorkStatus>,
    pub passive_state: Option<String>,
    pub stale_configs: bool,
}

impl HostComponentState {
    pub fn from_record(record: &Record) -> Option<HostComponentState> {
        if record.kind != RecordKind::HostComponent {
            return None;
        }
        Some(HostComponentState {
            id: record.id.clone(),
            component_name: record.get_str("component_name")?.to_string(),
            host_name: record.get_str("host_name")?.to_string(),
            work_status: record.get_str("work_status").and_then(|s| s.parse().ok()),
            passive_state: record.get_str("passive_state").map(str::to_string),
            stale_configs: record.get_bool("stale_configs"),
        })
    }

    /// Maintenance mode is off; alerts and actions apply.
    pub fn is_active(&self) -> bool {
        self.passive_state.as_deref() == Some(PASSIVE_STATE_OFF)
    }
}
