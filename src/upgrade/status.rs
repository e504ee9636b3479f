use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

/// Status shared by upgrades, groups, items and tasks.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeStatus {
    Pending,
    Queued,
    InProgress,
    Completed,
    Aborted,
    Holding,
    HoldingFailed,
    HoldingTimedout,
    Failed,
    #[serde(alias = "TIMEDOUT")]
    TimedOut,
}

impl UpgradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeStatus::Pending => "PENDING",
            UpgradeStatus::Queued => "QUEUED",
            UpgradeStatus::InProgress => "IN_PROGRESS",
            UpgradeStatus::Completed => "COMPLETED",
            UpgradeStatus::Aborted => "ABORTED",
            UpgradeStatus::Holding => "HOLDING",
            UpgradeStatus::HoldingFailed => "HOLDING_FAILED",
            UpgradeStatus::HoldingTimedout => "HOLDING_TIMEDOUT",
            UpgradeStatus::Failed => "FAILED",
            UpgradeStatus::TimedOut => "TIMED_OUT",
        }
    }

    /// Unknown strings read as PENDING.
    pub fn parse_lossy(s: &str) -> UpgradeStatus {
        match s.parse() {
            Ok(status) => status,
            Err(_) => {
                warn!("Unknown upgrade status {:?}, treating it as PENDING", s);
                UpgradeStatus::Pending
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, UpgradeStatus::Pending | UpgradeStatus::Aborted)
    }

    pub fn is_running(&self) -> bool {
        *self == UpgradeStatus::InProgress
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            UpgradeStatus::HoldingFailed | UpgradeStatus::HoldingTimedout | UpgradeStatus::Failed | UpgradeStatus::TimedOut
        )
    }

    /// Statuses that make a group the active one.
    pub fn is_group_active(&self) -> bool {
        self.is_failed() || matches!(self, UpgradeStatus::Holding | UpgradeStatus::InProgress)
    }

    pub fn is_visible(&self) -> bool {
        *self != UpgradeStatus::Pending
    }

    pub fn is_holding(&self) -> bool {
        matches!(
            self,
            UpgradeStatus::Holding | UpgradeStatus::HoldingFailed | UpgradeStatus::HoldingTimedout
        )
    }

    /// Status an item moves to when its failure is ignored.
    pub fn continue_target(&self) -> Option<UpgradeStatus> {
        match self {
            UpgradeStatus::HoldingFailed => Some(UpgradeStatus::Failed),
            UpgradeStatus::HoldingTimedout => Some(UpgradeStatus::TimedOut),
            _ => None,
        }
    }
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpgradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("Unknown upgrade status: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("HOLDING_TIMEDOUT".parse::<UpgradeStatus>(), Ok(UpgradeStatus::HoldingTimedout));
        assert_eq!("TIMED_OUT".parse::<UpgradeStatus>(), Ok(UpgradeStatus::TimedOut));
        assert_eq!("TIMEDOUT".parse::<UpgradeStatus>(), Ok(UpgradeStatus::TimedOut));
        assert_eq!(UpgradeStatus::parse_lossy("SKIPPED_FAILED"), UpgradeStatus::Pending);
        assert_eq!(UpgradeStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_predicates() {
        assert!(!UpgradeStatus::Pending.is_active());
        assert!(!UpgradeStatus::Aborted.is_active());
        assert!(UpgradeStatus::Completed.is_active());
        assert!(UpgradeStatus::InProgress.is_running());
        assert!(UpgradeStatus::TimedOut.is_failed());
        assert!(!UpgradeStatus::Holding.is_failed());
        assert!(UpgradeStatus::Holding.is_group_active());
        assert!(!UpgradeStatus::Completed.is_group_active());
        assert!(!UpgradeStatus::Pending.is_visible());
    }

    #[test]
    fn test_continue_table() {
        assert_eq!(UpgradeStatus::HoldingFailed.continue_target(), Some(UpgradeStatus::Failed));
        assert_eq!(UpgradeStatus::HoldingTimedout.continue_target(), Some(UpgradeStatus::TimedOut));
        assert_eq!(UpgradeStatus::Failed.continue_target(), None);
        assert_eq!(UpgradeStatus::Holding.continue_target(), None);
    }
}
