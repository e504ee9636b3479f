//! Stack-upgrade progress tracking and item status transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::ambari::model::ServiceChecks;
use crate::common::config::SyncConfig;
use crate::common::error::{Result, SyncError};
use crate::http::{HttpClient, KeepPolling, PollHandle, RequestOptions};
use crate::mapper::upgrade::item_status_body;
use crate::mapper::{UpgradeItemMapper, UpgradeMapper};
use crate::store::{RecordStore, SharedStore};

pub use entity::{EntityType, UpgradeEntity, UpgradeTree, SUBITEM_FAILED};
pub use status::UpgradeStatus;

pub mod entity;
pub mod status;

const SERVICE_CHECK_PREFIX: &str = "SERVICE_CHECK ";

/// Address of one upgrade item on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub upgrade_id: String,
    pub group_id: String,
    pub stage_id: String,
}

impl ItemRef {
    pub fn path(&self) -> String {
        format!(
            "/upgrades/{}/upgrade_groups/{}/upgrade_items/{}",
            self.upgrade_id, self.group_id, self.stage_id
        )
    }
}

/// Server operations the tracker needs.
pub trait UpgradeApi {
    async fn set_upgrade_item_status(&self, item: &ItemRef, status: UpgradeStatus) -> Result<()>;
    async fn poll_upgrade(&self, upgrade_id: &str, interval: Duration) -> Result<PollHandle>;
    async fn poll_upgrade_item(&self, item: &ItemRef, interval: Duration) -> Result<PollHandle>;
    async fn fetch_service_checks(&self, upgrade_id: &str) -> Result<Value>;
}

impl UpgradeApi for HttpClient {
    async fn set_upgrade_item_status(&self, item: &ItemRef, status: UpgradeStatus) -> Result<()> {
        let url = self.cluster_url(&item.path()).await?;
        info!("Setting upgrade item {} to {}", item.stage_id, status);
        self.put_json(&url, &item_status_body(status.as_str())).await
    }

    async fn poll_upgrade(&self, upgrade_id: &str, interval: Duration) -> Result<PollHandle> {
        let url = self
            .cluster_url(&format!(
                "/upgrades/{}?fields=Upgrade,upgrade_groups/UpgradeGroup,upgrade_groups/upgrade_items/UpgradeItem",
                upgrade_id
            ))
            .await?;
        Ok(self.get(&url, Arc::new(UpgradeMapper::new()), RequestOptions::default(), None, Some(interval)))
    }

    /// The poll ends by itself once the item is neither running nor failed.
    async fn poll_upgrade_item(&self, item: &ItemRef, interval: Duration) -> Result<PollHandle> {
        let url = self
            .cluster_url(&format!("{}?fields=UpgradeItem,tasks/Tasks/*", item.path()))
            .await?;
        let upgrade_id = item.upgrade_id.clone();
        let stage_id = item.stage_id.clone();
        let keep_polling: KeepPolling = Arc::new(move |store: &RecordStore| is_item_pollable(store, &upgrade_id, &stage_id));
        Ok(self.get_while(
            &url,
            Arc::new(UpgradeItemMapper::new()),
            RequestOptions::default(),
            interval,
            keep_polling,
        ))
    }

    async fn fetch_service_checks(&self, upgrade_id: &str) -> Result<Value> {
        let url = self
            .cluster_url(&format!(
                "/upgrades/{}/upgrade_groups?upgrade_items/tasks/Tasks/command=SERVICE_CHECK\
                 &upgrade_items/tasks/Tasks/status.in(FAILED,ABORTED,TIMEDOUT)\
                 &fields=upgrade_items/tasks/Tasks/command_detail&minimal_response=true",
                upgrade_id
            ))
            .await?;
        self.request(&url, &RequestOptions::default()).await
    }
}

/// True while `stage_id` is the running item of the upgrade, or its failed
/// item when nothing runs.
pub fn is_item_pollable(store: &RecordStore, upgrade_id: &str, stage_id: &str) -> bool {
    UpgradeTree::from_store(store, upgrade_id)
        .and_then(|tree| {
            tree.running_item()
                .or_else(|| tree.failed_item())
                .map(|item| item.id == stage_id)
        })
        .unwrap_or(false)
}

/// Service checks that were skipped, read from the last group of a
/// service-check payload, prefix stripped and deduplicated in order.
pub fn skipped_service_checks(payload: &Value) -> Vec<String> {
    let checks: ServiceChecks = match serde_json::from_value(payload.clone()) {
        Ok(checks) => checks,
        Err(err) => {
            warn!("Unexpected service check payload: {}", err);
            return vec![];
        }
    };

    let mut skipped: Vec<String> = vec![];
    let last_group = checks.items.as_ref().and_then(|items| items.last());
    for item in last_group.and_then(|g| g.upgrade_items.as_ref()).into_iter().flatten() {
        for task in item.tasks.iter().flatten() {
            let detail = task.tasks.as_ref().and_then(|t| t.command_detail.as_deref());
            if let Some(service) = detail.and_then(|d| d.strip_prefix(SERVICE_CHECK_PREFIX)) {
                if !skipped.iter().any(|s| s == service) {
                    skipped.push(service.to_string());
                }
            }
        }
    }
    skipped
}

struct ItemPoll {
    stage_id: String,
    handle: PollHandle,
}

impl ItemPoll {
    fn is_live(&self) -> bool {
        !self.handle.is_cancelled() && !self.handle.is_finished()
    }
}

/// Follows one upgrade: keeps the outer poll running, couples the nested task
/// poll to the details pane and submits item transitions.
pub struct UpgradeTracker<A: UpgradeApi> {
    api: A,
    store: SharedStore,
    upgrade_id: String,
    finalize_context: String,
    interval: Duration,
    request_in_progress: AtomicBool,
    details_opened: AtomicBool,
    manual_done: AtomicBool,
    skipped_service_checks: Mutex<Option<Vec<String>>>,
    upgrade_poll: Mutex<Option<PollHandle>>,
    item_poll: Mutex<Option<ItemPoll>>,
}

impl<A: UpgradeApi> UpgradeTracker<A> {
    pub fn new(api: A, store: SharedStore, upgrade_id: &str, config: &SyncConfig) -> UpgradeTracker<A> {
        UpgradeTracker {
            api,
            store,
            upgrade_id: upgrade_id.to_string(),
            finalize_context: config.finalize_context.clone(),
            interval: config.polling.update_interval(),
            request_in_progress: AtomicBool::new(false),
            details_opened: AtomicBool::new(false),
            manual_done: AtomicBool::new(false),
            skipped_service_checks: Mutex::new(None),
            upgrade_poll: Mutex::new(None),
            item_poll: Mutex::new(None),
        }
    }

    pub fn upgrade_id(&self) -> &str {
        &self.upgrade_id
    }

    /// Current snapshot of the tracked upgrade.
    pub async fn tree(&self) -> Result<UpgradeTree> {
        let store = self.store.read().await;
        UpgradeTree::from_store(&store, &self.upgrade_id)
            .ok_or_else(|| SyncError::MissingData(format!("upgrade {} is not loaded", self.upgrade_id)))
    }

    pub fn request_in_progress(&self) -> bool {
        self.request_in_progress.load(Ordering::SeqCst)
    }

    pub fn details_opened(&self) -> bool {
        self.details_opened.load(Ordering::SeqCst)
    }

    pub fn is_manual_done(&self) -> bool {
        self.manual_done.load(Ordering::SeqCst)
    }

    pub fn set_manual_done(&self, done: bool) {
        self.manual_done.store(done, Ordering::SeqCst);
    }

    pub fn is_manual_proceed_disabled(&self) -> bool {
        !self.is_manual_done() || self.request_in_progress()
    }

    async fn item_ref(&self, stage_id: &str) -> Result<(ItemRef, UpgradeStatus)> {
        let tree = self.tree().await?;
        let item = tree
            .find_item(stage_id)
            .ok_or_else(|| SyncError::MissingData(format!("upgrade item {} is not loaded", stage_id)))?;
        let group_id = item
            .group_id
            .clone()
            .ok_or_else(|| SyncError::MissingData(format!("upgrade item {} has no group", stage_id)))?;
        Ok((
            ItemRef {
                upgrade_id: self.upgrade_id.clone(),
                group_id,
                stage_id: item.id.clone(),
            },
            item.status,
        ))
    }

    /// Sends the new status. The local record keeps its old status until the
    /// next poll reports the change.
    async fn submit(&self, item: &ItemRef, status: UpgradeStatus) -> Result<()> {
        if self.request_in_progress.swap(true, Ordering::SeqCst) {
            return Err(SyncError::RequestInProgress);
        }
        let result = self.api.set_upgrade_item_status(item, status).await;
        self.request_in_progress.store(false, Ordering::SeqCst);
        if let Err(err) = &result {
            warn!("Failed to set upgrade item {} to {}: {}", item.stage_id, status, err);
        }
        result
    }

    /// Ignores a holding failure: HOLDING_FAILED → FAILED, HOLDING_TIMEDOUT →
    /// TIMED_OUT. Closes the details pane.
    pub async fn continue_item(&self, stage_id: &str) -> Result<()> {
        let (item, status) = self.item_ref(stage_id).await?;
        let target = status.continue_target().ok_or(SyncError::InvalidTransition {
            from: status,
            to: "FAILED/TIMED_OUT",
        })?;
        let result = self.submit(&item, target).await;
        self.close_details();
        result
    }

    /// Sends a failed item back to PENDING. Closes the details pane.
    pub async fn retry_item(&self, stage_id: &str) -> Result<()> {
        let (item, status) = self.item_ref(stage_id).await?;
        if !status.is_failed() {
            return Err(SyncError::InvalidTransition {
                from: status,
                to: UpgradeStatus::Pending.as_str(),
            });
        }
        let result = self.submit(&item, UpgradeStatus::Pending).await;
        self.close_details();
        result
    }

    /// Confirms a manual (HOLDING) step.
    pub async fn complete_item(&self, stage_id: &str) -> Result<()> {
        let (item, status) = self.item_ref(stage_id).await?;
        if status != UpgradeStatus::Holding {
            return Err(SyncError::InvalidTransition {
                from: status,
                to: UpgradeStatus::Completed.as_str(),
            });
        }
        let result = self.submit(&item, UpgradeStatus::Completed).await;
        self.set_manual_done(false);
        result
    }

    pub async fn start_polling(&self) -> Result<()> {
        if self.upgrade_poll.lock().map(|poll| poll.is_some()).unwrap_or(false) {
            return Ok(());
        }
        let handle = self.api.poll_upgrade(&self.upgrade_id, self.interval).await?;
        if let Ok(mut poll) = self.upgrade_poll.lock() {
            if let Some(previous) = poll.replace(handle) {
                previous.cancel();
            }
        }
        debug!("Started polling upgrade {}", self.upgrade_id);
        Ok(())
    }

    pub async fn open_details(&self) -> Result<()> {
        self.details_opened.store(true, Ordering::SeqCst);
        self.sync_item_polling().await
    }

    pub fn close_details(&self) {
        self.details_opened.store(false, Ordering::SeqCst);
        self.cancel_item_poll();
    }

    pub async fn toggle_details(&self) -> Result<()> {
        if self.details_opened() {
            self.close_details();
            Ok(())
        } else {
            self.open_details().await
        }
    }

    fn cancel_item_poll(&self) {
        if let Ok(mut poll) = self.item_poll.lock() {
            if let Some(previous) = poll.take() {
                debug!("Stopped polling upgrade item {}", previous.stage_id);
                previous.handle.cancel();
            }
        }
    }

    /// Keeps the nested task poll on the running (else failed) item while the
    /// details pane is open. The pane closes once nothing is active.
    pub async fn sync_item_polling(&self) -> Result<()> {
        let tree = self.tree().await?;
        if tree.no_active_item() {
            self.details_opened.store(false, Ordering::SeqCst);
        }
        let target = tree.running_item().or_else(|| tree.failed_item());

        let (Some(target), true) = (target, self.details_opened()) else {
            self.cancel_item_poll();
            return Ok(());
        };

        let already_polling = self
            .item_poll
            .lock()
            .map(|poll| {
                poll.as_ref()
                    .map(|p| p.stage_id == target.id && p.is_live())
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        if already_polling {
            return Ok(());
        }

        self.cancel_item_poll();
        let (item, _) = self.item_ref(&target.id).await?;
        let handle = self.api.poll_upgrade_item(&item, self.interval).await?;
        if let Ok(mut poll) = self.item_poll.lock() {
            *poll = Some(ItemPoll {
                stage_id: item.stage_id.clone(),
                handle,
            });
        }
        debug!("Started polling upgrade item {}", item.stage_id);
        Ok(())
    }

    /// Skipped service checks once the upgrade waits on the finalize step;
    /// `None` before that. Loaded once per finalize step.
    pub async fn load_skipped_service_checks(&self) -> Result<Option<Vec<String>>> {
        let tree = self.tree().await?;
        if !tree.is_finalize_item(&self.finalize_context) {
            if let Ok(mut cached) = self.skipped_service_checks.lock() {
                *cached = None;
            }
            return Ok(None);
        }
        let cached = self.skipped_service_checks.lock().ok().and_then(|c| c.clone());
        if cached.is_some() {
            return Ok(cached);
        }
        let payload = self.api.fetch_service_checks(&self.upgrade_id).await?;
        let skipped = skipped_service_checks(&payload);
        if let Ok(mut cached) = self.skipped_service_checks.lock() {
            *cached = Some(skipped.clone());
        }
        Ok(Some(skipped))
    }

    pub fn stop_polling(&self) {
        if let Ok(mut poll) = self.upgrade_poll.lock() {
            if let Some(handle) = poll.take() {
                handle.cancel();
            }
        }
        self.cancel_item_poll();
        debug!("Stopped polling upgrade {}", self.upgrade_id);
    }

    /// False once the nested poll has been cancelled or has ended by itself.
    pub fn is_item_polling(&self) -> bool {
        self.item_poll
            .lock()
            .map(|poll| poll.as_ref().map(|p| p.is_live()).unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn is_polling(&self) -> bool {
        self.upgrade_poll.lock().map(|poll| poll.is_some()).unwrap_or(false)
    }
}
