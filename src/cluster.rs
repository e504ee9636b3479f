//! Cluster-wide session state: cluster name, stack version, server clock and
//! the progress of the initial data load.

use std::cmp::Ordering;

use chrono::Utc;
use futures::future::LocalBoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};

use crate::ambari::model::{Clusters, ServerClock, StackVersions};
use crate::common::config::SyncConfig;
use crate::common::error::{Result, SyncError};
use crate::common::util::compare_versions;
use crate::http::{HttpClient, RequestOptions};
use crate::mapper::{HostsMapper, ServicesMapper, SharedContext};

pub const LOAD_CLUSTER: &str = "cluster";
pub const LOAD_SERVICES: &str = "services";
pub const LOAD_HOSTS: &str = "hosts";
pub const LOAD_STACK_VERSIONS: &str = "stack_versions";
pub const LOAD_SERVER_CLOCK: &str = "server_clock";

const SERVICES_PATH: &str = "/services?fields=ServiceInfo/state,ServiceInfo/maintenance_state,\
    components/host_components/HostRoles/component_name,components/host_components/HostRoles/host_name,\
    alerts_summary";
const HOSTS_PATH: &str = "/hosts";
const HOSTS_PARAMS: &str = "fields=Hosts/host_name,Hosts/maintenance_state,Hosts/public_host_name,\
    Hosts/cpu_count,Hosts/ph_cpu_count,Hosts/host_status,Hosts/last_heartbeat_time,Hosts/ip,\
    host_components/HostRoles/state,host_components/HostRoles/maintenance_state,\
    host_components/HostRoles/stale_configs,host_components/HostRoles/service_name,\
    host_components/HostRoles/desired_admin_state,metrics/disk,metrics/load/load_one,\
    Hosts/total_mem,Hosts/os_arch,Hosts/os_type,Hosts/rack_info,alerts_summary,\
    stack_versions/HostStackVersions,stack_versions/repository_versions/RepositoryVersions/repository_version,\
    stack_versions/repository_versions/RepositoryVersions/id,\
    stack_versions/repository_versions/RepositoryVersions/display_name&minimal_response=true";

/// Minimum HDP repository version that ships storm metrics.
const STORM_METRICS_MIN_REPO_VERSION: &str = "2.2.2";

/// Server calls the session makes.
pub trait ClusterApi {
    async fn fetch_clusters(&self) -> Result<Clusters>;
    async fn fetch_server_clock(&self) -> Result<ServerClock>;
    async fn fetch_repository_versions(&self, stack_name: &str, stack_version: &str) -> Result<StackVersions>;
    async fn update_cluster(&self, cluster_name: &str, body: &Value) -> Result<()>;
}

impl ClusterApi for HttpClient {
    async fn fetch_clusters(&self) -> Result<Clusters> {
        self.get_json(&format!("{}/clusters?fields=Clusters/cluster_name,Clusters/version", self.api_prefix()))
            .await
    }

    async fn fetch_server_clock(&self) -> Result<ServerClock> {
        self.get_json(&format!(
            "{}/services/AMBARI/components/AMBARI_SERVER?fields=RootServiceComponents/server_clock",
            self.api_prefix()
        ))
        .await
    }

    async fn fetch_repository_versions(&self, stack_name: &str, stack_version: &str) -> Result<StackVersions> {
        let url = self
            .cluster_url(&format!(
                "/stack_versions?fields=repository_versions/RepositoryVersions/repository_version\
                 &ClusterStackVersions/stack={}&ClusterStackVersions/version={}",
                stack_name, stack_version
            ))
            .await?;
        self.get_json(&url).await
    }

    async fn update_cluster(&self, cluster_name: &str, body: &Value) -> Result<()> {
        self.put_json(&format!("{}/clusters/{}", self.api_prefix(), cluster_name), body)
            .await
    }
}

/// Named load flags; the session is loaded once every flag is set.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadStatus {
    flags: Vec<(String, bool)>,
}

impl LoadStatus {
    pub fn new(names: &[&str]) -> LoadStatus {
        LoadStatus {
            flags: names.iter().map(|name| (name.to_string(), false)).collect(),
        }
    }

    pub fn update(&mut self, name: &str) {
        match self.flags.iter_mut().find(|(flag, _)| flag == name) {
            Some((_, loaded)) => *loaded = true,
            None => warn!("Unknown load flag {}", name),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.flags.iter().all(|(_, loaded)| *loaded)
    }

    pub fn is_flag_loaded(&self, name: &str) -> bool {
        self.flags.iter().any(|(flag, loaded)| flag == name && *loaded)
    }

    /// CSS width of the load progress bar.
    pub fn loaded_percent(&self) -> String {
        let loaded = self.flags.iter().filter(|(_, loaded)| *loaded).count();
        if loaded == 0 {
            return "width:0".to_string();
        }
        format!("width:{}%", loaded * 100 / self.flags.len())
    }
}

/// Server clock values with fewer than 13 digits are seconds.
pub fn normalize_server_clock(clock: i64) -> i64 {
    if clock.unsigned_abs() >= 1_000_000_000_000 {
        clock
    } else {
        clock * 1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StormMetricsCheck {
    Decided(bool),
    NeedsRepositoryVersion,
}

pub fn storm_metrics_check(stack_name: &str, stack_version_number: &str) -> StormMetricsCheck {
    if stack_name != "HDP" {
        return StormMetricsCheck::Decided(true);
    }
    match compare_versions(stack_version_number, "2.2") {
        Ordering::Less => StormMetricsCheck::Decided(false),
        Ordering::Greater => StormMetricsCheck::Decided(true),
        Ordering::Equal => StormMetricsCheck::NeedsRepositoryVersion,
    }
}

/// Decides from the first repository version; anything missing counts as
/// supported.
pub fn storm_metrics_from_repository(versions: &StackVersions) -> bool {
    let repository_version = versions
        .items
        .as_ref()
        .and_then(|items| items.first())
        .and_then(|item| item.repository_versions.as_ref())
        .and_then(|versions| versions.first())
        .and_then(|version| version.repository_versions.as_ref())
        .and_then(|info| info.repository_version.as_deref());
    match repository_version {
        Some(version) => compare_versions(version, STORM_METRICS_MIN_REPO_VERSION) != Ordering::Less,
        None => true,
    }
}

enum Loaded {
    Mapped,
    Clock(ServerClock),
    StormMetrics(bool),
}

pub struct ClusterSession<A: ClusterApi> {
    api: A,
    context: SharedContext,
    api_prefix: String,
    test_mode: bool,
    default_stack_version: String,
    cluster_name: Option<String>,
    current_stack_version: Option<String>,
    current_server_time: Option<i64>,
    clock_distance: Option<i64>,
    storm_metrics_supported: bool,
    load: LoadStatus,
}

impl<A: ClusterApi> ClusterSession<A> {
    pub fn new(api: A, context: SharedContext, config: &SyncConfig) -> ClusterSession<A> {
        ClusterSession {
            api,
            context,
            api_prefix: config.ambari.api_prefix.clone(),
            test_mode: config.test_mode,
            default_stack_version: config.default_stack_version.clone(),
            cluster_name: None,
            current_stack_version: None,
            current_server_time: None,
            clock_distance: None,
            storm_metrics_supported: true,
            load: LoadStatus::new(&[
                LOAD_CLUSTER,
                LOAD_SERVICES,
                LOAD_HOSTS,
                LOAD_STACK_VERSIONS,
                LOAD_SERVER_CLOCK,
            ]),
        }
    }

    pub fn with_load_flags(mut self, names: &[&str]) -> ClusterSession<A> {
        self.load = LoadStatus::new(names);
        self
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn set_cluster_name(&mut self, name: &str) {
        self.cluster_name = Some(name.to_string());
    }

    pub fn current_server_time(&self) -> Option<i64> {
        self.current_server_time
    }

    pub fn clock_distance(&self) -> Option<i64> {
        self.clock_distance
    }

    pub fn is_storm_metrics_supported(&self) -> bool {
        self.storm_metrics_supported
    }

    pub fn update_load_status(&mut self, name: &str) {
        self.load.update(name);
    }

    pub fn is_loaded(&self) -> bool {
        self.load.is_loaded()
    }

    pub fn loaded_percent(&self) -> String {
        self.load.loaded_percent()
    }

    pub fn load_status(&self) -> &LoadStatus {
        &self.load
    }

    /// Test mode serves canned files; otherwise `url` is scoped to the cluster.
    pub fn get_url(&self, test_url: &str, url: &str) -> String {
        if self.test_mode {
            test_url.to_string()
        } else {
            format!(
                "{}/clusters/{}{}",
                self.api_prefix,
                self.cluster_name().unwrap_or_default(),
                url
            )
        }
    }

    pub fn current_stack_version(&self) -> &str {
        self.current_stack_version
            .as_deref()
            .filter(|version| !version.is_empty())
            .unwrap_or(&self.default_stack_version)
    }

    /// `HDP` for `HDP-2.2`.
    pub fn current_stack_name(&self) -> &str {
        let version = self.current_stack_version();
        version.split_once('-').map(|(name, _)| name).unwrap_or(version)
    }

    /// `2.2` for `HDP-2.2`.
    pub fn current_stack_version_number(&self) -> &str {
        self.current_stack_version()
            .split_once('-')
            .map(|(_, number)| number)
            .unwrap_or_default()
    }

    pub fn stack_version_url(&self) -> String {
        format!(
            "/stacks/{}/versions/{}",
            self.current_stack_name(),
            self.current_stack_version_number()
        )
    }

    pub fn is_hadoop2_stack(&self) -> bool {
        compare_versions(self.current_stack_version_number(), "2.0") != Ordering::Less
    }

    /// Returns the cached cluster name unless `reload` is set or none is
    /// known yet.
    pub async fn load_cluster_name(&mut self, reload: bool) -> Result<String> {
        if let (Some(name), false) = (self.cluster_name(), reload) {
            return Ok(name.to_string());
        }
        let clusters = self.api.fetch_clusters().await?;
        self.reload_success(&clusters).await;
        match self.cluster_name() {
            Some(name) => Ok(name.to_string()),
            None => Err(SyncError::MissingData("server reported no cluster".to_string())),
        }
    }

    /// Adopts name and stack version of the first cluster in the payload.
    pub async fn reload_success(&mut self, clusters: &Clusters) {
        let Some(cluster) = clusters.items.first() else {
            warn!("Clusters payload has no items");
            return;
        };
        let info = &cluster.clusters;
        self.cluster_name = Some(info.cluster_name.clone());
        self.current_stack_version = info.version.clone();
        self.context.write().await.cluster_name = Some(info.cluster_name.clone());
        info!(
            "Cluster {} runs {}",
            info.cluster_name,
            self.current_stack_version()
        );
    }

    pub fn set_server_clock(&mut self, clock: &ServerClock) {
        if let Some((server_time, distance)) = clock_reading(clock) {
            self.current_server_time = Some(server_time);
            self.clock_distance = Some(distance);
        }
    }

    pub async fn check_detailed_repo_version(&mut self) -> bool {
        let supported = match storm_metrics_check(self.current_stack_name(), self.current_stack_version_number()) {
            StormMetricsCheck::Decided(supported) => supported,
            StormMetricsCheck::NeedsRepositoryVersion => {
                let stack_name = self.current_stack_name().to_string();
                let number = self.current_stack_version_number().to_string();
                repository_storm_support(&self.api, &stack_name, &number).await
            }
        };
        self.storm_metrics_supported = supported;
        supported
    }

    pub async fn create_kerberos_admin_session(&self, principal: &str, password: &str) -> Result<()> {
        let cluster_name = self
            .cluster_name()
            .ok_or_else(|| SyncError::MissingData("cluster name is not loaded yet".to_string()))?;
        let body = kerberos_admin_body(principal, password);
        self.api.update_cluster(cluster_name, &body).await
    }

    /// Loads services, hosts, stack version support and server clock
    /// concurrently, marking each flag as its load completes. A failed load
    /// is logged and leaves its flag unset.
    pub async fn load_cluster_data(&mut self, client: &HttpClient) -> Result<()> {
        self.load_cluster_name(false).await?;
        self.load.update(LOAD_CLUSTER);

        let services_url = self.get_url("/data/services.json", SERVICES_PATH);
        let hosts_url = self.get_url("/data/hosts.json", HOSTS_PATH);
        let stack_name = self.current_stack_name().to_string();
        let number = self.current_stack_version_number().to_string();
        let storm_check = storm_metrics_check(&stack_name, &number);

        let services_mapper = ServicesMapper::new();
        let hosts_mapper = HostsMapper::new();
        let default_options = RequestOptions::default();
        let hosts_options = RequestOptions::get_as_post(HOSTS_PARAMS);
        let api = &self.api;

        let mut loads: FuturesUnordered<LocalBoxFuture<'_, (&'static str, Result<Loaded>)>> = FuturesUnordered::new();
        loads.push(
            async {
                let result = client.fetch(&services_url, &services_mapper, &default_options).await;
                (LOAD_SERVICES, result.map(|_| Loaded::Mapped))
            }
            .boxed_local(),
        );
        loads.push(
            async {
                let result = client.fetch(&hosts_url, &hosts_mapper, &hosts_options).await;
                (LOAD_HOSTS, result.map(|_| Loaded::Mapped))
            }
            .boxed_local(),
        );
        loads.push(
            async {
                let supported = match storm_check {
                    StormMetricsCheck::Decided(supported) => supported,
                    StormMetricsCheck::NeedsRepositoryVersion => repository_storm_support(api, &stack_name, &number).await,
                };
                (LOAD_STACK_VERSIONS, Ok(Loaded::StormMetrics(supported)))
            }
            .boxed_local(),
        );
        loads.push(
            async {
                let result = api.fetch_server_clock().await;
                (LOAD_SERVER_CLOCK, result.map(Loaded::Clock))
            }
            .boxed_local(),
        );

        while let Some((name, result)) = loads.next().await {
            match result {
                Ok(Loaded::Mapped) => {}
                Ok(Loaded::Clock(clock)) => {
                    if let Some((server_time, distance)) = clock_reading(&clock) {
                        self.current_server_time = Some(server_time);
                        self.clock_distance = Some(distance);
                    }
                }
                Ok(Loaded::StormMetrics(supported)) => self.storm_metrics_supported = supported,
                Err(err) => {
                    error!("Failed to load {}: {}", name, err);
                    continue;
                }
            }
            self.load.update(name);
            debug!("Loaded {} ({})", name, self.load.loaded_percent());
        }
        Ok(())
    }
}

/// Normalized server time and its distance to the local clock, both in
/// milliseconds.
fn clock_reading(clock: &ServerClock) -> Option<(i64, i64)> {
    let server_time = normalize_server_clock(clock.root_service_components.server_clock?);
    Some((server_time, server_time.saturating_sub(Utc::now().timestamp_millis())))
}

async fn repository_storm_support<A: ClusterApi>(api: &A, stack_name: &str, number: &str) -> bool {
    match api.fetch_repository_versions(stack_name, number).await {
        Ok(versions) => storm_metrics_from_repository(&versions),
        Err(err) => {
            warn!("Could not read repository versions, assuming storm metrics: {}", err);
            true
        }
    }
}

pub fn kerberos_admin_body(principal: &str, password: &str) -> Value {
    json!([{
        "session_attributes": {
            "kerberos_admin": {"principal": principal, "password": password}
        }
    }])
}
