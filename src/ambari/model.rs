use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct ClusterInfo {
    pub cluster_name: String,
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ClusterItem {
    #[serde(rename = "Clusters")]
    pub clusters: ClusterInfo,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct Clusters {
    #[serde(default)]
    pub items: Vec<ClusterItem>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct RootServiceComponents {
    pub server_clock: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct ServerClock {
    #[serde(rename = "RootServiceComponents", default)]
    pub root_service_components: RootServiceComponents,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct RepositoryVersionInfo {
    pub repository_version: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct RepositoryVersion {
    #[serde(rename = "RepositoryVersions")]
    pub repository_versions: Option<RepositoryVersionInfo>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct StackVersionItem {
    pub repository_versions: Option<Vec<RepositoryVersion>>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct StackVersions {
    pub items: Option<Vec<StackVersionItem>>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct TaskInfo {
    pub command_detail: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct Task {
    #[serde(rename = "Tasks")]
    pub tasks: Option<TaskInfo>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct ServiceCheckUpgradeItem {
    pub tasks: Option<Vec<Task>>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct ServiceCheckGroup {
    pub upgrade_items: Option<Vec<ServiceCheckUpgradeItem>>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct ServiceChecks {
    pub items: Option<Vec<ServiceCheckGroup>>,
}
