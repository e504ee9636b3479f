use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, warn};
use serde_json::{json, Map, Value};

use crate::common::error::Result;
use crate::common::util::{compare_versions, id_string};
use crate::mapper::{critical_warning_count, items, FieldPath, FieldTable, MapContext, Mapped, Mapper};
use crate::model::{host_component_id, WorkStatus, STACK_VERSION_CURRENT};
use crate::model::host_component::PASSIVE_STATE_OFF;
use crate::store::{Record, RecordKind, RecordStore};

const HOST_FIELDS: &[(&str, &str)] = &[
    ("host_name", "Hosts.host_name"),
    ("public_host_name", "Hosts.public_host_name"),
    ("cluster_id", "cluster_id"),
    ("rack", "Hosts.rack_info"),
    ("alerts_summary", "alerts_summary"),
    ("critical_warning_alerts_count", "critical_warning_alerts_count"),
    ("cpu", "Hosts.cpu_count"),
    ("cpu_physical", "Hosts.ph_cpu_count"),
    ("memory", "Hosts.total_mem"),
    ("disk_info", "Hosts.disk_info"),
    ("disk_total", "metrics.disk.disk_total"),
    ("disk_free", "metrics.disk.disk_free"),
    ("health_status", "Hosts.host_status"),
    ("load_one", "metrics.load.load_one"),
    ("load_five", "metrics.load.load_five"),
    ("load_fifteen", "metrics.load.load_fifteen"),
    ("cpu_system", "metrics.cpu.cpu_system"),
    ("cpu_user", "metrics.cpu.cpu_user"),
    ("mem_total", "metrics.memory.mem_total"),
    ("mem_free", "metrics.memory.mem_free"),
    ("last_heart_beat_time", "Hosts.last_heartbeat_time"),
    ("os_arch", "Hosts.os_arch"),
    ("os_type", "Hosts.os_type"),
    ("ip", "Hosts.ip"),
    ("passive_state", "Hosts.maintenance_state"),
    ("index", "index"),
];

const HOST_COMPONENT_FIELDS: &[(&str, &str)] = &[
    ("component_name", "HostRoles.component_name"),
    ("service_id", "HostRoles.service_name"),
    ("passive_state", "HostRoles.maintenance_state"),
    ("work_status", "HostRoles.state"),
    ("stale_configs", "HostRoles.stale_configs"),
    ("host_name", "host_name"),
    ("admin_state", "HostRoles.desired_admin_state"),
];

const STACK_VERSION_FIELDS: &[(&str, &str)] = &[
    ("stack", "HostStackVersions.stack"),
    ("repo_id", "repository_versions[0].RepositoryVersions.id"),
    ("repo_version", "repository_versions[0].RepositoryVersions.repository_version"),
    ("display_name", "repository_versions[0].RepositoryVersions.display_name"),
    ("version", "HostStackVersions.version"),
    ("status", "HostStackVersions.state"),
    ("host_name", "host_name"),
    ("host_id", "host_name"),
    ("is_visible", "is_visible"),
];

const METRIC_FIELDS: &[(&str, &str)] = &[
    ("disk_total", "metrics.disk.disk_total"),
    ("disk_free", "metrics.disk.disk_free"),
    ("load_one", "metrics.load.load_one"),
];

/// Maps the host collection payload into Host, HostComponent and
/// StackVersion records.
pub struct HostsMapper {
    host_fields: FieldTable,
    host_component_fields: FieldTable,
    stack_version_fields: FieldTable,
    metric_fields: FieldTable,
    repo_version_path: FieldPath,
}

impl Default for HostsMapper {
    fn default() -> Self {
        HostsMapper::new()
    }
}

struct MappedComponents {
    records: Vec<Record>,
    all: Vec<String>,
    not_started: Vec<String>,
    in_passive_state: Vec<String>,
    with_stale_configs: Vec<String>,
}

impl HostsMapper {
    pub fn new() -> HostsMapper {
        HostsMapper {
            host_fields: FieldTable::new(HOST_FIELDS),
            host_component_fields: FieldTable::new(HOST_COMPONENT_FIELDS),
            stack_version_fields: FieldTable::new(STACK_VERSION_FIELDS),
            metric_fields: FieldTable::new(METRIC_FIELDS),
            repo_version_path: FieldPath::new("repository_versions[0].RepositoryVersions.repository_version"),
        }
    }

    fn map_components(&self, item: &Value, host_name: &str) -> MappedComponents {
        let mut mapped = MappedComponents {
            records: vec![],
            all: vec![],
            not_started: vec![],
            in_passive_state: vec![],
            with_stale_configs: vec![],
        };
        let components = item
            .get("host_components")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for host_component in components {
            let component_name = match host_component.pointer("/HostRoles/component_name").and_then(Value::as_str) {
                Some(name) => name,
                None => {
                    warn!("Skipping host component without component_name on {}", host_name);
                    continue;
                }
            };
            let id = host_component_id(component_name, host_name);
            let mut source = host_component.clone();
            if let Value::Object(map) = &mut source {
                map.insert("host_name".to_string(), json!(host_name));
            }
            let mut record = Record::with_attributes(
                RecordKind::HostComponent,
                id.clone(),
                self.host_component_fields.apply(&source),
            );
            record.set("host_id", host_name);

            if record.get_str("work_status") != Some(WorkStatus::Started.as_str()) {
                mapped.not_started.push(id.clone());
            }
            if record.get_bool("stale_configs") {
                mapped.with_stale_configs.push(id.clone());
            }
            if record.get_str("passive_state") != Some(PASSIVE_STATE_OFF) {
                mapped.in_passive_state.push(id.clone());
            }
            mapped.all.push(id);
            mapped.records.push(record);
        }
        mapped
    }

    fn map_stack_versions(&self, item: &Value, host_name: &str, ctx: &MapContext) -> Vec<Record> {
        let versions = item
            .get("stack_versions")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let current_version = versions
            .iter()
            .find(|v| v.pointer("/HostStackVersions/state").and_then(Value::as_str) == Some(STACK_VERSION_CURRENT))
            .and_then(|v| self.repo_version_path.resolve(v))
            .and_then(Value::as_str)
            .unwrap_or("");

        let mut records = vec![];
        for version in versions {
            let id = match version.pointer("/HostStackVersions/id").and_then(id_string) {
                Some(id) => id,
                None => {
                    warn!("Skipping stack version without id on {}", host_name);
                    continue;
                }
            };
            let repo_version = self
                .repo_version_path
                .resolve(version)
                .and_then(Value::as_str)
                .unwrap_or("");
            let is_visible = current_version.is_empty()
                || ctx.supports.display_older_versions
                || (!repo_version.is_empty() && compare_versions(repo_version, current_version) != Ordering::Less);

            let mut source = version.clone();
            if let Value::Object(map) = &mut source {
                map.insert("host_name".to_string(), json!(host_name));
                map.insert("is_visible".to_string(), json!(is_visible));
            }
            records.push(Record::with_attributes(
                RecordKind::StackVersion,
                id,
                self.stack_version_fields.apply(&source),
            ));
        }
        records
    }

    fn map_host(&self, index: usize, item: &Value, ctx: &MapContext, mapped: &mut Mapped) {
        let host_name = match item.pointer("/Hosts/host_name").and_then(Value::as_str) {
            Some(host_name) => host_name.to_string(),
            None => {
                warn!("Skipping host item without Hosts.host_name at index {}", index);
                return;
            }
        };

        let components = self.map_components(item, &host_name);
        let stack_versions = if ctx.supports.stack_upgrade {
            Some(self.map_stack_versions(item, &host_name, ctx))
        } else {
            None
        };

        let mut source = item.clone();
        if let Value::Object(map) = &mut source {
            map.insert(
                "critical_warning_alerts_count".to_string(),
                json!(critical_warning_count(item.get("alerts_summary"))),
            );
            map.insert("cluster_id".to_string(), json!(ctx.cluster_name));
            map.insert("index".to_string(), json!(index));
        }

        let mut host = Record::with_attributes(RecordKind::Host, host_name.clone(), self.host_fields.apply(&source));
        host.set("is_requested", true);
        host.set("selected", ctx.selected_hosts.contains(&host_name));
        host.set_refs("host_components", components.all);
        host.set_refs("not_started_components", components.not_started);
        host.set_refs("components_in_passive_state", components.in_passive_state);
        host.set_refs("components_with_stale_configs", components.with_stale_configs);

        mapped.records.extend(components.records);
        if let Some(stack_versions) = stack_versions {
            host.set_refs("stack_versions", stack_versions.iter().map(|r| r.id.clone()).collect());
            mapped.records.extend(stack_versions);
        }
        mapped.records.push(host);
    }

    /// Refreshes disk and load metrics of requested hosts from a metrics-only
    /// payload. Hosts absent from the payload keep their values.
    pub fn set_metrics(&self, payload: &Value, store: &mut RecordStore) -> Result<usize> {
        let mut by_host: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
        for item in items(payload) {
            if let Some(host_name) = item.pointer("/Hosts/host_name").and_then(Value::as_str) {
                by_host.insert(host_name, self.metric_fields.apply(item));
            }
        }

        let mut updated = vec![];
        for host in store.find_all(RecordKind::Host) {
            if !host.get_bool("is_requested") {
                continue;
            }
            if let Some(metrics) = by_host.get(host.id.as_str()) {
                let mut host = host.clone();
                for name in ["disk_total", "disk_free", "load_one"] {
                    match metrics.get(name) {
                        Some(value) => host.set(name, value.clone()),
                        None => {
                            host.attributes.remove(name);
                        }
                    }
                }
                updated.push(host);
            }
        }
        store.upsert_many(RecordKind::Host, updated)
    }

    /// Appends ids of host components not yet known to their Service record.
    fn bind_to_services(&self, components: &[Record], store: &mut RecordStore) -> Result<()> {
        let mut new_by_service: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for component in components {
            if let Some(service) = component.get_str("service_id") {
                new_by_service
                    .entry(service.to_string())
                    .or_default()
                    .push(component.id.clone());
            }
        }

        let mut services = vec![];
        for (service_name, ids) in new_by_service {
            let Some(service) = store.find(RecordKind::Service, &service_name) else {
                continue;
            };
            let mut known = service.refs("host_components").to_vec();
            let before = known.len();
            for id in ids {
                if !known.contains(&id) {
                    known.push(id);
                }
            }
            if known.len() != before {
                let mut service = service.clone();
                service.set_refs("host_components", known);
                services.push(service);
            }
        }
        store.upsert_many(RecordKind::Service, services)?;
        Ok(())
    }
}

impl Mapper for HostsMapper {
    fn name(&self) -> &'static str {
        "hosts"
    }

    fn map(&self, payload: &Value, ctx: &MapContext) -> Mapped {
        let started = Instant::now();
        let mut mapped = Mapped::default();
        for (index, item) in items(payload).iter().enumerate() {
            self.map_host(index, item, ctx, &mut mapped);
        }
        mapped.item_total = match payload.get("itemTotal") {
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(Value::Number(n)) => n.as_u64(),
            _ => None,
        };
        debug!(
            "hosts mapper produced {} records in {:?}",
            mapped.records.len(),
            started.elapsed()
        );
        mapped
    }

    fn commit(&self, mut mapped: Mapped, ctx: &MapContext, store: &mut RecordStore) -> Result<()> {
        if ctx.supports.stack_upgrade {
            store.upsert_many(RecordKind::StackVersion, mapped.take_kind(RecordKind::StackVersion))?;
        }
        let components = mapped.take_kind(RecordKind::HostComponent);
        store.upsert_many(RecordKind::HostComponent, components.clone())?;
        if !ctx.in_host_details() {
            store.clear(RecordKind::Host);
        }
        store.upsert_many(RecordKind::Host, mapped.take_kind(RecordKind::Host))?;
        if let Some(total) = mapped.item_total {
            store.set_item_total(RecordKind::Host, total);
        }
        self.bind_to_services(&components, store)
    }
}
