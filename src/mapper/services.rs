use log::{debug, warn};
use serde_json::{json, Value};

use crate::mapper::{critical_warning_count, items, FieldTable, MapContext, Mapped, Mapper};
use crate::model::host_component_id;
use crate::store::{Record, RecordKind};

const SERVICE_FIELDS: &[(&str, &str)] = &[
    ("service_name", "ServiceInfo.service_name"),
    ("work_status", "ServiceInfo.state"),
    ("passive_state", "ServiceInfo.maintenance_state"),
    ("cluster_id", "cluster_id"),
    ("critical_warning_alerts_count", "critical_warning_alerts_count"),
];

/// Maps `items[].ServiceInfo` with nested `components[].host_components[]`
/// into Service records.
pub struct ServicesMapper {
    fields: FieldTable,
}

impl Default for ServicesMapper {
    fn default() -> Self {
        ServicesMapper::new()
    }
}

impl ServicesMapper {
    pub fn new() -> ServicesMapper {
        ServicesMapper {
            fields: FieldTable::new(SERVICE_FIELDS),
        }
    }
}

fn host_component_ids(item: &Value) -> Vec<String> {
    let mut ids = vec![];
    for component in item.get("components").and_then(Value::as_array).into_iter().flatten() {
        for host_component in component
            .get("host_components")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let roles = host_component.get("HostRoles");
            let component_name = roles.and_then(|r| r.get("component_name")).and_then(Value::as_str);
            let host_name = roles.and_then(|r| r.get("host_name")).and_then(Value::as_str);
            if let (Some(component_name), Some(host_name)) = (component_name, host_name) {
                ids.push(host_component_id(component_name, host_name));
            }
        }
    }
    ids
}

impl Mapper for ServicesMapper {
    fn name(&self) -> &'static str {
        "services"
    }

    fn map(&self, payload: &Value, ctx: &MapContext) -> Mapped {
        let mut mapped = Mapped::default();
        for item in items(payload) {
            let Some(service_name) = item.pointer("/ServiceInfo/service_name").and_then(Value::as_str) else {
                warn!("Skipping service item without ServiceInfo.service_name");
                continue;
            };
            let mut source = item.clone();
            if let Value::Object(map) = &mut source {
                map.insert(
                    "critical_warning_alerts_count".to_string(),
                    json!(critical_warning_count(item.get("alerts_summary"))),
                );
                map.insert("cluster_id".to_string(), json!(ctx.cluster_name));
            }
            let mut service = Record::with_attributes(RecordKind::Service, service_name, self.fields.apply(&source));
            service.set_refs("host_components", host_component_ids(item));
            mapped.records.push(service);
        }
        debug!("services mapper produced {} records", mapped.records.len());
        mapped
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::RecordStore;

    #[test]
    fn maps_services_with_host_component_refs() {
        let payload = json!({"items": [
            {
                "ServiceInfo": {"service_name": "HDFS", "state": "STARTED", "maintenance_state": "OFF"},
                "alerts_summary": {"CRITICAL": 1},
                "components": [
                    {"ServiceComponentInfo": {"component_name": "NAMENODE"}, "host_components": [
                        {"HostRoles": {"component_name": "NAMENODE", "host_name": "h1"}}
                    ]},
                    {"ServiceComponentInfo": {"component_name": "DATANODE"}, "host_components": [
                        {"HostRoles": {"component_name": "DATANODE", "host_name": "h1"}},
                        {"HostRoles": {"component_name": "DATANODE", "host_name": "h2"}}
                    ]}
                ]
            },
            {"ServiceInfo": {"service_name": "ZOOKEEPER", "state": "INSTALLED"}},
            {"href": "no service info"}
        ]});
        let ctx = MapContext {
            cluster_name: Some("c1".to_string()),
            ..Default::default()
        };
        let mut store = RecordStore::new();
        ServicesMapper::new().apply(&payload, &ctx, &mut store, false).unwrap();

        assert_eq!(store.len(RecordKind::Service), 2);
        let hdfs = store.find(RecordKind::Service, "HDFS").unwrap();
        assert_eq!(hdfs.get_str("work_status"), Some("STARTED"));
        assert_eq!(hdfs.get_str("cluster_id"), Some("c1"));
        assert_eq!(hdfs.get("critical_warning_alerts_count"), Some(&json!(1)));
        assert_eq!(hdfs.refs("host_components"), ["NAMENODE_h1", "DATANODE_h1", "DATANODE_h2"]);

        let zookeeper = store.find(RecordKind::Service, "ZOOKEEPER").unwrap();
        assert!(zookeeper.refs("host_components").is_empty());
        assert!(zookeeper.get("passive_state").is_none());
    }
}
