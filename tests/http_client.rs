use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use serde_json::{json, Value};

use ambari_sync::cluster::{ClusterSession, LOAD_HOSTS, LOAD_SERVER_CLOCK, LOAD_SERVICES};
use ambari_sync::common::config::SyncConfig;
use ambari_sync::http::{ErrorHandler, HttpClient, RequestOptions, METHOD_OVERRIDE_HEADER};
use ambari_sync::mapper::{HostsMapper, MapContext, ServicesMapper, UpgradeMapper};
use ambari_sync::store::{RecordKind, RecordStore};
use ambari_sync::upgrade::{ItemRef, UpgradeApi, UpgradeStatus, UpgradeTracker};
use ambari_sync::SyncError;

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: String,
    method_override: Option<String>,
    authorization: Option<String>,
    body: String,
}

#[derive(Default)]
struct Mock {
    seen: Mutex<Vec<Seen>>,
    upgrade_polls: AtomicUsize,
    item_polls: AtomicUsize,
    item_done: AtomicBool,
    racing_services: AtomicUsize,
}

impl Mock {
    fn item_status(&self) -> &'static str {
        if self.item_done.load(Ordering::SeqCst) {
            "COMPLETED"
        } else {
            "IN_PROGRESS"
        }
    }
}

impl Mock {
    fn seen(&self, path: &str) -> Vec<Seen> {
        self.seen.lock().unwrap().iter().filter(|s| s.path == path).cloned().collect()
    }
}

fn services_payload() -> Value {
    services_in_state("STARTED")
}

fn services_in_state(state: &str) -> Value {
    json!({"items": [{
        "ServiceInfo": {"service_name": "HDFS", "state": state, "maintenance_state": "OFF"},
        "alerts_summary": {"CRITICAL": 1},
        "components": [{"host_components": [{"HostRoles": {"component_name": "NAMENODE", "host_name": "host1"}}]}]
    }]})
}

fn hosts_payload() -> Value {
    json!({
        "itemTotal": 1,
        "items": [{
            "Hosts": {"host_name": "host1", "maintenance_state": "OFF"},
            "host_components": [{"HostRoles": {
                "component_name": "NAMENODE", "service_name": "HDFS", "state": "STARTED",
                "maintenance_state": "OFF", "stale_configs": false
            }}]
        }]
    })
}

fn upgrade_payload(poll: usize, item_status: &str) -> Value {
    json!({
        "Upgrade": {"request_id": 7, "request_status": "IN_PROGRESS", "progress_percent": poll * 10, "direction": "UPGRADE"},
        "upgrade_groups": [{
            "UpgradeGroup": {"group_id": 1, "status": "IN_PROGRESS", "progress_percent": 10, "title": "Core Masters"},
            "upgrade_items": [{"UpgradeItem": {"stage_id": 10, "status": item_status, "context": "Restarting NameNode"}}]
        }]
    })
}

async fn handle(
    State(mock): State<Arc<Mock>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    let seen = Seen {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        method_override: header(METHOD_OVERRIDE_HEADER),
        authorization: header("authorization"),
        body: String::from_utf8_lossy(&body).to_string(),
    };
    mock.seen.lock().unwrap().push(seen);

    let reply = match (method.as_str(), uri.path()) {
        ("GET", "/api/v1/clusters") => json!({"items": [
            {"Clusters": {"cluster_name": "c1", "version": "HDP-2.2"}}
        ]}),
        ("GET", "/api/v1/services/AMBARI/components/AMBARI_SERVER") => {
            json!({"RootServiceComponents": {"server_clock": 1700000000}})
        }
        ("GET", "/api/v1/clusters/c1/stack_versions") => json!({"items": [
            {"repository_versions": [{"RepositoryVersions": {"repository_version": "2.2.0.0-2041"}}]}
        ]}),
        ("GET", "/api/v1/clusters/c1/services") => services_payload(),
        ("POST", "/api/v1/clusters/c1/hosts") => hosts_payload(),
        ("GET", "/api/v1/clusters/c1/upgrades/7") => {
            let poll = mock.upgrade_polls.fetch_add(1, Ordering::SeqCst) + 1;
            upgrade_payload(poll, mock.item_status())
        }
        ("GET", "/api/v1/clusters/c1/upgrades/7/upgrade_groups/1/upgrade_items/10") => {
            mock.item_polls.fetch_add(1, Ordering::SeqCst);
            json!({
                "UpgradeItem": {"stage_id": 10, "status": mock.item_status(), "context": "Restarting NameNode"},
                "tasks": [{"Tasks": {"id": 100, "status": mock.item_status(), "host_name": "host1"}}]
            })
        }
        ("GET", "/api/v1/clusters/c1/racing/services") => {
            if mock.racing_services.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(300)).await;
                services_in_state("OLD")
            } else {
                services_in_state("NEW")
            }
        }
        ("PUT", _) => return (StatusCode::ACCEPTED, String::new()),
        (_, "/api/v1/broken") => return (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string()),
        (_, "/api/v1/broken-json") => {
            return (StatusCode::INTERNAL_SERVER_ERROR, json!({"message": "bad"}).to_string())
        }
        _ => return (StatusCode::NOT_FOUND, String::new()),
    };
    (StatusCode::OK, reply.to_string())
}

async fn serve() -> (Arc<Mock>, SyncConfig) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mock = Arc::new(Mock::default());
    let app = Router::new().fallback(handle).with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (mock, SyncConfig::new(&format!("http://{}", addr)))
}

fn client(config: &SyncConfig) -> HttpClient {
    HttpClient::new(config, RecordStore::shared(), MapContext::from_config(config).shared()).unwrap()
}

#[tokio::test]
async fn get_adds_cache_buster_and_basic_auth() {
    let (mock, config) = serve().await;
    let client = client(&config);
    client.context().write().await.cluster_name = Some("c1".to_string());

    let mapped = client
        .fetch("/api/v1/clusters/c1/services?fields=ServiceInfo", &ServicesMapper::new(), &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(mapped.of_kind(RecordKind::Service).count(), 1);

    let seen = mock.seen("/api/v1/clusters/c1/services");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::GET);
    assert!(seen[0].query.starts_with("fields=ServiceInfo&_="));
    assert_eq!(seen[0].authorization.as_deref(), Some("Basic YWRtaW46YWRtaW4="));

    let store = client.store().read().await;
    let service = store.find(RecordKind::Service, "HDFS").unwrap();
    assert_eq!(service.get_str("work_status"), Some("STARTED"));
    assert_eq!(service.get("critical_warning_alerts_count"), Some(&json!(1)));
}

#[tokio::test]
async fn get_as_post_sends_override_header_and_query_body() {
    let (mock, config) = serve().await;
    let client = client(&config);
    let options = RequestOptions::get_as_post("fields=Hosts/host_name");

    client
        .fetch("/api/v1/clusters/c1/hosts", &HostsMapper::new(), &options)
        .await
        .unwrap();

    let seen = mock.seen("/api/v1/clusters/c1/hosts");
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].method_override.as_deref(), Some("GET"));
    let body: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body, json!({"RequestInfo": {"query": "fields=Hosts/host_name"}}));

    let store = client.store().read().await;
    assert_eq!(store.len(RecordKind::Host), 1);
    assert_eq!(store.item_total(RecordKind::Host), Some(1));
    assert!(store.find(RecordKind::HostComponent, "NAMENODE_host1").is_some());
}

#[tokio::test]
async fn test_mode_keeps_get_and_skips_auth_when_disabled() {
    let (mock, mut config) = serve().await;
    config.test_mode = true;
    let client = client(&config).without_auth();

    let result = client
        .request("/api/v1/clusters", &RequestOptions::get_as_post("fields=Clusters"))
        .await
        .unwrap();
    assert_eq!(result["items"][0]["Clusters"]["cluster_name"], "c1");

    let seen = mock.seen("/api/v1/clusters");
    assert_eq!(seen[0].method, Method::GET);
    assert!(seen[0].authorization.is_none());
}

#[tokio::test]
async fn failed_request_reaches_error_handler() {
    let (_mock, config) = serve().await;
    let client = client(&config);
    let failures: Arc<Mutex<Vec<(u16, String)>>> = Arc::default();
    let sink = failures.clone();
    let handler: ErrorHandler = Arc::new(move |err: &SyncError| {
        if let SyncError::Status { status, body, .. } = err {
            sink.lock().unwrap().push((*status, body.clone()));
        }
    });
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    let options = RequestOptions::default().on_complete(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handle = client.get("/api/v1/broken", Arc::new(ServicesMapper::new()), options, Some(handler), None);
    handle.join().await;

    assert_eq!(*failures.lock().unwrap(), vec![(500, "boom".to_string())]);
    assert_eq!(completed.load(Ordering::SeqCst), 0);

    let err = client
        .request("/api/v1/broken-json", &RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Status { status: 500, .. }));
}

#[tokio::test]
async fn interval_polling_repeats_until_cancelled() {
    let (mock, config) = serve().await;
    let client = client(&config);

    let handle = client.get(
        "/api/v1/clusters/c1/upgrades/7",
        Arc::new(UpgradeMapper::new()),
        RequestOptions::default(),
        None,
        Some(Duration::from_millis(10)),
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.cancel();
    handle.join().await;

    let polls = mock.upgrade_polls.load(Ordering::SeqCst);
    assert!(polls >= 2, "expected repeated polls, saw {}", polls);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.upgrade_polls.load(Ordering::SeqCst), polls);

    let store = client.store().read().await;
    let upgrade = store.find(RecordKind::Upgrade, "7").unwrap();
    assert_eq!(upgrade.get("progress_percent"), Some(&json!(polls * 10)));
}

#[tokio::test]
async fn upgrade_item_status_is_put_to_the_item() {
    let (mock, config) = serve().await;
    let client = client(&config);
    let item = ItemRef {
        upgrade_id: "7".to_string(),
        group_id: "2".to_string(),
        stage_id: "20".to_string(),
    };

    assert!(matches!(
        client.set_upgrade_item_status(&item, UpgradeStatus::Completed).await,
        Err(SyncError::MissingData(_))
    ));

    client.context().write().await.cluster_name = Some("c1".to_string());
    client.set_upgrade_item_status(&item, UpgradeStatus::Completed).await.unwrap();

    let seen = mock.seen("/api/v1/clusters/c1/upgrades/7/upgrade_groups/2/upgrade_items/20");
    assert_eq!(seen[0].method, Method::PUT);
    let body: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body, json!({"UpgradeItem": {"status": "COMPLETED"}}));
}

#[tokio::test]
async fn cluster_session_loads_everything() {
    let (mock, config) = serve().await;
    let client = client(&config);
    let mut session = ClusterSession::new(client.clone(), client.context().clone(), &config);
    assert_eq!(session.loaded_percent(), "width:0");

    session.load_cluster_data(&client).await.unwrap();

    assert!(session.is_loaded());
    assert_eq!(session.loaded_percent(), "width:100%");
    assert_eq!(session.cluster_name(), Some("c1"));
    assert_eq!(session.current_stack_version(), "HDP-2.2");
    assert_eq!(session.current_server_time(), Some(1700000000000));
    assert!(!session.is_storm_metrics_supported());
    assert!(session.load_status().is_flag_loaded(LOAD_SERVICES));
    assert!(session.load_status().is_flag_loaded(LOAD_HOSTS));
    assert!(session.load_status().is_flag_loaded(LOAD_SERVER_CLOCK));
    assert_eq!(mock.seen("/api/v1/clusters/c1/stack_versions").len(), 1);

    let store = client.store().read().await;
    assert!(store.find(RecordKind::Service, "HDFS").is_some());
    assert!(store.find(RecordKind::Host, "host1").is_some());

    session.create_kerberos_admin_session("admin", "secret").await.unwrap();
    let seen = mock.seen("/api/v1/clusters/c1");
    let put = seen.iter().find(|s| s.method == Method::PUT).unwrap();
    let body: Value = serde_json::from_str(&put.body).unwrap();
    assert_eq!(body[0]["session_attributes"]["kerberos_admin"]["principal"], "admin");
}

#[tokio::test]
async fn older_response_landing_last_is_not_committed() {
    let (mock, config) = serve().await;
    let client = client(&config);
    let url = "/api/v1/clusters/c1/racing/services";

    let slow_client = client.clone();
    let slow = tokio::spawn(async move {
        slow_client
            .fetch(url, &ServicesMapper::new(), &RequestOptions::default())
            .await
    });
    for _ in 0..200 {
        if mock.racing_services.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    client
        .fetch(url, &ServicesMapper::new(), &RequestOptions::default())
        .await
        .unwrap();
    let stale = slow.await.unwrap().unwrap();

    let old = stale.of_kind(RecordKind::Service).next().unwrap();
    assert_eq!(old.get_str("work_status"), Some("OLD"));
    let store = client.store().read().await;
    let service = store.find(RecordKind::Service, "HDFS").unwrap();
    assert_eq!(service.get_str("work_status"), Some("NEW"));
}

#[tokio::test]
async fn item_poll_ends_when_the_item_completes() {
    let (mock, mut config) = serve().await;
    config.polling.bg_operations_update_interval_ms = 10;
    let client = client(&config);
    client.context().write().await.cluster_name = Some("c1".to_string());
    let tracker = UpgradeTracker::new(client.clone(), client.store().clone(), "7", &config);

    tracker.start_polling().await.unwrap();
    for _ in 0..200 {
        if tracker.tree().await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tracker.open_details().await.unwrap();
    assert!(tracker.is_item_polling());
    for _ in 0..200 {
        if mock.item_polls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    mock.item_done.store(true, Ordering::SeqCst);
    for _ in 0..400 {
        if !tracker.is_item_polling() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!tracker.is_item_polling());

    let item_polls = mock.item_polls.load(Ordering::SeqCst);
    assert!(item_polls >= 1);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(mock.item_polls.load(Ordering::SeqCst), item_polls);
    assert!(tracker.is_polling());
    tracker.stop_polling();
}
