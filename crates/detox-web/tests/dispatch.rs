// crates/detox-web/tests/dispatch.rs
// ============================================================================
// Module: HTTP Dispatch Tests
// Description: End-to-end tests of `/detox` request handling over SQLite.
// Purpose: Validate action routing, cycle fallback, response shaping, error
//          bodies, and audit events.
// ============================================================================

//! ## Overview
//! Each test imports a small fact batch into a temporary store and calls the
//! dispatcher directly, then inspects status, headers, body, and the audit
//! events captured by an in-memory sink.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;

use axum::http::StatusCode;
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use detox_config::DetoxConfig;
use detox_core::Cycle;
use detox_core::CycleId;
use detox_core::CycleOperation;
use detox_core::DatasetName;
use detox_core::Decision;
use detox_core::DecisionRecord;
use detox_core::FactBatch;
use detox_core::Partition;
use detox_core::PartitionId;
use detox_core::QuotaSnapshot;
use detox_core::ResolutionDefaults;
use detox_core::SharedSnapshotStore;
use detox_core::SiteName;
use detox_core::SizeSnapshot;
use detox_store_sqlite::SqliteSnapshotStore;
use detox_store_sqlite::SqliteStoreConfig;
use detox_web::AuditEvent;
use detox_web::AuditOutcome;
use detox_web::AuditSink;
use detox_web::DetoxServer;
use detox_web::PageTemplate;
use detox_web::ServerState;
use detox_web::dispatch;
use detox_web::health;
use serde_json::Value;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const TB: i64 = 1_000_000_000_000;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditSink for RecordingSink {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl RecordingSink {
    fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

struct Harness {
    _dir: TempDir,
    state: Arc<ServerState>,
    audit: Arc<RecordingSink>,
}

fn cid(raw: u64) -> CycleId {
    CycleId::from_raw(raw).unwrap()
}

fn pid(raw: u64) -> PartitionId {
    PartitionId::from_raw(raw).unwrap()
}

fn cycle(id: u64, partition: u64, completed: bool) -> Cycle {
    Cycle {
        id: cid(id),
        partition_id: pid(partition),
        operation: CycleOperation::Deletion,
        policy_version: format!("v{id}"),
        comment: "nightly".to_string(),
        time_start: 1_600_000_000,
        time_end: completed.then_some(1_600_003_600),
    }
}

fn size(site: &str, dataset: &str, bytes: i64) -> SizeSnapshot {
    SizeSnapshot {
        run_id: cid(1),
        partition_id: pid(10),
        site: SiteName::new(site),
        dataset: DatasetName::new(dataset),
        size: bytes,
        group: None,
    }
}

fn decision(site: &str, dataset: &str, decision: Decision) -> DecisionRecord {
    DecisionRecord {
        run_id: cid(1),
        partition_id: pid(10),
        site: SiteName::new(site),
        dataset: DatasetName::new(dataset),
        decision,
        condition_id: None,
    }
}

fn quota(site: &str, tb: f64) -> QuotaSnapshot {
    QuotaSnapshot {
        run_id: cid(1),
        partition_id: pid(10),
        site: SiteName::new(site),
        quota_tb: Some(tb),
    }
}

/// Physics (10) with cycles 1..=3 done and 4 running; AnalysisOps (2) with
/// cycle 5; Empty (3) without cycles.
fn batch() -> FactBatch {
    FactBatch {
        partitions: vec![
            Partition {
                id: pid(2),
                name: "AnalysisOps".to_string(),
            },
            Partition {
                id: pid(3),
                name: "Empty".to_string(),
            },
            Partition {
                id: pid(10),
                name: "Physics".to_string(),
            },
        ],
        cycles: vec![
            cycle(1, 10, true),
            cycle(2, 10, true),
            cycle(3, 10, true),
            cycle(4, 10, false),
            cycle(5, 2, true),
        ],
        sizes: vec![
            size("T1_A", "/a/Run2018A/AOD", 2 * TB),
            size("T1_A", "/b/Run2017B/AOD", TB),
            size("T2_B", "/a/Run2018B/MINIAOD", 500_000_000_000),
        ],
        decisions: vec![
            decision("T1_A", "/a/Run2018A/AOD", Decision::Delete),
            decision("T1_A", "/b/Run2017B/AOD", Decision::Keep),
            decision("T2_B", "/a/Run2018B/MINIAOD", Decision::Keep),
        ],
        quotas: vec![quota("T1_A", 10.0), quota("T2_B", 5.0)],
        ..FactBatch::default()
    }
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let config = SqliteStoreConfig::at_path(dir.path().join("detox.sqlite"));
    let store = SqliteSnapshotStore::new(&config).unwrap();
    store.import_facts(&batch()).unwrap();
    let store: SharedSnapshotStore = Arc::new(store);
    let audit = Arc::new(RecordingSink::default());
    let sink: Arc<dyn AuditSink> = audit.clone();
    let defaults = ResolutionDefaults {
        partition_id: pid(10),
        operation: CycleOperation::Deletion,
    };
    let state = ServerState::new(store, defaults, PageTemplate::embedded(), sink, 64 * 1024);
    Harness {
        _dir: dir,
        state: Arc::new(state),
        audit,
    }
}

async fn get(harness: &Harness, query: &str) -> Response {
    dispatch(Arc::clone(&harness.state), Some(query.to_string()), Bytes::new()).await
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

// ============================================================================
// SECTION: Cycle Resolution
// ============================================================================

#[tokio::test]
async fn check_update_returns_latest_completed_cycle() {
    let harness = harness();
    let response = get(&harness, "checkUpdate=1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(body_text(response).await, "3");
}

#[tokio::test]
async fn unfinished_or_unknown_cycles_fall_back_to_default_partition() {
    let harness = harness();
    assert_eq!(body_text(get(&harness, "checkUpdate=1&cycleNumber=4").await).await, "3");
    assert_eq!(body_text(get(&harness, "checkUpdate=1&cycleNumber=99").await).await, "3");
    assert_eq!(body_text(get(&harness, "checkUpdate=1&cycleNumber=x").await).await, "3");
}

#[tokio::test]
async fn explicit_cycle_selects_partition_for_latest_lookup() {
    let harness = harness();
    assert_eq!(body_text(get(&harness, "checkUpdate=1&cycleNumber=5").await).await, "5");
    assert_eq!(body_text(get(&harness, "checkUpdate=1&partition=AnalysisOps").await).await, "5");
    assert_eq!(body_text(get(&harness, "checkUpdate=1&partitionId=2").await).await, "5");
    let events = harness.audit.events();
    assert_eq!(events[0].partition, Some(2));
    assert_eq!(events[0].cycle, 5);
}

#[tokio::test]
async fn check_update_reports_latest_cycle_while_viewing_older_one() {
    let harness = harness();
    let response = get(&harness, "checkUpdate=1&cycleNumber=1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "3");
    let pinned = get(&harness, "checkUpdate=1&cycleNumber=2&partitionId=10").await;
    assert_eq!(body_text(pinned).await, "3");
    let events = harness.audit.events();
    assert_eq!(events[0].cycle, 1);
    assert_eq!(events[0].partition, Some(10));
}

#[tokio::test]
async fn partition_without_cycles_reports_cycle_zero() {
    let harness = harness();
    let json = body_json(get(&harness, "getData=1&dataType=summary&partitionId=3").await).await;
    assert_eq!(json["cycle"]["cycleNumber"], 0);
    assert_eq!(json["cycle"]["partition"], "Empty");
    assert_eq!(json["siteData"].as_array().unwrap().len(), 1);
}

// ============================================================================
// SECTION: Reports
// ============================================================================

#[tokio::test]
async fn summary_reports_terabytes_and_records_cache_builds() {
    let harness = harness();
    let response = get(&harness, "getData=1&dataType=summary").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["cycle"]["cycleNumber"], 3);
    assert_eq!(json["cycle"]["partition"], "Physics");
    assert_eq!(json["cycle"]["policyVersion"], "v3");
    assert_eq!(json["previousCycleNumber"], 2);
    let rows = json["siteData"].as_array().unwrap();
    assert_eq!(rows[0]["name"], "Total");
    assert_eq!(rows[1]["name"], "T1_A");
    assert_eq!(rows[1]["delete"], 2.0);
    assert_eq!(rows[1]["keep"], 1.0);
    assert_eq!(rows[1]["keepPrev"], 1.0);
    assert_eq!(rows[1]["status"], 1);
    assert_eq!(rows[2]["name"], "T2_B");
    assert_eq!(rows[2]["keep"], 0.5);

    get(&harness, "getData=1&dataType=summary").await;
    let events = harness.audit.events();
    assert_eq!(events.len(), 2);
    let first: Vec<&str> = events[0].cache.iter().map(|entry| entry.outcome).collect();
    let second: Vec<&str> = events[1].cache.iter().map(|entry| entry.outcome).collect();
    assert_eq!(first, vec!["built", "built"]);
    assert_eq!(second, vec!["hit", "hit"]);
    assert_eq!(events[0].cache[0].cycle, 3);
    assert_eq!(events[0].cache[0].rows_inserted, 3);
    assert_eq!(events[0].outcome, AuditOutcome::Ok);
}

#[tokio::test]
async fn site_detail_lists_rows_in_gigabytes() {
    let harness = harness();
    let json = body_json(get(&harness, "getData=1&dataType=siteDetail&siteName=T1_*").await).await;
    let datasets = json["datasets"].as_array().unwrap();
    assert_eq!(datasets.len(), 2);
    assert_eq!(datasets[0]["name"], "/a/Run2018A/AOD");
    assert_eq!(datasets[0]["size"], 2000.0);
    assert_eq!(datasets[0]["decision"], "delete");
}

#[tokio::test]
async fn dataset_search_groups_matches_by_site_from_form_body() {
    let harness = harness();
    let response = dispatch(
        Arc::clone(&harness.state),
        Some("searchDataset=1".to_string()),
        Bytes::from_static(b"datasetName=%2F*%2FRun2018*%2F*"),
    )
    .await;
    let json = body_json(response).await;
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["siteName"], "T1_A");
    assert_eq!(results[0]["datasets"].as_array().unwrap().len(), 1);
    assert_eq!(results[1]["siteName"], "T2_B");
}

#[tokio::test]
async fn inventory_groups_by_category() {
    let harness = harness();
    let json = body_json(get(&harness, "getData=1&dataType=inventory&category=sites").await).await;
    let groups = json["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["key"], "T1_A");
    assert_eq!(groups[0]["replicas"], 2);
}

#[tokio::test]
async fn dump_is_a_tab_separated_attachment() {
    let harness = harness();
    let response = get(&harness, "dumpDeletions=1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition =
        response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("detox_deletions_3.txt"));
    assert_eq!(body_text(response).await, "T1_A\t/a/Run2018A/AOD\t2000.00\n");
}

#[tokio::test]
async fn partitions_list_physics_first() {
    let harness = harness();
    let json = body_json(get(&harness, "getPartitions=1").await).await;
    let expected = serde_json::json!([
        {"id": 10, "name": "Physics"},
        {"id": 2, "name": "AnalysisOps"},
    ]);
    assert_eq!(json, expected);
    let json = body_json(get(&harness, "getPartitions=1&operation=deletion_test").await).await;
    assert_eq!(json, serde_json::json!([]));
}

#[tokio::test]
async fn page_substitutes_resolved_cycle() {
    let harness = harness();
    let response = get(&harness, "").await;
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    let page = body_text(response).await;
    assert!(page.contains("var initialCycle = 3;"));
    assert!(page.contains("<title>Detox monitor: Physics</title>"));
}

// ============================================================================
// SECTION: Errors
// ============================================================================

#[tokio::test]
async fn missing_site_name_is_a_structured_bad_request() {
    let harness = harness();
    let response = get(&harness, "getData=1&dataType=siteDetail").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["result"], "error");
    assert!(json["message"].as_str().unwrap().contains("siteName"));
    let events = harness.audit.events();
    assert_eq!(events[0].outcome, AuditOutcome::Rejected);
    assert_eq!(events[0].status, 400);
    assert!(events[0].cache.is_empty());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let harness = harness();
    let body = Bytes::from(vec![b'a'; 64 * 1024 + 1]);
    let response = dispatch(Arc::clone(&harness.state), None, body).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// ============================================================================
// SECTION: Server
// ============================================================================

#[tokio::test]
async fn health_reports_ok() {
    let harness = harness();
    let response = health(Arc::clone(&harness.state)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

#[tokio::test]
async fn server_from_config_serves_empty_store() {
    let dir = TempDir::new().unwrap();
    let mut config = DetoxConfig::default();
    config.store.path = dir.path().join("detox.sqlite");
    config.server.audit.enabled = false;
    let server = DetoxServer::from_config(&config).unwrap();
    let response = dispatch(server.state(), Some("checkUpdate=1".to_string()), Bytes::new()).await;
    assert_eq!(body_text(response).await, "0");
}

#[tokio::test]
async fn server_from_config_rejects_missing_template() {
    let dir = TempDir::new().unwrap();
    let mut config = DetoxConfig::default();
    config.store.path = dir.path().join("detox.sqlite");
    config.server.audit.enabled = false;
    config.report.page_template = Some(dir.path().join("absent.html"));
    assert!(DetoxServer::from_config(&config).is_err());
}
