//! End-to-end runs against wiremock with a temporary output directory.

use std::path::Path;

use entra_export::auth::{DEFENDER_SCOPE, TokenProvider};
use entra_export::client::ApiClient;
use entra_export::error::Error;
use entra_export::orchestrate::*;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_client(server: &MockServer) -> ApiClient {
    let tp = TokenProvider::with_token("mock-token");
    ApiClient::with_base_url(tp, &format!("{}/", server.uri())).unwrap()
}

fn defender_options(dir: &Path, groups: &[&str]) -> DefenderExportOptions {
    DefenderExportOptions {
        groups: groups.iter().map(|g| g.to_string()).collect(),
        output_dir: dir.to_path_buf(),
        file_prefix: "defender_machines".to_string(),
    }
}

async fn mount_groups(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("api/machineGroups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                {"id": 1, "name": "Finance"},
                {"id": 2, "name": "IT"},
                {"id": 3, "name": "HR"},
                {"id": 4, "name": "SST"}
            ]
        })))
        .mount(server)
        .await;
}

async fn mount_machines(server: &MockServer, group_id: &str, body: serde_json::Value, hits: u64) {
    Mock::given(method("GET"))
        .and(path("api/machines"))
        .and(query_param(
            "$filter",
            format!("machineGroups/any(g:g/id eq '{group_id}')"),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(hits)
        .mount(server)
        .await;
}

fn two_machines(prefix: &str) -> serde_json::Value {
    serde_json::json!({
        "value": [
            {"id": format!("{prefix}-1"), "computerDnsName": format!("{prefix}1.contoso.com")},
            {"id": format!("{prefix}-2"), "computerDnsName": format!("{prefix}2.contoso.com")}
        ]
    })
}

// ── Defender exports ────────────────────────────────────────────────────

#[tokio::test]
async fn filtered_run_exports_requested_groups_in_availability_order() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();

    mount_groups(&server).await;
    mount_machines(&server, "1", two_machines("fin"), 1).await;
    mount_machines(&server, "2", two_machines("it"), 1).await;
    mount_machines(&server, "3", two_machines("hr"), 0).await;
    mount_machines(&server, "4", two_machines("sst"), 0).await;

    let manifest = export_device_groups(&client, &defender_options(dir.path(), &["IT", "Finance"]))
        .await
        .unwrap();

    let names: Vec<_> = manifest.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Finance", "IT"]);
    assert!(manifest.skipped.is_empty());

    for entry in &manifest.entries {
        assert!(entry.path.exists(), "{} should exist", entry.path.display());
        let file_name = entry.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with(&format!("defender_machines_{}_", entry.name)));
        assert!(file_name.ends_with(".xlsx"));
        let session = entry.path.parent().unwrap();
        assert_eq!(session.parent().unwrap(), dir.path());
        assert!(
            session
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("export_session_")
        );
    }
}

#[tokio::test]
async fn unfiltered_run_exports_every_group() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();

    mount_groups(&server).await;
    for id in ["1", "2", "3", "4"] {
        mount_machines(&server, id, two_machines(&format!("g{id}")), 1).await;
    }

    let manifest = export_device_groups(&client, &defender_options(dir.path(), &[]))
        .await
        .unwrap();
    assert_eq!(manifest.entries.len(), 4);
}

#[tokio::test]
async fn disjoint_filter_fails_fast_without_output() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();

    mount_groups(&server).await;
    Mock::given(method("GET"))
        .and(path("api/machines"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = export_device_groups(&client, &defender_options(dir.path(), &["Legal", "Ops"]))
        .await
        .unwrap_err();
    match err {
        Error::UnmatchedTargets {
            requested,
            available,
        } => {
            assert_eq!(requested, vec!["Legal", "Ops"]);
            assert_eq!(available, vec!["Finance", "IT", "HR", "SST"]);
        }
        other => panic!("expected UnmatchedTargets, got {other:?}"),
    }
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn failing_and_empty_groups_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();

    mount_groups(&server).await;
    mount_machines(&server, "1", two_machines("fin"), 1).await;
    mount_machines(&server, "2", serde_json::json!({"value": []}), 1).await;
    Mock::given(method("GET"))
        .and(path("api/machines"))
        .and(query_param("$filter", "machineGroups/any(g:g/id eq '3')"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .mount(&server)
        .await;

    let manifest =
        export_device_groups(&client, &defender_options(dir.path(), &["Finance", "IT", "HR"]))
            .await
            .unwrap();

    assert_eq!(manifest.entries.len(), 1);
    assert_eq!(manifest.entries[0].name, "Finance");

    assert_eq!(manifest.skipped.len(), 2);
    assert_eq!(manifest.skipped[0].name, "IT");
    assert_eq!(manifest.skipped[1].name, "HR");
    assert!(manifest.skipped[1].reason.contains("500"));
    assert!(manifest.skipped[1].reason.contains("backend exploded"));
}

#[tokio::test]
async fn group_listing_failure_aborts_run() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("api/machineGroups"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let err = export_device_groups(&client, &defender_options(dir.path(), &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { .. }));
}

#[tokio::test]
async fn authentication_failure_mid_run_is_fatal() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // The first grant succeeds; the re-acquisition after the 401 is refused.
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok", "expires_in": 3599
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000222: The provided client secret keys are expired.",
            "correlation_id": "corr-9"
        })))
        .mount(&server)
        .await;

    mount_groups(&server).await;
    Mock::given(method("GET"))
        .and(path("api/machines"))
        .and(query_param("$filter", "machineGroups/any(g:g/id eq '1')"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_machines(&server, "2", two_machines("it"), 0).await;

    let tp = TokenProvider::new("tenant", "client", "secret", vec![DEFENDER_SCOPE.to_string()])
        .with_authority(&server.uri());
    let client = ApiClient::with_base_url(tp, &format!("{}/", server.uri())).unwrap();

    let err = export_device_groups(&client, &defender_options(dir.path(), &["Finance", "IT"]))
        .await
        .unwrap_err();
    match err {
        Error::Auth { correlation_id, .. } => assert_eq!(correlation_id.as_deref(), Some("corr-9")),
        other => panic!("expected Auth error, got {other:?}"),
    }
}

// ── SharePoint downloads ────────────────────────────────────────────────

fn sharepoint_options(dir: &Path) -> SharePointDownloadOptions {
    SharePointDownloadOptions {
        site_name: "finance".to_string(),
        drive_id: None,
        folder_path: Some("Documents/Folder_With_CSV".to_string()),
        destination: dir.join("downloads"),
        extension: ".csv".to_string(),
    }
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("v1.0/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"id": "site-fin", "displayName": "Finance"}]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("v1.0/sites/site-fin/drives"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"id": "drive-docs"}]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn download_run_fetches_only_matching_files() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();
    mount_site(&server).await;

    Mock::given(method("GET"))
        .and(path(
            "v1.0/sites/site-fin/drives/drive-docs/root:/Documents/Folder_With_CSV:/children",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                {"id": "f1", "name": "q1.csv", "file": {}, "parentReference": {"driveId": "drive-docs"}},
                {"id": "f2", "name": "notes.docx", "file": {}, "parentReference": {"driveId": "drive-docs"}},
                {"id": "d1", "name": "old.csv", "folder": {"childCount": 1}, "parentReference": {"driveId": "drive-docs"}},
                {"id": "f3", "name": "Q2.CSV", "file": {}, "parentReference": {"driveId": "drive-docs"}}
            ]
        })))
        .mount(&server)
        .await;

    let base = "v1.0/sites/site-fin/drives/drive-docs/items";
    for (id, name, body) in [("f1", "q1.csv", "a,b\n1,2\n"), ("f3", "Q2.CSV", "c\n3\n")] {
        Mock::given(method("GET"))
            .and(path(format!("{base}/{id}/content")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{base}/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": id, "name": name
            })))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(format!("{base}/f2/content")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let manifest = download_site_files(&client, &sharepoint_options(dir.path()))
        .await
        .unwrap();

    assert_eq!(manifest.entries.len(), 2);
    assert!(manifest.skipped.is_empty());
    let first = &manifest.entries[0];
    assert_eq!(first.name, "q1.csv");
    assert_eq!(first.path, dir.path().join("downloads").join("q1.csv"));
    assert_eq!(std::fs::read_to_string(&first.path).unwrap(), "a,b\n1,2\n");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("downloads").join("Q2.CSV")).unwrap(),
        "c\n3\n"
    );
}

#[tokio::test]
async fn download_failure_is_skipped() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();
    mount_site(&server).await;

    Mock::given(method("GET"))
        .and(path(
            "v1.0/sites/site-fin/drives/drive-docs/root:/Documents/Folder_With_CSV:/children",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                {"id": "gone", "name": "gone.csv", "file": {}, "parentReference": {"driveId": "drive-docs"}},
                {"id": "orphan", "name": "orphan.csv", "file": {}}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("v1.0/sites/site-fin/drives/drive-docs/items/gone/content"))
        .respond_with(ResponseTemplate::new(404).set_body_string("itemNotFound"))
        .mount(&server)
        .await;
    // The orphan has no parent reference and is read from the resolved drive.
    Mock::given(method("GET"))
        .and(path("v1.0/sites/site-fin/drives/drive-docs/items/orphan/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x\n1\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("v1.0/sites/site-fin/drives/drive-docs/items/orphan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "orphan", "name": "orphan.csv"
        })))
        .mount(&server)
        .await;

    let manifest = download_site_files(&client, &sharepoint_options(dir.path()))
        .await
        .unwrap();
    assert_eq!(manifest.skipped.len(), 1);
    assert_eq!(manifest.skipped[0].name, "gone.csv");
    assert!(manifest.skipped[0].reason.contains("404"));

    assert_eq!(manifest.entries.len(), 1);
    let orphan = &manifest.entries[0];
    assert_eq!(orphan.path, dir.path().join("downloads").join("orphan.csv"));
    assert_eq!(std::fs::read_to_string(&orphan.path).unwrap(), "x\n1\n");
}

#[tokio::test]
async fn failed_metadata_keeps_listed_names_apart() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();
    mount_site(&server).await;

    Mock::given(method("GET"))
        .and(path(
            "v1.0/sites/site-fin/drives/drive-docs/root:/Documents/Folder_With_CSV:/children",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                {"id": "f1", "name": "a.csv", "file": {}, "parentReference": {"driveId": "drive-docs"}},
                {"id": "f2", "name": "b.csv", "file": {}, "parentReference": {"driveId": "drive-docs"}}
            ]
        })))
        .mount(&server)
        .await;

    let base = "v1.0/sites/site-fin/drives/drive-docs/items";
    for (id, body) in [("f1", "FIRST"), ("f2", "SECOND")] {
        Mock::given(method("GET"))
            .and(path(format!("{base}/{id}/content")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{base}/{id}")))
            .respond_with(ResponseTemplate::new(503).set_body_string("serviceNotAvailable"))
            .mount(&server)
            .await;
    }

    let manifest = download_site_files(&client, &sharepoint_options(dir.path()))
        .await
        .unwrap();
    assert!(manifest.skipped.is_empty());
    assert_eq!(manifest.entries.len(), 2);

    let downloads = dir.path().join("downloads");
    assert_eq!(manifest.entries[0].path, downloads.join("a.csv"));
    assert_eq!(manifest.entries[1].path, downloads.join("b.csv"));
    assert_eq!(std::fs::read_to_string(downloads.join("a.csv")).unwrap(), "FIRST");
    assert_eq!(std::fs::read_to_string(downloads.join("b.csv")).unwrap(), "SECOND");
    assert_eq!(std::fs::read_dir(&downloads).unwrap().count(), 2);
}

#[tokio::test]
async fn repeated_remote_names_get_numbered_paths() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();
    mount_site(&server).await;

    Mock::given(method("GET"))
        .and(path(
            "v1.0/sites/site-fin/drives/drive-docs/root:/Documents/Folder_With_CSV:/children",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                {"id": "f1", "name": "dup.csv", "file": {}, "parentReference": {"driveId": "drive-docs"}},
                {"id": "f2", "name": "dup.csv", "file": {}, "parentReference": {"driveId": "drive-other"}}
            ]
        })))
        .mount(&server)
        .await;

    for (drive, id, body) in [("drive-docs", "f1", "ONE"), ("drive-other", "f2", "TWO")] {
        let item = format!("v1.0/sites/site-fin/drives/{drive}/items/{id}");
        Mock::given(method("GET"))
            .and(path(format!("{item}/content")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(item))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": id, "name": "dup.csv"
            })))
            .mount(&server)
            .await;
    }

    let manifest = download_site_files(&client, &sharepoint_options(dir.path()))
        .await
        .unwrap();
    let downloads = dir.path().join("downloads");
    let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.clone()).collect();
    assert_eq!(paths, vec![downloads.join("dup.csv"), downloads.join("dup_1.csv")]);
    assert_eq!(std::fs::read_to_string(downloads.join("dup.csv")).unwrap(), "ONE");
    assert_eq!(std::fs::read_to_string(downloads.join("dup_1.csv")).unwrap(), "TWO");
}

#[tokio::test]
async fn unknown_site_is_not_found() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let dir = tempfile::tempdir().unwrap();
    mount_site(&server).await;

    let mut options = sharepoint_options(dir.path());
    options.site_name = "Legal".to_string();
    let err = download_site_files(&client, &options).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "site", ref name } if name == "Legal"));
}
