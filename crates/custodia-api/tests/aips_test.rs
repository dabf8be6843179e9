//! AIP lifecycle integration tests: submission, registration, listing,
//! and review.
//!
//! Run with: `cargo test -p custodia-api --test aips_test`

mod helpers;

use bytes::Bytes;
use custodia_core::models::AipStatus;
use custodia_db::ArchiveStore;
use custodia_workflows::{upload_workflow_id, ExecutionStatus};
use helpers::auth::{admin_token, bearer};
use helpers::{fixtures, setup_test_app};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_submission_lifecycle() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();
    let aip_uuid = Uuid::new_v4();

    let submit_res = client
        .post(&format!("/storage/aip/{}/submit", aip_uuid))
        .add_header("Authorization", bearer(&token))
        .json(&json!({ "name": "transfer-2024.7z" }))
        .await;
    assert_eq!(submit_res.status_code(), 202, "open submission");
    let submitted: serde_json::Value = submit_res.json();
    let url = submitted
        .get("url")
        .and_then(|v| v.as_str())
        .expect("url in response");

    // The signed URL targets the package object in the internal bucket.
    let aip = app.store.read_aip(aip_uuid).await.unwrap();
    assert_eq!(aip.status, AipStatus::Unspecified);
    assert_eq!(
        url,
        format!(
            "memory://internal/{}?method=PUT&expires_in=900",
            aip.object_key
        )
    );

    let show_res = client
        .get(&format!("/storage/aip/{}", aip_uuid))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(show_res.status_code(), 200, "show submitted AIP");
    let shown: serde_json::Value = show_res.json();
    assert_eq!(
        shown.get("name").and_then(|v| v.as_str()),
        Some("transfer-2024.7z")
    );
    assert_eq!(
        shown.get("status").and_then(|v| v.as_str()),
        Some("unspecified")
    );

    // Stand in for the client PUT against the signed URL.
    let internal = app.locations.internal().bucket().await.unwrap();
    internal
        .write_bytes(&aip.object_key.to_string(), Bytes::from_static(b"package"))
        .await
        .unwrap();

    let update_res = client
        .post(&format!("/storage/aip/{}/update", aip_uuid))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(update_res.status_code(), 202, "report upload done");

    let aip = app.store.read_aip(aip_uuid).await.unwrap();
    assert_eq!(aip.status, AipStatus::InReview);
    fixtures::wait_execution(
        &app,
        &upload_workflow_id(aip_uuid),
        ExecutionStatus::Completed,
    )
    .await;
}

#[tokio::test]
async fn test_submit_with_open_submission_is_unavailable() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();
    let aip_uuid = Uuid::new_v4();

    let first = client
        .post(&format!("/storage/aip/{}/submit", aip_uuid))
        .add_header("Authorization", bearer(&token))
        .json(&json!({ "name": "pkg.7z" }))
        .await;
    assert_eq!(first.status_code(), 202);

    // The submission window is still open, so a second submit is refused.
    let second = client
        .post(&format!("/storage/aip/{}/submit", aip_uuid))
        .add_header("Authorization", bearer(&token))
        .json(&json!({ "name": "pkg.7z" }))
        .await;
    assert_eq!(second.status_code(), 409, "submission already open");
    let body: serde_json::Value = second.json();
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("cannot perform operation")
    );
    assert_eq!(
        body.get("code").and_then(|v| v.as_str()),
        Some("not_available")
    );
}

#[tokio::test]
async fn test_submission_retry_reuses_package_object() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();
    let aip_uuid = Uuid::new_v4();

    let first = client
        .post(&format!("/storage/aip/{}/submit", aip_uuid))
        .add_header("Authorization", bearer(&token))
        .json(&json!({ "name": "pkg.7z" }))
        .await;
    assert_eq!(first.status_code(), 202);
    let first_url = first.json::<serde_json::Value>()["url"]
        .as_str()
        .unwrap()
        .to_string();

    let update = client
        .post(&format!("/storage/aip/{}/update", aip_uuid))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(update.status_code(), 202);
    fixtures::wait_execution(
        &app,
        &upload_workflow_id(aip_uuid),
        ExecutionStatus::Completed,
    )
    .await;

    // Retrying after the previous submission closed signs a URL for the
    // same object key.
    let retry = client
        .post(&format!("/storage/aip/{}/submit", aip_uuid))
        .add_header("Authorization", bearer(&token))
        .json(&json!({ "name": "pkg.7z" }))
        .await;
    assert_eq!(retry.status_code(), 202, "retry submission");
    let retry_url = retry.json::<serde_json::Value>()["url"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(retry_url, first_url);
}

#[tokio::test]
async fn test_create_registers_migrated_aip() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();
    let (location, _bucket) = fixtures::memory_location(&app, "perma").await;

    let aip_uuid = Uuid::new_v4();
    let object_key = Uuid::new_v4();
    let body = json!({
        "name": "migrated.7z",
        "uuid": aip_uuid.to_string(),
        "status": "stored",
        "object_key": object_key.to_string(),
        "location_uuid": location.uuid,
    });

    let create_res = client
        .post("/storage/aip")
        .add_header("Authorization", bearer(&token))
        .json(&body)
        .await;
    assert_eq!(create_res.status_code(), 201, "register AIP");
    let created: serde_json::Value = create_res.json();
    assert_eq!(
        created.get("uuid").and_then(|v| v.as_str()),
        Some(aip_uuid.to_string().as_str())
    );
    assert_eq!(created.get("status").and_then(|v| v.as_str()), Some("stored"));
    assert_eq!(
        created.get("location_uuid").and_then(|v| v.as_str()),
        Some(location.uuid.to_string().as_str())
    );
    let created_at = created
        .get("created_at")
        .and_then(|v| v.as_str())
        .expect("created_at in response")
        .to_string();

    // Registering the same UUID again returns the existing record unchanged.
    let repeat_res = client
        .post("/storage/aip")
        .add_header("Authorization", bearer(&token))
        .json(&body)
        .await;
    assert_eq!(repeat_res.status_code(), 201, "repeat registration");
    let repeated: serde_json::Value = repeat_res.json();
    assert_eq!(
        repeated.get("created_at").and_then(|v| v.as_str()),
        Some(created_at.as_str())
    );
}

#[tokio::test]
async fn test_create_rejects_malformed_uuid() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let res = client
        .post("/storage/aip")
        .add_header("Authorization", bearer(&token))
        .json(&json!({
            "name": "pkg.7z",
            "uuid": "not-a-uuid",
            "object_key": Uuid::new_v4().to_string(),
        }))
        .await;
    assert_eq!(res.status_code(), 400);
    let body: serde_json::Value = res.json();
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("invalid aip_id")
    );
    assert_eq!(body.get("code").and_then(|v| v.as_str()), Some("not_valid"));
}

#[tokio::test]
async fn test_create_rejects_unknown_status() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let res = client
        .post("/storage/aip")
        .add_header("Authorization", bearer(&token))
        .json(&json!({
            "name": "pkg.7z",
            "uuid": Uuid::new_v4().to_string(),
            "status": "waiting",
            "object_key": Uuid::new_v4().to_string(),
        }))
        .await;
    assert_eq!(res.status_code(), 400);
    let body: serde_json::Value = res.json();
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("status: invalid value")
    );
}

#[tokio::test]
async fn test_list_aips_filters_and_pages() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();
    let (location, _bucket) = fixtures::memory_location(&app, "perma").await;

    for i in 0..3 {
        fixtures::stored_aip(&app, &format!("annual-report-{}", i), location.uuid).await;
    }
    fixtures::in_review_aip(&app, "fresh-transfer").await;

    let all_res = client
        .get("/storage/aip")
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(all_res.status_code(), 200, "list all");
    let all: serde_json::Value = all_res.json();
    assert_eq!(all["items"].as_array().map(|a| a.len()), Some(4));
    assert_eq!(all["page"]["total"].as_i64(), Some(4));

    let stored_res = client
        .get("/storage/aip")
        .add_header("Authorization", bearer(&token))
        .add_query_param("status", "stored")
        .add_query_param("limit", "2")
        .add_query_param("offset", "0")
        .await;
    assert_eq!(stored_res.status_code(), 200, "list stored page");
    let stored: serde_json::Value = stored_res.json();
    assert_eq!(stored["items"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(stored["page"]["limit"].as_i64(), Some(2));
    assert_eq!(stored["page"]["offset"].as_i64(), Some(0));
    assert_eq!(stored["page"]["total"].as_i64(), Some(3));
    for item in stored["items"].as_array().unwrap() {
        assert_eq!(item["status"].as_str(), Some("stored"));
    }

    let named_res = client
        .get("/storage/aip")
        .add_header("Authorization", bearer(&token))
        .add_query_param("name", "fresh")
        .await;
    assert_eq!(named_res.status_code(), 200, "list by name");
    let named: serde_json::Value = named_res.json();
    assert_eq!(named["items"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(named["items"][0]["name"].as_str(), Some("fresh-transfer"));

    let bad_res = client
        .get("/storage/aip")
        .add_header("Authorization", bearer(&token))
        .add_query_param("status", "nonsense")
        .await;
    assert_eq!(bad_res.status_code(), 400, "invalid status filter");
    let bad: serde_json::Value = bad_res.json();
    assert_eq!(
        bad.get("error").and_then(|v| v.as_str()),
        Some("status: invalid value")
    );
}

#[tokio::test]
async fn test_show_unknown_aip_is_not_found() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let res = client
        .get(&format!("/storage/aip/{}", Uuid::new_v4()))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(res.status_code(), 404);
    let body: serde_json::Value = res.json();
    assert_eq!(body.get("code").and_then(|v| v.as_str()), Some("not_found"));
}

#[tokio::test]
async fn test_reject_aip_under_review() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();
    let aip = fixtures::in_review_aip(&app, "suspect.7z").await;

    let res = client
        .post(&format!("/storage/aip/{}/reject", aip.uuid))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(res.status_code(), 202, "reject AIP");

    let aip = app.store.read_aip(aip.uuid).await.unwrap();
    assert_eq!(aip.status, AipStatus::Rejected);
}

#[tokio::test]
async fn test_reject_stored_aip_is_not_valid() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();
    let (location, _bucket) = fixtures::memory_location(&app, "perma").await;
    let aip = fixtures::stored_aip(&app, "kept.7z", location.uuid).await;

    let res = client
        .post(&format!("/storage/aip/{}/reject", aip.uuid))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(res.status_code(), 400, "stored AIPs cannot be rejected");
    let body: serde_json::Value = res.json();
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("AIP status cannot change from stored to rejected")
    );

    let aip = app.store.read_aip(aip.uuid).await.unwrap();
    assert_eq!(aip.status, AipStatus::Stored);
}
