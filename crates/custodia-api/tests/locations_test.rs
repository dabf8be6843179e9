//! Location API integration tests.
//!
//! Run with: `cargo test -p custodia-api --test locations_test`

mod helpers;

use helpers::auth::{admin_token, bearer};
use helpers::{fixtures, setup_test_app};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_create_show_and_list_location() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let create_res = client
        .post("/storage/location")
        .add_header("Authorization", bearer(&token))
        .json(&json!({
            "name": "permanent-1",
            "description": "Primary AIP store",
            "source": "minio",
            "purpose": "aip_store",
            "config": { "s3": { "bucket": "perma-aips-1", "region": "eu-west-1" } },
        }))
        .await;
    assert_eq!(create_res.status_code(), 201, "create location");
    let created: serde_json::Value = create_res.json();
    let uuid = created
        .get("uuid")
        .and_then(|v| v.as_str())
        .expect("uuid in response")
        .to_string();

    let show_res = client
        .get(&format!("/storage/location/{}", uuid))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(show_res.status_code(), 200, "show location");
    let shown: serde_json::Value = show_res.json();
    assert_eq!(shown["name"].as_str(), Some("permanent-1"));
    assert_eq!(shown["description"].as_str(), Some("Primary AIP store"));
    assert_eq!(shown["source"].as_str(), Some("minio"));
    assert_eq!(shown["purpose"].as_str(), Some("aip_store"));
    assert_eq!(shown["config"]["s3"]["bucket"].as_str(), Some("perma-aips-1"));

    let list_res = client
        .get("/storage/location")
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(list_res.status_code(), 200, "list locations");
    let list: Vec<serde_json::Value> = list_res.json();
    assert!(list
        .iter()
        .any(|l| l.get("uuid").and_then(|v| v.as_str()) == Some(uuid.as_str())));
}

#[tokio::test]
async fn test_location_source_is_derived_from_config() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    // No declared source: the config decides.
    let create_res = client
        .post("/storage/location")
        .add_header("Authorization", bearer(&token))
        .json(&json!({
            "name": "derived",
            "config": { "s3": { "bucket": "aips", "region": "us-east-1" } },
        }))
        .await;
    assert_eq!(create_res.status_code(), 201);
    let uuid = create_res.json::<serde_json::Value>()["uuid"]
        .as_str()
        .unwrap()
        .to_string();

    let shown: serde_json::Value = client
        .get(&format!("/storage/location/{}", uuid))
        .add_header("Authorization", bearer(&token))
        .await
        .json();
    assert_eq!(shown["source"].as_str(), Some("minio"));
    assert_eq!(shown["purpose"].as_str(), Some("unspecified"));
}

#[tokio::test]
async fn test_create_location_accepts_legacy_amss_tag() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let create_res = client
        .post("/storage/location")
        .add_header("Authorization", bearer(&token))
        .json(&json!({
            "name": "pipeline",
            "source": "amss",
            "config": {
                "ss": {
                    "url": "http://127.0.0.1:62081",
                    "username": "test",
                    "api_key": "secret",
                }
            },
        }))
        .await;
    assert_eq!(create_res.status_code(), 201, "legacy tag accepted");
    let uuid = create_res.json::<serde_json::Value>()["uuid"]
        .as_str()
        .unwrap()
        .to_string();

    // Serialization always uses the current tag.
    let shown: serde_json::Value = client
        .get(&format!("/storage/location/{}", uuid))
        .add_header("Authorization", bearer(&token))
        .await
        .json();
    assert_eq!(shown["source"].as_str(), Some("amss"));
    assert!(shown["config"].get("amss").is_some());
}

#[tokio::test]
async fn test_create_location_rejects_source_config_mismatch() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let res = client
        .post("/storage/location")
        .add_header("Authorization", bearer(&token))
        .json(&json!({
            "name": "mismatched",
            "source": "sftp",
            "config": { "s3": { "bucket": "aips", "region": "us-east-1" } },
        }))
        .await;
    assert_eq!(res.status_code(), 400);
    let body: serde_json::Value = res.json();
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("source: invalid value")
    );
}

#[tokio::test]
async fn test_create_location_rejects_incomplete_config() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let res = client
        .post("/storage/location")
        .add_header("Authorization", bearer(&token))
        .json(&json!({
            "name": "incomplete",
            "config": { "s3": { "bucket": "aips", "region": "" } },
        }))
        .await;
    assert_eq!(res.status_code(), 400);
    let body: serde_json::Value = res.json();
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("invalid configuration")
    );
}

#[tokio::test]
async fn test_create_location_rejects_unknown_purpose() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let res = client
        .post("/storage/location")
        .add_header("Authorization", bearer(&token))
        .json(&json!({
            "name": "odd-purpose",
            "purpose": "dip_store",
            "config": { "url": { "url": "memory:///" } },
        }))
        .await;
    assert_eq!(res.status_code(), 400);
    let body: serde_json::Value = res.json();
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("purpose: invalid value")
    );
}

#[tokio::test]
async fn test_list_location_aips() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();
    let (here, _bucket) = fixtures::memory_location(&app, "here").await;
    let (elsewhere, _bucket) = fixtures::memory_location(&app, "elsewhere").await;

    let held = fixtures::stored_aip(&app, "held.7z", here.uuid).await;
    fixtures::stored_aip(&app, "faraway.7z", elsewhere.uuid).await;

    let res = client
        .get(&format!("/storage/location/{}/aips", here.uuid))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(res.status_code(), 200, "list location AIPs");
    let aips: Vec<serde_json::Value> = res.json();
    assert_eq!(aips.len(), 1);
    assert_eq!(
        aips[0]["uuid"].as_str(),
        Some(held.uuid.to_string().as_str())
    );
}

#[tokio::test]
async fn test_list_location_aips_unknown_location_is_not_found() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = admin_token();

    let res = client
        .get(&format!("/storage/location/{}/aips", Uuid::new_v4()))
        .add_header("Authorization", bearer(&token))
        .await;
    assert_eq!(res.status_code(), 404);
    let body: serde_json::Value = res.json();
    assert_eq!(body.get("code").and_then(|v| v.as_str()), Some("not_found"));
}
