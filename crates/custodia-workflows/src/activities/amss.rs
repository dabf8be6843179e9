//! Deletion of a package held by an Archivematica Storage Service.
//!
//! AMSS keeps custody of its packages, so deletion is a request/review
//! round trip: file a deletion request, then poll the package until a
//! pipeline administrator approves or rejects it. With auto approval the
//! service reviews its own request and returns without polling.

use std::time::Duration;

use custodia_storage::amss::{
    PACKAGE_STATUS_DELETED, PACKAGE_STATUS_DELETION_REQUESTED, PACKAGE_STATUS_UPLOADED,
};
use custodia_storage::AmssClient;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::context::{wait_canceled, Heartbeat};
use crate::error::ActivityError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmssDeleteParams {
    pub aip_uuid: Uuid,
    pub reason: String,
    pub user_email: String,
    pub auto_approve: bool,
}

/// Drives a package deletion through the AMSS deletion API.
///
/// Returns `true` once AMSS reports the package deleted and `false` when
/// the review left it in place.
pub async fn delete_from_amss_location(
    client: &AmssClient,
    params: &AmssDeleteParams,
    poll_interval: Duration,
    heartbeat: Heartbeat,
    mut cancel: watch::Receiver<bool>,
) -> Result<bool, ActivityError> {
    let package = client.read_package(params.aip_uuid).await?;
    let pipeline = package.pipeline_uuid();
    if pipeline.is_empty() {
        return Err(ActivityError::non_retryable(
            "package has no origin pipeline",
        ));
    }

    let event_id = client
        .request_delete(params.aip_uuid, &pipeline, &params.reason, &params.user_email)
        .await?;
    tracing::info!(
        aip_uuid = %params.aip_uuid,
        event_id,
        "requested package deletion from AMSS"
    );

    if params.auto_approve {
        client
            .approve_delete(params.aip_uuid, event_id, &params.reason)
            .await?;
        return Ok(true);
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The interval's first tick fires immediately; skip it so polling
    // starts one interval after the request was filed.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = wait_canceled(&mut cancel) => return Err(ActivityError::Canceled),
            _ = ticker.tick() => {}
        }
        heartbeat.beat().await;

        let package = client.read_package(params.aip_uuid).await?;
        match package.status.as_str() {
            PACKAGE_STATUS_DELETED => return Ok(true),
            PACKAGE_STATUS_UPLOADED => return Ok(false),
            PACKAGE_STATUS_DELETION_REQUESTED => {}
            other => {
                return Err(ActivityError::non_retryable(format!(
                    "unexpected package status: {}",
                    other
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executions::{ExecutionStore, MemoryExecutionStore};
    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use custodia_core::models::AmssConfig;
    use serde_json::{json, Value as JsonValue};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Stub {
        statuses: Arc<Mutex<VecDeque<&'static str>>>,
        delete_requests: Arc<AtomicU32>,
        approvals: Arc<AtomicU32>,
    }

    impl Stub {
        fn with_statuses(statuses: &[&'static str]) -> Self {
            Self {
                statuses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
                ..Default::default()
            }
        }

        fn next_status(&self) -> &'static str {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PACKAGE_STATUS_DELETION_REQUESTED)
        }
    }

    async fn read_package(State(stub): State<Stub>) -> Json<JsonValue> {
        Json(json!({
            "status": stub.next_status(),
            "origin_pipeline": "/api/v2/pipeline/9e0b0185-d552-4a3c-bb17-d0f40e54db98/",
        }))
    }

    async fn delete_aip(State(stub): State<Stub>) -> Json<JsonValue> {
        stub.delete_requests.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "id": 7 }))
    }

    async fn review_deletion(State(stub): State<Stub>) -> Json<JsonValue> {
        stub.approvals.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "error_message": "" }))
    }

    async fn serve(stub: Stub) -> String {
        let app = Router::new()
            .route("/api/v2/file/{uuid}/", get(read_package))
            .route("/api/v2/file/{uuid}/delete_aip/", post(delete_aip))
            .route("/api/v2/file/{uuid}/review_aip_deletion/", post(review_deletion))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn client(base_url: String) -> AmssClient {
        AmssClient::new(&AmssConfig {
            url: base_url,
            username: "test".to_string(),
            api_key: "secret".to_string(),
        })
        .unwrap()
    }

    async fn heartbeat() -> Heartbeat {
        let store = Arc::new(MemoryExecutionStore::new());
        let record = store.insert("wf-1", "test", &json!({})).await.unwrap();
        Heartbeat::new(store, record.db_id)
    }

    fn params(auto_approve: bool) -> AmssDeleteParams {
        AmssDeleteParams {
            aip_uuid: Uuid::new_v4(),
            reason: "duplicate of another AIP".to_string(),
            user_email: "requester@example.com".to_string(),
            auto_approve,
        }
    }

    #[tokio::test]
    async fn test_polls_until_package_deleted() {
        let stub = Stub::with_statuses(&[
            PACKAGE_STATUS_UPLOADED,
            PACKAGE_STATUS_DELETION_REQUESTED,
            PACKAGE_STATUS_DELETED,
        ]);
        let client = client(serve(stub.clone()).await).await;
        let (_cancel_tx, cancel) = watch::channel(false);

        let deleted = delete_from_amss_location(
            &client,
            &params(false),
            Duration::from_millis(10),
            heartbeat().await,
            cancel,
        )
        .await
        .unwrap();

        assert!(deleted);
        assert_eq!(stub.delete_requests.load(Ordering::SeqCst), 1);
        assert_eq!(stub.approvals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_review_leaves_package() {
        let stub = Stub::with_statuses(&[
            PACKAGE_STATUS_UPLOADED,
            PACKAGE_STATUS_DELETION_REQUESTED,
            PACKAGE_STATUS_UPLOADED,
        ]);
        let client = client(serve(stub.clone()).await).await;
        let (_cancel_tx, cancel) = watch::channel(false);

        let deleted = delete_from_amss_location(
            &client,
            &params(false),
            Duration::from_millis(10),
            heartbeat().await,
            cancel,
        )
        .await
        .unwrap();

        assert!(!deleted);
    }

    #[tokio::test]
    async fn test_auto_approve_skips_polling() {
        let stub = Stub::with_statuses(&[PACKAGE_STATUS_UPLOADED]);
        let client = client(serve(stub.clone()).await).await;
        let (_cancel_tx, cancel) = watch::channel(false);

        let deleted = delete_from_amss_location(
            &client,
            &params(true),
            Duration::from_secs(60),
            heartbeat().await,
            cancel,
        )
        .await
        .unwrap();

        assert!(deleted);
        assert_eq!(stub.approvals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unexpected_status_is_fatal() {
        let stub = Stub::with_statuses(&[PACKAGE_STATUS_UPLOADED, "FAIL"]);
        let client = client(serve(stub.clone()).await).await;
        let (_cancel_tx, cancel) = watch::channel(false);

        let err = delete_from_amss_location(
            &client,
            &params(false),
            Duration::from_millis(10),
            heartbeat().await,
            cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ActivityError::NonRetryable(_)));
        assert!(err.to_string().contains("FAIL"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        // The queue drains to DEL_REQ forever, so only cancellation ends
        // the poll.
        let stub = Stub::with_statuses(&[PACKAGE_STATUS_UPLOADED]);
        let client = client(serve(stub.clone()).await).await;
        let (cancel_tx, cancel) = watch::channel(false);

        let handle = {
            let params = params(false);
            tokio::spawn(async move {
                delete_from_amss_location(
                    &client,
                    &params,
                    Duration::from_millis(10),
                    heartbeat().await,
                    cancel,
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ActivityError::Canceled));
    }
}
