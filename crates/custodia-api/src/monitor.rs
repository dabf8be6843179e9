//! Server-sent event feed of storage lifecycle events.
//!
//! A feed greets the client, then interleaves bus events with periodic
//! pings so idle connections stay warm through proxies. Events are
//! filtered per client: each event type maps to the attribute a client
//! would need to read the same data through the REST surface.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::Event;
use custodia_core::auth::{
    check_attributes, AIPS_LIST_ATTR, AIPS_REVIEW_ATTR, AIPS_WORKFLOWS_LIST_ATTR,
    LOCATIONS_LIST_ATTR,
};
use custodia_core::Claims;
use custodia_events::{StorageEvent, StoragePingEvent, Subscription};
use futures::stream::{self, Stream, StreamExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Whether `claims` may see `event`. Pings always pass; clients without
/// claims see everything, matching attribute checks elsewhere.
pub fn event_allowed(claims: Option<&Claims>, event: &StorageEvent) -> bool {
    let required: &[&str] = match event {
        StorageEvent::StoragePing(_) => return true,
        StorageEvent::LocationCreated(_) => &[LOCATIONS_LIST_ATTR],
        StorageEvent::AipCreated(_)
        | StorageEvent::AipStatusUpdated(_)
        | StorageEvent::AipLocationUpdated(_) => &[AIPS_LIST_ATTR],
        StorageEvent::AipWorkflowCreated(_)
        | StorageEvent::AipWorkflowUpdated(_)
        | StorageEvent::AipTaskCreated(_)
        | StorageEvent::AipTaskUpdated(_) => &[AIPS_WORKFLOWS_LIST_ATTR],
        StorageEvent::AipDeletionRequestCreated(_)
        | StorageEvent::AipDeletionRequestUpdated(_) => &[AIPS_REVIEW_ATTR],
    };
    check_attributes(claims, required)
}

struct FeedState {
    claims: Option<Claims>,
    subscription: Subscription,
    ping: tokio::time::Interval,
}

/// Builds the event stream for one monitor client. Ends when the bus
/// closes, which drops the subscription and the connection.
pub fn monitor_stream(
    claims: Option<Claims>,
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    let mut ping = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let hello = StorageEvent::StoragePing(StoragePingEvent {
        message: Some("Hello".to_string()),
    });

    let state = FeedState {
        claims,
        subscription,
        ping,
    };

    stream::iter([sse_event(&hello)]).chain(stream::unfold(state, |mut state| async move {
        loop {
            tokio::select! {
                _ = state.ping.tick() => {
                    let ping = StorageEvent::StoragePing(StoragePingEvent {
                        message: Some("Ping".to_string()),
                    });
                    return Some((sse_event(&ping), state));
                }
                received = state.subscription.recv() => {
                    match received {
                        Some(event) if event_allowed(state.claims.as_ref(), &event) => {
                            return Some((sse_event(&event), state));
                        }
                        Some(_) => continue,
                        None => return None,
                    }
                }
            }
        }
    }))
}

fn sse_event(event: &StorageEvent) -> Result<Event, Infallible> {
    match Event::default().json_data(event) {
        Ok(item) => Ok(item),
        Err(err) => {
            tracing::error!(error = %err, kind = event.kind(), "cannot encode event");
            Ok(Event::default().comment("encoding error"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_core::models::AipStatus;
    use custodia_events::{
        AipDeletionRequestEvent, AipStatusUpdatedEvent, EventBus, InMemEventBus,
        LocationCreatedEvent,
    };
    use uuid::Uuid;

    fn claims_with(attributes: Vec<&str>) -> Claims {
        Claims {
            email: "user@example.com".to_string(),
            email_verified: true,
            name: "User".to_string(),
            iss: "https://idp.example.com".to_string(),
            sub: "user-1".to_string(),
            attributes: Some(attributes.into_iter().map(String::from).collect()),
        }
    }

    fn status_event() -> StorageEvent {
        StorageEvent::AipStatusUpdated(AipStatusUpdatedEvent {
            uuid: Uuid::new_v4(),
            status: AipStatus::Stored,
        })
    }

    #[test]
    fn test_ping_always_allowed() {
        let claims = claims_with(vec![]);
        let ping = StorageEvent::StoragePing(StoragePingEvent::default());
        assert!(event_allowed(Some(&claims), &ping));
        assert!(event_allowed(None, &ping));
    }

    #[test]
    fn test_no_claims_sees_everything() {
        assert!(event_allowed(None, &status_event()));
    }

    #[test]
    fn test_aip_events_need_list_attribute() {
        let allowed = claims_with(vec![AIPS_LIST_ATTR]);
        let denied = claims_with(vec![LOCATIONS_LIST_ATTR]);

        assert!(event_allowed(Some(&allowed), &status_event()));
        assert!(!event_allowed(Some(&denied), &status_event()));
    }

    #[test]
    fn test_wildcard_attribute_matches() {
        let claims = claims_with(vec!["storage:*"]);
        assert!(event_allowed(Some(&claims), &status_event()));
    }

    #[test]
    fn test_deletion_request_events_need_review_attribute() {
        let event = StorageEvent::AipDeletionRequestCreated(AipDeletionRequestEvent {
            uuid: Uuid::new_v4(),
            item: deletion_request(),
        });

        let reviewer = claims_with(vec![AIPS_REVIEW_ATTR]);
        let reader = claims_with(vec![AIPS_LIST_ATTR]);

        assert!(event_allowed(Some(&reviewer), &event));
        assert!(!event_allowed(Some(&reader), &event));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_greets_then_forwards_allowed_events() {
        let bus = InMemEventBus::new();
        let subscription = bus.subscribe().await;
        let claims = claims_with(vec![AIPS_LIST_ATTR]);

        let mut stream = Box::pin(monitor_stream(Some(claims), subscription));

        let hello = stream.next().await.unwrap().unwrap();
        let hello = format!("{:?}", hello);
        assert!(hello.contains("Hello"), "greeting missing: {}", hello);

        // An event the client may not see is skipped; one it may see
        // comes through.
        bus.publish(StorageEvent::LocationCreated(LocationCreatedEvent {
            uuid: Uuid::new_v4(),
            item: location(),
        }))
        .await;
        bus.publish(status_event()).await;

        let forwarded = stream.next().await.unwrap().unwrap();
        let forwarded = format!("{:?}", forwarded);
        assert!(
            forwarded.contains("aip_status_updated"),
            "unexpected item: {}",
            forwarded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_pings_when_idle() {
        let bus = InMemEventBus::new();
        let subscription = bus.subscribe().await;

        let mut stream = Box::pin(monitor_stream(None, subscription));
        stream.next().await.unwrap().unwrap();

        tokio::time::advance(PING_INTERVAL + Duration::from_millis(1)).await;

        let item = stream.next().await.unwrap().unwrap();
        let item = format!("{:?}", item);
        assert!(item.contains("Ping"), "expected ping: {}", item);
    }

    fn deletion_request() -> custodia_core::models::DeletionRequest {
        custodia_core::models::DeletionRequest {
            db_id: 1,
            uuid: Uuid::new_v4(),
            aip_uuid: Uuid::new_v4(),
            workflow_db_id: 1,
            reason: "duplicate holdings".to_string(),
            requester: "curator@example.org".to_string(),
            requester_iss: "https://sso.example.org".to_string(),
            requester_sub: "curator".to_string(),
            reviewer: None,
            reviewer_iss: None,
            reviewer_sub: None,
            status: custodia_core::models::DeletionRequestStatus::Pending,
            requested_at: chrono::Utc::now(),
            reviewed_at: None,
        }
    }

    fn location() -> custodia_core::models::Location {
        custodia_core::models::Location {
            uuid: Uuid::new_v4(),
            name: "perma".to_string(),
            description: None,
            source: custodia_core::models::LocationSource::Minio,
            purpose: custodia_core::models::LocationPurpose::AipStore,
            config: custodia_core::models::LocationConfig::Url(custodia_core::models::UrlConfig {
                url: "https://bucket.example.com".to_string(),
            }),
            created_at: chrono::Utc::now(),
        }
    }
}
