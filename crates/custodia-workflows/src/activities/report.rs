//! AIP deletion report.
//!
//! After a package is removed, the deletion workflow writes a report
//! describing who asked, who approved, and where the AIP lived. The
//! report ends up in the internal bucket under [`REPORT_PREFIX`] and its
//! key is recorded on the AIP so the facade can serve it later.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use custodia_core::models::{DeletionRequestStatus, LocationSource, INTERNAL_LOCATION_UUID};
use custodia_db::store::DeletionRequestFilter;
use serde::Serialize;
use uuid::Uuid;

use crate::custody::CustodyService;
use crate::error::ActivityError;

pub const REPORT_PREFIX: &str = "reports/";

/// Object key of the deletion report for an AIP.
pub fn deletion_report_key(aip_uuid: Uuid) -> String {
    format!("{}aip_deletion_report_{}.pdf", REPORT_PREFIX, aip_uuid)
}

/// Everything the report document states about a deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReportData {
    pub aip_name: String,
    pub aip_uuid: Uuid,
    pub deleted_at: DateTime<Utc>,
    pub service_version: &'static str,
    pub preservation_system: &'static str,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub requester: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewer: String,
    pub status: String,
    pub storage_location: String,
    pub storage_system: &'static str,
    pub report_timestamp: DateTime<Utc>,
}

/// Turns collected report data into the stored document.
pub trait FormFiller: Send + Sync {
    fn fill(&self, data: &DeletionReportData) -> Result<Bytes, anyhow::Error>;
}

/// Renders the report data as a JSON document.
pub struct JsonFormFiller;

impl FormFiller for JsonFormFiller {
    fn fill(&self, data: &DeletionReportData) -> Result<Bytes, anyhow::Error> {
        Ok(Bytes::from(serde_json::to_vec_pretty(data)?))
    }
}

/// Builds the deletion report for an AIP, writes it to the internal
/// bucket, and records the key on the AIP. Returns the key.
pub async fn generate_deletion_report(
    custody: &CustodyService,
    filler: &dyn FormFiller,
    aip_uuid: Uuid,
    source: LocationSource,
) -> Result<String, ActivityError> {
    let aip = custody.store().read_aip(aip_uuid).await?;

    let requests = custody
        .store()
        .list_deletion_requests(&DeletionRequestFilter {
            aip_uuid: Some(aip_uuid),
            status: Some(DeletionRequestStatus::Approved),
        })
        .await?;
    let request = requests
        .into_iter()
        .max_by_key(|request| request.requested_at)
        .ok_or_else(|| {
            ActivityError::non_retryable(format!(
                "no approved deletion request found for AIP {}",
                aip_uuid
            ))
        })?;

    let (preservation_system, storage_system) = match source {
        LocationSource::Amss => ("Archivematica", "Archivematica Storage Service"),
        _ => ("a3m", "Custodia Storage Service"),
    };

    let now = Utc::now();
    let data = DeletionReportData {
        aip_name: aip.name.clone(),
        aip_uuid: aip.uuid,
        deleted_at: now,
        service_version: env!("CARGO_PKG_VERSION"),
        preservation_system,
        reason: request.reason.clone(),
        requested_at: request.requested_at,
        requester: request.requester.clone(),
        reviewed_at: request.reviewed_at,
        reviewer: request.reviewer.clone().unwrap_or_default(),
        status: request.status.to_string(),
        storage_location: aip
            .location_uuid
            .unwrap_or(INTERNAL_LOCATION_UUID)
            .to_string(),
        storage_system,
        report_timestamp: now,
    };

    let document = filler
        .fill(&data)
        .map_err(|err| ActivityError::non_retryable(format!("fill report form: {}", err)))?;

    let key = deletion_report_key(aip_uuid);
    let bucket = custody.locations().internal().bucket().await?;
    bucket.write_bytes(&key, document).await?;

    custody
        .set_aip_deletion_report_key(aip_uuid, key.clone())
        .await?;

    tracing::info!(aip_uuid = %aip_uuid, key = %key, "wrote AIP deletion report");
    Ok(key)
}
