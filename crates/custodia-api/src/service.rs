//! Storage service facade.
//!
//! Every API operation funnels through this service: it validates input,
//! reads and mutates state through the custody layer, and drives the
//! long-running pieces (submission, relocation, deletion) through the
//! workflow engine. Handlers stay thin; the behavior lives here.

use std::sync::Arc;
use std::time::Duration;

use custodia_core::models::{
    Aip, AipStatus, DeletionRequestStatus, Location, LocationConfig, LocationPurpose,
    LocationSource, Workflow,
};
use custodia_core::{AppError, Claims};
use custodia_db::store::{AipFilter, AipPage, NewAip, NewLocation, WorkflowFilter, MAX_PAGE_SIZE};
use custodia_events::Subscription;
use custodia_storage::{BucketError, BucketReader};
use custodia_workflows::activities::report::REPORT_PREFIX;
use custodia_workflows::{
    delete_workflow_id, move_workflow_id, upload_workflow_id, CustodyService,
    DeleteWorkflowRequest, DeletionDecisionSignal, ExecutionStatus, IdReusePolicy,
    MoveWorkflowRequest, UploadDoneSignal, UploadWorkflowRequest, WorkflowEngine,
    DELETE_WORKFLOW_NAME, DELETION_DECISION_SIGNAL, MOVE_WORKFLOW_NAME, UPLOAD_DONE_SIGNAL,
    UPLOAD_WORKFLOW_NAME,
};
use http::Method;
use serde::Serialize;
use uuid::Uuid;

use crate::tickets::TicketProvider;

/// Result of a successful submission: where the client should PUT the
/// package bytes.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitAipResult {
    pub url: String,
}

/// Progress of a relocation.
#[derive(Debug, Clone, Serialize)]
pub struct MoveStatusResult {
    pub done: bool,
}

/// Workflow history of one AIP.
#[derive(Debug, Clone, Serialize)]
pub struct AipWorkflows {
    pub workflows: Vec<Workflow>,
}

/// An open download: response metadata plus the object byte stream.
pub struct AipDownload {
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub filename: String,
    pub reader: BucketReader,
}

/// Input for registering an AIP that already has an object key.
#[derive(Debug, Clone)]
pub struct CreateAipParams {
    pub name: String,
    pub uuid: String,
    pub status: Option<AipStatus>,
    pub object_key: String,
    pub location_uuid: Option<Uuid>,
}

/// Input for registering a new location.
#[derive(Debug, Clone)]
pub struct CreateLocationParams {
    pub name: String,
    pub description: Option<String>,
    pub source: Option<String>,
    pub purpose: Option<String>,
    pub config: LocationConfig,
}

pub struct StorageService {
    custody: Arc<CustodyService>,
    engine: Arc<WorkflowEngine>,
    tickets: TicketProvider,
    submit_url_expiry: Duration,
}

impl StorageService {
    pub fn new(
        custody: Arc<CustodyService>,
        engine: Arc<WorkflowEngine>,
        tickets: TicketProvider,
        submit_url_expiry: Duration,
    ) -> Self {
        Self {
            custody,
            engine,
            tickets,
            submit_url_expiry,
        }
    }

    pub fn custody(&self) -> &CustodyService {
        &self.custody
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    // ---- AIP lifecycle ----

    /// Opens a submission: starts the upload workflow, registers the AIP,
    /// and mints a signed PUT URL into the internal bucket. Retrying a
    /// submission reuses the existing AIP record and its object key.
    pub async fn submit_aip(&self, aip_id: &str, name: &str) -> Result<SubmitAipResult, AppError> {
        let aip_uuid = parse_uuid(aip_id)?;

        self.engine
            .start(
                &upload_workflow_id(aip_uuid),
                UPLOAD_WORKFLOW_NAME,
                &UploadWorkflowRequest { aip_uuid },
                IdReusePolicy::AllowDuplicate,
            )
            .await
            .map_err(|err| {
                tracing::error!(error = %err, aip_uuid = %aip_uuid, "cannot start upload workflow");
                AppError::NotAvailable("cannot perform operation".to_string())
            })?;

        let object_key = Uuid::new_v4();
        let aip = match self
            .custody
            .create_aip(NewAip {
                uuid: aip_uuid,
                name: name.to_string(),
                object_key,
                status: AipStatus::Unspecified,
                location_uuid: None,
            })
            .await
        {
            Ok(aip) => aip,
            // The AIP was registered by an earlier attempt; reuse its
            // object key so the retry signs a URL for the same object.
            Err(AppError::Conflict(_)) => self.custody.store().read_aip(aip_uuid).await?,
            Err(_) => return Err(AppError::NotValid("cannot create AIP".to_string())),
        };

        let bucket = self
            .custody
            .locations()
            .internal()
            .bucket()
            .await
            .map_err(internal_error)?;
        let url = bucket
            .signed_url(
                &aip.object_key.to_string(),
                Method::PUT,
                self.submit_url_expiry,
            )
            .await
            .map_err(|_| AppError::NotValid("cannot sign URL".to_string()))?;

        Ok(SubmitAipResult { url })
    }

    /// Registers an AIP that already exists in a bucket, e.g. during a
    /// migration. Repeating a create for a known UUID returns the existing
    /// record unchanged.
    pub async fn create_aip(&self, params: CreateAipParams) -> Result<Aip, AppError> {
        let aip_uuid = Uuid::parse_str(&params.uuid)
            .map_err(|_| AppError::NotValid("invalid aip_id".to_string()))?;
        let object_key = Uuid::parse_str(&params.object_key)
            .map_err(|_| AppError::NotValid("invalid object_key".to_string()))?;

        match self
            .custody
            .create_aip(NewAip {
                uuid: aip_uuid,
                name: params.name,
                object_key,
                status: params.status.unwrap_or(AipStatus::Unspecified),
                location_uuid: params.location_uuid,
            })
            .await
        {
            Ok(aip) => Ok(aip),
            Err(AppError::Conflict(_)) => self.custody.store().read_aip(aip_uuid).await,
            Err(err) => Err(err),
        }
    }

    /// Completes a submission: tells the upload workflow the object was
    /// uploaded and parks the AIP in review.
    pub async fn update_aip(&self, aip_id: &str) -> Result<(), AppError> {
        let aip_uuid = parse_uuid(aip_id)?;

        self.engine
            .signal(
                &upload_workflow_id(aip_uuid),
                UPLOAD_DONE_SIGNAL,
                &UploadDoneSignal::default(),
            )
            .await
            .map_err(|_| AppError::NotAvailable("cannot perform operation".to_string()))?;

        self.custody
            .update_aip_status(aip_uuid, AipStatus::InReview)
            .await
            .map_err(|_| AppError::NotValid("cannot update AIP status".to_string()))?;

        Ok(())
    }

    pub async fn show_aip(&self, aip_id: &str) -> Result<Aip, AppError> {
        let aip_uuid = parse_uuid(aip_id)?;
        self.custody.store().read_aip(aip_uuid).await
    }

    pub async fn list_aips(&self, filter: AipFilter) -> Result<AipPage, AppError> {
        self.custody.store().list_aips(&filter).await
    }

    /// Starts relocating an AIP into a permanent location.
    pub async fn move_aip(&self, aip_id: &str, location_uuid: Uuid) -> Result<(), AppError> {
        let aip_uuid = parse_uuid(aip_id)?;
        let aip = self.custody.store().read_aip(aip_uuid).await?;

        self.engine
            .start(
                &move_workflow_id(aip.uuid),
                MOVE_WORKFLOW_NAME,
                &MoveWorkflowRequest {
                    aip_uuid: aip.uuid,
                    location_uuid,
                },
                IdReusePolicy::AllowDuplicate,
            )
            .await
            .map_err(|err| {
                tracing::error!(error = %err, aip_uuid = %aip_uuid, "cannot start move workflow");
                AppError::NotAvailable("cannot perform operation".to_string())
            })?;

        Ok(())
    }

    /// Reports whether the latest relocation of this AIP has finished.
    pub async fn move_aip_status(&self, aip_id: &str) -> Result<MoveStatusResult, AppError> {
        let aip_uuid = parse_uuid(aip_id)?;
        let aip = self.custody.store().read_aip(aip_uuid).await?;

        let status = self
            .engine
            .describe(&move_workflow_id(aip.uuid))
            .await
            .map_err(|_| AppError::FailedDependency("cannot perform operation".to_string()))?;

        let done = match status {
            ExecutionStatus::Completed => true,
            ExecutionStatus::Running => false,
            ExecutionStatus::Failed | ExecutionStatus::Canceled => {
                return Err(AppError::FailedDependency(
                    "cannot perform operation".to_string(),
                ));
            }
        };

        Ok(MoveStatusResult { done })
    }

    /// Rejects an AIP under review.
    pub async fn reject_aip(&self, aip_id: &str) -> Result<(), AppError> {
        let aip_uuid = parse_uuid(aip_id)?;
        self.custody
            .update_aip_status(aip_uuid, AipStatus::Rejected)
            .await?;
        Ok(())
    }

    // ---- Downloads ----

    /// First half of a download: verifies the AIP is downloadable and its
    /// object exists, then issues a ticket for the public endpoint.
    pub async fn download_aip_request(&self, aip_id: &str) -> Result<Option<String>, AppError> {
        let aip = self.show_aip(aip_id).await?;
        check_downloadable(&aip)?;

        match self.aip_reader(&aip).await {
            Ok(_) => {}
            Err(ReaderError::NotFound) => {
                return Err(AppError::NotFound(
                    "AIP file not found in the location bucket".to_string(),
                ));
            }
            Err(ReaderError::Other(err)) => {
                tracing::error!(error = %err, aip_uuid = %aip.uuid, "cannot probe AIP object");
                return Err(AppError::Internal("error checking AIP file".to_string()));
            }
        }

        let ticket = self
            .tickets
            .request(None)
            .await
            .map_err(|_| AppError::Internal("ticket request failed".to_string()))?;

        Ok(ticket)
    }

    /// Second half of a download: redeems the ticket and opens the object
    /// stream.
    pub async fn download_aip(
        &self,
        ticket: Option<&str>,
        aip_id: &str,
    ) -> Result<AipDownload, AppError> {
        self.tickets
            .check(ticket)
            .await
            .map_err(|_| AppError::Unauthorized("Unauthorized".to_string()))?;

        let aip = self.show_aip(aip_id).await?;
        check_downloadable(&aip)?;

        let reader = match self.aip_reader(&aip).await {
            Ok(reader) => reader,
            Err(ReaderError::NotFound) => {
                return Err(AppError::NotFound(
                    "AIP file not found in the location bucket".to_string(),
                ));
            }
            Err(ReaderError::Other(err)) => {
                tracing::error!(error = %err, aip_uuid = %aip.uuid, "cannot open AIP object");
                return Err(AppError::Internal("error reading AIP file".to_string()));
            }
        };

        let filename = format!("{}-{}.7z", base_no_ext(&aip.name), aip.uuid);

        Ok(AipDownload {
            content_type: reader.content_type.clone(),
            size: reader.size,
            filename,
            reader,
        })
    }

    /// Ticket step for downloading the deletion report of a deleted AIP.
    pub async fn deletion_report_request(&self, aip_id: &str) -> Result<Option<String>, AppError> {
        let aip = self.show_aip(aip_id).await?;
        let key = check_report_available(&aip)?;

        match self.report_reader(key).await {
            Ok(_) => {}
            Err(ReaderError::NotFound) => {
                return Err(AppError::NotFound("deletion report not found".to_string()));
            }
            Err(ReaderError::Other(err)) => {
                tracing::error!(error = %err, aip_uuid = %aip.uuid, "cannot probe deletion report");
                return Err(AppError::Internal(
                    "error reading deletion report".to_string(),
                ));
            }
        }

        let ticket = self
            .tickets
            .request(None)
            .await
            .map_err(|_| AppError::Internal("ticket request failed".to_string()))?;

        tracing::info!(aip_uuid = %aip.uuid, "deletion report download requested");

        Ok(ticket)
    }

    /// Streams the deletion report of a deleted AIP.
    pub async fn download_deletion_report(
        &self,
        ticket: Option<&str>,
        aip_id: &str,
    ) -> Result<AipDownload, AppError> {
        self.tickets
            .check(ticket)
            .await
            .map_err(|_| AppError::Unauthorized("Unauthorized".to_string()))?;

        let aip = self.show_aip(aip_id).await?;
        let key = check_report_available(&aip)?;

        let reader = self.report_reader(key).await.map_err(|err| {
            tracing::error!(aip_uuid = %aip.uuid, "cannot open deletion report: {}", err);
            AppError::Internal("error reading deletion report".to_string())
        })?;

        let filename = key
            .strip_prefix(REPORT_PREFIX)
            .map(str::to_string)
            .unwrap_or_else(|| format!("aip_deletion_report_{}.pdf", aip.uuid));

        Ok(AipDownload {
            content_type: reader.content_type.clone(),
            size: reader.size,
            filename,
            reader,
        })
    }

    // ---- Reviewed deletion ----

    /// Asks for an AIP to be deleted. The request is held for review by a
    /// second person; the AIP must be stored.
    pub async fn request_aip_deletion(
        &self,
        claims: Option<&Claims>,
        aip_id: &str,
        reason: &str,
    ) -> Result<(), AppError> {
        let claims = check_claims(claims)?;
        let aip_uuid = Uuid::parse_str(aip_id)?;

        if reason.trim().is_empty() {
            return Err(AppError::NotValid("invalid reason".to_string()));
        }

        let aip = self.custody.store().read_aip(aip_uuid).await?;
        if aip.status != AipStatus::Stored {
            return Err(AppError::NotValid("AIP is not stored".to_string()));
        }

        self.engine
            .start(
                &delete_workflow_id(aip_uuid),
                DELETE_WORKFLOW_NAME,
                &DeleteWorkflowRequest {
                    aip_uuid,
                    reason: reason.to_string(),
                    user_email: claims.email.clone(),
                    user_iss: claims.iss.clone(),
                    user_sub: claims.sub.clone(),
                },
                IdReusePolicy::AllowDuplicateFailedOnly,
            )
            .await?;

        Ok(())
    }

    /// Records a review decision on the pending deletion request. The
    /// reviewer must be a different person than the requester.
    pub async fn review_aip_deletion(
        &self,
        claims: Option<&Claims>,
        aip_id: &str,
        approved: bool,
    ) -> Result<(), AppError> {
        let claims = check_claims(claims)?;
        let aip_uuid = Uuid::parse_str(aip_id)?;

        let aip = self.custody.store().read_aip(aip_uuid).await?;
        if aip.status != AipStatus::Pending {
            return Err(AppError::NotValid(
                "AIP is not awaiting user review".to_string(),
            ));
        }

        let request = self
            .custody
            .store()
            .read_pending_deletion_request(aip_uuid)
            .await?;
        if request.requested_by(&claims.iss, &claims.sub) {
            return Err(AppError::NotValid(
                "requester cannot review their own request".to_string(),
            ));
        }

        let status = if approved {
            DeletionRequestStatus::Approved
        } else {
            DeletionRequestStatus::Rejected
        };

        self.engine
            .signal(
                &delete_workflow_id(aip_uuid),
                DELETION_DECISION_SIGNAL,
                &DeletionDecisionSignal {
                    status,
                    user_email: claims.email.clone(),
                    user_sub: claims.sub.clone(),
                    user_iss: claims.iss.clone(),
                },
            )
            .await?;

        Ok(())
    }

    /// Withdraws the caller's own pending deletion request. With `check`
    /// set, only verifies that a cancellation would be allowed.
    pub async fn cancel_aip_deletion(
        &self,
        claims: Option<&Claims>,
        aip_id: &str,
        check: bool,
    ) -> Result<(), AppError> {
        let claims = check_claims(claims)?;
        let aip_uuid = Uuid::parse_str(aip_id)?;

        let request = self
            .custody
            .store()
            .read_pending_deletion_request(aip_uuid)
            .await
            .map_err(|_| AppError::NotValid("no valid deletion requests".to_string()))?;

        if !request.requested_by(&claims.iss, &claims.sub) {
            return Err(AppError::Forbidden("Forbidden".to_string()));
        }

        if check {
            return Ok(());
        }

        self.engine
            .signal(
                &delete_workflow_id(aip_uuid),
                DELETION_DECISION_SIGNAL,
                &DeletionDecisionSignal {
                    status: DeletionRequestStatus::Canceled,
                    user_email: claims.email.clone(),
                    user_sub: claims.sub.clone(),
                    user_iss: claims.iss.clone(),
                },
            )
            .await?;

        Ok(())
    }

    // ---- Workflows ----

    /// Workflow history of one AIP, most recent first.
    pub async fn list_aip_workflows(
        &self,
        aip_id: &str,
        status: Option<&str>,
        kind: Option<&str>,
    ) -> Result<AipWorkflows, AppError> {
        let aip_uuid = Uuid::parse_str(aip_id)
            .map_err(|_| AppError::NotValid("UUID: invalid value".to_string()))?;

        let mut filter = WorkflowFilter::default();
        if let Some(status) = status {
            filter.status = Some(
                status
                    .parse()
                    .map_err(|_| AppError::NotValid("status: invalid value".to_string()))?,
            );
        }
        if let Some(kind) = kind {
            filter.kind = Some(
                kind.parse()
                    .map_err(|_| AppError::NotValid("type: invalid value".to_string()))?,
            );
        }

        let workflows = self
            .custody
            .store()
            .list_workflows_for_aip(aip_uuid, &filter)
            .await
            .map_err(|_| AppError::NotAvailable("cannot perform operation".to_string()))?;

        Ok(AipWorkflows { workflows })
    }

    // ---- Locations ----

    pub async fn create_location(
        &self,
        params: CreateLocationParams,
    ) -> Result<Location, AppError> {
        let purpose = match params.purpose.as_deref() {
            None | Some("") => LocationPurpose::Unspecified,
            Some(value) => value
                .parse::<LocationPurpose>()
                .map_err(|_| AppError::NotValid("purpose: invalid value".to_string()))?,
        };
        let source = match params.source.as_deref() {
            None | Some("") => None,
            Some(value) => Some(
                value
                    .parse::<LocationSource>()
                    .map_err(|_| AppError::NotValid("source: invalid value".to_string()))?,
            ),
        };

        if !params.config.valid() {
            return Err(AppError::NotValid("invalid configuration".to_string()));
        }
        // The stored source is derived from the config; a declared source
        // must agree with it.
        if let Some(source) = source {
            if source != params.config.source() {
                return Err(AppError::NotValid("source: invalid value".to_string()));
            }
        }

        self.custody
            .create_location(NewLocation {
                name: params.name,
                description: params.description,
                purpose,
                config: params.config,
            })
            .await
            .map_err(|_| AppError::NotValid("cannot persist location".to_string()))
    }

    pub async fn show_location(&self, location_id: &str) -> Result<Location, AppError> {
        let location_uuid = parse_uuid(location_id)?;
        self.custody.store().read_location(location_uuid).await
    }

    pub async fn list_locations(&self) -> Result<Vec<Location>, AppError> {
        self.custody.store().list_locations().await
    }

    /// All AIPs currently held by one location.
    pub async fn list_location_aips(&self, location_id: &str) -> Result<Vec<Aip>, AppError> {
        let location_uuid = parse_uuid(location_id)?;
        self.custody.store().read_location(location_uuid).await?;

        let page = self
            .custody
            .store()
            .list_aips(&AipFilter {
                location_uuid: Some(location_uuid),
                limit: Some(MAX_PAGE_SIZE),
                ..Default::default()
            })
            .await
            .map_err(|_| AppError::NotAvailable("cannot perform operation".to_string()))?;

        Ok(page.items)
    }

    // ---- Monitor ----

    /// Issues a monitor ticket bound to the caller's claims so the event
    /// stream can keep filtering by their attributes.
    pub async fn monitor_request(
        &self,
        claims: Option<&Claims>,
    ) -> Result<Option<String>, AppError> {
        self.tickets.request(claims).await.map_err(|err| {
            tracing::error!(error = %err, "failed to request ticket");
            AppError::NotAvailable("cannot perform operation".to_string())
        })
    }

    /// Redeems a monitor ticket and opens an event subscription. Returns
    /// the claims the ticket was issued with for per-event filtering.
    pub async fn monitor(
        &self,
        ticket: Option<&str>,
    ) -> Result<(Option<Claims>, Subscription), AppError> {
        let claims = self.tickets.check(ticket).await?;
        let subscription = self.custody.events().subscribe().await;
        Ok((claims, subscription))
    }

    // ---- Internals ----

    async fn aip_reader(&self, aip: &Aip) -> Result<BucketReader, ReaderError> {
        let (location, key) = self.custody.aip_object(aip).await?;
        let bucket = location.bucket().await?;
        Ok(bucket.reader(&key).await?)
    }

    async fn report_reader(&self, key: &str) -> Result<BucketReader, ReaderError> {
        let bucket = self.custody.locations().internal().bucket().await?;
        Ok(bucket.reader(key).await?)
    }
}

/// Failure to open an object reader, split on the one case callers map to
/// a 404.
enum ReaderError {
    NotFound,
    Other(String),
}

impl std::fmt::Display for ReaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderError::NotFound => write!(f, "object not found"),
            ReaderError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<BucketError> for ReaderError {
    fn from(err: BucketError) -> Self {
        match err {
            BucketError::NotFound(_) => ReaderError::NotFound,
            other => ReaderError::Other(other.to_string()),
        }
    }
}

impl From<AppError> for ReaderError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(_) => ReaderError::NotFound,
            other => ReaderError::Other(other.to_string()),
        }
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value).map_err(|_| AppError::NotValid("cannot perform operation".to_string()))
}

fn internal_error(err: BucketError) -> AppError {
    AppError::Internal(err.to_string())
}

/// Downloads are allowed while the package sits in a bucket: stored AIPs
/// and AIPs parked in `pending` during deletion review.
fn check_downloadable(aip: &Aip) -> Result<(), AppError> {
    if aip.status != AipStatus::Stored && aip.status != AipStatus::Pending {
        return Err(AppError::NotValid(
            "AIP is not available for download".to_string(),
        ));
    }
    Ok(())
}

/// The deletion report exists only once the reviewed deletion has run to
/// completion.
fn check_report_available(aip: &Aip) -> Result<&str, AppError> {
    if aip.status != AipStatus::Deleted {
        return Err(AppError::NotValid(
            "deletion report is not available for download".to_string(),
        ));
    }
    match aip.deletion_report_key.as_deref() {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(AppError::NotValid(
            "deletion report is not available for download".to_string(),
        )),
    }
}

/// Deletion operations require a fully identified caller.
fn check_claims(claims: Option<&Claims>) -> Result<&Claims, AppError> {
    let Some(claims) = claims else {
        return Err(AppError::NotValid("authentication is required".to_string()));
    };
    if claims.email.is_empty() {
        return Err(AppError::NotValid("email claim is required".to_string()));
    }
    if claims.sub.is_empty() {
        return Err(AppError::NotValid("sub claim is required".to_string()));
    }
    if claims.iss.is_empty() {
        return Err(AppError::NotValid("iss claim is required".to_string()));
    }
    Ok(claims)
}

/// Final path element with everything from the first dot on removed.
fn base_no_ext(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    match base.split_once('.') {
        Some((stem, _)) => stem,
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn aip_with_status(status: AipStatus) -> Aip {
        Aip {
            uuid: Uuid::new_v4(),
            name: "pkg".to_string(),
            status,
            object_key: Uuid::new_v4(),
            location_uuid: None,
            deletion_report_key: None,
            created_at: Utc::now(),
        }
    }

    fn full_claims() -> Claims {
        Claims {
            email: "someone@example.com".to_string(),
            email_verified: true,
            name: "Someone".to_string(),
            iss: "https://idp.example.com".to_string(),
            sub: "user-1".to_string(),
            attributes: None,
        }
    }

    #[test]
    fn test_base_no_ext() {
        assert_eq!(base_no_ext("transfer.7z"), "transfer");
        assert_eq!(base_no_ext("transfer.tar.gz"), "transfer");
        assert_eq!(base_no_ext("dir/sub/transfer.7z"), "transfer");
        assert_eq!(base_no_ext("noext"), "noext");
        assert_eq!(base_no_ext("dir/noext"), "noext");
    }

    #[test]
    fn test_downloadable_states() {
        assert!(check_downloadable(&aip_with_status(AipStatus::Stored)).is_ok());
        assert!(check_downloadable(&aip_with_status(AipStatus::Pending)).is_ok());

        for status in [
            AipStatus::Unspecified,
            AipStatus::InReview,
            AipStatus::Rejected,
            AipStatus::Moving,
            AipStatus::Processing,
            AipStatus::Deleted,
        ] {
            let err = check_downloadable(&aip_with_status(status)).unwrap_err();
            assert!(matches!(err, AppError::NotValid(_)));
        }
    }

    #[test]
    fn test_report_availability_gate() {
        let mut aip = aip_with_status(AipStatus::Deleted);
        assert!(check_report_available(&aip).is_err());

        aip.deletion_report_key = Some("reports/aip_deletion_report_x.pdf".to_string());
        assert_eq!(
            check_report_available(&aip).unwrap(),
            "reports/aip_deletion_report_x.pdf"
        );

        aip.status = AipStatus::Stored;
        assert!(check_report_available(&aip).is_err());
    }

    #[test]
    fn test_check_claims_requires_identity() {
        assert!(matches!(
            check_claims(None).unwrap_err(),
            AppError::NotValid(msg) if msg == "authentication is required"
        ));

        let mut claims = full_claims();
        claims.email.clear();
        assert!(matches!(
            check_claims(Some(&claims)).unwrap_err(),
            AppError::NotValid(msg) if msg == "email claim is required"
        ));

        let mut claims = full_claims();
        claims.sub.clear();
        assert!(matches!(
            check_claims(Some(&claims)).unwrap_err(),
            AppError::NotValid(msg) if msg == "sub claim is required"
        ));

        let mut claims = full_claims();
        claims.iss.clear();
        assert!(matches!(
            check_claims(Some(&claims)).unwrap_err(),
            AppError::NotValid(msg) if msg == "iss claim is required"
        ));

        assert!(check_claims(Some(&full_claims())).is_ok());
    }

    #[test]
    fn test_parse_uuid_error_is_opaque() {
        let err = parse_uuid("not-a-uuid").unwrap_err();
        assert!(matches!(
            err,
            AppError::NotValid(msg) if msg == "cannot perform operation"
        ));
    }
}
