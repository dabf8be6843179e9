//! Service initialization and application state setup

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;

use custodia_core::Config;
use custodia_db::{ArchiveStore, PgArchiveStore};
use custodia_events::{EventBus, InMemEventBus, PgEventBus};
use custodia_storage::LocationSet;
use custodia_workflows::activities::report::JsonFormFiller;
use custodia_workflows::{
    CustodyService, DeleteWorkflow, ExecutionStore, MoveWorkflow, PgExecutionStore, UploadWorkflow,
    WorkflowEngine,
};

use crate::service::StorageService;
use crate::state::AppState;
use crate::tickets::{InMemTicketStore, PgTicketStore, TicketProvider, TicketStore};

/// Initialize all services, returning the application state
pub async fn initialize_services(
    config: &Config,
    pool: PgPool,
    locations: Arc<LocationSet>,
) -> Result<Arc<AppState>> {
    let store: Arc<dyn ArchiveStore> = Arc::new(PgArchiveStore::new(pool.clone()));

    let events: Arc<dyn EventBus> = match config.event_bus() {
        "postgres" => {
            tracing::info!("Using the PostgreSQL event bus");
            Arc::new(PgEventBus::new(pool.clone()))
        }
        _ => {
            tracing::info!("Using the in-memory event bus");
            Arc::new(InMemEventBus::new())
        }
    };

    let custody = Arc::new(CustodyService::new(store, events, locations));

    let executions: Arc<dyn ExecutionStore> = Arc::new(PgExecutionStore::new(pool.clone()));
    let mut engine = WorkflowEngine::new(executions, config.engine_max_workers());
    engine.register(Arc::new(UploadWorkflow::new(Duration::from_secs(
        config.submit_url_expiry_secs(),
    ))));
    engine.register(Arc::new(MoveWorkflow::new(custody.clone())));
    engine.register(Arc::new(DeleteWorkflow::new(
        custody.clone(),
        Arc::new(JsonFormFiller),
        Duration::from_secs(config.amss_poll_interval_secs()),
        config.amss_auto_approve(),
    )));
    let engine = Arc::new(engine);

    let resumed = engine.resume_pending().await?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed interrupted workflow executions");
    }

    let tickets = if config.auth_enabled() {
        let ttl = Duration::from_secs(config.ticket_ttl_secs());
        let store: Arc<dyn TicketStore> = match config.ticket_store() {
            "postgres" => {
                tracing::info!("Using the PostgreSQL ticket store");
                Arc::new(PgTicketStore::new(pool.clone()))
            }
            _ => {
                tracing::info!("Using the in-memory ticket store");
                Arc::new(InMemTicketStore::new())
            }
        };
        TicketProvider::new(store, ttl)
    } else {
        TicketProvider::disabled()
    };

    let service = Arc::new(StorageService::new(
        custody,
        engine,
        tickets,
        Duration::from_secs(config.submit_url_expiry_secs()),
    ));

    tracing::info!("Services initialized successfully");

    Ok(Arc::new(AppState {
        service,
        config: config.clone(),
        pool: Some(pool),
    }))
}
