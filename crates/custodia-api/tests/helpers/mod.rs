//! Test helpers: build the in-memory application and server for integration tests.
//!
//! Run from workspace root: `cargo test -p custodia-api --test aips_test` or
//! `cargo test -p custodia-api`. The whole stack (store, buckets, event bus,
//! ticket store, workflow engine) runs in memory; no database is required.

pub mod auth;
pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use custodia_api::setup::routes;
use custodia_api::state::AppState;
use custodia_api::tickets::{InMemTicketStore, TicketProvider};
use custodia_api::StorageService;
use custodia_core::config::BaseConfig;
use custodia_core::{Config, StorageConfig};
use custodia_db::MemoryArchiveStore;
use custodia_events::InMemEventBus;
use custodia_storage::LocationSet;
use custodia_workflows::activities::report::JsonFormFiller;
use custodia_workflows::{
    CustodyService, DeleteWorkflow, MemoryExecutionStore, MoveWorkflow, UploadWorkflow,
    WorkflowEngine,
};

/// Test application: server plus handles into the in-memory stack so tests
/// can seed AIPs and inspect buckets directly.
pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<MemoryArchiveStore>,
    pub locations: Arc<LocationSet>,
    pub custody: Arc<CustodyService>,
    pub engine: Arc<WorkflowEngine>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

/// Setup the test app with the full in-memory stack, mirroring the wiring
/// used by the server binary.
pub async fn setup_test_app() -> TestApp {
    let config = create_test_config();

    let store = Arc::new(MemoryArchiveStore::new());
    let events = Arc::new(InMemEventBus::new());
    let locations = Arc::new(LocationSet::in_memory());
    let custody = Arc::new(CustodyService::new(
        store.clone(),
        events.clone(),
        locations.clone(),
    ));

    let mut engine = WorkflowEngine::new(
        Arc::new(MemoryExecutionStore::new()),
        config.engine_max_workers(),
    );
    engine.register(Arc::new(UploadWorkflow::new(Duration::from_secs(
        config.submit_url_expiry_secs(),
    ))));
    engine.register(Arc::new(MoveWorkflow::new(custody.clone())));
    // Short review poll so deletion tests settle quickly.
    engine.register(Arc::new(DeleteWorkflow::new(
        custody.clone(),
        Arc::new(JsonFormFiller),
        Duration::from_millis(20),
        false,
    )));
    let engine = Arc::new(engine);

    let tickets = TicketProvider::new(
        Arc::new(InMemTicketStore::new()),
        Duration::from_secs(config.ticket_ttl_secs()),
    );

    let service = Arc::new(StorageService::new(
        custody.clone(),
        engine.clone(),
        tickets,
        Duration::from_secs(config.submit_url_expiry_secs()),
    ));

    let state = Arc::new(AppState {
        service,
        config: config.clone(),
        pool: None,
    });

    let app = routes::setup_routes(&config, state).expect("Failed to setup routes");
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        store,
        locations,
        custody,
        engine,
    }
}

fn create_test_config() -> Config {
    let base = BaseConfig {
        server_port: 3000,
        cors_origins: vec!["*".to_string()],
        db_max_connections: 5,
        db_timeout_seconds: 30,
        environment: "test".to_string(),
    };
    let storage = StorageConfig {
        base,
        database_url: String::new(),
        auth_enabled: true,
        jwt_secret: Some(auth::TEST_JWT_SECRET.to_string()),
        jwt_issuer: None,
        internal_url: None,
        internal_bucket: None,
        internal_region: None,
        internal_endpoint: None,
        internal_access_key: None,
        internal_secret_key: None,
        internal_token: None,
        internal_profile: None,
        internal_path_style: false,
        submit_url_expiry_secs: 900,
        ticket_ttl_secs: 60,
        ticket_store: "memory".to_string(),
        event_bus: "memory".to_string(),
        engine_max_workers: 4,
        amss_poll_interval_secs: 60,
        amss_auto_approve: false,
    };
    Config(Box::new(storage))
}
