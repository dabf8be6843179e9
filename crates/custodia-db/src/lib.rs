//! Custodia Persistence Layer
//!
//! State custody for AIPs, locations, workflows, tasks and deletion requests.
//! The [`ArchiveStore`] trait is the single entry point; two implementations
//! are provided: [`PgArchiveStore`] backed by PostgreSQL and
//! [`MemoryArchiveStore`] for tests and local development.
//!
//! All mutations go through updater functions applied atomically, so
//! concurrent signal handling never observes half-applied state. Status
//! transitions for AIPs and deletion requests are validated against fixed
//! transition tables before commit.

pub mod memory;
pub mod pg;
pub mod store;
pub mod transitions;

pub use memory::MemoryArchiveStore;
pub use pg::PgArchiveStore;
pub use store::{
    AipFilter, AipPage, AipUpdater, ArchiveStore, DeletionRequestFilter, DeletionRequestUpdater,
    NewAip, NewDeletionRequest, NewLocation, NewTask, NewWorkflow, Page, TaskUpdater,
    WorkflowFilter, WorkflowUpdater,
};
