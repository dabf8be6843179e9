//! HTTP handlers for the storage API.

pub mod aips;
pub mod deletion;
pub mod download;
pub mod locations;
pub mod monitor;

use serde::Serialize;

/// Body of the ticket-minting endpoints. The ticket is absent when
/// authentication is disabled and the follow-up call needs none.
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}
