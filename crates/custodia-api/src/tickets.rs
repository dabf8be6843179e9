//! Short-lived download and monitor tickets.
//!
//! Browser flows (file downloads, the SSE monitor) cannot send an
//! Authorization header, so the protected companion endpoint issues a
//! single-use ticket that the public endpoint then redeems. A ticket may
//! carry the caller's claims so the redeeming endpoint can keep enforcing
//! attribute filters.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use custodia_core::{AppError, Claims};
use rand::RngCore;
use sqlx::PgPool;
use tokio::time::Instant;

/// Time a ticket stays valid between issue and redemption.
pub const TICKET_TTL: Duration = Duration::from_secs(5);

/// Persists expirable single-use tickets.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Stores a ticket with its payload, expiring after `ttl`.
    async fn set(
        &self,
        ticket: &str,
        claims: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), AppError>;

    /// Removes and returns the payload for a ticket. `None` when the ticket
    /// is unknown or expired.
    async fn get_del(&self, ticket: &str) -> Result<Option<serde_json::Value>, AppError>;
}

/// Issues and redeems tickets. With no backing store the provider is a
/// no-op: no tickets are issued and every check passes.
#[derive(Clone)]
pub struct TicketProvider {
    store: Option<std::sync::Arc<dyn TicketStore>>,
    ttl: Duration,
}

impl TicketProvider {
    pub fn new(store: std::sync::Arc<dyn TicketStore>, ttl: Duration) -> Self {
        TicketProvider {
            store: Some(store),
            ttl,
        }
    }

    pub fn disabled() -> Self {
        TicketProvider {
            store: None,
            ttl: TICKET_TTL,
        }
    }

    /// Issues a ticket carrying the caller's claims. Returns `None` when the
    /// provider is disabled.
    pub async fn request(&self, claims: Option<&Claims>) -> Result<Option<String>, AppError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let ticket = generate_ticket();
        let payload = match claims {
            Some(c) => serde_json::to_value(c)?,
            None => serde_json::Value::Null,
        };
        store.set(&ticket, payload, self.ttl).await?;

        Ok(Some(ticket))
    }

    /// Redeems a ticket, returning the claims it was issued with. A missing,
    /// unknown, or expired ticket is rejected. When the provider is disabled
    /// every check passes without claims.
    pub async fn check(&self, ticket: Option<&str>) -> Result<Option<Claims>, AppError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let Some(ticket) = ticket else {
            return Err(AppError::Unauthorized("Unauthorized".to_string()));
        };

        let payload = store
            .get_del(ticket)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Unauthorized".to_string()))?;

        match payload {
            serde_json::Value::Null => Ok(None),
            value => Ok(Some(serde_json::from_value(value)?)),
        }
    }
}

fn generate_ticket() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// In-memory ticket store for single-node deployments and tests. Expired
/// entries are purged lazily on access.
#[derive(Default)]
pub struct InMemTicketStore {
    entries: Mutex<HashMap<String, (serde_json::Value, Instant)>>,
}

impl InMemTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemTicketStore {
    async fn set(
        &self,
        ticket: &str,
        claims: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("ticket store lock poisoned".to_string()))?;
        let now = Instant::now();
        entries.retain(|_, (_, deadline)| *deadline > now);
        entries.insert(ticket.to_string(), (claims, now + ttl));
        Ok(())
    }

    async fn get_del(&self, ticket: &str) -> Result<Option<serde_json::Value>, AppError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("ticket store lock poisoned".to_string()))?;
        match entries.remove(ticket) {
            Some((claims, deadline)) if deadline > Instant::now() => Ok(Some(claims)),
            _ => Ok(None),
        }
    }
}

/// Postgres-backed ticket store, shared across replicas.
pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        PgTicketStore { pool }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn set(
        &self,
        ticket: &str,
        claims: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), AppError> {
        // Opportunistic cleanup keeps the table from accumulating dead rows.
        sqlx::query("DELETE FROM auth_tickets WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "INSERT INTO auth_tickets (ticket, claims, expires_at)
             VALUES ($1, $2, now() + make_interval(secs => $3))",
        )
        .bind(ticket)
        .bind(claims)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_del(&self, ticket: &str) -> Result<Option<serde_json::Value>, AppError> {
        let claims: Option<serde_json::Value> = sqlx::query_scalar(
            "DELETE FROM auth_tickets WHERE ticket = $1 AND expires_at > now() RETURNING claims",
        )
        .bind(ticket)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claims)
    }
}
