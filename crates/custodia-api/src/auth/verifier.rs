//! Bearer token verification.
//!
//! Tokens are JWTs signed with a shared secret (HS256). Verification checks
//! the signature, expiry, and optionally the issuer, then requires the
//! `email_verified` claim before trusting the identity.

use anyhow::Context;
use custodia_core::{AppError, Claims, Config};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

pub struct AuthVerifier {
    inner: Option<Inner>,
}

struct Inner {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthVerifier {
    /// Verifier that accepts every request without claims. Used when
    /// authentication is disabled.
    pub fn disabled() -> Self {
        AuthVerifier { inner: None }
    }

    pub fn from_config(config: &Config) -> Result<Self, anyhow::Error> {
        if !config.auth_enabled() {
            return Ok(Self::disabled());
        }

        let secret = config
            .jwt_secret()
            .context("AUTH_ENABLED is set but JWT_SECRET is missing")?;

        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = config.jwt_issuer() {
            validation.set_issuer(&[issuer]);
        }

        Ok(AuthVerifier {
            inner: Some(Inner {
                decoding_key: DecodingKey::from_secret(secret.as_bytes()),
                validation,
            }),
        })
    }

    pub fn enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Verifies a bearer token. Returns `None` when verification is disabled,
    /// otherwise the token's claims.
    pub fn verify(&self, token: &str) -> Result<Option<Claims>, AppError> {
        let Some(inner) = &self.inner else {
            return Ok(None);
        };

        let data = decode::<Claims>(token, &inner.decoding_key, &inner.validation)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

        if !data.claims.email_verified {
            return Err(AppError::Unauthorized("Email is not verified".to_string()));
        }

        Ok(Some(data.claims))
    }
}
