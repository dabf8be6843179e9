//! Token minting for integration tests.
//!
//! Tokens are HS256 JWTs signed with the same secret the test config hands
//! to the verifier.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

/// Test JWT secret (must match create_test_config).
pub const TEST_JWT_SECRET: &str = "test-secret-key-min-32-characters-long-for-testing";

/// Issuer baked into minted tokens. The test config does not pin an issuer,
/// so this only feeds the requester identity used by deletion reviews.
pub const TEST_ISSUER: &str = "https://issuer.test";

#[derive(Serialize)]
pub struct TokenClaims {
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub iss: String,
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    pub exp: i64,
}

impl TokenClaims {
    pub fn new(email: &str, sub: &str) -> Self {
        TokenClaims {
            email: email.to_string(),
            email_verified: true,
            name: email.split('@').next().unwrap_or(email).to_string(),
            iss: TEST_ISSUER.to_string(),
            sub: sub.to_string(),
            attributes: None,
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
        }
    }
}

pub fn sign(claims: &TokenClaims) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token")
}

/// Token for a user holding the given attributes.
pub fn token_for(email: &str, sub: &str, attributes: &[&str]) -> String {
    let mut claims = TokenClaims::new(email, sub);
    claims.attributes = Some(attributes.iter().map(|s| s.to_string()).collect());
    sign(&claims)
}

/// Token for a user granted everything.
pub fn admin_token() -> String {
    token_for("admin@example.com", "admin", &["*"])
}

/// Token that expired beyond the verifier's leeway.
pub fn expired_token() -> String {
    let mut claims = TokenClaims::new("late@example.com", "late");
    claims.attributes = Some(vec!["*".to_string()]);
    claims.exp = (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp();
    sign(&claims)
}

/// Authorization header value for a token.
pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
