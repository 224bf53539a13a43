use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_SERVICE: &str = "service";

/// Claims carried by tokens issued by the marketplace's auth service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub exp: i64,
}

impl Claims {
    pub fn new(subject: Uuid, role: impl Into<String>, ttl: Duration) -> Self {
        Self {
            sub: subject,
            role: role.into(),
            exp: (Utc::now() + ttl).timestamp(),
        }
    }
}

pub fn encode_token(claims: &Claims, secret: &str) -> Result<String, String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| format!("JWT encode failed: {e}"))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("JWT decode failed: {e}"))
}

/// Issue a token, e.g. for an internal service that calls the send endpoint.
pub fn create_token(subject: Uuid, role: &str, ttl: Duration, secret: &str) -> Result<String, String> {
    encode_token(&Claims::new(subject, role, ttl), secret)
}
