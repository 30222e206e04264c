use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use reel_types::api::{AccessClaims, RefreshClaims};

/// Issues and verifies the two token families.
///
/// Access tokens are short-lived and carry enough identity to serve a
/// request without a database lookup; refresh tokens are long-lived and
/// carry only the identity reference. Each family signs with its own
/// symmetric secret, so one can never stand in for the other. Tokens are
/// opaque strings to every other component.
#[derive(Clone)]
pub struct TokenIssuer {
    access_secret: String,
    refresh_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        access_secret: String,
        refresh_secret: String,
        access_ttl_mins: i64,
        refresh_ttl_days: i64,
    ) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl: Duration::minutes(access_ttl_mins),
            refresh_ttl: Duration::days(refresh_ttl_days),
        }
    }

    pub fn issue_access(&self, user_id: Uuid, username: &str, email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user_id,
            username: username.to_string(),
            email: email.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + self.access_ttl).timestamp() as usize,
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )?)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.timestamp() as usize,
            exp: (now + self.refresh_ttl).timestamp() as usize,
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )?)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims> {
        let data = decode::<RefreshClaims>(
            token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}
