use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Identity resolved by the session verifier, attached to request
/// extensions for protected handlers.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

/// Locate a candidate access token: the `access_token` cookie wins over the
/// Authorization bearer header.
pub fn token_from_parts(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_COOKIE) {
        return Some(cookie.value().to_string());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Validate a request's access token and resolve it to a live user.
///
/// Absent, invalid, and expired tokens all produce the same HTTP-visible
/// rejection; only the log detail differs. No mutation happens here.
pub fn authenticate(
    state: &AppState,
    jar: &CookieJar,
    headers: &HeaderMap,
) -> Result<CurrentUser, ApiError> {
    let token = token_from_parts(jar, headers).ok_or_else(|| {
        debug!("no access token on request");
        unauthenticated()
    })?;

    let claims = state.tokens.verify_access(&token).map_err(|e| {
        debug!("access token rejected: {e}");
        unauthenticated()
    })?;

    // Tokens can outlive account removal; the subject must still exist.
    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| {
            debug!("access token subject {} no longer exists", claims.sub);
            unauthenticated()
        })?;

    Ok(CurrentUser {
        id: claims.sub,
        username: user.username,
        email: user.email,
    })
}

/// Session-verifier middleware for routes that are protected wholesale.
/// Routes whose siblings are public call [`authenticate`] directly instead.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &jar, req.headers())?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

fn unauthenticated() -> ApiError {
    ApiError::Unauthorized("authentication required".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppState, AppStateInner};
    use crate::tokens::TokenIssuer;
    use axum_extra::extract::cookie::Cookie;
    use reel_media::{MediaClient, Staging};
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let staging_dir =
            std::env::temp_dir().join(format!("reel-mw-test-{}", Uuid::new_v4()));
        Arc::new(AppStateInner {
            db: reel_db::Database::open_in_memory().unwrap(),
            tokens: TokenIssuer::new("access-secret".into(), "refresh-secret".into(), 15, 7),
            staging: Staging::new(staging_dir).await.unwrap(),
            media: MediaClient::new("http://127.0.0.1:1".into(), "test-key".into()),
        })
    }

    fn seed_user(state: &AppState) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(&id.to_string(), "alice", "a@x.com", "Alice A", "$argon2id$fake", "http://m/a.png", None)
            .unwrap();
        id
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn cookie_wins_over_bearer_header() {
        let jar = CookieJar::new().add(Cookie::new(ACCESS_COOKIE, "from-cookie"));
        let found = token_from_parts(&jar, &bearer("from-header"));
        assert_eq!(found.as_deref(), Some("from-cookie"));
    }

    #[test]
    fn bearer_header_is_the_fallback() {
        let found = token_from_parts(&CookieJar::new(), &bearer("from-header"));
        assert_eq!(found.as_deref(), Some("from-header"));
        assert!(token_from_parts(&CookieJar::new(), &HeaderMap::new()).is_none());
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let state = test_state().await;
        let err = authenticate(&state, &CookieJar::new(), &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn valid_token_resolves_the_user() {
        let state = test_state().await;
        let id = seed_user(&state);
        let token = state.tokens.issue_access(id, "alice", "a@x.com").unwrap();

        let user = authenticate(&state, &CookieJar::new(), &bearer(&token)).unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn token_for_removed_subject_is_rejected() {
        let state = test_state().await;
        // Never inserted into the DB.
        let token = state
            .tokens
            .issue_access(Uuid::new_v4(), "ghost", "g@x.com")
            .unwrap();

        let err = authenticate(&state, &CookieJar::new(), &bearer(&token)).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let state = test_state().await;
        let err = authenticate(&state, &CookieJar::new(), &bearer("not-a-jwt")).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
