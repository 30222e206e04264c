use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reel_db::models::UserRow;
use reel_media::MediaKind;
use reel_types::api::{
    ApiResponse, ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest,
    TokenPairResponse, UserResponse,
};

use crate::error::ApiError;
use crate::middleware::{ACCESS_COOKIE, CurrentUser, REFRESH_COOKIE};
use crate::parse_db_timestamp;
use crate::password;
use crate::state::AppState;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const PASSWORD_MIN: usize = 8;

#[derive(Default)]
struct RegisterForm {
    username: Option<String>,
    email: Option<String>,
    full_name: Option<String>,
    password: Option<String>,
    avatar: Option<Bytes>,
    cover: Option<Bytes>,
}

/// POST /users/register — multipart: text fields plus a required `avatar`
/// image and an optional `cover` image.
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = RegisterForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "username" => form.username = Some(text_field(field).await?),
            "email" => form.email = Some(text_field(field).await?),
            "fullName" => form.full_name = Some(text_field(field).await?),
            "password" => form.password = Some(text_field(field).await?),
            "avatar" => form.avatar = Some(file_field(field).await?),
            "cover" => form.cover = Some(file_field(field).await?),
            other => {
                return Err(ApiError::Validation(format!("unexpected field '{other}'")));
            }
        }
    }

    let username = form.username.ok_or_else(|| missing("username"))?;
    let email = form.email.ok_or_else(|| missing("email"))?;
    let full_name = form.full_name.ok_or_else(|| missing("fullName"))?;
    let password = form.password.ok_or_else(|| missing("password"))?;
    let avatar = form.avatar.ok_or_else(|| missing("avatar"))?;

    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&password)?;

    // Duplicate identity checks before any side effect.
    check_identity_available(&state, &username, &email)?;

    let password_hash = hash_blocking(password).await?;

    // Media round trips; a failure aborts registration and the staged
    // artifacts are discarded inside `store` either way.
    let avatar_url = reel_media::store(&state.staging, &state.media, avatar, MediaKind::Image)
        .await?
        .url;
    let cover_url = match form.cover {
        Some(cover) => Some(
            reel_media::store(&state.staging, &state.media, cover, MediaKind::Image)
                .await?
                .url,
        ),
        None => None,
    };

    let user_id = Uuid::new_v4();
    // A concurrent registration can slip past the availability check; the
    // UNIQUE constraints are the arbiter, and losing that race is a conflict.
    state
        .db
        .create_user(
            &user_id.to_string(),
            &username,
            &email,
            &full_name,
            &password_hash,
            &avatar_url,
            cover_url.as_deref(),
        )
        .map_err(create_user_error)?;

    let row = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| anyhow::anyhow!("user {user_id} missing right after insert"))?;

    info!("User {} registered", username);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(sanitize(row), "user registered")),
    ))
}

/// POST /users/login — username or email plus password. On success, issues
/// both tokens, persists the refresh token (overwriting any prior session),
/// and sets both as cookies alongside the JSON body.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_identifier(&req.identifier)?
        .ok_or_else(bad_credentials)?;

    if !verify_blocking(req.password, user.password.clone()).await? {
        warn!("Failed login attempt for {}", user.username);
        return Err(bad_credentials());
    }

    let user_id = parse_user_id(&user.id)?;
    let access = state
        .tokens
        .issue_access(user_id, &user.username, &user.email)?;
    let refresh = state.tokens.issue_refresh(user_id)?;

    // Single active session: a concurrent login's token is silently replaced.
    state.db.set_refresh_token(&user.id, Some(&refresh))?;

    info!("User {} logged in", user.username);

    let jar = jar
        .add(auth_cookie(ACCESS_COOKIE, access.clone()))
        .add(auth_cookie(REFRESH_COOKIE, refresh.clone()));

    Ok((
        jar,
        Json(ApiResponse::ok(
            LoginResponse {
                user: sanitize(user),
                access_token: access,
                refresh_token: refresh,
            },
            "login successful",
        )),
    ))
}

/// POST /users/logout — clear the stored refresh token and expire both
/// cookies.
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    state.db.set_refresh_token(&user.id.to_string(), None)?;

    info!("User {} logged out", user.username);

    let jar = jar
        .remove(removal_cookie(ACCESS_COOKIE))
        .remove(removal_cookie(REFRESH_COOKIE));

    Ok((jar, Json(ApiResponse::ok((), "logged out"))))
}

/// POST /users/refresh — trade a refresh token (cookie or JSON body) for a
/// fresh pair. Only the latest issued refresh token is accepted; a token
/// superseded by a newer login fails here.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let from_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|e| ApiError::Validation(format!("malformed request body: {e}")))?
            .refresh_token
    };

    let presented = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or(from_body)
        .ok_or_else(|| ApiError::Unauthorized("refresh token required".into()))?;

    let claims = state.tokens.verify_refresh(&presented).map_err(|e| {
        debug!("refresh token rejected: {e}");
        stale_refresh()
    })?;

    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(stale_refresh)?;

    if user.refresh_token.as_deref() != Some(presented.as_str()) {
        warn!("Stale refresh token presented for {}", user.username);
        return Err(stale_refresh());
    }

    let user_id = parse_user_id(&user.id)?;
    let access = state
        .tokens
        .issue_access(user_id, &user.username, &user.email)?;
    let refresh = state.tokens.issue_refresh(user_id)?;
    state.db.set_refresh_token(&user.id, Some(&refresh))?;

    let jar = jar
        .add(auth_cookie(ACCESS_COOKIE, access.clone()))
        .add(auth_cookie(REFRESH_COOKIE, refresh.clone()));

    Ok((
        jar,
        Json(ApiResponse::ok(
            TokenPairResponse {
                access_token: access,
                refresh_token: refresh,
            },
            "session refreshed",
        )),
    ))
}

/// GET /users/profile
pub async fn profile(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .db
        .get_user_by_id(&user.id.to_string())?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    Ok(Json(ApiResponse::ok(sanitize(row), "profile fetched")))
}

/// POST /users/change-password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_password(&req.new_password)?;

    let row = state
        .db
        .get_user_by_id(&user.id.to_string())?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    if !verify_blocking(req.old_password, row.password.clone()).await? {
        return Err(ApiError::Unauthorized("old password does not match".into()));
    }

    let password_hash = hash_blocking(req.new_password).await?;
    state.db.update_password(&row.id, &password_hash)?;

    info!("User {} changed their password", user.username);

    Ok(Json(ApiResponse::ok((), "password changed")))
}

// ── Helpers ─────────────────────────────────────────────────────────────

pub(crate) fn sanitize(row: UserRow) -> UserResponse {
    UserResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt user id '{}': {}", row.id, e);
            Uuid::default()
        }),
        created_at: parse_db_timestamp(&row.created_at, &row.id),
        username: row.username,
        email: row.email,
        full_name: row.full_name,
        avatar_url: row.avatar_url,
        cover_url: row.cover_url,
    }
}

fn check_identity_available(state: &AppState, username: &str, email: &str) -> Result<(), ApiError> {
    if state.db.get_user_by_username(username)?.is_some() {
        return Err(ApiError::Conflict("username already taken".into()));
    }
    if state.db.get_user_by_email(email)?.is_some() {
        return Err(ApiError::Conflict("email already registered".into()));
    }
    Ok(())
}

fn create_user_error(e: anyhow::Error) -> ApiError {
    if reel_db::is_unique_violation(&e) {
        ApiError::Conflict("username or email already registered".into())
    } else {
        ApiError::Internal(e)
    }
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.len() < USERNAME_MIN || username.len() > USERNAME_MAX {
        return Err(ApiError::Validation(format!(
            "username must be {USERNAME_MIN}-{USERNAME_MAX} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if !email.contains('@') {
        return Err(ApiError::Validation("invalid email address".into()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < PASSWORD_MIN {
        return Err(ApiError::Validation(format!(
            "password must be at least {PASSWORD_MIN} characters"
        )));
    }
    Ok(())
}

/// Argon2 work runs off the async workers.
async fn hash_blocking(plaintext: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || password::hash(&plaintext))
        .await
        .map_err(|e| anyhow::anyhow!("hashing task failed: {e}"))?
        .map_err(ApiError::Internal)
}

async fn verify_blocking(plaintext: String, stored: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || password::verify(&plaintext, &stored))
        .await
        .map_err(|e| anyhow::anyhow!("verification task failed: {e}"))?
        .map_err(ApiError::Internal)
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("unreadable field: {e}")))
}

async fn file_field(field: axum::extract::multipart::Field<'_>) -> Result<Bytes, ApiError> {
    field
        .bytes()
        .await
        .map_err(|e| ApiError::Validation(format!("unreadable file field: {e}")))
}

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id '{raw}': {e}")))
}

fn missing(name: &str) -> ApiError {
    ApiError::Validation(format!("missing required field '{name}'"))
}

fn bad_credentials() -> ApiError {
    ApiError::Unauthorized("invalid credentials".into())
}

fn stale_refresh() -> ApiError {
    ApiError::Unauthorized("invalid or expired refresh token".into())
}

fn auth_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build()
}

fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppStateInner;
    use crate::tokens::TokenIssuer;
    use axum::body::{Body, to_bytes};
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use reel_media::{MediaClient, Staging};
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let staging_dir = std::env::temp_dir().join(format!("reel-users-test-{}", Uuid::new_v4()));
        Arc::new(AppStateInner {
            db: reel_db::Database::open_in_memory().unwrap(),
            tokens: TokenIssuer::new("access-secret".into(), "refresh-secret".into(), 15, 7),
            staging: Staging::new(staging_dir).await.unwrap(),
            media: MediaClient::new("http://127.0.0.1:1".into(), "test-key".into()),
        })
    }

    /// Like `test_state`, but backed by a live stand-in media host that
    /// accepts every upload.
    async fn media_backed_state() -> AppState {
        let app = axum::Router::new().route(
            "/upload",
            axum::routing::post(|| async {
                Json(serde_json::json!({ "url": "https://media.test/asset" }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let staging_dir = std::env::temp_dir().join(format!("reel-users-test-{}", Uuid::new_v4()));
        Arc::new(AppStateInner {
            db: reel_db::Database::open_in_memory().unwrap(),
            tokens: TokenIssuer::new("access-secret".into(), "refresh-secret".into(), 15, 7),
            staging: Staging::new(staging_dir).await.unwrap(),
            media: MediaClient::new(base_url, "test-key".into()),
        })
    }

    const BOUNDARY: &str = "reel-test-boundary";

    fn text_part(name: &str, value: &str) -> String {
        format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
    }

    fn file_part(name: &str, contents: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: image/png\r\n\r\n{contents}\r\n"
        )
    }

    fn register_form(username: &str, email: &str) -> String {
        let mut body = String::new();
        body.push_str(&text_part("username", username));
        body.push_str(&text_part("email", email));
        body.push_str(&text_part("fullName", "Alice A"));
        body.push_str(&text_part("password", "secret123"));
        body.push_str(&file_part("avatar", "avatar-bytes"));
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    async fn multipart_from(body: String) -> Multipart {
        let req = Request::builder()
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(req, &()).await.unwrap()
    }

    fn seed_alice(state: &AppState) -> Uuid {
        let id = Uuid::new_v4();
        let hash = password::hash("secret123").unwrap();
        state
            .db
            .create_user(&id.to_string(), "alice", "a@x.com", "Alice A", &hash, "http://m/a.png", None)
            .unwrap();
        id
    }

    fn login_req(identifier: &str, password: &str) -> Json<LoginRequest> {
        Json(LoginRequest {
            identifier: identifier.into(),
            password: password.into(),
        })
    }

    #[test]
    fn username_and_password_rules() {
        assert!(validate_username("al").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("alice").is_ok());

        assert!(validate_password("short").is_err());
        assert!(validate_password("secret123").is_ok());

        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a@x.com").is_ok());
    }

    #[tokio::test]
    async fn register_returns_the_sanitized_new_user() {
        let state = media_backed_state().await;
        let multipart = multipart_from(register_form("alice", "a@x.com")).await;

        let resp = register(State(state.clone()), multipart)
            .await
            .unwrap()
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["username"], "alice");
        assert_eq!(json["data"]["avatarUrl"], "https://media.test/asset");
        let data = json["data"].as_object().unwrap();
        assert!(!data.contains_key("password"));
        assert!(!data.contains_key("refreshToken"));

        // The stored credential is a hash, never the plaintext.
        let row = state.db.get_user_by_username("alice").unwrap().unwrap();
        assert_ne!(row.password, "secret123");
        assert!(password::verify("secret123", &row.password).unwrap());
    }

    #[tokio::test]
    async fn register_rejects_a_taken_username() {
        let state = media_backed_state().await;
        register(
            State(state.clone()),
            multipart_from(register_form("alice", "a@x.com")).await,
        )
        .await
        .map(|_| ())
        .unwrap();

        let err = register(
            State(state.clone()),
            multipart_from(register_form("alice", "b@x.com")).await,
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert!(state.db.get_user_by_email("b@x.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_avatar_upload_aborts_registration() {
        // Media host unreachable: the upload fails before any row is written.
        let state = test_state().await;
        let err = register(
            State(state.clone()),
            multipart_from(register_form("alice", "a@x.com")).await,
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert!(state.db.get_user_by_username("alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn losing_the_insert_race_is_a_conflict() {
        let state = test_state().await;
        seed_alice(&state);

        // As if two registrations both passed the availability check and the
        // second insert hit the UNIQUE constraint.
        let err = state
            .db
            .create_user(&Uuid::new_v4().to_string(), "alice", "other@x.com", "A", "$h", "http://m/a.png", None)
            .unwrap_err();
        assert!(matches!(create_user_error(err), ApiError::Conflict(_)));

        let other = create_user_error(anyhow::anyhow!("disk full"));
        assert!(matches!(other, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn duplicate_identity_is_a_conflict() {
        let state = test_state().await;
        seed_alice(&state);

        let by_name = check_identity_available(&state, "alice", "other@x.com").unwrap_err();
        assert!(matches!(by_name, ApiError::Conflict(_)));

        let by_email = check_identity_available(&state, "bob", "a@x.com").unwrap_err();
        assert!(matches!(by_email, ApiError::Conflict(_)));

        assert!(check_identity_available(&state, "bob", "b@x.com").is_ok());
    }

    #[tokio::test]
    async fn login_with_wrong_password_issues_nothing() {
        let state = test_state().await;
        let id = seed_alice(&state);

        let err = login(State(state.clone()), CookieJar::new(), login_req("alice", "hunter2"))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        // No refresh token was persisted.
        let row = state.db.get_user_by_id(&id.to_string()).unwrap().unwrap();
        assert!(row.refresh_token.is_none());
    }

    #[tokio::test]
    async fn login_persists_a_refresh_token() {
        let state = test_state().await;
        let id = seed_alice(&state);

        login(State(state.clone()), CookieJar::new(), login_req("a@x.com", "secret123"))
            .await
            .map(|_| ())
            .unwrap();

        let row = state.db.get_user_by_id(&id.to_string()).unwrap().unwrap();
        let stored = row.refresh_token.expect("refresh token stored");
        assert!(state.tokens.verify_refresh(&stored).is_ok());
    }

    #[tokio::test]
    async fn second_login_invalidates_the_first_session() {
        let state = test_state().await;
        let id = seed_alice(&state);

        login(State(state.clone()), CookieJar::new(), login_req("alice", "secret123"))
            .await
            .map(|_| ())
            .unwrap();
        let first = state
            .db
            .get_user_by_id(&id.to_string())
            .unwrap()
            .unwrap()
            .refresh_token
            .unwrap();

        login(State(state.clone()), CookieJar::new(), login_req("alice", "secret123"))
            .await
            .map(|_| ())
            .unwrap();
        let second = state
            .db
            .get_user_by_id(&id.to_string())
            .unwrap()
            .unwrap()
            .refresh_token
            .unwrap();
        assert_ne!(first, second);

        // The superseded token no longer refreshes.
        let body = Bytes::from(format!(r#"{{"refreshToken":"{first}"}}"#));
        let err = refresh(State(state.clone()), CookieJar::new(), body)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn refresh_rotates_the_stored_token() {
        let state = test_state().await;
        let id = seed_alice(&state);

        login(State(state.clone()), CookieJar::new(), login_req("alice", "secret123"))
            .await
            .map(|_| ())
            .unwrap();
        let issued = state
            .db
            .get_user_by_id(&id.to_string())
            .unwrap()
            .unwrap()
            .refresh_token
            .unwrap();

        let body = Bytes::from(format!(r#"{{"refreshToken":"{issued}"}}"#));
        refresh(State(state.clone()), CookieJar::new(), body)
            .await
            .map(|_| ())
            .unwrap();

        let rotated = state
            .db
            .get_user_by_id(&id.to_string())
            .unwrap()
            .unwrap()
            .refresh_token
            .unwrap();
        assert_ne!(issued, rotated);
    }

    #[tokio::test]
    async fn logout_clears_the_stored_token() {
        let state = test_state().await;
        let id = seed_alice(&state);
        state.db.set_refresh_token(&id.to_string(), Some("live")).unwrap();

        let current = CurrentUser {
            id,
            username: "alice".into(),
            email: "a@x.com".into(),
        };
        logout(State(state.clone()), Extension(current), CookieJar::new())
            .await
            .map(|_| ())
            .unwrap();

        let row = state.db.get_user_by_id(&id.to_string()).unwrap().unwrap();
        assert!(row.refresh_token.is_none());
    }

    #[tokio::test]
    async fn change_password_requires_the_old_one() {
        let state = test_state().await;
        let id = seed_alice(&state);
        let current = CurrentUser {
            id,
            username: "alice".into(),
            email: "a@x.com".into(),
        };

        let wrong = change_password(
            State(state.clone()),
            Extension(current.clone()),
            Json(ChangePasswordRequest {
                old_password: "hunter2".into(),
                new_password: "newsecret1".into(),
            }),
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert!(matches!(wrong, ApiError::Unauthorized(_)));

        change_password(
            State(state.clone()),
            Extension(current),
            Json(ChangePasswordRequest {
                old_password: "secret123".into(),
                new_password: "newsecret1".into(),
            }),
        )
        .await
        .map(|_| ())
        .unwrap();

        let row = state.db.get_user_by_id(&id.to_string()).unwrap().unwrap();
        assert!(password::verify("newsecret1", &row.password).unwrap());
        assert!(!password::verify("secret123", &row.password).unwrap());
    }

    #[tokio::test]
    async fn sanitized_user_never_serializes_credentials() {
        let state = test_state().await;
        let id = seed_alice(&state);
        state.db.set_refresh_token(&id.to_string(), Some("live")).unwrap();

        let row = state.db.get_user_by_id(&id.to_string()).unwrap().unwrap();
        let json = serde_json::to_value(sanitize(row)).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("password"));
        assert!(!obj.contains_key("refreshToken"));
        assert_eq!(json["username"], "alice");
    }
}
