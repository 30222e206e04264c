use std::sync::Arc;

use reel_db::Database;
use reel_media::{MediaClient, Staging};

use crate::tokens::TokenIssuer;

pub type AppState = Arc<AppStateInner>;

/// Everything handlers need, built once at startup. Secrets and connection
/// handles are injected here; no component reads the environment ad hoc.
pub struct AppStateInner {
    pub db: Database,
    pub tokens: TokenIssuer,
    pub staging: Staging,
    pub media: MediaClient,
}
