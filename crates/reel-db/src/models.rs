/// Database row types — these map directly to SQLite rows.
/// Distinct from the reel-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub avatar_url: String,
    pub cover_url: Option<String>,
    pub refresh_token: Option<String>,
    pub created_at: String,
}

pub struct VideoRow {
    pub id: String,
    pub owner_id: String,
    pub owner_username: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub title: String,
    pub description: String,
    pub duration_secs: i64,
    pub views: i64,
    pub published: bool,
    pub created_at: String,
}
