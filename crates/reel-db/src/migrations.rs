use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id             TEXT PRIMARY KEY,
            username       TEXT NOT NULL UNIQUE,
            email          TEXT NOT NULL UNIQUE,
            full_name      TEXT NOT NULL,
            password       TEXT NOT NULL,
            avatar_url     TEXT NOT NULL,
            cover_url      TEXT,
            refresh_token  TEXT,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS videos (
            id             TEXT PRIMARY KEY,
            owner_id       TEXT NOT NULL REFERENCES users(id),
            video_url      TEXT NOT NULL,
            thumbnail_url  TEXT NOT NULL,
            title          TEXT NOT NULL,
            description    TEXT NOT NULL DEFAULT '',
            duration_secs  INTEGER NOT NULL DEFAULT 0,
            views          INTEGER NOT NULL DEFAULT 0,
            published      INTEGER NOT NULL DEFAULT 1,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_videos_owner
            ON videos(owner_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_videos_published
            ON videos(published, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
