use crate::Database;
use crate::models::{UserRow, VideoRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    #[allow(clippy::too_many_arguments)]
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        full_name: &str,
        password_hash: &str,
        avatar_url: &str,
        cover_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, full_name, password, avatar_url, cover_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, username, email, full_name, password_hash, avatar_url, cover_url],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    /// Lookup by username or email in a single query — login accepts either.
    pub fn get_user_by_identifier(&self, identifier: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1 OR email = ?1", identifier))
    }

    /// Overwrite the stored refresh token. `None` clears it (logout).
    /// Concurrent logins race here; the database's last writer wins.
    pub fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute(
                "UPDATE users SET refresh_token = ?2 WHERE id = ?1",
                rusqlite::params![id, token],
            )?;
            Ok(affected > 0)
        })
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                rusqlite::params![id, password_hash],
            )?;
            Ok(affected > 0)
        })
    }

    // -- Videos --

    #[allow(clippy::too_many_arguments)]
    pub fn insert_video(
        &self,
        id: &str,
        owner_id: &str,
        video_url: &str,
        thumbnail_url: &str,
        title: &str,
        description: &str,
        duration_secs: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO videos (id, owner_id, video_url, thumbnail_url, title, description, duration_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, owner_id, video_url, thumbnail_url, title, description, duration_secs],
            )?;
            Ok(())
        })
    }

    pub fn get_video(&self, id: &str) -> Result<Option<VideoRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{VIDEO_SELECT} WHERE v.id = ?1"))?;
            let row = stmt.query_row([id], video_from_row).optional()?;
            Ok(row)
        })
    }

    /// Published videos, newest first, with the owner's username joined in
    /// (single query, no N+1).
    pub fn list_published_videos(&self, limit: u32) -> Result<Vec<VideoRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{VIDEO_SELECT} WHERE v.published = 1 ORDER BY v.created_at DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map([limit], video_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn increment_views(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute("UPDATE videos SET views = views + 1 WHERE id = ?1", [id])?;
            Ok(affected > 0)
        })
    }

    /// Update descriptive fields. `None` leaves a field untouched.
    pub fn update_video(
        &self,
        id: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute(
                "UPDATE videos
                 SET title = COALESCE(?2, title),
                     description = COALESCE(?3, description)
                 WHERE id = ?1",
                rusqlite::params![id, title, description],
            )?;
            Ok(affected > 0)
        })
    }

    /// Flip the publication flag and return the new value.
    pub fn toggle_published(&self, id: &str) -> Result<Option<bool>> {
        self.with_conn_mut(|conn| {
            let affected =
                conn.execute("UPDATE videos SET published = NOT published WHERE id = ?1", [id])?;
            if affected == 0 {
                return Ok(None);
            }
            let published: bool =
                conn.query_row("SELECT published FROM videos WHERE id = ?1", [id], |row| {
                    row.get(0)
                })?;
            Ok(Some(published))
        })
    }

    pub fn delete_video(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute("DELETE FROM videos WHERE id = ?1", [id])?;
            Ok(affected > 0)
        })
    }
}

const VIDEO_SELECT: &str = "SELECT v.id, v.owner_id, u.username, v.video_url, v.thumbnail_url,
        v.title, v.description, v.duration_secs, v.views, v.published, v.created_at
 FROM videos v
 LEFT JOIN users u ON v.owner_id = u.id";

fn video_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<VideoRow, rusqlite::Error> {
    Ok(VideoRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        owner_username: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| "unknown".to_string()),
        video_url: row.get(3)?,
        thumbnail_url: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        duration_secs: row.get(7)?,
        views: row.get(8)?,
        published: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn query_user(conn: &Connection, filter: &str, param: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, email, full_name, password, avatar_url, cover_url, refresh_token, created_at
         FROM users WHERE {filter}"
    ))?;

    let row = stmt
        .query_row([param], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                full_name: row.get(3)?,
                password: row.get(4)?,
                avatar_url: row.get(5)?,
                cover_url: row.get(6)?,
                refresh_token: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
