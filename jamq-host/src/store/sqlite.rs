//! SQLite track store
//!
//! Durable [`TrackStore`] backed by sqlx. Rows map by hand: uuids and
//! timestamps travel as TEXT, status as its lowercase name. Timestamps
//! use fixed-width RFC3339 (microseconds, Z suffix) so lexicographic
//! ORDER BY matches chronological order.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use jamq_common::events::{ChangeFeed, TrackChange};
use jamq_common::model::{Session, Track, TrackStatus};

use super::{NewTrack, StoreError, TrackPatch, TrackStore};

/// Open (creating if missing) the track database at `db_path`
pub async fn connect(db_path: &Path) -> Result<Pool<Sqlite>, StoreError> {
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Some(Duration::from_secs(60)))
        .connect(&db_url)
        .await?;

    info!("Connected to track database: {:?}", db_path);
    Ok(pool)
}

/// Create the sessions and tracks tables if they do not exist
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<(), StoreError> {
    info!("Initializing track database schema");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            host_id TEXT NOT NULL,
            name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            title TEXT NOT NULL,
            artist TEXT NOT NULL,
            album TEXT,
            cover_url TEXT,
            media_id TEXT,
            suggested_by TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            played_at TEXT,
            order_index INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tracks_session_status ON tracks(session_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_host_active ON sessions(host_id, is_active)",
    )
    .execute(pool)
    .await?;

    info!("Track database schema ready");
    Ok(())
}

/// sqlx-backed [`TrackStore`]
#[derive(Clone)]
pub struct SqliteTrackStore {
    pool: Pool<Sqlite>,
    feed: ChangeFeed,
}

impl SqliteTrackStore {
    pub fn new(pool: Pool<Sqlite>, feed: ChangeFeed) -> Self {
        Self { pool, feed }
    }

    async fn fetch_track(&self, track_id: Uuid) -> Result<Option<Track>, StoreError> {
        let row = sqlx::query("SELECT * FROM tracks WHERE id = ?")
            .bind(track_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_track).transpose()
    }

    async fn fetch_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_session).transpose()
    }
}

#[async_trait]
impl TrackStore for SqliteTrackStore {
    async fn insert_track(&self, new: NewTrack) -> Result<Track, StoreError> {
        let session = self
            .fetch_session(new.session_id)
            .await?
            .ok_or(StoreError::SessionNotFound(new.session_id))?;
        if !session.is_active {
            return Err(StoreError::SessionEnded(new.session_id));
        }

        let track = Track {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            title: new.title,
            artist: new.artist,
            album: new.album,
            cover_url: new.cover_url,
            media_id: None,
            suggested_by: new.suggested_by,
            status: TrackStatus::Pending,
            created_at: Utc::now(),
            played_at: None,
            order_index: None,
        };

        sqlx::query(
            r#"
            INSERT INTO tracks
                (id, session_id, title, artist, album, cover_url,
                 media_id, suggested_by, status, created_at, played_at, order_index)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)
            "#,
        )
        .bind(track.id.to_string())
        .bind(track.session_id.to_string())
        .bind(&track.title)
        .bind(&track.artist)
        .bind(&track.album)
        .bind(&track.cover_url)
        .bind(&track.media_id)
        .bind(&track.suggested_by)
        .bind(track.status.as_str())
        .bind(encode_time(track.created_at))
        .execute(&self.pool)
        .await?;

        self.feed.publish(TrackChange::insert(track.clone())).await;
        Ok(track)
    }

    async fn update_track(&self, track_id: Uuid, patch: TrackPatch) -> Result<Track, StoreError> {
        let current = self
            .fetch_track(track_id)
            .await?
            .ok_or(StoreError::TrackNotFound(track_id))?;

        if let Some(next) = patch.status {
            if !current.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    from: current.status,
                    to: next,
                });
            }

            // Guard on the from-status so a concurrent transition cannot
            // be overwritten. Approval assigns the next order index in
            // the same statement, keeping MAX+1 atomic.
            let result = if next == TrackStatus::Approved {
                sqlx::query(
                    r#"
                    UPDATE tracks SET
                        status = ?,
                        order_index = (
                            SELECT COALESCE(MAX(t2.order_index), 0) + 1
                            FROM tracks t2
                            WHERE t2.session_id = ? AND t2.status = 'approved'
                        ),
                        media_id = COALESCE(?, media_id),
                        played_at = COALESCE(?, played_at)
                    WHERE id = ? AND status = ?
                    "#,
                )
                .bind(next.as_str())
                .bind(current.session_id.to_string())
                .bind(&patch.media_id)
                .bind(patch.played_at.map(encode_time))
                .bind(track_id.to_string())
                .bind(current.status.as_str())
                .execute(&self.pool)
                .await?
            } else {
                sqlx::query(
                    r#"
                    UPDATE tracks SET
                        status = ?,
                        media_id = COALESCE(?, media_id),
                        played_at = COALESCE(?, played_at)
                    WHERE id = ? AND status = ?
                    "#,
                )
                .bind(next.as_str())
                .bind(&patch.media_id)
                .bind(patch.played_at.map(encode_time))
                .bind(track_id.to_string())
                .bind(current.status.as_str())
                .execute(&self.pool)
                .await?
            };

            if result.rows_affected() == 0 {
                // Lost a race with another transition; report what holds now
                let actual = self
                    .fetch_track(track_id)
                    .await?
                    .ok_or(StoreError::TrackNotFound(track_id))?;
                return Err(StoreError::InvalidTransition {
                    from: actual.status,
                    to: next,
                });
            }
        } else {
            sqlx::query(
                r#"
                UPDATE tracks SET
                    media_id = COALESCE(?, media_id),
                    played_at = COALESCE(?, played_at)
                WHERE id = ?
                "#,
            )
            .bind(&patch.media_id)
            .bind(patch.played_at.map(encode_time))
            .bind(track_id.to_string())
            .execute(&self.pool)
            .await?;
        }

        let updated = self
            .fetch_track(track_id)
            .await?
            .ok_or(StoreError::TrackNotFound(track_id))?;

        self.feed
            .publish(TrackChange::update(updated.clone()))
            .await;
        Ok(updated)
    }

    async fn tracks_by_status(
        &self,
        session_id: Uuid,
        status: TrackStatus,
    ) -> Result<Vec<Track>, StoreError> {
        let order_clause = match status {
            TrackStatus::Approved => {
                "ORDER BY (order_index IS NULL) ASC, order_index ASC, created_at ASC, id ASC"
            }
            _ => "ORDER BY created_at ASC, id ASC",
        };
        let sql = format!(
            "SELECT * FROM tracks WHERE session_id = ? AND status = ? {}",
            order_clause
        );

        let rows = sqlx::query(&sql)
            .bind(session_id.to_string())
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_track).collect()
    }

    async fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<TrackChange> {
        self.feed.subscribe(session_id).await
    }

    async fn create_session(&self, host_id: &str, name: &str) -> Result<Session, StoreError> {
        let session = Session {
            id: Uuid::new_v4(),
            host_id: host_id.to_string(),
            name: name.to_string(),
            is_active: true,
            created_at: Utc::now(),
            ended_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (id, host_id, name, is_active, created_at, ended_at)
            VALUES (?, ?, ?, 1, ?, NULL)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.host_id)
        .bind(&session.name)
        .bind(encode_time(session.created_at))
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn end_session(&self, session_id: Uuid) -> Result<Session, StoreError> {
        sqlx::query(
            r#"
            UPDATE sessions SET is_active = 0, ended_at = ?
            WHERE id = ? AND is_active = 1
            "#,
        )
        .bind(encode_time(Utc::now()))
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;

        // Re-ending an ended session leaves it untouched
        let session = self
            .fetch_session(session_id)
            .await?
            .ok_or(StoreError::SessionNotFound(session_id))?;

        self.feed.remove(session_id).await;
        Ok(session)
    }

    async fn active_session(&self, host_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE host_id = ? AND is_active = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        self.fetch_session(session_id).await
    }
}

fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| column_decode(column, e))
}

fn decode_uuid(raw: &str, column: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| column_decode(column, e))
}

fn column_decode(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> StoreError {
    StoreError::Database(sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    })
}

fn row_to_track(row: &SqliteRow) -> Result<Track, StoreError> {
    let status: TrackStatus = row
        .get::<String, _>("status")
        .parse()
        .map_err(|e| column_decode("status", e))?;

    Ok(Track {
        id: decode_uuid(&row.get::<String, _>("id"), "id")?,
        session_id: decode_uuid(&row.get::<String, _>("session_id"), "session_id")?,
        title: row.get("title"),
        artist: row.get("artist"),
        album: row.get("album"),
        cover_url: row.get("cover_url"),
        media_id: row.get("media_id"),
        suggested_by: row.get("suggested_by"),
        status,
        created_at: decode_time(&row.get::<String, _>("created_at"), "created_at")?,
        played_at: row
            .get::<Option<String>, _>("played_at")
            .as_deref()
            .map(|s| decode_time(s, "played_at"))
            .transpose()?,
        order_index: row.get("order_index"),
    })
}

fn row_to_session(row: &SqliteRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: decode_uuid(&row.get::<String, _>("id"), "id")?,
        host_id: row.get("host_id"),
        name: row.get("name"),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: decode_time(&row.get::<String, _>("created_at"), "created_at")?,
        ended_at: row
            .get::<Option<String>, _>("ended_at")
            .as_deref()
            .map(|s| decode_time(s, "ended_at"))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamq_common::events::ChangeKind;

    async fn setup_store() -> SqliteTrackStore {
        // Single connection: each pooled connection would otherwise get
        // its own empty in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        init_schema(&pool).await.unwrap();
        SqliteTrackStore::new(pool, ChangeFeed::new(64))
    }

    fn submission(session_id: Uuid, title: &str) -> NewTrack {
        NewTrack {
            session_id,
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: Some("Album".to_string()),
            cover_url: None,
            suggested_by: Some("guest".to_string()),
        }
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let store = setup_store().await;
        init_schema(&store.pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn track_round_trips_through_rows() {
        let store = setup_store().await;
        let session = store.create_session("host-1", "Party").await.unwrap();

        let inserted = store
            .insert_track(submission(session.id, "Levitating"))
            .await
            .unwrap();

        let pending = store
            .tracks_by_status(session.id, TrackStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        let fetched = &pending[0];
        assert_eq!(fetched.id, inserted.id);
        assert_eq!(fetched.title, "Levitating");
        assert_eq!(fetched.album.as_deref(), Some("Album"));
        assert_eq!(fetched.suggested_by.as_deref(), Some("guest"));
        assert_eq!(fetched.status, TrackStatus::Pending);
        assert_eq!(fetched.created_at, inserted.created_at);
        assert!(fetched.order_index.is_none());
    }

    #[tokio::test]
    async fn approval_assigns_next_order_index_in_sql() {
        let store = setup_store().await;
        let session = store.create_session("host-1", "Party").await.unwrap();

        let a = store.insert_track(submission(session.id, "A")).await.unwrap();
        let b = store.insert_track(submission(session.id, "B")).await.unwrap();

        let a = store
            .update_track(a.id, TrackPatch::status(TrackStatus::Approved))
            .await
            .unwrap();
        let b = store
            .update_track(b.id, TrackPatch::status(TrackStatus::Approved))
            .await
            .unwrap();

        assert_eq!(a.order_index, Some(1));
        assert_eq!(b.order_index, Some(2));

        // Playing the head does not disturb later indexes
        store
            .update_track(a.id, TrackPatch::played(Utc::now()))
            .await
            .unwrap();
        let c = store.insert_track(submission(session.id, "C")).await.unwrap();
        let c = store
            .update_track(c.id, TrackPatch::status(TrackStatus::Approved))
            .await
            .unwrap();
        assert_eq!(c.order_index, Some(3));
    }

    #[tokio::test]
    async fn transition_guard_refuses_off_graph_moves() {
        let store = setup_store().await;
        let session = store.create_session("host-1", "Party").await.unwrap();
        let track = store.insert_track(submission(session.id, "A")).await.unwrap();

        assert!(matches!(
            store
                .update_track(track.id, TrackPatch::status(TrackStatus::Played))
                .await,
            Err(StoreError::InvalidTransition {
                from: TrackStatus::Pending,
                to: TrackStatus::Played,
            })
        ));

        store
            .update_track(track.id, TrackPatch::status(TrackStatus::Rejected))
            .await
            .unwrap();

        assert!(matches!(
            store
                .update_track(track.id, TrackPatch::status(TrackStatus::Approved))
                .await,
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn writes_publish_changes() {
        let store = setup_store().await;
        let session = store.create_session("host-1", "Party").await.unwrap();
        let mut rx = store.subscribe(session.id).await;

        let track = store.insert_track(submission(session.id, "A")).await.unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.track.id, track.id);

        store
            .update_track(track.id, TrackPatch::status(TrackStatus::Approved))
            .await
            .unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.track.status, TrackStatus::Approved);
        assert_eq!(change.track.order_index, Some(1));
    }

    #[tokio::test]
    async fn session_lifecycle_round_trips() {
        let store = setup_store().await;
        let session = store.create_session("host-1", "Party").await.unwrap();

        let active = store.active_session("host-1").await.unwrap().unwrap();
        assert_eq!(active.id, session.id);
        assert!(active.is_active);

        let ended = store.end_session(session.id).await.unwrap();
        assert!(!ended.is_active);
        assert!(ended.ended_at.is_some());

        assert!(store.active_session("host-1").await.unwrap().is_none());

        // Idempotent
        let again = store.end_session(session.id).await.unwrap();
        assert_eq!(again.ended_at, ended.ended_at);

        assert!(matches!(
            store.insert_track(submission(session.id, "Late")).await,
            Err(StoreError::SessionEnded(_))
        ));

        assert!(matches!(
            store.end_session(Uuid::new_v4()).await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn played_patch_records_timestamp() {
        let store = setup_store().await;
        let session = store.create_session("host-1", "Party").await.unwrap();
        let track = store.insert_track(submission(session.id, "A")).await.unwrap();

        store
            .update_track(track.id, TrackPatch::status(TrackStatus::Approved))
            .await
            .unwrap();

        let finished_at = Utc::now();
        let played = store
            .update_track(track.id, TrackPatch::played(finished_at))
            .await
            .unwrap();

        assert_eq!(played.status, TrackStatus::Played);
        // Microsecond storage granularity
        let stored = played.played_at.unwrap();
        assert!((stored - finished_at).num_milliseconds().abs() < 2);
    }
}
