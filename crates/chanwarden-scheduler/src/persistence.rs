//! SQLite-backed [`PersistenceGateway`].
//!
//! Timestamps are stored as RFC 3339 UTC text with second precision, so the
//! due/expiry comparisons can run as plain string comparisons in SQL.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chanwarden_core::error::{ChanwardenError, Result};
use chanwarden_core::traits::PersistenceGateway;
use chanwarden_core::types::{
    Channel, ChannelId, Listing, PostButton, PostId, PostStatus, ScheduledPost, Subscription,
    SubscriptionStatus, UserId,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

/// Owner setting naming the enforcement/publication channel.
pub const DEFAULT_CHANNEL_KEY: &str = "premium_channel_id";

fn storage(e: impl std::fmt::Display) -> ChanwardenError {
    ChanwardenError::Storage(e.to_string())
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| storage(format!("bad timestamp '{raw}': {e}")))
}

/// Malformed button JSON never blocks a post; it is sent without buttons.
fn decode_buttons(post_id: PostId, raw: Option<&str>) -> Vec<PostButton> {
    match raw {
        None | Some("") => Vec::new(),
        Some(json) => serde_json::from_str(json).unwrap_or_else(|e| {
            tracing::warn!(post_id, "⚠️ Ignoring malformed post buttons: {e}");
            Vec::new()
        }),
    }
}

struct SubscriptionRow {
    user_id: UserId,
    channel_id: ChannelId,
    owner_id: UserId,
    username: Option<String>,
    full_name: String,
    tier: String,
    start_at: String,
    end_at: String,
    status: String,
}

impl SubscriptionRow {
    const COLUMNS: &'static str =
        "user_id, channel_id, owner_id, username, full_name, tier, start_at, end_at, status";

    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            channel_id: row.get(1)?,
            owner_id: row.get(2)?,
            username: row.get(3)?,
            full_name: row.get(4)?,
            tier: row.get(5)?,
            start_at: row.get(6)?,
            end_at: row.get(7)?,
            status: row.get(8)?,
        })
    }

    fn into_subscription(self) -> Result<Subscription> {
        Ok(Subscription {
            user_id: self.user_id,
            channel_id: self.channel_id,
            owner_id: self.owner_id,
            username: self.username,
            full_name: self.full_name,
            tier: self.tier,
            start_at: parse_ts(&self.start_at)?,
            end_at: parse_ts(&self.end_at)?,
            status: self.status.parse()?,
        })
    }
}

struct PostRow {
    post_id: PostId,
    owner_id: UserId,
    channel_id: Option<ChannelId>,
    content_type: String,
    content: String,
    caption: Option<String>,
    buttons: Option<String>,
    publish_at: String,
    status: String,
}

impl PostRow {
    const COLUMNS: &'static str =
        "post_id, owner_id, channel_id, content_type, content, caption, buttons, publish_at, status";

    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            post_id: row.get(0)?,
            owner_id: row.get(1)?,
            channel_id: row.get(2)?,
            content_type: row.get(3)?,
            content: row.get(4)?,
            caption: row.get(5)?,
            buttons: row.get(6)?,
            publish_at: row.get(7)?,
            status: row.get(8)?,
        })
    }

    fn into_post(self) -> Result<ScheduledPost> {
        Ok(ScheduledPost {
            buttons: decode_buttons(self.post_id, self.buttons.as_deref()),
            post_id: self.post_id,
            owner_id: self.owner_id,
            channel_id: self.channel_id,
            content_type: self.content_type,
            content: self.content,
            caption: self.caption,
            publish_at: parse_ts(&self.publish_at)?,
            status: self.status.parse()?,
        })
    }
}

/// Row counts for the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub channels: i64,
    pub active_subscriptions: i64,
    pub pending_posts: i64,
    pub listings: i64,
}

/// SQLite store shared by the jobs; one connection behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(storage)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(storage)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::info!("💾 Database ready: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(storage)
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS channels (
                channel_id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL,
                title TEXT,
                kind TEXT NOT NULL           -- 'premium' | 'free'
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                owner_id INTEGER NOT NULL,
                username TEXT,
                full_name TEXT NOT NULL DEFAULT '',
                tier TEXT NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                PRIMARY KEY (user_id, channel_id)
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_expiry
                ON subscriptions(status, end_at);

            CREATE TABLE IF NOT EXISTS scheduled_posts (
                post_id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                channel_id INTEGER,          -- NULL: owner's default channel
                content_type TEXT NOT NULL,
                content TEXT NOT NULL,
                caption TEXT,
                buttons TEXT,                -- JSON: [{\"text\":..., \"url\":...}]
                publish_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
            );
            CREATE INDEX IF NOT EXISTS idx_posts_due
                ON scheduled_posts(status, publish_at);

            CREATE TABLE IF NOT EXISTS owner_settings (
                owner_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (owner_id, key)
            );

            CREATE TABLE IF NOT EXISTS listings (
                owner_id INTEGER PRIMARY KEY,
                channel_id INTEGER NOT NULL,
                members_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT
            );
            ",
            )
            .map_err(storage)
    }

    // ─── Authoring helpers ──────────────────────────────────────

    pub fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO channels (channel_id, owner_id, title, kind) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(channel_id) DO UPDATE SET
                    owner_id = excluded.owner_id, title = excluded.title, kind = excluded.kind",
                params![channel.channel_id, channel.owner_id, channel.title, channel.kind.as_str()],
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn set_owner_setting(&self, owner_id: UserId, key: &str, value: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO owner_settings (owner_id, key, value) VALUES (?1, ?2, ?3)",
                params![owner_id, key, value],
            )
            .map_err(storage)?;
        Ok(())
    }

    /// Queue a post. The record's `post_id` is ignored; the assigned id is returned.
    pub fn insert_post(&self, post: &ScheduledPost) -> Result<PostId> {
        let buttons = if post.buttons.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&post.buttons)?)
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduled_posts
                (owner_id, channel_id, content_type, content, caption, buttons, publish_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                post.owner_id,
                post.channel_id,
                post.content_type,
                post.content,
                post.caption,
                buttons,
                ts(post.publish_at),
                post.status.as_str(),
            ],
        )
        .map_err(storage)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_post(&self, post_id: PostId) -> Result<Option<ScheduledPost>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM scheduled_posts WHERE post_id = ?1", PostRow::COLUMNS),
                params![post_id],
                PostRow::read,
            )
            .optional()
            .map_err(storage)?;
        row.map(PostRow::into_post).transpose()
    }

    pub fn upsert_listing(&self, listing: &Listing) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO listings (owner_id, channel_id, members_count) VALUES (?1, ?2, ?3)
                 ON CONFLICT(owner_id) DO UPDATE SET
                    channel_id = excluded.channel_id, members_count = excluded.members_count",
                params![listing.owner_id, listing.channel_id, listing.members_count],
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(storage)
        };
        Ok(StoreStats {
            channels: count("SELECT COUNT(*) FROM channels")?,
            active_subscriptions: count(
                "SELECT COUNT(*) FROM subscriptions WHERE status = 'active'",
            )?,
            pending_posts: count("SELECT COUNT(*) FROM scheduled_posts WHERE status = 'pending'")?,
            listings: count("SELECT COUNT(*) FROM listings")?,
        })
    }
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn list_expired_active_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM subscriptions
                     WHERE status = 'active' AND end_at <= ?1
                     ORDER BY end_at",
                    SubscriptionRow::COLUMNS
                ))
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ts(now)], SubscriptionRow::read)
                .map_err(storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage)?;
            rows
        };
        // A row that no longer decodes is skipped so the rest still get enforced.
        let subs = rows
            .into_iter()
            .filter_map(|row| {
                let (user_id, channel_id) = (row.user_id, row.channel_id);
                row.into_subscription()
                    .map_err(|e| {
                        tracing::warn!(user_id, channel_id, "⚠️ Skipping unreadable subscription: {e}")
                    })
                    .ok()
            })
            .collect();
        Ok(subs)
    }

    async fn update_subscription_status(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        status: SubscriptionStatus,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE subscriptions SET status = ?1 WHERE user_id = ?2 AND channel_id = ?3",
                params![status.as_str(), user_id, channel_id],
            )
            .map_err(storage)?;
        Ok(())
    }

    async fn list_due_pending_posts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM scheduled_posts
                     WHERE status = 'pending' AND publish_at <= ?1
                     ORDER BY publish_at, post_id",
                    PostRow::COLUMNS
                ))
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ts(now)], PostRow::read)
                .map_err(storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage)?;
            rows
        };
        let mut posts = Vec::with_capacity(rows.len());
        for row in rows {
            let post_id = row.post_id;
            match row.into_post() {
                Ok(post) => posts.push(post),
                Err(e) => {
                    tracing::warn!(post_id, "⚠️ Unreadable scheduled post marked failed: {e}");
                    self.update_post_status(post_id, PostStatus::Failed).await?;
                }
            }
        }
        Ok(posts)
    }

    async fn update_post_status(&self, post_id: PostId, status: PostStatus) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE scheduled_posts SET status = ?1 WHERE post_id = ?2",
                params![status.as_str(), post_id],
            )
            .map_err(storage)?;
        Ok(())
    }

    async fn get_owner_default_channel(&self, owner_id: UserId) -> Result<Option<ChannelId>> {
        let conn = self.conn()?;
        let configured: Option<String> = conn
            .query_row(
                "SELECT value FROM owner_settings WHERE owner_id = ?1 AND key = ?2",
                params![owner_id, DEFAULT_CHANNEL_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        if let Some(raw) = configured {
            match raw.trim().parse::<ChannelId>() {
                Ok(channel_id) => return Ok(Some(channel_id)),
                Err(_) => tracing::warn!(owner_id, "⚠️ Invalid {DEFAULT_CHANNEL_KEY} setting '{raw}'"),
            }
        }

        conn.query_row(
            "SELECT channel_id FROM channels WHERE owner_id = ?1 AND kind = 'premium'
             ORDER BY rowid LIMIT 1",
            params![owner_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage)
    }

    async fn get_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>> {
        let row: Option<(ChannelId, UserId, Option<String>, String)> = self
            .conn()?
            .query_row(
                "SELECT channel_id, owner_id, title, kind FROM channels WHERE channel_id = ?1",
                params![channel_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(storage)?;
        row.map(|(channel_id, owner_id, title, kind)| {
            Ok(Channel {
                channel_id,
                owner_id,
                title,
                kind: kind.parse()?,
            })
        })
        .transpose()
    }

    async fn get_subscription(&self, user_id: UserId, channel_id: ChannelId) -> Result<Option<Subscription>> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM subscriptions WHERE user_id = ?1 AND channel_id = ?2",
                    SubscriptionRow::COLUMNS
                ),
                params![user_id, channel_id],
                SubscriptionRow::read,
            )
            .optional()
            .map_err(storage)?;
        row.map(SubscriptionRow::into_subscription).transpose()
    }

    async fn upsert_subscription(&self, sub: &Subscription) -> Result<()> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO subscriptions ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    SubscriptionRow::COLUMNS
                ),
                params![
                    sub.user_id,
                    sub.channel_id,
                    sub.owner_id,
                    sub.username,
                    sub.full_name,
                    sub.tier,
                    ts(sub.start_at),
                    ts(sub.end_at),
                    sub.status.as_str(),
                ],
            )
            .map_err(storage)?;
        Ok(())
    }

    async fn list_tracked_listings(&self) -> Result<Vec<Listing>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT owner_id, channel_id, members_count FROM listings ORDER BY owner_id")
            .map_err(storage)?;
        let listings = stmt
            .query_map([], |row| {
                Ok(Listing {
                    owner_id: row.get(0)?,
                    channel_id: row.get(1)?,
                    members_count: row.get(2)?,
                })
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(listings)
    }

    async fn update_listing_members(&self, owner_id: UserId, members_count: i64) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE listings SET members_count = ?1, updated_at = ?2 WHERE owner_id = ?3",
                params![members_count, ts(Utc::now()), owner_id],
            )
            .map_err(storage)?;
        Ok(())
    }
}
