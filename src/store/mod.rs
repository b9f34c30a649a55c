//! SQLite persistence: processed posts, the action log and running stats.
//!
//! ## What lives here
//! - **Schema**: `SCHEMA_VERSION`, [`Database::init_schema`].
//! - **Connection factory**: `open_conn` (WAL + foreign-keys + busy timeout).
//! - **Queries**: rate-limit windows, thread activity, reporting.
//! - **Post metrics**: votes and discussion on our own posts, refreshed
//!   from the platform and rolled up per personality.
//!
//! Timestamps are UTC RFC 3339 strings with millisecond precision, so plain
//! string comparison orders them correctly.
//!
//! [`Database`] is synchronous; async callers go through [`StoreHandle`].

mod handle;

pub use handle::StoreHandle;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::error::AppError;
use crate::performance::{PerformanceLevel, SUCCESS_THRESHOLD};
use crate::platforms::PlatformKind;

// ── Schema ────────────────────────────────────────────────────────────────────

/// Stored in `PRAGMA user_version`. Increment when the DDL changes.
pub const SCHEMA_VERSION: i64 = 2;

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS processed_posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        platform TEXT NOT NULL,
        post_id TEXT NOT NULL,
        author TEXT,
        community TEXT,
        title TEXT,
        seen_at TEXT NOT NULL,
        UNIQUE(platform, post_id)
    );

    CREATE TABLE IF NOT EXISTS actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        platform TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('post', 'comment')),
        external_id TEXT NOT NULL,
        parent_id TEXT,
        thread_id TEXT NOT NULL,
        depth INTEGER NOT NULL DEFAULT 0,
        personality TEXT NOT NULL,
        content TEXT NOT NULL,
        community TEXT,
        dry_run INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_actions_window ON actions(platform, kind, created_at);
    CREATE INDEX IF NOT EXISTS idx_actions_thread ON actions(platform, thread_id);

    CREATE TABLE IF NOT EXISTS platform_stats (
        platform TEXT PRIMARY KEY,
        total_posts INTEGER NOT NULL DEFAULT 0,
        total_comments INTEGER NOT NULL DEFAULT 0,
        total_interactions INTEGER NOT NULL DEFAULT 0,
        last_activity TEXT
    );

    CREATE TABLE IF NOT EXISTS personality_stats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        personality TEXT NOT NULL,
        platform TEXT NOT NULL,
        total_posts INTEGER NOT NULL DEFAULT 0,
        total_comments INTEGER NOT NULL DEFAULT 0,
        last_activity TEXT,
        UNIQUE(personality, platform)
    );
";

const SCHEMA_V2: &str = "
    CREATE TABLE IF NOT EXISTS post_metrics (
        platform TEXT NOT NULL,
        post_id TEXT NOT NULL,
        personality TEXT NOT NULL,
        upvote_ratio REAL NOT NULL,
        score INTEGER NOT NULL,
        num_comments INTEGER NOT NULL,
        sentiment REAL NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (platform, post_id)
    );
";

const DROP_ALL: &str = "
    DROP TABLE IF EXISTS post_metrics;
    DROP TABLE IF EXISTS processed_posts;
    DROP TABLE IF EXISTS actions;
    DROP TABLE IF EXISTS platform_stats;
    DROP TABLE IF EXISTS personality_stats;
    PRAGMA user_version = 0;
";

// ── Connection helper ─────────────────────────────────────────────────────────

/// Open `db_path` with WAL, foreign keys and a 5 s busy timeout.
fn open_conn(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Database(format!("open {}: {e}", db_path.display())))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Database(format!("set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Database(format!("set foreign_keys ON: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Database(format!("set busy_timeout: {e}")))?;

    Ok(conn)
}

/// Format a timestamp the way every column stores it.
pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

// ── Types ─────────────────────────────────────────────────────────────────────

/// What the bot did. A reply is a `Comment` with depth above 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Post,
    Comment,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Post => "post",
            ActionKind::Comment => "comment",
        }
    }
}

impl FromStr for ActionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(ActionKind::Post),
            "comment" => Ok(ActionKind::Comment),
            other => Err(AppError::Database(format!("unknown action kind '{other}'"))),
        }
    }
}

/// An action about to be recorded.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub platform: PlatformKind,
    pub kind: ActionKind,
    /// Platform id of what we created (or `dry_run_<uuid>`).
    pub external_id: String,
    pub parent_id: Option<String>,
    /// Top-level post the action belongs to; a post is its own thread.
    pub thread_id: String,
    /// 0 for a post, 1 for a top-level comment, +1 per nested reply.
    pub depth: u32,
    pub personality: String,
    pub content: String,
    /// Subreddit, when there is one.
    pub community: Option<String>,
    pub dry_run: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionRow {
    pub id: i64,
    pub platform: String,
    pub kind: ActionKind,
    pub external_id: String,
    pub parent_id: Option<String>,
    pub thread_id: String,
    pub depth: u32,
    pub personality: String,
    pub content: String,
    pub community: Option<String>,
    pub dry_run: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlatformStats {
    pub platform: String,
    pub total_posts: u64,
    pub total_comments: u64,
    pub total_interactions: u64,
    pub last_activity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonalityStats {
    pub personality: String,
    pub platform: String,
    pub total_posts: u64,
    pub total_comments: u64,
    pub last_activity: Option<String>,
}

/// A live post whose metrics are due for a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPost {
    pub post_id: String,
    pub personality: String,
}

/// Latest platform numbers for one of our posts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostMetrics {
    pub post_id: String,
    pub personality: String,
    pub upvote_ratio: f64,
    pub score: i64,
    pub num_comments: u64,
    /// See [`crate::performance::sentiment_score`].
    pub sentiment: f64,
}

/// Post metrics rolled up per personality.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonalityPerformance {
    pub personality: String,
    pub tracked_posts: u64,
    pub successful_posts: u64,
    pub avg_upvote_ratio: f64,
    pub avg_score: f64,
    pub avg_comments: f64,
    pub avg_sentiment: f64,
}

impl PersonalityPerformance {
    pub fn success_rate(&self) -> f64 {
        if self.tracked_posts == 0 { 0.0 } else { self.successful_posts as f64 / self.tracked_posts as f64 }
    }

    pub fn level(&self) -> PerformanceLevel {
        PerformanceLevel::from_success_rate(self.success_rate())
    }
}

/// How much the bot has said in one thread so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadActivity {
    /// Bot-authored messages, the post included.
    pub count: u32,
    pub max_depth: u32,
}

/// A post seen while scanning.
#[derive(Debug, Clone, Default)]
pub struct SeenPost<'a> {
    pub post_id: &'a str,
    pub author: Option<&'a str>,
    pub community: Option<&'a str>,
    pub title: Option<&'a str>,
}

// ── Database ──────────────────────────────────────────────────────────────────

pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.conn.path()).finish()
    }
}

impl Database {
    /// Open (creating parent directories) and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self { conn: open_conn(path)? };
        db.init_schema(false)?;
        Ok(db)
    }

    /// Create the schema, or drop and recreate everything with `force_recreate`.
    pub fn init_schema(&self, force_recreate: bool) -> Result<(), AppError> {
        if force_recreate {
            tracing::warn!("dropping all tables");
            self.conn
                .execute_batch(DROP_ALL)
                .map_err(|e| AppError::Database(format!("drop schema: {e}")))?;
        }

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .map_err(|e| AppError::Database(format!("read user_version: {e}")))?;
        if version == SCHEMA_VERSION {
            return Ok(());
        }
        if version > SCHEMA_VERSION {
            return Err(AppError::Database(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }

        if version < 1 {
            self.conn
                .execute_batch(SCHEMA_V1)
                .map_err(|e| AppError::Database(format!("initialize schema: {e}")))?;
        }
        self.conn
            .execute_batch(SCHEMA_V2)
            .map_err(|e| AppError::Database(format!("migrate schema to v2: {e}")))?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| AppError::Database(format!("set user_version: {e}")))?;
        tracing::info!(from = version, version = SCHEMA_VERSION, "database schema ready");
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, AppError> {
        Ok(self.conn.pragma_query_value(None, "user_version", |r| r.get(0))?)
    }

    // ── Processed posts ───────────────────────────────────────────────────────

    pub fn is_processed(&self, platform: PlatformKind, post_id: &str) -> Result<bool, AppError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_posts WHERE platform = ?1 AND post_id = ?2",
                params![platform.as_str(), post_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Remember a post. Returns `true` the first time, `false` after that.
    pub fn mark_processed(
        &self,
        platform: PlatformKind,
        post: &SeenPost<'_>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO processed_posts (platform, post_id, author, community, title, seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![platform.as_str(), post.post_id, post.author, post.community, post.title, ts(at)],
        )?;
        Ok(inserted == 1)
    }

    // ── Actions ───────────────────────────────────────────────────────────────

    /// Insert the action and bump both stats tables in one transaction.
    pub fn record_action(&self, a: &NewAction) -> Result<i64, AppError> {
        let at = ts(a.at);
        let (posts, comments) = match a.kind {
            ActionKind::Post => (1, 0),
            ActionKind::Comment => (0, 1),
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO actions
               (platform, kind, external_id, parent_id, thread_id, depth, personality,
                content, community, dry_run, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                a.platform.as_str(),
                a.kind.as_str(),
                a.external_id,
                a.parent_id,
                a.thread_id,
                a.depth,
                a.personality,
                a.content,
                a.community,
                a.dry_run,
                at,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO platform_stats (platform, total_posts, total_comments, total_interactions, last_activity)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(platform) DO UPDATE SET
               total_posts = total_posts + excluded.total_posts,
               total_comments = total_comments + excluded.total_comments,
               total_interactions = total_interactions + 1,
               last_activity = excluded.last_activity",
            params![a.platform.as_str(), posts, comments, at],
        )?;
        tx.execute(
            "INSERT INTO personality_stats (personality, platform, total_posts, total_comments, last_activity)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(personality, platform) DO UPDATE SET
               total_posts = total_posts + excluded.total_posts,
               total_comments = total_comments + excluded.total_comments,
               last_activity = excluded.last_activity",
            params![a.personality, a.platform.as_str(), posts, comments, at],
        )?;
        tx.commit()?;

        tracing::debug!(
            id,
            platform = a.platform.as_str(),
            kind = a.kind.as_str(),
            thread = %a.thread_id,
            depth = a.depth,
            dry_run = a.dry_run,
            "action recorded"
        );
        Ok(id)
    }

    /// Actions at or after `since`. `kind = None` counts every kind.
    pub fn count_actions_since(
        &self,
        platform: PlatformKind,
        kind: Option<ActionKind>,
        since: DateTime<Utc>,
    ) -> Result<u32, AppError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM actions
             WHERE platform = ?1 AND (?2 IS NULL OR kind = ?2) AND created_at >= ?3",
            params![platform.as_str(), kind.map(ActionKind::as_str), ts(since)],
            |r| r.get(0),
        )?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    pub fn last_action_at(
        &self,
        platform: PlatformKind,
        kind: Option<ActionKind>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let last: Option<String> = self.conn.query_row(
            "SELECT MAX(created_at) FROM actions WHERE platform = ?1 AND (?2 IS NULL OR kind = ?2)",
            params![platform.as_str(), kind.map(ActionKind::as_str)],
            |r| r.get(0),
        )?;
        Ok(last.as_deref().and_then(parse_ts))
    }

    pub fn thread_activity(
        &self,
        platform: PlatformKind,
        thread_id: &str,
    ) -> Result<ThreadActivity, AppError> {
        let (count, max_depth): (i64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), MAX(depth) FROM actions WHERE platform = ?1 AND thread_id = ?2",
            params![platform.as_str(), thread_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(ThreadActivity {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            max_depth: max_depth.and_then(|d| u32::try_from(d).ok()).unwrap_or(0),
        })
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    pub fn platform_stats(&self, platform: PlatformKind) -> Result<Option<PlatformStats>, AppError> {
        Ok(self
            .conn
            .query_row(
                "SELECT platform, total_posts, total_comments, total_interactions, last_activity
                 FROM platform_stats WHERE platform = ?1",
                params![platform.as_str()],
                map_platform_stats,
            )
            .optional()?)
    }

    /// Per-personality totals, optionally for one platform, busiest first.
    pub fn personality_stats(
        &self,
        platform: Option<PlatformKind>,
    ) -> Result<Vec<PersonalityStats>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT personality, platform, total_posts, total_comments, last_activity
             FROM personality_stats
             WHERE (?1 IS NULL OR platform = ?1)
             ORDER BY total_posts + total_comments DESC, personality",
        )?;
        let rows = stmt
            .query_map(params![platform.map(PlatformKind::as_str)], |r| {
                Ok(PersonalityStats {
                    personality: r.get(0)?,
                    platform: r.get(1)?,
                    total_posts: r.get::<_, i64>(2)?.max(0) as u64,
                    total_comments: r.get::<_, i64>(3)?.max(0) as u64,
                    last_activity: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Newest first.
    pub fn recent_actions(
        &self,
        platform: Option<PlatformKind>,
        limit: u32,
    ) -> Result<Vec<ActionRow>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, platform, kind, external_id, parent_id, thread_id, depth, personality,
                    content, community, dry_run, created_at
             FROM actions
             WHERE (?1 IS NULL OR platform = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![platform.map(PlatformKind::as_str), limit], map_action)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One of our own posts from the last `within`, chosen at random.
    pub fn random_recent_post(
        &self,
        platform: PlatformKind,
        within: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ActionRow>, AppError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, platform, kind, external_id, parent_id, thread_id, depth, personality,
                        content, community, dry_run, created_at
                 FROM actions
                 WHERE platform = ?1 AND kind = 'post' AND created_at >= ?2
                 ORDER BY RANDOM() LIMIT 1",
                params![platform.as_str(), ts(now - within)],
                map_action,
            )
            .optional()?)
    }

    // ── Post metrics ──────────────────────────────────────────────────────────

    /// Live posts younger than `max_age` whose metrics are missing or older
    /// than `stale_after`, newest first.
    pub fn posts_needing_metrics(
        &self,
        platform: PlatformKind,
        now: DateTime<Utc>,
        stale_after: Duration,
        max_age: Duration,
        limit: u32,
    ) -> Result<Vec<TrackedPost>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.external_id, a.personality
             FROM actions a
             LEFT JOIN post_metrics m ON m.platform = a.platform AND m.post_id = a.external_id
             WHERE a.platform = ?1 AND a.kind = 'post' AND a.dry_run = 0 AND a.created_at >= ?2
               AND (m.updated_at IS NULL OR m.updated_at <= ?3)
             ORDER BY a.created_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![platform.as_str(), ts(now - max_age), ts(now - stale_after), limit],
                |r| Ok(TrackedPost { post_id: r.get(0)?, personality: r.get(1)? }),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_post_metrics(
        &self,
        platform: PlatformKind,
        m: &PostMetrics,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.conn.execute(
            "INSERT INTO post_metrics
               (platform, post_id, personality, upvote_ratio, score, num_comments, sentiment, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(platform, post_id) DO UPDATE SET
               upvote_ratio = excluded.upvote_ratio,
               score = excluded.score,
               num_comments = excluded.num_comments,
               sentiment = excluded.sentiment,
               updated_at = excluded.updated_at",
            params![
                platform.as_str(),
                m.post_id,
                m.personality,
                m.upvote_ratio,
                m.score,
                i64::try_from(m.num_comments).unwrap_or(i64::MAX),
                m.sentiment,
                ts(at),
            ],
        )?;
        Ok(())
    }

    pub fn post_metrics(&self, platform: PlatformKind, post_id: &str) -> Result<Option<PostMetrics>, AppError> {
        Ok(self
            .conn
            .query_row(
                "SELECT post_id, personality, upvote_ratio, score, num_comments, sentiment
                 FROM post_metrics WHERE platform = ?1 AND post_id = ?2",
                params![platform.as_str(), post_id],
                |r| {
                    Ok(PostMetrics {
                        post_id: r.get(0)?,
                        personality: r.get(1)?,
                        upvote_ratio: r.get(2)?,
                        score: r.get(3)?,
                        num_comments: r.get::<_, i64>(4)?.max(0) as u64,
                        sentiment: r.get(5)?,
                    })
                },
            )
            .optional()?)
    }

    /// Best average sentiment first.
    pub fn personality_performance(
        &self,
        platform: PlatformKind,
    ) -> Result<Vec<PersonalityPerformance>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT personality, COUNT(*),
                    SUM(CASE WHEN sentiment >= ?2 THEN 1 ELSE 0 END),
                    AVG(upvote_ratio), AVG(score), AVG(num_comments), AVG(sentiment)
             FROM post_metrics
             WHERE platform = ?1
             GROUP BY personality
             ORDER BY AVG(sentiment) DESC, personality",
        )?;
        let rows = stmt
            .query_map(params![platform.as_str(), SUCCESS_THRESHOLD], |r| {
                Ok(PersonalityPerformance {
                    personality: r.get(0)?,
                    tracked_posts: r.get::<_, i64>(1)?.max(0) as u64,
                    successful_posts: r.get::<_, i64>(2)?.max(0) as u64,
                    avg_upvote_ratio: r.get(3)?,
                    avg_score: r.get(4)?,
                    avg_comments: r.get(5)?,
                    avg_sentiment: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_platform_stats(r: &Row<'_>) -> rusqlite::Result<PlatformStats> {
    Ok(PlatformStats {
        platform: r.get(0)?,
        total_posts: r.get::<_, i64>(1)?.max(0) as u64,
        total_comments: r.get::<_, i64>(2)?.max(0) as u64,
        total_interactions: r.get::<_, i64>(3)?.max(0) as u64,
        last_activity: r.get(4)?,
    })
}

fn map_action(r: &Row<'_>) -> rusqlite::Result<ActionRow> {
    let kind: String = r.get(2)?;
    Ok(ActionRow {
        id: r.get(0)?,
        platform: r.get(1)?,
        // the CHECK constraint keeps this to the two known values
        kind: if kind == "post" { ActionKind::Post } else { ActionKind::Comment },
        external_id: r.get(3)?,
        parent_id: r.get(4)?,
        thread_id: r.get(5)?,
        depth: r.get(6)?,
        personality: r.get(7)?,
        content: r.get(8)?,
        community: r.get(9)?,
        dry_run: r.get(10)?,
        created_at: r.get(11)?,
    })
}
