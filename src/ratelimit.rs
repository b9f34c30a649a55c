//! Action throttling backed by the persisted action log.
//!
//! [`RateLimiter`] answers "may I act now?" from counts in SQLite, so limits
//! survive restarts. [`PostingSchedule`] spaces out scheduled posts and
//! [`ConversationGuard`] bounds how deep the bot talks to itself.

use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::config::{InteractionSettings, RateLimits};
use crate::error::AppError;
use crate::platforms::PlatformKind;
use crate::store::{ActionKind, Database, ThreadActivity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The limit for this action kind is zero.
    Disabled,
    HourlyLimit { count: u32, limit: u32 },
    DailyLimit { count: u32, limit: u32 },
    TooSoon { elapsed_secs: i64, min_delay_secs: u64 },
}

/// Why an action was refused and how long to wait before asking again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDenial {
    pub reason: DenialReason,
    /// `None` when waiting will not help (the action is disabled).
    pub retry_after: Option<StdDuration>,
}

impl fmt::Display for RateLimitDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            DenialReason::Disabled => write!(f, "action disabled by configuration"),
            DenialReason::HourlyLimit { count, limit } => {
                write!(f, "hourly limit reached ({count}/{limit})")
            }
            DenialReason::DailyLimit { count, limit } => {
                write!(f, "daily limit reached ({count}/{limit})")
            }
            DenialReason::TooSoon { elapsed_secs, min_delay_secs } => {
                write!(f, "only {elapsed_secs}s since last action (min {min_delay_secs}s)")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    platform: PlatformKind,
    limits: RateLimits,
}

impl RateLimiter {
    pub fn new(platform: PlatformKind, limits: RateLimits) -> Self {
        Self { platform, limits }
    }

    fn thresholds(&self, kind: ActionKind) -> (u32, u32) {
        match kind {
            ActionKind::Post => (self.limits.posts_per_hour, self.limits.posts_per_day),
            ActionKind::Comment => (self.limits.comments_per_hour, self.limits.comments_per_day),
        }
    }

    /// `Ok(Ok(()))` when `kind` may happen at `now`; `Ok(Err(denial))` otherwise.
    /// The outer error is a database failure.
    pub fn check(
        &self,
        db: &Database,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<Result<(), RateLimitDenial>, AppError> {
        let (per_hour, per_day) = self.thresholds(kind);
        if per_hour == 0 || per_day == 0 {
            return Ok(Err(RateLimitDenial { reason: DenialReason::Disabled, retry_after: None }));
        }

        // Spacing applies across kinds: a comment right after a post still waits.
        let min_delay = self.limits.min_delay_between_actions;
        if let Some(last) = db.last_action_at(self.platform, None)? {
            let elapsed = (now - last).num_seconds();
            if elapsed < min_delay as i64 {
                let wait = (min_delay as i64 - elapsed.max(0)).max(1) as u64;
                return Ok(Err(RateLimitDenial {
                    reason: DenialReason::TooSoon { elapsed_secs: elapsed, min_delay_secs: min_delay },
                    retry_after: Some(StdDuration::from_secs(wait)),
                }));
            }
        }

        let hourly = db.count_actions_since(self.platform, Some(kind), now - Duration::hours(1))?;
        if hourly >= per_hour {
            return Ok(Err(RateLimitDenial {
                reason: DenialReason::HourlyLimit { count: hourly, limit: per_hour },
                retry_after: Some(StdDuration::from_secs(15 * 60)),
            }));
        }

        let daily = db.count_actions_since(self.platform, Some(kind), now - Duration::days(1))?;
        if daily >= per_day {
            return Ok(Err(RateLimitDenial {
                reason: DenialReason::DailyLimit { count: daily, limit: per_day },
                retry_after: Some(StdDuration::from_secs(60 * 60)),
            }));
        }

        Ok(Ok(()))
    }
}

// ── Schedule ──────────────────────────────────────────────────────────────────

/// Randomised spacing between scheduled posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingSchedule {
    pub min_interval: u64,
    pub max_interval: u64,
    pub min_delay: u64,
}

impl PostingSchedule {
    /// `min_interval = max(3600 / posts_per_hour, min_delay)`, `max = 2 * min`.
    pub fn new(posts_per_hour: u32, min_delay: u64) -> Self {
        let min_delay = min_delay.max(1);
        let spacing = 3600 / u64::from(posts_per_hour.max(1));
        let min_interval = spacing.max(min_delay);
        Self { min_interval, max_interval: min_interval * 2, min_delay }
    }

    pub fn from_limits(limits: &RateLimits) -> Self {
        Self::new(limits.posts_per_hour, limits.min_delay_between_actions)
    }

    /// Uniform in `[min, max]` plus ±`min_delay/2` jitter, never below `min_interval`.
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> StdDuration {
        let base = rng.gen_range(self.min_interval..=self.max_interval) as i64;
        let half = (self.min_delay / 2) as i64;
        let jitter = if half > 0 { rng.gen_range(-half..=half) } else { 0 };
        let secs = (base + jitter).max(self.min_interval as i64) as u64;
        StdDuration::from_secs(secs)
    }
}

// ── Conversations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationGuard {
    pub max_depth: u32,
    pub max_posts_per_thread: u32,
}

impl ConversationGuard {
    pub fn from_settings(s: &InteractionSettings) -> Self {
        Self { max_depth: s.max_conversation_depth, max_posts_per_thread: s.max_posts_per_thread }
    }

    /// May the bot add a message at `next_depth` to a thread with `activity`?
    pub fn allows(&self, activity: ThreadActivity, next_depth: u32) -> bool {
        next_depth <= self.max_depth && activity.count < self.max_posts_per_thread
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewAction;
    use chrono::TimeZone;
    use rand::{SeedableRng, rngs::StdRng};

    fn limits() -> RateLimits {
        RateLimits {
            posts_per_hour: 2,
            posts_per_day: 3,
            comments_per_hour: 5,
            comments_per_day: 50,
            min_delay_between_actions: 20,
        }
    }

    fn record(db: &Database, kind: ActionKind, at: DateTime<Utc>) {
        db.record_action(&NewAction {
            platform: PlatformKind::Reddit,
            kind,
            external_id: "x".into(),
            parent_id: None,
            thread_id: "x".into(),
            depth: 0,
            personality: "Ada".into(),
            content: "c".into(),
            community: None,
            dry_run: true,
            at,
        })
        .unwrap();
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn denies_too_soon_with_retry_after() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("b.db")).unwrap();
        let rl = RateLimiter::new(PlatformKind::Reddit, limits());
        record(&db, ActionKind::Comment, t0());

        let denial = rl.check(&db, ActionKind::Post, t0() + Duration::seconds(5)).unwrap().unwrap_err();
        assert!(matches!(denial.reason, DenialReason::TooSoon { .. }));
        assert_eq!(denial.retry_after, Some(StdDuration::from_secs(15)));
        assert!(rl.check(&db, ActionKind::Post, t0() + Duration::seconds(20)).unwrap().is_ok());
    }

    #[test]
    fn hourly_then_daily() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("b.db")).unwrap();
        let rl = RateLimiter::new(PlatformKind::Reddit, limits());
        record(&db, ActionKind::Post, t0());
        record(&db, ActionKind::Post, t0() + Duration::minutes(1));

        let d = rl.check(&db, ActionKind::Post, t0() + Duration::minutes(5)).unwrap().unwrap_err();
        assert_eq!(d.reason, DenialReason::HourlyLimit { count: 2, limit: 2 });

        record(&db, ActionKind::Post, t0() + Duration::hours(2));
        let d = rl.check(&db, ActionKind::Post, t0() + Duration::hours(4)).unwrap().unwrap_err();
        assert_eq!(d.reason, DenialReason::DailyLimit { count: 3, limit: 3 });
        assert!(d.to_string().contains("daily"));
    }

    #[test]
    fn zero_limit_disables() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("b.db")).unwrap();
        let mut l = limits();
        l.comments_per_day = 0;
        let rl = RateLimiter::new(PlatformKind::Reddit, l);
        let d = rl.check(&db, ActionKind::Comment, t0()).unwrap().unwrap_err();
        assert_eq!(d.reason, DenialReason::Disabled);
        assert!(d.retry_after.is_none());
    }

    #[test]
    fn schedule_bounds() {
        let s = PostingSchedule::new(2, 20);
        assert_eq!((s.min_interval, s.max_interval), (1800, 3600));
        let s = PostingSchedule::new(120, 60);
        assert_eq!(s.min_interval, 60);
        let s = PostingSchedule::new(0, 0);
        assert_eq!(s.min_interval, 3600);

        let s = PostingSchedule::new(4, 300);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let d = s.next_delay(&mut rng).as_secs();
            assert!(d >= s.min_interval && d <= s.max_interval + 150, "{d}");
        }
    }

    #[test]
    fn guard_limits_depth_and_count() {
        let g = ConversationGuard { max_depth: 4, max_posts_per_thread: 6 };
        assert!(g.allows(ThreadActivity { count: 1, max_depth: 0 }, 1));
        assert!(g.allows(ThreadActivity { count: 5, max_depth: 3 }, 4));
        assert!(!g.allows(ThreadActivity { count: 5, max_depth: 4 }, 5));
        assert!(!g.allows(ThreadActivity { count: 6, max_depth: 1 }, 2));
    }
}
