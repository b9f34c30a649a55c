//! Platform integrations and their shared types.

pub mod reddit;
pub mod twitter;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PersonalityBinding;
use crate::error::AppError;
use crate::generator::ContentGenerator;
use crate::personality::{Personality, PersonalityManager};
use crate::ratelimit::{DenialReason, RateLimiter};
use crate::runtime::sleep_or_cancel;
use crate::store::{ActionKind, NewAction, StoreHandle, ThreadActivity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Reddit,
    Twitter,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 2] = [PlatformKind::Reddit, PlatformKind::Twitter];

    pub fn as_str(self) -> &'static str {
        match self {
            PlatformKind::Reddit => "reddit",
            PlatformKind::Twitter => "twitter",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reddit" => Ok(PlatformKind::Reddit),
            "twitter" | "x" => Ok(PlatformKind::Twitter),
            other => Err(PlatformError::NotFound(format!("unknown platform '{other}'"))),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("rate limited by platform (retry after {}s)", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("browser error: {0}")]
    Browser(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Http(e.to_string())
    }
}

// ── Shared bot plumbing ───────────────────────────────────────────────────────

/// Everything a platform loop shares with the rest of the process.
#[derive(Debug, Clone)]
pub struct BotContext {
    pub store: StoreHandle,
    pub generator: Arc<ContentGenerator>,
    pub personalities: Arc<PersonalityManager>,
    /// Generate and record, but never write to a platform.
    pub dry_run: bool,
}

impl BotContext {
    /// Wait out a short spacing denial, give up on any other.
    ///
    /// Returns `false` when the action must not happen now (limit reached,
    /// kind disabled, or shutdown during the wait).
    pub async fn acquire(
        &self,
        limiter: &RateLimiter,
        kind: ActionKind,
        shutdown: &CancellationToken,
    ) -> Result<bool, AppError> {
        loop {
            let l = limiter.clone();
            let verdict = self.store.call(move |db| l.check(db, kind, Utc::now())).await?;
            let denial = match verdict {
                Ok(()) => return Ok(true),
                Err(d) => d,
            };
            match (&denial.reason, denial.retry_after) {
                (DenialReason::TooSoon { .. }, Some(wait)) => {
                    debug!(kind = kind.as_str(), wait_secs = wait.as_secs(), "spacing actions");
                    if !sleep_or_cancel(wait, shutdown).await {
                        return Ok(false);
                    }
                }
                _ => {
                    info!(kind = kind.as_str(), reason = %denial, "action skipped by rate limit");
                    return Ok(false);
                }
            }
        }
    }

    pub async fn record(&self, action: NewAction) -> Result<i64, AppError> {
        self.store.call(move |db| db.record_action(&action)).await
    }

    pub async fn thread_activity(
        &self,
        platform: PlatformKind,
        thread_id: &str,
    ) -> Result<ThreadActivity, AppError> {
        let thread = thread_id.to_string();
        self.store.call(move |db| db.thread_activity(platform, &thread)).await
    }
}

/// The configured personality if one is pinned, else the thread owner, else
/// anyone who speaks on `platform`.
pub fn pick_personality<'a, R: Rng + ?Sized>(
    binding: &PersonalityBinding,
    manager: &'a PersonalityManager,
    platform: PlatformKind,
    thread_id: Option<&str>,
    rng: &mut R,
) -> Option<&'a Personality> {
    if let Some(p) = binding.active.as_deref().and_then(|name| manager.get(name)) {
        return Some(p);
    }
    match thread_id {
        Some(t) => manager.for_thread(t, platform, rng),
        None => manager.random_for(platform, rng),
    }
}

/// Placeholder id recorded for actions that were never sent.
pub fn dry_run_id() -> String {
    format!("dry_run_{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses() {
        assert_eq!("Reddit".parse::<PlatformKind>().unwrap(), PlatformKind::Reddit);
        assert_eq!("x".parse::<PlatformKind>().unwrap(), PlatformKind::Twitter);
        assert!("mastodon".parse::<PlatformKind>().is_err());
        assert_eq!(PlatformKind::Twitter.to_string(), "twitter");
    }

    #[test]
    fn dry_run_ids_are_unique() {
        let a = dry_run_id();
        assert!(a.starts_with("dry_run_"));
        assert_ne!(a, dry_run_id());
    }

    #[test]
    fn pinned_personality_wins() {
        let json = |name: &str| {
            serde_json::from_str::<Personality>(&format!(
                r#"{{"name":"{name}","platform_settings":{{"reddit":{{}}}}}}"#
            ))
            .unwrap()
        };
        let manager = PersonalityManager::from_profiles([json("a"), json("b")]);
        let mut rng = rand::thread_rng();
        let binding = PersonalityBinding {
            active: Some("b".into()),
            add_signature: true,
            auto_reply: true,
            reply_probability: 0.7,
        };
        for _ in 0..10 {
            let p = pick_personality(&binding, &manager, PlatformKind::Reddit, None, &mut rng);
            assert_eq!(p.unwrap().name, "b");
        }
        let open = PersonalityBinding { active: None, ..binding };
        assert!(pick_personality(&open, &manager, PlatformKind::Twitter, None, &mut rng).is_none());
    }

    #[test]
    fn rate_limited_display() {
        let e = PlatformError::RateLimited { retry_after: Duration::from_secs(120) };
        assert_eq!(e.to_string(), "rate limited by platform (retry after 120s)");
    }
}
