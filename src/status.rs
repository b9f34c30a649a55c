//! `bot_status.json`: what the Twitter loop is doing, readable by `status`.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;
use crate::ratelimit::PostingSchedule;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotStatus {
    pub pid: u32,
    pub is_running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_tweet_time: Option<DateTime<Utc>>,
    pub next_tweet_due: Option<DateTime<Utc>>,
    pub tweets_per_hour: u32,
    pub min_delay: u64,
    pub current_min_interval: u64,
    pub current_max_interval: u64,
    pub total_tweets: u64,
    pub total_replies: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BotStatus {
    /// Fresh status for a loop starting now in this process.
    pub fn starting(schedule: &PostingSchedule, tweets_per_hour: u32, now: DateTime<Utc>) -> Self {
        Self {
            pid: std::process::id(),
            is_running: true,
            started_at: Some(now),
            tweets_per_hour,
            min_delay: schedule.min_delay,
            current_min_interval: schedule.min_interval,
            current_max_interval: schedule.max_interval,
            ..Self::default()
        }
    }

    /// A missing or unreadable file gives the default status.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return Self::default(),
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt status file ignored");
            Self::default()
        })
    }

    /// Write to a sibling temp file, then rename over `path`.
    pub fn save(&mut self, path: &Path, now: DateTime<Utc>) -> Result<(), AppError> {
        self.updated_at = Some(now);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("status serialisation failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn render_report(&self, now: DateTime<Utc>) -> String {
        let fmt = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()).unwrap_or_else(|| "never".into())
        };
        let mut out = String::new();
        let _ = writeln!(out, "=== Twitter loop ===");
        let _ = writeln!(out, "Running:        {}", if self.is_running { "yes" } else { "no" });
        if self.pid != 0 {
            let _ = writeln!(out, "Process ID:     {}", self.pid);
        }
        let _ = writeln!(out, "Started:        {}", fmt(self.started_at));
        let _ = writeln!(out, "Last tweet:     {}", fmt(self.last_tweet_time));
        match self.next_tweet_due {
            Some(due) if due > now => {
                let mins = (due - now).num_minutes();
                let _ = writeln!(out, "Next tweet due: {} (in {mins} min)", fmt(Some(due)));
            }
            Some(due) => {
                let _ = writeln!(out, "Next tweet due: {} (overdue)", fmt(Some(due)));
            }
            None => {
                let _ = writeln!(out, "Next tweet due: not scheduled");
            }
        }
        let _ = writeln!(
            out,
            "Rate:           {} tweets/hour, {}s min delay",
            self.tweets_per_hour, self.min_delay
        );
        let _ = writeln!(
            out,
            "Interval:       {:.1}-{:.1} h",
            self.current_min_interval as f64 / 3600.0,
            self.current_max_interval as f64 / 3600.0
        );
        let _ = writeln!(out, "Totals:         {} tweets, {} replies", self.total_tweets, self.total_replies);
        out
    }
}
