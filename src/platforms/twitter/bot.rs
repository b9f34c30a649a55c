//! The Twitter loop: keep a browser session, tweet on schedule, follow up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TwitterConfig;
use crate::credentials::TwitterCredentials;
use crate::error::AppError;
use crate::personality::{Personality, PersonalityManager};
use crate::platforms::{BotContext, PlatformError, PlatformKind, dry_run_id, pick_personality};
use crate::ratelimit::{ConversationGuard, PostingSchedule, RateLimiter};
use crate::runtime::{Component, ComponentFuture, sleep_or_cancel};
use crate::status::BotStatus;
use crate::store::{ActionKind, NewAction};

use super::session::TwitterSession;
use super::tweet::Tweet;

const PLATFORM: PlatformKind = PlatformKind::Twitter;
const SESSION_BACKOFF: Duration = Duration::from_secs(300);
const MAX_IDLE_SECS: u64 = 300;
const POST_ATTEMPTS: u32 = 3;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tweets: u32,
    pub replies: u32,
}

pub struct TwitterBot {
    ctx: BotContext,
    config: TwitterConfig,
    creds: Option<TwitterCredentials>,
    session: Option<TwitterSession>,
    limiter: RateLimiter,
    guard: ConversationGuard,
    schedule: PostingSchedule,
    status: BotStatus,
    status_path: PathBuf,
    rng: StdRng,
}

impl TwitterBot {
    /// Picks up the schedule left in `status_path` by a previous run.
    pub fn new(
        ctx: BotContext,
        config: TwitterConfig,
        creds: Option<TwitterCredentials>,
        status_path: PathBuf,
    ) -> Result<Self, AppError> {
        if creds.is_none() && !ctx.dry_run {
            return Err(AppError::Credentials("twitter credentials required outside dry-run".into()));
        }
        if let Some(name) = config.personality.active.as_deref() {
            if ctx.personalities.get(name).is_none() {
                return Err(AppError::Personality(format!("unknown twitter personality '{name}'")));
            }
        }
        if !ctx.personalities.supports(PLATFORM) {
            return Err(AppError::Personality("no personality supports twitter".into()));
        }

        let schedule = PostingSchedule::from_limits(&config.rate_limits);
        let mut rng = StdRng::from_entropy();
        let previous = BotStatus::load(&status_path);
        let mut status = BotStatus::starting(&schedule, config.rate_limits.posts_per_hour, Utc::now());
        status.last_tweet_time = previous.last_tweet_time;
        status.total_tweets = previous.total_tweets;
        status.total_replies = previous.total_replies;
        status.next_tweet_due = previous.next_tweet_due.or_else(|| {
            previous.last_tweet_time.map(|last| last + chrono_delay(schedule.next_delay(&mut rng)))
        });

        Ok(Self {
            limiter: RateLimiter::new(PLATFORM, config.rate_limits.clone()),
            guard: ConversationGuard::from_settings(&config.interaction),
            session: None,
            schedule,
            status,
            status_path,
            rng,
            ctx,
            config,
            creds,
        })
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn status(&self) -> &BotStatus {
        &self.status
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.next_tweet_due.is_none_or(|due| now >= due)
    }

    fn save_status(&mut self) {
        if let Err(e) = self.status.save(&self.status_path, Utc::now()) {
            warn!(path = %self.status_path.display(), error = %e, "status file not saved");
        }
    }

    // ── session ───────────────────────────────────────────────────────────────

    /// Open and log in unless in dry run or already logged in.
    async fn ensure_session(&mut self) -> Result<(), AppError> {
        if self.ctx.dry_run || self.session.is_some() {
            return Ok(());
        }
        let Some(creds) = self.creds.as_ref() else {
            return Err(AppError::Credentials("twitter credentials missing".into()));
        };
        let mut session = TwitterSession::open(&self.config).await?;
        if let Err(e) = session.login(creds).await {
            session.close().await;
            return Err(e.into());
        }
        self.session = Some(session);
        Ok(())
    }

    async fn drop_session(&mut self) {
        if let Some(s) = self.session.take() {
            s.close().await;
        }
    }

    // ── tick ──────────────────────────────────────────────────────────────────

    /// Open a session, tweet once regardless of the schedule, close.
    pub async fn run_once(&mut self, shutdown: &CancellationToken) -> Result<TickReport, AppError> {
        self.ensure_session().await?;
        let report = self.tick(shutdown, true).await;
        self.drop_session().await;
        report
    }

    /// Tweet if due (or `force`), then maybe follow up.
    pub async fn tick(&mut self, shutdown: &CancellationToken, force: bool) -> Result<TickReport, AppError> {
        let mut report = TickReport::default();
        if !force && !self.is_due(Utc::now()) {
            return Ok(report);
        }
        if !self.ctx.acquire(&self.limiter, ActionKind::Post, shutdown).await? {
            return Ok(report);
        }
        let personalities = Arc::clone(&self.ctx.personalities);
        let Some(p) = pick_personality(&self.config.personality, &personalities, PLATFORM, None, &mut self.rng)
        else {
            warn!("no personality available for twitter");
            return Ok(report);
        };

        let mut attempt = 0;
        let (tweet_id, content) = loop {
            attempt += 1;
            match self.post_once(p).await {
                Ok(posted) => break posted,
                Err(e) if attempt < POST_ATTEMPTS => {
                    warn!(attempt, max = POST_ATTEMPTS, error = %e, "tweet failed, retrying");
                    let wait = Duration::from_secs(self.schedule.min_delay);
                    if !sleep_or_cancel(wait, shutdown).await {
                        return Ok(report);
                    }
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, "giving up on tweet, dropping session");
                    self.drop_session().await;
                    return Err(e);
                }
            }
        };

        let now = Utc::now();
        self.record(ActionKind::Post, &tweet_id, None, &tweet_id, 0, p, &content, now).await?;
        report.tweets += 1;
        self.status.last_tweet_time = Some(now);
        self.status.total_tweets += 1;
        self.status.next_tweet_due = Some(now + chrono_delay(self.schedule.next_delay(&mut self.rng)));
        self.save_status();
        info!(
            tweet = %tweet_id,
            personality = %p.name,
            next_due = ?self.status.next_tweet_due,
            dry_run = self.ctx.dry_run,
            "tweeted"
        );

        let d = self.schedule.min_delay;
        let settle = Duration::from_secs(self.rng.gen_range(d..=d * 2));
        if !sleep_or_cancel(settle, shutdown).await {
            return Ok(report);
        }
        match self.follow_up(p, &tweet_id, &content, shutdown).await {
            Ok(true) => report.replies += 1,
            Ok(false) => {}
            Err(e) => warn!(tweet = %tweet_id, error = %e, "follow-up failed"),
        }
        Ok(report)
    }

    async fn post_once(&mut self, p: &Personality) -> Result<(String, String), AppError> {
        let text = self.ctx.generator.tweet(p, Some(self.config.topic.as_str())).await?;
        let mut tweet = Tweet::new(text)?;
        if self.config.personality.add_signature {
            tweet.add_signature(p);
        }
        let id = match self.session.as_ref().filter(|_| !self.ctx.dry_run) {
            Some(session) => session.post_tweet(&tweet).await?,
            None if self.ctx.dry_run => dry_run_id(),
            None => return Err(PlatformError::Browser("no browser session".into()).into()),
        };
        Ok((id, tweet.content().to_string()))
    }

    /// The same personality answers its own tweet.
    async fn follow_up(
        &mut self,
        p: &Personality,
        tweet_id: &str,
        content: &str,
        shutdown: &CancellationToken,
    ) -> Result<bool, AppError> {
        let settings = &self.config.personality;
        if !settings.auto_reply || !PersonalityManager::should_interact(settings.reply_probability, &mut self.rng) {
            return Ok(false);
        }
        let activity = self.ctx.thread_activity(PLATFORM, tweet_id).await?;
        if !self.guard.allows(activity, 1) {
            debug!(tweet = %tweet_id, "conversation limit reached");
            return Ok(false);
        }
        if !self.ctx.acquire(&self.limiter, ActionKind::Comment, shutdown).await? {
            return Ok(false);
        }

        let text = self.ctx.generator.tweet_reply(p, content).await?;
        let reply = Tweet::new(text)?;
        let id = match self.session.as_ref().filter(|_| !self.ctx.dry_run) {
            Some(session) => session
                .reply_to_tweet(tweet_id, reply.content())
                .await?
                .unwrap_or_else(|| format!("{tweet_id}_reply_{}", Utc::now().timestamp())),
            None => dry_run_id(),
        };
        self.record(ActionKind::Comment, &id, Some(tweet_id), tweet_id, 1, p, reply.content(), Utc::now())
            .await?;
        self.status.total_replies += 1;
        self.save_status();
        info!(tweet = %tweet_id, reply = %id, personality = %p.name, "posted follow-up");
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        kind: ActionKind,
        external_id: &str,
        parent_id: Option<&str>,
        thread_id: &str,
        depth: u32,
        p: &Personality,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.ctx
            .record(NewAction {
                platform: PLATFORM,
                kind,
                external_id: external_id.to_string(),
                parent_id: parent_id.map(str::to_string),
                thread_id: thread_id.to_string(),
                depth,
                personality: p.name.clone(),
                content: content.to_string(),
                community: None,
                dry_run: self.ctx.dry_run,
                at,
            })
            .await?;
        Ok(())
    }
}

fn chrono_delay(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

impl Component for TwitterBot {
    fn id(&self) -> &str {
        "twitter"
    }

    fn run(mut self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            info!(
                tweets_per_hour = self.config.rate_limits.posts_per_hour,
                min_interval = self.schedule.min_interval,
                max_interval = self.schedule.max_interval,
                dry_run = self.ctx.dry_run,
                "twitter loop started"
            );
            self.save_status();
            let idle = Duration::from_secs(self.schedule.min_delay.min(MAX_IDLE_SECS));

            while !shutdown.is_cancelled() {
                if let Err(e) = self.ensure_session().await {
                    error!(error = %e, backoff_secs = SESSION_BACKOFF.as_secs(), "twitter session failed");
                    if !sleep_or_cancel(SESSION_BACKOFF, &shutdown).await {
                        break;
                    }
                    continue;
                }
                match self.tick(&shutdown, false).await {
                    Ok(report) if report != TickReport::default() => info!(?report, "twitter tick complete"),
                    Ok(_) => debug!(next_due = ?self.status.next_tweet_due, "nothing due"),
                    Err(e) => error!(error = %e, "twitter tick failed"),
                }
                if !sleep_or_cancel(idle, &shutdown).await {
                    break;
                }
            }

            self.drop_session().await;
            self.status.is_running = false;
            self.save_status();
            info!("twitter loop stopped");
            Ok(())
        })
    }
}
