//! The Reddit loop: scan new posts, write a post, keep the conversation going.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RedditConfig;
use crate::error::AppError;
use crate::personality::{Personality, PersonalityManager};
use crate::platforms::{BotContext, PlatformError, PlatformKind, dry_run_id, pick_personality};
use crate::prompt::SignatureKind;
use crate::ratelimit::{ConversationGuard, RateLimiter};
use crate::runtime::{Component, ComponentFuture, sleep_or_cancel};
use crate::performance::sentiment_score;
use crate::store::{ActionKind, NewAction, PostMetrics, SeenPost};

use super::client::{RedditClient, choose_flair, with_rate_limit_retry};
use super::types::{RedditPost, VoteDirection};

const PLATFORM: PlatformKind = PlatformKind::Reddit;
const ERROR_BACKOFF: Duration = Duration::from_secs(60);
const RATE_LIMIT_ATTEMPTS: u32 = 3;
const RECENT_POST_WINDOW_DAYS: i64 = 3;
const METRICS_STALE_HOURS: i64 = 24;
const METRICS_WINDOW_DAYS: i64 = 7;
const METRICS_BATCH: u32 = 25;

/// What one cycle did; logged after every cycle and printed by `once`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: u32,
    pub new_posts: u32,
    pub votes: u32,
    pub comments: u32,
    pub posts: u32,
    pub replies: u32,
    pub metrics_refreshed: u32,
}

/// A thread the bot is talking in, and the message it answers next.
struct Conversation {
    thread: String,
    parent: String,
    parent_text: String,
    speaker: String,
    depth: u32,
    community: Option<String>,
}

pub struct RedditBot {
    ctx: BotContext,
    config: RedditConfig,
    client: Option<Arc<RedditClient>>,
    limiter: RateLimiter,
    guard: ConversationGuard,
    rng: StdRng,
    me: Option<String>,
    rate_limit_wait: Duration,
}

impl RedditBot {
    /// `client` may be `None` only in dry-run mode; scanning is skipped then.
    pub fn new(
        ctx: BotContext,
        config: RedditConfig,
        client: Option<RedditClient>,
    ) -> Result<Self, AppError> {
        if client.is_none() && !ctx.dry_run {
            return Err(AppError::Credentials("reddit client required outside dry-run".into()));
        }
        if let Some(name) = config.personality.active.as_deref() {
            if ctx.personalities.get(name).is_none() {
                return Err(AppError::Personality(format!("unknown reddit personality '{name}'")));
            }
        }
        if !ctx.personalities.supports(PLATFORM) {
            return Err(AppError::Personality("no personality supports reddit".into()));
        }
        Ok(Self {
            limiter: RateLimiter::new(PLATFORM, config.rate_limits.clone()),
            guard: ConversationGuard::from_settings(&config.interaction),
            client: client.map(Arc::new),
            rng: StdRng::from_entropy(),
            me: None,
            rate_limit_wait: Duration::from_secs(60),
            ctx,
            config,
        })
    }

    /// Base wait between rate-limited write attempts (grows per attempt).
    pub fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait = wait;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    fn live(&self) -> bool {
        !self.ctx.dry_run && self.client.is_some()
    }

    /// Scan, post, then (if nothing was posted) revisit a recent thread.
    /// Live runs finish by refreshing metrics on our own recent posts.
    pub async fn run_cycle(&mut self, shutdown: &CancellationToken) -> Result<CycleReport, AppError> {
        let mut report = CycleReport::default();
        if self.client.is_some() {
            self.scan(shutdown, &mut report).await?;
        }
        if shutdown.is_cancelled() {
            return Ok(report);
        }
        let posted = self.post(shutdown, &mut report).await?;
        if !posted && !shutdown.is_cancelled() {
            self.revisit(shutdown, &mut report).await?;
        }
        if self.live() && !shutdown.is_cancelled() {
            if let Err(e) = self.refresh_metrics(&mut report).await {
                warn!(error = %e, "post metrics refresh failed");
            }
        }
        Ok(report)
    }

    // ── metrics ───────────────────────────────────────────────────────────────

    async fn refresh_metrics(&mut self, report: &mut CycleReport) -> Result<(), AppError> {
        let Some(client) = self.client.clone() else {
            return Ok(());
        };
        let now = Utc::now();
        let due = self
            .ctx
            .store
            .call(move |db| {
                db.posts_needing_metrics(
                    PLATFORM,
                    now,
                    chrono::Duration::hours(METRICS_STALE_HOURS),
                    chrono::Duration::days(METRICS_WINDOW_DAYS),
                    METRICS_BATCH,
                )
            })
            .await?;
        if due.is_empty() {
            return Ok(());
        }

        let fullnames: Vec<String> = due.iter().map(|t| t.post_id.clone()).collect();
        let fresh = client.post_stats(&fullnames).await?;
        let metrics: Vec<PostMetrics> = fresh
            .into_iter()
            .filter_map(|post| {
                let tracked = due.iter().find(|t| t.post_id == post.name)?;
                let upvote_ratio = post.upvote_ratio.unwrap_or(1.0);
                Some(PostMetrics {
                    post_id: post.name,
                    personality: tracked.personality.clone(),
                    upvote_ratio,
                    score: post.score,
                    num_comments: post.num_comments,
                    sentiment: sentiment_score(upvote_ratio, post.num_comments, post.score),
                })
            })
            .collect();

        let count = metrics.len() as u32;
        self.ctx
            .store
            .call(move |db| {
                metrics
                    .iter()
                    .try_for_each(|m| db.upsert_post_metrics(PLATFORM, m, now))
            })
            .await?;
        report.metrics_refreshed += count;
        debug!(due = due.len(), refreshed = count, "post metrics refreshed");
        Ok(())
    }

    // ── scan ──────────────────────────────────────────────────────────────────

    async fn scan(&mut self, shutdown: &CancellationToken, report: &mut CycleReport) -> Result<(), AppError> {
        let Some(client) = self.client.clone() else {
            return Ok(());
        };
        if self.me.is_none() {
            self.me = Some(client.me().await?);
        }

        for sub in self.config.target_subreddits.clone() {
            let posts = match self.listing(&client, &sub).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(subreddit = %sub, error = %e, "failed to list posts");
                    continue;
                }
            };
            debug!(subreddit = %sub, count = posts.len(), "scanned");

            for post in posts {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                report.scanned += 1;
                if self.me.as_deref().is_some_and(|me| me.eq_ignore_ascii_case(&post.author)) {
                    continue;
                }

                let seen = post.clone();
                let fresh = self
                    .ctx
                    .store
                    .call(move |db| {
                        db.mark_processed(
                            PLATFORM,
                            &SeenPost {
                                post_id: &seen.id,
                                author: Some(&seen.author),
                                community: Some(&seen.subreddit),
                                title: Some(&seen.title),
                            },
                            Utc::now(),
                        )
                    })
                    .await?;
                if !fresh {
                    continue;
                }
                report.new_posts += 1;
                info!(post = %post.name, subreddit = %sub, "new post");

                if self.config.voting {
                    let dir = VoteDirection::random(&mut self.rng);
                    if dir != VoteDirection::Clear && self.live() {
                        match client.vote(&post.name, dir).await {
                            Ok(()) => report.votes += 1,
                            Err(e) => warn!(post = %post.name, error = %e, "vote failed"),
                        }
                    }
                }

                let settings = &self.config.personality;
                if settings.auto_reply
                    && PersonalityManager::should_interact(settings.reply_probability, &mut self.rng)
                {
                    if let Err(e) = self.comment_on(&post, shutdown, report).await {
                        warn!(post = %post.name, error = %e, "comment failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Newest posts, or the hot page when nothing new has been posted.
    async fn listing(&self, client: &RedditClient, sub: &str) -> Result<Vec<RedditPost>, PlatformError> {
        let posts = client.new_posts(sub, self.config.scan_limit).await?;
        if !posts.is_empty() {
            return Ok(posts);
        }
        debug!(subreddit = %sub, "no new posts, scanning hot");
        client.hot_posts(sub, self.config.scan_limit).await
    }

    async fn comment_on(
        &mut self,
        post: &RedditPost,
        shutdown: &CancellationToken,
        report: &mut CycleReport,
    ) -> Result<(), AppError> {
        let thread = post.name.clone();
        let personalities = Arc::clone(&self.ctx.personalities);
        let Some(p) = pick_personality(
            &self.config.personality,
            &personalities,
            PLATFORM,
            Some(&thread),
            &mut self.rng,
        ) else {
            return Ok(());
        };

        let activity = self.ctx.thread_activity(PLATFORM, &thread).await?;
        if !self.guard.allows(activity, 1) {
            debug!(thread = %thread, "conversation limit reached");
            return Ok(());
        }
        if !self.ctx.acquire(&self.limiter, ActionKind::Comment, shutdown).await? {
            return Ok(());
        }

        let text = self
            .ctx
            .generator
            .reddit_comment(p, &post.title, post.body(), self.config.personality.add_signature)
            .await?;
        let id = self.send_comment(&thread, &text, shutdown).await?;
        self.record(ActionKind::Comment, &id, Some(&thread), &thread, 1, p, &text, Some(&post.subreddit))
            .await?;
        report.comments += 1;
        info!(thread = %thread, personality = %p.name, comment = %id, "commented");
        Ok(())
    }

    // ── post ──────────────────────────────────────────────────────────────────

    async fn post(&mut self, shutdown: &CancellationToken, report: &mut CycleReport) -> Result<bool, AppError> {
        if !self.ctx.acquire(&self.limiter, ActionKind::Post, shutdown).await? {
            return Ok(false);
        }
        let personalities = Arc::clone(&self.ctx.personalities);
        let Some(p) = pick_personality(&self.config.personality, &personalities, PLATFORM, None, &mut self.rng)
        else {
            warn!("no personality available for reddit post");
            return Ok(false);
        };
        let Some(sub) = self.choose_subreddit(p) else {
            warn!(personality = %p.name, "no subreddit to post in");
            return Ok(false);
        };

        if let Some(client) = self.client.clone() {
            if !client.subreddit_exists(&sub).await? {
                warn!(subreddit = %sub, "subreddit not accessible, skipping post");
                return Ok(false);
            }
        }

        let generator = Arc::clone(&self.ctx.generator);
        let content = generator
            .reddit_post(p, &self.config.post_topic, self.config.personality.add_signature)
            .await?;
        let title = generator.reddit_title(p, &content).await;

        let fullname = match self.client.clone().filter(|_| !self.ctx.dry_run) {
            Some(client) => {
                let flairs = client.link_flairs(&sub).await.unwrap_or_else(|e| {
                    warn!(subreddit = %sub, error = %e, "could not load flairs");
                    Vec::new()
                });
                let flair_id = choose_flair(&flairs, &self.config.preferred_flairs).map(|f| f.id.clone());
                let wait = self.rate_limit_wait;
                with_rate_limit_retry(RATE_LIMIT_ATTEMPTS, wait, shutdown, || {
                    client.submit_self(&sub, &title, &content, flair_id.as_deref())
                })
                .await?
                .fullname
            }
            None => dry_run_id(),
        };

        self.record(ActionKind::Post, &fullname, None, &fullname, 0, p, &content, Some(&sub)).await?;
        personalities.assign_thread(&fullname, &p.name);
        report.posts += 1;
        info!(post = %fullname, subreddit = %sub, personality = %p.name, %title, dry_run = self.ctx.dry_run, "posted");

        self.converse(
            Conversation {
                thread: fullname.clone(),
                parent: fullname,
                parent_text: content,
                speaker: p.name.clone(),
                depth: 0,
                community: Some(sub),
            },
            shutdown,
            report,
        )
        .await?;
        Ok(true)
    }

    /// The personality's own subreddits, falling back to the configured targets.
    fn choose_subreddit(&mut self, p: &Personality) -> Option<String> {
        let own = p.settings_for(PLATFORM).map(|s| s.subreddits.as_slice()).unwrap_or_default();
        let pool = if own.is_empty() { self.config.target_subreddits.as_slice() } else { own };
        pool.choose(&mut self.rng).cloned()
    }

    // ── conversation ──────────────────────────────────────────────────────────

    /// Let contrasting personalities answer each other until chance, the
    /// conversation guard or the comment limit says stop.
    async fn converse(
        &mut self,
        mut c: Conversation,
        shutdown: &CancellationToken,
        report: &mut CycleReport,
    ) -> Result<(), AppError> {
        let personalities = Arc::clone(&self.ctx.personalities);
        let generator = Arc::clone(&self.ctx.generator);
        let probability = self.config.personality.reply_probability;

        loop {
            if shutdown.is_cancelled() || !PersonalityManager::should_interact(probability, &mut self.rng) {
                break;
            }
            let activity = self.ctx.thread_activity(PLATFORM, &c.thread).await?;
            let next_depth = c.depth + 1;
            if !self.guard.allows(activity, next_depth) {
                debug!(thread = %c.thread, ?activity, "conversation limit reached");
                break;
            }
            if !self.ctx.acquire(&self.limiter, ActionKind::Comment, shutdown).await? {
                break;
            }
            let Some(responder) = personalities.contrasting(&c.speaker, PLATFORM, &mut self.rng) else {
                break;
            };

            let lead = if c.depth == 0 { SignatureKind::RedditResponse } else { SignatureKind::RedditReply };
            let header = self.config.personality.add_signature.then_some(lead);
            let text = generator.reddit_reply(responder, &c.parent_text, header).await?;
            let id = self.send_comment(&c.parent, &text, shutdown).await?;
            self.record(
                ActionKind::Comment,
                &id,
                Some(&c.parent),
                &c.thread,
                next_depth,
                responder,
                &text,
                c.community.as_deref(),
            )
            .await?;
            report.replies += 1;
            info!(thread = %c.thread, depth = next_depth, personality = %responder.name, "replied");

            c = Conversation {
                parent: id,
                parent_text: text,
                speaker: responder.name.clone(),
                depth: next_depth,
                ..c
            };
        }
        Ok(())
    }

    /// Pick up one of our posts from the last few days and extend its thread.
    async fn revisit(&mut self, shutdown: &CancellationToken, report: &mut CycleReport) -> Result<(), AppError> {
        let window = chrono::Duration::days(RECENT_POST_WINDOW_DAYS);
        let row = self
            .ctx
            .store
            .call(move |db| db.random_recent_post(PLATFORM, window, Utc::now()))
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        debug!(thread = %row.thread_id, "revisiting recent post");
        self.converse(
            Conversation {
                thread: row.thread_id,
                parent: row.external_id,
                parent_text: row.content,
                speaker: row.personality,
                depth: 0,
                community: row.community,
            },
            shutdown,
            report,
        )
        .await
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn send_comment(
        &self,
        parent: &str,
        text: &str,
        shutdown: &CancellationToken,
    ) -> Result<String, AppError> {
        match self.client.as_ref().filter(|_| !self.ctx.dry_run) {
            Some(client) => {
                let created = with_rate_limit_retry(RATE_LIMIT_ATTEMPTS, self.rate_limit_wait, shutdown, || {
                    client.comment(parent, text)
                })
                .await?;
                Ok(created.fullname)
            }
            None => Ok(dry_run_id()),
        }
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
        community: Option<&str>,
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
                community: community.map(str::to_string),
                dry_run: self.ctx.dry_run,
                at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

impl Component for RedditBot {
    fn id(&self) -> &str {
        "reddit"
    }

    fn run(mut self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            info!(
                subreddits = ?self.config.target_subreddits,
                dry_run = self.ctx.dry_run,
                "reddit loop started"
            );
            let pause = Duration::from_secs(self.config.rate_limits.min_delay_between_actions);
            while !shutdown.is_cancelled() {
                let wait = match self.run_cycle(&shutdown).await {
                    Ok(report) => {
                        info!(?report, "reddit cycle complete");
                        pause
                    }
                    Err(e) => {
                        error!(error = %e, "reddit cycle failed");
                        ERROR_BACKOFF
                    }
                };
                if !sleep_or_cancel(wait, &shutdown).await {
                    break;
                }
            }
            info!("reddit loop stopped");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::generator::ContentGenerator;
    use crate::llm::LlmProvider;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::store::StoreHandle;
    use tempfile::TempDir;

    fn profile(name: &str) -> Personality {
        serde_json::from_str(&format!(
            r#"{{"name":"{name}","bio":["{name} bio"],
                "platform_settings":{{"reddit":{{"subreddits":["TestSubreddit"]}}}}}}"#
        ))
        .unwrap()
    }

    fn bot(dir: &TempDir) -> RedditBot {
        let mut cfg = Config::test_default(dir.path());
        cfg.reddit.rate_limits.min_delay_between_actions = 0;
        cfg.reddit.personality.reply_probability = 1.0;
        let ctx = BotContext {
            store: StoreHandle::open(&dir.path().join("bot.db")).unwrap(),
            generator: Arc::new(ContentGenerator::new(LlmProvider::Dummy(DummyProvider), &cfg.llm, None)),
            personalities: Arc::new(PersonalityManager::from_profiles([profile("ada"), profile("bob")])),
            dry_run: true,
        };
        RedditBot::new(ctx, cfg.reddit, None)
            .unwrap()
            .with_rng(StdRng::seed_from_u64(7))
    }

    #[tokio::test]
    async fn dry_run_cycle_posts_and_converses() {
        let dir = TempDir::new().unwrap();
        let mut bot = bot(&dir);
        let token = CancellationToken::new();

        let report = bot.run_cycle(&token).await.unwrap();
        assert_eq!(report.posts, 1);
        assert_eq!(report.scanned, 0);
        // depth 1..=4, then the depth guard stops the thread
        assert_eq!(report.replies, 4);

        let rows = bot.ctx.store.call(|db| db.recent_actions(Some(PLATFORM), 10)).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.dry_run && r.external_id.starts_with("dry_run_")));
        let post = rows.iter().find(|r| r.kind == ActionKind::Post).unwrap();
        assert_eq!(post.community.as_deref(), Some("TestSubreddit"));
        assert!(rows.iter().all(|r| r.thread_id == post.external_id));

        // speakers alternate
        let mut replies: Vec<_> = rows.iter().filter(|r| r.kind == ActionKind::Comment).collect();
        replies.sort_by_key(|r| r.depth);
        for pair in replies.windows(2) {
            assert_ne!(pair[0].personality, pair[1].personality);
            assert_eq!(pair[1].parent_id.as_deref(), Some(pair[0].external_id.as_str()));
        }
    }

    #[tokio::test]
    async fn hourly_limits_end_later_cycles() {
        let dir = TempDir::new().unwrap();
        let mut bot = bot(&dir);
        let token = CancellationToken::new();

        bot.run_cycle(&token).await.unwrap();
        // second post fits (2/h), only one more comment fits (5/h)
        let second = bot.run_cycle(&token).await.unwrap();
        assert_eq!((second.posts, second.replies), (1, 1));

        let third = bot.run_cycle(&token).await.unwrap();
        assert_eq!(third, CycleReport::default());
    }

    #[tokio::test]
    async fn cancelled_cycle_does_nothing() {
        let dir = TempDir::new().unwrap();
        let mut bot = bot(&dir);
        let token = CancellationToken::new();
        token.cancel();
        let report = bot.run_cycle(&token).await.unwrap();
        assert_eq!(report.replies, 0);
    }

    #[tokio::test]
    async fn empty_new_page_falls_back_to_hot() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        let json = |m: mockito::Mock| m.with_status(200).with_header("content-type", "application/json");
        json(server.mock("POST", "/api/v1/access_token"))
            .with_body(r#"{"access_token":"tok","token_type":"bearer","expires_in":3600}"#)
            .create_async()
            .await;
        json(server.mock("GET", "/api/v1/me").match_query(mockito::Matcher::Any))
            .with_body(r#"{"name":"flavum_bot"}"#)
            .create_async()
            .await;
        json(server.mock("GET", "/r/TestSubreddit/new").match_query(mockito::Matcher::Any))
            .with_body(r#"{"kind":"Listing","data":{"children":[]}}"#)
            .create_async()
            .await;
        let hot = json(server.mock("GET", "/r/TestSubreddit/hot").match_query(mockito::Matcher::Any))
            .with_body(
                r#"{"kind":"Listing","data":{"children":[
                    {"kind":"t3","data":{"id":"h1","name":"t3_h1","title":"Hot take","author":"alice","subreddit":"TestSubreddit"}},
                    {"kind":"t3","data":{"id":"h2","name":"t3_h2","title":"Mine","author":"Flavum_Bot","subreddit":"TestSubreddit"}}
                ]}}"#,
            )
            .create_async()
            .await;
        json(server.mock("GET", "/r/TestSubreddit/about").match_query(mockito::Matcher::Any))
            .with_body(r#"{"kind":"t5","data":{"display_name":"TestSubreddit"}}"#)
            .create_async()
            .await;

        let creds = crate::credentials::RedditCredentials::from_lookup(|name| {
            Some(if name == "REDDIT_USERNAME" { "flavum_bot" } else { "x" }.to_string())
        })
        .unwrap();
        let url = server.url();
        let client = RedditClient::with_endpoints(creds, &format!("{url}/api/v1/access_token"), &url).unwrap();

        let mut cfg = Config::test_default(dir.path());
        cfg.reddit.rate_limits.min_delay_between_actions = 0;
        cfg.reddit.personality.reply_probability = 0.0;
        let ctx = BotContext {
            store: StoreHandle::open(&dir.path().join("bot.db")).unwrap(),
            generator: Arc::new(ContentGenerator::new(LlmProvider::Dummy(DummyProvider), &cfg.llm, None)),
            personalities: Arc::new(PersonalityManager::from_profiles([profile("ada")])),
            dry_run: true,
        };
        let mut bot = RedditBot::new(ctx, cfg.reddit, Some(client)).unwrap().with_rng(StdRng::seed_from_u64(3));

        let report = bot.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!((report.scanned, report.new_posts, report.posts), (2, 1, 1));
        assert_eq!(report.comments, 0);
        hot.assert_async().await;
        let seen = bot.ctx.store.call(|db| db.is_processed(PLATFORM, "h1")).await.unwrap();
        assert!(seen);
    }

    #[tokio::test]
    async fn live_cycle_refreshes_post_metrics() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/access_token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok","token_type":"bearer","expires_in":3600}"#)
            .create_async()
            .await;
        let info = server
            .mock("GET", "/api/info")
            .match_query(mockito::Matcher::UrlEncoded("id".into(), "t3_mine".into()))
            .with_status(200)
            .with_body(
                r#"{"kind":"Listing","data":{"children":[
                    {"kind":"t3","data":{"id":"mine","name":"t3_mine","title":"AMMs","subreddit":"TestSubreddit",
                      "score":50,"upvote_ratio":0.8,"num_comments":10}}
                ]}}"#,
            )
            .create_async()
            .await;

        let creds = crate::credentials::RedditCredentials::from_lookup(|_| Some("x".to_string())).unwrap();
        let url = server.url();
        let client = RedditClient::with_endpoints(creds, &format!("{url}/api/v1/access_token"), &url).unwrap();
        let cfg = Config::test_default(dir.path());
        let ctx = BotContext {
            store: StoreHandle::open(&dir.path().join("bot.db")).unwrap(),
            generator: Arc::new(ContentGenerator::new(LlmProvider::Dummy(DummyProvider), &cfg.llm, None)),
            personalities: Arc::new(PersonalityManager::from_profiles([profile("ada")])),
            dry_run: false,
        };
        ctx.store
            .call(|db| {
                db.record_action(&NewAction {
                    platform: PLATFORM,
                    kind: ActionKind::Post,
                    external_id: "t3_mine".into(),
                    parent_id: None,
                    thread_id: "t3_mine".into(),
                    depth: 0,
                    personality: "ada".into(),
                    content: "AMMs".into(),
                    community: Some("TestSubreddit".into()),
                    dry_run: false,
                    at: Utc::now() - chrono::Duration::hours(2),
                })
            })
            .await
            .unwrap();
        let mut bot = RedditBot::new(ctx, cfg.reddit, Some(client)).unwrap();

        let mut report = CycleReport::default();
        bot.refresh_metrics(&mut report).await.unwrap();
        assert_eq!(report.metrics_refreshed, 1);
        info.assert_async().await;

        let m = bot.ctx.store.call(|db| db.post_metrics(PLATFORM, "t3_mine")).await.unwrap().unwrap();
        assert_eq!((m.score, m.num_comments, m.personality.as_str()), (50, 10, "ada"));
        assert_eq!(m.sentiment, 0.65);

        // fresh numbers are not fetched again within the day
        bot.refresh_metrics(&mut report).await.unwrap();
        assert_eq!(report.metrics_refreshed, 1);
    }

    #[test]
    fn live_mode_needs_a_client() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::test_default(dir.path());
        let ctx = BotContext {
            store: StoreHandle::open(&dir.path().join("bot.db")).unwrap(),
            generator: Arc::new(ContentGenerator::new(LlmProvider::Dummy(DummyProvider), &cfg.llm, None)),
            personalities: Arc::new(PersonalityManager::from_profiles([profile("ada")])),
            dry_run: false,
        };
        assert!(matches!(RedditBot::new(ctx, cfg.reddit, None), Err(AppError::Credentials(_))));
    }
}
