//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the path given with `-f`) relative to the
//! current working directory. Files ending in `.json` are parsed as JSON with
//! the same shape. A JSON file in the older layout (`global_settings`,
//! `platforms`, `platform_rate_limits`) is mapped onto the current one.
//! `PERSONA_WORK_DIR`, `PERSONA_LOG_LEVEL`, `DB_PATH` and
//! `BOT_DRY_RUN` / `TWITTER_DRY_RUN` override the file.
//!
//! Credentials never live here; see [`crate::credentials`].

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// General bot settings (`[bot]`).
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub name: String,
    /// Base directory for every relative path below (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Append logs here instead of stderr.
    pub log_file: Option<PathBuf>,
    /// Generate and record everything but never call a platform.
    pub dry_run: bool,
    pub status_file: PathBuf,
    pub personalities_dir: PathBuf,
    /// Optional directory of prompt template overrides.
    pub prompts_dir: Option<PathBuf>,
}

/// SQLite location (`[database]`).
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// OpenAI-compatible endpoint settings. Used for both `[llm.openai]` and
/// `[llm.deepseek]`, which differ only in their defaults.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    pub max_tokens: Option<u32>,
}

/// LLM configuration (`[llm]`).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active provider: `"dummy"`, `"openai"` or `"deepseek"`.
    pub provider: String,
    pub openai: OpenAiConfig,
    pub deepseek: OpenAiConfig,
    /// Attempts per generation before giving up.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl LlmConfig {
    /// Endpoint settings for the active provider.
    pub fn active_endpoint(&self) -> &OpenAiConfig {
        match self.provider.as_str() {
            "deepseek" => &self.deepseek,
            _ => &self.openai,
        }
    }
}

/// Which personality speaks on a platform, and how eagerly.
#[derive(Debug, Clone)]
pub struct PersonalityBinding {
    /// Fixed personality name; `None` picks one at random per action.
    pub active: Option<String>,
    pub add_signature: bool,
    pub auto_reply: bool,
    /// Chance in `[0, 1]` of replying or continuing a conversation.
    pub reply_probability: f64,
}

/// Per-platform action thresholds. A zero limit disables that action kind.
///
/// On Twitter, "posts" are tweets and "comments" are replies.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimits {
    pub posts_per_hour: u32,
    pub posts_per_day: u32,
    pub comments_per_hour: u32,
    pub comments_per_day: u32,
    /// Minimum seconds between any two actions on the platform.
    pub min_delay_between_actions: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionSettings {
    /// Deepest reply level the bot will write under a post.
    pub max_conversation_depth: u32,
    /// Most bot-authored messages allowed in a single thread.
    pub max_posts_per_thread: u32,
}

/// `[reddit]` section.
#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub enabled: bool,
    pub personality: PersonalityBinding,
    pub target_subreddits: Vec<String>,
    pub rate_limits: RateLimits,
    pub interaction: InteractionSettings,
    /// How many `new` posts to scan per subreddit per cycle.
    pub scan_limit: u32,
    /// Flair substrings tried in order when submitting.
    pub preferred_flairs: Vec<String>,
    /// Cast a random vote on newly seen posts.
    pub voting: bool,
    /// Subject matter handed to the post prompt.
    pub post_topic: String,
    pub api_base: String,
    pub auth_url: String,
}

/// `[twitter]` section.
#[derive(Debug, Clone)]
pub struct TwitterConfig {
    pub enabled: bool,
    pub personality: PersonalityBinding,
    pub rate_limits: RateLimits,
    pub interaction: InteractionSettings,
    /// Address of a running chromedriver (or any W3C WebDriver server).
    pub webdriver_url: String,
    pub base_url: String,
    pub headless: bool,
    /// Context line handed to the tweet prompt.
    pub topic: String,
    /// Where screenshots and page dumps go on failures. `None` disables them.
    pub debug_dir: Option<PathBuf>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot: BotConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub reddit: RedditConfig,
    pub twitter: TwitterConfig,
}

impl Config {
    /// Resolve `path` against `work_dir` unless it is already absolute.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        resolve_against(&self.bot.work_dir, path)
    }
}

/// Values that take precedence over the file. Tests build these directly
/// instead of mutating the process environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub db_path: Option<String>,
    pub dry_run: Option<bool>,
}

impl Overrides {
    pub fn from_env() -> Self {
        let dry_run = env::var("BOT_DRY_RUN")
            .ok()
            .or_else(|| env::var("TWITTER_DRY_RUN").ok())
            .and_then(|v| parse_bool(&v));
        Self {
            work_dir: env::var("PERSONA_WORK_DIR").ok(),
            log_level: env::var("PERSONA_LOG_LEVEL").ok(),
            db_path: env::var("DB_PATH").ok(),
            dry_run,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Raw file shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    bot: RawBot,
    database: RawDatabase,
    llm: RawLlm,
    reddit: RawReddit,
    twitter: RawTwitter,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawBot {
    name: String,
    work_dir: String,
    log_level: String,
    log_file: Option<String>,
    dry_run: bool,
    status_file: String,
    personalities_dir: String,
    prompts_dir: Option<String>,
}

impl Default for RawBot {
    fn default() -> Self {
        Self {
            name: "persona-bot".into(),
            work_dir: ".".into(),
            log_level: "info".into(),
            log_file: None,
            dry_run: false,
            status_file: "bot_status.json".into(),
            personalities_dir: "personalities".into(),
            prompts_dir: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawDatabase {
    path: String,
}

impl Default for RawDatabase {
    fn default() -> Self {
        Self { path: "bot.db".into() }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default")]
    provider: String,
    openai: Option<RawOpenAi>,
    deepseek: Option<RawOpenAi>,
    max_retries: u32,
    retry_delay_secs: u64,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            openai: None,
            deepseek: None,
            max_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawOpenAi {
    api_base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_seconds: Option<u64>,
    max_tokens: Option<u32>,
}

impl RawOpenAi {
    fn resolve(self, default_url: &str, default_model: &str) -> OpenAiConfig {
        OpenAiConfig {
            api_base_url: self.api_base_url.unwrap_or_else(|| default_url.to_string()),
            model: self.model.unwrap_or_else(|| default_model.to_string()),
            temperature: self.temperature.unwrap_or(0.7),
            timeout_seconds: self.timeout_seconds.unwrap_or(60),
            max_tokens: self.max_tokens.or(Some(300)),
        }
    }
}

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o-mini";
const DEEPSEEK_URL: &str = "https://api.deepseek.com/chat/completions";
const DEEPSEEK_MODEL: &str = "deepseek-chat";

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawPersonalityBinding {
    active: Option<String>,
    settings: RawPersonalitySettings,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawPersonalitySettings {
    add_signature: bool,
    auto_reply: bool,
    reply_probability: f64,
}

impl Default for RawPersonalitySettings {
    fn default() -> Self {
        Self { add_signature: true, auto_reply: true, reply_probability: 0.7 }
    }
}

impl RawPersonalityBinding {
    fn resolve(self) -> PersonalityBinding {
        PersonalityBinding {
            active: self.active.filter(|s| !s.trim().is_empty()),
            add_signature: self.settings.add_signature,
            auto_reply: self.settings.auto_reply,
            reply_probability: self.settings.reply_probability.clamp(0.0, 1.0),
        }
    }
}

#[derive(Deserialize, Default, Clone)]
struct RawRateLimits {
    #[serde(alias = "tweets_per_hour")]
    posts_per_hour: Option<u32>,
    #[serde(alias = "tweets_per_day")]
    posts_per_day: Option<u32>,
    #[serde(alias = "replies_per_hour")]
    comments_per_hour: Option<u32>,
    #[serde(alias = "replies_per_day")]
    comments_per_day: Option<u32>,
    min_delay_between_actions: Option<u64>,
}

impl RawRateLimits {
    /// Fill fields this table leaves unset from `other`.
    fn or(self, other: RawRateLimits) -> RawRateLimits {
        RawRateLimits {
            posts_per_hour: self.posts_per_hour.or(other.posts_per_hour),
            posts_per_day: self.posts_per_day.or(other.posts_per_day),
            comments_per_hour: self.comments_per_hour.or(other.comments_per_hour),
            comments_per_day: self.comments_per_day.or(other.comments_per_day),
            min_delay_between_actions: self.min_delay_between_actions.or(other.min_delay_between_actions),
        }
    }

    fn resolve(self, defaults: RateLimits) -> RateLimits {
        RateLimits {
            posts_per_hour: self.posts_per_hour.unwrap_or(defaults.posts_per_hour),
            posts_per_day: self.posts_per_day.unwrap_or(defaults.posts_per_day),
            comments_per_hour: self.comments_per_hour.unwrap_or(defaults.comments_per_hour),
            comments_per_day: self.comments_per_day.unwrap_or(defaults.comments_per_day),
            min_delay_between_actions: self
                .min_delay_between_actions
                .unwrap_or(defaults.min_delay_between_actions)
                .max(1),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawInteraction {
    max_conversation_depth: Option<u32>,
    max_posts_per_thread: Option<u32>,
}

impl RawInteraction {
    fn resolve(self) -> InteractionSettings {
        InteractionSettings {
            max_conversation_depth: self.max_conversation_depth.unwrap_or(4),
            max_posts_per_thread: self.max_posts_per_thread.unwrap_or(6),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawReddit {
    enabled: bool,
    personality: RawPersonalityBinding,
    target_subreddits: Vec<String>,
    rate_limits: RawRateLimits,
    interaction_settings: RawInteraction,
    scan_limit: u32,
    preferred_flairs: Vec<String>,
    voting: bool,
    post_topic: String,
    api_base: String,
    auth_url: String,
}

impl Default for RawReddit {
    fn default() -> Self {
        Self {
            enabled: false,
            personality: RawPersonalityBinding::default(),
            target_subreddits: Vec::new(),
            rate_limits: RawRateLimits::default(),
            interaction_settings: RawInteraction::default(),
            scan_limit: 10,
            preferred_flairs: ["discussion", "general", "strategy", "analysis", "opinion"]
                .into_iter()
                .map(String::from)
                .collect(),
            voting: false,
            post_topic: "crypto and DeFi".into(),
            api_base: "https://oauth.reddit.com".into(),
            auth_url: "https://www.reddit.com/api/v1/access_token".into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawTwitter {
    enabled: bool,
    personality: RawPersonalityBinding,
    rate_limits: RawRateLimits,
    interaction_settings: RawInteraction,
    webdriver_url: String,
    base_url: String,
    headless: bool,
    topic: String,
    debug_dir: Option<String>,
}

impl Default for RawTwitter {
    fn default() -> Self {
        Self {
            enabled: false,
            personality: RawPersonalityBinding::default(),
            rate_limits: RawRateLimits::default(),
            interaction_settings: RawInteraction::default(),
            webdriver_url: "http://localhost:9515".into(),
            base_url: "https://x.com".into(),
            headless: true,
            topic: "Latest developments in AI, DeFi, and blockchain technology".into(),
            debug_dir: None,
        }
    }
}

fn reddit_rate_defaults() -> RateLimits {
    RateLimits {
        posts_per_hour: 2,
        posts_per_day: 10,
        comments_per_hour: 5,
        comments_per_day: 50,
        min_delay_between_actions: 20,
    }
}

fn twitter_rate_defaults() -> RateLimits {
    RateLimits {
        posts_per_hour: 2,
        posts_per_day: 24,
        comments_per_hour: 5,
        comments_per_day: 50,
        min_delay_between_actions: 60,
    }
}

// ── Legacy JSON layout ────────────────────────────────────────────────────────

const LEGACY_KEYS: [&str; 3] = ["global_settings", "platforms", "platform_rate_limits"];

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLegacy {
    global_settings: RawLegacyGlobal,
    platforms: RawLegacyPlatforms,
    platform_rate_limits: RawLegacyRateLimits,
    target_subreddits: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLegacyGlobal {
    debug_mode: bool,
    dry_run: bool,
    database: Option<RawDatabase>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLegacyPlatforms {
    reddit: Option<Toggle<RawReddit>>,
    twitter: Option<Toggle<RawTwitter>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLegacyRateLimits {
    reddit: RawRateLimits,
    twitter: RawRateLimits,
}

/// `"reddit": true` or a full settings table.
#[derive(Deserialize)]
#[serde(untagged)]
enum Toggle<T> {
    Flag(bool),
    Settings(T),
}

impl<T: Default> Toggle<T> {
    fn into_settings(self, enable: impl FnOnce(&mut T)) -> T {
        match self {
            Toggle::Flag(on) => {
                let mut t = T::default();
                if on {
                    enable(&mut t);
                }
                t
            }
            Toggle::Settings(t) => t,
        }
    }
}

impl RawLegacy {
    fn into_raw(self) -> RawConfig {
        let mut raw = RawConfig::default();
        let g = self.global_settings;
        raw.bot.dry_run = g.dry_run;
        if g.debug_mode {
            raw.bot.log_level = "debug".into();
        }
        if let Some(db) = g.database {
            raw.database = db;
        }

        if let Some(reddit) = self.platforms.reddit {
            raw.reddit = reddit.into_settings(|r| r.enabled = true);
        }
        if raw.reddit.target_subreddits.is_empty() {
            raw.reddit.target_subreddits = self.target_subreddits;
        }
        raw.reddit.rate_limits = raw.reddit.rate_limits.or(self.platform_rate_limits.reddit);

        if let Some(twitter) = self.platforms.twitter {
            raw.twitter = twitter.into_settings(|t| t.enabled = true);
        }
        raw.twitter.rate_limits = raw.twitter.rate_limits.or(self.platform_rate_limits.twitter);
        raw
    }
}

fn parse_json(text: &str) -> Result<RawConfig, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let legacy = value
        .as_object()
        .is_some_and(|obj| LEGACY_KEYS.iter().any(|k| obj.contains_key(*k)));
    if legacy {
        Ok(serde_json::from_value::<RawLegacy>(value)?.into_raw())
    } else {
        serde_json::from_value(value)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `path` (or `config/default.toml`), then apply env overrides.
///
/// With no explicit path and no default file on disk, every setting takes its
/// built-in default.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();
    match path {
        Some(p) => load_from(Path::new(p), &overrides),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_from(default, &overrides)
            } else {
                resolve(RawConfig::default(), &overrides)
            }
        }
    }
}

/// Load an explicit file. The format follows the extension.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let raw: RawConfig = if is_json {
        parse_json(&text)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?
    } else {
        toml::from_str(&text)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?
    };

    resolve(raw, overrides)
}

fn resolve(raw: RawConfig, overrides: &Overrides) -> Result<Config, AppError> {
    let b = raw.bot;

    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&b.work_dir));
    let log_level = overrides.log_level.clone().unwrap_or(b.log_level);
    if log_level.trim().is_empty() {
        return Err(AppError::Config("bot.log_level must not be empty".into()));
    }

    let db_path = overrides.db_path.clone().unwrap_or(raw.database.path);
    let provider = raw.llm.provider.trim().to_ascii_lowercase();

    let reddit = raw.reddit;
    let twitter = raw.twitter;

    Ok(Config {
        bot: BotConfig {
            name: b.name,
            log_level,
            log_file: b.log_file.map(|p| resolve_against(&work_dir, &p)),
            dry_run: overrides.dry_run.unwrap_or(b.dry_run),
            status_file: resolve_against(&work_dir, &b.status_file),
            personalities_dir: resolve_against(&work_dir, &b.personalities_dir),
            prompts_dir: b.prompts_dir.map(|p| resolve_against(&work_dir, &p)),
            work_dir: work_dir.clone(),
        },
        database: DatabaseConfig { path: resolve_against(&work_dir, &db_path) },
        llm: LlmConfig {
            provider,
            openai: raw.llm.openai.unwrap_or_default().resolve(OPENAI_URL, OPENAI_MODEL),
            deepseek: raw.llm.deepseek.unwrap_or_default().resolve(DEEPSEEK_URL, DEEPSEEK_MODEL),
            max_retries: raw.llm.max_retries.max(1),
            retry_delay_secs: raw.llm.retry_delay_secs,
        },
        reddit: RedditConfig {
            enabled: reddit.enabled,
            personality: reddit.personality.resolve(),
            target_subreddits: reddit
                .target_subreddits
                .into_iter()
                .map(|s| s.trim().trim_start_matches("r/").to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            rate_limits: reddit.rate_limits.resolve(reddit_rate_defaults()),
            interaction: reddit.interaction_settings.resolve(),
            scan_limit: reddit.scan_limit.clamp(1, 100),
            preferred_flairs: reddit.preferred_flairs,
            voting: reddit.voting,
            post_topic: reddit.post_topic,
            api_base: reddit.api_base.trim_end_matches('/').to_string(),
            auth_url: reddit.auth_url,
        },
        twitter: TwitterConfig {
            enabled: twitter.enabled,
            personality: twitter.personality.resolve(),
            rate_limits: twitter.rate_limits.resolve(twitter_rate_defaults()),
            interaction: twitter.interaction_settings.resolve(),
            webdriver_url: twitter.webdriver_url.trim_end_matches('/').to_string(),
            base_url: twitter.base_url.trim_end_matches('/').to_string(),
            headless: twitter.headless,
            topic: twitter.topic,
            debug_dir: twitter.debug_dir.map(|p| resolve_against(&work_dir, &p)),
        },
    })
}

fn resolve_against(base: &Path, path: &str) -> PathBuf {
    let p = expand_home(path);
    if p.is_absolute() { p } else { base.join(p) }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for tests: dummy LLM, dry run, everything under `work_dir`.
impl Config {
    pub fn test_default(work_dir: &Path) -> Self {
        let mut cfg = resolve(RawConfig::default(), &Overrides {
            work_dir: Some(work_dir.to_string_lossy().into_owned()),
            ..Overrides::default()
        })
        .unwrap_or_else(|e| panic!("default config must resolve: {e}"));
        cfg.bot.dry_run = true;
        cfg.llm.provider = "dummy".into();
        cfg.llm.retry_delay_secs = 0;
        cfg.reddit.target_subreddits = vec!["TestSubreddit".into()];
        cfg
    }
}
