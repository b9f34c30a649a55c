//! persona-bot entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI, load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Dispatch the subcommand; `run` opens the store, loads personalities,
//!      builds the LLM provider and spawns one loop per platform
//!   6. Ctrl-C / SIGTERM cancels the shared token; loops drain and exit

use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use persona_bot::config::{self, Config};
use persona_bot::credentials::{
    self, REDDIT_VARS, RedditCredentials, TWITTER_2FA_VAR, TWITTER_VARS, TwitterCredentials,
};
use persona_bot::error::AppError;
use persona_bot::generator::ContentGenerator;
use persona_bot::llm::providers;
use persona_bot::logger;
use persona_bot::personality::PersonalityManager;
use persona_bot::platforms::reddit::{RedditBot, RedditClient};
use persona_bot::platforms::twitter::TwitterBot;
use persona_bot::platforms::{BotContext, PlatformKind};
use persona_bot::runtime::{Component, spawn_components};
use persona_bot::status::BotStatus;
use persona_bot::store::{Database, StoreHandle};

#[derive(Debug, Parser)]
#[command(name = "persona-bot", version, about = "Personality-driven Reddit and Twitter/X bot")]
struct Cli {
    /// Configuration file (TOML, or JSON by extension). Default: config/default.toml
    #[arg(short = 'f', long = "config", global = true, value_name = "PATH")]
    config: Option<String>,

    /// More log output: -v info, -vv debug, -vvv trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Generate and record everything, post nothing
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the platform loops until Ctrl-C (default)
    Run {
        /// Only this platform; otherwise every enabled one
        #[arg(long)]
        platform: Option<PlatformKind>,
    },
    /// One Reddit cycle or one forced tweet, then exit
    Once {
        #[arg(long)]
        platform: PlatformKind,
    },
    /// Status file, activity stats and recent actions
    Status,
    /// Create the database schema
    InitDb {
        /// Drop and recreate every table
        #[arg(long)]
        force: bool,
    },
    /// List loaded personalities
    Personalities,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = config::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.bot.dry_run = true;
    }

    let cli_level = logger::level_for_verbosity(cli.verbose);
    let effective_level = cli_level.unwrap_or(config.bot.log_level.as_str());
    logger::init(effective_level, config.bot.log_file.as_deref())?;

    info!(
        bot_name = %config.bot.name,
        work_dir = %config.bot.work_dir.display(),
        effective_log_level = %effective_level,
        dry_run = config.bot.dry_run,
        "config loaded"
    );

    match cli.command.unwrap_or(Command::Run { platform: None }) {
        Command::Run { platform } => run_loops(&config, platform).await,
        Command::Once { platform } => run_once(&config, platform).await,
        Command::Status => show_status(&config),
        Command::InitDb { force } => init_db(&config, force),
        Command::Personalities => list_personalities(&config),
    }
}

// ── run / once ────────────────────────────────────────────────────────────────

async fn run_loops(config: &Config, only: Option<PlatformKind>) -> Result<(), AppError> {
    let wanted: Vec<PlatformKind> = match only {
        Some(p) => vec![p],
        None => PlatformKind::ALL.into_iter().filter(|p| enabled(config, *p)).collect(),
    };
    if wanted.is_empty() {
        return Err(AppError::Config("no platform enabled; set [reddit] or [twitter] enabled = true".into()));
    }

    let ctx = build_context(config)?;
    let mut components: Vec<Box<dyn Component>> = Vec::new();
    for platform in &wanted {
        match platform {
            PlatformKind::Reddit => components.push(Box::new(reddit_bot(ctx.clone(), config)?)),
            PlatformKind::Twitter => components.push(Box::new(twitter_bot(ctx.clone(), config)?)),
        }
    }

    // Shared shutdown token: a signal cancels it, every loop watches it.
    let shutdown = CancellationToken::new();
    watch_signals(shutdown.clone());

    info!(platforms = ?wanted, "starting platform loops");
    print_banner(config, &wanted);
    spawn_components(components, shutdown).join().await
}

async fn run_once(config: &Config, platform: PlatformKind) -> Result<(), AppError> {
    let ctx = build_context(config)?;
    let shutdown = CancellationToken::new();
    watch_signals(shutdown.clone());

    match platform {
        PlatformKind::Reddit => {
            let mut bot = reddit_bot(ctx, config)?;
            let r = bot.run_cycle(&shutdown).await?;
            println!(
                "reddit: scanned {} ({} new), {} votes, {} comments, {} posts, {} replies, {} metrics refreshed",
                r.scanned, r.new_posts, r.votes, r.comments, r.posts, r.replies, r.metrics_refreshed
            );
        }
        PlatformKind::Twitter => {
            let mut bot = twitter_bot(ctx, config)?;
            let r = bot.run_once(&shutdown).await?;
            println!("twitter: {} tweets, {} replies", r.tweets, r.replies);
        }
    }
    Ok(())
}

fn enabled(config: &Config, platform: PlatformKind) -> bool {
    match platform {
        PlatformKind::Reddit => config.reddit.enabled,
        PlatformKind::Twitter => config.twitter.enabled,
    }
}

/// Cancel `token` on Ctrl-C, or SIGTERM on unix.
fn watch_signals(token: CancellationToken) {
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        info!(%signal, "shutting down");
        token.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "ctrl-c",
            _ = term.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            "ctrl-c"
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

fn build_context(config: &Config) -> Result<BotContext, AppError> {
    let store = StoreHandle::open(&config.database.path)?;
    let personalities =
        PersonalityManager::load_dir(&config.bot.personalities_dir, &config.reddit.target_subreddits)?;
    info!(count = personalities.names().len(), dir = %config.bot.personalities_dir.display(), "personalities loaded");

    let key = credentials::llm_api_key(&config.llm.provider, |name| std::env::var(name).ok());
    let provider = providers::build(&config.llm, key)?;
    info!(provider = provider.name(), "llm provider ready");
    let generator = ContentGenerator::new(provider, &config.llm, config.bot.prompts_dir.clone());

    Ok(BotContext {
        store,
        generator: Arc::new(generator),
        personalities: Arc::new(personalities),
        dry_run: config.bot.dry_run,
    })
}

fn reddit_bot(ctx: BotContext, config: &Config) -> Result<RedditBot, AppError> {
    let client = match RedditCredentials::from_env() {
        Ok(creds) => Some(RedditClient::new(&config.reddit, creds)?),
        Err(e) if ctx.dry_run => {
            warn!(error = %e, "no reddit credentials, dry run will not scan");
            None
        }
        Err(e) => return Err(e),
    };
    RedditBot::new(ctx, config.reddit.clone(), client)
}

fn twitter_bot(ctx: BotContext, config: &Config) -> Result<TwitterBot, AppError> {
    let creds = match TwitterCredentials::from_env() {
        Ok(creds) => Some(creds),
        Err(e) if ctx.dry_run => {
            warn!(error = %e, "no twitter credentials, dry run only");
            None
        }
        Err(e) => return Err(e),
    };
    TwitterBot::new(ctx, config.twitter.clone(), creds, config.bot.status_file.clone())
}

fn print_banner(config: &Config, platforms: &[PlatformKind]) {
    println!("✓ {} running", config.bot.name);
    for p in platforms {
        let limits = match p {
            PlatformKind::Reddit => &config.reddit.rate_limits,
            PlatformKind::Twitter => &config.twitter.rate_limits,
        };
        println!(
            "  {p:<8} {}/h posts, {}/h replies, {}s min delay",
            limits.posts_per_hour, limits.comments_per_hour, limits.min_delay_between_actions
        );
    }
    if config.bot.dry_run {
        println!("  dry run: nothing will be posted");
    }
}

// ── status / init-db / personalities ──────────────────────────────────────────

fn show_status(config: &Config) -> Result<(), AppError> {
    let status = BotStatus::load(&config.bot.status_file);
    print!("{}", status.render_report(chrono::Utc::now()));

    println!("\n=== Credentials ===");
    let mut names: Vec<&str> = REDDIT_VARS.iter().chain(TWITTER_VARS.iter()).copied().collect();
    names.push(TWITTER_2FA_VAR);
    for (name, present) in credentials::env_presence(&names) {
        println!("{name:<22} {}", if present { "set" } else { "missing" });
    }

    let db = Database::open(&config.database.path)?;
    println!("\n=== Platforms ===");
    for p in PlatformKind::ALL {
        match db.platform_stats(p)? {
            Some(s) => println!(
                "{:<8} {} posts, {} comments, last activity {}",
                s.platform,
                s.total_posts,
                s.total_comments,
                s.last_activity.as_deref().unwrap_or("never")
            ),
            None => println!("{p:<8} no activity"),
        }
    }

    println!("\n=== Personalities ===");
    for s in db.personality_stats(None)? {
        println!(
            "{:<20} {:<8} {} posts, {} comments",
            s.personality, s.platform, s.total_posts, s.total_comments
        );
    }

    println!("\n=== Reddit post performance ===");
    let performance = db.personality_performance(PlatformKind::Reddit)?;
    if performance.is_empty() {
        println!("no tracked posts yet");
    }
    for p in performance {
        println!(
            "{:<20} {} posts, {:.0}% successful ({}), ratio {:.2}, score {:.1}, {:.1} comments",
            p.personality,
            p.tracked_posts,
            p.success_rate() * 100.0,
            p.level(),
            p.avg_upvote_ratio,
            p.avg_score,
            p.avg_comments
        );
    }

    println!("\n=== Recent actions ===");
    for a in db.recent_actions(None, 10)? {
        let preview: String = a.content.chars().take(60).collect();
        println!(
            "{} {:<8} {:<7} {:<16} {}{}",
            a.created_at,
            a.platform,
            a.kind.as_str(),
            a.personality,
            if a.dry_run { "[dry] " } else { "" },
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

fn init_db(config: &Config, force: bool) -> Result<(), AppError> {
    let db = Database::open(&config.database.path)?;
    db.init_schema(force)?;
    println!(
        "✓ database ready at {} (schema v{})",
        config.database.path.display(),
        db.schema_version()?
    );
    Ok(())
}

fn list_personalities(config: &Config) -> Result<(), AppError> {
    let manager =
        PersonalityManager::load_dir(&config.bot.personalities_dir, &config.reddit.target_subreddits)?;
    for p in manager.iter() {
        let platforms: Vec<&str> = PlatformKind::ALL
            .into_iter()
            .filter(|k| p.supports(*k))
            .map(PlatformKind::as_str)
            .collect();
        println!("{:<20} [{}] {}", p.name, platforms.join(", "), p.tagline());
    }
    Ok(())
}
