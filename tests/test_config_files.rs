//! The shipped config and personality files load and resolve as expected.

use std::path::{Path, PathBuf};

use persona_bot::config::{Overrides, load_from};
use persona_bot::personality::PersonalityManager;
use persona_bot::platforms::PlatformKind;

fn repo_path(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn overrides(work_dir: &str) -> Overrides {
    Overrides { work_dir: Some(work_dir.to_string()), ..Overrides::default() }
}

#[test]
fn default_toml_loads() {
    let cfg = load_from(&repo_path("config/default.toml"), &overrides("/srv/persona")).unwrap();

    assert_eq!(cfg.bot.name, "persona-bot");
    assert!(!cfg.bot.dry_run);
    assert_eq!(cfg.database.path, PathBuf::from("/srv/persona/bot.db"));
    assert_eq!(cfg.bot.status_file, PathBuf::from("/srv/persona/bot_status.json"));
    assert_eq!(cfg.llm.provider, "openai");
    assert_eq!(cfg.llm.openai.max_tokens, Some(300));
    assert_eq!(cfg.llm.deepseek.model, "deepseek-chat");

    assert!(cfg.reddit.enabled);
    assert_eq!(cfg.reddit.target_subreddits, vec!["FlavumHiveAI".to_string()]);
    assert_eq!(cfg.reddit.rate_limits.posts_per_hour, 2);
    assert_eq!(cfg.reddit.rate_limits.min_delay_between_actions, 20);
    assert_eq!(cfg.reddit.interaction.max_conversation_depth, 4);
    assert!(cfg.reddit.personality.active.is_none());

    assert!(!cfg.twitter.enabled);
    // tweets_/replies_ keys map onto the shared limit names
    assert_eq!(cfg.twitter.rate_limits.posts_per_day, 24);
    assert_eq!(cfg.twitter.rate_limits.comments_per_hour, 5);
    assert_eq!(cfg.twitter.rate_limits.min_delay_between_actions, 60);
    assert!((cfg.twitter.personality.reply_probability - 0.3).abs() < f64::EPSILON);
}

#[test]
fn overrides_win_over_file() {
    let ov = Overrides {
        work_dir: Some("/tmp/pb".into()),
        log_level: Some("debug".into()),
        db_path: Some("/var/lib/pb/actions.db".into()),
        dry_run: Some(true),
    };
    let cfg = load_from(&repo_path("config/default.toml"), &ov).unwrap();
    assert_eq!(cfg.bot.log_level, "debug");
    assert!(cfg.bot.dry_run);
    assert_eq!(cfg.database.path, PathBuf::from("/var/lib/pb/actions.db"));
}

#[test]
fn json_config_by_extension() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bot.json");
    std::fs::write(
        &path,
        r#"{"bot":{"dry_run":true},"llm":{"default":"DeepSeek"},
            "reddit":{"target_subreddits":["r/rust"," "]}}"#,
    )
    .unwrap();
    let cfg = load_from(&path, &overrides(dir.path().to_str().unwrap())).unwrap();
    assert!(cfg.bot.dry_run);
    assert_eq!(cfg.llm.provider, "deepseek");
    assert_eq!(cfg.reddit.target_subreddits, vec!["rust".to_string()]);
}

#[test]
fn broken_file_is_a_config_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[bot\nname = ").unwrap();
    let err = load_from(&path, &Overrides::default()).unwrap_err();
    assert!(err.to_string().contains("parse error"), "{err}");
}

#[test]
fn shipped_personalities_load() {
    let manager = PersonalityManager::load_dir(&repo_path("personalities"), &[]).unwrap();
    assert_eq!(manager.names(), vec!["crypto_researcher", "defi_skeptic"]);
    for p in manager.iter() {
        assert!(p.supports(PlatformKind::Reddit), "{} lacks reddit", p.name);
        assert!(p.supports(PlatformKind::Twitter), "{} lacks twitter", p.name);
        assert!(!p.tagline().is_empty());
    }
}

#[test]
fn configured_subreddits_replace_profile_lists() {
    let subs = vec!["defi".to_string()];
    let manager = PersonalityManager::load_dir(&repo_path("personalities"), &subs).unwrap();
    let p = manager.get("defi_skeptic").unwrap();
    assert_eq!(p.settings_for(PlatformKind::Reddit).unwrap().subreddits, subs);
}
