//! Platform and LLM secrets, read from the environment only.
//!
//! Every constructor takes a lookup closure so tests can feed a map instead
//! of touching process env. `Debug` never prints secret values.

use std::fmt;

use crate::error::AppError;

pub const REDDIT_VARS: [&str; 5] = [
    "REDDIT_CLIENT_ID",
    "REDDIT_CLIENT_SECRET",
    "REDDIT_USER_AGENT",
    "REDDIT_USERNAME",
    "REDDIT_PASSWORD",
];

pub const TWITTER_VARS: [&str; 3] = ["TWITTER_USERNAME", "TWITTER_PASSWORD", "TWITTER_EMAIL"];

pub const TWITTER_2FA_VAR: &str = "TWITTER_2FA_SECRET";

const LLM_KEY_VARS: [&str; 3] = ["LLM_API_KEY", "OPENAI_API_KEY", "DEEPSEEK_API_KEY"];

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Collect every required variable, reporting all missing names at once.
fn require_all<F>(names: &[&str], lookup: &F) -> Result<Vec<String>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut values = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        // Values are kept verbatim; a password may start or end with a space.
        match lookup(name).filter(|v| !v.trim().is_empty()) {
            Some(v) => values.push(v),
            None => missing.push(*name),
        }
    }
    if missing.is_empty() {
        Ok(values)
    } else {
        Err(AppError::Credentials(format!(
            "missing environment variables: {}",
            missing.join(", ")
        )))
    }
}

// ── Reddit ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub username: String,
    pub password: String,
}

impl RedditCredentials {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut v = require_all(&REDDIT_VARS, &lookup)?.into_iter();
        // Order matches REDDIT_VARS.
        let mut next = || v.next().unwrap_or_default();
        Ok(Self {
            client_id: next(),
            client_secret: next(),
            user_agent: next(),
            username: next(),
            password: next(),
        })
    }
}

impl fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ── Twitter ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TwitterCredentials {
    pub username: String,
    pub password: String,
    pub email: String,
    /// Base32 TOTP secret, when the account has 2FA enabled.
    pub totp_secret: Option<String>,
}

impl TwitterCredentials {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut v = require_all(&TWITTER_VARS, &lookup)?.into_iter();
        let mut next = || v.next().unwrap_or_default();
        Ok(Self {
            username: next(),
            password: next(),
            email: next(),
            totp_secret: lookup(TWITTER_2FA_VAR)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

impl fmt::Debug for TwitterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── LLM ───────────────────────────────────────────────────────────────────────

/// An API key for the configured LLM provider.
#[derive(Clone)]
pub struct LlmApiKey(String);

impl LlmApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LlmApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LlmApiKey(<redacted>)")
    }
}

/// Resolve the LLM key for `provider`.
///
/// `DEEPSEEK_API_KEY` is tried first for the `deepseek` provider; otherwise the
/// first set of `LLM_API_KEY`, `OPENAI_API_KEY`, `DEEPSEEK_API_KEY` wins.
/// The dummy provider needs no key and gets `None`.
pub fn llm_api_key<F>(provider: &str, lookup: F) -> Option<LlmApiKey>
where
    F: Fn(&str) -> Option<String>,
{
    if provider == "dummy" {
        return None;
    }
    let preferred = (provider == "deepseek").then_some("DEEPSEEK_API_KEY");
    preferred
        .into_iter()
        .chain(LLM_KEY_VARS)
        .find_map(|name| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        .map(LlmApiKey)
}

/// Which of `names` are set. Safe to log: values are never returned.
pub fn presence<F>(names: &[&str], lookup: F) -> Vec<(String, bool)>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .map(|n| (n.to_string(), lookup(n).is_some_and(|v| !v.trim().is_empty())))
        .collect()
}

/// Presence lookup against the real process environment.
pub fn env_presence(names: &[&str]) -> Vec<(String, bool)> {
    presence(names, env_lookup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reddit_all_present() {
        let creds = RedditCredentials::from_lookup(lookup_from(&[
            ("REDDIT_CLIENT_ID", "cid"),
            ("REDDIT_CLIENT_SECRET", "secret"),
            ("REDDIT_USER_AGENT", "persona-bot/0.3"),
            ("REDDIT_USERNAME", "bot_user"),
            ("REDDIT_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        assert_eq!(creds.client_id, "cid");
        assert_eq!(creds.username, "bot_user");
        assert_eq!(creds.password, "hunter2");
    }

    #[test]
    fn reddit_reports_every_missing_name() {
        let err = RedditCredentials::from_lookup(lookup_from(&[
            ("REDDIT_CLIENT_ID", "cid"),
            ("REDDIT_USERNAME", "  "),
        ]))
        .unwrap_err()
        .to_string();
        for name in ["REDDIT_CLIENT_SECRET", "REDDIT_USER_AGENT", "REDDIT_USERNAME", "REDDIT_PASSWORD"] {
            assert!(err.contains(name), "{name} missing from: {err}");
        }
        assert!(!err.contains("REDDIT_CLIENT_ID"));
    }

    #[test]
    fn password_whitespace_is_kept() {
        let creds = TwitterCredentials::from_lookup(lookup_from(&[
            ("TWITTER_USERNAME", "flavum"),
            ("TWITTER_PASSWORD", " pass phrase "),
            ("TWITTER_EMAIL", "bot@example.com"),
        ]))
        .unwrap();
        assert_eq!(creds.password, " pass phrase ");
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = TwitterCredentials::from_lookup(lookup_from(&[
            ("TWITTER_USERNAME", "flavum"),
            ("TWITTER_PASSWORD", "hunter2"),
            ("TWITTER_EMAIL", "bot@example.com"),
            ("TWITTER_2FA_SECRET", "JBSWY3DPEHPK3PXP"),
        ]))
        .unwrap();
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("flavum"));
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("JBSWY3DPEHPK3PXP"));
        assert!(creds.totp_secret.is_some());
    }

    #[test]
    fn twitter_2fa_is_optional() {
        let creds = TwitterCredentials::from_lookup(lookup_from(&[
            ("TWITTER_USERNAME", "flavum"),
            ("TWITTER_PASSWORD", "pw"),
            ("TWITTER_EMAIL", "bot@example.com"),
        ]))
        .unwrap();
        assert!(creds.totp_secret.is_none());
    }

    #[test]
    fn llm_key_preference() {
        let both = lookup_from(&[("OPENAI_API_KEY", "sk-open"), ("DEEPSEEK_API_KEY", "sk-deep")]);
        assert_eq!(llm_api_key("openai", &both).unwrap().expose(), "sk-open");
        assert_eq!(llm_api_key("deepseek", &both).unwrap().expose(), "sk-deep");
        assert!(llm_api_key("dummy", &both).is_none());

        let generic = lookup_from(&[("LLM_API_KEY", "sk-any"), ("OPENAI_API_KEY", "sk-open")]);
        assert_eq!(llm_api_key("openai", &generic).unwrap().expose(), "sk-any");
        assert!(llm_api_key("openai", lookup_from(&[])).is_none());
        assert_eq!(format!("{:?}", llm_api_key("openai", &generic).unwrap()), "LlmApiKey(<redacted>)");
    }

    #[test]
    fn presence_reports_booleans() {
        let p = presence(&REDDIT_VARS[..2], lookup_from(&[("REDDIT_CLIENT_ID", "x")]));
        assert_eq!(
            p,
            vec![("REDDIT_CLIENT_ID".to_string(), true), ("REDDIT_CLIENT_SECRET".to_string(), false)]
        );
    }
}
