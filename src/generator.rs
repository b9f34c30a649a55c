//! Personality-flavoured text generation on top of [`LlmProvider`].
//!
//! Each request is retried up to `max_retries` times with a fixed pause.
//! Output is trimmed and stripped of double quotes; an empty result counts
//! as a failed attempt.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::AppError;
use crate::llm::LlmProvider;
use crate::personality::Personality;
use crate::prompt::{self, PromptTask, SignatureKind, signature};

pub const REDDIT_TITLE_MAX: usize = 300;
pub const TWEET_MAX: usize = 280;

#[derive(Debug, Clone)]
pub struct ContentGenerator {
    provider: LlmProvider,
    prompts_dir: Option<PathBuf>,
    max_retries: u32,
    retry_delay: Duration,
}

impl ContentGenerator {
    pub fn new(provider: LlmProvider, config: &LlmConfig, prompts_dir: Option<PathBuf>) -> Self {
        Self {
            provider,
            prompts_dir,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }

    /// Render `task` for `p` with extra `vars`, then ask the model.
    async fn generate(
        &self,
        task: PromptTask,
        p: &Personality,
        vars: &[(&str, &str)],
    ) -> Result<String, AppError> {
        let user = prompt::task_prompt(self.prompts_dir.as_deref(), task, p)
            .with_vars(vars.iter().copied())
            .build();
        let system = prompt::system_prompt(task.platform());

        let mut last_err = String::new();
        for attempt in 1..=self.max_retries {
            match self.provider.complete(&user, Some(system)).await {
                Ok(resp) => {
                    let text = clean(&resp.text);
                    if !text.is_empty() {
                        debug!(?task, personality = %p.name, attempt, len = text.len(), usage = ?resp.usage, "generated");
                        return Ok(text);
                    }
                    last_err = "model returned empty text".into();
                }
                Err(e) => last_err = e.to_string(),
            }
            warn!(?task, attempt, max = self.max_retries, error = %last_err, "generation attempt failed");
            if attempt < self.max_retries && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(AppError::Llm(format!(
            "{task:?} failed after {} attempts: {last_err}",
            self.max_retries
        )))
    }

    /// A self post body, optionally headed with the author signature.
    pub async fn reddit_post(
        &self,
        p: &Personality,
        topic: &str,
        sign: bool,
    ) -> Result<String, AppError> {
        let body = self.generate(PromptTask::RedditPost, p, &[("topic", topic)]).await?;
        Ok(with_header(sign.then(|| signature(SignatureKind::RedditPost, p)), body))
    }

    /// A title for `content`. Never fails: falls back to the content's head.
    pub async fn reddit_title(&self, p: &Personality, content: &str) -> String {
        match self.generate(PromptTask::RedditTitle, p, &[("content", content)]).await {
            Ok(raw) => {
                let title = clean_title(&raw);
                if title.is_empty() { fallback_title(content) } else { title }
            }
            Err(e) => {
                warn!(error = %e, "title generation failed, using content prefix");
                fallback_title(content)
            }
        }
    }

    pub async fn reddit_comment(
        &self,
        p: &Personality,
        title: &str,
        body: &str,
        sign: bool,
    ) -> Result<String, AppError> {
        let text = self
            .generate(PromptTask::RedditComment, p, &[("title", title), ("content", body)])
            .await?;
        Ok(with_header(sign.then(|| signature(SignatureKind::RedditComment, p)), text))
    }

    /// A reply to `parent_text`; `header` picks the signature lead, if any.
    pub async fn reddit_reply(
        &self,
        p: &Personality,
        parent_text: &str,
        header: Option<SignatureKind>,
    ) -> Result<String, AppError> {
        let text = self.generate(PromptTask::RedditReply, p, &[("content", parent_text)]).await?;
        Ok(with_header(header.map(|k| signature(k, p)), text))
    }

    pub async fn tweet(&self, p: &Personality, context: Option<&str>) -> Result<String, AppError> {
        let text = self
            .generate(PromptTask::Tweet, p, &[("context", context.unwrap_or(""))])
            .await?;
        Ok(truncate_chars(&text, TWEET_MAX))
    }

    pub async fn tweet_reply(&self, p: &Personality, tweet_text: &str) -> Result<String, AppError> {
        let text = self.generate(PromptTask::TweetReply, p, &[("content", tweet_text)]).await?;
        Ok(truncate_chars(&text, TWEET_MAX))
    }
}

fn with_header(header: Option<String>, body: String) -> String {
    match header {
        Some(h) => h + &body,
        None => body,
    }
}

/// Trim and drop double quotes.
pub fn clean(text: &str) -> String {
    text.replace('"', "").trim().to_string()
}

/// Strip wrapping quotes and a leading `Title:`, cap at Reddit's limit.
pub fn clean_title(raw: &str) -> String {
    let cleaned = clean(raw);
    let first = cleaned.lines().next().unwrap_or("").trim();
    let first = match first.get(..6) {
        Some(head) if head.eq_ignore_ascii_case("title:") => first[6..].trim(),
        _ => first,
    };
    let title = first.trim_matches(|c| c == '\'' || c == '*').trim();
    truncate_chars(title, REDDIT_TITLE_MAX)
}

pub fn fallback_title(content: &str) -> String {
    let head: String = content.chars().take(100).collect();
    format!("{}...", head.trim())
}

/// Cut to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::providers::dummy::DummyProvider;
    use std::path::Path;

    fn generator() -> ContentGenerator {
        let cfg = Config::test_default(Path::new("/tmp"));
        ContentGenerator::new(LlmProvider::Dummy(DummyProvider), &cfg.llm, None)
    }

    fn personality() -> Personality {
        let json = r#"{
            "name": "Ada",
            "bio": ["DeFi risk analyst"],
            "knowledge": ["AMMs"],
            "style": { "post": ["measured"], "chat": ["curious"] },
            "platform_settings": { "reddit": {}, "twitter": {} }
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn cleaning_rules() {
        assert_eq!(clean("  \"Hello\" world \n"), "Hello world");
        assert_eq!(clean_title("Title: \"Why AMMs leak value\""), "Why AMMs leak value");
        assert_eq!(clean_title("'Oracles'\nextra line"), "Oracles");
        assert_eq!(clean_title(&"x".repeat(400)).len(), 300);
    }

    #[test]
    fn fallback_title_uses_prefix() {
        let content = "a".repeat(150);
        assert_eq!(fallback_title(&content), format!("{}...", "a".repeat(100)));
        assert_eq!(fallback_title("short"), "short...");
    }

    #[test]
    fn truncation_counts_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[tokio::test]
    async fn post_is_signed() {
        let g = generator();
        let p = personality();
        let body = g.reddit_post(&p, "DeFi", true).await.unwrap();
        assert!(body.starts_with("*Thoughts from **Ada** - DeFi risk analyst*\n\n[echo]"));
        let unsigned = g.reddit_post(&p, "DeFi", false).await.unwrap();
        assert!(unsigned.starts_with("[echo]"));
    }

    #[tokio::test]
    async fn tweet_fits_limit() {
        let g = generator();
        let t = g.tweet(&personality(), Some("ETH merge anniversary")).await.unwrap();
        assert!(t.chars().count() <= TWEET_MAX);
        let r = g.tweet_reply(&personality(), "gm").await.unwrap();
        assert!(r.chars().count() <= TWEET_MAX);
    }

    #[tokio::test]
    async fn title_is_bounded() {
        let g = generator();
        let t = g.reddit_title(&personality(), "some body").await;
        assert!(!t.is_empty());
        assert!(t.chars().count() <= REDDIT_TITLE_MAX);
    }

    #[tokio::test]
    async fn reply_header_is_optional() {
        let g = generator();
        let p = personality();
        let plain = g.reddit_reply(&p, "parent", None).await.unwrap();
        assert!(plain.starts_with("[echo]"));
        let signed = g.reddit_reply(&p, "parent", Some(SignatureKind::RedditResponse)).await.unwrap();
        assert!(signed.starts_with("*Response from **Ada**"));
    }
}
