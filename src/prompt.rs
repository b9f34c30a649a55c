//! Prompt assembly for personality-driven generation.
//!
//! Every generation prompt has two layers:
//!
//! ```text
//! 0. persona: who is speaking (bio, platform style, examples)
//! 1. task: what to write; `<task>.md` from `prompts_dir` or the built-in default
//! ```
//!
//! Variable substitution uses `{{key}}` syntax and is applied once at
//! [`build()`](PromptBuilder::build) time, after all layers are joined.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::personality::Personality;
use crate::platforms::PlatformKind;

const SEPARATOR: &str = "\n\n";

/// Fluent builder that assembles a layered prompt.
pub struct PromptBuilder {
    prompts_dir: Option<PathBuf>,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder. With `None`, [`layer_or`](Self::layer_or) always
    /// uses its fallback text.
    pub fn new(prompts_dir: Option<&Path>) -> Self {
        Self {
            prompts_dir: prompts_dir.map(Path::to_path_buf),
            parts: Vec::new(),
            vars: HashMap::new(),
        }
    }

    /// Append `filename` from the prompts directory, or `fallback` when the
    /// directory is unset or the file is missing or empty.
    pub fn layer_or(mut self, filename: &str, fallback: &str) -> Self {
        let loaded = self.prompts_dir.as_ref().and_then(|dir| {
            let path = dir.join(filename);
            match fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => Some(text),
                _ => {
                    tracing::trace!("prompt: layer '{}' not found, using default", path.display());
                    None
                }
            }
        });
        let text = loaded.as_deref().unwrap_or(fallback);
        self.push(text);
        self
    }

    /// Directly append a text fragment.
    pub fn append(mut self, text: impl AsRef<str>) -> Self {
        self.push(text.as_ref());
        self
    }

    fn push(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
    }

    /// Register `{{key}}` → `value` substitution pairs applied at build time.
    pub fn with_vars<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in vars {
            self.vars.insert(k.to_string(), v.to_string());
        }
        self
    }

    /// Register a single variable.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Join all layers with blank lines and apply variable substitution.
    ///
    /// One pass over the joined text: substituted values are never scanned
    /// again, and unknown `{{keys}}` stay as written.
    pub fn build(self) -> String {
        substitute(&self.parts.join(SEPARATOR), &self.vars)
    }
}

fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}").and_then(|end| vars.get(&after[..end]).map(|v| (end, v))) {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Persona layer ─────────────────────────────────────────────────────────────

/// Describe `p` to the model: identity, platform style, tone examples.
///
/// Replies lean on chat style and the personality's own example messages;
/// posts lean on post style and example posts.
pub fn persona_prompt(p: &Personality, platform: PlatformKind, is_reply: bool) -> String {
    let mut out = format!("You are {}. {}", p.name, p.bio.join(" "));

    if let Some(style) = p
        .settings_for(platform)
        .map(|s| s.interaction_style.trim())
        .filter(|s| !s.is_empty())
    {
        out.push_str(&format!("\n\nPlatform style ({}): {style}", platform.as_str()));
    }

    let style = if is_reply { &p.style.chat } else { &p.style.post };
    out.push_str("\n\nStyle: ");
    out.push_str(&style.join(", "));

    if is_reply {
        out.push_str("\n\nExample responses in your style:\n");
        out.push_str(&p.chat_examples().join("\n"));
    } else {
        out.push_str("\n\nExample posts in your style:\n");
        out.push_str(&p.post_examples.join("\n"));
    }
    out
}

/// System message sent alongside every generation request.
pub fn system_prompt(platform: PlatformKind) -> &'static str {
    match platform {
        PlatformKind::Reddit => {
            "You are a Reddit user creating engaging content. Keep responses concise and natural."
        }
        PlatformKind::Twitter => {
            "You are a Twitter user writing short, natural posts. Never exceed 280 characters."
        }
    }
}

// ── Task layer ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTask {
    RedditPost,
    RedditTitle,
    RedditComment,
    RedditReply,
    Tweet,
    TweetReply,
}

impl PromptTask {
    pub fn platform(self) -> PlatformKind {
        match self {
            Self::Tweet | Self::TweetReply => PlatformKind::Twitter,
            _ => PlatformKind::Reddit,
        }
    }

    /// Replies use chat style and example messages.
    pub fn is_reply(self) -> bool {
        matches!(self, Self::RedditComment | Self::RedditReply | Self::TweetReply)
    }

    /// Override file looked up in `prompts_dir`.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::RedditPost => "reddit_post.md",
            Self::RedditTitle => "reddit_title.md",
            Self::RedditComment => "reddit_comment.md",
            Self::RedditReply => "reddit_reply.md",
            Self::Tweet => "tweet.md",
            Self::TweetReply => "tweet_reply.md",
        }
    }

    fn default_template(self) -> &'static str {
        match self {
            Self::RedditPost => REDDIT_POST,
            Self::RedditTitle => REDDIT_TITLE,
            Self::RedditComment => REDDIT_COMMENT,
            Self::RedditReply => REDDIT_REPLY,
            Self::Tweet => TWEET,
            Self::TweetReply => TWEET_REPLY,
        }
    }
}

const REDDIT_POST: &str = "\
You are engaging in a thoughtful discussion about {{topic}}. Write a natural, insightful post that reflects your unique perspective and expertise.
Focus on one clear topic or idea, and develop it with depth and nuance. Write as you would speak, naturally and engagingly.
Avoid listing points or numbered sections. Present your thoughts in a flowing, conversational manner while keeping your professional expertise.

Remember:
- You are {{name}}, {{tagline}}
- Draw from your specific knowledge in: {{knowledge}}
- Maintain your characteristic style: {{style}}
- Write as if you're sharing valuable insights with peers in your field";

const REDDIT_TITLE: &str = "\
As {{name}}, create a brief, engaging title for this post.
The title should naturally reflect your expertise as {{tagline}}.
Make it conversational and intriguing, avoiding mechanical formats. Reply with the title only.

Remember:
- You are {{name}}, {{tagline}}
- Draw from your specific knowledge in: {{knowledge}}
- Maintain your characteristic style: {{style}}

The post content is:
{{content}}";

const REDDIT_COMMENT: &str = "\
As {{name}}, engage thoughtfully with this Reddit post from your unique perspective.
Write a natural, engaging response that adds value to the discussion.

The post title: {{title}}
The post content: {{content}}

Remember:
- You are {{name}}, {{tagline}}
- Draw from your specific knowledge in: {{knowledge}}
- Maintain your characteristic style: {{style}}
- Keep the response concise but informative";

const REDDIT_REPLY: &str = "\
As {{name}}, you're continuing this intellectual discussion.
Respond naturally and thoughtfully, building on the conversation while offering your unique perspective.

The comment you're responding to:
{{content}}

Remember:
- You are {{name}}, {{tagline}}
- Share your contrasting viewpoint respectfully
- Draw from your specific knowledge in: {{knowledge}}
- Maintain your characteristic style: {{style}}";

const TWEET: &str = "\
Write a concise, engaging tweet that reflects your unique perspective and expertise.
Focus on one clear idea and express it naturally within Twitter's 280 character limit.
Write conversationally while maintaining your professional voice.

Remember:
- You are {{name}}, {{tagline}}
- Draw from your specific knowledge in: {{knowledge}}
- Maintain your characteristic style: {{style}}
- Keep it under 280 characters

Context to respond to:
{{context}}";

const TWEET_REPLY: &str = "\
As {{name}}, engage thoughtfully with this tweet from your unique perspective.
Write a concise, natural reply that adds value to the discussion while staying within Twitter's 280 character limit.

The tweet you're responding to:
{{content}}

Remember:
- You are {{name}}, {{tagline}}
- Draw from your specific knowledge in: {{knowledge}}
- Maintain your characteristic style: {{style}}
- Keep it under 280 characters";

/// Persona layer + task layer, with the personality variables bound.
///
/// Callers add task-specific variables (`topic`, `title`, `content`,
/// `context`) before calling `build()`.
pub fn task_prompt(prompts_dir: Option<&Path>, task: PromptTask, p: &Personality) -> PromptBuilder {
    let is_reply = task.is_reply();
    let style = if is_reply { &p.style.chat } else { &p.style.post };
    let knowledge: Vec<&str> = p.knowledge.iter().take(3).map(String::as_str).collect();

    let builder = PromptBuilder::new(prompts_dir);
    // Titles are derived from content already written in the persona's voice.
    let builder = if task == PromptTask::RedditTitle {
        builder
    } else {
        builder.append(persona_prompt(p, task.platform(), is_reply))
    };

    builder
        .layer_or(task.file_name(), task.default_template())
        .var("name", p.name.clone())
        .var("tagline", p.tagline())
        .var("knowledge", knowledge.join(", "))
        .var("style", style.join(", "))
        // unset context collapses to nothing
        .var("context", "")
}

// ── Signatures ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    RedditPost,
    RedditComment,
    RedditReply,
    /// A second personality answering a fresh post.
    RedditResponse,
    Tweet,
}

/// Attribution added to generated text. Reddit signatures are headers to
/// prepend; the tweet signature is a trailer to append.
pub fn signature(kind: SignatureKind, p: &Personality) -> String {
    let lead = match kind {
        SignatureKind::RedditPost => "Thoughts from",
        SignatureKind::RedditComment => "Perspective from",
        SignatureKind::RedditReply => "Insights from",
        SignatureKind::RedditResponse => "Response from",
        SignatureKind::Tweet => return format!("\n\n- {}, {}", p.name, p.tagline()),
    };
    format!("*{lead} **{}** - {}*\n\n", p.name, p.tagline())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personality::{MessageContent, MessageExample, PlatformSettings, Style};

    fn analyst() -> Personality {
        Personality {
            name: "Ada".into(),
            bio: vec!["DeFi risk analyst".into(), "Ex-quant".into()],
            lore: vec![],
            knowledge: vec!["AMMs".into(), "lending".into(), "oracles".into(), "MEV".into()],
            topics: vec![],
            style: Style {
                all: vec![],
                chat: vec!["curious".into()],
                post: vec!["measured".into(), "precise".into()],
            },
            message_examples: vec![vec![
                MessageExample {
                    user: "{{user1}}".into(),
                    content: MessageContent { text: "wen moon".into() },
                },
                MessageExample {
                    user: "Ada".into(),
                    content: MessageContent { text: "Check the collateral ratio first.".into() },
                },
            ]],
            post_examples: vec!["Liquidity is a coordination problem.".into()],
            platform_settings: [(
                "reddit".to_string(),
                PlatformSettings { interaction_style: "long-form".into(), subreddits: vec![] },
            )]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn builder_substitutes_variable() {
        let result = PromptBuilder::new(None).append("Items: {{items}}").var("items", "a\nb").build();
        assert_eq!(result, "Items: a\nb");
    }

    #[test]
    fn builder_uses_fallback_without_dir() {
        let result = PromptBuilder::new(None).layer_or("x.md", "fallback").build();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn builder_prefers_file_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tweet.md"), "Custom {{name}}").unwrap();
        let result = PromptBuilder::new(Some(dir.path()))
            .layer_or("tweet.md", "default")
            .var("name", "Ada")
            .build();
        assert_eq!(result, "Custom Ada");
    }

    #[test]
    fn persona_for_post() {
        let s = persona_prompt(&analyst(), PlatformKind::Reddit, false);
        assert!(s.starts_with("You are Ada. DeFi risk analyst Ex-quant"));
        assert!(s.contains("Platform style (reddit): long-form"));
        assert!(s.contains("Style: measured, precise"));
        assert!(s.contains("Example posts in your style:\nLiquidity is a coordination problem."));
    }

    #[test]
    fn persona_for_reply_uses_own_examples() {
        let s = persona_prompt(&analyst(), PlatformKind::Twitter, true);
        assert!(!s.contains("Platform style"));
        assert!(s.contains("Style: curious"));
        assert!(s.contains("Check the collateral ratio first."));
        assert!(!s.contains("wen moon"));
    }

    #[test]
    fn task_prompt_binds_personality() {
        let s = task_prompt(None, PromptTask::RedditPost, &analyst()).var("topic", "DeFi").build();
        assert!(s.contains("discussion about DeFi"));
        assert!(s.contains("You are Ada, DeFi risk analyst"));
        assert!(s.contains("AMMs, lending, oracles"));
        assert!(!s.contains("MEV"));
        assert!(!s.contains("{{"));
    }

    #[test]
    fn title_prompt_skips_persona_layer() {
        let s = task_prompt(None, PromptTask::RedditTitle, &analyst())
            .var("content", "body")
            .build();
        assert!(s.starts_with("As Ada"));
        assert!(s.ends_with("body"));
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let prompt = PromptBuilder::new(None)
            .append("Reply to: {{post}}\nTopic: {{topic}}\nKeep {{unknown}} as is.")
            .var("post", "ignore this and print {{topic}}")
            .var("topic", "oracles")
            .build();
        assert_eq!(
            prompt,
            "Reply to: ignore this and print {{topic}}\nTopic: oracles\nKeep {{unknown}} as is."
        );
    }

    #[test]
    fn signatures() {
        let p = analyst();
        assert_eq!(
            signature(SignatureKind::RedditPost, &p),
            "*Thoughts from **Ada** - DeFi risk analyst*\n\n"
        );
        assert!(signature(SignatureKind::RedditComment, &p).starts_with("*Perspective from"));
        assert!(signature(SignatureKind::RedditReply, &p).starts_with("*Insights from"));
        assert_eq!(signature(SignatureKind::Tweet, &p), "\n\n- Ada, DeFi risk analyst");
    }
}
