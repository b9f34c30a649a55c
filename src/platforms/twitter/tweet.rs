use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::generator::truncate_chars;
use crate::personality::Personality;
use crate::platforms::PlatformError;
use crate::prompt::{SignatureKind, signature};

pub const MAX_TWEET_CHARS: usize = 280;
pub const MAX_MEDIA_ITEMS: usize = 4;
const ELLIPSIS: &str = "...";
/// A signature never takes more than half the tweet.
const MAX_SIGNATURE_CHARS: usize = MAX_TWEET_CHARS / 2;

/// A tweet about to be posted (or one read back from a timeline).
#[derive(Debug, Clone, Serialize)]
pub struct Tweet {
    content: String,
    pub media_urls: Vec<String>,
    pub tweet_id: Option<String>,
    pub username: Option<String>,
    pub personality: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Tweet {
    /// Over-long content is cut to fit with a trailing `...`.
    pub fn new(content: impl Into<String>) -> Result<Self, PlatformError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(PlatformError::Api("tweet content cannot be empty".into()));
        }
        Ok(Self {
            content: fit(&content, MAX_TWEET_CHARS),
            media_urls: Vec::new(),
            tweet_id: None,
            username: None,
            personality: None,
            timestamp: Utc::now(),
        })
    }

    pub fn with_media(mut self, urls: Vec<String>) -> Result<Self, PlatformError> {
        if urls.len() > MAX_MEDIA_ITEMS {
            return Err(PlatformError::Api(format!(
                "cannot attach more than {MAX_MEDIA_ITEMS} media items"
            )));
        }
        self.media_urls = urls;
        Ok(self)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Append `- Name, tagline`, shortening the body so the whole still fits.
    /// A long tagline is cut first.
    pub fn add_signature(&mut self, p: &Personality) {
        let sig = fit(&signature(SignatureKind::Tweet, p), MAX_SIGNATURE_CHARS);
        let room = MAX_TWEET_CHARS.saturating_sub(sig.chars().count());
        self.content = format!("{}{sig}", fit(&self.content, room));
        self.personality = Some(p.name.clone());
    }
}

fn fit(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    format!("{}{ELLIPSIS}", truncate_chars(text, keep))
}

/// The numeric id at the end of a `/status/<id>` (or `/posts/<id>`) link.
pub fn tweet_id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let (_, tail) = path.rsplit_once("/status/").or_else(|| path.rsplit_once("/posts/"))?;
    let id: String = tail.chars().take_while(char::is_ascii_digit).collect();
    (!id.is_empty()).then_some(id)
}
