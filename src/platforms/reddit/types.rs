//! Reddit JSON shapes. Only the fields the bot reads are modelled.

use serde::Deserialize;
use serde_json::Value;

/// `POST /api/v1/access_token`. Reddit answers bad credentials with
/// `200 {"error": "invalid_grant"}`, so every field is optional.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Me {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Thing<T> {
    #[allow(dead_code)]
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Listing<T> {
    pub data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingData<T> {
    pub children: Vec<Thing<T>>,
}

/// A submission as returned in subreddit listings.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub id: String,
    /// Fullname, e.g. `t3_abc123`.
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    pub subreddit: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub num_comments: u64,
    #[serde(default)]
    pub score: i64,
    /// Missing on some listings; treat as unknown rather than zero.
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
}

impl RedditPost {
    /// Self text, or the title for link posts.
    pub fn body(&self) -> &str {
        if self.selftext.trim().is_empty() { &self.title } else { &self.selftext }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Flair {
    pub id: String,
    pub text: String,
}

/// Envelope for `api_type=json` write endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope {
    pub json: ApiBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiBody {
    /// Each error is `[CODE, message, field]`.
    #[serde(default)]
    pub errors: Vec<Vec<Value>>,
    #[serde(default)]
    pub data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiData {
    /// Set by `/api/submit`.
    #[serde(default)]
    pub name: Option<String>,
    /// Set by `/api/comment`.
    #[serde(default)]
    pub things: Vec<Thing<CreatedThing>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedThing {
    pub name: String,
}

/// What a write endpoint created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    /// Fullname (`t3_…` or `t1_…`).
    pub fullname: String,
}

impl Created {
    /// Fullname without its type prefix.
    pub fn id(&self) -> &str {
        self.fullname.split_once('_').map(|(_, id)| id).unwrap_or(&self.fullname)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    Up,
    Down,
    Clear,
}

impl VoteDirection {
    pub fn as_param(self) -> &'static str {
        match self {
            VoteDirection::Up => "1",
            VoteDirection::Down => "-1",
            VoteDirection::Clear => "0",
        }
    }

    pub fn random<R: rand::Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..3) {
            0 => VoteDirection::Up,
            1 => VoteDirection::Down,
            _ => VoteDirection::Clear,
        }
    }
}
