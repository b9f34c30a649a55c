//! Reddit: OAuth REST client and the scan/post/converse loop.

mod bot;
mod client;
mod types;

pub use bot::{CycleReport, RedditBot};
pub use client::{RedditClient, choose_flair, with_rate_limit_retry};
pub use types::{Created, Flair, RedditPost, VoteDirection};
