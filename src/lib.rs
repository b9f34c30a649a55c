//! persona-bot: personality-driven posting and conversation bots for Reddit
//! and Twitter/X, backed by an LLM and a local SQLite activity log.

pub mod config;
pub mod credentials;
pub mod error;
pub mod generator;
pub mod llm;
pub mod logger;
pub mod performance;
pub mod personality;
pub mod platforms;
pub mod prompt;
pub mod ratelimit;
pub mod runtime;
pub mod status;
pub mod store;
