//! Personality profiles and per-thread assignment.
//!
//! A profile is a JSON file describing who is speaking: bio lines, knowledge
//! areas, style hints and example messages. Profiles opt into a platform by
//! listing it under `platform_settings`.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
    sync::Mutex,
};

use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::platforms::PlatformKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Style {
    #[serde(default)]
    pub all: Vec<String>,
    #[serde(default)]
    pub chat: Vec<String>,
    #[serde(default)]
    pub post: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageExample {
    pub user: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default)]
    pub interaction_style: String,
    #[serde(default)]
    pub subreddits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub name: String,
    #[serde(default)]
    pub bio: Vec<String>,
    #[serde(default)]
    pub lore: Vec<String>,
    #[serde(default)]
    pub knowledge: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub style: Style,
    #[serde(default, rename = "messageExamples")]
    pub message_examples: Vec<Vec<MessageExample>>,
    #[serde(default, rename = "postExamples")]
    pub post_examples: Vec<String>,
    #[serde(default)]
    pub platform_settings: BTreeMap<String, PlatformSettings>,
}

impl Personality {
    /// First bio line, used in signatures and task prompts.
    pub fn tagline(&self) -> &str {
        self.bio.first().map(String::as_str).unwrap_or("")
    }

    /// Example messages this personality wrote itself.
    pub fn chat_examples(&self) -> Vec<&str> {
        self.message_examples
            .iter()
            .flatten()
            .filter(|m| m.user == self.name)
            .map(|m| m.content.text.as_str())
            .collect()
    }

    pub fn supports(&self, platform: PlatformKind) -> bool {
        self.platform_settings.contains_key(platform.as_str())
    }

    pub fn settings_for(&self, platform: PlatformKind) -> Option<&PlatformSettings> {
        self.platform_settings.get(platform.as_str())
    }
}

/// All loaded profiles plus the sticky thread → personality map.
#[derive(Debug)]
pub struct PersonalityManager {
    profiles: BTreeMap<String, Personality>,
    threads: Mutex<HashMap<String, String>>,
}

impl PersonalityManager {
    /// Load every `*.json` file in `dir`.
    ///
    /// A non-empty `reddit_subreddits` replaces each profile's Reddit
    /// subreddit list, so the config decides where the bot posts.
    pub fn load_dir(dir: &Path, reddit_subreddits: &[String]) -> Result<Self, AppError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            AppError::Personality(format!("cannot read personalities dir {}: {e}", dir.display()))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut profiles = Vec::with_capacity(paths.len());
        for path in paths {
            let text = fs::read_to_string(&path)?;
            let mut p: Personality = serde_json::from_str(&text).map_err(|e| {
                AppError::Personality(format!("invalid profile {}: {e}", path.display()))
            })?;
            if !reddit_subreddits.is_empty() {
                if let Some(s) = p.platform_settings.get_mut(PlatformKind::Reddit.as_str()) {
                    s.subreddits = reddit_subreddits.to_vec();
                }
            }
            tracing::debug!(name = %p.name, file = %path.display(), "loaded personality");
            profiles.push(p);
        }

        let manager = Self::from_profiles(profiles);
        if manager.profiles.is_empty() {
            return Err(AppError::Personality(format!(
                "no personality profiles found in {}",
                dir.display()
            )));
        }
        Ok(manager)
    }

    /// Later profiles with a duplicate name replace earlier ones.
    pub fn from_profiles(profiles: impl IntoIterator<Item = Personality>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.name.clone(), p)).collect(),
            threads: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Personality> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Personality> {
        self.profiles.values()
    }

    /// True when at least one profile can act on `platform`.
    pub fn supports(&self, platform: PlatformKind) -> bool {
        self.profiles.values().any(|p| p.supports(platform))
    }

    fn eligible(&self, platform: PlatformKind) -> Vec<&Personality> {
        self.profiles.values().filter(|p| p.supports(platform)).collect()
    }

    pub fn random_for<R: Rng + ?Sized>(
        &self,
        platform: PlatformKind,
        rng: &mut R,
    ) -> Option<&Personality> {
        self.eligible(platform).choose(rng).copied()
    }

    /// Someone other than `current` to keep a conversation going. Falls back
    /// to `current` when nobody else speaks on `platform`.
    pub fn contrasting<R: Rng + ?Sized>(
        &self,
        current: &str,
        platform: PlatformKind,
        rng: &mut R,
    ) -> Option<&Personality> {
        let others: Vec<_> = self
            .eligible(platform)
            .into_iter()
            .filter(|p| p.name != current)
            .collect();
        others.choose(rng).copied().or_else(|| self.get(current))
    }

    /// The personality that owns `thread_id`, assigning one on first use.
    pub fn for_thread<R: Rng + ?Sized>(
        &self,
        thread_id: &str,
        platform: PlatformKind,
        rng: &mut R,
    ) -> Option<&Personality> {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = threads.get(thread_id).and_then(|n| self.get(n)) {
            if existing.supports(platform) {
                return Some(existing);
            }
        }
        let chosen = self.random_for(platform, rng)?;
        threads.insert(thread_id.to_string(), chosen.name.clone());
        Some(chosen)
    }

    /// Pin a thread to a named personality, e.g. the author of a new post.
    pub fn assign_thread(&self, thread_id: &str, name: &str) {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        threads.insert(thread_id.to_string(), name.to_string());
    }

    pub fn should_interact<R: Rng + ?Sized>(probability: f64, rng: &mut R) -> bool {
        rng.gen_bool(probability.clamp(0.0, 1.0))
    }
}
