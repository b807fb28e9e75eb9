//! Application-level configuration loading: match timings, sourcing limits, rank tiers and the
//! AI provider settings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_DUEL_CONFIG_PATH";
/// Inclusive bounds of the skill score domain.
pub const MIN_RANK: u8 = 1;
/// Upper bound of the skill score domain.
pub const MAX_RANK: u8 = 10;

/// Immutable runtime configuration shared across the application.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Countdown length of a single round.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub round_duration: Duration,
    /// How long matchmaking waits for the first batch of questions.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sourcing_timeout: Duration,
    /// Extra time granted to the slower question source after the first one landed.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub residual_sourcing_deadline: Duration,
    /// A match session with no connected player is dropped after this long.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub session_idle_timeout: Duration,
    /// Number of AI questions requested per match.
    pub question_count: usize,
    pub default_topic: String,
    /// Maximum number of questions reused from the bank per match.
    pub bank_batch_size: usize,
    /// Generation calls allowed per requested question before giving up.
    pub generation_attempts_per_question: u32,
    /// Named rank tiers mapped to their skill score.
    pub ranks: IndexMap<String, u8>,
    pub ai: AiConfig,
}

/// Settings of the OpenAI-compatible chat endpoint used to write and check questions.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub generation_model: String,
    pub verification_model: String,
    /// Body of knowledge questions are generated from and verified against.
    pub reference_corpus: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(30),
            sourcing_timeout: Duration::from_secs(60),
            residual_sourcing_deadline: Duration::from_secs(120),
            session_idle_timeout: Duration::from_secs(600),
            question_count: 3,
            default_topic: "any".into(),
            bank_batch_size: 10,
            generation_attempts_per_question: 3,
            ranks: default_ranks(),
            ai: AiConfig::default(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://router.huggingface.co/v1".into(),
            generation_model: "meta-llama/Llama-3.1-8B-Instruct".into(),
            verification_model: "deepseek-ai/DeepSeek-V3".into(),
            reference_corpus: "the Bible".into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    let config = config.sanitized();
                    info!(
                        path = %path.display(),
                        ranks = config.ranks.len(),
                        round_secs = config.round_duration.as_secs(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Skill score of a named tier, matched case-insensitively.
    pub fn rank_for_tier(&self, tier: &str) -> Option<u8> {
        self.ranks
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(tier.trim()))
            .map(|(_, score)| *score)
    }

    /// Drop values that would break the match flow, keeping the defaults instead.
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        self.ranks.retain(|name, score| {
            let valid = (MIN_RANK..=MAX_RANK).contains(score);
            if !valid {
                warn!(tier = %name, score = *score, "ignoring rank tier outside 1..=10");
            }
            valid
        });
        if self.ranks.is_empty() {
            self.ranks = defaults.ranks;
        }
        if self.round_duration.is_zero() {
            warn!("round_duration must be positive; using default");
            self.round_duration = defaults.round_duration;
        }
        if self.question_count == 0 {
            warn!("question_count must be positive; using default");
            self.question_count = defaults.question_count;
        }
        if self.generation_attempts_per_question == 0 {
            self.generation_attempts_per_question = defaults.generation_attempts_per_question;
        }
        self
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Tier names shipped with the binary.
fn default_ranks() -> IndexMap<String, u8> {
    [
        "Seeker",
        "Listener",
        "Disciple",
        "Scribe",
        "Deacon",
        "Elder",
        "Teacher",
        "Prophet",
        "Apostle",
        "Patriarch",
    ]
    .into_iter()
    .zip(MIN_RANK..=MAX_RANK)
    .map(|(name, score)| (name.to_owned(), score))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_whole_rank_domain() {
        let config = AppConfig::default();
        assert_eq!(config.ranks.len(), 10);
        assert_eq!(config.rank_for_tier("seeker"), Some(1));
        assert_eq!(config.rank_for_tier(" Patriarch "), Some(10));
        assert_eq!(config.rank_for_tier("Pope"), None);
        assert_eq!(config.round_duration, Duration::from_secs(30));
    }

    #[test]
    fn partial_file_keeps_defaults_and_reads_seconds() {
        let raw = r#"{ "round_duration": 60, "ranks": { "Rookie": 2, "Broken": 42 } }"#;
        let config = serde_json::from_str::<AppConfig>(raw).unwrap().sanitized();

        assert_eq!(config.round_duration, Duration::from_secs(60));
        assert_eq!(config.sourcing_timeout, Duration::from_secs(60));
        assert_eq!(config.rank_for_tier("rookie"), Some(2));
        assert_eq!(config.rank_for_tier("broken"), None);
        assert_eq!(config.question_count, 3);
    }
}
