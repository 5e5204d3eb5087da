//! Application-level configuration loading, including round timing, glitch
//! filter thresholds, collaborator settings, and the prompt pools.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::session::{Language, Prompt};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "DRIFT_BACK_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Length of one conversation round.
    pub round_duration: Duration,
    /// How long the reveal screen stays up before the automatic reset.
    pub reveal_hold: Duration,
    /// Pause on the reset screen before returning to idle.
    pub reset_settle: Duration,
    /// Language active when the server starts.
    pub default_language: Language,
    /// English prompt pool file.
    pub prompts_file: PathBuf,
    /// Japanese prompt pool file.
    pub prompts_file_ja: PathBuf,
    /// Transcript screening thresholds.
    pub filters: FilterConfig,
    /// External collaborator settings.
    pub collaborators: CollaboratorConfig,
}

/// Thresholds for the transcript screening filters.
///
/// Tuned empirically against live microphones per language; change them in
/// the config file, not here.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Minimum fragment length in characters (character-dense languages).
    pub min_fragment_chars: usize,
    /// Minimum fragment length in words (other languages).
    pub min_fragment_words: usize,
    /// Dominant-character check only applies at or above this length.
    pub glitch_min_chars: usize,
    /// Dominant-word check only applies at or above this word count.
    pub glitch_min_words: usize,
    /// A single character covering more than this fraction is a glitch.
    pub char_repeat_ratio: f64,
    /// A single word covering more than this fraction is a glitch.
    pub word_repeat_ratio: f64,
    /// A short repeating substring covering more than this fraction is a glitch.
    pub substring_repeat_ratio: f64,
}

/// Settings for the two external collaborators.
#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    /// Endpoint of the local transcription sidecar.
    pub transcriber_url: String,
    /// Model used for paraphrasing.
    pub paraphrase_model: String,
    /// Completion budget for one altered line.
    pub paraphrase_max_tokens: u32,
    /// How aggressively the conversation drifts (0.0 faithful, 1.0 wild).
    pub drift_strength: f32,
    /// Upper bound on each collaborator call; a timeout counts as a fault.
    pub call_timeout: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_fragment_chars: 4,
            min_fragment_words: 3,
            glitch_min_chars: 10,
            glitch_min_words: 5,
            char_repeat_ratio: 0.4,
            word_repeat_ratio: 0.6,
            substring_repeat_ratio: 0.6,
        }
    }
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            transcriber_url: "http://127.0.0.1:9090/transcribe".into(),
            paraphrase_model: "claude-haiku-4-5-20251001".into(),
            paraphrase_max_tokens: 256,
            drift_strength: 0.83,
            call_timeout: Duration::from_secs(20),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(180),
            reveal_hold: Duration::from_secs(5),
            reset_settle: Duration::from_secs(5),
            default_language: Language::Ja,
            prompts_file: PathBuf::from("static/prompts.json"),
            prompts_file_ja: PathBuf::from("static/prompts_ja.json"),
            filters: FilterConfig::default(),
            collaborators: CollaboratorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults
    /// for anything missing or unreadable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
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

    /// Load the prompt pool for a language from its configured file,
    /// falling back to the built-in pool when the file is missing, broken,
    /// or empty.
    pub fn prompt_pool(&self, language: Language) -> Vec<Prompt> {
        let path = match language {
            Language::Ja => &self.prompts_file_ja,
            Language::En => &self.prompts_file,
        };
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<PromptFile>(&contents) {
                Ok(file) if !file.prompts.is_empty() => {
                    info!(
                        path = %path.display(),
                        count = file.prompts.len(),
                        "loaded prompt pool"
                    );
                    file.prompts
                }
                Ok(_) => {
                    warn!(path = %path.display(), "prompt file is empty; using built-in pool");
                    builtin_prompts(language)
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse prompt file; using built-in pool"
                    );
                    builtin_prompts(language)
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "prompt file not found; using built-in pool");
                builtin_prompts(language)
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read prompt file; using built-in pool"
                );
                builtin_prompts(language)
            }
        }
    }
}

/// JSON representation of the configuration file; every field optional.
#[derive(Debug, Deserialize)]
struct RawConfig {
    round_duration_secs: Option<u64>,
    reveal_hold_secs: Option<u64>,
    reset_settle_secs: Option<u64>,
    default_language: Option<Language>,
    prompts_file: Option<PathBuf>,
    prompts_file_ja: Option<PathBuf>,
    filters: Option<RawFilterConfig>,
    collaborators: Option<RawCollaboratorConfig>,
}

#[derive(Debug, Deserialize)]
struct RawFilterConfig {
    min_fragment_chars: Option<usize>,
    min_fragment_words: Option<usize>,
    glitch_min_chars: Option<usize>,
    glitch_min_words: Option<usize>,
    char_repeat_ratio: Option<f64>,
    word_repeat_ratio: Option<f64>,
    substring_repeat_ratio: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCollaboratorConfig {
    transcriber_url: Option<String>,
    paraphrase_model: Option<String>,
    paraphrase_max_tokens: Option<u32>,
    drift_strength: Option<f32>,
    call_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PromptFile {
    prompts: Vec<Prompt>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            round_duration: raw
                .round_duration_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.round_duration),
            reveal_hold: raw
                .reveal_hold_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reveal_hold),
            reset_settle: raw
                .reset_settle_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reset_settle),
            default_language: raw.default_language.unwrap_or(defaults.default_language),
            prompts_file: raw.prompts_file.unwrap_or(defaults.prompts_file),
            prompts_file_ja: raw.prompts_file_ja.unwrap_or(defaults.prompts_file_ja),
            filters: raw
                .filters
                .map(Into::into)
                .unwrap_or(defaults.filters),
            collaborators: raw
                .collaborators
                .map(Into::into)
                .unwrap_or(defaults.collaborators),
        }
    }
}

impl From<RawFilterConfig> for FilterConfig {
    fn from(raw: RawFilterConfig) -> Self {
        let defaults = Self::default();
        Self {
            min_fragment_chars: raw.min_fragment_chars.unwrap_or(defaults.min_fragment_chars),
            min_fragment_words: raw.min_fragment_words.unwrap_or(defaults.min_fragment_words),
            glitch_min_chars: raw.glitch_min_chars.unwrap_or(defaults.glitch_min_chars),
            glitch_min_words: raw.glitch_min_words.unwrap_or(defaults.glitch_min_words),
            char_repeat_ratio: raw.char_repeat_ratio.unwrap_or(defaults.char_repeat_ratio),
            word_repeat_ratio: raw.word_repeat_ratio.unwrap_or(defaults.word_repeat_ratio),
            substring_repeat_ratio: raw
                .substring_repeat_ratio
                .unwrap_or(defaults.substring_repeat_ratio),
        }
    }
}

impl From<RawCollaboratorConfig> for CollaboratorConfig {
    fn from(raw: RawCollaboratorConfig) -> Self {
        let defaults = Self::default();
        Self {
            transcriber_url: raw.transcriber_url.unwrap_or(defaults.transcriber_url),
            paraphrase_model: raw.paraphrase_model.unwrap_or(defaults.paraphrase_model),
            paraphrase_max_tokens: raw
                .paraphrase_max_tokens
                .unwrap_or(defaults.paraphrase_max_tokens),
            drift_strength: raw.drift_strength.unwrap_or(defaults.drift_strength),
            call_timeout: raw
                .call_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in prompt pools shipped with the binary so a missing pool file
/// never blocks a show.
fn builtin_prompts(language: Language) -> Vec<Prompt> {
    let entries: &[(u32, &str, &str)] = match language {
        Language::En => &[
            (
                1,
                "childhood summers",
                "Tell each other about a summer you remember from childhood.",
            ),
            (
                2,
                "dream trips",
                "Describe a trip you have always wanted to take.",
            ),
            (
                3,
                "food",
                "Talk about a dish you could eat every day.",
            ),
            (
                4,
                "small fears",
                "Share a small, silly fear you have never outgrown.",
            ),
            (
                5,
                "first jobs",
                "Tell each other about the first job you ever had.",
            ),
            (
                6,
                "lost things",
                "Talk about something you lost and still think about.",
            ),
        ],
        Language::Ja => &[
            (1, "子供の頃の夏休み", "子供の頃の夏休みの思い出について話してください。"),
            (2, "行ってみたい場所", "いつか行ってみたい場所について話してください。"),
            (3, "好きな食べ物", "毎日でも食べられる料理について話してください。"),
            (4, "ちょっとした苦手", "大人になっても克服できない小さな苦手について話してください。"),
            (5, "初めてのアルバイト", "初めてのアルバイトの思い出について話してください。"),
            (6, "なくしたもの", "なくしてしまって今でも思い出すものについて話してください。"),
        ],
    };
    entries
        .iter()
        .map(|(id, topic, text)| Prompt {
            id: *id,
            topic: (*topic).to_string(),
            text: (*text).to_string(),
        })
        .collect()
}
