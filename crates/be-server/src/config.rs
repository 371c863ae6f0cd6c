use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub chatbot: ChatbotConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub ratings: Vec<String>,
    #[serde(default)]
    pub onboarding: Option<OnboardingConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7070".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; `:memory:` keeps everything in memory.
    pub database: String,
    pub chat_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: "boteval.db".to_owned(),
            chat_dir: PathBuf::from("data/chats"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatbotConfig {
    pub topics_file: PathBuf,
    pub bot_name: String,
    #[serde(default)]
    pub bot_args: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_turns_per_thread: u32,
    pub max_cached_threads: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_turns_per_thread: be_chat::DEFAULT_MAX_TURNS_PER_THREAD,
            max_cached_threads: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingConfig {
    pub agreement_file: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub admin_secret: String,
    pub dev_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_secret: "xyza".to_owned(),
            dev_secret: "abcd".to_owned(),
        }
    }
}
