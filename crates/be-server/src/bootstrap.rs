use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context};
use be_chat::{ChatStore, SqliteChatStore, StoreError};
use be_core::domain::BotAgent;

use crate::bots::BotRegistry;
use crate::config::{AppConfig, AuthConfig, LogFormat, OnboardingConfig};
use crate::service::{Onboarding, ServiceSettings};

pub const ADMIN_SECRET_ENV: &str = "ADMIN_USER_SECRET";
pub const DEV_SECRET_ENV: &str = "DEV_USER_SECRET";

// ---------------------------------------------------------------------------
// RuntimeConfig — fully validated runtime configuration
// ---------------------------------------------------------------------------

pub struct RuntimeConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
    /// SQLite path, or `:memory:`.
    pub database: String,
    pub bot_agent: Arc<dyn BotAgent>,
    pub service: ServiceSettings,
}

// ---------------------------------------------------------------------------
// into_runtime — converts raw AppConfig into validated RuntimeConfig
// ---------------------------------------------------------------------------

pub fn into_runtime(config: AppConfig) -> Result<RuntimeConfig, anyhow::Error> {
    into_runtime_with_env(config, |key| std::env::var(key).ok())
}

pub(crate) fn into_runtime_with_env<F>(
    mut config: AppConfig,
    env: F,
) -> Result<RuntimeConfig, anyhow::Error>
where
    F: Fn(&str) -> Option<String>,
{
    ensure!(
        !config.chatbot.topics_file.as_os_str().is_empty(),
        "chatbot.topics_file is required"
    );
    ensure!(
        !config.chatbot.bot_name.is_empty(),
        "chatbot.bot_name is required"
    );
    ensure!(
        config.limits.max_turns_per_thread > 0,
        "limits.max_turns_per_thread must be positive"
    );
    ensure!(
        config.limits.max_cached_threads > 0,
        "limits.max_cached_threads must be positive"
    );
    ensure!(!config.ratings.is_empty(), "at least one rating question required");

    // Detect duplicate rating questions
    let mut seen_ratings = HashSet::with_capacity(config.ratings.len());
    for question in &config.ratings {
        ensure!(
            seen_ratings.insert(question),
            "duplicate rating question: {question}"
        );
    }

    let registry = BotRegistry::new();
    ensure!(
        registry.contains(&config.chatbot.bot_name),
        "unknown bot name {:?}; known bots: {}",
        config.chatbot.bot_name,
        registry.names().join(", ")
    );
    let bot_agent = registry
        .resolve(&config.chatbot.bot_name, &config.chatbot.bot_args)
        .with_context(|| format!("failed to create bot {:?}", config.chatbot.bot_name))?;

    let onboarding = config.onboarding.map(load_onboarding).transpose()?;
    apply_env_overrides(&mut config.auth, env);

    Ok(RuntimeConfig {
        listen_addr: config.server.listen,
        log_level: config.logging.level,
        log_format: config.logging.format,
        database: config.storage.database,
        bot_agent,
        service: ServiceSettings {
            topics_file: config.chatbot.topics_file,
            chat_dir: config.storage.chat_dir,
            max_turns_per_thread: config.limits.max_turns_per_thread,
            max_cached_threads: config.limits.max_cached_threads,
            ratings: config.ratings,
            onboarding,
            admin_secret: config.auth.admin_secret,
            dev_secret: config.auth.dev_secret,
        },
    })
}

fn load_onboarding(config: OnboardingConfig) -> Result<Onboarding, anyhow::Error> {
    let agreement_text = match &config.agreement_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read agreement file {}", path.display()))?,
        ),
        None => None,
    };
    Ok(Onboarding {
        agreement_text,
        extra: config.extra,
    })
}

fn apply_env_overrides<F>(auth: &mut AuthConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(secret) = env(ADMIN_SECRET_ENV) {
        auth.admin_secret = secret;
    }
    if let Some(secret) = env(DEV_SECRET_ENV) {
        auth.dev_secret = secret;
    }
}

/// Opens the SQLite store named by `[storage] database`.
pub fn open_store(database: &str) -> Result<Arc<dyn ChatStore>, StoreError> {
    let store = if database == ":memory:" {
        SqliteChatStore::new_in_memory()?
    } else {
        SqliteChatStore::new(Path::new(database))?
    };
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
