use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use be_chat::{
    ChatManagerCache, ChatStore, DialogBotChatManager, DialogError, ExportError, FileExportService,
    StoreError, ThreadProvisioner,
};
use be_core::domain::{
    BotAgent, Message, NewMessage, Secret, Thread, ThreadId, Topic, TopicId, User, UserId,
    UserRole, ADMIN_USER, BOT_USER, CONTEXT_USER, DEV_USER,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::catalog::{load_catalog, CatalogError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("thread {0} is closed; its episode is done")]
    EpisodeClosed(ThreadId),
    #[error("invalid signup: {0}")]
    InvalidSignup(String),
    #[error("user {0} already exists")]
    UserExists(UserId),
    #[error("ratings for thread {thread_id} were saved, but export failed: {source}")]
    ExportAfterRating {
        thread_id: ThreadId,
        #[source]
        source: ExportError,
    },
    #[error(transparent)]
    Dialog(#[from] DialogError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Onboarding material shown to new participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Onboarding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement_text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Validated settings the facade runs with.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub topics_file: PathBuf,
    pub chat_dir: PathBuf,
    pub max_turns_per_thread: u32,
    pub max_cached_threads: usize,
    pub ratings: Vec<String>,
    pub onboarding: Option<Onboarding>,
    pub admin_secret: String,
    pub dev_secret: String,
}

// ---------------------------------------------------------------------------
// ChatService — entry point for the presentation and auth layers
// ---------------------------------------------------------------------------

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    exporter: FileExportService,
    bot_agent: Arc<dyn BotAgent>,
    provisioner: ThreadProvisioner,
    managers: ChatManagerCache,
    settings: ServiceSettings,
}

impl ChatService {
    pub fn new(
        settings: ServiceSettings,
        store: Arc<dyn ChatStore>,
        bot_agent: Arc<dyn BotAgent>,
    ) -> Self {
        Self {
            store,
            exporter: FileExportService::new(settings.chat_dir.clone()),
            bot_agent,
            provisioner: ThreadProvisioner::new(bot_user(), context_user()),
            managers: ChatManagerCache::new(settings.max_cached_threads),
            settings,
        }
    }

    pub fn bot_name(&self) -> &str {
        self.bot_agent.name()
    }

    /// Creates the schema and the fixed system users, then optionally ingests
    /// the topic catalog. Existing users and topics are never overwritten.
    /// Returns the number of topics inserted.
    pub fn init_db(&self, init_topics: bool) -> Result<usize, ServiceError> {
        self.store.init()?;

        let admin = UserId::new(ADMIN_USER);
        let dev = UserId::new(DEV_USER);
        let system_users = [
            system_user(
                ADMIN_USER,
                "Chat Admin",
                UserRole::Admin,
                Secret::from_plain(&admin, &self.settings.admin_secret),
            ),
            system_user(
                DEV_USER,
                "Developer",
                UserRole::Human,
                Secret::from_plain(&dev, &self.settings.dev_secret),
            ),
            bot_user(),
            context_user(),
        ];
        for user in &system_users {
            if self.store.insert_user_if_missing(user)? {
                tracing::info!(user_id = %user.id, role = user.role.as_str(), "created system user");
            }
        }

        if !init_topics {
            return Ok(0);
        }

        let topics = load_catalog(&self.settings.topics_file)?;
        let mut inserted = 0;
        for topic in &topics {
            if self.store.insert_topic_if_missing(topic)? {
                inserted += 1;
            } else {
                tracing::warn!(topic_id = %topic.id, "chat topic exists, skipping");
            }
        }
        tracing::info!(inserted, total = topics.len(), "ingested topic catalog");
        Ok(inserted)
    }

    pub fn get_topics(&self) -> Result<Vec<Topic>, ServiceError> {
        Ok(self.store.list_topics()?)
    }

    pub fn get_topic(&self, topic_id: &TopicId) -> Result<Option<Topic>, ServiceError> {
        Ok(self.store.get_topic(topic_id)?)
    }

    pub fn get_thread(&self, thread_id: ThreadId) -> Result<Option<Thread>, ServiceError> {
        Ok(self.store.get_thread(thread_id)?)
    }

    pub fn get_user_threads(&self, user: &User) -> Result<Vec<Thread>, ServiceError> {
        Ok(self.store.list_user_threads(&user.id)?)
    }

    pub fn get_thread_for_topic(
        &self,
        user: &User,
        topic: &Topic,
        create_if_missing: bool,
    ) -> Result<Option<Thread>, ServiceError> {
        Ok(self
            .provisioner
            .get_or_create(self.store.as_ref(), user, topic, create_if_missing)?)
    }

    /// Number of threads per topic in the given completion state.
    pub fn get_thread_counts(
        &self,
        episode_done: bool,
    ) -> Result<BTreeMap<TopicId, u64>, ServiceError> {
        Ok(self.store.thread_counts(episode_done)?)
    }

    /// Routes a human message to the thread's orchestrator and returns the
    /// bot's reply together with the episode completion flag.
    pub async fn new_message(
        &self,
        thread: &Thread,
        message: NewMessage,
    ) -> Result<(Message, bool), ServiceError> {
        if thread.episode_done {
            return Err(ServiceError::EpisodeClosed(thread.id));
        }

        let manager = self.managers.get_or_try_insert_with(thread.id, || {
            DialogBotChatManager::new(
                thread,
                Arc::clone(&self.bot_agent),
                self.settings.max_turns_per_thread,
            )
        })?;
        let mut manager = manager.lock().await;
        // The snapshot may predate a rating; the store makes the final call.
        let outcome = match manager.observe(&self.store, message).await {
            Err(DialogError::Store(StoreError::EpisodeClosed(id))) => {
                return Err(ServiceError::EpisodeClosed(id))
            }
            other => other?,
        };
        Ok((outcome.reply, outcome.episode_done))
    }

    /// Saves the ratings and closes the episode, then exports the thread.
    /// The ratings stay saved when the export fails.
    pub fn update_thread_ratings(
        &self,
        thread_id: ThreadId,
        ratings: &Value,
    ) -> Result<Thread, ServiceError> {
        let thread = match self.store.update_thread_ratings(thread_id, ratings) {
            Err(StoreError::NotFound(what)) => return Err(ServiceError::NotFound(what)),
            other => other?,
        };
        self.managers.invalidate(thread_id);
        tracing::info!(thread_id = %thread_id, "ratings saved; episode done");

        let mut meta = Map::new();
        meta.insert(
            "rating_questions".to_owned(),
            Value::from(self.settings.ratings.clone()),
        );
        self.exporter
            .export_thread(&thread, &meta)
            .map_err(|source| ServiceError::ExportAfterRating { thread_id, source })?;
        Ok(thread)
    }

    pub fn get_rating_questions(&self) -> &[String] {
        &self.settings.ratings
    }

    pub fn onboarding(&self) -> Option<&Onboarding> {
        self.settings.onboarding.as_ref()
    }

    pub fn signup(&self, id: &str, secret: &str, name: &str) -> Result<User, ServiceError> {
        validate_signup(id, secret)?;
        let user_id = UserId::new(id);
        let name = if name.trim().is_empty() { id } else { name.trim() };
        let user = User {
            secret: Secret::from_plain(&user_id, secret),
            id: user_id,
            name: name.to_owned(),
            role: UserRole::Human,
            created_at: Utc::now(),
        };
        if !self.store.insert_user_if_missing(&user)? {
            return Err(ServiceError::UserExists(user.id));
        }
        tracing::info!(user_id = %user.id, "signed up new user");
        Ok(user)
    }

    pub fn authenticate(&self, id: &str, secret: &str) -> Result<Option<User>, ServiceError> {
        let user = self.store.get_user(&UserId::new(id))?;
        Ok(user.filter(|u| u.verify_secret(secret)))
    }

    pub fn get_user(&self, user_id: &UserId) -> Result<Option<User>, ServiceError> {
        Ok(self.store.get_user(user_id)?)
    }
}

// ---------------------------------------------------------------------------
// System users
// ---------------------------------------------------------------------------

/// Login is disabled for the bot and context users.
fn bot_user() -> User {
    system_user(BOT_USER, "Chat Bot", UserRole::Bot, Secret::disabled())
}

fn context_user() -> User {
    system_user(
        CONTEXT_USER,
        "Context User",
        UserRole::Hidden,
        Secret::disabled(),
    )
}

fn system_user(id: &str, name: &str, role: UserRole, secret: Secret) -> User {
    User {
        id: UserId::new(id),
        name: name.to_owned(),
        role,
        secret,
        created_at: Utc::now(),
    }
}

fn validate_signup(id: &str, secret: &str) -> Result<(), ServiceError> {
    if !(2..=16).contains(&id.len()) || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ServiceError::InvalidSignup(
            "user id must be 2 to 16 letters or digits".to_owned(),
        ));
    }
    if secret.chars().count() < 4 {
        return Err(ServiceError::InvalidSignup(
            "secret must be at least 4 characters".to_owned(),
        ));
    }
    Ok(())
}
