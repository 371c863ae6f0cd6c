use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{MessageId, Secret, ThreadId, TopicId, UserId};

/// Participant role. Exactly one `Bot` and one `Hidden` system user exist per
/// deployment; `Hidden` authors the seed messages replayed from a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Human,
    Bot,
    Hidden,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Human => "human",
            UserRole::Bot => "bot",
            UserRole::Hidden => "hidden",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(UserRole::Admin),
            "human" => Some(UserRole::Human),
            "bot" => Some(UserRole::Bot),
            "hidden" => Some(UserRole::Hidden),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: UserRole,
    #[serde(skip)]
    pub secret: Secret,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn verify_secret(&self, plain: &str) -> bool {
        self.secret.verify(&self.id, plain)
    }
}

/// Catalog entry offered to participants. Read-only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    pub data: Value,
}

/// One utterance of a topic's canned conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedUtterance {
    pub text: String,
    #[serde(default)]
    pub text_orig: Option<String>,
    #[serde(default)]
    pub speaker_id: Option<Value>,
}

impl Topic {
    /// The seed conversation in file order. A topic without one seeds nothing.
    pub fn conversation(&self) -> Result<Vec<SeedUtterance>, serde_json::Error> {
        match self.data.get("conversation") {
            Some(value) => Vec::<SeedUtterance>::deserialize(value),
            None => Ok(Vec::new()),
        }
    }
}

/// Auxiliary message fields. `fake_start` marks seed messages, which never
/// count as turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_orig: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<Value>,
    #[serde(default)]
    pub fake_start: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageData {
    pub fn seed(utterance: &SeedUtterance) -> Self {
        Self {
            text_orig: utterance.text_orig.clone(),
            speaker_id: utterance.speaker_id.clone(),
            fake_start: true,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub user_id: UserId,
    pub text: String,
    #[serde(default)]
    pub data: Option<MessageData>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_seed(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.fake_start)
    }
}

/// A message not yet written; the store assigns id, thread and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub user_id: UserId,
    pub text: String,
    pub data: Option<MessageData>,
}

impl NewMessage {
    pub fn new(user_id: UserId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            text: text.into(),
            data: None,
        }
    }
}

/// One evaluation conversation, denormalized: participants in attachment
/// order and messages in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub topic_id: TopicId,
    pub episode_done: bool,
    pub data: Map<String, Value>,
    pub users: Vec<User>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn users_with_role(&self, role: UserRole) -> Vec<&User> {
        self.users.iter().filter(|u| u.role == role).collect()
    }

    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.users.iter().any(|u| &u.id == user_id)
    }

    /// Messages authored live by `user_id`; seed messages are excluded.
    pub fn count_turns(&self, user_id: &UserId) -> u32 {
        let count = self
            .messages
            .iter()
            .filter(|m| &m.user_id == user_id && !m.is_seed())
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn ratings(&self) -> Option<&Value> {
        self.data.get("ratings")
    }
}

/// Everything needed to create a thread in one write.
#[derive(Debug, Clone, PartialEq)]
pub struct NewThread {
    pub topic_id: TopicId,
    pub participants: Vec<UserId>,
    pub seed: Vec<NewMessage>,
}
