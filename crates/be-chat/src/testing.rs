use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use be_core::domain::{
    BotAgent, BotError, BotReply, Secret, Topic, TopicId, User, UserId, UserRole, BOT_USER,
    CONTEXT_USER,
};
use chrono::Utc;
use serde_json::json;

use crate::store::{ChatStore, SqliteChatStore};

pub fn user(id: &str, role: UserRole) -> User {
    User {
        id: UserId::new(id),
        name: id.to_owned(),
        role,
        secret: Secret::disabled(),
        created_at: Utc::now(),
    }
}

pub fn topic(id: &str, seed: &[&str]) -> Topic {
    let conversation: Vec<_> = seed
        .iter()
        .enumerate()
        .map(|(i, text)| json!({ "text": text, "speaker_id": format!("s{}", i % 2) }))
        .collect();
    Topic {
        id: TopicId::new(id),
        name: format!("Topic {id}"),
        data: json!({ "conversation": conversation }),
    }
}

/// In-memory store holding the system users, `alice`, `bob` and topic `t1`
/// with a two-utterance seed conversation.
pub fn seeded_store() -> SqliteChatStore {
    let store = SqliteChatStore::new_in_memory().expect("in-memory store");
    store.init().expect("init schema");
    for u in [
        user(BOT_USER, UserRole::Bot),
        user(CONTEXT_USER, UserRole::Hidden),
        user("alice", UserRole::Human),
        user("bob", UserRole::Human),
    ] {
        store.insert_user_if_missing(&u).expect("insert user");
    }
    store
        .insert_topic_if_missing(&topic("t1", &["Hi there.", "Hello! How are you?"]))
        .expect("insert topic");
    store
}

pub fn shared_store() -> Arc<dyn ChatStore> {
    Arc::new(seeded_store())
}

/// Replies `"re: <context>"` and counts calls.
#[derive(Default)]
pub struct ScriptedBot {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl ScriptedBot {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BotAgent for ScriptedBot {
    fn name(&self) -> &str {
        "scripted"
    }

    fn talk<'a>(&'a self, context: &'a str) -> BotReply<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BotError::Connection("scripted failure".into()));
            }
            Ok(format!("re: {context}"))
        })
    }
}
