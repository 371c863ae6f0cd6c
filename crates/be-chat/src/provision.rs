use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use be_core::domain::{MessageData, NewMessage, NewThread, Thread, Topic, TopicId, User, UserId};

use crate::store::{ChatStore, StoreError};

/// Finds or creates the thread a user holds for a topic.
///
/// Lookup and creation for the same `(user, topic)` pair are serialized, so
/// concurrent first visits within one process yield a single thread.
pub struct ThreadProvisioner {
    bot_user: User,
    context_user: User,
    locks: Mutex<HashMap<(UserId, TopicId), Arc<Mutex<()>>>>,
}

impl ThreadProvisioner {
    pub fn new(bot_user: User, context_user: User) -> Self {
        Self {
            bot_user,
            context_user,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(
        &self,
        store: &dyn ChatStore,
        user: &User,
        topic: &Topic,
        create_if_missing: bool,
    ) -> Result<Option<Thread>, StoreError> {
        let key = (user.id.clone(), topic.id.clone());
        let key_lock = self.key_lock(&key);
        let result = {
            let _guard = key_lock.lock().expect("provisioning mutex poisoned");
            self.find_or_create(store, user, topic, create_if_missing)
        };
        self.release(&key, key_lock);
        result
    }

    fn find_or_create(
        &self,
        store: &dyn ChatStore,
        user: &User,
        topic: &Topic,
        create_if_missing: bool,
    ) -> Result<Option<Thread>, StoreError> {
        if let Some(thread) = store.find_thread_for_user(&topic.id, &user.id)? {
            tracing::info!(
                thread_id = %thread.id,
                user_id = %user.id,
                topic_id = %topic.id,
                "topic thread already exists; reusing it"
            );
            return Ok(Some(thread));
        }
        if !create_if_missing {
            return Ok(None);
        }

        let new_thread = self.plan(user, topic)?;
        let thread = store.create_thread(&new_thread)?;
        tracing::info!(
            thread_id = %thread.id,
            user_id = %user.id,
            topic_id = %topic.id,
            seed_messages = new_thread.seed.len(),
            "created thread"
        );
        Ok(Some(thread))
    }

    /// Participants in fixed order (human, bot, context) and the topic's
    /// canned conversation replayed as seed messages by the context user.
    fn plan(&self, user: &User, topic: &Topic) -> Result<NewThread, StoreError> {
        let seed = topic
            .conversation()?
            .iter()
            .map(|utterance| NewMessage {
                user_id: self.context_user.id.clone(),
                text: utterance.text.clone(),
                data: Some(MessageData::seed(utterance)),
            })
            .collect();

        Ok(NewThread {
            topic_id: topic.id.clone(),
            participants: vec![
                user.id.clone(),
                self.bot_user.id.clone(),
                self.context_user.id.clone(),
            ],
            seed,
        })
    }

    fn key_lock(&self, key: &(UserId, TopicId)) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("provisioning lock map poisoned");
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drops the map entry once no other caller holds the key's lock.
    /// Clones are only taken under the map lock, so the count cannot grow here.
    fn release(&self, key: &(UserId, TopicId), key_lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().expect("provisioning lock map poisoned");
        if Arc::strong_count(&key_lock) == 2 {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn held_keys(&self) -> usize {
        self.locks.lock().expect("provisioning lock map poisoned").len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
