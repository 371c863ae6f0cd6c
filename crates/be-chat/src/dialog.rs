use std::sync::Arc;

use be_core::domain::{
    BotAgent, BotError, Message, NewMessage, Thread, ThreadId, User, UserId, UserRole,
};

use crate::store::{ChatStore, StoreError};

pub const DEFAULT_MAX_TURNS_PER_THREAD: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    #[error("thread {thread_id} must have exactly one bot and one human; found {bots} bot(s), {humans} human(s) among [{users}]")]
    InvalidParticipants {
        thread_id: ThreadId,
        bots: usize,
        humans: usize,
        users: String,
    },
    #[error("message from {sender} routed to thread {thread_id}, which is bound to human {human}")]
    ForeignSender {
        thread_id: ThreadId,
        sender: UserId,
        human: UserId,
    },
    #[error(transparent)]
    Bot(#[from] BotError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("store task did not complete: {0}")]
    StoreTask(String),
}

impl DialogError {
    /// Broken preconditions are programming errors, not user-facing conditions.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DialogError::InvalidParticipants { .. } | DialogError::ForeignSender { .. }
        )
    }
}

/// Outcome of one observed human message.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: Message,
    pub episode_done: bool,
    pub num_turns: u32,
}

// ---------------------------------------------------------------------------
// DialogBotChatManager — one human, one bot, strict alternation
// ---------------------------------------------------------------------------

pub struct DialogBotChatManager {
    thread_id: ThreadId,
    bot_user: User,
    human_user: User,
    bot_agent: Arc<dyn BotAgent>,
    max_turns: u32,
    num_turns: u32,
}

impl DialogBotChatManager {
    /// Binds the thread's single bot and single human. The turn counter
    /// resumes from the human's persisted non-seed messages.
    pub fn new(
        thread: &Thread,
        bot_agent: Arc<dyn BotAgent>,
        max_turns: u32,
    ) -> Result<Self, DialogError> {
        let bots = thread.users_with_role(UserRole::Bot);
        let humans = thread.users_with_role(UserRole::Human);
        if bots.len() != 1 || humans.len() != 1 {
            let users = thread
                .users
                .iter()
                .map(|u| u.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(DialogError::InvalidParticipants {
                thread_id: thread.id,
                bots: bots.len(),
                humans: humans.len(),
                users,
            });
        }

        let bot_user = bots[0].clone();
        let human_user = humans[0].clone();
        let num_turns = thread.count_turns(&human_user.id);

        Ok(Self {
            thread_id: thread.id,
            bot_user,
            human_user,
            bot_agent,
            max_turns,
            num_turns,
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn human_user(&self) -> &User {
        &self.human_user
    }

    pub fn bot_user(&self) -> &User {
        &self.bot_user
    }

    pub fn num_turns(&self) -> u32 {
        self.num_turns
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Records a human message, obtains the bot's reply to it and persists
    /// both in one transaction on the blocking pool. Nothing is written if
    /// the bot fails or the thread was closed meanwhile.
    pub async fn observe(
        &mut self,
        store: &Arc<dyn ChatStore>,
        message: NewMessage,
    ) -> Result<TurnOutcome, DialogError> {
        if message.user_id != self.human_user.id {
            return Err(DialogError::ForeignSender {
                thread_id: self.thread_id,
                sender: message.user_id,
                human: self.human_user.id.clone(),
            });
        }

        // Single-turn context: the bot only sees the message just received.
        let reply_text = self.bot_agent.talk(&message.text).await?;
        let reply = NewMessage::new(self.bot_user.id.clone(), reply_text);

        let store = Arc::clone(store);
        let thread_id = self.thread_id;
        let mut stored = tokio::task::spawn_blocking(move || {
            store.append_messages(thread_id, &[message, reply])
        })
        .await
        .map_err(|e| DialogError::StoreTask(e.to_string()))??;
        let reply = stored.pop().ok_or_else(|| {
            StoreError::NotFound(format!("reply message in thread {}", self.thread_id))
        })?;

        self.num_turns += 1;
        let episode_done = self.num_turns >= self.max_turns;
        tracing::info!(
            thread_id = %self.thread_id,
            turns = self.num_turns,
            max = self.max_turns,
            episode_done,
            "observed human message"
        );

        Ok(TurnOutcome {
            reply,
            episode_done,
            num_turns: self.num_turns,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
