use std::collections::BTreeMap;
use std::io::{Error as IoError, ErrorKind};
use std::path::Path;
use std::sync::Mutex;

use be_core::domain::{
    Message, MessageData, MessageId, NewMessage, NewThread, Secret, Thread, ThreadId, Topic,
    TopicId, User, UserId, UserRole,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    secret TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS topics (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic_id TEXT NOT NULL REFERENCES topics(id),
    episode_done INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_threads_topic ON threads(topic_id);

CREATE TABLE IF NOT EXISTS thread_users (
    thread_id INTEGER NOT NULL REFERENCES threads(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    position INTEGER NOT NULL,
    PRIMARY KEY (thread_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_thread_users_user ON thread_users(user_id);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id INTEGER NOT NULL REFERENCES threads(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    text TEXT NOT NULL,
    data TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
"#;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("thread {0} is closed; its episode is done")]
    EpisodeClosed(ThreadId),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transactional persistence for topics, users, threads and messages.
///
/// Every method that writes more than one row does so inside a single
/// transaction, so readers never observe a partial write.
pub trait ChatStore: Send + Sync {
    fn init(&self) -> Result<(), StoreError>;
    fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError>;
    /// Returns `false` when a user with the same id already exists.
    fn insert_user_if_missing(&self, user: &User) -> Result<bool, StoreError>;
    fn get_topic(&self, topic_id: &TopicId) -> Result<Option<Topic>, StoreError>;
    fn list_topics(&self) -> Result<Vec<Topic>, StoreError>;
    /// Returns `false` when a topic with the same id already exists; the
    /// stored topic is left untouched.
    fn insert_topic_if_missing(&self, topic: &Topic) -> Result<bool, StoreError>;
    fn get_thread(&self, thread_id: ThreadId) -> Result<Option<Thread>, StoreError>;
    fn find_thread_for_user(
        &self,
        topic_id: &TopicId,
        user_id: &UserId,
    ) -> Result<Option<Thread>, StoreError>;
    fn list_user_threads(&self, user_id: &UserId) -> Result<Vec<Thread>, StoreError>;
    fn create_thread(&self, new_thread: &NewThread) -> Result<Thread, StoreError>;
    /// Fails with `EpisodeClosed` once the thread's episode is done.
    fn append_messages(
        &self,
        thread_id: ThreadId,
        messages: &[NewMessage],
    ) -> Result<Vec<Message>, StoreError>;
    /// Merges `ratings` into thread data, sets `rating_done` and marks the
    /// episode done.
    fn update_thread_ratings(
        &self,
        thread_id: ThreadId,
        ratings: &Value,
    ) -> Result<Thread, StoreError>;
    fn thread_counts(&self, episode_done: bool) -> Result<BTreeMap<TopicId, u64>, StoreError>;
}

pub struct SqliteChatStore {
    conn: Mutex<Connection>,
}

impl SqliteChatStore {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite mutex poisoned")
    }
}

impl ChatStore for SqliteChatStore {
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        conn.execute_batch(SCHEMA_SQL)?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn get_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        let conn = self.lock_conn();
        let user = conn
            .query_row(
                "SELECT id, name, secret, role, created_at FROM users WHERE id = ?1",
                params![user_id.as_str()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn insert_user_if_missing(&self, user: &User) -> Result<bool, StoreError> {
        let conn = self.lock_conn();
        let inserted = conn.execute(
            "INSERT INTO users (id, name, secret, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO NOTHING",
            params![
                user.id.as_str(),
                user.name.as_str(),
                user.secret.as_digest(),
                user.role.as_str(),
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_topic(&self, topic_id: &TopicId) -> Result<Option<Topic>, StoreError> {
        let conn = self.lock_conn();
        let topic = conn
            .query_row(
                "SELECT id, name, data FROM topics WHERE id = ?1",
                params![topic_id.as_str()],
                topic_from_row,
            )
            .optional()?;
        Ok(topic)
    }

    fn list_topics(&self) -> Result<Vec<Topic>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT id, name, data FROM topics ORDER BY rowid ASC")?;
        let rows = stmt.query_map([], topic_from_row)?;
        let topics = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    fn insert_topic_if_missing(&self, topic: &Topic) -> Result<bool, StoreError> {
        let data = serde_json::to_string(&topic.data)?;
        let conn = self.lock_conn();
        let inserted = conn.execute(
            "INSERT INTO topics (id, name, data, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO NOTHING",
            params![
                topic.id.as_str(),
                topic.name.as_str(),
                data,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_thread(&self, thread_id: ThreadId) -> Result<Option<Thread>, StoreError> {
        let conn = self.lock_conn();
        load_thread(&conn, thread_id)
    }

    fn find_thread_for_user(
        &self,
        topic_id: &TopicId,
        user_id: &UserId,
    ) -> Result<Option<Thread>, StoreError> {
        let conn = self.lock_conn();
        let thread_id = conn
            .query_row(
                "SELECT t.id
                 FROM threads t
                 JOIN thread_users tu ON tu.thread_id = t.id
                 WHERE t.topic_id = ?1 AND tu.user_id = ?2
                 ORDER BY t.id DESC
                 LIMIT 1",
                params![topic_id.as_str(), user_id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        match thread_id {
            Some(id) => load_thread(&conn, ThreadId::new(id)),
            None => Ok(None),
        }
    }

    fn list_user_threads(&self, user_id: &UserId) -> Result<Vec<Thread>, StoreError> {
        let conn = self.lock_conn();
        let ids = {
            let mut stmt = conn.prepare(
                "SELECT t.id
                 FROM threads t
                 JOIN thread_users tu ON tu.thread_id = t.id
                 WHERE tu.user_id = ?1
                 ORDER BY t.id ASC",
            )?;
            let rows = stmt.query_map(params![user_id.as_str()], |row| row.get::<_, i64>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(thread) = load_thread(&conn, ThreadId::new(id))? {
                threads.push(thread);
            }
        }
        Ok(threads)
    }

    fn create_thread(&self, new_thread: &NewThread) -> Result<Thread, StoreError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO threads (topic_id, episode_done, data, created_at)
             VALUES (?1, 0, '{}', ?2)",
            params![new_thread.topic_id.as_str(), now],
        )?;
        let thread_id = ThreadId::new(tx.last_insert_rowid());

        for (position, user_id) in new_thread.participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO thread_users (thread_id, user_id, position) VALUES (?1, ?2, ?3)",
                params![thread_id.value(), user_id.as_str(), position as i64],
            )?;
        }

        insert_messages(&tx, thread_id, &new_thread.seed)?;
        tx.commit()?;

        load_thread(&conn, thread_id)?
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))
    }

    fn append_messages(
        &self,
        thread_id: ThreadId,
        messages: &[NewMessage],
    ) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        match thread_episode_done(&tx, thread_id)? {
            None => return Err(StoreError::NotFound(format!("thread {thread_id}"))),
            Some(true) => return Err(StoreError::EpisodeClosed(thread_id)),
            Some(false) => {}
        }
        let stored = insert_messages(&tx, thread_id, messages)?;
        tx.commit()?;
        Ok(stored)
    }

    fn update_thread_ratings(
        &self,
        thread_id: ThreadId,
        ratings: &Value,
    ) -> Result<Thread, StoreError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let raw_data: Option<String> = tx
            .query_row(
                "SELECT data FROM threads WHERE id = ?1",
                params![thread_id.value()],
                |row| row.get(0),
            )
            .optional()?;
        let raw_data = raw_data.ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))?;

        let mut data: Map<String, Value> = serde_json::from_str(&raw_data)?;
        data.insert("ratings".to_owned(), ratings.clone());
        data.insert("rating_done".to_owned(), Value::Bool(true));

        tx.execute(
            "UPDATE threads SET data = ?1, episode_done = 1 WHERE id = ?2",
            params![serde_json::to_string(&data)?, thread_id.value()],
        )?;
        tx.commit()?;

        load_thread(&conn, thread_id)?
            .ok_or_else(|| StoreError::NotFound(format!("thread {thread_id}")))
    }

    fn thread_counts(&self, episode_done: bool) -> Result<BTreeMap<TopicId, u64>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT topic_id, COUNT(*)
             FROM threads
             WHERE episode_done = ?1
             GROUP BY topic_id",
        )?;
        let rows = stmt.query_map(params![episode_done], |row| {
            let topic_id: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((TopicId::new(topic_id), count.max(0) as u64))
        })?;

        let counts = rows.collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Row loading
// ---------------------------------------------------------------------------

/// `None` when the thread does not exist.
fn thread_episode_done(conn: &Connection, thread_id: ThreadId) -> Result<Option<bool>, StoreError> {
    let done = conn
        .query_row(
            "SELECT episode_done FROM threads WHERE id = ?1",
            params![thread_id.value()],
            |row| row.get::<_, bool>(0),
        )
        .optional()?;
    Ok(done)
}

fn insert_messages(
    conn: &Connection,
    thread_id: ThreadId,
    messages: &[NewMessage],
) -> Result<Vec<Message>, StoreError> {
    let mut stored = Vec::with_capacity(messages.len());
    for message in messages {
        let created_at = Utc::now();
        let data = message.data.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO messages (thread_id, user_id, text, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                thread_id.value(),
                message.user_id.as_str(),
                message.text.as_str(),
                data,
                created_at.to_rfc3339(),
            ],
        )?;
        stored.push(Message {
            id: MessageId::new(conn.last_insert_rowid()),
            thread_id,
            user_id: message.user_id.clone(),
            text: message.text.clone(),
            data: message.data.clone(),
            created_at,
        });
    }
    Ok(stored)
}

fn load_thread(conn: &Connection, thread_id: ThreadId) -> Result<Option<Thread>, StoreError> {
    let row = conn
        .query_row(
            "SELECT topic_id, episode_done, data, created_at FROM threads WHERE id = ?1",
            params![thread_id.value()],
            |row| {
                let topic_id: String = row.get(0)?;
                let episode_done: bool = row.get(1)?;
                let data: String = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok((
                    TopicId::new(topic_id),
                    episode_done,
                    parse_json_object(2, &data)?,
                    parse_datetime_utc(3, &created_at)?,
                ))
            },
        )
        .optional()?;
    let Some((topic_id, episode_done, data, created_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.secret, u.role, u.created_at
         FROM users u
         JOIN thread_users tu ON tu.user_id = u.id
         WHERE tu.thread_id = ?1
         ORDER BY tu.position ASC",
    )?;
    let users = stmt
        .query_map(params![thread_id.value()], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, user_id, text, data, created_at
         FROM messages
         WHERE thread_id = ?1
         ORDER BY id ASC",
    )?;
    let messages = stmt
        .query_map(params![thread_id.value()], |row| {
            let id: i64 = row.get(0)?;
            let user_id: String = row.get(1)?;
            let text: String = row.get(2)?;
            let data: Option<String> = row.get(3)?;
            let created_at: String = row.get(4)?;

            Ok(Message {
                id: MessageId::new(id),
                thread_id,
                user_id: UserId::new(user_id),
                text,
                data: data
                    .as_deref()
                    .map(|raw| parse_message_data(3, raw))
                    .transpose()?,
                created_at: parse_datetime_utc(4, &created_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Thread {
        id: thread_id,
        topic_id,
        episode_done,
        data,
        users,
        messages,
        created_at,
    }))
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let secret: String = row.get(2)?;
    let role: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(User {
        id: UserId::new(id),
        name,
        role: parse_role(3, &role)?,
        secret: Secret::from_digest(secret),
        created_at: parse_datetime_utc(4, &created_at)?,
    })
}

fn topic_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Topic> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let data: String = row.get(2)?;

    Ok(Topic {
        id: TopicId::new(id),
        name,
        data: serde_json::from_str(&data)
            .map_err(|_| sql_text_parse_error(2, "topic data", &data))?,
    })
}

// ---------------------------------------------------------------------------
// Column parsing
// ---------------------------------------------------------------------------

fn parse_role(column: usize, value: &str) -> rusqlite::Result<UserRole> {
    UserRole::parse(value).ok_or_else(|| sql_text_parse_error(column, "user role", value))
}

fn parse_json_object(column: usize, value: &str) -> rusqlite::Result<Map<String, Value>> {
    serde_json::from_str(value).map_err(|_| sql_text_parse_error(column, "thread data", value))
}

fn parse_message_data(column: usize, value: &str) -> rusqlite::Result<MessageData> {
    serde_json::from_str(value).map_err(|_| sql_text_parse_error(column, "message data", value))
}

fn parse_datetime_utc(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| sql_text_parse_error(column, "datetime", value))
}

fn sql_text_parse_error(column: usize, field: &'static str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid {field}: {value}"),
        )),
    )
}
