use std::fmt;

use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// String-based identity newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(
            Clone,
            Debug,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(UserId);
string_newtype!(TopicId);

// ---------------------------------------------------------------------------
// Row identities assigned by the store
// ---------------------------------------------------------------------------

macro_rules! row_id {
    ($name:ident) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn value(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(ThreadId);
row_id!(MessageId);

// ---------------------------------------------------------------------------
// Fixed system users
// ---------------------------------------------------------------------------

pub const ADMIN_USER: &str = "admin";
pub const DEV_USER: &str = "dev";
pub const BOT_USER: &str = "bot01";
pub const CONTEXT_USER: &str = "context";

// ---------------------------------------------------------------------------
// Secret — salted digest with redacted Debug and constant-time verification
// ---------------------------------------------------------------------------

/// Hex SHA-256 digest of `"<user_id>:<plain>"`.
///
/// An empty digest marks an account without login (bot and context users);
/// it never verifies.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn from_plain(user_id: &UserId, plain: &str) -> Self {
        Self(digest(user_id, plain))
    }

    pub fn from_digest(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn disabled() -> Self {
        Self(String::new())
    }

    pub fn as_digest(&self) -> &str {
        &self.0
    }

    pub fn is_disabled(&self) -> bool {
        self.0.is_empty()
    }

    pub fn verify(&self, user_id: &UserId, plain: &str) -> bool {
        if self.is_disabled() {
            return false;
        }
        constant_time_eq(self.0.as_bytes(), digest(user_id, plain).as_bytes())
    }
}

impl Default for Secret {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_disabled() {
            write!(f, "Secret(disabled)")
        } else {
            write!(f, "Secret(***)")
        }
    }
}

fn digest(user_id: &UserId, plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(plain.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let max_len = a.len().max(b.len());
    let mut result = (a.len() != b.len()) as u8;
    for i in 0..max_len {
        let x = if i < a.len() { a[i] } else { 0 };
        let y = if i < b.len() { b[i] } else { 0 };
        result |= x ^ y;
    }
    result == 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
