use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Local};

use crate::domain::BotError;

/// Arguments handed to a bot factory, taken verbatim from configuration.
pub type BotArgs = serde_json::Map<String, serde_json::Value>;

pub type BotReply<'a> = Pin<Box<dyn Future<Output = Result<String, BotError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// BotAgent — produces a reply to the most recent human utterance
// ---------------------------------------------------------------------------

/// A conversational agent. Only the latest human utterance is passed as
/// context; agents see no earlier history.
pub trait BotAgent: Send + Sync {
    fn name(&self) -> &str;

    fn talk<'a>(&'a self, context: &'a str) -> BotReply<'a>;
}

// ---------------------------------------------------------------------------
// Clock — injectable wall clock for deterministic export paths
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
