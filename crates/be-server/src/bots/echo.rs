use std::sync::Arc;

use be_core::domain::{BotAgent, BotArgs, BotError, BotReply};
use serde::Deserialize;

pub const NAME: &str = "echo";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EchoArgs {
    #[serde(default = "default_prefix")]
    prefix: String,
}

fn default_prefix() -> String {
    "You said: ".to_owned()
}

/// Repeats the human's message behind a fixed prefix. Handy for smoke tests
/// and for running the platform without a model backend.
pub struct EchoBot {
    prefix: String,
}

impl EchoBot {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn from_args(args: &BotArgs) -> Result<Arc<dyn BotAgent>, BotError> {
        let args: EchoArgs = super::parse_args(NAME, args)?;
        Ok(Arc::new(Self::new(args.prefix)))
    }
}

impl BotAgent for EchoBot {
    fn name(&self) -> &str {
        NAME
    }

    fn talk<'a>(&'a self, context: &'a str) -> BotReply<'a> {
        Box::pin(async move { Ok(format!("{}{context}", self.prefix)) })
    }
}
