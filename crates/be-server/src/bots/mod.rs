pub mod echo;
pub mod ollama;
pub mod openai_chat;

use std::sync::Arc;
use std::time::Duration;

use be_core::domain::{BotAgent, BotArgs, BotError};
use serde::de::DeserializeOwned;

pub type BotFactory = fn(&BotArgs) -> Result<Arc<dyn BotAgent>, BotError>;

/// Registry of bot agents selectable by name at startup.
///
/// Uses linear scan over a small vec; there are only a handful of agents.
pub struct BotRegistry {
    factories: Vec<(&'static str, BotFactory)>,
}

impl BotRegistry {
    pub fn new() -> Self {
        let factories: Vec<(&'static str, BotFactory)> = vec![
            (echo::NAME, echo::EchoBot::from_args),
            (ollama::NAME, ollama::OllamaBot::from_args),
            (openai_chat::NAME, openai_chat::OpenAiChatBot::from_args),
        ];
        Self { factories }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|(name, _)| *name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(n, _)| *n == name)
    }

    pub fn resolve(&self, name: &str, args: &BotArgs) -> Result<Arc<dyn BotAgent>, BotError> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| BotError::UnknownAgent {
                name: name.to_owned(),
                known: self.names().join(", "),
            })?;
        factory(args)
    }
}

impl Default for BotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the adapters
// ---------------------------------------------------------------------------

fn default_timeout_secs() -> u64 {
    60
}

pub(crate) fn parse_args<T: DeserializeOwned>(agent: &str, args: &BotArgs) -> Result<T, BotError> {
    serde_json::from_value(serde_json::Value::Object(args.clone())).map_err(|e| {
        BotError::InvalidArgs {
            agent: agent.to_owned(),
            reason: e.to_string(),
        }
    })
}

pub(crate) fn http_client(agent: &str, timeout_secs: u64) -> Result<reqwest::Client, BotError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BotError::InvalidArgs {
            agent: agent.to_owned(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// POSTs a JSON body and returns the raw response body of a 2xx reply.
pub(crate) async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<Vec<u8>, BotError> {
    let resp = request
        .json(body)
        .send()
        .await
        .map_err(|e| BotError::Connection(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(BotError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| BotError::Connection(e.to_string()))?;
    Ok(bytes.to_vec())
}
