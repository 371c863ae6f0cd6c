use std::sync::Arc;

use be_core::domain::{BotAgent, BotArgs, BotError, BotReply};
use serde::Deserialize;

pub const NAME: &str = "ollama";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OllamaArgs {
    #[serde(default = "default_base_url")]
    base_url: String,
    model: String,
    system_prompt: Option<String>,
    #[serde(default = "super::default_timeout_secs")]
    timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_owned()
}

/// Talks to an Ollama server through its native `/api/chat` endpoint.
pub struct OllamaBot {
    client: reqwest::Client,
    url: String,
    model: String,
    system_prompt: Option<String>,
}

impl OllamaBot {
    pub fn from_args(args: &BotArgs) -> Result<Arc<dyn BotAgent>, BotError> {
        let args: OllamaArgs = super::parse_args(NAME, args)?;
        Ok(Arc::new(Self {
            client: super::http_client(NAME, args.timeout_secs)?,
            url: format!("{}/api/chat", args.base_url.trim_end_matches('/')),
            model: args.model,
            system_prompt: args.system_prompt,
        }))
    }

    fn build_request_body(&self, context: &str) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": context }));

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        })
    }
}

impl BotAgent for OllamaBot {
    fn name(&self) -> &str {
        NAME
    }

    fn talk<'a>(&'a self, context: &'a str) -> BotReply<'a> {
        Box::pin(async move {
            let body = self.build_request_body(context);
            let bytes = super::post_json(self.client.post(&self.url), &body).await?;
            parse_reply(&bytes)
        })
    }
}

// ---------------------------------------------------------------------------
// Response wire types (Deserialize only)
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct OllamaResponseWire {
    message: OllamaMessageWire,
}

#[derive(serde::Deserialize)]
struct OllamaMessageWire {
    content: Option<String>,
}

fn parse_reply(body: &[u8]) -> Result<String, BotError> {
    let resp: OllamaResponseWire =
        serde_json::from_slice(body).map_err(|e| BotError::InvalidResponse(e.to_string()))?;
    resp.message
        .content
        .ok_or_else(|| BotError::InvalidResponse("message has no content".to_owned()))
}
