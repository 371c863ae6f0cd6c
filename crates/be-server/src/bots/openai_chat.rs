use std::sync::Arc;

use be_core::domain::{BotAgent, BotArgs, BotError, BotReply};
use serde::Deserialize;

pub const NAME: &str = "openai-chat";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpenAiChatArgs {
    #[serde(default = "default_base_url")]
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    #[serde(default = "super::default_timeout_secs")]
    timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com".to_owned()
}

/// Any OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiChatBot {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl OpenAiChatBot {
    pub fn from_args(args: &BotArgs) -> Result<Arc<dyn BotAgent>, BotError> {
        let args: OpenAiChatArgs = super::parse_args(NAME, args)?;
        Ok(Arc::new(Self::with_client(
            super::http_client(NAME, args.timeout_secs)?,
            args,
        )))
    }

    fn with_client(client: reqwest::Client, args: OpenAiChatArgs) -> Self {
        Self {
            client,
            url: format!(
                "{}/v1/chat/completions",
                args.base_url.trim_end_matches('/')
            ),
            api_key: args.api_key,
            model: args.model,
            system_prompt: args.system_prompt,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
        }
    }

    fn build_request_body(&self, context: &str) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": context }));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

impl BotAgent for OpenAiChatBot {
    fn name(&self) -> &str {
        NAME
    }

    fn talk<'a>(&'a self, context: &'a str) -> BotReply<'a> {
        Box::pin(async move {
            let body = self.build_request_body(context);
            let mut request = self.client.post(&self.url);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            let bytes = super::post_json(request, &body).await?;
            parse_reply(&bytes)
        })
    }
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct ChatCompletionWire {
    #[serde(default)]
    choices: Vec<ChoiceWire>,
}

#[derive(serde::Deserialize)]
struct ChoiceWire {
    message: ChoiceMessageWire,
}

#[derive(serde::Deserialize)]
struct ChoiceMessageWire {
    content: Option<String>,
}

fn parse_reply(body: &[u8]) -> Result<String, BotError> {
    let resp: ChatCompletionWire =
        serde_json::from_slice(body).map_err(|e| BotError::InvalidResponse(e.to_string()))?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| BotError::InvalidResponse("completion has no message content".to_owned()))
}
