use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use serde_json::{json, Value};

use be_server::config::{
    AppConfig, AuthConfig, ChatbotConfig, LimitsConfig, LoggingConfig, ServerConfig,
    StorageConfig,
};
use be_server::handler::{AppState, USER_HEADER};
use be_server::service::ChatService;

// ---------------------------------------------------------------------------
// MockOllamaServer — answers /api/chat like an Ollama backend
// ---------------------------------------------------------------------------

struct MockConfig {
    status_code: u16,
    calls: AtomicUsize,
}

pub struct MockOllamaServer {
    addr: SocketAddr,
    config: Arc<MockConfig>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockOllamaServer {
    pub async fn start() -> Self {
        Self::start_with_status(200).await
    }

    pub async fn start_with_status(status: u16) -> Self {
        let config = Arc::new(MockConfig {
            status_code: status,
            calls: AtomicUsize::new(0),
        });

        let app = axum::Router::new()
            .route("/api/chat", post(mock_chat_handler))
            .with_state(Arc::clone(&config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            config,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.config.calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

/// Replies with the last user message prefixed by `bot heard: `.
async fn mock_chat_handler(
    State(config): State<Arc<MockConfig>>,
    Json(body): Json<Value>,
) -> Response {
    config.calls.fetch_add(1, Ordering::SeqCst);
    let status =
        StatusCode::from_u16(config.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if !status.is_success() {
        return (status, "model not loaded").into_response();
    }

    let heard = body["messages"]
        .as_array()
        .and_then(|messages| messages.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_owned();

    Json(json!({
        "model": body["model"],
        "message": { "role": "assistant", "content": format!("bot heard: {heard}") },
        "done": true
    }))
    .into_response()
}

// ---------------------------------------------------------------------------
// TestServer — the boteval HTTP API on an ephemeral port
// ---------------------------------------------------------------------------

pub struct TestServer {
    pub addr: SocketAddr,
    pub chat_dir: PathBuf,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(bot_url: &str) -> Self {
        Self::start_with_limit(bot_url, 3).await
    }

    pub async fn start_with_limit(bot_url: &str, max_turns: u32) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let topics_file = dir.path().join("topics.json");
        std::fs::write(&topics_file, sample_catalog().to_string()).expect("write catalog");
        let chat_dir = dir.path().join("chats");

        let mut bot_args = serde_json::Map::new();
        bot_args.insert("base_url".to_owned(), json!(bot_url));
        bot_args.insert("model".to_owned(), json!(TEST_MODEL));
        bot_args.insert("timeout_secs".to_owned(), json!(5));

        let config = AppConfig {
            server: ServerConfig {
                listen: "127.0.0.1:0".to_owned(),
            },
            logging: LoggingConfig::default(),
            storage: StorageConfig {
                database: ":memory:".to_owned(),
                chat_dir: chat_dir.clone(),
            },
            chatbot: ChatbotConfig {
                topics_file,
                bot_name: "ollama".to_owned(),
                bot_args,
            },
            limits: LimitsConfig {
                max_turns_per_thread: max_turns,
                ..LimitsConfig::default()
            },
            ratings: vec!["Engaging".to_owned(), "Coherent".to_owned()],
            onboarding: None,
            auth: AuthConfig {
                admin_secret: ADMIN_SECRET.to_owned(),
                ..AuthConfig::default()
            },
        };

        let runtime =
            be_server::bootstrap::into_runtime(config).expect("test config should be valid");
        let store = be_server::bootstrap::open_store(&runtime.database).expect("open store");
        let service = ChatService::new(runtime.service, store, runtime.bot_agent);
        service.init_db(true).expect("init db");
        service
            .signup(TEST_USER, "secret", "Alice")
            .expect("signup test user");

        let app = be_server::handler::router(Arc::new(AppState { service }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind boteval");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            chat_dir,
            client: reqwest::Client::new(),
            _dir: dir,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn get(&self, path: &str, user: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.url()))
            .header(USER_HEADER, user)
    }

    pub fn post(&self, path: &str, user: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.url()))
            .header(USER_HEADER, user)
    }

    /// Launches `topic_id` for `user` and returns the thread id.
    pub async fn launch(&self, topic_id: &str, user: &str) -> i64 {
        let resp = self
            .post(&format!("/api/topics/{topic_id}/thread"), user)
            .send()
            .await
            .expect("launch request");
        assert_eq!(resp.status(), 200);
        let thread: Value = resp.json().await.expect("valid JSON");
        thread["id"].as_i64().expect("thread id")
    }

    pub async fn say(&self, thread_id: i64, user: &str, text: &str) -> reqwest::Response {
        self.post(&format!("/api/threads/{thread_id}/messages"), user)
            .json(&json!({ "text": text }))
            .send()
            .await
            .expect("message request")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const TEST_USER: &str = "alice";
pub const TEST_MODEL: &str = "llama3";
pub const ADMIN_SECRET: &str = "admin-secret";

pub fn sample_catalog() -> Value {
    json!([
        {
            "id": "t1",
            "name": "Weekend plans",
            "data": { "conversation": [
                { "text": "Hi there.", "speaker_id": "s0" },
                { "text": "Hello! How are you?", "speaker_id": "s1" }
            ]}
        },
        {
            "id": "t2",
            "name": "Favorite books",
            "conversation": [{ "text": "Read anything good lately?", "text_orig": "Read anything good lately??" }]
        }
    ])
}
