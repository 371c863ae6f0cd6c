mod common;

use common::*;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_reports_bot() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;

    let resp = reqwest::get(format!("{}/health", server.url()))
        .await
        .expect("request should succeed");

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("valid JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["bot"], "ollama");
}

#[tokio::test]
async fn test_missing_or_unknown_user_rejected() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;

    let resp = reqwest::get(format!("{}/api/topics", server.url()))
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.expect("valid JSON");
    assert_eq!(body["error"]["type"], "authentication_error");

    let resp = server
        .get("/api/topics", "nobody")
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_signup_and_login() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;

    let resp = server
        .post("/api/users", "")
        .json(&json!({ "id": "bob42", "secret": "pass1", "name": "Bob" }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 201);
    let user: Value = resp.json().await.expect("valid JSON");
    assert_eq!(user["id"], "bob42");
    assert_eq!(user["role"], "human");
    assert!(user.get("secret").is_none());

    let resp = server
        .post("/api/users", "")
        .json(&json!({ "id": "bob42", "secret": "pass2" }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 409);

    let resp = server
        .post("/api/users", "")
        .json(&json!({ "id": "b", "secret": "pass1" }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 400);

    let resp = server
        .post("/api/login", "")
        .json(&json!({ "id": "bob42", "secret": "pass1" }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 200);

    let resp = server
        .post("/api/login", "")
        .json(&json!({ "id": "bob42", "secret": "wrong" }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 401);
}

// ---------------------------------------------------------------------------
// Topics and provisioning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_topics_listed_and_fetched() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;

    let topics: Value = server
        .get("/api/topics", TEST_USER)
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");
    let ids: Vec<_> = topics
        .as_array()
        .expect("array")
        .iter()
        .map(|t| t["id"].as_str().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(ids, vec!["t1", "t2"]);

    let resp = server
        .get("/api/topics/t2", TEST_USER)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 200);

    let resp = server
        .get("/api/topics/t9", TEST_USER)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.expect("valid JSON");
    assert_eq!(body["error"]["type"], "not_found_error");
}

#[tokio::test]
async fn test_launch_is_idempotent_and_seeds_once() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;

    let first = server.launch("t1", TEST_USER).await;
    let second = server.launch("t1", TEST_USER).await;
    assert_eq!(first, second);

    let thread: Value = server
        .get(&format!("/api/threads/{first}"), TEST_USER)
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");

    let users: Vec<_> = thread["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(users, vec!["alice", "bot01", "context"]);

    let messages = thread["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["user_id"], "context");
    assert_eq!(messages[0]["data"]["fake_start"], true);
    assert_eq!(messages[0]["data"]["speaker_id"], "s0");

    let resp = server
        .post("/api/topics/t2/thread?create=false", TEST_USER)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_other_users_cannot_read_thread() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;
    let thread_id = server.launch("t1", TEST_USER).await;

    let resp = server
        .get(&format!("/api/threads/{thread_id}"), "dev")
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 403);

    let resp = server
        .get(&format!("/api/threads/{thread_id}"), "admin")
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 200);

    let resp = server.say(thread_id, "dev", "let me in").await;
    assert_eq!(resp.status(), 403);
    assert_eq!(mock.calls(), 0);
}

// ---------------------------------------------------------------------------
// Dialog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_three_turn_episode_over_http() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start_with_limit(&mock.url(), 3).await;
    let thread_id = server.launch("t1", TEST_USER).await;

    let mut flags = Vec::new();
    for text in ["I'm good.", "Going hiking.", "Bye!"] {
        let resp = server.say(thread_id, TEST_USER, text).await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.expect("valid JSON");
        assert_eq!(body["reply"]["text"], format!("bot heard: {text}"));
        assert_eq!(body["reply"]["user_id"], "bot01");
        flags.push(body["episode_done"].as_bool().unwrap());
    }
    assert_eq!(flags, vec![false, false, true]);
    assert_eq!(mock.calls(), 3);

    let thread: Value = server
        .get(&format!("/api/threads/{thread_id}"), TEST_USER)
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");
    assert_eq!(thread["messages"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn test_bot_backend_failure_is_bad_gateway() {
    let mock = MockOllamaServer::start_with_status(500).await;
    let server = TestServer::start(&mock.url()).await;
    let thread_id = server.launch("t1", TEST_USER).await;

    let resp = server.say(thread_id, TEST_USER, "hello?").await;

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.expect("valid JSON");
    assert_eq!(body["error"]["type"], "bot_error");

    let thread: Value = server
        .get(&format!("/api/threads/{thread_id}"), TEST_USER)
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");
    assert_eq!(thread["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_message_rejected() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;
    let thread_id = server.launch("t1", TEST_USER).await;

    let resp = server.say(thread_id, TEST_USER, "   ").await;

    assert_eq!(resp.status(), 400);
    assert_eq!(mock.calls(), 0);
}

// ---------------------------------------------------------------------------
// Ratings, export and stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rating_closes_thread_and_exports() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;
    let thread_id = server.launch("t2", TEST_USER).await;
    server.say(thread_id, TEST_USER, "Dune, again.").await;

    let questions: Value = server
        .get("/api/ratings/questions", TEST_USER)
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");
    assert_eq!(questions, json!(["Engaging", "Coherent"]));

    let resp = server
        .post(&format!("/api/threads/{thread_id}/ratings"), TEST_USER)
        .json(&json!({ "ratings": { "Engaging": 4, "Coherent": 5 } }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 200);
    let thread: Value = resp.json().await.expect("valid JSON");
    assert_eq!(thread["episode_done"], true);
    assert_eq!(thread["data"]["rating_done"], true);
    assert_eq!(thread["data"]["ratings"]["Coherent"], 5);

    let day_dir = std::fs::read_dir(&server.chat_dir)
        .expect("export dir")
        .next()
        .expect("one day directory")
        .expect("dir entry");
    let export = std::fs::read_dir(day_dir.path())
        .expect("day dir")
        .next()
        .expect("one export")
        .expect("dir entry");
    let exported: Value =
        serde_json::from_str(&std::fs::read_to_string(export.path()).unwrap()).unwrap();
    assert_eq!(exported["id"], thread_id);
    assert_eq!(exported["meta"]["rating_questions"], json!(["Engaging", "Coherent"]));
    assert_eq!(exported["messages"].as_array().unwrap().len(), 3);

    let resp = server.say(thread_id, TEST_USER, "one more").await;
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_thread_stats_for_admin() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;
    let rated = server.launch("t1", TEST_USER).await;
    server.launch("t2", TEST_USER).await;
    server
        .post(&format!("/api/threads/{rated}/ratings"), TEST_USER)
        .json(&json!({ "ratings": { "Engaging": 2 } }))
        .send()
        .await
        .expect("request should succeed");

    let resp = server
        .get("/api/stats/threads", TEST_USER)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(resp.status(), 403);

    let done: Value = server
        .get("/api/stats/threads?episode_done=true", "admin")
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");
    assert_eq!(done, json!({ "t1": 1 }));

    let open: Value = server
        .get("/api/stats/threads?episode_done=false", "admin")
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");
    assert_eq!(open, json!({ "t2": 1 }));

    let mine: Value = server
        .get("/api/threads", TEST_USER)
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");
    assert_eq!(mine.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_onboarding_empty_without_config() {
    let mock = MockOllamaServer::start().await;
    let server = TestServer::start(&mock.url()).await;

    let body: Value = server
        .get("/api/onboarding", TEST_USER)
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("valid JSON");
    assert_eq!(body, json!({}));
}
