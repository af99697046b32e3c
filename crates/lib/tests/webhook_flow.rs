//! End-to-end webhook flow: the real gateway on a free port, driven with
//! reqwest, with in-test axum servers standing in for the KV store, Lark,
//! and Claude. Covers dedup, the bot filter, the clear command, transcript
//! persistence, and fail-open behavior under a KV outage.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use lib::config::Config;
use lib::gateway;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory stand-in for the Redis REST endpoint: one POST route taking a
/// JSON command array, answering `{"result": ...}` like the real store.
#[derive(Default)]
struct KvStub {
    data: HashMap<String, String>,
    commands: usize,
}

type KvState = Arc<Mutex<KvStub>>;
type Replies = Arc<Mutex<Vec<(String, String)>>>;
type ClaudeRequests = Arc<Mutex<Vec<Value>>>;

async fn kv_command(State(state): State<KvState>, Json(cmd): Json<Vec<String>>) -> Json<Value> {
    let mut g = state.lock().unwrap();
    g.commands += 1;
    let result = match cmd.first().map(|s| s.as_str()) {
        Some("GET") => g
            .data
            .get(&cmd[1])
            .cloned()
            .map(Value::String)
            .unwrap_or(Value::Null),
        Some("SET") => {
            let nx = cmd.iter().any(|c| c == "NX");
            if nx && g.data.contains_key(&cmd[1]) {
                Value::Null
            } else {
                let (key, value) = (cmd[1].clone(), cmd[2].clone());
                g.data.insert(key, value);
                Value::String("OK".to_string())
            }
        }
        Some("DEL") => {
            let removed = g.data.remove(&cmd[1]).is_some();
            Value::from(removed as i64)
        }
        _ => Value::Null,
    };
    Json(json!({ "result": result }))
}

async fn lark_token() -> Json<Value> {
    Json(json!({ "code": 0, "tenant_access_token": "t-test", "expire": 7200 }))
}

async fn lark_reply(
    State(replies): State<Replies>,
    Path(message_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let text = body
        .get("content")
        .and_then(|c| c.as_str())
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_default();
    replies.lock().unwrap().push((message_id, text));
    Json(json!({ "code": 0 }))
}

async fn claude_messages(State(requests): State<ClaudeRequests>, Json(body): Json<Value>) -> Json<Value> {
    requests.lock().unwrap().push(body);
    Json(json!({
        "id": "msg_test",
        "content": [ { "type": "text", "text": "stub reply" } ]
    }))
}

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub server");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

struct Harness {
    url: String,
    client: reqwest::Client,
    kv: KvState,
    replies: Replies,
    claude_requests: ClaudeRequests,
}

impl Harness {
    async fn post(&self, body: &Value) -> Value {
        self.client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .expect("POST webhook")
            .json()
            .await
            .expect("parse webhook response")
    }

    fn stored_session(&self, session_id: &str) -> Option<Vec<Value>> {
        let g = self.kv.lock().unwrap();
        let raw = g.data.get(&format!("session:{}", session_id))?;
        serde_json::from_str(raw).ok()
    }

    fn seed_session(&self, session_id: &str, raw: &str) {
        self.kv
            .lock()
            .unwrap()
            .data
            .insert(format!("session:{}", session_id), raw.to_string());
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn wait_until_healthy(client: &reqwest::Client, url: &str) {
    for _ in 0..100 {
        if let Ok(resp) = client.get(url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway at {} did not come up within 5s", url);
}

async fn start_gateway(kv_url: String) -> Harness {
    let replies: Replies = Arc::new(Mutex::new(Vec::new()));
    let lark_app = Router::new()
        .route("/open-apis/auth/v3/tenant_access_token/internal", post(lark_token))
        .route(
            "/open-apis/im/v1/messages/:message_id/reply",
            post(lark_reply).with_state(replies.clone()),
        );
    let lark_url = spawn_server(lark_app).await;

    let claude_requests: ClaudeRequests = Arc::new(Mutex::new(Vec::new()));
    let claude_app = Router::new().route(
        "/v1/messages",
        post(claude_messages).with_state(claude_requests.clone()),
    );
    let claude_url = spawn_server(claude_app).await;

    let port = free_port();
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.kv.rest_url = Some(kv_url);
    config.kv.rest_token = Some("test-token".to_string());
    config.lark.app_id = Some("cli_test".to_string());
    config.lark.app_secret = Some("secret".to_string());
    config.lark.base_url = Some(lark_url);
    config.claude.api_key = Some("sk-test".to_string());
    config.claude.base_url = Some(claude_url);

    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    wait_until_healthy(&client, &url).await;

    Harness {
        url,
        client,
        kv: Arc::new(Mutex::new(KvStub::default())),
        replies,
        claude_requests,
    }
}

/// Harness with a live KV stub wired in.
async fn start_harness() -> Harness {
    let kv: KvState = Arc::new(Mutex::new(KvStub::default()));
    let kv_app = Router::new().route("/", post(kv_command).with_state(kv.clone()));
    let kv_url = spawn_server(kv_app).await;
    let mut harness = start_gateway(kv_url).await;
    harness.kv = kv;
    harness
}

/// Harness whose KV endpoint is a closed port (simulated store outage).
async fn start_harness_with_kv_down() -> Harness {
    start_gateway("http://127.0.0.1:9".to_string()).await
}

fn event_body(message_id: &str, chat_id: &str, sender_type: &str, text: &str) -> Value {
    json!({
        "event": {
            "sender": { "sender_type": sender_type },
            "message": {
                "message_id": message_id,
                "chat_id": chat_id,
                "content": json!({ "text": text }).to_string(),
            }
        }
    })
}

#[tokio::test]
async fn replies_with_model_text_and_persists_transcript() {
    let h = start_harness().await;

    let res = h
        .post(&event_body("om_1", "oc_1", "user", "@_user_123 @_user_456  hello"))
        .await;
    assert_eq!(res, json!({ "ok": true, "replied": true }));

    let replies = h.replies.lock().unwrap().clone();
    assert_eq!(replies, vec![("om_1".to_string(), "stub reply".to_string())]);

    let requests = h.claude_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let messages = requests[0].get("messages").and_then(|m| m.as_array()).unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].get("role").and_then(|v| v.as_str()), Some("user"));
    assert_eq!(messages[0].get("content").and_then(|v| v.as_str()), Some("hello"));
    assert!(requests[0]
        .get("system")
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.is_empty()));

    let stored = h.stored_session("oc_1").expect("transcript persisted");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0], json!({ "role": "user", "content": "hello" }));
    assert_eq!(stored[1], json!({ "role": "assistant", "content": "stub reply" }));
}

#[tokio::test]
async fn second_delivery_of_the_same_message_is_skipped() {
    let h = start_harness().await;
    let body = event_body("om_dup", "oc_1", "user", "hello again");

    let first = h.post(&body).await;
    assert_eq!(first, json!({ "ok": true, "replied": true }));

    let second = h.post(&body).await;
    assert_eq!(second, json!({ "ok": true, "skipped": "duplicate" }));

    assert_eq!(h.claude_requests.lock().unwrap().len(), 1);
    assert_eq!(h.replies.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn bot_messages_never_reach_the_model() {
    let h = start_harness().await;

    let res = h.post(&event_body("om_bot", "oc_1", "app", "echo echo")).await;
    assert_eq!(res, json!({ "ok": true, "skipped": "bot" }));

    assert!(h.claude_requests.lock().unwrap().is_empty());
    assert!(h.replies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mention_only_message_is_skipped_without_store_access() {
    let h = start_harness().await;

    let res = h.post(&event_body("om_m", "oc_1", "user", "@_user_5 ")).await;
    assert_eq!(res, json!({ "ok": true, "skipped": "no text" }));

    assert_eq!(h.kv.lock().unwrap().commands, 0);
    assert!(h.claude_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn challenge_echo_has_no_side_effects() {
    let h = start_harness().await;

    let res = h.post(&json!({ "challenge": "verify-me" })).await;
    assert_eq!(res, json!({ "challenge": "verify-me" }));

    assert_eq!(h.kv.lock().unwrap().commands, 0);
    assert!(h.claude_requests.lock().unwrap().is_empty());
    assert!(h.replies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn clear_command_wipes_history_and_confirms_once() {
    let h = start_harness().await;
    h.seed_session(
        "oc_1",
        r#"[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]"#,
    );

    let res = h.post(&event_body("om_clear", "oc_1", "user", "/CLEAR")).await;
    assert_eq!(res, json!({ "ok": true, "cleared": true }));

    assert!(h.stored_session("oc_1").is_none());
    let replies = h.replies.lock().unwrap().clone();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "om_clear");
    assert!(replies[0].1.contains("history cleared"));
    assert!(h.claude_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn thread_messages_share_one_transcript() {
    let h = start_harness().await;
    h.seed_session("om_root", r#"[{"role":"user","content":"earlier"},{"role":"assistant","content":"context"}]"#);

    let body = json!({
        "event": {
            "sender": { "sender_type": "user" },
            "message": {
                "message_id": "om_t2",
                "chat_id": "oc_1",
                "root_id": "om_root",
                "content": json!({ "text": "and now?" }).to_string(),
            }
        }
    });
    let res = h.post(&body).await;
    assert_eq!(res, json!({ "ok": true, "replied": true }));

    let requests = h.claude_requests.lock().unwrap().clone();
    let messages = requests[0].get("messages").and_then(|m| m.as_array()).unwrap().clone();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].get("content").and_then(|v| v.as_str()), Some("earlier"));

    let stored = h.stored_session("om_root").expect("transcript persisted");
    assert_eq!(stored.len(), 4);
}

#[tokio::test]
async fn corrupt_stored_history_reads_as_empty() {
    let h = start_harness().await;
    h.seed_session("oc_1", "definitely not json");

    let res = h.post(&event_body("om_c", "oc_1", "user", "fresh start")).await;
    assert_eq!(res, json!({ "ok": true, "replied": true }));

    let requests = h.claude_requests.lock().unwrap().clone();
    let messages = requests[0].get("messages").and_then(|m| m.as_array()).unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].get("content").and_then(|v| v.as_str()), Some("fresh start"));
}

#[tokio::test]
async fn kv_outage_fails_open_and_still_replies() {
    let h = start_harness_with_kv_down().await;

    let res = h.post(&event_body("om_o", "oc_1", "user", "anyone there?")).await;
    assert_eq!(res, json!({ "ok": true, "replied": true }));

    let requests = h.claude_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let messages = requests[0].get("messages").and_then(|m| m.as_array()).unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(h.replies.lock().unwrap().len(), 1);
}
