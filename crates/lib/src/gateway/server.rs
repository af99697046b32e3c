//! Gateway HTTP server and the per-event control flow.

use crate::agent;
use crate::channels::{normalize, LarkChannel, WebhookPayload};
use crate::config::{self, Config};
use crate::dedup::DedupGate;
use crate::kv::KvClient;
use crate::llm::ClaudeClient;
use crate::session::SessionStore;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// In-chat command that wipes the thread's stored history.
const CLEAR_COMMAND: &str = "/clear";
const CLEAR_CONFIRMATION: &str =
    "conversation history cleared. your next message starts a fresh conversation.";

/// Shared state for the gateway (config plus the injected collaborators).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dedup: DedupGate,
    pub sessions: SessionStore,
    pub lark: Arc<LarkChannel>,
    pub claude: ClaudeClient,
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Fails fast when the KV store, Lark, or Claude credentials are missing.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config) -> Result<()> {
    let kv_url = config::resolve_kv_url(&config)
        .context("kv.restUrl not configured (or UPSTASH_REDIS_REST_URL)")?;
    let kv_token = config::resolve_kv_token(&config)
        .context("kv.restToken not configured (or UPSTASH_REDIS_REST_TOKEN)")?;
    let app_id = config::resolve_lark_app_id(&config)
        .context("lark.appId not configured (or LARK_APP_ID)")?;
    let app_secret = config::resolve_lark_app_secret(&config)
        .context("lark.appSecret not configured (or LARK_APP_SECRET)")?;
    let api_key = config::resolve_claude_api_key(&config)
        .context("claude.apiKey not configured (or CLAUDE_API_KEY)")?;

    let kv = KvClient::new(kv_url, kv_token);
    let state = GatewayState {
        dedup: DedupGate::new(kv.clone()),
        sessions: SessionStore::new(kv),
        lark: Arc::new(LarkChannel::new(
            app_id,
            app_secret,
            config.lark.base_url.clone(),
        )),
        claude: ClaudeClient::new(api_key, config.claude.base_url.clone()),
        config: Arc::new(config),
    };

    let bind_addr = format!(
        "{}:{}",
        state.config.gateway.bind.trim(),
        state.config.gateway.port
    );
    let app = Router::new()
        .route(
            "/",
            get(health_http).post(webhook).fallback(method_not_allowed),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Any method other than GET/POST on the endpoint.
async fn method_not_allowed() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
}

/// POST / — the Lark event callback. Always answers 200 once the method and
/// path match: the platform would retry on anything else, and a retry storm
/// helps nobody. Skips and downstream failures are reported in the body.
async fn webhook(State(state): State<GatewayState>, body: Bytes) -> Json<serde_json::Value> {
    // Malformed bodies read as an empty payload: no challenge, no event.
    let payload: WebhookPayload = serde_json::from_slice(&body).unwrap_or_default();

    // URL verification handshake: echo the challenge, touch nothing else.
    if let Some(challenge) = &payload.challenge {
        return Json(json!({ "challenge": challenge }));
    }

    let Some(inbound) = normalize(&payload) else {
        return Json(json!({ "ok": true, "skipped": "no text" }));
    };

    // Idempotency check. The gate fails open: a store outage must not
    // silently drop user messages.
    match state.dedup.check_and_mark(&inbound.message_id).await {
        Ok(true) => {
            log::info!("duplicate message, skipping: {}", inbound.message_id);
            return Json(json!({ "ok": true, "skipped": "duplicate" }));
        }
        Ok(false) => {}
        Err(e) => {
            log::warn!("dedup check failed, continuing anyway: {}", e);
        }
    }

    // The platform's own bot identity; answering it would loop.
    if inbound.sender_type == "app" {
        log::info!("bot message, skipping");
        return Json(json!({ "ok": true, "skipped": "bot" }));
    }

    if inbound.text.eq_ignore_ascii_case(CLEAR_COMMAND) {
        if let Err(e) = state.sessions.clear(&inbound.session_id).await {
            log::warn!("session {}: clear failed: {}", inbound.session_id, e);
        }
        if let Err(e) = state.lark.reply(&inbound.message_id, CLEAR_CONFIRMATION).await {
            log::warn!("clear confirmation reply failed: {}", e);
        }
        return Json(json!({ "ok": true, "cleared": true }));
    }

    log::info!("processing message: {}", inbound.text);
    let model = config::resolve_model(&state.config);
    let system = config::resolve_system_prompt(&state.config);
    let reply = match agent::run_turn(
        &state.sessions,
        &state.claude,
        &model,
        &system,
        &inbound.session_id,
        &inbound.text,
    )
    .await
    {
        Ok(reply) => reply,
        Err(e) => {
            log::warn!("agent turn failed: {}", e);
            return Json(json!({ "ok": false, "error": e.to_string() }));
        }
    };

    if let Err(e) = state.lark.reply(&inbound.message_id, &reply).await {
        log::warn!("reply dispatch failed: {}", e);
        return Json(json!({ "ok": false, "error": e }));
    }
    Json(json!({ "ok": true, "replied": true }))
}
