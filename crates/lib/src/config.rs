//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.larkbridge/config.json`);
//! deployment secrets can come from the environment instead, which wins over
//! the file. The loaded struct is built once at startup and injected into the
//! KV, Claude, and Lark constructors; components never read the environment
//! themselves.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant replying inside a Lark chat thread. Keep replies concise and conversational.";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Remote key-value store (dedup markers and session transcripts).
    #[serde(default)]
    pub kv: KvConfig,

    /// Lark app credentials and API base.
    #[serde(default)]
    pub lark: LarkConfig,

    /// Claude API credentials and base.
    #[serde(default)]
    pub claude: ClaudeConfig,

    /// Agent defaults (model, system prompt).
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook endpoint (default 9200).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    9200
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Key-value store endpoint (Upstash-style Redis REST).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvConfig {
    /// REST endpoint URL. Overridden by UPSTASH_REDIS_REST_URL env when set.
    pub rest_url: Option<String>,
    /// Bearer token. Overridden by UPSTASH_REDIS_REST_TOKEN env when set.
    pub rest_token: Option<String>,
}

/// Lark app credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LarkConfig {
    /// App id from the Lark developer console. Overridden by LARK_APP_ID env.
    pub app_id: Option<String>,
    /// App secret. Overridden by LARK_APP_SECRET env.
    pub app_secret: Option<String>,
    /// API base (default https://open.larksuite.com; set to
    /// https://open.feishu.cn for Feishu tenants).
    pub base_url: Option<String>,
}

/// Claude API access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeConfig {
    /// API key. Overridden by CLAUDE_API_KEY env.
    pub api_key: Option<String>,
    /// API base (default https://api.anthropic.com).
    pub base_url: Option<String>,
}

/// Agent defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Model id passed to the Messages API.
    pub model: Option<String>,
    /// System instruction sent ahead of the transcript.
    pub system_prompt: Option<String>,
}

/// Non-empty trimmed env value, or None.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Non-empty trimmed config value, or None.
fn config_value(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the KV endpoint: env UPSTASH_REDIS_REST_URL overrides config.
pub fn resolve_kv_url(config: &Config) -> Option<String> {
    env_value("UPSTASH_REDIS_REST_URL").or_else(|| config_value(&config.kv.rest_url))
}

/// Resolve the KV token: env UPSTASH_REDIS_REST_TOKEN overrides config.
pub fn resolve_kv_token(config: &Config) -> Option<String> {
    env_value("UPSTASH_REDIS_REST_TOKEN").or_else(|| config_value(&config.kv.rest_token))
}

/// Resolve the Lark app id: env LARK_APP_ID overrides config.
pub fn resolve_lark_app_id(config: &Config) -> Option<String> {
    env_value("LARK_APP_ID").or_else(|| config_value(&config.lark.app_id))
}

/// Resolve the Lark app secret: env LARK_APP_SECRET overrides config.
pub fn resolve_lark_app_secret(config: &Config) -> Option<String> {
    env_value("LARK_APP_SECRET").or_else(|| config_value(&config.lark.app_secret))
}

/// Resolve the Claude API key: env CLAUDE_API_KEY overrides config.
pub fn resolve_claude_api_key(config: &Config) -> Option<String> {
    env_value("CLAUDE_API_KEY").or_else(|| config_value(&config.claude.api_key))
}

/// Resolve the model id; falls back to the default model.
pub fn resolve_model(config: &Config) -> String {
    config_value(&config.agents.model).unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

/// Resolve the system prompt; falls back to the default instruction.
pub fn resolve_system_prompt(config: &Config) -> String {
    config_value(&config.agents.system_prompt).unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// Resolve config path from env or default (~/.larkbridge/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("LARKBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".larkbridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default
/// config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
