//! Remote key-value store client (Upstash-style Redis REST API).
//!
//! Every operation is a single authenticated POST of a JSON command array
//! (`["SET", key, value, "EX", "300", "NX"]`) answered with a `{"result": ...}`
//! envelope. No retries here; callers decide how much failure to tolerate.

use serde::Deserialize;

/// Client for a Redis-compatible REST endpoint.
#[derive(Clone)]
pub struct KvClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("kv api error: {0}")]
    Api(String),
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
}

impl KvClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Run one command against the store; returns the raw `result` value.
    async fn command(&self, cmd: &[&str]) -> Result<Option<serde_json::Value>, KvError> {
        let res = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&cmd)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(KvError::Api(format!("{} {}", status, body)));
        }
        let data: CommandResponse = res.json().await?;
        Ok(data.result)
    }

    /// GET key. Absent key yields None.
    pub async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let result = self.command(&["GET", key]).await?;
        Ok(result.and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }))
    }

    /// SET key, optionally with an expiry in seconds.
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), KvError> {
        match ttl_seconds {
            Some(ttl) => {
                let ttl = ttl.to_string();
                self.command(&["SET", key, value, "EX", &ttl]).await?;
            }
            None => {
                self.command(&["SET", key, value]).await?;
            }
        }
        Ok(())
    }

    /// SET key NX EX: insert only when the key does not exist, with an expiry.
    /// Returns true when the insert happened, false when the key was already set.
    /// One atomic round-trip, so concurrent callers race safely on the store side.
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, KvError> {
        let ttl = ttl_seconds.to_string();
        let result = self.command(&["SET", key, value, "EX", &ttl, "NX"]).await?;
        Ok(result.is_some())
    }

    /// DEL key. Deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.command(&["DEL", key]).await?;
        Ok(())
    }
}
