//! Initialize the configuration directory: create ~/.larkbridge and a default
//! config skeleton for the operator to fill in.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = r#"{
  "gateway": { "port": 9200, "bind": "127.0.0.1" },
  "kv": { "restUrl": "", "restToken": "" },
  "lark": { "appId": "", "appSecret": "" },
  "claude": { "apiKey": "" }
}
"#;

/// Create the config directory and a default config file if they do not exist.
/// Secrets are left empty; they can also be provided via the environment
/// (UPSTASH_REDIS_REST_URL/TOKEN, LARK_APP_ID/SECRET, CLAUDE_API_KEY).
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}
