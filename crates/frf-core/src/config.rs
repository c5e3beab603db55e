use std::{env, fs, path::Path, time::Duration};

use crate::{dispatch::RetryPolicy, errors::Error, Result};

/// Env vars that must be present before a session may be opened.
const REQUIRED_VARS: [&str; 4] = [
    "TG_API_ID",
    "TG_API_HASH",
    "TARGET_CHAT_ID",
    "USER_SESSION_STRING",
];

/// Typed configuration for the forwarder.
///
/// Immutable after load. The four credential fields are required; everything
/// else has defaults tunable through the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Backend credentials
    pub api_id: String,
    pub api_hash: String,
    pub target_chat_id: String,
    pub session_string: String,

    // HTTP surface
    pub bind_addr: String,

    // Dispatch retry policy
    pub max_send_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: u64,
    pub flood_wait_ceiling: Duration,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Mirrors the deployment flow: a local `.env` is applied first
    /// (non-overriding), then, if `CONFIG_FILE_URL` is set, the remote config
    /// file is downloaded and applied with override semantics so a redeploy
    /// picks up rotated credentials without clearing the environment.
    pub async fn load() -> Result<Self> {
        if let Ok(contents) = fs::read_to_string(Path::new(".env")) {
            apply_dotenv(&contents, false);
        }

        match env_str("CONFIG_FILE_URL").and_then(non_empty) {
            Some(url) => {
                tracing::info!("downloading config file");
                let contents = fetch_config_file(&url).await?;
                apply_dotenv(&contents, true);
            }
            None if REQUIRED_VARS.iter().all(|&k| env_str(k).is_none()) => {
                return Err(Error::Config("CONFIG_FILE_URL is not present".to_string()));
            }
            None => {}
        }

        Self::from_env()
    }

    /// Read and validate values already present in the environment.
    pub fn from_env() -> Result<Self> {
        let api_id = env_str("TG_API_ID").and_then(non_empty).unwrap_or_default();
        let api_hash = env_str("TG_API_HASH")
            .and_then(non_empty)
            .unwrap_or_default();
        let target_chat_id = env_str("TARGET_CHAT_ID")
            .and_then(non_empty)
            .unwrap_or_default();
        let session_string = env_str("USER_SESSION_STRING")
            .and_then(non_empty)
            .unwrap_or_default();

        let missing: Vec<&str> = [
            ("TG_API_ID", &api_id),
            ("TG_API_HASH", &api_hash),
            ("TARGET_CHAT_ID", &target_chat_id),
            ("USER_SESSION_STRING", &session_string),
        ]
        .iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| *k)
        .collect();
        if !missing.is_empty() {
            return Err(Error::ConfigIncomplete(missing.join(", ")));
        }

        let bind_addr = env_str("BIND_ADDR").unwrap_or("0.0.0.0:8080".to_string());

        let max_send_attempts = env_u32("MAX_SEND_ATTEMPTS").unwrap_or(3).max(1);
        let backoff_min = Duration::from_secs(env_u64("BACKOFF_MIN_SECS").unwrap_or(3));
        let backoff_max = Duration::from_secs(env_u64("BACKOFF_MAX_SECS").unwrap_or(6));
        let backoff_multiplier = env_u64("BACKOFF_MULTIPLIER").unwrap_or(2).max(1);
        let flood_wait_ceiling =
            Duration::from_secs(env_u64("FLOOD_WAIT_CEILING_SECS").unwrap_or(60));

        Ok(Self {
            api_id,
            api_hash,
            target_chat_id,
            session_string,
            bind_addr,
            max_send_attempts,
            backoff_min,
            backoff_max,
            backoff_multiplier,
            flood_wait_ceiling,
        })
    }

    /// All four credential fields present and non-empty.
    pub fn is_complete(&self) -> bool {
        !(self.api_id.is_empty()
            || self.api_hash.is_empty()
            || self.target_chat_id.is_empty()
            || self.session_string.is_empty())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_send_attempts,
            backoff_multiplier: self.backoff_multiplier,
            min_backoff: self.backoff_min,
            max_backoff: self.backoff_max,
            flood_wait_ceiling: self.flood_wait_ceiling,
        }
    }
}

async fn fetch_config_file(url: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Config(format!("failed to download config file: {e}")))?;

    response
        .text()
        .await
        .map_err(|e| Error::Config(format!("failed to read config file body: {e}")))
}

/// Parse dotenv-style text into key/value pairs.
///
/// Blank lines and `#` comments are skipped; optional surrounding quotes on
/// values are stripped.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn apply_dotenv(contents: &str, override_existing: bool) {
    for (key, val) in parse_dotenv(contents) {
        if !override_existing && env::var_os(&key).is_some() {
            continue;
        }
        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
