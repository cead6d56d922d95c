use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a very helpful assistant! \
Answer concisely; you are replying inside a chat application, so prefer \
short plain-text messages over long formatted documents.";

/// Typed configuration, loaded from the environment (plus an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Platform bridge
    pub session_name: String,
    pub bridge_program: PathBuf,
    pub bridge_args: Vec<String>,
    pub bridge_restart_backoff: Duration,
    pub bridge_request_timeout: Duration,

    // Command handling
    pub command_prefix: Option<char>,

    // Agent fallback
    pub enable_agents: bool,
    pub agent_system_prompt: String,
    pub agent_max_steps: u32,
    pub agent_max_retries: u32,

    // Providers
    pub groq_api_key: Option<String>,
    pub groq_base_url: String,
    pub groq_model: String,
    pub tavily_api_key: Option<String>,

    // Conversation state
    pub chat_ttl: Duration,

    // Media dumps (inbound images/videos kept for inspection)
    pub media_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let session_name = env_str("SESSION_NAME").unwrap_or_else(|| "DEFAULT_SESSION".to_string());

        let bridge_program =
            env_path("BRIDGE_PROGRAM").unwrap_or_else(|| PathBuf::from("bridge/index.mjs"));
        let bridge_args = env_str("BRIDGE_ARGS")
            .map(|s| s.split_whitespace().map(|a| a.to_string()).collect())
            .unwrap_or_default();
        let bridge_restart_backoff =
            Duration::from_millis(env_u64("BRIDGE_RESTART_BACKOFF_MS").unwrap_or(3_000));
        let bridge_request_timeout =
            Duration::from_millis(env_u64("BRIDGE_REQUEST_TIMEOUT_MS").unwrap_or(30_000));

        // Prefix is optional; the stock behavior accepts bare command tokens.
        let command_prefix = env_str("COMMAND_PREFIX").and_then(|s| s.trim().chars().next());

        // The flag value is literally "ENABLE" (anything else disables).
        let enable_agents = env_str("ENABLE_AGENTS").as_deref() == Some("ENABLE");
        let agent_system_prompt =
            env_str("AGENT_SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let agent_max_steps = env_u32("AGENT_MAX_STEPS").unwrap_or(4).max(1);
        let agent_max_retries = env_u32("AGENT_MAX_RETRIES").unwrap_or(2);

        let groq_api_key = env_str("GROQ_API_KEY").and_then(non_empty);
        let groq_base_url = env_str("GROQ_BASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string());
        let groq_model = env_str("GROQ_MODEL")
            .and_then(non_empty)
            .unwrap_or_else(|| "llama-3.3-70b-versatile".to_string());
        let tavily_api_key = env_str("TAVILY_API_KEY").and_then(non_empty);

        if enable_agents && groq_api_key.is_none() {
            return Err(Error::Config(
                "ENABLE_AGENTS is set but GROQ_API_KEY is missing".to_string(),
            ));
        }

        let chat_ttl = Duration::from_secs(env_u64("CHAT_TTL_SECS").unwrap_or(2 * 60 * 60));

        let media_dir = env_path("MEDIA_DIR").unwrap_or_else(|| PathBuf::from("media"));
        fs::create_dir_all(&media_dir)?;

        Ok(Self {
            session_name,
            bridge_program,
            bridge_args,
            bridge_restart_backoff,
            bridge_request_timeout,
            command_prefix,
            enable_agents,
            agent_system_prompt,
            agent_max_steps,
            agent_max_retries,
            groq_api_key,
            groq_base_url,
            groq_model,
            tavily_api_key,
            chat_ttl,
            media_dir,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

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
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
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

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
