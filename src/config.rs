//! Environment-variable-driven configuration.
//!
//! Loaded once at process start and passed by reference to the pieces that
//! need it — no hidden global mutable state (Design Note 9's "process-wide
//! registry value created at startup with explicit init/teardown").

use std::collections::HashMap;
use std::time::Duration;

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_str(key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_str(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Per-server MCP configuration loaded from `MCP_SERVER_<NAME>_*` variables.
#[derive(Debug, Clone)]
pub struct McpServerEnv {
    pub name: String,
    pub url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub enabled: bool,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// API keys keyed by provider name (openai, anthropic, ollama, grok,
    /// gemini, deepseek).
    pub provider_api_keys: HashMap<String, String>,
    pub default_provider: String,

    pub queue_enabled: bool,

    pub log_enabled: bool,
    pub log_level: String,

    pub memory_cache_ttl: Duration,
    pub memory_cleanup_interval: Duration,

    pub streaming_enabled: bool,
    pub streaming_buffer_size: usize,
    pub streaming_chunk_size: usize,
    pub streaming_timeout: Duration,
    pub streaming_chunk_delay: Duration,

    pub mcp_enabled: bool,
    pub mcp_servers: Vec<McpServerEnv>,

    pub database_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_api_keys: HashMap::new(),
            default_provider: "openai".to_string(),
            queue_enabled: false,
            log_enabled: true,
            log_level: "info".to_string(),
            memory_cache_ttl: Duration::from_secs(3600),
            memory_cleanup_interval: Duration::from_secs(300),
            streaming_enabled: true,
            streaming_buffer_size: 10,
            streaming_chunk_size: 1,
            streaming_timeout: Duration::from_secs(60),
            streaming_chunk_delay: Duration::from_millis(0),
            mcp_enabled: false,
            mcp_servers: Vec::new(),
            database_path: "agentkit.sqlite3".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut provider_api_keys = HashMap::new();
        for provider in ["OPENAI", "ANTHROPIC", "OLLAMA", "GROK", "GEMINI", "DEEPSEEK"] {
            if let Some(key) = env_str(&format!("{provider}_API_KEY")) {
                provider_api_keys.insert(provider.to_lowercase(), key);
            }
        }

        let mcp_servers = env_str("MCP_SERVERS")
            .map(|list| {
                list.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|name| {
                        let name = name.trim().to_uppercase();
                        let url = env_str(&format!("MCP_SERVER_{name}_URL"))
                            .unwrap_or_default();
                        let token = env_str(&format!("MCP_SERVER_{name}_TOKEN"));
                        let timeout_secs = env_u64(&format!("MCP_SERVER_{name}_TIMEOUT"), 30);
                        let enabled = env_bool(&format!("MCP_SERVER_{name}_ENABLED"), true);
                        let actions = env_str(&format!("MCP_SERVER_{name}_ACTIONS"))
                            .map(|a| a.split(',').map(|s| s.trim().to_string()).collect())
                            .unwrap_or_default();
                        McpServerEnv {
                            name: name.to_lowercase(),
                            url,
                            token,
                            timeout_secs,
                            enabled,
                            actions,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            provider_api_keys,
            default_provider: env_str("DEFAULT_PROVIDER").unwrap_or_else(|| "openai".to_string()),
            queue_enabled: env_bool("QUEUE_ENABLED", false),
            log_enabled: env_bool("LOG_ENABLED", true),
            log_level: env_str("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            memory_cache_ttl: Duration::from_secs(env_u64("MEMORY_CACHE_TTL", 3600)),
            memory_cleanup_interval: Duration::from_secs(env_u64(
                "MEMORY_CLEANUP_INTERVAL",
                300,
            )),
            streaming_enabled: env_bool("STREAMING_ENABLED", true),
            streaming_buffer_size: env_u64("STREAMING_BUFFER_SIZE", 10) as usize,
            streaming_chunk_size: env_u64("STREAMING_CHUNK_SIZE", 1) as usize,
            streaming_timeout: Duration::from_secs(env_u64("STREAMING_TIMEOUT", 60)),
            streaming_chunk_delay: Duration::from_millis(env_u64("STREAMING_CHUNK_DELAY", 0)),
            mcp_enabled: env_bool("MCP_ENABLED", false),
            mcp_servers,
            database_path: env_str("DATABASE_PATH").unwrap_or_else(|| "agentkit.sqlite3".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.default_provider, "openai");
        assert_eq!(c.streaming_buffer_size, 10);
        assert!(!c.mcp_enabled);
    }

    #[test]
    fn env_bool_parses_truthy_values() {
        assert!(env_bool("AGENTKIT_TEST_NONEXISTENT_FLAG", false) == false);
    }
}
