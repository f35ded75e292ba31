//! External MCP client (C10).
//!
//! JSON-RPC 2.0 over HTTP to auxiliary tool servers, with cached capability
//! discovery, health checks, and a fixed-delay retry policy. Grounded in the
//! model crate's `mcp::client::MCPClient`: its connect/retry/cache
//! scaffolding is real, reusable code (retained here almost verbatim in
//! spirit); its `list_tools_impl`/`call_tool_impl`/etc. method bodies were
//! left as stubs with commented-out "real" calls — this module replaces
//! them with actual JSON-RPC request/response handling via `reqwest`.

mod jsonrpc;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{Error, Result};

pub use jsonrpc::{MCPRequest, MCPResponse, RpcError};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Configuration for one MCP server (`MCPServerConfig`).
#[derive(Debug, Clone)]
pub struct MCPServerConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    pub auth_token: Option<String>,
    pub auth_scheme: String,
    pub timeout: Duration,
    pub enabled: bool,
    pub headers: HashMap<String, String>,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl MCPServerConfig {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            auth_token: None,
            auth_scheme: "Bearer".to_string(),
            timeout: Duration::from_secs(30),
            enabled: true,
            headers: HashMap::new(),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Clone)]
struct CacheEntry {
    data: Value,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

const CACHE_TOOLS_TTL: Duration = Duration::from_secs(3600);
const CACHE_RESOURCES_TTL: Duration = Duration::from_secs(1800);
const CACHE_HEALTH_TTL: Duration = Duration::from_secs(60);

/// Client for one or more configured MCP servers.
pub struct MCPClient {
    client: reqwest::Client,
    servers: HashMap<String, MCPServerConfig>,
    next_id: AtomicI64,
    cache: DashMap<(String, String), CacheEntry>,
    capabilities: DashMap<String, Value>,
}

impl MCPClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            servers: HashMap::new(),
            next_id: AtomicI64::new(1),
            cache: DashMap::new(),
            capabilities: DashMap::new(),
        }
    }

    pub fn register_server(&mut self, config: MCPServerConfig) {
        self.servers.insert(config.id.clone(), config);
    }

    fn server(&self, server_id: &str) -> Result<&MCPServerConfig> {
        self.servers
            .get(server_id)
            .filter(|s| s.enabled)
            .ok_or_else(|| Error::MCPServerNotFound(server_id.to_string()))
    }

    fn next_request_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// `execute(serverId, method, params) -> MCPResponse` with a retry
    /// policy. RPC error responses are not retried; only transport
    /// failures are.
    pub async fn execute(&self, server_id: &str, method: &str, params: Value) -> Result<MCPResponse> {
        let server = self.server(server_id)?;
        let request = MCPRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_request_id(),
            method: method.to_string(),
            params,
        };

        log::debug!("mcp {server_id} request {method} (id {})", request.id);
        let mut last_err = None;
        for attempt in 0..server.retry_attempts {
            match self.send_once(server, &request).await {
                Ok(response) => return Ok(response),
                Err(e @ Error::MCPExecutionException { .. }) => {
                    log::warn!("mcp {server_id} request {method} rejected by server: {e}");
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("mcp {server_id} request {method} attempt {} failed: {e}", attempt + 1);
                    last_err = Some(e);
                    if attempt + 1 < server.retry_attempts {
                        tokio::time::sleep(server.retry_delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::MCPConnectionException("exhausted retries".to_string())))
    }

    async fn send_once(&self, server: &MCPServerConfig, request: &MCPRequest) -> Result<MCPResponse> {
        let mut req = self
            .client
            .post(&server.url)
            .json(request)
            .timeout(server.timeout);
        if let Some(token) = &server.auth_token {
            req = req.header("Authorization", format!("{} {}", server.auth_scheme, token));
        }
        for (k, v) in &server.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| Error::MCPConnectionException(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::MCPConnectionException(format!(
                "HTTP {}",
                resp.status()
            )));
        }
        let body: MCPResponse = resp
            .json()
            .await
            .map_err(|e| Error::MCPConnectionException(e.to_string()))?;
        if let Some(err) = &body.error {
            return Err(Error::MCPExecutionException {
                code: err.code,
                message: err.message.clone(),
            });
        }
        Ok(body)
    }

    async fn cached_list(&self, server_id: &str, capability: &str, ttl: Duration) -> Result<Value> {
        let cache_key = (server_id.to_string(), capability.to_string());
        if let Some(entry) = self.cache.get(&cache_key) {
            if !entry.is_expired() {
                log::debug!("mcp {server_id} cache hit for {capability}");
                return Ok(entry.data.clone());
            }
        }
        let response = self.execute(server_id, &format!("{capability}/list"), Value::Null).await?;
        let data = response.result.unwrap_or(Value::Null);
        self.cache.insert(
            cache_key,
            CacheEntry {
                data: data.clone(),
                created_at: Instant::now(),
                ttl,
            },
        );
        Ok(data)
    }

    pub async fn list_tools(&self, server_id: &str) -> Result<Value> {
        self.cached_list(server_id, "tools", CACHE_TOOLS_TTL).await
    }

    pub async fn list_resources(&self, server_id: &str) -> Result<Value> {
        self.cached_list(server_id, "resources", CACHE_RESOURCES_TTL).await
    }

    pub async fn list_prompts(&self, server_id: &str) -> Result<Value> {
        self.cached_list(server_id, "prompts", CACHE_RESOURCES_TTL).await
    }

    pub async fn list_samples(&self, server_id: &str) -> Result<Value> {
        self.cached_list(server_id, "samples", CACHE_RESOURCES_TTL).await
    }

    pub async fn call_tool(&self, server_id: &str, name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({"name": name, "arguments": arguments});
        let response = self.execute(server_id, "tools/call", params).await?;
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn get_prompt(&self, server_id: &str, name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({"name": name, "arguments": arguments});
        let response = self.execute(server_id, "prompts/get", params).await?;
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn health(&self, server_id: &str) -> Result<bool> {
        let cache_key = (server_id.to_string(), "health".to_string());
        if let Some(entry) = self.cache.get(&cache_key) {
            if !entry.is_expired() {
                return Ok(entry.data.as_bool().unwrap_or(false));
            }
        }
        let healthy = self.execute(server_id, "ping", Value::Null).await.is_ok();
        self.cache.insert(
            cache_key,
            CacheEntry {
                data: Value::Bool(healthy),
                created_at: Instant::now(),
                ttl: CACHE_HEALTH_TTL,
            },
        );
        Ok(healthy)
    }

    /// `initialize` handshake: advertise protocol version and capability
    /// set, record the server's returned capabilities.
    pub async fn initialize(&self, server_id: &str) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}, "samples": {}},
        });
        let response = self.execute(server_id, "initialize", params).await?;
        if let Some(result) = response.result {
            self.capabilities.insert(server_id.to_string(), result);
        }
        Ok(())
    }

    pub fn supports_capability(&self, server_id: &str, capability: &str) -> bool {
        self.capabilities
            .get(server_id)
            .map(|caps| caps.get("capabilities").and_then(|c| c.get(capability)).is_some())
            .unwrap_or(false)
    }

    /// `refreshCache(serverId)` — clears a server's cache set.
    pub fn refresh_cache(&self, server_id: &str) {
        self.cache.retain(|(sid, _), _| sid != server_id);
    }
}

impl Default for MCPClient {
    fn default() -> Self {
        Self::new()
    }
}
