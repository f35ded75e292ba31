//! Built-in tools: HTTP, Database, Filesystem, and MCP.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::mcp::MCPClient;

use super::{FieldSchema, FieldType, Tool, ToolSchema};

/// HTTP tool: URL, method, headers, body; returns status + body + headers.
pub struct HttpTool {
    client: reqwest::Client,
    schema: ToolSchema,
}

impl HttpTool {
    pub fn new() -> Self {
        let mut schema = ToolSchema::new();
        schema.insert("url".to_string(), FieldSchema::new(true, FieldType::String).with_max_length(2048));
        schema.insert("method".to_string(), FieldSchema::new(false, FieldType::String));
        schema.insert("headers".to_string(), FieldSchema::new(false, FieldType::Array));
        schema.insert("body".to_string(), FieldSchema::new(false, FieldType::String));
        Self {
            client: reqwest::Client::new(),
            schema,
        }
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Perform an HTTP request and return status, body, and headers."
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, input: HashMap<String, Value>) -> Result<Value> {
        let url = input
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolInputInvalid {
                field: "url".to_string(),
                reason: "missing".to_string(),
            })?;
        let method = input
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();

        let mut builder = self
            .client
            .request(method.parse().unwrap_or(reqwest::Method::GET), url);

        if let Some(Value::Array(headers)) = input.get("headers") {
            for h in headers {
                if let (Some(k), Some(v)) = (h.get("name").and_then(|v| v.as_str()), h.get("value").and_then(|v| v.as_str())) {
                    builder = builder.header(k, v);
                }
            }
        }
        if let Some(body) = input.get("body").and_then(|v| v.as_str()) {
            builder = builder.body(body.to_string());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::ToolExecutionFailed(e.to_string()))?;
        let status = resp.status().as_u16();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = resp.text().await.unwrap_or_default();

        Ok(json!({"status": status, "body": body, "headers": headers}))
    }
}

/// Database tool: parameterized query + bindings + type.
pub struct DatabaseTool {
    conn: Arc<std::sync::Mutex<rusqlite::Connection>>,
    schema: ToolSchema,
}

impl DatabaseTool {
    pub fn new(conn: Arc<std::sync::Mutex<rusqlite::Connection>>) -> Self {
        let mut schema = ToolSchema::new();
        schema.insert("query".to_string(), FieldSchema::new(true, FieldType::String).with_max_length(8192));
        schema.insert("type".to_string(), FieldSchema::new(true, FieldType::String));
        schema.insert("bindings".to_string(), FieldSchema::new(false, FieldType::Array));
        Self { conn, schema }
    }
}

#[async_trait]
impl Tool for DatabaseTool {
    fn name(&self) -> &str {
        "database"
    }

    fn description(&self) -> &str {
        "Execute a parameterized select/insert/update/delete query."
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, input: HashMap<String, Value>) -> Result<Value> {
        let query = input
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolInputInvalid {
                field: "query".to_string(),
                reason: "missing".to_string(),
            })?
            .to_string();
        let query_type = input
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("select")
            .to_lowercase();
        let bindings: Vec<Value> = input
            .get("bindings")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || run_query(&conn, &query, &query_type, &bindings))
            .await
            .map_err(|e| Error::ToolExecutionFailed(e.to_string()))?
    }
}

fn run_query(
    conn: &Arc<std::sync::Mutex<rusqlite::Connection>>,
    query: &str,
    query_type: &str,
    bindings: &[Value],
) -> Result<Value> {
    let conn = conn.lock().unwrap();
    let params: Vec<Box<dyn rusqlite::ToSql>> = bindings
        .iter()
        .map(|v| -> Box<dyn rusqlite::ToSql> {
            match v {
                Value::String(s) => Box::new(s.clone()),
                Value::Number(n) if n.is_i64() => Box::new(n.as_i64().unwrap()),
                Value::Number(n) => Box::new(n.as_f64().unwrap_or(0.0)),
                Value::Bool(b) => Box::new(*b),
                _ => Box::new(Option::<String>::None),
            }
        })
        .collect();
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();

    match query_type {
        "select" => {
            let mut stmt = conn
                .prepare(query)
                .map_err(|e| Error::ToolExecutionFailed(e.to_string()))?;
            let column_count = stmt.column_count();
            let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| {
                    let mut map = serde_json::Map::new();
                    for i in 0..column_count {
                        let value: rusqlite::types::Value = row.get(i)?;
                        map.insert(column_names[i].clone(), sqlite_value_to_json(value));
                    }
                    Ok(Value::Object(map))
                })
                .map_err(|e| Error::ToolExecutionFailed(e.to_string()))?;
            let results: std::result::Result<Vec<Value>, _> = rows.collect();
            Ok(json!({"rows": results.map_err(|e| Error::ToolExecutionFailed(e.to_string()))?}))
        }
        "insert" | "update" | "delete" => {
            let affected = conn
                .execute(query, param_refs.as_slice())
                .map_err(|e| Error::ToolExecutionFailed(e.to_string()))?;
            Ok(json!({"affected_rows": affected}))
        }
        other => Err(Error::ToolInputInvalid {
            field: "type".to_string(),
            reason: format!("unknown query type: {other}"),
        }),
    }
}

fn sqlite_value_to_json(value: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => json!(i),
        SqlValue::Real(f) => json!(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)),
    }
}

/// Filesystem tool: path + operation ∈ {read, write, append, list, exists, delete}.
pub struct FilesystemTool {
    schema: ToolSchema,
}

impl FilesystemTool {
    pub fn new() -> Self {
        let mut schema = ToolSchema::new();
        schema.insert("path".to_string(), FieldSchema::new(true, FieldType::String).with_max_length(4096));
        schema.insert("operation".to_string(), FieldSchema::new(true, FieldType::String));
        schema.insert("content".to_string(), FieldSchema::new(false, FieldType::String));
        Self { schema }
    }
}

impl Default for FilesystemTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FilesystemTool {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Read, write, append, list, check existence of, or delete a path."
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, input: HashMap<String, Value>) -> Result<Value> {
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolInputInvalid {
                field: "path".to_string(),
                reason: "missing".to_string(),
            })?
            .to_string();
        let operation = input
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("read")
            .to_lowercase();
        let content = input.get("content").and_then(|v| v.as_str()).map(|s| s.to_string());

        match operation.as_str() {
            "read" => {
                let data = tokio::fs::read_to_string(&path).await?;
                Ok(json!({"content": data}))
            }
            "write" => {
                tokio::fs::write(&path, content.unwrap_or_default()).await?;
                Ok(json!({"written": true}))
            }
            "append" => {
                use tokio::io::AsyncWriteExt;
                let mut file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&path)
                    .await?;
                file.write_all(content.unwrap_or_default().as_bytes()).await?;
                Ok(json!({"appended": true}))
            }
            "list" => {
                let mut entries = tokio::fs::read_dir(&path).await?;
                let mut names = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
                Ok(json!({"entries": names}))
            }
            "exists" => Ok(json!({"exists": tokio::fs::metadata(&path).await.is_ok()})),
            "delete" => {
                tokio::fs::remove_file(&path).await?;
                Ok(json!({"deleted": true}))
            }
            other => Err(Error::ToolInputInvalid {
                field: "operation".to_string(),
                reason: format!("unknown operation: {other}"),
            }),
        }
    }
}

/// MCP tool: delegates to C10 with server id + action + parameters.
pub struct McpTool {
    client: Arc<MCPClient>,
    schema: ToolSchema,
}

impl McpTool {
    pub fn new(client: Arc<MCPClient>) -> Self {
        let mut schema = ToolSchema::new();
        schema.insert("server_id".to_string(), FieldSchema::new(true, FieldType::String));
        schema.insert("action".to_string(), FieldSchema::new(true, FieldType::String));
        schema.insert("parameters".to_string(), FieldSchema::new(false, FieldType::Array));
        Self { client, schema }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        "mcp"
    }

    fn description(&self) -> &str {
        "Delegate an action to an external MCP server."
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, input: HashMap<String, Value>) -> Result<Value> {
        let server_id = input
            .get("server_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolInputInvalid {
                field: "server_id".to_string(),
                reason: "missing".to_string(),
            })?;
        let action = input
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ToolInputInvalid {
                field: "action".to_string(),
                reason: "missing".to_string(),
            })?;
        let parameters = input.get("parameters").cloned().unwrap_or(Value::Null);

        match action {
            "tools/list" => self.client.list_tools(server_id).await,
            "resources/list" => self.client.list_resources(server_id).await,
            "prompts/list" => self.client.list_prompts(server_id).await,
            "tools/call" => {
                let name = parameters.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                let arguments = parameters.get("arguments").cloned().unwrap_or(Value::Null);
                self.client.call_tool(server_id, name, arguments).await
            }
            other => self
                .client
                .execute(server_id, other, parameters)
                .await
                .map(|r| r.result.unwrap_or(Value::Null)),
        }
    }
}

/// Identifiers accepted for deferred-execution rehydration's whitelist.
pub const WHITELISTED_TOOL_IDS: &[&str] = &["http", "database", "filesystem", "mcp"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;

    #[tokio::test]
    async fn filesystem_write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let tool = FilesystemTool::new();

        let mut write_input = HashMap::new();
        write_input.insert("path".to_string(), json!(path.to_string_lossy()));
        write_input.insert("operation".to_string(), json!("write"));
        write_input.insert("content".to_string(), json!("hello"));
        tool.run(write_input).await.unwrap();

        let mut read_input = HashMap::new();
        read_input.insert("path".to_string(), json!(path.to_string_lossy()));
        read_input.insert("operation".to_string(), json!("read"));
        let result = tool.run(read_input).await.unwrap();
        assert_eq!(result["content"], "hello");
    }

    #[tokio::test]
    async fn database_insert_then_select() {
        let conn = Arc::new(std::sync::Mutex::new(rusqlite::Connection::open_in_memory().unwrap()));
        conn.lock()
            .unwrap()
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let tool = DatabaseTool::new(conn);

        let mut insert = HashMap::new();
        insert.insert("query".to_string(), json!("INSERT INTO t (name) VALUES (?1)"));
        insert.insert("type".to_string(), json!("insert"));
        insert.insert("bindings".to_string(), json!(["alice"]));
        tool.run(insert).await.unwrap();

        let mut select = HashMap::new();
        select.insert("query".to_string(), json!("SELECT name FROM t"));
        select.insert("type".to_string(), json!("select"));
        let result = tool.run(select).await.unwrap();
        assert_eq!(result["rows"][0]["name"], "alice");
    }
}
