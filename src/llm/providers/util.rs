//! Shared HTTP/streaming helpers used by every backend dialect.

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::streaming::StreamChunk;

/// POST `body` to `url` with the given bearer-style headers and timeout,
/// returning the parsed JSON body on a 2xx response or
/// `Error::ProviderRequestFailed` otherwise.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: &Value,
    timeout: Duration,
) -> Result<Value> {
    let mut req = client.post(url).json(body).timeout(timeout);
    for (k, v) in headers {
        req = req.header(*k, v);
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::ProviderRequestFailed {
            status: status.as_u16(),
            body: text,
        });
    }
    let value: Value = resp.json().await?;
    Ok(value)
}

/// Issue a streaming POST and return the raw response for line-by-line
/// consumption by a dialect-specific spawn helper.
pub async fn post_json_streaming(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: &Value,
    timeout: Duration,
) -> Result<reqwest::Response> {
    let mut req = client.post(url).json(body).timeout(timeout);
    for (k, v) in headers {
        req = req.header(*k, v);
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::ProviderRequestFailed {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(resp)
}

/// Spawn a task that reads `response`'s bytes as newline-delimited SSE
/// (`data: {...}` lines, terminal `data: [DONE]`), extracting the delta
/// content from each JSON envelope via `extract_delta`, and forwards
/// [`StreamChunk`]s on the returned receiver (streaming algorithm,
/// steps 2-4).
pub fn spawn_sse_stream(
    response: reqwest::Response,
    extract_delta: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
) -> mpsc::Receiver<Result<StreamChunk>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(next) = stream.next().await {
            let bytes = match next {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(Err(Error::Http(e))).await;
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);
                let Some(payload) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() {
                    continue;
                }
                if payload == "[DONE]" {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            content: String::new(),
                            is_final: true,
                        }))
                        .await;
                    return;
                }
                match serde_json::from_str::<Value>(payload) {
                    Ok(json) => {
                        if let Some(delta) = extract_delta(&json) {
                            if tx
                                .send(Ok(StreamChunk {
                                    content: delta,
                                    is_final: false,
                                }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(Error::Json(e))).await;
                        return;
                    }
                }
            }
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content: String::new(),
                is_final: true,
            }))
            .await;
    });
    rx
}

/// Spawn a task that reads `response`'s bytes as newline-delimited raw JSON
/// objects (Ollama's dialect), terminating when `is_done` returns true for
/// an envelope.
pub fn spawn_jsonl_stream(
    response: reqwest::Response,
    extract_delta: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    is_done: impl Fn(&Value) -> bool + Send + Sync + 'static,
) -> mpsc::Receiver<Result<StreamChunk>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(next) = stream.next().await {
            let bytes = match next {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(Err(Error::Http(e))).await;
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(json) => {
                        let done = is_done(&json);
                        if let Some(delta) = extract_delta(&json) {
                            if tx
                                .send(Ok(StreamChunk {
                                    content: delta,
                                    is_final: done,
                                }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        } else if done {
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    content: String::new(),
                                    is_final: true,
                                }))
                                .await;
                        }
                        if done {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(Error::Json(e))).await;
                        return;
                    }
                }
            }
        }
    });
    rx
}

/// A provider with no native streaming support: issue a whole-response
/// generate call and emit it as a single final chunk.
pub fn single_chunk_channel(text: String) -> mpsc::Receiver<Result<StreamChunk>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let _ = tx
            .send(Ok(StreamChunk {
                content: text,
                is_final: true,
            }))
            .await;
    });
    rx
}
