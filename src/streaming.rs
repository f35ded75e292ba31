//! Streaming envelope (C2).
//!
//! Wraps a chunk sequence with a running content accumulator, an optional
//! user callback fired as `(chunk, content_so_far)`, a `buffer_size`-gated
//! buffer-processing hook (for future cache-writeback use), and a
//! `to_response()` finalizer that drains remaining chunks into a
//! [`crate::types::Response`]. Grounded in the model crate's
//! `llms::streaming` module (`StreamChunk`/`StreamAccumulator`), generalized
//! to a richer accumulation shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::Response;

/// A single chunk of an in-flight streamed response.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub content: String,
    pub is_final: bool,
}

pub type ChunkCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type BufferHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Single-consumer wrapper over a lazy chunk sequence.
pub struct StreamingEnvelope {
    receiver: mpsc::Receiver<Result<StreamChunk>>,
    content: String,
    callback: Option<ChunkCallback>,
    buffer_hook: Option<BufferHook>,
    buffer_size: usize,
    pending_buffer: String,
    is_complete: bool,
    agent_role: String,
    tool_results: HashMap<String, Value>,
    start: Instant,
    chunks_seen: usize,
}

/// Aggregate stats exposed after reification: total content length and
/// chunk count seen so far.
#[derive(Debug, Clone, Copy)]
pub struct StreamStats {
    pub content_length: usize,
    pub chunk_count: usize,
}

impl StreamingEnvelope {
    pub fn new(receiver: mpsc::Receiver<Result<StreamChunk>>, agent_role: impl Into<String>) -> Self {
        Self {
            receiver,
            content: String::new(),
            callback: None,
            buffer_hook: None,
            buffer_size: 10,
            pending_buffer: String::new(),
            is_complete: false,
            agent_role: agent_role.into(),
            tool_results: HashMap::new(),
            start: Instant::now(),
            chunks_seen: 0,
        }
    }

    pub fn with_callback(mut self, cb: ChunkCallback) -> Self {
        self.callback = Some(cb);
        self
    }

    pub fn with_buffer_hook(mut self, hook: BufferHook) -> Self {
        self.buffer_hook = Some(hook);
        self
    }

    pub fn with_buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n.max(1);
        self
    }

    pub fn with_tool_results(mut self, results: HashMap<String, Value>) -> Self {
        self.tool_results = results;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn content_so_far(&self) -> &str {
        &self.content
    }

    /// Pull and apply the next chunk, if any. Returns `None` once the
    /// underlying sequence is exhausted.
    pub async fn next_chunk(&mut self) -> Option<Result<()>> {
        if self.is_complete {
            return None;
        }
        match self.receiver.recv().await {
            Some(Ok(chunk)) => {
                self.chunks_seen += 1;
                self.content.push_str(&chunk.content);
                self.pending_buffer.push_str(&chunk.content);
                if let Some(cb) = &self.callback {
                    cb(&chunk.content, &self.content);
                }
                if self.pending_buffer.len() >= self.buffer_size {
                    if let Some(hook) = &self.buffer_hook {
                        hook(&self.pending_buffer);
                    }
                    self.pending_buffer.clear();
                }
                if chunk.is_final {
                    self.is_complete = true;
                }
                Some(Ok(()))
            }
            Some(Err(e)) => {
                self.is_complete = true;
                Some(Err(e))
            }
            None => {
                self.is_complete = true;
                None
            }
        }
    }

    /// Drain all remaining chunks and reify into a completed `Response`.
    /// A mid-stream error truncates `content` to whatever was accumulated
    /// before the error and surfaces as this call's `Err`.
    pub async fn to_response(mut self) -> Result<Response> {
        while let Some(result) = self.next_chunk().await {
            result?;
        }
        if !self.pending_buffer.is_empty() {
            if let Some(hook) = &self.buffer_hook {
                hook(&self.pending_buffer);
            }
        }
        Ok(Response {
            content: self.content,
            agent_role: self.agent_role,
            tool_results: self.tool_results,
            execution_time: self.start.elapsed().as_secs_f64(),
        })
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            content_length: self.content.len(),
            chunk_count: self.chunks_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reifies_chunks_into_response() {
        let (tx, rx) = mpsc::channel(8);
        for (i, c) in ["a", "b", "c"].iter().enumerate() {
            let is_final = i == 2;
            tx.send(Ok(StreamChunk {
                content: c.to_string(),
                is_final,
            }))
            .await
            .unwrap();
        }
        drop(tx);

        let callback_calls = Arc::new(parking_lot::Mutex::new(0usize));
        let calls_clone = callback_calls.clone();
        let env = StreamingEnvelope::new(rx, "writer").with_callback(Arc::new(move |_c, _so_far| {
            *calls_clone.lock() += 1;
        }));

        let stats_content_len;
        {
            let response = env.to_response().await.unwrap();
            assert_eq!(response.content, "abc");
            stats_content_len = response.content.len();
        }
        assert_eq!(stats_content_len, 3);
        assert_eq!(*callback_calls.lock(), 3);
    }

    #[tokio::test]
    async fn mid_stream_error_surfaces_from_to_response() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Ok(StreamChunk {
            content: "partial".to_string(),
            is_final: false,
        }))
        .await
        .unwrap();
        tx.send(Err(crate::error::Error::ProviderRequestFailed {
            status: 500,
            body: "boom".to_string(),
        }))
        .await
        .unwrap();
        drop(tx);

        let env = StreamingEnvelope::new(rx, "writer");
        let result = env.to_response().await;
        assert!(result.is_err());
    }
}
