use anyhow::{anyhow, Result};
use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::LLMConfig;

/// Common message structure for chat-completion requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

impl LLMMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// OpenAI-compatible streaming request body
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [LLMMessage],
    temperature: f64,
    max_tokens: u32,
    stream: bool,
    thinking: Thinking,
}

/// One `data:` payload of the upstream stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Data(String),
    Done,
}

/// Splits an SSE byte stream into `data: ` payloads. Bytes are buffered until a
/// full line arrives so multi-byte characters split across reads stay intact.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = Self::parse_line(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flushes a final line that had no trailing newline.
    pub fn finish(&mut self) -> Option<SseLine> {
        let raw = std::mem::take(&mut self.buffer);
        Self::parse_line(&raw)
    }

    fn parse_line(raw: &[u8]) -> Option<SseLine> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        let data = line.strip_prefix("data: ")?;
        if data.trim() == "[DONE]" {
            Some(SseLine::Done)
        } else {
            Some(SseLine::Data(data.to_string()))
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Parsed upstream completion stream.
pub struct ChatStream {
    inner: ByteStream,
    decoder: SseLineDecoder,
    pending: VecDeque<SseLine>,
    idle_timeout: Duration,
    finished: bool,
}

impl ChatStream {
    fn new(inner: ByteStream, idle_timeout: Duration) -> Self {
        Self {
            inner,
            decoder: SseLineDecoder::new(),
            pending: VecDeque::new(),
            idle_timeout,
            finished: false,
        }
    }

    /// Next parsed chunk; `None` after `[DONE]` or the end of the body.
    /// Payloads that are not valid JSON are skipped.
    pub async fn next_chunk(&mut self) -> Result<Option<ChatChunk>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            while let Some(line) = self.pending.pop_front() {
                match line {
                    SseLine::Done => {
                        self.finished = true;
                        return Ok(None);
                    }
                    SseLine::Data(data) => match serde_json::from_str::<ChatChunk>(&data) {
                        Ok(chunk) => return Ok(Some(chunk)),
                        Err(e) => {
                            debug!(error = %e, "Skipping unparsable upstream payload");
                        }
                    },
                }
            }

            let next = tokio::time::timeout(self.idle_timeout, self.inner.next())
                .await
                .map_err(|_| {
                    anyhow!("upstream stream idle for more than {}s", self.idle_timeout.as_secs())
                })?;

            match next {
                Some(Ok(bytes)) => self.pending.extend(self.decoder.push(&bytes)),
                Some(Err(e)) => return Err(anyhow!("upstream stream error: {}", e)),
                None => {
                    self.pending.extend(self.decoder.finish());
                    if self.pending.is_empty() {
                        self.finished = true;
                        return Ok(None);
                    }
                    // Drain the flushed line on the next pass, then stop.
                    self.pending.push_back(SseLine::Done);
                }
            }
        }
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    chat_url: String,
    timeout: Duration,
}

impl OpenAIProvider {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: config.api_key.trim().to_string(),
            chat_url: config.chat_url(),
            timeout,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn provider_name(&self) -> &'static str {
        "OpenAI-compatible"
    }

    /// Opens a streaming completion. Non-2xx responses become errors carrying the body.
    pub async fn stream_chat(
        &self,
        model: &str,
        messages: &[LLMMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<ChatStream> {
        if !self.is_configured() {
            return Err(anyhow!("AI API key is not configured"));
        }

        let request_body = ChatCompletionRequest {
            model,
            messages,
            temperature,
            max_tokens,
            stream: true,
            thinking: Thinking { kind: "disabled" },
        };

        info!(
            provider = self.provider_name(),
            model = %model,
            url = %self.chat_url,
            message_count = messages.len(),
            "Opening LLM stream"
        );

        let send = self
            .client
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| anyhow!("upstream did not respond within {}s", self.timeout.as_secs()))??;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %body,
                "LLM API request failed"
            );
            return Err(anyhow!("upstream returned {}: {}", status, truncate(&body, 1024)));
        }

        if status != reqwest::StatusCode::OK {
            warn!(status = %status, "Unexpected success status from LLM API");
        }

        Ok(ChatStream::new(Box::pin(response.bytes_stream()), self.timeout))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
