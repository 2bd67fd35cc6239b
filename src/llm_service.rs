use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::LLMConfig;
use crate::database::Database;
use crate::errors::{ApiError, ServiceResult};
use crate::llm_providers::{LLMMessage, OpenAIProvider};
use crate::models::ChatRequest;
use crate::log_llm_operation;

pub const SYSTEM_PROMPT: &str = "You are a patient study assistant inside a mistake notebook. \
Help students understand questions they got wrong: explain the underlying concepts, walk through \
the solution step by step and point out the common traps. Only answer questions about studying \
and coursework; politely decline anything else. Use Markdown for structure and LaTeX for formulas.";

/// Stored records replayed ahead of each new message.
pub const HISTORY_CONTEXT: i64 = 6;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const MISSING_KEY_MESSAGE: &str = "AI API key is not configured, please contact the administrator";

const RELAY_BUFFER: usize = 64;

/// Persistence used by the relay for the conversation transcript.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// The `count` most recent turns, oldest first.
    async fn recent_turns(&self, user_id: i64, count: i64) -> Result<Vec<LLMMessage>>;

    async fn append_turn(&self, user_id: i64, role: &str, content: &str, model: Option<&str>) -> Result<()>;
}

#[async_trait]
impl TranscriptStore for Database {
    async fn recent_turns(&self, user_id: i64, count: i64) -> Result<Vec<LLMMessage>> {
        let records = self.recent_chat_records(user_id, count).await?;
        Ok(records
            .into_iter()
            .map(|record| LLMMessage::new(&record.role, record.content))
            .collect())
    }

    async fn append_turn(&self, user_id: i64, role: &str, content: &str, model: Option<&str>) -> Result<()> {
        self.insert_chat_record(user_id, role, content, model).await?;
        Ok(())
    }
}

/// One event on the browser-facing stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected,
    Delta(String),
    Finished { full_content: String },
    Error(String),
    Done,
}

impl RelayEvent {
    /// The text that follows `data: ` for this event.
    pub fn payload(&self) -> String {
        match self {
            RelayEvent::Connected => json!({ "status": "connected" }).to_string(),
            RelayEvent::Delta(content) => json!({ "content": content, "done": false }).to_string(),
            RelayEvent::Finished { full_content } => {
                json!({ "content": "", "done": true, "full_content": full_content }).to_string()
            }
            RelayEvent::Error(message) => json!({ "error": message }).to_string(),
            RelayEvent::Done => "[DONE]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSettings {
    pub model: String,
    pub max_tokens: u32,
    pub supports_images: bool,
    pub streaming: bool,
}

/// Parameters of one relayed exchange.
#[derive(Debug, Clone)]
struct ChatTurn {
    user_id: i64,
    model: String,
    temperature: f64,
    max_tokens: u32,
    messages: Vec<LLMMessage>,
}

#[derive(Debug, PartialEq)]
enum RelayEnd {
    Stop,
    UpstreamEnded,
    ClientGone,
    Failed(String),
}

#[derive(Clone)]
pub struct LLMService {
    provider: OpenAIProvider,
    store: Arc<dyn TranscriptStore>,
    default_model: String,
    default_max_tokens: u32,
}

impl LLMService {
    pub fn new(config: &LLMConfig, store: Arc<dyn TranscriptStore>) -> Result<Self> {
        Ok(Self {
            provider: OpenAIProvider::new(config)?,
            store,
            default_model: config.model.clone(),
            default_max_tokens: config.max_tokens,
        })
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            model: self.default_model.clone(),
            max_tokens: self.default_max_tokens,
            supports_images: false,
            streaming: true,
        }
    }

    /// Validates the request, records the user turn and spawns the relay.
    /// The transcript is saved by the relay task, so it survives the receiver being dropped.
    pub async fn start_chat(&self, user_id: i64, request: ChatRequest) -> ServiceResult<mpsc::Receiver<RelayEvent>> {
        let message = request.message.as_deref().unwrap_or_default().trim().to_string();
        if message.is_empty() {
            return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
        }
        if !self.provider.is_configured() {
            return Err(ApiError::LLMError(MISSING_KEY_MESSAGE.to_string()));
        }

        let model = request
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone());

        let history = match self.store.recent_turns(user_id, HISTORY_CONTEXT).await {
            Ok(history) => history,
            Err(e) => {
                log_llm_operation!(warn, "load_history", format!("continuing without history: {}", e));
                Vec::new()
            }
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(LLMMessage::new("system", SYSTEM_PROMPT));
        messages.extend(history);
        messages.push(LLMMessage::new("user", message.clone()));

        if let Err(e) = self.store.append_turn(user_id, "user", &message, None).await {
            log_llm_operation!(warn, "save_user_turn", e);
        }

        let turn = ChatTurn {
            user_id,
            model,
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            messages,
        };

        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        let provider = self.provider.clone();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            relay(provider, store, turn, tx).await;
        });
        Ok(rx)
    }
}

async fn relay(
    provider: OpenAIProvider,
    store: Arc<dyn TranscriptStore>,
    turn: ChatTurn,
    tx: mpsc::Sender<RelayEvent>,
) {
    let started = Instant::now();
    log_llm_operation!(start, "chat_stream", model = turn.model, user_id = turn.user_id);

    let mut reply = String::new();
    let end = if tx.send(RelayEvent::Connected).await.is_err() {
        RelayEnd::ClientGone
    } else {
        pump(&provider, &turn, &tx, &mut reply).await
    };

    let transcript = match &end {
        RelayEnd::Stop => {
            let _ = tx
                .send(RelayEvent::Finished {
                    full_content: reply.clone(),
                })
                .await;
            reply
        }
        RelayEnd::UpstreamEnded => reply,
        RelayEnd::ClientGone => {
            log_llm_operation!(warn, "chat_stream", format!("client disconnected after {} chars", reply.chars().count()));
            reply
        }
        RelayEnd::Failed(message) => {
            log_llm_operation!(error, "chat_stream", model = turn.model, error = message);
            let _ = tx.send(RelayEvent::Error(message.clone())).await;
            if reply.trim().is_empty() {
                reply
            } else {
                format!("{}\n\n[Error: {}]", reply, message)
            }
        }
    };

    let saved = transcript.trim();
    if !saved.is_empty() {
        match store.append_turn(turn.user_id, "assistant", saved, Some(&turn.model)).await {
            Ok(()) => {
                log_llm_operation!(
                    success,
                    "chat_stream",
                    model = turn.model,
                    duration_ms = started.elapsed().as_millis() as u64,
                    chars = saved.chars().count()
                );
            }
            Err(e) => {
                log_llm_operation!(error, "save_reply", model = turn.model, error = e);
            }
        }
    } else {
        debug!(user_id = turn.user_id, ?end, "No assistant reply to save");
    }

    let _ = tx.send(RelayEvent::Done).await;
}

/// Forwards upstream deltas until the stream stops, fails, or the client leaves.
/// Dropping the upstream stream on return closes the upstream request.
async fn pump(
    provider: &OpenAIProvider,
    turn: &ChatTurn,
    tx: &mpsc::Sender<RelayEvent>,
    reply: &mut String,
) -> RelayEnd {
    let open = provider.stream_chat(&turn.model, &turn.messages, turn.temperature, turn.max_tokens);
    let mut stream = tokio::select! {
        _ = tx.closed() => return RelayEnd::ClientGone,
        opened = open => match opened {
            Ok(stream) => stream,
            Err(e) => return RelayEnd::Failed(e.to_string()),
        },
    };

    loop {
        let next = tokio::select! {
            _ = tx.closed() => return RelayEnd::ClientGone,
            next = stream.next_chunk() => next,
        };

        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return RelayEnd::UpstreamEnded,
            Err(e) => return RelayEnd::Failed(e.to_string()),
        };

        // Only choices[0] belongs to the reply.
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            reply.push_str(&content);
            if tx.send(RelayEvent::Delta(content)).await.is_err() {
                return RelayEnd::ClientGone;
            }
        }
        if choice.finish_reason.as_deref() == Some("stop") {
            return RelayEnd::Stop;
        }
    }
}
