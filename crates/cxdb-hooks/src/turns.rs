//! Turn accumulation for the turns context.
//!
//! Events between a prompt and `orchestrator:complete` are folded into one
//! [`AccumulatedTurn`], which becomes at most two conversation items: the
//! user input and the assistant turn.
//!
//! Event payloads are loosely shaped, so they are parsed once into a
//! [`TurnSignal`] at the boundary. The accumulator itself only sees typed
//! signals.

use cxdb_core::Payload;
use cxdb_core::payload::to_map_value;
use rmpv::Value;
use serde::{Deserialize, Deserializer};
use tokio::time::Instant;

use crate::records::item;
use crate::records::item_id;

/// Maximum characters kept of a tool input summary.
pub const INPUT_SUMMARY_MAX: usize = 200;
/// Maximum characters kept of a tool result or error.
pub const RESULT_MAX: usize = 500;

/// Events that feed the accumulator.
pub const TURN_EVENTS: &[&str] = &[
    "prompt:submit",
    "content_block:end",
    "tool:pre",
    "tool:post",
    "tool:error",
    "provider:request",
    "provider:response",
    "execution:end",
];

/// Assistant turn subtree tags.
pub mod assistant {
    /// Concatenated text.
    pub const TEXT: u64 = 1;
    /// Tool call list.
    pub const TOOL_CALLS: u64 = 2;
    /// Metrics subtree.
    pub const METRICS: u64 = 3;
    /// Agent name.
    pub const AGENT: u64 = 4;
    /// Finish reason.
    pub const FINISH_REASON: u64 = 5;
}

/// Tool call entry tags.
pub mod tool_call {
    /// Call id.
    pub const ID: u64 = 1;
    /// Tool name.
    pub const NAME: u64 = 2;
    /// Input summary.
    pub const ARGS: u64 = 3;
    /// `pending`, `complete` or `error`.
    pub const STATUS: u64 = 4;
    /// Result subtree: 1 content, 2 `is_error`.
    pub const RESULT: u64 = 5;
}

/// Metrics subtree tags.
pub mod metrics {
    /// Uncached input tokens.
    pub const INPUT: u64 = 1;
    /// Output tokens.
    pub const OUTPUT: u64 = 2;
    /// All input plus output.
    pub const TOTAL: u64 = 3;
    /// Cache-read input tokens.
    pub const CACHE_READ: u64 = 4;
    /// Cache-creation input tokens.
    pub const CACHE_CREATION: u64 = 5;
    /// Input including cache reads and writes.
    pub const TOTAL_INPUT: u64 = 6;
    /// Reasoning tokens.
    pub const REASONING: u64 = 7;
    /// Provider latency.
    pub const DURATION_MS: u64 = 8;
    /// Model id.
    pub const MODEL: u64 = 9;
    /// Provider name.
    pub const PROVIDER: u64 = 10;
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion
// ─────────────────────────────────────────────────────────────────────────────

/// Content of a `content_block:end` block.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BlockContent {
    /// Bare text.
    Plain(String),
    /// Block object with its own `type` and `text`.
    Structured {
        /// Block type, if the provider sets one.
        #[serde(rename = "type", default)]
        kind: Option<String>,
        /// Block text.
        #[serde(default)]
        text: Option<String>,
    },
}

impl BlockContent {
    /// Text carried by a text block.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Plain(text) => Some(text),
            Self::Structured { kind, text } => {
                if kind.as_deref().is_none_or(|k| k == "text") {
                    text
                } else {
                    None
                }
            }
        }
    }
}

/// Token counts as reported by a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderUsage {
    /// Uncached input tokens.
    #[serde(deserialize_with = "lenient_count")]
    pub input_tokens: u64,
    /// Cache-read input tokens.
    #[serde(deserialize_with = "lenient_count")]
    pub cache_read_input_tokens: u64,
    /// Cache-creation input tokens.
    #[serde(deserialize_with = "lenient_count")]
    pub cache_creation_input_tokens: u64,
    /// Output tokens.
    #[serde(deserialize_with = "lenient_count")]
    pub output_tokens: u64,
    /// Reasoning tokens.
    #[serde(deserialize_with = "lenient_count")]
    pub reasoning_tokens: u64,
    /// Thinking tokens.
    #[serde(deserialize_with = "lenient_count")]
    pub thinking_tokens: u64,
    /// Nested completion details.
    pub completion_tokens_details: Option<CompletionTokensDetails>,
    /// Model id, when the usage block names it.
    #[serde(deserialize_with = "lenient_string")]
    pub model: Option<String>,
}

/// Nested completion token details.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompletionTokensDetails {
    /// Reasoning tokens.
    #[serde(deserialize_with = "lenient_count")]
    pub reasoning_tokens: u64,
}

impl ProviderUsage {
    /// Input including cache reads and cache writes.
    #[must_use]
    pub fn total_input(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.cache_read_input_tokens)
            .saturating_add(self.cache_creation_input_tokens)
    }

    /// First non-zero reasoning count.
    #[must_use]
    pub fn reasoning(&self) -> u64 {
        [
            self.reasoning_tokens,
            self.thinking_tokens,
            self.completion_tokens_details
                .as_ref()
                .map_or(0, |d| d.reasoning_tokens),
        ]
        .into_iter()
        .find(|&n| n > 0)
        .unwrap_or(0)
    }
}

/// Counts that are missing, null, negative or not numbers read as zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match &value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .unwrap_or_else(|| n.as_f64().filter(|f| *f > 0.0).map_or(0, |f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value.as_str().filter(|s| !s.is_empty()).map(str::to_string))
}

/// One turn-relevant event, parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnSignal {
    /// `prompt:submit`.
    PromptSubmitted(String),
    /// `tool:pre`.
    ToolStarted {
        /// Tool name.
        tool_name: String,
        /// Truncated input.
        input_summary: String,
        /// Call id, when the host supplies one.
        call_id: Option<String>,
    },
    /// `tool:post` and `tool:error`.
    ToolFinished {
        /// Tool name.
        tool_name: String,
        /// Call id, when the host supplies one.
        call_id: Option<String>,
        /// Rendered result.
        result: Option<String>,
        /// Rendered error.
        error: Option<String>,
    },
    /// `content_block:end` with a text block.
    TextBlock(String),
    /// `provider:request`.
    ProviderRequest,
    /// `provider:response`.
    ProviderResponse {
        /// Token counts; `None` when absent or empty.
        usage: Option<ProviderUsage>,
        /// Model id.
        model: Option<String>,
        /// Provider name.
        provider: Option<String>,
        /// Why generation stopped.
        finish_reason: Option<String>,
    },
    /// `execution:end`.
    ExecutionEnded,
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
    s
}

fn present<'a>(data: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    data.get(key).filter(|v| !v.is_null())
}

fn non_empty_str(data: &serde_json::Value, key: &str) -> Option<String> {
    present(data, key)
        .map(render)
        .filter(|s| !s.is_empty())
}

fn call_id(data: &serde_json::Value) -> Option<String> {
    non_empty_str(data, "tool_call_id").or_else(|| non_empty_str(data, "call_id"))
}

fn tool_name(data: &serde_json::Value) -> String {
    non_empty_str(data, "tool_name").unwrap_or_else(|| "unknown".to_string())
}

impl TurnSignal {
    /// Parse a turn-relevant event. `None` for other events and for events
    /// that carry nothing usable.
    #[must_use]
    pub fn from_event(event: &str, data: &serde_json::Value) -> Option<Self> {
        match event {
            "prompt:submit" => present(data, "prompt").map(|p| Self::PromptSubmitted(render(p))),
            "tool:pre" => Some(Self::ToolStarted {
                tool_name: tool_name(data),
                input_summary: truncate(
                    present(data, "tool_input").map_or_else(|| "{}".to_string(), render),
                    INPUT_SUMMARY_MAX,
                ),
                call_id: call_id(data),
            }),
            "tool:post" => Some(Self::ToolFinished {
                tool_name: tool_name(data),
                call_id: call_id(data),
                result: present(data, "result").map(|r| truncate(render(r), RESULT_MAX)),
                error: present(data, "error").map(|e| truncate(render(e), RESULT_MAX)),
            }),
            "tool:error" => Some(Self::ToolFinished {
                tool_name: tool_name(data),
                call_id: call_id(data),
                result: None,
                error: Some(truncate(
                    present(data, "error")
                        .or_else(|| present(data, "message"))
                        .map_or_else(|| "tool error".to_string(), render),
                    RESULT_MAX,
                )),
            }),
            "content_block:end" => {
                if data.get("block_type").and_then(serde_json::Value::as_str) != Some("text") {
                    return None;
                }
                let block = BlockContent::deserialize(present(data, "block")?).ok()?;
                block.into_text().map(Self::TextBlock)
            }
            "provider:request" => Some(Self::ProviderRequest),
            "provider:response" => Some(Self::ProviderResponse {
                usage: present(data, "usage")
                    .filter(|u| u.as_object().is_some_and(|o| !o.is_empty()))
                    .and_then(|u| ProviderUsage::deserialize(u).ok()),
                model: non_empty_str(data, "model"),
                provider: non_empty_str(data, "provider"),
                finish_reason: non_empty_str(data, "finish_reason")
                    .or_else(|| non_empty_str(data, "stop_reason")),
            }),
            "execution:end" => Some(Self::ExecutionEnded),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accumulated state
// ─────────────────────────────────────────────────────────────────────────────

/// One tool invocation within a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCallRecord {
    /// Tool name.
    pub tool_name: String,
    /// Input, at most [`INPUT_SUMMARY_MAX`] chars.
    pub input_summary: String,
    /// Host call id.
    pub call_id: Option<String>,
    /// Result, at most [`RESULT_MAX`] chars.
    pub result: Option<String>,
    /// Error, at most [`RESULT_MAX`] chars.
    pub error: Option<String>,
    /// Whether a finish was matched to this call.
    pub has_result: bool,
}

impl ToolCallRecord {
    fn status(&self) -> &'static str {
        if !self.has_result {
            "pending"
        } else if self.error.is_some() {
            "error"
        } else {
            "complete"
        }
    }

    fn to_value(&self) -> Value {
        let mut tc = Payload::new();
        if let Some(id) = &self.call_id {
            let _ = tc.insert(tool_call::ID, Value::from(id.as_str()));
        }
        let _ = tc.insert(tool_call::NAME, Value::from(self.tool_name.as_str()));
        let _ = tc.insert(tool_call::ARGS, Value::from(self.input_summary.as_str()));
        let _ = tc.insert(tool_call::STATUS, Value::from(self.status()));
        let detail = match (&self.error, &self.result) {
            (Some(err), _) => Some((err, true)),
            (None, Some(res)) => Some((res, false)),
            (None, None) => None,
        };
        if let Some((content, is_error)) = detail {
            let _ = tc.insert(
                tool_call::RESULT,
                Value::Map(vec![
                    (Value::from(1u64), Value::from(content.as_str())),
                    (Value::from(2u64), Value::from(is_error)),
                ]),
            );
        }
        to_map_value(&tc)
    }
}

/// Usage and latency of the last provider response in a turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnMetrics {
    /// Uncached input tokens.
    pub input_tokens: u64,
    /// Cache-read input tokens.
    pub cache_read_tokens: u64,
    /// Cache-creation input tokens.
    pub cache_creation_tokens: u64,
    /// Input including cache reads and writes.
    pub total_input_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// `total_input_tokens + output_tokens`.
    pub total_tokens: u64,
    /// Reasoning tokens.
    pub reasoning_tokens: u64,
    /// Model id; empty when unknown.
    pub model: String,
    /// Provider name; empty when unknown.
    pub provider: String,
    /// Time since the matching `provider:request`.
    pub duration_ms: Option<u64>,
}

impl TurnMetrics {
    fn from_usage(usage: &ProviderUsage, model: Option<String>, provider: Option<String>) -> Self {
        let total_input = usage.total_input();
        Self {
            input_tokens: usage.input_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens,
            total_input_tokens: total_input,
            output_tokens: usage.output_tokens,
            total_tokens: total_input.saturating_add(usage.output_tokens),
            reasoning_tokens: usage.reasoning(),
            model: model.or_else(|| usage.model.clone()).unwrap_or_default(),
            provider: provider.unwrap_or_default(),
            duration_ms: None,
        }
    }

    fn to_value(&self) -> Value {
        let mut m = Payload::new();
        let _ = m.insert(metrics::INPUT, Value::from(self.input_tokens));
        let _ = m.insert(metrics::OUTPUT, Value::from(self.output_tokens));
        let _ = m.insert(metrics::TOTAL, Value::from(self.total_tokens));
        let _ = m.insert(metrics::CACHE_READ, Value::from(self.cache_read_tokens));
        let _ = m.insert(metrics::CACHE_CREATION, Value::from(self.cache_creation_tokens));
        let _ = m.insert(metrics::TOTAL_INPUT, Value::from(self.total_input_tokens));
        let _ = m.insert(metrics::REASONING, Value::from(self.reasoning_tokens));
        if let Some(ms) = self.duration_ms {
            let _ = m.insert(metrics::DURATION_MS, Value::from(ms));
        }
        if !self.model.is_empty() {
            let _ = m.insert(metrics::MODEL, Value::from(self.model.as_str()));
        }
        if !self.provider.is_empty() {
            let _ = m.insert(metrics::PROVIDER, Value::from(self.provider.as_str()));
        }
        to_map_value(&m)
    }
}

/// Everything gathered for one prompt → response exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccumulatedTurn {
    /// Submitted prompt.
    pub user_prompt: Option<String>,
    /// Assistant text blocks in arrival order.
    pub text_blocks: Vec<String>,
    /// Tool calls in start order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Metrics of the last provider response.
    pub metrics: Option<TurnMetrics>,
    /// Agent that ran the turn.
    pub agent_name: Option<String>,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
}

impl AccumulatedTurn {
    fn has_data(&self) -> bool {
        self.user_prompt.is_some() || !self.text_blocks.is_empty() || !self.tool_calls.is_empty()
    }

    /// Conversation items for this turn: user input (if prompted) then
    /// assistant turn (if any text or tool call).
    #[must_use]
    pub fn to_records(&self, session_id: &str, ts_ms: i64) -> Vec<Payload> {
        let mut out = Vec::with_capacity(2);

        if let Some(prompt) = &self.user_prompt {
            let mut rec = header("user_input", session_id, ts_ms);
            let _ = rec.insert(
                item::USER_INPUT,
                Value::Map(vec![(Value::from(1u64), Value::from(prompt.as_str()))]),
            );
            out.push(rec);
        }

        if !self.text_blocks.is_empty() || !self.tool_calls.is_empty() {
            let mut turn = Payload::new();
            let text = self.text_blocks.concat();
            if !text.is_empty() {
                let _ = turn.insert(assistant::TEXT, Value::from(text));
            }
            if !self.tool_calls.is_empty() {
                let _ = turn.insert(
                    assistant::TOOL_CALLS,
                    Value::Array(self.tool_calls.iter().map(ToolCallRecord::to_value).collect()),
                );
            }
            if let Some(m) = &self.metrics {
                let _ = turn.insert(assistant::METRICS, m.to_value());
            }
            if let Some(agent) = &self.agent_name {
                let _ = turn.insert(assistant::AGENT, Value::from(agent.as_str()));
            }
            if let Some(reason) = &self.finish_reason {
                let _ = turn.insert(assistant::FINISH_REASON, Value::from(reason.as_str()));
            }
            let mut rec = header("assistant_turn", session_id, ts_ms);
            let _ = rec.insert(item::ASSISTANT_TURN, to_map_value(&turn));
            out.push(rec);
        }

        out
    }
}

fn header(item_type: &str, session_id: &str, ts_ms: i64) -> Payload {
    let mut rec = Payload::new();
    let _ = rec.insert(item::ITEM_TYPE, Value::from(item_type));
    let _ = rec.insert(item::STATUS, Value::from("complete"));
    let _ = rec.insert(item::TIMESTAMP, Value::from(ts_ms));
    let _ = rec.insert(item::ID, Value::from(item_id(session_id, item_type, ts_ms)));
    rec
}

// ─────────────────────────────────────────────────────────────────────────────
// Accumulator
// ─────────────────────────────────────────────────────────────────────────────

/// Buffers one exchange until it is flushed.
#[derive(Debug)]
pub struct TurnAccumulator {
    agent_name: Option<String>,
    current: AccumulatedTurn,
    execution_ended: bool,
    request_started: Option<Instant>,
}

impl TurnAccumulator {
    /// Empty accumulator; flushed turns are attributed to `agent_name`.
    #[must_use]
    pub fn new(agent_name: Option<String>) -> Self {
        Self {
            agent_name,
            current: AccumulatedTurn::default(),
            execution_ended: false,
            request_started: None,
        }
    }

    /// Whether `event` feeds the accumulator.
    #[must_use]
    pub fn is_turn_event(event: &str) -> bool {
        TURN_EVENTS.contains(&event)
    }

    /// Parse and apply a turn event. Returns whether it changed anything.
    pub fn on_event(&mut self, event: &str, data: &serde_json::Value) -> bool {
        match TurnSignal::from_event(event, data) {
            Some(signal) => {
                self.apply(signal);
                true
            }
            None => false,
        }
    }

    /// Apply one parsed signal.
    pub fn apply(&mut self, signal: TurnSignal) {
        match signal {
            TurnSignal::PromptSubmitted(prompt) => {
                self.current.user_prompt = Some(prompt);
                self.execution_ended = false;
            }
            TurnSignal::ToolStarted {
                tool_name,
                input_summary,
                call_id,
            } => self.current.tool_calls.push(ToolCallRecord {
                tool_name,
                input_summary,
                call_id,
                result: None,
                error: None,
                has_result: false,
            }),
            TurnSignal::ToolFinished {
                tool_name,
                call_id,
                result,
                error,
            } => {
                let open = self.current.tool_calls.iter_mut().rev().filter(|r| !r.has_result);
                let record = match &call_id {
                    Some(id) => open.into_iter().find(|r| r.call_id.as_ref() == Some(id)),
                    None => open.into_iter().find(|r| r.tool_name == tool_name),
                };
                if let Some(record) = record {
                    record.has_result = true;
                    record.result = result;
                    record.error = error;
                }
            }
            TurnSignal::TextBlock(text) => self.current.text_blocks.push(text),
            TurnSignal::ProviderRequest => self.request_started = Some(Instant::now()),
            TurnSignal::ProviderResponse {
                usage,
                model,
                provider,
                finish_reason,
            } => {
                if finish_reason.is_some() {
                    self.current.finish_reason = finish_reason;
                }
                if let Some(usage) = usage {
                    let mut m = TurnMetrics::from_usage(&usage, model, provider);
                    if let Some(start) = self.request_started.take() {
                        m.duration_ms =
                            Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX));
                    }
                    self.current.metrics = Some(m);
                }
            }
            TurnSignal::ExecutionEnded => self.execution_ended = true,
        }
    }

    /// Whether `event` is late `llm:*` output after execution ended.
    #[must_use]
    pub fn is_straggler(&self, event: &str) -> bool {
        self.execution_ended && event.starts_with("llm:")
    }

    /// The turn in progress, for inspection.
    #[must_use]
    pub fn current(&self) -> &AccumulatedTurn {
        &self.current
    }

    /// Take the accumulated turn and reset. `None` when nothing was
    /// prompted, said or called.
    pub fn flush(&mut self) -> Option<AccumulatedTurn> {
        let mut turn = std::mem::take(&mut self.current);
        self.execution_ended = false;
        self.request_started = None;
        if !turn.has_data() {
            return None;
        }
        turn.agent_name.clone_from(&self.agent_name);
        Some(turn)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
