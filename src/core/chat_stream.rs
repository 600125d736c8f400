use futures_util::StreamExt;
use memchr::memchr;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{ChatMessage, RecordMessage, StreamRecord};
use crate::core::providers::ProviderSession;

/// Record delimiting convention of a streamed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFraming {
    /// One JSON document per line (Ollama).
    NewlineJson,
    /// Server-sent events; JSON documents behind `data:` with a `[DONE]`
    /// terminator (OpenAI, OpenRouter, Anthropic).
    Sse,
}

/// A piece of output produced by one decoded record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFragment {
    Thinking(String),
    Content(String),
    /// A well-formed error record sent by the server mid-stream.
    Error(String),
}

/// Everything accumulated for one in-flight request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamState {
    pub content: String,
    pub thinking: String,
    pub done: bool,
}

/// Incremental decoder turning response bytes into fragments.
///
/// Bytes are buffered until a newline completes a record, so chunk boundaries
/// may fall anywhere, including inside a multi-byte character. Records that
/// fail to parse are skipped. A decoder serves a single response; once
/// [`StreamDecoder::finish`] has run it ignores further input.
pub struct StreamDecoder {
    framing: StreamFraming,
    buffer: Vec<u8>,
    state: StreamState,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(framing: StreamFraming) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            state: StreamState::default(),
            finished: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFragment> {
        let mut fragments = Vec::new();
        if self.finished {
            return fragments;
        }

        self.buffer.extend_from_slice(chunk);
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.decode_line(&line[..newline_pos], &mut fragments);
        }
        fragments
    }

    /// Flush the trailing partial line once the transport is exhausted.
    pub fn finish(&mut self) -> Vec<StreamFragment> {
        let mut fragments = Vec::new();
        if self.finished {
            return fragments;
        }
        self.finished = true;

        let rest = std::mem::take(&mut self.buffer);
        let Ok(line) = std::str::from_utf8(&rest) else {
            return fragments;
        };
        let line = line.trim();
        if line.is_empty() {
            return fragments;
        }
        if let Some(payload) = self.payload(line) {
            // Trailing garbage at end of stream is treated as whitespace.
            if let Ok(record) = serde_json::from_str::<StreamRecord>(payload) {
                self.apply(record, &mut fragments);
            }
        }
        fragments
    }

    pub fn content(&self) -> &str {
        &self.state.content
    }

    pub fn thinking(&self) -> &str {
        &self.state.thinking
    }

    pub fn is_done(&self) -> bool {
        self.state.done
    }

    fn decode_line(&mut self, raw: &[u8], fragments: &mut Vec<StreamFragment>) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(err) => {
                debug!(%err, "skipping stream line with invalid UTF-8");
                return;
            }
        };
        if line.is_empty() {
            return;
        }

        let Some(payload) = self.payload(line) else {
            return;
        };
        match serde_json::from_str::<StreamRecord>(payload) {
            Ok(record) => self.apply(record, fragments),
            Err(err) => debug!(%err, payload, "skipping undecodable stream record"),
        }
    }

    fn payload<'a>(&mut self, line: &'a str) -> Option<&'a str> {
        match self.framing {
            StreamFraming::NewlineJson => Some(line),
            StreamFraming::Sse => {
                let payload = extract_data_payload(line)?;
                if payload == "[DONE]" {
                    self.state.done = true;
                    return None;
                }
                Some(payload).filter(|payload| !payload.is_empty())
            }
        }
    }

    fn apply(&mut self, record: StreamRecord, fragments: &mut Vec<StreamFragment>) {
        if let Some(error) = record.error.as_ref() {
            fragments.push(StreamFragment::Error(error_summary(error)));
            return;
        }

        if let Some(thinking) = thinking_fragment(&record).filter(|text| !text.is_empty()) {
            self.state.thinking.push_str(thinking);
            fragments.push(StreamFragment::Thinking(thinking.to_string()));
        }
        if let Some(content) = content_fragment(&record).filter(|text| !text.is_empty()) {
            self.state.content.push_str(content);
            fragments.push(StreamFragment::Content(content.to_string()));
        }

        if record.done || record.kind.as_deref() == Some("message_stop") {
            self.state.done = true;
        }
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn message_delta(record: &StreamRecord) -> Option<&crate::api::MessageDelta> {
    match record.message.as_ref()? {
        RecordMessage::Delta(delta) => Some(delta),
        RecordMessage::Other(_) => None,
    }
}

fn thinking_fragment(record: &StreamRecord) -> Option<&str> {
    message_delta(record)
        .and_then(|delta| delta.thinking.as_deref())
        .or(record.thinking.as_deref())
        .or_else(|| {
            let delta = record.choices.first()?.delta.as_ref()?;
            delta
                .reasoning
                .as_deref()
                .or(delta.reasoning_content.as_deref())
        })
        .or_else(|| record.delta.as_ref()?.thinking.as_deref())
}

fn content_fragment(record: &StreamRecord) -> Option<&str> {
    message_delta(record)
        .and_then(|delta| delta.content.as_deref())
        .or(record.response.as_deref())
        .or_else(|| record.choices.first()?.delta.as_ref()?.content.as_deref())
        .or_else(|| record.delta.as_ref()?.text.as_deref())
}

fn error_summary(error: &Value) -> String {
    let text = match error {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// Render an error body for display in the transcript.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error: <empty response>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            if !summary.is_empty() {
                return format!("API Error: {summary}");
            }
        }
        if let Ok(compact) = serde_json::to_string(&json_value) {
            return format!("API Error: {compact}");
        }
    }

    format!("API Error: {trimmed}")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Thinking(String),
    Chunk(String),
    Error(String),
    End,
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub provider: ProviderSession,
    pub api_messages: Vec<ChatMessage>,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub stream_id: u64,
}

/// Spawns one task per request and funnels their output, tagged with the
/// stream id, into a single channel.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) -> tokio::task::JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                provider,
                api_messages,
                cancel_token,
                stream_id,
            } = params;

            tokio::select! {
                _ = run_stream(&client, &provider, api_messages, &cancel_token, &tx, stream_id) => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "stream cancelled");
                }
            }
        })
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

fn send_error(tx: &mpsc::UnboundedSender<(StreamMessage, u64)>, error: String, stream_id: u64) {
    let _ = tx.send((StreamMessage::Error(error), stream_id));
    let _ = tx.send((StreamMessage::End, stream_id));
}

/// Forward decoded fragments; returns false once an error or a cancel has
/// ended the stream. Nothing is sent after the token is cancelled, even for
/// records decoded from the same read.
fn forward(
    fragments: Vec<StreamFragment>,
    tx: &mpsc::UnboundedSender<(StreamMessage, u64)>,
    cancel_token: &tokio_util::sync::CancellationToken,
    stream_id: u64,
) -> bool {
    for fragment in fragments {
        if cancel_token.is_cancelled() {
            return false;
        }
        let message = match fragment {
            StreamFragment::Thinking(text) => StreamMessage::Thinking(text),
            StreamFragment::Content(text) => StreamMessage::Chunk(text),
            StreamFragment::Error(text) => {
                send_error(tx, format!("API Error: {text}"), stream_id);
                return false;
            }
        };
        let _ = tx.send((message, stream_id));
    }
    true
}

async fn run_stream(
    client: &reqwest::Client,
    provider: &ProviderSession,
    api_messages: Vec<ChatMessage>,
    cancel_token: &tokio_util::sync::CancellationToken,
    tx: &mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
) {
    debug!(
        stream_id,
        provider = %provider.provider_id,
        model = %provider.model,
        messages = api_messages.len(),
        "opening chat stream"
    );

    let response = match provider.chat_request(client, api_messages).send().await {
        Ok(response) => response,
        Err(e) => {
            send_error(tx, format_api_error(&e.to_string()), stream_id);
            return;
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        let error_text = if error_text.trim().is_empty() {
            status.to_string()
        } else {
            error_text
        };
        send_error(tx, format_api_error(&error_text), stream_id);
        return;
    }

    let mut decoder = StreamDecoder::new(provider.mode.framing());
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if cancel_token.is_cancelled() {
            return;
        }

        match chunk {
            Ok(bytes) => {
                if !forward(decoder.feed(&bytes), tx, cancel_token, stream_id) {
                    return;
                }
                if decoder.is_done() {
                    break;
                }
            }
            Err(e) => {
                send_error(tx, format_api_error(&e.to_string()), stream_id);
                return;
            }
        }
    }

    if cancel_token.is_cancelled() {
        return;
    }
    if !forward(decoder.finish(), tx, cancel_token, stream_id) {
        return;
    }
    debug!(
        stream_id,
        content_len = decoder.content().len(),
        thinking_len = decoder.thinking().len(),
        "chat stream complete"
    );
    let _ = tx.send((StreamMessage::End, stream_id));
}
