use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{RepoRagError, Result};

/// Incremental answer text, one fragment per item
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming completion seam; the HTTP client in production, scripted in tests
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one user message and stream back the reply
    async fn chat_stream(&self, prompt: &str) -> Result<ChatStream>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize, Default)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// What one complete NDJSON line means for the caller
#[derive(Debug, PartialEq)]
pub enum ChatEvent {
    Token(String),
    Done,
    Failed(String),
}

/// Splits a chunked byte stream into newline-delimited JSON records.
///
/// The trailing partial line is kept until its newline arrives. Lines that are
/// not valid JSON are dropped.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ChatEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(Self::parse_line(&line));
        }
        events
    }

    /// Flush whatever is left once the body ends without a final newline
    pub fn finish(&mut self) -> Vec<ChatEvent> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_line(&rest).into_iter().collect()
    }

    fn parse_line(raw: &[u8]) -> Option<ChatEvent> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let line: ChatLine = match serde_json::from_str(text) {
            Ok(line) => line,
            Err(e) => {
                log::debug!("Skipping malformed stream line: {}", e);
                return None;
            }
        };
        if let Some(error) = line.error {
            return Some(ChatEvent::Failed(error));
        }
        if line.done {
            return Some(ChatEvent::Done);
        }
        let content = line.message.unwrap_or_default().content;
        if content.is_empty() {
            None
        } else {
            Some(ChatEvent::Token(content))
        }
    }
}

/// Turn a raw body stream into answer fragments, ending at the first `done` or error
pub fn decode_chat_stream<S, B, E>(body: S) -> ChatStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    struct State<S> {
        body: Pin<Box<S>>,
        decoder: NdjsonDecoder,
        pending: VecDeque<ChatEvent>,
        finished: bool,
    }

    let state = State {
        body: Box::pin(body),
        decoder: NdjsonDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                match event {
                    ChatEvent::Token(token) => return Some((Ok(token), state)),
                    ChatEvent::Done => return None,
                    ChatEvent::Failed(message) => {
                        state.finished = true;
                        return Some((Err(RepoRagError::Inference(message)), state));
                    }
                }
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(RepoRagError::Inference(format!("Stream interrupted: {}", e))), state));
                }
                None => {
                    let events = state.decoder.finish();
                    if events.is_empty() {
                        return None;
                    }
                    state.pending.extend(events);
                    // the body is exhausted; drain pending then stop
                    state.pending.push_back(ChatEvent::Done);
                }
            }
        }
    });

    Box::pin(stream)
}

/// Client for the Ollama `/api/chat` endpoint in streaming mode
pub struct OllamaChat {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaChat {
    /// # Panics
    ///
    /// Panics if HTTP client cannot be created (should not happen in normal operation)
    pub fn new(base_url: &str, model: &str) -> Self {
        // no overall timeout: generation can legitimately run for minutes
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat_stream(&self, prompt: &str) -> Result<ChatStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| RepoRagError::Inference(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RepoRagError::Inference(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        Ok(decode_chat_stream(response.bytes_stream()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> + Send + 'static {
        let owned: Vec<std::result::Result<Vec<u8>, String>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    async fn collect(stream: ChatStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "qwen2.5-coder:7b",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "qwen2.5-coder:7b");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_decoder_keeps_partial_lines() {
        let mut decoder = NdjsonDecoder::default();
        let first = decoder.push(br#"{"message":{"content":"Hel"}}
{"message":{"con"#);
        assert_eq!(first, vec![ChatEvent::Token("Hel".to_string())]);

        let second = decoder.push(br#"tent":"lo"}}
{"done":true}
"#);
        assert_eq!(second, vec![ChatEvent::Token("lo".to_string()), ChatEvent::Done]);
    }

    #[test]
    fn test_decoder_skips_malformed_and_empty_lines() {
        let mut decoder = NdjsonDecoder::default();
        let events = decoder.push(b"not json\n\n{\"message\":{\"content\":\"\"}}\n{\"message\":{\"content\":\"ok\"}}\n");
        assert_eq!(events, vec![ChatEvent::Token("ok".to_string())]);
    }

    #[test]
    fn test_decoder_surfaces_error_field() {
        let mut decoder = NdjsonDecoder::default();
        let events = decoder.push(b"{\"error\":\"model not found\"}\n");
        assert_eq!(events, vec![ChatEvent::Failed("model not found".to_string())]);
    }

    #[tokio::test]
    async fn test_stream_split_across_chunks() {
        let stream = decode_chat_stream(body(&[
            "{\"message\":{\"content\":\"The \"}}\n{\"mess",
            "age\":{\"content\":\"answer\"}}\n",
            "{\"done\":true}\n{\"message\":{\"content\":\"ignored\"}}\n",
        ]));
        let tokens: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(tokens, vec!["The ", "answer"]);
    }

    #[tokio::test]
    async fn test_stream_flushes_unterminated_last_line() {
        let stream = decode_chat_stream(body(&["{\"message\":{\"content\":\"tail\"}}"]));
        let tokens: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(tokens, vec!["tail"]);
    }

    #[tokio::test]
    async fn test_stream_transport_error_ends_stream() {
        let parts: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"{\"message\":{\"content\":\"a\"}}\n".to_vec()),
            Err("connection reset".to_string()),
            Ok(b"{\"message\":{\"content\":\"b\"}}\n".to_vec()),
        ];
        let items = collect(decode_chat_stream(stream::iter(parts))).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        let err = items[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_endpoint() {
        let chat = OllamaChat::new("http://localhost:11434/", "qwen2.5-coder:7b");
        assert_eq!(chat.endpoint(), "http://localhost:11434/api/chat");
        assert_eq!(chat.model(), "qwen2.5-coder:7b");
    }
}
