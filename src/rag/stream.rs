use futures_util::StreamExt;

use crate::rag::llm::ChatStream;

/// Receives the streamed answer
pub trait TokenSink: Send {
    fn token(&mut self, token: &str);
    fn done(&mut self);
}

/// Outcome of forwarding one answer stream
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamReport {
    pub forwarded: usize,
    pub dropped_duplicates: usize,
    /// Transport error that ended the stream early, if any
    pub error: Option<String>,
}

/// Forward every fragment of `stream` to `sink` once.
///
/// A fragment byte-identical to the one forwarded just before it is dropped (some
/// upstream streaming APIs repeat fragments). This can also drop a legitimate repeat
/// such as two consecutive spaces. On a transport error one `[ERROR: ...]` token is
/// sent and the stream stops; what was already forwarded stands. `done` is always
/// signalled last.
pub async fn stream_answer<S: TokenSink + ?Sized>(mut stream: ChatStream, sink: &mut S) -> StreamReport {
    let mut report = StreamReport::default();
    let mut last: Option<String> = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(token) => {
                if last.as_deref() == Some(token.as_str()) {
                    report.dropped_duplicates += 1;
                    continue;
                }
                sink.token(&token);
                report.forwarded += 1;
                last = Some(token);
            }
            Err(e) => {
                log::warn!("Answer stream failed: {}", e);
                sink.token(&format!("[ERROR: {}]", e));
                report.error = Some(e.to_string());
                break;
            }
        }
    }

    sink.done();
    report
}

/// Sink that keeps everything in memory; used by the CLI and tests
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub tokens: Vec<String>,
    pub finished: bool,
}

impl CollectingSink {
    pub fn text(&self) -> String {
        self.tokens.concat()
    }
}

impl TokenSink for CollectingSink {
    fn token(&mut self, token: &str) {
        self.tokens.push(token.to_string());
    }

    fn done(&mut self) {
        self.finished = true;
    }
}

/// Sink backed by an unbounded channel; `None` marks completion
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<Option<String>>,
}

impl ChannelSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<Option<String>>) -> Self {
        Self { sender }
    }
}

impl TokenSink for ChannelSink {
    fn token(&mut self, token: &str) {
        // receiver gone means the client hung up; nothing left to do
        let _ = self.sender.send(Some(token.to_string()));
    }

    fn done(&mut self) {
        let _ = self.sender.send(None);
    }
}
