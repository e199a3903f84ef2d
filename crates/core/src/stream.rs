//! Streaming primitives: deltas, the per-call accumulator, and the channel
//! that carries deltas and the terminal result to the caller.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::provider::CompletionResult;

/// One incremental text fragment plus the reply so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDelta {
    pub fragment: String,
    pub accumulated: String,
}

/// Running concatenation of the fragments seen by one call.
#[derive(Debug, Default, Clone)]
pub struct Accumulator {
    text: String,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an incremental fragment. Empty fragments produce no delta.
    pub fn append(&mut self, fragment: &str) -> Option<StreamDelta> {
        if fragment.is_empty() {
            return None;
        }
        self.text.push_str(fragment);
        Some(self.delta(fragment))
    }

    /// Merge a payload that may be either incremental or cumulative.
    ///
    /// - payload extends the accumulator: take it, emit only the new suffix
    /// - payload is a prefix of the accumulator: stale, ignored
    /// - anything else: appended verbatim
    pub fn merge(&mut self, payload: &str) -> Option<StreamDelta> {
        if payload.is_empty() {
            return None;
        }
        if let Some(suffix) = payload.strip_prefix(self.text.as_str()) {
            if suffix.is_empty() {
                return None;
            }
            let suffix = suffix.to_string();
            self.text = payload.to_string();
            return Some(self.delta(&suffix));
        }
        if self.text.starts_with(payload) {
            return None;
        }
        self.append(payload)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }

    fn delta(&self, fragment: &str) -> StreamDelta {
        StreamDelta {
            fragment: fragment.to_string(),
            accumulated: self.text.clone(),
        }
    }
}

/// Items a caller pulls from a streaming call: any number of deltas, then
/// exactly one `Done`.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Delta(StreamDelta),
    Done(CompletionResult),
}

/// Producer side of the delta channel handed to providers.
///
/// A disabled sink drops every delta, which is how non-streaming callers
/// use the same code path.
#[derive(Debug, Clone, Default)]
pub struct DeltaSink {
    tx: Option<mpsc::Sender<ChatEvent>>,
}

impl DeltaSink {
    pub fn new(tx: mpsc::Sender<ChatEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sink plus the receiver the caller drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Forward a delta. Waits for channel capacity; a dropped receiver is ignored.
    pub async fn emit(&self, delta: StreamDelta) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ChatEvent::Delta(delta)).await;
        }
    }

    /// Forward the terminal result. Nothing may be emitted afterwards.
    pub async fn finish(self, result: CompletionResult) {
        if let Some(tx) = self.tx {
            let _ = tx.send(ChatEvent::Done(result)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Completion;

    #[test]
    fn append_grows_monotonically() {
        let mut acc = Accumulator::new();
        let mut last_len = 0;
        for fragment in ["Hel", "", "lo", " there"] {
            if let Some(delta) = acc.append(fragment) {
                assert!(delta.accumulated.len() >= last_len);
                assert!(delta.accumulated.ends_with(&delta.fragment));
                last_len = delta.accumulated.len();
            }
        }
        assert_eq!(acc.as_str(), "Hello there");
    }

    #[test]
    fn merge_cumulative_payload_emits_suffix() {
        let mut acc = Accumulator::new();
        assert_eq!(acc.merge("A").unwrap().fragment, "A");
        let delta = acc.merge("AB").unwrap();
        assert_eq!(delta.fragment, "B");
        assert_eq!(delta.accumulated, "AB");
    }

    #[test]
    fn merge_same_payload_twice_is_idempotent() {
        let mut acc = Accumulator::new();
        acc.merge("Hello wor");
        assert!(acc.merge("Hello wor").is_none());
        assert_eq!(acc.as_str(), "Hello wor");
    }

    #[test]
    fn merge_ignores_stale_prefix() {
        let mut acc = Accumulator::new();
        acc.merge("Hello world");
        assert!(acc.merge("Hello").is_none());
        assert_eq!(acc.as_str(), "Hello world");
    }

    #[test]
    fn merge_appends_independent_fragment() {
        let mut acc = Accumulator::new();
        acc.merge("Hello");
        let delta = acc.merge(" world").unwrap();
        assert_eq!(delta.fragment, " world");
        assert_eq!(delta.accumulated, "Hello world");
    }

    #[tokio::test]
    async fn sink_preserves_order_and_terminal_last() {
        let (sink, mut rx) = DeltaSink::channel(8);
        let mut acc = Accumulator::new();
        for fragment in ["a", "b"] {
            sink.emit(acc.append(fragment).unwrap()).await;
        }
        sink.finish(Ok(Completion::new(acc.into_text()))).await;

        let mut fragments = Vec::new();
        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Delta(d) => {
                    assert!(terminal.is_none(), "delta after terminal result");
                    fragments.push(d.fragment);
                }
                ChatEvent::Done(result) => terminal = Some(result),
            }
        }
        assert_eq!(fragments, vec!["a", "b"]);
        assert_eq!(terminal.unwrap().unwrap().text, "ab");
    }

    #[tokio::test]
    async fn disabled_sink_drops_everything() {
        let sink = DeltaSink::disabled();
        assert!(!sink.is_enabled());
        sink.emit(StreamDelta {
            fragment: "x".into(),
            accumulated: "x".into(),
        })
        .await;
    }
}
