//! Incremental line framing shared by the two HTTP streaming clients.

use futures::StreamExt;
use shimeji_core::{Accumulator, DeltaSink, ProviderError};
use tracing::trace;

use crate::taxonomy::classify_transport;

/// Splits a byte stream on `\n`.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed bytes, returning every line completed by them (trimmed).
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&raw[..pos]).trim().to_string());
        }
        lines
    }

    /// The unterminated tail left when the stream ends.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let tail = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!tail.is_empty()).then_some(tail)
    }
}

/// What one protocol line contributes to the reply.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ParsedLine {
    pub fragment: Option<String>,
    /// The producer signalled end of stream on this line
    pub done: bool,
}

/// Line parser: `None` means the line carries nothing and is skipped.
pub(crate) type LineParser = fn(&str) -> Option<ParsedLine>;

/// Read a streaming response to its end, feeding every line through
/// `parse` and forwarding fragments to `sink`.
///
/// Returns the accumulator when the body ends or a line signals `done`.
pub(crate) async fn drain_lines(
    response: reqwest::Response,
    endpoint: &str,
    provider: &str,
    parse: LineParser,
    sink: &DeltaSink,
) -> Result<Accumulator, ProviderError> {
    let mut body = response.bytes_stream();
    let mut buffer = LineBuffer::default();
    let mut acc = Accumulator::new();

    while let Some(chunk) = body.next().await {
        let bytes = chunk.map_err(|e| classify_transport(&e, endpoint))?;
        for line in buffer.push(&bytes) {
            if apply_line(&line, provider, parse, &mut acc, sink).await {
                return Ok(acc);
            }
        }
    }

    if let Some(line) = buffer.finish() {
        apply_line(&line, provider, parse, &mut acc, sink).await;
    }
    Ok(acc)
}

async fn apply_line(
    line: &str,
    provider: &str,
    parse: LineParser,
    acc: &mut Accumulator,
    sink: &DeltaSink,
) -> bool {
    if line.is_empty() {
        return false;
    }
    let Some(parsed) = parse(line) else {
        trace!(provider, line, "Skipping stream line");
        return false;
    };
    if let Some(delta) = parsed.fragment.as_deref().and_then(|f| acc.append(f)) {
        sink.emit(delta).await;
    }
    parsed.done
}
