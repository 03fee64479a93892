//! Client-side reassembly of frames from arbitrarily chunked bytes.

use crate::codec::decode_line;
use crate::protocol::NormalizedEvent;
use futures::{Stream, StreamExt};

/// Incremental UTF-8 decoder. A character split across chunks is held back
/// until the rest of its bytes arrive; invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Splits decoded text into lines and hands every complete line to the
/// frame decoder. The trailing partial line waits for the next chunk.
#[derive(Debug, Default)]
pub struct FrameParser {
    decoder: Utf8Decoder,
    buffer: String,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<NormalizedEvent> {
        let text = self.decoder.decode(chunk);
        self.buffer.push_str(&text);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let complete: String = self.buffer.drain(..=last_newline).collect();
        complete.split('\n').filter_map(decode_line).collect()
    }

    /// End of input. Whatever is still buffered cannot be a complete frame.
    pub fn finish(self) {
        if !self.buffer.is_empty() || self.decoder.has_pending() {
            tracing::debug!(
                buffered = self.buffer.len(),
                "discarding unterminated data at end of stream"
            );
        }
    }
}

/// Decode a byte stream into events. A transport error is yielded once and
/// ends the sequence.
pub fn decode_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<NormalizedEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut parser = FrameParser::new();
        futures::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in parser.push(chunk.as_ref()) {
                        yield Ok(event);
                    }
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
        parser.finish();
    }
}
