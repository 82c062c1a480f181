//! Incremental decoder for the `data:` frame protocol.
//!
//! Frames are separated by a blank line. Chunk boundaries carry no meaning:
//! a read may end inside the separator, inside the `data:` directive, inside
//! the JSON body or inside a multi-byte UTF-8 sequence. The decoder keeps the
//! unresolved tail and only emits a frame once its closing separator arrived,
//! or when the stream ends.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};

/// Separator between two frames.
pub const FRAME_SEPARATOR: &str = "\n\n";

/// Directive prefixing payload lines.
pub const DATA_DIRECTIVE: &str = "data:";

/// Payload of one decoded frame, directive stripped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamFrame {
    /// Raw payload text, usually a JSON document.
    pub payload: String,
}

impl StreamFrame {
    /// Build a frame from payload text.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Single-use decoder scoped to one response stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    partial_utf8: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text chunk and collect every frame it completes.
    pub fn push_str(&mut self, chunk: &str) -> Vec<StreamFrame> {
        self.buffer.push_str(chunk);
        self.drain_complete()
    }

    /// Feed a byte chunk and collect every frame it completes.
    ///
    /// A multi-byte character cut by the chunk boundary is held back until
    /// the next chunk supplies the rest of it.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.partial_utf8.extend_from_slice(chunk);
        let keep = incomplete_utf8_tail(&self.partial_utf8);
        let split = self.partial_utf8.len() - keep;
        let text = String::from_utf8_lossy(&self.partial_utf8[..split]).into_owned();
        self.partial_utf8.drain(..split);
        self.push_str(&text)
    }

    /// Number of bytes received but not yet resolved into a frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.partial_utf8.len()
    }

    /// Close the stream and decode whatever remains buffered.
    #[must_use]
    pub fn finish(mut self) -> Option<StreamFrame> {
        if !self.partial_utf8.is_empty() {
            let rest = String::from_utf8_lossy(&self.partial_utf8).into_owned();
            self.buffer.push_str(&rest);
        }
        parse_segment(&self.buffer)
    }

    fn drain_complete(&mut self) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].find(FRAME_SEPARATOR) {
            let segment = &self.buffer[consumed..consumed + offset];
            if let Some(frame) = parse_segment(segment) {
                frames.push(frame);
            }
            consumed += offset + FRAME_SEPARATOR.len();
        }

        self.buffer.drain(..consumed);
        frames
    }
}

/// Extract the payload of one frame segment.
///
/// Lines without the `data:` directive are ignored, so comments and
/// keep-alives never produce a frame. Several `data:` lines are joined with
/// a newline.
fn parse_segment(segment: &str) -> Option<StreamFrame> {
    let mut payload: Option<String> = None;

    for line in segment.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(rest) = line.strip_prefix(DATA_DIRECTIVE) else {
            continue;
        };
        let data = rest.trim_start();
        match payload.as_mut() {
            Some(joined) => {
                joined.push('\n');
                joined.push_str(data);
            }
            None => payload = Some(data.to_string()),
        }
    }

    payload
        .filter(|text| !text.trim().is_empty())
        .map(StreamFrame::new)
}

/// Length of an unfinished UTF-8 sequence at the end of `bytes`.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

struct DecodeState<S> {
    inner: S,
    decoder: Option<FrameDecoder>,
    ready: VecDeque<StreamFrame>,
}

/// Lazily decode a fallible byte stream into frames.
///
/// Frames are yielded in arrival order. The first transport error is yielded
/// as-is and ends the sequence; a clean end of the byte stream flushes the
/// decoder's tail.
pub fn decode_stream<S, B, E>(stream: S) -> impl Stream<Item = Result<StreamFrame, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        inner: stream,
        decoder: Some(FrameDecoder::new()),
        ready: VecDeque::new(),
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            let decoder = state.decoder.as_mut()?;
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    let frames = decoder.push_bytes(chunk.as_ref());
                    state.ready.extend(frames);
                }
                Some(Err(err)) => {
                    state.decoder = None;
                    return Some((Err(err), state));
                }
                None => {
                    if let Some(tail) = state.decoder.take().and_then(FrameDecoder::finish) {
                        state.ready.push_back(tail);
                    }
                }
            }
        }
    })
}
