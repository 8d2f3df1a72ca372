//! SSE frame encoding and incremental decoding.
//!
//! A frame is written as `event: <kind>\ndata: <payload>\n\n`, with one
//! `data:` line per payload line. Keepalive frames are SSE comments
//! (`: keepalive\n\n`), which `EventSource` clients silently skip.

use std::fmt;

/// Kind of a pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Carries the per-session submission URL.
    Endpoint,
    /// Carries one serialized JSON-RPC message.
    Message,
    /// No-op frame that keeps intermediaries from timing out the stream.
    Keepalive,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Endpoint => "endpoint",
            FrameKind::Message => "message",
            FrameKind::Keepalive => "keepalive",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "endpoint" => Some(FrameKind::Endpoint),
            "message" => Some(FrameKind::Message),
            "keepalive" => Some(FrameKind::Keepalive),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete pushed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: String,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn endpoint(url: impl Into<String>) -> Self {
        Self::new(FrameKind::Endpoint, url)
    }

    pub fn message(payload: impl Into<String>) -> Self {
        Self::new(FrameKind::Message, payload)
    }

    pub fn keepalive() -> Self {
        Self::new(FrameKind::Keepalive, "keepalive")
    }

    /// Encode the frame in SSE wire format.
    pub fn encode(&self) -> String {
        if self.kind == FrameKind::Keepalive {
            return format!(": {}\n\n", self.payload);
        }
        let mut out = format!("event: {}\n", self.kind);
        for line in self.payload.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Incremental SSE decoder.
///
/// Bytes may arrive split at arbitrary points; complete frames are returned
/// as soon as their terminating blank line has been seen. Events with a name
/// outside [`FrameKind`] are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&block[..end]);
            if let Some(frame) = parse_block(&text) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_block(block: &str) -> Option<Frame> {
    let mut event: Option<&str> = None;
    let mut data: Vec<&str> = Vec::new();
    let mut comment: Option<&str> = None;

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix(':') {
            comment.get_or_insert(rest.trim());
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return comment.map(|text| Frame::new(FrameKind::Keepalive, text));
    }

    let kind = match event {
        Some(name) => FrameKind::from_name(name)?,
        None => FrameKind::Message,
    };
    Some(Frame::new(kind, data.join("\n")))
}
