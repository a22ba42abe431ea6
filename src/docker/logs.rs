//! Docker container log payload decoding.
//!
//! The logs endpoint returns either plain text (TTY containers) or a
//! multiplexed stream of frames:
//!
//! ```text
//! +--------+-----------+----------------------+----------------+
//! | stream | 0x00 x 3  | payload length (u32) | payload ...    |
//! | 1 byte | reserved  | big-endian           | length bytes   |
//! +--------+-----------+----------------------+----------------+
//! ```
//!
//! Stream tags: 0 = stdin, 1 = stdout, 2 = stderr.

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Which container stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

/// One frame of a multiplexed log body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFrame<'a> {
    pub stream: StreamKind,
    pub payload: &'a [u8],
}

/// Result of sniffing a log body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPayload {
    /// Body opens with a complete, well-formed frame.
    Multiplexed,
    /// Anything else; decoded as text unchanged.
    PlainText,
}

/// Decide how a log body is encoded.
///
/// A body is treated as multiplexed when its first frame is complete: a known
/// stream tag, three zero bytes, and a declared length that fits in the body.
pub fn classify(body: &[u8]) -> LogPayload {
    match parse_header(body) {
        Some((_, len)) if HEADER_LEN.checked_add(len).is_some_and(|end| end <= body.len()) => {
            LogPayload::Multiplexed
        }
        _ => LogPayload::PlainText,
    }
}

fn parse_header(bytes: &[u8]) -> Option<(StreamKind, usize)> {
    let header = bytes.get(..HEADER_LEN)?;
    let stream = StreamKind::from_tag(header[0])?;
    if header[1..4] != [0, 0, 0] {
        return None;
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    Some((stream, len as usize))
}

/// Iterator over the well-formed frames of a multiplexed body.
///
/// Iteration ends at the end of the body or at the first truncated or
/// malformed frame; `remainder` then holds the undecoded bytes.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    rest: &'a [u8],
}

impl<'a> Frames<'a> {
    /// Bytes not consumed by the frames yielded so far.
    pub fn remainder(&self) -> &'a [u8] {
        self.rest
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = LogFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (stream, len) = parse_header(self.rest)?;
        let end = HEADER_LEN.checked_add(len)?;
        let payload = self.rest.get(HEADER_LEN..end)?;
        self.rest = &self.rest[end..];
        Some(LogFrame { stream, payload })
    }
}

/// Walk the frames of a multiplexed body.
pub fn frames(body: &[u8]) -> Frames<'_> {
    Frames { rest: body }
}

/// Decode a log response body into text.
///
/// Multiplexed bodies yield every frame payload concatenated in wire order
/// (stdout and stderr interleaved as transmitted). Anything else is returned
/// as-is. Invalid UTF-8 is replaced rather than rejected.
pub fn decode_log_payload(body: &[u8]) -> String {
    match classify(body) {
        LogPayload::PlainText => {
            if !body.is_empty() {
                tracing::trace!(len = body.len(), "Log body is not multiplexed, decoding as plain text");
            }
            String::from_utf8_lossy(body).into_owned()
        }
        LogPayload::Multiplexed => {
            let mut iter = frames(body);
            let mut text = Vec::with_capacity(body.len());
            for frame in iter.by_ref() {
                text.extend_from_slice(frame.payload);
            }
            let dropped = iter.remainder().len();
            if dropped > 0 {
                tracing::debug!(dropped, "Discarding truncated or malformed trailing log frame");
            }
            String::from_utf8(text)
                .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}
