//! STOMP wire codec.
//!
//! # Grammar
//! ```text
//! frame     = COMMAND EOL *(header EOL) EOL [body] NUL *EOL
//! heartbeat = EOL
//! EOL       = "\n" / "\r\n"
//! ```
//!
//! # Design Decisions
//! - One parser over `&[u8]`; the text variant decodes `str::as_bytes()`
//! - Body length comes from `content-length` when present, otherwise the
//!   body runs to the first NUL
//! - Leading EOLs before a command are skipped, trailing EOLs after NUL are
//!   tolerated
//! - Decoded frames go through `FrameBuilder`, so invalid frames are rejected
//!   exactly like frames built in code

use bytes::{BufMut, Bytes, BytesMut};

use super::command::Command;
use super::frame::{Frame, FrameBuilder};
use super::headers::Headers;

/// Default capacity of the binary encode/decode buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// Grammar violation found while decoding. Carries the raw input.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed frame: {reason}")]
pub struct MalformedFrame {
    pub reason: String,
    pub raw: Bytes,
}

impl MalformedFrame {
    fn new(reason: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            reason: reason.into(),
            raw: Bytes::copy_from_slice(raw),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Malformed(#[from] MalformedFrame),

    #[error("frame of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    Capacity { size: usize, capacity: usize },
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Write a frame in wire format. A heartbeat is a single `\n`.
pub fn encode_into(frame: &Frame, out: &mut BytesMut) {
    let Some(command) = frame.command() else {
        out.put_u8(b'\n');
        return;
    };

    let escape = command.escapes_headers();
    out.put_slice(command.as_str().as_bytes());
    out.put_u8(b'\n');

    for (key, value) in frame.headers().iter() {
        write_header_part(key, escape, out);
        out.put_u8(b':');
        write_header_part(value, escape, out);
        out.put_u8(b'\n');
    }
    out.put_u8(b'\n');

    if let Some(body) = frame.body() {
        out.put_slice(body);
    }
    out.put_u8(0);
}

pub fn encode(frame: &Frame) -> Bytes {
    let mut out = BytesMut::with_capacity(encoded_len_hint(frame));
    encode_into(frame, &mut out);
    out.freeze()
}

/// Text form of a frame. Non UTF-8 body bytes are replaced.
pub fn encode_text(frame: &Frame) -> String {
    let bytes = encode(frame);
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

fn encoded_len_hint(frame: &Frame) -> usize {
    let headers: usize = frame
        .headers()
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    16 + headers + frame.body().map(|b| b.len()).unwrap_or(0)
}

fn write_header_part(s: &str, escape: bool, out: &mut BytesMut) {
    if !escape {
        out.put_slice(s.as_bytes());
        return;
    }
    for b in s.bytes() {
        match b {
            b'\r' => out.put_slice(b"\\r"),
            b'\n' => out.put_slice(b"\\n"),
            b':' => out.put_slice(b"\\c"),
            b'\\' => out.put_slice(b"\\\\"),
            b => out.put_u8(b),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode exactly one frame (or heartbeat) from a complete message.
pub fn decode(input: &[u8]) -> Result<Frame, MalformedFrame> {
    if input.is_empty() {
        return Err(MalformedFrame::new("empty input", input));
    }
    let start = skip_eols(input, 0);
    if start == input.len() {
        return Ok(Frame::heartbeat());
    }
    let (frame, end) = parse_frame(input, start)?;
    if skip_eols(input, end) != input.len() {
        return Err(MalformedFrame::new("trailing data after frame", input));
    }
    Ok(frame)
}

pub fn decode_text(input: &str) -> Result<Frame, MalformedFrame> {
    decode(input.as_bytes())
}

/// Decode every frame contained in one message. A message consisting only of
/// EOLs yields a single heartbeat.
pub fn decode_all(input: &[u8]) -> Result<Vec<Frame>, MalformedFrame> {
    if input.is_empty() {
        return Err(MalformedFrame::new("empty input", input));
    }
    let mut frames = Vec::new();
    let mut pos = skip_eols(input, 0);
    while pos < input.len() {
        let (frame, end) = parse_frame(input, pos)?;
        frames.push(frame);
        pos = skip_eols(input, end);
    }
    if frames.is_empty() {
        frames.push(Frame::heartbeat());
    }
    Ok(frames)
}

fn parse_frame(input: &[u8], start: usize) -> Result<(Frame, usize), MalformedFrame> {
    let malformed = |reason: &str| MalformedFrame::new(reason, input);

    let (line, mut pos) = read_line(input, start).ok_or_else(|| malformed("missing EOL after command"))?;
    let command: Command = std::str::from_utf8(line)
        .map_err(|_| malformed("command is not UTF-8"))?
        .parse()
        .map_err(|e: super::command::UnknownCommand| malformed(&e.to_string()))?;

    let escaped = command.escapes_headers();
    let mut headers = Headers::new();
    loop {
        let (line, next) = read_line(input, pos).ok_or_else(|| malformed("unterminated header block"))?;
        pos = next;
        if line.is_empty() {
            break;
        }
        let colon = line
            .iter()
            .position(|b| *b == b':')
            .ok_or_else(|| malformed("header line without ':'"))?;
        let key = header_text(&line[..colon], escaped).map_err(|r| malformed(r))?;
        let value = header_text(&line[colon + 1..], escaped).map_err(|r| malformed(r))?;
        headers.append(key, value);
    }

    let body = match headers.get("content-length") {
        Some(raw_len) => {
            let len: usize = raw_len
                .trim()
                .parse()
                .map_err(|_| malformed("invalid content-length"))?;
            let end = pos
                .checked_add(len)
                .filter(|end| *end < input.len())
                .ok_or_else(|| malformed("body shorter than content-length"))?;
            if input[end] != 0 {
                return Err(malformed("missing NUL after content-length body"));
            }
            let body = Bytes::copy_from_slice(&input[pos..end]);
            pos = end + 1;
            Some(body)
        }
        None => {
            let nul = input[pos..]
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| malformed("missing NUL terminator"))?;
            let body = &input[pos..pos + nul];
            pos += nul + 1;
            (!body.is_empty()).then(|| Bytes::copy_from_slice(body))
        }
    };
    // Clients routinely send `content-length:0` on body-less commands.
    let body = body.filter(|b| command.permits_body() || !b.is_empty());

    let frame = FrameBuilder::new(command)
        .raw_headers(headers)
        .raw_body(body)
        .build()
        .map_err(|e| malformed(&e.to_string()))?;
    Ok((frame, pos))
}

fn skip_eols(input: &[u8], mut pos: usize) -> usize {
    loop {
        match input.get(pos) {
            Some(b'\n') => pos += 1,
            Some(b'\r') if input.get(pos + 1) == Some(&b'\n') => pos += 2,
            _ => return pos,
        }
    }
}

/// Line starting at `pos` without its EOL, plus the position after the EOL.
fn read_line(input: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rel = input.get(pos..)?.iter().position(|b| *b == b'\n')?;
    let mut line = &input[pos..pos + rel];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    Some((line, pos + rel + 1))
}

fn header_text(raw: &[u8], escaped: bool) -> Result<String, &'static str> {
    if !escaped {
        return String::from_utf8(raw.to_vec()).map_err(|_| "header is not UTF-8");
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            Some(b'\\') => out.push(b'\\'),
            _ => return Err("invalid header escape sequence"),
        }
    }
    String::from_utf8(out).map_err(|_| "header is not UTF-8")
}

// ---------------------------------------------------------------------------
// Codec variants
// ---------------------------------------------------------------------------

/// Binary codec bounded by a fixed buffer capacity.
#[derive(Debug, Clone, Copy)]
pub struct BinaryCodec {
    capacity: usize,
}

impl BinaryCodec {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn encode(&self, frame: &Frame) -> Result<Bytes, CodecError> {
        let bytes = encode(frame);
        if bytes.len() > self.capacity {
            return Err(CodecError::Capacity {
                size: bytes.len(),
                capacity: self.capacity,
            });
        }
        Ok(bytes)
    }

    pub fn decode(&self, input: &[u8]) -> Result<Vec<Frame>, CodecError> {
        if input.len() > self.capacity {
            return Err(CodecError::Capacity {
                size: input.len(),
                capacity: self.capacity,
            });
        }
        Ok(decode_all(input)?)
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

/// Text codec over UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TextCodec {
    pub fn encode(&self, frame: &Frame) -> String {
        encode_text(frame)
    }

    pub fn decode(&self, input: &str) -> Result<Vec<Frame>, CodecError> {
        Ok(decode_all(input.as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_frame() -> Frame {
        Frame::builder(Command::Send)
            .header("destination", "/topic/x")
            .header("custom", "a:b\nc\\d")
            .header("custom", "second")
            .body("hello\0world", Some("text/plain"))
            .build()
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_everything() {
        let frame = send_frame();
        let decoded = decode(&encode(&frame)).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.headers().get_all("custom").count(), 2);
    }

    #[test]
    fn text_and_binary_agree() {
        let frame = Frame::builder(Command::Subscribe)
            .header("destination", "/queue/a")
            .header("id", "0")
            .build()
            .unwrap();
        let text = TextCodec.decode(&TextCodec.encode(&frame)).unwrap();
        let binary = BinaryCodec::default()
            .decode(&BinaryCodec::default().encode(&frame).unwrap())
            .unwrap();
        assert_eq!(text, binary);
        assert_eq!(text, vec![frame]);
    }

    #[test]
    fn heartbeat_round_trips() {
        assert_eq!(&encode(&Frame::heartbeat())[..], b"\n");
        assert!(decode(b"\n").unwrap().is_heartbeat());
        assert!(decode(b"\r\n").unwrap().is_heartbeat());
    }

    #[test]
    fn skips_leading_blank_lines_and_accepts_crlf() {
        let raw = b"\n\r\nSEND\r\ndestination:/queue/a\r\n\r\nbody\0\n";
        let frame = decode(raw).unwrap();
        assert_eq!(frame.command(), Some(Command::Send));
        assert_eq!(frame.destination(), Some("/queue/a"));
        assert_eq!(frame.body_text().as_deref(), Some("body"));
    }

    #[test]
    fn body_without_content_length_reads_to_nul() {
        let frame = decode(b"SEND\ndestination:/queue/a\n\nabc\0").unwrap();
        assert_eq!(frame.body().map(|b| b.len()), Some(3));
    }

    #[test]
    fn connect_headers_are_not_unescaped() {
        let frame = decode(b"CONNECT\naccept-version:1.2\nhost:a\\cb\n\n\0").unwrap();
        assert_eq!(frame.header("host"), Some("a\\cb"));
    }

    #[test]
    fn connect_with_a_line_break_is_never_encoded() {
        let bad = FrameBuilder::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", "test")
            .header("login", "a\nb")
            .build();
        assert!(bad.is_err());

        // A colon in a value survives verbatim.
        let good = FrameBuilder::new(Command::Stomp)
            .header("accept-version", "1.2")
            .header("host", "test")
            .header("passcode", "p:w\\d")
            .build()
            .unwrap();
        let decoded = decode(&encode(&good)).unwrap();
        assert_eq!(decoded, good);
        assert_eq!(decoded.header("passcode"), Some("p:w\\d"));
    }

    #[test]
    fn malformed_input_is_rejected_with_raw_bytes() {
        let raw = b"SEND\ndestination:/queue/a\n\nno terminator";
        let err = decode(raw).unwrap_err();
        assert_eq!(&err.raw[..], raw);

        assert!(decode(b"BOGUS\n\n\0").is_err());
        assert!(decode(b"SEND\nnocolon\n\n\0").is_err());
        assert!(decode(b"SEND\ndestination:/q\\x\n\n\0").is_err());
        assert!(decode(b"SEND\ndestination:/q\ncontent-length:10\n\nabc\0").is_err());
        assert!(decode(b"SUBSCRIBE\nid:1\n\n\0").is_err());
        assert!(decode(b"").is_err());
    }

    #[test]
    fn decode_all_splits_batched_frames() {
        let mut raw = encode(&send_frame()).to_vec();
        raw.extend_from_slice(b"\n");
        raw.extend_from_slice(&encode(&Frame::receipt_for("1")));
        let frames = decode_all(&raw).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].command(), Some(Command::Receipt));
    }

    #[test]
    fn binary_codec_enforces_capacity() {
        let codec = BinaryCodec::new(16);
        assert!(matches!(
            codec.encode(&send_frame()),
            Err(CodecError::Capacity { capacity: 16, .. })
        ));
    }
}
