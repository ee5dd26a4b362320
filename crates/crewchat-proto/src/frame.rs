//! STOMP 1.2 frames.
//!
//! Layout on the wire:
//!
//! ```text
//! COMMAND EOL
//! *( header-name ":" header-value EOL )
//! EOL
//! body NUL *( EOL )
//! ```
//!
//! A transport message consisting only of EOLs is a heart-beat. Header names
//! and values are escaped (`\\`, `\n`, `\r`, `\c`) on every frame except
//! `CONNECT` and `CONNECTED`.

use std::{fmt, time::Duration};

use bytes::{BufMut, Bytes};
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// STOMP 1.2 frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake
    Connect,
    /// Alternative client handshake
    Stomp,
    /// Server handshake reply
    Connected,
    /// Publish to a destination
    Send,
    /// Register a subscription
    Subscribe,
    /// Drop a subscription
    Unsubscribe,
    /// Acknowledge a message
    Ack,
    /// Reject a message
    Nack,
    /// Start a transaction
    Begin,
    /// Commit a transaction
    Commit,
    /// Roll back a transaction
    Abort,
    /// Graceful client disconnect
    Disconnect,
    /// Message delivered on a subscription
    Message,
    /// Receipt for a client frame
    Receipt,
    /// Server error, the server closes the connection afterwards
    Error,
}

impl Command {
    /// Command name as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a command line. `None` for anything outside STOMP 1.2.
    pub fn parse(line: &str) -> Option<Self> {
        let command = match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(command)
    }

    /// Whether headers of this command are escaped on the wire.
    pub fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Bare EOL keep-alive
    HeartBeat,
    /// A complete frame
    Frame(Frame),
}

/// `heart-beat` header values in milliseconds.
///
/// The first value is how often the sender can emit heart-beats, the second
/// how often it wants to receive them. Zero means "cannot" / "does not want".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Smallest interval at which this side sends heart-beats
    pub send_ms: u64,
    /// Desired interval at which this side receives heart-beats
    pub recv_ms: u64,
}

/// Heart-beat intervals agreed after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// How often the client must send something. `None` disables.
    pub outgoing: Option<Duration>,
    /// How often the server promises to send something. `None` disables.
    pub incoming: Option<Duration>,
}

impl HeartBeat {
    /// Heart-beating disabled in both directions.
    pub const NONE: Self = Self { send_ms: 0, recv_ms: 0 };

    /// Create heart-beat values.
    pub fn new(send_ms: u64, recv_ms: u64) -> Self {
        Self { send_ms, recv_ms }
    }

    /// Parse `"<send>,<recv>"`.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidHeartBeat(value.to_string());
        let (send, recv) = value.split_once(',').ok_or_else(invalid)?;
        let send_ms = send.trim().parse().map_err(|_| invalid())?;
        let recv_ms = recv.trim().parse().map_err(|_| invalid())?;
        Ok(Self { send_ms, recv_ms })
    }

    /// Negotiate intervals from the client's offer (`self`) and the server's
    /// `CONNECTED` reply.
    pub fn negotiate(self, server: Self) -> Negotiated {
        let pick = |ours: u64, theirs: u64| {
            (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
        };
        Negotiated {
            outgoing: pick(self.send_ms, server.recv_ms),
            incoming: pick(self.recv_ms, server.send_ms),
        }
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.recv_ms)
    }
}

/// A STOMP frame.
///
/// Headers keep their wire order. When a header repeats, the first
/// occurrence is authoritative (STOMP 1.2 section "Repeated Header Entries").
///
/// # Invariants
///
/// - Size Limit: encoded frames never exceed [`Frame::MAX_SIZE`]; decoding
///   rejects larger inputs before parsing.
/// - Body Framing: when `content-length` is present the body is exactly that
///   many bytes followed by NUL, otherwise it runs to the first NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command
    pub command: Command,
    headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Bytes,
}

impl Frame {
    /// Largest frame accepted or produced (1 MiB).
    pub const MAX_SIZE: usize = 1024 * 1024;

    /// Wire form of a heart-beat.
    pub const HEARTBEAT: &'static [u8] = b"\n";

    /// Create an empty frame for `command`.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: Bytes::new() }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// All headers in wire order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Body as UTF-8 text.
    pub fn body_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Deserialize the JSON body.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// `CONNECT` frame with an optional `Authorization` header.
    pub fn connect(host: &str, heart_beat: HeartBeat, authorization: Option<&str>) -> Self {
        let frame = Self::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.to_string());

        match authorization {
            Some(value) => frame.with_header("Authorization", value),
            None => frame,
        }
    }

    /// `SUBSCRIBE` frame with automatic acknowledgement.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    /// `UNSUBSCRIBE` frame.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// `SEND` frame carrying `payload` as JSON.
    pub fn send_json<T: Serialize>(destination: &str, payload: &T) -> Result<Self> {
        let body = serde_json::to_vec(payload)?;
        Ok(Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    /// `DISCONNECT` frame requesting a receipt.
    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).with_header("receipt", receipt)
    }

    /// Encode the frame.
    ///
    /// Adds `content-length` when the body is non-empty and the header is not
    /// already set.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnencodableHeader` for line breaks in unescaped
    ///   (`CONNECT`/`CONNECTED`) headers
    /// - `ProtocolError::FrameTooLarge` above [`Frame::MAX_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let escaped = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());

        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            if escaped {
                out.extend_from_slice(escape(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape(value).as_bytes());
            } else {
                if name.contains([':', '\n', '\r']) || value.contains(['\n', '\r']) {
                    return Err(ProtocolError::UnencodableHeader { name: name.clone() });
                }
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }

        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);

        if out.len() > Self::MAX_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: out.len(), max: Self::MAX_SIZE });
        }

        dst.put_slice(&out);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Decode one transport message.
    ///
    /// Leading EOLs are skipped; a message made only of EOLs is a
    /// [`Packet::HeartBeat`]. Bytes after the NUL terminator are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` above [`Frame::MAX_SIZE`]
    /// - `ProtocolError::UnknownCommand`, `MalformedHeader`, `InvalidEscape`
    ///   for malformed frame heads
    /// - `ProtocolError::FrameTruncated` / `MissingTerminator` for bodies that
    ///   end early
    pub fn decode(bytes: &[u8]) -> Result<Packet> {
        if bytes.len() > Self::MAX_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: Self::MAX_SIZE });
        }

        let rest = skip_eols(bytes);
        if rest.is_empty() {
            return Ok(Packet::HeartBeat);
        }

        let (command_line, mut rest) = split_line(rest).ok_or(ProtocolError::MissingTerminator)?;
        let command_line = std::str::from_utf8(command_line).map_err(|_| ProtocolError::InvalidUtf8)?;
        let command = Command::parse(command_line)
            .ok_or_else(|| ProtocolError::UnknownCommand(command_line.to_string()))?;

        let mut headers = Vec::new();
        loop {
            let (line, tail) = split_line(rest).ok_or(ProtocolError::MissingTerminator)?;
            rest = tail;
            if line.is_empty() {
                break;
            }

            let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;

            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim().parse::<usize>().map_err(|_| ProtocolError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body = match content_length {
            Some(len) => {
                let body = rest
                    .get(..len)
                    .ok_or(ProtocolError::FrameTruncated { expected: len, actual: rest.len() })?;
                if rest.get(len) != Some(&0) {
                    return Err(ProtocolError::MissingTerminator);
                }
                body
            },
            None => {
                let end = rest.iter().position(|b| *b == 0).ok_or(ProtocolError::MissingTerminator)?;
                rest.get(..end).ok_or(ProtocolError::MissingTerminator)?
            },
        };

        Ok(Packet::Frame(Self { command, headers, body: Bytes::copy_from_slice(body) }))
    }
}

/// Strip leading `\n` / `\r\n` sequences.
fn skip_eols(mut bytes: &[u8]) -> &[u8] {
    loop {
        if let Some(rest) = bytes.strip_prefix(b"\n") {
            bytes = rest;
        } else if let Some(rest) = bytes.strip_prefix(b"\r\n") {
            bytes = rest;
        } else {
            return bytes;
        }
    }
}

/// Split off one line, dropping its EOL. `None` if no `\n` remains.
fn split_line(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = bytes.iter().position(|b| *b == b'\n')?;
    let line = bytes.get(..idx)?;
    let rest = bytes.get(idx + 1..)?;
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, rest))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(ProtocolError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_frame(bytes: &[u8]) -> Frame {
        match Frame::decode(bytes).unwrap() {
            Packet::Frame(frame) => frame,
            Packet::HeartBeat => panic!("expected a frame"),
        }
    }

    #[test]
    fn eol_only_message_is_heartbeat() {
        assert_eq!(Frame::decode(b"\n").unwrap(), Packet::HeartBeat);
        assert_eq!(Frame::decode(b"\r\n\n").unwrap(), Packet::HeartBeat);
    }

    #[test]
    fn decode_connected_keeps_raw_headers() {
        let frame = decode_frame(b"CONNECTED\nversion:1.2\nheart-beat:0,10000\n\n\0");

        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header("version"), Some("1.2"));
        assert_eq!(frame.header("heart-beat"), Some("0,10000"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn decode_message_with_content_length_allows_nul_in_body() {
        let frame = decode_frame(b"MESSAGE\ncontent-length:3\n\na\0b\0\n\n");
        assert_eq!(&frame.body[..], b"a\0b");
    }

    #[test]
    fn decode_body_without_content_length_stops_at_nul() {
        let frame = decode_frame(b"\nMESSAGE\ndestination:/topic/chat/r1\n\n{\"x\":1}\0");
        assert_eq!(frame.header("destination"), Some("/topic/chat/r1"));
        assert_eq!(frame.body_str().unwrap(), "{\"x\":1}");
    }

    #[test]
    fn repeated_header_first_wins() {
        let frame = decode_frame(b"MESSAGE\nfoo:first\nfoo:second\n\n\0");
        assert_eq!(frame.header("foo"), Some("first"));
        assert_eq!(frame.headers().count(), 2);
    }

    #[test]
    fn escaped_headers_round_trip() {
        let frame = Frame::new(Command::Send)
            .with_header("destination", "/app/r1/send")
            .with_header("note", "a:b\\c\nd");

        let wire = frame.to_bytes().unwrap();
        let text = String::from_utf8(wire.clone()).unwrap();
        assert!(text.contains("note:a\\cb\\\\c\\nd\n"));

        assert_eq!(decode_frame(&wire), frame);
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let frame = Frame::connect("chat.example", HeartBeat::new(10_000, 10_000), Some("Bearer a:b"));
        let text = String::from_utf8(frame.to_bytes().unwrap()).unwrap();

        assert!(text.starts_with("CONNECT\n"));
        assert!(text.contains("Authorization:Bearer a:b\n"));
        assert!(text.contains("heart-beat:10000,10000\n"));
    }

    #[test]
    fn connect_rejects_line_break_in_header() {
        let frame = Frame::new(Command::Connect).with_header("host", "evil\nheader:x");
        assert!(matches!(frame.to_bytes(), Err(ProtocolError::UnencodableHeader { .. })));
    }

    #[test]
    fn send_json_sets_content_length() {
        let frame = Frame::send_json("/app/r1/send", &serde_json::json!({ "content": "hi" })).unwrap();
        let text = String::from_utf8(frame.to_bytes().unwrap()).unwrap();

        assert!(text.contains("content-type:application/json\n"));
        assert!(text.contains(&format!("content-length:{}\n", frame.body.len())));
        assert!(text.ends_with("{\"content\":\"hi\"}\0"));
    }

    #[test]
    fn reject_unknown_command() {
        let result = Frame::decode(b"HELLO\n\n\0");
        assert!(matches!(result, Err(ProtocolError::UnknownCommand(_))));
    }

    #[test]
    fn reject_missing_terminator() {
        assert!(matches!(
            Frame::decode(b"MESSAGE\n\nbody"),
            Err(ProtocolError::MissingTerminator)
        ));
        assert!(matches!(
            Frame::decode(b"MESSAGE\ncontent-length:4\n\nbody"),
            Err(ProtocolError::MissingTerminator)
        ));
    }

    #[test]
    fn reject_truncated_body() {
        let result = Frame::decode(b"MESSAGE\ncontent-length:10\n\nabc");
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { expected: 10, actual: 3 })));
    }

    #[test]
    fn reject_invalid_escape() {
        let result = Frame::decode(b"MESSAGE\nfoo:bad\\t\n\n\0");
        assert!(matches!(result, Err(ProtocolError::InvalidEscape(_))));
    }

    #[test]
    fn reject_oversized_input() {
        let big = vec![b'a'; Frame::MAX_SIZE + 1];
        assert!(matches!(Frame::decode(&big), Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn heartbeat_parse_and_negotiate() {
        let client = HeartBeat::new(10_000, 10_000);
        let server = HeartBeat::parse("0, 20000").unwrap();

        let negotiated = client.negotiate(server);
        assert_eq!(negotiated.outgoing, Some(Duration::from_secs(20)));
        assert_eq!(negotiated.incoming, None);

        assert!(HeartBeat::parse("10").is_err());
        assert!(HeartBeat::parse("a,b").is_err());
        assert_eq!(HeartBeat::NONE.negotiate(server), Negotiated::default());
    }
}
