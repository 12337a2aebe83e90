//! STOMP frame representation and wire format.
//!
//! A STOMP 1.2 frame is a command line, zero or more `name:value` header
//! lines, a blank line, an optional body and a terminating NUL:
//!
//! ```text
//! MESSAGE\n
//! destination:/topic/checador/LECTOR-01\n
//! subscription:sub-1\n
//! content-length:57\n
//! \n
//! {"readerName":"LECTOR-01","identificado":false}\0
//! ```
//!
//! Lines may end in `\r\n`. When a `content-length` header is present the
//! body is read by length (it may then contain NUL bytes); otherwise it runs
//! up to the first NUL.
//!
//! # Header Escaping
//!
//! Except in `CONNECT` and `CONNECTED` frames, header names and values
//! escape `\\`, `\r`, `\n` and `:` as `\\\\`, `\\r`, `\\n` and `\\c`. Any
//! other escape is a protocol error.
//!
//! # Examples
//!
//! ```
//! use checador_protocol::{Command, Frame};
//!
//! let frame = Frame::new(Command::Subscribe)
//!     .with_header("id", "sub-1")
//!     .with_header("destination", "/topic/checador/LECTOR-01");
//!
//! let bytes = frame.to_bytes();
//! let parsed = Frame::parse(&bytes).unwrap();
//! assert_eq!(parsed.header("destination"), Some("/topic/checador/LECTOR-01"));
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::command::Command;
use crate::error::{ProtocolError, Result};

/// Well-known header names.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const VERSION: &str = "version";
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    /// All headers in wire order, repeated names included.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Value of the first header named `name`.
    ///
    /// STOMP 1.2 specifies that only the first occurrence of a repeated
    /// header is significant.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the first header named `name`, or append it.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Write the frame in wire format to `dst`.
    ///
    /// A `content-length` header is added for non-empty bodies that do not
    /// already carry one.
    pub fn encode(&self, dst: &mut BytesMut) {
        let escape = self.command.escapes_headers();

        dst.reserve(self.encoded_len_hint());
        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');

        for (name, value) in &self.headers {
            put_header_part(dst, name, escape);
            dst.put_u8(b':');
            put_header_part(dst, value, escape);
            dst.put_u8(b'\n');
        }

        if !self.body.is_empty() && self.header(headers::CONTENT_LENGTH).is_none() {
            dst.put_slice(headers::CONTENT_LENGTH.as_bytes());
            dst.put_u8(b':');
            dst.put_slice(self.body.len().to_string().as_bytes());
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.put_slice(&self.body);
        dst.put_u8(0);
    }

    /// Encode the frame into a new buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse one complete frame from `src`.
    ///
    /// Leading heart-beat EOLs are skipped. Bytes after the terminating NUL
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Incomplete` if `src` ends before the frame
    /// does, or the specific parse error for malformed input.
    pub fn parse(src: &[u8]) -> Result<Frame> {
        let start = skip_eols(src);
        match decode_frame(&src[start..], usize::MAX)? {
            Some((frame, _)) => Ok(frame),
            None => Err(ProtocolError::Incomplete),
        }
    }

    fn encoded_len_hint(&self) -> usize {
        let header_bytes: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum();
        self.command.as_str().len() + header_bytes + self.body.len() + 32
    }
}

fn put_header_part(dst: &mut BytesMut, text: &str, escape: bool) {
    if !escape {
        dst.put_slice(text.as_bytes());
        return;
    }

    for c in text.chars() {
        match c {
            '\\' => dst.put_slice(b"\\\\"),
            '\r' => dst.put_slice(b"\\r"),
            '\n' => dst.put_slice(b"\\n"),
            ':' => dst.put_slice(b"\\c"),
            other => {
                let mut utf8 = [0u8; 4];
                dst.put_slice(other.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
}

fn unescape(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => return Err(ProtocolError::InvalidEscape(format!("\\{other}"))),
            None => return Err(ProtocolError::InvalidEscape("\\".to_string())),
        }
    }

    Ok(out)
}

/// Number of leading heart-beat EOL bytes (`\n` or `\r\n`) in `src`.
pub(crate) fn skip_eols(src: &[u8]) -> usize {
    let mut pos = 0;
    loop {
        match &src[pos..] {
            [b'\n', ..] => pos += 1,
            [b'\r', b'\n', ..] => pos += 2,
            _ => return pos,
        }
    }
}

/// Try to decode one frame from the start of `src`.
///
/// Returns the frame and the number of bytes it occupied, or `None` if more
/// data is needed. `src` must not start with a heart-beat EOL.
pub(crate) fn decode_frame(src: &[u8], max_size: usize) -> Result<Option<(Frame, usize)>> {
    let mut lines: Vec<&[u8]> = Vec::new();
    let mut pos = 0;

    let body_start = loop {
        let Some(offset) = src[pos..].iter().position(|&b| b == b'\n') else {
            check_size(src.len(), max_size)?;
            return Ok(None);
        };

        let newline = pos + offset;
        let mut line = &src[pos..newline];
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }
        pos = newline + 1;

        if line.is_empty() {
            if lines.is_empty() {
                continue;
            }
            break pos;
        }
        lines.push(line);
    };

    let command_line = std::str::from_utf8(lines[0]).map_err(|_| ProtocolError::InvalidUtf8)?;
    let command: Command = command_line.parse()?;
    let escaped = command.escapes_headers();

    let mut frame_headers = Vec::with_capacity(lines.len() - 1);
    for line in &lines[1..] {
        let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;

        if escaped {
            frame_headers.push((unescape(name)?, unescape(value)?));
        } else {
            frame_headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = frame_headers
        .iter()
        .find(|(k, _)| k == headers::CONTENT_LENGTH)
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let (body_end, consumed) = match content_length {
        Some(len) => {
            let end = body_start
                .checked_add(len)
                .filter(|end| *end < usize::MAX)
                .ok_or(ProtocolError::FrameTooLarge {
                    size: usize::MAX,
                    max_size,
                })?;
            check_size(end + 1, max_size)?;
            if src.len() <= end {
                return Ok(None);
            }
            if src[end] != 0 {
                return Err(ProtocolError::MissingTerminator);
            }
            (end, end + 1)
        }
        None => match src[body_start..].iter().position(|&b| b == 0) {
            Some(offset) => (body_start + offset, body_start + offset + 1),
            None => {
                check_size(src.len(), max_size)?;
                return Ok(None);
            }
        },
    };
    check_size(consumed, max_size)?;

    let frame = Frame {
        command,
        headers: frame_headers,
        body: Bytes::copy_from_slice(&src[body_start..body_end]),
    };

    Ok(Some((frame, consumed)))
}

fn check_size(size: usize, max_size: usize) -> Result<()> {
    if size > max_size {
        return Err(ProtocolError::FrameTooLarge { size, max_size });
    }
    Ok(())
}
