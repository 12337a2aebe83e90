//! Tokio codec for STOMP framing.
//!
//! `StompCodec` turns a byte stream into [`StompItem`]s and back. It is used
//! directly over TCP and, by the event channel, over the payloads of
//! WebSocket messages (which may carry several frames, or a lone heart-beat
//! EOL).
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use futures::{SinkExt, StreamExt};
//! use checador_protocol::{StompCodec, StompItem, frames};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:61613").await?;
//! let mut framed = Framed::new(stream, StompCodec::new());
//!
//! framed.send(frames::subscribe("sub-0", "/topic/checador/LECTOR-01")).await?;
//!
//! while let Some(item) = framed.next().await {
//!     if let StompItem::Frame(frame) = item? {
//!         println!("{}", frame.command());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # DoS Protection
//!
//! Frames larger than the configured maximum (64 KB by default) are rejected
//! as soon as the limit is crossed, without waiting for the terminator.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, decode_frame};

/// Default maximum frame size in bytes (64 KB).
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Unit of traffic on a STOMP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A complete frame.
    Frame(Frame),

    /// A heart-beat (a bare EOL between frames).
    Heartbeat,
}

impl From<Frame> for StompItem {
    fn from(frame: Frame) -> Self {
        StompItem::Frame(frame)
    }
}

/// Tokio codec for STOMP 1.2 frames.
#[derive(Debug, Clone)]
pub struct StompCodec {
    max_frame_size: usize,
}

impl StompCodec {
    /// Create a codec with the default 64 KB frame limit.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom frame limit.
    ///
    /// # Example
    ///
    /// ```
    /// use checador_protocol::StompCodec;
    ///
    /// let codec = StompCodec::with_max_frame_size(128 * 1024);
    /// assert_eq!(codec.max_frame_size(), 128 * 1024);
    /// ```
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = ProtocolError;

    /// Decode one heart-beat or frame from the front of `src`.
    ///
    /// # Example
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use tokio_util::codec::Decoder;
    /// use checador_protocol::{StompCodec, StompItem};
    ///
    /// let mut codec = StompCodec::new();
    /// let mut buf = BytesMut::from(&b"\nRECEIPT\nreceipt-id:1\n\n\0"[..]);
    ///
    /// assert_eq!(codec.decode(&mut buf).unwrap(), Some(StompItem::Heartbeat));
    /// assert!(matches!(codec.decode(&mut buf).unwrap(), Some(StompItem::Frame(_))));
    /// assert_eq!(codec.decode(&mut buf).unwrap(), None);
    /// ```
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() || src[..] == b"\r"[..] {
            return Ok(None);
        }
        if src.starts_with(b"\n") {
            src.advance(1);
            return Ok(Some(StompItem::Heartbeat));
        }
        if src.starts_with(b"\r\n") {
            src.advance(2);
            return Ok(Some(StompItem::Heartbeat));
        }

        match decode_frame(src, self.max_frame_size)? {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(StompItem::Frame(frame)))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<()> {
        match item {
            StompItem::Frame(frame) => Encoder::<Frame>::encode(self, frame, dst),
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                Ok(())
            }
        }
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        frame.encode(dst);

        let size = dst.len() - start;
        if size > self.max_frame_size {
            dst.truncate(start);
            return Err(ProtocolError::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            });
        }
        Ok(())
    }
}
