//! Streaming Frame Parser
//!
//! TCP delivers a byte stream, not frames: a read may contain half a
//! message or a dozen pipelined ones. The parser bridges that gap with a
//! small state machine over an internal byte queue:
//!
//! 1. The connection appends raw socket bytes with [`FrameParser::feed`]
//!    (or reads straight into [`FrameParser::buffer_mut`]).
//! 2. [`FrameParser::try_parse`] returns `Ok(Some(message))` once a whole
//!    frame is buffered, consuming exactly that frame's bytes.
//! 3. On partial input it returns `Ok(None)` and leaves the queue
//!    untouched, so the call is idempotent until more data arrives.
//!
//! Malformed input (an unknown type code, a length above the per-message
//! cap, an integer frame that is not eight bytes, nesting past the depth
//! limit) poisons the parser. A poisoned parser refuses all further
//! work; the owning connection sends a best-effort error reply and
//! closes. There is no resynchronization: once framing is lost there is
//! no reliable way to find the next frame boundary in a binary stream.

use crate::protocol::types::{code, Message, HEADER_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Maximum serialized size of a single message payload (4 MiB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Maximum array nesting depth, to bound recursion on hostile input.
pub const MAX_NESTING_DEPTH: usize = 32;

/// An array this long could not fit under [`MAX_MESSAGE_SIZE`] even if
/// every element were a bare header.
const MAX_ARRAY_COUNT: usize = MAX_MESSAGE_SIZE / HEADER_SIZE;

/// Errors that poison the parser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// First byte of a frame is not a known type code.
    #[error("unknown type code: {0:#04x}")]
    UnknownType(u8),

    /// Declared payload length exceeds the per-message cap.
    #[error("frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// Integer frames must declare exactly eight payload bytes.
    #[error("invalid integer frame length: {0}")]
    InvalidIntegerLength(u32),

    /// Null frames must declare a zero-length payload.
    #[error("invalid null frame length: {0}")]
    InvalidNullLength(u32),

    /// Declared array element count cannot fit under the message cap.
    #[error("array too large: {0} elements")]
    ArrayTooLarge(usize),

    /// Arrays nested deeper than [`MAX_NESTING_DEPTH`].
    #[error("maximum nesting depth exceeded: {0}")]
    DepthExceeded(usize),

    /// The parser saw malformed input earlier and refuses to continue.
    #[error("parser is poisoned by earlier protocol error")]
    Poisoned,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Incremental parser for the framed binary protocol.
///
/// Owns the connection's inbound byte queue. One instance per
/// connection; the poisoned flag is sticky for the connection's lifetime.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Unconsumed socket bytes.
    buf: BytesMut,
    /// Set on the first protocol error; never cleared.
    poisoned: bool,
}

impl FrameParser {
    /// Creates a parser with an empty queue.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            poisoned: false,
        }
    }

    /// Appends raw bytes to the queue.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Direct access to the queue, so the connection can `read_buf` into
    /// it without an intermediate copy.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered, not-yet-consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True once malformed input has been seen.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Attempts to parse one complete message from the front of the
    /// queue.
    ///
    /// - `Ok(Some(msg))`: a frame was complete; its bytes are consumed.
    /// - `Ok(None)`: the queue holds only a partial frame; nothing is
    ///   consumed. Safe to call again after more data arrives.
    /// - `Err(e)`: malformed input; the parser is now poisoned.
    pub fn try_parse(&mut self) -> ParseResult<Option<Message>> {
        if self.poisoned {
            return Err(ParseError::Poisoned);
        }

        match scan_frame(&self.buf, 0, 0) {
            Ok(Some((message, consumed))) => {
                self.buf.advance(consumed);
                Ok(Some(message))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }
}

/// Scans one frame starting at `pos` without consuming anything.
///
/// Returns the decoded message and its total encoded length. `Ok(None)`
/// means the buffer ends before the frame does. Validation happens
/// before completeness checks where possible, so an oversized or
/// garbage header fails fast instead of waiting for bytes that may
/// never come.
fn scan_frame(buf: &[u8], pos: usize, depth: usize) -> ParseResult<Option<(Message, usize)>> {
    if buf.len() < pos + HEADER_SIZE {
        return Ok(None);
    }

    let type_code = buf[pos];
    let len = u32::from_le_bytes([buf[pos + 1], buf[pos + 2], buf[pos + 3], buf[pos + 4]]);

    match type_code {
        code::SIMPLE_STRING | code::ERROR | code::BULK_STRING => {
            let len = len as usize;
            if len > MAX_MESSAGE_SIZE {
                return Err(ParseError::FrameTooLarge {
                    len,
                    max: MAX_MESSAGE_SIZE,
                });
            }
            let total = HEADER_SIZE + len;
            if buf.len() < pos + total {
                return Ok(None);
            }
            let data = Bytes::copy_from_slice(&buf[pos + HEADER_SIZE..pos + total]);
            let message = match type_code {
                code::SIMPLE_STRING => Message::SimpleString(data),
                code::ERROR => Message::Error(data),
                _ => Message::BulkString(data),
            };
            Ok(Some((message, total)))
        }

        code::INTEGER => {
            if len != 8 {
                return Err(ParseError::InvalidIntegerLength(len));
            }
            let total = HEADER_SIZE + 8;
            if buf.len() < pos + total {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[pos + HEADER_SIZE..pos + total]);
            Ok(Some((Message::Integer(i64::from_le_bytes(raw)), total)))
        }

        code::NULL => {
            if len != 0 {
                return Err(ParseError::InvalidNullLength(len));
            }
            Ok(Some((Message::Null, HEADER_SIZE)))
        }

        code::ARRAY => {
            let count = len as usize;
            if count > MAX_ARRAY_COUNT {
                return Err(ParseError::ArrayTooLarge(count));
            }
            if depth >= MAX_NESTING_DEPTH {
                return Err(ParseError::DepthExceeded(MAX_NESTING_DEPTH));
            }

            let mut elements = Vec::with_capacity(count.min(64));
            let mut offset = pos + HEADER_SIZE;
            for _ in 0..count {
                match scan_frame(buf, offset, depth + 1)? {
                    Some((element, consumed)) => {
                        elements.push(element);
                        offset += consumed;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Message::Array(elements), offset - pos)))
        }

        other => Err(ParseError::UnknownType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::make_command;

    fn parse_one(bytes: &[u8]) -> ParseResult<Option<Message>> {
        let mut parser = FrameParser::new();
        parser.feed(bytes);
        parser.try_parse()
    }

    #[test]
    fn test_parse_simple_string() {
        let msg = parse_one(b"\x01\x02\x00\x00\x00OK").unwrap().unwrap();
        assert_eq!(msg, Message::ok());
    }

    #[test]
    fn test_parse_error_frame() {
        let msg = parse_one(b"\x02\x03\x00\x00\x00ERR").unwrap().unwrap();
        assert_eq!(msg, Message::error("ERR"));
    }

    #[test]
    fn test_parse_integer() {
        let mut bytes = vec![0x03, 8, 0, 0, 0];
        bytes.extend_from_slice(&(-1234i64).to_le_bytes());
        assert_eq!(parse_one(&bytes).unwrap().unwrap(), Message::integer(-1234));
    }

    #[test]
    fn test_parse_null() {
        assert_eq!(
            parse_one(b"\x06\x00\x00\x00\x00").unwrap().unwrap(),
            Message::Null
        );
    }

    #[test]
    fn test_parse_empty_bulk_string() {
        assert_eq!(
            parse_one(b"\x04\x00\x00\x00\x00").unwrap().unwrap(),
            Message::bulk("")
        );
    }

    #[test]
    fn test_parse_command_array() {
        let cmd = make_command(["SET", "foo", "bar"]);
        let msg = parse_one(&cmd.serialize()).unwrap().unwrap();
        assert_eq!(msg, cmd);
    }

    #[test]
    fn test_parse_nested_array() {
        let original = Message::array(vec![
            Message::integer(1),
            Message::array(vec![Message::bulk("a"), Message::Null]),
        ]);
        let msg = parse_one(&original.serialize()).unwrap().unwrap();
        assert_eq!(msg, original);
    }

    #[test]
    fn test_partial_input_is_idempotent() {
        let frame = make_command(["GET", "key"]).serialize();
        let mut parser = FrameParser::new();

        parser.feed(&frame[..frame.len() - 1]);
        assert_eq!(parser.try_parse().unwrap(), None);
        // Re-polling without new data must not consume or error
        assert_eq!(parser.try_parse().unwrap(), None);
        assert_eq!(parser.buffered(), frame.len() - 1);

        parser.feed(&frame[frame.len() - 1..]);
        assert!(parser.try_parse().unwrap().is_some());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_every_split_point_yields_same_message() {
        let original = Message::array(vec![
            Message::bulk("ZADD"),
            Message::integer(7),
            Message::array(vec![Message::simple("OK"), Message::Null]),
        ]);
        let frame = original.serialize();

        for split in 0..=frame.len() {
            let mut parser = FrameParser::new();
            parser.feed(&frame[..split]);
            if split < frame.len() {
                assert_eq!(parser.try_parse().unwrap(), None, "split at {}", split);
            }
            parser.feed(&frame[split..]);
            assert_eq!(
                parser.try_parse().unwrap(),
                Some(original.clone()),
                "split at {}",
                split
            );
        }
    }

    #[test]
    fn test_pipelined_frames_parse_in_order() {
        let first = make_command(["SET", "a", "1"]);
        let second = make_command(["GET", "a"]);

        let mut parser = FrameParser::new();
        parser.feed(&first.serialize());
        parser.feed(&second.serialize());

        assert_eq!(parser.try_parse().unwrap(), Some(first));
        assert_eq!(parser.try_parse().unwrap(), Some(second));
        assert_eq!(parser.try_parse().unwrap(), None);
    }

    #[test]
    fn test_unknown_type_poisons() {
        let mut parser = FrameParser::new();
        parser.feed(b"\x42\x00\x00\x00\x00");

        assert_eq!(parser.try_parse(), Err(ParseError::UnknownType(0x42)));
        assert!(parser.is_poisoned());
        // All subsequent calls fail, even with valid data appended
        parser.feed(&Message::ok().serialize());
        assert_eq!(parser.try_parse(), Err(ParseError::Poisoned));
    }

    #[test]
    fn test_oversized_frame_rejected_before_payload_arrives() {
        // Header declares 5 MiB; error must fire without the payload
        let len = (5 * 1024 * 1024u32).to_le_bytes();
        let header = [0x04, len[0], len[1], len[2], len[3]];
        assert!(matches!(
            parse_one(&header),
            Err(ParseError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_bad_integer_length_rejected() {
        assert_eq!(
            parse_one(b"\x03\x04\x00\x00\x00"),
            Err(ParseError::InvalidIntegerLength(4))
        );
    }

    #[test]
    fn test_bad_null_length_rejected() {
        assert_eq!(
            parse_one(b"\x06\x01\x00\x00\x00x"),
            Err(ParseError::InvalidNullLength(1))
        );
    }

    #[test]
    fn test_huge_array_count_rejected() {
        let header = [0x05, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(parse_one(&header), Err(ParseError::ArrayTooLarge(_))));
    }

    #[test]
    fn test_nesting_depth_limit() {
        // 40 nested single-element arrays around one null
        let mut bytes = Vec::new();
        for _ in 0..40 {
            bytes.push(code::ARRAY);
            bytes.extend_from_slice(&1u32.to_le_bytes());
        }
        bytes.extend_from_slice(&Message::Null.serialize());

        assert!(matches!(parse_one(&bytes), Err(ParseError::DepthExceeded(_))));
    }

    #[test]
    fn test_incomplete_array_consumes_nothing() {
        let frame = make_command(["DEL", "x", "y"]).serialize();
        let mut parser = FrameParser::new();
        // Whole array header plus one and a half elements
        parser.feed(&frame[..12]);
        assert_eq!(parser.try_parse().unwrap(), None);
        assert_eq!(parser.buffered(), 12);
    }

    #[test]
    fn test_roundtrip_through_parser() {
        let samples = vec![
            Message::ok(),
            Message::pong(),
            Message::error("ERR wrong number of arguments for 'GET'"),
            Message::integer(0),
            Message::bulk(Bytes::from(vec![0u8, 255, 1, 2])),
            Message::Null,
            Message::array(vec![]),
            make_command(["KEYS", "*"]),
        ];

        for original in samples {
            let parsed = parse_one(&original.serialize()).unwrap().unwrap();
            assert_eq!(parsed, original);
        }
    }
}
