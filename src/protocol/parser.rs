//! Resumable RESP Request Parser
//!
//! Requests arrive as an array of bulk strings:
//!
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<len bytes>\r\n      (argc times)
//! ```
//!
//! [`parse_request`] inspects a buffer without mutating it and returns one of
//! three outcomes:
//!
//! - `Ok(Some((args, consumed)))` - a full request; advance the buffer by `consumed`
//! - `Ok(None)` - the request is incomplete, nothing was consumed
//! - `Err(e)` - the frame is malformed; `e.discard()` bytes may be dropped to
//!   resynchronize, and a discard of 0 means the connection should be closed
//!
//! Since nothing is consumed on `Ok(None)`, the caller simply appends more
//! bytes and calls again. Parsing restarts from the beginning of the frame
//! each time, which keeps the parser stateless.
//!
//! A null bulk (`$-1`) inside a request becomes an empty argument. The
//! null/empty distinction is not preserved for request arguments.
//!
//! [`parse_message`] is the reply-side counterpart. It understands every
//! reply kind the server emits and is used by clients, tests and benches.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while framing a request or decoding a reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The request did not start with `*`. Inline commands are not supported.
    #[error("expected '*', got {0:#04x}")]
    ExpectedArray(u8),

    /// The array header length was not a non-negative integer.
    #[error("invalid multibulk length")]
    InvalidArrayLength { discard: usize },

    /// An array element did not start with `$`.
    #[error("expected '$', got {found:#04x}")]
    ExpectedBulk { found: u8, discard: usize },

    /// A bulk length was unparseable, or negative other than -1.
    #[error("invalid bulk length")]
    InvalidBulkLength { discard: usize },

    /// Bulk content was not followed by CRLF.
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf { discard: usize },

    /// A bulk length or element count exceeded the configured limits.
    #[error("message too large: {size} (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Unknown type prefix byte in a reply
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer in a reply
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a status or error reply
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Reply arrays nested deeper than [`MAX_NESTING_DEPTH`]
    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),
}

impl ParseError {
    /// Number of bytes, counted from the start of the buffer, to drop before
    /// trying again. Zero means the stream cannot be resynchronized.
    pub fn discard(&self) -> usize {
        match self {
            ParseError::InvalidArrayLength { discard }
            | ParseError::ExpectedBulk { discard, .. }
            | ParseError::InvalidBulkLength { discard }
            | ParseError::MissingCrlf { discard } => *discard,
            _ => 0,
        }
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// A complete request: its arguments and the number of bytes it occupied.
pub type Request = (Vec<Bytes>, usize);

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one request
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum array nesting depth when decoding replies
pub const MAX_NESTING_DEPTH: usize = 32;

/// Initial argument capacity reserved from an untrusted header
const PREALLOC_ARGS: usize = 64;

/// Attempts to frame one request from the start of `buf`.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<Request>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first != prefix::ARRAY {
        return Err(ParseError::ExpectedArray(first));
    }

    let Some(header_end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let after_header = 1 + header_end + 2;
    let count = match parse_i64(&buf[1..1 + header_end]) {
        Some(n) if n >= 0 => n as usize,
        _ => {
            return Err(ParseError::InvalidArrayLength {
                discard: after_header,
            })
        }
    };
    if count > MAX_ARRAY_LEN {
        return Err(ParseError::MessageTooLarge {
            size: count,
            max: MAX_ARRAY_LEN,
        });
    }

    let mut args = Vec::with_capacity(count.min(PREALLOC_ARGS));
    let mut off = after_header;

    for _ in 0..count {
        let Some(&marker) = buf.get(off) else {
            return Ok(None);
        };
        if marker != prefix::BULK_STRING {
            return Err(ParseError::ExpectedBulk {
                found: marker,
                discard: off,
            });
        }

        let Some(len_end) = find_crlf(&buf[off + 1..]) else {
            return Ok(None);
        };
        let len_field = &buf[off + 1..off + 1 + len_end];
        off += 1 + len_end + 2;

        let len = match parse_i64(len_field) {
            Some(-1) => {
                args.push(Bytes::new());
                continue;
            }
            Some(n) if n >= 0 => n as usize,
            _ => return Err(ParseError::InvalidBulkLength { discard: off }),
        };
        if len > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        if buf.len() < off + len + 2 {
            return Ok(None);
        }
        let data_end = off + len;
        if &buf[data_end..data_end + 2] != CRLF {
            return Err(ParseError::MissingCrlf { discard: data_end });
        }
        args.push(Bytes::copy_from_slice(&buf[off..data_end]));
        off = data_end + 2;
    }

    Ok(Some((args, off)))
}

/// Attempts to decode one reply value from the start of `buf`.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    parse_value(buf, 0)
}

fn parse_value(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
    }

    let Some(line_end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let line = &buf[1..1 + line_end];
    let after_line = 1 + line_end + 2;

    match first {
        prefix::SIMPLE_STRING => Ok(Some((RespValue::SimpleString(utf8(line)?), after_line))),
        prefix::ERROR => Ok(Some((RespValue::Error(utf8(line)?), after_line))),
        prefix::INTEGER => Ok(Some((RespValue::Integer(integer(line)?), after_line))),
        prefix::BULK_STRING => {
            let len = integer(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Null, after_line)));
            }
            if len < 0 {
                return Err(ParseError::InvalidInteger(len.to_string()));
            }
            let len = len as usize;
            if len > MAX_BULK_SIZE {
                return Err(ParseError::MessageTooLarge {
                    size: len,
                    max: MAX_BULK_SIZE,
                });
            }
            let data_end = after_line + len;
            if buf.len() < data_end + 2 {
                return Ok(None);
            }
            if &buf[data_end..data_end + 2] != CRLF {
                return Err(ParseError::MissingCrlf { discard: 0 });
            }
            let data = Bytes::copy_from_slice(&buf[after_line..data_end]);
            Ok(Some((RespValue::BulkString(data), data_end + 2)))
        }
        prefix::ARRAY => {
            let count = integer(line)?;
            if count == -1 {
                return Ok(Some((RespValue::Null, after_line)));
            }
            if count < 0 {
                return Err(ParseError::InvalidInteger(count.to_string()));
            }
            let count = count as usize;
            if count > MAX_ARRAY_LEN {
                return Err(ParseError::MessageTooLarge {
                    size: count,
                    max: MAX_ARRAY_LEN,
                });
            }
            let mut values = Vec::with_capacity(count.min(PREALLOC_ARGS));
            let mut off = after_line;
            for _ in 0..count {
                match parse_value(&buf[off..], depth + 1)? {
                    Some((value, used)) => {
                        values.push(value);
                        off += used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(values), off)))
        }
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

fn utf8(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn integer(line: &[u8]) -> ParseResult<i64> {
    parse_i64(line).ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

/// Strict decimal parse: optional leading '-', then digits only.
/// No '+', no whitespace, no overflow.
pub fn parse_i64(s: &[u8]) -> Option<i64> {
    let (negative, digits) = match s.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, s),
    };
    if digits.is_empty() {
        return None;
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        let d = i64::from(b - b'0');
        value = value.checked_mul(10)?;
        value = if negative {
            value.checked_sub(d)?
        } else {
            value.checked_add(d)?
        };
    }
    Some(value)
}

/// Finds the position of the first CRLF in `buf`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<Bytes> {
        strs.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_parse_simple_request() {
        let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
        let (parsed, consumed) = parse_request(buf).unwrap().unwrap();
        assert_eq!(parsed, args(&["GET", "name"]));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_parse_leaves_trailing_bytes() {
        let buf = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPI";
        let (parsed, consumed) = parse_request(buf).unwrap().unwrap();
        assert_eq!(parsed, args(&["PING"]));
        assert_eq!(consumed, 14);
        assert_eq!(parse_request(&buf[consumed..]).unwrap(), None);
    }

    #[test]
    fn test_incomplete_at_every_split() {
        let full = b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n";
        for cut in 0..full.len() {
            assert_eq!(
                parse_request(&full[..cut]).unwrap(),
                None,
                "prefix of {} bytes should be incomplete",
                cut
            );
        }
        let (parsed, consumed) = parse_request(full).unwrap().unwrap();
        assert_eq!(parsed, args(&["SET", "key", "value"]));
        assert_eq!(consumed, full.len());
    }

    #[test]
    fn test_resume_after_more_bytes() {
        let mut buf = b"*2\r\n$4\r\nECHO\r\n$5\r\nhel".to_vec();
        assert_eq!(parse_request(&buf).unwrap(), None);
        buf.extend_from_slice(b"lo\r\n");
        let (parsed, _) = parse_request(&buf).unwrap().unwrap();
        assert_eq!(parsed, args(&["ECHO", "hello"]));
    }

    #[test]
    fn test_null_bulk_becomes_empty_arg() {
        let buf = b"*2\r\n$4\r\nECHO\r\n$-1\r\n";
        let (parsed, consumed) = parse_request(buf).unwrap().unwrap();
        assert_eq!(parsed, vec![Bytes::from("ECHO"), Bytes::new()]);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_binary_safe_content() {
        let buf = b"*1\r\n$4\r\na\r\nb\r\n";
        let (parsed, _) = parse_request(buf).unwrap().unwrap();
        assert_eq!(parsed[0].as_ref(), b"a\r\nb");
    }

    #[test]
    fn test_empty_array() {
        let (parsed, consumed) = parse_request(b"*0\r\n").unwrap().unwrap();
        assert!(parsed.is_empty());
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_inline_command_is_rejected_without_discard() {
        let err = parse_request(b"PING\r\n").unwrap_err();
        assert_eq!(err, ParseError::ExpectedArray(b'P'));
        assert_eq!(err.discard(), 0);
    }

    #[test]
    fn test_bad_array_length_skips_header() {
        let err = parse_request(b"*x\r\n$4\r\nPING\r\n").unwrap_err();
        assert_eq!(err.discard(), 4);

        let err = parse_request(b"*-3\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidArrayLength { discard: 5 });
    }

    #[test]
    fn test_non_bulk_element_skips_to_offender() {
        let err = parse_request(b"*2\r\n$4\r\nECHO\r\n:1\r\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::ExpectedBulk {
                found: b':',
                discard: 14
            }
        );
    }

    #[test]
    fn test_bad_bulk_length_skips_length_line() {
        let err = parse_request(b"*1\r\n$abc\r\nxyz\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidBulkLength { discard: 10 });

        let err = parse_request(b"*1\r\n$-5\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidBulkLength { discard: 9 });
    }

    #[test]
    fn test_missing_bulk_crlf_skips_content() {
        let err = parse_request(b"*1\r\n$4\r\nPINGxx").unwrap_err();
        assert_eq!(err, ParseError::MissingCrlf { discard: 12 });
    }

    #[test]
    fn test_oversized_bulk_is_fatal() {
        let buf = format!("*1\r\n${}\r\n", MAX_BULK_SIZE + 1);
        let err = parse_request(buf.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::MessageTooLarge { .. }));
        assert_eq!(err.discard(), 0);
    }

    #[test]
    fn test_huge_array_header_does_not_preallocate() {
        let err = parse_request(b"*99999999999\r\n").unwrap_err();
        assert!(matches!(err, ParseError::MessageTooLarge { .. }));

        // Under the cap the header alone is just incomplete.
        assert_eq!(parse_request(b"*1000000\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_i64_is_strict() {
        assert_eq!(parse_i64(b"0"), Some(0));
        assert_eq!(parse_i64(b"-17"), Some(-17));
        assert_eq!(parse_i64(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_i64(b"-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_i64(b"9223372036854775808"), None);
        assert_eq!(parse_i64(b""), None);
        assert_eq!(parse_i64(b"-"), None);
        assert_eq!(parse_i64(b"+5"), None);
        assert_eq!(parse_i64(b" 5"), None);
        assert_eq!(parse_i64(b"1.5"), None);
    }

    #[test]
    fn test_reply_round_trip() {
        let values = vec![
            RespValue::ok(),
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            RespValue::integer(-2),
            RespValue::integer(i64::MAX),
            RespValue::bulk_string(Bytes::from_static(b"bin\r\n\x00ary")),
            RespValue::bulk_string(Bytes::new()),
            RespValue::Null,
            RespValue::array(vec![]),
            RespValue::bulk_array(vec![Some(Bytes::from("f")), None, Some(Bytes::from("v"))]),
        ];

        for value in values {
            let wire = value.serialize();
            let (parsed, consumed) = parse_message(&wire).unwrap().unwrap();
            assert_eq!(parsed, value);
            assert_eq!(consumed, wire.len());
        }
    }

    #[test]
    fn test_reply_incomplete() {
        assert_eq!(parse_message(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_message(b"*2\r\n$1\r\na\r\n").unwrap(), None);
        assert_eq!(parse_message(b":12").unwrap(), None);
    }

    #[test]
    fn test_reply_unknown_prefix() {
        assert_eq!(
            parse_message(b"?x\r\n").unwrap_err(),
            ParseError::UnknownPrefix(b'?')
        );
    }
}
