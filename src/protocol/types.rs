//! RESP Reply Values and Serialization
//!
//! Every reply the server sends is built as a [`RespValue`] and turned into
//! wire bytes by [`RespValue::serialize_into`]. Serialization is a pure
//! function of the value: no state, no reordering.
//!
//! ## Wire Format
//!
//! Each reply starts with a type prefix byte and every line ends with CRLF:
//!
//! | Kind          | Bytes                               |
//! |---------------|-------------------------------------|
//! | Status        | `+OK\r\n`                           |
//! | Error         | `-ERR syntax error\r\n`             |
//! | Integer       | `:42\r\n`                           |
//! | Bulk          | `$5\r\nhello\r\n`                   |
//! | Nil bulk      | `$-1\r\n`                           |
//! | Array         | `*2\r\n$1\r\na\r\n$-1\r\n`          |

use bytes::Bytes;

/// The CRLF terminator used throughout the protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply value.
///
/// Arrays produced by the command handler only ever hold `BulkString` and
/// `Null` elements, but the type itself allows any nesting so that parsed
/// replies can be compared structurally in tests and clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Single-line status reply: `+<text>\r\n`
    SimpleString(String),

    /// Single-line error reply: `-<text>\r\n`.
    /// By convention the text starts with `ERR` or `WRONGTYPE`.
    Error(String),

    /// Signed 64-bit integer: `:<n>\r\n`
    Integer(i64),

    /// Binary-safe, length-prefixed value: `$<len>\r\n<bytes>\r\n`
    BulkString(Bytes),

    /// Nil bulk value: `$-1\r\n`
    Null,

    /// Length-prefixed sequence: `*<count>\r\n<element>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Bulk for `Some`, nil for `None`.
    pub fn optional_bulk(data: Option<Bytes>) -> Self {
        match data {
            Some(data) => RespValue::BulkString(data),
            None => RespValue::Null,
        }
    }

    /// Array of bulk elements, one nil per missing entry.
    pub fn bulk_array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Option<Bytes>>,
    {
        RespValue::Array(items.into_iter().map(RespValue::optional_bulk).collect())
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to a freshly allocated buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s),
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Attempts to extract the inner bytes from a bulk value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Consumes self and returns the inner array if this is an Array variant.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

/// Writes a line-oriented reply. CR and LF inside the text would break
/// framing, so they are replaced with spaces.
fn write_line(buf: &mut Vec<u8>, prefix: u8, text: &str) {
    buf.push(prefix);
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    buf.extend_from_slice(CRLF);
}
