//! RESP Protocol Codec
//!
//! The wire format spoken by the server: requests are arrays of bulk strings,
//! replies are status lines, errors, integers, bulks (possibly nil) and
//! arrays of bulks. Every line ends in CRLF.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` reply type and its serializers
//! - `parser`: resumable request framing plus a reply decoder
//!
//! ## Example
//!
//! ```
//! use shardkv::protocol::{parse_request, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (args, consumed) = parse_request(data).unwrap().unwrap();
//! assert_eq!(args[1], Bytes::from("name"));
//! assert_eq!(consumed, data.len());
//!
//! let reply = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, parse_request, ParseError, ParseResult, Request};
pub use types::RespValue;
