/// Client side of the RESP wire format: commands out, replies in

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

/// A decoded reply. Null bulk strings and null arrays both decode to `Nil`.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<RespValue>),
    Nil,
}

impl RespValue {
    /// Integer payload; digit strings count too, as SCAN returns its cursor that way
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            RespValue::Bulk(data) => str::from_utf8(data).ok()?.parse().ok(),
            RespValue::Status(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            RespValue::Bulk(data) => Some(data),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RespValue::Status(_) => "status",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::Bulk(_) => "bulk string",
            RespValue::Array(_) => "array",
            RespValue::Nil => "nil",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("Malformed reply: {0}")]
    Malformed(String),
    #[error("Invalid UTF-8 in reply: {0}")]
    Utf8(#[from] str::Utf8Error),
    #[error("Invalid length or integer in reply: {0}")]
    Number(#[from] std::num::ParseIntError),
    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },
}

/// Incremental reply decoder
pub struct RespParser;

/// Command framing
pub struct RespEncoder;

type Parsed = Option<(RespValue, usize)>;

impl RespParser {
    /// Decode one reply from the front of `buf`.
    ///
    /// Nothing is consumed until a whole reply has arrived, so `Ok(None)`
    /// means "read more and call again".
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let Some((value, used)) = Self::decode(buf, 0)? else {
            return Ok(None);
        };
        buf.advance(used);
        Ok(Some(value))
    }

    fn decode(buf: &[u8], at: usize) -> Result<Parsed, RespError> {
        let (Some(&tag), Some((line, after))) = (buf.get(at), Self::line(buf, at + 1)) else {
            return Ok(None);
        };

        let value = match tag {
            b'+' => RespValue::Status(str::from_utf8(line)?.to_owned()),
            b'-' => RespValue::Error(str::from_utf8(line)?.to_owned()),
            b':' => RespValue::Integer(Self::number(line)?),
            b'$' => return Self::bulk(buf, Self::length(line)?, after),
            b'*' => return Self::array(buf, Self::length(line)?, after),
            other => {
                return Err(RespError::Malformed(format!(
                    "unknown type byte {:?}",
                    other as char
                )))
            }
        };
        Ok(Some((value, after)))
    }

    fn bulk(buf: &[u8], len: Option<usize>, start: usize) -> Result<Parsed, RespError> {
        let Some(len) = len else {
            return Ok(Some((RespValue::Nil, start)));
        };
        let end = start + len;
        match buf.get(end..end + 2) {
            None => Ok(None),
            Some(b"\r\n") => Ok(Some((
                RespValue::Bulk(Bytes::copy_from_slice(&buf[start..end])),
                end + 2,
            ))),
            Some(_) => Err(RespError::Malformed(format!(
                "bulk string of {} bytes not terminated by CRLF",
                len
            ))),
        }
    }

    fn array(buf: &[u8], len: Option<usize>, start: usize) -> Result<Parsed, RespError> {
        let Some(len) = len else {
            return Ok(Some((RespValue::Nil, start)));
        };
        let mut items = Vec::with_capacity(len.min(1024));
        let mut at = start;
        while items.len() < len {
            let Some((item, next)) = Self::decode(buf, at)? else {
                return Ok(None);
            };
            items.push(item);
            at = next;
        }
        Ok(Some((RespValue::Array(items), at)))
    }

    fn number(line: &[u8]) -> Result<i64, RespError> {
        Ok(str::from_utf8(line)?.parse()?)
    }

    /// `-1` is the null length; anything else below zero is malformed
    fn length(line: &[u8]) -> Result<Option<usize>, RespError> {
        match Self::number(line)? {
            -1 => Ok(None),
            n if n < 0 => Err(RespError::Malformed(format!("negative length {}", n))),
            n => Ok(Some(n as usize)),
        }
    }

    fn line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
        let rest = buf.get(from..)?;
        let len = rest.windows(2).position(|w| w == b"\r\n")?;
        Some((&rest[..len], from + len + 2))
    }
}

impl RespEncoder {
    /// Frame `name args...` as an array of bulk strings, ready to write
    pub fn encode_command(name: &str, args: &[&[u8]]) -> Bytes {
        let size = 16 + name.len() + args.iter().map(|a| a.len() + 16).sum::<usize>();
        let mut buf = BytesMut::with_capacity(size);
        Self::header(&mut buf, b'*', args.len() + 1);
        Self::bulk(&mut buf, name.as_bytes());
        for arg in args {
            Self::bulk(&mut buf, arg);
        }
        buf.freeze()
    }

    /// The command as the parser would decode it
    pub fn command(name: &str, args: &[&[u8]]) -> RespValue {
        let mut items = vec![RespValue::Bulk(Bytes::copy_from_slice(name.as_bytes()))];
        items.extend(args.iter().map(|a| RespValue::Bulk(Bytes::copy_from_slice(a))));
        RespValue::Array(items)
    }

    fn header(buf: &mut BytesMut, tag: u8, len: usize) {
        buf.put_u8(tag);
        buf.put_slice(len.to_string().as_bytes());
        buf.put_slice(b"\r\n");
    }

    fn bulk(buf: &mut BytesMut, data: &[u8]) {
        Self::header(buf, b'$', data.len());
        buf.put_slice(data);
        buf.put_slice(b"\r\n");
    }
}
