//! # Wire Protocol
//!
//! Purpose: frame requests and serialize replies for the length-prefixed
//! TCP protocol described in the store's design notes.
//!
//! ## Wire format
//!
//! Request (little-endian):
//! ```text
//! [u32 total_len] [u32 argc] argc x { [u32 len_i] [bytes len_i] }
//! ```
//! `total_len` counts every byte that follows the length field itself
//! (the `argc` field and all argument headers/data). A request is only
//! framed once `4 + total_len` bytes have arrived.
//!
//! Response:
//! ```text
//! [u32 body_len] [body_bytes]
//! ```
//! where the body is a single tagged [`Value`], recursively encoded.
//!
//! ## Design Principles
//! 1. **No allocation on the happy path for framing**: `decode_request`
//!    borrows from the caller's buffer and only allocates the argument
//!    vectors it has to return.
//! 2. **Fail closed**: any malformed length or trailing byte is a protocol
//!    violation, not a best-effort recovery; the caller is expected to
//!    close the connection (see the connection state machine).

use std::io;

/// Wire limit on a single string value / framed message body.
pub const K_MAX_MSG: usize = 4096;

/// Wire limit on the number of arguments in one request.
pub const K_MAX_ARGS: usize = 1024;

const TAG_NIL: u8 = 0;
const TAG_ERR: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_DBL: u8 = 4;
const TAG_ARR: u8 = 5;

/// Error kinds surfaced to clients, per the store's error-handling design.
///
/// These are distinct from [`crate::error::StoreError`]: a `ReplyError` is
/// always serialized as an `ERR` tagged value with this code and a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    /// Unknown command, malformed arity, or an internal allocation failure
    /// that did not corrupt store state.
    Unknown = 1,
    /// A reply's serialized body would exceed [`K_MAX_MSG`].
    TooBig = 2,
    /// The target entry exists with a different type than the op requires.
    Type = 3,
    /// A numeric argument failed to parse, or was not finite.
    Arg = 4,
}

impl ReplyError {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// A single tagged reply value; recursive for `Arr`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Err(ReplyError, Vec<u8>),
    Str(Vec<u8>),
    Int(i64),
    Dbl(f64),
    Arr(Vec<Value>),
}

impl Value {
    pub fn err(kind: ReplyError, message: impl Into<Vec<u8>>) -> Self {
        Value::Err(kind, message.into())
    }

    /// Appends this value's tagged encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Nil => out.push(TAG_NIL),
            Value::Err(kind, message) => {
                out.push(TAG_ERR);
                out.extend_from_slice(&kind.code().to_le_bytes());
                out.extend_from_slice(&(message.len() as u32).to_le_bytes());
                out.extend_from_slice(message);
            }
            Value::Str(bytes) => {
                out.push(TAG_STR);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Value::Int(value) => {
                out.push(TAG_INT);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Value::Dbl(value) => {
                out.push(TAG_DBL);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Value::Arr(items) => {
                out.push(TAG_ARR);
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Decodes one tagged value starting at `buf[*pos]`, advancing `*pos`.
    pub fn decode(buf: &[u8], pos: &mut usize) -> io::Result<Value> {
        let tag = read_u8(buf, pos)?;
        match tag {
            TAG_NIL => Ok(Value::Nil),
            TAG_ERR => {
                let code = read_i32(buf, pos)?;
                let len = read_u32(buf, pos)? as usize;
                let message = read_bytes(buf, pos, len)?.to_vec();
                let kind = match code {
                    1 => ReplyError::Unknown,
                    2 => ReplyError::TooBig,
                    3 => ReplyError::Type,
                    4 => ReplyError::Arg,
                    _ => return Err(bad_data("unknown error code")),
                };
                Ok(Value::Err(kind, message))
            }
            TAG_STR => {
                let len = read_u32(buf, pos)? as usize;
                Ok(Value::Str(read_bytes(buf, pos, len)?.to_vec()))
            }
            TAG_INT => Ok(Value::Int(read_i64(buf, pos)?)),
            TAG_DBL => Ok(Value::Dbl(read_f64(buf, pos)?)),
            TAG_ARR => {
                let n = read_u32(buf, pos)? as usize;
                let mut items = Vec::with_capacity(n.min(K_MAX_ARGS));
                for _ in 0..n {
                    items.push(Value::decode(buf, pos)?);
                }
                Ok(Value::Arr(items))
            }
            _ => Err(bad_data("unknown value tag")),
        }
    }
}

/// Serializes a full response (`[u32 body_len][body]`) for `value`.
///
/// If the encoded body would exceed [`K_MAX_MSG`], the reply is replaced
/// with `ERR_2BIG "Response is too big"` per the store's error-handling
/// design, and that smaller error is what gets serialized instead.
pub fn encode_response(value: &Value) -> Vec<u8> {
    let mut body = Vec::new();
    value.encode(&mut body);

    if body.len() > K_MAX_MSG {
        body.clear();
        Value::err(ReplyError::TooBig, "Response is too big").encode(&mut body);
    }

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Protocol-level framing violation: the connection must be closed without
/// a reply (the connection state machine enforces that; this type only
/// reports why).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Declared message length exceeds `K_MAX_MSG`.
    TooBig,
    /// Declared argument count exceeds `K_MAX_ARGS`.
    TooManyArgs,
    /// Argument headers/lengths don't add up to the declared message length.
    Malformed,
}

/// Attempts to frame and parse one request out of the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. On success, returns the
/// parsed argument vector and the number of bytes consumed from `buf`
/// (always `4 + total_len`), which the caller must drain from its read
/// buffer before calling again.
pub fn decode_request(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let total_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if total_len > K_MAX_MSG {
        return Err(FrameError::TooBig);
    }
    let need = 4 + total_len;
    if buf.len() < need {
        return Ok(None);
    }

    if total_len < 4 {
        return Err(FrameError::Malformed);
    }
    let argc = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
    if argc > K_MAX_ARGS {
        return Err(FrameError::TooManyArgs);
    }

    let mut cursor = 8usize;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        if cursor + 4 > need {
            return Err(FrameError::Malformed);
        }
        let len = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + len > need {
            return Err(FrameError::Malformed);
        }
        args.push(buf[cursor..cursor + len].to_vec());
        cursor += len;
    }

    if cursor != need {
        return Err(FrameError::Malformed);
    }

    Ok(Some((args, need)))
}

/// Encodes a full request frame for `args`, mirroring [`decode_request`].
///
/// This is test/tooling support (there is no bundled CLI client in this
/// crate); it is also handy for constructing literal wire fixtures.
pub fn encode_request(args: &[&[u8]]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        body.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        body.extend_from_slice(arg);
    }

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn bad_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

fn read_u8(buf: &[u8], pos: &mut usize) -> io::Result<u8> {
    let byte = *buf.get(*pos).ok_or_else(|| bad_data("truncated value"))?;
    *pos += 1;
    Ok(byte)
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> io::Result<&'a [u8]> {
    let end = pos.checked_add(len).ok_or_else(|| bad_data("length overflow"))?;
    let slice = buf.get(*pos..end).ok_or_else(|| bad_data("truncated value"))?;
    *pos = end;
    Ok(slice)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_bytes(buf, pos, 4)?.try_into().unwrap()))
}

fn read_i32(buf: &[u8], pos: &mut usize) -> io::Result<i32> {
    Ok(i32::from_le_bytes(read_bytes(buf, pos, 4)?.try_into().unwrap()))
}

fn read_i64(buf: &[u8], pos: &mut usize) -> io::Result<i64> {
    Ok(i64::from_le_bytes(read_bytes(buf, pos, 8)?.try_into().unwrap()))
}

fn read_f64(buf: &[u8], pos: &mut usize) -> io::Result<f64> {
    Ok(f64::from_le_bytes(read_bytes(buf, pos, 8)?.try_into().unwrap()))
}
