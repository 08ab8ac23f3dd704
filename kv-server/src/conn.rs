//! # Connection State Machine
//!
//! Each connection cycles between `AwaitingRequest` (reading and framing
//! one request at a time) and `Sending` (flushing the serialized reply),
//! closing on protocol violations or I/O errors other than
//! `WouldBlock`/`Interrupted`.

use std::io::{self, Read, Write};

use kv_common::protocol::{decode_request, encode_response, FrameError};
use mio::net::TcpStream;
use tracing::trace;

use crate::command::dispatch;
use crate::event_loop::Server;

/// Read/write buffers are bounded at `4 + K_MAX_MSG`: a length prefix
/// plus the largest body the protocol allows.
const BUF_CAP: usize = 4 + kv_common::K_MAX_MSG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    AwaitingRequest,
    Sending,
    Closed,
}

pub struct Connection {
    pub stream: TcpStream,
    pub state: ConnState,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    write_pos: usize,
    pub last_active_ms: u64,
}

impl Connection {
    pub fn new(stream: TcpStream, now_ms: u64) -> Self {
        Connection {
            stream,
            state: ConnState::AwaitingRequest,
            read_buf: Vec::with_capacity(BUF_CAP),
            write_buf: Vec::new(),
            write_pos: 0,
            last_active_ms: now_ms,
        }
    }

    /// Runs the connection's state machine once in response to a
    /// readiness event, mutating `server`'s keyspace as commands are
    /// dispatched. Advances through `AwaitingRequest` -> `Sending`
    /// synchronously within one call rather than waiting for another
    /// readiness notification.
    pub fn on_ready(&mut self, server: &mut Server, readable: bool, writable: bool, now_ms: u64) {
        if readable && self.state == ConnState::AwaitingRequest {
            self.try_fill_and_process(server, now_ms);
        }
        if writable && self.state == ConnState::Sending {
            self.try_flush();
        }
    }

    fn try_fill_and_process(&mut self, server: &mut Server, now_ms: u64) {
        loop {
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.state = ConnState::Closed;
                    return;
                }
                Ok(n) => {
                    if self.read_buf.len() + n > BUF_CAP {
                        self.state = ConnState::Closed;
                        return;
                    }
                    self.read_buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.state = ConnState::Closed;
                    return;
                }
            }
        }

        if !self.process_one_request(server, now_ms) {
            return;
        }

        if self.write_pos < self.write_buf.len() {
            self.state = ConnState::Sending;
            self.try_flush();
        }
    }

    /// Frames and dispatches at most one request from `read_buf`.
    /// Returns `false` if the connection was closed (protocol violation
    /// or nothing framable yet).
    fn process_one_request(&mut self, server: &mut Server, now_ms: u64) -> bool {
        let (args, consumed) = match decode_request(&self.read_buf) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return true, // need more bytes, not an error
            Err(FrameError::TooBig | FrameError::TooManyArgs | FrameError::Malformed) => {
                self.state = ConnState::Closed;
                return false;
            }
        };

        let value = dispatch(&args, server, now_ms);
        // `encode_response` already caps the serialized body at K_MAX_MSG
        // and swaps in its own ERR_2BIG reply when it doesn't fit; no
        // further size check is needed here.
        let reply = encode_response(&value);
        self.write_buf.extend_from_slice(&reply);

        self.read_buf.drain(0..consumed);
        true
    }

    fn try_flush(&mut self) {
        loop {
            match self.stream.write(&self.write_buf[self.write_pos..]) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_pos += n;
                    if self.write_pos >= self.write_buf.len() {
                        self.write_buf.clear();
                        self.write_pos = 0;
                        self.state = ConnState::AwaitingRequest;
                        trace!("flushed reply, back to awaiting request");
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.state = ConnState::Closed;
                    break;
                }
            }
        }
    }

    /// `true` while this connection still wants to be polled for
    /// writability (a response is queued but not fully flushed).
    pub fn wants_write(&self) -> bool {
        self.state == ConnState::Sending
    }
}
