//! # Event Loop
//!
//! A single `mio`-driven poll loop owning the listening socket, every
//! connection, the keyspace, and the idle list. This thread is the only
//! writer of any of that state, so nothing here takes a lock.

use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use kv_core::{IdleList, Keyspace};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::conn::{ConnState, Connection};
use crate::config::Config;

const LISTENER: Token = Token(0);
const MAX_POLL_TIMEOUT_MS: u64 = 10_000;
const K_MAX_TTL_WORKS: usize = 2_000;

/// Shared context every command handler mutates. Does not own the
/// listening socket or the `mio::Poll` registry: those belong to
/// [`EventLoop`], which is the only thing that needs them.
pub struct Server {
    pub keyspace: Keyspace,
    idle_list: IdleList<Token>,
    idle_timeout_ms: u64,
    shutdown_requested: bool,
    start: Instant,
}

impl Server {
    fn new(config: &Config) -> Self {
        Server {
            keyspace: Keyspace::new(config.worker_threads),
            idle_list: IdleList::new(),
            idle_timeout_ms: config.idle_timeout_ms,
            shutdown_requested: false,
            start: Instant::now(),
        }
    }

    /// A `Server` with no listening socket, for command-handler unit
    /// tests that don't need the network.
    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Server::new(&Config {
            addr: std::net::Ipv4Addr::new(127, 0, 0, 1),
            port: 0,
            idle_timeout_ms: 5_000,
            worker_threads: 1,
        })
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Owns the listening socket and drives [`Server`] from readiness
/// events.
pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    server: Server,
}

impl EventLoop {
    pub fn bind(config: &Config) -> io::Result<Self> {
        let std_listener = bind_reuseaddr(config.addr, config.port)?;
        let mut listener = TcpListener::from_std(std_listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        info!(addr = %config.addr, port = config.port, "listening");

        Ok(EventLoop {
            poll,
            listener,
            connections: HashMap::new(),
            next_token: 1,
            server: Server::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until a `shutdown` command is processed. Each iteration polls
    /// for readiness, services ready connections, sweeps idle connections
    /// and expired keys, then accepts any pending new connections.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(256);

        loop {
            let timeout = self.compute_timeout();
            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let now_ms = self.server.now_ms();
            let mut accept_ready = false;
            let mut ready_tokens = Vec::new();
            for event in events.iter() {
                if event.token() == LISTENER {
                    accept_ready = true;
                } else {
                    ready_tokens.push((event.token(), event.is_readable(), event.is_writable()));
                }
            }

            for (token, readable, writable) in ready_tokens {
                self.server.idle_list.touch(token, now_ms);
                let Some(conn) = self.connections.get_mut(&token) else {
                    continue;
                };
                conn.on_ready(&mut self.server, readable, writable, now_ms);
                if conn.state == ConnState::Closed {
                    self.drop_connection(token);
                } else {
                    self.reregister(token);
                }
            }

            self.run_timer_pass(now_ms);

            if accept_ready {
                self.accept_new_connections(now_ms)?;
            }

            if self.server.shutdown_requested {
                debug!("shutdown command processed, exiting event loop");
                break;
            }
        }
        Ok(())
    }

    fn compute_timeout(&self) -> Duration {
        let now_ms = self.server.now_ms();

        let idle_wait = self
            .server
            .idle_list
            .oldest()
            .map(|(_, last_active)| {
                let elapsed = now_ms.saturating_sub(last_active);
                self.server.idle_timeout_ms.saturating_sub(elapsed)
            })
            .unwrap_or(MAX_POLL_TIMEOUT_MS);

        let ttl_wait = self
            .server
            .keyspace
            .next_ttl_deadline()
            .map(|deadline| deadline.saturating_sub(now_ms))
            .unwrap_or(MAX_POLL_TIMEOUT_MS);

        let wait_ms = idle_wait.min(ttl_wait).min(MAX_POLL_TIMEOUT_MS);
        Duration::from_millis(wait_ms)
    }

    fn run_timer_pass(&mut self, now_ms: u64) {
        let idle_expired = self
            .server
            .idle_list
            .pop_expired(now_ms, self.server.idle_timeout_ms);
        for token in idle_expired {
            debug!(?token, "closing idle connection");
            self.drop_connection(token);
        }

        let evicted = self.server.keyspace.expire_due(now_ms, K_MAX_TTL_WORKS);
        if evicted > 0 {
            debug!(count = evicted, "evicted expired keys");
        }
    }

    fn accept_new_connections(&mut self, now_ms: u64) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    debug!(%addr, "accepted connection");
                    self.register_connection(stream, now_ms)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
        Ok(())
    }

    fn register_connection(&mut self, mut stream: TcpStream, now_ms: u64) -> io::Result<()> {
        let token = Token(self.next_token);
        self.next_token += 1;

        self.poll.registry().register(
            &mut stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;

        self.connections.insert(token, Connection::new(stream, now_ms));
        self.server.idle_list.insert(token, now_ms);
        Ok(())
    }

    fn reregister(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let interest = if conn.wants_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        let _ = self.poll.registry().reregister(&mut conn.stream, token, interest);
    }

    fn drop_connection(&mut self, token: Token) {
        self.server.idle_list.remove(token);
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
    }
}

#[cfg(unix)]
fn bind_reuseaddr(addr: std::net::Ipv4Addr, port: u16) -> io::Result<std::net::TcpListener> {
    use std::net::SocketAddrV4;
    use std::os::fd::FromRawFd;

    // SAFETY: every fd produced below is checked for -1 (error) before use,
    // and ownership passes to `TcpListener` exactly once via `from_raw_fd`.
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let optval: libc::c_int = 1;
        let rc = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        if rc < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let sockaddr = SocketAddrV4::new(addr, port);
        let raw = socketaddr_v4_to_raw(sockaddr);
        let rc = libc::bind(
            fd,
            &raw as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );
        if rc < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let rc = libc::listen(fd, 1024);
        if rc < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let listener = std::net::TcpListener::from_raw_fd(fd);
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}

#[cfg(unix)]
fn socketaddr_v4_to_raw(addr: std::net::SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
        #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
        sin_len: 0,
    }
}
