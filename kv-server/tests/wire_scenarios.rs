//! Integration tests driving a real server over its TCP wire protocol,
//! covering the literal scenarios from the store's design notes (S1-S7).
//!
//! A small raw-socket helper stands in for the out-of-scope CLI client:
//! it only knows how to frame one request and read one response.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use kv_common::protocol::encode_request;
use kv_server::{Config, EventLoop};

fn start_server(idle_timeout_ms: u64) -> SocketAddr {
    let config = Config {
        addr: std::net::Ipv4Addr::new(127, 0, 0, 1),
        port: 0,
        idle_timeout_ms,
        worker_threads: 1,
    };
    let mut event_loop = EventLoop::bind(&config).expect("bind ephemeral port");
    let addr = event_loop.local_addr().expect("local addr");
    thread::spawn(move || {
        let _ = event_loop.run();
    });
    // Give the background thread a moment to enter its poll loop.
    thread::sleep(Duration::from_millis(50));
    addr
}

fn send_request(stream: &mut TcpStream, args: &[&[u8]]) -> Vec<u8> {
    stream.write_all(&encode_request(args)).unwrap();

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).unwrap();
    let body_len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).unwrap();
    body
}

fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).expect("connect to test server")
}

#[test]
fn s1_set_get_del() {
    let addr = start_server(5_000);
    let mut c = connect(addr);

    assert_eq!(send_request(&mut c, &[b"set", b"k", b"hello"]), vec![0]);

    let reply = send_request(&mut c, &[b"get", b"k"]);
    assert_eq!(reply, [&[2u8], &5u32.to_le_bytes()[..], b"hello"].concat());

    let reply = send_request(&mut c, &[b"del", b"k"]);
    assert_eq!(reply, [&[3u8], &1i64.to_le_bytes()[..]].concat());

    assert_eq!(send_request(&mut c, &[b"get", b"k"]), vec![0]);
}

#[test]
fn s2_keys_lists_both_entries() {
    let addr = start_server(5_000);
    let mut c = connect(addr);
    send_request(&mut c, &[b"set", b"a", b"1"]);
    send_request(&mut c, &[b"set", b"b", b"2"]);

    let reply = send_request(&mut c, &[b"keys"]);
    assert_eq!(reply[0], 5); // ARR tag
    let n = u32::from_le_bytes(reply[1..5].try_into().unwrap());
    assert_eq!(n, 2);
}

#[test]
fn s3_type_guarding() {
    let addr = start_server(5_000);
    let mut c = connect(addr);
    send_request(&mut c, &[b"set", b"x", b"foo"]);
    let reply = send_request(&mut c, &[b"zadd", b"x", b"1.0", b"m"]);
    assert_eq!(reply[0], 1); // ERR tag
    assert_eq!(i32::from_le_bytes(reply[1..5].try_into().unwrap()), 3); // ERR_TYPE

    send_request(&mut c, &[b"zadd", b"y", b"1.5", b"m"]);
    let reply = send_request(&mut c, &[b"get", b"y"]);
    assert_eq!(reply[0], 1);
    assert_eq!(i32::from_le_bytes(reply[1..5].try_into().unwrap()), 3);
}

#[test]
fn s4_ttl_expires() {
    let addr = start_server(5_000);
    let mut c = connect(addr);
    send_request(&mut c, &[b"set", b"k", b"v"]);

    let reply = send_request(&mut c, &[b"expire", b"k", b"50"]);
    assert_eq!(reply, [&[3u8], &1i64.to_le_bytes()[..]].concat());

    let reply = send_request(&mut c, &[b"pttl", b"k"]);
    let ms = i64::from_le_bytes(reply[1..9].try_into().unwrap());
    assert!((0..=50).contains(&ms));

    thread::sleep(Duration::from_millis(150));
    assert_eq!(send_request(&mut c, &[b"get", b"k"]), vec![0]);

    let reply = send_request(&mut c, &[b"pttl", b"k"]);
    assert_eq!(i64::from_le_bytes(reply[1..9].try_into().unwrap()), -2);
}

#[test]
fn s5_zset_query_orders_by_score_then_name() {
    let addr = start_server(5_000);
    let mut c = connect(addr);
    send_request(&mut c, &[b"zadd", b"s", b"1", b"a"]);
    send_request(&mut c, &[b"zadd", b"s", b"2", b"b"]);
    send_request(&mut c, &[b"zadd", b"s", b"2", b"c"]);

    let reply = send_request(&mut c, &[b"zquery", b"s", b"2", b"", b"0", b"10"]);
    assert_eq!(reply[0], 5);
    let n = u32::from_le_bytes(reply[1..5].try_into().unwrap());
    assert_eq!(n, 4); // two (name, score) pairs
}

#[test]
fn s6_oversized_response_becomes_err_2big() {
    let addr = start_server(5_000);
    let mut c = connect(addr);

    // No single SET can frame a value large enough to make its own GET
    // response exceed K_MAX_MSG (the request itself is bounded by the same
    // limit). Instead, build up enough keys that the `keys` response body
    // — an array of all of them — overflows it.
    let value = vec![b'x'; 64];
    let mut key_count = 0;
    loop {
        let key = format!("k{key_count}").into_bytes();
        send_request(&mut c, &[b"set", &key, &value]);
        key_count += 1;

        let reply = send_request(&mut c, &[b"keys"]);
        if reply[0] == 1 {
            assert_eq!(i32::from_le_bytes(reply[1..5].try_into().unwrap()), 2); // ERR_2BIG
            return;
        }
        assert!(key_count < 10_000, "never tripped ERR_2BIG");
    }
}

#[test]
fn s7_idle_connection_is_closed_after_timeout() {
    let addr = start_server(200);
    let mut c = connect(addr);

    thread::sleep(Duration::from_millis(600));

    let mut buf = [0u8; 1];
    let n = c.read(&mut buf).unwrap();
    assert_eq!(n, 0, "expected EOF on an idle connection past its timeout");
}

#[test]
fn shutdown_command_stops_the_loop() {
    let addr = start_server(5_000);
    let mut c = connect(addr);
    let reply = send_request(&mut c, &[b"shutdown"]);
    assert_eq!(reply[0], 2); // STR tag

    thread::sleep(Duration::from_millis(100));
    // The loop has exited; a fresh connection attempt should fail or the
    // socket should no longer accept.
    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
}
