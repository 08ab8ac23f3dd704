//! # Command Dispatcher
//!
//! Matches the first argument against the command table and runs the
//! handler against an explicit `&mut Server` context; there is no global
//! mutable state. Every handler resolves to a tagged [`Value`] and none
//! of them ever close the connection — errors are reported as ordinary
//! replies, not as protocol failures.

use kv_common::{ReplyError, Value};
use kv_core::Payload;

use crate::event_loop::Server;

pub fn dispatch(args: &[Vec<u8>], server: &mut Server, now_ms: u64) -> Value {
    let Some(cmd) = args.first() else {
        return unknown();
    };

    match cmd.to_ascii_lowercase().as_slice() {
        b"get" if args.len() == 2 => do_get(server, &args[1]),
        b"set" if args.len() == 3 => do_set(server, &args[1], &args[2]),
        b"del" if args.len() == 2 => do_del(server, &args[1]),
        b"keys" if args.len() == 1 => do_keys(server),
        b"exists" if args.len() >= 2 => do_exists(server, &args[1..]),
        b"expire" if args.len() == 3 => do_expire(server, &args[1], &args[2], now_ms),
        b"pttl" if args.len() == 2 => do_pttl(server, &args[1], now_ms),
        b"zadd" if args.len() == 4 => do_zadd(server, &args[1], &args[2], &args[3]),
        b"zrem" if args.len() == 3 => do_zrem(server, &args[1], &args[2]),
        b"zscore" if args.len() == 3 => do_zscore(server, &args[1], &args[2]),
        b"zquery" if args.len() == 6 => do_zquery(server, &args[1..]),
        b"command" if args.len() == 1 || args.len() == 2 => do_command(),
        b"shutdown" if args.len() == 1 => do_shutdown(server),
        _ => unknown(),
    }
}

fn unknown() -> Value {
    Value::err(ReplyError::Unknown, "Unknown cmd")
}

fn do_get(server: &mut Server, key: &[u8]) -> Value {
    match server.keyspace.get(key) {
        Some(Payload::Str(value)) => Value::Str(value.clone()),
        Some(Payload::ZSet(_)) => Value::err(ReplyError::Type, "expect string type"),
        None => Value::Nil,
    }
}

fn do_set(server: &mut Server, key: &[u8], value: &[u8]) -> Value {
    let result = server
        .keyspace
        .get_or_insert_with(key, || Payload::Str(value.to_vec()));
    match result {
        Ok(Payload::Str(existing)) => {
            *existing = value.to_vec();
            Value::Nil
        }
        Ok(Payload::ZSet(_)) => Value::err(ReplyError::Type, "expect string type"),
        Err(_) => Value::err(ReplyError::Unknown, "allocation failure"),
    }
}

fn do_del(server: &mut Server, key: &[u8]) -> Value {
    Value::Int(server.keyspace.del(key) as i64)
}

fn do_keys(server: &mut Server) -> Value {
    let keys = server.keyspace.keys();
    Value::Arr(keys.into_iter().map(Value::Str).collect())
}

fn do_exists(server: &mut Server, keys: &[Vec<u8>]) -> Value {
    let count = server
        .keyspace
        .exists_count(keys.iter().map(|k| k.as_slice()));
    Value::Int(count as i64)
}

fn do_expire(server: &mut Server, key: &[u8], ttl_ms: &[u8], now_ms: u64) -> Value {
    let Some(ttl_ms) = parse_i64(ttl_ms) else {
        return Value::err(ReplyError::Arg, "ttl is not an integer");
    };
    Value::Int(server.keyspace.expire(key, ttl_ms, now_ms) as i64)
}

fn do_pttl(server: &mut Server, key: &[u8], now_ms: u64) -> Value {
    Value::Int(server.keyspace.pttl_ms(key, now_ms))
}

fn do_zadd(server: &mut Server, key: &[u8], score: &[u8], name: &[u8]) -> Value {
    let Some(score) = parse_f64(score) else {
        return Value::err(ReplyError::Arg, "score is not a number");
    };
    let result = server
        .keyspace
        .get_or_insert_with(key, || Payload::ZSet(kv_core::ZSet::new()));
    match result {
        Ok(Payload::ZSet(zset)) => Value::Int(zset.add(name.to_vec(), score) as i64),
        Ok(Payload::Str(_)) => Value::err(ReplyError::Type, "expect zset type"),
        Err(_) => Value::err(ReplyError::Unknown, "allocation failure"),
    }
}

fn do_zrem(server: &mut Server, key: &[u8], name: &[u8]) -> Value {
    match server.keyspace.get_mut(key) {
        Some(Payload::ZSet(zset)) => Value::Int(zset.remove(name).is_some() as i64),
        Some(Payload::Str(_)) => Value::err(ReplyError::Type, "expect zset type"),
        None => Value::Nil,
    }
}

fn do_zscore(server: &mut Server, key: &[u8], name: &[u8]) -> Value {
    match server.keyspace.get_mut(key) {
        Some(Payload::ZSet(zset)) => match zset.score(name) {
            Some(score) => Value::Dbl(score),
            None => Value::Nil,
        },
        Some(Payload::Str(_)) => Value::err(ReplyError::Type, "expect zset type"),
        None => Value::Nil,
    }
}

fn do_zquery(server: &mut Server, args: &[Vec<u8>]) -> Value {
    let [key, score, name, offset, limit] = args else {
        unreachable!("arity checked by caller");
    };
    let Some(score) = parse_f64(score) else {
        return Value::err(ReplyError::Arg, "score is not a number");
    };
    let Some(offset) = parse_i64(offset) else {
        return Value::err(ReplyError::Arg, "offset is not an integer");
    };
    let Some(limit) = parse_i64(limit) else {
        return Value::err(ReplyError::Arg, "limit is not an integer");
    };
    if limit <= 0 {
        return Value::Arr(Vec::new());
    }

    match server.keyspace.get_mut(key) {
        Some(Payload::ZSet(zset)) => {
            let rows = zset.query(score, name, offset, limit as usize);
            let mut out = Vec::with_capacity(rows.len() * 2);
            for (member, member_score) in rows {
                out.push(Value::Str(member));
                out.push(Value::Dbl(member_score));
            }
            Value::Arr(out)
        }
        Some(Payload::Str(_)) => Value::err(ReplyError::Type, "expect zset type"),
        None => Value::Arr(Vec::new()),
    }
}

fn do_command() -> Value {
    Value::Str(
        b"get set del keys exists expire pttl zadd zrem zscore zquery command shutdown".to_vec(),
    )
}

fn do_shutdown(server: &mut Server) -> Value {
    server.request_shutdown();
    Value::Str(b"Server is shutting down...".to_vec())
}

/// Parses a signed 64-bit decimal integer, consuming the entire input.
fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Parses a finite `f64`, consuming the entire input; NaN is rejected.
fn parse_f64(bytes: &[u8]) -> Option<f64> {
    let value: f64 = std::str::from_utf8(bytes).ok()?.parse().ok()?;
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::Server;

    fn server() -> Server {
        Server::new_for_test()
    }

    #[test]
    fn set_get_del_cycle() {
        let mut s = server();
        assert_eq!(
            dispatch(&[b"set".to_vec(), b"k".to_vec(), b"hello".to_vec()], &mut s, 0),
            Value::Nil
        );
        assert_eq!(
            dispatch(&[b"get".to_vec(), b"k".to_vec()], &mut s, 0),
            Value::Str(b"hello".to_vec())
        );
        assert_eq!(
            dispatch(&[b"del".to_vec(), b"k".to_vec()], &mut s, 0),
            Value::Int(1)
        );
        assert_eq!(dispatch(&[b"get".to_vec(), b"k".to_vec()], &mut s, 0), Value::Nil);
    }

    #[test]
    fn type_mismatch_errors() {
        let mut s = server();
        dispatch(&[b"set".to_vec(), b"x".to_vec(), b"foo".to_vec()], &mut s, 0);
        let reply = dispatch(
            &[b"zadd".to_vec(), b"x".to_vec(), b"1.0".to_vec(), b"m".to_vec()],
            &mut s,
            0,
        );
        assert_eq!(reply, Value::err(ReplyError::Type, "expect zset type"));

        dispatch(
            &[b"zadd".to_vec(), b"y".to_vec(), b"1.5".to_vec(), b"m".to_vec()],
            &mut s,
            0,
        );
        let reply = dispatch(&[b"get".to_vec(), b"y".to_vec()], &mut s, 0);
        assert_eq!(reply, Value::err(ReplyError::Type, "expect string type"));
    }

    #[test]
    fn ttl_lifecycle() {
        let mut s = server();
        dispatch(&[b"set".to_vec(), b"k".to_vec(), b"v".to_vec()], &mut s, 0);
        assert_eq!(
            dispatch(&[b"expire".to_vec(), b"k".to_vec(), b"50".to_vec()], &mut s, 0),
            Value::Int(1)
        );
        match dispatch(&[b"pttl".to_vec(), b"k".to_vec()], &mut s, 10) {
            Value::Int(ms) => assert!((0..=50).contains(&ms)),
            other => panic!("unexpected {other:?}"),
        }
        s.keyspace.expire_due(200, 100);
        assert_eq!(dispatch(&[b"get".to_vec(), b"k".to_vec()], &mut s, 200), Value::Nil);
        assert_eq!(dispatch(&[b"pttl".to_vec(), b"k".to_vec()], &mut s, 200), Value::Int(-2));
    }

    #[test]
    fn zquery_orders_by_score_then_name() {
        let mut s = server();
        dispatch(&[b"zadd".to_vec(), b"s".to_vec(), b"1".to_vec(), b"a".to_vec()], &mut s, 0);
        dispatch(&[b"zadd".to_vec(), b"s".to_vec(), b"2".to_vec(), b"b".to_vec()], &mut s, 0);
        dispatch(&[b"zadd".to_vec(), b"s".to_vec(), b"2".to_vec(), b"c".to_vec()], &mut s, 0);

        let reply = dispatch(
            &[
                b"zquery".to_vec(),
                b"s".to_vec(),
                b"2".to_vec(),
                b"".to_vec(),
                b"0".to_vec(),
                b"10".to_vec(),
            ],
            &mut s,
            0,
        );
        assert_eq!(
            reply,
            Value::Arr(vec![
                Value::Str(b"b".to_vec()),
                Value::Dbl(2.0),
                Value::Str(b"c".to_vec()),
                Value::Dbl(2.0),
            ])
        );
    }

    #[test]
    fn unknown_command_and_bad_arity() {
        let mut s = server();
        assert_eq!(dispatch(&[b"bogus".to_vec()], &mut s, 0), unknown());
        assert_eq!(dispatch(&[b"get".to_vec()], &mut s, 0), unknown());
    }

    #[test]
    fn exists_dedupes_and_counts() {
        let mut s = server();
        dispatch(&[b"set".to_vec(), b"a".to_vec(), b"1".to_vec()], &mut s, 0);
        dispatch(&[b"set".to_vec(), b"b".to_vec(), b"2".to_vec()], &mut s, 0);
        let reply = dispatch(
            &[
                b"exists".to_vec(),
                b"a".to_vec(),
                b"a".to_vec(),
                b"b".to_vec(),
                b"c".to_vec(),
            ],
            &mut s,
            0,
        );
        assert_eq!(reply, Value::Int(2));
    }
}
