//! Command dispatch and per-command handlers.
//!
//! Replies are JSON values: `"OK"` and bulk strings as strings, nil as
//! `null`, integers as numbers, multi-bulk as arrays. `HGETALL` returns an
//! object.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::{json, Value as Json};

use infrasim_core::GlobPattern;

use crate::engine::KvEngine;
use crate::error::{KvError, KvResult};
use crate::value::{entry_size, StreamEntry, Value};

/// Default `SLOWLOG GET` count.
const SLOWLOG_DEFAULT_COUNT: usize = 10;

fn ok() -> Json {
    Json::from("OK")
}

fn check_arity(name: &str, args: &[String], min: usize, max: Option<usize>) -> KvResult<()> {
    if args.len() < min || max.is_some_and(|m| args.len() > m) {
        return Err(KvError::WrongArity(name.to_ascii_lowercase()));
    }
    Ok(())
}

fn parse_i64(s: &str) -> KvResult<i64> {
    s.parse().map_err(|_| KvError::NotInteger)
}

/// Absolute deadline `amount * unit_ms` after `now_ms`. `amount` must be
/// positive.
fn expiry_at(now_ms: u64, amount: i64, unit_ms: u64, command: &str) -> KvResult<u64> {
    u64::try_from(amount)
        .ok()
        .and_then(|a| a.checked_mul(unit_ms))
        .and_then(|ms| now_ms.checked_add(ms))
        .ok_or_else(|| KvError::InvalidExpire(command.to_string()))
}

fn parse_f64(s: &str) -> KvResult<f64> {
    let v: f64 = s.parse().map_err(|_| KvError::NotFloat)?;
    if v.is_nan() {
        return Err(KvError::NotFloat);
    }
    Ok(v)
}

/// Resolve Redis-style inclusive `start..=stop` indices (negative counts
/// from the end) against a collection of `len` items.
fn range_bounds(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Sorted-set members ordered by (score, member).
fn zset_ordered(z: &BTreeMap<String, f64>) -> Vec<(&String, f64)> {
    let mut members: Vec<(&String, f64)> = z.iter().map(|(m, s)| (m, *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    members
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

fn parse_stream_id(id: &str) -> KvResult<(u64, u64)> {
    let (ms, seq) = match id.split_once('-') {
        Some((ms, seq)) => (ms, seq),
        None => (id, "0"),
    };
    let ms = ms.parse().map_err(|_| KvError::InvalidStreamId)?;
    let seq = seq.parse().map_err(|_| KvError::InvalidStreamId)?;
    Ok((ms, seq))
}

impl KvEngine {
    /// Route one command to its handler. `name` is already uppercased.
    pub(crate) fn dispatch(&mut self, client: u64, name: &str, args: &[String]) -> KvResult<Json> {
        match name {
            // connection
            "PING" => self.ping(args),
            "ECHO" => {
                check_arity(name, args, 1, Some(1))?;
                Ok(Json::from(args[0].as_str()))
            }
            "CLIENT" => self.client(client, args),

            // strings
            "GET" => self.get(args),
            "SET" => self.set(args),
            "SETEX" => self.setex(args),
            "MGET" => self.mget(args),
            "MSET" => self.mset(args),
            "INCR" => self.incr_by(name, args, 1, Some(1), 1),
            "DECR" => self.incr_by(name, args, 1, Some(1), -1),
            "INCRBY" => self.incr_by(name, args, 2, Some(2), 1),
            "DECRBY" => self.incr_by(name, args, 2, Some(2), -1),
            "APPEND" => self.append(args),
            "STRLEN" => self.strlen(args),

            // keyspace
            "DEL" => self.del(args),
            "EXISTS" => self.exists(args),
            "TYPE" => self.type_of(args),
            "KEYS" => self.keys(args),
            "DBSIZE" => {
                check_arity(name, args, 0, Some(0))?;
                let now = self.now_ms();
                Ok(json!(self.keyspace.live_count(now)))
            }
            "FLUSHALL" | "FLUSHDB" => {
                let removed = self.keyspace.live_count(self.now_ms());
                self.keyspace.clear();
                tracing::debug!(component = %self.component_id, removed, "keyspace flushed");
                Ok(ok())
            }
            "EXPIRE" => self.expire(name, args, 1000),
            "PEXPIRE" => self.expire(name, args, 1),
            "TTL" => self.ttl(name, args, false),
            "PTTL" => self.ttl(name, args, true),
            "PERSIST" => self.persist(args),

            // hashes
            "HSET" => self.hset(args),
            "HGET" => self.hget(args),
            "HGETALL" => self.hgetall(args),
            "HDEL" => self.hdel(args),
            "HLEN" => self.collection_len(name, args),

            // lists
            "LPUSH" => self.push(name, args, true),
            "RPUSH" => self.push(name, args, false),
            "LPOP" => self.pop(name, args, true),
            "RPOP" => self.pop(name, args, false),
            "LRANGE" => self.lrange(args),
            "LLEN" => self.collection_len(name, args),

            // sets
            "SADD" => self.sadd(args),
            "SREM" => self.srem(args),
            "SMEMBERS" => self.smembers(args),
            "SISMEMBER" => self.sismember(args),
            "SCARD" => self.collection_len(name, args),

            // sorted sets
            "ZADD" => self.zadd(args),
            "ZRANGE" => self.zrange(args),
            "ZSCORE" => self.zscore(args),
            "ZCARD" => self.collection_len(name, args),

            // streams
            "XADD" => self.xadd(args),
            "XLEN" => self.collection_len(name, args),

            // pub/sub
            "PUBLISH" => self.publish(args),
            "SUBSCRIBE" => self.subscribe(client, args),
            "UNSUBSCRIBE" => self.unsubscribe(client, args),
            "PSUBSCRIBE" => self.psubscribe(client, args),
            "PUNSUBSCRIBE" => self.punsubscribe(client, args),
            "PUBSUB" => self.pubsub_cmd(args),

            // server
            "SLOWLOG" => self.slowlog_cmd(args),
            "INFO" => Ok(Json::from(self.info(args.first().map(String::as_str)))),

            _ => Err(KvError::UnknownCommand(name.to_ascii_lowercase())),
        }
    }

    // ── Connection ───────────────────────────────────────────────────

    fn ping(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("ping", args, 0, Some(1))?;
        Ok(match args.first() {
            Some(msg) => Json::from(msg.as_str()),
            None => Json::from("PONG"),
        })
    }

    fn client(&mut self, client: u64, args: &[String]) -> KvResult<Json> {
        check_arity("client", args, 1, None)?;
        match args[0].to_ascii_uppercase().as_str() {
            "SETNAME" => {
                check_arity("client|setname", &args[1..], 1, Some(1))?;
                if args[1].contains(' ') {
                    return Err(KvError::Syntax);
                }
                if let Some(info) = self.client_by_id_mut(client) {
                    info.name = args[1].clone();
                }
                Ok(ok())
            }
            "GETNAME" => Ok(self
                .clients
                .values()
                .find(|c| c.id == client)
                .filter(|c| !c.name.is_empty())
                .map(|c| Json::from(c.name.as_str()))
                .unwrap_or(Json::Null)),
            "ID" => Ok(json!(client)),
            "LIST" => {
                let now = self.now_ms();
                let lines: Vec<String> = self
                    .connected_clients()
                    .iter()
                    .map(|c| {
                        format!(
                            "id={} addr={} name={} age={} idle={} sub={} psub={} cmd={}",
                            c.id,
                            c.addr,
                            c.name,
                            now.saturating_sub(c.connected_at_ms) / 1000,
                            now.saturating_sub(c.last_active_ms) / 1000,
                            self.pubsub.channels_of(c.id).len(),
                            self.pubsub.patterns_of(c.id).len(),
                            c.last_command,
                        )
                    })
                    .collect();
                self.work += lines.len() as u64;
                Ok(Json::from(lines.join("\n")))
            }
            other => Err(KvError::UnknownSubcommand(other.to_string())),
        }
    }

    // ── Strings ──────────────────────────────────────────────────────

    fn get(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("get", args, 1, Some(1))?;
        match self.read_entry(&args[0]) {
            None => Ok(Json::Null),
            Some(entry) => match &entry.value {
                Value::String(s) => Ok(Json::from(s.as_str())),
                _ => Err(KvError::WrongType),
            },
        }
    }

    fn set(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("set", args, 2, None)?;
        let key = &args[0];
        let now = self.now_ms();

        let mut expires_at: Option<u64> = None;
        let mut nx = false;
        let mut xx = false;
        let mut keep_ttl = false;
        let mut i = 2;
        while i < args.len() {
            match args[i].to_ascii_uppercase().as_str() {
                "NX" => nx = true,
                "XX" => xx = true,
                "KEEPTTL" => keep_ttl = true,
                unit @ ("EX" | "PX") => {
                    let raw = args.get(i + 1).ok_or(KvError::Syntax)?;
                    let amount = parse_i64(raw)?;
                    if amount <= 0 {
                        return Err(KvError::InvalidExpire("set".into()));
                    }
                    let unit_ms = if unit == "EX" { 1000 } else { 1 };
                    expires_at = Some(expiry_at(now, amount, unit_ms, "set")?);
                    i += 1;
                }
                _ => return Err(KvError::Syntax),
            }
            i += 1;
        }
        if (nx && xx) || (keep_ttl && expires_at.is_some()) {
            return Err(KvError::Syntax);
        }

        let existing = self.peek_entry(key).map(|e| e.expires_at_ms);
        if (nx && existing.is_some()) || (xx && existing.is_none()) {
            return Ok(Json::Null);
        }
        if keep_ttl {
            expires_at = existing.flatten();
        }
        self.store(key, Value::String(args[1].clone()), expires_at)?;
        Ok(ok())
    }

    fn setex(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("setex", args, 3, Some(3))?;
        let secs = parse_i64(&args[1])?;
        if secs <= 0 {
            return Err(KvError::InvalidExpire("setex".into()));
        }
        let expires_at = expiry_at(self.now_ms(), secs, 1000, "setex")?;
        self.store(&args[0], Value::String(args[2].clone()), Some(expires_at))?;
        Ok(ok())
    }

    fn mget(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("mget", args, 1, None)?;
        let mut out = Vec::with_capacity(args.len());
        for key in args {
            let value = match self.read_entry(key) {
                Some(entry) => match &entry.value {
                    Value::String(s) => Json::from(s.as_str()),
                    _ => Json::Null,
                },
                None => Json::Null,
            };
            out.push(value);
        }
        Ok(Json::Array(out))
    }

    fn mset(&mut self, args: &[String]) -> KvResult<Json> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(KvError::WrongArity("mset".into()));
        }
        let sizes: Vec<(&str, u64)> = args
            .chunks(2)
            .map(|pair| {
                let value = Value::String(pair[1].clone());
                (pair[0].as_str(), entry_size(&pair[0], &value))
            })
            .collect();
        self.reserve_batch(&sizes)?;
        for pair in args.chunks(2) {
            self.work += 1;
            self.store(&pair[0], Value::String(pair[1].clone()), None)?;
        }
        Ok(ok())
    }

    fn incr_by(
        &mut self,
        name: &str,
        args: &[String],
        min: usize,
        max: Option<usize>,
        sign: i64,
    ) -> KvResult<Json> {
        check_arity(name, args, min, max)?;
        let delta = match args.get(1) {
            Some(raw) => parse_i64(raw)?.checked_mul(sign).ok_or(KvError::Overflow)?,
            None => sign,
        };
        let key = &args[0];
        let (current, expires_at) = match self.load_for_write(key, Value::into_string)? {
            Some((s, exp)) => (parse_i64(&s)?, exp),
            None => (0, None),
        };
        let next = current.checked_add(delta).ok_or(KvError::Overflow)?;
        self.store(key, Value::String(next.to_string()), expires_at)?;
        Ok(json!(next))
    }

    fn append(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("append", args, 2, Some(2))?;
        let key = &args[0];
        let (mut s, expires_at) = self
            .load_for_write(key, Value::into_string)?
            .unwrap_or_default();
        s.push_str(&args[1]);
        let len = s.len();
        self.store(key, Value::String(s), expires_at)?;
        Ok(json!(len))
    }

    fn strlen(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("strlen", args, 1, Some(1))?;
        match self.peek_entry(&args[0]) {
            None => Ok(json!(0)),
            Some(entry) => match &entry.value {
                Value::String(s) => Ok(json!(s.len())),
                _ => Err(KvError::WrongType),
            },
        }
    }

    // ── Keyspace ─────────────────────────────────────────────────────

    fn del(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("del", args, 1, None)?;
        let now = self.now_ms();
        let mut removed = 0;
        for key in args {
            self.work += 1;
            self.keyspace.expire_if_due(key, now);
            if self.keyspace.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(json!(removed))
    }

    fn exists(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("exists", args, 1, None)?;
        let mut count = 0;
        for key in args {
            if self.peek_entry(key).is_some() {
                count += 1;
            }
        }
        Ok(json!(count))
    }

    fn type_of(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("type", args, 1, Some(1))?;
        Ok(Json::from(
            self.peek_entry(&args[0])
                .map(|e| e.value.value_type().redis_name())
                .unwrap_or("none"),
        ))
    }

    fn keys(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("keys", args, 1, Some(1))?;
        let glob = GlobPattern::new(&args[0]);
        let now = self.now_ms();
        let live = self.keyspace.live_keys(now);
        let scanned = live.len() as u64;
        let matched: Vec<Json> = live
            .into_iter()
            .filter(|(k, _)| glob.matches(k))
            .map(|(k, _)| Json::from(k.as_str()))
            .collect();
        self.work += scanned;
        Ok(Json::Array(matched))
    }

    fn expire(&mut self, name: &str, args: &[String], unit_ms: i64) -> KvResult<Json> {
        check_arity(name, args, 2, Some(2))?;
        let amount = parse_i64(&args[1])?;
        let key = &args[0];
        if self.peek_entry(key).is_none() {
            return Ok(json!(0));
        }
        let name = name.to_ascii_lowercase();
        let ms = amount
            .checked_mul(unit_ms)
            .ok_or_else(|| KvError::InvalidExpire(name.clone()))?;
        if ms <= 0 {
            self.keyspace.remove(key);
            return Ok(json!(1));
        }
        let at = expiry_at(self.now_ms(), ms, 1, &name)?;
        self.keyspace.set_expiry(key, Some(at));
        Ok(json!(1))
    }

    fn ttl(&mut self, name: &str, args: &[String], millis: bool) -> KvResult<Json> {
        check_arity(name, args, 1, Some(1))?;
        let now = self.now_ms();
        Ok(match self.peek_entry(&args[0]) {
            None => json!(-2),
            Some(entry) if millis => json!(entry.ttl_ms(now)),
            Some(entry) => json!(entry.ttl_secs(now)),
        })
    }

    fn persist(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("persist", args, 1, Some(1))?;
        let key = &args[0];
        match self.peek_entry(key).map(|e| e.expires_at_ms) {
            Some(Some(_)) => {
                self.keyspace.set_expiry(key, None);
                Ok(json!(1))
            }
            _ => Ok(json!(0)),
        }
    }

    /// `HLEN`, `LLEN`, `SCARD`, `ZCARD`, `XLEN`.
    fn collection_len(&mut self, name: &str, args: &[String]) -> KvResult<Json> {
        check_arity(name, args, 1, Some(1))?;
        let Some(entry) = self.peek_entry(&args[0]) else {
            return Ok(json!(0));
        };
        let matches = matches!(
            (name, &entry.value),
            ("HLEN", Value::Hash(_))
                | ("LLEN", Value::List(_))
                | ("SCARD", Value::Set(_))
                | ("ZCARD", Value::SortedSet(_))
                | ("XLEN", Value::Stream(_))
        );
        if !matches {
            return Err(KvError::WrongType);
        }
        Ok(json!(entry.value.len()))
    }

    // ── Hashes ───────────────────────────────────────────────────────

    fn hset(&mut self, args: &[String]) -> KvResult<Json> {
        if args.len() < 3 || args.len() % 2 != 1 {
            return Err(KvError::WrongArity("hset".into()));
        }
        let key = &args[0];
        let (mut hash, expires_at) = self
            .load_for_write(key, Value::into_hash)?
            .unwrap_or_default();
        let mut added = 0;
        for pair in args[1..].chunks(2) {
            self.work += 1;
            if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                added += 1;
            }
        }
        self.store(key, Value::Hash(hash), expires_at)?;
        Ok(json!(added))
    }

    fn hget(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("hget", args, 2, Some(2))?;
        match self.read_entry(&args[0]) {
            None => Ok(Json::Null),
            Some(entry) => match &entry.value {
                Value::Hash(h) => Ok(h
                    .get(&args[1])
                    .map(|v| Json::from(v.as_str()))
                    .unwrap_or(Json::Null)),
                _ => Err(KvError::WrongType),
            },
        }
    }

    fn hgetall(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("hgetall", args, 1, Some(1))?;
        let result = match self.read_entry(&args[0]) {
            None => json!({}),
            Some(entry) => match &entry.value {
                Value::Hash(h) => json!(h),
                _ => return Err(KvError::WrongType),
            },
        };
        self.work += result.as_object().map(|o| o.len() as u64).unwrap_or(0);
        Ok(result)
    }

    fn hdel(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("hdel", args, 2, None)?;
        let key = &args[0];
        let Some((mut hash, expires_at)) = self.load_for_write(key, Value::into_hash)? else {
            return Ok(json!(0));
        };
        let removed = args[1..].iter().filter(|f| hash.remove(*f).is_some()).count();
        self.store_or_remove(key, Value::Hash(hash), expires_at)?;
        Ok(json!(removed))
    }

    // ── Lists ────────────────────────────────────────────────────────

    fn push(&mut self, name: &str, args: &[String], front: bool) -> KvResult<Json> {
        check_arity(name, args, 2, None)?;
        let key = &args[0];
        let (mut list, expires_at) = self
            .load_for_write(key, Value::into_list)?
            .unwrap_or((VecDeque::new(), None));
        for item in &args[1..] {
            self.work += 1;
            if front {
                list.push_front(item.clone());
            } else {
                list.push_back(item.clone());
            }
        }
        let len = list.len();
        self.store(key, Value::List(list), expires_at)?;
        Ok(json!(len))
    }

    fn pop(&mut self, name: &str, args: &[String], front: bool) -> KvResult<Json> {
        check_arity(name, args, 1, Some(1))?;
        let key = &args[0];
        let Some((mut list, expires_at)) = self.load_for_write(key, Value::into_list)? else {
            return Ok(Json::Null);
        };
        let item = if front { list.pop_front() } else { list.pop_back() };
        self.store_or_remove(key, Value::List(list), expires_at)?;
        Ok(item.map(Json::from).unwrap_or(Json::Null))
    }

    fn lrange(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("lrange", args, 3, Some(3))?;
        let start = parse_i64(&args[1])?;
        let stop = parse_i64(&args[2])?;
        let items: Vec<Json> = match self.read_entry(&args[0]) {
            None => Vec::new(),
            Some(entry) => match &entry.value {
                Value::List(list) => match range_bounds(start, stop, list.len()) {
                    Some((from, to)) => list
                        .range(from..=to)
                        .map(|v| Json::from(v.as_str()))
                        .collect(),
                    None => Vec::new(),
                },
                _ => return Err(KvError::WrongType),
            },
        };
        self.work += items.len() as u64;
        Ok(Json::Array(items))
    }

    // ── Sets ─────────────────────────────────────────────────────────

    fn sadd(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("sadd", args, 2, None)?;
        let key = &args[0];
        let (mut set, expires_at) = self
            .load_for_write(key, Value::into_set)?
            .unwrap_or((BTreeSet::new(), None));
        let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
        self.work += (args.len() - 1) as u64;
        self.store(key, Value::Set(set), expires_at)?;
        Ok(json!(added))
    }

    fn srem(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("srem", args, 2, None)?;
        let key = &args[0];
        let Some((mut set, expires_at)) = self.load_for_write(key, Value::into_set)? else {
            return Ok(json!(0));
        };
        let removed = args[1..].iter().filter(|m| set.remove(*m)).count();
        self.store_or_remove(key, Value::Set(set), expires_at)?;
        Ok(json!(removed))
    }

    fn smembers(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("smembers", args, 1, Some(1))?;
        let members: Vec<Json> = match self.read_entry(&args[0]) {
            None => Vec::new(),
            Some(entry) => match &entry.value {
                Value::Set(set) => set.iter().map(|m| Json::from(m.as_str())).collect(),
                _ => return Err(KvError::WrongType),
            },
        };
        self.work += members.len() as u64;
        Ok(Json::Array(members))
    }

    fn sismember(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("sismember", args, 2, Some(2))?;
        match self.read_entry(&args[0]) {
            None => Ok(json!(0)),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(json!(i64::from(set.contains(&args[1])))),
                _ => Err(KvError::WrongType),
            },
        }
    }

    // ── Sorted sets ──────────────────────────────────────────────────

    fn zadd(&mut self, args: &[String]) -> KvResult<Json> {
        if args.len() < 3 || args.len() % 2 != 1 {
            return Err(KvError::WrongArity("zadd".into()));
        }
        let pairs: Vec<(f64, &String)> = args[1..]
            .chunks(2)
            .map(|pair| parse_f64(&pair[0]).map(|score| (score, &pair[1])))
            .collect::<KvResult<_>>()?;
        let key = &args[0];
        let (mut zset, expires_at) = self
            .load_for_write(key, Value::into_sorted_set)?
            .unwrap_or_default();
        let mut added = 0;
        for (score, member) in pairs {
            self.work += 1;
            if zset.insert(member.clone(), score).is_none() {
                added += 1;
            }
        }
        self.store(key, Value::SortedSet(zset), expires_at)?;
        Ok(json!(added))
    }

    fn zrange(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("zrange", args, 3, Some(4))?;
        let with_scores = match args.get(3) {
            Some(flag) if flag.eq_ignore_ascii_case("WITHSCORES") => true,
            Some(_) => return Err(KvError::Syntax),
            None => false,
        };
        let start = parse_i64(&args[1])?;
        let stop = parse_i64(&args[2])?;
        let items: Vec<Json> = match self.read_entry(&args[0]) {
            None => Vec::new(),
            Some(entry) => match &entry.value {
                Value::SortedSet(z) => {
                    let ordered = zset_ordered(z);
                    match range_bounds(start, stop, ordered.len()) {
                        Some((from, to)) => ordered[from..=to]
                            .iter()
                            .flat_map(|(m, s)| {
                                let mut out = vec![Json::from(m.as_str())];
                                if with_scores {
                                    out.push(Json::from(format_score(*s)));
                                }
                                out
                            })
                            .collect(),
                        None => Vec::new(),
                    }
                }
                _ => return Err(KvError::WrongType),
            },
        };
        self.work += items.len() as u64;
        Ok(Json::Array(items))
    }

    fn zscore(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("zscore", args, 2, Some(2))?;
        match self.read_entry(&args[0]) {
            None => Ok(Json::Null),
            Some(entry) => match &entry.value {
                Value::SortedSet(z) => Ok(z
                    .get(&args[1])
                    .map(|s| Json::from(format_score(*s)))
                    .unwrap_or(Json::Null)),
                _ => Err(KvError::WrongType),
            },
        }
    }

    // ── Streams ──────────────────────────────────────────────────────

    fn xadd(&mut self, args: &[String]) -> KvResult<Json> {
        if args.len() < 4 || args.len() % 2 != 0 {
            return Err(KvError::WrongArity("xadd".into()));
        }
        let key = &args[0];
        let (mut stream, expires_at) = self
            .load_for_write(key, Value::into_stream)?
            .unwrap_or_default();
        let last = match stream.last() {
            Some(entry) => Some(parse_stream_id(&entry.id)?),
            None => None,
        };

        let id = if args[1] == "*" {
            let now = self.now_ms();
            match last {
                Some((ms, seq)) if ms >= now => {
                    (ms, seq.checked_add(1).ok_or(KvError::StreamIdTooSmall)?)
                }
                _ => (now, 0),
            }
        } else {
            let id = parse_stream_id(&args[1])?;
            if id == (0, 0) || last.is_some_and(|l| id <= l) {
                return Err(KvError::StreamIdTooSmall);
            }
            id
        };
        let id = format!("{}-{}", id.0, id.1);
        stream.push(StreamEntry {
            id: id.clone(),
            fields: args[2..]
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect(),
        });
        self.work += (args.len() / 2 - 1) as u64;
        self.store(key, Value::Stream(stream), expires_at)?;
        Ok(Json::from(id))
    }

    // ── Pub/sub ──────────────────────────────────────────────────────

    fn publish(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("publish", args, 2, Some(2))?;
        let now = self.now_ms();
        let reached = self.pubsub.publish(&args[0], &args[1], now);
        self.work += reached as u64;
        tracing::trace!(component = %self.component_id, channel = %args[0], reached, "published");
        Ok(json!(reached))
    }

    fn subscribe(&mut self, client: u64, args: &[String]) -> KvResult<Json> {
        check_arity("subscribe", args, 1, None)?;
        let replies: Vec<Json> = args
            .iter()
            .map(|ch| json!(["subscribe", ch, self.pubsub.subscribe(client, ch)]))
            .collect();
        self.sync_subscription_count(client);
        Ok(Json::Array(replies))
    }

    fn unsubscribe(&mut self, client: u64, args: &[String]) -> KvResult<Json> {
        let channels = if args.is_empty() {
            self.pubsub.channels_of(client)
        } else {
            args.to_vec()
        };
        let replies: Vec<Json> = channels
            .iter()
            .map(|ch| json!(["unsubscribe", ch, self.pubsub.unsubscribe(client, ch)]))
            .collect();
        self.sync_subscription_count(client);
        Ok(Json::Array(replies))
    }

    fn psubscribe(&mut self, client: u64, args: &[String]) -> KvResult<Json> {
        check_arity("psubscribe", args, 1, None)?;
        let replies: Vec<Json> = args
            .iter()
            .map(|p| json!(["psubscribe", p, self.pubsub.psubscribe(client, p)]))
            .collect();
        self.sync_subscription_count(client);
        Ok(Json::Array(replies))
    }

    fn punsubscribe(&mut self, client: u64, args: &[String]) -> KvResult<Json> {
        let patterns = if args.is_empty() {
            self.pubsub.patterns_of(client)
        } else {
            args.to_vec()
        };
        let replies: Vec<Json> = patterns
            .iter()
            .map(|p| json!(["punsubscribe", p, self.pubsub.punsubscribe(client, p)]))
            .collect();
        self.sync_subscription_count(client);
        Ok(Json::Array(replies))
    }

    fn pubsub_cmd(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("pubsub", args, 1, None)?;
        match args[0].to_ascii_uppercase().as_str() {
            "CHANNELS" => Ok(json!(self
                .pubsub
                .active_channels(args.get(1).map(String::as_str)))),
            "NUMSUB" => Ok(Json::Array(
                args[1..]
                    .iter()
                    .flat_map(|ch| [json!(ch), json!(self.pubsub.num_subscribers(ch))])
                    .collect(),
            )),
            "NUMPAT" => Ok(json!(self.pubsub.num_patterns())),
            other => Err(KvError::UnknownSubcommand(other.to_string())),
        }
    }

    // ── Server ───────────────────────────────────────────────────────

    fn slowlog_cmd(&mut self, args: &[String]) -> KvResult<Json> {
        check_arity("slowlog", args, 1, Some(2))?;
        match args[0].to_ascii_uppercase().as_str() {
            "GET" => {
                let count = match args.get(1) {
                    Some(raw) => usize::try_from(parse_i64(raw)?).unwrap_or(usize::MAX),
                    None => SLOWLOG_DEFAULT_COUNT,
                };
                serde_json::to_value(self.slowlog.get(count))
                    .map_err(|_| KvError::Syntax)
            }
            "LEN" => Ok(json!(self.slowlog.len())),
            "RESET" => {
                self.slowlog.reset();
                Ok(ok())
            }
            other => Err(KvError::UnknownSubcommand(other.to_string())),
        }
    }

    /// `INFO` text with server, clients, memory, stats and keyspace sections.
    fn info(&self, section: Option<&str>) -> String {
        let now = self.now_ms();
        let section = section.map(str::to_ascii_lowercase);
        let wants = |name: &str| {
            section
                .as_deref()
                .is_none_or(|s| s == name || s == "all" || s == "everything")
        };
        let (hits, misses) = self.metrics.hits_and_misses();
        let mut out = String::new();

        if wants("server") {
            out.push_str("# Server\r\n");
            out.push_str("redis_mode:standalone\r\n");
            out.push_str(&format!("uptime_in_seconds:{}\r\n", now / 1000));
            out.push_str("\r\n");
        }
        if wants("clients") {
            out.push_str("# Clients\r\n");
            out.push_str(&format!("connected_clients:{}\r\n", self.clients.len()));
            out.push_str("\r\n");
        }
        if wants("memory") {
            out.push_str("# Memory\r\n");
            out.push_str(&format!("used_memory:{}\r\n", self.keyspace.used_memory()));
            out.push_str(&format!("maxmemory:{}\r\n", self.config.max_memory));
            out.push_str(&format!(
                "maxmemory_policy:{}\r\n",
                self.config.max_memory_policy.as_str()
            ));
            out.push_str("\r\n");
        }
        if wants("stats") {
            out.push_str("# Stats\r\n");
            out.push_str(&format!("total_commands_processed:{}\r\n", self.total_commands));
            out.push_str(&format!("keyspace_hits:{hits}\r\n"));
            out.push_str(&format!("keyspace_misses:{misses}\r\n"));
            out.push_str(&format!("expired_keys:{}\r\n", self.keyspace.expired_keys()));
            out.push_str(&format!("evicted_keys:{}\r\n", self.keyspace.evicted_keys()));
            out.push_str(&format!(
                "pubsub_channels:{}\r\n",
                self.pubsub.active_channels(None).len()
            ));
            out.push_str(&format!("pubsub_patterns:{}\r\n", self.pubsub.num_patterns()));
            out.push_str("\r\n");
        }
        if wants("keyspace") {
            out.push_str("# Keyspace\r\n");
            let live = self.keyspace.live_keys(now);
            if !live.is_empty() {
                let expires = live.iter().filter(|(_, e)| e.expires_at_ms.is_some()).count();
                out.push_str(&format!("db0:keys={},expires={expires}\r\n", live.len()));
            }
        }
        out
    }
}
