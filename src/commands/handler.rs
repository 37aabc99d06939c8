//! Command Handler Module
//!
//! Maps a request (`[name, args...]`) to a handler over the [`Store`] and
//! produces the reply. Dispatch never fails: every error path comes back as
//! a RESP error value.
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key value [EX seconds | PX milliseconds]` - Set a key
//! - `GET key` - Get a key's value
//! - `MSET key value [key value ...]` - Set multiple keys
//! - `MGET key [key ...]` - Get multiple keys
//!
//! ### Hash Commands
//! - `HSET key field value [field value ...]` - Set fields
//! - `HGET key field` - Get a field
//! - `HMGET key field [field ...]` - Get several fields
//! - `HDEL key field [field ...]` - Remove fields
//! - `HEXISTS key field` - Check a field
//! - `HLEN key` - Number of fields
//! - `HGETALL key` - All fields and values
//!
//! ### Key Commands
//! - `DEL key [key ...]` - Delete keys
//! - `EXISTS key [key ...]` - Count existing keys
//! - `EXPIRE key seconds` - Set expiry
//! - `PEXPIRE key milliseconds` - Set expiry in ms
//! - `TTL key` - Remaining TTL in seconds
//! - `PERSIST key` - Remove expiry
//! - `TYPE key` - `none`, `string` or `hash`
//!
//! ### Server Commands
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  lookup()   │───>│   arity     │───>│  dispatch() │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                  Store -> shard_for(key)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::commands::error::{CommandError, CommandResult};
use crate::protocol::parser::parse_i64;
use crate::protocol::RespValue;
use crate::storage::ttl;
use crate::storage::{Shard, Store, ValueType};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

/// Accepted argument counts, command name included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&argc),
        }
    }
}

/// Every command the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo,
    Set,
    Get,
    Del,
    Exists,
    MGet,
    MSet,
    Ttl,
    Expire,
    PExpire,
    Persist,
    HSet,
    HGet,
    HDel,
    HExists,
    HLen,
    HGetAll,
    HMGet,
    Type,
}

impl Command {
    const ALL: [Command; 20] = [
        Command::Ping,
        Command::Echo,
        Command::Set,
        Command::Get,
        Command::Del,
        Command::Exists,
        Command::MGet,
        Command::MSet,
        Command::Ttl,
        Command::Expire,
        Command::PExpire,
        Command::Persist,
        Command::HSet,
        Command::HGet,
        Command::HDel,
        Command::HExists,
        Command::HLen,
        Command::HGetAll,
        Command::HMGet,
        Command::Type,
    ];

    /// Case-insensitive lookup by command name.
    pub fn lookup(name: &[u8]) -> Option<Command> {
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.name().as_bytes().eq_ignore_ascii_case(name))
    }

    /// Lower-case name, as used in error replies.
    pub fn name(self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Echo => "echo",
            Command::Set => "set",
            Command::Get => "get",
            Command::Del => "del",
            Command::Exists => "exists",
            Command::MGet => "mget",
            Command::MSet => "mset",
            Command::Ttl => "ttl",
            Command::Expire => "expire",
            Command::PExpire => "pexpire",
            Command::Persist => "persist",
            Command::HSet => "hset",
            Command::HGet => "hget",
            Command::HDel => "hdel",
            Command::HExists => "hexists",
            Command::HLen => "hlen",
            Command::HGetAll => "hgetall",
            Command::HMGet => "hmget",
            Command::Type => "type",
        }
    }

    fn arity(self) -> Arity {
        match self {
            Command::Ping => Arity::Between(1, 2),
            Command::Echo
            | Command::Get
            | Command::Ttl
            | Command::Persist
            | Command::HLen
            | Command::HGetAll
            | Command::Type => Arity::Exact(2),
            Command::Expire | Command::PExpire | Command::HGet | Command::HExists => {
                Arity::Exact(3)
            }
            Command::Del | Command::Exists | Command::MGet => Arity::AtLeast(2),
            Command::Set | Command::MSet | Command::HDel | Command::HMGet => Arity::AtLeast(3),
            Command::HSet => Arity::AtLeast(4),
        }
    }

    /// Whether `argc` arguments (name included) fit this command.
    pub fn accepts(self, argc: usize) -> bool {
        let paired = match self {
            Command::MSet => argc % 2 == 1,
            Command::HSet => argc % 2 == 0,
            _ => true,
        };
        paired && self.arity().accepts(argc)
    }
}

/// Executes commands against a shared [`Store`].
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Executes one request and returns the reply. Never fails.
    pub fn execute(&self, args: &[Bytes]) -> RespValue {
        self.try_execute(args).unwrap_or_else(RespValue::from)
    }

    fn try_execute(&self, args: &[Bytes]) -> CommandResult {
        let (name, rest) = args.split_first().ok_or(CommandError::EmptyCommand)?;
        let cmd = Command::lookup(name).ok_or_else(|| {
            CommandError::UnknownCommand(String::from_utf8_lossy(name).into_owned())
        })?;
        if !cmd.accepts(args.len()) {
            return Err(CommandError::WrongArity(cmd.name()));
        }

        self.dispatch(cmd, rest, Instant::now())
    }

    fn dispatch(&self, cmd: Command, args: &[Bytes], now: Instant) -> CommandResult {
        match cmd {
            Command::Ping => Ok(match args.first() {
                Some(msg) => RespValue::bulk_string(msg.clone()),
                None => RespValue::pong(),
            }),
            Command::Echo => Ok(RespValue::bulk_string(args[0].clone())),
            Command::Set => self.cmd_set(args, now),
            Command::Get => self.cmd_get(args, now),
            Command::Del => self.cmd_del(args, now),
            Command::Exists => self.cmd_exists(args, now),
            Command::MGet => self.cmd_mget(args, now),
            Command::MSet => self.cmd_mset(args),
            Command::Ttl => self.cmd_ttl(args, now),
            Command::Expire => self.cmd_expire(cmd, args, now, ttl::deadline_after_secs),
            Command::PExpire => self.cmd_expire(cmd, args, now, ttl::deadline_after_ms),
            Command::Persist => self.cmd_persist(args, now),
            Command::HSet => self.cmd_hset(args, now),
            Command::HGet => self.cmd_hget(args, now),
            Command::HDel => self.cmd_hdel(args, now),
            Command::HExists => self.cmd_hexists(args, now),
            Command::HLen => self.cmd_hlen(args, now),
            Command::HGetAll => self.cmd_hgetall(args, now),
            Command::HMGet => self.cmd_hmget(args, now),
            Command::Type => self.cmd_type(args, now),
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        self.store.shard_for(key)
    }

    fn parse_int(arg: &[u8]) -> Result<i64, CommandError> {
        parse_i64(arg).ok_or(CommandError::NotAnInteger)
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// SET key value [EX seconds | PX milliseconds]
    fn cmd_set(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = args[0].clone();
        let value = args[1].clone();
        let shard = self.shard(&key);

        match args.len() {
            2 => shard.set(key, value),
            4 => {
                let amount = Self::parse_int(&args[3])?;
                let deadline = if args[2].eq_ignore_ascii_case(b"EX") {
                    ttl::deadline_after_secs(now, amount)
                } else if args[2].eq_ignore_ascii_case(b"PX") {
                    ttl::deadline_after_ms(now, amount)
                } else {
                    return Err(CommandError::Syntax);
                };
                let at = deadline.ok_or(CommandError::InvalidExpireTime(Command::Set.name()))?;
                shard.set_with_deadline(key, value, at);
            }
            _ => return Err(CommandError::Syntax),
        }
        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        Ok(RespValue::optional_bulk(self.shard(key).get(key, now)?))
    }

    /// MGET key [key ...]
    ///
    /// Fails as a whole if any key holds a hash.
    fn cmd_mget(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let values = args
            .iter()
            .map(|key| self.shard(key).get(key, now))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RespValue::bulk_array(values))
    }

    /// MSET key value [key value ...]
    fn cmd_mset(&self, args: &[Bytes]) -> CommandResult {
        for pair in args.chunks_exact(2) {
            self.shard(&pair[0]).set(pair[0].clone(), pair[1].clone());
        }
        Ok(RespValue::ok())
    }

    // ========================================================================
    // Key Commands
    // ========================================================================

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let deleted = args
            .iter()
            .filter(|key| self.shard(key).del(key, now))
            .count();
        Ok(RespValue::integer(deleted as i64))
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let found = args
            .iter()
            .filter(|key| self.shard(key).type_of(key, now) != ValueType::None)
            .count();
        Ok(RespValue::integer(found as i64))
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        let ms = self.shard(key).ttl_ms(key, now);
        Ok(RespValue::integer(ttl::ms_to_secs_ceil(ms)))
    }

    /// EXPIRE key seconds / PEXPIRE key milliseconds
    fn cmd_expire(
        &self,
        cmd: Command,
        args: &[Bytes],
        now: Instant,
        deadline: fn(Instant, i64) -> Option<Instant>,
    ) -> CommandResult {
        let key = &args[0];
        let amount = Self::parse_int(&args[1])?;
        let at = deadline(now, amount).ok_or(CommandError::InvalidExpireTime(cmd.name()))?;
        let applied = self.shard(key).set_expire(key, at, now);
        Ok(RespValue::integer(i64::from(applied)))
    }

    /// PERSIST key
    fn cmd_persist(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        let cleared = self.shard(key).clear_expire(key, now);
        Ok(RespValue::integer(i64::from(cleared)))
    }

    /// TYPE key
    fn cmd_type(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        let kind = self.shard(key).type_of(key, now);
        Ok(RespValue::bulk_string(Bytes::from_static(
            kind.as_str().as_bytes(),
        )))
    }

    // ========================================================================
    // Hash Commands
    // ========================================================================

    /// HSET key field value [field value ...]
    fn cmd_hset(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        let pairs: Vec<(Bytes, Bytes)> = args[1..]
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        let created = self.shard(key).hset(key.clone(), &pairs, now)?;
        Ok(RespValue::integer(created as i64))
    }

    /// HGET key field
    fn cmd_hget(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        Ok(RespValue::optional_bulk(
            self.shard(key).hget(key, &args[1], now)?,
        ))
    }

    /// HMGET key field [field ...]
    fn cmd_hmget(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        Ok(RespValue::bulk_array(
            self.shard(key).hmget(key, &args[1..], now)?,
        ))
    }

    /// HDEL key field [field ...]
    fn cmd_hdel(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        let removed = self.shard(key).hdel(key, &args[1..], now)?;
        Ok(RespValue::integer(removed as i64))
    }

    /// HEXISTS key field
    fn cmd_hexists(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        let found = self.shard(key).hexists(key, &args[1], now)?;
        Ok(RespValue::integer(i64::from(found)))
    }

    /// HLEN key
    fn cmd_hlen(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        Ok(RespValue::integer(self.shard(key).hlen(key, now)? as i64))
    }

    /// HGETALL key
    ///
    /// Field order is unspecified.
    fn cmd_hgetall(&self, args: &[Bytes], now: Instant) -> CommandResult {
        let key = &args[0];
        let flat = self
            .shard(key)
            .hgetall(key, now)?
            .into_iter()
            .flat_map(|(field, value)| [Some(field), Some(value)]);
        Ok(RespValue::bulk_array(flat))
    }
}
