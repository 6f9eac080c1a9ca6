//! Decoding of keyspace notification payloads.
//!
//! Two channel families are involved. The plain one is the remote store's own keyspace notifications: the channel
//! name ends with the key and the payload is the bare event name. The detailed one is published by cache-aware clients
//! and carries `originator:event[:argument]`, where the argument is everything after the second colon and may contain
//! colons itself.

use crate::error::NotificationError;
use crate::types::Exclude;

/// Events of the plain keyspace family that the cache cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlainEvent {
    Expired,
    Other,
}

impl PlainEvent {
    pub fn parse(payload: &str) -> Self {
        match payload {
            "expired" => PlainEvent::Expired,
            _ => PlainEvent::Other,
        }
    }
}

/// A decoded detailed event, one variant per distinct cache action.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailedEvent {
    /// `hset`, `hdel`, `hincr`, `hincrbyfloat`, `hdecr`, `hdecrbyfloat`
    HashFieldChanged { field: String },
    /// `srem`
    SetMemberRemoved { hash_code: i32 },
    /// `zadd`: the member may already be cached under its old score.
    SortedSetMemberAdded { hash_code: i32 },
    /// `zrem`, `zincr`, `zdecr`
    SortedSetMemberChanged { hash_code: i32 },
    /// `zremrangebyscore`
    SortedSetRangeByScoreRemoved { min: f64, max: f64, exclude: Exclude },
    /// `del`, `getdel`
    KeyDeleted,
    /// `expire`
    ExpiryChanged,
    /// `rename_key`
    KeyRenamed { to: String },
    /// `set`
    StringSet,
    /// `setbit`, `setrange`, `incrby`, `incrbyfloat`, `decrby`, `decrbyfloat`, `append`
    StringMutated,
    /// `zremrangebyrank`, `zremrangebylex`
    SortedSetRangeRemoved,
}

/// A detailed payload split into its parts, not yet interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailedMessage<'a> {
    pub originator: &'a str,
    pub event:      &'a str,
    pub arg:        &'a str,
}

impl<'a> DetailedMessage<'a> {
    pub fn split(payload: &'a str) -> Result<Self, NotificationError> {
        let (originator, rest) = payload
            .split_once(':')
            .ok_or_else(|| NotificationError::MissingOriginator(payload.to_owned()))?;
        let (event, arg) = rest.split_once(':').unwrap_or((rest, ""));
        Ok(Self { originator, event, arg })
    }

    /// Interprets the event. `Ok(None)` stands for events the cache has no use for.
    pub fn decode(&self) -> Result<Option<DetailedEvent>, NotificationError> {
        let arg = self.arg;
        Ok(Some(match self.event {
            "hset" | "hdel" | "hincr" | "hincrbyfloat" | "hdecr" | "hdecrbyfloat" => {
                DetailedEvent::HashFieldChanged { field: arg.to_owned() }
            }
            "srem" => DetailedEvent::SetMemberRemoved {
                hash_code: parse_hash_code(arg)?,
            },
            "zadd" => DetailedEvent::SortedSetMemberAdded {
                hash_code: parse_hash_code(arg)?,
            },
            "zrem" | "zincr" | "zdecr" => DetailedEvent::SortedSetMemberChanged {
                hash_code: parse_hash_code(arg)?,
            },
            "zremrangebyscore" => parse_score_range(arg)?,
            "del" | "getdel" => DetailedEvent::KeyDeleted,
            "expire" => DetailedEvent::ExpiryChanged,
            "rename_key" if arg.is_empty() => return Ok(None),
            "rename_key" => DetailedEvent::KeyRenamed { to: arg.to_owned() },
            "set" => DetailedEvent::StringSet,
            "setbit" | "setrange" | "incrby" | "incrbyfloat" | "decrby" | "decrbyfloat" | "append" => {
                DetailedEvent::StringMutated
            }
            "zremrangebyrank" | "zremrangebylex" => DetailedEvent::SortedSetRangeRemoved,
            _ => return Ok(None),
        }))
    }
}

fn parse_hash_code(arg: &str) -> Result<i32, NotificationError> {
    arg.parse()
        .map_err(|_| NotificationError::InvalidHashCode(arg.to_owned()))
}

// The argument is `{min}-{max}-{exclude}`.
fn parse_score_range(arg: &str) -> Result<DetailedEvent, NotificationError> {
    let invalid = || NotificationError::InvalidScoreRange(arg.to_owned());

    let parts: Vec<&str> = arg.split('-').collect();
    let [min, max, exclude] = parts.as_slice()
    else {
        return Err(invalid());
    };

    Ok(DetailedEvent::SortedSetRangeByScoreRemoved {
        min:     min.parse().map_err(|_| invalid())?,
        max:     max.parse().map_err(|_| invalid())?,
        exclude: Exclude::try_from(exclude.parse::<i32>().map_err(|_| invalid())?)?,
    })
}
