use std::pin::Pin;

use tokio_stream::Stream;

/// Binary-safe value of a remote key, hash field, or set member.
pub type Value = bytes::Bytes;

/// Stream of pub/sub messages delivered for a single channel pattern.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Condition under which a write is applied to the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum When {
    #[default]
    Always,
    /// Apply only if the key (or hash field) is already cached.
    Exists,
    /// Apply only if the key (or hash field) is not cached yet.
    NotExists,
}

/// Which ends of a score range are exclusive.
///
/// The discriminants match the integer flag carried by `zremrangebyscore` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exclude {
    #[default]
    None  = 0,
    Start = 1,
    Stop  = 2,
    Both  = 3,
}

impl Exclude {
    #[inline]
    pub fn excludes_start(self) -> bool {
        matches!(self, Exclude::Start | Exclude::Both)
    }

    #[inline]
    pub fn excludes_stop(self) -> bool {
        matches!(self, Exclude::Stop | Exclude::Both)
    }

    /// Returns true if `score` lies within `min..max` with respect to the exclusion flags.
    pub fn contains(self, min: f64, max: f64, score: f64) -> bool {
        let above = if self.excludes_start() { score > min } else { score >= min };
        let below = if self.excludes_stop() { score < max } else { score <= max };
        above && below
    }
}

impl TryFrom<i32> for Exclude {
    type Error = crate::error::NotificationError;

    fn try_from(flag: i32) -> Result<Self, Self::Error> {
        Ok(match flag {
            0 => Exclude::None,
            1 => Exclude::Start,
            2 => Exclude::Stop,
            3 => Exclude::Both,
            _ => return Err(crate::error::NotificationError::InvalidExclude(flag)),
        })
    }
}

/// A single pub/sub delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

impl Message {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Stable hash code of a member value.
///
/// Detailed notifications identify removed set and sorted-set members by this code instead of the member itself, so
/// the function must give the same answer in every process: 32-bit FNV-1a, reinterpreted as `i32`.
pub fn hash_code(member: &[u8]) -> i32 {
    member
        .iter()
        .fold(FNV_OFFSET_BASIS, |hash, byte| (hash ^ *byte as u32).wrapping_mul(FNV_PRIME)) as i32
}
