//! Sortable prefixed identifiers and branded ID newtypes.
//!
//! An identifier has the shape `{prefix}_{15 hex}{11 base62}`. The hex block
//! encodes a 60-bit value: 48 bits of Unix milliseconds followed by a 12-bit
//! counter that restarts whenever the millisecond changes. Ascending IDs
//! therefore sort lexically in allocation order, even within one millisecond.
//!
//! Descending IDs store the bitwise complement of the same 60-bit value, so
//! lexical order is reverse-chronological. [`timestamp`] only inverts the
//! ascending encoding: a descending ID does not yield its creation time.
//!
//! The random suffix is drawn with rejection sampling so every base62 symbol
//! is equally likely.

use std::fmt;
use std::sync::LazyLock;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const COUNTER_BITS: u32 = 12;
const COUNTER_MAX: u64 = (1 << COUNTER_BITS) - 1;
const TIME_MASK: u64 = (1 << 48) - 1;
const VALUE_MASK: u64 = (1 << 60) - 1;
const HEX_WIDTH: usize = 15;
const RANDOM_WIDTH: usize = 11;

/// Length of an identifier after its `prefix_` separator.
pub const ENCODED_LENGTH: usize = HEX_WIDTH + RANDOM_WIDTH;

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
// 4 * 62: bytes at or above this are redrawn.
const REJECTION_LIMIT: u8 = 248;

/// Errors from decoding an identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// No `prefix_` separator.
    #[error("identifier {0:?} has no prefix separator")]
    MissingPrefix(String),
    /// The time block is too short or not hex.
    #[error("identifier {0:?} has a malformed time block")]
    Malformed(String),
}

/// Entity kinds that receive generated identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdPrefix {
    /// Conversation session.
    Session,
    /// User or assistant message.
    Message,
    /// Message part.
    Part,
    /// Background task.
    Task,
    /// Pending approval request.
    Permission,
}

impl IdPrefix {
    /// The literal prefix written before the separator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "ses",
            Self::Message => "msg",
            Self::Part => "prt",
            Self::Task => "tsk",
            Self::Permission => "per",
        }
    }
}

#[derive(Debug, Default)]
struct ClockState {
    last_ms: u64,
    counter: u64,
}

/// Monotonic identifier allocator.
///
/// The millisecond/counter pair is updated under a mutex, so concurrent
/// callers never observe the same value. A clock that steps backwards keeps
/// counting on the last observed millisecond; a counter that runs out within
/// one millisecond borrows the next one.
#[derive(Debug, Default)]
pub struct IdGenerator {
    state: Mutex<ClockState>,
}

impl IdGenerator {
    /// Create a generator with a fresh counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identifier stamped with the current wall clock.
    pub fn generate(&self, prefix: IdPrefix, descending: bool) -> String {
        #[allow(clippy::cast_sign_loss)]
        let now = crate::now_ms().max(0) as u64;
        self.generate_at(prefix, descending, now)
    }

    /// Allocate an identifier as if the clock read `now_ms`.
    pub fn generate_at(&self, prefix: IdPrefix, descending: bool, now_ms: u64) -> String {
        let value = self.next_value(now_ms);
        let value = if descending { !value & VALUE_MASK } else { value };
        format!("{}_{value:015x}{}", prefix.as_str(), random_base62(RANDOM_WIDTH))
    }

    fn next_value(&self, now_ms: u64) -> u64 {
        let mut state = self.state.lock();
        if now_ms > state.last_ms {
            state.last_ms = now_ms;
            state.counter = 0;
        } else if state.counter >= COUNTER_MAX {
            state.last_ms += 1;
            state.counter = 0;
        } else {
            state.counter += 1;
        }
        ((state.last_ms & TIME_MASK) << COUNTER_BITS) | state.counter
    }
}

fn random_base62(len: usize) -> String {
    let mut rng = rand::rng();
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let byte: u8 = rng.random();
        if byte < REJECTION_LIMIT {
            out.push(char::from(BASE62[usize::from(byte % 62)]));
        }
    }
    out
}

static GENERATOR: LazyLock<IdGenerator> = LazyLock::new(IdGenerator::new);

/// Allocate an identifier from the process-wide generator.
pub fn generate(prefix: IdPrefix, descending: bool) -> String {
    GENERATOR.generate(prefix, descending)
}

/// Recover the millisecond stamped into an ascending identifier.
///
/// Descending identifiers decode to a meaningless value; callers must know
/// which encoding an ID uses. The stamp can run ahead of the wall clock:
/// past 4096 allocations in one millisecond, or after the clock steps back,
/// the generator borrows later milliseconds to stay monotonic, and those
/// IDs report the borrowed one.
pub fn timestamp(id: &str) -> Result<u64, IdError> {
    let (_, encoded) = id
        .rsplit_once('_')
        .ok_or_else(|| IdError::MissingPrefix(id.to_owned()))?;
    let hex = encoded
        .get(..HEX_WIDTH)
        .ok_or_else(|| IdError::Malformed(id.to_owned()))?;
    let value = u64::from_str_radix(hex, 16).map_err(|_| IdError::Malformed(id.to_owned()))?;
    Ok(value >> COUNTER_BITS)
}

// ─────────────────────────────────────────────────────────────────────────────
// Branded IDs
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr, $descending:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Allocate a fresh identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(generate($prefix, $descending))
            }

            /// Wrap an existing identifier string.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(
    /// Session identifier. Descending, so newer sessions list first.
    SessionId,
    IdPrefix::Session,
    true
);
branded_id!(
    /// Message identifier. Ascending, so a session's messages sort chronologically.
    MessageId,
    IdPrefix::Message,
    false
);
branded_id!(
    /// Part identifier. Ascending within a message.
    PartId,
    IdPrefix::Part,
    false
);
branded_id!(
    /// Background task identifier.
    TaskId,
    IdPrefix::Task,
    false
);
branded_id!(
    /// Approval request identifier.
    PermissionId,
    IdPrefix::Permission,
    false
);

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn layout_is_prefix_hex_and_base62() {
        let id = IdGenerator::new().generate(IdPrefix::Message, false);
        let (prefix, encoded) = id.split_once('_').unwrap();
        assert_eq!(prefix, "msg");
        assert_eq!(encoded.len(), ENCODED_LENGTH);
        assert!(encoded[..HEX_WIDTH].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(encoded[HEX_WIDTH..].bytes().all(|b| BASE62.contains(&b)));
    }

    #[test]
    fn same_millisecond_ids_strictly_increase() {
        let generator = IdGenerator::new();
        let a = generator.generate_at(IdPrefix::Part, false, 1_700_000_000_000);
        let b = generator.generate_at(IdPrefix::Part, false, 1_700_000_000_000);
        assert!(a < b);
    }

    #[test]
    fn descending_ids_sort_in_reverse() {
        let asc = IdGenerator::new();
        let desc = IdGenerator::new();
        let times = [1_000, 1_000, 1_001, 5_000];
        let ascending: Vec<_> = times
            .iter()
            .map(|t| asc.generate_at(IdPrefix::Session, false, *t))
            .collect();
        let descending: Vec<_> = times
            .iter()
            .map(|t| desc.generate_at(IdPrefix::Session, true, *t))
            .collect();

        let mut sorted_asc = ascending.clone();
        sorted_asc.sort();
        assert_eq!(sorted_asc, ascending);

        let mut sorted_desc = descending.clone();
        sorted_desc.sort();
        sorted_desc.reverse();
        assert_eq!(sorted_desc, descending);
    }

    #[test]
    fn timestamp_recovers_millisecond() {
        let generator = IdGenerator::new();
        let id = generator.generate_at(IdPrefix::Task, false, 1_712_345_678_901);
        assert_eq!(timestamp(&id).unwrap(), 1_712_345_678_901);
        let again = generator.generate_at(IdPrefix::Task, false, 1_712_345_678_901);
        assert_eq!(timestamp(&again).unwrap(), 1_712_345_678_901);
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert_matches!(timestamp("nounderscore"), Err(IdError::MissingPrefix(_)));
        assert_matches!(timestamp("msg_zz"), Err(IdError::Malformed(_)));
        assert_matches!(timestamp("msg_zzzzzzzzzzzzzzzzzzzzzzzzzz"), Err(IdError::Malformed(_)));
    }

    #[test]
    fn exhausted_counter_borrows_next_millisecond() {
        let generator = IdGenerator::new();
        let mut previous = String::new();
        for _ in 0..=(COUNTER_MAX + 2) {
            let id = generator.generate_at(IdPrefix::Part, false, 10);
            assert!(id > previous);
            previous = id;
        }
        assert_eq!(timestamp(&previous).unwrap(), 11);
    }

    #[test]
    fn clock_going_backwards_stays_monotonic() {
        let generator = IdGenerator::new();
        let a = generator.generate_at(IdPrefix::Part, false, 2_000);
        let b = generator.generate_at(IdPrefix::Part, false, 1_500);
        assert!(b > a);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let generator = std::sync::Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = std::sync::Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| generator.generate_at(IdPrefix::Part, false, 42)[4..19].to_owned())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn branded_ids_carry_prefix() {
        assert!(SessionId::new().starts_with("ses_"));
        assert!(MessageId::new().starts_with("msg_"));
        assert!(PartId::new().starts_with("prt_"));
        assert!(TaskId::new().starts_with("tsk_"));
        assert!(PermissionId::new().starts_with("per_"));
    }

    #[test]
    fn branded_id_serde_is_transparent() {
        let id = MessageId::from("msg_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"msg_abc\"");
    }

    proptest! {
        #[test]
        fn ascending_ids_follow_allocation_order(mut steps in prop::collection::vec(0u64..3, 1..64)) {
            let generator = IdGenerator::new();
            let mut now = 1_600_000_000_000u64;
            let mut previous = generator.generate_at(IdPrefix::Message, false, now);
            for step in steps.drain(..) {
                now += step;
                let next = generator.generate_at(IdPrefix::Message, false, now);
                prop_assert!(next > previous);
                previous = next;
            }
        }
    }
}
