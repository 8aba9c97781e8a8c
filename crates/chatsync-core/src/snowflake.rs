//! Time-ordered unique identifiers.
//!
//! Layout (most significant first): 42 bits of milliseconds since
//! [`EPOCH_MS`], 5 bits worker, 5 bits process, 12 bits increment.

use std::{fmt, str::FromStr, sync::Mutex};

use chrono::{DateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// 2015-01-01T00:00:00Z in unix milliseconds.
pub const EPOCH_MS: u64 = 1_420_070_400_000;

const WORKER_BITS: u32 = 5;
const PROCESS_BITS: u32 = 5;
const INCREMENT_BITS: u32 = 12;
const TIMESTAMP_SHIFT: u32 = WORKER_BITS + PROCESS_BITS + INCREMENT_BITS;
const MAX_INCREMENT: u64 = (1 << INCREMENT_BITS) - 1;
const MAX_TIMESTAMP: u64 = (1 << 41) - 1;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// Milliseconds since the unix epoch embedded in this id.
    pub fn timestamp_ms(self) -> u64 {
        (self.0 >> TIMESTAMP_SHIFT) + EPOCH_MS
    }

    pub fn timestamp(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms() as i64)
            .single()
            .unwrap_or_default()
    }

    pub fn increment(self) -> u64 {
        self.0 & MAX_INCREMENT
    }

    /// Smallest id that could have been generated at `ms` (unix milliseconds).
    pub fn from_timestamp_ms(ms: u64) -> Self {
        Self(ms.saturating_sub(EPOCH_MS) << TIMESTAMP_SHIFT)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snowflake({})", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Accept both "123" and 123; servers are not consistent about it.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => s.parse().map_err(de::Error::custom),
            Raw::Num(n) => Ok(Self(n)),
        }
    }
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_ms: u64,
    increment: u64,
}

/// Generates snowflakes that are unique and non-decreasing for this generator.
///
/// If the wall clock goes backwards the generator keeps using the last
/// timestamp it issued and keeps counting; if the 12-bit increment runs out
/// within one millisecond it borrows the next millisecond.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    worker_id: u64,
    process_id: u64,
    state: Mutex<GeneratorState>,
}

impl Default for SnowflakeGenerator {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl SnowflakeGenerator {
    pub fn new(worker_id: u8, process_id: u8) -> Self {
        Self {
            worker_id: u64::from(worker_id) & ((1 << WORKER_BITS) - 1),
            process_id: u64::from(process_id) & ((1 << PROCESS_BITS) - 1),
            state: Mutex::new(GeneratorState::default()),
        }
    }

    pub fn generate(&self) -> Snowflake {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.generate_at(now)
    }

    /// Generate using `now_ms` (unix milliseconds) as the wall clock reading.
    pub fn generate_at(&self, now_ms: u64) -> Snowflake {
        let mut st = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = now_ms.saturating_sub(EPOCH_MS).min(MAX_TIMESTAMP);
        if now > st.last_ms {
            st.last_ms = now;
            st.increment = 0;
        } else if st.increment < MAX_INCREMENT {
            // Same millisecond, or the clock went backwards.
            st.increment += 1;
        } else {
            st.last_ms += 1;
            st.increment = 0;
        }

        Snowflake(
            (st.last_ms << TIMESTAMP_SHIFT)
                | (self.worker_id << (PROCESS_BITS + INCREMENT_BITS))
                | (self.process_id << INCREMENT_BITS)
                | st.increment,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = EPOCH_MS + 1_000_000;

    #[test]
    fn same_millisecond_ids_are_distinct_and_ordered() {
        let gen = SnowflakeGenerator::default();
        let ids: Vec<_> = (0..100).map(|_| gen.generate_at(T0)).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(ids[0].timestamp_ms(), T0);
        assert_eq!(ids[99].increment(), 99);
    }

    #[test]
    fn clock_regression_never_goes_backwards() {
        let gen = SnowflakeGenerator::default();
        let a = gen.generate_at(T0 + 50);
        let b = gen.generate_at(T0);
        let c = gen.generate_at(T0 - 1_000);
        let d = gen.generate_at(T0 + 51);
        assert!(a < b && b < c && c < d);
        assert_eq!(c.timestamp_ms(), T0 + 50);
        assert_eq!(d.timestamp_ms(), T0 + 51);
    }

    #[test]
    fn increment_overflow_borrows_next_millisecond() {
        let gen = SnowflakeGenerator::default();
        let mut last = gen.generate_at(T0);
        for _ in 0..MAX_INCREMENT + 5 {
            let next = gen.generate_at(T0);
            assert!(next > last);
            last = next;
        }
        assert_eq!(last.timestamp_ms(), T0 + 1);
    }

    #[test]
    fn ids_across_ms_boundaries_stay_unique() {
        let gen = SnowflakeGenerator::default();
        let mut seen = std::collections::HashSet::new();
        let mut prev = Snowflake(0);
        for i in 0..2_000u64 {
            // A jittery clock: mostly forward, sometimes backwards.
            let now = T0 + (i / 7) - if i % 13 == 0 { 3 } else { 0 };
            let id = gen.generate_at(now);
            assert!(id > prev);
            assert!(seen.insert(id));
            prev = id;
        }
    }

    #[test]
    fn serializes_as_decimal_string() {
        let id = Snowflake(175928847299117063);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"175928847299117063\"");
        let back: Snowflake = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        let numeric: Snowflake = serde_json::from_str("42").unwrap();
        assert_eq!(numeric, Snowflake(42));
    }

    #[test]
    fn known_snowflake_timestamp() {
        // Example id from the Discord API docs.
        let id: Snowflake = "175928847299117063".parse().unwrap();
        assert_eq!(id.timestamp_ms(), 1_462_015_105_796);
    }
}
