//! Hybrid logical clock timestamps.
//!
//! A [`Timestamp`] is the triple `(millis, counter, replica_id)`, totally
//! ordered field by field. Its canonical text form is
//!
//! ```text
//! 2024-03-01T12:00:00.000Z-002A-A1B2C3D4E5F60708
//! |------ millis (24) -----|ctr-|--- replica ---|
//! ```
//!
//! The date and counter are fixed width, so comparing two canonical strings
//! byte by byte gives the same answer as comparing the triples.
//!
//! ## Index buckets
//!
//! The merkle index files every timestamp under the minute it falls in,
//! written as [`INDEX_DEPTH`] base-3 digits. [`bucket_path`] produces those
//! digits and [`bucket_start`] maps a (possibly partial) path back to the
//! first millisecond it covers.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDateTime};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of levels in the merkle index (base-3 digits of the minute).
pub const INDEX_DEPTH: usize = 16;

/// Width of a leaf bucket in milliseconds.
pub const BUCKET_MILLIS: u64 = 60_000;

/// First millisecond the index can no longer address (`3^16` minutes).
pub const INDEX_HORIZON_MS: u64 = 3u64.pow(INDEX_DEPTH as u32) * BUCKET_MILLIS;

/// Largest logical counter value.
pub const MAX_COUNTER: u16 = 0xFFFF;

/// Default tolerated distance between logical and physical time.
pub const DEFAULT_MAX_DRIFT_MS: u64 = 60_000;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const ISO_LEN: usize = 24;

/// Base-3 digits of a timestamp's minute, most significant first.
pub type BucketPath = [u8; INDEX_DEPTH];

/// Decomposes `millis` into the index bucket path.
///
/// Depends on the minute only; counter and replica id never affect the path.
/// Minutes past the horizon saturate to the last bucket.
pub fn bucket_path(millis: u64) -> BucketPath {
    let mut minutes = (millis / BUCKET_MILLIS).min(INDEX_HORIZON_MS / BUCKET_MILLIS - 1);
    let mut path = [0u8; INDEX_DEPTH];
    for digit in path.iter_mut().rev() {
        *digit = (minutes % 3) as u8;
        minutes /= 3;
    }
    path
}

/// Returns the first millisecond covered by a bucket path prefix.
///
/// Missing trailing digits are treated as `0`.
pub fn bucket_start(prefix: &[u8]) -> u64 {
    let minutes = (0..INDEX_DEPTH).fold(0u64, |acc, i| {
        acc * 3 + u64::from(prefix.get(i).copied().unwrap_or(0))
    });
    minutes * BUCKET_MILLIS
}

/// A hybrid logical clock timestamp.
///
/// Ordering is by `millis`, then `counter`, then `replica_id`
/// (lexicographic). Timestamps are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    millis: u64,
    counter: u16,
    replica_id: String,
}

impl Timestamp {
    /// Creates a validated timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Format`] if `millis` lies beyond
    /// [`INDEX_HORIZON_MS`] or the replica id is empty or contains
    /// whitespace or control characters.
    pub fn new(millis: u64, counter: u16, replica_id: impl Into<String>) -> ProtocolResult<Self> {
        let replica_id = replica_id.into();
        if millis >= INDEX_HORIZON_MS {
            return Err(ProtocolError::format(
                &replica_id,
                format!("millis {millis} beyond index horizon {INDEX_HORIZON_MS}"),
            ));
        }
        validate_replica_id(&replica_id).map_err(|reason| ProtocolError::format(&replica_id, reason))?;
        Ok(Self {
            millis,
            counter,
            replica_id,
        })
    }

    /// Sentinel boundary ordering before every valid timestamp at `millis`.
    ///
    /// Counter is 0 and the replica id is empty, so `parse` never produces
    /// it. Millis past the horizon are clamped.
    pub fn floor(millis: u64) -> Self {
        Self {
            millis: millis.min(INDEX_HORIZON_MS - 1),
            counter: 0,
            replica_id: String::new(),
        }
    }

    /// Parses the canonical text form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Format`] unless `input` is exactly the
    /// canonical encoding of a valid timestamp.
    pub fn parse(input: &str) -> ProtocolResult<Self> {
        let (iso, rest) = input
            .split_at_checked(ISO_LEN)
            .ok_or_else(|| ProtocolError::format(input, "too short"))?;
        let date = NaiveDateTime::parse_from_str(iso, ISO_FORMAT)
            .map_err(|e| ProtocolError::format(input, format!("bad date: {e}")))?;
        let millis = u64::try_from(date.and_utc().timestamp_millis())
            .map_err(|_| ProtocolError::format(input, "date before the epoch"))?;

        let rest = rest
            .strip_prefix('-')
            .ok_or_else(|| ProtocolError::format(input, "expected '-' after date"))?;
        let (counter_hex, rest) = rest
            .split_at_checked(4)
            .ok_or_else(|| ProtocolError::format(input, "truncated counter"))?;
        if !counter_hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
        {
            return Err(ProtocolError::format(
                input,
                "counter must be 4 upper-case hex digits",
            ));
        }
        let counter = u16::from_str_radix(counter_hex, 16)
            .map_err(|e| ProtocolError::format(input, format!("bad counter: {e}")))?;
        let replica_id = rest
            .strip_prefix('-')
            .ok_or_else(|| ProtocolError::format(input, "expected '-' after counter"))?;

        let ts = Self::new(millis, counter, replica_id).map_err(|e| match e {
            ProtocolError::Format { reason, .. } => ProtocolError::format(input, reason),
            other => other,
        })?;
        if ts.to_string() != input {
            return Err(ProtocolError::format(input, "non-canonical encoding"));
        }
        Ok(ts)
    }

    /// Milliseconds since the Unix epoch.
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// Logical tie-breaking counter.
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Originating replica.
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Index bucket path of this timestamp.
    pub fn bucket_path(&self) -> BucketPath {
        bucket_path(self.millis)
    }

    /// 32-bit digest of the canonical encoding, used for index leaves.
    pub fn digest(&self) -> u32 {
        let hash = Sha256::digest(self.to_string().as_bytes());
        u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = i64::try_from(self.millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or(fmt::Error)?;
        write!(
            f,
            "{}-{:04X}-{}",
            date.format(ISO_FORMAT),
            self.counter,
            self.replica_id
        )
    }
}

impl FromStr for Timestamp {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_replica_id(replica_id: &str) -> Result<(), String> {
    if replica_id.is_empty() {
        return Err("empty replica id".into());
    }
    if replica_id
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err("replica id contains whitespace or control characters".into());
    }
    Ok(())
}

/// Source of physical time for a [`Clock`].
pub trait WallClock: Send + Sync {
    /// Current wall time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven wall clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }

    /// Moves the clock to `millis` (backwards jumps are allowed).
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Advances the clock by `millis`.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A replica's hybrid logical clock.
///
/// Each replica owns exactly one clock; the counter state is never shared
/// between replicas. Every timestamp handed out by [`Clock::send`] is
/// strictly greater than anything this clock produced or observed before.
#[derive(Debug)]
pub struct Clock<W = SystemClock> {
    last_millis: u64,
    counter: u16,
    replica_id: String,
    max_drift_ms: u64,
    wall: W,
}

impl Clock<SystemClock> {
    /// Creates a clock on the system wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Format`] if the replica id is invalid.
    pub fn new(replica_id: impl Into<String>) -> ProtocolResult<Self> {
        Self::with_wall_clock(replica_id, SystemClock)
    }

    /// Creates a clock with a random 16 hex digit replica id.
    pub fn with_random_replica() -> Self {
        let (_, low) = uuid::Uuid::new_v4().as_u64_pair();
        Self {
            last_millis: 0,
            counter: 0,
            replica_id: format!("{low:016X}"),
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
            wall: SystemClock,
        }
    }
}

impl<W: WallClock> Clock<W> {
    /// Creates a clock reading physical time from `wall`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Format`] if the replica id is invalid.
    pub fn with_wall_clock(replica_id: impl Into<String>, wall: W) -> ProtocolResult<Self> {
        let replica_id = replica_id.into();
        validate_replica_id(&replica_id).map_err(|reason| ProtocolError::format(&replica_id, reason))?;
        Ok(Self {
            last_millis: 0,
            counter: 0,
            replica_id,
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
            wall,
        })
    }

    /// Sets the tolerated drift between logical and physical time.
    pub fn with_max_drift(mut self, max_drift_ms: u64) -> Self {
        self.max_drift_ms = max_drift_ms;
        self
    }

    /// The replica this clock stamps events for.
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// The wall clock this clock reads.
    pub fn wall(&self) -> &W {
        &self.wall
    }

    /// Stamps a local event.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::ClockDrift`] if logical time ran too far ahead of
    ///   the wall clock
    /// - [`ProtocolError::CounterOverflow`] if the counter is exhausted
    pub fn send(&mut self) -> ProtocolResult<Timestamp> {
        let physical = self.wall.now_millis();
        let millis = self.last_millis.max(physical);
        let counter = if millis == self.last_millis {
            self.counter.checked_add(1)
        } else {
            Some(0)
        };

        self.check_drift(millis, physical)?;
        let counter = counter.ok_or(ProtocolError::CounterOverflow)?;
        self.advance(millis, counter)
    }

    /// Merges a timestamp received from another replica.
    ///
    /// Returns this clock's new position.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::DuplicateReplica`] if `remote` carries our replica id
    /// - [`ProtocolError::ClockDrift`] if `remote` is too far in the future
    /// - [`ProtocolError::CounterOverflow`] if the counter is exhausted
    pub fn recv(&mut self, remote: &Timestamp) -> ProtocolResult<Timestamp> {
        if remote.replica_id == self.replica_id {
            return Err(ProtocolError::DuplicateReplica(self.replica_id.clone()));
        }

        let physical = self.wall.now_millis();
        self.check_drift(remote.millis, physical)?;

        let last = self.last_millis;
        let millis = last.max(physical).max(remote.millis);
        let counter = if millis == last && millis == remote.millis {
            self.counter.max(remote.counter).checked_add(1)
        } else if millis == last {
            self.counter.checked_add(1)
        } else if millis == remote.millis {
            remote.counter.checked_add(1)
        } else {
            Some(0)
        };

        self.check_drift(millis, physical)?;
        let counter = counter.ok_or(ProtocolError::CounterOverflow)?;
        self.advance(millis, counter)
    }

    fn check_drift(&self, millis: u64, physical: u64) -> ProtocolResult<()> {
        let drift_ms = millis.saturating_sub(physical);
        if drift_ms > self.max_drift_ms {
            return Err(ProtocolError::ClockDrift {
                drift_ms,
                max_ms: self.max_drift_ms,
            });
        }
        Ok(())
    }

    fn advance(&mut self, millis: u64, counter: u16) -> ProtocolResult<Timestamp> {
        let ts = Timestamp::new(millis, counter, self.replica_id.clone())?;
        self.last_millis = millis;
        self.counter = counter;
        Ok(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const REPLICA: &str = "A1B2C3D4E5F60708";

    fn ts(millis: u64, counter: u16, replica: &str) -> Timestamp {
        Timestamp::new(millis, counter, replica).unwrap()
    }

    #[test]
    fn canonical_encoding() {
        let t = ts(1_709_294_400_000, 42, REPLICA);
        assert_eq!(t.to_string(), "2024-03-01T12:00:00.000Z-002A-A1B2C3D4E5F60708");
        assert_eq!(Timestamp::parse(&t.to_string()).unwrap(), t);
    }

    #[test]
    fn epoch_encoding() {
        let t = ts(0, 0, "0");
        assert_eq!(t.to_string(), "1970-01-01T00:00:00.000Z-0000-0");
    }

    #[test]
    fn parse_rejects_malformed() {
        let bad = [
            "",
            "garbage",
            "2024-03-01T12:00:00.000Z",
            "2024-03-01T12:00:00.000Z-002A",
            "2024-03-01T12:00:00.000Z-002A-",
            "2024-03-01T12:00:00.000Z-002a-NODE",
            "2024-03-01T12:00:00.000Z-02A-NODE",
            "2024-03-01 12:00:00.000Z-002A-NODE",
            "2024-13-01T12:00:00.000Z-002A-NODE",
            "2024-03-01T12:00:00.000Z_002A-NODE",
            "2024-03-01T12:00:00.000Z-002A-NO DE",
            "2099-03-01T12:00:00.000Z-0000-NODE",
        ];
        for input in bad {
            let err = Timestamp::parse(input).unwrap_err();
            assert!(
                matches!(err, ProtocolError::Format { .. }),
                "{input:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn replica_may_contain_dashes() {
        let t: Timestamp = "2024-03-01T12:00:00.000Z-0001-node-a".parse().unwrap();
        assert_eq!(t.replica_id(), "node-a");
        assert_eq!(t.counter(), 1);
    }

    #[test]
    fn ordering_is_millis_counter_replica() {
        let a = ts(1000, 5, "Z");
        let b = ts(1001, 0, "A");
        let c = ts(1001, 1, "A");
        let d = ts(1001, 1, "B");
        assert!(a < b && b < c && c < d);
        assert!(a.to_string() < b.to_string());
        assert!(c.to_string() < d.to_string());
    }

    #[test]
    fn floor_precedes_every_timestamp_at_millis() {
        let floor = Timestamp::floor(120_000);
        assert!(floor < ts(120_000, 0, "0"));
        assert!(floor > ts(119_999, MAX_COUNTER, "ZZZ"));
        assert!(floor.to_string() < ts(120_000, 0, "!").to_string());
    }

    #[test]
    fn bucket_path_depends_on_minute_only() {
        assert_eq!(bucket_path(0), [0; INDEX_DEPTH]);
        assert_eq!(bucket_path(59_999), [0; INDEX_DEPTH]);

        let mut one = [0; INDEX_DEPTH];
        one[INDEX_DEPTH - 1] = 1;
        assert_eq!(bucket_path(60_000), one);

        let mut four = [0; INDEX_DEPTH];
        four[INDEX_DEPTH - 2] = 1;
        four[INDEX_DEPTH - 1] = 1;
        assert_eq!(bucket_path(4 * 60_000 + 17), four);

        assert_eq!(
            ts(4 * 60_000 + 17, 3, "X").bucket_path(),
            ts(4 * 60_000, 0, "Y").bucket_path()
        );
    }

    #[test]
    fn bucket_start_pads_prefix() {
        assert_eq!(bucket_start(&[]), 0);
        assert_eq!(bucket_start(&[1]), 3u64.pow(15) * BUCKET_MILLIS);
        let path = bucket_path(1_709_294_400_000);
        assert_eq!(bucket_start(&path), 1_709_294_400_000);
    }

    #[test]
    fn send_advances_with_wall_clock() {
        let mut clock = Clock::with_wall_clock(REPLICA, ManualClock::new(10_000)).unwrap();
        let a = clock.send().unwrap();
        let b = clock.send().unwrap();
        assert_eq!((a.millis(), a.counter()), (10_000, 0));
        assert_eq!((b.millis(), b.counter()), (10_000, 1));

        clock.wall().advance(5);
        let c = clock.send().unwrap();
        assert_eq!((c.millis(), c.counter()), (10_005, 0));
        assert!(a < b && b < c);
    }

    #[test]
    fn send_is_monotonic_when_wall_clock_goes_back() {
        let mut clock = Clock::with_wall_clock(REPLICA, ManualClock::new(50_000)).unwrap();
        let a = clock.send().unwrap();
        clock.wall().set(49_000);
        let b = clock.send().unwrap();
        assert!(b > a);
        assert_eq!(b.millis(), 50_000);
    }

    #[test]
    fn send_detects_drift() {
        let mut clock = Clock::with_wall_clock(REPLICA, ManualClock::new(200_000))
            .unwrap()
            .with_max_drift(1_000);
        clock.send().unwrap();
        clock.wall().set(100_000);
        assert!(matches!(
            clock.send(),
            Err(ProtocolError::ClockDrift { drift_ms: 100_000, max_ms: 1_000 })
        ));
    }

    #[test]
    fn send_detects_counter_overflow() {
        let mut clock = Clock::with_wall_clock(REPLICA, ManualClock::new(1_000)).unwrap();
        for _ in 0..=MAX_COUNTER {
            clock.send().unwrap();
        }
        assert_eq!(clock.send(), Err(ProtocolError::CounterOverflow));
    }

    #[test]
    fn recv_moves_past_remote() {
        let mut clock = Clock::with_wall_clock(REPLICA, ManualClock::new(1_000)).unwrap();
        let remote = ts(1_500, 7, "REMOTE");
        let merged = clock.recv(&remote).unwrap();
        assert_eq!((merged.millis(), merged.counter()), (1_500, 8));
        assert!(clock.send().unwrap() > remote);
    }

    #[test]
    fn recv_rejects_own_replica_and_far_future() {
        let mut clock = Clock::with_wall_clock(REPLICA, ManualClock::new(1_000)).unwrap();
        assert!(matches!(
            clock.recv(&ts(1_000, 0, REPLICA)),
            Err(ProtocolError::DuplicateReplica(_))
        ));
        assert!(matches!(
            clock.recv(&ts(1_000 + DEFAULT_MAX_DRIFT_MS + 1, 0, "OTHER")),
            Err(ProtocolError::ClockDrift { .. })
        ));
    }

    #[test]
    fn random_replica_is_sixteen_hex_digits() {
        let clock = Clock::with_random_replica();
        assert_eq!(clock.replica_id().len(), 16);
        assert!(clock.replica_id().chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn parse_format_round_trip(
            millis in 0..INDEX_HORIZON_MS,
            counter in any::<u16>(),
            replica in "[0-9A-Za-z-]{1,24}",
        ) {
            let t = Timestamp::new(millis, counter, replica).unwrap();
            prop_assert_eq!(Timestamp::parse(&t.to_string()).unwrap(), t);
        }

        #[test]
        fn string_order_matches_triple_order(
            a in (0..INDEX_HORIZON_MS, any::<u16>(), "[0-9A-F]{16}"),
            b in (0..INDEX_HORIZON_MS, any::<u16>(), "[0-9A-F]{16}"),
        ) {
            let a = Timestamp::new(a.0, a.1, a.2).unwrap();
            let b = Timestamp::new(b.0, b.1, b.2).unwrap();
            prop_assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));
        }

        #[test]
        fn bucket_start_is_inverse_of_path(millis in 0..INDEX_HORIZON_MS) {
            let start = bucket_start(&bucket_path(millis));
            prop_assert!(start <= millis);
            prop_assert!(millis - start < BUCKET_MILLIS);
        }
    }
}
