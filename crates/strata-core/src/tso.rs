//! Hybrid cluster timestamps.
//!
//! A cluster timestamp packs wall-clock milliseconds and a logical counter
//! into one u64: `(physical_ms << LOGICAL_BITS) | logical`. Positions,
//! expiry fences, and plan start times all use this encoding.

use chrono::{DateTime, TimeZone, Utc};

/// Number of low bits reserved for the logical counter.
pub const LOGICAL_BITS: u32 = 18;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Composes a cluster timestamp from physical milliseconds and a logical
/// counter.
#[must_use]
pub const fn compose_ts(physical_ms: i64, logical: u64) -> u64 {
    ((physical_ms as u64) << LOGICAL_BITS) | (logical & LOGICAL_MASK)
}

/// Splits a cluster timestamp into physical milliseconds and the logical
/// counter.
#[must_use]
pub const fn parse_ts(ts: u64) -> (i64, u64) {
    ((ts >> LOGICAL_BITS) as i64, ts & LOGICAL_MASK)
}

/// The wall-clock instant of a cluster timestamp.
#[must_use]
pub fn ts_to_datetime(ts: u64) -> DateTime<Utc> {
    let (physical_ms, _) = parse_ts(ts);
    Utc.timestamp_millis_opt(physical_ms)
        .single()
        .unwrap_or_else(Utc::now)
}

/// A cluster timestamp `secs` seconds earlier, saturating at zero.
#[must_use]
pub fn sub_seconds(ts: u64, secs: u64) -> u64 {
    let (physical_ms, _) = parse_ts(ts);
    let rewound = physical_ms.saturating_sub((secs as i64).saturating_mul(1000));
    compose_ts(rewound.max(0), 0)
}
