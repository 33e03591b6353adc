//! Soft-TTL classification of cache entries.
//!
//! The store evicts entries at their hard TTL. Before that, an entry older
//! than the endpoint's freshness window is still kept around as a fallback
//! for when the origin fails.

use std::time::{Duration, SystemTime};

use super::CacheEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Classify an existing entry against a freshness window.
///
/// Fresh iff `now - written_at <= window`. Entries stamped in the future
/// (clock skew between instances) count as fresh.
pub fn classify(entry: &CacheEntry, window: Duration, now: SystemTime) -> Freshness {
    if entry.age(now) <= window {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}
