//! Cache validity registry.
//!
//! Process-wide map from cache key to a validity flag. A key absent from
//! the registry, or explicitly marked invalid, requires a network refresh
//! before being trusted; first use of any key therefore forces a refresh.
//! Invalidation is pure bookkeeping - it never triggers a refresh itself,
//! it only changes the outcome of the next refresh decision. Cross-key
//! dependencies (a parent refresh invalidating a child list) are expressed
//! by the caller; the registry has no notion of key hierarchy.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Opaque identifier for one synchronizable dataset instance,
/// e.g. a resource path plus the identifiers that parameterize it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

#[derive(Debug, Clone)]
struct ValidityEntry {
    valid: bool,
    refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct CacheValidityRegistry {
    entries: DashMap<CacheKey, ValidityEntry>,
}

impl CacheValidityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown keys are invalid: nothing may be trusted before its first
    /// successful refresh.
    pub fn is_valid(&self, key: &CacheKey) -> bool {
        self.entries.get(key).map(|e| e.valid).unwrap_or(false)
    }

    /// Record a successful refresh for this key
    pub fn mark_valid(&self, key: &CacheKey) {
        debug!(key = %key, "Cache key marked valid");
        self.entries.insert(
            key.clone(),
            ValidityEntry {
                valid: true,
                refreshed_at: Some(Utc::now()),
            },
        );
    }

    /// Mark a key untrusted so the next access re-fetches. Idempotent;
    /// keys never seen stay absent (they are already untrusted).
    pub fn invalidate(&self, key: &CacheKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.valid {
                debug!(key = %key, "Cache key invalidated");
            }
            entry.valid = false;
        }
    }

    /// When this key last completed a successful refresh
    pub fn last_refreshed(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).and_then(|e| e.refreshed_at)
    }

    /// Human-readable age of the last successful refresh, for status bars
    pub fn age_display(&self, key: &CacheKey) -> String {
        match self.last_refreshed(key) {
            Some(refreshed_at) => format_age((Utc::now() - refreshed_at).num_minutes()),
            None => "never".to_string(),
        }
    }

    /// Forget every entry. Used at sign-out so the next session trusts
    /// nothing left behind by the previous user.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn format_age(minutes: i64) -> String {
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        let remaining_mins = minutes % 60;
        if remaining_mins >= 30 {
            // Round up: 1h 30m+ becomes 2h
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        let remaining_hours = (minutes % 1440) / 60;
        if remaining_hours >= 12 {
            // Round up: 1d 12h+ becomes 2d
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_invalid() {
        let registry = CacheValidityRegistry::new();
        assert!(!registry.is_valid(&CacheKey::from("courses")));
    }

    #[test]
    fn mark_valid_then_invalidate_round_trip() {
        let registry = CacheValidityRegistry::new();
        let key = CacheKey::from("courses");

        registry.mark_valid(&key);
        assert!(registry.is_valid(&key));

        registry.invalidate(&key);
        assert!(!registry.is_valid(&key));

        // Idempotent
        registry.invalidate(&key);
        assert!(!registry.is_valid(&key));
    }

    #[test]
    fn invalidating_an_unknown_key_leaves_no_entry() {
        let registry = CacheValidityRegistry::new();
        let key = CacheKey::from("courses/1/tabs");
        registry.invalidate(&key);
        assert!(!registry.is_valid(&key));
        assert!(registry.last_refreshed(&key).is_none());
    }

    #[test]
    fn invalidation_preserves_last_refresh_time() {
        let registry = CacheValidityRegistry::new();
        let key = CacheKey::from("courses");
        registry.mark_valid(&key);
        let refreshed = registry.last_refreshed(&key);
        assert!(refreshed.is_some());

        registry.invalidate(&key);
        assert_eq!(registry.last_refreshed(&key), refreshed);
    }

    #[test]
    fn clear_forgets_everything() {
        let registry = CacheValidityRegistry::new();
        let key = CacheKey::from("courses");
        registry.mark_valid(&key);
        registry.clear();
        assert!(!registry.is_valid(&key));
        assert_eq!(registry.age_display(&key), "never");
    }

    #[test]
    fn age_display_for_fresh_key_is_just_now() {
        let registry = CacheValidityRegistry::new();
        let key = CacheKey::from("courses");
        assert_eq!(registry.age_display(&key), "never");
        registry.mark_valid(&key);
        assert_eq!(registry.age_display(&key), "just now");
    }

    #[test]
    fn test_format_age_rounding() {
        assert_eq!(format_age(0), "just now");
        assert_eq!(format_age(-3), "just now");
        assert_eq!(format_age(5), "5m ago");
        assert_eq!(format_age(61), "1h ago");
        assert_eq!(format_age(95), "2h ago");
        assert_eq!(format_age(1500), "1d ago");
        assert_eq!(format_age(2200), "2d ago");
    }
}
