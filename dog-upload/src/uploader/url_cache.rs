use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::PresignedPartUrl;

#[derive(Debug, Clone)]
struct CachedUrl {
    url: String,
    expires_at: DateTime<Utc>,
    /// When the entry stops being handed out as fresh
    stale_at: DateTime<Utc>,
}

/// Presigned part URLs keyed by part number, each with its own expiry.
///
/// An entry stops being fresh some time before it expires so a PUT started
/// near the deadline still lands inside it. That margin is a quarter of the
/// lifetime the URL had when cached, capped at `max_margin`, so short-lived
/// URLs stay usable for most of their life.
#[derive(Debug, Clone)]
pub struct PresignedUrlCache {
    entries: HashMap<u32, CachedUrl>,
    max_margin: Duration,
}

impl Default for PresignedUrlCache {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}

impl PresignedUrlCache {
    pub fn new(max_margin: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_margin,
        }
    }

    pub fn insert(&mut self, url: PresignedPartUrl) {
        self.insert_at(url, Utc::now());
    }

    /// Cache a URL received at `now`
    pub fn insert_at(&mut self, url: PresignedPartUrl, now: DateTime<Utc>) {
        let lifetime = url.expires_at - now;
        let margin = if lifetime <= Duration::zero() {
            Duration::zero()
        } else {
            (lifetime / 4).min(self.max_margin)
        };

        self.entries.insert(
            url.part_number,
            CachedUrl {
                stale_at: url.expires_at - margin,
                expires_at: url.expires_at,
                url: url.url,
            },
        );
    }

    pub fn extend<I: IntoIterator<Item = PresignedPartUrl>>(&mut self, urls: I) {
        let now = Utc::now();
        for url in urls {
            self.insert_at(url, now);
        }
    }

    /// A URL still fresh at `now`
    pub fn fresh(&self, part_number: u32, now: DateTime<Utc>) -> Option<&str> {
        self.entries
            .get(&part_number)
            .filter(|entry| entry.stale_at > now)
            .map(|entry| entry.url.as_str())
    }

    /// A URL that has not expired at `now`, fresh or not
    pub fn unexpired(&self, part_number: u32, now: DateTime<Utc>) -> Option<&str> {
        self.entries
            .get(&part_number)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.url.as_str())
    }

    pub fn is_fresh(&self, part_number: u32, now: DateTime<Utc>) -> bool {
        self.fresh(part_number, now).is_some()
    }

    pub fn invalidate(&mut self, part_number: u32) {
        self.entries.remove(&part_number);
    }

    /// Drop every entry that is no longer fresh
    pub fn evict_stale(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.stale_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(part_number: u32, expires_at: DateTime<Utc>) -> PresignedPartUrl {
        PresignedPartUrl {
            part_number,
            url: format!("https://store/part/{}", part_number),
            expires_at,
        }
    }

    #[test]
    fn long_lived_entries_go_stale_a_minute_early() {
        let now = Utc::now();
        let mut cache = PresignedUrlCache::default();
        cache.insert_at(url(1, now + Duration::minutes(30)), now);

        assert_eq!(cache.fresh(1, now), Some("https://store/part/1"));
        assert!(cache.is_fresh(1, now + Duration::minutes(28)));
        assert!(!cache.is_fresh(1, now + Duration::minutes(29) + Duration::seconds(1)));
        assert!(cache.unexpired(1, now + Duration::minutes(29) + Duration::seconds(1)).is_some());
        assert!(!cache.is_fresh(3, now));

        cache.invalidate(1);
        assert!(cache.is_empty());
    }

    #[test]
    fn short_lived_entries_are_fresh_on_arrival() {
        let now = Utc::now();
        let mut cache = PresignedUrlCache::default();
        cache.insert_at(url(1, now + Duration::seconds(60)), now);
        cache.insert_at(url(2, now + Duration::seconds(4)), now);

        assert!(cache.is_fresh(1, now));
        assert!(cache.is_fresh(1, now + Duration::seconds(44)));
        assert!(!cache.is_fresh(1, now + Duration::seconds(45)));

        assert!(cache.is_fresh(2, now + Duration::seconds(2)));
        assert!(!cache.is_fresh(2, now + Duration::seconds(3)));

        cache.evict_stale(now + Duration::seconds(3));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn already_expired_entries_are_never_handed_out() {
        let now = Utc::now();
        let mut cache = PresignedUrlCache::default();
        cache.insert_at(url(1, now - Duration::seconds(1)), now);

        assert!(cache.fresh(1, now).is_none());
        assert!(cache.unexpired(1, now).is_none());
    }
}
