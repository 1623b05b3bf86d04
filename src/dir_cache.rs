//! `DirCache` — short-lived positive/negative existence cache.
//!
//! Object-store `head`/`list` calls are the dominant latency cost for
//! metadata-heavy workloads (repeated `stat` of the same path). Entries are
//! tagged with one of three TTL classes and a single entry expires and is
//! evicted lazily on next lookup; there is no background sweeper.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long an entry remains valid once inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Valid for exactly one lookup, then evicted regardless of elapsed time.
    One,
    /// [`crate::config::FsConfig::dir_cache_short_ttl`].
    Short,
    /// An order of magnitude longer than `Short`; for prefixes expected to
    /// be stable (e.g. a directory that was just listed empty).
    Long,
}

#[derive(Clone, Copy)]
struct Entry {
    exists: bool,
    ttl: Ttl,
    inserted_at: Instant,
    short_ttl: Duration,
}

impl Entry {
    fn expired(&self, now: Instant, long_ttl: Duration) -> bool {
        match self.ttl {
            Ttl::One => true,
            Ttl::Short => now.saturating_duration_since(self.inserted_at) >= self.short_ttl,
            Ttl::Long => now.saturating_duration_since(self.inserted_at) >= long_ttl,
        }
    }
}

pub struct DirCache {
    entries: Mutex<HashMap<String, Entry>>,
    short_ttl: Duration,
    long_ttl: Duration,
}

impl DirCache {
    pub fn new(short_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            short_ttl,
            long_ttl: short_ttl * 10,
        }
    }

    /// Records that `path` is known to exist (or not), for `ttl`.
    pub fn set(&self, path: &str, exists: bool, ttl: Ttl) {
        let mut map = self.entries.lock().unwrap();
        map.insert(
            path.to_string(),
            Entry {
                exists,
                ttl,
                inserted_at: Instant::now(),
                short_ttl: self.short_ttl,
            },
        );
    }

    /// Returns a cached existence verdict for `path`, if a live entry exists.
    /// A `Ttl::One` entry is consumed (evicted) by this call even on hit.
    pub fn get(&self, path: &str) -> Option<bool> {
        let now = Instant::now();
        let mut map = self.entries.lock().unwrap();
        let entry = match map.get(path) {
            Some(e) => *e,
            None => return None,
        };
        if entry.expired(now, self.long_ttl) {
            map.remove(path);
            return if entry.ttl == Ttl::One { Some(entry.exists) } else { None };
        }
        if entry.ttl == Ttl::One {
            map.remove(path);
        }
        Some(entry.exists)
    }

    /// Existence check that consults the cache before `fallback`. A cache
    /// hit never invokes `fallback`; a miss calls it once and caches the
    /// result at `Ttl::Short`.
    pub fn exist<F>(&self, path: &str, fallback: F) -> crate::error::Result<bool>
    where
        F: FnOnce() -> crate::error::Result<bool>,
    {
        if let Some(hit) = self.get(path) {
            return Ok(hit);
        }
        let exists = fallback()?;
        self.set(path, exists, Ttl::Short);
        Ok(exists)
    }

    pub fn invalidate(&self, path: &str) {
        self.entries.lock().unwrap().remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn hit_avoids_fallback() {
        let cache = DirCache::new(Duration::from_millis(50));
        cache.set("/a", true, Ttl::Short);
        let mut calls = 0;
        let result = cache.exist("/a", || {
            calls += 1;
            Ok(false)
        });
        assert_eq!(result.unwrap(), true);
        assert_eq!(calls, 0);
    }

    #[test]
    fn miss_invokes_fallback_and_caches() {
        let cache = DirCache::new(Duration::from_millis(50));
        let mut calls = 0;
        let result = cache.exist("/a", || {
            calls += 1;
            Ok(true)
        });
        assert_eq!(result.unwrap(), true);
        assert_eq!(calls, 1);
        assert_eq!(cache.get("/a"), Some(true));
    }

    #[test]
    fn short_entry_expires_after_ttl() {
        let cache = DirCache::new(Duration::from_millis(20));
        cache.set("/a", true, Ttl::Short);
        sleep(Duration::from_millis(40));
        assert_eq!(cache.get("/a"), None);
    }

    #[test]
    fn one_shot_entry_consumed_on_first_hit() {
        let cache = DirCache::new(Duration::from_millis(50));
        cache.set("/a", false, Ttl::One);
        assert_eq!(cache.get("/a"), Some(false));
        assert_eq!(cache.get("/a"), None);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = DirCache::new(Duration::from_millis(50));
        cache.set("/a", true, Ttl::Long);
        cache.invalidate("/a");
        assert_eq!(cache.get("/a"), None);
    }
}
