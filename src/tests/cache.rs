// Unit Tests for the TTL Cache
//
// UNIT UNDER TEST: TtlCache
//
// BUSINESS RESPONSIBILITY:
//   - Never returns an expired entry
//   - Stays within the configured entry bound by evicting oldest-first
//   - Backs both the dedup/response cache and the bundle cache
//
// Tests run under paused time so TTL comparisons are deterministic.

use crate::cache::TtlCache;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_put_get_roundtrip() {
    let cache: TtlCache<String> = TtlCache::new(10);
    cache.put("k", "v".to_string(), Duration::from_secs(60));

    assert_eq!(cache.get("k"), Some("v".to_string()));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("other"), None);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entries_are_invisible_and_removed() {
    let cache: TtlCache<u32> = TtlCache::new(10);
    cache.put("k", 1, Duration::from_secs(10));

    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(cache.get("k"), Some(1), "Entry still live inside TTL");

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get("k"), None, "Expired entry must not be returned");
    assert_eq!(cache.len(), 0, "Expired entry is removed on read");
}

#[tokio::test(start_paused = true)]
async fn test_eviction_prefers_oldest_entry_at_capacity() {
    let cache: TtlCache<u32> = TtlCache::new(2);
    cache.put("oldest", 1, Duration::from_secs(60));
    tokio::time::advance(Duration::from_millis(10)).await;
    cache.put("middle", 2, Duration::from_secs(60));
    tokio::time::advance(Duration::from_millis(10)).await;

    cache.put("newest", 3, Duration::from_secs(60));

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("oldest"), None, "Oldest entry evicts first");
    assert_eq!(cache.get("middle"), Some(2));
    assert_eq!(cache.get("newest"), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_eviction_prefers_dead_entries_over_live_ones() {
    let cache: TtlCache<u32> = TtlCache::new(2);
    cache.put("short", 1, Duration::from_millis(50));
    tokio::time::advance(Duration::from_millis(10)).await;
    cache.put("long", 2, Duration::from_secs(60));

    tokio::time::advance(Duration::from_millis(100)).await; // "short" now dead
    cache.put("new", 3, Duration::from_secs(60));

    assert_eq!(cache.get("long"), Some(2), "Live entry survives eviction");
    assert_eq!(cache.get("new"), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_does_not_evict() {
    let cache: TtlCache<u32> = TtlCache::new(2);
    cache.put("a", 1, Duration::from_secs(60));
    cache.put("b", 2, Duration::from_secs(60));

    cache.put("a", 10, Duration::from_secs(60));

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("a"), Some(10));
    assert_eq!(cache.get("b"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_clear_empties_cache() {
    let cache: TtlCache<u32> = TtlCache::new(10);
    cache.put("a", 1, Duration::from_secs(60));
    cache.put("b", 2, Duration::from_secs(60));

    cache.clear();

    assert!(cache.is_empty());
    assert_eq!(cache.get("a"), None);
}
