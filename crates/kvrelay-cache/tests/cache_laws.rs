//! Behavioural laws of the tiered cache, exercised through the public API.

use std::time::Duration;

use fake::Fake;
use fake::faker::lorem::en::{Sentence, Word};
use kvrelay_cache::{CacheConfig, Tier, TieredCache};
use serde::{Deserialize, Serialize};

fn cache_with(l1_size: usize, l2_size: usize) -> TieredCache {
    TieredCache::new(CacheConfig {
        l1_size,
        l2_size,
        ..Default::default()
    })
    .expect("valid config")
}

#[test]
fn test_tiers_never_exceed_capacity() {
    let cache = cache_with(8, 16);
    for i in 0..500 {
        let key = format!("{}:{i}", Word().fake::<String>());
        let value: String = Sentence(1..4).fake();
        cache.set_bytes(key, value.into_bytes(), None);

        // Re-read a few older keys to shuffle recency and exercise promotion.
        if i % 3 == 0 {
            cache.get_bytes(&format!("x:{}", i / 2));
        }

        let stats = cache.stats();
        assert!(stats.l1_size <= 8, "L1 grew to {}", stats.l1_size);
        assert!(stats.l2_size <= 16, "L2 grew to {}", stats.l2_size);
    }
}

#[test]
fn test_get_after_set_returns_value() {
    let cache = cache_with(32, 32);
    for _ in 0..50 {
        let key: String = Word().fake();
        let value: String = Sentence(3..8).fake();
        cache.set_bytes(key.clone(), value.clone().into_bytes(), None);
        assert_eq!(cache.get_bytes(&key), Some(value.into_bytes()));
    }
}

#[test]
fn test_lru_law() {
    let cache = cache_with(3, 10);
    cache.set_bytes("a", b"a".to_vec(), None);
    cache.set_bytes("b", b"b".to_vec(), None);
    cache.set_bytes("c", b"c".to_vec(), None);
    cache.get_bytes("a");
    cache.set_bytes("d", b"d".to_vec(), None);

    assert_eq!(cache.stats().l1_size, 3);
    assert_ne!(cache.tier_of("b"), Some(Tier::L1));
    for key in ["a", "c", "d"] {
        assert_eq!(cache.tier_of(key), Some(Tier::L1), "{key} should stay hot");
    }
}

#[test]
fn test_clear_is_idempotent() {
    let cache = cache_with(4, 4);
    for key in ["a", "b", "c", "d", "e", "f"] {
        cache.set_bytes(key, key.as_bytes().to_vec(), None);
    }
    cache.get_bytes("a");

    cache.clear();
    let once = cache.stats();
    cache.clear();
    assert_eq!(cache.stats(), once);
    assert_eq!(once.l1_size + once.l2_size, 0);
}

#[test]
fn test_expiry_law() {
    let cache = TieredCache::new(CacheConfig {
        default_ttl: Some(Duration::from_millis(100)),
        ..Default::default()
    })
    .expect("valid config");

    cache.set("k", &"v", None);
    assert_eq!(cache.get::<String>("k").as_deref(), Some("v"));

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(cache.get::<String>("k"), None);
}

#[test]
fn test_expired_entry_in_l2_reads_absent() {
    let cache = cache_with(1, 4);
    cache.set_bytes("old", b"1".to_vec(), Some(Duration::from_millis(20)));
    cache.set_bytes("new", b"2".to_vec(), None);
    assert_eq!(cache.tier_of("old"), Some(Tier::L2));

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(cache.get_bytes("old"), None);
    assert_eq!(cache.stats().l2_size, 0);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Document {
    id: u64,
    title: String,
    body: Vec<String>,
    scores: Vec<f64>,
}

#[test]
fn test_compressed_structured_value_roundtrip() {
    let cache = TieredCache::new(CacheConfig {
        enable_compression: true,
        compression_threshold: 256,
        ..Default::default()
    })
    .expect("valid config");

    let doc = Document {
        id: 42,
        title: Sentence(2..5).fake(),
        body: (0..200).map(|_| Sentence(5..12).fake()).collect(),
        scores: (0..100).map(f64::from).collect(),
    };
    cache.set("doc:42", &doc, None);
    assert_eq!(cache.get::<Document>("doc:42"), Some(doc));
}
