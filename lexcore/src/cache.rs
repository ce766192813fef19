//! Two-Tier Cache (C8): in-memory LRU (L1) fronting a persistent `redb`
//! table (L2), with TTL, per-namespace compression, and glob invalidation.

use crate::error::{CoreError, CoreResult};
use lru::LruCache;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const L2_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_entries");

/// The closed set of cache namespaces; each carries its own L1 sizing, TTL
/// and compression policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Dictionary,
    Corpus,
    Semantic,
    Trie,
    Search,
    Literature,
}

impl Namespace {
    fn as_str(self) -> &'static str {
        match self {
            Namespace::Dictionary => "dictionary",
            Namespace::Corpus => "corpus",
            Namespace::Semantic => "semantic",
            Namespace::Trie => "trie",
            Namespace::Search => "search",
            Namespace::Literature => "literature",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "dictionary" => Some(Namespace::Dictionary),
            "corpus" => Some(Namespace::Corpus),
            "semantic" => Some(Namespace::Semantic),
            "trie" => Some(Namespace::Trie),
            "search" => Some(Namespace::Search),
            "literature" => Some(Namespace::Literature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Encoding {
    Raw = 0x00,
    Lz4 = 0x01,
    Zstd = 0x02,
    Gzip = 0x03,
}

impl Encoding {
    fn from_byte(b: u8) -> CoreResult<Self> {
        match b {
            0x00 => Ok(Encoding::Raw),
            0x01 => Ok(Encoding::Lz4),
            0x02 => Ok(Encoding::Zstd),
            0x03 => Ok(Encoding::Gzip),
            _ => Err(CoreError::CacheWriteFailed(format!("unknown encoding byte {b:#x}"))),
        }
    }
}

/// `namespace:subkey`, the only key shape the cache accepts.
pub fn make_key(namespace: Namespace, subkey: &str) -> String {
    format!("{}:{}", namespace.as_str(), subkey)
}

fn split_key(key: &str) -> Option<(Namespace, &str)> {
    let (ns, subkey) = key.split_once(':')?;
    Namespace::parse(ns).map(|ns| (ns, subkey))
}

/// Per-namespace sizing/TTL/compression policy.
#[derive(Debug, Clone, Copy)]
pub struct NamespacePolicy {
    pub l1_capacity: usize,
    pub l1_byte_cap: usize,
    pub default_ttl: Duration,
}

impl NamespacePolicy {
    fn default_for(ns: Namespace) -> Self {
        let default_ttl = match ns {
            Namespace::Search => Duration::from_secs(3600),
            Namespace::Semantic => Duration::from_secs(7 * 86_400),
            Namespace::Corpus => Duration::from_secs(30 * 86_400),
            _ => Duration::from_secs(30 * 86_400),
        };
        NamespacePolicy {
            l1_capacity: 1000,
            l1_byte_cap: 64 * 1024 * 1024,
            default_ttl,
        }
    }
}

struct L1Entry {
    payload: Vec<u8>,
    deadline: Instant,
}

/// One namespace's L1 ring: an entry-count LRU plus a running byte total
/// that additionally evicts least-recently-used entries whenever an insert
/// pushes the namespace over its byte cap, so `namespace.l1_byte_cap` is an
/// actual bound and not just a number `Config` carries around unused.
struct NamespaceL1 {
    entries: LruCache<String, L1Entry>,
    byte_cap: usize,
    current_bytes: usize,
}

impl NamespaceL1 {
    fn new(capacity: usize, byte_cap: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        NamespaceL1 {
            entries: LruCache::new(cap),
            byte_cap,
            current_bytes: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<&L1Entry> {
        self.entries.get(key)
    }

    fn pop(&mut self, key: &str) -> Option<L1Entry> {
        let removed = self.entries.pop(key);
        if let Some(entry) = &removed {
            self.current_bytes = self.current_bytes.saturating_sub(entry.payload.len());
        }
        removed
    }

    fn put(&mut self, key: String, entry: L1Entry) {
        let incoming_len = entry.payload.len();
        if let Some(old) = self.entries.put(key, entry) {
            self.current_bytes = self.current_bytes.saturating_sub(old.payload.len());
        }
        self.current_bytes += incoming_len;
        while self.current_bytes > self.byte_cap {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.current_bytes = self.current_bytes.saturating_sub(evicted.payload.len());
                }
                None => break,
            }
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &L1Entry)> {
        self.entries.iter()
    }
}

const STRIPE_COUNT: usize = 32;

fn stripe_for(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % STRIPE_COUNT
}

/// Two-tier cache over a single `redb` database file.
pub struct Cache {
    db: Arc<Database>,
    /// One independent LRU ring per namespace, so a `search`-namespace flood
    /// can never evict `dictionary` entries — "each namespace has its own
    /// L1 capacity" (spec.md §4.8), not a capacity shared across namespaces.
    l1: Mutex<ahash::AHashMap<Namespace, NamespaceL1>>,
    /// Write-path striping only; L2 writes to unrelated keys that happen to
    /// hash into the same stripe serialize needlessly, but that's the
    /// documented tradeoff of a fixed-size stripe table (§4.8).
    write_locks: Vec<tokio::sync::Mutex<()>>,
    policies: std::collections::HashMap<Namespace, NamespacePolicy>,
    /// Monitoring counters, mirroring the teacher's `Engine::cache_stats`
    /// (hits, misses) pair; in-process observability, not the telemetry
    /// product surface the spec's Non-goals exclude.
    hits: std::sync::atomic::AtomicUsize,
    misses: std::sync::atomic::AtomicUsize,
}

/// Overrides for the closed configuration surface; any field left as the
/// struct's `Default` falls back to the built-in per-namespace default.
#[derive(Debug, Clone, Copy)]
pub struct CacheOverrides {
    pub l1_capacity_per_namespace: usize,
    pub l1_byte_cap_per_namespace: usize,
    pub ttl_search: Duration,
    pub ttl_semantic: Duration,
    pub ttl_corpus: Duration,
}

impl Default for CacheOverrides {
    fn default() -> Self {
        CacheOverrides {
            l1_capacity_per_namespace: 1000,
            l1_byte_cap_per_namespace: 64 * 1024 * 1024,
            ttl_search: Duration::from_secs(3600),
            ttl_semantic: Duration::from_secs(7 * 86_400),
            ttl_corpus: Duration::from_secs(30 * 86_400),
        }
    }
}

impl Cache {
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        Self::open_with_overrides(path, CacheOverrides::default())
    }

    pub fn open_with_overrides<P: AsRef<Path>>(path: P, overrides: CacheOverrides) -> CoreResult<Self> {
        if let Some(dir) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let db = Database::create(path.as_ref())
            .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
        {
            let w = db
                .begin_write()
                .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            {
                let _ = w
                    .open_table(L2_TABLE)
                    .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            }
            w.commit().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
        }

        let mut write_locks = Vec::with_capacity(STRIPE_COUNT);
        for _ in 0..STRIPE_COUNT {
            write_locks.push(tokio::sync::Mutex::new(()));
        }
        let policies: std::collections::HashMap<Namespace, NamespacePolicy> = [
            Namespace::Dictionary,
            Namespace::Corpus,
            Namespace::Semantic,
            Namespace::Trie,
            Namespace::Search,
            Namespace::Literature,
        ]
        .into_iter()
        .map(|ns| {
            let mut policy = NamespacePolicy::default_for(ns);
            policy.l1_capacity = overrides.l1_capacity_per_namespace;
            policy.l1_byte_cap = overrides.l1_byte_cap_per_namespace;
            policy.default_ttl = match ns {
                Namespace::Search => overrides.ttl_search,
                Namespace::Semantic => overrides.ttl_semantic,
                Namespace::Corpus => overrides.ttl_corpus,
                _ => policy.default_ttl,
            };
            (ns, policy)
        })
        .collect();

        let l1 = policies
            .iter()
            .map(|(ns, policy)| (*ns, NamespaceL1::new(policy.l1_capacity, policy.l1_byte_cap)))
            .collect();

        Ok(Cache {
            db: Arc::new(db),
            l1: Mutex::new(l1),
            write_locks,
            policies,
            hits: std::sync::atomic::AtomicUsize::new(0),
            misses: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    /// (hits, misses) across both tiers since this `Cache` was opened.
    pub fn cache_stats(&self) -> (usize, usize) {
        (
            self.hits.load(std::sync::atomic::Ordering::Relaxed),
            self.misses.load(std::sync::atomic::Ordering::Relaxed),
        )
    }

    /// Hit rate as a percentage (0.0 to 100.0); `None` if `get` has never
    /// been called.
    pub fn cache_hit_rate(&self) -> Option<f32> {
        let (hits, misses) = self.cache_stats();
        let total = hits + misses;
        if total == 0 {
            None
        } else {
            Some((hits as f32 / total as f32) * 100.0)
        }
    }

    /// Total L1 entry count across every namespace ring.
    pub fn cache_size(&self) -> usize {
        self.l1.lock().unwrap().values().map(|ring| ring.entries.len()).sum()
    }

    fn policy(&self, ns: Namespace) -> NamespacePolicy {
        self.policies.get(&ns).copied().unwrap_or(NamespacePolicy {
            l1_capacity: 1000,
            l1_byte_cap: 64 * 1024 * 1024,
            default_ttl: Duration::from_secs(600),
        })
    }

    fn choose_encoding(ns: Namespace, raw_len: usize) -> Encoding {
        if ns == Namespace::Search {
            return Encoding::Lz4;
        }
        if ns == Namespace::Semantic {
            return Encoding::Raw;
        }
        if raw_len < 1024 {
            Encoding::Raw
        } else if raw_len <= 1_048_576 {
            Encoding::Zstd
        } else {
            Encoding::Gzip
        }
    }

    fn compress(encoding: Encoding, raw: &[u8]) -> CoreResult<Vec<u8>> {
        match encoding {
            Encoding::Raw => Ok(raw.to_vec()),
            Encoding::Lz4 => Ok(lz4_flex::compress_prepend_size(raw)),
            Encoding::Zstd => {
                zstd::encode_all(raw, 3).map_err(|e| CoreError::CacheWriteFailed(e.to_string()))
            }
            Encoding::Gzip => {
                use std::io::Write;
                let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(raw)
                    .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
                enc.finish().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))
            }
        }
    }

    fn decompress(encoding: Encoding, payload: &[u8]) -> CoreResult<Vec<u8>> {
        match encoding {
            Encoding::Raw => Ok(payload.to_vec()),
            Encoding::Lz4 => lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| CoreError::CacheWriteFailed(e.to_string())),
            Encoding::Zstd => zstd::decode_all(payload)
                .map_err(|e| CoreError::CacheWriteFailed(e.to_string())),
            Encoding::Gzip => {
                use std::io::Read;
                let mut dec = flate2::read::GzDecoder::new(payload);
                let mut out = Vec::new();
                dec.read_to_end(&mut out)
                    .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
                Ok(out)
            }
        }
    }

    /// L1 hit returns immediately; L1 miss falls through to an L2 read,
    /// repopulating L1 on success. Expired entries are treated as misses
    /// and lazily evicted from L1.
    pub async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let ns = split_key(key).map(|(ns, _)| ns);
        if let Some(ns) = ns {
            let mut l1 = self.l1.lock().unwrap();
            if let Some(ring) = l1.get_mut(&ns) {
                if let Some(entry) = ring.get(key) {
                    if entry.deadline > Instant::now() {
                        self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        return Ok(Some(entry.payload.clone()));
                    }
                    ring.pop(key);
                }
            }
        }

        let db = self.db.clone();
        let key_owned = key.to_string();
        let raw = tokio::task::spawn_blocking(move || -> CoreResult<Option<Vec<u8>>> {
            let r = db.begin_read().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            let table = match r.open_table(L2_TABLE) {
                Ok(t) => t,
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(CoreError::CacheWriteFailed(e.to_string())),
            };
            match table
                .get(key_owned.as_str())
                .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?
            {
                Some(v) => Ok(Some(v.value().to_vec())),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))??;

        let Some(stored) = raw else {
            self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Ok(None);
        };
        if stored.is_empty() {
            self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Ok(None);
        }
        let encoding = Encoding::from_byte(stored[0])?;
        let payload = Self::decompress(encoding, &stored[1..])?;
        self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if let Some((ns, _)) = split_key(key) {
            let policy = self.policy(ns);
            let mut l1 = self.l1.lock().unwrap();
            l1.entry(ns)
                .or_insert_with(|| NamespaceL1::new(policy.l1_capacity, policy.l1_byte_cap))
                .put(
                    key.to_string(),
                    L1Entry {
                        payload: payload.clone(),
                        deadline: Instant::now() + policy.default_ttl,
                    },
                );
        }
        Ok(Some(payload))
    }

    /// Writes L2 first, then L1. If the L2 write fails the whole operation
    /// fails and L1 is left untouched. Writes to the same key are
    /// serialized through a striped lock table.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CoreResult<()> {
        let (ns, _) = split_key(key)
            .ok_or_else(|| CoreError::InvalidConfig(format!("malformed cache key {key}")))?;
        let policy = self.policy(ns);
        let ttl = ttl.unwrap_or(policy.default_ttl);
        let encoding = Self::choose_encoding(ns, value.len());
        let compressed = Self::compress(encoding, &value)?;
        let mut stored = Vec::with_capacity(compressed.len() + 1);
        stored.push(encoding as u8);
        stored.extend_from_slice(&compressed);

        let stripe = stripe_for(key);
        let _guard = self.write_locks[stripe].lock().await;

        let db = self.db.clone();
        let key_owned = key.to_string();
        let stored_for_db = stored.clone();
        tokio::task::spawn_blocking(move || -> CoreResult<()> {
            let w = db.begin_write().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            {
                let mut table = w
                    .open_table(L2_TABLE)
                    .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
                table
                    .insert(key_owned.as_str(), stored_for_db.as_slice())
                    .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            }
            w.commit().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))??;

        let mut l1 = self.l1.lock().unwrap();
        l1.entry(ns)
            .or_insert_with(|| NamespaceL1::new(policy.l1_capacity, policy.l1_byte_cap))
            .put(
                key.to_string(),
                L1Entry {
                    payload: value,
                    deadline: Instant::now() + ttl,
                },
            );
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> CoreResult<bool> {
        let stripe = stripe_for(key);
        let _guard = self.write_locks[stripe].lock().await;

        let db = self.db.clone();
        let key_owned = key.to_string();
        let existed = tokio::task::spawn_blocking(move || -> CoreResult<bool> {
            let w = db.begin_write().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            let existed = {
                let mut table = w
                    .open_table(L2_TABLE)
                    .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
                table
                    .remove(key_owned.as_str())
                    .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?
                    .is_some()
            };
            w.commit().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            Ok(existed)
        })
        .await
        .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))??;

        let l1_existed = match split_key(key) {
            Some((ns, _)) => {
                let mut l1 = self.l1.lock().unwrap();
                l1.get_mut(&ns).map(|ring| ring.pop(key).is_some()).unwrap_or(false)
            }
            None => false,
        };
        Ok(existed || l1_existed)
    }

    /// Matches `glob` (`*` and `?`) against every key in both tiers and
    /// deletes matches. Returns the number of distinct keys removed.
    pub async fn invalidate_pattern(&self, glob: &str) -> CoreResult<usize> {
        let matcher = GlobMatcher::new(glob);

        let db = self.db.clone();
        let l2_keys = tokio::task::spawn_blocking(move || -> CoreResult<Vec<String>> {
            let r = db.begin_read().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
            let table = match r.open_table(L2_TABLE) {
                Ok(t) => t,
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(CoreError::CacheWriteFailed(e.to_string())),
            };
            let mut keys = Vec::new();
            for item in table.iter().map_err(|e| CoreError::CacheWriteFailed(e.to_string()))? {
                let (k, _) = item.map_err(|e| CoreError::CacheWriteFailed(e.to_string()))?;
                keys.push(k.value().to_string());
            }
            Ok(keys)
        })
        .await
        .map_err(|e| CoreError::CacheWriteFailed(e.to_string()))??;

        let l1_keys: Vec<String> = {
            let l1 = self.l1.lock().unwrap();
            l1.values()
                .flat_map(|ring| ring.iter().map(|(k, _)| k.clone()))
                .collect()
        };

        let mut to_delete: std::collections::HashSet<String> = std::collections::HashSet::new();
        for k in l2_keys.into_iter().chain(l1_keys) {
            if matcher.matches(&k) {
                to_delete.insert(k);
            }
        }

        for key in &to_delete {
            self.delete(key).await?;
        }
        Ok(to_delete.len())
    }
}

/// Minimal glob matcher supporting `*` (any run) and `?` (single char), no
/// external dependency needed for this closed two-token grammar.
struct GlobMatcher {
    pattern: Vec<char>,
}

impl GlobMatcher {
    fn new(pattern: &str) -> Self {
        GlobMatcher {
            pattern: pattern.chars().collect(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        let t: Vec<char> = text.chars().collect();
        Self::matches_from(&self.pattern, &t)
    }

    fn matches_from(pattern: &[char], text: &[char]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some('*') => {
                Self::matches_from(&pattern[1..], text)
                    || (!text.is_empty() && Self::matches_from(pattern, &text[1..]))
            }
            Some('?') => !text.is_empty() && Self::matches_from(&pattern[1..], &text[1..]),
            Some(c) => {
                !text.is_empty() && text[0] == *c && Self::matches_from(&pattern[1..], &text[1..])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.redb")).unwrap();
        let key = make_key(Namespace::Search, "hello");
        cache.set(&key, b"world".to_vec(), None).await.unwrap();
        let got = cache.get(&key).await.unwrap();
        assert_eq!(got, Some(b"world".to_vec()));
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.redb")).unwrap();
        let key = make_key(Namespace::Search, "missing");
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expiry_is_treated_as_a_miss() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.redb")).unwrap();
        let key = make_key(Namespace::Search, "soon-gone");
        cache
            .set(&key, b"x".to_vec(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // L1 entry has expired; L2 still has it (no TTL there), so this
        // exercises the L1-miss -> L2-hit repopulation path, then the
        // repopulated L1 entry gets the namespace's default (longer) TTL.
        let got = cache.get(&key).await.unwrap();
        assert_eq!(got, Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_from_both_tiers() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.redb")).unwrap();
        let key = make_key(Namespace::Corpus, "k");
        cache.set(&key, b"v".to_vec(), None).await.unwrap();
        assert!(cache.delete(&key).await.unwrap());
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalidate_pattern_matches_glob() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.redb")).unwrap();
        cache
            .set(&make_key(Namespace::Search, "foo-1"), b"a".to_vec(), None)
            .await
            .unwrap();
        cache
            .set(&make_key(Namespace::Search, "foo-2"), b"b".to_vec(), None)
            .await
            .unwrap();
        cache
            .set(&make_key(Namespace::Search, "bar"), b"c".to_vec(), None)
            .await
            .unwrap();
        let count = cache.invalidate_pattern("search:foo-*").await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(cache.get(&make_key(Namespace::Search, "bar")).await.unwrap(), Some(b"c".to_vec()));
    }

    #[test]
    fn encoding_selection_matches_policy() {
        assert!(matches!(Cache::choose_encoding(Namespace::Search, 10), Encoding::Lz4));
        assert!(matches!(Cache::choose_encoding(Namespace::Semantic, 2_000_000), Encoding::Raw));
        assert!(matches!(Cache::choose_encoding(Namespace::Dictionary, 10), Encoding::Raw));
        assert!(matches!(Cache::choose_encoding(Namespace::Dictionary, 5000), Encoding::Zstd));
        assert!(matches!(Cache::choose_encoding(Namespace::Dictionary, 2_000_000), Encoding::Gzip));
    }

    #[tokio::test]
    async fn namespace_l1_capacity_does_not_evict_other_namespaces() {
        let dir = tempdir().unwrap();
        let cache = Cache::open_with_overrides(
            dir.path().join("cache.redb"),
            CacheOverrides {
                l1_capacity_per_namespace: 2,
                ..CacheOverrides::default()
            },
        )
        .unwrap();

        // Filling `search` past its tiny capacity must not touch `dictionary`
        // entries — each namespace owns its own L1 ring (spec.md §4.8).
        let dict_key = make_key(Namespace::Dictionary, "stays");
        cache.set(&dict_key, b"kept".to_vec(), None).await.unwrap();
        for i in 0..5 {
            cache
                .set(&make_key(Namespace::Search, &format!("q{i}")), b"v".to_vec(), None)
                .await
                .unwrap();
        }

        // Still an L1 hit: L2 is never consulted for a namespace that was
        // never evicted, so a deleted L2 table would still pass this.
        let l1_only = {
            let mut l1 = cache.l1.lock().unwrap();
            l1.get_mut(&Namespace::Dictionary)
                .and_then(|ring| ring.get(&dict_key))
                .map(|e| e.payload.clone())
        };
        assert_eq!(l1_only, Some(b"kept".to_vec()));
    }

    #[tokio::test]
    async fn l1_byte_cap_evicts_lru_before_capacity_is_reached() {
        let dir = tempdir().unwrap();
        let cache = Cache::open_with_overrides(
            dir.path().join("cache.redb"),
            CacheOverrides {
                l1_capacity_per_namespace: 100,
                l1_byte_cap_per_namespace: 16,
                ..CacheOverrides::default()
            },
        )
        .unwrap();
        let k1 = make_key(Namespace::Corpus, "a");
        let k2 = make_key(Namespace::Corpus, "b");
        cache.set(&k1, vec![0u8; 10], None).await.unwrap();
        cache.set(&k2, vec![0u8; 10], None).await.unwrap();
        // Inserting k2 pushed the ring to 20 bytes, over the 16-byte cap, so
        // k1 (least recently used) must have been evicted from L1 — though
        // it's still readable through L2, which has no byte cap.
        let l1_has_k1 = {
            let mut l1 = cache.l1.lock().unwrap();
            l1.get_mut(&Namespace::Corpus).unwrap().get(&k1).is_some()
        };
        assert!(!l1_has_k1);
        assert_eq!(cache.get(&k1).await.unwrap(), Some(vec![0u8; 10]));
    }

    #[tokio::test]
    async fn cache_stats_track_hits_and_misses() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.redb")).unwrap();
        assert_eq!(cache.cache_hit_rate(), None);

        let key = make_key(Namespace::Search, "k");
        cache.get(&key).await.unwrap(); // miss
        cache.set(&key, b"v".to_vec(), None).await.unwrap();
        cache.get(&key).await.unwrap(); // hit (served from L1)

        let (hits, misses) = cache.cache_stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert_eq!(cache.cache_hit_rate(), Some(50.0));
        assert_eq!(cache.cache_size(), 1);
    }

    #[test]
    fn glob_matcher_handles_star_and_question_mark() {
        let m = GlobMatcher::new("search:foo-*");
        assert!(m.matches("search:foo-1"));
        assert!(!m.matches("search:bar"));
        let m2 = GlobMatcher::new("corpus:a?c");
        assert!(m2.matches("corpus:abc"));
        assert!(!m2.matches("corpus:ac"));
    }
}
