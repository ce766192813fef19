//! Trie Index (C3): immutable ordered dictionary over normalized forms.
//!
//! Built once from a sorted `(normalized, id)` list. Grouping happens over a
//! mutable `BTreeMap`, but the published, queried form wraps an `fst::Map`
//! for a deterministic, byte-identical on-disk representation.

use crate::corpus::Entry;
use fst::{Automaton, IntoStreamer, Map, MapBuilder, Streamer};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct PostingEntry {
    pub id: u32,
    pub frequency: f32,
}

/// One built trie, immutable after construction.
pub struct TrieIndex {
    fst_map: Map<Vec<u8>>,
    /// postings[i] shares the i-th normalized key in fst order, sorted by
    /// descending frequency then ascending id.
    postings: Vec<Vec<PostingEntry>>,
    len: usize,
}

impl TrieIndex {
    /// Build deterministically from the effective vocabulary. Same sorted
    /// input always produces byte-identical `fst` bytes.
    pub fn build(entries: &[Entry]) -> Self {
        let mut grouped: BTreeMap<String, Vec<PostingEntry>> = BTreeMap::new();
        for e in entries {
            grouped
                .entry(e.normalized.clone())
                .or_default()
                .push(PostingEntry {
                    id: e.id,
                    frequency: e.frequency,
                });
        }
        for postings in grouped.values_mut() {
            postings.sort_by(|a, b| {
                b.frequency
                    .partial_cmp(&a.frequency)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            });
        }

        let mut builder = MapBuilder::memory();
        let mut postings = Vec::with_capacity(grouped.len());
        let len = grouped.len();
        for (idx, (key, posting_list)) in grouped.into_iter().enumerate() {
            // fst requires keys inserted in strictly increasing order, which
            // BTreeMap iteration already guarantees.
            builder
                .insert(key.as_bytes(), idx as u64)
                .expect("keys inserted in sorted order");
            postings.push(posting_list);
        }
        let bytes = builder.into_inner().expect("fst build never fails here");
        let fst_map = Map::new(bytes).expect("fst map over just-built bytes");

        TrieIndex {
            fst_map,
            postings,
            len,
        }
    }

    /// O(|key|) exact lookup. Never fails; absence is `None`.
    pub fn lookup_exact(&self, key: &str) -> Option<&[PostingEntry]> {
        let idx = self.fst_map.get(key.as_bytes())?;
        self.postings.get(idx as usize).map(|v| v.as_slice())
    }

    /// IDs for an exact key, ignoring per-entry metadata.
    pub fn lookup_exact_ids(&self, key: &str) -> Option<Vec<u32>> {
        self.lookup_exact(key)
            .map(|p| p.iter().map(|e| e.id).collect())
    }

    /// Enumerate up to `limit` `(normalized, id)` pairs with `key` as a
    /// prefix, lexicographic by `normalized` then descending frequency then
    /// ascending id. Truncates silently at `limit`.
    pub fn prefix(&self, key: &str, limit: usize) -> Vec<(String, u32)> {
        if limit == 0 {
            return Vec::new();
        }
        let mut out = Vec::new();
        let automaton = fst::automaton::Str::new(key).starts_with();
        let mut stream = self.fst_map.search(automaton).into_stream();
        while let Some((k, idx)) = stream.next() {
            let key_str = std::str::from_utf8(k).unwrap_or_default().to_string();
            if let Some(postings) = self.postings.get(idx as usize) {
                for p in postings {
                    out.push((key_str.clone(), p.id));
                    if out.len() >= limit {
                        return out;
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Lang;

    fn entry(id: u32, normalized: &str, freq: f32) -> Entry {
        Entry {
            id,
            surface: normalized.to_string(),
            normalized: normalized.to_string(),
            is_phrase: normalized.contains(' '),
            frequency: freq,
            language: Lang::En,
        }
    }

    #[test]
    fn exact_lookup_hits_and_misses() {
        let trie = TrieIndex::build(&[entry(0, "cat", 1.0), entry(1, "category", 0.5)]);
        assert_eq!(trie.lookup_exact_ids("cat"), Some(vec![0]));
        assert_eq!(trie.lookup_exact_ids("dog"), None);
    }

    #[test]
    fn prefix_orders_lexicographic_then_freq_then_id() {
        let trie = TrieIndex::build(&[
            entry(2, "cats", 0.1),
            entry(0, "cat", 1.0),
            entry(1, "category", 0.5),
        ]);
        let results = trie.prefix("cat", 10);
        let keys: Vec<&str> = results.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["cat", "category", "cats"]);
    }

    #[test]
    fn prefix_truncates_at_limit() {
        let trie = TrieIndex::build(&[
            entry(0, "cat", 1.0),
            entry(1, "category", 0.5),
            entry(2, "cats", 0.1),
        ]);
        let results = trie.prefix("cat", 2);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn build_is_deterministic() {
        let entries = vec![entry(0, "cat", 1.0), entry(1, "dog", 2.0)];
        let a = TrieIndex::build(&entries);
        let b = TrieIndex::build(&entries);
        assert_eq!(a.prefix("", 10), b.prefix("", 10));
    }

    #[test]
    fn empty_corpus_builds_empty_index() {
        let trie = TrieIndex::build(&[]);
        assert!(trie.is_empty());
        assert_eq!(trie.lookup_exact_ids("anything"), None);
        assert!(trie.prefix("a", 10).is_empty());
    }
}
