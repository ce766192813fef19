//! Cascade Engine (C6): coordinates the normalizer, trie, fuzzy matcher and
//! vector index into one ranked result list.

use crate::corpus::{CorpusId, CorpusRegistry, Entry};
use crate::error::{CoreError, CoreResult};
use crate::fuzzy;
use crate::normalize::{normalize, normalize_preserving_diacritics};
use crate::trie::TrieIndex;
use crate::vector::{EmbeddingProvider, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    Exact,
    Prefix,
    Fuzzy,
    Semantic,
    Cascade,
}

impl SearchMethod {
    /// Lower is better; used as the secondary sort key and for merge
    /// precedence when the same id surfaces from more than one stage.
    fn priority(self) -> u8 {
        match self {
            SearchMethod::Exact => 0,
            SearchMethod::Prefix => 1,
            SearchMethod::Fuzzy => 2,
            SearchMethod::Semantic => 3,
            SearchMethod::Cascade => 255, // never used as a hit's own method
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub method: SearchMethod,
    pub limit: usize,
    pub min_score: f32,
    pub diacritic_sensitive: bool,
    pub quality_budget: crate::vector::QualityBudget,
    /// Soft wall-clock budget for the whole cascade. Exact and prefix are
    /// CPU-bound and effectively always land inside it; fuzzy and semantic
    /// check it before starting and skip themselves (setting `partial`)
    /// rather than running over.
    pub deadline: Option<std::time::Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            method: SearchMethod::Cascade,
            limit: 20,
            min_score: 0.0,
            diacritic_sensitive: false,
            quality_budget: crate::vector::QualityBudget::Balanced,
            deadline: None,
        }
    }
}

/// Result of a cascade `search` call: the ranked hits plus whether the
/// deadline cut the cascade short before every eligible stage ran.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub hits: Vec<Hit>,
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub surface: String,
    pub score: f32, // [0, 1]
    pub method: SearchMethodTag,
    pub is_phrase: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethodTag {
    Exact,
    Prefix,
    Fuzzy,
    Semantic,
}

impl From<SearchMethodTag> for SearchMethod {
    fn from(t: SearchMethodTag) -> Self {
        match t {
            SearchMethodTag::Exact => SearchMethod::Exact,
            SearchMethodTag::Prefix => SearchMethod::Prefix,
            SearchMethodTag::Fuzzy => SearchMethod::Fuzzy,
            SearchMethodTag::Semantic => SearchMethod::Semantic,
        }
    }
}

struct Scored {
    id: u32,
    score: f32,
    method: SearchMethodTag,
}

/// Read-only view the cascade needs of a built corpus/index generation.
/// Constructed by the caller (typically `CoreContext`) once per published
/// version and handed to `search` for the lifetime of that version.
pub struct SearchContext<'a> {
    pub entries: &'a [Entry],
    pub trie: &'a TrieIndex,
    pub vector: Option<&'a VectorIndex>,
}

/// Run the exact -> prefix -> fuzzy -> semantic cascade.
///
/// CPU-bound stages (trie, fuzzy) never suspend; only the semantic stage,
/// which may need to embed the query through `provider`, is async.
pub async fn search(
    ctx: &SearchContext<'_>,
    query: &str,
    opts: &SearchOptions,
    provider: Option<&dyn EmbeddingProvider>,
) -> CoreResult<SearchOutcome> {
    let deadline = opts.deadline.map(|d| std::time::Instant::now() + d);
    let past_deadline = || deadline.is_some_and(|dl| std::time::Instant::now() >= dl);

    let normalized = if opts.diacritic_sensitive {
        normalize_preserving_diacritics(query)
    } else {
        normalize(query)
    };
    if normalized.is_empty() {
        return Ok(SearchOutcome { hits: Vec::new(), partial: false });
    }

    let cascade = opts.method == SearchMethod::Cascade;
    let mut by_id: ahash::AHashMap<u32, Scored> = ahash::AHashMap::new();
    let mut exact_hit = false;
    let mut partial = false;

    if cascade || opts.method == SearchMethod::Exact {
        if let Some(ids) = ctx.trie.lookup_exact_ids(&normalized) {
            exact_hit = !ids.is_empty();
            for id in ids {
                upsert(&mut by_id, id, 1.0, SearchMethodTag::Exact);
            }
        }
    }

    // In cascade mode, an exact hit short-circuits later stages unless the
    // limit is still unmet; when it does continue, non-exact scores are
    // capped below the exact tier so exact results always rank first.
    let skip_non_exact = cascade && exact_hit && by_id.len() >= opts.limit;

    if !skip_non_exact && (cascade || opts.method == SearchMethod::Prefix) {
        let prefix_hits = ctx.trie.prefix(&normalized, opts.limit);
        for (matched_key, id) in &prefix_hits {
            let ratio = if matched_key.is_empty() {
                0.0
            } else {
                normalized.chars().count() as f32 / matched_key.chars().count() as f32
            };
            let mut score = 0.90 + 0.10 * ratio;
            if cascade && exact_hit {
                score = score.min(0.99);
            }
            upsert(&mut by_id, *id, score, SearchMethodTag::Prefix);
        }
    }

    let fuzzy_wanted = !skip_non_exact && (cascade || opts.method == SearchMethod::Fuzzy) && by_id.len() < opts.limit;
    if fuzzy_wanted && past_deadline() {
        partial = true;
    } else if fuzzy_wanted {
        let remaining = opts.limit - by_id.len();
        let (hits, _outcome) = fuzzy::search(&normalized, ctx.entries, remaining.max(opts.limit), 0.0);
        for h in hits {
            let mut score = h.score / 100.0;
            if cascade && exact_hit {
                score = score.min(0.99);
            }
            upsert(&mut by_id, h.id, score, SearchMethodTag::Fuzzy);
        }
    }

    let semantic_wanted = !skip_non_exact && (cascade || opts.method == SearchMethod::Semantic);
    if semantic_wanted && past_deadline() {
        partial = true;
    } else if semantic_wanted {
        match ctx.vector {
            Some(vector_index) if !vector_index.is_empty() => {
                let provider = match provider {
                    Some(p) => p,
                    None if cascade => {
                        // No provider wired up: treat as "not ready" and skip.
                        return finish(by_id, ctx, opts, partial);
                    }
                    None => return Err(CoreError::VectorIndexNotReady),
                };
                let embedded = provider.embed(&[normalized.clone()]).await;
                let q_vec = match embedded {
                    Ok(mut v) if !v.is_empty() => v.remove(0),
                    Ok(_) => return Err(CoreError::VectorIndexNotReady),
                    Err(e) => {
                        return Err(CoreError::EmbeddingProviderError {
                            source: e,
                            policy: crate::error::ProviderErrorPolicy::Fail,
                        })
                    }
                };
                let k = opts.limit.saturating_mul(3).max(1);
                let nprobe = nprobe_for(opts.quality_budget, vector_index.kind());
                for (id, cos) in vector_index.search(&q_vec, k, nprobe) {
                    let mut score = cos.clamp(0.0, 1.0);
                    if cascade && exact_hit {
                        score = score.min(0.99);
                    }
                    upsert(&mut by_id, id, score, SearchMethodTag::Semantic);
                }
            }
            Some(_) => {}
            None if cascade => {}
            None => return Err(CoreError::VectorIndexNotReady),
        }
    }

    finish(by_id, ctx, opts, partial)
}

/// Per-call `nprobe` override for IVF-family indexes, driven by
/// `SearchOptions.quality_budget`. The index's *tier* (Flat vs IVF-PQ vs
/// OPQ+IVF-PQ) is fixed at build time from `Config::vector_quality_budget`
/// and can't change per call without a rebuild, but how many coarse
/// clusters a single query probes can: this is where a per-call quality
/// budget still has a real effect on an already-built IVF index.
/// Non-IVF tiers (`Flat`/`FlatFP16`/`FlatINT8`) score every row regardless
/// of `nprobe`, so this returns `None` for them.
fn nprobe_for(budget: crate::vector::QualityBudget, kind: crate::vector::VectorIndexKind) -> Option<usize> {
    use crate::vector::{QualityBudget, VectorIndexKind};
    let nlist = match kind {
        VectorIndexKind::IvfPq { nlist, .. } | VectorIndexKind::OpqIvfPq { nlist, .. } => nlist,
        VectorIndexKind::Flat | VectorIndexKind::FlatFP16 | VectorIndexKind::FlatINT8 => {
            return None;
        }
    };
    let base = (nlist / 16).max(1);
    Some(match budget {
        QualityBudget::Exact => nlist,
        QualityBudget::High => (base * 4).min(nlist),
        QualityBudget::Balanced => base,
        QualityBudget::Memory => (base / 2).max(1),
    })
}

/// Merge a hit into the id -> best-result map: the surviving method is
/// whichever has higher priority (exact > prefix > fuzzy > semantic); the
/// surviving score is the highest seen across all methods for this id.
fn upsert(
    by_id: &mut ahash::AHashMap<u32, Scored>,
    id: u32,
    score: f32,
    method: SearchMethodTag,
) {
    by_id
        .entry(id)
        .and_modify(|existing| {
            existing.score = existing.score.max(score);
            if SearchMethod::from(method).priority() < SearchMethod::from(existing.method).priority() {
                existing.method = method;
            }
        })
        .or_insert(Scored { id, score, method });
}

fn finish(
    by_id: ahash::AHashMap<u32, Scored>,
    ctx: &SearchContext<'_>,
    opts: &SearchOptions,
    partial: bool,
) -> CoreResult<SearchOutcome> {
    let mut scored: Vec<Scored> = by_id
        .into_values()
        .filter(|s| s.score >= opts.min_score)
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                SearchMethod::from(a.method)
                    .priority()
                    .cmp(&SearchMethod::from(b.method).priority())
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(opts.limit);

    let mut out = Vec::with_capacity(scored.len());
    for s in scored {
        let Some(entry) = ctx.entries.get(s.id as usize) else {
            continue;
        };
        let surface = entry.surface.clone();
        out.push(Hit {
            surface,
            score: s.score,
            method: s.method,
            is_phrase: entry.is_phrase,
        });
    }
    Ok(SearchOutcome { hits: out, partial })
}

/// Convenience wrapper for looking up a corpus' effective vocabulary and
/// wiring a `SearchContext`-sized call; most callers build `SearchContext`
/// themselves against cached index generations instead of going through
/// this, since the trie/vector index are expensive to rebuild per call.
pub fn resolve_corpus_entries(
    registry: &CorpusRegistry,
    corpus_id: CorpusId,
) -> CoreResult<Vec<Entry>> {
    registry.effective_vocabulary(corpus_id)
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

    fn opts(method: SearchMethod, limit: usize) -> SearchOptions {
        SearchOptions {
            method,
            limit,
            min_score: 0.0,
            diacritic_sensitive: false,
            quality_budget: crate::vector::QualityBudget::Balanced,
            deadline: None,
        }
    }

    #[tokio::test]
    async fn empty_query_returns_empty() {
        let entries = vec![entry(0, "cat", 1.0)];
        let trie = TrieIndex::build(&entries);
        let ctx = SearchContext {
            entries: &entries,
            trie: &trie,
            vector: None,
        };
        let result = search(&ctx, "   ", &opts(SearchMethod::Cascade, 10), None)
            .await
            .unwrap();
        assert!(result.hits.is_empty());
        assert!(!result.partial);
    }

    #[tokio::test]
    async fn exact_match_always_at_position_zero() {
        let entries = vec![
            entry(0, "cat", 1.0),
            entry(1, "category", 0.5),
            entry(2, "cats", 0.1),
        ];
        let trie = TrieIndex::build(&entries);
        let ctx = SearchContext {
            entries: &entries,
            trie: &trie,
            vector: None,
        };
        let result = search(&ctx, "cat", &opts(SearchMethod::Cascade, 10), None)
            .await
            .unwrap();
        assert_eq!(result.hits[0].surface, "cat");
        assert_eq!(result.hits[0].score, 1.0);
    }

    #[tokio::test]
    async fn scores_are_non_increasing() {
        let entries = vec![
            entry(0, "cat", 1.0),
            entry(1, "category", 0.5),
            entry(2, "cats", 0.1),
            entry(3, "bat", 0.1),
        ];
        let trie = TrieIndex::build(&entries);
        let ctx = SearchContext {
            entries: &entries,
            trie: &trie,
            vector: None,
        };
        let result = search(&ctx, "cat", &opts(SearchMethod::Cascade, 10), None)
            .await
            .unwrap();
        for w in result.hits.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[tokio::test]
    async fn min_score_drops_low_quality_hits() {
        let entries = vec![entry(0, "cat", 1.0), entry(1, "zzzzzzzz", 1.0)];
        let trie = TrieIndex::build(&entries);
        let ctx = SearchContext {
            entries: &entries,
            trie: &trie,
            vector: None,
        };
        let mut o = opts(SearchMethod::Cascade, 10);
        o.min_score = 0.95;
        let result = search(&ctx, "cat", &o, None).await.unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].surface, "cat");
    }

    #[tokio::test]
    async fn semantic_without_ready_index_is_an_error_in_semantic_mode() {
        let entries = vec![entry(0, "cat", 1.0)];
        let trie = TrieIndex::build(&entries);
        let ctx = SearchContext {
            entries: &entries,
            trie: &trie,
            vector: None,
        };
        let result = search(&ctx, "cat", &opts(SearchMethod::Semantic, 10), None).await;
        assert!(matches!(result, Err(CoreError::VectorIndexNotReady)));
    }

    #[tokio::test]
    async fn semantic_without_ready_index_is_silently_skipped_in_cascade_mode() {
        let entries = vec![entry(0, "cat", 1.0)];
        let trie = TrieIndex::build(&entries);
        let ctx = SearchContext {
            entries: &entries,
            trie: &trie,
            vector: None,
        };
        let result = search(&ctx, "cat", &opts(SearchMethod::Cascade, 10), None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn determinism_same_query_same_options_same_result() {
        let entries = vec![
            entry(0, "cat", 1.0),
            entry(1, "category", 0.5),
            entry(2, "cats", 0.1),
        ];
        let trie = TrieIndex::build(&entries);
        let ctx = SearchContext {
            entries: &entries,
            trie: &trie,
            vector: None,
        };
        let o = opts(SearchMethod::Cascade, 10);
        let a = search(&ctx, "cat", &o, None).await.unwrap();
        let b = search(&ctx, "cat", &o, None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn already_expired_deadline_skips_fuzzy_and_semantic_and_flags_partial() {
        let entries = vec![entry(0, "cat", 1.0), entry(1, "kat", 1.0)];
        let trie = TrieIndex::build(&entries);
        let ctx = SearchContext {
            entries: &entries,
            trie: &trie,
            vector: None,
        };
        let mut o = opts(SearchMethod::Cascade, 10);
        o.deadline = Some(std::time::Duration::from_secs(0));
        // No exact hit for "kot" so the cascade would normally fall through
        // to fuzzy; an already-expired deadline should skip that stage and
        // report partial=true instead of running over budget.
        let result = search(&ctx, "kot", &o, None).await.unwrap();
        assert!(result.partial);
        assert!(result.hits.is_empty());
    }
}
