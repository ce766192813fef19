//! Fuzzy Matcher (C4): ranked approximate matching over a candidate subset.
//!
//! Candidate pre-selection uses a **length-window filter**
//! (`|len(q) - len(c)| <= max(2, ceil(0.3*|q|))`) intersected with a
//! **first-letter bucket** (candidates must share the query's first
//! character, when the query is non-empty) — both are O(1) per candidate
//! and together bound pre-selection time independent of query pathology.
//! An exact-equality candidate always has `|len(q)-len(c)| = 0` and shares
//! every character including the first, so it can never be filtered out by
//! either predicate — this rules out near-miss searches silently dropping
//! their own exact match.

use crate::corpus::Entry;

pub const MAX_FUZZY_CANDIDATES: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyHit {
    pub id: u32,
    pub score: f32, // [0, 100]
}

/// Whether pre-selection had to truncate the candidate set (soft
/// degradation reported back up to the caller rather than an error).
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyOutcome {
    pub truncated: bool,
}

fn length_window(query_len: usize) -> usize {
    std::cmp::max(2, ((query_len as f32) * 0.3).ceil() as usize)
}

/// Coarse, corpus-wide candidate pre-selection. Bounded time per
/// candidate; never omits a zero-edit-distance match.
fn preselect<'a>(query: &str, entries: &'a [Entry]) -> (Vec<&'a Entry>, bool) {
    let q_len = query.chars().count();
    let window = length_window(q_len);
    let first_char = query.chars().next();

    let mut candidates: Vec<&Entry> = entries
        .iter()
        .filter(|e| {
            let c_len = e.normalized.chars().count();
            let len_ok = (q_len as i64 - c_len as i64).unsigned_abs() as usize <= window;
            let first_ok = match first_char {
                None => true,
                Some(fc) => e.normalized.chars().next() == Some(fc) || e.normalized == query,
            };
            len_ok && first_ok
        })
        .collect();

    let truncated = candidates.len() > MAX_FUZZY_CANDIDATES;
    if truncated {
        candidates.sort_by(|a, b| b.frequency.partial_cmp(&a.frequency).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(MAX_FUZZY_CANDIDATES);
    }
    (candidates, truncated)
}

/// Damerau-Levenshtein edit distance (adjacent transpositions count as one
/// edit), over chars.
fn damerau_levenshtein(a: &[char], b: &[char]) -> usize {
    let (la, lb) = (a.len(), b.len());
    if la == 0 {
        return lb;
    }
    if lb == 0 {
        return la;
    }
    let mut d = vec![vec![0usize; lb + 1]; la + 1];
    for i in 0..=la {
        d[i][0] = i;
    }
    for j in 0..=lb {
        d[0][j] = j;
    }
    for i in 1..=la {
        for j in 1..=lb {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            d[i][j] = (d[i - 1][j] + 1)
                .min(d[i][j - 1] + 1)
                .min(d[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                d[i][j] = d[i][j].min(d[i - 2][j - 2] + 1);
            }
        }
    }
    d[la][lb]
}

fn dl_similarity(a: &str, b: &str) -> f32 {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let max_len = ac.len().max(bc.len());
    if max_len == 0 {
        return 1.0;
    }
    let dist = damerau_levenshtein(&ac, &bc);
    1.0 - (dist as f32 / max_len as f32)
}

fn token_set_jaccard(a: &str, b: &str) -> f32 {
    let ta: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let tb: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        inter as f32 / union as f32
    }
}

fn prefix_bonus(query: &str, candidate: &str) -> f32 {
    if candidate.starts_with(query) && !query.is_empty() {
        1.0
    } else {
        0.0
    }
}

fn score(query: &str, candidate: &str) -> f32 {
    let sim = dl_similarity(query, candidate);
    let jac = token_set_jaccard(query, candidate);
    let pre = prefix_bonus(query, candidate);
    ((sim * 0.6 + jac * 0.2 + pre * 0.2) * 100.0).clamp(0.0, 100.0)
}

/// Run fuzzy search over `entries` (already normalized), already-normalized
/// `query`. Sorted by descending score, then ascending `id`.
pub fn search(
    query: &str,
    entries: &[Entry],
    limit: usize,
    min_score: f32,
) -> (Vec<FuzzyHit>, FuzzyOutcome) {
    let (candidates, truncated) = preselect(query, entries);

    let mut hits: Vec<FuzzyHit> = candidates
        .into_iter()
        .filter_map(|e| {
            let s = score(query, &e.normalized);
            if s >= min_score {
                Some(FuzzyHit { id: e.id, score: s })
            } else {
                None
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(limit);

    (hits, FuzzyOutcome { truncated })
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
    fn exact_equality_is_always_a_candidate() {
        // This is the property that rules out the "en coulisse" pathology:
        // preselect must never drop a zero-edit-distance match, regardless
        // of corpus contents.
        let entries: Vec<Entry> = (0..50)
            .map(|i| entry(i, &format!("unrelated{i}"), 1.0))
            .chain(std::iter::once(entry(999, "serendipity", 1.0)))
            .collect();
        let (hits, _) = search("serendipity", &entries, 10, 0.0);
        assert!(hits.iter().any(|h| h.id == 999 && h.score >= 99.0));
    }

    #[test]
    fn sorted_by_score_desc_then_id_asc() {
        let entries = vec![entry(2, "cat", 1.0), entry(1, "bat", 1.0), entry(0, "hat", 1.0)];
        let (hits, _) = search("cat", &entries, 10, 0.0);
        for w in hits.windows(2) {
            assert!(
                w[0].score > w[1].score
                    || (w[0].score == w[1].score && w[0].id < w[1].id)
            );
        }
    }

    #[test]
    fn min_score_filters_low_quality_matches() {
        let entries = vec![entry(0, "zzzzzzzzzzzz", 1.0)];
        let (hits, _) = search("cat", &entries, 10, 50.0);
        assert!(hits.is_empty());
    }

    #[test]
    fn truncates_when_over_max_candidates() {
        let entries: Vec<Entry> = (0..(MAX_FUZZY_CANDIDATES + 500))
            .map(|i| entry(i as u32, "cat", (i % 100) as f32))
            .collect();
        let (hits, outcome) = search("cat", &entries, 5, 0.0);
        assert!(outcome.truncated);
        assert!(hits.len() <= 5);
    }

    #[test]
    fn long_query_against_short_corpus_returns_empty_quickly() {
        let entries = vec![entry(0, "a", 1.0), entry(1, "bb", 1.0)];
        let query = "x".repeat(200);
        let (hits, _) = search(&query, &entries, 10, 50.0);
        assert!(hits.is_empty());
    }
}
