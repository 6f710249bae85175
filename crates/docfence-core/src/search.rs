//! Ranking over a single [`Generation`] snapshot.
//!
//! The ranker is pure: it never touches storage, locks or the embedding
//! collaborator. The caller captures a generation, embeds the query if the
//! mode needs it, and hands both to [`rank`].
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Score every live entry semantically (cosine or inner product) and by
//!    keyword (BM25 over the generation's postings).
//! 2. Keep the top `candidate_k` of each list.
//! 3. Normalize both lists to `[0, 1]` using min-max normalization.
//! 4. Merge: `score = α × semantic + (1 - α) × keyword`, a chunk missing
//!    from one list contributing `0` for that side.
//! 5. Sort by score (desc), then chunk id (asc).
//! 6. Apply the minimum score, the per-document cap, and truncate to `k`.
//!
//! With `α = 1` only the semantic list participates and with `α = 0` only
//! the keyword list does, so the extremes reproduce the pure orderings.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::embedding::similarity;
use crate::generation::Generation;
use crate::models::{Metric, SearchHit, SearchMode};
use crate::tokenize::tokenize;

/// BM25 term-frequency saturation.
const BM25_K1: f64 = 1.2;
/// BM25 length normalization.
const BM25_B: f64 = 0.75;
/// Maximum snippet length in characters.
const SNIPPET_CHARS: usize = 240;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RankParams {
    /// Weight for semantic vs keyword: `hybrid = α*semantic + (1-α)*keyword`.
    pub alpha: f64,
    /// Depth of each list before the hybrid merge.
    pub candidate_k: usize,
    /// Results scoring below this are dropped.
    pub min_score: Option<f64>,
    /// At most this many results per document.
    pub max_per_document: Option<usize>,
    pub metric: Metric,
}

impl Default for RankParams {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            candidate_k: 80,
            min_score: None,
            max_per_document: None,
            metric: Metric::Cosine,
        }
    }
}

/// Bundles all inputs for a single ranking call.
#[derive(Debug, Clone)]
pub struct RankRequest<'a> {
    pub query: &'a str,
    /// Pre-computed query embedding (required for semantic/hybrid modes).
    pub query_vec: Option<&'a [f32]>,
    pub mode: SearchMode,
    pub k: usize,
    pub params: RankParams,
}

/// A chunk with its raw score from one retrieval list.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: String,
    pub raw_score: f64,
}

/// Descending score, ascending chunk id.
fn by_score_then_id(a_score: f64, a_id: &str, b_score: f64, b_id: &str) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_id.cmp(b_id))
}

fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| by_score_then_id(a.raw_score, &a.chunk_id, b.raw_score, &b.chunk_id));
}

/// Score every live entry against `query_vec`, best first.
pub fn semantic_candidates(
    generation: &Generation,
    query_vec: &[f32],
    metric: Metric,
) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = generation
        .live_entries()
        .map(|e| Candidate {
            chunk_id: e.chunk_id.clone(),
            raw_score: f64::from(similarity(metric, query_vec, &e.vector)),
        })
        .collect();
    sort_candidates(&mut out);
    out
}

/// BM25 over the generation's postings, best first. Entries sharing no
/// term with the query are not returned.
pub fn keyword_candidates(generation: &Generation, query_terms: &[String]) -> Vec<Candidate> {
    let n = generation.live_count() as f64;
    let avg_len = generation.average_length().max(1.0);
    let mut unique: Vec<&str> = query_terms.iter().map(String::as_str).collect();
    unique.sort_unstable();
    unique.dedup();

    let mut scores: HashMap<&str, f64> = HashMap::new();
    for term in unique {
        let postings = generation.postings(term);
        if postings.is_empty() {
            continue;
        }
        let df = postings.len() as f64;
        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
        for (chunk_id, tf) in postings {
            let len = generation
                .entry(chunk_id)
                .map(|e| f64::from(e.length()))
                .unwrap_or(avg_len);
            let tf = f64::from(*tf);
            let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len);
            *scores.entry(chunk_id.as_str()).or_insert(0.0) += idf * tf * (BM25_K1 + 1.0) / denom;
        }
    }

    let mut out: Vec<Candidate> = scores
        .into_iter()
        .map(|(id, s)| Candidate {
            chunk_id: id.to_string(),
            raw_score: s,
        })
        .collect();
    sort_candidates(&mut out);
    out
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

struct Scored {
    chunk_id: String,
    score: f64,
    semantic: Option<f64>,
    keyword: Option<f64>,
}

/// Merge two ranked lists with weight `alpha` on the semantic side.
pub fn merge_hybrid(
    semantic: &[Candidate],
    keyword: &[Candidate],
    alpha: f64,
) -> Vec<(String, f64, f64, f64)> {
    let norm_sem = normalize_scores(semantic);
    let norm_kw = normalize_scores(keyword);

    let mut merged: HashMap<&str, (f64, f64)> = HashMap::new();
    for (c, s) in &norm_sem {
        merged.entry(c.chunk_id.as_str()).or_insert((0.0, 0.0)).0 = *s;
    }
    for (c, s) in &norm_kw {
        merged.entry(c.chunk_id.as_str()).or_insert((0.0, 0.0)).1 = *s;
    }

    let mut out: Vec<(String, f64, f64, f64)> = merged
        .into_iter()
        .map(|(id, (s, k))| (id.to_string(), alpha * s + (1.0 - alpha) * k, s, k))
        .collect();
    out.sort_by(|a, b| by_score_then_id(a.1, &a.0, b.1, &b.0));
    out
}

/// Rank a generation for one query.
///
/// Returns an empty vector for `k == 0`, a blank query, an empty generation,
/// or when nothing clears the minimum score. A semantic or hybrid request
/// without a query vector also yields nothing.
pub fn rank(generation: &Generation, req: &RankRequest<'_>) -> Vec<SearchHit> {
    if req.k == 0 || req.query.trim().is_empty() || generation.live_count() == 0 {
        return Vec::new();
    }

    let terms = tokenize(req.query);
    let depth = req.params.candidate_k.max(req.k);
    let alpha = req.params.alpha.clamp(0.0, 1.0);

    let scored: Vec<Scored> = match req.mode {
        SearchMode::Semantic => {
            let Some(qv) = req.query_vec else {
                return Vec::new();
            };
            semantic_candidates(generation, qv, req.params.metric)
                .into_iter()
                .map(|c| Scored {
                    chunk_id: c.chunk_id,
                    score: c.raw_score,
                    semantic: None,
                    keyword: None,
                })
                .collect()
        }
        SearchMode::Keyword => keyword_candidates(generation, &terms)
            .into_iter()
            .map(|c| Scored {
                chunk_id: c.chunk_id,
                score: c.raw_score,
                semantic: None,
                keyword: None,
            })
            .collect(),
        SearchMode::Hybrid => {
            let mut sem = if alpha > 0.0 {
                match req.query_vec {
                    Some(qv) => semantic_candidates(generation, qv, req.params.metric),
                    None => return Vec::new(),
                }
            } else {
                Vec::new()
            };
            let mut kw = if alpha < 1.0 {
                keyword_candidates(generation, &terms)
            } else {
                Vec::new()
            };
            sem.truncate(depth);
            kw.truncate(depth);
            merge_hybrid(&sem, &kw, alpha)
                .into_iter()
                .map(|(chunk_id, score, s, k)| Scored {
                    chunk_id,
                    score,
                    semantic: Some(s),
                    keyword: Some(k),
                })
                .collect()
        }
    };

    let mut per_doc: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut hits = Vec::with_capacity(req.k);

    for s in scored {
        if hits.len() >= req.k {
            break;
        }
        if let Some(min) = req.params.min_score {
            if s.score < min {
                continue;
            }
        }
        if !seen.insert(s.chunk_id.clone()) {
            continue;
        }
        let Some(entry) = generation.entry(&s.chunk_id) else {
            continue;
        };
        if let Some(cap) = req.params.max_per_document {
            let n = per_doc.entry(entry.document_path.clone()).or_insert(0);
            if *n >= cap {
                continue;
            }
            *n += 1;
        }
        hits.push(SearchHit {
            chunk_id: s.chunk_id,
            document_path: entry.document_path.clone(),
            snippet: snippet(&entry.text, &terms),
            score: s.score,
            semantic_score: s.semantic,
            keyword_score: s.keyword,
        });
    }

    hits
}

/// Excerpt of `text` around the first query term, at most 240 characters.
pub fn snippet(text: &str, terms: &[String]) -> String {
    let total = text.chars().count();
    if total <= SNIPPET_CHARS {
        return text.to_string();
    }

    // Lowercasing can change a character's width, so every byte of `lower`
    // records the index of the character in `text` it came from.
    let mut lower = String::with_capacity(text.len());
    let mut origin: Vec<usize> = Vec::with_capacity(text.len());
    for (i, c) in text.chars().enumerate() {
        lower.extend(c.to_lowercase());
        origin.resize(lower.len(), i);
    }
    let start_char = terms
        .iter()
        .filter_map(|t| lower.find(t.as_str()))
        .min()
        .map(|byte| origin[byte].saturating_sub(SNIPPET_CHARS / 4))
        .unwrap_or(0)
        .min(total - SNIPPET_CHARS);

    let body: String = text.chars().skip(start_char).take(SNIPPET_CHARS).collect();
    let mut out = String::with_capacity(body.len() + 6);
    if start_char > 0 {
        out.push_str("...");
    }
    out.push_str(body.trim());
    if start_char + SNIPPET_CHARS < total {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::models::{DocumentFormat, DocumentRecord, IndexEntry};

    fn candidate(id: &str, score: f64) -> Candidate {
        Candidate {
            chunk_id: id.to_string(),
            raw_score: score,
        }
    }

    /// Three single-chunk documents with hand-picked 2-d vectors.
    fn corpus() -> Generation {
        let docs = [
            ("/d/a.txt", "rust ownership and borrowing", [1.0, 0.0]),
            ("/d/b.txt", "python garbage collection", [0.0, 1.0]),
            ("/d/c.txt", "rust async runtime rust tokio", [0.7, 0.7]),
        ];
        let mut b = Generation::empty(2).builder("t", 1);
        for (path, text, v) in docs {
            let chunk = chunk_text(path, text, 100).remove(0);
            b.put_document(DocumentRecord {
                path: path.to_string(),
                format: DocumentFormat::Text,
                size: text.len() as u64,
                modified_at: 0,
                content_hash: chunk.content_hash.clone(),
                chunk_ids: vec![chunk.id.clone()],
            });
            b.insert_entry(IndexEntry::from_chunk(chunk, v.to_vec())).unwrap();
        }
        b.build()
    }

    fn request<'a>(query: &'a str, qv: Option<&'a [f32]>, mode: SearchMode, alpha: f64) -> RankRequest<'a> {
        RankRequest {
            query,
            query_vec: qv,
            mode,
            k: 10,
            params: RankParams {
                alpha,
                ..RankParams::default()
            },
        }
    }

    fn ids(hits: &[SearchHit]) -> Vec<String> {
        hits.iter().map(|h| h.chunk_id.clone()).collect()
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let c = vec![candidate("c1", 10.0), candidate("c2", 5.0), candidate("c3", 0.0)];
        let r = normalize_scores(&c);
        assert!((r[0].1 - 1.0).abs() < 1e-9);
        assert!((r[1].1 - 0.5).abs() < 1e-9);
        assert!(r[2].1.abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let c = vec![candidate("c1", 3.0), candidate("c2", 3.0)];
        for (_, s) in normalize_scores(&c) {
            assert!((s - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_merge_dedups_and_breaks_ties_by_id() {
        let sem = vec![candidate("b", 0.9), candidate("a", 0.1)];
        let kw = vec![candidate("a", 2.0), candidate("b", 1.0)];
        let merged = merge_hybrid(&sem, &kw, 0.5);
        assert_eq!(merged.len(), 2);
        // both combine to 0.5; tie broken by ascending id
        assert_eq!(merged[0].0, "a");
        assert_eq!(merged[1].0, "b");
    }

    #[test]
    fn test_semantic_orders_by_similarity() {
        let g = corpus();
        let qv = [1.0f32, 0.1];
        let hits = rank(&g, &request("anything", Some(&qv), SearchMode::Semantic, 0.5));
        let paths: Vec<&str> = hits.iter().map(|h| h.document_path.as_str()).collect();
        assert_eq!(paths, vec!["/d/a.txt", "/d/c.txt", "/d/b.txt"]);
    }

    #[test]
    fn test_keyword_prefers_term_frequency() {
        let g = corpus();
        let hits = rank(&g, &request("rust", None, SearchMode::Keyword, 0.5));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_path, "/d/c.txt");
        assert_eq!(hits[1].document_path, "/d/a.txt");
    }

    #[test]
    fn test_alpha_one_matches_semantic_order() {
        let g = corpus();
        let qv = [0.2f32, 1.0];
        let sem = rank(&g, &request("rust tokio", Some(&qv), SearchMode::Semantic, 0.5));
        let hyb = rank(&g, &request("rust tokio", Some(&qv), SearchMode::Hybrid, 1.0));
        assert_eq!(ids(&sem), ids(&hyb));
    }

    #[test]
    fn test_alpha_zero_matches_keyword_order() {
        let g = corpus();
        let qv = [0.0f32, 1.0];
        let kw = rank(&g, &request("rust ownership", Some(&qv), SearchMode::Keyword, 0.5));
        let hyb = rank(&g, &request("rust ownership", Some(&qv), SearchMode::Hybrid, 0.0));
        assert_eq!(ids(&kw), ids(&hyb));
    }

    #[test]
    fn test_min_score_can_empty_results() {
        let g = corpus();
        let qv = [1.0f32, 0.0];
        let mut req = request("rust", Some(&qv), SearchMode::Semantic, 0.5);
        req.params.min_score = Some(1.5);
        assert!(rank(&g, &req).is_empty());
    }

    #[test]
    fn test_empty_generation_is_empty_result() {
        let g = Generation::empty(2);
        let qv = [1.0f32, 0.0];
        assert!(rank(&g, &request("rust", Some(&qv), SearchMode::Hybrid, 0.5)).is_empty());
    }

    #[test]
    fn test_per_document_cap() {
        let text = "alpha one\n\nalpha two\n\nalpha three";
        let mut b = Generation::empty(1).builder("t", 1);
        for chunk in chunk_text("/d/x.txt", text, 3) {
            b.insert_entry(IndexEntry::from_chunk(chunk, vec![1.0])).unwrap();
        }
        let g = b.build();
        let mut req = request("alpha", None, SearchMode::Keyword, 0.5);
        assert_eq!(rank(&g, &req).len(), 3);
        req.params.max_per_document = Some(1);
        assert_eq!(rank(&g, &req).len(), 1);
    }

    #[test]
    fn test_snippet_centers_on_match() {
        let text = format!("{} needle {}", "x ".repeat(300), "y ".repeat(300));
        let s = snippet(&text, &["needle".to_string()]);
        assert!(s.contains("needle"));
        assert!(s.starts_with("..."));
        assert!(s.chars().count() <= SNIPPET_CHARS + 6);
    }

    #[test]
    fn test_snippet_handles_width_changing_lowercase() {
        // 'İ' lowercases from 2 to 3 bytes and 'ẞ' from 3 to 2.
        let text = format!("{}İẞx tail", "aa ".repeat(100));
        let s = snippet(&text, &["ßx".to_string()]);
        assert!(s.contains("İẞx"));
        assert!(s.starts_with("..."));

        let mut b = Generation::empty(1).builder("t", 1);
        let chunk = chunk_text("/d/u.txt", &text, 1000).remove(0);
        b.insert_entry(IndexEntry::from_chunk(chunk, vec![1.0])).unwrap();
        let g = b.build();
        let qv = [1.0f32];
        let hits = rank(&g, &request("ßx", Some(&qv), SearchMode::Semantic, 0.5));
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("ẞx"));
    }
}
