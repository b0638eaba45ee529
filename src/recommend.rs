//! TF-IDF driven query-refinement recommendations
//!
//! Triggered only for low-confidence searches. TF-IDF is computed over the
//! top result chunks, not the global index; the resulting suggestion is
//! cached with a TTL so identical queries reuse it until expiry.

use crate::config::RecommendationConfig;
use crate::error::{InputError, Result};
use crate::store::RecommendationRepository;
use crate::types::{Recommendation, RecommendationStrategy, ScoredChunk};
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Terms that anchor a query and are never suggested for removal
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "function", "method", "class", "struct", "trait", "interface", "type", "error", "async",
    "test", "config", "api", "import",
];

/// Small bidirectional synonym map for refinement suggestions
const SYNONYM_PAIRS: &[(&str, &str)] = &[
    ("function", "method"),
    ("error", "exception"),
    ("class", "struct"),
    ("test", "spec"),
    ("config", "settings"),
    ("delete", "remove"),
    ("fetch", "download"),
];

/// A tokenized query term with its analysis state
#[derive(Debug, Clone)]
struct AnalyzedTerm {
    text: String,
    quoted: bool,
    tf: f32,
    df: usize,
    tfidf: f32,
}

impl AnalyzedTerm {
    fn essential(&self) -> bool {
        self.quoted || STRUCTURAL_KEYWORDS.contains(&self.text.as_str())
    }

    fn removable(&self) -> bool {
        self.tfidf < 1.0 && !self.essential()
    }

    fn confidence(&self) -> f32 {
        (self.tfidf / 5.0).clamp(0.0, 1.0)
    }
}

/// Recommendation engine over search-result TF-IDF
pub struct RecommendationEngine {
    repo: Arc<RecommendationRepository>,
    config: RecommendationConfig,
}

impl RecommendationEngine {
    pub fn new(repo: Arc<RecommendationRepository>, config: RecommendationConfig) -> Self {
        Self { repo, config }
    }

    /// Whether a search outcome is low-confidence enough to analyze
    pub fn should_recommend(
        query_term_count: usize,
        result_count: usize,
        mean_score: f32,
        tfidf_threshold: f32,
    ) -> bool {
        result_count < 3 || mean_score < tfidf_threshold || query_term_count > 5
    }

    /// Count the query terms the analyzer would consider
    pub fn term_count(query: &str) -> usize {
        tokenize_query(query).len()
    }

    /// Analyze a low-confidence search and produce (or reuse) a suggestion
    pub async fn recommend(
        &self,
        query: &str,
        results: &[ScoredChunk],
        total_documents: usize,
        tfidf_threshold: f32,
    ) -> Result<Option<Recommendation>> {
        if let Some(cached) = self.repo.get_current(query).await? {
            debug!(query, "Reusing cached recommendation");
            return Ok(Some(cached));
        }

        let terms = tokenize_query(query);
        if terms.is_empty() {
            return Err(InputError::MalformedQuery("query has no usable terms".to_string()).into());
        }
        if terms.len() > self.config.max_query_terms {
            return Err(InputError::MalformedQuery(format!(
                "query has {} terms, limit is {}",
                terms.len(),
                self.config.max_query_terms
            ))
            .into());
        }

        let analyzed_docs: Vec<Vec<String>> = results
            .iter()
            .take(self.config.analyzed_chunks)
            .map(|r| tokenize_content(&r.chunk.content))
            .collect();

        let analyzed = analyze_terms(&terms, &analyzed_docs, total_documents);

        let outcome = choose_strategy(&analyzed, &analyzed_docs, total_documents);
        let Some((strategy, suggested_terms, confidence)) = outcome else {
            return Ok(None);
        };

        let now = Utc::now();
        let recommendation = Recommendation {
            id: Uuid::new_v4(),
            query: query.to_string(),
            suggested_terms,
            strategy,
            tfidf_threshold,
            confidence,
            generated_at: now,
            expires_at: now + Duration::days(self.config.ttl_days),
            total_documents,
            analyzed_documents: analyzed_docs.len(),
        };
        self.repo.save(&recommendation).await?;
        debug!(query, strategy = %strategy, "Generated recommendation");
        Ok(Some(recommendation))
    }
}

/// Tokenize a query preserving quoted phrases, deduplicated, single-character
/// terms dropped
fn tokenize_query(query: &str) -> Vec<(String, bool)> {
    let mut terms: Vec<(String, bool)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut rest = query;
    while let Some(open) = rest.find('"') {
        // Bare words before the quote
        for word in rest[..open].split_whitespace() {
            push_term(word, false, &mut terms, &mut seen);
        }
        match rest[open + 1..].find('"') {
            Some(close) => {
                let phrase = &rest[open + 1..open + 1 + close];
                push_term(phrase, true, &mut terms, &mut seen);
                rest = &rest[open + close + 2..];
            }
            None => {
                rest = &rest[open + 1..];
                break;
            }
        }
    }
    for word in rest.split_whitespace() {
        push_term(word, false, &mut terms, &mut seen);
    }

    terms
}

fn push_term(raw: &str, quoted: bool, terms: &mut Vec<(String, bool)>, seen: &mut HashSet<String>) {
    let cleaned = raw
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if cleaned.chars().count() <= 1 {
        return;
    }
    if seen.insert(cleaned.clone()) {
        terms.push((cleaned, quoted));
    }
}

fn tokenize_content(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Per-term TF (average occurrences per containing document), DF, and TF-IDF
fn analyze_terms(
    terms: &[(String, bool)],
    docs: &[Vec<String>],
    total_documents: usize,
) -> Vec<AnalyzedTerm> {
    terms
        .iter()
        .map(|(text, quoted)| {
            let (tf, df) = frequency_of(text, docs);
            AnalyzedTerm {
                text: text.clone(),
                quoted: *quoted,
                tf,
                df,
                tfidf: tfidf(tf, df, total_documents),
            }
        })
        .collect()
}

fn frequency_of(term: &str, docs: &[Vec<String>]) -> (f32, usize) {
    let mut df = 0usize;
    let mut occurrences = 0usize;
    for doc in docs {
        let count = doc.iter().filter(|t| t.as_str() == term).count();
        if count > 0 {
            df += 1;
            occurrences += count;
        }
    }
    let tf = if df > 0 {
        occurrences as f32 / df as f32
    } else {
        0.0
    };
    (tf, df)
}

fn tfidf(tf: f32, df: usize, total_documents: usize) -> f32 {
    tf * ((total_documents as f32 + 1.0) / (df as f32 + 1.0)).ln()
}

fn related(a: &str, b: &str) -> bool {
    if a == b {
        return false;
    }
    if a.contains(b) || b.contains(a) {
        return true;
    }
    SYNONYM_PAIRS
        .iter()
        .any(|(x, y)| (a == *x && b == *y) || (a == *y && b == *x))
}

type StrategyOutcome = (RecommendationStrategy, Vec<String>, f32);

fn choose_strategy(
    analyzed: &[AnalyzedTerm],
    docs: &[Vec<String>],
    total_documents: usize,
) -> Option<StrategyOutcome> {
    // Nothing matched at all: suggest dropping the weakest term so the
    // query has a chance of matching anything
    if docs.is_empty() && analyzed.len() >= 2 {
        let weakest = weakest_index(analyzed)?;
        let suggested = terms_without(analyzed, weakest);
        return Some((RecommendationStrategy::TermRemoval, suggested, 0.5));
    }

    let weakest = weakest_index(analyzed)?;

    // TERM_REMOVAL: drop the weakest removable term, keeping at least two
    if analyzed[weakest].removable() && analyzed.len() >= 3 {
        let confidence = analyzed[weakest].confidence().max(0.1);
        return Some((
            RecommendationStrategy::TermRemoval,
            terms_without(analyzed, weakest),
            confidence,
        ));
    }

    // TERM_REFINEMENT: another strong term related to the weakest
    for (i, term) in analyzed.iter().enumerate() {
        if i != weakest && term.tfidf > 2.0 && related(&analyzed[weakest].text, &term.text) {
            return Some((
                RecommendationStrategy::TermRefinement,
                vec![term.text.clone()],
                0.7,
            ));
        }
    }

    // CONTEXTUAL_ADDITION: strong non-query terms from the analyzed chunks
    let query_terms: HashSet<&str> = analyzed.iter().map(|t| t.text.as_str()).collect();
    let additions = contextual_additions(docs, &query_terms, total_documents);
    if !additions.is_empty() {
        let mut suggested: Vec<String> = analyzed.iter().map(|t| t.text.clone()).collect();
        suggested.extend(additions);
        return Some((RecommendationStrategy::ContextualAddition, suggested, 0.6));
    }

    None
}

fn weakest_index(analyzed: &[AnalyzedTerm]) -> Option<usize> {
    analyzed
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.tfidf
                .partial_cmp(&b.tfidf)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

fn terms_without(analyzed: &[AnalyzedTerm], skip: usize) -> Vec<String> {
    analyzed
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != skip)
        .map(|(_, t)| t.text.clone())
        .collect()
}

/// Up to two document terms with `tfidf > 3` and `df >= 2` not already in the
/// query
fn contextual_additions(
    docs: &[Vec<String>],
    query_terms: &HashSet<&str>,
    total_documents: usize,
) -> Vec<String> {
    let mut candidates: HashMap<&str, (usize, usize)> = HashMap::new();
    for doc in docs {
        let mut in_doc: HashMap<&str, usize> = HashMap::new();
        for token in doc {
            if query_terms.contains(token.as_str()) || token.chars().count() <= 2 {
                continue;
            }
            *in_doc.entry(token.as_str()).or_insert(0) += 1;
        }
        for (token, count) in in_doc {
            let entry = candidates.entry(token).or_insert((0, 0));
            entry.0 += 1; // df
            entry.1 += count; // occurrences
        }
    }

    let mut scored: Vec<(String, f32)> = candidates
        .into_iter()
        .filter_map(|(token, (df, occurrences))| {
            if df < 2 {
                return None;
            }
            let tf = occurrences as f32 / df as f32;
            let score = tfidf(tf, df, total_documents);
            (score > 3.0).then(|| (token.to_string(), score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(2);
    scored.into_iter().map(|(t, _)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::types::StoredChunk;

    fn chunk_with(content: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: StoredChunk {
                chunk_id: "/x.md:0".to_string(),
                file_path: "/x.md".to_string(),
                chunk_index: 0,
                content: content.to_string(),
                chunk_offset: 0,
                token_count: 1,
                created_at: Utc::now(),
            },
            distance: 0.2,
            score: 0.8,
        }
    }

    fn engine() -> RecommendationEngine {
        let db = Arc::new(Database::open_in_memory(4).unwrap());
        RecommendationEngine::new(
            Arc::new(RecommendationRepository::new(db)),
            RecommendationConfig::default(),
        )
    }

    #[test]
    fn test_tokenize_preserves_quoted_phrases() {
        let terms = tokenize_query("find \"exact phrase\" elsewhere");
        assert_eq!(terms.len(), 3);
        assert_eq!(terms[0], ("find".to_string(), false));
        assert_eq!(terms[1], ("exact phrase".to_string(), true));
        assert_eq!(terms[2], ("elsewhere".to_string(), false));
    }

    #[test]
    fn test_tokenize_dedups_and_drops_short() {
        let terms = tokenize_query("a bb BB cc");
        let texts: Vec<_> = terms.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, vec!["bb", "cc"]);
    }

    #[test]
    fn test_trigger_conditions() {
        assert!(RecommendationEngine::should_recommend(2, 1, 0.9, 0.25));
        assert!(RecommendationEngine::should_recommend(2, 10, 0.1, 0.25));
        assert!(RecommendationEngine::should_recommend(6, 10, 0.9, 0.25));
        assert!(!RecommendationEngine::should_recommend(3, 10, 0.9, 0.25));
    }

    #[test]
    fn test_structural_terms_never_removable() {
        let term = AnalyzedTerm {
            text: "function".to_string(),
            quoted: false,
            tf: 0.0,
            df: 0,
            tfidf: 0.0,
        };
        assert!(!term.removable());
    }

    #[tokio::test]
    async fn test_zero_result_query_gets_removal() {
        let engine = engine();
        let rec = engine
            .recommend("xyzzy plugh", &[], 10, 0.25)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.strategy, RecommendationStrategy::TermRemoval);
        assert!(rec.confidence > 0.0);
        assert_eq!(rec.suggested_terms.len(), 1);
    }

    #[tokio::test]
    async fn test_weak_term_removed_from_longer_query() {
        let engine = engine();
        let results: Vec<ScoredChunk> = (0..5)
            .map(|_| chunk_with("tokio spawns async tasks onto the tokio runtime scheduler"))
            .collect();
        let rec = engine
            .recommend("tokio runtime zzzqqq", &results, 50, 0.25)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.strategy, RecommendationStrategy::TermRemoval);
        assert!(!rec.suggested_terms.contains(&"zzzqqq".to_string()));
        assert!(rec.suggested_terms.contains(&"tokio".to_string()));
    }

    #[tokio::test]
    async fn test_cached_recommendation_reused() {
        let engine = engine();
        let first = engine
            .recommend("xyzzy plugh", &[], 10, 0.25)
            .await
            .unwrap()
            .unwrap();
        let second = engine
            .recommend("xyzzy plugh", &[], 10, 0.25)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let engine = engine();
        let err = engine.recommend("a ! ?", &[], 10, 0.25).await.unwrap_err();
        assert_eq!(err.category(), "input");
    }

    #[tokio::test]
    async fn test_too_many_terms_rejected() {
        let engine = engine();
        let query = "one two three four five six seven eight nine";
        let err = engine.recommend(query, &[], 10, 0.25).await.unwrap_err();
        assert_eq!(err.category(), "input");
    }

    #[test]
    fn test_related_terms() {
        assert!(related("function", "method"));
        assert!(related("method", "function"));
        assert!(related("chunk", "chunker"));
        assert!(!related("alpha", "omega"));
        assert!(!related("same", "same"));
    }
}
