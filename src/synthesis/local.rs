//! Offline synthesizer built on TF-IDF keywords.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::utils::preview;

use super::traits::Synthesizer;
use super::types::{CandidateUnit, SynthesisRequest, SynthesisResponse};

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can",
    "this", "that", "these", "those", "it", "its", "as", "if", "then", "else", "when", "where",
    "why", "how", "all", "each", "every", "both", "few", "more", "most", "other", "some", "such",
    "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just", "also",
];

/// Proposes one unit per cluster, titled by its strongest keywords.
#[derive(Debug, Clone)]
pub struct KeywordSynthesizer {
    max_keywords: usize,
}

impl KeywordSynthesizer {
    pub fn new(max_keywords: usize) -> Self {
        Self {
            max_keywords: max_keywords.max(1),
        }
    }
}

impl Default for KeywordSynthesizer {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl Synthesizer for KeywordSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResponse> {
        if request.fragments.len() < 2 {
            return Ok(SynthesisResponse {
                knowledge_units: vec![],
                message: Some("not enough fragments to consolidate".to_string()),
            });
        }

        let texts: Vec<String> = request
            .fragments
            .iter()
            .map(|f| format!("{} {}", f.title, f.content))
            .collect();
        let keywords = extract_keywords(&texts, self.max_keywords);

        let mut categories: BTreeMap<&str, usize> = BTreeMap::new();
        for fragment in &request.fragments {
            *categories.entry(fragment.category.as_str()).or_insert(0) += 1;
        }
        let category = categories
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, _)| name.to_string())
            .unwrap_or_default();

        let content = request
            .fragments
            .iter()
            .map(|f| f.content.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let unit = CandidateUnit {
            fragment_ids: request.fragments.iter().map(|f| f.id).collect(),
            title: keywords.join(", "),
            summary: preview(&content, 240),
            category,
            content,
            confidence: "low".to_string(),
            confidence_comment: Some("Keyword grouping without semantic review".to_string()),
            clustering_rationale: Some(format!(
                "{} fragments share the terms: {}",
                request.fragments.len(),
                keywords.join(", ")
            )),
        };

        Ok(SynthesisResponse {
            knowledge_units: vec![unit],
            message: None,
        })
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Top TF-IDF terms across `texts`, highest score first.
fn extract_keywords(texts: &[String], max_keywords: usize) -> Vec<String> {
    if texts.is_empty() {
        return vec![];
    }

    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    let mut term_freq: HashMap<String, usize> = HashMap::new();
    let mut doc_freq: HashMap<String, usize> = HashMap::new();

    for text in texts {
        let mut seen: HashSet<String> = HashSet::new();
        for word in text.split_whitespace() {
            let cleaned = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();

            if cleaned.chars().count() >= 3 && !stopwords.contains(cleaned.as_str()) {
                *term_freq.entry(cleaned.clone()).or_insert(0) += 1;
                if seen.insert(cleaned.clone()) {
                    *doc_freq.entry(cleaned).or_insert(0) += 1;
                }
            }
        }
    }

    let num_docs = texts.len() as f64;
    let mut scores: Vec<(String, f64)> = term_freq
        .into_iter()
        .map(|(term, tf)| {
            let df = doc_freq.get(&term).copied().unwrap_or(1) as f64;
            let idf = (num_docs / df).ln() + 1.0;
            (term, tf as f64 * idf)
        })
        .collect();

    // Alphabetical on equal scores keeps titles stable across runs.
    scores.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scores
        .into_iter()
        .take(max_keywords)
        .map(|(term, _)| term)
        .collect()
}
