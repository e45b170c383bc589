//! Synthesizer request and response shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Fragment, FragmentId};

/// Title limit, in characters.
pub const MAX_TITLE_CHARS: usize = 75;
/// Summary limit, in characters.
pub const MAX_SUMMARY_CHARS: usize = 250;
/// Confidence comment limit, in characters.
pub const MAX_COMMENT_CHARS: usize = 200;
/// Clustering rationale limit, in characters.
pub const MAX_RATIONALE_CHARS: usize = 200;

/// Instructions sent with every synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisGuidance {
    /// Primary instructions.
    pub instructions: String,
    /// How to weigh fragments against each other.
    pub weighting_rules: String,
    /// Allowed categories and what each one means.
    pub categories: BTreeMap<String, String>,
}

impl Default for SynthesisGuidance {
    fn default() -> Self {
        Self {
            instructions: "Consolidate the fragments into knowledge units. Each unit must \
                           combine at least two fragments that describe the same fact, \
                           procedure or decision. List the ids of every fragment used."
                .to_string(),
            weighting_rules: "Prefer newer and more specific fragments when they disagree. \
                              Do not invent facts that no fragment states."
                .to_string(),
            categories: BTreeMap::new(),
        }
    }
}

impl SynthesisGuidance {
    /// Canonical category name for `raw`, matched case-insensitively.
    ///
    /// With no configured categories any non-empty name is accepted as is.
    pub fn resolve_category(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if self.categories.is_empty() {
            return Some(raw.to_string());
        }
        self.categories
            .keys()
            .find(|name| name.eq_ignore_ascii_case(raw))
            .cloned()
    }
}

/// One fragment as the synthesizer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentPayload {
    pub id: FragmentId,
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl From<&Fragment> for FragmentPayload {
    fn from(fragment: &Fragment) -> Self {
        Self {
            id: fragment.id,
            title: fragment.title.clone(),
            content: fragment.content.clone(),
            category: fragment.category.clone(),
            source_id: fragment.source_id.clone(),
            metadata: fragment.metadata.clone(),
        }
    }
}

/// Request for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub guidance: SynthesisGuidance,
    pub fragments: Vec<FragmentPayload>,
}

/// A unit the synthesizer proposes. Untrusted until validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateUnit {
    pub fragment_ids: Vec<FragmentId>,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub content: String,
    /// `high`, `medium` or `low`; anything else is read as low.
    pub confidence: String,
    pub confidence_comment: Option<String>,
    pub clustering_rationale: Option<String>,
}

/// Synthesizer answer for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisResponse {
    pub knowledge_units: Vec<CandidateUnit>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_category() {
        let mut guidance = SynthesisGuidance::default();
        assert_eq!(guidance.resolve_category(" howto "), Some("howto".to_string()));
        assert_eq!(guidance.resolve_category(""), None);

        guidance
            .categories
            .insert("Fact".to_string(), "A verifiable statement".to_string());
        assert_eq!(guidance.resolve_category("fact"), Some("Fact".to_string()));
        assert_eq!(guidance.resolve_category("opinion"), None);
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let json = r#"{"knowledge_units": [{"fragment_ids": [1, 2], "title": "T"}]}"#;
        let response: SynthesisResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.knowledge_units.len(), 1);
        assert_eq!(response.knowledge_units[0].fragment_ids, vec![FragmentId(1), FragmentId(2)]);
        assert!(response.message.is_none());
    }
}
