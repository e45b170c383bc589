//! Validation of synthesizer output against real cluster membership.
//!
//! Synthesizer output is untrusted. For each candidate, in response order:
//!
//! 1. an empty fragment list is rejected
//! 2. any id outside the cluster rejects the whole candidate
//! 3. ids already taken by an earlier accepted candidate are dropped
//! 4. fewer than two remaining ids is rejected
//! 5. text fields are trimmed to their limits and the category normalised

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::Synthesizer;
use super::types::{
    CandidateUnit, FragmentPayload, SynthesisGuidance, SynthesisRequest, SynthesisResponse,
    MAX_COMMENT_CHARS, MAX_RATIONALE_CHARS, MAX_SUMMARY_CHARS, MAX_TITLE_CHARS,
};
use crate::cluster::MIN_CLUSTER_SIZE;
use crate::error::Result;
use crate::model::{
    Cluster, ClusterId, Confidence, Fragment, FragmentId, KnowledgeUnit, SessionId, UnitId,
};
use crate::utils::clamp_text;

/// Default bound on consolidated content, in characters.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 4000;

/// Why a candidate was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// No fragment ids at all.
    EmptyFragmentSet,
    /// Ids that are not members of the cluster.
    ForeignFragments { fragment_ids: Vec<FragmentId> },
    /// Too few ids left after deduplication and conflict trimming.
    TooFewFragments { remaining: usize },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFragmentSet => write!(f, "no fragment ids"),
            Self::ForeignFragments { fragment_ids } => {
                let ids: Vec<String> = fragment_ids.iter().map(|id| id.to_string()).collect();
                write!(f, "fragments not in cluster: {}", ids.join(", "))
            }
            Self::TooFewFragments { remaining } => {
                write!(f, "only {} usable fragment(s), need {}", remaining, MIN_CLUSTER_SIZE)
            }
        }
    }
}

/// A dropped candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Position of the candidate in the response.
    pub candidate: usize,
    pub reason: RejectionReason,
}

/// Validated outcome for one cluster.
#[derive(Debug, Clone)]
pub struct ClusterSynthesis {
    pub cluster_id: ClusterId,
    /// Units ready to commit, in response order.
    pub accepted: Vec<KnowledgeUnit>,
    pub rejected: Vec<Rejection>,
    /// Ids removed from later candidates because an earlier one took them.
    pub trimmed: Vec<FragmentId>,
    /// Free-text message from the synthesizer, if any.
    pub message: Option<String>,
}

/// Sends clusters to a [`Synthesizer`] and validates what comes back.
pub struct SynthesisCoordinator {
    synthesizer: Arc<dyn Synthesizer>,
    guidance: SynthesisGuidance,
    max_content_chars: usize,
}

impl SynthesisCoordinator {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, guidance: SynthesisGuidance) -> Self {
        Self {
            synthesizer,
            guidance,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }

    /// Set the content bound.
    pub fn with_max_content_chars(mut self, max: usize) -> Self {
        self.max_content_chars = max;
        self
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }

    /// Request for the members of `cluster` found in `fragments`.
    pub fn request_for(&self, cluster: &Cluster, fragments: &[Fragment]) -> SynthesisRequest {
        SynthesisRequest {
            guidance: self.guidance.clone(),
            fragments: fragments
                .iter()
                .filter(|f| cluster.contains(f.id))
                .map(FragmentPayload::from)
                .collect(),
        }
    }

    /// Call the synthesizer for one cluster and validate its answer.
    pub async fn synthesize_cluster(
        &self,
        session_id: SessionId,
        cluster: &Cluster,
        fragments: &[Fragment],
    ) -> Result<ClusterSynthesis> {
        let request = self.request_for(cluster, fragments);
        debug!(
            "Synthesizing cluster {} ({} fragments) with {}",
            cluster.ordinal,
            request.fragments.len(),
            self.synthesizer.name()
        );
        let response = self.synthesizer.synthesize(&request).await?;
        Ok(self.validate(session_id, cluster, fragments, response))
    }

    /// Validate a response against the cluster it was produced for.
    pub fn validate(
        &self,
        session_id: SessionId,
        cluster: &Cluster,
        fragments: &[Fragment],
        response: SynthesisResponse,
    ) -> ClusterSynthesis {
        let mut outcome = ClusterSynthesis {
            cluster_id: cluster.id,
            accepted: Vec::new(),
            rejected: Vec::new(),
            trimmed: Vec::new(),
            message: response.message,
        };
        let mut taken: HashSet<FragmentId> = HashSet::new();

        for (index, candidate) in response.knowledge_units.into_iter().enumerate() {
            let reject = |reason: RejectionReason| {
                warn!(
                    "Synthesis quality issue in cluster {}: candidate {} rejected ({})",
                    cluster.ordinal, index, reason
                );
                Rejection {
                    candidate: index,
                    reason,
                }
            };

            if candidate.fragment_ids.is_empty() {
                outcome.rejected.push(reject(RejectionReason::EmptyFragmentSet));
                continue;
            }

            let foreign: Vec<FragmentId> = candidate
                .fragment_ids
                .iter()
                .copied()
                .filter(|id| !cluster.contains(*id))
                .collect();
            if !foreign.is_empty() {
                outcome
                    .rejected
                    .push(reject(RejectionReason::ForeignFragments { fragment_ids: foreign }));
                continue;
            }

            let mut ids = candidate.fragment_ids.clone();
            ids.sort_unstable();
            ids.dedup();

            let (kept, lost): (Vec<FragmentId>, Vec<FragmentId>) =
                ids.into_iter().partition(|id| !taken.contains(id));
            if !lost.is_empty() {
                warn!(
                    "Synthesis quality issue in cluster {}: candidate {} reuses fragments {:?} \
                     already assigned earlier",
                    cluster.ordinal, index, lost
                );
                outcome.trimmed.extend(lost);
            }

            if kept.len() < MIN_CLUSTER_SIZE {
                outcome
                    .rejected
                    .push(reject(RejectionReason::TooFewFragments { remaining: kept.len() }));
                continue;
            }

            taken.extend(kept.iter().copied());
            let unit = self.build_unit(session_id, cluster, fragments, candidate, kept);
            outcome.accepted.push(unit);
        }

        outcome
    }

    fn build_unit(
        &self,
        session_id: SessionId,
        cluster: &Cluster,
        fragments: &[Fragment],
        candidate: CandidateUnit,
        fragment_ids: Vec<FragmentId>,
    ) -> KnowledgeUnit {
        let members: Vec<&Fragment> = fragments
            .iter()
            .filter(|f| fragment_ids.binary_search(&f.id).is_ok())
            .collect();

        let title = match clamp_text(&candidate.title, MAX_TITLE_CHARS) {
            t if t.is_empty() => clamp_text(&cluster.name, MAX_TITLE_CHARS),
            t => t,
        };
        let category = self
            .guidance
            .resolve_category(&candidate.category)
            .unwrap_or_else(|| dominant_category(&members));
        let content = match clamp_text(&candidate.content, self.max_content_chars) {
            c if c.is_empty() => {
                let joined = members
                    .iter()
                    .map(|f| f.content.trim())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                clamp_text(&joined, self.max_content_chars)
            }
            c => c,
        };
        let confidence = Confidence::parse(&candidate.confidence).unwrap_or(Confidence::Low);

        KnowledgeUnit {
            id: UnitId::new(),
            session_id: Some(session_id),
            cluster_id: Some(cluster.id),
            title,
            summary: clamp_text(&candidate.summary, MAX_SUMMARY_CHARS),
            category,
            content,
            confidence,
            confidence_comment: optional_text(candidate.confidence_comment, MAX_COMMENT_CHARS),
            clustering_rationale: optional_text(
                candidate.clustering_rationale,
                MAX_RATIONALE_CHARS,
            ),
            embedding: None,
            fragment_ids,
            created_at: Utc::now(),
        }
    }
}

fn optional_text(text: Option<String>, max_chars: usize) -> Option<String> {
    text.map(|t| clamp_text(&t, max_chars)).filter(|t| !t.is_empty())
}

/// Most common category among the members, alphabetical on ties.
fn dominant_category(members: &[&Fragment]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for fragment in members {
        *counts.entry(fragment.category.as_str()).or_insert(0) += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (category, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((category, count));
        }
    }
    best.map(|(c, _)| c.to_string())
        .unwrap_or_else(|| "uncategorized".to_string())
}
