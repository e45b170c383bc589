//! Core records: fragments, clusters, knowledge units and their identities.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a fragment.
///
/// Fragment ids are totally ordered; every deterministic tie-break in the
/// crate (search ranking, merge order, claim order) uses this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub u64);

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FragmentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identity of a clustering session.
    SessionId
);
uuid_id!(
    /// Identity of a knowledge unit.
    UnitId
);
uuid_id!(
    /// Identity of a persisted cluster.
    ClusterId
);

/// A unit of extracted knowledge with an optional embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Fragment ID.
    pub id: FragmentId,
    /// Embedding vector. Fragments without one are invisible to search and clustering.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Category label assigned at extraction time.
    pub category: String,
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Free-text content.
    pub content: String,
    /// Originating source (document, tenant, feed...).
    #[serde(default)]
    pub source_id: Option<String>,
    /// Arbitrary source metadata forwarded to the synthesizer.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Owning knowledge unit; `None` means the fragment is unclustered.
    #[serde(default)]
    pub knowledge_unit_id: Option<UnitId>,
    /// Session currently holding the claim on this fragment.
    #[serde(default)]
    pub claimed_by: Option<SessionId>,
    /// When the fragment was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Fragment {
    /// Create an unowned fragment without an embedding.
    pub fn new(id: u64, category: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: FragmentId(id),
            embedding: None,
            category: category.into(),
            title: String::new(),
            content: content.into(),
            source_id: None,
            metadata: serde_json::Value::Null,
            knowledge_unit_id: None,
            claimed_by: None,
            created_at: Utc::now(),
        }
    }

    /// Set the embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the source.
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Whether the fragment has been committed into a knowledge unit.
    pub fn is_owned(&self) -> bool {
        self.knowledge_unit_id.is_some()
    }

    /// Whether a session currently holds a claim on this fragment.
    pub fn is_claimed(&self) -> bool {
        self.claimed_by.is_some()
    }

    /// Neither owned nor claimed.
    pub fn is_available(&self) -> bool {
        !self.is_owned() && !self.is_claimed()
    }
}

/// Confidence level attached to a knowledge unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Parse leniently, accepting any casing.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" | "med" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A synthesized consolidation of two or more fragments.
///
/// The member set is fixed at creation. Corrections revoke the unit and
/// create a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeUnit {
    /// Unit ID.
    pub id: UnitId,
    /// Session that produced the unit.
    pub session_id: Option<SessionId>,
    /// Cluster the unit was synthesized from.
    pub cluster_id: Option<ClusterId>,
    /// Title (at most 75 chars).
    pub title: String,
    /// Summary (at most 250 chars).
    pub summary: String,
    /// Category.
    pub category: String,
    /// Consolidated content.
    pub content: String,
    /// Confidence level.
    pub confidence: Confidence,
    /// Free-text comment on the confidence level.
    pub confidence_comment: Option<String>,
    /// Why the synthesizer grouped these fragments.
    pub clustering_rationale: Option<String>,
    /// Unit embedding, computed downstream.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Member fragments, sorted ascending.
    pub fragment_ids: Vec<FragmentId>,
    /// When the unit was created.
    pub created_at: DateTime<Utc>,
}

/// Structural grouping of fragments produced by one session, before synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster ID.
    pub id: ClusterId,
    /// Owning session.
    pub session_id: SessionId,
    /// 1-based position within the session.
    pub ordinal: usize,
    /// Display name.
    pub name: String,
    /// Member fragments, sorted ascending.
    pub fragment_ids: Vec<FragmentId>,
    /// When the cluster was persisted.
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    /// Create a cluster for a session.
    pub fn new(session_id: SessionId, ordinal: usize, mut fragment_ids: Vec<FragmentId>) -> Self {
        fragment_ids.sort_unstable();
        Self {
            id: ClusterId::new(),
            session_id,
            ordinal,
            name: format!("Cluster {}", ordinal),
            fragment_ids,
            created_at: Utc::now(),
        }
    }

    /// Number of member fragments.
    pub fn len(&self) -> usize {
        self.fragment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragment_ids.is_empty()
    }

    /// Whether the fragment is a member.
    pub fn contains(&self, id: FragmentId) -> bool {
        self.fragment_ids.binary_search(&id).is_ok()
    }
}
