//! Session records and the status state machine.
//!
//! ```text
//! Pending ──► Running ──► Completed
//!    │           │
//!    └───────────┴──────► Failed
//! ```
//!
//! Nothing leaves a terminal state. A session stuck in Running is abandoned
//! by its scheduler, never resumed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::SessionConfig;
use crate::cluster::PartitionMetrics;
use crate::error::{CoalesceError, ErrorClass, SessionError};
use crate::model::SessionId;

/// Lifecycle status of a clustering session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(&self, to: SessionStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&CoalesceError> for SessionFailure {
    fn from(err: &CoalesceError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// Persisted state of one clustering session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the session failed.
    pub error: Option<SessionFailure>,
    /// Fragments claimed at start.
    pub claimed_count: usize,
    /// Clusters persisted.
    pub clusters_found: usize,
    /// Knowledge units committed.
    pub units_created: usize,
    /// Fragments released because no cluster took them.
    pub unclustered_count: usize,
    /// Fragments released before clustering: missing, non-finite or
    /// off-dimension embeddings.
    #[serde(default)]
    pub skipped_count: usize,
    /// Synthesis candidates dropped by validation or commit conflicts.
    pub rejected_candidates: usize,
    /// Partition quality, once clustering has run.
    pub metrics: Option<PartitionMetrics>,
}

impl SessionRecord {
    /// New Pending session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            config,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            claimed_count: 0,
            clusters_found: 0,
            units_created: 0,
            unclustered_count: 0,
            skipped_count: 0,
            rejected_candidates: 0,
            metrics: None,
        }
    }

    /// Move to `to`, stamping the matching timestamp.
    pub fn transition(&mut self, to: SessionStatus) -> Result<(), SessionError> {
        if !self.status.can_transition(to) {
            return Err(SessionError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        match to {
            SessionStatus::Running => self.started_at = Some(now),
            SessionStatus::Completed | SessionStatus::Failed => self.completed_at = Some(now),
            SessionStatus::Pending => {}
        }
        self.status = to;
        Ok(())
    }

    /// Move to Failed with a reason.
    pub fn fail(&mut self, failure: SessionFailure) -> Result<(), SessionError> {
        self.transition(SessionStatus::Failed)?;
        self.error = Some(failure);
        Ok(())
    }

    /// Caller-facing summary.
    pub fn status_report(&self) -> SessionStatusReport {
        SessionStatusReport {
            session_id: self.id,
            status: self.status,
            clusters_found: self.clusters_found,
            units_created: self.units_created,
            error: self.error.clone(),
        }
    }
}

/// Answer to `get_session_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub clusters_found: usize,
    pub units_created: usize,
    pub error: Option<SessionFailure>,
}
