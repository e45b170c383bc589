//! Scope filters applied before distance evaluation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{Fragment, FragmentId};

/// Declarative fragment scope. Empty fields match everything.
///
/// This is the part of a filter a persistent store can push down into its
/// own query language; claims use it to pick a session's working set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentScope {
    /// Restrict to one source.
    pub source_id: Option<String>,
    /// Restrict to these categories.
    pub categories: Vec<String>,
    /// Restrict to an explicit id set.
    pub fragment_ids: Option<Vec<FragmentId>>,
}

impl FragmentScope {
    /// Scope matching every fragment.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a source.
    pub fn source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Add an allowed category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    /// Restrict to an explicit id set.
    pub fn ids(mut self, ids: impl IntoIterator<Item = FragmentId>) -> Self {
        self.fragment_ids = Some(ids.into_iter().collect());
        self
    }

    /// Whether a fragment falls inside this scope.
    pub fn matches(&self, fragment: &Fragment) -> bool {
        if let Some(source_id) = &self.source_id {
            if fragment.source_id.as_deref() != Some(source_id.as_str()) {
                return false;
            }
        }
        if !self.categories.is_empty() && !self.categories.iter().any(|c| c == &fragment.category) {
            return false;
        }
        if let Some(ids) = &self.fragment_ids {
            if !ids.contains(&fragment.id) {
                return false;
            }
        }
        true
    }
}

/// Caller-supplied fragment predicate.
pub type FragmentPredicate = Arc<dyn Fn(&Fragment) -> bool + Send + Sync>;

/// A scope plus any number of arbitrary predicates, all of which must hold.
#[derive(Clone, Default)]
pub struct ScopeFilter {
    scope: FragmentScope,
    predicates: Vec<FragmentPredicate>,
}

impl ScopeFilter {
    /// Filter that accepts everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter from a declarative scope.
    pub fn from_scope(scope: FragmentScope) -> Self {
        Self {
            scope,
            predicates: Vec::new(),
        }
    }

    /// Add a predicate.
    pub fn and<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Fragment) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// The declarative part of the filter.
    pub fn scope(&self) -> &FragmentScope {
        &self.scope
    }

    /// Whether the fragment passes the scope and every predicate.
    pub fn matches(&self, fragment: &Fragment) -> bool {
        self.scope.matches(fragment) && self.predicates.iter().all(|p| p(fragment))
    }
}

impl From<FragmentScope> for ScopeFilter {
    fn from(scope: FragmentScope) -> Self {
        Self::from_scope(scope)
    }
}

impl fmt::Debug for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeFilter")
            .field("scope", &self.scope)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}
