//! Knowledge unit synthesis.
//!
//! A [`Synthesizer`] turns one cluster of fragments into candidate units.
//! The [`SynthesisCoordinator`] validates candidates against the cluster
//! before anything is committed.

mod api;
mod coordinator;
mod local;
mod traits;
mod types;

pub use api::ApiSynthesizer;
pub use coordinator::{
    ClusterSynthesis, Rejection, RejectionReason, SynthesisCoordinator, DEFAULT_MAX_CONTENT_CHARS,
};
pub use local::KeywordSynthesizer;
pub use traits::Synthesizer;
pub use types::{
    CandidateUnit, FragmentPayload, SynthesisGuidance, SynthesisRequest, SynthesisResponse,
    MAX_COMMENT_CHARS, MAX_RATIONALE_CHARS, MAX_SUMMARY_CHARS, MAX_TITLE_CHARS,
};

use std::sync::Arc;

use crate::config::{SynthesisConfig, SynthesisProvider};
use crate::error::Result;

/// Create a synthesizer based on configuration.
pub fn create_synthesizer(config: &SynthesisConfig) -> Result<Arc<dyn Synthesizer>> {
    match config.provider {
        SynthesisProvider::Local => Ok(Arc::new(KeywordSynthesizer::new(config.max_keywords))),
        SynthesisProvider::Api => Ok(Arc::new(ApiSynthesizer::from_config(&config.api)?)),
    }
}
