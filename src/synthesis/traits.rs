//! Synthesizer trait definition.

use async_trait::async_trait;

use super::types::{SynthesisRequest, SynthesisResponse};

/// External capability that turns a fragment cluster into candidate units.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Propose knowledge units for one cluster.
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> crate::error::Result<SynthesisResponse>;

    /// Name used in logs.
    fn name(&self) -> &str;
}
