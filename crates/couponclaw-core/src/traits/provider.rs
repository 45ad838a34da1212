//! Benefit provider trait: the three upstream operations the engine needs.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{Benefit, Credential};

/// External benefit provider.
///
/// Implementations perform exactly one upstream exchange per call and never
/// retry internally; retry policy belongs to the scheduler.
#[async_trait]
pub trait BenefitProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Benefits the credential could claim right now.
    async fn list_claimable(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError>;

    /// Claim everything claimable; returns what was actually claimed.
    async fn claim_all(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError>;

    /// Benefits already owned by the credential, with expiry where known.
    async fn list_owned(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError>;
}
