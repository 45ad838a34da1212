//! `BenefitProvider` over the provider's MCP tools.

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Utc};
use couponclaw_core::config::ProviderConfig;
use couponclaw_core::error::ProviderError;
use couponclaw_core::traits::BenefitProvider;
use couponclaw_core::types::{Benefit, Credential};

use crate::client::McpClient;
use crate::parse::{parse_benefits, says_none_available};

/// Tool names exposed by the provider's MCP server.
pub mod tools {
    pub const AVAILABLE: &str = "available-coupons";
    pub const CLAIM_ALL: &str = "auto-bind-coupons";
    pub const OWNED: &str = "my-coupons";
}

pub struct McpProvider {
    client: McpClient,
    /// Resolves year-less expiry dates against the local calendar.
    offset: FixedOffset,
}

impl McpProvider {
    pub fn new(config: &ProviderConfig, offset: FixedOffset) -> Result<Self, ProviderError> {
        Ok(Self { client: McpClient::new(config)?, offset })
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    async fn list(&self, credential: &Credential, tool: &str) -> Result<Vec<Benefit>, ProviderError> {
        let text = self.client.call_tool(credential, tool, None).await?;
        let benefits = parse_benefits(&text, self.today());
        if benefits.is_empty() && !text.trim().is_empty() && !says_none_available(&text) {
            tracing::debug!("🔎 {tool}: no benefits recognised in {} bytes of output", text.len());
        }
        Ok(benefits)
    }
}

#[async_trait]
impl BenefitProvider for McpProvider {
    fn name(&self) -> &str {
        "mcp"
    }

    async fn list_claimable(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError> {
        self.list(credential, tools::AVAILABLE).await
    }

    async fn claim_all(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError> {
        let claimed = self.list(credential, tools::CLAIM_ALL).await?;
        tracing::debug!("🎟️ {} benefit(s) claimed via {}", claimed.len(), self.client.endpoint());
        Ok(claimed)
    }

    async fn list_owned(&self, credential: &Credential) -> Result<Vec<Benefit>, ProviderError> {
        self.list(credential, tools::OWNED).await
    }
}
