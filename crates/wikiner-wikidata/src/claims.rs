//! Direct claim lookups via the Wikidata action API (`wbgetclaims`)

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use wikiner_core::{Qid, WikidataConfig, WikinerError};

use crate::ClaimLookup;

/// "instance of"
pub const INSTANCE_OF: &str = "P31";

/// Client for `action=wbgetclaims`
pub struct WikidataClaims {
    client: Client,
    api_url: String,
}

impl WikidataClaims {
    /// Create from config
    pub fn from_config(config: &WikidataConfig, user_agent: &str) -> wikiner_core::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(config.claims_timeout())
            .build()
            .map_err(|e| WikinerError::Remote(format!("failed to build claims client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.claims_api_url.clone(),
        })
    }

    /// Set custom API URL
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    async fn fetch_claims(&self, qid: &Qid, property: &str) -> Result<serde_json::Value, reqwest::Error> {
        self.client
            .get(&self.api_url)
            .query(&[
                ("action", "wbgetclaims"),
                ("entity", qid.as_str()),
                ("property", property),
                ("props", ""),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

/// Target item of the first claim for `property`
pub fn first_claim_target(body: &serde_json::Value, property: &str) -> Option<Qid> {
    body.get("claims")?
        .get(property)?
        .get(0)?
        .pointer("/mainsnak/datavalue/value/id")?
        .as_str()
        .map(Qid::new)
}

#[async_trait]
impl ClaimLookup for WikidataClaims {
    async fn instance_of(&self, qid: &Qid) -> Option<Qid> {
        match self.fetch_claims(qid, INSTANCE_OF).await {
            Ok(body) => first_claim_target(&body, INSTANCE_OF),
            Err(e) => {
                debug!(%qid, error = %e, "claim lookup failed");
                None
            }
        }
    }
}
