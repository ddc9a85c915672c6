//! SPARQL transport and query templates for the Wikidata Query Service
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use reqwest::Client;
use wikiner_core::{Qid, WikidataConfig, WikinerError};

use crate::{QueryError, SparqlReply, SparqlTransport};

/// Membership count: 1 when the item is an instance of the root class or of
/// any of its transitive subclasses
const CATEGORY_COUNT_TEMPLATE: &str = r#"SELECT (COUNT(?item) AS ?count)
WHERE {
    BIND(wd:{item} AS ?item).
    ?item wdt:P31*/wdt:P279* wd:{root} .
}"#;

/// Count query: is `qid` an instance of `root`, or of any subclass of it?
pub fn category_count_query(qid: &Qid, root: &str) -> String {
    CATEGORY_COUNT_TEMPLATE
        .replace("{item}", qid.as_str())
        .replace("{root}", root)
}

/// Value of the `count` binding in a SPARQL JSON result
pub fn parse_count(body: &serde_json::Value) -> Option<u64> {
    body.pointer("/results/bindings/0/count/value")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse().ok())
}

/// HTTP transport to a SPARQL endpoint
pub struct WikidataSparql {
    client: Client,
    endpoint: String,
}

impl WikidataSparql {
    /// Create from config
    pub fn from_config(config: &WikidataConfig, user_agent: &str) -> wikiner_core::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(config.query_timeout())
            .build()
            .map_err(|e| WikinerError::Remote(format!("failed to build SPARQL client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.sparql_url.clone(),
        })
    }

    /// Point at another endpoint (mirrors, tests)
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = url.into();
        self
    }
}

#[async_trait]
impl SparqlTransport for WikidataSparql {
    async fn execute(&self, query: &str) -> Result<SparqlReply, QueryError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("format", "json"), ("query", query)])
            .header("Accept", "application/sparql-results+json")
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(SparqlReply {
            status,
            headers,
            body,
        })
    }
}
