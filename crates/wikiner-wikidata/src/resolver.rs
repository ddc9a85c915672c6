//! Title -> QID resolution through the Wikipedia action API
//!
//! One `prop=pageprops` query per title, following redirects, reading the
//! `wikibase_item` page property of the first page that has one.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;
use wikiner_core::{Qid, Title, WikinerError, WikipediaConfig};

use crate::TitleResolver;

#[derive(Debug, Deserialize)]
struct PagePropsResponse {
    query: Option<QueryBlock>,
}

#[derive(Debug, Deserialize)]
struct QueryBlock {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    pageprops: Option<PageProps>,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    wikibase_item: Option<String>,
}

/// QID of the first page carrying a `wikibase_item` property
///
/// Expects a `formatversion=2` body, where `query.pages` is an array.
pub fn extract_qid(body: &str) -> Result<Option<Qid>, serde_json::Error> {
    let response: PagePropsResponse = serde_json::from_str(body)?;

    Ok(response
        .query
        .into_iter()
        .flat_map(|q| q.pages)
        .filter_map(|page| page.pageprops)
        .find_map(|props| props.wikibase_item)
        .map(Qid::new))
}

/// Wikipedia page-properties client for one language edition
pub struct WikipediaResolver {
    client: Client,
    api_url: String,
}

impl WikipediaResolver {
    /// Create from config
    pub fn from_config(config: &WikipediaConfig, user_agent: &str) -> wikiner_core::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(config.timeout())
            .build()
            .map_err(|e| WikinerError::Remote(format!("failed to build Wikipedia client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url(),
        })
    }

    /// Set custom API URL
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    async fn lookup(&self, title: &Title) -> Result<Option<Qid>, String> {
        let body = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("titles", title.as_str()),
                ("redirects", "1"),
                ("prop", "pageprops"),
                ("ppprop", "wikibase_item"),
                ("format", "json"),
                ("formatversion", "2"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?
            .text()
            .await
            .map_err(|e| e.to_string())?;

        extract_qid(&body).map_err(|e| format!("malformed response: {e}"))
    }
}

#[async_trait]
impl TitleResolver for WikipediaResolver {
    async fn resolve(&self, title: &Title) -> Option<Qid> {
        match self.lookup(title).await {
            Ok(Some(qid)) => Some(qid),
            Ok(None) => {
                warn!(%title, "no Wikidata item for title");
                None
            }
            Err(reason) => {
                warn!(%title, %reason, "Wikipedia query failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_qid_first_page_wins() {
        let body = r#"{"batchcomplete": true, "query": {
            "redirects": [{"from": "Gandhi", "to": "Mahatma Gandhi"}],
            "pages": [
                {"pageid": 1, "title": "Missing", "missing": true},
                {"pageid": 19379, "title": "Mahatma Gandhi",
                 "pageprops": {"wikibase_item": "Q1001"}},
                {"pageid": 20, "title": "Other", "pageprops": {"wikibase_item": "Q7"}}
            ]}}"#;
        assert_eq!(extract_qid(body).unwrap(), Some(Qid::new("Q1001")));
    }

    #[test]
    fn test_extract_qid_without_pageprops() {
        let body = r#"{"query": {"pages": [{"title": "Nothing", "missing": true}]}}"#;
        assert_eq!(extract_qid(body).unwrap(), None);
        assert_eq!(extract_qid(r#"{"batchcomplete": true}"#).unwrap(), None);
    }

    #[test]
    fn test_extract_qid_malformed() {
        assert!(extract_qid("<html>").is_err());
        assert!(extract_qid(r#"{"query": {"pages": {"-1": {}}}}"#).is_err());
    }

    #[tokio::test]
    async fn test_resolve_against_mock_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("titles", "Indian_Space_Research_Organisation"))
            .and(query_param("prop", "pageprops"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"query": {"pages": [{"pageid": 5, "pageprops": {"wikibase_item": "Q1234"}}]}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("titles", "Broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let resolver = WikipediaResolver::from_config(&WikipediaConfig::default(), "wikiner-test")
            .unwrap()
            .with_api_url(format!("{}/w/api.php", server.uri()));

        let title = Title::parse("Indian Space Research Organisation").unwrap();
        assert_eq!(resolver.resolve(&title).await, Some(Qid::new("Q1234")));

        let broken = Title::parse("Broken").unwrap();
        assert_eq!(resolver.resolve(&broken).await, None);

        let unknown = Title::parse("Unknown page").unwrap();
        assert_eq!(resolver.resolve(&unknown).await, None);
    }

    /// Collects formatted log output for assertions
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_title_without_item_is_logged() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("titles", "Disambiguation_page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"query": {"pages": [{"pageid": 9, "title": "Disambiguation page"}]}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("titles", "Mumbai"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"query": {"pages": [{"pageid": 1, "pageprops": {"wikibase_item": "Q1156"}}]}}"#,
            ))
            .mount(&server)
            .await;

        let resolver = WikipediaResolver::from_config(&WikipediaConfig::default(), "wikiner-test")
            .unwrap()
            .with_api_url(format!("{}/w/api.php", server.uri()));

        let mumbai = Title::parse("Mumbai").unwrap();
        assert_eq!(resolver.resolve(&mumbai).await, Some(Qid::new("Q1156")));

        let title = Title::parse("Disambiguation page").unwrap();
        assert_eq!(resolver.resolve(&title).await, None);

        let output = logs.contents();
        assert_eq!(output.matches("no Wikidata item for title").count(), 1);
        assert!(output.contains("Disambiguation_page"));
    }

    #[tokio::test]
    async fn test_resolve_unreachable_host() {
        let resolver = WikipediaResolver::from_config(&WikipediaConfig::default(), "wikiner-test")
            .unwrap()
            .with_api_url("http://127.0.0.1:9/w/api.php");

        let title = Title::parse("Anything").unwrap();
        assert_eq!(resolver.resolve(&title).await, None);
    }
}
