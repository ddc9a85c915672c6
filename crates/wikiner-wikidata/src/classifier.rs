//! Category classification of Wikidata items
//!
//! Strategies run in a fixed priority order and the first match wins:
//! 1. PERSON when the item's first "instance of" claim is human (`Q5`),
//!    answered by a cheap direct claim lookup
//! 2. [`CATEGORY_RULES`] in order, each a transitive instance-of/subclass-of
//!    count query through the shared [`QueryDispatcher`]
//!
//! An item that is both an organization and a location is reported as
//! ORGANIZATION.
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use tracing::{debug, warn};
use wikiner_core::{Category, Qid};

use crate::cache::QidCache;
use crate::dispatcher::QueryDispatcher;
use crate::sparql::{category_count_query, parse_count};
use crate::ClaimLookup;

/// Wikidata item for "human"
pub const HUMAN_QID: &str = "Q5";

/// A category and the root class its members descend from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryRule {
    pub category: Category,
    pub root: &'static str,
}

/// Graph-query rules in priority order
pub static CATEGORY_RULES: [CategoryRule; 3] = [
    CategoryRule {
        category: Category::Organization,
        root: "Q43229",
    },
    CategoryRule {
        category: Category::Location,
        root: "Q17334923",
    },
    CategoryRule {
        category: Category::Event,
        root: "Q1656682",
    },
];

/// Classifies QIDs, memoizing results in a shared [`QidCache`]
pub struct CategoryClassifier {
    claims: Arc<dyn ClaimLookup>,
    dispatcher: Arc<QueryDispatcher>,
    cache: Arc<QidCache>,
    rules: &'static [CategoryRule],
}

impl CategoryClassifier {
    pub fn new(
        claims: Arc<dyn ClaimLookup>,
        dispatcher: Arc<QueryDispatcher>,
        cache: Arc<QidCache>,
    ) -> Self {
        Self {
            claims,
            dispatcher,
            cache,
            rules: &CATEGORY_RULES,
        }
    }

    /// Category of `qid`, or `None` when no strategy matches
    ///
    /// Cached results (including "no category") are returned without any
    /// remote call.
    pub async fn classify(&self, qid: &Qid) -> Option<Category> {
        self.cache
            .get_or_classify(qid, self.classify_uncached(qid))
            .await
    }

    async fn classify_uncached(&self, qid: &Qid) -> Option<Category> {
        if self.is_human(qid).await {
            debug!(%qid, "direct claim: human");
            return Some(Category::Person);
        }

        for rule in self.rules {
            if self.is_member(qid, rule).await {
                debug!(%qid, category = %rule.category, "graph query matched");
                return Some(rule.category);
            }
        }

        debug!(%qid, "no category matched");
        None
    }

    async fn is_human(&self, qid: &Qid) -> bool {
        self.claims
            .instance_of(qid)
            .await
            .is_some_and(|target| target.as_str() == HUMAN_QID)
    }

    /// Failed queries count as "no evidence of membership"
    async fn is_member(&self, qid: &Qid, rule: &CategoryRule) -> bool {
        let query = category_count_query(qid, rule.root);
        match self.dispatcher.send(&query).await {
            Ok(body) => parse_count(&body).is_some_and(|count| count > 0),
            Err(e) => {
                warn!(%qid, category = %rule.category, error = %e, "category query failed");
                false
            }
        }
    }

    /// Rules evaluated after the human check, in order
    pub fn rules(&self) -> &'static [CategoryRule] {
        self.rules
    }

    pub fn cache(&self) -> &Arc<QidCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Arc<QueryDispatcher> {
        &self.dispatcher
    }
}
