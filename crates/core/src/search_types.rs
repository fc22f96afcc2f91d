//! Search request and response types
//!
//! A [`SearchRequest`] is a conjunction of [`Filter`]s over one model. The
//! first filter drives the index scan; the rest are probed per candidate.
//! Pagination uses an opaque cursor owned by the caller between calls.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::value::Value;

/// One predicate on an indexed field path (`val.title`, `val.author.name`)
///
/// At most one of `equal`, `greater`, `less`, `prefix` may be set; none set
/// means "field present". `skip` is only meaningful with `prefix`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filter {
    /// Field path
    pub key: String,
    /// Exact match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal: Option<Value>,
    /// Strictly greater than
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greater: Option<Value>,
    /// Strictly less than
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub less: Option<Value>,
    /// String prefix match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Value>,
    /// With `prefix`: only values sorting after this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<Value>,
}

impl Filter {
    /// Presence filter
    pub fn present(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Equality filter
    pub fn equal(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            equal: Some(value.into()),
            ..Default::default()
        }
    }

    /// Greater-than filter
    pub fn greater(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            greater: Some(value.into()),
            ..Default::default()
        }
    }

    /// Less-than filter
    pub fn less(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            less: Some(value.into()),
            ..Default::default()
        }
    }

    /// Prefix filter
    pub fn prefix(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            prefix: Some(value.into()),
            ..Default::default()
        }
    }

    /// Set the skip bound of a prefix filter (builder style)
    pub fn with_skip(mut self, value: impl Into<Value>) -> Self {
        self.skip = Some(value.into());
        self
    }

    /// Number of comparison operators set
    pub fn operator_count(&self) -> usize {
        [&self.equal, &self.greater, &self.less, &self.prefix]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }
}

/// A conjunctive search over one model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Model to search
    pub model: String,
    /// Conjunction of filters; the first one drives the scan
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// Resume position returned by a previous page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Maximum number of results on this page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Return whole documents instead of ids
    #[serde(default)]
    pub full: bool,
    /// Nested requests compiled from AQL links
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<SearchRequest>,
}

impl SearchRequest {
    /// A request for `model` with the given filters
    pub fn new(model: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            model: model.into(),
            filters,
            ..Default::default()
        }
    }

    /// Resume after a previous page (builder style)
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Cap the page size (builder style)
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Request whole documents (builder style)
    pub fn with_full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Present when more results may follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Matching ids (when `full` was not requested)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    /// Matching documents (when `full` was requested)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
}

impl SearchResponse {
    /// Number of results on this page
    pub fn len(&self) -> usize {
        self.ids.len().max(self.documents.len())
    }

    /// True if the page is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
