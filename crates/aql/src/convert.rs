//! Compile a parsed query into a search request

use apogy_core::{Filter, SearchRequest};

use crate::query::{Condition, Predicate, Query};

impl From<&Condition> for Filter {
    fn from(cond: &Condition) -> Self {
        match &cond.predicate {
            Predicate::Present => Filter::present(cond.key.clone()),
            Predicate::Equal(v) => Filter::equal(cond.key.clone(), v.clone()),
            Predicate::Less(v) => Filter::less(cond.key.clone(), v.clone()),
            Predicate::Greater(v) => Filter::greater(cond.key.clone(), v.clone()),
            Predicate::Prefix { value, skip } => Filter {
                skip: skip.clone(),
                ..Filter::prefix(cond.key.clone(), value.clone())
            },
        }
    }
}

impl Query {
    /// Compile into a search request returning full documents
    ///
    /// Conditions map to filters in order; links become nested requests.
    pub fn to_search_request(&self) -> SearchRequest {
        SearchRequest {
            model: self.model.clone(),
            filters: self.filter.iter().map(Filter::from).collect(),
            full: true,
            links: self.links.iter().map(Query::to_search_request).collect(),
            ..Default::default()
        }
    }
}
