//! Search evaluator
//!
//! A search is a conjunction of filters over one model. The first filter
//! drives an ordered range scan of its field; every candidate id is then
//! probed against the remaining filters with the id pinned. Candidates that
//! survive the index probes are read back and every filter is checked
//! against the document's own field values. Since each filter is an exact
//! predicate over the candidate, the result set does not depend on filter
//! order, only the scan cost does.
//!
//! ## Scan plans
//!
//! With `P = f SEP model SEP key SEP`:
//!
//! | Filter | Range |
//! |--------|-------|
//! | presence | `[P, succ(P))` |
//! | `equal v` | `[P enc(v) SEP, succ(P enc(v) SEP))` |
//! | `prefix s` | `[P s, succ(P s))` |
//! | `prefix s skip k` | `[succ(P k SEP), succ(P s))` |
//! | `greater v` / `less v` | `[P, succ(P))`, compared per entry |
//!
//! String bounds compare encoded bytes, numeric bounds compare the decoded
//! doubles of 8-byte segments. Index segments carry no kind, so an 8-byte
//! string can pass a numeric bound in the scan; the document check drops it.
//! Values of the other kind never match.
//!
//! ## Pagination
//!
//! When a page fills, the response cursor is the base64 of the last driving
//! key scanned. A resumed search starts strictly after it.

use std::cmp::Ordering;

use apogy_core::keys::{
    decode_f64, document_key, encode_index_value, index_entry_key, index_field_prefix,
    key_successor, prefix_successor, split_index_entry, SEP,
};
use apogy_core::{
    Context, Document, Error, Filter, KvRead, Result, SearchRequest, SearchResponse, Value,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::codec::decode_document;
use crate::config::SearchConfig;
use crate::index::{field_leaves, ScalarKind, ROOT_PATH};

fn invalid_query() -> Error {
    Error::validation("invalid query")
}

/// Check a request before any scan
///
/// Model, keys and string operands are UTF-8, which never contains the
/// separator byte `0xFF`, so they need no separator check.
///
/// # Errors
///
/// Returns `Validation` for an empty model, key or filter list, a filter
/// with more than one operator, `skip` without `prefix`, and a non-string
/// prefix.
pub fn validate_request(req: &SearchRequest) -> Result<()> {
    if req.model.is_empty() || req.filters.is_empty() {
        return Err(invalid_query());
    }
    for filter in &req.filters {
        if filter.key.is_empty() {
            return Err(invalid_query());
        }
        if filter.operator_count() > 1 {
            return Err(Error::validation(format!(
                "invalid query: filter on {} has more than one operator",
                filter.key
            )));
        }
        if filter.skip.is_some() && filter.prefix.is_none() {
            return Err(Error::validation(format!(
                "invalid query: skip without prefix on {}",
                filter.key
            )));
        }
        if let Some(prefix) = &filter.prefix {
            if !prefix.is_string() {
                return Err(Error::validation(format!(
                    "invalid query: prefix on {} must be a string",
                    filter.key
                )));
            }
        }
    }
    Ok(())
}

/// Index path of a filter key; keys may omit the leading `val.`
pub fn index_path(key: &str) -> String {
    if key == ROOT_PATH || key.starts_with("val.") {
        key.to_string()
    } else {
        format!("{}.{}", ROOT_PATH, key)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Text(Vec<u8>),
    Number(f64),
}

impl Bound {
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => Some(Bound::Text(s.as_bytes().to_vec())),
            Value::Int(_) | Value::Float(_) => v.as_f64().map(Bound::Number),
            _ => None,
        }
    }

    /// Ordering of an encoded entry value against the bound, if comparable
    fn compare(&self, encoded: &[u8]) -> Option<Ordering> {
        match self {
            Bound::Text(bound) => {
                std::str::from_utf8(encoded).ok()?;
                Some(encoded.cmp(bound.as_slice()))
            }
            Bound::Number(bound) => decode_f64(encoded)?.partial_cmp(bound),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    Any,
    Greater(Bound),
    Less(Bound),
}

impl Matcher {
    fn accepts(&self, encoded: &[u8]) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Greater(b) => b.compare(encoded) == Some(Ordering::Greater),
            Matcher::Less(b) => b.compare(encoded) == Some(Ordering::Less),
        }
    }
}

/// Range scan answering one filter
#[derive(Debug, Clone, PartialEq)]
struct Plan {
    model: String,
    path: String,
    field_prefix: Vec<u8>,
    start: Vec<u8>,
    end: Vec<u8>,
    matcher: Matcher,
    /// Kind every matching value must have; `None` for presence
    kind: Option<ScalarKind>,
    /// Encoded value of an equality filter
    equal: Option<Vec<u8>>,
    /// Nothing can match
    empty: bool,
}

impl Plan {
    fn new(model: &str, filter: &Filter) -> Self {
        let path = index_path(&filter.key);
        let field_prefix = index_field_prefix(model, &path);
        let mut plan = Plan {
            model: model.to_string(),
            start: field_prefix.clone(),
            end: prefix_successor(&field_prefix),
            field_prefix,
            path,
            matcher: Matcher::Any,
            kind: None,
            equal: None,
            empty: false,
        };

        if let Some(v) = &filter.equal {
            plan.kind = ScalarKind::of(v);
            match encode_index_value(v) {
                Some(encoded) => {
                    let mut start = plan.field_prefix.clone();
                    start.extend_from_slice(&encoded);
                    start.push(SEP);
                    plan.end = prefix_successor(&start);
                    plan.start = start;
                    plan.equal = Some(encoded);
                }
                None => plan.empty = true,
            }
        } else if let Some(Value::String(prefix)) = &filter.prefix {
            plan.kind = Some(ScalarKind::Text);
            let mut start = plan.field_prefix.clone();
            start.extend_from_slice(prefix.as_bytes());
            plan.end = prefix_successor(&start);
            plan.start = start;
            if let Some(skip) = &filter.skip {
                match Bound::from_value(skip) {
                    Some(Bound::Text(skip)) => {
                        let mut after = plan.field_prefix.clone();
                        after.extend_from_slice(&skip);
                        after.push(SEP);
                        let after = prefix_successor(&after);
                        if after > plan.start {
                            plan.start = after;
                        }
                    }
                    _ => plan.empty = true,
                }
            }
        } else if let Some(v) = &filter.greater {
            plan.kind = ScalarKind::of(v);
            match Bound::from_value(v) {
                Some(b) => plan.matcher = Matcher::Greater(b),
                None => plan.empty = true,
            }
        } else if let Some(v) = &filter.less {
            plan.kind = ScalarKind::of(v);
            match Bound::from_value(v) {
                Some(b) => plan.matcher = Matcher::Less(b),
                None => plan.empty = true,
            }
        }
        if !plan.end.is_empty() && plan.start >= plan.end {
            plan.empty = true;
        }
        plan
    }

    fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && (self.end.is_empty() || key < self.end.as_slice())
    }

    /// Id of an entry key if the entry satisfies the filter
    ///
    /// Number encodings may contain `SEP`, so an equality range can hold
    /// entries of other values; the split segment must match exactly.
    fn accept<'k>(&self, key: &'k [u8]) -> Option<&'k str> {
        let (encoded, id) = split_index_entry(key, &self.field_prefix)?;
        if let Some(equal) = &self.equal {
            if encoded != equal.as_slice() {
                return None;
            }
        }
        if !self.matcher.accepts(encoded) {
            return None;
        }
        std::str::from_utf8(id).ok()
    }

    /// True if one scalar of document `id` satisfies the filter
    fn accepts_leaf(&self, id: &str, leaf: &Value) -> bool {
        if self.kind.is_some() && ScalarKind::of(leaf) != self.kind {
            return false;
        }
        let Some(encoded) = encode_index_value(leaf) else {
            return false;
        };
        let key = index_entry_key(&self.model, &self.path, &encoded, id);
        self.contains(&key) && self.accept(&key) == Some(id)
    }

    /// True if any scalar of the document at the filter's path satisfies it
    fn accepts_document(&self, doc: &Document) -> bool {
        !self.empty
            && field_leaves(&doc.val, &self.path)
                .iter()
                .any(|leaf| self.accepts_leaf(&doc.id, leaf))
    }
}

/// Lazy, deduplicated candidate ids of one filter
pub struct Candidates<'a> {
    plan: Plan,
    scan: Option<apogy_core::KvIter<'a>>,
    seen: FxHashSet<String>,
    last_key: Option<Vec<u8>>,
}

impl<'a> Candidates<'a> {
    /// Driving key of the entry that produced the last yielded id
    pub fn last_key(&self) -> Option<&[u8]> {
        self.last_key.as_deref()
    }
}

impl<'a> Iterator for Candidates<'a> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let scan = self.scan.as_mut()?;
        for item in scan.by_ref() {
            let (key, _) = match item {
                Ok(pair) => pair,
                Err(e) => return Some(Err(e)),
            };
            let Some(id) = self.plan.accept(&key) else {
                continue;
            };
            if self.seen.contains(id) {
                continue;
            }
            let id = id.to_string();
            self.seen.insert(id.clone());
            self.last_key = Some(key);
            return Some(Ok(id));
        }
        None
    }
}

/// Scan the index for the ids matching one filter
///
/// `after` resumes strictly after a previously scanned key of the same
/// filter.
///
/// # Errors
///
/// Returns `Validation` if `after` lies outside the filter's range.
pub fn find<'a>(
    ctx: &'a Context,
    kv: &'a dyn KvRead,
    model: &str,
    filter: &Filter,
    after: Option<&[u8]>,
) -> Result<Candidates<'a>> {
    let mut plan = Plan::new(model, filter);
    if let Some(after) = after {
        if !plan.contains(after) {
            return Err(Error::validation("invalid query: cursor out of range"));
        }
        plan.start = key_successor(after);
    }
    trace!(model, path = %plan.path, empty = plan.empty, "index scan");
    let scan = if plan.empty {
        None
    } else {
        Some(kv.iter(ctx, &plan.start, &plan.end))
    };
    Ok(Candidates {
        plan,
        scan,
        seen: FxHashSet::default(),
        last_key: None,
    })
}

/// Index-only check of one filter against a pinned id
fn probe(ctx: &Context, kv: &dyn KvRead, plan: &Plan, id: &str) -> Result<bool> {
    if plan.empty {
        return Ok(false);
    }
    if let Some(encoded) = &plan.equal {
        let key = index_entry_key(&plan.model, &plan.path, encoded, id);
        return Ok(kv.get(ctx, &key)?.is_some());
    }
    for item in kv.iter(ctx, &plan.start, &plan.end) {
        let (key, _) = item?;
        if plan.accept(&key) == Some(id) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True if document `id` satisfies one filter
///
/// Equality is a point lookup of the entry key; other filters scan their
/// range looking for an entry of `id`. A hit is confirmed against the stored
/// document, which also tells strings from numbers.
///
/// # Errors
///
/// Propagates storage, context and decoding errors.
pub fn matches(ctx: &Context, kv: &dyn KvRead, model: &str, filter: &Filter, id: &str) -> Result<bool> {
    let plan = Plan::new(model, filter);
    if !probe(ctx, kv, &plan, id)? {
        return Ok(false);
    }
    match kv.get(ctx, &document_key(model, id))? {
        Some(raw) => Ok(plan.accepts_document(&decode_document(&raw)?)),
        None => Ok(false),
    }
}

/// Encode a driving key as a response cursor
pub fn encode_cursor(key: &[u8]) -> String {
    STANDARD.encode(key)
}

/// Decode a request cursor
///
/// # Errors
///
/// Returns `Validation` if the cursor is not valid base64.
pub fn decode_cursor(cursor: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(cursor)
        .map_err(|e| Error::validation(format!("invalid query: bad cursor: {}", e)))
}

/// Run a search request
///
/// # Errors
///
/// Returns `Validation` for malformed requests or cursors; storage, context
/// and decoding errors propagate.
pub fn search(
    ctx: &Context,
    kv: &dyn KvRead,
    req: &SearchRequest,
    config: &SearchConfig,
) -> Result<SearchResponse> {
    validate_request(req)?;
    let limit = config.page_size(req.limit);
    let after = req.cursor.as_deref().map(decode_cursor).transpose()?;

    let plans: Vec<Plan> = req.filters.iter().map(|f| Plan::new(&req.model, f)).collect();
    let (driving, rest) = match (req.filters.first(), plans.split_first()) {
        (Some(driving), Some((_, rest))) => (driving, rest),
        _ => return Err(invalid_query()),
    };
    let mut candidates = find(ctx, kv, &req.model, driving, after.as_deref())?;

    let mut documents: Vec<Document> = Vec::new();
    let mut cursor = None;
    let mut exhausted = false;
    // Candidates passing the index probes are confirmed in batches no larger
    // than the room left on the page, so a full page ends on a batch's last item.
    while !exhausted && cursor.is_none() {
        let room = limit.saturating_sub(documents.len());
        let mut batch: Vec<(String, Vec<u8>)> = Vec::with_capacity(room);
        while batch.len() < room {
            let Some(id) = candidates.next() else {
                exhausted = true;
                break;
            };
            let id = id?;
            let mut all = true;
            for plan in rest {
                if !probe(ctx, kv, plan, &id)? {
                    all = false;
                    break;
                }
            }
            if all {
                let key = candidates.last_key().map(<[u8]>::to_vec).unwrap_or_default();
                batch.push((id, key));
            }
        }
        if batch.is_empty() {
            break;
        }

        let keys: Vec<Vec<u8>> = batch.iter().map(|(id, _)| document_key(&req.model, id)).collect();
        let raws = kv.batch_get(ctx, &keys)?;
        for ((id, key), raw) in batch.into_iter().zip(raws) {
            let Some(raw) = raw else {
                trace!(model = %req.model, id = %id, "index entry without document");
                continue;
            };
            let doc = decode_document(&raw)?;
            if !plans.iter().all(|plan| plan.accepts_document(&doc)) {
                trace!(model = %req.model, id = %id, "candidate rejected by document check");
                continue;
            }
            documents.push(doc);
            if documents.len() >= limit {
                cursor = Some(encode_cursor(&key));
            }
        }
    }
    debug!(model = %req.model, results = documents.len(), more = cursor.is_some(), "search");

    if req.full {
        return Ok(SearchResponse {
            cursor,
            ids: Vec::new(),
            documents,
        });
    }
    Ok(SearchResponse {
        cursor,
        ids: documents.into_iter().map(|d| d.id).collect(),
        documents: Vec::new(),
    })
}
