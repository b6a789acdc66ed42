//! Asynchronous count and find.
//!
//! Both operations run entirely on the given context's execution domain and
//! deliver their result to a callback on that same domain. Nothing hops
//! threads implicitly: a caller that wants the result elsewhere sends it
//! there from the callback, for example through a channel.
//!
//! Operations on independent background contexts run in parallel; operations
//! on one context run one at a time in submission order. Failures are handed
//! to the callback as they are and never retried.

use crate::context::Context;
use crate::error::CoreResult;
use crate::predicate::{FetchRequest, Predicate};
use crate::record::Record;
use stackdb_codec::RecordDictionary;
use std::time::Instant;

/// Result of a find.
#[derive(Debug, Clone)]
pub enum FindResult {
    /// Live records registered in the context.
    Records(Vec<Record>),
    /// Detached copies.
    Dictionaries(Vec<RecordDictionary>),
}

impl FindResult {
    /// Number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Records(r) => r.len(),
            Self::Dictionaries(d) => d.len(),
        }
    }

    /// Returns true if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The records, if this is a record result.
    #[must_use]
    pub fn into_records(self) -> Option<Vec<Record>> {
        match self {
            Self::Records(r) => Some(r),
            Self::Dictionaries(_) => None,
        }
    }

    /// Detached dictionaries, copying them out of records if needed.
    #[must_use]
    pub fn into_dictionaries(self) -> Vec<RecordDictionary> {
        match self {
            Self::Records(r) => r.iter().map(Record::dictionary).collect(),
            Self::Dictionaries(d) => d,
        }
    }
}

/// Counts records of `entity` matching `predicate` on `context`.
///
/// # Errors
///
/// Returns an error only if the work cannot be submitted: a closed context,
/// or a main context used off its thread. Query failures go to `callback`.
pub fn count<F>(context: &Context, entity: impl Into<String>, predicate: Predicate, callback: F) -> CoreResult<()>
where
    F: FnOnce(CoreResult<usize>) + Send + 'static,
{
    let entity = entity.into();
    context.perform(move |session| {
        let started = Instant::now();
        let result = session.count(&entity, &predicate);
        match &result {
            Ok(n) => tracing::debug!(context = %session.context_id(), %entity, count = n, elapsed = ?started.elapsed(), "count finished"),
            Err(e) => tracing::debug!(context = %session.context_id(), %entity, error = %e, "count failed"),
        }
        callback(result);
    })
}

/// Runs `request` on `context`.
///
/// The callback receives records registered in `context` or detached
/// dictionaries, depending on the request's result type.
///
/// # Errors
///
/// Same as [`count`].
pub fn find<F>(context: &Context, request: FetchRequest, callback: F) -> CoreResult<()>
where
    F: FnOnce(CoreResult<FindResult>) + Send + 'static,
{
    context.perform(move |session| {
        let started = Instant::now();
        let result = session.find(&request);
        match &result {
            Ok(found) => tracing::debug!(
                context = %session.context_id(),
                entity = %request.entity,
                found = found.len(),
                elapsed = ?started.elapsed(),
                "find finished"
            ),
            Err(e) => tracing::debug!(context = %session.context_id(), entity = %request.entity, error = %e, "find failed"),
        }
        callback(result);
    })
}
