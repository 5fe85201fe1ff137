//! Query validation hook.
//!
//! Filters are opaque here; whoever evaluates them decides what is valid.
//! Validation runs when a transaction commits, over the queries that
//! transaction added.

use crate::types::Query;

/// Checks a query before it is committed.
pub trait QueryValidator: Send + Sync {
    /// Err carries the evaluator's reason.
    fn validate(&self, query: &Query) -> Result<(), String>;
}

impl<F> QueryValidator for F
where
    F: Fn(&Query) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, query: &Query) -> Result<(), String> {
        self(query)
    }
}

/// Accepts every query.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl QueryValidator for AcceptAll {
    fn validate(&self, _query: &Query) -> Result<(), String> {
        Ok(())
    }
}
