//! Object filters applied to listed objects before they are queued for
//! deletion.
//!
//! Filters combine with logical AND semantics: an object is deleted only if
//! every filter in the chain accepts it.

use chrono::{DateTime, Utc};

use crate::types::ObjectMeta;

pub mod mtime_before;

pub use mtime_before::MtimeBeforeFilter;

/// Trait implemented by every object filter.
pub trait ObjectFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when the object passes the filter and may be deleted.
    fn is_match(&self, object: &ObjectMeta) -> bool;
}

/// An ordered set of filters, all of which must accept an object.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn ObjectFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter chain of a recursive delete. `None` means every object passes.
    pub fn for_expiration_time(expiration_time: Option<DateTime<Utc>>) -> Self {
        let mut chain = Self::new();
        if let Some(expiration_time) = expiration_time {
            chain.push(Box::new(MtimeBeforeFilter::new(expiration_time)));
        }
        chain
    }

    pub fn push(&mut self, filter: Box<dyn ObjectFilter>) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn is_match(&self, object: &ObjectMeta) -> bool {
        self.filters.iter().all(|f| f.is_match(object))
    }
}
