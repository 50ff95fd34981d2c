//! Expiration filter: passes objects whose last_modified time is strictly
//! before the configured expiration time.
//!
//! Objects modified at or after the cutoff may belong to an in-flight writer
//! and are kept.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::filters::ObjectFilter;
use crate::types::ObjectMeta;

const FILTER_NAME: &str = "MtimeBeforeFilter";

pub struct MtimeBeforeFilter {
    before_time: DateTime<Utc>,
}

impl MtimeBeforeFilter {
    pub fn new(before_time: DateTime<Utc>) -> Self {
        Self { before_time }
    }
}

impl ObjectFilter for MtimeBeforeFilter {
    fn name(&self) -> &'static str {
        FILTER_NAME
    }

    fn is_match(&self, object: &ObjectMeta) -> bool {
        is_before(object, &self.before_time)
    }
}

fn is_before(object: &ObjectMeta, before_time: &DateTime<Utc>) -> bool {
    if object.is_modified_before(before_time) {
        return true;
    }

    debug!(
        name = FILTER_NAME,
        key = %object.key,
        version_id = ?object.version_id,
        last_modified = object.last_modified.to_rfc3339(),
        config_time = before_time.to_rfc3339(),
        "object filtered."
    );

    false
}
