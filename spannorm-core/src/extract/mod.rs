//! Extraction rules: payload shapes in, flat attributes out.
//!
//! Rules are plain functions. Anything that can fail returns `CoreResult`, and
//! callers run each rule through [`guarded`] so one bad payload only costs
//! the attributes of that rule.

pub mod documents;
pub mod instance;
pub mod io;
pub mod messages;
pub mod prompt;
pub mod provider;
pub mod run;
pub mod tokens;

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{error, warn};

use crate::attributes::Attributes;
use crate::error::CoreResult;

/// Run one rule, turning errors and panics into an empty attribute set.
pub fn guarded(rule: &'static str, f: impl FnOnce() -> CoreResult<Attributes>) -> Attributes {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(attrs)) => attrs,
        Ok(Err(err)) => {
            warn!(rule, error = %err, "extraction rule failed");
            Attributes::new()
        }
        Err(_) => {
            error!(rule, "extraction rule panicked");
            Attributes::new()
        }
    }
}
