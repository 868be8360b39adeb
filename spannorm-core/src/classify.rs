use regex::Regex;

use crate::config::ErrorsCfg;
use crate::error::{CoreResult, SpanNormError};
use crate::model::ErrorInfo;

/// Sorts host errors into control-flow signals, clean cancellations and
/// real failures.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    patterns: Vec<Regex>,
    cancelled_types: Vec<String>,
}

impl ErrorClassifier {
    /// Build a classifier by compiling the ignore patterns from config.
    pub fn new(cfg: &ErrorsCfg) -> CoreResult<Self> {
        let mut patterns = Vec::with_capacity(cfg.ignored_patterns.len());
        for p in &cfg.ignored_patterns {
            let regex = Regex::new(p).map_err(|e| {
                SpanNormError::Validation(format!("invalid ignore pattern '{p}': {e}"))
            })?;
            patterns.push(regex);
        }
        Ok(Self {
            patterns,
            cancelled_types: cfg.cancelled_types.clone(),
        })
    }

    /// A control-flow signal: its repr or its message matches an ignore pattern.
    pub fn is_ignored(&self, error: &ErrorInfo) -> bool {
        let repr = error.repr();
        self.patterns
            .iter()
            .any(|r| r.is_match(&repr) || r.is_match(&error.message))
    }

    /// Same check for errors that only exist as text.
    pub fn is_ignored_text(&self, text: &str) -> bool {
        self.patterns.iter().any(|r| r.is_match(text))
    }

    pub fn is_cancelled(&self, error: &ErrorInfo) -> bool {
        self.cancelled_types.iter().any(|t| *t == error.type_name)
    }
}
