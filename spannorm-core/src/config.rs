use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::error::{CoreResult, SpanNormError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SweepCfg {
    /// Polling interval of the abandoned-stream sweep in milliseconds (default 100ms)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Seconds without stream activity before a waiting span is force-ended (default 60s)
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

impl Default for SweepCfg {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            stream_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

impl SweepCfg {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stream_timeout_ns(&self) -> u64 {
        self.stream_timeout_secs.saturating_mul(1_000_000_000)
    }
}

fn default_interval_ms() -> u64 {
    100
}
fn default_stream_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorsCfg {
    /// Regexes applied to an error's repr and message, e.g. ^Command\(
    #[serde(default = "default_ignored_patterns")]
    pub ignored_patterns: Vec<String>,
    /// Error type names that mean "cancelled", not "failed"
    #[serde(default = "default_cancelled_types")]
    pub cancelled_types: Vec<String>,
}

impl Default for ErrorsCfg {
    fn default() -> Self {
        Self {
            ignored_patterns: default_ignored_patterns(),
            cancelled_types: default_cancelled_types(),
        }
    }
}

fn default_ignored_patterns() -> Vec<String> {
    vec![r"^Command\(".to_string(), r"^ParentCommand\(".to_string()]
}
fn default_cancelled_types() -> Vec<String> {
    vec!["WorkflowDone".to_string()]
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub sweep: SweepCfg,
    #[serde(default)]
    pub errors: ErrorsCfg,
    /// Start root spans in a fresh trace instead of the ambient one.
    #[serde(default)]
    pub separate_trace_from_runtime_context: bool,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(SpanNormError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| SpanNormError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| SpanNormError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| SpanNormError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| SpanNormError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| SpanNormError::Other(e.into())))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.sweep.interval_ms == 0 {
            return Err(SpanNormError::Validation(
                "sweep.interval_ms must be greater than zero".into(),
            ));
        }
        crate::classify::ErrorClassifier::new(&self.errors).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("spannorm.json");
        let json = r#"{
          "sweep": {"interval_ms": 250},
          "errors": {"cancelled_types": ["WorkflowDone", "StopSignal"]},
          "separate_trace_from_runtime_context": true
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.sweep.interval_ms, 250);
        assert_eq!(cfg.sweep.stream_timeout_secs, 60);
        assert_eq!(cfg.errors.cancelled_types.len(), 2);
        assert_eq!(cfg.errors.ignored_patterns, default_ignored_patterns());
        assert!(cfg.separate_trace_from_runtime_context);
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("spannorm.toml");
        let toml_src = r#"
[sweep]
stream_timeout_secs = 5

[errors]
ignored_patterns = ["^Interrupt"]
"#;
        fs::write(&file, toml_src).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.sweep.stream_timeout_ns(), 5_000_000_000);
        assert_eq!(cfg.sweep.interval(), Duration::from_millis(100));
        assert_eq!(cfg.errors.ignored_patterns, vec!["^Interrupt".to_string()]);
        assert_eq!(cfg.errors.cancelled_types, default_cancelled_types());
    }

    #[test]
    fn unknown_extension_falls_back_to_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("spannorm.conf");
        fs::write(&file, "separate_trace_from_runtime_context = true\n").unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert!(cfg.separate_trace_from_runtime_context);
        assert_eq!(cfg.sweep, SweepCfg::default());
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/spannorm-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            SpanNormError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            SpanNormError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_regex_returns_validation_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(&file, r#"{"errors": {"ignored_patterns": ["(unclosed"]}}"#).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            SpanNormError::Validation(msg) => assert!(msg.contains("(unclosed")),
            other => panic!("expected Validation error, got: {:?}", other),
        }
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = Config {
            sweep: SweepCfg {
                interval_ms: 0,
                stream_timeout_secs: 60,
            },
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(SpanNormError::Validation(_))));
    }
}
