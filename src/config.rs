//! Evaluator configuration.
//!
//! Limits are host-environment backstops. None of them are part of the
//! evaluation contract: the evaluator itself defines no timeout and no
//! cancellation, so every limit here defaults to off or to a generous cap.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Maximum accepted code size in bytes. Oversized payloads are rejected
    /// before a run starts.
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,

    /// Engine loop iteration limit. Off unless set; tripping it surfaces as
    /// a thrown error inside the run, not as a caller error.
    #[serde(default)]
    pub loop_iteration_limit: Option<u64>,

    /// Engine recursion limit. Off unless set.
    #[serde(default)]
    pub recursion_limit: Option<usize>,

    /// Engine stack size limit in bytes. Off unless set.
    #[serde(default)]
    pub stack_size_limit: Option<usize>,

    /// Maximum captured output lines per run; further lines are counted as
    /// dropped in the run summary.
    #[serde(default = "default_max_captured_lines")]
    pub max_captured_lines: usize,

    /// Maximum deferred callbacks drained per run. Bounds evaluated code
    /// that keeps rescheduling itself.
    #[serde(default = "default_max_deferred_jobs")]
    pub max_deferred_jobs: usize,
}

fn default_max_code_bytes() -> usize {
    1_000_000
}

fn default_max_captured_lines() -> usize {
    65_536
}

fn default_max_deferred_jobs() -> usize {
    10_000
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: default_max_code_bytes(),
            loop_iteration_limit: None,
            recursion_limit: None,
            stack_size_limit: None,
            max_captured_lines: default_max_captured_lines(),
            max_deferred_jobs: default_max_deferred_jobs(),
        }
    }
}

impl EvalConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum accepted code size.
    pub fn with_max_code_bytes(mut self, bytes: usize) -> Self {
        self.max_code_bytes = bytes;
        self
    }

    /// Sets the engine loop iteration limit.
    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = Some(limit);
        self
    }

    /// Sets the engine recursion limit.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    /// Sets the engine stack size limit.
    pub fn with_stack_size_limit(mut self, bytes: usize) -> Self {
        self.stack_size_limit = Some(bytes);
        self
    }

    /// Sets the captured-line cap.
    pub fn with_max_captured_lines(mut self, lines: usize) -> Self {
        self.max_captured_lines = lines;
        self
    }

    /// Sets the deferred-callback drain cap.
    pub fn with_max_deferred_jobs(mut self, jobs: usize) -> Self {
        self.max_deferred_jobs = jobs;
        self
    }

    /// Loads a configuration from a TOML file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for EvalConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.max_code_bytes == 0 {
            result.add_error("max_code_bytes must be greater than zero");
        }

        if self.max_captured_lines == 0 {
            result.add_error("max_captured_lines must be greater than zero");
        }

        if self.max_deferred_jobs == 0 {
            result.add_warning("max_deferred_jobs of zero disables deferred callbacks entirely");
        }

        if let Some(limit) = self.loop_iteration_limit {
            if limit < 1_000 {
                result.add_warning(
                    "loop_iteration_limit under 1000 will abort most non-trivial scripts",
                );
            }
        }

        if let Some(limit) = self.recursion_limit {
            if limit < 8 {
                result.add_warning("recursion_limit under 8 will abort most non-trivial scripts");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_has_sensible_defaults() {
        let config = EvalConfig::default();

        assert_eq!(config.max_code_bytes, 1_000_000);
        assert_eq!(config.loop_iteration_limit, None);
        assert_eq!(config.recursion_limit, None);
        assert_eq!(config.stack_size_limit, None);
        assert_eq!(config.max_captured_lines, 65_536);
        assert_eq!(config.max_deferred_jobs, 10_000);
    }

    #[test]
    fn config_builder_works() {
        let config = EvalConfig::new()
            .with_max_code_bytes(512)
            .with_loop_iteration_limit(5_000)
            .with_recursion_limit(32)
            .with_stack_size_limit(256 * 1024)
            .with_max_captured_lines(100)
            .with_max_deferred_jobs(4);

        assert_eq!(config.max_code_bytes, 512);
        assert_eq!(config.loop_iteration_limit, Some(5_000));
        assert_eq!(config.recursion_limit, Some(32));
        assert_eq!(config.stack_size_limit, Some(256 * 1024));
        assert_eq!(config.max_captured_lines, 100);
        assert_eq!(config.max_deferred_jobs, 4);
    }

    #[test]
    fn config_parses_partial_toml() {
        let config: EvalConfig =
            toml::from_str("max_code_bytes = 64\nloop_iteration_limit = 100").unwrap();

        assert_eq!(config.max_code_bytes, 64);
        assert_eq!(config.loop_iteration_limit, Some(100));
        // Unspecified fields fall back to defaults.
        assert_eq!(config.max_captured_lines, 65_536);
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("glassbox.toml");
        std::fs::write(&path, "max_deferred_jobs = 7\n").unwrap();

        let config = EvalConfig::load(&path).expect("load failed");
        assert_eq!(config.max_deferred_jobs, 7);
    }

    #[test]
    fn config_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("glassbox.toml");
        std::fs::write(&path, "max_code_bytes = \"lots\"\n").unwrap();

        assert!(EvalConfig::load(&path).is_err());
    }

    #[test]
    fn validation_flags_zero_limits() {
        let config = EvalConfig::new().with_max_code_bytes(0);
        let result = config.validate();

        assert!(!result.is_valid());
        assert!(result.errors[0].contains("max_code_bytes"));
    }

    #[test]
    fn validation_warns_on_tiny_loop_limit() {
        let config = EvalConfig::new().with_loop_iteration_limit(10);
        let result = config.validate();

        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }
}
