//! Glassbox - sandboxed JavaScript evaluation with console capture.
//!
//! This library runs untrusted code strings in isolated engine realms,
//! intercepts everything they log through a per-run capturing console, and
//! streams the accumulated output to an observer callback - including output
//! produced by callbacks that fire after the synchronous run returns.

pub mod config;
pub mod console;
pub mod error;
pub mod evaluator;
pub mod timers;

pub use config::{EvalConfig, Validate, ValidationResult};
pub use console::{ConsoleLevel, HostSink, TracingSink};
pub use error::{Error, Result};
pub use evaluator::{evaluate_streaming, EvalSummary, Evaluator};
pub use timers::{TimerJob, TimerQueue};
