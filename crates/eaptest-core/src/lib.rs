//! Core library for the EAP test suite.
//!
//! Drives eapol_test authentication runs against a RADIUS server: typed
//! configuration, dependency resolution with a from-source build fallback,
//! a reachability probe, per-type subprocess execution with isolated logs,
//! and an aggregated report with a total exit-code mapping.

pub mod build;
pub mod config;
pub mod deps;
pub mod error;
pub mod executor;
pub mod logs;
pub mod preflight;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod suite;

pub use config::{EapType, SuiteConfig};
pub use error::SuiteError;
pub use report::{RunResult, RunStatus, SuiteReport, Verdict};
pub use suite::SuiteRunner;
