//! Automated remediation of fixable CI failures.
//!
//! - `ecosystem`: which toolchain a failure belongs to
//! - `catalog`: ordered fallback chains of fix actions
//! - `counter` / `changes`: error counts and changed files around a fix
//! - `engine`: the transactional attempt itself

pub mod catalog;
pub mod changes;
pub mod counter;
pub mod ecosystem;
pub mod engine;

pub use catalog::FixCatalog;
pub use changes::changed_files;
pub use counter::count_errors;
pub use ecosystem::{detect_ecosystem, Ecosystem};
pub use engine::{checkpoint_label, RemediationEngine, Resolution};
