//! Suite documents for Dockyard.
//!
//! This crate defines the schema layer: TOML suite parsing (`SuiteSpec`), the
//! configuration checks that must pass before any container is created
//! (`SuiteSpec::validate`), on-disk suite discovery (`discover_suites`), suite
//! name filters, duration parsing, and the scaffold templates used to generate
//! starter suites.

pub mod discover;
pub mod duration;
pub mod filter;
pub mod suite;
pub mod template;

pub use discover::{discover_suites, SuiteFile, SUITE_FILE_SUFFIX};
pub use duration::{format_duration, parse_duration};
pub use filter::SuiteFilter;
pub use suite::{parse_suite_file, parse_suite_str, SuiteError, SuiteSpec, TestSpec, UnitSpec};
pub use template::{render_scaffold, template_keys, Template, TEMPLATES};
