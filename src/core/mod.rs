//! Core data structures for kitenv.
//!
//! - Versions and version ranges
//! - Toolkit families and scanned candidates
//! - Resolved and merged environments

pub mod candidate;
pub mod environment;
pub mod family;
pub mod version;

pub use candidate::{Arch, ToolkitCandidate};
pub use environment::{EnvValue, MergeWarning, MergedEnvironment, ResolvedEnvironment};
pub use family::ToolkitFamily;
pub use version::{Version, VersionSpec};
