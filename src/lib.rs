//! kitenv - toolkit detection and environment resolution
//!
//! This crate finds installed compiler toolkits (MSVC, GCC, Intel oneAPI,
//! custom environment scripts), captures the environment each one needs,
//! chains several environments together and writes the result as hidden
//! CMake configure presets.

pub mod core;
pub mod filter;
pub mod fragment;
pub mod merger;
pub mod ops;
pub mod resolver;
pub mod scanner;
pub mod util;

/// Fake toolkit installations for unit tests.
///
/// This module is only available when compiling with `--cfg test`.
#[cfg(test)]
pub mod test_support;

pub use core::{
    MergedEnvironment, ResolvedEnvironment, ToolkitCandidate, ToolkitFamily, Version, VersionSpec,
};
pub use filter::ToolkitSpecFilter;
