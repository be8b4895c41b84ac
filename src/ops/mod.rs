//! High-level operations.
//!
//! This module contains the implementation of kitenv commands.

pub mod generate;
pub mod scan;

pub use generate::{
    generate, GenerateOptions, PresetError, PresetOutcome, PresetRequest, RunReport,
};
pub use scan::{scan, ScanOptions, ScanResult};
