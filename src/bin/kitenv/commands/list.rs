//! `kitenv list` command

use anyhow::Result;

use crate::cli::ListArgs;
use kitenv::core::ToolkitFamily;

pub fn execute(_args: ListArgs) -> Result<()> {
    for family in ToolkitFamily::ALL {
        let support = if family.is_supported() {
            "supported"
        } else {
            "not supported on this platform"
        };
        println!(
            "{:<8} {:<28} {}",
            family.as_str(),
            family.display_name(),
            support
        );
    }
    Ok(())
}
