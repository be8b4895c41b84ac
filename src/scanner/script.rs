//! Custom environment scripts.
//!
//! No probing: the script path given by the caller becomes the single
//! candidate. Whether the script works is found out at resolution time.

use crate::core::candidate::{Arch, CandidateAttributes, ScriptAttributes, ScriptKind};
use crate::core::{ToolkitCandidate, Version};
use crate::util::fs::normalize_path;

use super::{ScanHints, ScanReport, ScanWarning};

pub fn discover(hints: &ScanHints) -> ScanReport {
    let mut report = ScanReport::default();
    let Some(script) = &hints.script else {
        return report;
    };

    if !script.is_file() {
        report.warnings.push(ScanWarning::Access {
            path: script.clone(),
            message: "script does not exist or is not a file".to_string(),
        });
        return report;
    }

    let script = normalize_path(script);
    let root = script
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| script.clone());
    let kind = ScriptKind::from_path(&script);

    report.candidates.push(ToolkitCandidate::new(
        Version::unspecified(),
        root,
        Arch::host(),
        Vec::<String>::new(),
        CandidateAttributes::Script(ScriptAttributes { script, kind }),
    ));
    report
}
