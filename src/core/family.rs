//! Toolkit families.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Path-like variables every family may touch.
pub const COMMON_PATH_VARS: &[&str] = &["PATH"];

/// Variables a shell sets for its own bookkeeping. Never part of a toolkit's
/// environment.
pub const SHELL_BOOKKEEPING_VARS: &[&str] = &["_", "SHLVL", "PWD", "OLDPWD", "PS1", "PS2"];

const MSVC_PATH_VARS: &[&str] = &["INCLUDE", "LIB", "LIBPATH", "WINDOWSLIBPATH"];

#[cfg(windows)]
const ONEAPI_PATH_VARS: &[&str] = &[
    "CPATH",
    "CMAKE_PREFIX_PATH",
    "PKG_CONFIG_PATH",
    "INCLUDE",
    "LIB",
    "NLSPATH",
    "OCL_ICD_FILENAMES",
];

#[cfg(not(windows))]
const ONEAPI_PATH_VARS: &[&str] = &[
    "CPATH",
    "CMAKE_PREFIX_PATH",
    "PKG_CONFIG_PATH",
    "LIBRARY_PATH",
    "LD_LIBRARY_PATH",
    "MANPATH",
    "FI_PROVIDER_PATH",
];

/// Search-list variables a user script is likely to extend.
const SCRIPT_PATH_VARS: &[&str] = &[
    "CPATH",
    "CMAKE_PREFIX_PATH",
    "PKG_CONFIG_PATH",
    "LIBRARY_PATH",
    "LD_LIBRARY_PATH",
    "MANPATH",
    "INCLUDE",
    "LIB",
    "LIBPATH",
];

/// The closed set of toolkit families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolkitFamily {
    /// Visual Studio build tools: toolsets plus Windows SDKs, sourced via `vcvarsall.bat`.
    #[serde(rename = "msvc")]
    Msvc,
    /// GNU compilers: one binary per language, no environment script.
    #[serde(rename = "gcc")]
    Gcc,
    /// Intel oneAPI: versioned component bundle with per-component `vars` scripts.
    #[serde(rename = "oneapi")]
    OneApi,
    /// A user-provided environment script.
    #[serde(rename = "script")]
    CustomScript,
}

impl ToolkitFamily {
    pub const ALL: [ToolkitFamily; 4] = [
        ToolkitFamily::Msvc,
        ToolkitFamily::Gcc,
        ToolkitFamily::OneApi,
        ToolkitFamily::CustomScript,
    ];

    /// Short identifier used on the command line and in candidate ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolkitFamily::Msvc => "msvc",
            ToolkitFamily::Gcc => "gcc",
            ToolkitFamily::OneApi => "oneapi",
            ToolkitFamily::CustomScript => "script",
        }
    }

    /// Human readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            ToolkitFamily::Msvc => "Visual Studio Build Tools",
            ToolkitFamily::Gcc => "GNU Compiler Collection",
            ToolkitFamily::OneApi => "Intel oneAPI",
            ToolkitFamily::CustomScript => "Custom environment script",
        }
    }

    /// Whether the family can be scanned and resolved on this host.
    pub fn is_supported(&self) -> bool {
        match self {
            ToolkitFamily::Msvc => cfg!(windows),
            ToolkitFamily::Gcc => cfg!(unix),
            ToolkitFamily::OneApi => cfg!(any(target_os = "linux", windows)),
            ToolkitFamily::CustomScript => true,
        }
    }

    /// Whether resolving this family requires sourcing a script.
    pub fn uses_script(&self) -> bool {
        !matches!(self, ToolkitFamily::Gcc)
    }

    /// Family-specific path-like variables, in addition to [`COMMON_PATH_VARS`].
    pub fn path_vars(&self) -> &'static [&'static str] {
        match self {
            ToolkitFamily::Msvc => MSVC_PATH_VARS,
            ToolkitFamily::Gcc => &[],
            ToolkitFamily::OneApi => ONEAPI_PATH_VARS,
            ToolkitFamily::CustomScript => SCRIPT_PATH_VARS,
        }
    }

    /// Whether `name` is merged as an ordered search list for this family.
    pub fn is_path_var(&self, name: &str) -> bool {
        let matches = |known: &&str| known.eq_ignore_ascii_case(name);
        COMMON_PATH_VARS.iter().any(matches) || self.path_vars().iter().any(matches)
    }

    /// Variables that change as a side effect of sourcing and must be ignored.
    pub fn ignored_vars(&self) -> &'static [&'static str] {
        match self {
            ToolkitFamily::Msvc => &["__VSCMD_PREINIT_PATH", "VSCMD_ARG_app_plat"],
            ToolkitFamily::OneApi => &["SETVARS_COMPLETED", "SETVARS_CALL"],
            ToolkitFamily::Gcc | ToolkitFamily::CustomScript => &[],
        }
    }

    /// Compiler variables the resolved environment must define.
    pub fn required_compilers(&self) -> &'static [&'static str] {
        match self {
            ToolkitFamily::Msvc => &["CC", "CXX"],
            ToolkitFamily::Gcc | ToolkitFamily::OneApi | ToolkitFamily::CustomScript => &[],
        }
    }
}

impl fmt::Display for ToolkitFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ToolkitFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "msvc" | "vs" => Ok(ToolkitFamily::Msvc),
            "gcc" | "gnu" => Ok(ToolkitFamily::Gcc),
            "oneapi" | "intel" => Ok(ToolkitFamily::OneApi),
            "script" | "custom" => Ok(ToolkitFamily::CustomScript),
            other => Err(format!(
                "unknown toolkit family `{}` (expected one of: msvc, gcc, oneapi, script)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_round_trip() {
        for family in ToolkitFamily::ALL {
            assert_eq!(family.as_str().parse::<ToolkitFamily>().unwrap(), family);
        }
        assert_eq!("GNU".parse::<ToolkitFamily>().unwrap(), ToolkitFamily::Gcc);
        assert!("clang".parse::<ToolkitFamily>().is_err());
    }

    #[test]
    fn test_path_vars() {
        assert!(ToolkitFamily::Gcc.is_path_var("PATH"));
        assert!(!ToolkitFamily::Gcc.is_path_var("CC"));
        assert!(ToolkitFamily::Msvc.is_path_var("include"));
        assert!(ToolkitFamily::OneApi.is_path_var("CMAKE_PREFIX_PATH"));
    }

    #[test]
    fn test_custom_script_always_supported() {
        assert!(ToolkitFamily::CustomScript.is_supported());
        assert!(ToolkitFamily::CustomScript.uses_script());
        assert!(!ToolkitFamily::Gcc.uses_script());
    }
}
