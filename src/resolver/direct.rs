//! Direct strategy for toolkits that need no environment script.

use crate::core::candidate::GccAttributes;
use crate::core::ResolvedEnvironment;

/// Put the GCC bin directory first on `PATH` and point the compiler
/// variables at the discovered drivers.
pub fn resolve_gcc(attrs: &GccAttributes) -> ResolvedEnvironment {
    let mut env = ResolvedEnvironment::new();
    env.prepend_paths("PATH", [attrs.bin_dir.display().to_string()]);

    let compilers = [("CC", &attrs.c), ("CXX", &attrs.cxx), ("FC", &attrs.fortran)];
    for (var, binary) in compilers {
        if let Some(binary) = binary {
            env.set(var, binary.display().to_string());
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::environment::EnvValue;
    use std::path::PathBuf;

    #[test]
    fn test_gcc_environment() {
        let attrs = GccAttributes {
            machine: "x86_64-linux-gnu".into(),
            bin_dir: PathBuf::from("/opt/gcc-12/bin"),
            c: Some(PathBuf::from("/opt/gcc-12/bin/gcc")),
            cxx: Some(PathBuf::from("/opt/gcc-12/bin/g++")),
            fortran: None,
        };

        let env = resolve_gcc(&attrs);
        assert_eq!(
            env.get("PATH"),
            Some(&EnvValue::Paths(vec!["/opt/gcc-12/bin".to_string()]))
        );
        assert_eq!(env.value("CC").as_deref(), Some("/opt/gcc-12/bin/gcc"));
        assert_eq!(env.value("CXX").as_deref(), Some("/opt/gcc-12/bin/g++"));
        assert!(env.get("FC").is_none());
        assert!(env.cache().is_empty());
    }
}
