//! Fake toolkit installations.
//!
//! `fake_gcc` writes a shell script that answers the probes the GCC scanner
//! sends; `fake_oneapi` lays out a oneAPI root with per-component `env/vars`
//! scripts that export a few recognisable variables.

use std::path::{Path, PathBuf};

use crate::scanner::oneapi::{IFORT_PATHS, IFX_PATHS, VARS_SCRIPT};

use super::{make_executable, write_sh};

/// Behaviour of a fake GCC driver.
#[derive(Debug, Clone)]
pub struct FakeGcc {
    pub version: String,
    pub machine: String,
    pub gnu: bool,
    pub fails: bool,
}

impl FakeGcc {
    pub fn new(version: &str, machine: &str) -> Self {
        FakeGcc {
            version: version.to_string(),
            machine: machine.to_string(),
            gnu: true,
            fails: false,
        }
    }

    /// Answer `--version` without the FSF copyright line, like clang's
    /// `gcc` shim on macOS.
    pub fn not_gnu(mut self) -> Self {
        self.gnu = false;
        self
    }

    /// Exit non-zero on every invocation.
    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    fn script(&self, name: &str) -> String {
        if self.fails {
            return "echo 'internal compiler error' >&2\nexit 1\n".to_string();
        }
        let second_line = if self.gnu {
            "Copyright (C) 2023 Free Software Foundation, Inc."
        } else {
            "Apple clang version 15.0.0 (clang-1500.0.40.1)"
        };
        format!(
            r#"case "$1" in
  --version)
    echo "{name} (GCC) {version}"
    echo "{second_line}"
    ;;
  -dumpfullversion|-dumpversion)
    echo "{version}"
    ;;
  -dumpmachine)
    echo "{machine}"
    ;;
  *)
    exit 1
    ;;
esac
"#,
            name = name,
            version = self.version,
            second_line = second_line,
            machine = self.machine,
        )
    }
}

/// Write a fake driver named `name` into `dir` and return its path.
pub fn fake_gcc(dir: &Path, name: &str, spec: &FakeGcc) -> PathBuf {
    write_sh(dir, name, &spec.script(name))
}

/// Lay out `root/<component>/<version>` for each component with an
/// `env/vars` script. Each script prepends its own `bin` to `PATH` and its
/// root to `CMAKE_PREFIX_PATH`, and sets `<COMPONENT>_ROOT`.
pub fn fake_oneapi(root: &Path, version: &str, components: &[&str], ifx: bool, ifort: bool) {
    for component in components {
        let dir = root.join(component).join(version);
        let vars = dir.join(VARS_SCRIPT);
        let env_dir = vars.parent().unwrap_or(&dir);
        let file_name = vars
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("vars.sh");
        let marker = component.to_ascii_uppercase();
        write_sh(
            env_dir,
            file_name,
            &format!(
                "export PATH=\"{dir}/bin:$PATH\"\n\
                 export CMAKE_PREFIX_PATH=\"{dir}${{CMAKE_PREFIX_PATH:+:$CMAKE_PREFIX_PATH}}\"\n\
                 export {marker}_ROOT=\"{dir}\"\n\
                 export SETVARS_COMPLETED=1\n",
                dir = dir.display(),
                marker = marker,
            ),
        );

        if *component == "compiler" {
            if ifx {
                touch_executable(&dir.join(IFX_PATHS[0]));
            }
            if ifort {
                touch_executable(&dir.join(IFORT_PATHS[0]));
            }
        }
    }
}

fn touch_executable(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
    make_executable(path);
}
