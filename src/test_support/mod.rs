//! Test utilities for kitenv unit tests.
//!
//! Most components shell out to real compilers and setup scripts. The
//! helpers here write small stand-ins for those onto disk so tests can run
//! the real code paths against a temporary directory.

pub mod fixtures;

use std::path::{Path, PathBuf};

pub use fixtures::*;

/// Write `body` to `dir/name`, creating `dir`, and mark it executable.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    make_executable(&path);
    path
}

/// Write a POSIX shell script with a `#!/bin/sh` line prepended.
pub fn write_sh(dir: &Path, name: &str, body: &str) -> PathBuf {
    write_script(dir, name, &format!("#!/bin/sh\n{}", body))
}

#[cfg(unix)]
pub fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) {}

/// Assert that a string contains a substring, with a readable failure.
#[track_caller]
pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "expected to find `{}` in:\n{}",
        needle,
        haystack
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_sh_prepends_shebang() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_sh(&tmp.path().join("nested"), "env.sh", "export A=1\n");
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("#!/bin/sh\n"));
        assert_contains(&content, "export A=1");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_script_is_executable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_script(tmp.path(), "tool", "#!/bin/sh\n");
        assert!(crate::util::fs::is_executable(&path));
    }
}
