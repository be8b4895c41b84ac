//! Subprocess execution utilities.
//!
//! Every probe and environment script runs through [`ProcessBuilder`]. Runs
//! that may hang (vendor scripts, compiler probes) use
//! [`ProcessBuilder::exec_with_deadline`], which puts the child in its own
//! process group so the whole tree can be killed on timeout or cancellation.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared flag for cancelling every in-flight subprocess of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Failure of a supervised subprocess run.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while running `{program}`")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` did not finish within {}s", .after.as_secs_f32())]
    Timeout { program: String, after: Duration },

    #[error("`{program}` was cancelled")]
    Cancelled { program: String },
}

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    env_clear: bool,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            env_clear: false,
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set several environment variables.
    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Start from an empty environment instead of inheriting ours.
    pub fn env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if self.env_clear {
            cmd.env_clear();
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }

    /// Execute the command and wait for completion.
    pub fn exec(&self) -> Result<Output> {
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd
            .output()
            .with_context(|| format!("failed to run `{}`", self.program.display()))?;

        Ok(output)
    }

    /// Execute with an optional time limit, observing `cancel`.
    ///
    /// The child runs in its own process group. On timeout or cancellation
    /// the whole group is killed and reaped before returning; after a normal
    /// exit any processes it left running in the group are killed too.
    pub fn exec_with_deadline(
        &self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<Output, ExecError> {
        let program = self.display_command();
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::channel();
        spawn_reader(child.stdout.take(), Stream::Stdout, tx.clone());
        spawn_reader(child.stderr.take(), Stream::Stderr, tx);
        let started = Instant::now();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut status = None;
        let mut streams_open = true;

        // Background children may keep the pipes open after the direct child
        // exits, so draining is bounded by the same deadline.
        loop {
            if streams_open {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok((Stream::Stdout, chunk)) => stdout.extend_from_slice(&chunk),
                    Ok((Stream::Stderr, chunk)) => stderr.extend_from_slice(&chunk),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => streams_open = false,
                }
            } else {
                thread::sleep(POLL_INTERVAL);
            }

            if status.is_none() {
                match child.try_wait() {
                    Ok(Some(exit)) => {
                        status = Some(exit);
                        #[cfg(unix)]
                        kill_group(&child);
                    }
                    Ok(None) => {}
                    Err(source) => {
                        kill_tree(&mut child);
                        return Err(ExecError::Io { program, source });
                    }
                }
            }

            if let Some(status) = status {
                if !streams_open {
                    return Ok(Output {
                        status,
                        stdout,
                        stderr,
                    });
                }
            }

            if cancel.is_cancelled() {
                tracing::debug!("cancelling `{}`", program);
                kill_tree(&mut child);
                return Err(ExecError::Cancelled { program });
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    tracing::debug!("`{}` timed out after {:?}", program, limit);
                    kill_tree(&mut child);
                    return Err(ExecError::Timeout {
                        program,
                        after: limit,
                    });
                }
            }
        }
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Forward everything read from `source` to `tx` until EOF.
///
/// The channel disconnects once both readers have dropped their sender.
fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
    stream: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
) {
    let Some(mut reader) = source else {
        return;
    };
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!("stopped reading child {:?}: {}", stream, e);
                    break;
                }
            }
        }
    });
}

/// Kill the child and everything it started, then reap it.
///
/// Reader threads are left to finish on their own once the pipes close.
fn kill_tree(child: &mut Child) {
    kill_group(child);
    if let Err(e) = child.kill() {
        tracing::debug!("failed to kill child {}: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        tracing::debug!("failed to reap child {}: {}", child.id(), e);
    }
}

/// Send SIGKILL to the child's process group.
#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        // Nothing left in the group.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::debug!("failed to kill process group {}: {}", child.id(), e),
    }
}

/// Terminate the child's process tree.
#[cfg(windows)]
fn kill_group(child: &Child) {
    let pid = child.id().to_string();
    match Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::debug!("taskkill for {} exited with {}", pid, status),
        Err(e) => tracing::debug!("failed to run taskkill for {}: {}", pid, e),
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_group(_child: &Child) {}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Shell used to source POSIX environment scripts: `bash` when available,
/// `sh` otherwise.
pub fn default_shell() -> PathBuf {
    find_executable("bash")
        .or_else(|| find_executable("sh"))
        .unwrap_or_else(|| PathBuf::from("/bin/sh"))
}

/// Snapshot of the current process environment, skipping non-UTF-8 entries.
pub fn host_env() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("gcc").args(["-dumpfullversion", "-dumpversion"]);

        assert_eq!(pb.display_command(), "gcc -dumpfullversion -dumpversion");
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executable() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("kitenv-no-such-tool").is_none());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_with_deadline_captures_output() {
        let output = ProcessBuilder::new("sh")
            .args(["-c", "echo hello; echo oops >&2"])
            .exec_with_deadline(Some(Duration::from_secs(10)), &CancelToken::new())
            .unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_with_deadline_times_out() {
        let started = Instant::now();
        let result = ProcessBuilder::new("sh")
            .args(["-c", "sleep 30 & sleep 30"])
            .exec_with_deadline(Some(Duration::from_millis(200)), &CancelToken::new());

        assert!(matches!(result, Err(ExecError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_with_deadline_kills_background_children() {
        let started = Instant::now();
        let output = ProcessBuilder::new("sh")
            .args(["-c", "sleep 30 & echo done"])
            .exec_with_deadline(Some(Duration::from_secs(20)), &CancelToken::new())
            .unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_with_deadline_bounds_detached_pipe_holders() {
        // `setsid` leaves the group, so only the deadline stops the drain.
        if find_executable("setsid").is_none() {
            return;
        }
        let started = Instant::now();
        let result = ProcessBuilder::new("sh")
            .args(["-c", "setsid sleep 30 & echo done"])
            .exec_with_deadline(Some(Duration::from_millis(500)), &CancelToken::new());

        assert!(matches!(result, Err(ExecError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_with_deadline_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let result = ProcessBuilder::new("sh")
            .args(["-c", "sleep 30"])
            .exec_with_deadline(None, &token);

        assert!(matches!(result, Err(ExecError::Cancelled { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_env_clear() {
        let output = ProcessBuilder::new("/bin/sh")
            .args(["-c", "echo \"[$KITENV_PROBE]\""])
            .env_clear()
            .env("KITENV_PROBE", "set")
            .exec()
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "[set]");
    }
}
