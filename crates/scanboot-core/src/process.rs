//! Child process execution with concurrent stream draining.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Substring the JVM prints when a class file targets a newer runtime.
pub const JRE_MISMATCH_SIGNATURE: &str = "UnsupportedClassVersionError";

pub const JRE_MISMATCH_MESSAGE: &str = "The scanner engine was compiled for a newer Java runtime \
than the one used to launch it. Remove sonar.scanner.javaExePath or point it at a more recent \
Java installation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchResult {
    pub exit_code: i32,
    pub succeeded: bool,
    /// stderr carried the runtime version mismatch signature.
    pub runtime_mismatch: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to start {}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for {}", .executable.display())]
    Wait {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Spawns executables and streams their output. Holds only per-launch
/// settings; a launcher can run any number of children.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run `executable` to completion.
    ///
    /// stdin is fed with `stdin_payload` while stdout and stderr are drained,
    /// all three concurrently, so a chatty child can never wedge on a full
    /// pipe. Each stdout line reaches `on_stdout` as soon as it is read; each
    /// stderr line is logged at error level with a `[stderr]` prefix.
    ///
    /// Only a failure to start the child is an error. A non-zero exit comes
    /// back as `succeeded == false`.
    pub async fn execute<F>(
        &self,
        executable: &Path,
        args: &[String],
        stdin_payload: Option<&str>,
        mut on_stdout: F,
    ) -> Result<LaunchResult, LaunchError>
    where
        F: FnMut(&str) + Send,
    {
        let mut cmd = Command::new(executable);
        cmd.args(args);
        cmd.envs(&self.env);
        if let Some(dir) = self.working_dir.as_ref() {
            cmd.current_dir(dir);
        }
        cmd.stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(
            target: "scanboot::process",
            executable = %executable.display(),
            args = ?args,
            "spawning child process"
        );
        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            executable: executable.to_path_buf(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let feed = async move {
            let (Some(mut pipe), Some(payload)) = (stdin, stdin_payload) else {
                return;
            };
            if let Err(err) = pipe.write_all(payload.as_bytes()).await {
                // The child may legitimately exit without reading everything.
                if err.kind() != io::ErrorKind::BrokenPipe {
                    warn!(target: "scanboot::process", error = %err, "writing child stdin failed");
                }
                return;
            }
            let _ = pipe.shutdown().await;
        };

        let drain_stdout = async {
            if let Some(out) = stdout {
                if let Err(err) = drain_lines(out, &mut on_stdout).await {
                    warn!(target: "scanboot::process", error = %err, "reading child stdout failed");
                }
            }
        };

        let mut runtime_mismatch = false;
        let drain_stderr = async {
            if let Some(err_pipe) = stderr {
                let result = drain_lines(err_pipe, |line| {
                    relay_stderr_line(line, &mut runtime_mismatch, |message| {
                        error!(target: "scanboot::process", "{message}")
                    })
                })
                .await;
                if let Err(err) = result {
                    warn!(target: "scanboot::process", error = %err, "reading child stderr failed");
                }
            }
        };

        tokio::join!(feed, drain_stdout, drain_stderr);

        let status = child.wait().await.map_err(|source| LaunchError::Wait {
            executable: executable.to_path_buf(),
            source,
        })?;
        let exit_code = exit_code(status);
        debug!(
            target: "scanboot::process",
            executable = %executable.display(),
            exit_code,
            "child process finished"
        );
        Ok(LaunchResult {
            exit_code,
            succeeded: status.success(),
            runtime_mismatch,
        })
    }
}

/// Pass one stderr line to `log` with a `[stderr] ` prefix. The first line
/// carrying [`JRE_MISMATCH_SIGNATURE`] also logs [`JRE_MISMATCH_MESSAGE`] and
/// sets `runtime_mismatch`; later ones do not repeat it.
fn relay_stderr_line(line: &str, runtime_mismatch: &mut bool, mut log: impl FnMut(&str)) {
    log(&format!("[stderr] {line}"));
    if !*runtime_mismatch && line.contains(JRE_MISMATCH_SIGNATURE) {
        *runtime_mismatch = true;
        log(JRE_MISMATCH_MESSAGE);
    }
}

async fn drain_lines<R, F>(reader: R, mut sink: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        sink(line.trim_end_matches(['\r', '\n']));
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
