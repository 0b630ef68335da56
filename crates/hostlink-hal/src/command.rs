//! Bounded external command execution.
//!
//! [`run_command`] spawns a program with piped output and polls it until it
//! exits or the deadline passes, in which case the child is killed and a
//! [`LinkError::ProviderTimeout`] is returned. Output is drained on helper
//! threads so a chatty child can never fill its pipe and stall.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hostlink_types::{LinkError, ModuleName};
use tracing::debug;

/// Default budget for a single external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_STEP: Duration = Duration::from_millis(20);

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into a [`LinkError::ProviderFailure`].
    pub fn into_success(self, module: ModuleName, program: &str) -> Result<Self, LinkError> {
        if self.success {
            Ok(self)
        } else {
            let detail = if self.stderr.trim().is_empty() {
                self.stdout.trim().to_string()
            } else {
                self.stderr.trim().to_string()
            };
            Err(LinkError::failure(
                module,
                format!("{program} exited with {:?}: {detail}", self.code),
            ))
        }
    }
}

/// Run `program args…`, killing it after `timeout`.
///
/// # Errors
///
/// * [`LinkError::ProviderFailure`] if the program is not installed or
///   cannot be spawned.
/// * [`LinkError::ProviderTimeout`] if it does not exit in time.
pub fn run_command(
    module: ModuleName,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, LinkError> {
    debug!(%module, program, ?args, "running command");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => LinkError::failure(module, format!("missing dependency: {program}")),
            _ => LinkError::failure(module, format!("failed to spawn {program}: {e}")),
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = wait_with_deadline(&mut child, module, timeout)?;

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn wait_with_deadline(
    child: &mut Child,
    module: ModuleName,
    timeout: Duration,
) -> Result<std::process::ExitStatus, LinkError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LinkError::ProviderTimeout {
                    module,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(None) => thread::sleep(POLL_STEP),
            Err(e) => {
                let _ = child.kill();
                return Err(LinkError::failure(module, format!("wait failed: {e}")));
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
