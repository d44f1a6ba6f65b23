use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::process::Command;

/// Exit status reported when the program could not be started
pub const LAUNCH_FAILURE_STATUS: i32 = 127;

/// Exit status base for children terminated by a signal, as a POSIX shell reports it
const SIGNAL_STATUS_BASE: i32 = 128;

/// Captured result of one external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn launch_failure(error: impl ToString) -> Self {
        Self {
            status: LAUNCH_FAILURE_STATUS,
            stdout: String::new(),
            stderr: error.to_string(),
        }
    }
}

/// Runs external programs to completion.
///
/// Implementations never fail: every problem is folded into the returned
/// status and stderr so callers can treat a broken tool the same as an
/// empty answer.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> CommandOutput;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct Shell;

#[async_trait]
impl CommandRunner for Shell {
    async fn run(&self, program: &Path, args: &[String]) -> CommandOutput {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        log::trace!("[scan::shell] executing_command: cmd={:?}", cmd);

        let start = Instant::now();
        // output() drains stdout and stderr concurrently while waiting
        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                log::debug!("[scan::shell] launch_failed: program={} error={}", program.display(), e);
                return CommandOutput::launch_failure(format!("{}: {}", program.display(), e));
            }
        };

        let status = exit_code(output.status);
        log::trace!("[scan::shell] command_finished: program={} status={} duration={}ms stdout_len={} stderr_len={}",
            program.display(), status, start.elapsed().as_millis(), output.stdout.len(), output.stderr.len());

        CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return SIGNAL_STATUS_BASE + signal;
        }
    }
    SIGNAL_STATUS_BASE
}
