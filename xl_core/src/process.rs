//! External process runner
//!
//! Encoders and decoders are black boxes: `<tool> <args> <src> <dst>`.
//! Success is never judged by exit status here; callers inspect the output
//! file afterwards. The runner is a trait so tests can substitute a fake that
//! writes files of chosen sizes.

use std::borrow::Cow;
use std::io;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

/// Captured result of one external invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait ProcessRunner: Send + Sync {
    /// Runs `program args...` to completion. `Err` only when the process could
    /// not be spawned or waited on. There is no timeout.
    fn run(&self, program: &Path, args: &[String]) -> io::Result<ProcessOutput>;
}

/// Runs tools with `std::process::Command`, logging every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String]) -> io::Result<ProcessOutput> {
        let command_str = format_command(program, args);
        tracing::debug!(command = %command_str, "Executing external command");

        let start = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(args);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        let output = cmd.output()?;
        let duration = start.elapsed();

        let result = ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        };
        log_external_tool(&command_str, &result);
        Ok(result)
    }
}

fn log_external_tool(command: &str, result: &ProcessOutput) {
    match result.exit_code {
        Some(0) => tracing::debug!(
            command = %command,
            duration_secs = result.duration.as_secs_f64(),
            "External tool completed"
        ),
        Some(code) => tracing::warn!(
            command = %command,
            exit_code = code,
            duration_secs = result.duration.as_secs_f64(),
            stderr = %result.stderr.trim(),
            "External tool exited with non-zero status"
        ),
        None => tracing::warn!(
            command = %command,
            duration_secs = result.duration.as_secs_f64(),
            "External tool terminated without exit code"
        ),
    }
    if !result.stdout.is_empty() {
        tracing::trace!(stdout = %result.stdout, "External tool stdout");
    }
}

pub fn format_command(program: &Path, args: &[String]) -> String {
    let mut s = program.display().to_string();
    for arg in args {
        s.push(' ');
        s.push_str(arg);
    }
    s
}

/// Keeps a path from being parsed as a flag when it starts with '-'.
pub fn safe_path_arg(path: &Path) -> Cow<'_, str> {
    let s = path.to_string_lossy();
    if s.starts_with('-') {
        Cow::Owned(format!("./{}", s))
    } else {
        s
    }
}
