//! Execution wrapper for the external tools the mount pipeline drives.
//!
//! Every invocation is blocking, bounded by a timeout and observable through
//! a shared cancellation flag. A tool that overruns receives `SIGTERM` first
//! and is killed once the grace period has elapsed.

use log::{debug, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{self, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::command_error::CommandError;

/// Shared flag a caller sets to abort the tool currently running.
pub type CancelFlag = Arc<AtomicBool>;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl Output {
    /// Returns stderr when present, stdout otherwise.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Executes named external tools.
pub trait Runner {
    /// Runs `program` with `args` and captures its output, whatever the exit status.
    fn run(&self, program: &str, args: &[&str]) -> Result<Output, CommandError>;

    /// Runs `program` and returns its stdout, surfacing a nonzero exit as an error.
    fn call(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        let out = self.run(program, args)?;
        if out.status != 0 {
            return Err(CommandError::Failed {
                program: program.to_string(),
                status: out.status,
                diagnostic: out.diagnostic(),
            });
        }
        Ok(out.stdout)
    }
}

/// [`Runner`] backed by `std::process::Command`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    grace: Duration,
    cancel: Option<CancelFlag>,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            grace: Duration::from_secs(crate::constants::DEFAULT_GRACE_SECS),
            cancel: None,
        }
    }

    /// Sets the delay between `SIGTERM` and `SIGKILL`.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn wait(
        &self,
        program: &str,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> Result<Output, CommandError> {
        let start = Instant::now();
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if self.cancelled() {
                self.terminate(program, &mut child);
                return Err(CommandError::Cancelled(program.to_string()));
            }
            if start.elapsed() > self.timeout {
                self.terminate(program, &mut child);
                return Err(CommandError::TimedOut {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| io::Error::other("stdout reader thread panicked"))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| io::Error::other("stderr reader thread panicked"))??;

        Ok(Output {
            stdout,
            stderr,
            status: exit_code(status),
        })
    }

    /// Asks the child to stop, then kills it when it ignores the request.
    fn terminate(&self, program: &str, child: &mut Child) {
        let pid = Pid::from_raw(child.id() as i32);
        if let Err(err) = signal::kill(pid, Signal::SIGTERM) {
            debug!("SIGTERM to `{program}` failed: {err}");
        }

        let start = Instant::now();
        while start.elapsed() < self.grace {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }

        warn!("`{program}` ignored SIGTERM, killing it");
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::constants::DEFAULT_TIMEOUT_SECS))
    }
}

impl Runner for CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Output, CommandError> {
        if self.cancelled() {
            return Err(CommandError::Cancelled(program.to_string()));
        }
        debug!("exec: {program} {}", redacted(program, args).join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => CommandError::NotFound(program.to_string()),
            _ => CommandError::Spawn {
                program: program.to_string(),
                source: err,
            },
        })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait(program, child, stdout_pipe, stderr_pipe)
    }
}

/// Masks key material passed inline to the decryptor.
fn redacted<'a>(program: &str, args: &[&'a str]) -> Vec<&'a str> {
    args.iter()
        .map(|arg| {
            let inline_key = (arg.starts_with("-u") || arg.starts_with("-p")) && arg.len() > 2;
            if program == crate::constants::DISLOCKER && inline_key {
                "-?***"
            } else {
                *arg
            }
        })
        .collect()
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<io::Result<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> io::Result<String> {
        let mut buf = Vec::new();
        if let Some(mut reader) = pipe {
            reader.read_to_end(&mut buf)?;
        }
        Ok(String::from_utf8_lossy(&buf).to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryptor_keys_are_not_logged() {
        assert_eq!(
            redacted("dislocker", &["-r", "-V", "/dev/nbd0p2", "-usecret", "--", "/mnt/p2-fuse"]),
            vec!["-r", "-V", "/dev/nbd0p2", "-?***", "--", "/mnt/p2-fuse"]
        );
        assert_eq!(redacted("qemu-nbd", &["-r", "-c", "/dev/nbd0"]), vec!["-r", "-c", "/dev/nbd0"]);
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let out = Output {
            stdout: "partial\n".to_string(),
            stderr: "  boom \n".to_string(),
            status: 1,
        };
        assert_eq!(out.diagnostic(), "boom");
    }
}
