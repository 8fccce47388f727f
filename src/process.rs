//! Bounded subprocess execution.
//!
//! Package-manager and asset-build invocations are blocking external calls
//! with generous but finite deadlines. A deadline overrun kills the child and
//! surfaces as `PluginError::Timeout`; it is never retried here.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{PluginError, Result};

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` with `args` in `working_dir`, waiting at most `timeout`.
///
/// stdout/stderr are drained on background threads so a chatty child can
/// never block on a full pipe while we poll for exit.
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &std::path::Path,
    timeout: Duration,
) -> Result<CommandOutput> {
    log::debug!("running: {} {:?} (cwd: {:?})", program, args, working_dir);

    let mut child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PluginError::PackageManager(format!("could not start '{}': {}", program, e)))?;

    let stdout_handle = spawn_reader(child.stdout.take());
    let stderr_handle = spawn_reader(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PluginError::Timeout(format!(
                "'{}' did not finish within {}s",
                program,
                timeout.as_secs()
            )));
        }
        std::thread::sleep(Duration::from_millis(100));
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        success: status.success(),
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut reader) = source {
            let mut bytes = Vec::new();
            if reader.read_to_end(&mut bytes).is_ok() {
                buf = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        buf
    })
}
