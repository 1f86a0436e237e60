//! Synchronous invocation of the external tools the engine drives:
//! the backup utility, rsync, and tar. Each call blocks until the child
//! exits; there is deliberately no timeout, since these runs come from
//! cron and are safe to retry.

use crate::utils::{Result, VaultError};
use std::ffi::OsStr;
use std::process::{Command, Stdio};
use tracing::{debug, error};

fn render<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}

/// Run a command and fail on a nonzero exit status *or* any output.
///
/// Used for rsync and tar: with the flags we pass, a successful run is
/// silent, so diagnostic output is itself an error signal.
pub fn run_silent<I, S>(program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    let line = render(program, args.clone());
    debug!("Running: {}", line);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| VaultError::Command(format!("could not start {}: {}", program, e)))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let combined = combined.trim();

    if !output.status.success() || !combined.is_empty() {
        error!("Command gave errors: {}\n{}", line, combined);
        return Err(VaultError::Command(format!(
            "{} exited with {}",
            line, output.status
        )));
    }
    Ok(())
}

/// Run a command with inherited stdio and fail on a nonzero exit status.
///
/// Used for the backup utility, whose verbose output belongs on the
/// terminal and whose exit code alone signals success.
pub fn run_checked<I, S>(program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S> + Clone,
    S: AsRef<OsStr>,
{
    let line = render(program, args.clone());
    debug!("Running: {}", line);
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| VaultError::Command(format!("could not start {}: {}", program, e)))?;
    if !status.success() {
        return Err(VaultError::Command(format!("{} exited with {}", line, status)));
    }
    Ok(())
}

/// Run a user-supplied shell command (pre/post hook), printing its
/// output. A nonzero exit is fatal to the whole invocation.
pub fn run_shell(command: &str) -> Result<()> {
    if command.is_empty() {
        return Ok(());
    }
    debug!("Command executed: {}", command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|e| VaultError::Command(format!("could not start shell: {}", e)))?;
    if !output.stdout.is_empty() {
        print!("{}", String::from_utf8_lossy(&output.stdout));
    }
    if !output.stderr.is_empty() {
        eprint!("{}", String::from_utf8_lossy(&output.stderr));
    }
    if !output.status.success() {
        error!("Command {:?} failed. See message above.", command);
        return Err(VaultError::Command(format!(
            "{:?} exited with {}",
            command, output.status
        )));
    }
    Ok(())
}

/// Whether an external tool can be started at all. Tests probe this and
/// skip themselves when the tool is missing.
pub fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
