// Standard library
use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::path::Path;

// External crates
use crate::error::{Result, VmError};
use duct::cmd;
use tracing::debug;
use which::which;

fn full_command<A: AsRef<OsStr>>(command: &str, args: &[A]) -> String {
    format!(
        "{} {}",
        command,
        args.iter()
            .map(|a| a.as_ref().to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    )
}

/// Run `command` inside `dir`, handing every stdout/stderr line to `on_line`
/// as soon as it is produced.
///
/// Returns `VmError::Command` when the process exits unsuccessfully. Lines
/// read before the failure have already been delivered.
pub fn stream_command_lines<A, F>(command: &str, args: &[A], dir: &Path, mut on_line: F) -> Result<()>
where
    A: AsRef<OsStr>,
    F: FnMut(&str),
{
    let full_command = full_command(command, args);
    debug!("Streaming '{}' in {}", full_command, dir.display());

    let reader = cmd(command, args)
        .dir(dir)
        .stderr_to_stdout()
        .reader()
        .map_err(|e| VmError::Command(format!("Failed to start '{}': {}", full_command, e)))?;

    for line in BufReader::new(reader).lines() {
        // duct surfaces a non-zero exit status as an error on the final read
        let line = line.map_err(|e| VmError::Command(format!("'{}': {}", full_command, e)))?;
        on_line(&line);
    }

    Ok(())
}

/// Run `command` inside `dir` and capture its stdout.
pub fn capture_command<A: AsRef<OsStr>>(command: &str, args: &[A], dir: &Path) -> Result<String> {
    let output = cmd(command, args)
        .dir(dir)
        .stderr_capture()
        .stdout_capture()
        .unchecked()
        .run()?;

    if !output.status.success() {
        return Err(VmError::Command(format!(
            "'{}' exited with code {:?}: {}",
            full_command(command, args),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Checks if a command-line tool is available in the system's PATH.
pub fn is_tool_installed(tool_name: &str) -> bool {
    which(tool_name).is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_stream_command_lines_delivers_every_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = Vec::new();

        stream_command_lines("sh", &["-c", "echo one; echo two >&2; echo three"], dir.path(), |l| {
            lines.push(l.to_string())
        })
        .unwrap();

        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_stream_command_lines_reports_exit_failure_after_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = Vec::new();

        let result = stream_command_lines("sh", &["-c", "echo partial; exit 3"], dir.path(), |l| {
            lines.push(l.to_string())
        });

        assert_eq!(lines, vec!["partial"]);
        assert!(matches!(result, Err(VmError::Command(_))));
    }

    #[test]
    fn test_capture_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = capture_command("sh", &["-c", "printf hello"], dir.path()).unwrap();
        assert_eq!(out, "hello");

        let err = capture_command("sh", &["-c", "echo boom >&2; exit 1"], dir.path()).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
