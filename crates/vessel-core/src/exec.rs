//! Synchronous fork/exec primitive.
//!
//! Every host-side and in-container script execution goes through this
//! module: exactly one child at a time, a blocking wait, and a structured
//! outcome. Ownership of the argument list ends at the call. There are no
//! internal timeouts — a hung script blocks the invocation by design.

use std::process::{Command, Stdio};

use vessel_common::error::{Result, VesselError};

/// Result of running an external command to completion.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Exit code of the child, `-1` if terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output, when capture was requested.
    pub stdout: Option<String>,
}

impl CommandOutcome {
    /// Whether the child exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs `argv` to completion, inheriting stdio.
///
/// `env` entries are added on top of the inherited environment.
///
/// # Errors
///
/// Returns an error if `argv` is empty or the child cannot be spawned.
/// A non-zero child exit is reported through the outcome, not an error —
/// the caller decides whether that is fatal.
pub fn run_command(argv: Vec<String>, env: &[(String, String)]) -> Result<CommandOutcome> {
    run(argv, env, false)
}

/// Runs `argv` to completion, capturing its standard output.
///
/// # Errors
///
/// Returns an error if `argv` is empty or the child cannot be spawned.
pub fn run_command_capture(argv: Vec<String>, env: &[(String, String)]) -> Result<CommandOutcome> {
    run(argv, env, true)
}

/// Runs a script body as `/bin/sh -c <body>`.
///
/// # Errors
///
/// Returns an error if the shell cannot be spawned.
pub fn run_shell_script(body: &str, env: &[(String, String)]) -> Result<CommandOutcome> {
    run_command(
        vec!["/bin/sh".to_string(), "-c".to_string(), body.to_string()],
        env,
    )
}

fn run(argv: Vec<String>, env: &[(String, String)], capture: bool) -> Result<CommandOutcome> {
    let Some((program, args)) = argv.split_first() else {
        return Err(VesselError::Exec {
            command: String::new(),
            message: "empty argument list".into(),
        });
    };

    tracing::debug!(command = %program, args = ?args, "running command");

    let mut command = Command::new(program);
    let _ = command.args(args).envs(env.iter().map(|(k, v)| (k, v)));

    let spawn_error = |e: std::io::Error| VesselError::Exec {
        command: program.clone(),
        message: e.to_string(),
    };

    let (exit_code, stdout) = if capture {
        // Capture stdout only; diagnostics keep flowing to the caller's
        // stderr.
        let _ = command.stderr(Stdio::inherit());
        let output = command.output().map_err(spawn_error)?;
        (
            output.status.code().unwrap_or(-1),
            Some(String::from_utf8_lossy(&output.stdout).to_string()),
        )
    } else {
        // Scripts may be interactive; the child inherits our stdio.
        let status = command.status().map_err(spawn_error)?;
        (status.code().unwrap_or(-1), None)
    };

    tracing::debug!(command = %program, exit_code, "command finished");
    Ok(CommandOutcome { exit_code, stdout })
}

/// Replaces the current process image with `argv`.
///
/// The inherited environment is merged with `env` before the handoff.
/// On success this never returns.
///
/// # Errors
///
/// Returns an error if `argv` is empty, contains interior NUL bytes, or
/// the exec syscall fails.
pub fn exec_replace(argv: Vec<String>, env: &[(String, String)]) -> Result<std::convert::Infallible> {
    use std::ffi::CString;

    let Some(program) = argv.first() else {
        return Err(VesselError::Exec {
            command: String::new(),
            message: "empty argument list".into(),
        });
    };
    let program_name = program.clone();

    let to_cstring = |s: String| {
        CString::new(s).map_err(|_| VesselError::Exec {
            command: program_name.clone(),
            message: "argument contains a NUL byte".into(),
        })
    };

    let c_argv: Vec<CString> = argv.into_iter().map(to_cstring).collect::<Result<_>>()?;
    let merged: Vec<CString> = std::env::vars()
        .filter(|(k, _)| !env.iter().any(|(ek, _)| ek == k))
        .chain(env.iter().cloned())
        .map(|(k, v)| to_cstring(format!("{k}={v}")))
        .collect::<Result<_>>()?;

    tracing::debug!(command = %program_name, "replacing process image");
    match nix::unistd::execvpe(&c_argv[0], &c_argv, &merged) {
        Ok(never) => match never {},
        Err(err) => Err(VesselError::Exec {
            command: program_name,
            message: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_reports_exit_zero() {
        let outcome = run_command(vec!["true".into()], &[]).expect("should spawn");
        assert!(outcome.success());
        assert!(outcome.stdout.is_none());
    }

    #[test]
    fn run_command_reports_nonzero_without_error() {
        let outcome = run_command(vec!["false".into()], &[]).expect("should spawn");
        assert!(!outcome.success());
    }

    #[test]
    fn empty_argv_is_an_error() {
        assert!(run_command(vec![], &[]).is_err());
    }

    #[test]
    fn missing_program_is_an_error() {
        assert!(run_command(vec!["/nonexistent/program".into()], &[]).is_err());
    }

    #[test]
    fn capture_returns_stdout() {
        let outcome = run_command_capture(vec!["echo".into(), "hello".into()], &[])
            .expect("should spawn");
        assert_eq!(outcome.stdout.as_deref(), Some("hello\n"));
    }

    #[test]
    fn shell_script_sees_wire_environment() {
        let env = vec![("VESSEL_TEST_VAR".to_string(), "42".to_string())];
        let outcome =
            run_shell_script("test \"$VESSEL_TEST_VAR\" = 42", &env).expect("should spawn");
        assert!(outcome.success());
    }

    #[test]
    fn shell_script_nonzero_exit_is_reported() {
        let outcome = run_shell_script("exit 3", &[]).expect("should spawn");
        assert_eq!(outcome.exit_code, 3);
    }
}
