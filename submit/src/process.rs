use std::{ffi::OsString, io, process::Command};
use tracing::{debug, trace};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// container for everything a finished external command reported back
pub struct CommandOutput {
    pub success: bool,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// human readable exit status, `signal` if the process was killed
    pub fn status_text(&self) -> String {
        self.status
            .map(|code| code.to_string())
            .unwrap_or_else(|| String::from("signal"))
    }
}

/// Runs an external program with an explicit argument vector and waits for it to finish.
///
/// Arguments are never joined into a shell string, so option texts from job configurations
/// reach the program exactly as written.
pub trait CommandRunner {
    fn run(&mut self, program: &str, args: &[OsString]) -> io::Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
/// `CommandRunner` backed by `std::process::Command`
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, program: &str, args: &[OsString]) -> io::Result<CommandOutput> {
        debug!(program = program, args = ?args, "Executing");

        // NOTE: no timeout, a hanging scheduler command blocks the whole batch
        let output = Command::new(program).args(args).output()?;
        let result = CommandOutput {
            success: output.status.success(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        trace!(
            status = ?result.status,
            stdout = %result.stdout,
            stderr = %result.stderr,
            "Command finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_of_successful_command() {
        let output = SystemRunner
            .run("echo", &[OsString::from("Submitted batch job 42")])
            .unwrap();

        assert!(output.success);
        assert_eq!(output.status, Some(0));
        assert_eq!(output.stdout.trim(), "Submitted batch job 42");
    }

    #[test]
    fn arguments_are_not_interpreted_by_a_shell() {
        let output = SystemRunner
            .run("echo", &[OsString::from("$HOME; false")])
            .unwrap();

        assert_eq!(output.stdout.trim(), "$HOME; false");
    }

    #[test]
    fn reports_non_zero_exit() {
        let output = SystemRunner.run("false", &[]).unwrap();

        assert!(!output.success);
        assert_eq!(output.status_text(), "1");
    }

    #[test]
    fn missing_program_is_an_io_error() {
        assert!(SystemRunner
            .run("this-program-does-not-exist-anywhere", &[])
            .is_err());
    }
}
