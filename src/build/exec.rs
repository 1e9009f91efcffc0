// src/build/exec.rs

//! Running build commands
//!
//! Adapters only describe commands; a [`CommandExecutor`] runs them. The
//! production executor spawns real processes through [`crate::process`];
//! tests substitute a recording executor.

use super::{BuildCommand, SandboxPolicy};
use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::process::{self, ProcessOutput};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// Number of trailing output lines kept in a build error
const ERROR_TAIL_LINES: usize = 60;

/// Capability to run one [`BuildCommand`]
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        stage: &str,
        command: &BuildCommand,
        sandbox: Option<&SandboxPolicy>,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput>;
}

/// Executor that spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn execute(
        &self,
        stage: &str,
        command: &BuildCommand,
        sandbox: Option<&SandboxPolicy>,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput> {
        let program = which::which(&command.program).map_err(|_| Error::Build {
            stage: stage.to_string(),
            status: None,
            output: format!("{}: not found in PATH", command.program),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&command.args).current_dir(&command.cwd);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(policy) = sandbox {
            policy.apply(&mut cmd);
        }

        process::run(cmd, stage, timeout, cancel).map_err(|e| match e {
            Error::IoError(msg) => Error::Build {
                stage: stage.to_string(),
                status: None,
                output: msg,
            },
            other => other,
        })
    }
}

/// Textual log of one build, with a header per stage
#[derive(Debug, Default, Clone)]
pub struct BuildLog {
    text: String,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    pub fn header(&mut self, stage: &str, sandbox: Option<&SandboxPolicy>) {
        match sandbox.filter(|p| p.is_active()) {
            Some(policy) => self.line(&format!("=== {} (isolated: {}) ===", stage, policy.describe())),
            None => self.line(&format!("=== {} ===", stage)),
        }
    }

    pub fn output(&mut self, output: &ProcessOutput) {
        let combined = output.combined();
        if !combined.is_empty() {
            self.text.push_str(&combined);
            if !combined.ends_with('\n') {
                self.text.push('\n');
            }
        }
    }

    /// Append another log, e.g. the stage log of a finished runner
    pub fn append(&mut self, other: BuildLog) {
        self.text.push_str(&other.text);
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Runs the commands of one stage and records them in the build log
pub struct StageRunner<'a> {
    executor: &'a dyn CommandExecutor,
    timeout: Option<Duration>,
    cancel: CancelToken,
    log: BuildLog,
}

impl<'a> StageRunner<'a> {
    pub fn new(executor: &'a dyn CommandExecutor, config: &RunConfig) -> Self {
        Self {
            executor,
            timeout: config.build_timeout,
            cancel: config.cancel.clone(),
            log: BuildLog::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `commands` in order, stopping at the first failure
    ///
    /// The timeout applies to each command separately.
    pub fn run(
        &mut self,
        stage: &str,
        commands: &[BuildCommand],
        sandbox: Option<&SandboxPolicy>,
    ) -> Result<()> {
        self.cancel.check(stage)?;
        self.log.header(stage, sandbox);
        info!("Running {} ({} command(s))", stage, commands.len());

        for command in commands {
            let rendered = command.display();
            debug!("{}: {}", stage, rendered);
            self.log.line(&format!("$ {}", rendered));

            let output = self
                .executor
                .execute(stage, command, sandbox, self.timeout, &self.cancel)?;
            self.log.output(&output);

            if !output.success {
                return Err(Error::Build {
                    stage: stage.to_string(),
                    status: output.status,
                    output: tail_lines(&output.combined(), ERROR_TAIL_LINES),
                });
            }
        }
        Ok(())
    }

    pub fn log(&self) -> &BuildLog {
        &self.log
    }

    pub fn into_log(self) -> BuildLog {
        self.log
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn sh(script: &str, cwd: &Path) -> BuildCommand {
        BuildCommand::new("sh", cwd).arg("-c").arg(script)
    }

    #[test]
    fn test_stage_runner_logs_headers_and_output() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::under(temp.path());
        let executor = ProcessExecutor;
        let mut runner = StageRunner::new(&executor, &config);

        runner
            .run("build", &[sh("echo compiled", temp.path())], None)
            .unwrap();
        let log = runner.into_log().into_string();
        assert!(log.starts_with("=== build ===\n"));
        assert!(log.contains("$ sh -c 'echo compiled'"));
        assert!(log.contains("compiled\n"));
    }

    #[test]
    fn test_failure_carries_status_and_output() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::under(temp.path());
        let executor = ProcessExecutor;
        let mut runner = StageRunner::new(&executor, &config);

        let err = runner
            .run(
                "configure",
                &[
                    sh("echo missing dependency >&2; exit 3", temp.path()),
                    sh("touch never-run", temp.path()),
                ],
                None,
            )
            .unwrap_err();
        match err {
            Error::Build {
                stage,
                status,
                output,
            } => {
                assert_eq!(stage, "configure");
                assert_eq!(status, Some(3));
                assert!(output.contains("missing dependency"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!temp.path().join("never-run").exists());
    }

    #[test]
    fn test_missing_program_is_build_error() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::under(temp.path());
        let executor = ProcessExecutor;
        let mut runner = StageRunner::new(&executor, &config);

        let cmd = BuildCommand::new("forgeline-no-such-tool", temp.path());
        let err = runner.run("build", &[cmd], None).unwrap_err();
        assert!(matches!(err, Error::Build { status: None, .. }));
    }

    #[test]
    fn test_env_is_passed() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::under(temp.path());
        let executor = ProcessExecutor;
        let mut runner = StageRunner::new(&executor, &config);

        let cmd = sh("echo \"dest=$DESTDIR\"", temp.path()).env("DESTDIR", "/stage");
        runner.run("install", &[cmd], None).unwrap();
        assert!(runner.log().as_str().contains("dest=/stage"));
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail_lines("a", 5), "a");
    }
}
