//! Process boundary for the external workflow engine.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, info};

/// Everything needed to launch one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    /// Workflow name (`accession`, `variant_load`, ...).
    pub workflow: String,
    /// Workflow script.
    pub script: PathBuf,
    /// Parameter manifest.
    pub params_file: PathBuf,
    /// Engine working directory (the resumption token).
    pub work_dir: PathBuf,
    /// Pass the engine's resume flag.
    pub resume: bool,
    /// Directory to run from; the engine writes its log here.
    pub current_dir: PathBuf,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl EngineInvocation {
    /// Command-line arguments after the executable.
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.script.clone().into(),
            "-params-file".into(),
            self.params_file.clone().into(),
            "-work-dir".into(),
            self.work_dir.clone().into(),
        ];
        if self.resume {
            args.push("-resume".into());
        }
        args
    }
}

/// How the engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exit status 0.
    Success,
    /// Any other exit. `code` is `None` when the process was killed by a signal.
    Failure {
        /// Exit code, if any.
        code: Option<i32>,
    },
}

impl ProcessExit {
    /// Map a process status.
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else {
            Self::Failure {
                code: status.code(),
            }
        }
    }
}

/// Launches the engine and waits for it to exit.
///
/// An `Err` means the process could not be started at all; a process that
/// started and failed is `Ok(ProcessExit::Failure { .. })`.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Run the engine to completion.
    async fn launch(&self, invocation: &EngineInvocation) -> std::io::Result<ProcessExit>;
}

/// Launches a real engine executable.
#[derive(Debug, Clone)]
pub struct NextflowLauncher {
    executable: PathBuf,
}

impl NextflowLauncher {
    /// Launcher for the given executable.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

#[async_trait]
impl EngineLauncher for NextflowLauncher {
    async fn launch(&self, invocation: &EngineInvocation) -> std::io::Result<ProcessExit> {
        info!(
            workflow = %invocation.workflow,
            work_dir = %invocation.work_dir.display(),
            resume = invocation.resume,
            "launching engine"
        );
        debug!(
            executable = %self.executable.display(),
            args = ?invocation.args(),
            "engine command"
        );

        let status = tokio::process::Command::new(&self.executable)
            .args(invocation.args())
            .current_dir(&invocation.current_dir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        Ok(ProcessExit::from_status(status))
    }
}

/// A helper program run in-process by a stage, outside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub current_dir: PathBuf,
}

/// Runs helper programs such as the ENA metadata loader.
#[async_trait]
pub trait ToolLauncher: Send + Sync {
    /// Run the command to completion.
    async fn run(&self, command: &ToolCommand) -> std::io::Result<ProcessExit>;
}

/// Runs helper programs as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessToolLauncher;

#[async_trait]
impl ToolLauncher for ProcessToolLauncher {
    async fn run(&self, command: &ToolCommand) -> std::io::Result<ProcessExit> {
        debug!(program = %command.program.display(), args = ?command.args, "running tool");
        let status = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.current_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;
        Ok(ProcessExit::from_status(status))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn invocation(resume: bool) -> EngineInvocation {
        EngineInvocation {
            workflow: "accession".to_string(),
            script: PathBuf::from("/wf/accession.nf"),
            params_file: PathBuf::from("/p/accession_params.json"),
            work_dir: PathBuf::from("/p/nextflow_accession_x"),
            resume,
            current_dir: std::env::temp_dir(),
            env: vec![],
        }
    }

    #[test]
    fn test_args_without_resume() {
        let args = invocation(false).args();
        assert_eq!(
            args,
            vec![
                OsString::from("/wf/accession.nf"),
                OsString::from("-params-file"),
                OsString::from("/p/accession_params.json"),
                OsString::from("-work-dir"),
                OsString::from("/p/nextflow_accession_x"),
            ]
        );
    }

    #[test]
    fn test_args_with_resume() {
        let args = invocation(true).args();
        assert_eq!(args.last(), Some(&OsString::from("-resume")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_exit_codes() {
        let ok = NextflowLauncher::new("true").launch(&invocation(false)).await.unwrap();
        assert_eq!(ok, ProcessExit::Success);

        let failed = NextflowLauncher::new("false").launch(&invocation(false)).await.unwrap();
        assert_eq!(failed, ProcessExit::Failure { code: Some(1) });
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let result = NextflowLauncher::new("/nonexistent/engine-binary")
            .launch(&invocation(false))
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_launcher_reports_exit() {
        let command = ToolCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "exit 3".to_string()],
            current_dir: std::env::temp_dir(),
        };
        let exit = ProcessToolLauncher.run(&command).await.unwrap();
        assert_eq!(exit, ProcessExit::Failure { code: Some(3) });
    }
}
