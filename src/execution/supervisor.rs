use std::process::ExitStatus;
use std::time::Duration;

use super::container::{ContainerRunner, RunningContainer};

/// The single terminal state of a supervised job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminal {
    Completed {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    TimedOut {
        partial_stdout: String,
        partial_stderr: String,
    },
    SpawnFailed {
        message: String,
    },
}

impl Terminal {
    pub fn label(&self) -> &'static str {
        match self {
            Terminal::Completed { .. } => "completed",
            Terminal::TimedOut { .. } => "timed_out",
            Terminal::SpawnFailed { .. } => "spawn_failed",
        }
    }
}

/// Owns the race between process exit and the wall-clock deadline.
#[derive(Clone, Copy, Debug)]
pub struct Supervisor {
    limit: Duration,
}

impl Supervisor {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub async fn supervise(&self, runner: &ContainerRunner, container: RunningContainer) -> Terminal {
        let RunningContainer {
            name,
            mut child,
            mut stdout,
            mut stderr,
        } = container;

        // exit plus drained streams, all under one deadline
        let completion = async {
            let status = child.wait().await?;
            let out = stdout.finish().await;
            let err = stderr.finish().await;
            Ok::<_, std::io::Error>((status, out, err))
        };

        match tokio::time::timeout(self.limit, completion).await {
            Ok(Ok((status, out, err))) => classify(status, out, err),
            Ok(Err(err)) => {
                let _ = child.start_kill();
                runner.remove(&name).await;
                Terminal::SpawnFailed {
                    message: format!("Failed to wait for the execution process: {err}"),
                }
            }
            Err(_elapsed) => {
                tracing::warn!(container = %name, limit_secs = self.limit.as_secs(), "execution timed out, killing");
                if let Err(err) = child.start_kill() {
                    tracing::debug!(container = %name, error = %err, "kill failed, process already gone");
                }
                if let Err(err) = child.wait().await {
                    tracing::debug!(container = %name, error = %err, "failed to reap killed process");
                }
                // killing the CLI client does not stop the container itself
                runner.remove(&name).await;
                let partial_stdout = stdout.snapshot();
                let partial_stderr = stderr.snapshot();
                stdout.abort();
                stderr.abort();
                Terminal::TimedOut {
                    partial_stdout,
                    partial_stderr,
                }
            }
        }
    }
}

/// The container already exists when it is started attached, so any exit
/// status here is the program's own.
fn classify(status: ExitStatus, stdout: String, stderr: String) -> Terminal {
    Terminal::Completed {
        stdout,
        stderr,
        exit_code: exit_code(&status),
    }
}

/// Signal deaths are reported shell-style as `128 + signal`.
fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::execution::container::ContainerSpec;
    use crate::execution::testing::FakeRuntime;
    use crate::language::Language;
    use crate::workspace::WorkspaceRoot;
    use std::os::unix::process::ExitStatusExt;
    use uuid::Uuid;

    #[test]
    fn zero_exit_is_completed() {
        let terminal = classify(ExitStatus::from_raw(0), "hi\n".into(), String::new());
        assert_eq!(
            terminal,
            Terminal::Completed {
                stdout: "hi\n".into(),
                stderr: String::new(),
                exit_code: 0
            }
        );
    }

    #[test]
    fn program_failure_keeps_exit_code() {
        // raw wait status: exit code lives in the high byte
        let terminal = classify(ExitStatus::from_raw(3 << 8), String::new(), "boom".into());
        assert!(matches!(terminal, Terminal::Completed { exit_code: 3, .. }));
    }

    #[test]
    fn exit_125_belongs_to_the_program() {
        let terminal = classify(ExitStatus::from_raw(125 << 8), "result=42\n".into(), String::new());
        assert_eq!(
            terminal,
            Terminal::Completed {
                stdout: "result=42\n".into(),
                stderr: String::new(),
                exit_code: 125
            }
        );
    }

    #[test]
    fn signal_death_maps_to_shell_convention() {
        // SIGKILL, no core dump
        assert_eq!(exit_code(&ExitStatus::from_raw(9)), 137);
    }

    #[tokio::test]
    async fn timeout_keeps_output_seen_before_the_kill() {
        let fake = FakeRuntime::new();
        let config = fake.config();
        let runner = ContainerRunner::new(config.runtime.clone());
        let root = WorkspaceRoot::init(&config.workspace.root).unwrap();
        let workspace = root.prepare(&Uuid::new_v4()).unwrap();
        workspace
            .write_source(Language::Python.filename(), "print before\nwarn oops\nsleep\n")
            .unwrap();
        let spec = ContainerSpec {
            name: "code-runner-partial".to_string(),
            image: "code-runner-python",
            host_dir: workspace.path(),
            interactive: false,
        };

        runner.create(&spec).await.unwrap();
        let running = runner.start(&spec, None).unwrap();
        let terminal = Supervisor::new(Duration::from_secs(1))
            .supervise(&runner, running)
            .await;

        assert_eq!(
            terminal,
            Terminal::TimedOut {
                partial_stdout: "before\n".into(),
                partial_stderr: "oops\n".into(),
            }
        );
        assert_eq!(fake.removed_containers(), ["code-runner-partial"]);
    }
}
