pub mod container;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Instant;

use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{ExecutionError, RunError, ValidationError, WorkspaceError};
use crate::language::{Language, LanguageDescriptor, Registry};
use crate::workspace::{Workspace, WorkspaceRoot};

use self::container::{ContainerRunner, ContainerSpec, ImageStatus};
use self::supervisor::{Supervisor, Terminal};

/// One validated execution request.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: Uuid,
    pub language: LanguageDescriptor,
    pub code: String,
    pub stdin: Option<String>,
}

impl Job {
    /// Language is checked before code; whitespace-only code counts as missing.
    pub fn validate(
        registry: &Registry,
        language: Option<&str>,
        code: Option<&str>,
        stdin: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let language = registry.lookup(language.ok_or(ValidationError::UnsupportedLanguage)?)?;
        let code = match code {
            Some(code) if !code.trim().is_empty() => code.to_string(),
            _ => return Err(ValidationError::NoCode),
        };
        Ok(Self {
            id: Uuid::new_v4(),
            language,
            code,
            stdin: stdin.map(str::to_string),
        })
    }

    pub fn container_name(&self) -> String {
        format!("code-runner-{}", self.id.hyphenated())
    }
}

/// How a job ended, as reported to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    TimedOut {
        limit_secs: u64,
    },
    RuntimeMissing {
        runtime: String,
    },
    ImageMissing {
        language: Language,
        image: String,
        detail: String,
    },
    Failed {
        message: String,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed { .. } => "completed",
            Outcome::TimedOut { .. } => "timed_out",
            Outcome::RuntimeMissing { .. } => "runtime_missing",
            Outcome::ImageMissing { .. } => "image_missing",
            Outcome::Failed { .. } => "failed",
        }
    }
}

/// Validates, admits, runs and cleans up execution jobs.
#[derive(Debug)]
pub struct Executor {
    registry: Registry,
    root: WorkspaceRoot,
    runner: ContainerRunner,
    supervisor: Supervisor,
    dispatcher: Dispatcher,
}

impl Executor {
    pub fn new(config: &Config) -> Result<Self, WorkspaceError> {
        let root = WorkspaceRoot::init(&config.workspace.root)?;
        Ok(Self {
            registry: Registry::new(&config.images),
            root,
            runner: ContainerRunner::new(config.runtime.clone()),
            supervisor: Supervisor::new(config.runtime.time_limit()),
            dispatcher: Dispatcher::new(
                config.limits.max_concurrent_jobs,
                config.limits.max_queued_jobs,
            ),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn runner(&self) -> &ContainerRunner {
        &self.runner
    }

    pub fn workspace_root(&self) -> &WorkspaceRoot {
        &self.root
    }

    pub async fn execute(
        &self,
        language: Option<&str>,
        code: Option<&str>,
        stdin: Option<&str>,
    ) -> Result<Outcome, ExecutionError> {
        let job = Job::validate(&self.registry, language, code, stdin)?;
        let _slot = self.dispatcher.admit().await?;
        self.run(&job).await
    }

    async fn run(&self, job: &Job) -> Result<Outcome, ExecutionError> {
        let started = Instant::now();
        tracing::info!(
            job_id = %job.id,
            language = %job.language.language,
            free_slots = self.dispatcher.available(),
            queued = self.dispatcher.queued(),
            "job started"
        );

        let workspace = self.root.prepare(&job.id)?;
        let result = self.run_in(&workspace, job).await;
        workspace.cleanup();

        match &result {
            Ok(outcome) => tracing::info!(
                job_id = %job.id,
                language = %job.language.language,
                outcome = outcome.label(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job finished"
            ),
            Err(err) => tracing::error!(job_id = %job.id, error = %err, "job could not be prepared"),
        }
        result
    }

    async fn run_in(&self, workspace: &Workspace, job: &Job) -> Result<Outcome, ExecutionError> {
        workspace.write_source(job.language.filename, &job.code)?;

        let image = job.language.image.as_str();
        match self.runner.image_status(image).await {
            Ok(ImageStatus::Present) => {}
            Ok(ImageStatus::Missing { detail }) => {
                return Ok(Outcome::ImageMissing {
                    language: job.language.language,
                    image: image.to_string(),
                    detail,
                })
            }
            Err(err) => return Ok(self.spawn_failure(job, err)),
        }

        let spec = ContainerSpec {
            name: job.container_name(),
            image,
            host_dir: workspace.path(),
            interactive: job.stdin.is_some(),
        };
        if let Err(err) = self.runner.create(&spec).await {
            // the engine may still finish creating it after we gave up
            if matches!(err, RunError::Timeout { .. }) {
                self.runner.remove(&spec.name).await;
            }
            return Ok(self.spawn_failure(job, err));
        }
        let running = match self.runner.start(&spec, job.stdin.as_deref()) {
            Ok(running) => running,
            Err(err) => {
                self.runner.remove(&spec.name).await;
                return Ok(self.spawn_failure(job, err));
            }
        };

        let terminal = self.supervisor.supervise(&self.runner, running).await;
        tracing::debug!(job_id = %job.id, state = terminal.label(), "job reached terminal state");
        let outcome = match terminal {
            Terminal::Completed {
                stdout,
                stderr,
                exit_code,
            } => Outcome::Completed {
                stdout,
                stderr,
                exit_code,
            },
            Terminal::TimedOut {
                partial_stdout,
                partial_stderr,
            } => {
                tracing::debug!(
                    job_id = %job.id,
                    stdout_bytes = partial_stdout.len(),
                    stderr_bytes = partial_stderr.len(),
                    "discarding partial output of timed out job"
                );
                Outcome::TimedOut {
                    limit_secs: self.supervisor.limit().as_secs(),
                }
            }
            Terminal::SpawnFailed { message } => Outcome::Failed { message },
        };
        Ok(outcome)
    }

    fn spawn_failure(&self, job: &Job, err: RunError) -> Outcome {
        match err {
            RunError::RuntimeMissing { runtime } => {
                tracing::warn!(job_id = %job.id, %runtime, "isolation runtime not found");
                Outcome::RuntimeMissing { runtime }
            }
            other => {
                tracing::error!(job_id = %job.id, error = %other, "failed to launch container");
                Outcome::Failed {
                    message: other.to_string(),
                }
            }
        }
    }
}
