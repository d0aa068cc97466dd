use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::error::RunError;

/// Where every image expects the job directory.
pub const MOUNT_POINT: &str = "/app";

const TRUNCATED_MARKER: &str = "\n... (output truncated)";

/// What one container run needs besides the runtime settings.
#[derive(Clone, Debug)]
pub struct ContainerSpec<'a> {
    pub name: String,
    pub image: &'a str,
    pub host_dir: &'a Path,
    pub interactive: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageStatus {
    Present,
    Missing { detail: String },
}

/// Thin wrapper around the container engine CLI.
#[derive(Debug)]
pub struct ContainerRunner {
    runtime: RuntimeConfig,
    known_images: Mutex<HashSet<String>>,
}

impl ContainerRunner {
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self {
            runtime,
            known_images: Mutex::new(HashSet::new()),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.runtime.executable);
        command.args(&self.runtime.global_args);
        command
    }

    fn spawn_error(&self, source: io::Error) -> RunError {
        if source.kind() == io::ErrorKind::NotFound {
            RunError::RuntimeMissing {
                runtime: self.runtime.executable.clone(),
            }
        } else {
            RunError::Spawn {
                runtime: self.runtime.executable.clone(),
                source,
            }
        }
    }

    /// Runs a short engine command to completion under the command deadline.
    async fn output(&self, command: &mut Command, action: &'static str) -> Result<Output, RunError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let limit = self.runtime.command_timeout();
        match tokio::time::timeout(limit, command.output()).await {
            Ok(result) => result.map_err(|source| self.spawn_error(source)),
            Err(_elapsed) => Err(RunError::Timeout {
                runtime: self.runtime.executable.clone(),
                action,
                secs: limit.as_secs(),
            }),
        }
    }

    /// Checks that the engine CLI runs and can reach its daemon.
    pub async fn probe(&self) -> Result<(), RunError> {
        let mut command = self.command();
        command.arg("version");
        let output = self.output(&mut command, "version").await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RunError::Unavailable {
                runtime: self.runtime.executable.clone(),
                detail: failure_detail(&output),
            })
        }
    }

    /// Decided by the exit status of `image inspect`, never by parsing run output.
    pub async fn image_status(&self, image: &str) -> Result<ImageStatus, RunError> {
        if self.is_known(image) {
            return Ok(ImageStatus::Present);
        }
        let mut command = self.command();
        command.arg("image").arg("inspect").arg(image);
        let output = self.output(&mut command, "image inspect").await?;
        if output.status.success() {
            if let Ok(mut known) = self.known_images.lock() {
                known.insert(image.to_string());
            }
            return Ok(ImageStatus::Present);
        }
        // an unreachable daemon fails inspect the same way a missing image does
        self.probe().await?;
        Ok(ImageStatus::Missing {
            detail: failure_detail(&output),
        })
    }

    fn is_known(&self, image: &str) -> bool {
        self.known_images
            .lock()
            .map(|known| known.contains(image))
            .unwrap_or(false)
    }

    pub fn create_args(&self, spec: &ContainerSpec<'_>) -> Vec<String> {
        let runtime = &self.runtime;
        let mut args: Vec<String> = vec![
            "create".into(),
            "--rm".into(),
            "--name".into(),
            spec.name.clone(),
            "--network".into(),
            "none".into(),
            "--memory".into(),
            runtime.memory.clone(),
            "--cpus".into(),
            runtime.cpus.clone(),
            "--pids-limit".into(),
            runtime.pids_limit.to_string(),
            "--pull".into(),
            "never".into(),
        ];
        if spec.interactive {
            args.push("-i".into());
        }
        args.push("-v".into());
        args.push(format!("{}:{}", spec.host_dir.display(), MOUNT_POINT));
        args.push(spec.image.to_string());
        args
    }

    pub fn start_args(&self, spec: &ContainerSpec<'_>) -> Vec<String> {
        let mut args: Vec<String> = vec!["start".into(), "-a".into()];
        if spec.interactive {
            args.push("-i".into());
        }
        args.push(spec.name.clone());
        args
    }

    /// Creates the container without starting it. A failure here means the
    /// program never ran.
    pub async fn create(&self, spec: &ContainerSpec<'_>) -> Result<(), RunError> {
        let mut command = self.command();
        command.args(self.create_args(spec));
        let output = self.output(&mut command, "create").await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RunError::Create {
                detail: failure_detail(&output),
            })
        }
    }

    /// Starts a created container attached and begins capturing its output.
    /// `stdin`, when given, is written in the background and the pipe closed
    /// afterwards. Whatever the attached process reports belongs to the program.
    pub fn start(
        &self,
        spec: &ContainerSpec<'_>,
        stdin: Option<&str>,
    ) -> Result<RunningContainer, RunError> {
        let mut command = self.command();
        command
            .args(self.start_args(spec))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| self.spawn_error(source))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let input = input.to_owned();
            let name = spec.name.clone();
            tokio::spawn(async move {
                // the program may exit without reading everything
                if let Err(err) = pipe.write_all(input.as_bytes()).await {
                    tracing::debug!(container = %name, error = %err, "stdin not fully delivered");
                }
            });
        }

        let limit = self.runtime.max_output_bytes;
        let stdout = StreamCapture::start(child.stdout.take(), limit);
        let stderr = StreamCapture::start(child.stderr.take(), limit);

        Ok(RunningContainer {
            name: spec.name.clone(),
            child,
            stdout,
            stderr,
        })
    }

    /// Force-removes a container by name. Best effort.
    pub async fn remove(&self, name: &str) {
        let mut command = self.command();
        command.arg("rm").arg("--force").arg(name);
        match self.output(&mut command, "rm").await {
            Ok(output) if output.status.success() => {
                tracing::debug!(container = %name, "container removed")
            }
            Ok(output) => tracing::warn!(
                container = %name,
                detail = %failure_detail(&output),
                "container removal reported an error"
            ),
            Err(err) => tracing::warn!(container = %name, error = %err, "failed to remove container"),
        }
    }
}

fn failure_detail(output: &Output) -> String {
    let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if detail.is_empty() {
        format!("engine exited with {}", output.status)
    } else {
        detail
    }
}

#[derive(Debug)]
pub struct RunningContainer {
    pub name: String,
    pub child: Child,
    pub stdout: StreamCapture,
    pub stderr: StreamCapture,
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn to_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATED_MARKER);
        }
        text
    }
}

/// Accumulates one output stream while the process runs.
#[derive(Debug)]
pub struct StreamCapture {
    buffer: Arc<Mutex<Captured>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamCapture {
    fn start<R>(reader: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let handle = reader.map(|reader| tokio::spawn(pump(reader, Arc::clone(&buffer), limit)));
        Self { buffer, handle }
    }

    /// What has arrived so far.
    pub fn snapshot(&self) -> String {
        self.buffer
            .lock()
            .map(|captured| captured.to_text())
            .unwrap_or_default()
    }

    /// Waits for end of stream and returns everything captured.
    pub async fn finish(&mut self) -> String {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::debug!(error = %err, "output reader ended abnormally");
            }
        }
        self.snapshot()
    }

    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn pump<R>(mut reader: R, buffer: Arc<Mutex<Captured>>, limit: usize)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(mut captured) = buffer.lock() {
                    captured.push(&chunk[..n], limit);
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "output stream read failed");
                break;
            }
        }
    }
}
