//! Container runtime seam and the docker/podman CLI implementation

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context as TaskContext, Poll};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::OwnedMutexGuard;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use crate::config::EnvironmentConfig;
use crate::models::User;

/// Everything needed to build the execution image for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    /// Full image reference, `<name>:<tag>`
    pub image: String,
    /// Directory holding the Dockerfile
    pub context: PathBuf,
    pub build_args: BTreeMap<String, String>,
}

impl BuildSpec {
    /// Build spec carrying the user's git identity
    ///
    /// The tag is derived from the build arguments, so identical identities
    /// share one image and different identities never overwrite each other.
    pub fn for_user(settings: &EnvironmentConfig, user: &User) -> Self {
        let build_args = BTreeMap::from([
            ("GIT_USER_EMAIL".to_string(), user.email.clone()),
            ("GIT_USER_NAME".to_string(), user.id.clone()),
        ]);

        let mut hasher = Sha256::new();
        for (key, value) in &build_args {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        let digest = format!("{:x}", hasher.finalize());

        Self {
            image: format!("{}:{}", settings.image_name, &digest[..12]),
            context: settings.build_context.clone(),
            build_args,
        }
    }
}

/// How to create one session environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub name: String,
    pub image: String,
    /// Default interactive process
    pub shell: String,
}

/// Raw output of a running command
///
/// Optionally carries the environment's execution lock, released when the
/// stream is dropped.
pub struct RawOutput {
    stream: BoxStream<'static, io::Result<Bytes>>,
    _lock: Option<OwnedMutexGuard<()>>,
}

impl RawOutput {
    pub fn new(stream: BoxStream<'static, io::Result<Bytes>>) -> Self {
        Self {
            stream,
            _lock: None,
        }
    }

    pub(crate) fn with_lock(mut self, lock: OwnedMutexGuard<()>) -> Self {
        self._lock = Some(lock);
        self
    }
}

impl std::fmt::Debug for RawOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawOutput")
            .field("locked", &self._lock.is_some())
            .finish_non_exhaustive()
    }
}

impl Stream for RawOutput {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

/// Operations the lifecycle manager needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build (or rebuild) an image
    async fn build_image(&self, spec: &BuildSpec) -> Result<()>;

    /// Create and start an environment; returns its container id
    async fn create_environment(&self, spec: &EnvironmentSpec) -> Result<String>;

    /// Start a command inside a running environment.
    /// Returns as soon as the command is running.
    async fn start_exec(&self, container_id: &str, command: &str) -> Result<RawOutput>;

    /// Force-remove an environment
    async fn remove_environment(&self, container_id: &str) -> Result<()>;

    /// Engine version string, if the engine answers
    async fn version(&self) -> Option<String>;
}

/// Runtime driving the `docker` or `podman` command line
pub struct CliRuntime {
    binary: String,
    exec_shell: String,
}

impl CliRuntime {
    /// Use the configured binary, or find docker/podman on PATH
    pub async fn detect(settings: &EnvironmentConfig) -> Result<Self> {
        let binary = match &settings.runtime_binary {
            Some(binary) => binary.clone(),
            None => which::which("docker")
                .or_else(|_| which::which("podman"))
                .map(|p| p.to_string_lossy().to_string())
                .context("Neither docker nor podman found on PATH")?,
        };

        let runtime = Self {
            binary,
            exec_shell: settings.exec_shell.clone(),
        };

        let version = runtime
            .version()
            .await
            .with_context(|| format!("{} is not available or not working", runtime.binary))?;
        info!(runtime = %runtime.binary, version = %version, "Container runtime initialized");

        Ok(runtime)
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(runtime = %self.binary, args = ?args, "Running container command");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(args = ?args, stderr = %stderr.trim(), "Container command failed");
            anyhow::bail!("{} {} failed: {}", self.binary, args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn build_image(&self, spec: &BuildSpec) -> Result<()> {
        let mut args = vec!["build".to_string(), "-t".to_string(), spec.image.clone()];
        for (key, value) in &spec.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.context.to_string_lossy().to_string());

        self.run(&args).await?;
        info!(image = %spec.image, "Image built");
        Ok(())
    }

    async fn create_environment(&self, spec: &EnvironmentSpec) -> Result<String> {
        let container_id = self
            .run(&[
                "create".to_string(),
                "--interactive".to_string(),
                "--tty".to_string(),
                "--name".to_string(),
                spec.name.clone(),
                spec.image.clone(),
                spec.shell.clone(),
            ])
            .await?;

        self.run(&["start".to_string(), container_id.clone()])
            .await
            .context("Failed to start environment")?;

        info!(container_id = %container_id, name = %spec.name, "Environment started");
        Ok(container_id)
    }

    async fn start_exec(&self, container_id: &str, command: &str) -> Result<RawOutput> {
        let mut child = Command::new(&self.binary)
            .args(["exec", "--tty", container_id, self.exec_shell.as_str(), "-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn exec process")?;

        let stdout = child
            .stdout
            .take()
            .context("Exec process has no stdout")?;
        let mut stderr = child
            .stderr
            .take()
            .context("Exec process has no stderr")?;

        debug!(container_id = %container_id, command = %command, "Exec started");

        // With --tty the command's own stderr arrives on stdout, so anything
        // on the CLI's stderr comes from the runtime itself
        let runtime = self.binary.clone();
        let outcome = stream::once(async move {
            let mut raw = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut raw).await {
                return Some(e);
            }
            let message = String::from_utf8_lossy(&raw);
            let message = message.trim();

            match child.wait().await {
                Ok(status) if !status.success() && !message.is_empty() => {
                    let code = status
                        .code()
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "a signal".to_string());
                    Some(io::Error::new(
                        io::ErrorKind::Other,
                        format!("{} exec exited with {}: {}", runtime, code, message),
                    ))
                }
                Ok(_) => None,
                Err(e) => Some(e),
            }
        })
        .filter_map(|failure| futures::future::ready(failure.map(Err)));

        Ok(RawOutput::new(ReaderStream::new(stdout).chain(outcome).boxed()))
    }

    async fn remove_environment(&self, container_id: &str) -> Result<()> {
        self.run(&["rm".to_string(), "-f".to_string(), container_id.to_string()])
            .await?;
        info!(container_id = %container_id, "Environment removed");
        Ok(())
    }

    async fn version(&self) -> Option<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .ok()?;

        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            None
        }
    }
}
