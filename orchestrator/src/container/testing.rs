//! In-process container runtime for tests

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use super::runtime::{BuildSpec, ContainerRuntime, EnvironmentSpec, RawOutput};

/// What a scripted command produces
#[derive(Debug, Clone)]
pub enum Script {
    /// Chunks delivered in order, then a clean end
    Chunks(Vec<&'static [u8]>),
    /// Some chunks, then a stream error
    FailAfter(Vec<&'static [u8]>, String),
}

/// Counts every call and answers from scripts
///
/// Without a script, `echo <words>` prints `<words>\n` and anything else
/// prints nothing.
#[derive(Default)]
pub struct FakeRuntime {
    builds: AtomicUsize,
    creations: AtomicUsize,
    execs: AtomicUsize,
    running: Arc<AtomicUsize>,
    peak_running: Arc<AtomicUsize>,
    fail_build: AtomicBool,
    fail_create: AtomicBool,
    fail_exec: AtomicBool,
    create_delay: Option<Duration>,
    exec_delay: Option<Duration>,
    scripts: HashMap<String, Script>,
    built_images: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = Some(delay);
        self
    }

    pub fn with_script(mut self, command: &str, script: Script) -> Self {
        self.scripts.insert(command.to_string(), script);
        self
    }

    pub fn set_fail_build(&self, fail: bool) {
        self.fail_build.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_exec(&self, fail: bool) {
        self.fail_exec.store(fail, Ordering::SeqCst);
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn execs(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    /// Most commands that were ever running at once
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn built_images(&self) -> Vec<String> {
        self.built_images.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    fn output_for(&self, command: &str) -> Vec<io::Result<Bytes>> {
        match self.scripts.get(command) {
            Some(Script::Chunks(chunks)) => {
                chunks.iter().map(|c| Ok(Bytes::from_static(*c))).collect()
            }
            Some(Script::FailAfter(chunks, message)) => chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(*c)))
                .chain(std::iter::once(Err(io::Error::new(
                    io::ErrorKind::Other,
                    message.clone(),
                ))))
                .collect(),
            None => match command.strip_prefix("echo ") {
                Some(words) => vec![Ok(Bytes::from(format!("{}\n", words)))],
                None => Vec::new(),
            },
        }
    }
}

/// Marks one command as running until dropped
struct Running(Arc<AtomicUsize>);

impl Running {
    fn enter(running: &Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(running.clone())
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(&self, spec: &BuildSpec) -> Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_build.load(Ordering::SeqCst) {
            anyhow::bail!("build of {} failed: no such file Dockerfile", spec.image);
        }
        self.built_images.lock().unwrap().push(spec.image.clone());
        Ok(())
    }

    async fn create_environment(&self, spec: &EnvironmentSpec) -> Result<String> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("create {} failed: image not known", spec.image);
        }
        let n = self.creations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("fake-{}", n))
    }

    async fn start_exec(&self, container_id: &str, command: &str) -> Result<RawOutput> {
        if self.fail_exec.load(Ordering::SeqCst) {
            anyhow::bail!("exec in {} failed: container not running", container_id);
        }
        self.execs.fetch_add(1, Ordering::SeqCst);

        let running = Running::enter(&self.running, &self.peak_running);
        let delay = self.exec_delay;
        let items = self.output_for(command);

        let output = stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            drop(running);
            stream::iter(items)
        })
        .flatten()
        .boxed();

        Ok(RawOutput::new(output))
    }

    async fn remove_environment(&self, container_id: &str) -> Result<()> {
        self.removed.lock().unwrap().push(container_id.to_string());
        Ok(())
    }

    async fn version(&self) -> Option<String> {
        Some("fake 1.0".to_string())
    }
}
