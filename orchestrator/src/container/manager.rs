//! Container lifecycle management

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EnvironmentConfig;
use crate::error::TerminalError;
use crate::models::User;

use super::environment::{Environment, EnvironmentHandle};
use super::runtime::{BuildSpec, ContainerRuntime, EnvironmentSpec, RawOutput};

/// (user id, session id)
type BindingKey = (String, String);

/// Empty until the environment for its key has been created
type BindingCell = Arc<OnceCell<EnvironmentHandle>>;

/// Owns the mapping from (user, session) to a running environment
///
/// Concurrent first calls for the same pair share one cell, so exactly one
/// environment is created and every caller gets the same handle. A failed
/// build or create leaves the cell empty and the next call tries again.
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: EnvironmentConfig,
    bindings: Mutex<HashMap<BindingKey, BindingCell>>,
    images: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: EnvironmentConfig) -> Self {
        Self {
            runtime,
            settings,
            bindings: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
        }
    }

    /// Return the environment bound to (user, session), creating it on first use
    pub async fn ensure_environment(
        &self,
        user: &User,
        session_id: &str,
    ) -> Result<EnvironmentHandle, TerminalError> {
        let key = (user.id.clone(), session_id.to_string());
        let cell = self
            .bindings
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone();

        let environment = match cell
            .get_or_try_init(|| self.create_environment(user, session_id))
            .await
        {
            Ok(environment) => environment.clone(),
            Err(e) => {
                self.discard_empty_binding(&key, &cell).await;
                return Err(e);
            }
        };

        // The session may have been released while the environment was being created
        let still_bound = self
            .bindings
            .lock()
            .await
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &cell));
        if !still_bound {
            warn!(
                session_id = %session_id,
                container_id = %environment.container_id,
                "Session released during environment creation"
            );
            self.remove(&environment).await;
            return Err(TerminalError::InvalidSession(session_id.to_string()));
        }

        Ok(environment)
    }

    /// Start a command in the session's environment and return its live output
    ///
    /// With `serialize_commands` on, the returned stream holds the
    /// environment's execution lock until it is dropped.
    pub async fn execute(
        &self,
        user: &User,
        session_id: &str,
        command: &str,
    ) -> Result<RawOutput, TerminalError> {
        let environment = self.ensure_environment(user, session_id).await?;

        let lock = if self.settings.serialize_commands {
            Some(environment.lock().await)
        } else {
            None
        };

        let output = self
            .runtime
            .start_exec(&environment.container_id, command)
            .await
            .map_err(|e| {
                warn!(
                    session_id = %session_id,
                    container_id = %environment.container_id,
                    error = %e,
                    "Command failed to start"
                );
                TerminalError::CommandExecution(format!("{:#}", e))
            })?;

        let count = environment.record_execution();
        debug!(
            session_id = %session_id,
            container_id = %environment.container_id,
            executions = count,
            "Command started"
        );

        Ok(match lock {
            Some(lock) => output.with_lock(lock),
            None => output,
        })
    }

    /// The environment currently bound to (user, session), if any
    pub async fn binding(&self, user_id: &str, session_id: &str) -> Option<EnvironmentHandle> {
        let key = (user_id.to_string(), session_id.to_string());
        self.bindings
            .lock()
            .await
            .get(&key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of bound environments
    pub async fn environment_count(&self) -> usize {
        self.bindings
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Engine version, for health reporting
    pub async fn runtime_version(&self) -> Option<String> {
        self.runtime.version().await
    }

    /// Drop every binding of a session and remove its containers.
    /// Returns how many environments were released.
    pub async fn release_session(&self, session_id: &str) -> usize {
        let released: Vec<EnvironmentHandle> = {
            let mut bindings = self.bindings.lock().await;
            let keys: Vec<BindingKey> = bindings
                .keys()
                .filter(|(_, session)| session == session_id)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| bindings.remove(key))
                .filter_map(|cell| cell.get().cloned())
                .collect()
        };

        for environment in &released {
            self.remove(environment).await;
        }

        if !released.is_empty() {
            info!(session_id = %session_id, count = released.len(), "Session environments released");
        }
        released.len()
    }

    /// Remove every bound environment
    pub async fn remove_all(&self) -> usize {
        let released: Vec<EnvironmentHandle> = self
            .bindings
            .lock()
            .await
            .drain()
            .filter_map(|(_, cell)| cell.get().cloned())
            .collect();

        for environment in &released {
            self.remove(environment).await;
        }

        info!(count = released.len(), "All environments removed");
        released.len()
    }

    async fn create_environment(
        &self,
        user: &User,
        session_id: &str,
    ) -> Result<EnvironmentHandle, TerminalError> {
        let build = BuildSpec::for_user(&self.settings, user);

        self.ensure_image(&build).await.map_err(|e| {
            error!(user_id = %user.id, image = %build.image, error = %e, "Image build failed");
            TerminalError::EnvironmentBuild(format!("{:#}", e))
        })?;

        let spec = EnvironmentSpec {
            name: format!("shellcast-{}", Uuid::new_v4().simple()),
            image: build.image.clone(),
            shell: self.settings.shell.clone(),
        };

        let container_id = self.runtime.create_environment(&spec).await.map_err(|e| {
            error!(
                user_id = %user.id,
                session_id = %session_id,
                image = %spec.image,
                error = %e,
                "Environment creation failed"
            );
            TerminalError::EnvironmentCreate(format!("{:#}", e))
        })?;

        crate::metrics::record_environment_created();
        info!(
            user_id = %user.id,
            session_id = %session_id,
            container_id = %container_id,
            image = %spec.image,
            "Environment bound"
        );

        Ok(Arc::new(Environment::new(
            container_id,
            spec.image,
            user.id.clone(),
            session_id,
        )))
    }

    /// Build an image reference once per process
    async fn ensure_image(&self, build: &BuildSpec) -> anyhow::Result<()> {
        let cell = self
            .images
            .lock()
            .await
            .entry(build.image.clone())
            .or_default()
            .clone();

        cell.get_or_try_init(|| async {
            info!(image = %build.image, "Building environment image");
            let result = self.runtime.build_image(build).await;
            crate::metrics::record_image_build(result.is_ok());
            result
        })
        .await?;

        Ok(())
    }

    /// Forget a binding whose creation failed, unless another caller is still using it
    async fn discard_empty_binding(&self, key: &BindingKey, cell: &BindingCell) {
        let mut bindings = self.bindings.lock().await;
        let unused = bindings.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if unused {
            bindings.remove(key);
        }
    }

    async fn remove(&self, environment: &Environment) {
        if !environment.mark_released() {
            return;
        }
        if let Err(e) = self.runtime.remove_environment(&environment.container_id).await {
            warn!(
                container_id = %environment.container_id,
                session_id = %environment.session_id,
                error = %e,
                "Failed to remove environment"
            );
        }
    }
}
