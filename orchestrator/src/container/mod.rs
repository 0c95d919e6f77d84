//! Container management for terminal sessions
//!
//! Handles the container side of a session:
//! - Building the per-identity execution image
//! - Creating one long-lived environment per (user, session)
//! - Starting commands inside it and handing back their output stream
//! - Releasing environments when their session expires

mod environment;
mod manager;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use environment::{Environment, EnvironmentHandle};
pub use manager::ContainerManager;
pub use runtime::{BuildSpec, CliRuntime, ContainerRuntime, EnvironmentSpec, RawOutput};
