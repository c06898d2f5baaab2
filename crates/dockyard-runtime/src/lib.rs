//! Container runtime layer for Dockyard.
//!
//! This crate implements the infrastructure boundary: the pluggable
//! `ContainerRuntime` trait with a Docker backend (bollard) and an in-memory
//! mock backend, the labeling and naming convention that lets orphaned
//! resources be found later, and the process-wide `PortAllocator`.

pub mod backend;
pub mod docker;
pub mod labels;
pub mod mock;
pub mod ports;

pub use backend::{
    connect_runtime, ContainerRuntime, ContainerSpec, ContainerStatus, HealthState, NetworkSpec,
    PortBinding, ResourceKind, ResourceSummary, MOCK_REMOVAL_DELAY_ENV,
};
pub use labels::{managed_filter, managed_labels, new_run_id, resource_name};
pub use mock::MockRuntime;
pub use ports::PortAllocator;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("unknown container runtime '{0}' (expected: docker, mock)")]
    UnknownRuntime(String),
    #[error("container runtime '{name}' is not available: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },
    #[error("network '{id}' has active endpoints: {reason}")]
    InUse { id: String, reason: String },
    #[error("failed to create {kind} '{name}': {reason}")]
    CreateFailed {
        kind: ResourceKind,
        name: String,
        reason: String,
    },
    #[error("failed to remove {kind} '{id}': {reason}")]
    RemoveFailed {
        kind: ResourceKind,
        id: String,
        reason: String,
    },
    #[error("failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },
    #[error("no free host port after {0} attempts")]
    PortExhausted(usize),
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// True when the resource is already gone; removal callers treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
