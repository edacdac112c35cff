// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io;
use std::time::Duration;

use expecter::ConsoleTransport;
use thiserror::Error;

use crate::vm::{ConfigArtifact, VmSpec};

/// Condition set once the guest agent inside the VM has connected.
pub const AGENT_CONNECTED: &str = "AgentConnected";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The platform rejected or failed the request.
    #[error("Platform request failed: {0}")]
    Request(String),

    #[error("Platform I/O error")]
    Io(#[source] io::Error),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmCondition {
    pub kind: String,
    pub status: bool,
}

/// A VM as last observed on the platform.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmInstance {
    pub namespace: String,
    pub name: String,
    /// Node the VM got scheduled on, once known.
    pub node_name: Option<String>,
    pub conditions: Vec<VmCondition>,
}

impl VmInstance {
    pub fn is_agent_connected(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == AGENT_CONNECTED && c.status)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// The cluster operations a checkup needs.
pub trait Platform {
    fn create_vm(&self, spec: &VmSpec) -> Result<VmInstance, PlatformError>;

    fn get_vm(&self, namespace: &str, name: &str) -> Result<VmInstance, PlatformError>;

    fn delete_vm(&self, namespace: &str, name: &str) -> Result<(), PlatformError>;

    fn create_config_artifact(&self, artifact: &ConfigArtifact) -> Result<(), PlatformError>;

    fn delete_config_artifact(&self, namespace: &str, name: &str) -> Result<(), PlatformError>;

    /// Connects to the serial console of a VM, waiting up to `timeout`.
    fn open_console(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Box<dyn ConsoleTransport>, PlatformError>;

    /// Runs `argv` in `container` of `pod` and returns its output. A non-zero
    /// exit status is an error.
    fn exec_in_container(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        argv: &[String],
    ) -> Result<ExecOutput, PlatformError>;
}
