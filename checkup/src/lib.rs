// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! DPDK checkup orchestration.
//!
//! [`Checkup`] provisions a traffic generator VM and a VM under test through a
//! [`Platform`], runs a testpmd forwarding test between them, and tears both
//! down again. [`Launcher`] wraps the three phases with status reporting.

#[macro_use]
extern crate log;

pub mod checkup;
pub mod config;
pub mod console;
pub mod executor;
pub mod forwarder;
pub mod launcher;
pub mod platform;
pub mod poll;
pub mod runner;
pub mod status;
pub mod trafficgen;
pub mod vm;

use std::io;

use thiserror::Error;

pub use crate::checkup::{Checkup, CheckupState};
pub use crate::config::{Config, ConfigError};
pub use crate::launcher::Launcher;
pub use crate::platform::{ExecOutput, Platform, PlatformError, VmCondition, VmInstance};
pub use crate::status::{check_results, FileReporter, Reporter, Results, Status};
pub use crate::vm::{ConfigArtifact, NetworkInterface, VmSpec};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Error creating config artifact {0}")]
    CreateConfigArtifact(String, #[source] PlatformError),

    #[error("Error deleting config artifact {0}")]
    DeleteConfigArtifact(String, #[source] PlatformError),

    #[error("Error creating VM {0}")]
    CreateVm(String, #[source] PlatformError),

    #[error("Error reading VM {0}")]
    GetVm(String, #[source] PlatformError),

    #[error("Error deleting VM {0}")]
    DeleteVm(String, #[source] PlatformError),

    #[error("Timed out waiting for VM {0} to boot")]
    VmBootTimeout(String),

    #[error("Timed out waiting for VM {0} to be deleted")]
    VmDeletionTimeout(String),

    #[error("Error opening the console of VM {0}")]
    OpenConsole(String, #[source] PlatformError),

    #[error("Error on the console of VM {0}")]
    Console(String, #[source] expecter::Error),

    #[error("Error executing {command:?} in {pod}/{container}")]
    Exec {
        pod: String,
        container: String,
        command: String,
        #[source]
        source: PlatformError,
    },

    #[error("Error parsing the output of {0:?}")]
    Stats(String, #[source] stats_parser::Error),

    #[error("Traffic generator server not ready in time, diagnostics:\n{diagnostics}")]
    TrafficGenNotReady { diagnostics: String },

    #[error("Error gathering traffic generator diagnostics")]
    TrafficGenDiagnostics(#[source] Box<Error>),

    /// The traffic test ran but its counters failed one or more checks.
    #[error("{}", .0.join(", "))]
    ResultValidation(Vec<String>),

    #[error("Invalid checkup state transition from {from:?}, expected {expected}")]
    InvalidState {
        from: CheckupState,
        expected: &'static str,
    },

    #[error("Error writing status to {0}")]
    WriteStatus(String, #[source] io::Error),

    #[error("Error serializing status")]
    SerializeStatus(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Formats `error` followed by all of its sources.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
