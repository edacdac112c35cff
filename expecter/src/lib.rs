// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Expect-style automation of VM serial consoles.
//!
//! A [`ConsoleChannel`] turns a blocking duplex stream into a pair of
//! in-memory pipes, an [`Expecter`] runs batches of send/expect steps over it
//! under a single deadline, and [`Login`] brings a console to a usable shell.

mod batch;
mod channel;
mod login;
mod validated;

use std::io;

use thiserror::Error;

pub use crate::batch::{BatchResult, Batcher, CaseTag, Caser, Expecter};
pub use crate::channel::{ConsoleChannel, ConsoleTransport};
pub use crate::login::{shell_prompt, Login, LOGIN_RETRIES, PROBE_TIMEOUT};
pub use crate::validated::{anchor_batch, anchor_pattern, validate_batch};

/// Matches the tail of any shell prompt, privileged or not.
pub const PROMPT_EXPRESSION: &str = r"(\$ |# )";

#[derive(Debug, Error)]
pub enum Error {
    /// Cannot clone the console transport.
    #[error("Error cloning console transport")]
    CloneTransport(#[source] io::Error),

    /// Cannot spawn one of the console threads.
    #[error("Error spawning console {0} thread")]
    SpawnThread(&'static str, #[source] io::Error),

    /// The console stream was closed by the remote end.
    #[error("Console stream closed")]
    StreamClosed,

    /// The batch deadline elapsed. `results` holds the steps matched so far
    /// and `pending` the unmatched output, both for diagnostics only.
    #[error("Timed out waiting for batch step {step}")]
    Timeout {
        step: usize,
        results: Vec<BatchResult>,
        pending: String,
    },

    #[error("Invalid pattern {0:?}")]
    InvalidPattern(String, #[source] regex::Error),

    /// The batch was rejected before anything was sent.
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// A case branch tagged as failing matched.
    #[error("Batch step {step} failed: {reason}")]
    CaseFailed { step: usize, reason: String },

    #[error("Batch step {step} matched {pattern:?} more than {retries} times")]
    RetriesExhausted {
        step: usize,
        pattern: String,
        retries: u32,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The console logged in but the shell did not accept the setup commands.
    #[error("Error configuring the console")]
    ConfigureConsole(#[source] Box<Error>),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
