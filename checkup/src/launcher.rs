// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::{Duration, Instant};

use chrono::Utc;

use crate::checkup::{Checkup, CheckupState};
use crate::platform::Platform;
use crate::status::{Reporter, Status};
use crate::{error_chain, Error, Result};

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Runs a checkup from start to end and reports its status.
pub struct Launcher<'a, P: Platform + ?Sized, R: Reporter> {
    checkup: Checkup<'a, P>,
    reporter: R,
    pub teardown_timeout: Duration,
}

impl<'a, P: Platform + ?Sized, R: Reporter> Launcher<'a, P, R> {
    pub fn new(checkup: Checkup<'a, P>, reporter: R) -> Self {
        Launcher {
            checkup,
            reporter,
            teardown_timeout: TEARDOWN_TIMEOUT,
        }
    }

    pub fn checkup(&self) -> &Checkup<'a, P> {
        &self.checkup
    }

    /// Reports the start, runs Setup, Run and Teardown, and reports the
    /// outcome. Only reporting failures are returned as errors; checkup
    /// failures end up in the returned status.
    pub fn run(&mut self) -> Result<Status> {
        let mut status = Status {
            start_timestamp: Some(Utc::now()),
            ..Default::default()
        };
        self.reporter.report(&status)?;

        let deadline = Instant::now() + self.checkup.config().timeout;
        let mut failures = Vec::new();

        match self.checkup.setup(deadline) {
            Ok(()) => {
                if let Err(e) = self.checkup.run(deadline) {
                    error!("Checkup run failed: {}", error_chain(&e));
                    push_failure(&mut failures, e);
                }
            }
            Err(e) => push_failure(&mut failures, e),
        }

        if self.checkup.state() == CheckupState::Completed {
            status.results = Some(self.checkup.results().clone());
        }

        if self.checkup.has_resources() {
            let teardown_deadline = Instant::now() + self.teardown_timeout;
            if let Err(e) = self.checkup.teardown(teardown_deadline) {
                error!("Checkup teardown failed: {}", error_chain(&e));
                push_failure(&mut failures, e);
            }
        }

        status.succeeded = failures.is_empty();
        status.failure_reasons = failures;
        status.completion_timestamp = Some(Utc::now());
        self.reporter.report(&status)?;

        info!(
            "Checkup {}",
            if status.succeeded { "succeeded" } else { "failed" }
        );
        Ok(status)
    }
}

fn push_failure(failures: &mut Vec<String>, e: Error) {
    match e {
        Error::ResultValidation(reasons) => failures.extend(reasons),
        e => failures.push(error_chain(&e)),
    }
}
