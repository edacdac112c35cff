// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("Timed out polling")]
    Timeout,

    #[error("Poll condition failed")]
    Condition(#[source] E),
}

/// Calls `condition` every `interval` until it returns true, fails, or
/// `deadline` passes. The condition is checked right away and one last time
/// at the deadline.
pub fn poll_until<E, F>(
    interval: Duration,
    deadline: Instant,
    mut condition: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Result<bool, E>,
{
    loop {
        if condition().map_err(PollError::Condition)? {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout);
        }
        thread::sleep(interval.min(deadline - now));
    }
}
