// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use crate::batch::{BatchResult, Batcher, Expecter};
use crate::{Error, Result};

/// Lazy match of anything, newlines included, between the echoed command and
/// the expected reply.
const ANY_CONTENT: &str = "(?s:.*?)";

/// Rewrites `pattern` so it only matches after the echo of `previous_send`.
///
/// The terminal echoes the trailing newline as `\r\n`, so it is left out of
/// the anchor.
pub fn anchor_pattern(previous_send: &str, pattern: &str) -> String {
    let echo = previous_send.strip_suffix('\n').unwrap_or(previous_send);
    format!("{}{}(?:{})", regex::escape(echo), ANY_CONTENT, pattern)
}

/// Checks that `batch` strictly alternates sends and expects.
pub fn validate_batch(batch: &[Batcher]) -> Result<()> {
    if batch.len() < 2 {
        return Err(Error::InvalidBatch(format!(
            "expected at least 2 steps, got {}",
            batch.len()
        )));
    }

    for (idx, step) in batch.iter().enumerate() {
        if let Batcher::Case(_) = step {
            return Err(Error::InvalidBatch(format!(
                "step {idx}: case steps are not supported in validated batches"
            )));
        }
    }

    for (idx, pair) in batch.windows(2).enumerate() {
        match pair {
            [Batcher::Expect(_), Batcher::Expect(_)] => {
                return Err(Error::InvalidBatch(format!(
                    "step {}: ambiguous expect, it directly follows another expect",
                    idx + 1
                )))
            }
            [Batcher::Send(_), Batcher::Send(_)] => {
                return Err(Error::InvalidBatch(format!(
                    "step {}: send directly follows another send",
                    idx + 1
                )))
            }
            _ => {}
        }
    }

    Ok(())
}

/// Returns a copy of `batch` where every expect following a send is anchored
/// to that send's echo.
pub fn anchor_batch(batch: &[Batcher]) -> Vec<Batcher> {
    let mut previous_send: Option<&str> = None;
    batch
        .iter()
        .map(|step| match step {
            Batcher::Send(text) => {
                previous_send = Some(text.as_str());
                step.clone()
            }
            Batcher::Expect(pattern) => match previous_send.take() {
                Some(text) => Batcher::Expect(anchor_pattern(text, pattern)),
                None => step.clone(),
            },
            Batcher::Case(_) => step.clone(),
        })
        .collect()
}

impl Expecter {
    /// Validates and anchors `batch` before running it.
    pub fn expect_batch_validated(
        &mut self,
        batch: &[Batcher],
        timeout: Duration,
    ) -> Result<Vec<BatchResult>> {
        validate_batch(batch)?;
        self.expect_batch(&anchor_batch(batch), timeout)
    }
}
