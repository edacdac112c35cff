// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use expecter::{BatchResult, Batcher, Expecter, Login};
use log::Level;

use crate::platform::Platform;
use crate::{Error, Result};

const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens short lived sessions on the serial console of one VM.
///
/// Every session is closed when the operation that opened it returns.
pub struct Console<'a, P: Platform + ?Sized> {
    platform: &'a P,
    namespace: String,
    vm_name: String,
    verbose: bool,
}

/// Level console transcripts are logged at.
fn transcript_level(verbose: bool) -> Level {
    if verbose {
        Level::Info
    } else {
        Level::Debug
    }
}

impl<'a, P: Platform + ?Sized> Console<'a, P> {
    pub fn new(platform: &'a P, namespace: &str, vm_name: &str) -> Self {
        Console {
            platform,
            namespace: namespace.to_string(),
            vm_name: vm_name.to_string(),
            verbose: false,
        }
    }

    /// Logs every transcript at info level instead of debug.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    fn session(&self) -> Result<Expecter> {
        let transport = self
            .platform
            .open_console(&self.namespace, &self.vm_name, OPEN_TIMEOUT)
            .map_err(|e| Error::OpenConsole(self.vm_name.clone(), e))?;
        Expecter::new(transport).map_err(|e| Error::Console(self.vm_name.clone(), e))
    }

    pub fn login(&self, login: &Login) -> Result<()> {
        let mut session = self.session()?;
        login
            .run(&mut session)
            .map_err(|e| Error::Console(self.vm_name.clone(), e))
    }

    /// Runs a validated batch in a fresh session.
    pub fn run_batch(&self, batch: &[Batcher], timeout: Duration) -> Result<Vec<BatchResult>> {
        let mut session = self.session()?;
        let results = session
            .expect_batch_validated(batch, timeout)
            .map_err(|e| Error::Console(self.vm_name.clone(), e))?;
        let level = transcript_level(self.verbose);
        for result in &results {
            log!(level, "{} console:\n{}", self.vm_name, result.output);
        }
        Ok(results)
    }

    /// Sends `command` and returns everything printed up to the next `prompt`.
    pub fn run_command(&self, command: &str, prompt: &str, timeout: Duration) -> Result<String> {
        let results = self.run_batch(
            &[
                Batcher::Send(command.to_string()),
                Batcher::Expect(prompt.to_string()),
            ],
            timeout,
        )?;
        Ok(results
            .into_iter()
            .next_back()
            .map(|result| result.output)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_level() {
        assert_eq!(transcript_level(false), Level::Debug);
        assert_eq!(transcript_level(true), Level::Info);
    }
}
