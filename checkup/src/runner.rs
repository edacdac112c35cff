// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use crate::console::Console;
use crate::platform::Platform;
use crate::{Error, Result};

/// Printed by trex-console on every start.
pub const TREX_CONSOLE_BANNER: &str = "Using 'python3' as Python interpeter";

/// Runs shell commands on the traffic generator.
pub trait CommandRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<String>;
}

fn clean_output(raw: &str) -> String {
    raw.replace(TREX_CONSOLE_BANNER, "")
}

/// Runs commands on a VM serial console, delimiting their output by the
/// shell prompt.
pub struct ConsoleRunner<'a, P: Platform + ?Sized> {
    console: Console<'a, P>,
    prompt: String,
}

impl<'a, P: Platform + ?Sized> ConsoleRunner<'a, P> {
    pub fn new(console: Console<'a, P>, prompt: &str) -> Self {
        ConsoleRunner {
            console,
            prompt: prompt.to_string(),
        }
    }
}

impl<P: Platform + ?Sized> CommandRunner for ConsoleRunner<'_, P> {
    fn run(&self, command: &str, timeout: Duration) -> Result<String> {
        let output = self.console.run_command(command, &self.prompt, timeout)?;
        Ok(clean_output(&output))
    }
}

/// Runs commands through `bash -c` inside a container.
pub struct ExecRunner<'a, P: Platform + ?Sized> {
    platform: &'a P,
    namespace: String,
    pod: String,
    container: String,
}

impl<'a, P: Platform + ?Sized> ExecRunner<'a, P> {
    pub fn new(platform: &'a P, namespace: &str, pod: &str, container: &str) -> Self {
        ExecRunner {
            platform,
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
        }
    }
}

impl<P: Platform + ?Sized> CommandRunner for ExecRunner<'_, P> {
    // The platform call carries its own timeout.
    fn run(&self, command: &str, _timeout: Duration) -> Result<String> {
        let argv = ["bash", "-c", command].map(str::to_string);
        let output = self
            .platform
            .exec_in_container(&self.namespace, &self.pod, &self.container, &argv)
            .map_err(|source| Error::Exec {
                pod: self.pod.clone(),
                container: self.container.clone(),
                command: command.to_string(),
                source,
            })?;
        if !output.stderr.is_empty() {
            debug!("{command:?} wrote to stderr: {}", output.stderr);
        }
        Ok(clean_output(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_output() {
        assert_eq!(
            clean_output("Using 'python3' as Python interpeter\nConsole Commands:\n"),
            "\nConsole Commands:\n"
        );
        assert_eq!(clean_output("plain"), "plain");
    }
}
