// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::{Duration, Instant};

use stats_parser::{parse_global_stats, parse_port_stats, GeneratorPortStats, GlobalStats};

use crate::poll::{poll_until, PollError};
use crate::runner::CommandRunner;
use crate::vm::TRAFFIC_PROFILE_PATH;
use crate::{Error, Result};

const TREX_DIR: &str = "/opt/trex";
const TREX_SERVICE: &str = "trex-server.service";
/// Part of the trex-console help output.
const READY_MARKER: &str = "Console Commands";
const JOURNAL_LINES: u32 = 100;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);
const READY_TIMEOUT: Duration = Duration::from_secs(60);
const DROP_RATE_POLL_INTERVAL: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives the TRex server of the traffic generator VM.
pub struct TrafficGen<R: CommandRunner> {
    runner: R,
    packets_per_second: String,
    pub ready_poll_interval: Duration,
    pub ready_timeout: Duration,
    pub drop_rate_poll_interval: Duration,
    pub command_timeout: Duration,
}

/// Wraps `command` so trex-console runs it with the protocol trace on.
fn console_command(command: &str) -> String {
    format!(r#"cd {TREX_DIR} && echo -e "verbose on\n{command}" | ./trex-console -q -f 2>&1"#)
}

impl<R: CommandRunner> TrafficGen<R> {
    pub fn new(runner: R, packets_per_second: &str) -> Self {
        TrafficGen {
            runner,
            packets_per_second: packets_per_second.to_string(),
            ready_poll_interval: READY_POLL_INTERVAL,
            ready_timeout: READY_TIMEOUT,
            drop_rate_poll_interval: DROP_RATE_POLL_INTERVAL,
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    fn run(&self, command: &str) -> Result<String> {
        self.runner.run(command, self.command_timeout)
    }

    fn run_console(&self, command: &str) -> Result<String> {
        self.run(&console_command(command))
    }

    pub fn start_server(&self) -> Result<()> {
        info!("Starting {TREX_SERVICE}");
        self.run(&format!("sudo systemctl start {TREX_SERVICE}"))?;
        Ok(())
    }

    /// Waits until trex-console can talk to the server, at most until
    /// `deadline`.
    pub fn wait_for_server_ready(&self, deadline: Instant) -> Result<()> {
        let deadline = deadline.min(Instant::now() + self.ready_timeout);
        let ready = poll_until(self.ready_poll_interval, deadline, || {
            let output = self.run_console("help")?;
            Ok::<bool, Error>(output.contains(READY_MARKER))
        });

        match ready {
            Ok(()) => {
                info!("Traffic generator server is ready");
                Ok(())
            }
            Err(PollError::Condition(e)) => Err(e),
            Err(PollError::Timeout) => {
                let diagnostics = self
                    .diagnostics()
                    .map_err(|e| Error::TrafficGenDiagnostics(Box::new(e)))?;
                Err(Error::TrafficGenNotReady { diagnostics })
            }
        }
    }

    fn diagnostics(&self) -> Result<String> {
        let status = self.run(&format!("sudo systemctl status {TREX_SERVICE} --no-pager || true"))?;
        let journal = self.run(&format!(
            "sudo journalctl -u {TREX_SERVICE} --no-pager -n {JOURNAL_LINES} || true"
        ))?;
        Ok(format!("{}\n{}", status.trim(), journal.trim()))
    }

    pub fn clear_stats(&self) -> Result<()> {
        self.run_console("clear")?;
        Ok(())
    }

    pub fn start_traffic(&self, port: u32, duration: Duration) -> Result<()> {
        info!(
            "Starting traffic on port {port} at {}pps for {:?}",
            self.packets_per_second, duration
        );
        self.run_console(&format!(
            "start -f {TRAFFIC_PROFILE_PATH} -m {}pps -p {port} -d {}",
            self.packets_per_second,
            duration.as_secs()
        ))?;
        Ok(())
    }

    pub fn get_port_stats(&self, port: u32) -> Result<GeneratorPortStats> {
        let command = format!("stats --port {port} -p");
        let output = self.run_console(&command)?;
        parse_port_stats(&output).map_err(|e| Error::Stats(command, e))
    }

    pub fn get_global_stats(&self) -> Result<GlobalStats> {
        let command = "stats -g";
        let output = self.run_console(command)?;
        parse_global_stats(&output).map_err(|e| Error::Stats(command.to_string(), e))
    }

    /// Samples the global receive drop rate for `duration`, or until
    /// `deadline` if that comes first, and returns the highest value seen.
    ///
    /// A failed sample is retried on the next tick. It only fails the call if
    /// it is the last one.
    pub fn monitor_drop_rate(&self, duration: Duration, deadline: Instant) -> Result<f64> {
        let end = deadline.min(Instant::now() + duration);
        let mut max_drop_rate = 0f64;
        let mut last_error = None;

        let outcome = poll_until(self.drop_rate_poll_interval, end, || {
            match self.get_global_stats() {
                Ok(stats) => {
                    let drop_rate = stats.result.rx_drop_bps;
                    debug!("Traffic generator drop rate {drop_rate} bps");
                    max_drop_rate = max_drop_rate.max(drop_rate);
                    last_error = None;
                }
                Err(e) => {
                    warn!("Error sampling the drop rate: {e}");
                    last_error = Some(e);
                }
            }
            Ok::<bool, Error>(false)
        });

        match outcome {
            Ok(()) | Err(PollError::Timeout) => {}
            Err(PollError::Condition(e)) => return Err(e),
        }
        if let Some(e) = last_error {
            return Err(e);
        }

        info!("Traffic generator max drop rate {max_drop_rate} bps");
        Ok(max_drop_rate)
    }
}
