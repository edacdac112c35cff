// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

use expecter::Batcher;
use stats_parser::{parse_forwarder_stats, ForwarderStats};

use crate::console::Console;
use crate::platform::Platform;
use crate::{Error, Result};

pub const TESTPMD_PROMPT: &str = "testpmd> ";

const CPU_LIST: &str = "1,2,3";
const FORWARDING_CORES: u32 = 2;
const SOCKET_MEMORY_MB: u32 = 1024;
const MEMORY_CHANNELS: u32 = 4;
const QUEUE_DEPTH: u32 = 2048;
const FORWARD_MODE: &str = "mac";

const START_TIMEOUT: Duration = Duration::from_secs(60);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const SHOW_STATS_COMMAND: &str = "show fwd stats all";

/// Drives testpmd on the VM under test console.
pub struct Testpmd<'a, P: Platform + ?Sized> {
    console: Console<'a, P>,
    pci_addresses: [String; 2],
    peer_mac_addresses: [String; 2],
    pub start_timeout: Duration,
    pub command_timeout: Duration,
}

impl<'a, P: Platform + ?Sized> Testpmd<'a, P> {
    /// `peer_mac_addresses` are the traffic generator MACs port 0 and port 1
    /// forward to.
    pub fn new(
        console: Console<'a, P>,
        pci_addresses: [&str; 2],
        peer_mac_addresses: [&str; 2],
    ) -> Self {
        Testpmd {
            console,
            pci_addresses: pci_addresses.map(str::to_string),
            peer_mac_addresses: peer_mac_addresses.map(str::to_string),
            start_timeout: START_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn command_line(&self) -> String {
        format!(
            "sudo dpdk-testpmd -l {CPU_LIST} -a {} -a {} --socket-mem {SOCKET_MEMORY_MB} -n {MEMORY_CHANNELS} \
             -- -i --nb-cores={FORWARDING_CORES} --rxd={QUEUE_DEPTH} --txd={QUEUE_DEPTH} \
             --forward-mode={FORWARD_MODE} --eth-peer=0,{} --eth-peer=1,{}",
            self.pci_addresses[0],
            self.pci_addresses[1],
            self.peer_mac_addresses[0],
            self.peer_mac_addresses[1],
        )
    }

    /// Launches interactive testpmd and starts forwarding.
    pub fn run(&self) -> Result<()> {
        info!("Starting testpmd on {}", self.console.vm_name());
        self.console.run_batch(
            &[
                Batcher::Send(self.command_line()),
                Batcher::Expect(TESTPMD_PROMPT.to_string()),
                Batcher::Send("start".to_string()),
                Batcher::Expect(TESTPMD_PROMPT.to_string()),
            ],
            self.start_timeout,
        )?;
        Ok(())
    }

    pub fn clear_stats(&self) -> Result<()> {
        self.console
            .run_command("clear fwd stats all", TESTPMD_PROMPT, self.command_timeout)?;
        Ok(())
    }

    pub fn get_stats(&self) -> Result<ForwarderStats> {
        let output =
            self.console
                .run_command(SHOW_STATS_COMMAND, TESTPMD_PROMPT, self.command_timeout)?;
        parse_forwarder_stats(&output).map_err(|e| Error::Stats(SHOW_STATS_COMMAND.to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use expecter::ConsoleTransport;

    use super::*;
    use crate::platform::{ExecOutput, PlatformError, VmInstance};
    use crate::vm::{ConfigArtifact, VmSpec};

    struct Unreachable;

    impl Unreachable {
        fn error() -> PlatformError {
            PlatformError::Request("unreachable".to_string())
        }
    }

    impl Platform for Unreachable {
        fn create_vm(&self, _: &VmSpec) -> std::result::Result<VmInstance, PlatformError> {
            Err(Self::error())
        }
        fn get_vm(&self, _: &str, _: &str) -> std::result::Result<VmInstance, PlatformError> {
            Err(Self::error())
        }
        fn delete_vm(&self, _: &str, _: &str) -> std::result::Result<(), PlatformError> {
            Err(Self::error())
        }
        fn create_config_artifact(
            &self,
            _: &ConfigArtifact,
        ) -> std::result::Result<(), PlatformError> {
            Err(Self::error())
        }
        fn delete_config_artifact(
            &self,
            _: &str,
            _: &str,
        ) -> std::result::Result<(), PlatformError> {
            Err(Self::error())
        }
        fn open_console(
            &self,
            _: &str,
            _: &str,
            _: Duration,
        ) -> std::result::Result<Box<dyn ConsoleTransport>, PlatformError> {
            Err(Self::error())
        }
        fn exec_in_container(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[String],
        ) -> std::result::Result<ExecOutput, PlatformError> {
            Err(Self::error())
        }
    }

    #[test]
    fn test_command_line() {
        let testpmd = Testpmd::new(
            Console::new(&Unreachable, "ns", "dpdk-vmi-abcde"),
            ["0000:06:00.0", "0000:07:00.0"],
            ["50:00:00:00:00:01", "50:00:00:00:00:02"],
        );
        assert_eq!(
            testpmd.command_line(),
            "sudo dpdk-testpmd -l 1,2,3 -a 0000:06:00.0 -a 0000:07:00.0 --socket-mem 1024 -n 4 \
             -- -i --nb-cores=2 --rxd=2048 --txd=2048 --forward-mode=mac \
             --eth-peer=0,50:00:00:00:00:01 --eth-peer=1,50:00:00:00:00:02"
        );
    }

    #[test]
    fn test_console_unreachable() {
        let testpmd = Testpmd::new(
            Console::new(&Unreachable, "ns", "dpdk-vmi-abcde"),
            ["0000:06:00.0", "0000:07:00.0"],
            ["50:00:00:00:00:01", "50:00:00:00:00:02"],
        );
        let err = testpmd.get_stats().unwrap_err();
        assert!(matches!(err, Error::OpenConsole(ref vm, _) if vm == "dpdk-vmi-abcde"));
    }
}
