// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::{Duration, Instant};

use expecter::{Login, PROBE_TIMEOUT};
use stats_parser::StatsIndex;

use crate::config::{Config, NIC_PCI_ADDRESSES};
use crate::console::Console;
use crate::forwarder::Testpmd;
use crate::platform::Platform;
use crate::runner::ConsoleRunner;
use crate::status::Results;
use crate::trafficgen::TrafficGen;
use crate::Result;

/// Generator port the test traffic leaves from.
const TRAFFIC_PORT: u32 = 0;
/// Generator port the forwarded traffic comes back to.
const RETURN_PORT: u32 = 1;

/// Runs the traffic test between two booted VMs.
pub struct Executor<'a, P: Platform + ?Sized> {
    platform: &'a P,
    config: &'a Config,
    vm_under_test: String,
    traffic_gen: String,
    /// How long a console gets to show a shell prompt before logging in.
    pub login_probe_timeout: Duration,
}

impl<'a, P: Platform + ?Sized> Executor<'a, P> {
    pub fn new(
        platform: &'a P,
        config: &'a Config,
        vm_under_test: &str,
        traffic_gen: &str,
    ) -> Self {
        Executor {
            platform,
            config,
            vm_under_test: vm_under_test.to_string(),
            traffic_gen: traffic_gen.to_string(),
            login_probe_timeout: PROBE_TIMEOUT,
        }
    }

    fn login(&self, vm_name: &str) -> Login {
        let mut login = Login::new(&self.config.username, &self.config.password, vm_name);
        login.probe_timeout = self.login_probe_timeout;
        login
    }

    /// Returns the test counters. Node names are left for the caller.
    pub fn execute(&self, deadline: Instant) -> Result<Results> {
        let config = self.config;
        let vm_console = Console::new(self.platform, &config.namespace, &self.vm_under_test)
            .with_verbose(config.verbose);
        let gen_console = Console::new(self.platform, &config.namespace, &self.traffic_gen)
            .with_verbose(config.verbose);

        info!("Logging into {}", self.vm_under_test);
        vm_console.login(&self.login(&self.vm_under_test))?;
        let gen_login = self.login(&self.traffic_gen);
        info!("Logging into {}", self.traffic_gen);
        gen_console.login(&gen_login)?;

        let trafficgen = TrafficGen::new(
            ConsoleRunner::new(gen_console, &gen_login.prompt()),
            &config.traffic_gen_packets_per_second,
        );
        trafficgen.start_server()?;
        trafficgen.wait_for_server_ready(deadline)?;

        let testpmd = Testpmd::new(
            vm_console,
            NIC_PCI_ADDRESSES,
            [
                config.traffic_gen_east_mac_address.as_str(),
                config.traffic_gen_west_mac_address.as_str(),
            ],
        );
        testpmd.run()?;

        trafficgen.clear_stats()?;
        testpmd.clear_stats()?;

        trafficgen.start_traffic(TRAFFIC_PORT, config.test_duration)?;
        let max_drop_rate = trafficgen.monitor_drop_rate(config.test_duration, deadline)?;

        let sent = trafficgen.get_port_stats(TRAFFIC_PORT)?.result;
        let returned = trafficgen.get_port_stats(RETURN_PORT)?.result;
        let forwarded = testpmd.get_stats()?;
        let summary = forwarded[StatsIndex::Summary];
        debug!("testpmd counters: {forwarded:?}");

        Ok(Results {
            traffic_gen_sent_packets: sent.opackets,
            traffic_gen_output_error_packets: sent.oerrors,
            traffic_gen_input_error_packets: returned.ierrors,
            traffic_gen_max_drop_rate_bps: max_drop_rate,
            dpdk_rx_test_packets: summary.rx_total,
            dpdk_rx_dropped_packets: summary.rx_dropped,
            dpdk_tx_dropped_packets: summary.tx_dropped,
            ..Default::default()
        })
    }
}
