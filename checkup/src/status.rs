// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::{Error, Result};

/// Outcome of one traffic test.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub traffic_gen_sent_packets: u64,
    pub traffic_gen_output_error_packets: u64,
    pub traffic_gen_input_error_packets: u64,
    /// Highest receive drop rate seen by the generator, in bits per second.
    pub traffic_gen_max_drop_rate_bps: f64,
    pub dpdk_rx_test_packets: u64,
    pub dpdk_rx_dropped_packets: u64,
    pub dpdk_tx_dropped_packets: u64,
    pub vm_under_test_actual_node_name: String,
    pub traffic_gen_actual_node_name: String,
}

/// Returns one message per failed check, in a fixed order.
pub fn check_results(results: &Results) -> Vec<String> {
    let mut failures = Vec::new();

    if results.traffic_gen_sent_packets == 0 {
        failures.push("no packets were sent from the traffic generator".to_string());
    }

    if results.traffic_gen_output_error_packets != 0
        || results.traffic_gen_input_error_packets != 0
    {
        failures.push(format!(
            "detected error packets on the traffic generator's side: oerrors {} ierrors {}",
            results.traffic_gen_output_error_packets, results.traffic_gen_input_error_packets
        ));
    }

    if results.dpdk_rx_dropped_packets != 0 || results.dpdk_tx_dropped_packets != 0 {
        failures.push(format!(
            "detected packets dropped on the DPDK VM's side: RX: {}; TX: {}",
            results.dpdk_rx_dropped_packets, results.dpdk_tx_dropped_packets
        ));
    }

    if results.traffic_gen_sent_packets != results.dpdk_rx_test_packets {
        failures.push(format!(
            "not all generated packets had reached DPDK VM: Sent from traffic generator: {}; Received on DPDK VM: {}",
            results.traffic_gen_sent_packets, results.dpdk_rx_test_packets
        ));
    }

    failures
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Status {
    pub start_timestamp: Option<DateTime<Utc>>,
    pub completion_timestamp: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub failure_reasons: Vec<String>,
    pub results: Option<Results>,
}

fn timestamp(time: &Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

impl Status {
    /// Renders the status as flat `status.*` keys.
    pub fn to_data(&self) -> Result<BTreeMap<String, String>> {
        let mut data = BTreeMap::from([
            ("status.startTimestamp".to_string(), timestamp(&self.start_timestamp)),
            (
                "status.completionTimestamp".to_string(),
                timestamp(&self.completion_timestamp),
            ),
            ("status.succeeded".to_string(), self.succeeded.to_string()),
            ("status.failureReason".to_string(), self.failure_reasons.join(", ")),
        ]);

        // Completion keys only appear once the checkup has finished.
        if self.completion_timestamp.is_none() {
            data.remove("status.completionTimestamp");
            data.remove("status.succeeded");
        }

        if let Some(results) = &self.results {
            let fields = serde_json::to_value(results).map_err(Error::SerializeStatus)?;
            if let serde_json::Value::Object(fields) = fields {
                for (name, value) in fields {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        v => v.to_string(),
                    };
                    data.insert(format!("status.result.{name}"), value);
                }
            }
        }

        Ok(data)
    }
}

/// Persists checkup status.
pub trait Reporter {
    fn report(&mut self, status: &Status) -> Result<()>;
}

/// Writes the status map as a JSON object to a file.
pub struct FileReporter {
    path: PathBuf,
}

impl FileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileReporter { path: path.into() }
    }
}

impl Reporter for FileReporter {
    fn report(&mut self, status: &Status) -> Result<()> {
        let data = status.to_data()?;
        let json = serde_json::to_string_pretty(&data).map_err(Error::SerializeStatus)?;
        fs::write(&self.path, json)
            .map_err(|e| Error::WriteStatus(self.path.display().to_string(), e))
    }
}
