// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::json::extract_json;
use crate::{Error, Result};

pub const GLOBAL_STATS_METHOD: &str = "get_global_stats";
pub const PORT_STATS_METHOD: &str = "get_port_stats";

/// JSON-RPC reply envelope of the TRex server.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RpcReply<T> {
    pub id: String,
    pub jsonrpc: String,
    pub result: T,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GlobalStatsResult {
    #[serde(rename = "m_active_flows")]
    pub active_flows: f64,
    #[serde(rename = "m_cpu_util")]
    pub cpu_util: f64,
    #[serde(rename = "m_rx_bps")]
    pub rx_bps: f64,
    #[serde(rename = "m_rx_cpu_util")]
    pub rx_cpu_util: f64,
    #[serde(rename = "m_rx_drop_bps")]
    pub rx_drop_bps: f64,
    #[serde(rename = "m_rx_pps")]
    pub rx_pps: f64,
    #[serde(rename = "m_tx_bps")]
    pub tx_bps: f64,
    #[serde(rename = "m_tx_pps")]
    pub tx_pps: f64,
    #[serde(rename = "m_total_rx_bytes")]
    pub total_rx_bytes: u64,
    #[serde(rename = "m_total_rx_pkts")]
    pub total_rx_pkts: u64,
    #[serde(rename = "m_total_tx_bytes")]
    pub total_tx_bytes: u64,
    #[serde(rename = "m_total_tx_pkts")]
    pub total_tx_pkts: u64,
    #[serde(rename = "m_total_queue_full")]
    pub total_queue_full: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PortStatsResult {
    pub ibytes: u64,
    pub ierrors: u64,
    pub ipackets: u64,
    pub obytes: u64,
    pub oerrors: u64,
    pub opackets: u64,
    #[serde(rename = "m_total_rx_bps")]
    pub rx_bps: f64,
    #[serde(rename = "m_total_rx_pps")]
    pub rx_pps: f64,
    #[serde(rename = "m_total_tx_bps")]
    pub tx_bps: f64,
    #[serde(rename = "m_total_tx_pps")]
    pub tx_pps: f64,
}

pub type GlobalStats = RpcReply<GlobalStatsResult>;
pub type GeneratorPortStats = RpcReply<PortStatsResult>;

fn decode<T: DeserializeOwned>(text: &str, method: &str) -> Result<T> {
    let body = extract_json(text, method)?;
    serde_json::from_str(&body).map_err(|source| Error::Decode {
        method: method.to_string(),
        source,
    })
}

pub fn parse_global_stats(text: &str) -> Result<GlobalStats> {
    decode(text, GLOBAL_STATS_METHOD)
}

pub fn parse_port_stats(text: &str) -> Result<GeneratorPortStats> {
    decode(text, PORT_STATS_METHOD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(method: &str, response: &str) -> String {
        format!(
            "Using 'python3' as Python interpeter\r\n\r\n\
             [verbose] Sending Request To Server:\r\n\r\n\
             {{\"id\": \"r1\", \"jsonrpc\": \"2.0\", \"method\": \"{method}\"}}\r\n\r\n\
             [verbose] Server Response:\r\n\r\n{response}\r\n\r\ntrex>"
        )
    }

    #[test]
    fn test_parse_global_stats() {
        let response = "{\"id\": \"r1\", \"jsonrpc\": \"2.0\", \"result\": {\
            \"m_active_flows\": 0.0, \"m_cpu_util\": 12.5, \"m_rx_bps\": 1.0e9,\
            \"m_rx_cpu_util\": 0.0, \"m_rx_drop_bps\": \x1b[31m1024.5\x1b[0m, \"m_rx_pps\": 8000000.0,\
            \"m_tx_bps\": 1.0e9, \"m_tx_pps\": 8000000.0, \"m_total_rx_bytes\": 64000,\
            \"m_total_rx_pkts\": 1000, \"m_total_tx_bytes\": 64000, \"m_total_tx_pkts\": 1000,\
            \"m_total_queue_full\": 0, \"m_bw_per_core\": 9.1}}";
        let stats = parse_global_stats(&transcript(GLOBAL_STATS_METHOD, response)).unwrap();

        assert_eq!(stats.id, "r1");
        assert_eq!(stats.jsonrpc, "2.0");
        assert_eq!(stats.result.rx_drop_bps, 1024.5);
        assert_eq!(stats.result.total_tx_pkts, 1000);
    }

    #[test]
    fn test_parse_port_stats() {
        let response = "{\"id\": \"r1\", \"jsonrpc\": \"2.0\", \"result\": {\
            \"ibytes\": 640, \"ierrors\": 1, \"ipackets\": 10, \"obytes\": 640,\
            \"oerrors\": 2, \"opackets\": 10, \"m_total_rx_bps\": 0.0,\
            \"m_total_rx_pps\": 0.0, \"m_total_tx_bps\": 0.0, \"m_total_tx_pps\": 0.0}}";
        let stats = parse_port_stats(&transcript(PORT_STATS_METHOD, response)).unwrap();

        assert_eq!(stats.result.opackets, 10);
        assert_eq!(stats.result.oerrors, 2);
        assert_eq!(stats.result.ierrors, 1);
    }

    #[test]
    fn test_parse_stats_missing_counter() {
        let response = "{\"id\": \"r1\", \"jsonrpc\": \"2.0\", \"result\": {\"opackets\": 10}}";
        let err = parse_port_stats(&transcript(PORT_STATS_METHOD, response)).unwrap_err();
        assert!(matches!(err, Error::Decode { ref method, .. } if method == PORT_STATS_METHOD));
    }

    #[test]
    fn test_parse_stats_wrong_request() {
        let err = parse_port_stats(&transcript(GLOBAL_STATS_METHOD, "{}")).unwrap_err();
        assert!(matches!(err, Error::RequestNotFound(_)));
    }
}
