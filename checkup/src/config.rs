// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

pub const TIMEOUT_KEY: &str = "spec.timeout";
pub const NETWORK_ATTACHMENT_DEFINITION_NAME_KEY: &str =
    "spec.param.networkAttachmentDefinitionName";
pub const TRAFFIC_GEN_CONTAINER_DISK_IMAGE_KEY: &str = "spec.param.trafficGenContainerDiskImage";
pub const TRAFFIC_GEN_TARGET_NODE_NAME_KEY: &str = "spec.param.trafficGenTargetNodeName";
pub const TRAFFIC_GEN_PACKETS_PER_SECOND_KEY: &str = "spec.param.trafficGenPacketsPerSecond";
pub const VM_UNDER_TEST_CONTAINER_DISK_IMAGE_KEY: &str =
    "spec.param.vmUnderTestContainerDiskImage";
pub const VM_UNDER_TEST_TARGET_NODE_NAME_KEY: &str = "spec.param.vmUnderTestTargetNodeName";
pub const TEST_DURATION_KEY: &str = "spec.param.testDuration";
pub const PORT_BANDWIDTH_GBPS_KEY: &str = "spec.param.portBandwidthGbps";
pub const VERBOSE_KEY: &str = "spec.param.verbose";
pub const TRAFFIC_GEN_EAST_MAC_ADDRESS_KEY: &str = "spec.param.trafficGenEastMacAddress";
pub const TRAFFIC_GEN_WEST_MAC_ADDRESS_KEY: &str = "spec.param.trafficGenWestMacAddress";
pub const VM_UNDER_TEST_EAST_MAC_ADDRESS_KEY: &str = "spec.param.vmUnderTestEastMacAddress";
pub const VM_UNDER_TEST_WEST_MAC_ADDRESS_KEY: &str = "spec.param.vmUnderTestWestMacAddress";

pub const DEFAULT_TRAFFIC_GEN_CONTAINER_DISK_IMAGE: &str =
    "quay.io/kiagnose/kubevirt-dpdk-checkup-traffic-gen:main";
pub const DEFAULT_VM_UNDER_TEST_CONTAINER_DISK_IMAGE: &str =
    "quay.io/kiagnose/kubevirt-dpdk-checkup-vm:main";
pub const DEFAULT_TRAFFIC_GEN_PACKETS_PER_SECOND: &str = "8m";
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PORT_BANDWIDTH_GBPS: u32 = 10;
pub const DEFAULT_TRAFFIC_GEN_EAST_MAC_ADDRESS: &str = "50:00:00:00:00:01";
pub const DEFAULT_TRAFFIC_GEN_WEST_MAC_ADDRESS: &str = "50:00:00:00:00:02";
pub const DEFAULT_VM_UNDER_TEST_EAST_MAC_ADDRESS: &str = "60:00:00:00:00:01";
pub const DEFAULT_VM_UNDER_TEST_WEST_MAC_ADDRESS: &str = "60:00:00:00:00:02";

pub const VM_USERNAME: &str = "cloud-user";
pub const VM_PASSWORD: &str = "0tli-pxem-xknu";
/// Guest PCI addresses of the east and west data plane NICs.
pub const NIC_PCI_ADDRESSES: [&str; 2] = ["0000:06:00.0", "0000:07:00.0"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required parameter {0}")]
    MissingParam(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidParam {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} and {1} must be set together")]
    IncompleteNodePair(&'static str, &'static str),
}

/// Checkup parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub namespace: String,
    pub timeout: Duration,
    pub network_attachment_definition_name: String,
    pub traffic_gen_container_disk_image: String,
    pub traffic_gen_target_node_name: Option<String>,
    pub traffic_gen_packets_per_second: String,
    pub vm_under_test_container_disk_image: String,
    pub vm_under_test_target_node_name: Option<String>,
    pub test_duration: Duration,
    pub port_bandwidth_gbps: u32,
    pub verbose: bool,
    pub traffic_gen_east_mac_address: String,
    pub traffic_gen_west_mac_address: String,
    pub vm_under_test_east_mac_address: String,
    pub vm_under_test_west_mac_address: String,
    pub username: String,
    pub password: String,
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidParam {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

static PACKETS_PER_SECOND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+[km]?$").expect("packets per second pattern is valid"));

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC address pattern is valid")
});

fn is_packets_per_second(value: &str) -> bool {
    PACKETS_PER_SECOND.is_match(value)
}

fn is_mac_address(value: &str) -> bool {
    MAC_ADDRESS.is_match(value)
}

struct Params<'a>(&'a BTreeMap<String, String>);

impl Params<'_> {
    fn get(&self, key: &'static str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingParam(key))
    }

    fn string(&self, key: &'static str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn duration(
        &self,
        key: &'static str,
        default: Option<Duration>,
    ) -> Result<Duration, ConfigError> {
        let value = match (self.get(key), default) {
            (Some(value), _) => value,
            (None, Some(default)) => return Ok(default),
            (None, None) => return Err(ConfigError::MissingParam(key)),
        };
        let duration = humantime::parse_duration(value).map_err(|e| invalid(key, value, e))?;
        if duration.is_zero() {
            return Err(invalid(key, value, "must be positive"));
        }
        Ok(duration)
    }

    fn mac_address(&self, key: &'static str, default: &str) -> Result<String, ConfigError> {
        let value = self.get(key).unwrap_or(default);
        if !is_mac_address(value) {
            return Err(invalid(key, value, "not a MAC address"));
        }
        Ok(value.to_string())
    }
}

impl Config {
    /// Builds the configuration of a checkup running in `namespace` from its
    /// flat parameter map.
    pub fn from_params(
        namespace: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let params = Params(params);

        let traffic_gen_target_node_name = params
            .get(TRAFFIC_GEN_TARGET_NODE_NAME_KEY)
            .map(str::to_string);
        let vm_under_test_target_node_name = params
            .get(VM_UNDER_TEST_TARGET_NODE_NAME_KEY)
            .map(str::to_string);
        if traffic_gen_target_node_name.is_some() != vm_under_test_target_node_name.is_some() {
            return Err(ConfigError::IncompleteNodePair(
                TRAFFIC_GEN_TARGET_NODE_NAME_KEY,
                VM_UNDER_TEST_TARGET_NODE_NAME_KEY,
            ));
        }

        let traffic_gen_packets_per_second = params.string(
            TRAFFIC_GEN_PACKETS_PER_SECOND_KEY,
            DEFAULT_TRAFFIC_GEN_PACKETS_PER_SECOND,
        );
        if !is_packets_per_second(&traffic_gen_packets_per_second) {
            return Err(invalid(
                TRAFFIC_GEN_PACKETS_PER_SECOND_KEY,
                &traffic_gen_packets_per_second,
                "expected a number optionally followed by k or m",
            ));
        }

        let port_bandwidth_gbps = match params.get(PORT_BANDWIDTH_GBPS_KEY) {
            None => DEFAULT_PORT_BANDWIDTH_GBPS,
            Some(value) => match value.parse::<u32>() {
                Ok(0) => return Err(invalid(PORT_BANDWIDTH_GBPS_KEY, value, "must be positive")),
                Ok(bandwidth) => bandwidth,
                Err(e) => return Err(invalid(PORT_BANDWIDTH_GBPS_KEY, value, e)),
            },
        };

        let verbose = match params.get(VERBOSE_KEY) {
            None => false,
            Some(value) => value
                .parse::<bool>()
                .map_err(|e| invalid(VERBOSE_KEY, value, e))?,
        };

        Ok(Config {
            namespace: namespace.to_string(),
            timeout: params.duration(TIMEOUT_KEY, None)?,
            network_attachment_definition_name: params
                .required(NETWORK_ATTACHMENT_DEFINITION_NAME_KEY)?
                .to_string(),
            traffic_gen_container_disk_image: params.string(
                TRAFFIC_GEN_CONTAINER_DISK_IMAGE_KEY,
                DEFAULT_TRAFFIC_GEN_CONTAINER_DISK_IMAGE,
            ),
            traffic_gen_target_node_name,
            traffic_gen_packets_per_second,
            vm_under_test_container_disk_image: params.string(
                VM_UNDER_TEST_CONTAINER_DISK_IMAGE_KEY,
                DEFAULT_VM_UNDER_TEST_CONTAINER_DISK_IMAGE,
            ),
            vm_under_test_target_node_name,
            test_duration: params.duration(TEST_DURATION_KEY, Some(DEFAULT_TEST_DURATION))?,
            port_bandwidth_gbps,
            verbose,
            traffic_gen_east_mac_address: params.mac_address(
                TRAFFIC_GEN_EAST_MAC_ADDRESS_KEY,
                DEFAULT_TRAFFIC_GEN_EAST_MAC_ADDRESS,
            )?,
            traffic_gen_west_mac_address: params.mac_address(
                TRAFFIC_GEN_WEST_MAC_ADDRESS_KEY,
                DEFAULT_TRAFFIC_GEN_WEST_MAC_ADDRESS,
            )?,
            vm_under_test_east_mac_address: params.mac_address(
                VM_UNDER_TEST_EAST_MAC_ADDRESS_KEY,
                DEFAULT_VM_UNDER_TEST_EAST_MAC_ADDRESS,
            )?,
            vm_under_test_west_mac_address: params.mac_address(
                VM_UNDER_TEST_WEST_MAC_ADDRESS_KEY,
                DEFAULT_VM_UNDER_TEST_WEST_MAC_ADDRESS,
            )?,
            username: VM_USERNAME.to_string(),
            password: VM_PASSWORD.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(extra: &[(&str, &str)]) -> BTreeMap<String, String> {
        let mut params = BTreeMap::from([
            (TIMEOUT_KEY.to_string(), "15m".to_string()),
            (
                NETWORK_ATTACHMENT_DEFINITION_NAME_KEY.to_string(),
                "intel-dpdk-network".to_string(),
            ),
        ]);
        for (key, value) in extra {
            params.insert(key.to_string(), value.to_string());
        }
        params
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_params("dpdk-checkup-ns", &params(&[])).unwrap();

        assert_eq!(config.namespace, "dpdk-checkup-ns");
        assert_eq!(config.timeout, Duration::from_secs(15 * 60));
        assert_eq!(config.network_attachment_definition_name, "intel-dpdk-network");
        assert_eq!(
            config.traffic_gen_container_disk_image,
            DEFAULT_TRAFFIC_GEN_CONTAINER_DISK_IMAGE
        );
        assert_eq!(
            config.vm_under_test_container_disk_image,
            DEFAULT_VM_UNDER_TEST_CONTAINER_DISK_IMAGE
        );
        assert_eq!(config.traffic_gen_target_node_name, None);
        assert_eq!(config.traffic_gen_packets_per_second, "8m");
        assert_eq!(config.test_duration, DEFAULT_TEST_DURATION);
        assert_eq!(config.port_bandwidth_gbps, 10);
        assert!(!config.verbose);
        assert_eq!(config.traffic_gen_east_mac_address, "50:00:00:00:00:01");
        assert_eq!(config.vm_under_test_west_mac_address, "60:00:00:00:00:02");
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_params(
            "ns",
            &params(&[
                (TRAFFIC_GEN_TARGET_NODE_NAME_KEY, "worker-1"),
                (VM_UNDER_TEST_TARGET_NODE_NAME_KEY, "worker-2"),
                (TRAFFIC_GEN_PACKETS_PER_SECOND_KEY, "500k"),
                (TEST_DURATION_KEY, "1m 30s"),
                (PORT_BANDWIDTH_GBPS_KEY, "25"),
                (VERBOSE_KEY, "true"),
                (TRAFFIC_GEN_EAST_MAC_ADDRESS_KEY, "aa:bb:cc:dd:ee:ff"),
            ]),
        )
        .unwrap();

        assert_eq!(config.traffic_gen_target_node_name.as_deref(), Some("worker-1"));
        assert_eq!(config.vm_under_test_target_node_name.as_deref(), Some("worker-2"));
        assert_eq!(config.traffic_gen_packets_per_second, "500k");
        assert_eq!(config.test_duration, Duration::from_secs(90));
        assert_eq!(config.port_bandwidth_gbps, 25);
        assert!(config.verbose);
        assert_eq!(config.traffic_gen_east_mac_address, "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_config_missing_required() {
        let mut missing_timeout = params(&[]);
        missing_timeout.remove(TIMEOUT_KEY);
        assert_eq!(
            Config::from_params("ns", &missing_timeout),
            Err(ConfigError::MissingParam(TIMEOUT_KEY))
        );

        let mut missing_network = params(&[]);
        missing_network.insert(NETWORK_ATTACHMENT_DEFINITION_NAME_KEY.to_string(), " ".to_string());
        assert_eq!(
            Config::from_params("ns", &missing_network),
            Err(ConfigError::MissingParam(NETWORK_ATTACHMENT_DEFINITION_NAME_KEY))
        );
    }

    #[test]
    fn test_config_invalid_values() {
        for (key, value) in [
            (TIMEOUT_KEY, "soon"),
            (TEST_DURATION_KEY, "0s"),
            (TRAFFIC_GEN_PACKETS_PER_SECOND_KEY, "8g"),
            (TRAFFIC_GEN_PACKETS_PER_SECOND_KEY, "m"),
            (PORT_BANDWIDTH_GBPS_KEY, "0"),
            (PORT_BANDWIDTH_GBPS_KEY, "-1"),
            (VERBOSE_KEY, "yes"),
            (VM_UNDER_TEST_EAST_MAC_ADDRESS_KEY, "60:00:00:00:01"),
            (VM_UNDER_TEST_EAST_MAC_ADDRESS_KEY, "60:00:00:00:00:0g"),
        ] {
            let err = Config::from_params("ns", &params(&[(key, value)])).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidParam { key: k, .. } if k == key),
                "{key}={value}: {err:?}"
            );
        }
    }

    #[test]
    fn test_value_patterns() {
        for value in ["8m", "100k", "1500"] {
            assert!(is_packets_per_second(value), "{value}");
        }
        for value in ["", "k", "8M", "1.5m", "8mm", "８m"] {
            assert!(!is_packets_per_second(value), "{value}");
        }

        assert!(is_mac_address("50:00:00:00:00:01"));
        assert!(is_mac_address("aa:BB:cc:DD:ee:FF"));
        for value in [
            "50:00:00:00:00",
            "50-00-00-00-00-01",
            "50:00:00:00:00:01:02",
            "500:0:00:00:00:01",
        ] {
            assert!(!is_mac_address(value), "{value}");
        }
    }

    #[test]
    fn test_config_node_names_together() {
        let params = params(&[(TRAFFIC_GEN_TARGET_NODE_NAME_KEY, "worker-1")]);
        let err = Config::from_params("ns", &params).unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteNodePair(..)));
    }
}
