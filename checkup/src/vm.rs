// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{Config, NIC_PCI_ADDRESSES};

pub const VM_UNDER_TEST_NAME_PREFIX: &str = "dpdk-vmi";
pub const TRAFFIC_GEN_NAME_PREFIX: &str = "dpdk-traffic-gen";
pub const TRAFFIC_GEN_CONFIG_NAME_PREFIX: &str = "dpdk-traffic-gen-config";
pub const RUN_LABEL: &str = "kubevirt-dpdk-checkup/run";

pub const TREX_CONFIG_FILE: &str = "trex_cfg.yaml";
pub const TRAFFIC_PROFILE_FILE: &str = "testpmd.py";
/// Where the traffic generator VM installs the profile.
pub const TRAFFIC_PROFILE_PATH: &str = "/opt/tests/testpmd.py";
const ARTIFACT_MOUNT_POINT: &str = "/mnt/trex-config";
const ARTIFACT_DISK_SERIAL: &str = "DPDKCONFIG";

const EAST_INTERFACE: &str = "nic-east";
const WEST_INTERFACE: &str = "nic-west";

const TRAFFIC_PROFILE: &str = r#"from trex_stl_lib.api import *


class STLS1(object):
    def __init__(self):
        self.fsize = 64

    def create_stream(self, direction):
        size = self.fsize - 4
        if direction == 0:
            src, dst = "16.0.0.1", "48.0.0.1"
        else:
            src, dst = "48.0.0.1", "16.0.0.1"
        base_pkt = Ether() / IP(src=src, dst=dst) / UDP(dport=12, sport=1025)
        pad = max(0, size - len(base_pkt)) * "x"
        return STLStream(packet=STLPktBuilder(pkt=base_pkt / pad), mode=STLTXCont())

    def get_streams(self, direction=0, **kwargs):
        return [self.create_stream(direction)]


def register():
    return STLS1()
"#;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub network_attachment_definition_name: String,
    pub mac_address: String,
    /// Guest PCI address the NIC is plugged at.
    pub pci_address: String,
}

/// Everything needed to create one checkup VM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmSpec {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub node_name: Option<String>,
    pub cores: u32,
    pub memory: String,
    pub hugepages_page_size: String,
    pub dedicated_cpu_placement: bool,
    pub isolate_emulator_thread: bool,
    pub container_disk_image: String,
    pub interfaces: Vec<NetworkInterface>,
    /// Config artifact attached as a disk, if any.
    pub config_artifact: Option<String>,
    pub cloud_init_user_data: String,
    pub termination_grace_period: Duration,
}

impl Default for VmSpec {
    fn default() -> Self {
        VmSpec {
            namespace: String::new(),
            name: String::new(),
            labels: BTreeMap::new(),
            node_name: None,
            cores: 8,
            memory: "4Gi".to_string(),
            hugepages_page_size: "1Gi".to_string(),
            dedicated_cpu_placement: true,
            isolate_emulator_thread: true,
            container_disk_image: String::new(),
            interfaces: Vec::new(),
            config_artifact: None,
            cloud_init_user_data: String::new(),
            termination_grace_period: Duration::ZERO,
        }
    }
}

/// Key/value files shared with a VM.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigArtifact {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, String>,
}

/// Returns a short random suffix for the names of one checkup's resources.
pub fn random_suffix() -> String {
    let mut suffix = uuid::Uuid::new_v4().simple().to_string();
    suffix.truncate(5);
    suffix
}

fn interfaces(config: &Config, east_mac: &str, west_mac: &str) -> Vec<NetworkInterface> {
    [(EAST_INTERFACE, east_mac), (WEST_INTERFACE, west_mac)]
        .into_iter()
        .zip(NIC_PCI_ADDRESSES)
        .map(|((name, mac), pci)| NetworkInterface {
            name: name.to_string(),
            network_attachment_definition_name: config.network_attachment_definition_name.clone(),
            mac_address: mac.to_string(),
            pci_address: pci.to_string(),
        })
        .collect()
}

fn credentials(config: &Config) -> String {
    format!(
        "#cloud-config\nuser: {}\npassword: {}\nchpasswd:\n  expire: false\n",
        config.username, config.password
    )
}

pub fn vm_under_test_spec(config: &Config, suffix: &str) -> VmSpec {
    VmSpec {
        namespace: config.namespace.clone(),
        name: format!("{VM_UNDER_TEST_NAME_PREFIX}-{suffix}"),
        labels: BTreeMap::from([(RUN_LABEL.to_string(), suffix.to_string())]),
        node_name: config.vm_under_test_target_node_name.clone(),
        container_disk_image: config.vm_under_test_container_disk_image.clone(),
        interfaces: interfaces(
            config,
            &config.vm_under_test_east_mac_address,
            &config.vm_under_test_west_mac_address,
        ),
        cloud_init_user_data: credentials(config),
        ..Default::default()
    }
}

pub fn traffic_gen_spec(config: &Config, suffix: &str, artifact_name: &str) -> VmSpec {
    let mut cloud_init_user_data = credentials(config);
    cloud_init_user_data.push_str(&format!(
        "bootcmd:\n\
         \x20 - mkdir -p {ARTIFACT_MOUNT_POINT} /opt/tests\n\
         \x20 - mount /dev/disk/by-id/virtio-{ARTIFACT_DISK_SERIAL} {ARTIFACT_MOUNT_POINT}\n\
         \x20 - cp {ARTIFACT_MOUNT_POINT}/{TREX_CONFIG_FILE} /etc/{TREX_CONFIG_FILE}\n\
         \x20 - cp {ARTIFACT_MOUNT_POINT}/{TRAFFIC_PROFILE_FILE} {TRAFFIC_PROFILE_PATH}\n"
    ));

    VmSpec {
        namespace: config.namespace.clone(),
        name: format!("{TRAFFIC_GEN_NAME_PREFIX}-{suffix}"),
        labels: BTreeMap::from([(RUN_LABEL.to_string(), suffix.to_string())]),
        node_name: config.traffic_gen_target_node_name.clone(),
        container_disk_image: config.traffic_gen_container_disk_image.clone(),
        interfaces: interfaces(
            config,
            &config.traffic_gen_east_mac_address,
            &config.traffic_gen_west_mac_address,
        ),
        config_artifact: Some(artifact_name.to_string()),
        cloud_init_user_data,
        ..Default::default()
    }
}

/// Renders the TRex port configuration. Each generator port sends to the
/// VM under test NIC on the same side.
pub fn trex_config(config: &Config) -> String {
    let pci: Vec<&str> = NIC_PCI_ADDRESSES
        .iter()
        .map(|address| address.trim_start_matches("0000:"))
        .collect();
    format!(
        "- version: 2
  interfaces:
    - \"{}\"
    - \"{}\"
  port_limit: 2
  port_bandwidth_gb: {}
  platform:
    master_thread_id: 0
    latency_thread_id: 1
    dual_if:
      - socket: 0
        threads: [2, 3, 4, 5, 6, 7]
  port_info:
    - src_mac: {}
      dest_mac: {}
    - src_mac: {}
      dest_mac: {}
",
        pci[0],
        pci[1],
        config.port_bandwidth_gbps,
        config.traffic_gen_east_mac_address,
        config.vm_under_test_east_mac_address,
        config.traffic_gen_west_mac_address,
        config.vm_under_test_west_mac_address,
    )
}

pub fn traffic_gen_config_artifact(config: &Config, suffix: &str) -> ConfigArtifact {
    ConfigArtifact {
        namespace: config.namespace.clone(),
        name: format!("{TRAFFIC_GEN_CONFIG_NAME_PREFIX}-{suffix}"),
        data: BTreeMap::from([
            (TREX_CONFIG_FILE.to_string(), trex_config(config)),
            (TRAFFIC_PROFILE_FILE.to_string(), TRAFFIC_PROFILE.to_string()),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let params = BTreeMap::from([
            ("spec.timeout".to_string(), "10m".to_string()),
            (
                "spec.param.networkAttachmentDefinitionName".to_string(),
                "dpdk-net".to_string(),
            ),
            ("spec.param.trafficGenTargetNodeName".to_string(), "node-a".to_string()),
            ("spec.param.vmUnderTestTargetNodeName".to_string(), "node-b".to_string()),
        ]);
        Config::from_params("ns", &params).unwrap()
    }

    #[test]
    fn test_random_suffix() {
        let a = random_suffix();
        assert_eq!(a.len(), 5);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(a, random_suffix());
    }

    #[test]
    fn test_vm_under_test_spec() {
        let spec = vm_under_test_spec(&config(), "abcde");

        assert_eq!(spec.name, "dpdk-vmi-abcde");
        assert_eq!(spec.namespace, "ns");
        assert_eq!(spec.node_name.as_deref(), Some("node-b"));
        assert_eq!(spec.labels.get(RUN_LABEL).map(String::as_str), Some("abcde"));
        assert_eq!(spec.config_artifact, None);
        assert_eq!(spec.interfaces.len(), 2);
        assert_eq!(spec.interfaces[0].mac_address, "60:00:00:00:00:01");
        assert_eq!(spec.interfaces[0].pci_address, "0000:06:00.0");
        assert_eq!(spec.interfaces[1].mac_address, "60:00:00:00:00:02");
        assert_eq!(spec.interfaces[1].network_attachment_definition_name, "dpdk-net");
        assert!(spec.cloud_init_user_data.contains("user: cloud-user"));
    }

    #[test]
    fn test_traffic_gen_spec_mounts_artifact() {
        let spec = traffic_gen_spec(&config(), "abcde", "dpdk-traffic-gen-config-abcde");

        assert_eq!(spec.name, "dpdk-traffic-gen-abcde");
        assert_eq!(spec.node_name.as_deref(), Some("node-a"));
        assert_eq!(spec.config_artifact.as_deref(), Some("dpdk-traffic-gen-config-abcde"));
        assert_eq!(spec.interfaces[1].mac_address, "50:00:00:00:00:02");
        assert!(spec
            .cloud_init_user_data
            .contains("cp /mnt/trex-config/testpmd.py /opt/tests/testpmd.py"));
    }

    #[test]
    fn test_traffic_gen_config_artifact() {
        let artifact = traffic_gen_config_artifact(&config(), "abcde");

        assert_eq!(artifact.name, "dpdk-traffic-gen-config-abcde");
        let trex_cfg = &artifact.data[TREX_CONFIG_FILE];
        assert!(trex_cfg.contains("- \"06:00.0\""));
        assert!(trex_cfg.contains("port_bandwidth_gb: 10"));
        assert!(trex_cfg.contains("src_mac: 50:00:00:00:00:01\n      dest_mac: 60:00:00:00:00:01"));
        assert!(artifact.data[TRAFFIC_PROFILE_FILE].contains("def register()"));
    }
}
