// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Test doubles for the DPDK checkup: an in-memory platform whose VM
//! consoles are served by scripted shells, and transcript builders for the
//! tools the checkup drives.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use checkup::config::{Config, NIC_PCI_ADDRESSES, VM_PASSWORD, VM_USERNAME};
use checkup::forwarder::TESTPMD_PROMPT;
use checkup::platform::{
    ExecOutput, Platform, PlatformError, VmCondition, VmInstance, AGENT_CONNECTED,
};
use checkup::status::{Reporter, Status};
use checkup::vm::{ConfigArtifact, VmSpec};
use expecter::ConsoleTransport;
use serde_json::{json, Value};
use stats_parser::PortStats;

pub const DEFAULT_NODE_NAME: &str = "fake-node-1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Session {
    LoginPrompt,
    Password,
    Shell,
    Testpmd,
}

struct GuestState {
    session: Session,
    login_prompt_shown: bool,
    pending_user: Option<String>,
}

/// A scripted serial console: getty, a bash-like shell and testpmd.
///
/// The state survives across console connections like a real serial
/// console does. Commands are echoed, answered from the replies registered
/// with [`ShellGuest::reply`] and followed by a prompt.
pub struct ShellGuest {
    hostname: String,
    username: String,
    password: String,
    state: Mutex<GuestState>,
    replies: Mutex<Vec<(String, String)>>,
    history: Mutex<Vec<String>>,
}

impl ShellGuest {
    fn new(hostname: &str, session: Session) -> Arc<Self> {
        Arc::new(ShellGuest {
            hostname: hostname.to_string(),
            username: VM_USERNAME.to_string(),
            password: VM_PASSWORD.to_string(),
            state: Mutex::new(GuestState {
                session,
                login_prompt_shown: false,
                pending_user: None,
            }),
            replies: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        })
    }

    /// A guest waiting at the login prompt.
    pub fn at_login_prompt(hostname: &str) -> Arc<Self> {
        Self::new(hostname, Session::LoginPrompt)
    }

    /// A guest with a shell already logged in.
    pub fn logged_in(hostname: &str) -> Arc<Self> {
        Self::new(hostname, Session::Shell)
    }

    /// Answers every command containing `key` with `output`. Later replies
    /// for the same key replace earlier ones.
    pub fn reply(&self, key: &str, output: &str) {
        let mut output = output.replace('\n', "\r\n");
        if !output.is_empty() && !output.ends_with('\n') {
            output.push_str("\r\n");
        }
        let mut replies = self.replies.lock().unwrap();
        replies.retain(|(k, _)| k != key);
        replies.push((key.to_string(), output));
    }

    /// Every line received so far, in order.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.history().iter().any(|line| line.contains(needle))
    }

    fn shell_prompt(&self) -> String {
        format!("[{}@{} ~]$ ", self.username, self.hostname)
    }

    fn reply_for(&self, line: &str) -> String {
        self.replies
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| line.contains(key.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default()
    }

    fn handle_line(&self, line: &str) -> String {
        self.history.lock().unwrap().push(line.to_string());
        let mut state = self.state.lock().unwrap();

        match state.session {
            Session::LoginPrompt if line.is_empty() => {
                if state.login_prompt_shown {
                    String::new()
                } else {
                    state.login_prompt_shown = true;
                    format!("\r\n{} login: ", self.hostname)
                }
            }
            Session::LoginPrompt => {
                state.login_prompt_shown = false;
                state.pending_user = Some(line.to_string());
                state.session = Session::Password;
                format!("{line}\r\nPassword: ")
            }
            Session::Password => {
                let user = state.pending_user.take();
                if user.as_deref() == Some(self.username.as_str()) && line == self.password {
                    state.session = Session::Shell;
                    format!("\r\n{}", self.shell_prompt())
                } else {
                    state.session = Session::LoginPrompt;
                    state.login_prompt_shown = true;
                    format!("\r\nLogin incorrect\r\n{} login: ", self.hostname)
                }
            }
            Session::Shell if line.contains("dpdk-testpmd") => {
                state.session = Session::Testpmd;
                format!(
                    "{line}\r\nEAL: Detected CPU lcores: 4\r\nPort 0: link up\r\nPort 1: link up\r\nDone\r\n{TESTPMD_PROMPT}"
                )
            }
            Session::Shell => {
                let output = if line == "echo $?" {
                    "0\r\n".to_string()
                } else {
                    self.reply_for(line)
                };
                format!("{line}\r\n{output}{}", self.shell_prompt())
            }
            Session::Testpmd => {
                format!("{line}\r\n{}{TESTPMD_PROMPT}", self.reply_for(line))
            }
        }
    }

    fn serve(&self, stream: UnixStream) {
        let Ok(mut writer) = stream.try_clone() else {
            return;
        };
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            let output = self.handle_line(line.trim_end_matches('\r'));
            if writer.write_all(output.as_bytes()).is_err() {
                break;
            }
        }
    }

    /// Serves one console connection on a background thread.
    pub fn attach(self: &Arc<Self>, stream: UnixStream) -> io::Result<()> {
        let guest = Arc::clone(self);
        thread::Builder::new()
            .name(format!("guest-{}", self.hostname))
            .spawn(move || guest.serve(stream))?;
        Ok(())
    }
}

/// Scripted `exec_in_container` replies, matched by substring of the
/// command line.
#[derive(Default)]
pub struct ScriptedExec {
    replies: Mutex<Vec<(String, ExecOutput)>>,
    commands: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExec {
    pub fn reply(&self, key: &str, stdout: &str) {
        self.replies.lock().unwrap().push((
            key.to_string(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        ));
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    fn exec(&self, argv: &[String]) -> Result<ExecOutput, PlatformError> {
        self.commands.lock().unwrap().push(argv.to_vec());
        let command = argv.join(" ");
        self.replies
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| command.contains(key.as_str()))
            .map(|(_, output)| output.clone())
            .ok_or_else(|| {
                PlatformError::Request(format!("command terminated with exit code 1: {command}"))
            })
    }
}

/// Platform operations failures can be injected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    CreateVm,
    GetVm,
    DeleteVm,
    CreateConfigArtifact,
    DeleteConfigArtifact,
    OpenConsole,
}

#[derive(Default)]
struct FakeState {
    vms: BTreeMap<String, VmInstance>,
    artifacts: BTreeMap<String, ConfigArtifact>,
    specs: Vec<VmSpec>,
    guests: Vec<(String, Arc<ShellGuest>)>,
    failures: Vec<(Operation, String)>,
    events: Vec<String>,
    unbootable: Vec<String>,
}

/// In-memory [`Platform`]. VMs boot instantly unless marked unbootable and
/// get deleted instantly.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
    pub exec: ScriptedExec,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves the console of every VM whose name starts with `prefix`.
    pub fn with_guest(self, prefix: &str, guest: Arc<ShellGuest>) -> Self {
        self.state
            .lock()
            .unwrap()
            .guests
            .push((prefix.to_string(), guest));
        self
    }

    /// Makes `operation` fail for every name starting with `prefix`.
    pub fn fail(&self, operation: Operation, prefix: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((operation, prefix.to_string()));
    }

    /// VMs whose name starts with `prefix` never report their agent as
    /// connected.
    pub fn never_boot(&self, prefix: &str) {
        self.state.lock().unwrap().unbootable.push(prefix.to_string());
    }

    /// Platform calls that changed state, e.g. `create_vm dpdk-vmi-abcde`.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn vm_names(&self) -> Vec<String> {
        self.state.lock().unwrap().vms.keys().cloned().collect()
    }

    pub fn config_artifact_names(&self) -> Vec<String> {
        self.state.lock().unwrap().artifacts.keys().cloned().collect()
    }

    pub fn config_artifact(&self, name: &str) -> Option<ConfigArtifact> {
        self.state.lock().unwrap().artifacts.get(name).cloned()
    }

    /// Specs of every VM created so far.
    pub fn created_specs(&self) -> Vec<VmSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    fn check(&self, operation: Operation, name: &str) -> Result<(), PlatformError> {
        let state = self.state.lock().unwrap();
        if state
            .failures
            .iter()
            .any(|(op, prefix)| *op == operation && name.starts_with(prefix.as_str()))
        {
            return Err(PlatformError::Request(format!(
                "injected {operation:?} failure for {name}"
            )));
        }
        Ok(())
    }
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> PlatformError {
    PlatformError::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

impl Platform for FakePlatform {
    fn create_vm(&self, spec: &VmSpec) -> Result<VmInstance, PlatformError> {
        self.check(Operation::CreateVm, &spec.name)?;
        let mut state = self.state.lock().unwrap();
        if state.vms.contains_key(&spec.name) {
            return Err(PlatformError::AlreadyExists {
                kind: "VirtualMachineInstance",
                namespace: spec.namespace.clone(),
                name: spec.name.clone(),
            });
        }

        let booted = !state
            .unbootable
            .iter()
            .any(|prefix| spec.name.starts_with(prefix.as_str()));
        let scheduled = VmInstance {
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
            node_name: Some(
                spec.node_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string()),
            ),
            conditions: vec![VmCondition {
                kind: AGENT_CONNECTED.to_string(),
                status: booted,
            }],
        };
        state.vms.insert(spec.name.clone(), scheduled);
        state.specs.push(spec.clone());
        state.events.push(format!("create_vm {}", spec.name));

        // Freshly created VMs are not scheduled yet.
        Ok(VmInstance {
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
            ..Default::default()
        })
    }

    fn get_vm(&self, namespace: &str, name: &str) -> Result<VmInstance, PlatformError> {
        self.check(Operation::GetVm, name)?;
        self.state
            .lock()
            .unwrap()
            .vms
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("VirtualMachineInstance", namespace, name))
    }

    fn delete_vm(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.check(Operation::DeleteVm, name)?;
        let mut state = self.state.lock().unwrap();
        state
            .vms
            .remove(name)
            .ok_or_else(|| not_found("VirtualMachineInstance", namespace, name))?;
        state.events.push(format!("delete_vm {name}"));
        Ok(())
    }

    fn create_config_artifact(&self, artifact: &ConfigArtifact) -> Result<(), PlatformError> {
        self.check(Operation::CreateConfigArtifact, &artifact.name)?;
        let mut state = self.state.lock().unwrap();
        state.artifacts.insert(artifact.name.clone(), artifact.clone());
        state
            .events
            .push(format!("create_config_artifact {}", artifact.name));
        Ok(())
    }

    fn delete_config_artifact(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.check(Operation::DeleteConfigArtifact, name)?;
        let mut state = self.state.lock().unwrap();
        state
            .artifacts
            .remove(name)
            .ok_or_else(|| not_found("ConfigMap", namespace, name))?;
        state.events.push(format!("delete_config_artifact {name}"));
        Ok(())
    }

    fn open_console(
        &self,
        namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn ConsoleTransport>, PlatformError> {
        self.check(Operation::OpenConsole, name)?;
        let guest = {
            let state = self.state.lock().unwrap();
            if !state.vms.contains_key(name) {
                return Err(not_found("VirtualMachineInstance", namespace, name));
            }
            state
                .guests
                .iter()
                .find(|(prefix, _)| name.starts_with(prefix.as_str()))
                .map(|(_, guest)| Arc::clone(guest))
                .ok_or_else(|| PlatformError::Request(format!("no console attached to {name}")))?
        };

        let (host, guest_end) = UnixStream::pair().map_err(PlatformError::Io)?;
        guest.attach(guest_end).map_err(PlatformError::Io)?;
        Ok(Box::new(host))
    }

    fn exec_in_container(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        argv: &[String],
    ) -> Result<ExecOutput, PlatformError> {
        self.exec.exec(argv)
    }
}

/// Keeps every reported status, shared between clones.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<Status>>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<Status> {
        self.reports.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn report(&mut self, status: &Status) -> checkup::Result<()> {
        self.reports.lock().unwrap().push(status.clone());
        Ok(())
    }
}

/// A configuration with a short test, suitable for fake guests.
pub fn test_config(namespace: &str) -> Config {
    let params = BTreeMap::from([
        ("spec.timeout".to_string(), "2m".to_string()),
        (
            "spec.param.networkAttachmentDefinitionName".to_string(),
            "dpdk-sriov-network".to_string(),
        ),
        ("spec.param.testDuration".to_string(), "1s".to_string()),
    ]);
    Config::from_params(namespace, &params).unwrap()
}

/// Renders `show fwd stats all` output for port 0, port 1 and the summary.
pub fn testpmd_stats_output(stats: [PortStats; 3]) -> String {
    let counters = |s: &PortStats| {
        format!(
            "  RX-packets: {:<14} RX-dropped: {:<14} RX-total: {}\n  TX-packets: {:<14} TX-dropped: {:<14} TX-total: {}\n",
            s.rx_packets, s.rx_dropped, s.rx_total, s.tx_packets, s.tx_dropped, s.tx_total
        )
    };
    let dashes = "-".repeat(76);
    format!(
        "\n  ---------------------- Forward statistics for port 0  ----------------------\n{}  {dashes}\n\n\
         \x20 ---------------------- Forward statistics for port 1  ----------------------\n{}  {dashes}\n\n\
         \x20 +++++++++++++++ Accumulated forward statistics for all ports+++++++++++++++\n{}  {}\n",
        counters(&stats[0]),
        counters(&stats[1]),
        counters(&stats[2]),
        "+".repeat(76),
    )
}

/// Renders a verbose trex-console transcript of one RPC call, color codes
/// included.
pub fn trex_console_output(method: &str, result: Value) -> String {
    let request = json!({"id": "fk3a9c2d", "jsonrpc": "2.0", "method": method, "params": {}});
    let response = json!({"id": "fk3a9c2d", "jsonrpc": "2.0", "result": result});
    let response = serde_json::to_string_pretty(&response)
        .unwrap()
        .replace(": 0,", ": \x1b[1m0\x1b[22m,");
    format!(
        "Using 'python3' as Python interpeter\n\n\
         Connecting to RPC server on localhost:4501                   [\x1b[32mSUCCESS\x1b[39m]\n\n\
         [verbose] Sending Request To Server:\n\n{}\n\n\
         [verbose] Server Response:\n\n{}\n\n",
        serde_json::to_string_pretty(&request).unwrap(),
        response,
    )
}

pub fn trex_global_stats_output(rx_drop_bps: f64) -> String {
    trex_console_output(
        "get_global_stats",
        json!({
            "m_active_flows": 0.0,
            "m_cpu_util": 4.5,
            "m_rx_bps": 0.0,
            "m_rx_cpu_util": 0.0,
            "m_rx_drop_bps": rx_drop_bps,
            "m_rx_pps": 0.0,
            "m_tx_bps": 0.0,
            "m_tx_pps": 0.0,
            "m_total_rx_bytes": 0,
            "m_total_rx_pkts": 0,
            "m_total_tx_bytes": 0,
            "m_total_tx_pkts": 0,
            "m_total_queue_full": 0,
        }),
    )
}

pub fn trex_port_stats_output(opackets: u64, oerrors: u64, ipackets: u64, ierrors: u64) -> String {
    trex_console_output(
        "get_port_stats",
        json!({
            "ibytes": ipackets * 64,
            "ierrors": ierrors,
            "ipackets": ipackets,
            "obytes": opackets * 64,
            "oerrors": oerrors,
            "opackets": opackets,
            "m_total_rx_bps": 0.0,
            "m_total_rx_pps": 0.0,
            "m_total_tx_bps": 0.0,
            "m_total_tx_pps": 0.0,
        }),
    )
}

/// Registers the replies of a healthy TRex server on `guest`.
pub fn script_traffic_gen(
    guest: &ShellGuest,
    sent: u64,
    oerrors: u64,
    ierrors: u64,
    rx_drop_bps: f64,
) {
    guest.reply("systemctl start", "");
    guest.reply("\\nhelp", "Console Commands:\n\n  clear      clear cached global and port stats");
    guest.reply("\\nstats -g", &trex_global_stats_output(rx_drop_bps));
    guest.reply("\\nstats --port 0", &trex_port_stats_output(sent, oerrors, 0, 0));
    guest.reply("\\nstats --port 1", &trex_port_stats_output(0, 0, sent, ierrors));
}

/// Registers testpmd replies reporting `received` packets on port 0 and
/// forwarded on port 1.
pub fn script_testpmd(guest: &ShellGuest, received: u64, rx_dropped: u64, tx_dropped: u64) {
    let port0 = PortStats {
        rx_packets: received - rx_dropped,
        rx_dropped,
        rx_total: received,
        ..Default::default()
    };
    let port1 = PortStats {
        tx_packets: received - rx_dropped,
        tx_dropped,
        tx_total: received - rx_dropped + tx_dropped,
        ..Default::default()
    };
    let summary = PortStats {
        rx_packets: port0.rx_packets,
        rx_dropped,
        rx_total: received,
        tx_packets: port1.tx_packets,
        tx_dropped,
        tx_total: port1.tx_total,
    };
    guest.reply("show fwd stats all", &testpmd_stats_output([port0, port1, summary]));
}

/// PCI addresses the fake guests expect testpmd to be started on.
pub fn testpmd_pci_arguments() -> String {
    format!("-a {} -a {}", NIC_PCI_ADDRESSES[0], NIC_PCI_ADDRESSES[1])
}
