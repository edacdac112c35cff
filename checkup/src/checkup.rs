// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::{Duration, Instant};

use expecter::PROBE_TIMEOUT;

use crate::config::Config;
use crate::executor::Executor;
use crate::platform::{Platform, PlatformError, VmInstance};
use crate::poll::{poll_until, PollError};
use crate::status::{check_results, Results};
use crate::vm::{
    random_suffix, traffic_gen_config_artifact, traffic_gen_spec, vm_under_test_spec,
    ConfigArtifact, VmSpec,
};
use crate::{error_chain, Error, Result};

const VM_POLL_INTERVAL: Duration = Duration::from_secs(5);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(3 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckupState {
    Unstarted,
    SetupInProgress,
    Ready,
    Running,
    Completed,
    TornDown,
    Failed,
}

/// Setup, Run and Teardown of one DPDK checkup.
///
/// Every resource created is tracked until it is deleted, so a failed Setup
/// cleans up after itself and Teardown only touches what exists.
pub struct Checkup<'a, P: Platform + ?Sized> {
    platform: &'a P,
    config: Config,
    state: CheckupState,
    artifact: ConfigArtifact,
    vm_under_test_spec: VmSpec,
    traffic_gen_spec: VmSpec,
    artifact_created: bool,
    vm_under_test: Option<VmInstance>,
    traffic_gen: Option<VmInstance>,
    results: Results,
    pub vm_poll_interval: Duration,
    pub cleanup_timeout: Duration,
    pub login_probe_timeout: Duration,
}

impl<'a, P: Platform + ?Sized> Checkup<'a, P> {
    pub fn new(platform: &'a P, config: Config) -> Self {
        Self::with_suffix(platform, config, &random_suffix())
    }

    /// Like [`Checkup::new`] with a fixed suffix for resource names.
    pub fn with_suffix(platform: &'a P, config: Config, suffix: &str) -> Self {
        let artifact = traffic_gen_config_artifact(&config, suffix);
        let vm_under_test_spec = vm_under_test_spec(&config, suffix);
        let traffic_gen_spec = traffic_gen_spec(&config, suffix, &artifact.name);
        Checkup {
            platform,
            config,
            state: CheckupState::Unstarted,
            artifact,
            vm_under_test_spec,
            traffic_gen_spec,
            artifact_created: false,
            vm_under_test: None,
            traffic_gen: None,
            results: Results::default(),
            vm_poll_interval: VM_POLL_INTERVAL,
            cleanup_timeout: CLEANUP_TIMEOUT,
            login_probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn state(&self) -> CheckupState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn results(&self) -> &Results {
        &self.results
    }

    pub fn vm_under_test_name(&self) -> &str {
        &self.vm_under_test_spec.name
    }

    pub fn traffic_gen_name(&self) -> &str {
        &self.traffic_gen_spec.name
    }

    pub fn config_artifact_name(&self) -> &str {
        &self.artifact.name
    }

    /// True while any created resource has not been deleted.
    pub fn has_resources(&self) -> bool {
        self.artifact_created || self.vm_under_test.is_some() || self.traffic_gen.is_some()
    }

    fn expect_state(&self, expected: CheckupState, name: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                from: self.state,
                expected: name,
            });
        }
        Ok(())
    }

    /// Creates the config artifact and both VMs and waits for them to boot.
    pub fn setup(&mut self, deadline: Instant) -> Result<()> {
        self.expect_state(CheckupState::Unstarted, "Unstarted")?;
        self.state = CheckupState::SetupInProgress;

        match self.provision(deadline) {
            Ok(()) => {
                self.state = CheckupState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = CheckupState::Failed;
                error!("Setup failed: {}", error_chain(&e));
                self.compensate();
                Err(e)
            }
        }
    }

    fn provision(&mut self, deadline: Instant) -> Result<()> {
        let namespace = self.config.namespace.clone();

        info!("Creating config artifact {}/{}", namespace, self.artifact.name);
        self.platform
            .create_config_artifact(&self.artifact)
            .map_err(|e| Error::CreateConfigArtifact(self.artifact.name.clone(), e))?;
        self.artifact_created = true;

        info!("Creating VM {}/{}", namespace, self.vm_under_test_spec.name);
        let vm = self
            .platform
            .create_vm(&self.vm_under_test_spec)
            .map_err(|e| Error::CreateVm(self.vm_under_test_spec.name.clone(), e))?;
        self.vm_under_test = Some(vm);

        info!("Creating VM {}/{}", namespace, self.traffic_gen_spec.name);
        let vm = self
            .platform
            .create_vm(&self.traffic_gen_spec)
            .map_err(|e| Error::CreateVm(self.traffic_gen_spec.name.clone(), e))?;
        self.traffic_gen = Some(vm);

        let vm = self.wait_for_vm_boot(&self.vm_under_test_spec.name, deadline)?;
        self.vm_under_test = Some(vm);
        let vm = self.wait_for_vm_boot(&self.traffic_gen_spec.name, deadline)?;
        self.traffic_gen = Some(vm);

        Ok(())
    }

    /// Best effort removal of whatever Setup created. Failures are logged.
    fn compensate(&mut self) {
        let deadline = Instant::now() + self.cleanup_timeout;

        for vm in [self.traffic_gen.take(), self.vm_under_test.take()]
            .into_iter()
            .flatten()
        {
            info!("Cleaning up VM {}/{}", vm.namespace, vm.name);
            let removed = self
                .delete_vm(&vm.name)
                .and_then(|()| self.wait_for_vm_deletion(&vm.name, deadline));
            if let Err(e) = removed {
                warn!("Failed cleaning up VM {}: {}", vm.name, error_chain(&e));
            }
        }

        if self.artifact_created {
            self.artifact_created = false;
            info!("Cleaning up config artifact {}", self.artifact.name);
            if let Err(e) = self.delete_config_artifact() {
                warn!(
                    "Failed cleaning up config artifact {}: {}",
                    self.artifact.name,
                    error_chain(&e)
                );
            }
        }
    }

    /// Runs the traffic test. Results are kept even when their checks fail.
    pub fn run(&mut self, deadline: Instant) -> Result<()> {
        self.expect_state(CheckupState::Ready, "Ready")?;
        self.state = CheckupState::Running;

        let mut executor = Executor::new(
            self.platform,
            &self.config,
            &self.vm_under_test_spec.name,
            &self.traffic_gen_spec.name,
        );
        executor.login_probe_timeout = self.login_probe_timeout;
        let mut results = match executor.execute(deadline) {
            Ok(results) => results,
            Err(e) => {
                self.state = CheckupState::Failed;
                return Err(e);
            }
        };

        results.vm_under_test_actual_node_name = node_name(&self.vm_under_test);
        results.traffic_gen_actual_node_name = node_name(&self.traffic_gen);
        self.results = results;
        self.state = CheckupState::Completed;

        let failures = check_results(&self.results);
        if !failures.is_empty() {
            return Err(Error::ResultValidation(failures));
        }
        Ok(())
    }

    /// Deletes both VMs and the config artifact and waits for the VMs to be
    /// gone. Stops at the first failure.
    pub fn teardown(&mut self, deadline: Instant) -> Result<()> {
        match self.state {
            CheckupState::Ready | CheckupState::Completed | CheckupState::Failed => {}
            _ => {
                return Err(Error::InvalidState {
                    from: self.state,
                    expected: "Ready, Completed or Failed",
                })
            }
        }

        match self.remove_all(deadline) {
            Ok(()) => {
                self.state = CheckupState::TornDown;
                Ok(())
            }
            Err(e) => {
                self.state = CheckupState::Failed;
                Err(e)
            }
        }
    }

    fn remove_all(&mut self, deadline: Instant) -> Result<()> {
        let vms: Vec<String> = [&self.vm_under_test, &self.traffic_gen]
            .into_iter()
            .flatten()
            .map(|vm| vm.name.clone())
            .collect();

        for name in &vms {
            info!("Deleting VM {}/{}", self.config.namespace, name);
            self.delete_vm(name)?;
        }

        if self.artifact_created {
            info!(
                "Deleting config artifact {}/{}",
                self.config.namespace, self.artifact.name
            );
            self.delete_config_artifact()?;
            self.artifact_created = false;
        }

        for name in &vms {
            self.wait_for_vm_deletion(name, deadline)?;
        }
        self.vm_under_test = None;
        self.traffic_gen = None;

        Ok(())
    }

    /// Deletes a VM. A VM that is already gone counts as deleted.
    fn delete_vm(&self, name: &str) -> Result<()> {
        match self.platform.delete_vm(&self.config.namespace, name) {
            Err(e) if e.is_not_found() => {
                debug!("VM {name} already deleted");
                Ok(())
            }
            result => result.map_err(|e| Error::DeleteVm(name.to_string(), e)),
        }
    }

    fn delete_config_artifact(&self) -> Result<()> {
        match self
            .platform
            .delete_config_artifact(&self.config.namespace, &self.artifact.name)
        {
            Err(e) if e.is_not_found() => Ok(()),
            result => {
                result.map_err(|e| Error::DeleteConfigArtifact(self.artifact.name.clone(), e))
            }
        }
    }

    /// Polls the VM until its guest agent is connected and returns the last
    /// observed instance.
    fn wait_for_vm_boot(&self, name: &str, deadline: Instant) -> Result<VmInstance> {
        info!("Waiting for VM {name} to boot");
        let mut instance = None;
        let booted = poll_until(self.vm_poll_interval, deadline, || {
            let vm = self.platform.get_vm(&self.config.namespace, name)?;
            let connected = vm.is_agent_connected();
            instance = Some(vm);
            Ok::<bool, PlatformError>(connected)
        });

        match (booted, instance) {
            (Ok(()), Some(vm)) => {
                info!(
                    "VM {name} booted on node {}",
                    vm.node_name.as_deref().unwrap_or("<unknown>")
                );
                Ok(vm)
            }
            (Err(PollError::Condition(e)), _) => Err(Error::GetVm(name.to_string(), e)),
            _ => Err(Error::VmBootTimeout(name.to_string())),
        }
    }

    fn wait_for_vm_deletion(&self, name: &str, deadline: Instant) -> Result<()> {
        let gone = poll_until(self.vm_poll_interval, deadline, || {
            match self.platform.get_vm(&self.config.namespace, name) {
                Ok(_) => Ok(false),
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        });

        match gone {
            Ok(()) => {
                info!("VM {name} is deleted");
                Ok(())
            }
            Err(PollError::Condition(e)) => Err(Error::GetVm(name.to_string(), e)),
            Err(PollError::Timeout) => Err(Error::VmDeletionTimeout(name.to_string())),
        }
    }
}

fn node_name(vm: &Option<VmInstance>) -> String {
    vm.as_ref()
        .and_then(|vm| vm.node_name.clone())
        .unwrap_or_default()
}
