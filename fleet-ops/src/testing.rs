//! In-memory "Ec2Provider" that records every call, for unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    errors::{Error, Result, DRY_RUN_OPERATION_CODE},
    provider::{
        AttachRequest, Ec2Provider, FleetInstance, FleetRequest, FleetResponse,
        InstanceState, LaunchTemplateRequest, VolumeRequest,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateLaunchTemplate(String),
    /// (Id, name)
    DeleteLaunchTemplate(Option<String>, String),
    CreateFleet(usize),
    /// Zone of the created volume.
    CreateVolume(String),
    /// (volume Id, instance Id)
    AttachVolume(String, String),
    DescribeInstance(String),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    volumes: usize,
    fail_create_template: Option<Error>,
    fail_delete_template: Option<Error>,
    fail_create_fleet: Option<Error>,
    /// Fails the n-th (0-based) create_volume call.
    fail_create_volume_at: Option<(usize, Error)>,
    /// Fails attaches to this instance.
    fail_attach_instance: Option<(String, Error)>,
    /// Number of "pending" answers before an instance reports "running".
    pending_polls: usize,
    polls: HashMap<String, usize>,
}

#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<State>>,
}

pub fn dry_run_error() -> Error {
    Error::provider(
        DRY_RUN_OPERATION_CODE,
        "Request would have succeeded, but DryRun flag is set.",
    )
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn with_create_template_error(self, e: Error) -> Self {
        self.state.lock().unwrap().fail_create_template = Some(e);
        self
    }

    pub fn with_delete_template_error(self, e: Error) -> Self {
        self.state.lock().unwrap().fail_delete_template = Some(e);
        self
    }

    pub fn with_create_fleet_error(self, e: Error) -> Self {
        self.state.lock().unwrap().fail_create_fleet = Some(e);
        self
    }

    pub fn with_create_volume_error_at(self, n: usize, e: Error) -> Self {
        self.state.lock().unwrap().fail_create_volume_at = Some((n, e));
        self
    }

    pub fn with_attach_error(self, instance_id: &str, e: Error) -> Self {
        self.state.lock().unwrap().fail_attach_instance = Some((instance_id.to_string(), e));
        self
    }

    pub fn with_pending_polls(self, n: usize) -> Self {
        self.state.lock().unwrap().pending_polls = n;
        self
    }

    /// Returns (volume Id, instance Id) pairs in attach order.
    pub fn attachments(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AttachVolume(v, i) => Some((v, i)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| f(c)).count()
    }
}

#[async_trait]
impl Ec2Provider for MockProvider {
    async fn create_launch_template(&self, req: &LaunchTemplateRequest) -> Result<String> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::CreateLaunchTemplate(req.name.clone()));
        if req.dry_run {
            return Err(dry_run_error());
        }
        if let Some(e) = s.fail_create_template.clone() {
            return Err(e);
        }
        Ok(String::from("lt-0123456789"))
    }

    async fn delete_launch_template(
        &self,
        launch_template_id: Option<&str>,
        launch_template_name: &str,
        dry_run: bool,
    ) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::DeleteLaunchTemplate(
            launch_template_id.map(String::from),
            launch_template_name.to_string(),
        ));
        if dry_run {
            return Err(dry_run_error());
        }
        match s.fail_delete_template.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn create_fleet(&self, req: &FleetRequest) -> Result<FleetResponse> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::CreateFleet(req.total_target_capacity));
        if req.dry_run {
            return Err(dry_run_error());
        }
        if let Some(e) = s.fail_create_fleet.clone() {
            return Err(e);
        }
        let instances = req
            .overrides
            .iter()
            .enumerate()
            .map(|(i, o)| FleetInstance {
                instance_id: format!("i-{:04}", i),
                availability_zone: o.availability_zone.clone(),
            })
            .collect();
        Ok(FleetResponse {
            fleet_id: String::from("fleet-0123456789"),
            instances,
            errors: Vec::new(),
        })
    }

    async fn create_volume(&self, req: &VolumeRequest) -> Result<String> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::CreateVolume(req.availability_zone.clone()));
        if req.dry_run {
            return Err(dry_run_error());
        }
        let n = s.volumes;
        s.volumes += 1;
        if let Some((at, e)) = s.fail_create_volume_at.clone() {
            if at == n {
                return Err(e);
            }
        }
        Ok(format!("vol-{:04}", n))
    }

    async fn attach_volume(&self, req: &AttachRequest) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::AttachVolume(
            req.volume_id.clone(),
            req.instance_id.clone(),
        ));
        if req.dry_run {
            return Err(dry_run_error());
        }
        if let Some((id, e)) = s.fail_attach_instance.clone() {
            if id == req.instance_id {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn describe_instance_state(&self, instance_id: &str) -> Result<Option<InstanceState>> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::DescribeInstance(instance_id.to_string()));
        let pending_polls = s.pending_polls;
        let polled = s.polls.entry(instance_id.to_string()).or_insert(0);
        *polled += 1;
        if *polled <= pending_polls {
            return Ok(Some(InstanceState::Pending));
        }
        Ok(Some(InstanceState::Running))
    }
}
