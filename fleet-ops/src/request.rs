use serde::{Deserialize, Serialize};

use crate::{readiness::PollPolicy, volume::VolumeOptions};

/// Input of a single provisioning run, after flags/env/config resolution.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ProvisioningRequest {
    pub node_count: usize,
    /// None to skip volume provisioning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_size_gib: Option<u32>,

    /// One subnet per node.
    pub subnet_ids: Vec<String>,
    /// Applied to all instances via the launch template.
    pub security_group_ids: Vec<String>,
    /// One instance type per node.
    pub instance_types: Vec<String>,
    /// Instance type set in the launch template, overridden per node.
    pub default_instance_type: String,
    pub image_id: String,

    /// Share of the fleet capacity to launch as on-demand, in [0, 100].
    pub on_demand_percentage: u32,
    /// Zone A gets the first half of the nodes, zone B the rest.
    pub availability_zones: [String; 2],

    pub launch_template_name: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// Tunables of a provisioning run that are not part of the fleet shape.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ProvisionOptions {
    pub poll: PollPolicy,
    pub volume: VolumeOptions,
    /// Maximum number of instances waited on and attached at the same time.
    /// 1 processes instances strictly in fleet order.
    pub concurrency: usize,
}

pub const DEFAULT_CONCURRENCY: usize = 8;

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            volume: VolumeOptions::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}
