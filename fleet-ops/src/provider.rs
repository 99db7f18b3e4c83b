//! Request/response shapes of the EC2 calls the provisioner makes,
//! and the client seam every operation takes as an injected handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Launch template parameters shared by every fleet instance.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct LaunchTemplateRequest {
    pub name: String,
    pub image_id: String,
    pub default_instance_type: String,
    pub security_group_ids: Vec<String>,
    pub dry_run: bool,
}

/// Per-instance placement override within the fleet request.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct FleetOverride {
    pub availability_zone: String,
    pub instance_type: String,
    pub subnet_id: String,
}

/// "instant" fleet request with diversified spot allocation.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct FleetRequest {
    pub launch_template_id: String,
    pub launch_template_version: String,
    pub overrides: Vec<FleetOverride>,
    pub total_target_capacity: usize,
    pub on_demand_target_capacity: usize,
    pub spot_target_capacity: usize,
    pub dry_run: bool,
}

/// One launched instance with the zone of the override that matched it.
/// Zone is empty if the response carried no override.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct FleetInstance {
    pub instance_id: String,
    pub availability_zone: String,
}

/// Capacity the provider could not fulfill in an "instant" fleet request.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct FleetError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub instance_type: String,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct FleetResponse {
    #[serde(default)]
    pub fleet_id: String,
    #[serde(default)]
    pub instances: Vec<FleetInstance>,
    #[serde(default)]
    pub errors: Vec<FleetError>,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct VolumeRequest {
    pub availability_zone: String,
    pub size_gib: u32,
    pub iops: u32,
    pub dry_run: bool,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct AttachRequest {
    pub volume_id: String,
    pub instance_id: String,
    pub device: String,
    pub dry_run: bool,
}

/// EC2 instance state names.
/// ref. https://docs.aws.amazon.com/AWSEC2/latest/APIReference/API_InstanceState.html
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown(String),
}

impl InstanceState {
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "shutting-down" => InstanceState::ShuttingDown,
            "terminated" => InstanceState::Terminated,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            other => InstanceState::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Unknown(s) => s.as_str(),
        }
    }
}

/// Compute API the provisioner drives. Implementations must populate
/// "Error::Provider::code" for every service error, so callers can match
/// the dry-run signal without inspecting SDK error types.
#[async_trait]
pub trait Ec2Provider: Send + Sync {
    /// Returns the launch template Id.
    async fn create_launch_template(&self, req: &LaunchTemplateRequest) -> Result<String>;

    /// Deletes by Id if given, otherwise by name.
    async fn delete_launch_template(
        &self,
        launch_template_id: Option<&str>,
        launch_template_name: &str,
        dry_run: bool,
    ) -> Result<()>;

    async fn create_fleet(&self, req: &FleetRequest) -> Result<FleetResponse>;

    /// Returns the volume Id.
    async fn create_volume(&self, req: &VolumeRequest) -> Result<String>;

    async fn attach_volume(&self, req: &AttachRequest) -> Result<()>;

    /// Returns None if the provider has no status for the instance yet.
    async fn describe_instance_state(&self, instance_id: &str) -> Result<Option<InstanceState>>;
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- provider::test_instance_state --exact --show-output
#[test]
fn test_instance_state() {
    for name in [
        "pending",
        "running",
        "shutting-down",
        "terminated",
        "stopping",
        "stopped",
    ] {
        assert_eq!(InstanceState::from_name(name).as_str(), name);
    }
    assert_eq!(
        InstanceState::from_name("rebooting"),
        InstanceState::Unknown(String::from("rebooting"))
    );
    assert_eq!(InstanceState::from_name("running"), InstanceState::Running);
}
