//! "Ec2Provider" backed by the AWS EC2 API.

use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_ec2::{
    error::{ProvideErrorMetadata, SdkError},
    types::{
        DefaultTargetCapacityType, FleetLaunchTemplateConfigRequest,
        FleetLaunchTemplateOverridesRequest, FleetLaunchTemplateSpecificationRequest, FleetType,
        InstanceType, RequestLaunchTemplateData, SpotAllocationStrategy, SpotOptionsRequest,
        TargetCapacitySpecificationRequest, VolumeType,
    },
    Client,
};
use tokio::time::Duration;

use crate::{
    errors::{Error, Result},
    provider::{
        AttachRequest, Ec2Provider, FleetError, FleetInstance, FleetRequest, FleetResponse,
        InstanceState, LaunchTemplateRequest, VolumeRequest,
    },
};

/// Implements AWS EC2 manager.
#[derive(Debug, Clone)]
pub struct Manager {
    pub region: String,
    cli: Client,
}

impl Manager {
    pub fn new(cli: Client, region: &str) -> Self {
        Self {
            region: region.to_string(),
            cli,
        }
    }

    /// Loads the AWS config from the local environment for the region.
    pub async fn load(region: &str) -> Self {
        log::info!("loading AWS configuration for region '{}'", region);
        let shared_config =
            aws_manager::load_config(Some(region.to_string()), None, Some(Duration::from_secs(30)))
                .await;
        Self::new(Client::new(&shared_config), region)
    }
}

#[async_trait]
impl Ec2Provider for Manager {
    async fn create_launch_template(&self, req: &LaunchTemplateRequest) -> Result<String> {
        let data = RequestLaunchTemplateData::builder()
            .image_id(&req.image_id)
            .instance_type(InstanceType::from(req.default_instance_type.as_str()))
            .set_security_group_ids(Some(req.security_group_ids.clone()))
            .build();
        let resp = self
            .cli
            .create_launch_template()
            .launch_template_name(&req.name)
            .launch_template_data(data)
            .dry_run(req.dry_run)
            .send()
            .await
            .map_err(|e| api_error("create_launch_template", &e))?;

        match resp.launch_template.and_then(|lt| lt.launch_template_id) {
            Some(id) => Ok(id),
            None => Err(Error::Other {
                message: String::from("empty launch template Id from create_launch_template"),
            }),
        }
    }

    async fn delete_launch_template(
        &self,
        launch_template_id: Option<&str>,
        launch_template_name: &str,
        dry_run: bool,
    ) -> Result<()> {
        // EC2 rejects requests that set both Id and name
        let builder = self.cli.delete_launch_template().dry_run(dry_run);
        let builder = match launch_template_id {
            Some(id) => builder.launch_template_id(id),
            None => builder.launch_template_name(launch_template_name),
        };
        builder
            .send()
            .await
            .map_err(|e| api_error("delete_launch_template", &e))?;
        Ok(())
    }

    async fn create_fleet(&self, req: &FleetRequest) -> Result<FleetResponse> {
        let overrides = req
            .overrides
            .iter()
            .map(|o| {
                FleetLaunchTemplateOverridesRequest::builder()
                    .availability_zone(&o.availability_zone)
                    .instance_type(InstanceType::from(o.instance_type.as_str()))
                    .subnet_id(&o.subnet_id)
                    .build()
            })
            .collect();
        let config = FleetLaunchTemplateConfigRequest::builder()
            .launch_template_specification(
                FleetLaunchTemplateSpecificationRequest::builder()
                    .launch_template_id(&req.launch_template_id)
                    .version(&req.launch_template_version)
                    .build(),
            )
            .set_overrides(Some(overrides))
            .build();
        let capacity = TargetCapacitySpecificationRequest::builder()
            .total_target_capacity(req.total_target_capacity as i32)
            .on_demand_target_capacity(req.on_demand_target_capacity as i32)
            .spot_target_capacity(req.spot_target_capacity as i32)
            .default_target_capacity_type(DefaultTargetCapacityType::Spot)
            .build();

        let resp = self
            .cli
            .create_fleet()
            .r#type(FleetType::Instant)
            .launch_template_configs(config)
            .target_capacity_specification(capacity)
            .spot_options(
                SpotOptionsRequest::builder()
                    .allocation_strategy(SpotAllocationStrategy::Diversified)
                    .build(),
            )
            .dry_run(req.dry_run)
            .send()
            .await
            .map_err(|e| api_error("create_fleet", &e))?;

        let mut instances = Vec::new();
        for launched in resp.instances.unwrap_or_default() {
            let availability_zone = launched
                .launch_template_and_overrides
                .and_then(|lo| lo.overrides)
                .and_then(|o| o.availability_zone)
                .unwrap_or_default();
            for instance_id in launched.instance_ids.unwrap_or_default() {
                instances.push(FleetInstance {
                    instance_id,
                    availability_zone: availability_zone.clone(),
                });
            }
        }

        let mut errors = Vec::new();
        for e in resp.errors.unwrap_or_default() {
            let overrides = e.launch_template_and_overrides.and_then(|lo| lo.overrides);
            let (availability_zone, instance_type) = match overrides {
                Some(o) => (
                    o.availability_zone.unwrap_or_default(),
                    o.instance_type
                        .map(|t| t.as_str().to_string())
                        .unwrap_or_default(),
                ),
                None => (String::new(), String::new()),
            };
            errors.push(FleetError {
                code: e.error_code.unwrap_or_default(),
                message: e.error_message.unwrap_or_default(),
                availability_zone,
                instance_type,
            });
        }

        Ok(FleetResponse {
            fleet_id: resp.fleet_id.unwrap_or_default(),
            instances,
            errors,
        })
    }

    async fn create_volume(&self, req: &VolumeRequest) -> Result<String> {
        let resp = self
            .cli
            .create_volume()
            .availability_zone(&req.availability_zone)
            .size(req.size_gib as i32)
            .volume_type(VolumeType::Io2)
            .iops(req.iops as i32)
            .multi_attach_enabled(true)
            .dry_run(req.dry_run)
            .send()
            .await
            .map_err(|e| api_error("create_volume", &e))?;

        match resp.volume_id {
            Some(id) => Ok(id),
            None => Err(Error::Other {
                message: String::from("empty volume Id from create_volume"),
            }),
        }
    }

    async fn attach_volume(&self, req: &AttachRequest) -> Result<()> {
        self.cli
            .attach_volume()
            .device(&req.device)
            .instance_id(&req.instance_id)
            .volume_id(&req.volume_id)
            .dry_run(req.dry_run)
            .send()
            .await
            .map_err(|e| api_error("attach_volume", &e))?;
        Ok(())
    }

    async fn describe_instance_state(&self, instance_id: &str) -> Result<Option<InstanceState>> {
        let resp = self
            .cli
            .describe_instance_status()
            .instance_ids(instance_id)
            .include_all_instances(true)
            .send()
            .await
            .map_err(|e| api_error("describe_instance_status", &e))?;

        let state = resp
            .instance_statuses
            .unwrap_or_default()
            .into_iter()
            .find(|s| s.instance_id.as_deref() == Some(instance_id))
            .and_then(|s| s.instance_state)
            .and_then(|s| s.name)
            .map(|name| InstanceState::from_name(name.as_str()));
        Ok(state)
    }
}

/// Converts the SDK error into a provider error with its code,
/// so callers never need to inspect SDK error types.
fn api_error<E, R>(op: &str, e: &SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + Debug,
    R: Debug,
{
    let (code, message) = match e {
        SdkError::ServiceError(se) => {
            let err = se.err();
            (
                err.code().unwrap_or("Unknown").to_string(),
                err.message()
                    .map(String::from)
                    .unwrap_or_else(|| format!("{:?}", e)),
            )
        }
        SdkError::TimeoutError(_) => (String::from("TimeoutError"), format!("{:?}", e)),
        SdkError::DispatchFailure(_) => (String::from("DispatchFailure"), format!("{:?}", e)),
        SdkError::ResponseError(_) => (String::from("ResponseError"), format!("{:?}", e)),
        _ => (String::from("Unknown"), format!("{:?}", e)),
    };
    Error::Provider {
        code,
        message: format!("failed {} {}", op, message),
        is_retryable: is_error_retryable(e),
    }
}

#[inline]
pub fn is_error_retryable<E, R>(e: &SdkError<E, R>) -> bool {
    match e {
        SdkError::TimeoutError(_) | SdkError::ResponseError(_) => true,
        SdkError::DispatchFailure(e) => e.is_timeout() || e.is_io(),
        _ => false,
    }
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- aws::test_api_error --exact --show-output
#[test]
fn test_api_error() {
    use aws_sdk_ec2::operation::create_volume::CreateVolumeError;
    use aws_smithy_types::error::ErrorMetadata;

    let _ = env_logger::builder().is_test(true).try_init();

    let e: SdkError<CreateVolumeError, ()> = SdkError::service_error(
        CreateVolumeError::generic(
            ErrorMetadata::builder()
                .code("DryRunOperation")
                .message("Request would have succeeded, but DryRun flag is set.")
                .build(),
        ),
        (),
    );
    let err = api_error("create_volume", &e);
    assert!(err.is_dry_run());
    assert!(!err.is_retryable());
    assert_eq!(
        err.message(),
        "failed create_volume Request would have succeeded, but DryRun flag is set."
    );
}
