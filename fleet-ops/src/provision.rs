use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    cancel::Cancellation,
    errors::{Error, Result},
    fleet::{self, FleetOutcome},
    placement::{self, CapacitySplit},
    provider::Ec2Provider,
    request::{ProvisionOptions, ProvisioningRequest},
    template::{self, LaunchTemplate},
    validate,
    volume::{self, VolumeOutcome},
};

/// Everything a successful run created.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ProvisioningReport {
    /// The launch template is already deleted when the report is returned.
    pub launch_template: LaunchTemplate,
    pub zone_assignment: Vec<String>,
    pub capacity_split: CapacitySplit,
    pub fleet: FleetOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<VolumeOutcome>,
    pub dry_run: bool,
}

/// Runs one provisioning transaction:
/// validate, plan, create the launch template, launch the fleet, delete the
/// launch template, then create and attach multi-attach volumes.
///
/// The launch template is deleted whenever it was created, even if the fleet
/// request fails or the run is cancelled. Fleet errors are returned after the
/// cleanup and skip volume provisioning.
pub async fn provision<P: Ec2Provider + ?Sized + 'static>(
    provider: Arc<P>,
    req: &ProvisioningRequest,
    opts: &ProvisionOptions,
    cancel: &Cancellation,
) -> Result<ProvisioningReport> {
    validate::validate(req).map_err(|e| {
        log::error!("invalid provisioning request: {}", e);
        Error::from(e)
    })?;

    let (zone_assignment, capacity_split) = placement::plan(
        req.node_count,
        &req.availability_zones,
        req.on_demand_percentage,
    );

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let launch_template = template::create(
        &*provider,
        &req.launch_template_name,
        &req.image_id,
        &req.default_instance_type,
        &req.security_group_ids,
        req.dry_run,
    )
    .await?;

    let fleet_ret = match &launch_template.id {
        Some(launch_template_id) => {
            let fleet_req = fleet::build_request(
                launch_template_id,
                &req.subnet_ids,
                &req.instance_types,
                &zone_assignment,
                capacity_split,
                req.dry_run,
            );
            tokio::select! {
                ret = fleet::launch(&*provider, &fleet_req) => ret,
                _ = cancel.cancelled() => Err(Error::Cancelled),
            }
        }
        None => {
            log::info!("no launch template Id (dry-run), skipping fleet request");
            Ok(FleetOutcome::default())
        }
    };

    template::delete(&*provider, &launch_template, req.dry_run).await;

    let fleet = fleet_ret?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let volumes = match req.volume_size_gib {
        Some(size_gib) if !fleet.instances.is_empty() => Some(
            volume::provision_and_attach(
                Arc::clone(&provider),
                &fleet.instances,
                size_gib,
                &req.availability_zones,
                opts,
                req.dry_run,
                cancel,
            )
            .await?,
        ),
        Some(_) => {
            log::info!("no fleet instances, skipping volume provisioning");
            None
        }
        None => {
            log::info!("no volume size requested, skipping volume provisioning");
            None
        }
    };

    log::info!(
        "provisioned {} instance(s) (fleet {:?})",
        fleet.instances.len(),
        fleet.fleet_id
    );
    Ok(ProvisioningReport {
        launch_template,
        zone_assignment,
        capacity_split,
        fleet,
        volumes,
        dry_run: req.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use tokio::time::Duration;

    use super::*;
    use crate::{
        errors::ValidationError,
        readiness::PollPolicy,
        testing::{Call, MockProvider},
        validate::test_request,
    };

    fn fast_opts() -> ProvisionOptions {
        ProvisionOptions {
            poll: PollPolicy {
                attempts: 2,
                interval: Duration::from_millis(1),
                jitter: Duration::ZERO,
                timeout: None,
            },
            concurrency: 1,
            ..ProvisionOptions::default()
        }
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- provision::tests::test_provision --exact --show-output
    #[tokio::test]
    async fn test_provision() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(MockProvider::new());
        let req = test_request(4);
        let report = provision(Arc::clone(&provider), &req, &fast_opts(), &Cancellation::new())
            .await
            .unwrap();

        assert_eq!(
            report.capacity_split,
            CapacitySplit {
                on_demand: 0,
                spot: 4
            }
        );
        assert_eq!(
            report.zone_assignment,
            vec!["us-east-1a", "us-east-1a", "us-east-1b", "us-east-1b"]
        );
        assert_eq!(report.fleet.instances.len(), 4);

        let volumes = report.volumes.unwrap();
        assert_eq!(volumes.volumes["us-east-1a"].len(), 1);
        assert_eq!(volumes.volumes["us-east-1b"].len(), 1);
        assert_eq!(volumes.attachments.len(), 4);

        // template deleted right after the fleet request, before any volume
        let calls = provider.calls();
        assert_eq!(calls[0], Call::CreateLaunchTemplate(String::from("test-launch-template")));
        assert_eq!(calls[1], Call::CreateFleet(4));
        assert!(matches!(calls[2], Call::DeleteLaunchTemplate(Some(_), _)));
        assert!(matches!(calls[3], Call::CreateVolume(_)));
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- provision::tests::test_validation_failure --exact --show-output
    #[tokio::test]
    async fn test_validation_failure() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(MockProvider::new());
        let mut req = test_request(4);
        req.volume_size_gib = Some(3);
        let ret = provision(Arc::clone(&provider), &req, &fast_opts(), &Cancellation::new()).await;
        assert!(matches!(
            ret,
            Err(Error::Validation(ValidationError::InvalidVolumeSize { .. }))
        ));
        assert!(provider.calls().is_empty());

        // same zone twice would leave one zone's volume unused
        let mut req = test_request(4);
        req.availability_zones[1] = req.availability_zones[0].clone();
        let ret = provision(Arc::clone(&provider), &req, &fast_opts(), &Cancellation::new()).await;
        assert!(matches!(
            ret,
            Err(Error::Validation(ValidationError::InvalidField { .. }))
        ));
        assert!(provider.calls().is_empty());
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- provision::tests::test_dry_run --exact --show-output
    #[tokio::test]
    async fn test_dry_run() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(MockProvider::new());
        let mut req = test_request(4);
        req.dry_run = true;
        let report = provision(Arc::clone(&provider), &req, &fast_opts(), &Cancellation::new())
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.launch_template.id, None);
        assert!(report.fleet.instances.is_empty());
        assert_eq!(report.volumes, None);
        assert_eq!(
            provider.calls(),
            vec![
                Call::CreateLaunchTemplate(String::from("test-launch-template")),
                Call::DeleteLaunchTemplate(None, String::from("test-launch-template")),
            ]
        );
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- provision::tests::test_fleet_failure --exact --show-output
    #[tokio::test]
    async fn test_fleet_failure() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(
            MockProvider::new()
                .with_create_fleet_error(Error::provider("InvalidSubnetID.NotFound", "no subnet")),
        );
        let ret = provision(
            Arc::clone(&provider),
            &test_request(4),
            &fast_opts(),
            &Cancellation::new(),
        )
        .await;
        assert_eq!(ret.unwrap_err().code(), Some("InvalidSubnetID.NotFound"));

        // template still deleted, no volume work
        let calls = provider.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls[2], Call::DeleteLaunchTemplate(Some(_), _)));
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- provision::tests::test_template_failure --exact --show-output
    #[tokio::test]
    async fn test_template_failure() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(
            MockProvider::new().with_create_template_error(Error::provider("UnauthorizedOperation", "denied")),
        );
        let ret = provision(
            Arc::clone(&provider),
            &test_request(2),
            &fast_opts(),
            &Cancellation::new(),
        )
        .await;
        assert_eq!(ret.unwrap_err().code(), Some("UnauthorizedOperation"));
        assert_eq!(provider.calls().len(), 1);
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- provision::tests::test_cancelled --exact --show-output
    #[tokio::test]
    async fn test_cancelled() {
        let _ = env_logger::builder().is_test(true).try_init();

        // cancelled while waiting on instance readiness
        let provider = Arc::new(MockProvider::new().with_pending_polls(100));
        let opts = ProvisionOptions {
            poll: PollPolicy {
                attempts: 100,
                interval: Duration::from_secs(1),
                jitter: Duration::ZERO,
                timeout: None,
            },
            ..fast_opts()
        };
        let cancel = Cancellation::new();
        let cloned = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cloned.cancel();
        });
        let ret = provision(Arc::clone(&provider), &test_request(2), &opts, &cancel).await;
        assert_eq!(ret, Err(Error::Cancelled));
        assert!(provider.attachments().is_empty());
        assert_eq!(
            provider.count(|c| matches!(c, Call::DeleteLaunchTemplate(..))),
            1
        );

        // cancelled before anything starts
        let provider = Arc::new(MockProvider::new());
        let cancel = Cancellation::new();
        cancel.cancel();
        let ret = provision(Arc::clone(&provider), &test_request(2), &fast_opts(), &cancel).await;
        assert_eq!(ret, Err(Error::Cancelled));
        assert!(provider.calls().is_empty());
    }

    /// RUST_LOG=debug cargo test --package fleet-ops --lib -- provision::tests::test_no_volume --exact --show-output
    #[tokio::test]
    async fn test_no_volume() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = Arc::new(MockProvider::new());
        let mut req = test_request(3);
        req.volume_size_gib = None;
        let report = provision(Arc::clone(&provider), &req, &fast_opts(), &Cancellation::new())
            .await
            .unwrap();
        assert_eq!(report.fleet.instances.len(), 3);
        assert_eq!(report.volumes, None);
        assert_eq!(provider.calls().len(), 3);
    }
}
