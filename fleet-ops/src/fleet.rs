use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    placement::CapacitySplit,
    provider::{Ec2Provider, FleetError, FleetInstance, FleetOverride, FleetRequest},
};

/// Fleet requests always refer to the latest template version,
/// the template is created fresh for each run.
pub const LAUNCH_TEMPLATE_VERSION: &str = "$Latest";

/// Result of an "instant" fleet request.
/// No instances means volume provisioning is skipped.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct FleetOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,
    #[serde(default)]
    pub instances: Vec<FleetInstance>,
    /// Capacity the provider could not fulfill.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FleetError>,
}

/// Builds one override per instance index with its zone, instance type and subnet.
pub fn build_request(
    launch_template_id: &str,
    subnet_ids: &[String],
    instance_types: &[String],
    zone_assignment: &[String],
    split: CapacitySplit,
    dry_run: bool,
) -> FleetRequest {
    let overrides = zone_assignment
        .iter()
        .zip(instance_types.iter())
        .zip(subnet_ids.iter())
        .map(|((zone, instance_type), subnet_id)| FleetOverride {
            availability_zone: zone.clone(),
            instance_type: instance_type.clone(),
            subnet_id: subnet_id.clone(),
        })
        .collect();
    FleetRequest {
        launch_template_id: launch_template_id.to_string(),
        launch_template_version: LAUNCH_TEMPLATE_VERSION.to_string(),
        overrides,
        total_target_capacity: split.total(),
        on_demand_target_capacity: split.on_demand,
        spot_target_capacity: split.spot,
        dry_run,
    }
}

/// Submits the fleet request. A dry-run signal returns an empty outcome.
/// Other provider errors are returned so that the caller can still clean
/// up the launch template.
pub async fn launch<P: Ec2Provider + ?Sized>(provider: &P, req: &FleetRequest) -> Result<FleetOutcome> {
    log::info!(
        "creating instant fleet with template '{}' ({} override(s), {} on-demand, {} spot, dry-run {})",
        req.launch_template_id,
        req.overrides.len(),
        req.on_demand_target_capacity,
        req.spot_target_capacity,
        req.dry_run
    );

    let resp = match provider.create_fleet(req).await {
        Ok(resp) => resp,
        Err(e) if e.is_dry_run() => {
            log::info!("dry-run create fleet succeeded");
            return Ok(FleetOutcome::default());
        }
        Err(e) => {
            log::error!("failed to create fleet: {}", e);
            return Err(e);
        }
    };

    for e in resp.errors.iter() {
        log::warn!(
            "fleet '{}' could not launch '{}' in '{}': {} ({})",
            resp.fleet_id,
            e.instance_type,
            e.availability_zone,
            e.message,
            e.code
        );
    }

    let mut instances = Vec::with_capacity(resp.instances.len());
    for instance in resp.instances {
        if instance.availability_zone.is_empty() {
            log::warn!(
                "instance '{}' has no availability zone in fleet response, skipping",
                instance.instance_id
            );
            continue;
        }
        log::info!(
            "fleet '{}' launched instance '{}' in '{}'",
            resp.fleet_id,
            instance.instance_id,
            instance.availability_zone
        );
        instances.push(instance);
    }
    if instances.len() < req.total_target_capacity {
        log::warn!(
            "fleet '{}' partially fulfilled: {} of {} instance(s)",
            resp.fleet_id,
            instances.len(),
            req.total_target_capacity
        );
    }

    Ok(FleetOutcome {
        fleet_id: if resp.fleet_id.is_empty() {
            None
        } else {
            Some(resp.fleet_id)
        },
        instances,
        errors: resp.errors,
    })
}
