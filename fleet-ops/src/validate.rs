use crate::{errors::ValidationError, request::ProvisioningRequest};

/// Multi-attach io1/io2 volume size limits in GiB.
/// ref. https://docs.aws.amazon.com/AWSEC2/latest/UserGuide/ebs-volume-types.html
pub const MIN_VOLUME_SIZE_GIB: u32 = 4;
pub const MAX_VOLUME_SIZE_GIB: u32 = 16384;

/// Validates the request, returning the first failed check.
/// The number of security groups is not tied to the number of nodes,
/// since all groups are applied to every instance.
pub fn validate(req: &ProvisioningRequest) -> Result<(), ValidationError> {
    if req.node_count == 0 {
        return Err(ValidationError::InvalidNodeCount(req.node_count));
    }

    if let Some(size) = req.volume_size_gib {
        if !(MIN_VOLUME_SIZE_GIB..=MAX_VOLUME_SIZE_GIB).contains(&size) {
            return Err(ValidationError::InvalidVolumeSize {
                got: size,
                min: MIN_VOLUME_SIZE_GIB,
                max: MAX_VOLUME_SIZE_GIB,
            });
        }
    }

    if req.subnet_ids.is_empty() {
        return Err(ValidationError::MissingSubnets);
    }
    check_entries("subnets", &req.subnet_ids)?;

    if req.security_group_ids.is_empty() {
        return Err(ValidationError::MissingSecurityGroups);
    }
    check_entries("security_groups", &req.security_group_ids)?;

    check_entries("instance_types", &req.instance_types)?;

    for (field, got) in [
        ("subnets", req.subnet_ids.len()),
        ("instance_types", req.instance_types.len()),
    ] {
        if got != req.node_count {
            return Err(ValidationError::ResourceCountMismatch {
                field,
                got,
                expected: req.node_count,
            });
        }
    }

    let [zone_a, zone_b] = &req.availability_zones;
    if zone_a.trim().is_empty() || zone_b.trim().is_empty() || zone_a == zone_b {
        return Err(ValidationError::InvalidField {
            field: "availability_zones",
            reason: format!("must be two distinct zones (got '{}', '{}')", zone_a, zone_b),
        });
    }

    Ok(())
}

fn check_entries(field: &'static str, entries: &[String]) -> Result<(), ValidationError> {
    match entries.iter().position(|s| s.trim().is_empty()) {
        Some(index) => Err(ValidationError::EmptyEntry { field, index }),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) fn test_request(nodes: usize) -> ProvisioningRequest {
    ProvisioningRequest {
        node_count: nodes,
        volume_size_gib: Some(100),
        subnet_ids: (0..nodes).map(|i| format!("subnet-{}", i)).collect(),
        security_group_ids: vec![String::from("sg-1")],
        instance_types: vec![String::from("t3.micro"); nodes],
        default_instance_type: String::from("t3.micro"),
        image_id: String::from("ami-0bcc094591f354be2"),
        on_demand_percentage: 20,
        availability_zones: [String::from("us-east-1a"), String::from("us-east-1b")],
        launch_template_name: String::from("test-launch-template"),
        dry_run: false,
    }
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- validate::test_validate --exact --show-output
#[test]
fn test_validate() {
    let _ = env_logger::builder().is_test(true).try_init();

    // one security group for five nodes is fine
    let req = test_request(5);
    assert_eq!(req.security_group_ids.len(), 1);
    assert!(validate(&req).is_ok());

    let mut req = test_request(5);
    req.node_count = 0;
    assert_eq!(validate(&req), Err(ValidationError::InvalidNodeCount(0)));

    let mut req = test_request(5);
    req.volume_size_gib = Some(3);
    assert!(matches!(
        validate(&req),
        Err(ValidationError::InvalidVolumeSize { got: 3, .. })
    ));
    req.volume_size_gib = Some(20000);
    assert!(matches!(
        validate(&req),
        Err(ValidationError::InvalidVolumeSize { got: 20000, .. })
    ));
    req.volume_size_gib = Some(MAX_VOLUME_SIZE_GIB);
    assert!(validate(&req).is_ok());

    // size bounds only apply when volumes are requested
    req.volume_size_gib = None;
    assert!(validate(&req).is_ok());

    let mut req = test_request(5);
    req.subnet_ids.pop();
    assert_eq!(
        validate(&req),
        Err(ValidationError::ResourceCountMismatch {
            field: "subnets",
            got: 4,
            expected: 5
        })
    );

    let mut req = test_request(5);
    req.instance_types.push(String::from("t3.micro"));
    assert_eq!(
        validate(&req),
        Err(ValidationError::ResourceCountMismatch {
            field: "instance_types",
            got: 6,
            expected: 5
        })
    );

    let mut req = test_request(5);
    req.subnet_ids.clear();
    assert_eq!(validate(&req), Err(ValidationError::MissingSubnets));

    let mut req = test_request(5);
    req.security_group_ids.clear();
    assert_eq!(validate(&req), Err(ValidationError::MissingSecurityGroups));

    // volume slots are per zone, so both zones must differ
    let mut req = test_request(5);
    req.availability_zones[1] = String::from("us-east-1a");
    assert!(matches!(
        validate(&req),
        Err(ValidationError::InvalidField {
            field: "availability_zones",
            ..
        })
    ));
    req.availability_zones[1] = String::new();
    assert!(validate(&req).is_err());
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- validate::test_validate_empty_entries --exact --show-output
#[test]
fn test_validate_empty_entries() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut req = test_request(5);
    req.subnet_ids[0] = String::new();
    assert_eq!(
        validate(&req),
        Err(ValidationError::EmptyEntry {
            field: "subnets",
            index: 0
        })
    );

    let mut req = test_request(5);
    req.security_group_ids.push(String::from(" "));
    assert_eq!(
        validate(&req),
        Err(ValidationError::EmptyEntry {
            field: "security_groups",
            index: 1
        })
    );

    let mut req = test_request(5);
    req.instance_types[4] = String::new();
    assert_eq!(
        validate(&req),
        Err(ValidationError::EmptyEntry {
            field: "instance_types",
            index: 4
        })
    );

    // node count is checked first
    let mut req = test_request(5);
    req.node_count = 0;
    req.subnet_ids.clear();
    assert_eq!(validate(&req), Err(ValidationError::InvalidNodeCount(0)));
}
