use std::{
    collections::HashMap,
    env,
    fs::{self, File},
    io::{self, Error, ErrorKind, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::{
    readiness::{PollPolicy, DEFAULT_POLL_ATTEMPTS},
    request::{ProvisionOptions, ProvisioningRequest, DEFAULT_CONCURRENCY},
    volume::{VolumeOptions, DEFAULT_ATTACH_CEILING, DEFAULT_DEVICE, DEFAULT_IOPS},
};

/// ubuntu-18.04 in us-east-1.
pub const DEFAULT_IMAGE_ID: &str = "ami-0bcc094591f354be2";
/// Multi-attach volumes only attach to Nitro instance types.
/// ref. https://docs.aws.amazon.com/AWSEC2/latest/UserGuide/instance-types.html#ec2-nitro-instances
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";
pub const DEFAULT_ON_DEMAND_PERCENTAGE: u32 = 20;
pub const DEFAULT_VOLUME_SIZE_GIB: u32 = 4;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;

/// Multi-attach is only available in us-east-1, us-west-2, eu-west-1, and ap-northeast-2.
/// ref. https://docs.aws.amazon.com/AWSEC2/latest/UserGuide/ebs-volumes-multi.html
pub const MULTI_ATTACH_REGIONS: [&str; 4] = ["us-east-1", "us-west-2", "eu-west-1", "ap-northeast-2"];

pub const ENV_NUMBER_OF_NODES: &str = "NUMBER_OF_NODES";
pub const ENV_SUBNET_IDS: &str = "SUBNET_IDS";
pub const ENV_SECURITY_GROUP_IDS: &str = "SECURITY_GROUP_IDS";
pub const ENV_INSTANCE_TYPES: &str = "INSTANCE_TYPES";
pub const ENV_VOLUME_SIZE: &str = "VOLUME_SIZE";
pub const ENV_AMI_ID: &str = "AMI_ID";
pub const ENV_ON_DEMAND_PERCENTAGE: &str = "ON_DEMAND_PERCENTAGE";
pub const ENV_AVAILABILITY_ZONES: &str = "AVAILABILITY_ZONES";
pub const ENV_REGION: &str = "REGION";

/// Represents a fleet provisioning configuration.
/// Loaded from a YAML spec file, a JSON config file, or environment variables.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Spec {
    /// User-provided ID of the provisioning run,
    /// used to name the launch template.
    #[serde(default)]
    pub id: String,

    /// AWS region to create resources.
    /// MUST BE NON-EMPTY.
    #[serde(default)]
    pub region: String,

    pub machine: Machine,
    pub network: Network,

    /// Defaults to a "DEFAULT_VOLUME_SIZE_GIB" volume if the field is absent.
    /// Set to null to launch the fleet without shared volumes.
    #[serde(default = "default_volume")]
    pub volume: Option<Volume>,

    #[serde(default)]
    pub readiness: Readiness,

    /// Defaults to "[id]-launch-template" if empty.
    #[serde(default)]
    pub launch_template_name: String,

    /// Maximum number of instances waited on and attached at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Set "true" to only validate permissions and parameters with EC2.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_volume() -> Option<Volume> {
    Some(Volume::new(DEFAULT_VOLUME_SIZE_GIB))
}

/// Defines the fleet instances.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Machine {
    #[serde(default)]
    pub nodes: usize,
    #[serde(default = "default_image_id")]
    pub image_id: String,
    /// Set in the launch template, and used for every node
    /// if "instance_types" is empty.
    #[serde(default = "default_instance_type")]
    pub default_instance_type: String,
    /// One per node, if non-empty.
    #[serde(default)]
    pub instance_types: Vec<String>,
    #[serde(default = "default_on_demand_percentage")]
    pub on_demand_percentage: u32,
}

fn default_image_id() -> String {
    String::from(DEFAULT_IMAGE_ID)
}

fn default_instance_type() -> String {
    String::from(DEFAULT_INSTANCE_TYPE)
}

fn default_on_demand_percentage() -> u32 {
    DEFAULT_ON_DEMAND_PERCENTAGE
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Network {
    /// Exactly two zones, the first half of the nodes go to the first one.
    #[serde(default)]
    pub availability_zones: Vec<String>,
    /// One per node.
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    /// Applied to all nodes.
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

/// Defines the multi-attach volumes.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Volume {
    pub size_gib: u32,
    #[serde(default = "default_iops")]
    pub iops: u32,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_attach_ceiling")]
    pub attach_ceiling: usize,
}

fn default_iops() -> u32 {
    DEFAULT_IOPS
}

fn default_device() -> String {
    String::from(DEFAULT_DEVICE)
}

fn default_attach_ceiling() -> usize {
    DEFAULT_ATTACH_CEILING
}

impl Volume {
    pub fn new(size_gib: u32) -> Self {
        Self {
            size_gib,
            iops: DEFAULT_IOPS,
            device: default_device(),
            attach_ceiling: DEFAULT_ATTACH_CEILING,
        }
    }
}

/// Defines how long to wait for each instance before attaching its volume.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Readiness {
    #[serde(default = "default_poll_attempts")]
    pub attempts: u32,
    #[serde(default = "default_poll_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub jitter_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_poll_attempts() -> u32 {
    DEFAULT_POLL_ATTEMPTS
}

fn default_poll_interval_seconds() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            jitter_millis: 0,
            timeout_seconds: None,
        }
    }
}

/// Defines "default-spec" option.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
pub struct DefaultSpecOption {
    pub log_level: String,

    pub region: String,
    pub availability_zones: Vec<String>,

    pub nodes: usize,
    pub image_id: String,
    pub instance_types: Vec<String>,
    pub on_demand_percentage: u32,

    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,

    pub volume_size_gib: u32,

    pub spec_file_path: String,
}

/// Splits the comma-separated list, keeping empty entries
/// so that validation can point at them.
pub fn split_list(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    s.split(',').map(|v| v.trim().to_string()).collect()
}

impl Spec {
    /// Creates a default spec.
    pub fn default_aws(opts: DefaultSpecOption) -> Self {
        let id = {
            if !opts.spec_file_path.is_empty() {
                Path::new(&opts.spec_file_path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(String::from)
                    .unwrap_or_else(|| id_manager::time::with_prefix("fleet"))
            } else {
                id_manager::time::with_prefix("fleet")
            }
        };

        let availability_zones = if opts.availability_zones.is_empty() {
            default_availability_zones(&opts.region)
        } else {
            opts.availability_zones
        };

        Self {
            launch_template_name: format!("{}-launch-template", id),
            id,
            region: opts.region,
            machine: Machine {
                nodes: opts.nodes,
                image_id: opts.image_id,
                default_instance_type: String::from(DEFAULT_INSTANCE_TYPE),
                instance_types: opts.instance_types,
                on_demand_percentage: opts.on_demand_percentage,
            },
            network: Network {
                availability_zones,
                subnet_ids: opts.subnet_ids,
                security_group_ids: opts.security_group_ids,
            },
            volume: if opts.volume_size_gib > 0 {
                Some(Volume::new(opts.volume_size_gib))
            } else {
                None
            },
            readiness: Readiness::default(),
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
        }
    }

    /// Loads the spec from environment variables.
    pub fn from_env() -> io::Result<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Loads the spec from the key-value pairs, as named in the environment.
    /// Node count, subnets, and security groups are required.
    pub fn from_vars(vars: &HashMap<String, String>) -> io::Result<Self> {
        let get = |k: &str| vars.get(k).map(|v| v.trim()).filter(|v| !v.is_empty());

        let nodes = match get(ENV_NUMBER_OF_NODES) {
            Some(v) => v.parse::<usize>().map_err(|e| {
                Error::new(
                    ErrorKind::InvalidInput,
                    format!("invalid {} '{}' ({})", ENV_NUMBER_OF_NODES, v, e),
                )
            })?,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} must be set", ENV_NUMBER_OF_NODES),
                ))
            }
        };
        let subnet_ids = match get(ENV_SUBNET_IDS) {
            Some(v) => split_list(v),
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} can not be empty", ENV_SUBNET_IDS),
                ))
            }
        };
        let security_group_ids = match get(ENV_SECURITY_GROUP_IDS) {
            Some(v) => split_list(v),
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} can not be empty", ENV_SECURITY_GROUP_IDS),
                ))
            }
        };
        let volume_size_gib = match get(ENV_VOLUME_SIZE) {
            Some(v) => v.parse::<u32>().map_err(|e| {
                Error::new(
                    ErrorKind::InvalidInput,
                    format!("invalid {} '{}' ({})", ENV_VOLUME_SIZE, v, e),
                )
            })?,
            None => DEFAULT_VOLUME_SIZE_GIB,
        };
        let on_demand_percentage = match get(ENV_ON_DEMAND_PERCENTAGE) {
            Some(v) => v.parse::<u32>().map_err(|e| {
                Error::new(
                    ErrorKind::InvalidInput,
                    format!("invalid {} '{}' ({})", ENV_ON_DEMAND_PERCENTAGE, v, e),
                )
            })?,
            None => DEFAULT_ON_DEMAND_PERCENTAGE,
        };

        Ok(Self::default_aws(DefaultSpecOption {
            log_level: String::from("info"),
            region: get(ENV_REGION).unwrap_or(DEFAULT_REGION).to_string(),
            availability_zones: get(ENV_AVAILABILITY_ZONES)
                .map(split_list)
                .unwrap_or_default(),
            nodes,
            image_id: get(ENV_AMI_ID).unwrap_or(DEFAULT_IMAGE_ID).to_string(),
            instance_types: get(ENV_INSTANCE_TYPES).map(split_list).unwrap_or_default(),
            on_demand_percentage,
            subnet_ids,
            security_group_ids,
            volume_size_gib,
            spec_file_path: String::new(),
        }))
    }

    /// Converts to string in YAML format.
    pub fn encode_yaml(&self) -> io::Result<String> {
        match serde_yaml::to_string(&self) {
            Ok(s) => Ok(s),
            Err(e) => Err(Error::new(
                ErrorKind::Other,
                format!("failed to serialize Spec to YAML {}", e),
            )),
        }
    }

    /// Saves the current spec to disk
    /// and overwrites the file.
    pub fn sync(&self, file_path: &str) -> io::Result<()> {
        log::info!("syncing Spec to '{}'", file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir)?;
        }

        let d = self.encode_yaml()?;
        let mut f = File::create(file_path)?;
        f.write_all(d.as_bytes())?;

        Ok(())
    }

    /// Loads the YAML spec file.
    pub fn load(file_path: &str) -> io::Result<Self> {
        log::info!("loading Spec from {}", file_path);

        let f = open(file_path)?;
        let mut spec: Self = serde_yaml::from_reader(f)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid YAML: {}", e)))?;
        spec.fill_defaults();
        Ok(spec)
    }

    /// Loads the JSON config file.
    pub fn load_json(file_path: &str) -> io::Result<Self> {
        log::info!("loading Spec from JSON config {}", file_path);

        let f = open(file_path)?;
        let mut spec: Self = serde_json::from_reader(f)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid JSON: {}", e)))?;
        spec.fill_defaults();
        Ok(spec)
    }

    /// Sets the run-dependent defaults that serde cannot derive:
    /// ID, region, zones of the region, and the launch template name.
    pub fn fill_defaults(&mut self) {
        if self.id.is_empty() {
            self.id = id_manager::time::with_prefix("fleet");
        }
        if self.region.is_empty() {
            self.region = String::from(DEFAULT_REGION);
        }
        if self.network.availability_zones.is_empty() {
            self.network.availability_zones = default_availability_zones(&self.region);
        }
        if self.launch_template_name.is_empty() {
            self.launch_template_name = format!("{}-launch-template", self.id);
        }
    }

    /// Validates the spec fields that the provisioning request does not cover.
    /// Node and resource list checks run when provisioning.
    pub fn validate(&self) -> io::Result<()> {
        log::info!("validating Spec");

        if self.id.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "'id' cannot be empty"));
        }
        if self.region.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "'region' cannot be empty"));
        }
        if self.volume.is_some() && !MULTI_ATTACH_REGIONS.contains(&self.region.as_str()) {
            log::warn!(
                "region '{}' may not support multi-attach volumes (supported {:?})",
                self.region,
                MULTI_ATTACH_REGIONS
            );
        }

        if self.network.availability_zones.len() != 2 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "'network.availability_zones' must have exactly 2 zones (got {})",
                    self.network.availability_zones.len()
                ),
            ));
        }
        let zones = &self.network.availability_zones;
        if zones.iter().any(|z| z.is_empty()) || zones[0] == zones[1] {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("'network.availability_zones' {:?} must be distinct and non-empty", zones),
            ));
        }

        if self.machine.image_id.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'machine.image_id' cannot be empty",
            ));
        }
        if self.machine.default_instance_type.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'machine.default_instance_type' cannot be empty",
            ));
        }
        if self.machine.on_demand_percentage > 100 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "'machine.on_demand_percentage' {} >maximum 100",
                    self.machine.on_demand_percentage
                ),
            ));
        }

        if let Some(v) = &self.volume {
            if v.attach_ceiling == 0 {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "'volume.attach_ceiling' must be >0",
                ));
            }
            if v.device.is_empty() {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "'volume.device' cannot be empty",
                ));
            }
        }
        if self.readiness.attempts == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'readiness.attempts' must be >0",
            ));
        }
        if self.concurrency == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "'concurrency' must be >0"));
        }

        Ok(())
    }

    /// Resolves the spec into the provisioning request and options.
    /// Empty instance types are filled with the default instance type.
    pub fn to_request(&self) -> io::Result<(ProvisioningRequest, ProvisionOptions)> {
        self.validate()?;

        let instance_types = if self.machine.instance_types.is_empty() {
            vec![self.machine.default_instance_type.clone(); self.machine.nodes]
        } else {
            self.machine.instance_types.clone()
        };
        let launch_template_name = if self.launch_template_name.is_empty() {
            format!("{}-launch-template", self.id)
        } else {
            self.launch_template_name.clone()
        };

        let req = ProvisioningRequest {
            node_count: self.machine.nodes,
            volume_size_gib: self.volume.as_ref().map(|v| v.size_gib),
            subnet_ids: self.network.subnet_ids.clone(),
            security_group_ids: self.network.security_group_ids.clone(),
            instance_types,
            default_instance_type: self.machine.default_instance_type.clone(),
            image_id: self.machine.image_id.clone(),
            on_demand_percentage: self.machine.on_demand_percentage,
            availability_zones: [
                self.network.availability_zones[0].clone(),
                self.network.availability_zones[1].clone(),
            ],
            launch_template_name,
            dry_run: self.dry_run,
        };

        let volume = match &self.volume {
            Some(v) => VolumeOptions {
                iops: v.iops,
                device: v.device.clone(),
                attach_ceiling: v.attach_ceiling,
            },
            None => VolumeOptions::default(),
        };
        let opts = ProvisionOptions {
            poll: PollPolicy {
                attempts: self.readiness.attempts,
                interval: Duration::from_secs(self.readiness.interval_seconds),
                jitter: Duration::from_millis(self.readiness.jitter_millis),
                timeout: self.readiness.timeout_seconds.map(Duration::from_secs),
            },
            volume,
            concurrency: self.concurrency,
        };

        Ok((req, opts))
    }
}

fn open(file_path: &str) -> io::Result<File> {
    if !Path::new(file_path).exists() {
        return Err(Error::new(
            ErrorKind::NotFound,
            format!("file {} does not exists", file_path),
        ));
    }
    File::open(file_path).map_err(|e| {
        Error::new(
            ErrorKind::Other,
            format!("failed to open {} ({})", file_path, e),
        )
    })
}

/// Returns the first two zones of the region ("a" and "b").
pub fn default_availability_zones(region: &str) -> Vec<String> {
    vec![format!("{}a", region), format!("{}b", region)]
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- spec::test_spec --exact --show-output
#[test]
fn test_spec() {
    let _ = env_logger::builder().is_test(true).try_init();

    let id = random_manager::secure_string(10);
    let contents = format!(
        r#"

id: {}
region: us-east-1

machine:
  nodes: 3
  image_id: ami-0bcc094591f354be2
  default_instance_type: t3.micro
  instance_types:
  - m5.large
  - c5.large
  - r5.large
  on_demand_percentage: 40

network:
  availability_zones:
  - us-east-1a
  - us-east-1b
  subnet_ids:
  - subnet-1
  - subnet-2
  - subnet-3
  security_group_ids:
  - sg-1

volume:
  size_gib: 100

readiness:
  attempts: 3
  interval_seconds: 10

"#,
        id
    );
    let mut f = tempfile::NamedTempFile::new().unwrap();
    let ret = f.write_all(contents.as_bytes());
    assert!(ret.is_ok());
    let spec_path = f.path().to_str().unwrap();

    let spec = Spec::load(spec_path).unwrap();
    let ret = spec.sync(spec_path);
    assert!(ret.is_ok());
    assert_eq!(Spec::load(spec_path).unwrap(), spec);

    let orig = Spec {
        id: id.clone(),
        region: String::from("us-east-1"),
        machine: Machine {
            nodes: 3,
            image_id: String::from("ami-0bcc094591f354be2"),
            default_instance_type: String::from("t3.micro"),
            instance_types: vec![
                String::from("m5.large"),
                String::from("c5.large"),
                String::from("r5.large"),
            ],
            on_demand_percentage: 40,
        },
        network: Network {
            availability_zones: vec![String::from("us-east-1a"), String::from("us-east-1b")],
            subnet_ids: vec![
                String::from("subnet-1"),
                String::from("subnet-2"),
                String::from("subnet-3"),
            ],
            security_group_ids: vec![String::from("sg-1")],
        },
        volume: Some(Volume::new(100)),
        readiness: Readiness {
            attempts: 3,
            interval_seconds: 10,
            jitter_millis: 0,
            timeout_seconds: None,
        },
        launch_template_name: format!("{}-launch-template", id),
        concurrency: DEFAULT_CONCURRENCY,
        dry_run: false,
    };
    assert_eq!(spec, orig);
    spec.validate().expect("unexpected validate failure");

    let (req, opts) = spec.to_request().unwrap();
    assert_eq!(req.node_count, 3);
    assert_eq!(req.volume_size_gib, Some(100));
    assert_eq!(req.launch_template_name, format!("{}-launch-template", id));
    assert_eq!(req.availability_zones[1], "us-east-1b");
    assert_eq!(opts.poll.interval, Duration::from_secs(10));
    assert_eq!(opts.volume.attach_ceiling, 16);
    assert_eq!(opts.volume.device, "/dev/sdf");
    assert!(crate::validate::validate(&req).is_ok());
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- spec::test_spec_json --exact --show-output
#[test]
fn test_spec_json() {
    let _ = env_logger::builder().is_test(true).try_init();

    let contents = r#"{
  "id": "fleet-test",
  "region": "us-west-2",
  "machine": { "nodes": 2, "image_id": "ami-1", "default_instance_type": "t3.micro" },
  "network": {
    "availability_zones": ["us-west-2a", "us-west-2b"],
    "subnet_ids": ["subnet-1", "subnet-2"],
    "security_group_ids": ["sg-1", "sg-2"]
  },
  "volume": null,
  "dry_run": true
}"#;
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();

    let spec = Spec::load_json(f.path().to_str().unwrap()).unwrap();
    assert!(spec.dry_run);
    assert_eq!(spec.volume, None);
    assert_eq!(spec.readiness, Readiness::default());

    // instance types filled from the default
    let (req, opts) = spec.to_request().unwrap();
    assert_eq!(req.instance_types, vec!["t3.micro", "t3.micro"]);
    assert_eq!(req.volume_size_gib, None);
    assert!(req.dry_run);
    assert_eq!(opts.concurrency, DEFAULT_CONCURRENCY);

    assert!(Spec::load_json("/tmp/does-not-exist-fleet-ops.json").is_err());

    // omitted fields get the documented defaults
    let contents = r#"{
  "machine": { "nodes": 2 },
  "network": { "subnet_ids": ["subnet-1", "subnet-2"], "security_group_ids": ["sg-1"] }
}"#;
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();

    let spec = Spec::load_json(f.path().to_str().unwrap()).unwrap();
    assert!(spec.id.starts_with("fleet"));
    assert_eq!(spec.region, DEFAULT_REGION);
    assert_eq!(spec.machine.image_id, DEFAULT_IMAGE_ID);
    assert_eq!(spec.machine.default_instance_type, DEFAULT_INSTANCE_TYPE);
    assert_eq!(spec.machine.on_demand_percentage, DEFAULT_ON_DEMAND_PERCENTAGE);
    assert_eq!(spec.network.availability_zones, vec!["us-east-1a", "us-east-1b"]);
    assert_eq!(spec.volume, Some(Volume::new(DEFAULT_VOLUME_SIZE_GIB)));
    assert_eq!(spec.launch_template_name, format!("{}-launch-template", spec.id));

    let (req, _) = spec.to_request().unwrap();
    assert_eq!(req.on_demand_percentage, 20);
    assert_eq!(req.volume_size_gib, Some(4));
    assert_eq!(req.instance_types, vec!["t3.micro", "t3.micro"]);
    assert!(crate::validate::validate(&req).is_ok());
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- spec::test_spec_partial_yaml --exact --show-output
#[test]
fn test_spec_partial_yaml() {
    let _ = env_logger::builder().is_test(true).try_init();

    let contents = r#"
region: us-west-2

machine:
  nodes: 1

network:
  subnet_ids:
  - subnet-1
  security_group_ids:
  - sg-1

volume: null

readiness:
  timeout_seconds: 300
"#;
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    let spec_path = f.path().to_str().unwrap();

    let spec = Spec::load(spec_path).unwrap();
    assert_eq!(spec.network.availability_zones, vec!["us-west-2a", "us-west-2b"]);
    assert_eq!(spec.volume, None);
    assert_eq!(
        spec.readiness,
        Readiness {
            timeout_seconds: Some(300),
            ..Readiness::default()
        }
    );

    // "volume: null" survives a sync
    spec.sync(spec_path).unwrap();
    assert_eq!(Spec::load(spec_path).unwrap(), spec);
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- spec::test_spec_from_vars --exact --show-output
#[test]
fn test_spec_from_vars() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut vars = HashMap::new();
    assert!(Spec::from_vars(&vars).is_err());

    vars.insert(ENV_NUMBER_OF_NODES.to_string(), String::from("2"));
    vars.insert(ENV_SUBNET_IDS.to_string(), String::from("subnet-1, subnet-2"));
    assert!(Spec::from_vars(&vars).is_err());

    vars.insert(ENV_SECURITY_GROUP_IDS.to_string(), String::from("sg-1"));
    let spec = Spec::from_vars(&vars).unwrap();
    assert_eq!(spec.machine.nodes, 2);
    assert_eq!(spec.machine.image_id, DEFAULT_IMAGE_ID);
    assert_eq!(spec.machine.on_demand_percentage, DEFAULT_ON_DEMAND_PERCENTAGE);
    assert_eq!(spec.network.subnet_ids, vec!["subnet-1", "subnet-2"]);
    assert_eq!(spec.network.availability_zones, vec!["us-east-1a", "us-east-1b"]);
    assert_eq!(spec.volume, Some(Volume::new(DEFAULT_VOLUME_SIZE_GIB)));
    spec.validate().unwrap();

    vars.insert(ENV_VOLUME_SIZE.to_string(), String::from("big"));
    assert!(Spec::from_vars(&vars).is_err());
    vars.insert(ENV_VOLUME_SIZE.to_string(), String::from("3"));
    // volume bounds are checked when provisioning
    let (req, _) = Spec::from_vars(&vars).unwrap().to_request().unwrap();
    assert!(crate::validate::validate(&req).is_err());

    vars.insert(ENV_NUMBER_OF_NODES.to_string(), String::from("two"));
    assert!(Spec::from_vars(&vars).is_err());
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- spec::test_spec_validate --exact --show-output
#[test]
fn test_spec_validate() {
    let _ = env_logger::builder().is_test(true).try_init();

    let spec = Spec::default_aws(DefaultSpecOption {
        log_level: String::from("info"),
        region: String::from("us-east-1"),
        availability_zones: Vec::new(),
        nodes: 2,
        image_id: String::from(DEFAULT_IMAGE_ID),
        instance_types: Vec::new(),
        on_demand_percentage: 20,
        subnet_ids: split_list("subnet-1,subnet-2"),
        security_group_ids: split_list("sg-1"),
        volume_size_gib: 4,
        spec_file_path: String::from("/tmp/my-fleet.yaml"),
    });
    assert_eq!(spec.id, "my-fleet");
    assert_eq!(spec.launch_template_name, "my-fleet-launch-template");
    spec.validate().unwrap();

    let mut s = spec.clone();
    s.network.availability_zones = vec![String::from("us-east-1a")];
    assert!(s.validate().is_err());

    let mut s = spec.clone();
    s.network.availability_zones = vec![String::from("us-east-1a"); 2];
    assert!(s.validate().is_err());

    let mut s = spec.clone();
    s.machine.on_demand_percentage = 101;
    assert!(s.validate().is_err());

    let mut s = spec.clone();
    s.volume = Some(Volume {
        attach_ceiling: 0,
        ..Volume::new(4)
    });
    assert!(s.validate().is_err());

    let mut s = spec;
    s.readiness.attempts = 0;
    assert!(s.to_request().is_err());

    assert_eq!(split_list(""), Vec::<String>::new());
    assert_eq!(split_list("a,,b"), vec!["a", "", "b"]);
}
