use std::{
    io::{self, stdout, Error, ErrorKind},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::{value_parser, Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use dialoguer::{theme::ColorfulTheme, Select};
use fleet_ops::{aws, spec, Cancellation, Spec};
use tokio::time::{sleep, Duration};

pub const NAME: &str = "apply";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Creates the fleet and attaches shared volumes (spec file, JSON config, env, or flags)")
        .arg(
            Arg::new("LOG_LEVEL")
                .long("log-level")
                .short('l')
                .help("Sets the log level")
                .required(false)
                .num_args(1)
                .value_parser(["debug", "info"])
                .default_value("info"),
        )
        .arg(
            Arg::new("SPEC_FILE_PATH")
                .long("spec-file-path")
                .short('s')
                .help("The YAML spec file to load (takes precedence over other sources)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("CONFIG_FILE")
                .long("config-file")
                .help("The JSON config file to load")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("ENV")
                .long("env")
                .help("Loads the configuration from environment variables (e.g., NUMBER_OF_NODES, SUBNET_IDS)")
                .required(false)
                .num_args(0),
        )
        .arg(
            Arg::new("REGION")
                .long("region")
                .short('r')
                .help("Sets the AWS region for API calls/endpoints")
                .required(false)
                .num_args(1)
                .default_value(spec::DEFAULT_REGION),
        )
        .arg(
            Arg::new("AVAILABILITY_ZONES")
                .long("availability-zones")
                .help("Comma-separated two availability zones (defaults to the region's 'a' and 'b')")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("NODES")
                .long("nodes")
                .help("Sets the number of fleet instances to create")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("IMAGE_ID")
                .long("image-id")
                .help("Sets the AMI ID")
                .required(false)
                .num_args(1)
                .default_value(spec::DEFAULT_IMAGE_ID),
        )
        .arg(
            Arg::new("INSTANCE_TYPES")
                .long("instance-types")
                .help("Comma-separated instance types, one per node (if empty, uses the default instance type)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("ON_DEMAND_PERCENTAGE")
                .long("on-demand-percentage")
                .help("Sets the percentage of on-demand instances (rest is spot)")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(u32))
                .default_value("20"),
        )
        .arg(
            Arg::new("SUBNETS")
                .long("subnets")
                .help("Comma-separated subnet IDs, one per node")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("SECURITY_GROUPS")
                .long("security-groups")
                .help("Comma-separated security group IDs")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("VOLUME_SIZE")
                .long("volume-size")
                .help("Sets the multi-attach volume size in GiB (0 to skip volumes)")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(u32))
                .default_value("4"),
        )
        .arg(
            Arg::new("DRY_RUN")
                .long("dry-run")
                .help("Only checks permissions and parameters with EC2 (no resource is created)")
                .required(false)
                .num_args(0),
        )
        .arg(
            Arg::new("SKIP_PROMPT")
                .long("skip-prompt")
                .help("Skips prompt mode")
                .required(false)
                .num_args(0),
        )
}

/// Resolved "apply" flags.
#[derive(Debug, Clone)]
pub struct Options {
    pub log_level: String,

    pub spec_file_path: Option<String>,
    pub config_file: Option<String>,
    pub env: bool,

    pub region: String,
    pub availability_zones: Vec<String>,
    pub nodes: Option<usize>,
    pub image_id: String,
    pub instance_types: Vec<String>,
    pub on_demand_percentage: u32,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub volume_size_gib: u32,

    pub dry_run: bool,
    pub skip_prompt: bool,
}

/// Spec sources in precedence order: YAML spec file, JSON config, env, flags.
fn load_spec(opts: &Options) -> io::Result<Spec> {
    if let Some(p) = &opts.spec_file_path {
        return Spec::load(p);
    }
    if let Some(p) = &opts.config_file {
        return Spec::load_json(p);
    }
    if opts.env {
        return Spec::from_env();
    }

    let nodes = match opts.nodes {
        Some(n) => n,
        None => {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'--nodes' is required without '--spec-file-path', '--config-file', or '--env'",
            ))
        }
    };
    Ok(Spec::default_aws(spec::DefaultSpecOption {
        log_level: opts.log_level.clone(),
        region: opts.region.clone(),
        availability_zones: opts.availability_zones.clone(),
        nodes,
        image_id: opts.image_id.clone(),
        instance_types: opts.instance_types.clone(),
        on_demand_percentage: opts.on_demand_percentage,
        subnet_ids: opts.subnet_ids.clone(),
        security_group_ids: opts.security_group_ids.clone(),
        volume_size_gib: opts.volume_size_gib,
        spec_file_path: String::new(),
    }))
}

pub async fn execute(opts: Options) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, &opts.log_level),
    );

    let mut spec = load_spec(&opts)?;
    if opts.dry_run {
        spec.dry_run = true;
    }
    let (req, provision_opts) = spec.to_request()?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\nLoaded Spec: '{}'\n", spec.id)),
        ResetColor
    )?;
    let spec_contents = spec.encode_yaml()?;
    println!("{}\n", spec_contents);

    if !opts.skip_prompt {
        let options = &[
            "No, I am not ready to create resources.",
            "Yes, let's create resources.",
        ];
        let selected = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select your 'apply' option")
            .items(&options[..])
            .default(0)
            .interact()?;
        if selected == 0 {
            return Ok(());
        }
    }

    let cancel = Cancellation::new();
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while !cancel.is_cancelled() {
                if term.load(Ordering::Relaxed) {
                    log::warn!("received signal {}", signal_hook::consts::SIGINT);
                    cancel.cancel();
                    break;
                }
                sleep(Duration::from_millis(500)).await;
            }
        })
    };

    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!(
            "\n\n\nSTEP: create fleet with {} node(s){}\n",
            req.node_count,
            if req.dry_run { " (dry-run)" } else { "" }
        )),
        ResetColor
    )?;
    let manager = Arc::new(aws::Manager::load(&spec.region).await);
    let ret = fleet_ops::provision(manager, &req, &provision_opts, &cancel).await;
    watcher.abort();

    let report = match ret {
        Ok(report) => report,
        Err(e) => {
            log::error!("failed to provision ({})", e);
            execute!(
                stdout(),
                SetForegroundColor(Color::Red),
                Print(format!("\n\n\nFAILED: {}\n", e)),
                ResetColor
            )?;
            return Err(Error::new(ErrorKind::Other, e.to_string()));
        }
    };

    let report_contents = serde_yaml::to_string(&report).map_err(|e| {
        Error::new(
            ErrorKind::Other,
            format!("failed to serialize report to YAML {}", e),
        )
    })?;
    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print("\n\n\nSUCCESS: provisioned resources\n"),
        ResetColor
    )?;
    println!("{}", report_contents);

    Ok(())
}
