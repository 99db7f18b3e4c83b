use std::io::{self, stdout};

use clap::{value_parser, Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

pub const NAME: &str = "default-spec";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Writes a default configuration")
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
            Arg::new("REGION")
                .long("region")
                .short('r')
                .help("Sets the AWS region for API calls/endpoints")
                .required(true)
                .num_args(1)
                .default_value(fleet_ops::spec::DEFAULT_REGION),
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
                .value_parser(value_parser!(usize))
                .default_value("2"),
        )
        .arg(
            Arg::new("IMAGE_ID")
                .long("image-id")
                .help("Sets the AMI ID")
                .required(false)
                .num_args(1)
                .default_value(fleet_ops::spec::DEFAULT_IMAGE_ID),
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
            Arg::new("SPEC_FILE_PATH")
                .long("spec-file-path")
                .short('s')
                .help("The spec file to create")
                .required(false)
                .num_args(1),
        )
}

pub fn execute(opts: fleet_ops::spec::DefaultSpecOption) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, &opts.log_level),
    );

    let spec = fleet_ops::Spec::default_aws(opts.clone());
    spec.validate()?;

    let spec_file_path = {
        if opts.spec_file_path.is_empty() {
            dir_manager::home::named(&spec.id, Some(".yaml"))
        } else {
            opts.spec_file_path
        }
    };
    spec.sync(&spec_file_path)?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\nSaved spec: '{}'\n", spec_file_path)),
        ResetColor
    )?;
    let spec_contents = spec.encode_yaml()?;
    println!("{}", spec_contents);

    println!();
    println!("# run the following to create resources");
    execute!(
        stdout(),
        SetForegroundColor(Color::Magenta),
        Print(format!("vi {}\n\n", spec_file_path)),
        ResetColor
    )?;
    let exec_path = std::env::current_exe()?;
    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!(
            "{} apply \\\n--spec-file-path {}\n\n",
            exec_path.display(),
            spec_file_path
        )),
        ResetColor
    )?;

    Ok(())
}
