mod apply;
mod default_spec;

use std::process;

use clap::{crate_version, Command};

const APP_NAME: &str = "fleetup-aws";

/// Each "apply" is a single provisioning transaction
/// (no state is kept between runs).
#[tokio::main]
async fn main() {
    let matches = Command::new(APP_NAME)
        .version(crate_version!())
        .about("EC2 fleet with shared multi-attach volumes on AWS")
        .subcommands(vec![default_spec::command(), apply::command()])
        .get_matches();

    match matches.subcommand() {
        Some((default_spec::NAME, sub_matches)) => {
            let opt = fleet_ops::spec::DefaultSpecOption {
                log_level: sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),

                region: sub_matches.get_one::<String>("REGION").unwrap().clone(),
                availability_zones: list_arg(sub_matches, "AVAILABILITY_ZONES"),

                nodes: *sub_matches.get_one::<usize>("NODES").unwrap_or(&2),
                image_id: sub_matches.get_one::<String>("IMAGE_ID").unwrap().clone(),
                instance_types: list_arg(sub_matches, "INSTANCE_TYPES"),
                on_demand_percentage: *sub_matches
                    .get_one::<u32>("ON_DEMAND_PERCENTAGE")
                    .unwrap_or(&fleet_ops::spec::DEFAULT_ON_DEMAND_PERCENTAGE),

                subnet_ids: list_arg(sub_matches, "SUBNETS"),
                security_group_ids: list_arg(sub_matches, "SECURITY_GROUPS"),

                volume_size_gib: *sub_matches
                    .get_one::<u32>("VOLUME_SIZE")
                    .unwrap_or(&fleet_ops::spec::DEFAULT_VOLUME_SIZE_GIB),

                spec_file_path: sub_matches
                    .get_one::<String>("SPEC_FILE_PATH")
                    .unwrap_or(&String::new())
                    .clone(),
            };
            if let Err(e) = default_spec::execute(opt) {
                eprintln!("failed to execute '{}' ({})", default_spec::NAME, e);
                process::exit(1);
            }
        }

        Some((apply::NAME, sub_matches)) => {
            let opts = apply::Options {
                log_level: sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                spec_file_path: sub_matches.get_one::<String>("SPEC_FILE_PATH").cloned(),
                config_file: sub_matches.get_one::<String>("CONFIG_FILE").cloned(),
                env: sub_matches.get_flag("ENV"),

                region: sub_matches.get_one::<String>("REGION").unwrap().clone(),
                availability_zones: list_arg(sub_matches, "AVAILABILITY_ZONES"),
                nodes: sub_matches.get_one::<usize>("NODES").copied(),
                image_id: sub_matches.get_one::<String>("IMAGE_ID").unwrap().clone(),
                instance_types: list_arg(sub_matches, "INSTANCE_TYPES"),
                on_demand_percentage: *sub_matches
                    .get_one::<u32>("ON_DEMAND_PERCENTAGE")
                    .unwrap_or(&fleet_ops::spec::DEFAULT_ON_DEMAND_PERCENTAGE),
                subnet_ids: list_arg(sub_matches, "SUBNETS"),
                security_group_ids: list_arg(sub_matches, "SECURITY_GROUPS"),
                volume_size_gib: *sub_matches
                    .get_one::<u32>("VOLUME_SIZE")
                    .unwrap_or(&fleet_ops::spec::DEFAULT_VOLUME_SIZE_GIB),

                dry_run: sub_matches.get_flag("DRY_RUN"),
                skip_prompt: sub_matches.get_flag("SKIP_PROMPT"),
            };
            if let Err(e) = apply::execute(opts).await {
                eprintln!("failed to execute '{}' ({})", apply::NAME, e);
                process::exit(1);
            }
        }

        _ => unreachable!("unknown subcommand"),
    }
}

fn list_arg(sub_matches: &clap::ArgMatches, id: &str) -> Vec<String> {
    sub_matches
        .get_one::<String>(id)
        .map(|s| fleet_ops::spec::split_list(s))
        .unwrap_or_default()
}
