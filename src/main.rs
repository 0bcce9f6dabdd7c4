mod bitmap;
mod check;
mod fat;
mod partition;
mod util;

use std::mem::size_of;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{crate_version, value_t, App, Arg, ArgMatches};
use static_assertions::const_assert;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::check::{check, CheckOptions, LostChainPolicy, Report};
use crate::fat::{FatPartition, DEFAULT_MAX_DEPTH};
use crate::partition::Partition;

const_assert!(size_of::<usize>() >= size_of::<u32>());

fn main() {
    let matches = app().get_matches();
    init_logging();

    let options = check_options(&matches);
    let dry_run = matches.is_present("dry-run");
    let image_path = matches.value_of("IMAGE").unwrap_or_default();
    match scandisk(image_path, &options, dry_run) {
        Ok(report) => {
            print!("{}", report);
            for anomaly in &report.anomalies {
                eprintln!("warning: {}", anomaly);
            }
        }
        Err(reason) => {
            eprintln!("Error: {:#}", reason);
            std::process::exit(1);
        }
    }
}

fn app() -> App<'static, 'static> {
    App::new("scandisk-rs")
        .version(crate_version!())
        .about("Checks a FAT12 volume image for lost clusters and wrong file sizes and repairs them in place")
        .arg(Arg::with_name("IMAGE").help("Path to the volume image or block device").required(true).index(1))
        .arg(
            Arg::with_name("dry-run")
                .short("n")
                .long("dry-run")
                .help("Report findings without writing anything to the image"),
        )
        .arg(
            Arg::with_name("follow-links")
                .long("follow-links")
                .help("Build lost chains by following the allocation table instead of cluster order"),
        )
        .arg(
            Arg::with_name("max-depth")
                .long("max-depth")
                .value_name("N")
                .takes_value(true)
                .help("Do not descend into directories nested deeper than N levels [default: 64]"),
        )
}

fn check_options(matches: &ArgMatches) -> CheckOptions {
    let lost_chain_policy = if matches.is_present("follow-links") {
        LostChainPolicy::FollowLinks
    } else {
        LostChainPolicy::Positional
    };
    let max_depth = if matches.is_present("max-depth") {
        value_t!(matches, "max-depth", usize).unwrap_or_else(|err| err.exit())
    } else {
        DEFAULT_MAX_DEPTH
    };
    CheckOptions { lost_chain_policy, max_depth }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // only fails if a global subscriber is already installed
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Checks the volume at `image_path`. All passes work on an in-memory copy, which is written back only once they are
/// done, only if something changed and never in a dry run.
fn scandisk<P: AsRef<Path>>(image_path: P, options: &CheckOptions, dry_run: bool) -> Result<Report> {
    let image_path = image_path.as_ref();
    let mut partition = if dry_run {
        Partition::open_read_only(image_path)?
    } else {
        Partition::open(image_path)?
    };

    let mut buffer = partition.as_slice().to_vec();
    let mut fat_partition = FatPartition::new(&mut buffer)
        .with_context(|| format!("{} is not a FAT12 volume", image_path.display()))?;
    debug!(boot_sector = ?fat_partition.boot_sector(), "Parsed boot sector");
    let report = check(&mut fat_partition, options);

    if buffer.as_slice() == partition.as_slice() {
        info!("Volume unchanged");
    } else if partition.is_read_only() {
        info!("Dry run, discarding repairs");
    } else {
        partition.write_back(&buffer).context("Cannot write repairs back to the image")?;
        info!("Repairs written");
    }
    Ok(report)
}
