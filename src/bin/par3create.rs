//! par3create - compute PAR3 recovery blocks for a set of files

use anyhow::{Context, Result};
use log::{debug, LevelFilter};
use par3rs::args::parse_create_args;
use par3rs::checksum::packet_digest;
use par3rs::create::{create_recovery, sequential_positions, trial};
use par3rs::mapping::file_sizes;
use par3rs::{
    plan_archive_files, write_archive_files, ArchiveLayout, BlockMap, ConsoleReporter,
    Deduplication, EngineConfig, Par3Error,
};
use std::path::PathBuf;
use std::process;

fn main() {
    let matches = parse_create_args();
    let verbose = matches.get_count("verbose");

    let mut logger = env_logger::Builder::from_default_env();
    logger
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false);
    if verbose >= 2 {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    if let Err(e) = run(&matches) {
        let code = e.downcast_ref::<Par3Error>().map_or(1, Par3Error::exit_code);
        if !matches.get_flag("quiet") {
            eprintln!("Error: {:#}", e);
        }
        process::exit(code);
    }
}

fn run(matches: &clap::ArgMatches) -> Result<()> {
    let files: Vec<PathBuf> = matches
        .get_many::<String>("files")
        .context("no input files")?
        .map(PathBuf::from)
        .collect();
    let output = PathBuf::from(
        matches
            .get_one::<String>("output")
            .context("no output file")?,
    );

    let sizes = file_sizes(&files)?;
    let block_size = EngineConfig::block_size_from_args(matches, &sizes)?;
    let dedup = if matches.get_flag("dedup") {
        Deduplication::Simple
    } else {
        Deduplication::Off
    };
    let map = BlockMap::from_files_with(&files, block_size, dedup)?;
    let mut config = EngineConfig::from_args(matches, &map)?;
    debug!(
        "Block size {}, {} blocks, {}-bit field",
        block_size,
        map.block_count(),
        config.gf_size as u32 * 8
    );

    // identify the set by its block checksums
    let crcs: Vec<u8> = map
        .blocks()
        .iter()
        .flat_map(|b| b.crc.to_le_bytes())
        .chain(block_size.to_le_bytes())
        .collect();
    let root = packet_digest(&[crcs.as_slice()]);
    config.root_checksum = root;
    config.set_id.copy_from_slice(&root[..8]);
    debug!("Recovery set id {}", hex::encode(config.set_id));

    let archive = match matches.get_one::<String>("archive") {
        Some(scheme) => {
            let file_count = matches
                .get_one::<String>("archive-files")
                .map(|n| n.parse::<u64>())
                .transpose()
                .map_err(|_| Par3Error::InvalidConfig("archive-files is not a number".into()))?;
            let layout = ArchiveLayout::from_scheme(scheme, file_count)?;
            plan_archive_files(&output, layout, &map)
        }
        None => Vec::new(),
    };

    if matches.get_flag("trial") {
        let report = trial(&config, &map, &archive)?;
        if config.noise_level >= 0 {
            println!(
                "{} input files, {} blocks of {} bytes, {}-bit field",
                map.files().len(),
                map.block_count(),
                block_size,
                config.gf_size as u32 * 8
            );
            println!(
                "Would write {} recovery blocks to {} ({} bytes, {} passes)",
                config.recovery_block_count,
                output.display(),
                report.recovery_bytes,
                report.plan.pass_count()
            );
            for (path, size) in &report.archive {
                println!("Would write archive file {} ({} bytes)", path.display(), size);
            }
        }
        return Ok(());
    }

    std::fs::File::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let positions = sequential_positions(&output, 0, config.recovery_block_count, block_size);

    let reporter = ConsoleReporter::new(config.noise_level);
    let report = create_recovery(&mut config, &map, &positions, &reporter)?;
    write_archive_files(&config, &map, &archive)?;

    if config.noise_level >= 0 {
        println!(
            "{} input files, {} blocks of {} bytes",
            map.files().len(),
            map.block_count(),
            block_size
        );
        println!(
            "Wrote {} recovery blocks to {} ({})",
            config.recovery_block_count,
            output.display(),
            if report.whole_memory {
                "in memory".to_string()
            } else {
                format!("{} passes", report.passes)
            }
        );
        for file in &archive {
            println!("Wrote archive file {}", file.path.display());
        }
    }
    if config.noise_level >= 1 {
        println!("Recovery set ID: {}", hex::encode_upper(config.set_id));
    }
    Ok(())
}
