use clap::{Arg, ArgAction, Command};

/// Command definition for `par3create`
pub fn create_command() -> Command {
    Command::new("par3create")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Create PAR3 recovery blocks for a set of files")
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Recovery file to write")
                .required(true),
        )
        .arg(
            Arg::new("block-size")
                .short('b')
                .long("block-size")
                .help("Block size in bytes (suggested from the input sizes if omitted)"),
        )
        .arg(
            Arg::new("recovery-count")
                .short('r')
                .long("recovery-count")
                .help("Number of recovery blocks to create")
                .default_value("1"),
        )
        .arg(
            Arg::new("memory")
                .short('m')
                .long("memory")
                .help("Memory limit in megabytes (0 = unlimited)"),
        )
        .arg(
            Arg::new("field-bits")
                .long("field-bits")
                .help("Galois Field width: 8 or 16 (8 for up to 128 blocks if omitted)"),
        )
        .arg(
            Arg::new("dedup")
                .short('D')
                .long("dedup")
                .help("Store identical full blocks once")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("archive")
                .short('a')
                .long("archive")
                .help("Also write input blocks as data packets: uniform, variable, power or limit"),
        )
        .arg(
            Arg::new("archive-files")
                .long("archive-files")
                .help("Number of archive files for the uniform and variable schemes")
                .requires("archive"),
        )
        .arg(
            Arg::new("trial")
                .short('t')
                .long("trial")
                .help("Report what would be written without writing anything")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress progress output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase output (repeat for debug output)")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("files")
                .help("Input files")
                .required(true)
                .num_args(1..),
        )
}

pub fn parse_create_args() -> clap::ArgMatches {
    create_command().get_matches()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_args_defaults() {
        let matches = create_command()
            .try_get_matches_from(["par3create", "-o", "out.par3", "a.bin", "b.bin"])
            .unwrap();
        assert!(matches.get_one::<String>("block-size").is_none());
        assert!(matches.get_one::<String>("field-bits").is_none());
        assert!(matches.get_one::<String>("archive").is_none());
        assert!(!matches.get_flag("dedup"));
        assert!(!matches.get_flag("trial"));
        assert!(matches.get_one::<String>("memory").is_none());
        assert!(!matches.get_flag("quiet"));
        assert_eq!(matches.get_count("verbose"), 0);
        let files: Vec<&String> = matches.get_many::<String>("files").unwrap().collect();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_create_args_require_files() {
        assert!(create_command()
            .try_get_matches_from(["par3create", "-o", "out.par3"])
            .is_err());
    }

    #[test]
    fn test_archive_files_requires_scheme() {
        assert!(create_command()
            .try_get_matches_from(["par3create", "-o", "x", "--archive-files", "3", "a"])
            .is_err());
        let matches = create_command()
            .try_get_matches_from(["par3create", "-o", "x", "-a", "uniform", "--archive-files", "3", "a"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("archive").unwrap(), "uniform");
    }

    #[test]
    fn test_verbose_counts() {
        let matches = create_command()
            .try_get_matches_from(["par3create", "-vv", "-o", "x", "a"])
            .unwrap();
        assert_eq!(matches.get_count("verbose"), 2);
    }
}
