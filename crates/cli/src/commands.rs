//! Clap command tree definition.

use clap::{Arg, ArgAction, Command};

/// Build the `isolation-matrix` command.
pub fn build_cli() -> Command {
    Command::new("isolation-matrix")
        .about("Provoke isolation anomalies against the reference store and compare with documented guarantees")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .help("Harness config file (default: isolation-harness.toml if present)"),
        )
        .arg(
            Arg::new("write-default-config")
                .long("write-default-config")
                .value_name("PATH")
                .help("Write a commented default config to PATH and exit")
                .conflicts_with("config"),
        )
        .arg(
            Arg::new("level")
                .long("level")
                .short('l')
                .value_name("LEVEL")
                .help("Only run this isolation level (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("anomaly")
                .long("anomaly")
                .short('a')
                .value_name("ANOMALY")
                .help("Only provoke this anomaly (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("repetitions")
                .long("repetitions")
                .short('n')
                .value_name("N")
                .help("Runs per cell")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("JSON output mode")
                .action(ArgAction::SetTrue)
                .conflicts_with("raw"),
        )
        .arg(
            Arg::new("raw")
                .long("raw")
                .help("Raw output mode (one tab-separated line per cell)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Log scenario outcomes (-v) or every step (-vv) to stderr")
                .action(ArgAction::Count),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_repeatable_filters() {
        let m = build_cli()
            .try_get_matches_from([
                "isolation-matrix",
                "--level",
                "serializable",
                "-l",
                "read-committed",
                "-a",
                "write-skew",
                "-vv",
            ])
            .unwrap();
        let levels: Vec<&String> = m.get_many::<String>("level").unwrap().collect();
        assert_eq!(levels, ["serializable", "read-committed"]);
        assert_eq!(m.get_count("verbose"), 2);
    }

    #[test]
    fn test_json_conflicts_with_raw() {
        assert!(build_cli()
            .try_get_matches_from(["isolation-matrix", "--json", "--raw"])
            .is_err());
    }

    #[test]
    fn test_repetitions_must_be_positive() {
        assert!(build_cli()
            .try_get_matches_from(["isolation-matrix", "-n", "0"])
            .is_err());
    }
}
