//! CLI command definitions using `clap`

pub mod handlers;

use anyhow::Result;
use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("woundwait")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Replay transaction schedules through a wound-wait lock manager")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(cmd_run())
        .subcommand(cmd_check())
        .subcommand(cmd_simulate())
}

pub fn after_help_text(examples: &[&str]) -> String {
    let mut text = String::from("EXAMPLES:\n");
    for example in examples {
        text.push_str("  ");
        text.push_str(example);
        text.push('\n');
    }
    text
}

fn arg_files() -> Arg {
    Arg::new("files")
        .num_args(0..)
        .value_parser(clap::value_parser!(std::path::PathBuf))
        .help("Schedule files (default: every *.txt in the input directory)")
}

fn arg_input_dir() -> Arg {
    Arg::new("input-dir")
        .long("input-dir")
        .value_name("DIR")
        .value_parser(clap::value_parser!(std::path::PathBuf))
        .help("Directory scanned for schedules when no file is given")
}

fn arg_json() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON lines")
}

fn cmd_run() -> Command {
    Command::new("run")
        .about("Replay schedules sequentially and report every locking decision")
        .arg(arg_files())
        .arg(arg_input_dir())
        .arg(arg_json())
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("PATH")
                .help("Append the event log to PATH"),
        )
        .arg(
            Arg::new("no-log")
                .long("no-log")
                .action(ArgAction::SetTrue)
                .conflicts_with("log-file")
                .help("Do not write an event log"),
        )
        .arg(
            Arg::new("dump-tables")
                .long("dump-tables")
                .action(ArgAction::SetTrue)
                .help("Log lock and transaction tables after every operation"),
        )
        .after_help(after_help_text(&[
            "woundwait run                       Replay every schedule in ./input",
            "woundwait run s1.txt s2.txt         Replay the given schedules in order",
            "woundwait run s1.txt --json         Emit one JSON record per decision",
        ]))
}

fn cmd_check() -> Command {
    Command::new("check")
        .about("Parse schedules without running them")
        .arg(arg_files())
        .arg(arg_input_dir())
        .arg(arg_json())
}

fn cmd_simulate() -> Command {
    Command::new("simulate")
        .about("Run each transaction as a concurrent actor")
        .long_about(
            "Every transaction of a schedule runs as its own task against one shared \
             coordinator. Ages follow the order of the begin operations; the interleaving \
             of everything else is up to the runtime, so output differs between runs.",
        )
        .arg(arg_files())
        .arg(arg_input_dir())
        .arg(arg_json())
        .arg(
            Arg::new("timeout-secs")
                .long("timeout-secs")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("30")
                .help("Stop waiting for actors after this many seconds"),
        )
}

/// Initialize tracing on stderr; `RUST_LOG` overrides the INFO default
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed
pub fn init_tracing() -> Result<()> {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_run_accepts_files_and_flags() -> Result<()> {
        let matches =
            build_cli().try_get_matches_from(["woundwait", "run", "a.txt", "b.txt", "--json", "--no-log"])?;
        let Some(("run", sub)) = matches.subcommand() else {
            anyhow::bail!("run subcommand not matched");
        };
        let files: Vec<_> = sub
            .get_many::<std::path::PathBuf>("files")
            .map(|v| v.cloned().collect())
            .unwrap_or_default();
        assert_eq!(files.len(), 2);
        assert!(sub.get_flag("json"));
        assert!(sub.get_flag("no-log"));
        Ok(())
    }

    #[test]
    fn test_log_file_conflicts_with_no_log() {
        let result = build_cli().try_get_matches_from([
            "woundwait",
            "run",
            "--no-log",
            "--log-file",
            "x.log",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_simulate_rejects_zero_timeout() {
        let result =
            build_cli().try_get_matches_from(["woundwait", "simulate", "--timeout-secs", "0"]);
        assert!(result.is_err());
    }
}
