use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::ArgMatches;

use crate::commands::{check, run, simulate};
use crate::config::{load_config, Config, OutputFormat};

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let project_dir = std::env::current_dir()?;
    let config = load_config(&project_dir).await?;

    match matches.subcommand() {
        Some(("run", sub_m)) => handle_run(sub_m, &config),
        Some(("check", sub_m)) => handle_check(sub_m, &config),
        Some(("simulate", sub_m)) => handle_simulate(sub_m, &config).await,
        _ => anyhow::bail!("Unknown command. Run 'woundwait --help' for usage."),
    }
}

fn files(matches: &ArgMatches) -> Vec<PathBuf> {
    matches
        .get_many::<PathBuf>("files")
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn input_dir(matches: &ArgMatches, config: &Config) -> PathBuf {
    matches
        .get_one::<PathBuf>("input-dir")
        .cloned()
        .unwrap_or_else(|| config.input_dir.clone())
}

fn format(matches: &ArgMatches, config: &Config) -> OutputFormat {
    if matches.get_flag("json") {
        OutputFormat::Json
    } else {
        config.format
    }
}

fn handle_run(matches: &ArgMatches, config: &Config) -> Result<()> {
    let log_file = if matches.get_flag("no-log") {
        None
    } else {
        matches
            .get_one::<String>("log-file")
            .map(PathBuf::from)
            .or_else(|| config.log_path())
    };

    let options = run::RunOptions {
        files: files(matches),
        input_dir: input_dir(matches, config),
        format: format(matches, config),
        log_file,
        dump_tables: matches.get_flag("dump-tables") || config.dump_tables,
    };
    run::run(&options)
}

fn handle_check(matches: &ArgMatches, config: &Config) -> Result<()> {
    let options = check::CheckOptions {
        files: files(matches),
        input_dir: input_dir(matches, config),
        format: format(matches, config),
    };
    check::run(&options)
}

async fn handle_simulate(matches: &ArgMatches, config: &Config) -> Result<()> {
    let timeout = matches.get_one::<u64>("timeout-secs").copied().unwrap_or(30);
    let options = simulate::SimulateOptions {
        files: files(matches),
        input_dir: input_dir(matches, config),
        format: format(matches, config),
        timeout: Duration::from_secs(timeout),
    };
    simulate::run(&options).await
}
