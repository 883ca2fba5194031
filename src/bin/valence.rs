use std::io;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use valence::*;

fn command() -> Command {
    Command::new("valence")
        .about("Counts the valence electrons in chemical formulas")
        .arg(
            Arg::new("table")
                .short('t')
                .long("table")
                .value_name("CSV")
                .env("VALENCE_TABLE")
                .action(ArgAction::Set)
                .help("Load the valence table from a CSV file with the columns symbol,valence"),
        )
        .arg(
            Arg::new("composition")
                .short('c')
                .long("composition")
                .action(ArgAction::SetTrue)
                .help("Also print the number of atoms of each element"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .env("VALENCE_LOG")
                .default_value("warn")
                .action(ArgAction::Set)
                .help("Log level: off, error, warn, info, debug or trace"),
        )
        .arg(
            Arg::new("formulas")
                .value_name("FORMULA")
                .num_args(1..)
                .action(ArgAction::Append)
                .help("Formulas to evaluate instead of prompting"),
        )
}

fn main() -> Result<()> {
    let matches = command().get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("warn");
    init_logging(level)?;

    let loaded;
    let table = match matches.get_one::<String>("table") {
        Some(path) => {
            loaded = ValenceTable::from_csv_path(path)
                .with_context(|| format!("Failed to load valence table from {}", path))?;
            &loaded
        }
        None => ValenceTable::standard(),
    };

    let options = ReportOptions {
        composition: matches.get_flag("composition"),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match matches.get_many::<String>("formulas") {
        Some(formulas) => {
            for formula in formulas {
                report_formula(formula.trim(), table, options, &mut out)?;
            }
        }
        None => run_loop(io::stdin().lock(), &mut out, table, options)?,
    }

    Ok(())
}
