//! Command-line interface

pub mod commands;
pub mod output;

use crate::core::args::{ArgSpec, Arity};
use clap::parser::ValueSource;
use clap::{Arg, ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{HistoryCommand, JobCommand, PingCommand, RunCommand, ValidateCommand};
use std::collections::HashMap;
use std::ffi::OsString;

/// Subcommands that take configuration flags
const CONFIGURED_COMMANDS: &[&str] = &["run", "job", "ping", "validate"];

/// Scheduled data-pipeline microservice
#[derive(Debug, Parser, Clone)]
#[command(name = "microservice")]
#[command(version)]
#[command(about = "Run a scheduled fetch-transform-predict-emit service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the YAML configuration file (defaults to $CONFIGURATION)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the service on its schedule (once if none is configured)
    Run(RunCommand),

    /// Run one unit of work now
    Job(JobCommand),

    /// Check that every component is reachable
    Ping(PingCommand),

    /// Validate the configuration
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),
}

/// Parsed command line plus the configuration values given as flags
#[derive(Debug, Clone)]
pub struct Invocation {
    pub cli: Cli,
    /// Explicit flag values keyed by configuration key
    pub overrides: HashMap<String, Vec<String>>,
}

impl Cli {
    /// Parse the process arguments, exiting on error like [`Parser::parse`]
    pub fn parse_with_schema(schema: &[ArgSpec]) -> Invocation {
        match Self::try_parse_with_schema(std::env::args_os(), schema) {
            Ok(invocation) => invocation,
            Err(err) => err.exit(),
        }
    }

    /// Parse arguments with one flag per schema key on the configured commands
    pub fn try_parse_with_schema<I, T>(itr: I, schema: &[ArgSpec]) -> Result<Invocation, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut command = Self::command();
        for name in CONFIGURED_COMMANDS {
            command = command.mut_subcommand(*name, |sub| sub.args(schema.iter().map(to_arg)));
        }

        let matches = command.try_get_matches_from(itr)?;
        let cli = Self::from_arg_matches(&matches)?;
        let overrides = match matches.subcommand() {
            Some((name, sub)) if CONFIGURED_COMMANDS.contains(&name) => explicit_values(sub, schema),
            _ => HashMap::new(),
        };

        Ok(Invocation { cli, overrides })
    }
}

fn to_arg(spec: &ArgSpec) -> Arg {
    let mut help = spec.help.clone();
    if !spec.env.is_empty() {
        help = format!("{} [env: {}]", help, spec.env).trim_start().to_string();
    }
    let arg = Arg::new(spec.key.clone())
        .long(spec.flag.clone())
        .help(help)
        .value_parser(clap::value_parser!(String));
    match spec.arity {
        Arity::Scalar => arg.num_args(1),
        Arity::List(len) => arg.num_args(len).value_names(vec!["VALUE"; len]),
    }
}

// Only values typed on the command line; defaults belong to the config layer
fn explicit_values(matches: &ArgMatches, schema: &[ArgSpec]) -> HashMap<String, Vec<String>> {
    schema
        .iter()
        .filter(|spec| matches.value_source(&spec.key) == Some(ValueSource::CommandLine))
        .filter_map(|spec| {
            let values = matches.get_many::<String>(&spec.key)?.cloned().collect();
            Some((spec.key.clone(), values))
        })
        .collect()
}
