//! CLI command definitions
//!
//! `run`, `job`, `ping` and `validate` also accept one flag per configuration
//! key; those are attached at parse time from the service's schema.

use clap::Args;

/// Run the service on its configured schedule
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Don't save runs to history
    #[arg(long)]
    pub no_history: bool,
}

/// Health-check, run one unit of work, and exit
#[derive(Debug, Args, Clone)]
pub struct JobCommand {
    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Health-check every component and exit
#[derive(Debug, Args, Clone)]
pub struct PingCommand {}

/// Resolve and validate the configuration without connecting
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Print the resolved configuration as JSON
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Service name to filter by
    #[arg(short, long)]
    pub service: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}
