use anyhow::{Context, Result};
use microservice::cli::commands::{HistoryCommand, ValidateCommand};
use microservice::cli::output::*;
use microservice::cli::{Cli, Command, Invocation};
use microservice::components::{BuiltinInput, BuiltinModel, BuiltinOutput};
use microservice::core::args::ArgSpec;
use microservice::core::config::{self, Configuration, CONFIGURATION_ENV};
use microservice::execution::{ServiceEngine, SystemClock};
use microservice::persistence::{
    InMemoryPersistence, PersistenceBackend, RunSummary, SqliteRunStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

type Service = ServiceEngine<BuiltinInput, BuiltinModel, BuiltinOutput>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let schema = Service::schema();
    let Invocation { cli, overrides } = Cli::parse_with_schema(&schema);

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let result = match &cli.command {
        Command::Run(cmd) => run_service(&cli, &schema, &overrides, cmd.no_history).await,
        Command::Job(cmd) => run_job(&cli, &schema, &overrides, cmd.no_history).await,
        Command::Ping(_) => run_ping(&cli, &schema, &overrides).await,
        Command::Validate(cmd) => validate(&cli, &schema, &overrides, cmd),
        Command::History(cmd) => show_history(cmd).await,
    };

    if let Err(err) = result {
        println!("{} {}", CROSS, style(format!("{:#}", err)).red());
        error!("{:#}", err);
        std::process::exit(1);
    }

    Ok(())
}

/// File (from `--config` or `$CONFIGURATION`), then environment, then flags
fn load_configuration(
    cli: &Cli,
    schema: &[ArgSpec],
    overrides: &HashMap<String, Vec<String>>,
) -> Result<Configuration> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var(CONFIGURATION_ENV).ok())
        .filter(|p| !p.trim().is_empty());

    let file = match &path {
        Some(path) => {
            info!("Loading configuration from {}", path);
            config::load_file(path)?
        }
        None => {
            info!("No configuration file given, using environment and flags only");
            Default::default()
        }
    };

    Ok(config::resolve(file, &config::environment(), overrides, schema)?)
}

async fn build_service(
    cli: &Cli,
    schema: &[ArgSpec],
    overrides: &HashMap<String, Vec<String>>,
    no_history: bool,
) -> Result<Service> {
    let config = load_configuration(cli, schema, overrides)?;
    let mut service = Service::from_config(&config)?;

    let store: Arc<dyn PersistenceBackend> = if no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        Arc::new(SqliteRunStore::with_default_path().await?)
    };
    service = service.with_history(store);

    service.add_event_handler(|event| println!("{}", format_service_event(event)));

    println!(
        "{} Loaded service: {}",
        INFO,
        style(&service.settings().name).bold()
    );
    Ok(service)
}

async fn run_service(
    cli: &Cli,
    schema: &[ArgSpec],
    overrides: &HashMap<String, Vec<String>>,
    no_history: bool,
) -> Result<()> {
    let service = build_service(cli, schema, overrides, no_history).await?;
    service.run_service(SystemClock).await?;
    Ok(())
}

async fn run_job(
    cli: &Cli,
    schema: &[ArgSpec],
    overrides: &HashMap<String, Vec<String>>,
    no_history: bool,
) -> Result<()> {
    let service = build_service(cli, schema, overrides, no_history).await?;
    service.run_once_now().await?;
    Ok(())
}

async fn run_ping(
    cli: &Cli,
    schema: &[ArgSpec],
    overrides: &HashMap<String, Vec<String>>,
) -> Result<()> {
    let service = build_service(cli, schema, overrides, true).await?;
    println!("{} Checking output, input and model...", SPINNER);
    service.run_ping_now().await?;
    Ok(())
}

fn validate(
    cli: &Cli,
    schema: &[ArgSpec],
    overrides: &HashMap<String, Vec<String>>,
    cmd: &ValidateCommand,
) -> Result<()> {
    println!("{} Validating configuration...", INFO);

    let config = load_configuration(cli, schema, overrides)?;
    let service = Service::from_config(&config)?;
    let settings = service.settings();

    println!("{} Configuration is valid!", CHECK);
    println!("  Name: {}", style(&settings.name).bold());
    println!(
        "  Input: {}",
        style(config.get_str("input.kind").unwrap_or("-")).cyan()
    );
    println!(
        "  Output: {}",
        style(config.get_str("output.kind").unwrap_or("-")).cyan()
    );
    println!(
        "  Model: {}",
        style(config.get_str("model.kind").unwrap_or("-")).cyan()
    );
    let schedule = match (&settings.scheduled_time, settings.interval) {
        (Some(time), _) => format!("daily at {}", time),
        (None, Some(interval)) => format!("every {}s", interval),
        (None, None) => "run once".to_string(),
    };
    println!("  Schedule: {}", style(schedule).cyan());
    println!(
        "  Retries: {} (backoff {}s)",
        style(settings.retry.retries).cyan(),
        settings.retry.backoff
    );

    if cmd.json {
        let json = serde_json::to_string_pretty(&config.redacted())?;
        println!("\n{}", json);
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = SqliteRunStore::with_default_path().await?;

    // If a specific run is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.details)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = if let Some(service_name) = &cmd.service {
        store.list_runs(service_name).await?
    } else {
        let mut all_runs = Vec::new();
        for service_name in store.list_services().await? {
            all_runs.extend(store.list_runs(&service_name).await?);
        }
        all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_runs
    };
    let runs: Vec<RunSummary> = runs.into_iter().take(cmd.limit).collect();

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, runs.len());
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, details: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Service: {}", style(&summary.service_name).bold());
    println!("  Trigger: {}", summary.trigger);
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    println!("  Completed: {}", style(summary.completed_at.to_rfc3339()).dim());
    if let Ok(duration) = summary.duration().to_std() {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }
    if let Some(error) = &summary.error {
        println!("  Error: {}", style(error).red());
    }

    if details {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
