use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::Cli;
use cli::commands::{Commands, SubmitCommands};
use overlayd::config::{Backend, Config};
use overlayd::domain::{JobOutcome, JobReport};
use overlayd::ipc::{DaemonEvent, DaemonResponse, Events, IpcClient};

fn setup_logging(cli: &Cli, config: &Config) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(config.log_level.as_deref().unwrap_or("info"));
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    if cli.is_verbose() {
        builder.filter_module("overlayd", log::LevelFilter::Debug);
    }

    if cli.log_stderr {
        builder.target(env_logger::Target::Stderr).init();
        info!("Logging initialized, writing to stderr");
        return Ok(());
    }

    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("overlayd")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("overlayd.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, mut config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    match &cli.command {
        Commands::Daemon { dry_run } => {
            if *dry_run {
                config.backend = Backend::DryRun;
            }
            runtime.block_on(run_daemon(&config))
        }
        Commands::Submit { request } => runtime.block_on(handle_submit(cli, request, &config)),
        Commands::Status => runtime.block_on(handle_status(&config)),
        Commands::Watch { once } => runtime.block_on(handle_watch(*once, &config)),
    }
}

async fn run_daemon(config: &Config) -> Result<()> {
    println!(
        "{} listening on {}",
        "overlayd".cyan(),
        config.socket_path().display()
    );
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutdown signal received");
    };
    overlayd::daemon::run(config, shutdown)
        .await
        .context("Daemon failed")?;
    println!("{}", "Daemon stopped".yellow());
    Ok(())
}

async fn connect(config: &Config) -> Result<IpcClient> {
    let client = IpcClient::with_socket(config.socket_path());
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to daemon at {}", config.socket_path().display()))?;
    Ok(client)
}

fn fail_on_error(response: &DaemonResponse) -> Result<()> {
    match &response.error {
        Some(error) => Err(eyre!("daemon error {}: {}", error.code, error.message)),
        None => Ok(()),
    }
}

async fn handle_submit(cli: &Cli, command: &SubmitCommands, config: &Config) -> Result<()> {
    let timestamp = u64::try_from(chrono::Utc::now().timestamp_millis()).context("Clock is before the epoch")?;
    let request = command.to_request(&cli.caller, timestamp);
    info!("Submitting {} request at {}", request.command, timestamp);

    let client = connect(config).await?;
    let response = client.submit(&request).await.context("Submit failed")?;

    if let Some(rejection) = response.rejection() {
        println!("{} {}", "Rejected:".red(), rejection);
        return Err(eyre!("request rejected: {}", rejection));
    }
    fail_on_error(&response)?;

    let jobs = response
        .result
        .as_ref()
        .and_then(|result| result.get("jobs"))
        .and_then(|jobs| jobs.as_array())
        .map(|jobs| jobs.len())
        .unwrap_or(0);
    println!("{} {} ({} jobs)", "Accepted:".green(), request.command, jobs);
    Ok(())
}

async fn handle_status(config: &Config) -> Result<()> {
    let client = connect(config).await?;
    let response = client.status().await.context("Status request failed")?;
    fail_on_error(&response)?;

    let status = response.result.unwrap_or_default();
    let state = status["state"].as_str().unwrap_or("unknown");
    let state = if state == "busy" { state.yellow() } else { state.green() };
    println!("{} {}", "State:".cyan(), state);
    println!("{} {}", "Backend:".cyan(), status["backend"].as_str().unwrap_or("unknown"));
    println!("{} {}s", "Uptime:".cyan(), status["uptime_secs"]);

    let queued = status["queued"].as_array().cloned().unwrap_or_default();
    if queued.is_empty() {
        println!("{}", "Queue is empty".dimmed());
    }
    for (position, entry) in queued.iter().enumerate() {
        let marker = if position == 0 { ">" } else { " " };
        println!(
            "{} job-{} {}",
            marker,
            entry["id"],
            entry["job"]["kind"].as_str().unwrap_or("?")
        );
    }
    Ok(())
}

async fn handle_watch(once: bool, config: &Config) -> Result<()> {
    let client = connect(config).await?;
    let response = client.subscribe().await.context("Subscribe failed")?;
    fail_on_error(&response)?;
    println!("{}", "Watching engine events (ctrl-c to stop)".cyan());

    while let Some(event) = client.recv_event().await {
        let drained = event.event == Events::ALL_JOBS_DRAINED;
        print_event(&event);
        if once && drained {
            break;
        }
    }
    Ok(())
}

fn print_event(event: &DaemonEvent) {
    match event.event.as_str() {
        Events::JOB_STARTED => println!(
            "{} job-{} {}",
            "started".blue(),
            event.data["id"],
            event.data["job"]["kind"].as_str().unwrap_or("?")
        ),
        Events::JOB_FINISHED => match serde_json::from_value::<JobReport>(event.data.clone()) {
            Ok(report) => print_report(&report),
            Err(e) => log::warn!("Unreadable job report: {}", e),
        },
        Events::ALL_JOBS_DRAINED => {
            let count = event.data["reports"].as_array().map(|r| r.len()).unwrap_or(0);
            println!("{} {} jobs", "drained".green().bold(), count);
        }
        other => println!("{} {}", other.dimmed(), event.data),
    }
}

fn print_report(report: &JobReport) {
    let outcome = match &report.outcome {
        JobOutcome::Completed => "completed".green(),
        JobOutcome::Failed(reason) => format!("failed: {}", reason).red(),
        JobOutcome::Abandoned => "abandoned".yellow(),
    };
    println!("{} {} {} {}", "finished".blue(), report.id, report.job, outcome);
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&cli, &config).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, config).context("Application failed")?;

    Ok(())
}
