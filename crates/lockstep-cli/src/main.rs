use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lockstep_core::config::LockstepConfig;
use lockstep_core::{JobParams, JobResult};
use lockstep_scheduler::Scheduler;
use serde_json::Value;
use tracing::info;

mod jobs;

#[derive(Debug, Parser)]
#[command(name = "lockstep", version, about = "Run dependency-ordered jobs and job groups")]
struct Cli {
    /// Config file. Defaults to $LOCKSTEP_CONFIG, then ./lockstep.toml.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every runnable job and group.
    List,
    /// Print the execution layers of a job or group.
    Plan { job: String },
    /// Run a job or group once and wait for the result.
    Run {
        job: String,
        /// Run-time parameter, `key=value`. Repeatable.
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Start all configured triggers and run until Ctrl-C.
    Schedule,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lockstep=info,lockstep_scheduler=info,lockstep_lock=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > LOCKSTEP_CONFIG env > ./lockstep.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("LOCKSTEP_CONFIG").ok());
    let config = LockstepConfig::load(config_path.as_deref()).context("failed to load config")?;

    let scheduler = jobs::builtin()
        .into_iter()
        .fold(Scheduler::builder(config), |builder, job| builder.job_arc(job))
        .build()?;

    let code = match cli.command {
        Command::List => {
            for name in scheduler.job_names() {
                if scheduler.is_group(&name) {
                    println!("{name} (group)");
                } else {
                    println!("{name}");
                }
            }
            ExitCode::SUCCESS
        }
        Command::Plan { job } => {
            for (i, layer) in scheduler.plan(&job)?.iter().enumerate() {
                let members: Vec<String> = layer
                    .iter()
                    .map(|job_ref| {
                        if job_ref.params().is_empty() {
                            job_ref.to_string()
                        } else {
                            format!(
                                "{job_ref} {}",
                                serde_json::to_string(job_ref.params()).unwrap_or_default()
                            )
                        }
                    })
                    .collect();
                println!("{}: {}", i + 1, members.join(", "));
            }
            ExitCode::SUCCESS
        }
        Command::Run { job, params } => {
            let params: JobParams = params
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();
            let result = scheduler.run_once_with_params(&job, params).settled().await;
            report(&job, &result)
        }
        Command::Schedule => {
            let started = scheduler.start()?;
            if started == 0 {
                println!("no triggers configured");
                return Ok(ExitCode::SUCCESS);
            }
            info!(triggers = started, "scheduling, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("shutting down");
            ExitCode::SUCCESS
        }
    };

    scheduler.shutdown();
    Ok(code)
}

fn report(job: &str, result: &JobResult) -> ExitCode {
    println!("{job}: {result}");
    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
