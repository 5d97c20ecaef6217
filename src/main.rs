use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagetailor::config::RuntimeConfig;
use pagetailor::rules::load_rules;
use pagetailor::scenario::{load_scenario, run_scenario, SimulationReport};
use pagetailor_action_runner::ExecOutcome;
use pagetailor_trigger_engine::Rule;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted visitor scenario against an in-memory page
    Simulate(SimulateArgs),
    /// Work with rule documents
    Rules(RulesArgs),
    /// Run a scenario and show what ends up in web storage
    StorageReport(StorageReportArgs),
}

#[derive(Args)]
struct SimulateArgs {
    /// Scenario file (yaml)
    scenario: PathBuf,

    /// Rules file (yaml/json); without it the runtime only observes
    #[arg(short, long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    output: OutputFormat,
}

#[derive(Args)]
struct RulesArgs {
    #[command(subcommand)]
    command: RulesCommand,
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Validate a rules document and summarize it
    Check {
        /// Rules file (yaml/json)
        file: PathBuf,
    },
}

#[derive(Args)]
struct StorageReportArgs {
    /// Scenario file (yaml)
    scenario: PathBuf,

    /// Rules file (yaml/json)
    #[arg(short, long, value_name = "FILE")]
    rules: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Yaml,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.debug)?;

    let config = RuntimeConfig::load(cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::Simulate(args) => cmd_simulate(args, config).await,
        Commands::Rules(args) => cmd_rules(args).await,
        Commands::StorageReport(args) => cmd_storage_report(args, config).await,
    };

    if let Err(err) = result {
        error!("command failed: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn load_optional_rules(path: Option<&PathBuf>) -> Result<Vec<Rule>> {
    match path {
        Some(path) => load_rules(path).await,
        None => Ok(Vec::new()),
    }
}

async fn cmd_simulate(args: SimulateArgs, config: RuntimeConfig) -> Result<()> {
    let scenario = load_scenario(&args.scenario).await?;
    let rules = load_optional_rules(args.rules.as_ref()).await?;
    let report = run_scenario(&scenario, rules, config).await?;

    match args.output {
        OutputFormat::Human => print_human_report(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }
    Ok(())
}

async fn cmd_rules(args: RulesArgs) -> Result<()> {
    match args.command {
        RulesCommand::Check { file } => {
            let rules = load_rules(&file).await?;
            println!("{}: {} rule(s) ok", file.display(), rules.len());
            for rule in &rules {
                let description = rule.description.as_deref().unwrap_or("-");
                println!(
                    "  {:<24} triggers={} actions={} refire={}  {}",
                    rule.id,
                    rule.triggers.len(),
                    rule.actions.len(),
                    rule.refire,
                    description
                );
            }
            Ok(())
        }
    }
}

async fn cmd_storage_report(args: StorageReportArgs, config: RuntimeConfig) -> Result<()> {
    let scenario = load_scenario(&args.scenario).await?;
    let rules = load_optional_rules(args.rules.as_ref()).await?;
    let report = run_scenario(&scenario, rules, config).await?;

    println!("storage after scenario {:?}:", report.scenario);
    println!("  degraded to memory: {}", report.storage.degraded);
    for (scope, slice) in [
        ("session", &report.storage.session),
        ("durable", &report.storage.durable),
    ] {
        println!(
            "  {scope}: {} entries, {} byte(s), {} foreign key(s)",
            slice.entries, slice.bytes, slice.foreign_keys
        );
        for key in &slice.engine_keys {
            println!("    {key}");
        }
    }
    Ok(())
}

fn print_human_report(report: &SimulationReport) {
    println!(
        "scenario {:?}: {} step(s)",
        report.scenario,
        report.steps.len()
    );
    for (index, step) in report.steps.iter().enumerate() {
        if step.fired.is_empty() {
            println!("  {:>2}. {}", index + 1, step.step);
        } else {
            let fired = step
                .fired
                .iter()
                .map(|firing| {
                    format!(
                        "{} => {}",
                        firing.rule_id,
                        firing
                            .outcomes
                            .iter()
                            .map(outcome_label)
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            println!("  {:>2}. {:<24} {}", index + 1, step.step, fired);
        }
    }

    let analytics = &report.analytics;
    println!("journey:");
    println!(
        "  visitor {} (visit #{}), {} page(s), {} event(s)",
        analytics.visitor_id.as_str(),
        analytics.visit_number,
        analytics.page_count,
        analytics.event_count
    );
    println!(
        "  intent {:.2} ({:?}), session {}s, avg scroll {:.0}%",
        analytics.intent_score,
        analytics.intent_level,
        analytics.session_duration_ms / 1000,
        analytics.avg_scroll_depth
    );
    println!(
        "page: {} mutation(s), {} overlay(s), {} redirect(s)",
        report.dom_mutations.len(),
        report.overlays_shown,
        report.redirects.len()
    );
    for mutation in &report.dom_mutations {
        println!("  {mutation}");
    }
    println!(
        "beacons: {} page-view, {} journey update(s)",
        report.page_view_beacons, report.journey_beacons
    );
}

fn outcome_label(outcome: &ExecOutcome) -> String {
    match outcome {
        ExecOutcome::Applied { mutated, matched } => format!("applied({mutated}/{matched})"),
        ExecOutcome::PartialFailure {
            mutated, failed, ..
        } => format!("partial({mutated} ok, {failed} failed)"),
        ExecOutcome::NotFound => "not-found".to_string(),
        ExecOutcome::Duplicate => "duplicate".to_string(),
        ExecOutcome::Scheduled => "scheduled".to_string(),
        ExecOutcome::Cancelled => "cancelled".to_string(),
        ExecOutcome::Invalid(reason) => format!("invalid: {reason}"),
    }
}
