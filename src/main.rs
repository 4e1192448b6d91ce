//! RecSIS ELT CLI - batch pipeline runner

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use recsis_elt::adapter::Adapters;
use recsis_elt::event::write_trace;
use recsis_elt::{
    EltConfig, EltError, ExecutionPolicy, FixSuggestion, Pipeline, PipelineSummary, Runnable,
    Runner, Stage,
};

#[derive(Parser)]
#[command(name = "recsis-elt")]
#[command(about = "RecSIS ELT - copy the study information system into the search index")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (extract → transform → load, then migrate if enabled)
    Run {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "elt.toml")]
        config: PathBuf,

        /// Run only this stage (repeatable, default: extract, transform, load
        /// plus migrate when runtime.migrate is set)
        #[arg(short, long = "stage", value_enum)]
        stages: Vec<Stage>,

        /// Override the configured execution policy
        #[arg(short, long, value_enum)]
        policy: Option<ExecutionPolicy>,

        /// Exit non-zero when any operation failed
        #[arg(long)]
        strict: bool,
    },

    /// Validate config and pipeline definition (no database access)
    Validate {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "elt.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            stages,
            policy,
            strict,
        } => run_pipeline(&config, stages, policy, strict).await,
        Commands::Validate { config } => validate_pipeline(&config),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn run_pipeline(
    config_path: &Path,
    stages: Vec<Stage>,
    policy: Option<ExecutionPolicy>,
    strict: bool,
) -> Result<(), EltError> {
    let mut config = EltConfig::load(config_path)?;
    if let Some(policy) = policy {
        config.runtime.policy = policy;
    }
    let strict = strict || config.runtime.strict_exit;
    let stages = if stages.is_empty() {
        config.default_stages()
    } else {
        stages
    };

    // Fail before touching any store if the definition is inconsistent
    let def = config.pipeline_def()?;
    let pipeline = Pipeline::assemble(&def)?;

    let adapters = config.adapters(&stages)?;
    check_reachable(&adapters, &stages).await?;

    let cancel = CancellationToken::new();
    let ctx = config
        .run_context(adapters)
        .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running operations");
            cancel.cancel();
        }
    });

    println!(
        "{} Running {} | policy: {} | parallelism: {}",
        "→".cyan(),
        stages
            .iter()
            .map(Stage::to_string)
            .collect::<Vec<_>>()
            .join(" → ")
            .cyan()
            .bold(),
        ctx.policy().to_string().cyan(),
        ctx.max_parallelism().to_string().cyan()
    );

    let summary = pipeline.run(&ctx, &stages).await;
    print_summary(&summary);

    if let Some(path) = &config.runtime.trace_file {
        write_trace(ctx.events(), path)?;
        println!("  {} {}", "Trace:".dimmed(), path.display());
    }

    let failed = summary.total_failed();
    if failed == 0 {
        return Ok(());
    }
    if strict {
        return Err(EltError::StagesFailed { failed });
    }
    warn!(
        failed,
        "pipeline finished with failures but exits 0 (use --strict or runtime.strict_exit to fail the process)"
    );
    Ok(())
}

/// Check only the services the selected stages talk to
async fn check_reachable(adapters: &Adapters, stages: &[Stage]) -> Result<(), EltError> {
    let unreachable = |target: &str| {
        let target = target.to_string();
        move |source| EltError::Unreachable { target, source }
    };

    if stages.contains(&Stage::Extract) {
        adapters.source.ping().await.map_err(unreachable("source"))?;
    }
    adapters
        .destination
        .ping()
        .await
        .map_err(unreachable("destination"))?;
    if stages.contains(&Stage::Load) {
        adapters
            .index
            .health()
            .await
            .map_err(unreachable("search index"))?;
    }
    Ok(())
}

fn print_summary(summary: &PipelineSummary) {
    println!();
    println!("{}", "Summary:".cyan().bold());
    for report in &summary.reports {
        let stage = format!("{:<10}", report.stage.to_string());
        if report.skipped {
            println!("  {} {} {}", "-".dimmed(), stage, "skipped".dimmed());
        } else if report.failed_count == 0 {
            println!(
                "  {} {} {:.2?}",
                "✓".green(),
                stage.green(),
                report.elapsed
            );
        } else {
            println!(
                "  {} {} {} failed in {:.2?}",
                "✗".red(),
                stage.red(),
                report.failed_count.to_string().red().bold(),
                report.elapsed
            );
        }
    }
    println!(
        "  Run {} finished in {:.2?}",
        summary.run_id.dimmed(),
        summary.elapsed
    );
}

fn validate_pipeline(config_path: &Path) -> Result<(), EltError> {
    let config = EltConfig::load(config_path)?;
    let def = config.pipeline_def()?;
    let pipeline = Pipeline::assemble(&def)?;

    println!(
        "{} Pipeline '{}' is valid",
        "✓".green(),
        config.pipeline.display()
    );
    println!("  Source: {}", config.source.describe());
    println!("  Destination: {}", config.destination.describe());
    println!("  Search: {}", config.search.url);
    println!(
        "  Policy: {} | parallelism: {}",
        config.runtime.policy,
        config.max_parallelism()
    );
    println!("  Operations: {}", pipeline.operation_count());
    if !def.migrate.is_empty() {
        let when = if config.runtime.migrate {
            "runs by default"
        } else {
            "runs with --stage migrate"
        };
        println!("  Migrate: {} step(s), {}", def.migrate.len(), when);
    }

    for stage in Stage::ALL {
        print_runner(pipeline.stage(stage), 1);
    }

    Ok(())
}

fn print_runner(runner: &Runner, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}{} ({:?}, {} operations)",
        runner.label().cyan(),
        runner.mode(),
        runner.leaf_count()
    );
    for child in runner.children() {
        match child {
            Runnable::Runner(nested) => print_runner(nested, depth + 1),
            Runnable::Operation(op) => println!("{indent}  - {} [{}]", op.name(), op.kind()),
        }
    }
}
