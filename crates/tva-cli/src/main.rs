//! tvadid CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tva_core::DidConfig;
use tva_inference::econometrics::{did_canonical, event_study, group_means};
use tva_inference::{DidPipeline, Estimator, PanelFrame};

mod data;

#[derive(Parser)]
#[command(name = "tvadid")]
#[command(about = "Difference-in-differences estimation for the TVA county panel")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by every subcommand.
#[derive(clap::Args)]
struct InputArgs {
    /// Panel file (one row per county and census year)
    #[arg(short, long)]
    input: PathBuf,

    /// Estimation config (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// Field delimiter of the panel file
    #[arg(long, default_value = ",")]
    delimiter: char,
}

#[derive(Subcommand)]
enum Commands {
    /// Plain, outcome-regression, IPTW and doubly-robust ATT for every configured outcome
    Estimate {
        #[command(flatten)]
        input: InputArgs,

        /// Override the number of bootstrap replicates (0 = off)
        #[arg(long)]
        bootstrap: Option<usize>,

        /// Override the bootstrap seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Outcome means by treatment group and census year
    Means {
        #[command(flatten)]
        input: InputArgs,

        /// Outcome column (defaults to every configured outcome)
        #[arg(long)]
        outcome: Option<String>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the first-differenced table for one outcome as CSV
    FirstDifference {
        #[command(flatten)]
        input: InputArgs,

        /// Outcome column
        #[arg(long)]
        outcome: String,

        /// Output CSV. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Event study with county and year fixed effects
    EventStudy {
        #[command(flatten)]
        input: InputArgs,

        /// Outcome column
        #[arg(long)]
        outcome: String,

        /// Omitted (reference) census year
        #[arg(long)]
        reference_year: i64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Canonical 2×2 DID on outcome levels
    Did {
        #[command(flatten)]
        input: InputArgs,

        /// Outcome column
        #[arg(long)]
        outcome: String,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Estimate { input, bootstrap, seed, output, threads } => {
            cmd_estimate(&input, bootstrap, seed, output.as_ref(), threads)
        }
        Commands::Means { input, outcome, output } => {
            cmd_means(&input, outcome.as_deref(), output.as_ref())
        }
        Commands::FirstDifference { input, outcome, output } => {
            cmd_first_difference(&input, &outcome, output.as_ref())
        }
        Commands::EventStudy { input, outcome, reference_year, output } => {
            cmd_event_study(&input, &outcome, reference_year, output.as_ref())
        }
        Commands::Did { input, outcome, output } => cmd_did(&input, &outcome, output.as_ref()),
    }
}

fn load(args: &InputArgs) -> Result<(DidConfig, PanelFrame)> {
    let config = data::read_config(&args.config)?;
    let delimiter = u8::try_from(args.delimiter)
        .with_context(|| format!("delimiter '{}' is not a single byte", args.delimiter))?;
    let frame = data::read_panel(&args.input, &config, delimiter)?;
    Ok((config, frame))
}

fn cmd_estimate(
    args: &InputArgs,
    bootstrap: Option<usize>,
    seed: Option<u64>,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    let (mut config, frame) = load(args)?;
    if let Some(b) = bootstrap {
        config.bootstrap.replicates = b;
    }
    if let Some(s) = seed {
        config.bootstrap.seed = s;
    }

    let pipeline = DidPipeline::new(config)?;
    let report = pipeline.run(&frame)?;
    for out in &report.outcomes {
        if let Some(dr) = out.estimate(Estimator::DoublyRobust) {
            tracing::info!(outcome = %out.outcome, att = dr.att, "doubly robust");
        }
    }
    write_json(output, serde_json::to_value(&report)?)
}

fn cmd_means(args: &InputArgs, outcome: Option<&str>, output: Option<&PathBuf>) -> Result<()> {
    let (config, frame) = load(args)?;
    let outcomes: Vec<String> = match outcome {
        Some(o) => vec![o.to_string()],
        None => config.outcomes.clone(),
    };
    let mut out = serde_json::Map::new();
    for o in &outcomes {
        out.insert(o.clone(), serde_json::to_value(group_means(&frame, o)?)?);
    }
    write_json(output, serde_json::Value::Object(out))
}

fn cmd_first_difference(args: &InputArgs, outcome: &str, output: Option<&PathBuf>) -> Result<()> {
    let (config, frame) = load(args)?;
    let pipeline = DidPipeline::new(config)?;
    let diff = pipeline.difference(&pipeline.prepare(&frame), outcome)?;
    if diff.n_dropped() > 0 {
        tracing::warn!(dropped = diff.n_dropped(), "counties dropped from first difference");
    }
    let t = &diff.table;

    let mut wtr = match output {
        Some(path) => csv::Writer::from_writer(Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?,
        ) as Box<dyn std::io::Write>),
        None => csv::Writer::from_writer(Box::new(std::io::stdout()) as Box<dyn std::io::Write>),
    };
    let cols = &pipeline.config().columns;
    let mut header =
        vec![cols.county.clone(), "cluster".to_string(), cols.treatment.clone()];
    header.extend(t.covariate_names.iter().cloned());
    header.push(format!("d_{outcome}"));
    wtr.write_record(&header)?;
    for i in 0..t.len() {
        let mut row = vec![t.county[i].clone(), t.cluster[i].clone(), t.treated[i].to_string()];
        row.extend(t.x[i].iter().map(|v| v.to_string()));
        row.push(t.dy[i].to_string());
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn cmd_event_study(
    args: &InputArgs,
    outcome: &str,
    reference_year: i64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (config, frame) = load(args)?;
    let sample = frame.drop_excluded();
    let res = event_study(
        &sample,
        outcome,
        reference_year,
        config.cluster_column.as_deref(),
        config.confidence_level,
    )?;
    let sensitivity_input = match res.to_sensitivity_input() {
        Ok(input) => Some(input),
        Err(e) => {
            tracing::warn!(error = %e, "event study cannot feed a sensitivity analysis");
            None
        }
    };
    write_json(
        output,
        serde_json::json!({
            "outcome": outcome,
            "event_study": res,
            "sensitivity_input": sensitivity_input,
        }),
    )
}

fn cmd_did(args: &InputArgs, outcome: &str, output: Option<&PathBuf>) -> Result<()> {
    let (config, frame) = load(args)?;
    let res = did_canonical(
        &frame,
        outcome,
        config.period_columns,
        config.cluster_column.as_deref(),
    )?;
    write_json(output, serde_json::json!({ "outcome": outcome, "did": res }))
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
