//! relcomp command-line driver.
//!
//! Compresses one KB directory and writes the compressed KB, an optional
//! template report directory and `summary.json`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relcomp::{
    Compressor, ConfigError, EvalMetric, KbLocation, MinerConfig, NegativeStrategy, RelcompError, RunConfig,
};

/// Compress a relational knowledge base by mining Horn rules.
#[derive(Parser, Debug)]
#[command(name = "relcomp")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Input KB: base directory and KB name
    #[arg(short = 'I', num_args = 2, value_names = ["PATH", "NAME"], required = true)]
    input: Vec<String>,

    /// Output KB: base directory and KB name [default: <input>_comp]
    #[arg(short = 'O', num_args = 2, value_names = ["PATH", "NAME"])]
    output: Option<Vec<String>>,

    /// Negative KB: base directory and KB name
    #[arg(short = 'N', num_args = 2, value_names = ["PATH", "NAME"])]
    negative: Option<Vec<String>>,

    /// Negative sampling budget factor; 1 or more selects adversarial sampling
    #[arg(short = 'g', default_value_t = 0.0)]
    budget: f64,

    /// Weight negative samples
    #[arg(short = 'w')]
    weighted: bool,

    /// Budgeted negative generator without a negative KB (uniform, pos-relative, neg-interval)
    #[arg(short = 's', long = "strategy", default_value = "uniform")]
    strategy: String,

    /// Worker threads
    #[arg(short = 't', default_value_t = 1)]
    threads: usize,

    /// Re-derive the input from the output and compare
    #[arg(short = 'v')]
    validate: bool,

    /// Beam width
    #[arg(short = 'b', default_value_t = 3)]
    beamwidth: usize,

    /// Evaluation metric (τ, δ or h)
    #[arg(short = 'e', default_value = "δ")]
    metric: String,

    /// Minimum fact coverage
    #[arg(short = 'f', default_value_t = 0.05)]
    fact_coverage: f64,

    /// Minimum constant coverage
    #[arg(short = 'c', default_value_t = 0.25)]
    constant_coverage: f64,

    /// Stopping compression rate
    #[arg(short = 'p', default_value_t = 0.9)]
    stop_rate: f64,

    /// Observation ratio; below 1 disables estimation
    #[arg(short = 'o', default_value_t = 2.0)]
    observation_ratio: f64,

    /// Maximum rule length
    #[arg(long = "max-length", default_value_t = 10)]
    max_length: usize,

    /// Sampling seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Run the template pre-pass and write its TSV reports here
    #[arg(short = 'T', value_name = "DIR")]
    templates: Option<PathBuf>,
}

fn location(values: &[String]) -> Option<KbLocation> {
    match values {
        [base, name] => Some(KbLocation::new(base, name.as_str())),
        _ => None,
    }
}

impl Cli {
    fn into_config(self) -> Result<RunConfig> {
        let input = location(&self.input).context("-I takes a path and a name")?;
        let metric: EvalMetric = self.metric.parse()?;
        let strategy: NegativeStrategy = self.strategy.parse()?;
        let miner = MinerConfig::builder()
            .budget_factor(self.budget)
            .weighted(self.weighted)
            .negative_strategy(strategy)
            .threads(self.threads)
            .beamwidth(self.beamwidth)
            .eval_metric(metric)
            .min_fact_coverage(self.fact_coverage)
            .min_constant_coverage(self.constant_coverage)
            .stop_compression_rate(self.stop_rate)
            .observation_ratio(self.observation_ratio)
            .max_rule_length(self.max_length)
            .seed(self.seed)
            .build()?;

        let mut config = RunConfig::new(input);
        config.output = self.output.as_deref().and_then(location);
        config.negative = self.negative.as_deref().and_then(location);
        config.validate = self.validate;
        config.template_dir = self.templates;
        config.miner = miner;
        Ok(config)
    }
}

/// Process exit status for a failed run: 2 for bad configuration, 3 for
/// unreadable or unwritable KBs, 4 for bad rules, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<RelcompError>() {
        Some(e) if e.is_config() => 2,
        Some(e) if e.is_kb() => 3,
        Some(e) if e.is_rule() => 4,
        Some(e) if e.is_internal() => 70,
        _ => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;
    let compressor = Compressor::new(config).context("invalid configuration")?;
    let summary = compressor.run().context("compression failed")?;

    info!(
        kb = %summary.kb,
        rules = summary.rules,
        residual = summary.residual_facts,
        counterexamples = summary.counterexamples,
        ratio = summary.compressed_ratio,
        elapsed_ms = %summary.elapsed_ms,
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
