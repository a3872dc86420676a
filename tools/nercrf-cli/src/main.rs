//! nercrf command-line tool
//!
//! Creates CRF checkpoints and decodes emission scores read as JSON lines.

use anyhow::{Context, Result, bail};
use candle_core::Device;
use clap::{Parser, Subcommand, ValueEnum};
use nercrf_core::{
    Checkpoint, Crf, CrfConfig, EmissionBatch, LabelSpace, PaddingStrategy, SpanCounts,
    TransitionConstraints, bio_to_iobes,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// CLI arguments
#[derive(Parser)]
#[command(name = "nercrf")]
#[command(about = "Linear-chain CRF layer for named-entity recognition")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a label space and save a freshly initialized checkpoint
    Init {
        /// Output checkpoint directory
        #[arg(short, long, env = "NERCRF_CHECKPOINT")]
        out: PathBuf,

        /// Label file: one sentence per line, space-separated tags
        #[arg(short = 'f', long, conflicts_with = "labels")]
        label_file: Option<PathBuf>,

        /// Explicit comma-separated label list
        #[arg(short, long, value_delimiter = ',')]
        labels: Vec<String>,

        /// Convert BIO tags to IOBES before building the label space
        #[arg(long)]
        iobes: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Decode JSON lines of emission scores from stdin
    Decode {
        /// Checkpoint directory
        #[arg(short, long, env = "NERCRF_CHECKPOINT")]
        checkpoint: PathBuf,

        /// Sequences per batch
        #[arg(short, long, default_value_t = 32)]
        batch_size: usize,

        /// Override the checkpoint's padding strategy
        #[arg(long, value_enum)]
        padding: Option<Padding>,
    },
}

/// CRF configuration: a JSON file plus per-field overrides
#[derive(clap::Args)]
struct ConfigArgs {
    /// JSON config file
    #[arg(long, env = "NERCRF_CONFIG")]
    config: Option<PathBuf>,

    /// Initialization seed
    #[arg(long, env = "NERCRF_SEED")]
    seed: Option<u64>,

    /// Half-width of the uniform initialization range
    #[arg(long)]
    init_scale: Option<f32>,

    /// Padding strategy
    #[arg(long, value_enum)]
    padding: Option<Padding>,

    /// Transition constraint mode
    #[arg(long, value_enum)]
    constraints: Option<Constraints>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Padding {
    Freeze,
    Identity,
}

impl From<Padding> for PaddingStrategy {
    fn from(padding: Padding) -> Self {
        match padding {
            Padding::Freeze => PaddingStrategy::FreezeAtLength,
            Padding::Identity => PaddingStrategy::IdentityTransitions,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Constraints {
    Sentinels,
    Scheme,
}

impl From<Constraints> for TransitionConstraints {
    fn from(constraints: Constraints) -> Self {
        match constraints {
            Constraints::Sentinels => TransitionConstraints::Sentinels,
            Constraints::Scheme => TransitionConstraints::Scheme,
        }
    }
}

impl ConfigArgs {
    fn resolve(&self) -> Result<CrfConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => CrfConfig::default(),
        };

        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(scale) = self.init_scale {
            config = config.with_init_scale(scale);
        }
        if let Some(padding) = self.padding {
            config = config.with_padding(padding.into());
        }
        if let Some(constraints) = self.constraints {
            config = config.with_constraints(constraints.into());
        }
        Ok(config)
    }
}

/// One input line of `nercrf decode`
#[derive(Debug, Deserialize)]
struct DecodeInput {
    emissions: Vec<Vec<f32>>,
    #[serde(default)]
    gold: Option<Vec<String>>,
}

/// One output line of `nercrf decode`
#[derive(Debug, Serialize)]
struct DecodeOutput {
    labels: Vec<String>,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    loss: Option<f32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init {
            out,
            label_file,
            labels,
            iobes,
            config,
        } => {
            let config = config.resolve()?;
            let labels = build_labels(label_file.as_deref(), labels, iobes)?;
            init_checkpoint(&out, &labels, config)
        }
        Commands::Decode {
            checkpoint,
            batch_size,
            padding,
        } => {
            if batch_size == 0 {
                bail!("--batch-size must be at least 1");
            }
            let mut checkpoint = Checkpoint::load(&checkpoint, &Device::Cpu)
                .with_context(|| format!("Failed to load checkpoint {}", checkpoint.display()))?;
            if let Some(padding) = padding {
                checkpoint.config = checkpoint.config.with_padding(padding.into());
            }
            decode_stdin(&checkpoint, batch_size)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_labels(label_file: Option<&Path>, labels: Vec<String>, iobes: bool) -> Result<LabelSpace> {
    let sentences: Vec<Vec<String>> = match label_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read label file {}", path.display()))?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .collect(),
        None if !labels.is_empty() => vec![labels],
        None => bail!("either --label-file or --labels is required"),
    };

    let sentences: Vec<Vec<String>> = if iobes {
        sentences.iter().map(|s| bio_to_iobes(s)).collect()
    } else {
        sentences
    };

    let labels = LabelSpace::from_sequences(&sentences).context("Failed to build label space")?;
    info!(
        num_labels = labels.len(),
        scheme = ?labels.scheme(),
        "built label space"
    );
    Ok(labels)
}

fn init_checkpoint(out: &Path, labels: &LabelSpace, config: CrfConfig) -> Result<()> {
    let crf = Crf::new(labels, config, &Device::Cpu)?;
    crf.to_checkpoint()
        .save(out)
        .with_context(|| format!("Failed to save checkpoint to {}", out.display()))?;
    info!(path = %out.display(), "checkpoint written");
    Ok(())
}

fn decode_stdin(checkpoint: &Checkpoint, batch_size: usize) -> Result<()> {
    let crf = Crf::from_checkpoint(checkpoint)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    let mut pending: Vec<DecodeInput> = Vec::with_capacity(batch_size);
    let mut counts = SpanCounts::default();
    let mut with_gold = 0usize;
    let mut total = 0usize;

    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = line.context("Failed to read stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let input: DecodeInput = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON on line {}", line_no + 1))?;
        pending.push(input);

        if pending.len() == batch_size {
            let stats = decode_batch(&crf, &pending, &mut stdout)
                .with_context(|| format!("Failed to decode batch ending at line {}", line_no + 1))?;
            counts += stats.0;
            with_gold += stats.1;
            total += pending.len();
            pending.clear();
        }
    }
    if !pending.is_empty() {
        let stats = decode_batch(&crf, &pending, &mut stdout).context("Failed to decode final batch")?;
        counts += stats.0;
        with_gold += stats.1;
        total += pending.len();
    }
    stdout.flush()?;

    info!(sequences = total, "decoding finished");
    if with_gold > 0 {
        let metrics = counts.metrics();
        info!(
            sequences = with_gold,
            precision = format_args!("{:.2}", metrics.precision),
            recall = format_args!("{:.2}", metrics.recall),
            f1 = format_args!("{:.2}", metrics.f1),
            "span evaluation"
        );
    }
    Ok(())
}

/// Decode one batch, write its output lines, and return the span counts
/// and the number of sequences that carried gold labels.
fn decode_batch(
    crf: &Crf<'_>,
    inputs: &[DecodeInput],
    out: &mut impl Write,
) -> Result<(SpanCounts, usize)> {
    let labels = crf.labels();
    let emissions: Vec<Vec<Vec<f32>>> = inputs.iter().map(|i| i.emissions.clone()).collect();
    let batch = EmissionBatch::from_sequences(&emissions, labels.len(), &Device::Cpu)?;
    let decoded = crf.decode(&batch)?;
    debug!(batch_size = inputs.len(), "decoded batch");

    // Losses only for the sequences that carry gold labels
    let gold_idx: Vec<usize> = (0..inputs.len()).filter(|&i| inputs[i].gold.is_some()).collect();
    let mut losses = vec![None; inputs.len()];
    if !gold_idx.is_empty() {
        let mut gold_emissions = Vec::with_capacity(gold_idx.len());
        let mut gold = Vec::with_capacity(gold_idx.len());
        for &i in &gold_idx {
            let names = inputs[i].gold.as_deref().unwrap_or_default();
            gold.push(labels.encode(names)?);
            gold_emissions.push(emissions[i].clone());
        }
        let gold_batch = EmissionBatch::from_sequences(&gold_emissions, labels.len(), &Device::Cpu)?;
        let values = crf.sequence_losses(&gold_batch, &gold)?.to_vec1::<f32>()?;
        for (&i, loss) in gold_idx.iter().zip(values) {
            losses[i] = Some(loss);
        }
    }

    let mut counts = SpanCounts::default();
    for ((input, path), loss) in inputs.iter().zip(&decoded).zip(losses) {
        let predicted = labels.decode(&path.labels)?;
        if let Some(gold) = &input.gold {
            counts += SpanCounts::from_sequences(&predicted, gold);
        }
        let output = DecodeOutput {
            labels: predicted.iter().map(|s| s.to_string()).collect(),
            score: path.score,
            loss,
        };
        serde_json::to_writer(&mut *out, &output)?;
        writeln!(out)?;
    }
    Ok((counts, gold_idx.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use nercrf_core::TransitionMatrix;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("nercrf-cli-{name}-{}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    fn config_args(config: Option<PathBuf>) -> ConfigArgs {
        ConfigArgs {
            config,
            seed: None,
            init_scale: None,
            padding: None,
            constraints: None,
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resolve_defaults() {
        let config = config_args(None).resolve().unwrap();
        let default = CrfConfig::default();
        assert_eq!(config.seed, default.seed);
        assert_eq!(config.padding, default.padding);
    }

    #[test]
    fn test_resolve_file_with_overrides() {
        let path = scratch_file(
            "config.json",
            r#"{"seed": 3, "padding": "identity_transitions", "init_scale": 0.5}"#,
        );

        let from_file = config_args(Some(path.clone())).resolve().unwrap();
        assert_eq!(from_file.seed, 3);
        assert_eq!(from_file.padding, PaddingStrategy::IdentityTransitions);
        assert_eq!(from_file.init_scale, 0.5);

        let args = ConfigArgs {
            seed: Some(9),
            init_scale: Some(-0.2),
            constraints: Some(Constraints::Scheme),
            ..config_args(Some(path.clone()))
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.seed, 9);
        assert_eq!(config.init_scale, 0.2);
        assert_eq!(config.padding, PaddingStrategy::IdentityTransitions);
        assert_eq!(config.constraints, TransitionConstraints::Scheme);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_resolve_invalid_file() {
        let path = scratch_file("bad-config.json", "{ not json");
        assert!(config_args(Some(path.clone())).resolve().is_err());
        fs::remove_file(path).unwrap();

        let missing = std::env::temp_dir().join("nercrf-cli-no-such-config.json");
        assert!(config_args(Some(missing)).resolve().is_err());
    }

    #[test]
    fn test_build_labels_from_file_as_iobes() {
        let path = scratch_file("labels.txt", "B-PER I-PER O\n\nB-LOC O\n");
        let labels = build_labels(Some(&path), Vec::new(), true).unwrap();
        assert_eq!(
            labels.iter().collect::<Vec<_>>(),
            vec!["B-PER", "E-PER", "O", "S-LOC"]
        );
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_build_labels_from_list() {
        let labels = build_labels(None, vec!["O".into(), "S-PER".into()], false).unwrap();
        assert_eq!(labels.len(), 2);
        assert!(build_labels(None, Vec::new(), false).is_err());
    }

    #[test]
    fn test_decode_batch_mixed_gold() {
        let labels = LabelSpace::new(vec!["O".into(), "S-PER".into()]).unwrap();
        let config = CrfConfig::default();
        let transitions =
            TransitionMatrix::zeros(&labels, config.constraints, &Device::Cpu).unwrap();
        let crf = Crf::with_transitions(&labels, transitions, config).unwrap();

        let inputs = vec![
            DecodeInput {
                emissions: vec![vec![0.0, 5.0], vec![5.0, 0.0]],
                gold: Some(vec!["S-PER".into(), "O".into()]),
            },
            DecodeInput {
                emissions: vec![vec![5.0, 0.0]],
                gold: None,
            },
            DecodeInput {
                emissions: vec![vec![3.0, 0.0]],
                gold: Some(vec!["S-PER".into()]),
            },
        ];

        let mut out = Vec::new();
        let (counts, with_gold) = decode_batch(&crf, &inputs, &mut out).unwrap();
        assert_eq!(with_gold, 2);
        assert_eq!(
            counts,
            SpanCounts {
                correct: 1,
                predicted: 1,
                gold: 2
            }
        );

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["labels"], serde_json::json!(["S-PER", "O"]));
        assert_eq!(lines[0]["score"], serde_json::json!(10.0));
        assert!(lines[0]["loss"].as_f64().unwrap() >= 0.0);
        assert_eq!(lines[1]["labels"], serde_json::json!(["O"]));
        assert!(lines[1].get("loss").is_none());
        assert_eq!(lines[2]["labels"], serde_json::json!(["O"]));
        assert!(lines[2]["loss"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_decode_batch_unknown_gold_label() {
        let labels = LabelSpace::new(vec!["O".into(), "S-PER".into()]).unwrap();
        let crf = Crf::new(&labels, CrfConfig::default(), &Device::Cpu).unwrap();
        let inputs = vec![DecodeInput {
            emissions: vec![vec![1.0, 0.0]],
            gold: Some(vec!["S-LOC".into()]),
        }];
        assert!(decode_batch(&crf, &inputs, &mut Vec::new()).is_err());
    }
}
