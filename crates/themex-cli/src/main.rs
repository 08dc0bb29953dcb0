//! # themex
//!
//! Command-line front end: runs one extraction over a JSON corpus and
//! prints the result, or prints the effective settings.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use themex_core::logging::{init_json_subscriber, init_subscriber};
use themex_core::{ChannelSink, Purpose};
use themex_engine::{ExtractionRequest, PipelineInput, ThemeEngine};
use themex_settings::{ThemexSettings, load_settings_from_path, settings_path};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Thematic extraction over ranked, embedded excerpts.
#[derive(Parser, Debug)]
#[command(name = "themex", version, about = "Thematic extraction engine")]
struct Cli {
    /// Settings file (defaults to `~/.themex/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract themes from a corpus file.
    Run(RunArgs),
    /// Print the effective settings as JSON.
    Settings,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Research purpose: exploratory, survey, saturation, synthesis, grounded.
    #[arg(long)]
    purpose: Purpose,

    /// JSON file with `excerpts` and `sources`.
    #[arg(long)]
    input: PathBuf,

    /// Caller id for per-user limits.
    #[arg(long, default_value = "cli")]
    user: String,

    /// Seed for clustering and permutation steps.
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum assistant calls.
    #[arg(long)]
    ai_call_budget: Option<u32>,

    /// Write the result here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log JSON lines instead of compact text.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn load(path: Option<&Path>) -> Result<ThemexSettings> {
    let path = path.map_or_else(settings_path, Path::to_path_buf);
    load_settings_from_path(&path).with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn read_input(path: &Path) -> Result<PipelineInput> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a valid corpus file", path.display()))
}

async fn run(settings: ThemexSettings, args: RunArgs) -> Result<()> {
    let input = read_input(&args.input)?;
    let engine = ThemeEngine::from_settings(settings).map_err(|e| anyhow!("{}: {e}", e.user_message()))?;

    let (sink, mut events) = ChannelSink::new();
    let progress = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(stage = ?event.stage, percent = event.percent, "{}", event.message);
        }
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let mut request = ExtractionRequest::new(args.purpose, args.user, input)
        .with_cancel(cancel)
        .with_progress(Arc::new(sink));
    if let Some(seed) = args.seed {
        request = request.with_seed(seed);
    }
    if let Some(budget) = args.ai_call_budget {
        request = request.with_ai_call_budget(budget);
    }

    // The sink is dropped with the run context, which ends the progress task.
    let result = engine.extract(request).await;
    let _ = progress.await;
    let output = result.map_err(|e| anyhow!("{} ({})", e.user_message(), e))?;

    for warning in &output.warnings {
        warn!(kind = ?warning.kind, "{}", warning.message);
    }
    let json = serde_json::to_string_pretty(&output)?;
    match args.output {
        Some(path) => std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.settings.as_deref())?;

    match cli.command {
        Command::Run(args) => {
            if args.json_logs || settings.logging.json {
                init_json_subscriber(&settings.logging.level);
            } else {
                init_subscriber(&settings.logging.level);
            }
            run(settings, args).await
        }
        Command::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "themex", "run", "--purpose", "grounded-theory", "--input", "corpus.json", "--seed", "7",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.purpose, Purpose::Grounded);
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.user, "cli");
        assert!(!args.json_logs);
    }

    #[test]
    fn rejects_unknown_purpose() {
        let err = Cli::try_parse_from(["themex", "run", "--purpose", "vibes", "--input", "x.json"]).unwrap_err();
        assert!(err.to_string().contains("unknown purpose"));
    }

    #[test]
    fn reads_corpus_and_settings_files() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.json");
        std::fs::write(
            &corpus,
            r#"{"excerpts":[{"id":"e1","sourceId":"s1","text":"hello"}],"sources":[]}"#,
        )
        .unwrap();
        let input = read_input(&corpus).unwrap();
        assert_eq!(input.excerpts.len(), 1);

        let settings = dir.path().join("settings.json");
        std::fs::write(&settings, r#"{"run":{"aiCallBudget":5}}"#).unwrap();
        assert_eq!(load(Some(&settings)).unwrap().run.ai_call_budget, 5);

        std::fs::write(&corpus, "not json").unwrap();
        assert!(read_input(&corpus).is_err());
    }
}
