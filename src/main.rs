//! Glassbox CLI
//!
//! Evaluates a JavaScript file (or stdin) in the capturing sandbox and
//! prints the accumulated console output.

use std::io::Read;
use std::sync::Arc;

use tokio::sync::mpsc;

use glassbox::{evaluate_streaming, EvalConfig, Evaluator, TracingSink, Validate};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <code-file | ->", args[0]);
        eprintln!("\nEvaluates JavaScript in the capturing sandbox and prints its output.");
        eprintln!("\nEnvironment variables:");
        eprintln!("  GLASSBOX_CONFIG=<path>  Load evaluator limits from a TOML file");
        eprintln!("  GLASSBOX_OUTPUT=json    Print the run summary as JSON");
        std::process::exit(1);
    }

    let code = if args[1] == "-" {
        let mut buffer = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buffer) {
            eprintln!("Failed to read stdin: {}", e);
            std::process::exit(1);
        }
        buffer
    } else {
        match std::fs::read_to_string(&args[1]) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Failed to read {}: {}", args[1], e);
                std::process::exit(1);
            }
        }
    };

    let config = match std::env::var("GLASSBOX_CONFIG") {
        Ok(path) => match EvalConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        Err(_) => EvalConfig::default(),
    };

    let validation = config.validate();
    for warning in &validation.warnings {
        tracing::warn!(warning = %warning, "configuration warning");
    }
    if !validation.is_valid() {
        eprintln!("Invalid configuration: {}", validation.errors.join("; "));
        std::process::exit(1);
    }

    let (output_tx, mut output_rx) = mpsc::unbounded_channel();

    // Flushes replace what was previously displayed, so only the latest one
    // matters once the run is over.
    let printer = tokio::spawn(async move {
        let mut latest = String::new();
        while let Some(text) = output_rx.recv().await {
            latest = text;
        }
        latest
    });

    let evaluator = Evaluator::with_sink(config, Arc::new(TracingSink));
    match evaluate_streaming(evaluator, code, output_tx).await {
        Ok(summary) => {
            let output = printer.await.unwrap_or_default();

            if std::env::var("GLASSBOX_OUTPUT").is_ok_and(|v| v == "json") {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Failed to serialize summary: {}", e);
                        std::process::exit(1);
                    }
                }
            } else {
                println!("{output}");
                tracing::info!(
                    lines = summary.lines,
                    flushes = summary.flushes,
                    deferred = summary.deferred_jobs,
                    duration = ?summary.duration,
                    "evaluation complete"
                );
            }
        }
        Err(e) => {
            eprintln!("Evaluation failed: {}", e);
            std::process::exit(1);
        }
    }
}
