//! stagestats CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use stagestats::config::{cli::Cli, Config};
use stagestats::output::{json, ReportFormat};
use stagestats::sim::{self, BranchOutcome};
use stagestats::util::time::monotonic;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = stagestats::config::toml::load(&cli)?;
    stagestats::config::validator::validate_config(&config)
        .context("Configuration validation failed")?;

    stagestats::logging::init(&config.logging.level);

    if cli.dry_run {
        print_configuration(&config)?;
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let outcomes = runtime.block_on(sim::run(&config.simulation, monotonic()))?;

    for outcome in &outcomes {
        if outcome.collector.rejected > 0 {
            tracing::warn!(
                branch = outcome.branch,
                rejected = outcome.collector.rejected,
                "some task reports were rejected"
            );
        }
    }

    // A single window is a plain dataset, not a pipeline
    let dataset_shape = config.simulation.windows == 1;
    let split = outcomes.len() > 1;

    let docs: Vec<json::JsonReport> = outcomes
        .iter()
        .map(|outcome| json_report(outcome, dataset_shape, split))
        .collect();

    match config.report.format {
        ReportFormat::Text => {
            let texts: Vec<String> = outcomes
                .iter()
                .map(|outcome| text_report(outcome, dataset_shape, split))
                .collect();
            print!("{}", texts.join("\n"));
        }
        ReportFormat::Json => {
            let rendered = match docs.as_slice() {
                [single] => json::to_string_pretty(single)?,
                many => json::to_string_pretty(many)?,
            };
            println!("{}", rendered);
        }
    }

    if let Some(ref path) = config.report.json_output {
        match docs.as_slice() {
            [single] => json::write_json_output(path, single)?,
            many => json::write_json_output(path, many)?,
        }
        eprintln!("JSON report written to {}", path.display());
    }

    Ok(())
}

fn text_report(outcome: &BranchOutcome, dataset_shape: bool, split: bool) -> String {
    let report = outcome.stats.report();
    let body = match (dataset_shape, report.windows.first()) {
        (true, Some(window)) => window.report.to_text(),
        _ => report.to_text(),
    };
    if split {
        format!("# Split {}\n{}", outcome.branch, body)
    } else {
        body
    }
}

fn json_report(outcome: &BranchOutcome, dataset_shape: bool, split: bool) -> json::JsonReport {
    let report = outcome.stats.report();
    let diagnostics = outcome.stats.diagnostics();
    let mut doc = match (dataset_shape, report.windows.first()) {
        (true, Some(window)) => json::dataset_to_json(&window.report, diagnostics),
        _ => json::pipeline_to_json(&report, diagnostics),
    };
    if split {
        doc.branch = Some(outcome.branch);
    }
    doc
}

fn print_configuration(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("Configuration:");
    print!("{}", rendered);
    Ok(())
}
