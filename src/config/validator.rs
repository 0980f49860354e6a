//! Configuration validation

use super::toml::{parse_duration, parse_size};
use super::*;
use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing_subscriber::EnvFilter;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_logging(&config.logging)?;
    validate_simulation(&config.simulation)?;
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<()> {
    EnvFilter::try_new(&logging.level)
        .with_context(|| format!("Invalid log level: {}", logging.level))?;
    Ok(())
}

/// Validate simulation configuration
pub fn validate_simulation(sim: &SimulationConfig) -> Result<()> {
    if sim.windows == 0 {
        anyhow::bail!("windows must be at least 1");
    }
    if sim.nodes == 0 {
        anyhow::bail!("nodes must be at least 1");
    }
    if sim.splits == 0 {
        anyhow::bail!("splits must be at least 1");
    }
    if sim.concurrency == 0 {
        anyhow::bail!("concurrency must be at least 1");
    }
    parse_duration(&sim.user_time).context("Invalid user_time")?;

    if sim.stages.is_empty() {
        anyhow::bail!("at least one stage is required");
    }

    let mut seen = HashSet::new();
    for (i, stage) in sim.stages.iter().enumerate() {
        validate_stage(stage, i)?;
        if !seen.insert(stage.name.as_str()) {
            anyhow::bail!("duplicate stage name: {}", stage.name);
        }
    }

    Ok(())
}

/// Validate one stage
fn validate_stage(stage: &StageConfig, index: usize) -> Result<()> {
    if stage.name.trim().is_empty() {
        anyhow::bail!("stage {} has an empty name", index);
    }
    if stage.blocks == 0 {
        anyhow::bail!("stage {} ({}) must have at least 1 block", index, stage.name);
    }
    parse_duration(&stage.task_time)
        .with_context(|| format!("stage {} ({}) has an invalid task_time", index, stage.name))?;
    parse_size(&stage.row_size)
        .with_context(|| format!("stage {} ({}) has an invalid row_size", index, stage.name))?;

    if !(0.0..=100.0).contains(&stage.task_time_stddev_percent) {
        anyhow::bail!(
            "stage {} ({}) task_time_stddev_percent must be between 0 and 100, got {}",
            index,
            stage.name,
            stage.task_time_stddev_percent
        );
    }
    if !(0.0..=1.0).contains(&stage.cpu_fraction) {
        anyhow::bail!(
            "stage {} ({}) cpu_fraction must be between 0.0 and 1.0, got {}",
            index,
            stage.name,
            stage.cpu_fraction
        );
    }

    Ok(())
}
