//! Simulated stage execution
//!
//! Drives a [`PipelineStats`] the way a real engine would: stages run as
//! bursts of concurrent tasks spread over a set of nodes, every task reports
//! its metrics as a protocol frame, and a consumer loop walks the iterator
//! phases for each window. Samples travel through [`distributed::collector`]
//! rather than being recorded directly.
//!
//! Task durations follow a normal distribution around each stage's mean,
//! drawn from a seeded Xoshiro256++ so the shape of a run is reproducible
//! (elapsed times are real sleeps and are not).
//!
//! [`distributed::collector`]: crate::distributed::collector

use crate::config::toml::{parse_duration, parse_size};
use crate::config::{SimulationConfig, StageConfig};
use crate::distributed::collector::{self, CollectorSummary};
use crate::distributed::protocol::{write_message, Message};
use crate::stats::iterator::Phase;
use crate::stats::pipeline::PipelineStats;
use crate::stats::registry::StagePlan;
use crate::stats::RawTaskMetrics;
use crate::util::time::SharedClock;
use crate::Result;
use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch, Semaphore};

// Frames buffered between tasks and the stream writer
const FRAME_QUEUE: usize = 1024;
const PIPE_BYTES: usize = 64 * 1024;

/// Result of one split branch
#[derive(Debug)]
pub struct BranchOutcome {
    pub branch: usize,
    pub stats: Arc<PipelineStats>,
    pub collector: CollectorSummary,
}

/// Stage parameters resolved from config strings
#[derive(Debug, Clone)]
struct StageModel {
    name: String,
    blocks: u64,
    task_time: Normal<f64>,
    cpu_fraction: f64,
    rows_per_block: u64,
    bytes_per_block: u64,
}

impl StageModel {
    fn from_config(stage: &StageConfig) -> Result<Self> {
        let mean = parse_duration(&stage.task_time)?.as_secs_f64();
        let std_dev = mean * stage.task_time_stddev_percent / 100.0;
        let task_time = Normal::new(mean, std_dev)
            .with_context(|| format!("Invalid task time distribution for stage {}", stage.name))?;
        let row_size = parse_size(&stage.row_size)?;

        Ok(Self {
            name: stage.name.clone(),
            blocks: stage.blocks,
            task_time,
            cpu_fraction: stage.cpu_fraction,
            rows_per_block: stage.rows_per_block,
            bytes_per_block: stage.rows_per_block.saturating_mul(row_size),
        })
    }
}

/// Node identifiers `<hostname>-<i>`
pub fn node_ids(count: usize) -> Vec<String> {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "node".to_string());
    (0..count).map(|i| format!("{}-{}", host, i)).collect()
}

/// Stage plans for a window
///
/// With `cache_upstream`, every stage but the last reuses its window 0
/// output in later windows.
pub fn window_plans(sim: &SimulationConfig, window_index: u64) -> Vec<StagePlan> {
    let last = sim.stages.len().saturating_sub(1);
    sim.stages
        .iter()
        .enumerate()
        .map(|(i, stage)| {
            if sim.cache_upstream && window_index > 0 && i < last {
                StagePlan::cached(stage.name.clone())
            } else {
                StagePlan::new(stage.name.clone()).with_blocks(stage.blocks)
            }
        })
        .collect()
}

/// Run the configured simulation; one outcome per split branch
pub async fn run(sim: &SimulationConfig, clock: SharedClock) -> Result<Vec<BranchOutcome>> {
    let models = sim
        .stages
        .iter()
        .map(StageModel::from_config)
        .collect::<Result<Vec<_>>>()?;
    let models = Arc::new(models);
    let sim = Arc::new(sim.clone());
    let nodes = Arc::new(node_ids(sim.nodes));

    let root = PipelineStats::new(clock);
    let mut handles = Vec::with_capacity(sim.splits);
    for (branch, stats) in root.split(sim.splits).into_iter().enumerate() {
        let stats = Arc::new(stats);
        let sim = sim.clone();
        let models = models.clone();
        let nodes = nodes.clone();
        handles.push(tokio::spawn(async move {
            run_branch(branch, stats, &sim, &models, &nodes).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.context("Simulation branch panicked")??);
    }
    Ok(outcomes)
}

/// Writes queued frames to the stream in order
async fn forward<W>(mut rx: mpsc::Receiver<Message>, mut stream: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        write_message(&mut stream, &msg).await?;
    }
    Ok(())
}

struct Driver {
    frames: mpsc::Sender<Message>,
    applied: watch::Receiver<u64>,
    sent: u64,
}

impl Driver {
    async fn send(&mut self, msg: Message) -> Result<()> {
        self.frames
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("Collector stream closed"))?;
        self.sent += 1;
        Ok(())
    }

    /// Wait until the collector has applied everything sent so far
    async fn sync(&mut self) -> Result<()> {
        let sent = self.sent;
        self.applied
            .wait_for(|applied| *applied >= sent)
            .await
            .map_err(|_| anyhow::anyhow!("Collector stopped before applying {} frames", sent))?;
        Ok(())
    }
}

async fn run_branch(
    branch: usize,
    stats: Arc<PipelineStats>,
    sim: &SimulationConfig,
    models: &[StageModel],
    nodes: &[String],
) -> Result<BranchOutcome> {
    let (writer, reader) = tokio::io::duplex(PIPE_BYTES);
    let (collector, applied) = collector::spawn(stats.clone(), reader);
    let (frames, queue) = mpsc::channel(FRAME_QUEUE);
    let writer = tokio::spawn(forward(queue, writer));

    let mut driver = Driver {
        frames,
        applied,
        sent: 0,
    };
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(sim.seed.wrapping_add(branch as u64));
    let user_time = parse_duration(&sim.user_time)?;
    let permits = Arc::new(Semaphore::new(sim.concurrency));

    for window in 0..sim.windows {
        let plans = window_plans(sim, window);
        driver.send(Message::begin_window(window, plans.clone())).await?;
        driver.sync().await?;
        let tracker = stats
            .iterator(window)
            .with_context(|| format!("Window {} was not opened", window))?;

        tracker.enter(Phase::Wait);
        for (stage_id, (plan, model)) in plans.iter().zip(models).enumerate() {
            if plan.cached {
                continue;
            }
            run_stage(&mut driver, &mut rng, &permits, window, stage_id, model, nodes).await?;
            driver
                .send(Message::StageDone {
                    window_index: window,
                    stage_id,
                    blocks_expected: None,
                })
                .await?;
        }

        tracker.enter(Phase::Get);
        driver.sync().await?;
        tracker.enter(Phase::Format);
        tokio::task::yield_now().await;

        let consumed = models.last().map_or(0, |m| m.blocks);
        {
            let _user = tracker.time(Phase::User);
            tokio::time::sleep(user_time_for(user_time, consumed)).await;
        }

        driver.send(Message::WindowDone { window_index: window }).await?;
        tracing::debug!(branch, window, "simulated window done");
    }

    driver.send(Message::Shutdown).await?;
    drop(driver);

    writer.await.context("Frame writer panicked")??;
    let summary = collector.await.context("Collector panicked")??;

    Ok(BranchOutcome {
        branch,
        stats,
        collector: summary,
    })
}

/// Consumer time for `blocks` blocks, saturating instead of wrapping
fn user_time_for(per_block: Duration, blocks: u64) -> Duration {
    let nanos = u64::try_from(per_block.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(nanos.saturating_mul(blocks))
}

async fn run_stage(
    driver: &mut Driver,
    rng: &mut Xoshiro256PlusPlus,
    permits: &Arc<Semaphore>,
    window: u64,
    stage_id: usize,
    model: &StageModel,
    nodes: &[String],
) -> Result<()> {
    let mut tasks = Vec::with_capacity(model.blocks as usize);

    for task_id in 0..model.blocks {
        let wall_s = model.task_time.sample(rng).max(0.0);
        let node_id = nodes[rng.gen_range(0..nodes.len())].clone();
        let metrics = RawTaskMetrics {
            stage_id,
            task_id,
            node_id,
            wall_time_s: wall_s,
            cpu_time_s: wall_s * model.cpu_fraction,
            output_rows: model.rows_per_block as i64,
            output_bytes: model.bytes_per_block as i64,
        };

        let permits = permits.clone();
        let frames = driver.frames.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.context("Task semaphore closed")?;
            tokio::time::sleep(Duration::from_secs_f64(wall_s)).await;
            frames
                .send(Message::Sample {
                    window_index: window,
                    metrics,
                })
                .await
                .map_err(|_| anyhow::anyhow!("Collector stream closed"))
        }));
    }

    for task in tasks {
        task.await.context("Simulated task panicked")??;
        driver.sent += 1;
    }
    tracing::trace!(window, stage = %model.name, blocks = model.blocks, "stage executed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::monotonic;

    fn quick(windows: u64) -> SimulationConfig {
        let mut sim = SimulationConfig {
            windows,
            nodes: 2,
            concurrency: 4,
            user_time: "10us".to_string(),
            ..SimulationConfig::default()
        };
        for stage in &mut sim.stages {
            stage.blocks = 4;
            stage.task_time = "100us".to_string();
        }
        sim
    }

    #[test]
    fn test_window_plans_cache_upstream() {
        let mut sim = quick(3);
        assert!(window_plans(&sim, 1).iter().all(|p| !p.cached));

        sim.cache_upstream = true;
        assert!(window_plans(&sim, 0).iter().all(|p| !p.cached));
        let later: Vec<bool> = window_plans(&sim, 2).iter().map(|p| p.cached).collect();
        assert_eq!(later, [true, true, false]);
        assert_eq!(window_plans(&sim, 2)[2].blocks_expected, Some(4));
    }

    #[test]
    fn test_user_time_saturates() {
        let per_block = Duration::from_micros(10);
        assert_eq!(user_time_for(per_block, 3), Duration::from_micros(30));
        assert_eq!(user_time_for(per_block, 0), Duration::ZERO);
        // more blocks than fit in a u32 must not wrap
        let big = u64::from(u32::MAX) + 2;
        assert_eq!(user_time_for(Duration::from_nanos(1), big), Duration::from_nanos(big));
        assert_eq!(user_time_for(per_block, u64::MAX), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn test_node_ids() {
        let ids = node_ids(3);
        assert_eq!(ids.len(), 3);
        assert!(ids[2].ends_with("-2"));
    }

    #[tokio::test]
    async fn test_single_window_run() {
        let outcomes = run(&quick(1), monotonic()).await.unwrap();
        assert_eq!(outcomes.len(), 1);

        let outcome = &outcomes[0];
        assert!(outcome.collector.clean_shutdown);
        assert_eq!(outcome.collector.rejected, 0);
        // begin + 3 * (4 samples + done) + window done + shutdown
        assert_eq!(outcome.collector.frames, 18);

        let report = outcome.stats.report();
        assert_eq!(report.windows.len(), 1);
        for stage in &report.windows[0].report.stages {
            let summary = stage.summary().unwrap();
            assert_eq!(summary.blocks_executed, 4);
            assert_eq!(summary.blocks_expected, 4);
            assert!(summary.distinct_node_count <= 2);
            assert_eq!(summary.output_rows.total, 400);
        }
        assert!(report.windows[0].report.iterator.user_ns > 0);
    }

    #[tokio::test]
    async fn test_cached_windows_and_splits() {
        let mut sim = quick(3);
        sim.cache_upstream = true;
        sim.splits = 2;

        let outcomes = run(&sim, monotonic()).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            let report = outcome.stats.report();
            assert_eq!(report.windows.len(), 3);
            assert_eq!(report.windows[2].cached_stages.len(), 2);
            assert_eq!(report.stall.count, 2);
            assert!(outcome.stats.stats().contains("##### Overall Pipeline Time Breakdown #####"));
        }
    }
}
