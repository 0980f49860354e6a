//! Sample collector
//!
//! Reads protocol frames from a stream and applies them to a
//! [`PipelineStats`]. Frames are applied strictly in arrival order, so a
//! window's samples always land before the `WindowDone` that follows them
//! on the same stream.
//!
//! A rejected frame (late sample, unknown stage, bad metrics) is counted
//! and logged; it never stops the loop. Only transport failures and a
//! protocol version mismatch end collection with an error.

use super::protocol::{read_message, Message, PROTOCOL_VERSION};
use crate::stats::pipeline::PipelineStats;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::watch;

/// What a collection run saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectorSummary {
    /// Frames read, including rejected ones
    pub frames: u64,
    pub rejected: u64,
    /// Stream ended with `Shutdown` rather than EOF
    pub clean_shutdown: bool,
}

#[derive(Debug)]
pub struct Collector {
    stats: Arc<PipelineStats>,
    applied: watch::Sender<u64>,
}

impl Collector {
    /// Collector plus a receiver that observes the number of frames applied
    pub fn new(stats: Arc<PipelineStats>) -> (Self, watch::Receiver<u64>) {
        let (applied, rx) = watch::channel(0);
        (Self { stats, applied }, rx)
    }

    /// Apply one frame; `Ok(false)` means the stream is done
    ///
    /// Rejections are counted into `summary` and logged.
    fn apply(&self, msg: Message, summary: &mut CollectorSummary) -> Result<bool> {
        let outcome = match msg {
            Message::BeginWindow {
                protocol_version,
                window_index,
                stages,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    anyhow::bail!(
                        "Protocol version mismatch: expected {}, got {}",
                        PROTOCOL_VERSION,
                        protocol_version
                    );
                }
                self.stats.begin_window(window_index, &stages).map(|_| ())
            }
            Message::Sample { window_index, metrics } => self.stats.record_raw(window_index, metrics),
            Message::StageDone {
                window_index,
                stage_id,
                blocks_expected,
            } => self
                .stats
                .finalize_stage(window_index, stage_id, blocks_expected)
                .map(|_| ()),
            Message::WindowDone { window_index } => self.stats.complete_window(window_index),
            Message::Shutdown => {
                summary.clean_shutdown = true;
                return Ok(false);
            }
        };

        if let Err(e) = outcome {
            summary.rejected += 1;
            tracing::warn!(error = %e, "frame rejected");
        }
        Ok(true)
    }

    /// Apply frames until `Shutdown` or end of stream
    pub async fn run<R>(self, mut reader: R) -> Result<CollectorSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut summary = CollectorSummary::default();

        while let Some(msg) = read_message(&mut reader).await? {
            summary.frames += 1;
            let more = self.apply(msg, &mut summary)?;
            self.applied.send_replace(summary.frames);
            if !more {
                break;
            }
        }

        tracing::debug!(
            frames = summary.frames,
            rejected = summary.rejected,
            clean = summary.clean_shutdown,
            "collector finished"
        );
        Ok(summary)
    }
}

/// Spawn a collector for `stats` reading from `reader`
pub fn spawn<R>(
    stats: Arc<PipelineStats>,
    reader: R,
) -> (tokio::task::JoinHandle<Result<CollectorSummary>>, watch::Receiver<u64>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (collector, applied) = Collector::new(stats);
    (tokio::spawn(collector.run(reader)), applied)
}
