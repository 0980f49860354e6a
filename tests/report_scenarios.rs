//! End-to-end report scenarios
//!
//! Reports are compared after canonicalization: time tokens become `T`,
//! zero values `Z` and every other number `N`, so the assertions pin the
//! layout without depending on exact timings.

use regex::Regex;
use stagestats::config::SimulationConfig;
use stagestats::stats::iterator::Phase;
use stagestats::util::time::{monotonic, ManualClock};
use stagestats::{DatasetStats, MetricSample, PipelineStats, StagePlan};
use std::sync::Arc;
use std::time::Duration;

fn canonicalize(stats: &str) -> String {
    let times = Regex::new(r"[0-9\.]+(ms|us|s)").unwrap();
    let zeros = Regex::new(r" [0]+(\.[0]+)?").unwrap();
    let numbers = Regex::new(r"[0-9]+(\.[0-9]+)?").unwrap();

    let s = times.replace_all(stats, "T");
    let s = zeros.replace_all(&s, " Z");
    numbers.replace_all(&s, "N").into_owned()
}

fn executed_block(index: &str, name: &str) -> String {
    format!(
        "Stage {index} {name}: N/N blocks executed in T\n\
         * Remote wall time: T min, T max, T mean, T total\n\
         * Remote cpu time: T min, T max, T mean, T total\n\
         * Output num rows: N min, N max, N mean, N total\n\
         * Output size bytes: N min, N max, N mean, N total\n\
         * Tasks per node: N min, N max, N mean; N nodes used\n\
         \n"
    )
}

const ITERATOR_BLOCK: &str = "Dataset iterator time breakdown:\n\
                              * In ray.wait(): T\n\
                              * In ray.get(): T\n\
                              * In format_batch(): T\n\
                              * In user code: T\n\
                              * Total time: T\n";

const OVERALL_BLOCK: &str = "##### Overall Pipeline Time Breakdown #####\n\
                             * Time stalled waiting for next dataset: T min, T max, T mean, T total\n\
                             * Time in dataset iterator: T\n\
                             * Time in user code: T\n\
                             * Total time: T\n";

fn task(stage: usize, task_id: u64) -> MetricSample {
    MetricSample::new(stage, task_id, "node-1")
        .with_wall_time(Duration::from_millis(task_id + 1))
        .with_cpu_time(Duration::from_micros(500))
        .with_output(100 + task_id, 800 + 8 * task_id)
}

/// Walk every iterator phase for 1ms each
fn consume(clock: &ManualClock, enter: impl Fn(Phase), exit_user: impl Fn()) {
    for phase in Phase::ALL {
        enter(phase);
        clock.advance(Duration::from_millis(1));
    }
    exit_user();
}

#[test]
fn scenario_a_single_dataset() {
    let clock = Arc::new(ManualClock::new(0));
    let ds = DatasetStats::new(clock.clone());

    for name in ["read", "map_batches", "map"] {
        let stage = ds.declare_stage(StagePlan::new(name).with_blocks(10)).unwrap();
        // samples arrive out of task order
        for task_id in (0..10).rev() {
            ds.record(stage, task(stage, task_id)).unwrap();
        }
        ds.finalize_stage(stage).unwrap();
    }
    consume(&clock, |p| ds.iterator().enter(p), || ds.iterator().exit(Phase::User));

    let text = ds.stats();
    assert_eq!(text.matches("10/10 blocks executed").count(), 3);

    let expected = format!(
        "{}{}{}{}",
        executed_block("Z", "read"),
        executed_block("N", "map_batches"),
        executed_block("N", "map"),
        ITERATOR_BLOCK
    );
    assert_eq!(canonicalize(&text), expected);
}

#[test]
fn scenario_b_cached_pipeline() {
    let clock = Arc::new(ManualClock::new(0));
    let pipe = PipelineStats::new(clock.clone());

    for window in 0..5u64 {
        if window > 0 {
            clock.advance(Duration::from_millis(2 + window));
        }
        let plans = if window == 0 {
            vec![
                StagePlan::new("read").with_blocks(10),
                StagePlan::new("map_batches").with_blocks(10),
                StagePlan::new("map").with_blocks(10),
            ]
        } else {
            vec![
                StagePlan::cached("read"),
                StagePlan::cached("map_batches"),
                StagePlan::new("map").with_blocks(10),
            ]
        };
        let tracker = pipe.begin_window(window, &plans).unwrap();

        let first_executed = if window == 0 { 0 } else { 2 };
        for stage in first_executed..3 {
            let samples = (0..10).map(|t| task(stage, t)).collect();
            assert!(pipe.record_batch(window, samples).is_empty());
            pipe.finalize_stage(window, stage, None).unwrap();
        }
        // cached stages take no samples
        if window > 0 {
            assert!(pipe.record(window, 0, task(0, 0)).is_err());
        }

        consume(&clock, |p| tracker.enter(p), || tracker.exit(Phase::User));
        pipe.complete_window(window).unwrap();
    }

    let report = pipe.report();
    assert_eq!(report.windows.len(), 5);
    assert_eq!(report.stall.count, 4);
    assert_eq!(report.stall.min, 3_000_000);
    assert_eq!(report.stall.max, 6_000_000);
    assert_eq!(pipe.diagnostics().cached_samples, 4);

    let cached_window = format!(
        "== Pipeline Window N ==\n\
         Stage Z read: [execution cached]\n\
         Stage N map_batches: [execution cached]\n\
         {}{}",
        executed_block("N", "map"),
        ITERATOR_BLOCK
    );
    let mut windows = vec![format!(
        "== Pipeline Window Z ==\n{}{}{}{}",
        executed_block("Z", "read"),
        executed_block("N", "map_batches"),
        executed_block("N", "map"),
        ITERATOR_BLOCK
    )];
    windows.extend(std::iter::repeat(cached_window).take(4));
    let expected = format!("{}\n{}", windows.join("\n"), OVERALL_BLOCK);

    assert_eq!(canonicalize(&pipe.stats()), expected);
}

#[test]
fn zero_samples_render_zero_tokens() {
    let ds = DatasetStats::new(Arc::new(ManualClock::new(0)));
    ds.declare_stage(StagePlan::new("read")).unwrap();

    assert_eq!(
        canonicalize(&ds.stats()),
        "Stage Z read: Z/N blocks executed in Z\n\
         * Remote wall time: Z min, Z max, Z mean, Z total\n\
         * Remote cpu time: Z min, Z max, Z mean, Z total\n\
         * Output num rows: Z min, Z max, Z mean, Z total\n\
         * Output size bytes: Z min, Z max, Z mean, Z total\n\
         * Tasks per node: Z min, Z max, Z mean; Z nodes used\n\
         \n\
         Dataset iterator time breakdown:\n\
         * In ray.wait(): Z\n\
         * In ray.get(): Z\n\
         * In format_batch(): Z\n\
         * In user code: Z\n\
         * Total time: Z\n"
    );
}

#[test]
fn single_window_pipeline_omits_overall() {
    let clock = Arc::new(ManualClock::new(0));
    let pipe = PipelineStats::new(clock.clone());

    let tracker = pipe.begin_window(0, &[StagePlan::new("read").with_blocks(1)]).unwrap();
    pipe.record(0, 0, task(0, 0)).unwrap();
    consume(&clock, |p| tracker.enter(p), || tracker.exit(Phase::User));
    pipe.complete_window(0).unwrap();

    let text = pipe.stats();
    assert!(!text.contains("Overall Pipeline Time Breakdown"));
    assert_eq!(
        canonicalize(&text),
        format!("== Pipeline Window Z ==\n{}{}", executed_block("Z", "read"), ITERATOR_BLOCK)
    );

    clock.advance(Duration::from_millis(1));
    let tracker = pipe.begin_window(1, &[StagePlan::cached("read")]).unwrap();
    consume(&clock, |p| tracker.enter(p), || tracker.exit(Phase::User));
    pipe.complete_window(1).unwrap();
    assert!(canonicalize(&pipe.stats()).ends_with(OVERALL_BLOCK));
}

#[test]
fn split_branches_are_independent() {
    let clock = Arc::new(ManualClock::new(0));
    let pipe = PipelineStats::new(clock.clone());
    let branches = pipe.split(2);
    let (fast, slow) = (&branches[0], &branches[1]);

    // fast branch consumes both windows while slow is still in window 0
    let slow_w0 = slow.begin_window(0, &[StagePlan::new("read")]).unwrap();
    for window in 0..2 {
        let tracker = fast.begin_window(window, &[StagePlan::new("read")]).unwrap();
        fast.record(window, 0, task(0, window)).unwrap();
        tracker.enter(Phase::User);
        clock.advance(Duration::from_millis(5));
        tracker.exit(Phase::User);
        fast.complete_window(window).unwrap();
    }
    assert_eq!(fast.report().windows.len(), 2);
    assert!(slow.report().windows.is_empty());
    assert_eq!(slow_w0.snapshot().total_ns, 0);

    slow_w0.enter(Phase::User);
    clock.advance(Duration::from_millis(1));
    slow_w0.exit(Phase::User);
    slow.complete_window(0).unwrap();
    let slow_w1 = slow.begin_window(1, &[StagePlan::cached("read")]).unwrap();
    slow_w1.enter(Phase::Wait);
    clock.advance(Duration::from_millis(1));
    slow_w1.exit(Phase::Wait);
    slow.complete_window(1).unwrap();

    let fast_report = fast.report();
    let slow_report = slow.report();
    assert_eq!(fast_report.windows.len(), 2);
    assert_eq!(slow_report.windows.len(), 2);
    assert_eq!(fast_report.user_time_ns, 10_000_000);
    assert_eq!(slow_report.user_time_ns, 1_000_000);
    assert_eq!(slow_report.iterator_time_ns, 1_000_000);
    assert!(slow_report.windows[1].cached_stages.contains("read"));
    assert!(fast_report.windows[1].cached_stages.is_empty());
}

#[tokio::test]
async fn simulated_cached_pipeline_report_shape() {
    let mut sim = SimulationConfig {
        windows: 3,
        nodes: 2,
        concurrency: 4,
        cache_upstream: true,
        user_time: "20us".to_string(),
        ..SimulationConfig::default()
    };
    for stage in &mut sim.stages {
        stage.blocks = 5;
        stage.task_time = "200us".to_string();
    }

    let outcomes = stagestats::sim::run(&sim, monotonic()).await.unwrap();
    let text = outcomes[0].stats.stats();

    assert_eq!(text.matches("== Pipeline Window ").count(), 3);
    assert_eq!(text.matches("[execution cached]").count(), 4);
    assert_eq!(text.matches("5/5 blocks executed").count(), 5);
    assert!(text.contains("##### Overall Pipeline Time Breakdown #####"));
    assert_eq!(outcomes[0].collector.rejected, 0);
}
