use std::time::Duration;
use voicewire::{MetricsCollector, TurnSnapshot, METRICS_HISTORY_CAPACITY};

#[test]
fn average_over_zero_turns_is_all_zero() {
    let metrics = MetricsCollector::new();
    assert_eq!(metrics.average(), TurnSnapshot::default());
}

#[test]
fn first_audio_mark_is_not_overwritten() {
    let metrics = MetricsCollector::new();
    metrics.mark_pipeline_start();
    std::thread::sleep(Duration::from_millis(10));
    metrics.mark_pipeline_end();
    let first = metrics.current().pipeline_latency;
    assert!(first >= Duration::from_millis(10));

    std::thread::sleep(Duration::from_millis(10));
    metrics.mark_pipeline_end();
    assert_eq!(metrics.current().pipeline_latency, first);
}

#[test]
fn response_done_mark_is_idempotent_but_counters_still_move() {
    let metrics = MetricsCollector::new();
    metrics.mark_pipeline_start();
    metrics.mark_response_done();
    let total = metrics.current().total_latency;
    std::thread::sleep(Duration::from_millis(5));
    metrics.mark_response_done();
    metrics.increment_audio_out();
    assert_eq!(metrics.current().total_latency, total);
    assert_eq!(metrics.current().audio_chunks_out, 1);
}

#[test]
fn reset_zeroes_everything_for_the_next_turn() {
    let metrics = MetricsCollector::new();
    metrics.mark_capture_start();
    metrics.mark_send_start();
    metrics.mark_send_end();
    metrics.increment_audio_in();
    metrics.reset();
    assert_eq!(metrics.current(), TurnSnapshot::default());
}

#[test]
fn average_is_arithmetic_mean_of_counters() {
    let metrics = MetricsCollector::new();
    for turn in 0..4_u64 {
        for _ in 0..=turn {
            metrics.increment_audio_in();
        }
        metrics.complete_turn();
    }
    // 1 + 2 + 3 + 4 chunks over four turns.
    assert_eq!(metrics.average().audio_chunks_in, 10 / 4);
    assert_eq!(metrics.history_len(), 4);
}

#[test]
fn completing_a_turn_resets_the_live_metrics() {
    let metrics = MetricsCollector::new();
    metrics.mark_pipeline_start();
    metrics.increment_audio_out();
    metrics.complete_turn();
    assert_eq!(metrics.current(), TurnSnapshot::default());
    assert_eq!(metrics.history_len(), 1);
}

#[test]
fn history_evicts_oldest_beyond_capacity() {
    let metrics = MetricsCollector::new();
    for _ in 0..METRICS_HISTORY_CAPACITY + 25 {
        metrics.increment_audio_in();
        metrics.complete_turn();
    }
    assert_eq!(metrics.history_len(), METRICS_HISTORY_CAPACITY);
}
