//! Per-turn latency instrumentation.
//!
//! One conversational turn spans from the last outbound audio write to the
//! backend's response-complete event. The collector records stage timestamps
//! for the live turn, derives durations on demand, and archives completed
//! turns into a bounded rolling history for averaging.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Number of completed turns retained for [`MetricsCollector::average`].
pub const METRICS_HISTORY_CAPACITY: usize = 100;

/// Derived durations and counters for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnSnapshot {
    /// Microphone capture span.
    pub capture_time: Duration,
    /// Last outbound socket write span.
    pub send_time: Duration,
    /// Last outbound audio to first inbound audio (time to first audio).
    pub pipeline_latency: Duration,
    /// First to last inbound audio chunk.
    pub receive_time: Duration,
    /// Playback span reported by the consumer.
    pub playback_time: Duration,
    /// Last outbound audio to response-complete.
    pub total_latency: Duration,
    pub audio_chunks_in: u64,
    pub audio_chunks_out: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct TurnTimers {
    capture_start: Option<Instant>,
    capture_end: Option<Instant>,
    send_start: Option<Instant>,
    send_end: Option<Instant>,
    pipeline_start: Option<Instant>,
    pipeline_end: Option<Instant>,
    receive_start: Option<Instant>,
    receive_end: Option<Instant>,
    playback_start: Option<Instant>,
    playback_end: Option<Instant>,
    response_done: Option<Instant>,
    audio_chunks_in: u64,
    audio_chunks_out: u64,
}

impl TurnTimers {
    fn is_empty(&self) -> bool {
        self.capture_start.is_none()
            && self.send_start.is_none()
            && self.pipeline_start.is_none()
            && self.receive_start.is_none()
            && self.playback_start.is_none()
            && self.audio_chunks_in == 0
            && self.audio_chunks_out == 0
    }

    fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            capture_time: span(self.capture_start, self.capture_end),
            send_time: span(self.send_start, self.send_end),
            pipeline_latency: span(self.pipeline_start, self.pipeline_end),
            receive_time: span(self.receive_start, self.receive_end),
            playback_time: span(self.playback_start, self.playback_end),
            total_latency: span(self.pipeline_start, self.response_done),
            audio_chunks_in: self.audio_chunks_in,
            audio_chunks_out: self.audio_chunks_out,
        }
    }
}

fn span(start: Option<Instant>, end: Option<Instant>) -> Duration {
    match (start, end) {
        (Some(start), Some(end)) => end.saturating_duration_since(start),
        _ => Duration::ZERO,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turn-scoped latency timer bank, safe for concurrent marking and reading.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    live: Mutex<TurnTimers>,
    history: Mutex<VecDeque<TurnSnapshot>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First-write-wins within a turn.
    pub fn mark_capture_start(&self) {
        lock(&self.live).capture_start.get_or_insert_with(Instant::now);
    }

    pub fn mark_capture_end(&self) {
        lock(&self.live).capture_end = Some(Instant::now());
    }

    /// Tracks the most recent outbound write; overwritten per chunk.
    pub fn mark_send_start(&self) {
        lock(&self.live).send_start = Some(Instant::now());
    }

    pub fn mark_send_end(&self) {
        lock(&self.live).send_end = Some(Instant::now());
    }

    /// The turn boundary: set after each outbound audio write, so the live
    /// value always reflects the last audio sent.
    pub fn mark_pipeline_start(&self) {
        lock(&self.live).pipeline_start = Some(Instant::now());
    }

    /// First inbound audio of the turn; later calls are no-ops.
    pub fn mark_pipeline_end(&self) {
        lock(&self.live).pipeline_end.get_or_insert_with(Instant::now);
    }

    /// First-write-wins within a turn.
    pub fn mark_receive_start(&self) {
        lock(&self.live).receive_start.get_or_insert_with(Instant::now);
    }

    pub fn mark_receive_end(&self) {
        lock(&self.live).receive_end = Some(Instant::now());
    }

    /// First-write-wins within a turn.
    pub fn mark_playback_start(&self) {
        lock(&self.live).playback_start.get_or_insert_with(Instant::now);
    }

    pub fn mark_playback_end(&self) {
        lock(&self.live).playback_end = Some(Instant::now());
    }

    /// First-write-wins within a turn.
    pub fn mark_response_done(&self) {
        lock(&self.live).response_done.get_or_insert_with(Instant::now);
    }

    pub fn increment_audio_in(&self) {
        lock(&self.live).audio_chunks_in += 1;
    }

    pub fn increment_audio_out(&self) {
        lock(&self.live).audio_chunks_out += 1;
    }

    /// Snapshot of the live turn.
    #[must_use]
    pub fn current(&self) -> TurnSnapshot {
        lock(&self.live).snapshot()
    }

    /// Archive the live turn into the rolling history and reset for the
    /// next turn. A turn with no recorded activity is discarded rather than
    /// archived so it cannot dilute averages.
    pub fn complete_turn(&self) {
        let timers = {
            let mut live = lock(&self.live);
            if live.is_empty() {
                return;
            }
            live.response_done.get_or_insert_with(Instant::now);
            std::mem::take(&mut *live)
        };
        let mut history = lock(&self.history);
        if history.len() == METRICS_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(timers.snapshot());
    }

    /// Clear all live timestamps and counters.
    pub fn reset(&self) {
        *lock(&self.live) = TurnTimers::default();
    }

    /// Number of archived turns, at most [`METRICS_HISTORY_CAPACITY`].
    #[must_use]
    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }

    /// Arithmetic mean over the rolling history; all-zero when empty.
    #[must_use]
    pub fn average(&self) -> TurnSnapshot {
        let history = lock(&self.history);
        let n = history.len() as u32;
        if n == 0 {
            return TurnSnapshot::default();
        }
        let mut sum = TurnSnapshot::default();
        for turn in history.iter() {
            sum.capture_time += turn.capture_time;
            sum.send_time += turn.send_time;
            sum.pipeline_latency += turn.pipeline_latency;
            sum.receive_time += turn.receive_time;
            sum.playback_time += turn.playback_time;
            sum.total_latency += turn.total_latency;
            sum.audio_chunks_in += turn.audio_chunks_in;
            sum.audio_chunks_out += turn.audio_chunks_out;
        }
        TurnSnapshot {
            capture_time: sum.capture_time / n,
            send_time: sum.send_time / n,
            pipeline_latency: sum.pipeline_latency / n,
            receive_time: sum.receive_time / n,
            playback_time: sum.playback_time / n,
            total_latency: sum.total_latency / n,
            audio_chunks_in: sum.audio_chunks_in / u64::from(n),
            audio_chunks_out: sum.audio_chunks_out / u64::from(n),
        }
    }
}
