use std::collections::VecDeque;

/// Monotonic local tick counter derived from elapsed wall time, with an
/// additive offset for translating into the peer's tick numbering.
#[derive(Debug)]
pub struct TickClock {
    tick_rate: u32,
    tick_ms: f64,
    start_ms: Option<f64>,
    offset: i64,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            tick_ms: 1000.0 / tick_rate as f64,
            start_ms: None,
            offset: 0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn start(&mut self, now_ms: f64) {
        self.start_ms = Some(now_ms);
    }

    pub fn is_started(&self) -> bool {
        self.start_ms.is_some()
    }

    /// Current tick index; 0 before `start`.
    pub fn current_tick(&self, now_ms: f64) -> u64 {
        match self.start_ms {
            Some(start) => {
                let elapsed = (now_ms - start).max(0.0);
                (elapsed / self.tick_ms) as u64
            }
            None => 0,
        }
    }

    pub fn set_offset(&mut self, offset: i64) {
        self.offset = offset;
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn to_remote_tick(&self, local_tick: u64) -> u64 {
        (local_tick as i64 + self.offset).max(0) as u64
    }

    pub fn to_local_tick(&self, remote_tick: u64) -> u64 {
        (remote_tick as i64 - self.offset).max(0) as u64
    }

    pub fn reset(&mut self) {
        self.start_ms = None;
        self.offset = 0;
    }
}

const MAX_OFFSET_SAMPLES: usize = 10;

/// Round-trip-time estimator producing a smoothed clock offset from
/// ping/pong samples. Publishes the median of a bounded window so a single
/// RTT spike cannot skew the offset. An estimator, not a consensus protocol:
/// it trusts the peer's reported pong timestamp.
#[derive(Debug, Default)]
pub struct ClockSync {
    samples: VecDeque<f64>,
    offset_ms: f64,
    rtt_ms: f64,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a pong for a ping sent at `sent_ms`. `remote_ms` is the
    /// responder's local time when it answered.
    pub fn process_pong(&mut self, sent_ms: f64, remote_ms: f64, now_ms: f64) {
        let rtt = now_ms - sent_ms;
        let one_way = rtt / 2.0;
        let offset = remote_ms + one_way - now_ms;

        if self.samples.len() >= MAX_OFFSET_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(offset);

        self.offset_ms = median(&self.samples);
        self.rtt_ms = rtt;
    }

    /// Median one-way offset to the peer's clock, in milliseconds.
    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    /// Offset converted to whole ticks at `tick_rate`.
    pub fn offset_ticks(&self, tick_rate: u32) -> i64 {
        (self.offset_ms * tick_rate as f64 / 1000.0).round() as i64
    }

    /// Most recent raw round-trip time, in milliseconds.
    pub fn rtt_ms(&self) -> f64 {
        self.rtt_ms
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.offset_ms = 0.0;
        self.rtt_ms = 0.0;
    }
}

fn median(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_zero_before_start() {
        let clock = TickClock::new(60);
        assert_eq!(clock.current_tick(123_456.0), 0);
    }

    #[test]
    fn tick_advances_with_elapsed_time() {
        let mut clock = TickClock::new(60);
        clock.start(1000.0);

        assert_eq!(clock.current_tick(1000.0), 0);
        assert_eq!(clock.current_tick(1016.0), 0);
        assert_eq!(clock.current_tick(1017.0), 1);
        assert_eq!(clock.current_tick(2001.0), 60);
    }

    #[test]
    fn offset_translation_is_additive() {
        let mut clock = TickClock::new(60);
        clock.set_offset(5);

        assert_eq!(clock.to_remote_tick(100), 105);
        assert_eq!(clock.to_local_tick(105), 100);

        clock.set_offset(-10);
        assert_eq!(clock.to_remote_tick(100), 90);
        assert_eq!(clock.to_local_tick(90), 100);
    }

    #[test]
    fn reset_returns_clock_to_unstarted_state() {
        let mut clock = TickClock::new(60);
        clock.start(0.0);
        clock.set_offset(7);
        clock.reset();

        assert!(!clock.is_started());
        assert_eq!(clock.offset(), 0);
        assert_eq!(clock.current_tick(10_000.0), 0);
    }

    #[test]
    fn pong_produces_offset_and_rtt() {
        let mut sync = ClockSync::new();
        // Ping at 1000, pong at 1100: 100ms RTT. Remote clock read 5000 at
        // reply time, so the remote is ~3950ms ahead.
        sync.process_pong(1000.0, 5000.0, 1100.0);

        assert_eq!(sync.rtt_ms(), 100.0);
        assert_eq!(sync.offset_ms(), 3950.0);
    }

    #[test]
    fn median_rejects_single_outlier() {
        let mut sync = ClockSync::new();

        // Nine samples with ~50ms offset, one 5000ms spike.
        for i in 0..9 {
            let sent = i as f64 * 500.0;
            let now = sent + 40.0;
            sync.process_pong(sent, now + 50.0 - 20.0, now);
        }
        let sent = 9000.0;
        let now = sent + 40.0;
        sync.process_pong(sent, now + 5000.0 - 20.0, now);

        assert!((sync.offset_ms() - 50.0).abs() < 1.0);
        assert_eq!(sync.rtt_ms(), 40.0);
    }

    #[test]
    fn window_is_bounded_to_ten_samples() {
        let mut sync = ClockSync::new();
        for i in 0..25 {
            sync.process_pong(i as f64, i as f64 + 10.0, i as f64 + 20.0);
        }
        assert_eq!(sync.sample_count(), 10);
    }

    #[test]
    fn reset_clears_samples() {
        let mut sync = ClockSync::new();
        sync.process_pong(0.0, 100.0, 50.0);
        sync.reset();

        assert_eq!(sync.sample_count(), 0);
        assert_eq!(sync.offset_ms(), 0.0);
        assert_eq!(sync.rtt_ms(), 0.0);
    }

    #[test]
    fn offset_ticks_rounds_to_nearest() {
        let mut sync = ClockSync::new();
        // 100ms offset at 60Hz is 6 ticks.
        sync.process_pong(0.0, 100.0, 0.0);
        assert_eq!(sync.offset_ticks(60), 6);
    }
}
