//! Rolling tick-rate measurement.

use std::collections::VecDeque;

use web_time::Instant;

/// Number of tick timestamps kept for the rolling rate.
pub const TICK_WINDOW: usize = 20;

/// Remembers when the last few ticks started.
#[derive(Debug, Clone)]
pub struct TickTimer {
    starts: VecDeque<Instant>,
    capacity: usize,
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new(TICK_WINDOW)
    }
}

impl TickTimer {
    /// A timer averaging over `capacity` ticks (at least two).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        TickTimer {
            starts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records a tick starting at `now`.
    pub fn record(&mut self, now: Instant) {
        if self.starts.len() == self.capacity {
            self.starts.pop_front();
        }
        self.starts.push_back(now);
    }

    /// Ticks per second over the window, or 0 before two ticks were seen.
    pub fn ticks_per_second(&self) -> f64 {
        match (self.starts.front(), self.starts.back()) {
            (Some(first), Some(last)) if self.starts.len() > 1 => {
                let elapsed = last.duration_since(*first).as_secs_f64();
                if elapsed > 0.0 {
                    (self.starts.len() - 1) as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use web_time::Duration;

    #[test]
    fn rate_is_averaged_over_the_window() {
        let mut timer = TickTimer::new(5);
        assert_eq!(timer.ticks_per_second(), 0.0);

        let start = Instant::now();
        // Ten slow ticks, then four fast ones fill the window.
        for i in 0..10 {
            timer.record(start + Duration::from_millis(i * 500));
        }
        let fast_start = start + Duration::from_secs(5);
        for i in 0..5 {
            timer.record(fast_start + Duration::from_millis(i * 50));
        }
        assert!((timer.ticks_per_second() - 20.0).abs() < 1e-6);
    }
}
