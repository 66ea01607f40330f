//! The flush clock.
//!
//! Emits `Event::TimerFlush(idx)` on wall-clock multiples of the flush
//! interval — every host ticks at :00, :10, :20 for a 10s interval — so
//! that partial sketches cut on different machines describe the same
//! window. The tick index is monotonic from process start.

use chrono::Utc;
use metric;
use mio;
use source::Source;
use std::time::Duration;
use util;

/// Configuration for the flush timer: the interval in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct FlushTimerConfig {
    pub interval: u64,
}

/// The flush timer source.
pub struct FlushTimer {
    chans: util::Channel,
    interval: u64,
}

impl Source<FlushTimerConfig> for FlushTimer {
    fn new(chans: util::Channel, config: FlushTimerConfig) -> FlushTimer {
        assert!(config.interval > 0);
        FlushTimer {
            chans: chans,
            interval: config.interval,
        }
    }

    fn spawn(self) -> Vec<util::ThreadHandle> {
        let mut chans = self.chans.clone();
        let interval_ms = (self.interval * 1000) as i64;
        vec![
            util::spawn_poller(move |poller| {
                let mut events = mio::Events::with_capacity(8);
                let mut idx: u64 = 0;
                let mut next = next_boundary(Utc::now().timestamp_millis(), interval_ms);
                loop {
                    let now = Utc::now().timestamp_millis();
                    if now >= next {
                        idx += 1;
                        util::send(&mut chans, metric::Event::TimerFlush(idx));
                        next = next_boundary(now, interval_ms);
                        continue;
                    }
                    let wait = Duration::from_millis((next - now) as u64);
                    match poller.poll(&mut events, Some(wait)) {
                        Err(e) => panic!("flush timer poll failed: {:?}", e),
                        Ok(num_events) => {
                            if num_events > 0 {
                                // only SYSTEM is registered; do not send
                                // Shutdown here — the timer is not an
                                // upstream the workers count
                                return;
                            }
                        }
                    }
                }
            }),
        ]
    }
}

fn next_boundary(now_ms: i64, interval_ms: i64) -> i64 {
    (now_ms / interval_ms + 1) * interval_ms
}

#[cfg(test)]
mod test {
    use super::next_boundary;

    #[test]
    fn boundaries_align_to_interval_multiples() {
        assert_eq!(10_000, next_boundary(0, 10_000));
        assert_eq!(10_000, next_boundary(1, 10_000));
        assert_eq!(10_000, next_boundary(9_999, 10_000));
        assert_eq!(20_000, next_boundary(10_000, 10_000));
        assert_eq!(1_483_228_810_000, next_boundary(1_483_228_800_001, 10_000));
    }
}
