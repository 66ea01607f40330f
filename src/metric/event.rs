use metric::{Readout, Sample};
use sketch::Partial;

/// The envelope every pipeline stage sends and receives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A raw observation headed for a worker shard.
    Sample(Sample),
    /// An already-aggregated sketch headed for a worker shard's `import`.
    Partial(Partial),
    /// An emitted aggregate headed for a sink.
    Readout(Readout),
    /// A whole shard table, drained at the flush boundary, headed for the
    /// flush router. `tick` identifies the interval it closes.
    Flushed {
        shard: u32,
        tick: u64,
        partials: Vec<Partial>,
    },
    /// The flush clock. Monotonic tick index since process start.
    TimerFlush(u64),
    /// Orderly teardown marker. Each stage finishes its in-flight work,
    /// propagates the marker downstream and exits its loop.
    Shutdown,
}

impl Event {
    #[inline]
    pub fn new_sample(sample: Sample) -> Event {
        Event::Sample(sample)
    }

    #[inline]
    pub fn new_readout(readout: Readout) -> Event {
        Event::Readout(readout)
    }

    pub fn is_timer_flush(&self) -> bool {
        match *self {
            Event::TimerFlush(_) => true,
            _ => false,
        }
    }
}
