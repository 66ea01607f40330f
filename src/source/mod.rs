//! Sources produce `metric::Event`s and push them into worker channels.
//!
//! Every source follows the same lifecycle: construct with its channels
//! and config, `spawn` onto one or more mio-backed threads, exit when the
//! SYSTEM token fires and send a single `Event::Shutdown` down each
//! channel per spawned thread so downstream stages can count their
//! upstreams out.
mod flush;
mod forward;
mod internal;
mod statsd;
pub mod tcp;

pub use self::flush::{FlushTimer, FlushTimerConfig};
pub use self::forward::{ForwardServer, ForwardServerConfig};
pub use self::internal::{report, report_gauge, Internal, InternalConfig};
pub use self::statsd::{Statsd, StatsdConfig};

use util;

/// A source of events.
pub trait Source<C> {
    /// Create a new source with its downstream channels.
    fn new(chans: util::Channel, config: C) -> Self;

    /// Start the source. Each returned handle is one thread that will
    /// send one `Event::Shutdown` downstream when stopped.
    fn spawn(self) -> Vec<util::ThreadHandle>;
}
