//! Sinks accept readouts and periodically flush them somewhere.
//!
//! A sink runs a single receive loop over its hopper channel: readouts
//! are delivered as they arrive, `TimerFlush` closes the interval and
//! `Shutdown` performs one final flush before the loop exits. A sink
//! error never stops the loop — emission failures are counted and the
//! remaining readouts keep flowing.
mod console;
mod forward;
mod null;

pub use self::console::{Console, ConsoleConfig};
pub use self::forward::{Forward, ForwardConfig};
pub use self::null::{Null, NullConfig};

use hopper;
use metric;
use source;
use std::thread;
use time;

/// Backpressure valve. A closed sink sheds readouts instead of blocking
/// the router.
pub enum Valve {
    Open,
    Closed,
}

/// A sink for readouts.
pub trait Sink {
    /// The sink's configured name, matched against readout sink filters.
    fn name(&self) -> &str;

    /// Accept one readout.
    fn deliver(&mut self, readout: metric::Readout) -> ();

    /// Close out the interval.
    fn flush(&mut self) -> ();

    /// Current backpressure state.
    fn valve_state(&self) -> Valve {
        Valve::Open
    }

    /// The receive loop. Sinks with unusual event diets override this.
    fn run(&mut self, recv: hopper::Receiver<metric::Event>) {
        let mut recv = recv.into_iter();
        let mut attempts: u32 = 0;
        let mut last_flush_idx = 0;
        loop {
            time::delay(attempts);
            match recv.next() {
                None => attempts += 1,
                Some(event) => {
                    attempts = 0;
                    match event {
                        metric::Event::TimerFlush(idx) => {
                            if idx > last_flush_idx {
                                self.flush();
                                last_flush_idx = idx;
                            }
                        }
                        metric::Event::Readout(readout) => match self.valve_state() {
                            Valve::Open => self.deliver(readout),
                            Valve::Closed => {
                                source::report("meridian.sink.shed", 1.0);
                            }
                        },
                        metric::Event::Shutdown => {
                            self.flush();
                            return;
                        }
                        // samples and partials do not address sinks
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Run a sink on its own thread.
pub fn spawn<S>(mut sink: S, recv: hopper::Receiver<metric::Event>) -> thread::JoinHandle<()>
where
    S: Sink + Send + 'static,
{
    thread::spawn(move || {
        sink.run(recv);
    })
}
