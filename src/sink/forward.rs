//! The forwarder client.
//!
//! Buffers the cycle's partial sketches, and on the flush tick groups
//! them by the ring's destination for their metric name and ships each
//! group as one length-prefixed stream over a fresh connection. The
//! stream is closed every cycle so a stalled peer can never delay the
//! next one; a failed destination loses its batch for this cycle and
//! that is that — later intervals carry new data, and a retry would
//! double-count.

use hopper;
use metric;
use protocols::forward::{read_frame, write_frame, FlushAck, WirePartial};
use ring::Ring;
use sink::Sink;
use sketch::Partial;
use source;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use time;
use util;

/// Configuration for the forwarder.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Flush interval in seconds; the per-cycle network budget is one
    /// second less so a slow peer cannot bleed into the next cycle.
    pub interval: u64,
}

/// The forwarder sink.
pub struct Forward {
    ring: Arc<Ring>,
    buffer: Vec<Partial>,
    timeout: Duration,
}

impl Forward {
    pub fn new(ring: Arc<Ring>, config: ForwardConfig) -> Forward {
        let budget = if config.interval > 1 {
            config.interval - 1
        } else {
            1
        };
        Forward {
            ring: ring,
            buffer: Vec::new(),
            timeout: Duration::from_secs(budget),
        }
    }

    /// Ship everything buffered this cycle.
    fn ship(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        // one snapshot per cycle: every key this cycle routes against the
        // same membership view
        let snapshot = self.ring.snapshot();
        if snapshot.is_empty() {
            let lost = self.buffer.len();
            self.buffer.clear();
            source::report("meridian.forward.dropped_batch", 1.0);
            warn!(
                "no forward destinations known; dropped {} sketches this cycle",
                lost
            );
            return;
        }

        let mut batches: util::HashMap<String, Vec<Partial>> = util::HashMap::default();
        for partial in self.buffer.drain(..) {
            match snapshot.lookup(&partial.key.name) {
                Some(dest) => batches
                    .entry(dest.to_string())
                    .or_insert_with(Vec::new)
                    .push(partial),
                None => unreachable!("non-empty snapshot always routes"),
            }
        }

        for (dest, batch) in batches {
            let count = batch.len();
            match send_batch(&dest, &batch, self.timeout) {
                Ok(accepted) => {
                    trace!("forwarded {} sketches to {} ({} acked)", count, dest, accepted);
                }
                Err(e) => {
                    source::report("meridian.forward.dropped_batch", 1.0);
                    warn!(
                        "dropping batch of {} sketches for {}: {}",
                        count, dest, e
                    );
                }
            }
        }
    }
}

fn send_batch(dest: &str, batch: &[Partial], timeout: Duration) -> ::std::io::Result<u64> {
    let addr = dest.to_socket_addrs()?.next().ok_or_else(|| {
        ::std::io::Error::new(
            ::std::io::ErrorKind::AddrNotAvailable,
            "destination resolved to nothing",
        )
    })?;
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_read_timeout(Some(timeout))?;

    for partial in batch {
        let wire = WirePartial::from_partial(partial);
        write_frame(&mut stream, &wire)?;
    }
    stream.shutdown(Shutdown::Write)?;

    let ack: Option<FlushAck> = read_frame(&mut stream)?;
    Ok(ack.map(|a| a.accepted).unwrap_or(0))
}

impl Sink for Forward {
    fn name(&self) -> &str {
        "forward"
    }

    fn deliver(&mut self, _readout: metric::Readout) {
        // the forwarder ships sketches, not readouts
    }

    fn flush(&mut self) {
        self.ship();
    }

    /// Unlike ordinary sinks the forwarder's diet is `Partial` events.
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
                        metric::Event::Partial(partial) => {
                            self.buffer.push(partial);
                        }
                        metric::Event::TimerFlush(idx) => {
                            if idx > last_flush_idx {
                                self.flush();
                                last_flush_idx = idx;
                            }
                        }
                        metric::Event::Shutdown => {
                            self.flush();
                            return;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use metric::{Key, Kind, Sample, Scope};
    use protocols::forward::{write_frame, FlushAck, FramePump, WirePartial};
    use prost::Message;
    use ring::Ring;
    use sketch::{Partial, Sketch};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use super::*;

    fn counter_partial(name: &str, value: f64) -> Partial {
        let key = Key::new(name, Kind::Counter);
        let mut sketch = Sketch::for_kind(Kind::Counter);
        sketch.observe(&Sample::number(key.clone(), value));
        Partial::new(key, Scope::Global, sketch)
    }

    /// Stand up a real listener that accepts one forward stream, decodes
    /// it with the receiver-side pump and acks it, exactly as the global
    /// tier would.
    #[test]
    fn ships_one_stream_per_cycle_and_reads_the_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();

        let acceptor = thread::spawn(move || {
            let (mut stream, _peer) = listener.accept().unwrap();
            let mut pump = FramePump::new();
            let mut frames = Vec::new();
            loop {
                let open = pump.fill(&mut stream).unwrap();
                while let Some(body) = pump.next_frame().unwrap() {
                    frames.push(WirePartial::decode(&body[..]).unwrap());
                }
                if !open {
                    break;
                }
            }
            write_frame(&mut stream, &FlushAck { accepted: frames.len() as u64 })
                .unwrap();
            tx.send(frames).unwrap();
        });

        let ring = Arc::new(Ring::with_members(vec![addr.to_string()]));
        let mut forward = Forward::new(ring, ForwardConfig { interval: 10 });
        forward.buffer.push(counter_partial("a.one", 1.0));
        forward.buffer.push(counter_partial("a.two", 2.0));
        forward.ship();

        let frames = rx.recv().unwrap();
        assert_eq!(2, frames.len());
        assert!(forward.buffer.is_empty());
        acceptor.join().unwrap();
    }

    #[test]
    fn unreachable_destination_drops_the_batch() {
        // bind-then-drop guarantees a dead port
        let dead_addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let ring = Arc::new(Ring::with_members(vec![dead_addr.to_string()]));
        let mut forward = Forward::new(ring, ForwardConfig { interval: 2 });
        forward.buffer.push(counter_partial("lost", 1.0));
        forward.ship();
        assert!(forward.buffer.is_empty());
    }

    #[test]
    fn empty_ring_drops_the_cycle() {
        let ring = Arc::new(Ring::new());
        let mut forward = Forward::new(ring, ForwardConfig { interval: 10 });
        forward.buffer.push(counter_partial("nowhere", 1.0));
        forward.ship();
        assert!(forward.buffer.is_empty());
    }
}
