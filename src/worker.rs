//! The worker shard.
//!
//! Each worker owns one `Buckets` table covering a disjoint slice of the
//! key space — sources route every event for a key to the same worker by
//! hashing the key — and runs a single receive loop: fold samples and
//! imported partials in, swap the table out on every flush tick, ship the
//! drained table to the flush router. Ingest never pauses for a flush;
//! the swap is one move and new samples land in the fresh table.

use buckets::Buckets;
use hopper;
use metric;
use std::thread;
use time;

/// One shard's identity and wiring.
pub struct Worker {
    shard: u32,
    buckets: Buckets,
    recv: hopper::Receiver<metric::Event>,
    output: hopper::Sender<metric::Event>,
    /// How many upstream source threads feed this worker. The worker
    /// exits after hearing a `Shutdown` from each of them.
    upstreams: usize,
}

impl Worker {
    pub fn new(
        shard: u32,
        recv: hopper::Receiver<metric::Event>,
        output: hopper::Sender<metric::Event>,
        upstreams: usize,
    ) -> Worker {
        Worker {
            shard: shard,
            buckets: Buckets::new(),
            recv: recv,
            output: output,
            upstreams: upstreams,
        }
    }

    /// Start the shard loop on its own thread.
    pub fn run(self) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut worker = self;
            let shard = worker.shard;
            let mut output = worker.output;
            let mut buckets = worker.buckets;
            let upstreams = worker.upstreams;

            let mut recv = worker.recv.into_iter();
            let mut attempts: u32 = 0;
            let mut shutdowns_seen = 0;
            let mut last_tick: u64 = 0;
            loop {
                time::delay(attempts);
                match recv.next() {
                    None => {
                        attempts += 1;
                    }
                    Some(event) => {
                        attempts = 0;
                        match event {
                            metric::Event::Sample(sample) => {
                                buckets.add(sample);
                            }
                            metric::Event::Partial(partial) => {
                                buckets.import(partial);
                            }
                            metric::Event::TimerFlush(tick) => {
                                if tick <= last_tick {
                                    // duplicate clock event, already cut
                                    continue;
                                }
                                last_tick = tick;
                                let partials = buckets.take();
                                output.send(metric::Event::Flushed {
                                    shard: shard,
                                    tick: tick,
                                    partials: partials,
                                });
                            }
                            metric::Event::Shutdown => {
                                shutdowns_seen += 1;
                                if shutdowns_seen >= upstreams {
                                    let partials = buckets.take();
                                    if !partials.is_empty() {
                                        output.send(metric::Event::Flushed {
                                            shard: shard,
                                            tick: last_tick + 1,
                                            partials: partials,
                                        });
                                    }
                                    output.send(metric::Event::Shutdown);
                                    return;
                                }
                            }
                            // routers and sinks speak these, not us
                            metric::Event::Readout(_) | metric::Event::Flushed { .. } => {}
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use hopper;
    use metric::{Event, Key, Kind, Sample};
    use tempdir::TempDir;
    use super::*;

    fn channel(dir: &TempDir, name: &str) -> (
        hopper::Sender<Event>,
        hopper::Receiver<Event>,
    ) {
        hopper::channel(name, dir.path()).unwrap()
    }

    #[test]
    fn flush_tick_ships_table_and_keeps_ingesting() {
        let dir = TempDir::new("worker").unwrap();
        let (mut input, input_recv) = channel(&dir, "input");
        let (output, output_recv) = channel(&dir, "output");

        let key = Key::new("c", Kind::Counter);
        input.send(Event::Sample(Sample::number(key.clone(), 1.0)));
        input.send(Event::Sample(Sample::number(key.clone(), 1.0)));
        input.send(Event::TimerFlush(1));
        input.send(Event::Sample(Sample::number(key.clone(), 5.0)));
        input.send(Event::TimerFlush(2));
        input.send(Event::Shutdown);

        let handle = Worker::new(3, input_recv, output, 1).run();
        handle.join().unwrap();

        let collected: Vec<Event> = output_recv.into_iter().collect();
        // two flush bundles then the shutdown marker
        assert_eq!(3, collected.len());
        match collected[0] {
            Event::Flushed { shard, tick, ref partials } => {
                assert_eq!(3, shard);
                assert_eq!(1, tick);
                assert_eq!(1, partials.len());
            }
            ref other => panic!("unexpected event {:?}", other),
        }
        match collected[1] {
            Event::Flushed { tick, ref partials, .. } => {
                assert_eq!(2, tick);
                assert_eq!(1, partials.len());
            }
            ref other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(Event::Shutdown, collected[2]);
    }

    #[test]
    fn shutdown_waits_for_every_upstream() {
        let dir = TempDir::new("worker").unwrap();
        let (mut input, input_recv) = channel(&dir, "input");
        let (output, output_recv) = channel(&dir, "output");

        let key = Key::new("g", Kind::Gauge);
        input.send(Event::Shutdown);
        input.send(Event::Sample(Sample::number(key, 2.0)));
        input.send(Event::Shutdown);

        let handle = Worker::new(0, input_recv, output, 2).run();
        handle.join().unwrap();

        let collected: Vec<Event> = output_recv.into_iter().collect();
        // the sample arriving between the two shutdowns still flushes
        assert_eq!(2, collected.len());
        match collected[0] {
            Event::Flushed { ref partials, .. } => assert_eq!(1, partials.len()),
            ref other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(Event::Shutdown, collected[1]);
    }
}
