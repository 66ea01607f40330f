//! The flush router: the piece that makes a node local or global.
//!
//! Workers ship their drained tables here every tick. For each partial
//! the router consults the scope policy to decide what is emitted to
//! sinks on this node and what is shipped to the forwarder for
//! cluster-wide aggregation. Once every shard has reported for a tick the
//! router releases the tick to the sinks, so a sink's flush always covers
//! the complete interval.
//!
//! The scope policy matrix, local tier:
//!
//! | family          | Local scope | Mixed scope           | Global scope |
//! |-----------------|-------------|-----------------------|--------------|
//! | counter         | emit        | emit, do not forward  | forward      |
//! | gauge           | emit        | emit, do not forward  | forward      |
//! | histogram/timer | emit all    | emit percentiles only,| forward      |
//! |                 |             | forward the sketch    |              |
//! | set             | emit        | forward only          | forward      |
//!
//! A global node emits everything it imported: percentiles only for
//! mixed-scope histograms (their scalar aggregates were emitted by the
//! hosts that observed them), the full expansion otherwise. Mixed
//! counters and gauges never reach a global node at all — forwarding
//! them as well would count the same observations on both tiers.

use hopper;
use metric;
use metric::{Kind, Readout, Scope};
use sketch::{FlushPlan, Partial};
use source;
use std::thread;
use time;

/// Which half of the two-tier topology this process plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Local,
    Global,
}

/// What the policy decided for one partial.
#[derive(Clone, Debug, PartialEq)]
pub struct Disposition {
    /// Readouts to emit through this node's sinks.
    pub readouts: Vec<Readout>,
    /// Whether the sketch itself travels upstream.
    pub forward: bool,
}

/// Apply the scope policy to one partial. Pure: same inputs, same
/// disposition.
pub fn route(tier: Tier, partial: &Partial, now: i64, plan: &FlushPlan) -> Disposition {
    let key = &partial.key;
    let sketch = &partial.sketch;
    match tier {
        Tier::Global => {
            let readouts = match (partial.scope, key.kind) {
                (Scope::Mixed, Kind::Histogram) | (Scope::Mixed, Kind::Timer) => {
                    sketch.flush_quantiles(key, now, plan)
                }
                _ => sketch.flush(key, now, plan),
            };
            Disposition {
                readouts: readouts,
                forward: false,
            }
        }
        Tier::Local => match partial.scope {
            Scope::Local => Disposition {
                readouts: sketch.flush(key, now, plan),
                forward: false,
            },
            Scope::Global => Disposition {
                readouts: Vec::new(),
                forward: true,
            },
            Scope::Mixed => match key.kind {
                Kind::Counter | Kind::Gauge => Disposition {
                    readouts: sketch.flush(key, now, plan),
                    forward: false,
                },
                Kind::Histogram | Kind::Timer => Disposition {
                    readouts: sketch.flush_quantiles(key, now, plan),
                    forward: true,
                },
                Kind::Set => Disposition {
                    readouts: Vec::new(),
                    forward: true,
                },
            },
        },
    }
}

/// Router wiring.
pub struct FlushRouter {
    tier: Tier,
    plan: FlushPlan,
    num_shards: u32,
    recv: hopper::Receiver<metric::Event>,
    sinks: Vec<(String, hopper::Sender<metric::Event>)>,
    forward: Option<hopper::Sender<metric::Event>>,
}

impl FlushRouter {
    pub fn new(
        tier: Tier,
        plan: FlushPlan,
        num_shards: u32,
        recv: hopper::Receiver<metric::Event>,
        sinks: Vec<(String, hopper::Sender<metric::Event>)>,
        forward: Option<hopper::Sender<metric::Event>>,
    ) -> FlushRouter {
        FlushRouter {
            tier: tier,
            plan: plan,
            num_shards: num_shards,
            recv: recv,
            sinks: sinks,
            forward: forward,
        }
    }

    /// Start the router loop on its own thread.
    pub fn run(self) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let tier = self.tier;
            let plan = self.plan;
            let num_shards = self.num_shards;
            let mut sinks = self.sinks;
            let mut forward = self.forward;

            let mut recv = self.recv.into_iter();
            let mut attempts: u32 = 0;
            // tick -> shards heard from
            let mut pending: Vec<(u64, u32)> = Vec::new();
            let mut shutdowns_seen: u32 = 0;
            loop {
                time::delay(attempts);
                match recv.next() {
                    None => {
                        attempts += 1;
                    }
                    Some(event) => {
                        attempts = 0;
                        match event {
                            metric::Event::Flushed {
                                tick, partials, ..
                            } => {
                                let now = time::now();
                                for partial in partials {
                                    dispatch(
                                        tier,
                                        partial,
                                        now,
                                        &plan,
                                        &mut sinks,
                                        &mut forward,
                                    );
                                }
                                if complete(&mut pending, tick, num_shards) {
                                    release(tick, &mut sinks, &mut forward);
                                }
                            }
                            metric::Event::Shutdown => {
                                shutdowns_seen += 1;
                                if shutdowns_seen >= num_shards {
                                    for &mut (_, ref mut sink) in &mut sinks {
                                        sink.send(metric::Event::Shutdown);
                                    }
                                    if let Some(ref mut fwd) = forward {
                                        fwd.send(metric::Event::Shutdown);
                                    }
                                    return;
                                }
                            }
                            // nothing else addresses the router
                            _ => {}
                        }
                    }
                }
            }
        })
    }
}

fn dispatch(
    tier: Tier,
    partial: Partial,
    now: i64,
    plan: &FlushPlan,
    sinks: &mut Vec<(String, hopper::Sender<metric::Event>)>,
    forward: &mut Option<hopper::Sender<metric::Event>>,
) {
    let disposition = route(tier, &partial, now, plan);
    for readout in disposition.readouts {
        for &mut (ref name, ref mut sink) in sinks.iter_mut() {
            if readout.accepts_sink(name) {
                sink.send(metric::Event::Readout(readout.clone()));
            }
        }
    }
    if disposition.forward {
        match *forward {
            Some(ref mut fwd) => {
                fwd.send(metric::Event::Partial(partial));
            }
            None => {
                source::report("meridian.router.no_forwarder", 1.0);
                trace!(
                    "dropping forwardable sketch for {}: no forwarder configured",
                    partial.key.name
                );
            }
        }
    }
}

/// Record that one shard reported for `tick`; true when the tick is now
/// complete. An older tick still incomplete when a newer one finishes is
/// an interval skip: some shard spent more than a full interval inside
/// one flush.
fn complete(pending: &mut Vec<(u64, u32)>, tick: u64, num_shards: u32) -> bool {
    let idx = match pending.binary_search_by_key(&tick, |&(t, _)| t) {
        Ok(idx) => idx,
        Err(idx) => {
            pending.insert(idx, (tick, 0));
            idx
        }
    };
    pending[idx].1 += 1;
    if pending[idx].1 >= num_shards {
        for &(stale, seen) in pending[..idx].iter() {
            warn!(
                "interval skip: tick {} closed with {}/{} shards reporting",
                stale, seen, num_shards
            );
            source::report("meridian.router.interval_skip", 1.0);
        }
        pending.drain(..idx + 1);
        true
    } else {
        false
    }
}

fn release(
    tick: u64,
    sinks: &mut Vec<(String, hopper::Sender<metric::Event>)>,
    forward: &mut Option<hopper::Sender<metric::Event>>,
) {
    for &mut (_, ref mut sink) in sinks.iter_mut() {
        sink.send(metric::Event::TimerFlush(tick));
    }
    if let Some(ref mut fwd) = forward {
        fwd.send(metric::Event::TimerFlush(tick));
    }
}

#[cfg(test)]
mod test {
    use metric::{Key, Kind, Sample, Scope};
    use sketch::{Aggregate, FlushPlan, Partial, Sketch};
    use super::*;

    fn plan() -> FlushPlan {
        FlushPlan::new(
            10,
            vec![0.5, 0.75, 0.99],
            vec![Aggregate::Min, Aggregate::Max, Aggregate::Count],
        )
    }

    fn partial(name: &str, kind: Kind, scope: Scope, value: f64) -> Partial {
        let key = Key::new(name, kind);
        let mut sketch = Sketch::for_kind(kind);
        sketch.observe(&Sample::number(key.clone(), value));
        Partial::new(key, scope, sketch)
    }

    fn names(d: &Disposition) -> Vec<String> {
        d.readouts.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn local_scope_emits_everything_locally() {
        let p = partial("h", Kind::Histogram, Scope::Local, 20.0);
        let d = route(Tier::Local, &p, 0, &plan());
        assert!(!d.forward);
        assert_eq!(
            vec![
                "h.50percentile",
                "h.75percentile",
                "h.99percentile",
                "h.min",
                "h.max",
                "h.count",
            ],
            names(&d)
        );
    }

    #[test]
    fn global_scope_forwards_silently_from_local() {
        for kind in &[
            Kind::Counter,
            Kind::Gauge,
            Kind::Histogram,
            Kind::Timer,
            Kind::Set,
        ] {
            let p = partial("m", *kind, Scope::Global, 1.0);
            let d = route(Tier::Local, &p, 0, &plan());
            assert!(d.forward, "{:?}", kind);
            assert!(d.readouts.is_empty(), "{:?}", kind);
        }
    }

    #[test]
    fn mixed_counter_stays_local() {
        let p = partial("test.grpc.counter.local", Kind::Counter, Scope::Mixed, 100.0);
        let d = route(Tier::Local, &p, 0, &plan());
        assert!(!d.forward);
        assert_eq!(vec!["test.grpc.counter.local"], names(&d));
        assert_eq!(10.0, d.readouts[0].value); // 100 / 10s interval
    }

    #[test]
    fn mixed_histogram_splits() {
        let p = partial("test.grpc.histogram", Kind::Histogram, Scope::Mixed, 20.0);
        let d = route(Tier::Local, &p, 0, &plan());
        assert!(d.forward);
        assert_eq!(
            vec![
                "test.grpc.histogram.50percentile",
                "test.grpc.histogram.75percentile",
                "test.grpc.histogram.99percentile",
            ],
            names(&d)
        );
    }

    #[test]
    fn mixed_set_forwards_only() {
        let key = Key::new("s", Kind::Set);
        let mut sketch = Sketch::for_kind(Kind::Set);
        sketch.observe(&Sample::text(key.clone(), "v"));
        let p = Partial::new(key, Scope::Mixed, sketch);
        let d = route(Tier::Local, &p, 0, &plan());
        assert!(d.forward);
        assert!(d.readouts.is_empty());
    }

    #[test]
    fn global_tier_emits_imported_global_scope_fully() {
        let p = partial("test.grpc.histogram_global", Kind::Histogram, Scope::Global, 20.0);
        let d = route(Tier::Global, &p, 0, &plan());
        assert!(!d.forward);
        assert_eq!(
            vec![
                "test.grpc.histogram_global.50percentile",
                "test.grpc.histogram_global.75percentile",
                "test.grpc.histogram_global.99percentile",
                "test.grpc.histogram_global.min",
                "test.grpc.histogram_global.max",
                "test.grpc.histogram_global.count",
            ],
            names(&d)
        );
    }

    #[test]
    fn global_tier_emits_mixed_histograms_as_percentiles_only() {
        let p = partial("test.grpc.histogram", Kind::Histogram, Scope::Mixed, 20.0);
        let d = route(Tier::Global, &p, 0, &plan());
        assert!(!d.forward);
        assert_eq!(
            vec![
                "test.grpc.histogram.50percentile",
                "test.grpc.histogram.75percentile",
                "test.grpc.histogram.99percentile",
            ],
            names(&d)
        );
    }

    #[test]
    fn global_tier_scalar_families() {
        let c = partial("test.grpc.counter", Kind::Counter, Scope::Global, 2.0);
        let d = route(Tier::Global, &c, 0, &plan());
        assert_eq!(vec!["test.grpc.counter"], names(&d));
        assert_eq!(0.2, d.readouts[0].value);

        let g = partial("test.grpc.gauge", Kind::Gauge, Scope::Global, 1.0);
        let d = route(Tier::Global, &g, 0, &plan());
        assert_eq!(vec!["test.grpc.gauge"], names(&d));
        assert_eq!(1.0, d.readouts[0].value);

        let key = Key::new("test.grpc.set", Kind::Set);
        let mut sketch = Sketch::for_kind(Kind::Set);
        sketch.observe(&Sample::text(key.clone(), "test"));
        let s = Partial::new(key, Scope::Global, sketch);
        let d = route(Tier::Global, &s, 0, &plan());
        assert_eq!(vec!["test.grpc.set"], names(&d));
        assert_eq!(1.0, d.readouts[0].value);
    }

    #[test]
    fn tick_completion_counts_shards() {
        let mut pending = Vec::new();
        assert!(!complete(&mut pending, 1, 3));
        assert!(!complete(&mut pending, 1, 3));
        assert!(complete(&mut pending, 1, 3));
        assert!(pending.is_empty());
    }

    #[test]
    fn stale_ticks_are_skipped_when_newer_completes() {
        let mut pending = Vec::new();
        assert!(!complete(&mut pending, 1, 2));
        assert!(!complete(&mut pending, 2, 2));
        assert!(complete(&mut pending, 2, 2));
        // tick 1 was dropped with the skip warning
        assert!(pending.is_empty());
    }
}
