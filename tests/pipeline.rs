//! The full two-tier path, in process: samples enter a local node's
//! sharded workers, the flush router splits the results by scope, the
//! forwardable sketches cross the wire encoding, and a global node's
//! worker imports and emits the cluster view. The inputs and expected
//! emissions mirror a three-node local → proxy → global deployment.

extern crate hopper;
extern crate meridian;
extern crate tempdir;

use meridian::metric::{Event, Key, Kind, Readout, Sample, Scope};
use meridian::protocols::forward::{read_frame, write_frame, WirePartial};
use meridian::server::{FlushRouter, Tier};
use meridian::sketch::{Aggregate, FlushPlan, Partial};
use meridian::util;
use meridian::worker::Worker;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use tempdir::TempDir;

const INTERVAL: u64 = 10;

fn plan() -> FlushPlan {
    FlushPlan::new(
        INTERVAL,
        vec![0.5, 0.75, 0.99],
        vec![Aggregate::Min, Aggregate::Max, Aggregate::Count],
    )
}

/// The canonical scenario inputs.
fn scenario_samples() -> Vec<Sample> {
    vec![
        Sample::number(Key::new("test.grpc.histogram", Kind::Histogram), 20.0)
            .digest(12345)
            .scope(Scope::Mixed),
        Sample::number(
            Key::new("test.grpc.histogram_global", Kind::Histogram),
            20.0,
        ).digest(12345)
            .scope(Scope::Global),
        Sample::number(Key::new("test.grpc.gauge", Kind::Gauge), 1.0).scope(Scope::Global),
        Sample::number(Key::new("test.grpc.counter", Kind::Counter), 2.0).scope(Scope::Global),
        Sample::text(Key::new("test.grpc.set", Kind::Set), "test").scope(Scope::Global),
        Sample::number(Key::new("test.grpc.counter.local", Kind::Counter), 100.0)
            .scope(Scope::Mixed),
    ]
}

/// Run one tier: shard the events across `num_workers` workers, tick,
/// shut down, route, and return (readouts per sink event stream,
/// forwarded partials).
fn run_tier(
    dir: &TempDir,
    prefix: &str,
    tier: Tier,
    num_workers: usize,
    events: Vec<Event>,
    with_forward: bool,
) -> (Vec<Readout>, Vec<Partial>) {
    let (router_send, router_recv) =
        hopper::channel(&format!("{}-router", prefix), dir.path()).unwrap();

    let mut worker_sends = Vec::new();
    let mut worker_threads = Vec::new();
    for shard in 0..num_workers {
        let (send, recv) =
            hopper::channel(&format!("{}-worker-{}", prefix, shard), dir.path()).unwrap();
        worker_threads.push(Worker::new(shard as u32, recv, router_send.clone(), 1).run());
        worker_sends.push(send);
    }

    for event in events {
        match event {
            Event::Sample(sample) => {
                let hash = sample.key.shard_hash();
                util::send_to_shard(hash, &mut worker_sends, Event::Sample(sample));
            }
            Event::Partial(partial) => {
                let hash = partial.key.shard_hash();
                util::send_to_shard(hash, &mut worker_sends, Event::Partial(partial));
            }
            other => panic!("tests feed samples and partials, not {:?}", other),
        }
    }
    util::send(&mut worker_sends, Event::TimerFlush(1));
    util::send(&mut worker_sends, Event::Shutdown);
    for handle in worker_threads {
        handle.join().unwrap();
    }

    let (sink_send, sink_recv) =
        hopper::channel(&format!("{}-sink", prefix), dir.path()).unwrap();
    let (forward_send, forward_recv) =
        hopper::channel(&format!("{}-forward", prefix), dir.path()).unwrap();
    let forward = if with_forward { Some(forward_send) } else { None };

    let router = FlushRouter::new(
        tier,
        plan(),
        num_workers as u32,
        router_recv,
        vec![("capture".to_string(), sink_send)],
        forward,
    );
    router.run().join().unwrap();

    let mut readouts = Vec::new();
    for event in sink_recv.into_iter() {
        if let Event::Readout(readout) = event {
            readouts.push(readout);
        }
    }
    let mut partials = Vec::new();
    for event in forward_recv.into_iter() {
        if let Event::Partial(partial) = event {
            partials.push(partial);
        }
    }
    (readouts, partials)
}

/// Ship partials the way the forwarder and proxy do: through the framed
/// wire encoding and back.
fn across_the_wire(partials: Vec<Partial>) -> Vec<Partial> {
    let mut buf = Vec::new();
    for partial in &partials {
        write_frame(&mut buf, &WirePartial::from_partial(partial)).unwrap();
    }
    let mut cursor = Cursor::new(buf);
    let mut out = Vec::new();
    while let Some(wire) = read_frame::<_, WirePartial>(&mut cursor).unwrap() {
        out.push(wire.into_partial().unwrap());
    }
    out
}

#[test]
fn two_tier_topology_emits_the_expected_names() {
    let dir = TempDir::new("pipeline").unwrap();

    // local tier, sharded
    let events = scenario_samples().into_iter().map(Event::Sample).collect();
    let (local_readouts, forwarded) = run_tier(&dir, "local", Tier::Local, 2, events, true);

    let local_names: HashSet<String> =
        local_readouts.iter().map(|r| r.name.clone()).collect();
    let expected_local: HashSet<String> = [
        "test.grpc.counter.local",
        "test.grpc.histogram.50percentile",
        "test.grpc.histogram.75percentile",
        "test.grpc.histogram.99percentile",
    ].iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(expected_local, local_names);

    // the mixed counter's own total emits locally, as a per-second rate
    let local_values: HashMap<String, f64> = local_readouts
        .iter()
        .map(|r| (r.name.clone(), r.value))
        .collect();
    assert_eq!(100.0 / INTERVAL as f64, local_values["test.grpc.counter.local"]);

    // exactly the forwardable sketches ship: the mixed histogram plus
    // every global-scope key; the mixed counter stays home
    let forwarded_names: HashSet<String> =
        forwarded.iter().map(|p| p.key.name.clone()).collect();
    let expected_forwarded: HashSet<String> = [
        "test.grpc.histogram",
        "test.grpc.histogram_global",
        "test.grpc.gauge",
        "test.grpc.counter",
        "test.grpc.set",
    ].iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(expected_forwarded, forwarded_names);

    // global tier ingests the decoded partials on a single shard
    let imported = across_the_wire(forwarded);
    let events = imported.into_iter().map(Event::Partial).collect();
    let (global_readouts, _none) = run_tier(&dir, "global", Tier::Global, 1, events, false);

    let global_names: HashSet<String> =
        global_readouts.iter().map(|r| r.name.clone()).collect();
    let expected_global: HashSet<String> = [
        "test.grpc.histogram.50percentile",
        "test.grpc.histogram.75percentile",
        "test.grpc.histogram.99percentile",
        "test.grpc.histogram_global.50percentile",
        "test.grpc.histogram_global.75percentile",
        "test.grpc.histogram_global.99percentile",
        "test.grpc.histogram_global.min",
        "test.grpc.histogram_global.max",
        "test.grpc.histogram_global.count",
        "test.grpc.gauge",
        "test.grpc.counter",
        "test.grpc.set",
    ].iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(expected_global, global_names);

    let global_values: HashMap<String, f64> = global_readouts
        .iter()
        .map(|r| (r.name.clone(), r.value))
        .collect();
    assert_eq!(1.0, global_values["test.grpc.gauge"]);
    assert_eq!(2.0 / INTERVAL as f64, global_values["test.grpc.counter"]);
    assert_eq!(1.0, global_values["test.grpc.set"]);
    assert_eq!(20.0, global_values["test.grpc.histogram_global.50percentile"]);
    assert_eq!(20.0, global_values["test.grpc.histogram_global.min"]);
    assert_eq!(20.0, global_values["test.grpc.histogram_global.max"]);
    assert_eq!(1.0, global_values["test.grpc.histogram_global.count"]);
}

#[test]
fn shard_count_does_not_change_emitted_names() {
    let mut baseline: Option<HashSet<String>> = None;
    for &num_workers in &[1usize, 2, 5] {
        let dir = TempDir::new("shard-invariance").unwrap();
        let events = scenario_samples().into_iter().map(Event::Sample).collect();
        let (readouts, forwarded) =
            run_tier(&dir, "local", Tier::Local, num_workers, events, true);

        let mut names: HashSet<String> =
            readouts.iter().map(|r| r.name.clone()).collect();
        for partial in &forwarded {
            names.insert(format!("forward:{}", partial.key.name));
        }
        match baseline {
            None => baseline = Some(names),
            Some(ref expected) => assert_eq!(expected, &names, "num_workers {}", num_workers),
        }
    }
}

#[test]
fn merged_partials_accumulate_across_hosts() {
    // two "hosts" observe the same global counter; the global tier must
    // see the sum of both
    let dir = TempDir::new("merge").unwrap();
    let key = Key::new("cluster.requests", Kind::Counter);

    let mut hosts = Vec::new();
    for &(host, value) in [(0u32, 3.0f64), (1, 7.0)].iter() {
        let events = vec![
            Event::Sample(Sample::number(key.clone(), value).scope(Scope::Global)),
        ];
        let (readouts, forwarded) = run_tier(
            &dir,
            &format!("host-{}", host),
            Tier::Local,
            2,
            events,
            true,
        );
        assert!(readouts.is_empty());
        hosts.extend(across_the_wire(forwarded));
    }

    let events = hosts.into_iter().map(Event::Partial).collect();
    let (global_readouts, _none) =
        run_tier(&dir, "global", Tier::Global, 1, events, false);
    assert_eq!(1, global_readouts.len());
    assert_eq!("cluster.requests", global_readouts[0].name);
    assert_eq!(10.0 / INTERVAL as f64, global_readouts[0].value);
}
