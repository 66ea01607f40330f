extern crate chrono;
extern crate fern;
extern crate hopper;
#[macro_use]
extern crate log;
extern crate meridian;

use meridian::config::SinkKind;
use meridian::server::Tier;
use meridian::sink;
use meridian::source;
use meridian::source::Source;
use meridian::util::Stoppable;
use meridian::{config, discovery, ring, server, time, watcher, worker};
use std::sync::Arc;
use std::thread;

fn init_logger(verbose: u64) {
    let level = match verbose {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                record.target(),
                chrono::Utc::now().to_rfc3339(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply();
    // In some running environments the logger will not initialize. No
    // sense dying over it.
    if let Err(e) = result {
        eprintln!("logger did not initialize: {}", e);
    }
}

fn main() {
    let args = config::parse_args();
    init_logger(args.verbose);
    info!("meridian - {}", args.version);

    let data_dir = args.data_directory.clone();
    std::fs::create_dir_all(&data_dir).expect("could not create data-directory");

    // SINKS
    let mut sink_sends = Vec::new();
    let mut sink_threads = Vec::new();
    for sink_config in &args.sinks {
        let channel_name = format!("sink-{}", sink_config.name);
        let (send, recv) =
            hopper::channel(&channel_name, &data_dir).expect("could not create sink channel");
        match sink_config.kind {
            SinkKind::Console => {
                sink_threads.push(sink::spawn(
                    sink::Console::new(sink::ConsoleConfig {
                        name: sink_config.name.clone(),
                    }),
                    recv,
                ));
            }
            SinkKind::Null => {
                sink_threads.push(sink::spawn(
                    sink::Null::new(sink::NullConfig {
                        name: sink_config.name.clone(),
                    }),
                    recv,
                ));
            }
        }
        sink_sends.push((sink_config.name.clone(), send));
    }

    // FORWARDER + MEMBERSHIP
    let ring = Arc::new(ring::Ring::new());
    let mut forward_send = None;
    let mut watcher_handle = None;
    if args.forwards() {
        let (send, recv) =
            hopper::channel("sink-forward", &data_dir).expect("could not create forward channel");
        let forward = sink::Forward::new(
            Arc::clone(&ring),
            sink::ForwardConfig {
                interval: args.interval,
            },
        );
        sink_threads.push(sink::spawn(forward, recv));
        forward_send = Some(send);

        let disco = discovery::StaticDiscovery::new(args.seed_members());
        let service = args.membership_service_name
            .clone()
            .unwrap_or_else(|| "forward".to_string());
        let mut membership = watcher::Watcher::new(
            Arc::clone(&ring),
            disco,
            service,
            args.membership_refresh_interval,
        );
        // one synchronous refresh so the first flush has somewhere to go
        membership.refresh();
        watcher_handle = Some(membership.run());
    }

    // ROUTER
    let (router_send, router_recv) =
        hopper::channel("flush-router", &data_dir).expect("could not create router channel");

    // WORKERS
    //
    // every worker hears one Shutdown per source thread
    let mut upstreams = 1; // the internal source
    if args.statsd_address.is_some() {
        // udp readers plus the tcp accept loop
        upstreams += args.num_readers + 1;
    }
    if args.tier == Tier::Global && args.grpc_address.is_some() {
        upstreams += 1;
    }

    let mut worker_sends = Vec::new();
    let mut worker_threads = Vec::new();
    for shard in 0..args.num_workers {
        let channel_name = format!("worker-{}", shard);
        let (send, recv) =
            hopper::channel(&channel_name, &data_dir).expect("could not create worker channel");
        worker_threads.push(
            worker::Worker::new(shard as u32, recv, router_send.clone(), upstreams).run(),
        );
        worker_sends.push(send);
    }

    let router = server::FlushRouter::new(
        args.tier,
        args.flush_plan(),
        args.num_workers as u32,
        router_recv,
        sink_sends,
        forward_send,
    );
    let router_thread = router.run();

    // SOURCES
    let mut source_handles = Vec::new();
    if let Some(ref address) = args.statsd_address {
        let statsd_config = source::StatsdConfig {
            address: address.clone(),
            num_readers: args.num_readers,
            read_buffer_bytes: args.read_buffer_bytes,
            tags: args.tags.clone(),
        };
        source_handles
            .extend(source::Statsd::new(worker_sends.clone(), statsd_config).spawn());
    }
    if args.tier == Tier::Global {
        if let Some(ref address) = args.grpc_address {
            let forward_config = source::ForwardServerConfig {
                address: address.clone(),
            };
            source_handles.extend(
                source::ForwardServer::new(worker_sends.clone(), forward_config).spawn(),
            );
        }
    }
    source_handles.extend(
        source::Internal::new(
            worker_sends.clone(),
            source::InternalConfig {
                tags: args.tags.clone(),
            },
        ).spawn(),
    );

    // BACKGROUND
    let timer_handles = source::FlushTimer::new(
        worker_sends.clone(),
        source::FlushTimerConfig {
            interval: args.interval,
        },
    ).spawn();

    thread::spawn(time::update_time);

    // the daemon runs until killed; joining holds main alive and
    // propagates child panics
    for handle in source_handles {
        handle.join();
    }
    for handle in timer_handles {
        handle.join();
    }
    for handle in worker_threads {
        handle.join().expect("worker thread panicked");
    }
    router_thread.join().expect("router thread panicked");
    for handle in sink_threads {
        handle.join().expect("sink thread panicked");
    }
    if let Some(handle) = watcher_handle {
        handle.join();
    }
}
