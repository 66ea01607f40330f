extern crate chrono;
extern crate fern;
#[macro_use]
extern crate log;
extern crate meridian;

use meridian::proxy::{Proxy, ProxyServerConfig};
use meridian::util::Stoppable;
use meridian::{config, discovery, ring, time, watcher};
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
    if let Err(e) = result {
        eprintln!("logger did not initialize: {}", e);
    }
}

fn main() {
    let args = config::parse_proxy_args();
    init_logger(args.verbose);
    info!("meridian-proxy - {}", args.version);

    let ring = Arc::new(ring::Ring::new());
    let disco = discovery::StaticDiscovery::new(args.static_members.clone());
    let service = args.membership_service_name
        .clone()
        .unwrap_or_else(|| "forward".to_string());
    let mut membership = watcher::Watcher::new(
        Arc::clone(&ring),
        disco,
        service,
        args.membership_refresh_interval,
    );
    // populate the ring before the first stream arrives
    membership.refresh();
    let watcher_handle = membership.run();

    let proxy = Proxy::new(
        Arc::clone(&ring),
        ProxyServerConfig {
            address: args.grpc_address.clone(),
            timeout_secs: args.forward_timeout,
        },
    );
    let proxy_handle = proxy.run();

    thread::spawn(time::update_time);

    proxy_handle.join();
    watcher_handle.join();
}
