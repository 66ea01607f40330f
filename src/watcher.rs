//! Periodic reconciliation of ring membership against discovery.
//!
//! One refresh runs synchronously at startup so the process never routes
//! against an empty ring when a backend is configured. After that a
//! dedicated thread re-queries on a fixed interval and rebuilds the ring
//! only when the healthy set actually changed.
//!
//! Two failure shapes deliberately leave the ring alone: a backend error,
//! and a backend that answers with *zero* members. An empty answer during
//! a discovery flap would otherwise tear down every route at once and
//! turn a control-plane hiccup into data loss; the previous membership
//! keeps flowing until a non-empty answer replaces it.

use discovery::Discovery;
use mio;
use ring::Ring;
use std::sync::Arc;
use std::time::Duration;
use util;

/// Minimum refresh period. Configuration below this is a startup error,
/// caught in config validation; the watcher also clamps defensively.
pub const MIN_REFRESH_SECS: u64 = 1;

pub struct Watcher<D> {
    ring: Arc<Ring>,
    discovery: D,
    service: String,
    interval: Duration,
}

impl<D> Watcher<D>
where
    D: Discovery + 'static,
{
    pub fn new<S>(ring: Arc<Ring>, discovery: D, service: S, refresh_secs: u64) -> Watcher<D>
    where
        S: Into<String>,
    {
        let secs = if refresh_secs < MIN_REFRESH_SECS {
            MIN_REFRESH_SECS
        } else {
            refresh_secs
        };
        Watcher {
            ring: ring,
            discovery: discovery,
            service: service.into(),
            interval: Duration::from_secs(secs),
        }
    }

    /// Query the backend once and reconcile. Returns true when the ring
    /// was replaced.
    pub fn refresh(&mut self) -> bool {
        match self.discovery.healthy_members(&self.service) {
            Ok(mut members) => {
                if members.is_empty() {
                    warn!(
                        "discovery returned zero members for {}; keeping previous ring of {}",
                        self.service,
                        self.ring.members().len()
                    );
                    return false;
                }
                members.sort();
                members.dedup();
                if members == self.ring.members() {
                    return false;
                }
                info!(
                    "membership for {} changed: {} members",
                    self.service,
                    members.len()
                );
                self.ring.set_members(members);
                true
            }
            Err(e) => {
                warn!(
                    "discovery refresh for {} failed, keeping previous ring: {}",
                    self.service, e
                );
                false
            }
        }
    }

    /// Spawn the refresh loop. The poll timeout doubles as the refresh
    /// timer; the SYSTEM token ends the loop.
    pub fn run(mut self) -> util::ThreadHandle {
        util::spawn_poller(move |poller| {
            let mut events = mio::Events::with_capacity(8);
            loop {
                match poller.poll(&mut events, Some(self.interval)) {
                    Err(e) => panic!("watcher poll failed: {:?}", e),
                    Ok(num_events) => {
                        if num_events > 0 {
                            // only SYSTEM is registered
                            return;
                        }
                        self.refresh();
                    }
                }
            }
        })
    }
}
