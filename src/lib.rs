//! meridian - two-tier telemetry aggregation.
//!
//! A meridian local node ingests raw samples, reduces them into
//! mergeable per-metric sketches across a pool of worker shards and, at
//! every flush boundary, splits the results: locally-scoped aggregates
//! go straight to this node's sinks while globally-scoped sketches are
//! shipped — directly or through a `meridian-proxy` — to the one global
//! node the consistent-hash ring assigns their metric name. The global
//! node runs the same worker machinery over imported sketches and emits
//! the cluster-wide view.

extern crate arc_swap;
extern crate byteorder;
extern crate chrono;
extern crate clap;
extern crate hopper;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate mio;
extern crate prost;
extern crate seahash;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate toml;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
extern crate tempdir;

pub mod buckets;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod metric;
pub mod protocols;
pub mod proxy;
pub mod ring;
pub mod server;
pub mod sink;
pub mod sketch;
pub mod source;
pub mod time;
pub mod util;
pub mod watcher;
pub mod worker;
