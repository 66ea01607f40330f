//! Provides the CLI option parser
//!
//! Used to parse the argv/config file into structs the daemons consume.
//! Configuration that fails validation refuses startup: a process with a
//! half-understood topology silently loses data, a process that exits
//! with a message gets fixed.

use clap::{App, Arg};
use metric::TagMap;
use server::Tier;
use sketch::{Aggregate, FlushPlan};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use toml;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

/// A configuration rejection. The message is operator-facing.
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// The file was not valid TOML for the expected shape.
    Syntax(String),
    /// The file parsed but describes a topology we refuse to run.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConfigError::Syntax(ref msg) => write!(f, "config syntax error: {}", msg),
            ConfigError::Invalid(ref msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

/// Which sink implementation a `[[sinks]]` entry names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    Console,
    Null,
}

/// One configured sink.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkConfig {
    pub name: String,
    pub kind: SinkKind,
}

/// Runtime configuration for the aggregator daemon.
#[derive(Clone, Debug)]
pub struct Config {
    pub tier: Tier,
    pub interval: u64,
    pub num_workers: usize,
    pub num_readers: usize,
    pub percentiles: Vec<f64>,
    pub aggregates: Vec<Aggregate>,
    pub read_buffer_bytes: usize,
    pub statsd_address: Option<String>,
    pub grpc_address: Option<String>,
    pub grpc_forward_address: Option<String>,
    pub membership_service_name: Option<String>,
    pub membership_refresh_interval: u64,
    pub static_members: Vec<String>,
    pub data_directory: PathBuf,
    pub tags: TagMap,
    pub sinks: Vec<SinkConfig>,
    pub verbose: u64,
    pub version: String,
}

impl Config {
    /// The flush plan workers and routers share.
    pub fn flush_plan(&self) -> FlushPlan {
        FlushPlan::new(
            self.interval,
            self.percentiles.clone(),
            self.aggregates.clone(),
        )
    }

    /// Every address the forwarder ring may be seeded with.
    pub fn seed_members(&self) -> Vec<String> {
        let mut members = self.static_members.clone();
        if let Some(ref addr) = self.grpc_forward_address {
            members.push(addr.clone());
        }
        members.sort();
        members.dedup();
        members
    }

    /// Whether this node ships partial sketches anywhere.
    pub fn forwards(&self) -> bool {
        self.tier == Tier::Local && !self.seed_members().is_empty()
    }
}

/// Runtime configuration for the proxy daemon.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub grpc_address: String,
    pub forward_timeout: u64,
    pub membership_service_name: Option<String>,
    pub membership_refresh_interval: u64,
    pub static_members: Vec<String>,
    pub verbose: u64,
    pub version: String,
}

#[derive(Deserialize, Default)]
struct RawConfig {
    tier: Option<String>,
    interval: Option<u64>,
    #[serde(rename = "num-workers")]
    num_workers: Option<usize>,
    #[serde(rename = "num-readers")]
    num_readers: Option<usize>,
    percentiles: Option<Vec<f64>>,
    aggregates: Option<Vec<String>>,
    #[serde(rename = "read-buffer-bytes")]
    read_buffer_bytes: Option<usize>,
    #[serde(rename = "statsd-address")]
    statsd_address: Option<String>,
    #[serde(rename = "grpc-address")]
    grpc_address: Option<String>,
    #[serde(rename = "grpc-forward-address")]
    grpc_forward_address: Option<String>,
    #[serde(rename = "membership-service-name")]
    membership_service_name: Option<String>,
    #[serde(rename = "membership-refresh-interval")]
    membership_refresh_interval: Option<u64>,
    #[serde(rename = "static-members")]
    static_members: Option<Vec<String>>,
    #[serde(rename = "data-directory")]
    data_directory: Option<String>,
    #[serde(rename = "forward-timeout")]
    forward_timeout: Option<u64>,
    tags: Option<BTreeMap<String, String>>,
    sinks: Option<Vec<RawSink>>,
}

#[derive(Deserialize)]
struct RawSink {
    name: String,
    kind: String,
}

/// Parse and validate an aggregator config file.
pub fn parse_config(buffer: &str, verbose: u64) -> Result<Config, ConfigError> {
    let raw: RawConfig =
        toml::from_str(buffer).map_err(|e| ConfigError::Syntax(e.to_string()))?;

    let tier = match raw.tier.as_ref().map(|s| s.as_str()) {
        None | Some("local") => Tier::Local,
        Some("global") => Tier::Global,
        Some(other) => {
            return Err(ConfigError::Invalid(format!(
                "tier must be \"local\" or \"global\", not {:?}",
                other
            )))
        }
    };

    let interval = raw.interval.unwrap_or(10);
    if interval == 0 {
        return Err(ConfigError::Invalid("interval must be at least 1s".to_string()));
    }

    let num_workers = raw.num_workers.unwrap_or(4);
    if num_workers == 0 {
        return Err(ConfigError::Invalid("num-workers must be at least 1".to_string()));
    }
    let num_readers = raw.num_readers.unwrap_or(1);
    if num_readers == 0 {
        return Err(ConfigError::Invalid("num-readers must be at least 1".to_string()));
    }

    let percentiles = raw.percentiles.unwrap_or_else(|| vec![0.5, 0.75, 0.99]);
    for &p in &percentiles {
        if p < 0.0 || p > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "percentile {} is outside [0, 1]",
                p
            )));
        }
    }

    let aggregate_names = raw.aggregates
        .unwrap_or_else(|| vec!["min".to_string(), "max".to_string(), "count".to_string()]);
    let mut aggregates = Vec::with_capacity(aggregate_names.len());
    for name in &aggregate_names {
        aggregates.push(
            Aggregate::from_str(name).map_err(ConfigError::Invalid)?,
        );
    }

    let membership_refresh_interval = raw.membership_refresh_interval.unwrap_or(10);
    if membership_refresh_interval == 0 {
        return Err(ConfigError::Invalid(
            "membership-refresh-interval must be at least 1s".to_string(),
        ));
    }

    if tier == Tier::Global && raw.grpc_address.is_none() {
        return Err(ConfigError::Invalid(
            "a global node must set grpc-address to accept forwarded sketches".to_string(),
        ));
    }
    if raw.membership_service_name.is_some()
        && raw.static_members.as_ref().map_or(true, |m| m.is_empty())
        && raw.grpc_forward_address.is_none()
    {
        return Err(ConfigError::Invalid(
            "membership-service-name is set but no backend seed is available; \
             set static-members or grpc-forward-address"
                .to_string(),
        ));
    }

    let mut tags = TagMap::default();
    if let Some(raw_tags) = raw.tags {
        for (k, v) in raw_tags {
            tags.insert(k, v);
        }
    }

    let sinks = resolve_sinks(raw.sinks)?;

    Ok(Config {
        tier: tier,
        interval: interval,
        num_workers: num_workers,
        num_readers: num_readers,
        percentiles: percentiles,
        aggregates: aggregates,
        read_buffer_bytes: raw.read_buffer_bytes.unwrap_or(8192),
        statsd_address: raw.statsd_address,
        grpc_address: raw.grpc_address,
        grpc_forward_address: raw.grpc_forward_address,
        membership_service_name: raw.membership_service_name,
        membership_refresh_interval: membership_refresh_interval,
        static_members: raw.static_members.unwrap_or_else(Vec::new),
        data_directory: PathBuf::from(
            raw.data_directory
                .unwrap_or_else(|| "/tmp/meridian-data".to_string()),
        ),
        tags: tags,
        sinks: sinks,
        verbose: verbose,
        version: VERSION.unwrap_or("unknown").to_string(),
    })
}

fn resolve_sinks(raw: Option<Vec<RawSink>>) -> Result<Vec<SinkConfig>, ConfigError> {
    let raw = match raw {
        Some(raw) => raw,
        None => {
            return Ok(vec![
                SinkConfig {
                    name: "console".to_string(),
                    kind: SinkKind::Console,
                },
            ])
        }
    };
    let mut sinks: Vec<SinkConfig> = Vec::with_capacity(raw.len());
    for entry in raw {
        let kind = match entry.kind.as_str() {
            "console" => SinkKind::Console,
            "null" => SinkKind::Null,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown sink kind {:?} for sink {:?}",
                    other, entry.name
                )))
            }
        };
        if sinks.iter().any(|s| s.name == entry.name) {
            return Err(ConfigError::Invalid(format!(
                "duplicate sink name {:?}",
                entry.name
            )));
        }
        sinks.push(SinkConfig {
            name: entry.name,
            kind: kind,
        });
    }
    Ok(sinks)
}

/// Parse and validate a proxy config file.
pub fn parse_proxy_config(buffer: &str, verbose: u64) -> Result<ProxyConfig, ConfigError> {
    let raw: RawConfig =
        toml::from_str(buffer).map_err(|e| ConfigError::Syntax(e.to_string()))?;

    let grpc_address = raw.grpc_address.ok_or_else(|| {
        ConfigError::Invalid("a proxy must set grpc-address to accept streams".to_string())
    })?;

    let membership_refresh_interval = raw.membership_refresh_interval.unwrap_or(10);
    if membership_refresh_interval == 0 {
        return Err(ConfigError::Invalid(
            "membership-refresh-interval must be at least 1s".to_string(),
        ));
    }
    let static_members = raw.static_members.unwrap_or_else(Vec::new);
    if static_members.is_empty() {
        return Err(ConfigError::Invalid(
            "a proxy needs static-members to seed its ring".to_string(),
        ));
    }

    let interval = raw.interval.unwrap_or(10);
    let forward_timeout = raw.forward_timeout
        .unwrap_or(if interval > 1 { interval - 1 } else { 1 });

    Ok(ProxyConfig {
        grpc_address: grpc_address,
        forward_timeout: forward_timeout,
        membership_service_name: raw.membership_service_name,
        membership_refresh_interval: membership_refresh_interval,
        static_members: static_members,
        verbose: verbose,
        version: VERSION.unwrap_or("unknown").to_string(),
    })
}

fn read_config_file(matches: &::clap::ArgMatches) -> (String, u64) {
    let verbose = if matches.is_present("verbose") {
        matches.occurrences_of("verbose")
    } else {
        0
    };
    let buffer = match matches.value_of("config-file") {
        Some(filename) => {
            let mut fp = match File::open(filename) {
                Err(e) => {
                    eprintln!("could not open {}: {}", filename, e);
                    process::exit(1);
                }
                Ok(fp) => fp,
            };
            let mut buffer = String::new();
            if let Err(e) = fp.read_to_string(&mut buffer) {
                eprintln!("could not read {}: {}", filename, e);
                process::exit(1);
            }
            buffer
        }
        None => String::new(),
    };
    (buffer, verbose)
}

fn app(name: &'static str, about: &'static str) -> App<'static, 'static> {
    App::new(name)
        .version(VERSION.unwrap_or("unknown"))
        .about(about)
        .arg(
            Arg::with_name("config-file")
                .long("config")
                .short("C")
                .value_name("config")
                .help("The config file to feed in.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Turn on verbose output."),
        )
}

/// Parse argv for the aggregator daemon. Exits on invalid configuration.
pub fn parse_args() -> Config {
    let matches = app(
        "meridian",
        "two-tier telemetry aggregation, sketches all the way up",
    ).get_matches();
    let (buffer, verbose) = read_config_file(&matches);
    match parse_config(&buffer, verbose) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

/// Parse argv for the proxy daemon. Exits on invalid configuration.
pub fn parse_proxy_args() -> ProxyConfig {
    let matches = app("meridian-proxy", "ring router for forwarded sketches").get_matches();
    let (buffer, verbose) = read_config_file(&matches);
    match parse_proxy_config(&buffer, verbose) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}
