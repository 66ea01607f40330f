//! The line-oriented ingest source, UDP and TCP on one address.

use constants;
use metric;
use mio;
use protocols::statsd::{parse_statsd, ParseError};
use source;
use source::tcp::{StreamHandler, TCP};
use source::Source;
use std::net::UdpSocket;
use std::str;
use std::sync::Arc;
use util;

/// Configuration for the statsd source.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsdConfig {
    /// The address the listener binds, `ip:port`.
    pub address: String,
    /// Parallel reader threads sharing the socket. The kernel picks
    /// which reader wakes for a given datagram.
    pub num_readers: usize,
    /// Receive buffer size per read.
    pub read_buffer_bytes: usize,
    /// Tags stamped onto every sample this listener creates.
    pub tags: metric::TagMap,
}

impl Default for StatsdConfig {
    fn default() -> StatsdConfig {
        StatsdConfig {
            address: "0.0.0.0:8125".to_string(),
            num_readers: 1,
            read_buffer_bytes: 8192,
            tags: metric::TagMap::default(),
        }
    }
}

/// The statsd source.
///
/// Binds one UDP socket and fans `num_readers` reader threads out over
/// clones of it; senders that outgrow datagrams get the same dialect
/// over a TCP listener on the same address, one line per sample. Each
/// reader parses packets and hands samples to their worker shard;
/// malformed packets and unknown types are counted and dropped without
/// slowing the loop.
pub struct Statsd {
    chans: util::Channel,
    config: StatsdConfig,
}

impl Source<StatsdConfig> for Statsd {
    fn new(chans: util::Channel, config: StatsdConfig) -> Statsd {
        Statsd {
            chans: chans,
            config: config,
        }
    }

    fn spawn(self) -> Vec<util::ThreadHandle> {
        let socket =
            UdpSocket::bind(&self.config.address as &str).expect("unable to bind statsd socket");
        info!("statsd source listening on {}", self.config.address);
        let tags = Arc::new(self.config.tags.clone());

        let mut handles = Vec::with_capacity(self.config.num_readers + 1);

        let line_handler = LineHandler {
            tags: Arc::clone(&tags),
        };
        let tcp = TCP::new(self.chans.clone(), &self.config.address, line_handler)
            .expect("unable to bind statsd tcp listener");
        handles.push(tcp.run());
        for reader in 0..self.config.num_readers {
            let socket = socket.try_clone().expect("unable to clone statsd socket");
            socket
                .set_nonblocking(true)
                .expect("unable to set statsd socket non-blocking");
            let mut chans = self.chans.clone();
            let tags = Arc::clone(&tags);
            let buf_len = self.config.read_buffer_bytes;
            handles.push(util::spawn_poller(move |poller| {
                let socket = mio::net::UdpSocket::from_socket(socket)
                    .expect("unable to adopt statsd socket");
                poller
                    .register(
                        &socket,
                        mio::Token(reader),
                        mio::Ready::readable(),
                        mio::PollOpt::edge(),
                    )
                    .expect("unable to register statsd socket");
                handle_udp(&mut chans, &tags, &poller, &socket, buf_len);
            }));
        }
        handles
    }
}

fn handle_udp(
    chans: &mut util::Channel,
    tags: &Arc<metric::TagMap>,
    poller: &mio::Poll,
    socket: &mio::net::UdpSocket,
    buf_len: usize,
) {
    let mut buf = vec![0u8; buf_len];
    let mut events = mio::Events::with_capacity(1024);
    loop {
        match poller.poll(&mut events, None) {
            Err(e) => panic!("failed during statsd poll {:?}", e),
            Ok(_num_events) => for event in &events {
                match event.token() {
                    constants::SYSTEM => {
                        util::send(chans, metric::Event::Shutdown);
                        return;
                    }
                    _ => drain_socket(chans, tags, socket, &mut buf),
                }
            },
        }
    }
}

/// Per-connection handler for the TCP flavor of the dialect. Frames are
/// newline-delimited; a partial line waits in the buffer for the next
/// readable event.
#[derive(Clone)]
pub struct LineHandler {
    tags: Arc<metric::TagMap>,
}

impl StreamHandler for LineHandler {
    fn handle_stream(
        &mut self,
        mut chans: util::Channel,
        poller: &mio::Poll,
        mut stream: mio::net::TcpStream,
    ) {
        use std::io::Read;

        let mut acc: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        let mut events = mio::Events::with_capacity(1024);
        loop {
            match poller.poll(&mut events, None) {
                Err(e) => panic!("failed during statsd tcp poll {:?}", e),
                Ok(_num_events) => for event in &events {
                    match event.token() {
                        constants::SYSTEM => return,
                        _stream_token => loop {
                            match stream.read(&mut chunk) {
                                Ok(0) => {
                                    // peer closed; a trailing unterminated
                                    // line still counts
                                    parse_complete_lines(&mut acc, true, &mut chans, &self.tags);
                                    return;
                                }
                                Ok(n) => {
                                    acc.extend_from_slice(&chunk[..n]);
                                    parse_complete_lines(&mut acc, false, &mut chans, &self.tags);
                                }
                                Err(ref e)
                                    if e.kind() == ::std::io::ErrorKind::WouldBlock =>
                                {
                                    break;
                                }
                                Err(ref e)
                                    if e.kind() == ::std::io::ErrorKind::Interrupted =>
                                {
                                    continue;
                                }
                                Err(_) => return,
                            }
                        },
                    }
                },
            }
        }
    }
}

fn parse_complete_lines(
    acc: &mut Vec<u8>,
    at_eof: bool,
    chans: &mut util::Channel,
    tags: &Arc<metric::TagMap>,
) {
    loop {
        let split_at = match acc.iter().position(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None if at_eof && !acc.is_empty() => acc.len(),
            None => return,
        };
        let line: Vec<u8> = acc.drain(..split_at).collect();
        let trimmed = match str::from_utf8(&line) {
            Ok(s) => s.trim_right_matches('\n'),
            Err(_) => {
                source::report("meridian.statsd.bad_packet", 1.0);
                continue;
            }
        };
        if trimmed.is_empty() {
            continue;
        }
        let mut samples = Vec::new();
        match parse_statsd(trimmed, &mut samples, tags) {
            Ok(()) => for sample in samples {
                let hash = sample.key.shard_hash();
                util::send_to_shard(hash, chans, metric::Event::Sample(sample));
            },
            Err(ParseError::Malformed) => {
                source::report("meridian.statsd.bad_packet", 1.0);
                trace!("malformed statsd line: {:?}", trimmed);
            }
            Err(ParseError::UnknownType) => {
                source::report("meridian.statsd.unknown_type", 1.0);
                trace!("unknown metric type in line: {:?}", trimmed);
            }
        }
    }
}

fn drain_socket(
    chans: &mut util::Channel,
    tags: &Arc<metric::TagMap>,
    socket: &mio::net::UdpSocket,
    buf: &mut [u8],
) {
    loop {
        match socket.recv_from(buf) {
            Ok((len, _addr)) => {
                match str::from_utf8(&buf[..len]) {
                    Ok(packet) => {
                        let mut samples = Vec::new();
                        match parse_statsd(packet, &mut samples, tags) {
                            Ok(()) => for sample in samples {
                                let hash = sample.key.shard_hash();
                                util::send_to_shard(
                                    hash,
                                    chans,
                                    metric::Event::Sample(sample),
                                );
                            },
                            Err(ParseError::Malformed) => {
                                source::report("meridian.statsd.bad_packet", 1.0);
                                trace!("malformed statsd packet: {:?}", packet);
                            }
                            Err(ParseError::UnknownType) => {
                                source::report("meridian.statsd.unknown_type", 1.0);
                                trace!("unknown metric type in packet: {:?}", packet);
                            }
                        }
                    }
                    Err(_) => {
                        source::report("meridian.statsd.bad_packet", 1.0);
                    }
                }
            }
            Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == ::std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("could not read statsd socket: {}", e);
                return;
            }
        }
    }
}
