//! The stateless forwarding router.
//!
//! A proxy accepts forward streams from local aggregators and relays
//! every frame to the global aggregator that owns its metric name. The
//! ring snapshot is captured once when a stream opens and used for every
//! frame on that stream, so one interval's sketches for a given name all
//! land on the same upstream even while membership changes underneath.
//!
//! The proxy holds no metric state. A downstream connection that dies
//! mid-cycle takes its frames with it — the count is surfaced, nothing
//! is retried, and the next cycle starts clean.

use constants;
use mio;
use prost::Message;
use protocols::forward::{
    read_frame, write_frame, write_raw_frame, FlushAck, FramePump, WirePartial,
};
use ring::{Ring, Snapshot};
use source::tcp::{write_all_retry, StreamHandler, TCP};
use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use util;

/// Configuration for the proxy's listener and relay budget.
#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// The address to accept forward streams on.
    pub address: String,
    /// Per-stream relay budget in seconds.
    pub timeout_secs: u64,
}

/// The proxy server: a TCP accept loop whose per-stream handler relays
/// frames through the ring.
pub struct Proxy {
    server: TCP<ProxyHandler>,
}

impl Proxy {
    pub fn new(ring: Arc<Ring>, config: ProxyServerConfig) -> Proxy {
        let handler = ProxyHandler {
            ring: ring,
            timeout: Duration::from_secs(config.timeout_secs),
        };
        let server = TCP::new(util::Channel::new(), &config.address, handler)
            .expect("unable to bind proxy listener");
        Proxy { server: server }
    }

    pub fn run(self) -> util::ThreadHandle {
        self.server.run()
    }
}

#[derive(Clone)]
pub struct ProxyHandler {
    ring: Arc<Ring>,
    timeout: Duration,
}

impl StreamHandler for ProxyHandler {
    fn handle_stream(
        &mut self,
        _chans: util::Channel,
        poller: &mio::Poll,
        mut upstream: mio::net::TcpStream,
    ) {
        // pinned for the lifetime of this stream
        let snapshot = self.ring.snapshot();
        let mut downstreams: util::HashMap<String, TcpStream> = util::HashMap::default();
        let mut pump = FramePump::new();
        let mut relayed: u64 = 0;
        let mut dropped: u64 = 0;

        let mut events = mio::Events::with_capacity(1024);
        loop {
            match poller.poll(&mut events, None) {
                Err(e) => panic!("failed during proxy poll {:?}", e),
                Ok(_num_events) => for event in &events {
                    match event.token() {
                        constants::SYSTEM => return,
                        _stream_token => {
                            let open = match pump.fill(&mut upstream) {
                                Ok(open) => open,
                                Err(e) => {
                                    trace!("proxy stream read failed: {}", e);
                                    return;
                                }
                            };
                            if !self.relay_frames(
                                &mut pump,
                                &snapshot,
                                &mut downstreams,
                                &mut relayed,
                                &mut dropped,
                            ) {
                                return;
                            }
                            if !open {
                                finish(&mut downstreams, self.timeout);
                                if dropped > 0 {
                                    warn!(
                                        "proxy dropped {} of {} frames this stream",
                                        dropped,
                                        dropped + relayed
                                    );
                                }
                                ack_upstream(&mut upstream, relayed);
                                return;
                            }
                        }
                    }
                },
            }
        }
    }
}

impl ProxyHandler {
    /// Route every complete frame to its owner. Returns false when the
    /// upstream is framing-corrupt.
    fn relay_frames(
        &self,
        pump: &mut FramePump,
        snapshot: &Snapshot,
        downstreams: &mut util::HashMap<String, TcpStream>,
        relayed: &mut u64,
        dropped: &mut u64,
    ) -> bool {
        loop {
            let body = match pump.next_frame() {
                Ok(Some(body)) => body,
                Ok(None) => return true,
                Err(e) => {
                    trace!("proxy stream framing error: {}", e);
                    return false;
                }
            };
            let name = match WirePartial::decode(&body[..]) {
                Ok(wire) => wire.name,
                Err(e) => {
                    *dropped += 1;
                    trace!("proxy dropping undecodable frame: {}", e);
                    continue;
                }
            };
            let dest = match snapshot.lookup(&name) {
                Some(dest) => dest.to_string(),
                None => {
                    *dropped += 1;
                    trace!("proxy has no destination for {}", name);
                    continue;
                }
            };

            if !downstreams.contains_key(&dest) {
                match dial(&dest, self.timeout) {
                    Ok(stream) => {
                        downstreams.insert(dest.clone(), stream);
                    }
                    Err(e) => {
                        *dropped += 1;
                        trace!("proxy cannot dial {}: {}", dest, e);
                        continue;
                    }
                }
            }
            let gone = {
                let stream = downstreams.get_mut(&dest).unwrap();
                match write_raw_frame(stream, &body) {
                    Ok(()) => {
                        *relayed += 1;
                        false
                    }
                    Err(e) => {
                        *dropped += 1;
                        trace!("proxy write to {} failed: {}", dest, e);
                        true
                    }
                }
            };
            if gone {
                // no reconnect this cycle; later frames for this
                // destination drop too until the stream ends
                downstreams.remove(&dest);
            }
        }
    }
}

fn dial(dest: &str, timeout: Duration) -> io::Result<TcpStream> {
    let addr = dest.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "destination resolved to nothing",
        )
    })?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_read_timeout(Some(timeout))?;
    Ok(stream)
}

/// Close out every downstream stream: half-close, collect the ack,
/// drop.
fn finish(downstreams: &mut util::HashMap<String, TcpStream>, _timeout: Duration) {
    for (dest, mut stream) in downstreams.drain() {
        if let Err(e) = stream.shutdown(Shutdown::Write) {
            trace!("proxy half-close to {} failed: {}", dest, e);
            continue;
        }
        let ack: io::Result<Option<FlushAck>> = read_frame(&mut stream);
        match ack {
            Ok(Some(ack)) => {
                trace!("{} acked {} sketches", dest, ack.accepted);
            }
            Ok(None) => {
                trace!("{} closed without acking", dest);
            }
            Err(e) => {
                trace!("ack read from {} failed: {}", dest, e);
            }
        }
    }
}

fn ack_upstream(upstream: &mut mio::net::TcpStream, relayed: u64) {
    let mut buf = Vec::new();
    if write_frame(&mut buf, &FlushAck { accepted: relayed }).is_err() {
        return;
    }
    if let Err(e) = write_all_retry(upstream, &buf) {
        trace!("failed to ack proxy upstream: {}", e);
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
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread as std_thread;
    use std::time::Duration;
    use super::*;

    fn frame_for(name: &str) -> Vec<u8> {
        let key = Key::new(name, Kind::Counter);
        let mut sketch = Sketch::for_kind(Kind::Counter);
        sketch.observe(&Sample::number(key.clone(), 1.0));
        let wire = WirePartial::from_partial(&Partial::new(key, Scope::Global, sketch));
        let mut buf = Vec::new();
        write_frame(&mut buf, &wire).unwrap();
        buf
    }

    /// The relay pins a snapshot, routes every frame for one name to one
    /// downstream and acks what the downstream accepted.
    #[test]
    fn frames_relay_to_the_ring_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();

        let downstream = std_thread::spawn(move || {
            let (mut stream, _peer) = listener.accept().unwrap();
            let mut pump = FramePump::new();
            let mut names = Vec::new();
            loop {
                let open = pump.fill(&mut stream).unwrap();
                while let Some(body) = pump.next_frame().unwrap() {
                    names.push(WirePartial::decode(&body[..]).unwrap().name);
                }
                if !open {
                    break;
                }
            }
            write_frame(&mut stream, &FlushAck { accepted: names.len() as u64 })
                .unwrap();
            tx.send(names).unwrap();
        });

        let ring = Arc::new(Ring::with_members(vec![addr.to_string()]));
        let handler = ProxyHandler {
            ring: Arc::clone(&ring),
            timeout: Duration::from_secs(2),
        };
        let snapshot = ring.snapshot();
        let mut downstreams = util::HashMap::default();
        let mut pump = FramePump::new();
        let mut relayed = 0;
        let mut dropped = 0;

        // feed two complete frames through the pump as if they arrived
        // on an upstream stream
        let mut wire_bytes = frame_for("a.metric");
        wire_bytes.extend(frame_for("b.metric"));
        let mut cursor = ::std::io::Cursor::new(wire_bytes);
        pump.fill(&mut cursor).unwrap();
        assert!(handler.relay_frames(
            &mut pump,
            &snapshot,
            &mut downstreams,
            &mut relayed,
            &mut dropped,
        ));
        assert_eq!(2, relayed);
        assert_eq!(0, dropped);

        finish(&mut downstreams, Duration::from_secs(2));
        let names = rx.recv().unwrap();
        assert_eq!(
            vec!["a.metric".to_string(), "b.metric".to_string()],
            names
        );
        downstream.join().unwrap();
    }

    /// A dead downstream loses the cycle's frames for that destination
    /// and nothing else; the relay keeps going.
    #[test]
    fn dead_destination_drops_frames_without_stalling() {
        let dead_addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let ring = Arc::new(Ring::with_members(vec![dead_addr.to_string()]));
        let handler = ProxyHandler {
            ring: Arc::clone(&ring),
            timeout: Duration::from_millis(200),
        };
        let snapshot = ring.snapshot();
        let mut downstreams = util::HashMap::default();
        let mut pump = FramePump::new();
        let mut relayed = 0;
        let mut dropped = 0;

        let mut cursor = ::std::io::Cursor::new(frame_for("doomed"));
        pump.fill(&mut cursor).unwrap();
        assert!(handler.relay_frames(
            &mut pump,
            &snapshot,
            &mut downstreams,
            &mut relayed,
            &mut dropped,
        ));
        assert_eq!(0, relayed);
        assert_eq!(1, dropped);
        assert!(downstreams.is_empty());
    }
}
