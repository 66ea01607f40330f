//! The forward-stream ingest source.
//!
//! This is the receiving half of the inter-tier wire: the global tier
//! (and only it) runs one of these. Each inbound stream carries one
//! flush cycle's partial sketches from a local aggregator or the proxy;
//! every decoded partial is routed to its worker shard for `import`, and
//! the stream is acked with the count of accepted frames once the peer
//! half-closes.

use constants;
use metric;
use mio;
use prost::Message;
use protocols::forward::{write_frame, FlushAck, FramePump, WirePartial};
use source;
use source::tcp::{write_all_retry, StreamHandler, TCP};
use source::Source;
use util;

/// Configuration for the forward source.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardServerConfig {
    /// The address the listener binds, `ip:port`.
    pub address: String,
}

impl Default for ForwardServerConfig {
    fn default() -> ForwardServerConfig {
        ForwardServerConfig {
            address: "0.0.0.0:8200".to_string(),
        }
    }
}

/// The forward source.
pub struct ForwardServer {
    server: TCP<ForwardHandler>,
}

impl Source<ForwardServerConfig> for ForwardServer {
    fn new(chans: util::Channel, config: ForwardServerConfig) -> ForwardServer {
        let server = TCP::new(chans, &config.address, ForwardHandler)
            .expect("unable to bind forward listener");
        ForwardServer { server: server }
    }

    fn spawn(self) -> Vec<util::ThreadHandle> {
        vec![self.server.run()]
    }
}

#[derive(Clone)]
pub struct ForwardHandler;

impl StreamHandler for ForwardHandler {
    fn handle_stream(
        &mut self,
        mut chans: util::Channel,
        poller: &mio::Poll,
        mut stream: mio::net::TcpStream,
    ) {
        let mut pump = FramePump::new();
        let mut accepted: u64 = 0;
        let mut events = mio::Events::with_capacity(1024);
        loop {
            match poller.poll(&mut events, None) {
                Err(e) => panic!("failed during forward poll {:?}", e),
                Ok(_num_events) => for event in &events {
                    match event.token() {
                        constants::SYSTEM => return,
                        _stream_token => {
                            let open = match pump.fill(&mut stream) {
                                Ok(open) => open,
                                Err(e) => {
                                    trace!("forward stream read failed: {}", e);
                                    return;
                                }
                            };
                            if !drain_partials(&mut pump, &mut chans, &mut accepted) {
                                return;
                            }
                            if !open {
                                ack(&mut stream, accepted);
                                return;
                            }
                        }
                    }
                },
            }
        }
    }
}

/// Decode and route every complete frame in the pump. Returns false when
/// the stream is framing-corrupt and must be dropped.
fn drain_partials(
    pump: &mut FramePump,
    chans: &mut util::Channel,
    accepted: &mut u64,
) -> bool {
    loop {
        let body = match pump.next_frame() {
            Ok(Some(body)) => body,
            Ok(None) => return true,
            Err(e) => {
                source::report("meridian.forward.corrupt_stream", 1.0);
                trace!("forward stream framing error: {}", e);
                return false;
            }
        };
        match WirePartial::decode(&body[..]) {
            Ok(wire) => match wire.into_partial() {
                Ok(partial) => {
                    *accepted += 1;
                    let hash = partial.key.shard_hash();
                    util::send_to_shard(hash, chans, metric::Event::Partial(partial));
                }
                Err(e) => {
                    source::report("meridian.forward.bad_frame", 1.0);
                    trace!("undecodable partial: {}", e);
                }
            },
            Err(e) => {
                source::report("meridian.forward.bad_frame", 1.0);
                trace!("undecodable frame: {}", e);
            }
        }
    }
}

fn ack(stream: &mut mio::net::TcpStream, accepted: u64) {
    let mut buf = Vec::new();
    if write_frame(&mut buf, &FlushAck { accepted: accepted }).is_err() {
        return;
    }
    if let Err(e) = write_all_retry(stream, &buf) {
        trace!("failed to ack forward stream: {}", e);
    }
}
