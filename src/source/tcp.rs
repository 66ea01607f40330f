//! Generic mio TCP accept loop.
//!
//! A `TCP<H>` binds every address a host string resolves to, accepts in
//! one poll thread and hands each connection to a clone of the handler
//! prototype on its own thread. The SYSTEM token tears the whole tree
//! down: the accept loop stops its handlers, sends `Shutdown` downstream
//! and returns.

use constants;
use metric;
use mio;
use std;
use std::io::ErrorKind;
use std::net::ToSocketAddrs;
use util;
use util::Stoppable;

/// Per-stream logic run on a dedicated thread.
///
/// Implementations get a poll with the stream registered at token 0 and
/// the SYSTEM registration installed; they are expected to return
/// promptly once SYSTEM fires.
pub trait StreamHandler: 'static + Clone + Send {
    fn handle_stream(
        &mut self,
        chans: util::Channel,
        poller: &mio::Poll,
        stream: mio::net::TcpStream,
    ) -> ();
}

/// State for a TCP backed source.
pub struct TCP<H> {
    listeners: util::TokenSlab<mio::net::TcpListener>,
    chans: util::Channel,
    prototype: H,
}

impl<H> TCP<H>
where
    H: StreamHandler,
{
    /// Bind all addresses `host` resolves to. Failure to bind any of
    /// them is a startup error.
    pub fn new(chans: util::Channel, host: &str, prototype: H) -> std::io::Result<TCP<H>> {
        let mut listeners = util::TokenSlab::new();
        for addr in host.to_socket_addrs()? {
            let listener = mio::net::TcpListener::bind(&addr)?;
            info!("registering tcp listener for {:?}", addr);
            listeners.insert(listener);
        }
        Ok(TCP {
            listeners: listeners,
            chans: chans,
            prototype: prototype,
        })
    }

    /// Start the accept loop.
    pub fn run(self) -> util::ThreadHandle {
        util::spawn_poller(move |poller| {
            let mut chans = self.chans.clone();
            for (idx, listener) in self.listeners.iter() {
                if let Err(e) = poller.register(
                    listener,
                    mio::Token::from(idx),
                    mio::Ready::readable(),
                    mio::PollOpt::edge(),
                ) {
                    error!("failed to register {:?} - {:?}", listener, e);
                }
            }

            let mut handlers: Vec<util::ThreadHandle> = Vec::new();
            let mut events = mio::Events::with_capacity(1024);
            loop {
                match poller.poll(&mut events, None) {
                    Err(e) => panic!("failed during poll {:?}", e),
                    Ok(_num_events) => for event in &events {
                        match event.token() {
                            constants::SYSTEM => {
                                let open_handlers =
                                    std::mem::replace(&mut handlers, Vec::new());
                                open_handlers.shutdown();
                                util::send(&mut chans, metric::Event::Shutdown);
                                return;
                            }
                            listener_token => {
                                if let Err(e) = accept_all(
                                    &self.listeners,
                                    listener_token,
                                    &self.chans,
                                    &self.prototype,
                                    &mut handlers,
                                ) {
                                    let listener = &self.listeners[listener_token];
                                    error!("failed to spawn stream handler: {:?}", e);
                                    error!(
                                        "deregistering listener {:?} after unrecoverable error",
                                        *listener
                                    );
                                    let _ = poller.deregister(listener);
                                }
                            }
                        }
                    },
                }
            }
        })
    }
}

/// Write against a non-blocking stream, retrying WouldBlock briefly.
/// Stream handlers use this for their terminal ack: a handful of bytes
/// the peer either takes in half a second or never will.
pub fn write_all_retry<W>(stream: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: std::io::Write,
{
    let mut offset = 0;
    let mut tries = 0;
    while offset < bytes.len() {
        match stream.write(&bytes[offset..]) {
            Ok(n) => {
                offset += n;
                tries = 0;
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                tries += 1;
                if tries > 100 {
                    return Err(std::io::Error::new(
                        ErrorKind::TimedOut,
                        "ack write stalled",
                    ));
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    stream.flush()
}

fn accept_all<H>(
    listeners: &util::TokenSlab<mio::net::TcpListener>,
    token: mio::Token,
    chans: &util::Channel,
    prototype: &H,
    handlers: &mut Vec<util::ThreadHandle>,
) -> Result<(), std::io::Error>
where
    H: StreamHandler,
{
    let listener = &listeners[token];
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let rchans = chans.clone();
                let mut handler = prototype.clone();
                let new_stream = util::spawn_poller(move |poller| {
                    // Handlers may crash without compromising the
                    // process's ability to shut down cleanly.
                    poller
                        .register(
                            &stream,
                            mio::Token(0),
                            mio::Ready::readable(),
                            mio::PollOpt::edge(),
                        )
                        .unwrap();
                    handler.handle_stream(rchans, &poller, stream);
                });
                handlers.push(new_stream);
            }
            Err(e) => match e.kind() {
                ErrorKind::ConnectionAborted | ErrorKind::Interrupted | ErrorKind::TimedOut => {
                    // closed before we could accept, or interrupted;
                    // press on
                    continue;
                }
                ErrorKind::WouldBlock => {
                    // out of connections to accept
                    return Ok(());
                }
                _ => return Err(e),
            },
        }
    }
}
