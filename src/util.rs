//! Small shared pieces: hashing, channel plumbing, poll-loop threads,
//! mio token bookkeeping.

use constants;
use hopper;
use metric;
use mio;
use seahash::SeaHasher;
use std;
use std::hash::BuildHasherDefault;
use std::ops::Index;

/// The hashmap used throughout. Seahash is faster than sip for our key
/// shapes and we do not take untrusted keys.
pub type HashMap<K, V> = std::collections::HashMap<K, V, BuildHasherDefault<SeaHasher>>;

/// A fan-out of hopper senders. Every stage of the pipeline speaks
/// `metric::Event` over one of these.
pub type Channel = Vec<hopper::Sender<metric::Event>>;

/// Send a copy of `event` down every channel.
///
/// The first channel gets the original, the rest get clones. A zero-length
/// channel drops the event on the floor, deliberately.
#[inline]
pub fn send(chans: &mut Channel, event: metric::Event) {
    if chans.is_empty() {
        return;
    }
    let max = chans.len() - 1;
    if max == 0 {
        chans[0].send(event);
    } else {
        for chan in &mut chans[1..] {
            chan.send(event.clone());
        }
        chans[0].send(event);
    }
}

/// Send an event down exactly one channel, picked by hash.
///
/// This is the shard handoff: all events for one metric key must converge
/// on one worker, which follows from the hash being pure on the key.
#[inline]
pub fn send_to_shard(hash: u64, chans: &mut Channel, event: metric::Event) {
    if chans.is_empty() {
        return;
    }
    let idx = (hash % chans.len() as u64) as usize;
    chans[idx].send(event);
}

/// A poll-loop thread that can be interrupted through the SYSTEM token.
///
/// Every long-running poll loop in the pipeline — listeners, stream
/// handlers, the membership watcher, the flush clock — runs on one of
/// these. `shutdown` makes the SYSTEM token readable; the loop notices
/// and winds itself down, which for sources includes saying
/// `Event::Shutdown` to the workers so the cascade continues without
/// them.
pub struct ThreadHandle {
    handle: std::thread::JoinHandle<()>,
    shutdown_signal: mio::SetReadiness,
}

/// Teardown for one poll loop or a whole group of them.
pub trait Stoppable {
    /// Block until the loop exits on its own.
    fn join(self) -> ();

    /// Interrupt the loop via SYSTEM and block until it exits.
    fn shutdown(self) -> ();
}

impl Stoppable for ThreadHandle {
    fn join(self) {
        if let Err(e) = self.handle.join() {
            panic!("poll thread panicked: {:?}", e);
        }
    }

    fn shutdown(self) {
        if let Err(e) = self.shutdown_signal.set_readiness(mio::Ready::readable()) {
            warn!("could not signal poll thread shutdown: {}", e);
        }
        self.join();
    }
}

/// Groups tear down in two phases so slow loops wind down in parallel:
/// every member is signalled before any is joined.
impl Stoppable for Vec<ThreadHandle> {
    fn join(self) {
        for member in self {
            member.join();
        }
    }

    fn shutdown(self) {
        for member in &self {
            if let Err(e) = member.shutdown_signal.set_readiness(mio::Ready::readable()) {
                warn!("could not signal poll thread shutdown: {}", e);
            }
        }
        self.join();
    }
}

/// Spawn a poll loop. The closure's poll arrives with the SYSTEM
/// registration already installed; everything else the loop watches is
/// its own to register.
pub fn spawn_poller<F>(f: F) -> ThreadHandle
where
    F: Send + 'static + FnOnce(mio::Poll) -> (),
{
    let (registration, shutdown_signal) = mio::Registration::new2();
    let handle = std::thread::spawn(move || {
        let poller = mio::Poll::new().expect("could not create poll");
        poller
            .register(
                &registration,
                constants::SYSTEM,
                mio::Ready::readable(),
                mio::PollOpt::edge(),
            )
            .expect("could not register the shutdown token");
        f(poller);
        // the registration must stay alive while the loop runs or the
        // shutdown signal would have nowhere to land
        drop(registration);
    });
    ThreadHandle {
        handle: handle,
        shutdown_signal: shutdown_signal,
    }
}

/// A tiny slab keyed by mio token.
///
/// Poll loops that juggle several listeners register each under its slab
/// index and map readiness events back through `Index`. Indices stay below
/// `constants::SYSTEM`.
pub struct TokenSlab<T> {
    entries: Vec<T>,
}

impl<T> TokenSlab<T> {
    /// Create an empty slab.
    pub fn new() -> TokenSlab<T> {
        TokenSlab { entries: Vec::new() }
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry, returning the token it will report readiness under.
    pub fn insert(&mut self, entry: T) -> mio::Token {
        let tok = mio::Token(self.entries.len());
        self.entries.push(entry);
        tok
    }

    /// Iterate over `(index, entry)` pairs.
    pub fn iter(&self) -> std::iter::Enumerate<std::slice::Iter<T>> {
        self.entries.iter().enumerate()
    }
}

impl<T> Index<mio::Token> for TokenSlab<T> {
    type Output = T;

    fn index(&self, token: mio::Token) -> &T {
        &self.entries[usize::from(token)]
    }
}

impl<T> Default for TokenSlab<T> {
    fn default() -> TokenSlab<T> {
        TokenSlab::new()
    }
}
