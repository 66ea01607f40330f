//! The inter-tier forward protocol.
//!
//! A forward stream is a TCP connection carrying length-prefixed
//! `WirePartial` frames — a big-endian `u32` byte count, then that many
//! bytes of protobuf — and ends with the sender half-closing its write
//! side. The receiver answers with a single framed `FlushAck` and closes.
//! One stream carries at most one flush cycle, so a stalled peer can
//! never delay the next cycle.
//!
//! Sketch states ride as explicit per-family messages with sorted bucket
//! stores, which keeps the wire bytes for a given sketch state identical
//! on every host and stable across releases.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use metric::{Key, Kind, Scope, TagMap};
use prost::{Enumeration, Message};
use sketch::{Counter, Gauge, Histo, Partial, Set, Sketch};
use std::fmt;
use std::io;
use std::io::{Read, Write};

/// Upper bound on a single frame. A cycle's batch for one destination is
/// one frame per key, so frames stay small; anything near this limit is a
/// corrupt length prefix.
pub const MAX_FRAME_BYTES: u32 = 1 << 26;

#[derive(Clone, PartialEq, Message)]
pub struct TagPair {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct CounterState {
    #[prost(double, tag = "1")]
    pub sum: f64,
}

#[derive(Clone, PartialEq, Message)]
pub struct GaugeState {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(uint64, tag = "2")]
    pub stamp: u64,
    #[prost(bool, tag = "3")]
    pub written: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetState {
    #[prost(bytes, tag = "1")]
    pub registers: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct HistoState {
    #[prost(sint32, repeated, tag = "1")]
    pub pos_keys: Vec<i32>,
    #[prost(double, repeated, tag = "2")]
    pub pos_weights: Vec<f64>,
    #[prost(sint32, repeated, tag = "3")]
    pub neg_keys: Vec<i32>,
    #[prost(double, repeated, tag = "4")]
    pub neg_weights: Vec<f64>,
    #[prost(double, tag = "5")]
    pub zero: f64,
    #[prost(double, tag = "6")]
    pub count: f64,
    #[prost(double, tag = "7")]
    pub sum: f64,
    #[prost(double, tag = "8")]
    pub min: f64,
    #[prost(double, tag = "9")]
    pub max: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum WireKind {
    Counter = 0,
    Gauge = 1,
    Histogram = 2,
    Timer = 3,
    Set = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum WireScope {
    Local = 0,
    Mixed = 1,
    Global = 2,
}

/// One partial sketch on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct WirePartial {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub tags: Vec<TagPair>,
    #[prost(enumeration = "WireKind", tag = "3")]
    pub kind: i32,
    #[prost(enumeration = "WireScope", tag = "4")]
    pub scope: i32,
    #[prost(message, optional, tag = "5")]
    pub counter: Option<CounterState>,
    #[prost(message, optional, tag = "6")]
    pub gauge: Option<GaugeState>,
    #[prost(message, optional, tag = "7")]
    pub set: Option<SetState>,
    #[prost(message, optional, tag = "8")]
    pub histo: Option<HistoState>,
}

/// The terminal response on a forward stream.
#[derive(Clone, PartialEq, Message)]
pub struct FlushAck {
    #[prost(uint64, tag = "1")]
    pub accepted: u64,
}

/// A frame that decoded as protobuf but does not describe a partial we
/// can rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireError {
    UnknownKind(i32),
    UnknownScope(i32),
    MissingState,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            WireError::UnknownKind(k) => write!(f, "unknown kind code {}", k),
            WireError::UnknownScope(s) => write!(f, "unknown scope code {}", s),
            WireError::MissingState => f.write_str("frame carries no sketch state"),
        }
    }
}

impl WirePartial {
    /// Encode a partial for shipment.
    pub fn from_partial(partial: &Partial) -> WirePartial {
        let mut wire = WirePartial {
            name: partial.key.name.clone(),
            tags: partial
                .key
                .tags
                .iter()
                .map(|&(ref k, ref v)| TagPair {
                    name: k.clone(),
                    value: v.clone(),
                })
                .collect(),
            kind: kind_to_wire(partial.key.kind) as i32,
            scope: scope_to_wire(partial.scope) as i32,
            counter: None,
            gauge: None,
            set: None,
            histo: None,
        };
        match partial.sketch {
            Sketch::Counter(ref c) => {
                wire.counter = Some(CounterState { sum: c.sum() });
            }
            Sketch::Gauge(ref g) => {
                let (value, stamp, written) = g.wire_parts();
                wire.gauge = Some(GaugeState {
                    value: value,
                    stamp: stamp,
                    written: written,
                });
            }
            Sketch::Set(ref s) => {
                wire.set = Some(SetState {
                    registers: s.registers().to_vec(),
                });
            }
            Sketch::Histo(ref h) => {
                let (pos, neg, zero, count, sum, min, max) = h.wire_parts();
                wire.histo = Some(HistoState {
                    pos_keys: pos.iter().map(|&(k, _)| k).collect(),
                    pos_weights: pos.iter().map(|&(_, w)| w).collect(),
                    neg_keys: neg.iter().map(|&(k, _)| k).collect(),
                    neg_weights: neg.iter().map(|&(_, w)| w).collect(),
                    zero: zero,
                    count: count,
                    sum: sum,
                    min: min,
                    max: max,
                });
            }
        }
        wire
    }

    /// Rebuild the in-memory partial. The sketch state picked is the one
    /// matching the declared kind; surplus states are ignored.
    pub fn into_partial(self) -> Result<Partial, WireError> {
        let kind = match WireKind::from_i32(self.kind) {
            Some(WireKind::Counter) => Kind::Counter,
            Some(WireKind::Gauge) => Kind::Gauge,
            Some(WireKind::Histogram) => Kind::Histogram,
            Some(WireKind::Timer) => Kind::Timer,
            Some(WireKind::Set) => Kind::Set,
            None => return Err(WireError::UnknownKind(self.kind)),
        };
        let scope = match WireScope::from_i32(self.scope) {
            Some(WireScope::Local) => Scope::Local,
            Some(WireScope::Mixed) => Scope::Mixed,
            Some(WireScope::Global) => Scope::Global,
            None => return Err(WireError::UnknownScope(self.scope)),
        };

        let sketch = match kind {
            Kind::Counter => {
                let state = self.counter.ok_or(WireError::MissingState)?;
                Sketch::Counter(Counter::from_sum(state.sum))
            }
            Kind::Gauge => {
                let state = self.gauge.ok_or(WireError::MissingState)?;
                Sketch::Gauge(Gauge::from_wire_parts(
                    state.value,
                    state.stamp,
                    state.written,
                ))
            }
            Kind::Set => {
                let state = self.set.ok_or(WireError::MissingState)?;
                Sketch::Set(Set::from_registers(state.registers))
            }
            Kind::Histogram | Kind::Timer => {
                let state = self.histo.ok_or(WireError::MissingState)?;
                let pos = state
                    .pos_keys
                    .iter()
                    .cloned()
                    .zip(state.pos_weights.iter().cloned())
                    .collect();
                let neg = state
                    .neg_keys
                    .iter()
                    .cloned()
                    .zip(state.neg_weights.iter().cloned())
                    .collect();
                Sketch::Histo(Histo::from_wire_parts(
                    pos,
                    neg,
                    state.zero,
                    state.count,
                    state.sum,
                    state.min,
                    state.max,
                ))
            }
        };

        let mut tags = TagMap::default();
        for pair in self.tags {
            tags.insert(pair.name, pair.value);
        }
        Ok(Partial::new(Key::tagged(self.name, kind, tags), scope, sketch))
    }
}

fn kind_to_wire(kind: Kind) -> WireKind {
    match kind {
        Kind::Counter => WireKind::Counter,
        Kind::Gauge => WireKind::Gauge,
        Kind::Histogram => WireKind::Histogram,
        Kind::Timer => WireKind::Timer,
        Kind::Set => WireKind::Set,
    }
}

fn scope_to_wire(scope: Scope) -> WireScope {
    match scope {
        Scope::Local => WireScope::Local,
        Scope::Mixed => WireScope::Mixed,
        Scope::Global => WireScope::Global,
    }
}

/// Write one length-prefixed frame.
pub fn write_frame<W, M>(w: &mut W, msg: &M) -> io::Result<()>
where
    W: Write,
    M: Message,
{
    let len = msg.encoded_len();
    if len > MAX_FRAME_BYTES as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "frame exceeds maximum size",
        ));
    }
    let mut prefix = [0u8; 4];
    BigEndian::write_u32(&mut prefix, len as u32);
    w.write_all(&prefix)?;

    let mut buf = Vec::with_capacity(len);
    msg.encode(&mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    w.write_all(&buf)
}

/// Write an already-encoded frame body with its length prefix. The
/// proxy relays bodies it has validated without re-encoding them.
pub fn write_raw_frame<W>(w: &mut W, body: &[u8]) -> io::Result<()>
where
    W: Write,
{
    if body.len() > MAX_FRAME_BYTES as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "frame exceeds maximum size",
        ));
    }
    let mut prefix = [0u8; 4];
    BigEndian::write_u32(&mut prefix, body.len() as u32);
    w.write_all(&prefix)?;
    w.write_all(body)
}

/// Read one length-prefixed frame. `Ok(None)` is a clean end of stream;
/// a prefix with no body, an oversized prefix or undecodable bytes are
/// errors.
pub fn read_frame<R, M>(r: &mut R) -> io::Result<Option<M>>
where
    R: Read,
    M: Message + Default,
{
    let len = match r.read_u32::<BigEndian>() {
        Ok(len) => len,
        Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame length prefix exceeds maximum size",
        ));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    M::decode(&buf[..])
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Incremental frame extraction for non-blocking streams.
///
/// Poll loops cannot use `read_frame` directly because a readiness event
/// may deliver half a frame. The pump accumulates whatever bytes are
/// available and hands back complete frame bodies as they materialize.
#[derive(Default)]
pub struct FramePump {
    acc: Vec<u8>,
}

impl FramePump {
    pub fn new() -> FramePump {
        FramePump { acc: Vec::new() }
    }

    /// Pull everything currently readable from `r`. Returns false once
    /// the peer has closed its write side.
    pub fn fill<R>(&mut self, r: &mut R) -> io::Result<bool>
    where
        R: Read,
    {
        let mut chunk = [0u8; 8192];
        loop {
            match r.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.acc.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pop the next complete frame body, if one has fully arrived.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.acc.len() < 4 {
            return Ok(None);
        }
        let len = BigEndian::read_u32(&self.acc[..4]);
        if len > MAX_FRAME_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame length prefix exceeds maximum size",
            ));
        }
        let total = 4 + len as usize;
        if self.acc.len() < total {
            return Ok(None);
        }
        let body = self.acc[4..total].to_vec();
        self.acc.drain(..total);
        Ok(Some(body))
    }
}
