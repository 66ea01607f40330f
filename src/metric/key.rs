use metric::TagMap;
use seahash;
use seahash::SeaHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The five metric families the pipeline understands.
///
/// Histogram and Timer are distinct on the wire and in key identity but
/// share one sketch implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Counter,
    Gauge,
    Histogram,
    Timer,
    Set,
}

impl Kind {
    /// Stable short name, used in key renderings and logs.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
            Kind::Histogram => "histogram",
            Kind::Timer => "timer",
            Kind::Set => "set",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity tuple of a metric: name, family and tag set.
///
/// Two keys are the same metric exactly when their canonical renderings
/// are byte-equal. Equality, ordering and hashing are all defined over the
/// same fields in the same order, and the tag map is sorted, so a key
/// hashes identically in every process that ever sees it. The shard
/// function depends on that.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    /// The dotted metric name.
    pub name: String,
    /// The metric family.
    pub kind: Kind,
    /// The tag set. Immutable once the key is constructed.
    pub tags: TagMap,
}

impl Key {
    /// Construct a key with an empty tag set.
    pub fn new<S>(name: S, kind: Kind) -> Key
    where
        S: Into<String>,
    {
        Key {
            name: name.into(),
            kind: kind,
            tags: TagMap::default(),
        }
    }

    /// Construct a key with tags.
    pub fn tagged<S>(name: S, kind: Kind, tags: TagMap) -> Key
    where
        S: Into<String>,
    {
        Key {
            name: name.into(),
            kind: kind,
            tags: tags,
        }
    }

    /// The canonical rendering: `name|kind|k=v,...`.
    pub fn canonical(&self) -> String {
        let mut buf = String::with_capacity(self.name.len() + 16);
        buf.push_str(&self.name);
        buf.push('|');
        buf.push_str(self.kind.as_str());
        buf.push('|');
        self.tags.render_into(&mut buf);
        buf
    }

    /// The shard hash, pure on the full identity tuple.
    pub fn shard_hash(&self) -> u64 {
        let mut hasher = SeaHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// The ring hash, pure on the metric *name* alone so that one logical
    /// metric's global view lives on one node even across tag fan-out.
    pub fn ring_hash(&self) -> u64 {
        seahash::hash(self.name.as_bytes())
    }
}
