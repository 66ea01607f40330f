//! The mergeable per-family aggregates.
//!
//! One interval's worth of observations for one metric key collapses into
//! a `Sketch`. Sketches of the same family merge losslessly with respect
//! to their documented error bounds, which is what lets partial sketches
//! built on many hosts converge on a global aggregator. The family set is
//! closed and small, so dispatch is a plain enum rather than trait
//! objects.
mod counter;
mod gauge;
mod histo;
mod set;

pub use self::counter::Counter;
pub use self::gauge::Gauge;
pub use self::histo::{Aggregate, Histo, ERROR};
pub use self::set::Set;

use metric::{Key, Kind, Readout, Sample, Scope, Value};

/// What a full flush should produce: the interval normalizes counter
/// rates, the percentile and aggregate lists expand histograms and
/// timers.
#[derive(Clone, Debug)]
pub struct FlushPlan {
    pub interval: u64,
    pub percentiles: Vec<f64>,
    pub aggregates: Vec<Aggregate>,
}

impl FlushPlan {
    pub fn new(interval: u64, percentiles: Vec<f64>, aggregates: Vec<Aggregate>) -> FlushPlan {
        FlushPlan {
            interval: interval,
            percentiles: percentiles,
            aggregates: aggregates,
        }
    }
}

/// A sum type over the five metric families. Histogram and Timer share
/// the quantile sketch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Sketch {
    Counter(Counter),
    Gauge(Gauge),
    Set(Set),
    Histo(Histo),
}

impl Sketch {
    /// A fresh, empty sketch of the family that aggregates `kind`.
    pub fn for_kind(kind: Kind) -> Sketch {
        match kind {
            Kind::Counter => Sketch::Counter(Counter::new()),
            Kind::Gauge => Sketch::Gauge(Gauge::new()),
            Kind::Set => Sketch::Set(Set::new()),
            Kind::Histogram | Kind::Timer => Sketch::Histo(Histo::new()),
        }
    }

    /// Family name, for logs and mismatch panics.
    pub fn family(&self) -> &'static str {
        match *self {
            Sketch::Counter(_) => "counter",
            Sketch::Gauge(_) => "gauge",
            Sketch::Set(_) => "set",
            Sketch::Histo(_) => "histo",
        }
    }

    /// Fold one sample in. Value/family mismatches are ignored: they are
    /// screened out at parse time and a sketch has nothing sensible to do
    /// with them.
    pub fn observe(&mut self, sample: &Sample) {
        match *self {
            Sketch::Counter(ref mut c) => {
                if let Some(v) = sample.number_value() {
                    c.observe(v, sample.rate);
                }
            }
            Sketch::Gauge(ref mut g) => {
                if let Some(v) = sample.number_value() {
                    g.observe(v, sample.observed_ns);
                }
            }
            Sketch::Set(ref mut s) => match sample.value {
                Value::Text(ref t) => s.observe(t),
                Value::Number(n) => s.observe(&n.to_string()),
            },
            Sketch::Histo(ref mut h) => {
                if let Some(v) = sample.number_value() {
                    h.observe(v, sample.rate);
                }
            }
        }
    }

    /// Merge a sketch of the same family into self.
    ///
    /// A family mismatch means two different metrics collided on one key,
    /// which can only happen through memory corruption or a broken peer;
    /// there is no way to continue that does not silently destroy data,
    /// so this panics.
    pub fn merge(&mut self, other: &Sketch) {
        match (self, other) {
            (&mut Sketch::Counter(ref mut lhs), &Sketch::Counter(ref rhs)) => lhs.merge(rhs),
            (&mut Sketch::Gauge(ref mut lhs), &Sketch::Gauge(ref rhs)) => lhs.merge(rhs),
            (&mut Sketch::Set(ref mut lhs), &Sketch::Set(ref rhs)) => lhs.merge(rhs),
            (&mut Sketch::Histo(ref mut lhs), &Sketch::Histo(ref rhs)) => lhs.merge(rhs),
            (lhs, rhs) => panic!(
                "sketch family mismatch: cannot merge {} into {}",
                rhs.family(),
                lhs.family()
            ),
        }
    }

    /// Everything this family emits on a full flush.
    pub fn flush(&self, key: &Key, now: i64, plan: &FlushPlan) -> Vec<Readout> {
        match *self {
            Sketch::Counter(ref c) => vec![c.flush(key, now, plan.interval)],
            Sketch::Gauge(ref g) => vec![g.flush(key, now)],
            Sketch::Set(ref s) => vec![s.flush(key, now)],
            Sketch::Histo(ref h) => {
                let mut out = h.flush_percentiles(key, now, &plan.percentiles);
                out.extend(h.flush_aggregates(key, now, &plan.aggregates));
                out
            }
        }
    }

    /// The quantile subset of a flush: percentile readouts for histograms
    /// and timers, the plain flush for scalar families. Mixed-scope
    /// policy emits this shape on whichever tier owns the percentiles.
    pub fn flush_quantiles(&self, key: &Key, now: i64, plan: &FlushPlan) -> Vec<Readout> {
        match *self {
            Sketch::Histo(ref h) => h.flush_percentiles(key, now, &plan.percentiles),
            _ => self.flush(key, now, plan),
        }
    }
}

/// A sketch in flight between tiers: the key it belongs to, the scope it
/// was observed under and the state itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub key: Key,
    pub scope: Scope,
    pub sketch: Sketch,
}

impl Partial {
    pub fn new(key: Key, scope: Scope, sketch: Sketch) -> Partial {
        Partial {
            key: key,
            scope: scope,
            sketch: sketch,
        }
    }
}
