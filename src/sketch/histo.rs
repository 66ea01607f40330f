use metric::{Key, Readout};
use std::f64;
use std::fmt;
use std::str::FromStr;

/// Relative error bound of the quantile sketch. Every quantile estimate
/// `v'` of a true value `v` satisfies `|v' - v| <= ERROR * |v|`.
pub const ERROR: f64 = 0.01;

/// Smallest magnitude the logarithmic mapping distinguishes from zero.
const MIN_TRACKABLE: f64 = 1e-9;

/// The scalar aggregates a histogram or timer can flush alongside its
/// percentiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    Min,
    Max,
    Count,
    Sum,
    Avg,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregate {
    type Err = String;

    fn from_str(s: &str) -> Result<Aggregate, String> {
        match s {
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            "count" => Ok(Aggregate::Count),
            "sum" => Ok(Aggregate::Sum),
            "avg" => Ok(Aggregate::Avg),
            other => Err(format!("unknown aggregate: {}", other)),
        }
    }
}

/// The histogram/timer family: a logarithmically bucketed quantile sketch
/// with bounded relative error.
///
/// Values map to buckets by `ceil(ln(v) / ln(gamma))` with
/// `gamma = (1 + ERROR) / (1 - ERROR)`, negative values mirrored into
/// their own store and near-zeros collected in a dedicated bucket. Bucket
/// counts are plain weights, so the sketch state for a given input
/// multiset is independent of observation order: identical inputs produce
/// identical wire bytes on every host, and merging is a bucketwise sum —
/// associative, commutative, identity on empty, and lossless with respect
/// to the error bound.
///
/// Exact `min`/`max`/`count`/`sum` ride alongside the buckets; quantile
/// estimates are clamped into `[min, max]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histo {
    pos: Vec<(i32, f64)>,
    neg: Vec<(i32, f64)>,
    zero: f64,
    count: f64,
    sum: f64,
    min: f64,
    max: f64,
}

fn gamma() -> f64 {
    (1.0 + ERROR) / (1.0 - ERROR)
}

fn bucket_key(magnitude: f64) -> i32 {
    (magnitude.ln() / gamma().ln()).ceil() as i32
}

fn bucket_value(key: i32) -> f64 {
    let g = gamma();
    // midpoint of the bucket's value range (gamma^(k-1), gamma^k]
    2.0 * g.powi(key) / (g + 1.0)
}

fn bump(store: &mut Vec<(i32, f64)>, key: i32, weight: f64) {
    match store.binary_search_by_key(&key, |&(k, _)| k) {
        Ok(idx) => store[idx].1 += weight,
        Err(idx) => store.insert(idx, (key, weight)),
    }
}

impl Histo {
    pub fn new() -> Histo {
        Histo {
            pos: Vec::new(),
            neg: Vec::new(),
            zero: 0.0,
            count: 0.0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Record one observation at client-side rate `rate`.
    pub fn observe(&mut self, value: f64, rate: f64) {
        let weight = 1.0 / rate;
        self.count += weight;
        self.sum += value * weight;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }

        if value > MIN_TRACKABLE {
            bump(&mut self.pos, bucket_key(value), weight);
        } else if value < -MIN_TRACKABLE {
            bump(&mut self.neg, bucket_key(-value), weight);
        } else {
            self.zero += weight;
        }
    }

    /// Fold in another sketch's buckets.
    pub fn merge(&mut self, other: &Histo) {
        for &(key, weight) in &other.pos {
            bump(&mut self.pos, key, weight);
        }
        for &(key, weight) in &other.neg {
            bump(&mut self.neg, key, weight);
        }
        self.zero += other.zero;
        self.count += other.count;
        self.sum += other.sum;
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }

    /// Estimate the quantile `q` in `[0, 1]`. None on an empty sketch.
    pub fn query(&self, q: f64) -> Option<f64> {
        if self.count <= 0.0 {
            return None;
        }
        let target = q.max(0.0).min(1.0) * self.count;

        let mut cum = 0.0;
        // ascending value order: most-negative first, then zero, then
        // positives
        for &(key, weight) in self.neg.iter().rev() {
            cum += weight;
            if cum >= target {
                return Some(self.clamp(-bucket_value(key)));
            }
        }
        cum += self.zero;
        if cum >= target && self.zero > 0.0 {
            return Some(self.clamp(0.0));
        }
        for &(key, weight) in self.pos.iter() {
            cum += weight;
            if cum >= target {
                return Some(self.clamp(bucket_value(key)));
            }
        }
        Some(self.max)
    }

    fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }

    /// Total observation weight.
    pub fn count(&self) -> f64 {
        self.count
    }

    /// Sum of observed values, weighted.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Smallest observed value.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Largest observed value.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Weighted mean.
    pub fn mean(&self) -> f64 {
        if self.count > 0.0 {
            self.sum / self.count
        } else {
            0.0
        }
    }

    /// One readout per requested percentile, named
    /// `<metric>.<P>percentile` with `P = q * 100`.
    pub fn flush_percentiles(
        &self,
        key: &Key,
        now: i64,
        percentiles: &[f64],
    ) -> Vec<Readout> {
        let mut out = Vec::with_capacity(percentiles.len());
        for &q in percentiles {
            if let Some(v) = self.query(q) {
                // round away float noise so 0.999 renders as 99.9, not
                // 99.90000000000001
                let p = (q * 10_000.0).round() / 100.0;
                let name = format!("{}.{}percentile", key.name, p);
                out.push(Readout::new(name, now, v).tags(key.tags.clone()));
            }
        }
        out
    }

    /// One readout per requested aggregate, named `<metric>.<agg>`.
    pub fn flush_aggregates(
        &self,
        key: &Key,
        now: i64,
        aggregates: &[Aggregate],
    ) -> Vec<Readout> {
        if self.count <= 0.0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let value = match *agg {
                Aggregate::Min => self.min,
                Aggregate::Max => self.max,
                Aggregate::Count => self.count,
                Aggregate::Sum => self.sum,
                Aggregate::Avg => self.mean(),
            };
            let name = format!("{}.{}", key.name, agg.as_str());
            out.push(Readout::new(name, now, value).tags(key.tags.clone()));
        }
        out
    }

    /// Wire form accessors, bucket stores in sorted key order.
    pub fn wire_parts(&self) -> (&[(i32, f64)], &[(i32, f64)], f64, f64, f64, f64, f64) {
        (
            &self.pos,
            &self.neg,
            self.zero,
            self.count,
            self.sum,
            self.min,
            self.max,
        )
    }

    /// Rebuild from wire parts. Stores are re-sorted rather than trusted.
    pub fn from_wire_parts(
        mut pos: Vec<(i32, f64)>,
        mut neg: Vec<(i32, f64)>,
        zero: f64,
        count: f64,
        sum: f64,
        min: f64,
        max: f64,
    ) -> Histo {
        pos.sort_by_key(|&(k, _)| k);
        neg.sort_by_key(|&(k, _)| k);
        Histo {
            pos: pos,
            neg: neg,
            zero: zero,
            count: count,
            sum: sum,
            min: min,
            max: max,
        }
    }
}

impl Default for Histo {
    fn default() -> Histo {
        Histo::new()
    }
}
