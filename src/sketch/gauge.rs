use metric::{Key, Readout};

/// The gauge family: last writer wins.
///
/// "Last" is decided by the `(observation stamp, value bits)` pair rather
/// than arrival order, which makes merge commutative and associative even
/// when two hosts stamp the same nanosecond.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    value: f64,
    stamp: u64,
    written: bool,
}

impl Gauge {
    pub fn new() -> Gauge {
        Gauge {
            value: 0.0,
            stamp: 0,
            written: false,
        }
    }

    /// Record an observation stamped `observed_ns`.
    pub fn observe(&mut self, value: f64, observed_ns: u64) {
        if self.wins(observed_ns, value) {
            self.value = value;
            self.stamp = observed_ns;
            self.written = true;
        }
    }

    /// Keep whichever side wrote last.
    pub fn merge(&mut self, other: &Gauge) {
        if other.written && self.wins(other.stamp, other.value) {
            self.value = other.value;
            self.stamp = other.stamp;
            self.written = true;
        }
    }

    fn wins(&self, stamp: u64, value: f64) -> bool {
        !self.written
            || (stamp, value.to_bits()) >= (self.stamp, self.value.to_bits())
    }

    /// The last written value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Wire form accessors.
    pub fn wire_parts(&self) -> (f64, u64, bool) {
        (self.value, self.stamp, self.written)
    }

    /// Rebuild from wire parts.
    pub fn from_wire_parts(value: f64, stamp: u64, written: bool) -> Gauge {
        Gauge {
            value: value,
            stamp: stamp,
            written: written,
        }
    }

    /// Flush as a single readout named after the metric.
    pub fn flush(&self, key: &Key, now: i64) -> Readout {
        Readout::new(key.name.clone(), now, self.value).tags(key.tags.clone())
    }
}

impl Default for Gauge {
    fn default() -> Gauge {
        Gauge::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut g = Gauge::new();
        g.observe(1.0, 10);
        g.observe(5.0, 20);
        g.observe(3.0, 15);
        assert_eq!(5.0, g.value());
    }

    #[test]
    fn merge_is_commutative_under_stamp_ties() {
        let mut a = Gauge::new();
        a.observe(1.0, 100);
        let mut b = Gauge::new();
        b.observe(2.0, 100);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab.value(), ba.value());
    }

    #[test]
    fn merge_ignores_unwritten() {
        let mut a = Gauge::new();
        a.observe(-4.0, 7);
        let b = Gauge::new();
        let mut merged = a.clone();
        merged.merge(&b);
        assert_eq!(-4.0, merged.value());
    }
}
