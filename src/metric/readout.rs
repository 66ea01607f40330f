use metric::TagMap;

/// One emitted aggregate value: the post-flush, pre-sink record.
///
/// A single sketch may flush into many readouts — a histogram with three
/// requested percentiles plus `min`/`max`/`count` produces six.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Readout {
    /// Emission name. Derived from the metric name plus a suffix for
    /// percentile and aggregate expansions.
    pub name: String,
    /// Tags inherited from the metric key.
    pub tags: TagMap,
    /// Flush timestamp, unix seconds.
    pub timestamp: i64,
    /// The aggregate value.
    pub value: f64,
    /// Names of sinks that accept this readout. Empty means all sinks.
    pub sinks: Vec<String>,
}

impl Readout {
    /// Construct a readout accepted by every sink.
    pub fn new<S>(name: S, timestamp: i64, value: f64) -> Readout
    where
        S: Into<String>,
    {
        Readout {
            name: name.into(),
            tags: TagMap::default(),
            timestamp: timestamp,
            value: value,
            sinks: Vec::new(),
        }
    }

    /// Attach tags.
    pub fn tags(mut self, tags: TagMap) -> Readout {
        self.tags = tags;
        self
    }

    /// Restrict the readout to the named sinks.
    pub fn sink_filter(mut self, sinks: Vec<String>) -> Readout {
        self.sinks = sinks;
        self
    }

    /// Does the sink named `sink` accept this readout?
    pub fn accepts_sink(&self, sink: &str) -> bool {
        self.sinks.is_empty() || self.sinks.iter().any(|s| s == sink)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_filter_accepts_all() {
        let r = Readout::new("a.b", 10, 1.0);
        assert!(r.accepts_sink("console"));
        assert!(r.accepts_sink("anything"));
    }

    #[test]
    fn filter_narrows() {
        let r = Readout::new("a.b", 10, 1.0).sink_filter(vec!["console".to_string()]);
        assert!(r.accepts_sink("console"));
        assert!(!r.accepts_sink("null"));
    }
}
