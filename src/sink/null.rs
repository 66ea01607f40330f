use metric;
use sink::Sink;

/// Discards everything. Useful for soaking a pipeline without paying for
/// emission.
pub struct Null {
    name: String,
}

/// Configuration for the null sink: just its routing name.
#[derive(Debug, Clone, Deserialize)]
pub struct NullConfig {
    pub name: String,
}

impl Null {
    pub fn new(config: NullConfig) -> Null {
        Null { name: config.name }
    }
}

impl Sink for Null {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, _readout: metric::Readout) {
        // intentionally nothing
    }

    fn flush(&mut self) {
        // intentionally nothing
    }
}
