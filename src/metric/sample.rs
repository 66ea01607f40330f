use metric::Key;
use time;

/// Where a sample's aggregation happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Aggregated and emitted on the ingesting host only.
    Local,
    /// Split: some aggregates emitted locally, the sketch also shipped for
    /// cluster-wide quantiles.
    Mixed,
    /// Shipped upstream only; the ingesting host emits nothing.
    Global,
}

impl Default for Scope {
    fn default() -> Scope {
        Scope::Mixed
    }
}

/// A sample's payload. Sets observe strings, everything else numbers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Text(String),
}

/// One observation as it enters a worker shard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// The identity tuple this sample belongs to.
    pub key: Key,
    /// The observed value.
    pub value: Value,
    /// Client-side sample rate in `(0, 1]`. A rate of 0.1 means this
    /// sample stands for ten observations.
    pub rate: f64,
    /// Optional 64-bit seed carried for sketch hashing parity across
    /// hosts.
    pub digest: Option<u64>,
    /// Aggregation scope.
    pub scope: Scope,
    /// Nanosecond observation stamp; orders gauge writes.
    pub observed_ns: u64,
}

impl Sample {
    /// A numeric sample at rate 1.0 and default scope.
    pub fn number(key: Key, value: f64) -> Sample {
        Sample {
            key: key,
            value: Value::Number(value),
            rate: 1.0,
            digest: None,
            scope: Scope::default(),
            observed_ns: time::now_ns(),
        }
    }

    /// A string sample, for sets.
    pub fn text<S>(key: Key, value: S) -> Sample
    where
        S: Into<String>,
    {
        Sample {
            key: key,
            value: Value::Text(value.into()),
            rate: 1.0,
            digest: None,
            scope: Scope::default(),
            observed_ns: time::now_ns(),
        }
    }

    /// Set the sample rate.
    pub fn rate(mut self, rate: f64) -> Sample {
        self.rate = rate;
        self
    }

    /// Set the scope.
    pub fn scope(mut self, scope: Scope) -> Sample {
        self.scope = scope;
        self
    }

    /// Set the digest seed.
    pub fn digest(mut self, digest: u64) -> Sample {
        self.digest = Some(digest);
        self
    }

    /// The numeric value, if this sample carries one.
    pub fn number_value(&self) -> Option<f64> {
        match self.value {
            Value::Number(v) => Some(v),
            Value::Text(_) => None,
        }
    }
}
