//! Wire dialects: the line-oriented ingest syntax and the inter-tier
//! forward protocol.
pub mod forward;
pub mod statsd;
