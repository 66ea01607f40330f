//! `metric` is the collection of abstract datatypes the pipeline operates
//! over. The main show here is `metric::Event`, the envelope every stage
//! sends and receives. Everything branches down from that.
mod event;
mod key;
mod readout;
mod sample;
mod tagmap;

pub use self::event::Event;
pub use self::key::{Key, Kind};
pub use self::readout::Readout;
pub use self::sample::{Sample, Scope, Value};
pub use self::tagmap::TagMap;
