//! Buckets are the primary internal storage type.
//!
//! Each worker shard owns exactly one `Buckets`: a map from metric key to
//! the sketch accumulating that key's current interval. Entries appear on
//! first observation and leave wholesale at the flush boundary via
//! `take`, which swaps the entire table for a fresh one in a single move
//! so ingest never pauses.

use metric::{Key, Sample, Scope};
use sketch::{Partial, Sketch};
use util;

/// One shard's table for the current interval.
#[derive(Clone, Debug, Default)]
pub struct Buckets {
    table: util::HashMap<Key, Entry>,
}

/// A table slot: the sketch plus the scope its samples were observed
/// under. Scope is a property of the samples, not the key, so the latest
/// observation wins.
#[derive(Clone, Debug)]
pub struct Entry {
    pub scope: Scope,
    pub sketch: Sketch,
}

impl Buckets {
    pub fn new() -> Buckets {
        Buckets {
            table: util::HashMap::default(),
        }
    }

    /// Fold a raw sample into its key's sketch, creating the sketch on
    /// first sight.
    pub fn add(&mut self, sample: Sample) {
        let kind = sample.key.kind;
        let scope = sample.scope;
        let entry = self.table
            .entry(sample.key.clone())
            .or_insert_with(|| Entry {
                scope: scope,
                sketch: Sketch::for_kind(kind),
            });
        entry.scope = scope;
        entry.sketch.observe(&sample);
    }

    /// Merge an already-aggregated partial into the table. This is the
    /// global tier's ingest path. Panics if the partial's family differs
    /// from the resident sketch's — that is the corruption class, not a
    /// recoverable input error.
    pub fn import(&mut self, partial: Partial) {
        match self.table.entry(partial.key) {
            ::std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.scope = partial.scope;
                entry.sketch.merge(&partial.sketch);
            }
            ::std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    scope: partial.scope,
                    sketch: partial.sketch,
                });
            }
        }
    }

    /// Swap the table out, returning the interval's contents. The shard
    /// keeps ingesting into the fresh table immediately; nothing walks a
    /// table that can still be mutated.
    pub fn take(&mut self) -> Vec<Partial> {
        let table = ::std::mem::replace(&mut self.table, util::HashMap::default());
        table
            .into_iter()
            .map(|(key, entry)| Partial::new(key, entry.scope, entry.sketch))
            .collect()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
