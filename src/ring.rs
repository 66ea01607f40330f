//! Consistent hashing over the upstream membership.
//!
//! The ring pins every metric *name* to one member so that partial
//! sketches for the same metric, produced anywhere in the cluster,
//! converge on a single global aggregator. Membership changes rebuild the
//! whole ring and publish it as an immutable snapshot behind an atomic
//! pointer; readers are never blocked and never see torn state. A stream
//! that must route consistently for its whole lifetime captures one
//! snapshot up front and keys against that.

use arc_swap::ArcSwap;
use seahash;
use std::sync::Arc;

/// Virtual tokens per member. More tokens smooth the key distribution at
/// the cost of rebuild time; 160 is the conventional balance point.
pub const VNODES: usize = 160;

/// One immutable view of the ring.
#[derive(Debug, Default)]
pub struct Snapshot {
    members: Vec<String>,
    // (token, index into members), sorted by token
    tokens: Vec<(u64, u16)>,
}

impl Snapshot {
    fn build(mut members: Vec<String>) -> Snapshot {
        members.sort();
        members.dedup();
        assert!(members.len() <= usize::from(u16::max_value()));

        let mut tokens = Vec::with_capacity(members.len() * VNODES);
        for (idx, member) in members.iter().enumerate() {
            let mut buf = String::with_capacity(member.len() + 4);
            for vnode in 0..VNODES {
                buf.clear();
                buf.push_str(member);
                buf.push('#');
                buf.push_str(&vnode.to_string());
                tokens.push((seahash::hash(buf.as_bytes()), idx as u16));
            }
        }
        tokens.sort();

        Snapshot {
            members: members,
            tokens: tokens,
        }
    }

    /// The member owning `name`: the smallest token at or above the
    /// name's hash, wrapping to the first token.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        if self.tokens.is_empty() {
            return None;
        }
        let h = seahash::hash(name.as_bytes());
        let idx = match self.tokens.binary_search_by_key(&h, |&(t, _)| t) {
            Ok(idx) => idx,
            Err(idx) => {
                if idx == self.tokens.len() {
                    0
                } else {
                    idx
                }
            }
        };
        let (_, member_idx) = self.tokens[idx];
        Some(self.members[usize::from(member_idx)].as_str())
    }

    /// Current members, sorted.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// The shared, hot-swappable ring.
pub struct Ring {
    snap: ArcSwap<Snapshot>,
}

impl Ring {
    /// An empty ring. `lookup` returns None until members arrive.
    pub fn new() -> Ring {
        Ring {
            snap: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// A ring seeded with a fixed membership.
    pub fn with_members(members: Vec<String>) -> Ring {
        let ring = Ring::new();
        ring.set_members(members);
        ring
    }

    /// Rebuild and atomically publish a new snapshot. Single writer; any
    /// number of concurrent readers keep whatever snapshot they hold.
    pub fn set_members(&self, members: Vec<String>) {
        self.snap.store(Arc::new(Snapshot::build(members)));
    }

    /// The current membership, sorted.
    pub fn members(&self) -> Vec<String> {
        self.snap.load().members().to_vec()
    }

    /// Route `name` against the current snapshot.
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.snap.load().lookup(name).map(String::from)
    }

    /// Pin the current snapshot, for callers that must route consistently
    /// across many lookups.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snap.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.snap.load().is_empty()
    }
}

impl Default for Ring {
    fn default() -> Ring {
        Ring::new()
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use super::*;

    #[test]
    fn empty_ring_routes_nowhere() {
        let ring = Ring::new();
        assert!(ring.is_empty());
        assert_eq!(None, ring.lookup("any.metric"));
    }

    #[test]
    fn single_member_owns_everything() {
        let ring = Ring::with_members(vec!["10.1.10.12:8000".to_string()]);
        assert_eq!(vec!["10.1.10.12:8000".to_string()], ring.members());
        for name in &["a", "b.c", "really.long.metric.name", "x"] {
            assert_eq!(Some("10.1.10.12:8000".to_string()), ring.lookup(name));
        }
    }

    #[test]
    fn lookup_is_pure_under_a_fixed_snapshot() {
        let ring = Ring::with_members(vec![
            "host-a:8000".to_string(),
            "host-b:8000".to_string(),
            "host-c:8000".to_string(),
        ]);
        let snap = ring.snapshot();
        for i in 0..200 {
            let name = format!("metric.{}", i);
            let first = snap.lookup(&name).map(String::from);
            for _ in 0..3 {
                assert_eq!(first.as_ref().map(|s| s.as_str()), snap.lookup(&name));
            }
        }
    }

    #[test]
    fn all_members_take_some_keys() {
        let members: Vec<String> =
            (0..4).map(|i| format!("host-{}:8000", i)).collect();
        let ring = Ring::with_members(members.clone());

        let mut seen = HashSet::new();
        for i in 0..1000 {
            if let Some(m) = ring.lookup(&format!("metric.path.{}", i)) {
                seen.insert(m);
            }
        }
        assert_eq!(members.len(), seen.len());
    }

    #[test]
    fn rebuild_replaces_but_pinned_snapshots_persist() {
        let ring = Ring::with_members(vec!["old:1".to_string()]);
        let pinned = ring.snapshot();

        ring.set_members(vec!["new:1".to_string(), "new:2".to_string()]);
        assert_eq!(
            vec!["new:1".to_string(), "new:2".to_string()],
            ring.members()
        );
        // the pinned snapshot still routes against the old view
        assert_eq!(Some("old:1"), pinned.lookup("anything"));
    }

    #[test]
    fn duplicate_members_collapse() {
        let ring = Ring::with_members(vec![
            "x:1".to_string(),
            "x:1".to_string(),
        ]);
        assert_eq!(1, ring.members().len());
    }
}
