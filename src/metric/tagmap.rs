use std::slice::Iter;

/// A map from tag name to tag value, stored as a sorted vector.
///
/// Tag sets are small, iterated far more often than they are mutated, and
/// their rendering must be deterministic because the metric key's identity
/// is defined over it. A sorted vec gives us all three properties with no
/// hashing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagMap {
    inner: Vec<(String, String)>,
}

impl TagMap {
    /// Iterate pairs in sorted key order.
    pub fn iter(&self) -> Iter<(String, String)> {
        self.inner.iter()
    }

    /// Look up the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.inner
            .binary_search_by(|probe| probe.0.as_str().cmp(key))
        {
            Ok(idx) => Some(self.inner[idx].1.as_str()),
            Err(_) => None,
        }
    }

    /// Remove `key`, returning its value when present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        match self.inner
            .binary_search_by(|probe| probe.0.as_str().cmp(key))
        {
            Ok(idx) => Some(self.inner.remove(idx).1),
            Err(_) => None,
        }
    }

    /// Insert `key`/`val`, returning the displaced value on overwrite.
    pub fn insert<K, V>(&mut self, key: K, val: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let val = val.into();
        match self.inner.binary_search_by(|probe| probe.0.cmp(&key)) {
            Ok(idx) => {
                self.inner.push((key, val));
                let old = self.inner.swap_remove(idx);
                Some(old.1)
            }
            Err(idx) => {
                self.inner.insert(idx, (key, val));
                None
            }
        }
    }

    /// Union in `other`, keeping self's value on key conflicts.
    pub fn merge(&mut self, other: &TagMap) {
        for &(ref key, ref val) in &other.inner {
            match self.inner.binary_search_by(|probe| probe.0.cmp(key)) {
                Ok(_) => {}
                Err(idx) => {
                    self.inner.insert(idx, (key.clone(), val.clone()));
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Append the canonical `k=v,...` rendering onto `buf`.
    ///
    /// Sorted storage makes this deterministic for equal maps, which key
    /// identity and the shard hash both rely on.
    pub fn render_into(&self, buf: &mut String) {
        for (i, &(ref k, ref v)) in self.inner.iter().enumerate() {
            if i != 0 {
                buf.push(',');
            }
            buf.push_str(k);
            buf.push('=');
            buf.push_str(v);
        }
    }
}

impl Default for TagMap {
    fn default() -> TagMap {
        TagMap { inner: Vec::new() }
    }
}

impl<'a> IntoIterator for &'a TagMap {
    type Item = &'a (String, String);
    type IntoIter = Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_sorts_and_overwrites() {
        let mut tm = TagMap::default();
        assert_eq!(None, tm.insert("service", "api"));
        assert_eq!(None, tm.insert("az", "us-west-2b"));
        assert_eq!(Some("api".to_string()), tm.insert("service", "edge"));

        let mut buf = String::new();
        tm.render_into(&mut buf);
        assert_eq!("az=us-west-2b,service=edge", buf);
    }

    #[test]
    fn merge_prefers_self() {
        let mut lhs = TagMap::default();
        lhs.insert("host", "a");
        let mut rhs = TagMap::default();
        rhs.insert("host", "b");
        rhs.insert("rack", "r1");

        lhs.merge(&rhs);
        assert_eq!(Some("a"), lhs.get("host"));
        assert_eq!(Some("r1"), lhs.get("rack"));
    }

    #[test]
    fn render_is_order_insensitive() {
        let mut a = TagMap::default();
        a.insert("one", "1");
        a.insert("two", "2");
        let mut b = TagMap::default();
        b.insert("two", "2");
        b.insert("one", "1");

        let mut ra = String::new();
        let mut rb = String::new();
        a.render_into(&mut ra);
        b.render_into(&mut rb);
        assert_eq!(ra, rb);
        assert_eq!(a, b);
    }
}
