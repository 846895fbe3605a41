//! Ordered in-memory store backed by a `BTreeMap`.
//!
//! The iterator is a stateless cursor: every step re-queries the map from
//! the last yielded position, so concurrent writes never invalidate a live
//! cursor and seek/resume are plain position updates.

use crate::error::StoreError;
use crate::{Store, StoreIterator};
use bytes::Bytes;
use kvbridge_protocol::{BatchOp, IteratorOptions, RangeOptions};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// An ordered, in-memory key/value store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: Bytes, value: Bytes) -> Result<(), StoreError> {
        self.map.write().insert(key, value);
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<(), StoreError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut map = self.map.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Del { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn clear(&self, options: &RangeOptions) -> Result<(), StoreError> {
        let mut cursor = MemoryIterator::new(self.map.clone(), options.clone());
        let mut doomed = Vec::new();
        while let Some((key, _)) = cursor.next()? {
            doomed.push(key);
        }
        let mut map = self.map.write();
        for key in doomed {
            map.remove(&key);
        }
        Ok(())
    }

    fn iterator(&self, options: IteratorOptions) -> Result<Box<dyn StoreIterator>, StoreError> {
        Ok(Box::new(MemoryIterator::new(
            self.map.clone(),
            options.range,
        )))
    }
}

/// Cursor position relative to iteration order.
#[derive(Debug, Clone)]
enum Position {
    /// Before the first entry of the range.
    Start,
    /// Strictly past this key.
    After(Bytes),
    /// At or past this key (inclusive seek target).
    At(Bytes),
}

struct MemoryIterator {
    map: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
    range: RangeOptions,
    pos: Position,
    remaining: Option<u32>,
}

impl MemoryIterator {
    fn new(map: Arc<RwLock<BTreeMap<Bytes, Bytes>>>, range: RangeOptions) -> Self {
        let remaining = u32::try_from(range.limit).ok();
        Self {
            map,
            range,
            pos: Position::Start,
            remaining,
        }
    }
}

impl StoreIterator for MemoryIterator {
    fn next(&mut self) -> Result<Option<(Bytes, Bytes)>, StoreError> {
        if self.remaining == Some(0) {
            return Ok(None);
        }

        let map = self.map.read();
        let (lower, upper) = if self.range.reverse {
            (
                base_lower(&self.range),
                stricter_upper(base_upper(&self.range), pos_bound(&self.pos)),
            )
        } else {
            (
                stricter_lower(base_lower(&self.range), pos_bound(&self.pos)),
                base_upper(&self.range),
            )
        };
        // A seek past the range bounds inverts them; BTreeMap::range panics
        // on an inverted range.
        if bounds_empty(&lower, &upper) {
            return Ok(None);
        }
        let entry = if self.range.reverse {
            map.range::<[u8], _>((lower, upper)).next_back()
        } else {
            map.range::<[u8], _>((lower, upper)).next()
        };

        match entry {
            Some((key, value)) => {
                let pair = (key.clone(), value.clone());
                drop(map);
                self.pos = Position::After(pair.0.clone());
                if let Some(remaining) = &mut self.remaining {
                    *remaining -= 1;
                }
                Ok(Some(pair))
            }
            None => Ok(None),
        }
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = Position::At(Bytes::copy_from_slice(target));
    }

    fn resume_after(&mut self, key: &[u8]) {
        self.pos = Position::After(Bytes::copy_from_slice(key));
    }
}

fn bounds_empty(lower: &Bound<&[u8]>, upper: &Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (Bound::Included(lower), Bound::Included(upper)) => lower > upper,
        (Bound::Included(lower), Bound::Excluded(upper))
        | (Bound::Excluded(lower), Bound::Included(upper))
        | (Bound::Excluded(lower), Bound::Excluded(upper)) => lower >= upper,
    }
}

fn pos_bound(pos: &Position) -> Bound<&[u8]> {
    match pos {
        Position::Start => Bound::Unbounded,
        Position::After(key) => Bound::Excluded(key.as_ref()),
        Position::At(key) => Bound::Included(key.as_ref()),
    }
}

fn base_lower(range: &RangeOptions) -> Bound<&[u8]> {
    match (&range.gt, &range.gte) {
        (Some(gt), Some(gte)) if gt.as_ref() >= gte.as_ref() => Bound::Excluded(gt.as_ref()),
        (Some(gt), None) => Bound::Excluded(gt.as_ref()),
        (_, Some(gte)) => Bound::Included(gte.as_ref()),
        (None, None) => Bound::Unbounded,
    }
}

fn base_upper(range: &RangeOptions) -> Bound<&[u8]> {
    match (&range.lt, &range.lte) {
        (Some(lt), Some(lte)) if lt.as_ref() <= lte.as_ref() => Bound::Excluded(lt.as_ref()),
        (Some(lt), None) => Bound::Excluded(lt.as_ref()),
        (_, Some(lte)) => Bound::Included(lte.as_ref()),
        (None, None) => Bound::Unbounded,
    }
}

fn stricter_lower<'a>(a: Bound<&'a [u8]>, b: Bound<&'a [u8]>) -> Bound<&'a [u8]> {
    use Bound::*;
    match (a, b) {
        (Unbounded, other) | (other, Unbounded) => other,
        (Included(x), Included(y)) => Included(x.max(y)),
        (Excluded(x), Excluded(y)) => Excluded(x.max(y)),
        (Included(inc), Excluded(exc)) | (Excluded(exc), Included(inc)) => {
            if exc >= inc {
                Excluded(exc)
            } else {
                Included(inc)
            }
        }
    }
}

fn stricter_upper<'a>(a: Bound<&'a [u8]>, b: Bound<&'a [u8]>) -> Bound<&'a [u8]> {
    use Bound::*;
    match (a, b) {
        (Unbounded, other) | (other, Unbounded) => other,
        (Included(x), Included(y)) => Included(x.min(y)),
        (Excluded(x), Excluded(y)) => Excluded(x.min(y)),
        (Included(inc), Excluded(exc)) | (Excluded(exc), Included(inc)) => {
            if exc <= inc {
                Excluded(exc)
            } else {
                Included(inc)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (key, value) in [("b", "1"), ("c", "2"), ("d", "3"), ("f", "4"), ("g", "5")] {
            store
                .put(Bytes::from_static(key.as_bytes()), Bytes::from(value))
                .unwrap();
        }
        store
    }

    fn drain(mut it: Box<dyn StoreIterator>) -> Vec<(Bytes, Bytes)> {
        let mut out = Vec::new();
        while let Some(entry) = it.next().unwrap() {
            out.push(entry);
        }
        out
    }

    fn keys(entries: &[(Bytes, Bytes)]) -> Vec<&[u8]> {
        entries.iter().map(|(key, _)| key.as_ref()).collect()
    }

    #[test]
    fn test_put_get_del() {
        let store = MemoryStore::new();
        store.put(Bytes::from_static(b"a"), Bytes::from_static(b"1")).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));
        store.del(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        // Deleting again is a no-op.
        store.del(b"a").unwrap();
    }

    #[test]
    fn test_empty_value_is_not_absent() {
        let store = MemoryStore::new();
        store.put(Bytes::from_static(b"k"), Bytes::new()).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(Bytes::new()));
    }

    #[test]
    fn test_batch_applies_in_order() {
        let store = MemoryStore::new();
        store
            .batch(vec![
                BatchOp::put("x", "X"),
                BatchOp::put("y", "Y"),
                BatchOp::del("x"),
            ])
            .unwrap();
        assert_eq!(store.get(b"x").unwrap(), None);
        assert_eq!(store.get(b"y").unwrap(), Some(Bytes::from_static(b"Y")));
    }

    #[test]
    fn test_get_many_preserves_order_and_absence() {
        let store = seeded();
        let result = store
            .get_many(&[
                Bytes::from_static(b"c"),
                Bytes::from_static(b"zz"),
                Bytes::from_static(b"b"),
            ])
            .unwrap();
        assert_eq!(
            result,
            vec![
                Some(Bytes::from_static(b"2")),
                None,
                Some(Bytes::from_static(b"1"))
            ]
        );
    }

    #[test]
    fn test_iterator_full_range() {
        let store = seeded();
        let entries = drain(store.iterator(IteratorOptions::default()).unwrap());
        assert_eq!(keys(&entries), vec![b"b", b"c", b"d", b"f", b"g"]);
    }

    #[test]
    fn test_iterator_bounds() {
        let store = seeded();
        let options = IteratorOptions::new()
            .with_range(RangeOptions::new().with_gte("c").with_lt("g"));
        let entries = drain(store.iterator(options).unwrap());
        assert_eq!(keys(&entries), vec![b"c", b"d", b"f"]);

        let options = IteratorOptions::new()
            .with_range(RangeOptions::new().with_gt("c").with_lte("g"));
        let entries = drain(store.iterator(options).unwrap());
        assert_eq!(keys(&entries), vec![b"d", b"f", b"g"]);
    }

    #[test]
    fn test_iterator_reverse_and_limit() {
        let store = seeded();
        let options = IteratorOptions::new()
            .with_range(RangeOptions::new().with_reverse(true).with_limit(3));
        let entries = drain(store.iterator(options).unwrap());
        assert_eq!(keys(&entries), vec![b"g", b"f", b"d"]);
    }

    #[test]
    fn test_iterator_seek_forward_and_reverse() {
        let store = seeded();

        let mut it = store.iterator(IteratorOptions::default()).unwrap();
        it.seek(b"e");
        assert_eq!(it.next().unwrap().unwrap().0, Bytes::from_static(b"f"));

        let options = IteratorOptions::new()
            .with_range(RangeOptions::new().with_reverse(true));
        let mut it = store.iterator(options).unwrap();
        it.seek(b"e");
        assert_eq!(it.next().unwrap().unwrap().0, Bytes::from_static(b"d"));
    }

    #[test]
    fn test_seek_past_the_range_yields_nothing() {
        let store = seeded();
        let options = IteratorOptions::new().with_range(RangeOptions::new().with_lt("e"));
        let mut it = store.iterator(options).unwrap();
        it.seek(b"x");
        assert!(it.next().unwrap().is_none());

        let options = IteratorOptions::new()
            .with_range(RangeOptions::new().with_gte("c").with_reverse(true));
        let mut it = store.iterator(options).unwrap();
        it.seek(b"a");
        assert!(it.next().unwrap().is_none());
    }

    #[test]
    fn test_iterator_resume_after_skips_the_key() {
        let store = seeded();
        let mut it = store.iterator(IteratorOptions::default()).unwrap();
        it.resume_after(b"c");
        assert_eq!(it.next().unwrap().unwrap().0, Bytes::from_static(b"d"));

        let options = IteratorOptions::new()
            .with_range(RangeOptions::new().with_reverse(true));
        let mut it = store.iterator(options).unwrap();
        it.resume_after(b"d");
        assert_eq!(it.next().unwrap().unwrap().0, Bytes::from_static(b"c"));
    }

    #[test]
    fn test_iterator_survives_concurrent_writes() {
        let store = seeded();
        let mut it = store.iterator(IteratorOptions::default()).unwrap();
        assert_eq!(it.next().unwrap().unwrap().0, Bytes::from_static(b"b"));
        store.put(Bytes::from_static(b"ba"), Bytes::from_static(b"new")).unwrap();
        assert_eq!(it.next().unwrap().unwrap().0, Bytes::from_static(b"ba"));
    }

    #[test]
    fn test_clear_range_and_limit() {
        let store = seeded();
        store
            .clear(&RangeOptions::new().with_gte("c").with_lte("f"))
            .unwrap();
        let entries = drain(store.iterator(IteratorOptions::default()).unwrap());
        assert_eq!(keys(&entries), vec![b"b", b"g"]);

        // Reverse + limit clears from the top of the range.
        let store = seeded();
        store
            .clear(&RangeOptions::new().with_reverse(true).with_limit(2))
            .unwrap();
        let entries = drain(store.iterator(IteratorOptions::default()).unwrap());
        assert_eq!(keys(&entries), vec![b"b", b"c", b"d"]);
    }
}
