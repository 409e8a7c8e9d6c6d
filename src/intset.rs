// intset.rs — Sorted integer array.
//
// Small all-integer sets are kept as a sorted, de-duplicated array stored at
// the narrowest element width that fits every member: 2, 4, or 8 bytes. The
// serialized form is the in-memory form:
//
// ```text
// <encoding u32le: 2|4|8> <length u32le> <element little-endian>*
// ```
//
// Inserting a value outside the current width re-encodes the whole array
// first. The width never shrinks, even if the widest member is removed.

use rand::Rng;

use crate::error::{Error, Result};

pub const ENC_INT16: u32 = 2;
pub const ENC_INT32: u32 = 4;
pub const ENC_INT64: u32 = 8;

const HEADER: usize = 8;

pub struct IntSet {
    data: Vec<u8>,
}

fn required_encoding(v: i64) -> u32 {
    if v >= i16::MIN as i64 && v <= i16::MAX as i64 {
        ENC_INT16
    } else if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
        ENC_INT32
    } else {
        ENC_INT64
    }
}

impl IntSet {
    pub fn new() -> IntSet {
        let mut data = Vec::with_capacity(HEADER);
        data.extend_from_slice(&ENC_INT16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        IntSet { data }
    }

    /// Adopts a serialized blob after structural checks.
    pub fn from_bytes(data: Vec<u8>) -> Result<IntSet> {
        if data.len() < HEADER {
            return Err(Error::corrupt("integer set shorter than header"));
        }
        let set = IntSet { data };
        let enc = set.encoding();
        if enc != ENC_INT16 && enc != ENC_INT32 && enc != ENC_INT64 {
            return Err(Error::corrupt("integer set has unknown element width"));
        }
        if set.data.len() != HEADER + set.len() * enc as usize {
            return Err(Error::corrupt("integer set length mismatch"));
        }
        for i in 1..set.len() {
            if set.get(i - 1) >= set.get(i) {
                return Err(Error::corrupt("integer set not strictly ascending"));
            }
        }
        Ok(set)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn blob_len(&self) -> usize {
        self.data.len()
    }

    /// Current element width in bytes.
    pub fn encoding(&self) -> u32 {
        u32::from_le_bytes(self.data[0..4].try_into().unwrap())
    }

    pub fn len(&self) -> usize {
        u32::from_le_bytes(self.data[4..8].try_into().unwrap()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_encoding(&mut self, enc: u32) {
        self.data[0..4].copy_from_slice(&enc.to_le_bytes());
    }

    fn set_len(&mut self, len: usize) {
        self.data[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    }

    fn get_at_width(&self, index: usize, width: usize) -> i64 {
        let at = HEADER + index * width;
        match width {
            2 => i16::from_le_bytes(self.data[at..at + 2].try_into().unwrap()) as i64,
            4 => i32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()) as i64,
            _ => i64::from_le_bytes(self.data[at..at + 8].try_into().unwrap()),
        }
    }

    /// Element at position `index` in ascending order.
    pub fn get(&self, index: usize) -> i64 {
        self.get_at_width(index, self.encoding() as usize)
    }

    fn put(&mut self, index: usize, v: i64) {
        let width = self.encoding() as usize;
        let at = HEADER + index * width;
        match width {
            2 => self.data[at..at + 2].copy_from_slice(&(v as i16).to_le_bytes()),
            4 => self.data[at..at + 4].copy_from_slice(&(v as i32).to_le_bytes()),
            _ => self.data[at..at + 8].copy_from_slice(&v.to_le_bytes()),
        }
    }

    /// Binary search. Returns `Ok(pos)` when found, `Err(pos)` with the
    /// insertion point otherwise.
    fn search(&self, v: i64) -> std::result::Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let cur = self.get(mid);
            if cur == v {
                return Ok(mid);
            } else if cur < v {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Err(lo)
    }

    pub fn contains(&self, v: i64) -> bool {
        required_encoding(v) <= self.encoding() && self.search(v).is_ok()
    }

    /// Inserts `v`, reporting whether it was newly added.
    pub fn insert(&mut self, v: i64) -> bool {
        let need = required_encoding(v);
        if need > self.encoding() {
            self.upgrade_and_insert(v, need);
            return true;
        }
        match self.search(v) {
            Ok(_) => false,
            Err(pos) => {
                let width = self.encoding() as usize;
                let at = HEADER + pos * width;
                let zeros = vec![0u8; width];
                self.data.splice(at..at, zeros);
                self.put(pos, v);
                let len = self.len();
                self.set_len(len + 1);
                true
            }
        }
    }

    /// Re-encodes every element at the wider width, then places `v`, which
    /// is by construction either below all current members or above them.
    fn upgrade_and_insert(&mut self, v: i64, need: u32) {
        let old_width = self.encoding() as usize;
        let len = self.len();
        let prepend = v < 0;

        let mut values = Vec::with_capacity(len);
        for i in 0..len {
            values.push(self.get_at_width(i, old_width));
        }

        self.set_encoding(need);
        self.data.resize(HEADER + (len + 1) * need as usize, 0);
        // Rewrite back to front so nothing is clobbered, leaving one slot
        // free at the chosen end.
        let offset = if prepend { 1 } else { 0 };
        for (i, value) in values.iter().enumerate().rev() {
            self.put(i + offset, *value);
        }
        if prepend {
            self.put(0, v);
        } else {
            self.put(len, v);
        }
        self.set_len(len + 1);
    }

    /// Removes `v`, reporting whether it was present.
    pub fn remove(&mut self, v: i64) -> bool {
        if required_encoding(v) > self.encoding() {
            return false;
        }
        match self.search(v) {
            Err(_) => false,
            Ok(pos) => {
                let width = self.encoding() as usize;
                let at = HEADER + pos * width;
                self.data.drain(at..at + width);
                let len = self.len();
                self.set_len(len - 1);
                true
            }
        }
    }

    /// Uniformly random member. Panics on an empty set; callers check.
    pub fn random(&self) -> i64 {
        let i = rand::rng().random_range(0..self.len());
        self.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

impl Default for IntSet {
    fn default() -> IntSet {
        IntSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(values: &[i64]) -> IntSet {
        let mut s = IntSet::new();
        for v in values {
            s.insert(*v);
        }
        s
    }

    #[test]
    fn insert_keeps_sorted_unique() {
        let mut s = build(&[5, 1, 3]);
        assert!(!s.insert(3));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn width_upgrades_on_demand() {
        let mut s = build(&[1, 2]);
        assert_eq!(s.encoding(), ENC_INT16);
        s.insert(100_000);
        assert_eq!(s.encoding(), ENC_INT32);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![1, 2, 100_000]);
        s.insert(-5_000_000_000);
        assert_eq!(s.encoding(), ENC_INT64);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![-5_000_000_000, 1, 2, 100_000]);
    }

    #[test]
    fn width_never_shrinks() {
        let mut s = build(&[1, 5_000_000_000]);
        assert_eq!(s.encoding(), ENC_INT64);
        assert!(s.remove(5_000_000_000));
        assert_eq!(s.encoding(), ENC_INT64);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn boundary_widths() {
        let s = build(&[i16::MAX as i64, i16::MAX as i64 + 1]);
        assert_eq!(s.encoding(), ENC_INT32);
        let s = build(&[i32::MIN as i64 - 1]);
        assert_eq!(s.encoding(), ENC_INT64);
        let s = build(&[i16::MIN as i64, i16::MAX as i64]);
        assert_eq!(s.encoding(), ENC_INT16);
    }

    #[test]
    fn contains_and_remove() {
        let mut s = build(&[10, 20, 30]);
        assert!(s.contains(20));
        assert!(!s.contains(25));
        // Out-of-width probes cannot match.
        assert!(!s.contains(1 << 40));
        assert!(s.remove(20));
        assert!(!s.remove(20));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn random_member_is_a_member() {
        let s = build(&[1, 2, 3, 4, 5]);
        for _ in 0..32 {
            assert!(s.contains(s.random()));
        }
    }

    #[test]
    fn blob_round_trip() {
        let s = build(&[-7, 0, 42, 1 << 33]);
        let restored = IntSet::from_bytes(s.as_bytes().to_vec()).unwrap();
        assert_eq!(restored.iter().collect::<Vec<_>>(), s.iter().collect::<Vec<_>>());
        assert_eq!(restored.encoding(), ENC_INT64);
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(IntSet::from_bytes(vec![0, 0]).is_err());
        // Unknown width.
        let mut blob = IntSet::new().as_bytes().to_vec();
        blob[0] = 3;
        assert!(IntSet::from_bytes(blob).is_err());
        // Length larger than payload.
        let mut blob = IntSet::new().as_bytes().to_vec();
        blob[4] = 9;
        assert!(IntSet::from_bytes(blob).is_err());
        // Unsorted payload.
        let mut s = build(&[1, 2]);
        let at = HEADER;
        s.data[at..at + 2].copy_from_slice(&5i16.to_le_bytes());
        assert!(IntSet::from_bytes(s.data).is_err());
    }
}
