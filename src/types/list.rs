// types/list.rs — List commands.
//
// Lists start life as a packed entry list and promote to the general linked
// representation when an element exceeds the configured value threshold or
// the entry count crosses the entries threshold. The promotion runs before a
// long value is pushed (so the packed form never holds it) and after pushes
// for the count rule.

use crate::db::Server;
use crate::error::{Error, Result};
use crate::obj::{ListVal, Value};
use crate::sds::Sds;
use crate::types::clamp_range;
use crate::ziplist::End;

pub use crate::ziplist::End as ListEnd;

fn as_list_mut(value: &mut Value) -> Result<&mut ListVal> {
    match value {
        Value::List(l) => Ok(l),
        _ => Err(Error::WrongType),
    }
}

fn as_list(value: &Value) -> Result<&ListVal> {
    match value {
        Value::List(l) => Ok(l),
        _ => Err(Error::WrongType),
    }
}

/// Promotes when `candidate` is too long for the packed form.
fn convert_for_value(list: &mut ListVal, candidate: &[u8], max_value: usize) {
    if matches!(list, ListVal::Zip(_)) && candidate.len() > max_value {
        list.convert();
    }
}

/// Promotes when the entry count has outgrown the packed form.
fn convert_for_count(list: &mut ListVal, max_entries: usize) {
    if matches!(list, ListVal::Zip(_)) && list.len() > max_entries {
        list.convert();
    }
}

impl Server {
    fn push_generic(&mut self, key: &[u8], values: &[&[u8]], end: End) -> Result<usize> {
        let max_entries = self.config.list_max_ziplist_entries;
        let max_value = self.config.list_max_ziplist_value;

        if self.lookup_write(key).is_none() {
            self.db_mut().dict.add(Sds::from_bytes(key), Value::empty_list());
        }
        let list = as_list_mut(self.db_mut().dict.get_mut(key).expect("list materialized"))?;
        for v in values {
            convert_for_value(list, v, max_value);
            match list {
                ListVal::Zip(zl) => zl.push(v, end),
                ListVal::Linked(items) => match end {
                    End::Head => items.push_front(Sds::from_bytes(v)),
                    End::Tail => items.push_back(Sds::from_bytes(v)),
                },
            }
            convert_for_count(list, max_entries);
        }
        let len = list.len();
        self.dirty += values.len() as u64;
        Ok(len)
    }

    pub fn lpush(&mut self, key: &[u8], values: &[&[u8]]) -> Result<usize> {
        self.push_generic(key, values, End::Head)
    }

    pub fn rpush(&mut self, key: &[u8], values: &[&[u8]]) -> Result<usize> {
        self.push_generic(key, values, End::Tail)
    }

    fn pop_generic(&mut self, key: &[u8], end: End) -> Result<Option<Vec<u8>>> {
        let popped = match self.lookup_write(key) {
            None => return Ok(None),
            Some(v) => {
                let list = as_list_mut(v)?;
                match list {
                    ListVal::Zip(zl) => {
                        let idx = if end == End::Head { 0 } else { -1 };
                        match zl.index(idx) {
                            None => None,
                            Some(p) => {
                                let out = zl.get(p).to_bytes();
                                zl.delete(p);
                                Some(out)
                            }
                        }
                    }
                    ListVal::Linked(items) => {
                        let taken = match end {
                            End::Head => items.pop_front(),
                            End::Tail => items.pop_back(),
                        };
                        taken.map(|s| s.into_vec())
                    }
                }
            }
        };
        if popped.is_some() {
            self.dirty += 1;
            let emptied = as_list(self.db().dict.get(key).expect("list present"))?.is_empty();
            if emptied {
                self.delete_key(key);
            }
        }
        Ok(popped)
    }

    pub fn lpop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop_generic(key, End::Head)
    }

    pub fn rpop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop_generic(key, End::Tail)
    }

    pub fn llen(&mut self, key: &[u8]) -> Result<usize> {
        match self.lookup_read(key) {
            None => Ok(0),
            Some(v) => Ok(as_list(v)?.len()),
        }
    }

    pub fn lindex(&mut self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        match self.lookup_read(key) {
            None => Ok(None),
            Some(v) => {
                let list = as_list(v)?;
                Ok(match list {
                    ListVal::Zip(zl) => zl.index(index as isize).map(|p| zl.get(p).to_bytes()),
                    ListVal::Linked(items) => {
                        let len = items.len() as i64;
                        let i = if index < 0 { len + index } else { index };
                        if i < 0 || i >= len {
                            None
                        } else {
                            Some(items[i as usize].as_bytes().to_vec())
                        }
                    }
                })
            }
        }
    }

    /// Replaces the element at `index`. Errors on a missing key or an index
    /// past either end.
    pub fn lset(&mut self, key: &[u8], index: i64, value: &[u8]) -> Result<()> {
        let max_value = self.config.list_max_ziplist_value;
        match self.lookup_write(key) {
            None => Err(Error::NotFound),
            Some(v) => {
                let list = as_list_mut(v)?;
                convert_for_value(list, value, max_value);
                match list {
                    ListVal::Zip(zl) => {
                        let p = zl
                            .index(index as isize)
                            .ok_or(Error::OutOfRange("index out of range"))?;
                        let p = zl.delete(p);
                        zl.insert_at(p, value);
                    }
                    ListVal::Linked(items) => {
                        let len = items.len() as i64;
                        let i = if index < 0 { len + index } else { index };
                        if i < 0 || i >= len {
                            return Err(Error::OutOfRange("index out of range"));
                        }
                        items[i as usize] = Sds::from_bytes(value);
                    }
                }
                self.dirty += 1;
                Ok(())
            }
        }
    }

    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        match self.lookup_read(key) {
            None => Ok(Vec::new()),
            Some(v) => {
                let list = as_list(v)?;
                let Some((start, stop)) = clamp_range(start, stop, list.len()) else {
                    return Ok(Vec::new());
                };
                Ok(match list {
                    ListVal::Zip(zl) => {
                        let mut out = Vec::with_capacity(stop - start + 1);
                        let mut p = zl.index(start as isize);
                        for _ in start..=stop {
                            let Some(at) = p else { break };
                            out.push(zl.get(at).to_bytes());
                            p = zl.next(at);
                        }
                        out
                    }
                    ListVal::Linked(items) => items
                        .iter()
                        .skip(start)
                        .take(stop - start + 1)
                        .map(|s| s.as_bytes().to_vec())
                        .collect(),
                })
            }
        }
    }

    /// Inserts `value` before or after the first occurrence of `pivot`.
    /// Returns the new length, or -1 when the pivot is absent, or 0 when the
    /// key does not exist.
    pub fn linsert(
        &mut self,
        key: &[u8],
        before: bool,
        pivot: &[u8],
        value: &[u8],
    ) -> Result<i64> {
        let max_entries = self.config.list_max_ziplist_entries;
        let max_value = self.config.list_max_ziplist_value;
        let result = match self.lookup_write(key) {
            None => return Ok(0),
            Some(v) => {
                let list = as_list_mut(v)?;
                convert_for_value(list, value, max_value);
                match list {
                    ListVal::Zip(zl) => {
                        let head = match zl.index(0) {
                            Some(p) => p,
                            None => return Ok(-1),
                        };
                        match zl.find(head, pivot, 0) {
                            None => -1,
                            Some(p) => {
                                let at = if before {
                                    p
                                } else {
                                    // Appending after the tail lands on the
                                    // terminator offset.
                                    zl.next(p).unwrap_or(zl.blob_len() - 1)
                                };
                                zl.insert_at(at, value);
                                zl.len() as i64
                            }
                        }
                    }
                    ListVal::Linked(items) => {
                        match items.iter().position(|s| s.as_bytes() == pivot) {
                            None => -1,
                            Some(i) => {
                                let at = if before { i } else { i + 1 };
                                items.insert(at, Sds::from_bytes(value));
                                items.len() as i64
                            }
                        }
                    }
                }
            }
        };
        if result > 0 {
            let list = as_list_mut(self.db_mut().dict.get_mut(key).expect("list present"))?;
            convert_for_count(list, max_entries);
            self.dirty += 1;
        }
        Ok(result)
    }

    /// Removes up to `count` occurrences of `value`: positive counts scan
    /// head to tail, negative tail to head, zero removes all.
    pub fn lrem(&mut self, key: &[u8], count: i64, value: &[u8]) -> Result<usize> {
        let removed = match self.lookup_write(key) {
            None => return Ok(0),
            Some(v) => {
                let list = as_list_mut(v)?;
                let limit = count.unsigned_abs() as usize;
                let from_tail = count < 0;
                match list {
                    ListVal::Zip(zl) => {
                        let mut removed = 0usize;
                        if from_tail {
                            let mut p = zl.index(-1);
                            while let Some(at) = p {
                                if limit > 0 && removed == limit {
                                    break;
                                }
                                let prev = zl.prev(at);
                                if zl.get(at).eq_bytes(value) {
                                    zl.delete(at);
                                    removed += 1;
                                }
                                p = prev;
                            }
                        } else {
                            let mut p = zl.index(0);
                            while let Some(at) = p {
                                if limit > 0 && removed == limit {
                                    break;
                                }
                                if zl.get(at).eq_bytes(value) {
                                    zl.delete(at);
                                    // The next entry now sits at `at`.
                                    removed += 1;
                                    p = if zl.is_terminator(at) { None } else { Some(at) };
                                } else {
                                    p = zl.next(at);
                                }
                            }
                        }
                        removed
                    }
                    ListVal::Linked(items) => {
                        let mut removed = 0usize;
                        if from_tail {
                            let mut i = items.len();
                            while i > 0 {
                                i -= 1;
                                if (limit == 0 || removed < limit)
                                    && items[i].as_bytes() == value
                                {
                                    items.remove(i);
                                    removed += 1;
                                }
                            }
                        } else {
                            let mut i = 0usize;
                            while i < items.len() {
                                if (limit == 0 || removed < limit)
                                    && items[i].as_bytes() == value
                                {
                                    items.remove(i);
                                    removed += 1;
                                } else {
                                    i += 1;
                                }
                            }
                        }
                        removed
                    }
                }
            }
        };
        if removed > 0 {
            self.dirty += removed as u64;
            let emptied = as_list(self.db().dict.get(key).expect("list present"))?.is_empty();
            if emptied {
                self.delete_key(key);
            }
        }
        Ok(removed)
    }

    /// Trims the list to the inclusive window `[start, stop]`; an empty
    /// window deletes the key.
    pub fn ltrim(&mut self, key: &[u8], start: i64, stop: i64) -> Result<()> {
        let window = {
            match self.lookup_write(key) {
                None => return Ok(()),
                Some(v) => {
                    let list = as_list_mut(v)?;
                    clamp_range(start, stop, list.len())
                }
            }
        };
        match window {
            None => {
                self.delete_key(key);
            }
            Some((start, stop)) => {
                let list =
                    as_list_mut(self.db_mut().dict.get_mut(key).expect("list present"))?;
                let len = list.len();
                match list {
                    ListVal::Zip(zl) => {
                        // Right side first so left indices stay valid.
                        zl.delete_range((stop + 1) as isize, len - stop - 1);
                        zl.delete_range(0, start);
                    }
                    ListVal::Linked(items) => {
                        items.truncate(stop + 1);
                        items.drain(..start);
                    }
                }
                self.dirty += 1;
                if as_list(self.db().dict.get(key).expect("list present"))?.is_empty() {
                    self.delete_key(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::db::Server;
    use crate::error::Error;
    use crate::obj::Encoding;

    fn server() -> Server {
        Server::new(Config::default())
    }

    fn encoding_of(s: &mut Server, key: &[u8]) -> Encoding {
        s.lookup_read(key).unwrap().encoding()
    }

    fn strings(v: Vec<Vec<u8>>) -> Vec<String> {
        v.into_iter().map(|b| String::from_utf8_lossy(&b).to_string()).collect()
    }

    #[test]
    fn push_pop_both_ends() {
        let mut s = server();
        assert_eq!(s.rpush(b"l", &[b"b", b"c"]).unwrap(), 2);
        assert_eq!(s.lpush(b"l", &[b"a"]).unwrap(), 3);
        assert_eq!(s.lrange(b"l", 0, -1).map(strings).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(s.lpop(b"l").unwrap().unwrap(), b"a");
        assert_eq!(s.rpop(b"l").unwrap().unwrap(), b"c");
        assert_eq!(s.llen(b"l").unwrap(), 1);
    }

    #[test]
    fn pop_last_element_deletes_key() {
        let mut s = server();
        s.rpush(b"l", &[b"only"]).unwrap();
        assert_eq!(s.lpop(b"l").unwrap().unwrap(), b"only");
        assert!(!s.exists(b"l"));
        assert_eq!(s.lpop(b"l").unwrap(), None);
    }

    #[test]
    fn long_value_promotes() {
        let mut s = server();
        s.rpush(b"l", &[b"short"]).unwrap();
        assert_eq!(encoding_of(&mut s, b"l"), Encoding::ZipList);
        // 64 bytes stays packed, 65 promotes.
        let at_limit = vec![b'x'; 64];
        s.rpush(b"l", &[&at_limit]).unwrap();
        assert_eq!(encoding_of(&mut s, b"l"), Encoding::ZipList);
        let over = vec![b'x'; 65];
        s.rpush(b"l", &[&over]).unwrap();
        assert_eq!(encoding_of(&mut s, b"l"), Encoding::LinkedList);
        assert_eq!(s.llen(b"l").unwrap(), 3);
    }

    #[test]
    fn count_threshold_promotes() {
        let mut s = server();
        let mut cfg = Config::default();
        cfg.list_max_ziplist_entries = 4;
        s.config = cfg;
        for i in 0..4 {
            s.rpush(b"l", &[format!("{}", i).as_bytes()]).unwrap();
        }
        assert_eq!(encoding_of(&mut s, b"l"), Encoding::ZipList);
        s.rpush(b"l", &[b"4"]).unwrap();
        assert_eq!(encoding_of(&mut s, b"l"), Encoding::LinkedList);
    }

    #[test]
    fn lindex_and_lset() {
        let mut s = server();
        s.rpush(b"l", &[b"a", b"b", b"c"]).unwrap();
        assert_eq!(s.lindex(b"l", 0).unwrap().unwrap(), b"a");
        assert_eq!(s.lindex(b"l", -1).unwrap().unwrap(), b"c");
        assert_eq!(s.lindex(b"l", 5).unwrap(), None);
        s.lset(b"l", 1, b"B").unwrap();
        assert_eq!(s.lindex(b"l", 1).unwrap().unwrap(), b"B");
        assert!(matches!(s.lset(b"l", 9, b"x"), Err(Error::OutOfRange(_))));
        assert!(matches!(s.lset(b"missing", 0, b"x"), Err(Error::NotFound)));
    }

    #[test]
    fn linsert_before_after() {
        let mut s = server();
        s.rpush(b"l", &[b"a", b"c"]).unwrap();
        assert_eq!(s.linsert(b"l", true, b"c", b"b").unwrap(), 3);
        assert_eq!(s.linsert(b"l", false, b"c", b"d").unwrap(), 4);
        assert_eq!(s.lrange(b"l", 0, -1).map(strings).unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(s.linsert(b"l", true, b"zz", b"x").unwrap(), -1);
        assert_eq!(s.linsert(b"missing", true, b"a", b"x").unwrap(), 0);
    }

    #[test]
    fn lrem_directions() {
        let mut s = server();
        s.rpush(b"l", &[b"x", b"a", b"x", b"b", b"x"]).unwrap();
        assert_eq!(s.lrem(b"l", 2, b"x").unwrap(), 2);
        assert_eq!(s.lrange(b"l", 0, -1).map(strings).unwrap(), vec!["a", "b", "x"]);

        let mut s = server();
        s.rpush(b"l", &[b"x", b"a", b"x", b"b", b"x"]).unwrap();
        assert_eq!(s.lrem(b"l", -2, b"x").unwrap(), 2);
        assert_eq!(s.lrange(b"l", 0, -1).map(strings).unwrap(), vec!["x", "a", "b"]);

        let mut s = server();
        s.rpush(b"l", &[b"x", b"x", b"x"]).unwrap();
        assert_eq!(s.lrem(b"l", 0, b"x").unwrap(), 3);
        assert!(!s.exists(b"l"));
    }

    #[test]
    fn ltrim_window() {
        let mut s = server();
        s.rpush(b"l", &[b"a", b"b", b"c", b"d", b"e"]).unwrap();
        s.ltrim(b"l", 1, 3).unwrap();
        assert_eq!(s.lrange(b"l", 0, -1).map(strings).unwrap(), vec!["b", "c", "d"]);
        s.ltrim(b"l", 5, 10).unwrap();
        assert!(!s.exists(b"l"));
    }

    #[test]
    fn promotion_is_monotonic() {
        let mut s = server();
        let over = vec![b'x'; 100];
        s.rpush(b"l", &[&over, b"a"]).unwrap();
        assert_eq!(encoding_of(&mut s, b"l"), Encoding::LinkedList);
        // Removing the long element does not re-pack.
        s.lrem(b"l", 0, &over).unwrap();
        assert_eq!(encoding_of(&mut s, b"l"), Encoding::LinkedList);
    }
}
