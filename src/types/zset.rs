// types/zset.rs — Sorted-set commands.
//
// Small sorted sets are a packed entry list of alternating member, score
// entries kept in (score, member) order. Past the configured thresholds the
// value becomes the paired form: a member table for O(1) score lookups plus
// the skip list for order, rank, and range queries. Both indexes always
// describe the same membership.

use crate::db::Server;
use crate::error::{Error, Result};
use crate::obj::{Value, ZsetVal};
use crate::sds::Sds;
use crate::skiplist::ScoreRange;
use crate::types::clamp_range;
use crate::util;
use crate::ziplist::Ziplist;

fn as_zset(value: &Value) -> Result<&ZsetVal> {
    match value {
        Value::Zset(z) => Ok(z),
        _ => Err(Error::WrongType),
    }
}

fn as_zset_mut(value: &mut Value) -> Result<&mut ZsetVal> {
    match value {
        Value::Zset(z) => Ok(z),
        _ => Err(Error::WrongType),
    }
}

// -- packed-form helpers ------------------------------------------------------

fn zzl_score_at(zl: &Ziplist, score_off: usize) -> f64 {
    let entry = zl.get(score_off);
    entry
        .as_i64()
        .map(|v| v as f64)
        .or_else(|| util::parse_f64(&entry.to_bytes()))
        .expect("packed sorted set holds a malformed score")
}

/// Locates `member`, returning the member entry offset and the score.
fn zzl_find(zl: &Ziplist, member: &[u8]) -> Option<(usize, f64)> {
    let mut p = zl.index(0);
    while let Some(mp) = p {
        let sp = zl.next(mp).expect("member without score");
        if zl.get(mp).eq_bytes(member) {
            return Some((mp, zzl_score_at(zl, sp)));
        }
        p = zl.next(sp);
    }
    None
}

/// Inserts a pair at its ordered position.
pub(crate) fn zzl_insert(zl: &mut Ziplist, member: &[u8], score: f64) {
    let score_bytes = util::format_f64(score);
    let mut p = zl.index(0);
    while let Some(mp) = p {
        let sp = zl.next(mp).expect("member without score");
        let cur = zzl_score_at(zl, sp);
        let precedes = score < cur
            || (score == cur && member < zl.get(mp).to_bytes().as_slice());
        if precedes {
            // Score first, then member, so the pair lands member-first.
            zl.insert_at(mp, &score_bytes);
            zl.insert_at(mp, member);
            return;
        }
        p = zl.next(sp);
    }
    zl.push(member, crate::ziplist::End::Tail);
    zl.push(&score_bytes, crate::ziplist::End::Tail);
}

fn zzl_delete_pair(zl: &mut Ziplist, member_off: usize) {
    let p = zl.delete(member_off);
    zl.delete(p);
}

impl Server {
    /// Adds or updates members. Returns how many were newly added.
    pub fn zadd(&mut self, key: &[u8], entries: &[(f64, &[u8])]) -> Result<usize> {
        for (score, _) in entries {
            if score.is_nan() {
                return Err(Error::NotFloat);
            }
        }
        if entries.is_empty() {
            return Ok(0);
        }
        let max_entries = self.config.zset_max_ziplist_entries;
        let max_value = self.config.zset_max_ziplist_value;

        if self.lookup_write(key).is_none() {
            let value = if max_entries == 0 || entries[0].1.len() > max_value {
                Value::empty_zset_full()
            } else {
                Value::empty_zset_zip()
            };
            self.db_mut().dict.add(Sds::from_bytes(key), value);
        }
        let zset = as_zset_mut(self.db_mut().dict.get_mut(key).expect("zset materialized"))?;

        let mut added = 0usize;
        let mut touched = 0u64;
        for (score, member) in entries {
            if matches!(zset, ZsetVal::Zip(_)) && member.len() > max_value {
                zset.convert();
            }
            match zset {
                ZsetVal::Zip(zl) => match zzl_find(zl, member) {
                    Some((off, cur)) => {
                        if cur != *score {
                            zzl_delete_pair(zl, off);
                            zzl_insert(zl, member, *score);
                            touched += 1;
                        }
                    }
                    None => {
                        zzl_insert(zl, member, *score);
                        added += 1;
                        touched += 1;
                        if zl.len() / 2 > max_entries {
                            zset.convert();
                        }
                    }
                },
                ZsetVal::Skip(full) => {
                    let m = Sds::from_bytes(member);
                    match full.dict.get(*member).copied() {
                        Some(cur) => {
                            if cur != *score {
                                full.zsl.delete(cur, member);
                                full.zsl.insert(*score, m.clone());
                                full.dict.insert(m, *score);
                                touched += 1;
                            }
                        }
                        None => {
                            full.zsl.insert(*score, m.clone());
                            full.dict.insert(m, *score);
                            added += 1;
                            touched += 1;
                        }
                    }
                }
            }
        }
        self.dirty += touched;
        Ok(added)
    }

    /// Adds `delta` to the member's score (0 when absent); returns the new
    /// score.
    pub fn zincrby(&mut self, key: &[u8], delta: f64, member: &[u8]) -> Result<f64> {
        let current = self.zscore(key, member)?.unwrap_or(0.0);
        let next = current + delta;
        if next.is_nan() {
            return Err(Error::NotFloat);
        }
        self.zadd(key, &[(next, member)])?;
        Ok(next)
    }

    pub fn zscore(&mut self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        match self.lookup_read(key) {
            None => Ok(None),
            Some(v) => Ok(match as_zset(v)? {
                ZsetVal::Zip(zl) => zzl_find(zl, member).map(|(_, s)| s),
                ZsetVal::Skip(full) => full.dict.get(member).copied(),
            }),
        }
    }

    pub fn zcard(&mut self, key: &[u8]) -> Result<usize> {
        match self.lookup_read(key) {
            None => Ok(0),
            Some(v) => Ok(as_zset(v)?.len()),
        }
    }

    pub fn zrem(&mut self, key: &[u8], members: &[&[u8]]) -> Result<usize> {
        let removed = match self.lookup_write(key) {
            None => return Ok(0),
            Some(v) => {
                let zset = as_zset_mut(v)?;
                let mut removed = 0usize;
                for member in members {
                    match zset {
                        ZsetVal::Zip(zl) => {
                            if let Some((off, _)) = zzl_find(zl, member) {
                                zzl_delete_pair(zl, off);
                                removed += 1;
                            }
                        }
                        ZsetVal::Skip(full) => {
                            if let Some(score) = full.dict.remove(*member) {
                                full.zsl.delete(score, member);
                                removed += 1;
                            }
                        }
                    }
                }
                removed
            }
        };
        if removed > 0 {
            self.dirty += removed as u64;
            if as_zset(self.db().dict.get(key).expect("zset present"))?.is_empty() {
                self.delete_key(key);
            }
        }
        Ok(removed)
    }

    /// 0-based rank in ascending order.
    pub fn zrank(&mut self, key: &[u8], member: &[u8]) -> Result<Option<usize>> {
        match self.lookup_read(key) {
            None => Ok(None),
            Some(v) => Ok(match as_zset(v)? {
                ZsetVal::Zip(zl) => {
                    let mut rank = 0usize;
                    let mut p = zl.index(0);
                    while let Some(mp) = p {
                        if zl.get(mp).eq_bytes(member) {
                            return Ok(Some(rank));
                        }
                        let sp = zl.next(mp).expect("member without score");
                        p = zl.next(sp);
                        rank += 1;
                    }
                    None
                }
                ZsetVal::Skip(full) => match full.dict.get(member) {
                    None => None,
                    Some(score) => full.zsl.rank(*score, member).map(|r| r - 1),
                },
            }),
        }
    }

    /// 0-based rank in descending order.
    pub fn zrevrank(&mut self, key: &[u8], member: &[u8]) -> Result<Option<usize>> {
        let len = self.zcard(key)?;
        Ok(self.zrank(key, member)?.map(|r| len - 1 - r))
    }

    /// Members with rank in the inclusive window, ascending.
    pub fn zrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<(Vec<u8>, f64)>> {
        match self.lookup_read(key) {
            None => Ok(Vec::new()),
            Some(v) => {
                let zset = as_zset(v)?;
                let Some((start, stop)) = clamp_range(start, stop, zset.len()) else {
                    return Ok(Vec::new());
                };
                Ok(match zset {
                    ZsetVal::Zip(zl) => {
                        let mut out = Vec::with_capacity(stop - start + 1);
                        let mut p = zl.index((start * 2) as isize);
                        for _ in start..=stop {
                            let Some(mp) = p else { break };
                            let sp = zl.next(mp).expect("member without score");
                            out.push((zl.get(mp).to_bytes(), zzl_score_at(zl, sp)));
                            p = zl.next(sp);
                        }
                        out
                    }
                    ZsetVal::Skip(full) => {
                        let mut out = Vec::with_capacity(stop - start + 1);
                        let mut node = full.zsl.by_rank(start + 1);
                        for _ in start..=stop {
                            let Some(n) = node else { break };
                            let (ele, score) = full.zsl.entry(n);
                            out.push((ele.as_bytes().to_vec(), score));
                            node = full.zsl.next(n);
                        }
                        out
                    }
                })
            }
        }
    }

    /// Members with rank in the inclusive window, descending.
    pub fn zrevrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<(Vec<u8>, f64)>> {
        let len = self.zcard(key)?;
        // Normalize in descending coordinates, then map onto the ascending
        // order and flip.
        let Some((start, stop)) = clamp_range(start, stop, len) else {
            return Ok(Vec::new());
        };
        let fwd_start = (len - 1 - stop) as i64;
        let fwd_stop = (len - 1 - start) as i64;
        let mut out = self.zrange(key, fwd_start, fwd_stop)?;
        out.reverse();
        Ok(out)
    }

    /// Members with score inside `range`, ascending; ties ordered by member
    /// bytes.
    pub fn zrangebyscore(&mut self, key: &[u8], range: &ScoreRange) -> Result<Vec<(Vec<u8>, f64)>> {
        match self.lookup_read(key) {
            None => Ok(Vec::new()),
            Some(v) => Ok(match as_zset(v)? {
                ZsetVal::Zip(zl) => {
                    let mut out = Vec::new();
                    let mut p = zl.index(0);
                    while let Some(mp) = p {
                        let sp = zl.next(mp).expect("member without score");
                        let score = zzl_score_at(zl, sp);
                        if range.gte_min(score) {
                            if !range.lte_max(score) {
                                break;
                            }
                            out.push((zl.get(mp).to_bytes(), score));
                        }
                        p = zl.next(sp);
                    }
                    out
                }
                ZsetVal::Skip(full) => {
                    let mut out = Vec::new();
                    let mut node = full.zsl.first_in_range(range);
                    while let Some(n) = node {
                        let (ele, score) = full.zsl.entry(n);
                        if !range.lte_max(score) {
                            break;
                        }
                        out.push((ele.as_bytes().to_vec(), score));
                        node = full.zsl.next(n);
                    }
                    out
                }
            }),
        }
    }

    pub fn zcount(&mut self, key: &[u8], range: &ScoreRange) -> Result<usize> {
        match self.lookup_read(key) {
            None => Ok(0),
            Some(v) => Ok(match as_zset(v)? {
                ZsetVal::Zip(zl) => {
                    // Packed sets are small; a pair walk is fine.
                    let mut n = 0usize;
                    let mut p = zl.index(0);
                    while let Some(mp) = p {
                        let sp = zl.next(mp).expect("member without score");
                        let score = zzl_score_at(zl, sp);
                        if !range.lte_max(score) {
                            break;
                        }
                        if range.gte_min(score) {
                            n += 1;
                        }
                        p = zl.next(sp);
                    }
                    n
                }
                ZsetVal::Skip(full) => {
                    let Some(first) = full.zsl.first_in_range(range) else {
                        return Ok(0);
                    };
                    let (fe, fs) = full.zsl.entry(first);
                    let first_rank = full.zsl.rank(fs, fe.as_bytes()).expect("node has rank");
                    let last = full.zsl.last_in_range(range).expect("range non-empty");
                    let (le, ls) = full.zsl.entry(last);
                    let last_rank = full.zsl.rank(ls, le.as_bytes()).expect("node has rank");
                    last_rank - first_rank + 1
                }
            }),
        }
    }

    /// Removes members with score inside `range`; returns how many.
    pub fn zremrangebyscore(&mut self, key: &[u8], range: &ScoreRange) -> Result<usize> {
        let removed = match self.lookup_write(key) {
            None => return Ok(0),
            Some(v) => {
                let zset = as_zset_mut(v)?;
                match zset {
                    ZsetVal::Zip(zl) => {
                        let mut removed = 0usize;
                        let mut p = zl.index(0);
                        while let Some(mp) = p {
                            let sp = zl.next(mp).expect("member without score");
                            let score = zzl_score_at(zl, sp);
                            if !range.lte_max(score) {
                                break;
                            }
                            if range.gte_min(score) {
                                zzl_delete_pair(zl, mp);
                                removed += 1;
                                p = if zl.is_terminator(mp) { None } else { Some(mp) };
                            } else {
                                p = zl.next(sp);
                            }
                        }
                        removed
                    }
                    ZsetVal::Skip(full) => {
                        let removed = full.zsl.delete_range_by_score(range);
                        for (ele, _) in &removed {
                            full.dict.remove(ele.as_bytes());
                        }
                        removed.len()
                    }
                }
            }
        };
        if removed > 0 {
            self.dirty += removed as u64;
            if as_zset(self.db().dict.get(key).expect("zset present"))?.is_empty() {
                self.delete_key(key);
            }
        }
        Ok(removed)
    }

    /// Removes members with 0-based rank in the inclusive window.
    pub fn zremrangebyrank(&mut self, key: &[u8], start: i64, stop: i64) -> Result<usize> {
        let len = self.zcard(key)?;
        let Some((start, stop)) = clamp_range(start, stop, len) else {
            return Ok(0);
        };
        let removed = match self.lookup_write(key) {
            None => return Ok(0),
            Some(v) => {
                let zset = as_zset_mut(v)?;
                match zset {
                    ZsetVal::Zip(zl) => {
                        let count = stop - start + 1;
                        zl.delete_range((start * 2) as isize, count * 2);
                        count
                    }
                    ZsetVal::Skip(full) => {
                        let removed = full.zsl.delete_range_by_rank(start + 1, stop + 1);
                        for (ele, _) in &removed {
                            full.dict.remove(ele.as_bytes());
                        }
                        removed.len()
                    }
                }
            }
        };
        if removed > 0 {
            self.dirty += removed as u64;
            if as_zset(self.db().dict.get(key).expect("zset present"))?.is_empty() {
                self.delete_key(key);
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::obj::Encoding;

    fn server() -> Server {
        Server::new(Config::default())
    }

    fn encoding_of(s: &mut Server, key: &[u8]) -> Encoding {
        s.lookup_read(key).unwrap().encoding()
    }

    fn members(v: Vec<(Vec<u8>, f64)>) -> Vec<String> {
        v.into_iter().map(|(m, _)| String::from_utf8_lossy(&m).to_string()).collect()
    }

    #[test]
    fn zadd_orders_by_score_then_member() {
        let mut s = server();
        assert_eq!(s.zadd(b"z", &[(1.0, b"a"), (2.0, b"c"), (2.0, b"b")]).unwrap(), 3);
        assert_eq!(members(s.zrange(b"z", 0, -1).unwrap()), vec!["a", "b", "c"]);
        assert_eq!(encoding_of(&mut s, b"z"), Encoding::ZipList);
    }

    #[test]
    fn zadd_update_moves_member() {
        let mut s = server();
        s.zadd(b"z", &[(1.0, b"a"), (2.0, b"b")]).unwrap();
        // Same member, new score: not a new addition.
        assert_eq!(s.zadd(b"z", &[(9.0, b"a")]).unwrap(), 0);
        assert_eq!(members(s.zrange(b"z", 0, -1).unwrap()), vec!["b", "a"]);
        assert_eq!(s.zscore(b"z", b"a").unwrap(), Some(9.0));
    }

    #[test]
    fn nan_scores_rejected() {
        let mut s = server();
        assert!(matches!(s.zadd(b"z", &[(f64::NAN, b"a")]), Err(Error::NotFloat)));
        s.zadd(b"z", &[(f64::INFINITY, b"a")]).unwrap();
        assert!(matches!(
            s.zincrby(b"z", f64::NEG_INFINITY, b"a"),
            Err(Error::NotFloat)
        ));
    }

    #[test]
    fn promotion_by_count_and_length() {
        let mut s = server();
        s.config.zset_max_ziplist_entries = 3;
        for i in 0..3 {
            s.zadd(b"z", &[(i as f64, format!("m{}", i).as_bytes())]).unwrap();
        }
        assert_eq!(encoding_of(&mut s, b"z"), Encoding::ZipList);
        s.zadd(b"z", &[(9.0, b"m9")]).unwrap();
        assert_eq!(encoding_of(&mut s, b"z"), Encoding::SkipList);
        // Order survives the conversion.
        assert_eq!(members(s.zrange(b"z", 0, -1).unwrap()), vec!["m0", "m1", "m2", "m9"]);

        let mut s2 = server();
        s2.zadd(b"z", &[(1.0, b"short")]).unwrap();
        let long = vec![b'x'; 70];
        s2.zadd(b"z", &[(2.0, &long)]).unwrap();
        assert_eq!(encoding_of(&mut s2, b"z"), Encoding::SkipList);
    }

    #[test]
    fn zscore_and_zrank() {
        let mut s = server();
        s.zadd(b"z", &[(1.0, b"a"), (2.0, b"b"), (3.0, b"c")]).unwrap();
        assert_eq!(s.zscore(b"z", b"b").unwrap(), Some(2.0));
        assert_eq!(s.zscore(b"z", b"zz").unwrap(), None);
        assert_eq!(s.zrank(b"z", b"a").unwrap(), Some(0));
        assert_eq!(s.zrank(b"z", b"c").unwrap(), Some(2));
        assert_eq!(s.zrevrank(b"z", b"c").unwrap(), Some(0));
        assert_eq!(s.zrank(b"z", b"zz").unwrap(), None);

        // Same answers in the skip-list encoding.
        s.config.zset_max_ziplist_entries = 0;
        s.zadd(b"big", &[(1.0, b"a"), (2.0, b"b"), (3.0, b"c")]).unwrap();
        assert_eq!(encoding_of(&mut s, b"big"), Encoding::SkipList);
        assert_eq!(s.zrank(b"big", b"b").unwrap(), Some(1));
        assert_eq!(s.zrevrank(b"big", b"a").unwrap(), Some(2));
    }

    #[test]
    fn zrangebyscore_ties_lexicographic() {
        let mut s = server();
        s.zadd(b"z", &[(1.0, b"a"), (2.0, b"b"), (2.0, b"c")]).unwrap();
        let hits = s.zrangebyscore(b"z", &ScoreRange::inclusive(2.0, 2.0)).unwrap();
        assert_eq!(members(hits), vec!["b", "c"]);

        let ex = ScoreRange { min: 1.0, max: 2.0, minex: true, maxex: false };
        assert_eq!(members(s.zrangebyscore(b"z", &ex).unwrap()), vec!["b", "c"]);
    }

    #[test]
    fn zcount_matches_range_walk() {
        let mut s = server();
        s.config.zset_max_ziplist_entries = 0; // straight to the skip list
        for i in 0..100 {
            s.zadd(b"z", &[((i % 10) as f64, format!("m{:03}", i).as_bytes())]).unwrap();
        }
        let range = ScoreRange::inclusive(3.0, 5.0);
        let walked = s.zrangebyscore(b"z", &range).unwrap().len();
        assert_eq!(s.zcount(b"z", &range).unwrap(), walked);
        assert_eq!(s.zcount(b"z", &ScoreRange::inclusive(50.0, 60.0)).unwrap(), 0);
    }

    #[test]
    fn zrem_and_empty_key_removal() {
        let mut s = server();
        s.zadd(b"z", &[(1.0, b"a"), (2.0, b"b")]).unwrap();
        assert_eq!(s.zrem(b"z", &[b"a", b"zz"]).unwrap(), 1);
        assert_eq!(s.zrem(b"z", &[b"b"]).unwrap(), 1);
        assert!(!s.exists(b"z"));
    }

    #[test]
    fn zremrange_by_score_and_rank() {
        let mut s = server();
        for i in 0..10 {
            s.zadd(b"z", &[(i as f64, format!("m{}", i).as_bytes())]).unwrap();
        }
        assert_eq!(s.zremrangebyscore(b"z", &ScoreRange::inclusive(3.0, 5.0)).unwrap(), 3);
        assert_eq!(s.zcard(b"z").unwrap(), 7);
        assert_eq!(s.zremrangebyrank(b"z", 0, 1).unwrap(), 2);
        assert_eq!(members(s.zrange(b"z", 0, 0).unwrap()), vec!["m2"]);
        // Negative rank window trims from the tail.
        assert_eq!(s.zremrangebyrank(b"z", -2, -1).unwrap(), 2);
        assert_eq!(s.zcard(b"z").unwrap(), 3);
    }

    #[test]
    fn zrevrange_windows() {
        let mut s = server();
        s.zadd(b"z", &[(1.0, b"a"), (2.0, b"b"), (3.0, b"c"), (4.0, b"d")]).unwrap();
        assert_eq!(members(s.zrevrange(b"z", 0, 1).unwrap()), vec!["d", "c"]);
        assert_eq!(members(s.zrevrange(b"z", 0, -1).unwrap()), vec!["d", "c", "b", "a"]);
        assert_eq!(members(s.zrevrange(b"z", -2, -1).unwrap()), vec!["b", "a"]);
    }

    #[test]
    fn zincrby_accumulates() {
        let mut s = server();
        assert_eq!(s.zincrby(b"z", 2.5, b"m").unwrap(), 2.5);
        assert_eq!(s.zincrby(b"z", 1.5, b"m").unwrap(), 4.0);
        assert_eq!(s.zscore(b"z", b"m").unwrap(), Some(4.0));
        assert_eq!(s.zcard(b"z").unwrap(), 1);
    }

    #[test]
    fn wrong_type_propagates() {
        let mut s = server();
        s.set(b"str", b"v");
        assert!(matches!(s.zadd(b"str", &[(1.0, b"a")]), Err(Error::WrongType)));
        assert!(matches!(s.zcard(b"str"), Err(Error::WrongType)));
    }
}
