// types/set.rs — Set commands and set algebra.
//
// Sets hold at most one of each member. All-integer sets live in the sorted
// integer array until a non-integer member arrives or the count crosses the
// configured threshold; both promote to the hash-table form for good.
//
// The algebra follows the classic cost-aware shapes: intersection walks the
// smallest input and probes the others, difference picks between
// iterate-and-probe and copy-and-erase on a cost estimate, union just feeds
// everything through the deduplicating insert.

use crate::db::Server;
use crate::dict::Dict;
use crate::error::{Error, Result};
use crate::obj::{SetVal, Value};
use crate::sds::Sds;
use crate::util;

fn as_set(value: &Value) -> Result<&SetVal> {
    match value {
        Value::Set(s) => Ok(s),
        _ => Err(Error::WrongType),
    }
}

fn as_set_mut(value: &mut Value) -> Result<&mut SetVal> {
    match value {
        Value::Set(s) => Ok(s),
        _ => Err(Error::WrongType),
    }
}

/// A member seen during iteration, preserving integer-ness so probes against
/// integer-array sets skip the text round trip.
#[derive(Clone)]
pub(crate) enum SetMember<'a> {
    Int(i64),
    Str(&'a [u8]),
}

impl SetMember<'_> {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        match self {
            SetMember::Int(v) => util::format_i64(*v),
            SetMember::Str(b) => b.to_vec(),
        }
    }
}

pub(crate) fn iter_members<'a>(s: &'a SetVal) -> Box<dyn Iterator<Item = SetMember<'a>> + 'a> {
    match s {
        SetVal::Ints(ints) => Box::new(ints.iter().map(SetMember::Int)),
        SetVal::Table(d) => Box::new(d.keys().map(|k| SetMember::Str(k.as_bytes()))),
    }
}

pub(crate) fn contains_member(s: &SetVal, m: &SetMember<'_>) -> bool {
    match (s, m) {
        (SetVal::Ints(ints), SetMember::Int(v)) => ints.contains(*v),
        (SetVal::Ints(ints), SetMember::Str(b)) => {
            util::parse_i64(b).is_some_and(|v| ints.contains(v))
        }
        (SetVal::Table(d), SetMember::Int(v)) => d.contains(util::format_i64(*v).as_slice()),
        (SetVal::Table(d), SetMember::Str(b)) => d.contains(*b),
    }
}

fn contains_bytes(s: &SetVal, member: &[u8]) -> bool {
    contains_member(s, &SetMember::Str(member))
}

/// Deduplicating insert with the promotion rules applied.
pub(crate) fn set_add(s: &mut SetVal, member: &[u8], max_intset: usize) -> bool {
    match s {
        SetVal::Ints(ints) => match util::parse_i64(member) {
            Some(v) => {
                let added = ints.insert(v);
                if added && ints.len() > max_intset {
                    s.convert();
                }
                added
            }
            None => {
                s.convert();
                set_add(s, member, max_intset)
            }
        },
        SetVal::Table(d) => d.add(Sds::from_bytes(member), ()),
    }
}

fn set_remove(s: &mut SetVal, member: &[u8]) -> bool {
    match s {
        SetVal::Ints(ints) => util::parse_i64(member).is_some_and(|v| ints.remove(v)),
        SetVal::Table(d) => d.remove(member).is_some(),
    }
}

fn set_random(s: &SetVal) -> Option<Vec<u8>> {
    match s {
        SetVal::Ints(ints) => {
            if ints.is_empty() {
                None
            } else {
                Some(util::format_i64(ints.random()))
            }
        }
        SetVal::Table(d) => d.random_entry().map(|(k, _)| k.as_bytes().to_vec()),
    }
}

/// New empty set under the encoding `first_member` admits.
fn set_for_first(first_member: &[u8]) -> Value {
    if util::parse_i64(first_member).is_some() {
        Value::empty_intset()
    } else {
        Value::empty_set_table()
    }
}

impl Server {
    pub fn sadd(&mut self, key: &[u8], members: &[&[u8]]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let max_intset = self.config.set_max_intset_entries;
        if self.lookup_write(key).is_none() {
            self.db_mut().dict.add(Sds::from_bytes(key), set_for_first(members[0]));
        }
        let set = as_set_mut(self.db_mut().dict.get_mut(key).expect("set materialized"))?;
        let mut added = 0usize;
        for m in members {
            if set_add(set, m, max_intset) {
                added += 1;
            }
        }
        self.dirty += added as u64;
        Ok(added)
    }

    pub fn srem(&mut self, key: &[u8], members: &[&[u8]]) -> Result<usize> {
        let removed = match self.lookup_write(key) {
            None => return Ok(0),
            Some(v) => {
                let set = as_set_mut(v)?;
                members.iter().filter(|m| set_remove(set, m)).count()
            }
        };
        if removed > 0 {
            self.dirty += removed as u64;
            if as_set(self.db().dict.get(key).expect("set present"))?.is_empty() {
                self.delete_key(key);
            }
        }
        Ok(removed)
    }

    pub fn sismember(&mut self, key: &[u8], member: &[u8]) -> Result<bool> {
        match self.lookup_read(key) {
            None => Ok(false),
            Some(v) => Ok(contains_bytes(as_set(v)?, member)),
        }
    }

    pub fn scard(&mut self, key: &[u8]) -> Result<usize> {
        match self.lookup_read(key) {
            None => Ok(0),
            Some(v) => Ok(as_set(v)?.len()),
        }
    }

    pub fn smembers(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.lookup_read(key) {
            None => Ok(Vec::new()),
            Some(v) => Ok(iter_members(as_set(v)?).map(|m| m.to_bytes()).collect()),
        }
    }

    /// Removes and returns a random member.
    pub fn spop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let popped = match self.lookup_write(key) {
            None => return Ok(None),
            Some(v) => {
                let set = as_set_mut(v)?;
                match set_random(set) {
                    None => None,
                    Some(m) => {
                        set_remove(set, &m);
                        Some(m)
                    }
                }
            }
        };
        if popped.is_some() {
            self.dirty += 1;
            if as_set(self.db().dict.get(key).expect("set present"))?.is_empty() {
                self.delete_key(key);
            }
        }
        Ok(popped)
    }

    /// One random member, without removal.
    pub fn srandmember(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup_read(key) {
            None => Ok(None),
            Some(v) => Ok(set_random(as_set(v)?)),
        }
    }

    /// Random members by count: negative counts sample with replacement,
    /// a count covering the set returns everything, and the two positive
    /// sub-cases pick between erase-down-to-n and draw-up-to-n on the
    /// count-to-cardinality ratio.
    pub fn srandmember_count(&mut self, key: &[u8], count: i64) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let set = match self.lookup_read(key) {
            None => return Ok(Vec::new()),
            Some(v) => as_set(v)?,
        };
        let size = set.len();

        if count < 0 {
            let n = count.unsigned_abs() as usize;
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                out.push(set_random(set).expect("set not empty"));
            }
            return Ok(out);
        }

        let count = count as usize;
        if count >= size {
            return Ok(iter_members(set).map(|m| m.to_bytes()).collect());
        }

        if count * 3 > size {
            // Close to the full set: copy everything and evict random
            // members until `count` remain.
            let mut working: Dict<Sds, ()> = Dict::new();
            for m in iter_members(set) {
                working.add(Sds::from(m.to_bytes()), ());
            }
            while working.len() > count {
                let victim = working.random_entry().map(|(k, _)| k.clone()).unwrap();
                working.remove(victim.as_bytes());
            }
            return Ok(working.keys().map(|k| k.as_bytes().to_vec()).collect());
        }

        // Sparse case: draw until we hold `count` distinct members.
        let mut working: Dict<Sds, ()> = Dict::new();
        while working.len() < count {
            let m = set_random(set).expect("set not empty");
            working.add(Sds::from(m), ());
        }
        Ok(working.keys().map(|k| k.as_bytes().to_vec()).collect())
    }

    // -- algebra -----------------------------------------------------------

    /// Resolves `keys` into set references, expiring lazily first.
    /// `None` in the result marks an absent key.
    fn resolve_sets<'a>(&'a mut self, keys: &[&[u8]]) -> Result<Vec<Option<&'a SetVal>>> {
        for k in keys {
            self.expire_if_needed(k);
        }
        let db = self.db();
        let mut sets = Vec::with_capacity(keys.len());
        for k in keys {
            match db.dict.get(*k) {
                None => sets.push(None),
                Some(v) => sets.push(Some(as_set(v)?)),
            }
        }
        Ok(sets)
    }

    /// Intersection of the named sets. Any absent key empties the result.
    pub fn sinter(&mut self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let resolved = self.resolve_sets(keys)?;
        let mut sets = Vec::with_capacity(resolved.len());
        for s in resolved {
            match s {
                None => return Ok(Vec::new()),
                Some(s) => sets.push(s),
            }
        }
        // Walk the smallest set, probing the others.
        sets.sort_by_key(|s| s.len());
        let (smallest, rest) = sets.split_first().expect("at least one set");
        let mut out = Vec::new();
        'members: for m in iter_members(smallest) {
            for other in rest {
                if !contains_member(other, &m) {
                    continue 'members;
                }
            }
            out.push(m.to_bytes());
        }
        Ok(out)
    }

    /// Union of the named sets, deduplicated.
    pub fn sunion(&mut self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let max_intset = self.config.set_max_intset_entries;
        let resolved = self.resolve_sets(keys)?;
        let mut acc = Value::empty_intset();
        {
            let acc_set = as_set_mut(&mut acc).expect("accumulator is a set");
            for s in resolved.into_iter().flatten() {
                for m in iter_members(s) {
                    set_add(acc_set, &m.to_bytes(), max_intset);
                }
            }
        }
        Ok(iter_members(as_set(&acc)?).map(|m| m.to_bytes()).collect())
    }

    /// Difference `keys[0]` minus the rest. Chooses between walking the
    /// first set with membership probes (cost |A| * k / 2) and copying the
    /// first set then erasing members of the others (cost sum of all
    /// cardinalities), whichever estimates cheaper.
    pub fn sdiff(&mut self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let max_intset = self.config.set_max_intset_entries;
        let resolved = self.resolve_sets(keys)?;
        let Some(first) = resolved[0] else {
            return Ok(Vec::new());
        };

        let algo_one_work: usize = resolved.iter().flatten().map(|_| first.len()).sum::<usize>() / 2;
        let algo_two_work: usize = resolved.iter().flatten().map(|s| s.len()).sum();

        if algo_one_work <= algo_two_work {
            // Probe-per-member; checking the biggest subtrahends first
            // fails fast.
            let mut rest: Vec<&SetVal> = resolved[1..].iter().flatten().copied().collect();
            rest.sort_by(|a, b| b.len().cmp(&a.len()));
            let mut out = Vec::new();
            'members: for m in iter_members(first) {
                for other in &rest {
                    if contains_member(other, &m) {
                        continue 'members;
                    }
                }
                out.push(m.to_bytes());
            }
            Ok(out)
        } else {
            // Copy-and-erase.
            let mut acc = Value::empty_intset();
            let acc_set = as_set_mut(&mut acc).expect("accumulator is a set");
            for m in iter_members(first) {
                set_add(acc_set, &m.to_bytes(), max_intset);
            }
            for s in resolved[1..].iter().flatten() {
                for m in iter_members(s) {
                    set_remove(acc_set, &m.to_bytes());
                }
            }
            Ok(iter_members(acc_set).map(|m| m.to_bytes()).collect())
        }
    }

    /// Stores `members` at `dest` under the smallest admissible encoding,
    /// deleting `dest` when the result is empty. Returns the cardinality.
    fn store_set_result(&mut self, dest: &[u8], members: Vec<Vec<u8>>) -> usize {
        if members.is_empty() {
            self.delete_key(dest);
            return 0;
        }
        let max_intset = self.config.set_max_intset_entries;
        let mut value = set_for_first(&members[0]);
        {
            let set = as_set_mut(&mut value).expect("fresh set");
            for m in &members {
                set_add(set, m, max_intset);
            }
        }
        let len = members.len();
        self.set_value(dest, value);
        len
    }

    pub fn sinterstore(&mut self, dest: &[u8], keys: &[&[u8]]) -> Result<usize> {
        let members = self.sinter(keys)?;
        Ok(self.store_set_result(dest, members))
    }

    pub fn sunionstore(&mut self, dest: &[u8], keys: &[&[u8]]) -> Result<usize> {
        let members = self.sunion(keys)?;
        Ok(self.store_set_result(dest, members))
    }

    pub fn sdiffstore(&mut self, dest: &[u8], keys: &[&[u8]]) -> Result<usize> {
        let members = self.sdiff(keys)?;
        Ok(self.store_set_result(dest, members))
    }
}
