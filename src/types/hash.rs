// types/hash.rs — Hash commands.
//
// Hashes are a packed entry list of alternating field, value entries until a
// field or value exceeds the configured byte threshold or the field count
// crosses the entries threshold; then they become a hash table for good.
// The length check looks only at the arguments of the current operation,
// never retrospectively at stored content.

use crate::db::Server;
use crate::error::{Error, Result};
use crate::obj::{HashVal, Value};
use crate::sds::Sds;
use crate::util;
use crate::ziplist::{End, Ziplist};

fn as_hash(value: &Value) -> Result<&HashVal> {
    match value {
        Value::Hash(h) => Ok(h),
        _ => Err(Error::WrongType),
    }
}

fn as_hash_mut(value: &mut Value) -> Result<&mut HashVal> {
    match value {
        Value::Hash(h) => Ok(h),
        _ => Err(Error::WrongType),
    }
}

/// Offset of the field entry for `field`, scanning only even positions.
fn zl_find_field(zl: &Ziplist, field: &[u8]) -> Option<usize> {
    let head = zl.index(0)?;
    zl.find(head, field, 1)
}

fn zl_get_value(zl: &Ziplist, field: &[u8]) -> Option<Vec<u8>> {
    let fp = zl_find_field(zl, field)?;
    let vp = zl.next(fp).expect("field without value");
    Some(zl.get(vp).to_bytes())
}

/// Sets a field in the packed form, returning `true` when newly added.
fn zl_set(zl: &mut Ziplist, field: &[u8], value: &[u8]) -> bool {
    match zl_find_field(zl, field) {
        Some(fp) => {
            // Replace the value entry in place.
            let vp = zl.next(fp).expect("field without value");
            let at = zl.delete(vp);
            zl.insert_at(at, value);
            false
        }
        None => {
            zl.push(field, End::Tail);
            zl.push(value, End::Tail);
            true
        }
    }
}

impl Server {
    fn hset_generic(&mut self, key: &[u8], field: &[u8], value: &[u8], nx: bool) -> Result<bool> {
        let max_entries = self.config.hash_max_ziplist_entries;
        let max_value = self.config.hash_max_ziplist_value;

        if self.lookup_write(key).is_none() {
            self.db_mut().dict.add(Sds::from_bytes(key), Value::empty_hash());
        }
        let hash = as_hash_mut(self.db_mut().dict.get_mut(key).expect("hash materialized"))?;

        // Argument-length rule: promote before storing an oversized pair.
        if matches!(hash, HashVal::Zip(_))
            && (field.len() > max_value || value.len() > max_value)
        {
            hash.convert();
        }

        let added = match hash {
            HashVal::Zip(zl) => {
                if nx && zl_find_field(zl, field).is_some() {
                    return Ok(false);
                }
                let added = zl_set(zl, field, value);
                if zl.len() / 2 > max_entries {
                    hash.convert();
                }
                added
            }
            HashVal::Table(d) => {
                if nx && d.contains(field) {
                    return Ok(false);
                }
                d.insert(Sds::from_bytes(field), Sds::from_bytes(value)).is_none()
            }
        };
        self.dirty += 1;
        Ok(added)
    }

    /// Sets a field; returns `true` when the field was newly created.
    pub fn hset(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        self.hset_generic(key, field, value, false)
    }

    /// Sets a field only when absent.
    pub fn hsetnx(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        self.hset_generic(key, field, value, true)
    }

    pub fn hmset(&mut self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> Result<()> {
        for (f, v) in pairs {
            self.hset(key, f, v)?;
        }
        Ok(())
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup_read(key) {
            None => Ok(None),
            Some(v) => Ok(match as_hash(v)? {
                HashVal::Zip(zl) => zl_get_value(zl, field),
                HashVal::Table(d) => d.get(field).map(|s| s.as_bytes().to_vec()),
            }),
        }
    }

    pub fn hmget(&mut self, key: &[u8], fields: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        match self.lookup_read(key) {
            None => Ok(fields.iter().map(|_| None).collect()),
            Some(v) => {
                let hash = as_hash(v)?;
                Ok(fields
                    .iter()
                    .map(|f| match hash {
                        HashVal::Zip(zl) => zl_get_value(zl, f),
                        HashVal::Table(d) => d.get(*f).map(|s| s.as_bytes().to_vec()),
                    })
                    .collect())
            }
        }
    }

    pub fn hexists(&mut self, key: &[u8], field: &[u8]) -> Result<bool> {
        match self.lookup_read(key) {
            None => Ok(false),
            Some(v) => Ok(match as_hash(v)? {
                HashVal::Zip(zl) => zl_find_field(zl, field).is_some(),
                HashVal::Table(d) => d.contains(field),
            }),
        }
    }

    pub fn hlen(&mut self, key: &[u8]) -> Result<usize> {
        match self.lookup_read(key) {
            None => Ok(0),
            Some(v) => Ok(as_hash(v)?.len()),
        }
    }

    pub fn hdel(&mut self, key: &[u8], fields: &[&[u8]]) -> Result<usize> {
        let deleted = match self.lookup_write(key) {
            None => return Ok(0),
            Some(v) => {
                let hash = as_hash_mut(v)?;
                let mut deleted = 0usize;
                for f in fields {
                    match hash {
                        HashVal::Zip(zl) => {
                            if let Some(fp) = zl_find_field(zl, f) {
                                let at = zl.delete(fp);
                                zl.delete(at);
                                deleted += 1;
                            }
                        }
                        HashVal::Table(d) => {
                            if d.remove(*f).is_some() {
                                deleted += 1;
                            }
                        }
                    }
                }
                deleted
            }
        };
        if deleted > 0 {
            self.dirty += deleted as u64;
            if as_hash(self.db().dict.get(key).expect("hash present"))?.is_empty() {
                self.delete_key(key);
            }
        }
        Ok(deleted)
    }

    pub fn hgetall(&mut self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match self.lookup_read(key) {
            None => Ok(Vec::new()),
            Some(v) => Ok(match as_hash(v)? {
                HashVal::Zip(zl) => {
                    let mut out = Vec::with_capacity(zl.len() / 2);
                    let mut it = zl.iter();
                    while let Some(f) = it.next() {
                        let val = it.next().expect("field without value");
                        out.push((f.to_bytes(), val.to_bytes()));
                    }
                    out
                }
                HashVal::Table(d) => d
                    .iter()
                    .map(|(f, v)| (f.as_bytes().to_vec(), v.as_bytes().to_vec()))
                    .collect(),
            }),
        }
    }

    pub fn hkeys(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(f, _)| f).collect())
    }

    pub fn hvals(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(_, v)| v).collect())
    }

    /// Adds `delta` to the integer stored at `field` (0 when absent).
    pub fn hincrby(&mut self, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        let current = match self.hget(key, field)? {
            None => 0,
            Some(raw) => util::parse_i64(&raw).ok_or(Error::NotInteger)?,
        };
        let next = current.checked_add(delta).ok_or(Error::NotInteger)?;
        self.hset(key, field, &util::format_i64(next))?;
        Ok(next)
    }

    /// Adds a float `delta` to the field (0 when absent) and stores the
    /// formatted result, which is also what a downstream log must record:
    /// the textual stored value, not the increment, so replicas cannot
    /// drift on float precision. Returns the stored bytes.
    pub fn hincrbyfloat(&mut self, key: &[u8], field: &[u8], delta: f64) -> Result<Vec<u8>> {
        let current = match self.hget(key, field)? {
            None => 0.0,
            Some(raw) => util::parse_f64(&raw).ok_or(Error::NotFloat)?,
        };
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(Error::NotFloat);
        }
        let formatted = util::format_f64(next);
        self.hset(key, field, &formatted)?;
        Ok(formatted)
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

    #[test]
    fn hset_hget_basics() {
        let mut s = server();
        assert!(s.hset(b"h", b"f", b"v").unwrap());
        assert!(!s.hset(b"h", b"f", b"v2").unwrap());
        assert_eq!(s.hget(b"h", b"f").unwrap().unwrap(), b"v2");
        assert_eq!(s.hget(b"h", b"zz").unwrap(), None);
        assert_eq!(s.hget(b"missing", b"f").unwrap(), None);
        assert!(s.hexists(b"h", b"f").unwrap());
        assert_eq!(s.hlen(b"h").unwrap(), 1);
    }

    #[test]
    fn value_length_boundary_promotes() {
        let mut s = server();
        s.hset(b"h", b"f", b"v").unwrap();
        assert_eq!(encoding_of(&mut s, b"h"), Encoding::ZipList);
        // Exactly 64 bytes stays packed.
        let at_limit = vec![b'x'; 64];
        s.hset(b"h", b"f2", &at_limit).unwrap();
        assert_eq!(encoding_of(&mut s, b"h"), Encoding::ZipList);
        // 65 bytes promotes.
        let over = vec![b'x'; 65];
        s.hset(b"h", b"f3", &over).unwrap();
        assert_eq!(encoding_of(&mut s, b"h"), Encoding::HashTable);
        assert_eq!(s.hlen(b"h").unwrap(), 3);
        assert_eq!(s.hget(b"h", b"f3").unwrap().unwrap(), over);
    }

    #[test]
    fn long_field_name_promotes_too() {
        let mut s = server();
        let long_field = vec![b'f'; 100];
        s.hset(b"h", &long_field, b"v").unwrap();
        assert_eq!(encoding_of(&mut s, b"h"), Encoding::HashTable);
    }

    #[test]
    fn count_threshold_promotes() {
        let mut s = server();
        s.config.hash_max_ziplist_entries = 4;
        for i in 0..4 {
            s.hset(b"h", format!("f{}", i).as_bytes(), b"v").unwrap();
        }
        assert_eq!(encoding_of(&mut s, b"h"), Encoding::ZipList);
        s.hset(b"h", b"f4", b"v").unwrap();
        assert_eq!(encoding_of(&mut s, b"h"), Encoding::HashTable);
        // Deleting back below the threshold does not re-pack.
        s.hdel(b"h", &[b"f4", b"f3"]).unwrap();
        assert_eq!(encoding_of(&mut s, b"h"), Encoding::HashTable);
    }

    #[test]
    fn hsetnx_respects_existing() {
        let mut s = server();
        assert!(s.hsetnx(b"h", b"f", b"1").unwrap());
        assert!(!s.hsetnx(b"h", b"f", b"2").unwrap());
        assert_eq!(s.hget(b"h", b"f").unwrap().unwrap(), b"1");
    }

    #[test]
    fn hdel_deletes_empty_key() {
        let mut s = server();
        s.hmset(b"h", &[(b"a".as_slice(), b"1".as_slice()), (b"b", b"2")]).unwrap();
        assert_eq!(s.hdel(b"h", &[b"a", b"zz"]).unwrap(), 1);
        assert_eq!(s.hdel(b"h", &[b"b"]).unwrap(), 1);
        assert!(!s.exists(b"h"));
    }

    #[test]
    fn hgetall_pairs() {
        let mut s = server();
        s.hmset(b"h", &[(b"f1".as_slice(), b"v1".as_slice()), (b"f2", b"v2")]).unwrap();
        let mut all = s.hgetall(b"h").unwrap();
        all.sort();
        assert_eq!(all, vec![
            (b"f1".to_vec(), b"v1".to_vec()),
            (b"f2".to_vec(), b"v2".to_vec()),
        ]);
        let mut keys = s.hkeys(b"h").unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"f1".to_vec(), b"f2".to_vec()]);
    }

    #[test]
    fn hmget_preserves_positions() {
        let mut s = server();
        s.hset(b"h", b"a", b"1").unwrap();
        let got = s.hmget(b"h", &[b"a", b"zz", b"a"]).unwrap();
        assert_eq!(got, vec![Some(b"1".to_vec()), None, Some(b"1".to_vec())]);
    }

    #[test]
    fn field_value_scan_does_not_cross_lanes() {
        let mut s = server();
        // A value that equals another field name must not be found as a
        // field.
        s.hset(b"h", b"name", b"color").unwrap();
        s.hset(b"h", b"color", b"red").unwrap();
        assert_eq!(s.hget(b"h", b"color").unwrap().unwrap(), b"red");
        assert!(!s.hexists(b"h", b"red").unwrap());
    }

    #[test]
    fn hincrby_arithmetic() {
        let mut s = server();
        assert_eq!(s.hincrby(b"h", b"n", 5).unwrap(), 5);
        assert_eq!(s.hincrby(b"h", b"n", -7).unwrap(), -2);
        // Parse failures and overflow report the same kind the string
        // counters use.
        s.hset(b"h", b"s", b"abc").unwrap();
        assert!(matches!(s.hincrby(b"h", b"s", 1), Err(Error::NotInteger)));
        s.hset(b"h", b"max", format!("{}", i64::MAX).as_bytes()).unwrap();
        assert!(matches!(s.hincrby(b"h", b"max", 1), Err(Error::NotInteger)));
    }

    #[test]
    fn hincrbyfloat_stores_formatted_result() {
        let mut s = server();
        assert_eq!(s.hincrbyfloat(b"h", b"x", 10.5).unwrap(), b"10.5");
        assert_eq!(s.hincrbyfloat(b"h", b"x", 0.25).unwrap(), b"10.75");
        // The stored value is the formatted text.
        assert_eq!(s.hget(b"h", b"x").unwrap().unwrap(), b"10.75");
        s.hset(b"h", b"s", b"abc").unwrap();
        assert!(matches!(s.hincrbyfloat(b"h", b"s", 1.0), Err(Error::NotFloat)));
    }

    #[test]
    fn wrong_type_propagates() {
        let mut s = server();
        s.set(b"str", b"v");
        assert!(matches!(s.hset(b"str", b"f", b"v"), Err(Error::WrongType)));
        assert!(matches!(s.hget(b"str", b"f"), Err(Error::WrongType)));
    }
}
