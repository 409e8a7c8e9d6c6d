// types/string.rs — String commands.

use crate::db::Server;
use crate::error::{Error, Result};
use crate::obj::{StrVal, Value};
use crate::sds::Sds;
use crate::types::STRING_MAX_BYTES;

/// Borrows the string variant or reports a type mismatch.
fn as_str(value: &Value) -> Result<&StrVal> {
    match value {
        Value::Str(s) => Ok(s),
        _ => Err(Error::WrongType),
    }
}

impl Server {
    /// Stores a string value, clearing any TTL.
    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.set_value(key, Value::from_bytes(value));
    }

    /// Stores only when absent.
    pub fn setnx(&mut self, key: &[u8], value: &[u8]) -> bool {
        self.add_value(key, Value::from_bytes(value))
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup_read(key) {
            None => Ok(None),
            Some(v) => Ok(Some(as_str(v)?.bytes().into_owned())),
        }
    }

    /// Swaps in a new value, returning the old one.
    pub fn getset(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let old = match self.lookup_write(key) {
            None => None,
            Some(v) => Some(as_str(v)?.bytes().into_owned()),
        };
        self.set_value(key, Value::from_bytes(value));
        Ok(old)
    }

    pub fn strlen(&mut self, key: &[u8]) -> Result<usize> {
        match self.lookup_read(key) {
            None => Ok(0),
            Some(v) => Ok(as_str(v)?.len()),
        }
    }

    /// Appends, creating the key when absent. Returns the resulting length.
    /// The mutation forces the raw encoding.
    pub fn append(&mut self, key: &[u8], tail: &[u8]) -> Result<usize> {
        let new_len = match self.lookup_write(key) {
            None => {
                self.set_value(key, Value::from_bytes(tail));
                return Ok(tail.len());
            }
            Some(v) => {
                let s = match v {
                    Value::Str(s) => s,
                    _ => return Err(Error::WrongType),
                };
                if s.len() + tail.len() > STRING_MAX_BYTES {
                    return Err(Error::OutOfRange("string exceeds maximum allowed size"));
                }
                let raw = s.make_raw();
                raw.cat(tail);
                raw.len()
            }
        };
        self.dirty += 1;
        Ok(new_len)
    }

    /// Substring by inclusive indices; negative indices count from the end.
    pub fn getrange(&mut self, key: &[u8], start: i64, end: i64) -> Result<Vec<u8>> {
        let bytes = match self.lookup_read(key) {
            None => return Ok(Vec::new()),
            Some(v) => as_str(v)?.bytes().into_owned(),
        };
        let mut s = Sds::from(bytes);
        s.range(start as isize, end as isize);
        Ok(s.into_vec())
    }

    /// Overwrites bytes starting at `offset`, zero-padding any gap. Returns
    /// the resulting length.
    pub fn setrange(&mut self, key: &[u8], offset: u64, patch: &[u8]) -> Result<usize> {
        let offset = offset as usize;
        if offset + patch.len() > STRING_MAX_BYTES {
            return Err(Error::OutOfRange("string exceeds maximum allowed size"));
        }
        let new_len = match self.lookup_write(key) {
            None => {
                if patch.is_empty() {
                    return Ok(0);
                }
                let mut s = Sds::with_capacity(offset + patch.len());
                s.grow_zero(offset);
                s.cat(patch);
                let len = s.len();
                self.set_value(key, Value::Str(StrVal::Raw(s)));
                return Ok(len);
            }
            Some(v) => {
                let s = match v {
                    Value::Str(s) => s,
                    _ => return Err(Error::WrongType),
                };
                if patch.is_empty() {
                    return Ok(s.len());
                }
                let raw = s.make_raw();
                raw.grow_zero(offset + patch.len());
                raw.as_mut_bytes()[offset..offset + patch.len()].copy_from_slice(patch);
                raw.len()
            }
        };
        self.dirty += 1;
        Ok(new_len)
    }

    /// Adds `delta` to the integer stored at `key` (0 when absent).
    pub fn incr_by(&mut self, key: &[u8], delta: i64) -> Result<i64> {
        let current = match self.lookup_write(key) {
            None => 0,
            Some(v) => as_str(v)?.as_i64().ok_or(Error::NotInteger)?,
        };
        let next = current.checked_add(delta).ok_or(Error::NotInteger)?;
        // Plain overwrite: TTL-preserving unlike SET.
        let db = self.db_mut();
        db.dict.insert(Sds::from_bytes(key), Value::from_i64(next));
        self.dirty += 1;
        Ok(next)
    }

    pub fn incr(&mut self, key: &[u8]) -> Result<i64> {
        self.incr_by(key, 1)
    }

    pub fn decr_by(&mut self, key: &[u8], delta: i64) -> Result<i64> {
        self.incr_by(key, delta.checked_neg().ok_or(Error::NotInteger)?)
    }

    pub fn decr(&mut self, key: &[u8]) -> Result<i64> {
        self.incr_by(key, -1)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::db::{mstime, Server};
    use crate::error::Error;
    use crate::obj::Encoding;

    fn server() -> Server {
        Server::new(Config::default())
    }

    fn encoding_of(s: &mut Server, key: &[u8]) -> Encoding {
        s.lookup_read(key).unwrap().encoding()
    }

    #[test]
    fn set_get() {
        let mut s = server();
        s.set(b"k", b"hello");
        assert_eq!(s.get(b"k").unwrap().unwrap(), b"hello");
        assert_eq!(s.get(b"missing").unwrap(), None);
    }

    #[test]
    fn numeric_strings_store_as_int() {
        let mut s = server();
        s.set(b"n", b"12345");
        assert_eq!(encoding_of(&mut s, b"n"), Encoding::Int);
        s.set(b"nn", b"12345678901234567890123"); // too long for i64
        assert_eq!(encoding_of(&mut s, b"nn"), Encoding::EmbStr);
    }

    #[test]
    fn append_promotes_to_raw() {
        let mut s = server();
        s.set(b"k", b"12");
        assert_eq!(s.append(b"k", b"ab").unwrap(), 4);
        assert_eq!(encoding_of(&mut s, b"k"), Encoding::Raw);
        assert_eq!(s.get(b"k").unwrap().unwrap(), b"12ab");
        // Creation path.
        assert_eq!(s.append(b"fresh", b"xy").unwrap(), 2);
    }

    #[test]
    fn wrong_type_is_reported() {
        let mut s = server();
        s.rpush(b"l", &[b"a"]).unwrap();
        assert!(matches!(s.get(b"l"), Err(Error::WrongType)));
        assert!(matches!(s.append(b"l", b"x"), Err(Error::WrongType)));
        assert!(matches!(s.incr(b"l"), Err(Error::WrongType)));
    }

    #[test]
    fn incr_decr() {
        let mut s = server();
        assert_eq!(s.incr(b"c").unwrap(), 1);
        assert_eq!(s.incr_by(b"c", 41).unwrap(), 42);
        assert_eq!(s.decr(b"c").unwrap(), 41);
        assert_eq!(s.decr_by(b"c", 40).unwrap(), 1);
        s.set(b"s", b"notanumber");
        assert!(matches!(s.incr(b"s"), Err(Error::NotInteger)));
        s.set(b"max", format!("{}", i64::MAX).as_bytes());
        assert!(matches!(s.incr(b"max"), Err(Error::NotInteger)));
    }

    #[test]
    fn incr_preserves_ttl() {
        let mut s = server();
        s.set(b"c", b"1");
        let deadline = mstime() + 60_000;
        s.expire_set(b"c", deadline);
        s.incr(b"c").unwrap();
        assert_eq!(s.expire_get(b"c"), Some(deadline));
    }

    #[test]
    fn getrange_indices() {
        let mut s = server();
        s.set(b"k", b"Hello World");
        assert_eq!(s.getrange(b"k", 0, 4).unwrap(), b"Hello");
        assert_eq!(s.getrange(b"k", -5, -1).unwrap(), b"World");
        assert_eq!(s.getrange(b"k", -1, -1).unwrap(), b"d");
        assert_eq!(s.getrange(b"k", 2, 1).unwrap(), b"");
        assert_eq!(s.getrange(b"k", 100, 100).unwrap(), b"");
        assert_eq!(s.getrange(b"missing", 0, -1).unwrap(), b"");
    }

    #[test]
    fn setrange_pads_with_zeros() {
        let mut s = server();
        assert_eq!(s.setrange(b"k", 5, b"xy").unwrap(), 7);
        assert_eq!(s.get(b"k").unwrap().unwrap(), b"\0\0\0\0\0xy");
        assert_eq!(s.setrange(b"k", 0, b"AB").unwrap(), 7);
        assert_eq!(s.get(b"k").unwrap().unwrap(), b"AB\0\0\0xy");
        // Empty patch on a missing key creates nothing.
        assert_eq!(s.setrange(b"nope", 3, b"").unwrap(), 0);
        assert!(!s.exists(b"nope"));
    }

    #[test]
    fn getset_swaps() {
        let mut s = server();
        assert_eq!(s.getset(b"k", b"new").unwrap(), None);
        assert_eq!(s.getset(b"k", b"newer").unwrap().unwrap(), b"new");
        assert_eq!(s.get(b"k").unwrap().unwrap(), b"newer");
    }

    #[test]
    fn setnx_only_when_absent() {
        let mut s = server();
        assert!(s.setnx(b"k", b"1"));
        assert!(!s.setnx(b"k", b"2"));
        assert_eq!(s.get(b"k").unwrap().unwrap(), b"1");
    }
}
