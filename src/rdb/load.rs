// rdb/load.rs — Streaming snapshot loader.
//
// The loader consumes records in order, rebuilding each value under the most
// compact admissible encoding and promoting mid-stream the moment a natural
// form crosses a threshold (a hash that meets a 65-byte value while loading
// packed converts and continues in the table form). Compact forms ingest the
// blob after structural validation, then run the same promotion check as a
// post-condition, so a file written under looser thresholds still obeys the
// configured ones after loading.
//
// Any structural problem aborts the whole load with a format error; the
// in-memory state is undefined afterwards and the caller should discard it.

use std::fs::File;

use log::{info, warn};

use crate::config::Config;
use crate::db::{mstime, Server};
use crate::error::{Error, Result};
use crate::intset::IntSet;
use crate::obj::{HashVal, ListVal, SetVal, Value, ZsetVal};
use crate::rdb;
use crate::rio::Rio;
use crate::sds::Sds;
use crate::types::set::set_add;
use crate::types::zset::zzl_insert;
use crate::ziplist::{End, Ziplist};

fn load_list(r: &mut Rio, config: &Config) -> Result<Value> {
    let len = rdb::read_plain_length(r)?;
    let mut list = ListVal::Zip(Ziplist::new());
    for _ in 0..len {
        let element = rdb::read_string(r)?;
        if matches!(list, ListVal::Zip(_)) && element.len() > config.list_max_ziplist_value {
            list.convert();
        }
        match &mut list {
            ListVal::Zip(zl) => zl.push(&element, End::Tail),
            ListVal::Linked(items) => items.push_back(Sds::from(element)),
        }
        if matches!(&list, ListVal::Zip(_)) && list.len() > config.list_max_ziplist_entries {
            list.convert();
        }
    }
    Ok(Value::List(list))
}

fn load_set(r: &mut Rio, config: &Config) -> Result<Value> {
    let len = rdb::read_plain_length(r)? as usize;
    // A set bigger than the integer-array ceiling goes straight to the
    // table; otherwise start compact and let the inserts promote.
    let mut set = if len > config.set_max_intset_entries {
        SetVal::Table(crate::dict::Dict::new())
    } else {
        SetVal::Ints(IntSet::new())
    };
    for _ in 0..len {
        let member = rdb::read_string(r)?;
        set_add(&mut set, &member, config.set_max_intset_entries);
    }
    Ok(Value::Set(set))
}

fn load_zset(r: &mut Rio, config: &Config) -> Result<Value> {
    let len = rdb::read_plain_length(r)?;
    let mut zset = ZsetVal::Zip(Ziplist::new());
    for _ in 0..len {
        let member = rdb::read_string(r)?;
        let score = rdb::read_double(r)?;
        if matches!(zset, ZsetVal::Zip(_))
            && (member.len() > config.zset_max_ziplist_value
                || zset.len() >= config.zset_max_ziplist_entries)
        {
            zset.convert();
        }
        match &mut zset {
            ZsetVal::Zip(zl) => zzl_insert(zl, &member, score),
            ZsetVal::Skip(full) => {
                let m = Sds::from(member);
                full.zsl.insert(score, m.clone());
                full.dict.insert(m, score);
            }
        }
    }
    Ok(Value::Zset(zset))
}

fn load_hash(r: &mut Rio, config: &Config) -> Result<Value> {
    let len = rdb::read_plain_length(r)?;
    let mut hash = HashVal::Zip(Ziplist::new());
    for _ in 0..len {
        let field = rdb::read_string(r)?;
        let value = rdb::read_string(r)?;
        if matches!(hash, HashVal::Zip(_))
            && (field.len() > config.hash_max_ziplist_value
                || value.len() > config.hash_max_ziplist_value
                || hash.len() >= config.hash_max_ziplist_entries)
        {
            hash.convert();
        }
        match &mut hash {
            HashVal::Zip(zl) => {
                zl.push(&field, End::Tail);
                zl.push(&value, End::Tail);
            }
            HashVal::Table(d) => {
                d.insert(Sds::from(field), Sds::from(value));
            }
        }
    }
    Ok(Value::Hash(hash))
}

/// Post-condition promotion for compact blobs: the just-loaded value may
/// exceed the currently configured thresholds.
fn check_loaded_thresholds(value: &mut Value, config: &Config) {
    match value {
        Value::List(list @ ListVal::Zip(_)) => {
            let too_long = match list {
                ListVal::Zip(zl) => {
                    zl.len() > config.list_max_ziplist_entries
                        || zl.iter().any(|e| e.byte_len() > config.list_max_ziplist_value)
                }
                ListVal::Linked(_) => false,
            };
            if too_long {
                list.convert();
            }
        }
        Value::Set(set @ SetVal::Ints(_)) => {
            if set.len() > config.set_max_intset_entries {
                set.convert();
            }
        }
        Value::Zset(zset @ ZsetVal::Zip(_)) => {
            let too_long = match zset {
                ZsetVal::Zip(zl) => {
                    zl.len() / 2 > config.zset_max_ziplist_entries
                        || zl
                            .iter()
                            .step_by(2)
                            .any(|m| m.byte_len() > config.zset_max_ziplist_value)
                }
                ZsetVal::Skip(_) => false,
            };
            if too_long {
                zset.convert();
            }
        }
        Value::Hash(hash @ HashVal::Zip(_)) => {
            let too_long = match hash {
                HashVal::Zip(zl) => {
                    zl.len() / 2 > config.hash_max_ziplist_entries
                        || zl.iter().any(|e| e.byte_len() > config.hash_max_ziplist_value)
                }
                HashVal::Table(_) => false,
            };
            if too_long {
                hash.convert();
            }
        }
        _ => {}
    }
}

fn load_object(r: &mut Rio, opcode: u8, config: &Config) -> Result<Value> {
    match opcode {
        rdb::TYPE_STRING => Ok(Value::from_bytes(&rdb::read_string(r)?)),
        rdb::TYPE_LIST => load_list(r, config),
        rdb::TYPE_SET => load_set(r, config),
        rdb::TYPE_ZSET => load_zset(r, config),
        rdb::TYPE_HASH => load_hash(r, config),
        rdb::TYPE_LIST_ZIPLIST => {
            let blob = rdb::read_string(r)?;
            let mut value = Value::List(ListVal::Zip(Ziplist::from_bytes(blob)?));
            check_loaded_thresholds(&mut value, config);
            Ok(value)
        }
        rdb::TYPE_SET_INTSET => {
            let blob = rdb::read_string(r)?;
            let mut value = Value::Set(SetVal::Ints(IntSet::from_bytes(blob)?));
            check_loaded_thresholds(&mut value, config);
            Ok(value)
        }
        rdb::TYPE_ZSET_ZIPLIST => {
            let blob = rdb::read_string(r)?;
            let zl = Ziplist::from_bytes(blob)?;
            if zl.len() % 2 != 0 {
                return Err(Error::corrupt("sorted-set blob holds a dangling member"));
            }
            // Score entries must actually be scores before anything trusts
            // them.
            for entry in zl.iter().skip(1).step_by(2) {
                let numeric = entry.as_i64().is_some()
                    || crate::util::parse_f64(&entry.to_bytes()).is_some();
                if !numeric {
                    return Err(Error::corrupt("sorted-set blob holds a malformed score"));
                }
            }
            let mut value = Value::Zset(ZsetVal::Zip(zl));
            check_loaded_thresholds(&mut value, config);
            Ok(value)
        }
        rdb::TYPE_HASH_ZIPLIST => {
            let blob = rdb::read_string(r)?;
            let zl = Ziplist::from_bytes(blob)?;
            if zl.len() % 2 != 0 {
                return Err(Error::corrupt("hash blob holds a dangling field"));
            }
            let mut value = Value::Hash(HashVal::Zip(zl));
            check_loaded_thresholds(&mut value, config);
            Ok(value)
        }
        rdb::TYPE_HASH_ZIPMAP => Err(Error::corrupt("legacy zipmap record not supported")),
        other => Err(Error::Corrupt(format!("unknown value type opcode {}", other))),
    }
}

/// Streams a snapshot out of `rio` into the server. `as_replica` makes
/// past-due expirations authoritative (keys are loaded anyway) instead of
/// dropping the keys.
pub fn load_from_rio(server: &mut Server, rio: &mut Rio, as_replica: bool) -> Result<()> {
    // The checksum runs over every byte from the magic on.
    rio.enable_checksum();

    let mut header = [0u8; 9];
    rio.read(&mut header)?;
    if &header[0..5] != rdb::MAGIC {
        return Err(Error::corrupt("wrong signature"));
    }
    let version: u32 = std::str::from_utf8(&header[5..9])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::corrupt("malformed version field"))?;
    if !(rdb::MIN_VERSION..=rdb::VERSION).contains(&version) {
        return Err(Error::Corrupt(format!("unsupported format version {}", version)));
    }

    let config = server.config.clone();
    let mut dbid = 0usize;
    let mut expire_at: Option<u64> = None;
    let now = mstime();
    let mut loaded = 0usize;

    loop {
        let opcode = rio.read_u8()?;
        match opcode {
            rdb::OP_EXPIRETIME => {
                let mut buf = [0u8; 4];
                rio.read(&mut buf)?;
                expire_at = Some(u32::from_le_bytes(buf) as u64 * 1000);
                continue;
            }
            rdb::OP_EXPIRETIME_MS => {
                let mut buf = [0u8; 8];
                rio.read(&mut buf)?;
                expire_at = Some(u64::from_le_bytes(buf));
                continue;
            }
            rdb::OP_SELECTDB => {
                let id = rdb::read_plain_length(rio)? as usize;
                if id >= server.db_count() {
                    return Err(Error::corrupt("database index beyond configured count"));
                }
                dbid = id;
                continue;
            }
            rdb::OP_EOF => break,
            type_opcode => {
                let key = rdb::read_string(rio)?;
                let value = load_object(rio, type_opcode, &config)?;
                let this_expire = expire_at.take();

                // A primary drops keys that died while the file sat on
                // disk; a replica trusts its primary to send the delete.
                if let Some(at) = this_expire {
                    if at <= now && !as_replica {
                        continue;
                    }
                }

                let db = server.db_at_mut(dbid);
                db.dict.insert(Sds::from(key.clone()), value);
                if let Some(at) = this_expire {
                    db.expires.insert(Sds::from(key), at);
                }
                loaded += 1;
            }
        }
    }

    if version >= rdb::CHECKSUM_VERSION && config.rdb_checksum {
        let expected = rio.checksum();
        let mut buf = [0u8; 8];
        rio.read(&mut buf)?;
        let stored = u64::from_le_bytes(buf);
        if stored == 0 {
            warn!("snapshot has no checksum; skipping verification");
        } else if stored != expected {
            return Err(Error::corrupt("checksum mismatch"));
        }
    }

    info!("loaded {} keys from snapshot (format version {})", loaded, version);
    Ok(())
}

impl Server {
    /// Loads a snapshot file into this server, acting as primary.
    pub fn load(&mut self, path: &str) -> Result<()> {
        self.load_with(path, false)
    }

    /// Loads with explicit replica semantics for expirations.
    pub fn load_with(&mut self, path: &str, as_replica: bool) -> Result<()> {
        let file = File::open(path)?;
        let mut rio = Rio::file_reader(file);
        load_from_rio(self, &mut rio, as_replica)
    }
}
