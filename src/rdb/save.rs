// rdb/save.rs — Snapshot writer.
//
// Values serialize in one of two shapes. Collections living in their general
// encoding are written in the natural form: a count followed by each element
// through the string writer (zset members are followed by a double score).
// Collections still in a compact encoding dump their entire internal byte
// blob through the string writer, so a small hash costs one string record.
// The type opcode tells the loader which shape follows.
//
// Writing goes to `temp-<pid>.rdb` beside the target and publishes by atomic
// rename, so a concurrent reader of the target path sees the old file or the
// new one, never a torn one.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::info;

use crate::db::Server;
use crate::error::{Error, Result};
use crate::obj::{HashVal, ListVal, SetVal, StrVal, Value, ZsetVal};
use crate::rdb;
use crate::rio::Rio;
use crate::sds::Sds;

/// Durable flush interval while writing snapshot files.
const AUTOSYNC_BYTES: u64 = 32 * 1024 * 1024;

fn type_opcode(value: &Value) -> u8 {
    match value {
        Value::Str(_) => rdb::TYPE_STRING,
        Value::List(ListVal::Zip(_)) => rdb::TYPE_LIST_ZIPLIST,
        Value::List(ListVal::Linked(_)) => rdb::TYPE_LIST,
        Value::Set(SetVal::Ints(_)) => rdb::TYPE_SET_INTSET,
        Value::Set(SetVal::Table(_)) => rdb::TYPE_SET,
        Value::Zset(ZsetVal::Zip(_)) => rdb::TYPE_ZSET_ZIPLIST,
        Value::Zset(ZsetVal::Skip(_)) => rdb::TYPE_ZSET,
        Value::Hash(HashVal::Zip(_)) => rdb::TYPE_HASH_ZIPLIST,
        Value::Hash(HashVal::Table(_)) => rdb::TYPE_HASH,
    }
}

fn write_value(r: &mut Rio, value: &Value, compress: bool) -> Result<()> {
    match value {
        Value::Str(s) => match s {
            // Small integers skip the text round trip.
            StrVal::Int(v) => rdb::write_string(r, &crate::util::format_i64(*v), compress),
            other => rdb::write_string(r, &other.bytes(), compress),
        },
        Value::List(ListVal::Zip(zl)) => rdb::write_string(r, zl.as_bytes(), compress),
        Value::List(ListVal::Linked(items)) => {
            rdb::write_length(r, items.len() as u64)?;
            for item in items {
                rdb::write_string(r, item.as_bytes(), compress)?;
            }
            Ok(())
        }
        Value::Set(SetVal::Ints(ints)) => rdb::write_string(r, ints.as_bytes(), compress),
        Value::Set(SetVal::Table(d)) => {
            rdb::write_length(r, d.len() as u64)?;
            for member in d.keys() {
                rdb::write_string(r, member.as_bytes(), compress)?;
            }
            Ok(())
        }
        Value::Zset(ZsetVal::Zip(zl)) => rdb::write_string(r, zl.as_bytes(), compress),
        Value::Zset(ZsetVal::Skip(full)) => {
            rdb::write_length(r, full.dict.len() as u64)?;
            for (member, score) in full.dict.iter() {
                rdb::write_string(r, member.as_bytes(), compress)?;
                rdb::write_double(r, *score)?;
            }
            Ok(())
        }
        Value::Hash(HashVal::Zip(zl)) => rdb::write_string(r, zl.as_bytes(), compress),
        Value::Hash(HashVal::Table(d)) => {
            rdb::write_length(r, d.len() as u64)?;
            for (field, val) in d.iter() {
                rdb::write_string(r, field.as_bytes(), compress)?;
                rdb::write_string(r, val.as_bytes(), compress)?;
            }
            Ok(())
        }
    }
}

fn write_key_value(
    r: &mut Rio,
    key: &Sds,
    value: &Value,
    expire_at: Option<u64>,
    compress: bool,
) -> Result<()> {
    if let Some(at) = expire_at {
        r.write(&[rdb::OP_EXPIRETIME_MS])?;
        r.write(&at.to_le_bytes())?;
    }
    r.write(&[type_opcode(value)])?;
    rdb::write_string(r, key.as_bytes(), compress)?;
    write_value(r, value, compress)
}

/// Serializes the whole dataset into `rio`.
pub fn save_to_rio(server: &Server, rio: &mut Rio) -> Result<()> {
    let compress = server.config.rdb_compression;
    let checksum = server.config.rdb_checksum;
    if checksum {
        rio.enable_checksum();
    }

    rio.write(rdb::MAGIC)?;
    rio.write(format!("{:04}", rdb::VERSION).as_bytes())?;

    for db in server.dbs() {
        if db.is_empty() {
            continue;
        }
        rio.write(&[rdb::OP_SELECTDB])?;
        rdb::write_length(rio, db.id as u64)?;
        for (key, value) in db.dict.iter() {
            let expire_at = db.expires.get(key.as_bytes()).copied();
            write_key_value(rio, key, value, expire_at, compress)?;
        }
    }

    rio.write(&[rdb::OP_EOF])?;
    // The trailer records the running checksum up to and including the EOF
    // opcode; zero tells readers no checksum was computed.
    let trailer = if checksum { rio.checksum() } else { 0 };
    rio.write(&trailer.to_le_bytes())?;
    Ok(())
}

pub(crate) fn temp_path(target: &Path) -> PathBuf {
    let name = format!("temp-{}.rdb", std::process::id());
    match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}

/// Writes the dataset to `path` via a temp file and atomic rename. On any
/// error the temp file is removed and the target left untouched.
pub fn save_file(server: &Server, path: &str) -> Result<()> {
    let target = Path::new(path);
    let tmp = temp_path(target);

    let result = (|| -> Result<()> {
        let file = File::create(&tmp)?;
        let mut rio = Rio::file_writer(file);
        rio.set_autosync(AUTOSYNC_BYTES);
        save_to_rio(server, &mut rio)?;
        rio.sync_all()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            std::fs::rename(&tmp, target)?;
            info!("dataset saved to {}", path);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

impl Server {
    /// Foreground save to `path` (the configured file when `None`). Refuses
    /// while a background save child is running.
    pub fn save(&mut self, path: Option<&str>) -> Result<()> {
        #[cfg(unix)]
        if self.rdb_child_pid.is_some() {
            return Err(Error::Busy("background save in progress"));
        }
        let path = path.unwrap_or(&self.config.rdb_filename).to_string();
        save_file(self, &path)?;
        self.dirty = 0;
        self.lastsave = crate::db::mstime() / 1000;
        self.lastbgsave_ok = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn header_and_trailer_shape() {
        let mut server = Server::new(Config::default());
        server.set(b"k", b"v");
        let mut rio = Rio::buffer();
        save_to_rio(&server, &mut rio).unwrap();
        let buf = rio.into_buffer().unwrap();
        let bytes = buf.as_bytes();
        assert_eq!(&bytes[0..5], b"REDIS");
        assert_eq!(&bytes[5..9], b"0006");
        // EOF opcode sits 9 bytes from the end (before the u64 trailer).
        assert_eq!(bytes[bytes.len() - 9], rdb::OP_EOF);
        // Checksum enabled by default: non-zero trailer.
        let trailer = u64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
        assert_ne!(trailer, 0);
    }

    #[test]
    fn trailer_zero_when_checksum_disabled() {
        let mut config = Config::default();
        config.rdb_checksum = false;
        let mut server = Server::new(config);
        server.set(b"k", b"v");
        let mut rio = Rio::buffer();
        save_to_rio(&server, &mut rio).unwrap();
        let buf = rio.into_buffer().unwrap();
        let bytes = buf.as_bytes();
        let trailer = u64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
        assert_eq!(trailer, 0);
    }

    #[test]
    fn empty_databases_are_skipped() {
        let server = Server::new(Config::default());
        let mut rio = Rio::buffer();
        save_to_rio(&server, &mut rio).unwrap();
        let buf = rio.into_buffer().unwrap();
        // Magic + version + EOF + trailer only.
        assert_eq!(buf.len(), 5 + 4 + 1 + 8);
    }

    #[test]
    fn save_publishes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.rdb");
        let path_str = path.to_str().unwrap().to_string();
        let mut server = Server::new(Config::default());
        server.set(b"k", b"v");
        server.save(Some(&path_str)).unwrap();
        assert!(path.exists());
        assert_eq!(server.dirty(), 0);
        assert!(server.last_bgsave_ok());
        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("temp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_save_cleans_temp_file() {
        let mut server = Server::new(Config::default());
        server.set(b"k", b"v");
        let err = save_file(&server, "/nonexistent-dir/deep/dump.rdb");
        assert!(err.is_err());
    }
}
