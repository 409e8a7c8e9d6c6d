// config.rs — Runtime configuration for the storage core.
//
// All encoding-promotion thresholds and snapshot options are carried in a
// plain value type owned by the server. Setters return the stored value so a
// caller applying an option line can echo back what actually took effect.

use crate::error::{Error, Result};

pub const KB: usize = 1 << 10;
pub const MB: usize = 1 << 20;

/// Default number of logical databases.
pub const DEFAULT_DB_COUNT: usize = 16;

/// Default snapshot file name.
pub const DEFAULT_RDB_FILENAME: &str = "dump.rdb";

#[derive(Debug, Clone)]
pub struct Config {
    /// Hash stays packed while it has at most this many fields.
    pub hash_max_ziplist_entries: usize,
    /// Hash stays packed while every field and value is at most this long.
    pub hash_max_ziplist_value: usize,
    /// List stays packed while it has at most this many elements.
    pub list_max_ziplist_entries: usize,
    /// List stays packed while every element is at most this long.
    pub list_max_ziplist_value: usize,
    /// Set stays an integer array while it has at most this many members.
    pub set_max_intset_entries: usize,
    /// Sorted set stays packed while it has at most this many members.
    pub zset_max_ziplist_entries: usize,
    /// Sorted set stays packed while every member is at most this long.
    pub zset_max_ziplist_value: usize,
    /// Attempt LZF compression of long strings in the snapshot writer.
    pub rdb_compression: bool,
    /// Compute (and verify on load) the CRC64 trailer.
    pub rdb_checksum: bool,
    /// Default snapshot path used by save/bgsave when none is given.
    pub rdb_filename: String,
    /// Number of logical databases.
    pub db_count: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            hash_max_ziplist_entries: 512,
            hash_max_ziplist_value: 64,
            list_max_ziplist_entries: 512,
            list_max_ziplist_value: 64,
            set_max_intset_entries: 512,
            zset_max_ziplist_entries: 128,
            zset_max_ziplist_value: 64,
            rdb_compression: true,
            rdb_checksum: true,
            rdb_filename: DEFAULT_RDB_FILENAME.to_string(),
            db_count: DEFAULT_DB_COUNT,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn set_hash_max_ziplist_entries(&mut self, n: usize) -> usize {
        self.hash_max_ziplist_entries = n;
        self.hash_max_ziplist_entries
    }

    pub fn set_hash_max_ziplist_value(&mut self, n: usize) -> usize {
        self.hash_max_ziplist_value = n;
        self.hash_max_ziplist_value
    }

    pub fn set_list_max_ziplist_entries(&mut self, n: usize) -> usize {
        self.list_max_ziplist_entries = n;
        self.list_max_ziplist_entries
    }

    pub fn set_list_max_ziplist_value(&mut self, n: usize) -> usize {
        self.list_max_ziplist_value = n;
        self.list_max_ziplist_value
    }

    pub fn set_set_max_intset_entries(&mut self, n: usize) -> usize {
        self.set_max_intset_entries = n;
        self.set_max_intset_entries
    }

    pub fn set_zset_max_ziplist_entries(&mut self, n: usize) -> usize {
        self.zset_max_ziplist_entries = n;
        self.zset_max_ziplist_entries
    }

    pub fn set_zset_max_ziplist_value(&mut self, n: usize) -> usize {
        self.zset_max_ziplist_value = n;
        self.zset_max_ziplist_value
    }

    pub fn set_rdb_compression(&mut self, on: bool) -> bool {
        self.rdb_compression = on;
        self.rdb_compression
    }

    pub fn set_rdb_checksum(&mut self, on: bool) -> bool {
        self.rdb_checksum = on;
        self.rdb_checksum
    }

    /// Applies a single `name value` option line, e.g. from a config file.
    /// Lines are tokenized with the same quoting rules the command layer
    /// uses; blank lines and `#` comments are accepted and ignored.
    pub fn apply_line(&mut self, line: &str) -> Result<()> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }
        let tokens = crate::sds::split_args(trimmed.as_bytes())
            .ok_or(Error::OutOfRange("unbalanced quotes in option line"))?;
        if tokens.len() != 2 {
            return Err(Error::OutOfRange("option line must be `name value`"));
        }
        let name = String::from_utf8_lossy(tokens[0].as_bytes()).to_string();
        let value = String::from_utf8_lossy(tokens[1].as_bytes()).to_string();
        self.apply_option(&name, &value)
    }

    /// Applies one option by its kebab-case name.
    pub fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        fn num(value: &str) -> Result<usize> {
            value.parse::<usize>().map_err(|_| Error::NotInteger)
        }
        fn yesno(value: &str) -> Result<bool> {
            match value {
                "yes" | "true" | "1" => Ok(true),
                "no" | "false" | "0" => Ok(false),
                _ => Err(Error::OutOfRange("expected yes/no")),
            }
        }
        match name {
            "hash-max-packed-entries" => self.hash_max_ziplist_entries = num(value)?,
            "hash-max-packed-value" => self.hash_max_ziplist_value = num(value)?,
            "list-max-packed-entries" => self.list_max_ziplist_entries = num(value)?,
            "list-max-packed-value" => self.list_max_ziplist_value = num(value)?,
            "set-max-intset-entries" => self.set_max_intset_entries = num(value)?,
            "zset-max-packed-entries" => self.zset_max_ziplist_entries = num(value)?,
            "zset-max-packed-value" => self.zset_max_ziplist_value = num(value)?,
            "rdb-compression" => self.rdb_compression = yesno(value)?,
            "rdb-checksum" => self.rdb_checksum = yesno(value)?,
            "rdb-filename" => self.rdb_filename = value.to_string(),
            "db-count" => {
                let n = num(value)?;
                if n == 0 {
                    return Err(Error::OutOfRange("db-count must be at least 1"));
                }
                self.db_count = n;
            }
            _ => return Err(Error::OutOfRange("unknown option name")),
        }
        Ok(())
    }
}
