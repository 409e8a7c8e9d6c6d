// db.rs — Logical databases and the server state that owns them.
//
// A logical database is a pair of hash tables: the keyspace proper and a
// parallel table holding absolute millisecond deadlines for the subset of
// keys that carry a TTL. Expiry is lazy: lookups check the deadline first
// and delete on the spot when it has passed. Every key present in the
// expiration table is present in the keyspace; the converse does not hold.
//
// The server owns `db_count` databases plus the persistence bookkeeping:
// the dirty counter (writes since the last successful snapshot), the
// last-save timestamp and status, and the state of an in-flight background
// save child.

use std::time::SystemTime;

use log::debug;

use crate::config::Config;
use crate::dict::Dict;
use crate::error::{Error, Result};
use crate::obj::Value;
use crate::sds::Sds;

/// Milliseconds since the Unix epoch.
pub fn mstime() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct Db {
    pub(crate) dict: Dict<Sds, Value>,
    pub(crate) expires: Dict<Sds, u64>,
    pub(crate) id: usize,
}

impl Db {
    fn new(id: usize) -> Db {
        Db { dict: Dict::new(), expires: Dict::new(), id }
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.len() == 0
    }

    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    /// Removes `key` from keyspace and expirations. Returns whether the key
    /// existed.
    pub(crate) fn delete(&mut self, key: &[u8]) -> bool {
        if self.expires.len() > 0 {
            self.expires.remove(key);
        }
        self.dict.remove(key).is_some()
    }

    /// Deadline check without side effects.
    pub(crate) fn is_expired(&self, key: &[u8], now: u64) -> bool {
        match self.expires.get(key) {
            Some(deadline) => *deadline <= now,
            None => false,
        }
    }
}

pub struct Server {
    pub config: Config,
    dbs: Vec<Db>,
    cur: usize,
    /// Writes since the last successful snapshot.
    pub(crate) dirty: u64,
    /// Dirty counter captured when the running background save forked.
    pub(crate) dirty_before_bgsave: u64,
    /// Unix seconds of the last successful save.
    pub(crate) lastsave: u64,
    pub(crate) lastbgsave_ok: bool,
    #[cfg(unix)]
    pub(crate) rdb_child_pid: Option<nix::unistd::Pid>,
    pub(crate) rdb_save_time_start: Option<u64>,
    /// Expired-key deletions performed while a snapshot child was alive;
    /// their downstream notifications are deferred until the child is
    /// reaped.
    pub(crate) deferred_expire_events: u64,
    /// While set, write-path lookups skip lazy expiry so a multi-step
    /// command observes a stable keyspace.
    expire_paused: bool,
}

impl Server {
    pub fn new(config: Config) -> Server {
        let dbs = (0..config.db_count).map(Db::new).collect();
        Server {
            config,
            dbs,
            cur: 0,
            dirty: 0,
            dirty_before_bgsave: 0,
            lastsave: 0,
            lastbgsave_ok: true,
            #[cfg(unix)]
            rdb_child_pid: None,
            rdb_save_time_start: None,
            deferred_expire_events: 0,
            expire_paused: false,
        }
    }

    // -- database selection ------------------------------------------------

    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.dbs.len() {
            return Err(Error::OutOfRange("database index out of range"));
        }
        self.cur = index;
        Ok(())
    }

    pub fn current_db(&self) -> usize {
        self.cur
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    pub(crate) fn db(&self) -> &Db {
        &self.dbs[self.cur]
    }

    pub(crate) fn db_mut(&mut self) -> &mut Db {
        &mut self.dbs[self.cur]
    }

    pub(crate) fn dbs(&self) -> &[Db] {
        &self.dbs
    }

    pub(crate) fn db_at_mut(&mut self, index: usize) -> &mut Db {
        &mut self.dbs[index]
    }

    /// Drops every key in every database.
    pub fn flush_all(&mut self) {
        for db in &mut self.dbs {
            db.dict.clear();
            db.expires.clear();
        }
        self.dirty += 1;
    }

    pub fn key_count(&self) -> usize {
        self.dbs.iter().map(|db| db.len()).sum()
    }

    // -- expiry ------------------------------------------------------------

    pub fn set_expire_paused(&mut self, on: bool) {
        self.expire_paused = on;
    }

    #[cfg(unix)]
    fn snapshot_child_active(&self) -> bool {
        self.rdb_child_pid.is_some()
    }

    #[cfg(not(unix))]
    fn snapshot_child_active(&self) -> bool {
        false
    }

    /// Deletes `key` if its deadline has passed. Returns whether it was
    /// removed. While a snapshot child is alive the deletion still happens
    /// but its notification is deferred.
    pub(crate) fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        let now = mstime();
        if !self.dbs[self.cur].is_expired(key, now) {
            return false;
        }
        let child = self.snapshot_child_active();
        let db = &mut self.dbs[self.cur];
        db.delete(key);
        if child {
            self.deferred_expire_events += 1;
        } else {
            debug!("lazily expired key in db {}", self.cur);
        }
        true
    }

    /// Expired-key deletions whose notifications are still pending.
    pub fn deferred_expire_events(&self) -> u64 {
        self.deferred_expire_events
    }

    // -- keyspace access ---------------------------------------------------

    /// Read-path lookup with lazy expiry.
    pub fn lookup_read(&mut self, key: &[u8]) -> Option<&Value> {
        self.expire_if_needed(key);
        self.dbs[self.cur].dict.get(key)
    }

    /// Write-path lookup. Honors the expire pause so a multi-step command
    /// never loses a key mid-flight.
    pub fn lookup_write(&mut self, key: &[u8]) -> Option<&mut Value> {
        if !self.expire_paused {
            self.expire_if_needed(key);
        }
        self.dbs[self.cur].dict.get_mut(key)
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.lookup_read(key).is_some()
    }

    /// Stores `value` under `key`, overwriting any previous value and
    /// clearing any TTL.
    pub fn set_value(&mut self, key: &[u8], value: Value) {
        let db = self.db_mut();
        db.dict.insert(Sds::from_bytes(key), value);
        if db.expires.len() > 0 {
            db.expires.remove(key);
        }
        self.dirty += 1;
    }

    /// Adds only when absent; reports whether the value was stored.
    pub fn add_value(&mut self, key: &[u8], value: Value) -> bool {
        self.expire_if_needed(key);
        let added = self.db_mut().dict.add(Sds::from_bytes(key), value);
        if added {
            self.dirty += 1;
        }
        added
    }

    pub fn delete_key(&mut self, key: &[u8]) -> bool {
        self.expire_if_needed(key);
        let deleted = self.db_mut().delete(key);
        if deleted {
            self.dirty += 1;
        }
        deleted
    }

    /// Renames a key, carrying its TTL along. Overwrites the destination.
    pub fn rename_key(&mut self, from: &[u8], to: &[u8]) -> Result<()> {
        self.expire_if_needed(from);
        let db = self.db_mut();
        let (_, value) = db.dict.remove_entry(from).ok_or(Error::NotFound)?;
        let ttl = db.expires.remove(from);
        db.dict.insert(Sds::from_bytes(to), value);
        match ttl {
            Some(deadline) => {
                db.expires.insert(Sds::from_bytes(to), deadline);
            }
            None => {
                db.expires.remove(to);
            }
        }
        self.dirty += 1;
        Ok(())
    }

    // -- TTL surface -------------------------------------------------------

    /// Sets an absolute millisecond deadline. The key must exist.
    pub fn expire_set(&mut self, key: &[u8], deadline_ms: u64) -> bool {
        self.expire_if_needed(key);
        let db = self.db_mut();
        if !db.dict.contains(key) {
            return false;
        }
        db.expires.insert(Sds::from_bytes(key), deadline_ms);
        self.dirty += 1;
        true
    }

    pub fn expire_get(&mut self, key: &[u8]) -> Option<u64> {
        self.expire_if_needed(key);
        self.db().expires.get(key).copied()
    }

    /// Drops the TTL, keeping the key. Reports whether a TTL was removed.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.expire_if_needed(key);
        let removed = self.db_mut().expires.remove(key).is_some();
        if removed {
            self.dirty += 1;
        }
        removed
    }

    /// Approximately uniform random live key, expiring stale ones on the
    /// way.
    pub fn random_key(&mut self) -> Option<Sds> {
        loop {
            let key = {
                let db = self.db();
                let (k, _) = db.dict.random_entry()?;
                k.clone()
            };
            if !self.expire_if_needed(key.as_bytes()) {
                return Some(key);
            }
        }
    }

    // -- idle tick ---------------------------------------------------------

    /// Keys sampled from each database's expiration table per tick.
    const EXPIRE_SAMPLES_PER_TICK: usize = 20;

    /// Cooperative maintenance slice, called by the driver between
    /// commands: reaps a finished snapshot child, runs a bounded rehash
    /// burst, shrinks sparse tables, and actively expires a sample of
    /// volatile keys.
    pub fn tick(&mut self) {
        #[cfg(unix)]
        self.check_bgsave_done();

        let child = self.snapshot_child_active();
        let now = mstime();
        let mut expired_events = 0u64;

        for db in &mut self.dbs {
            // One bounded burst is enough per tick; resizing is throttled
            // entirely while a snapshot child holds the heap image.
            if db.dict.is_rehashing() {
                db.dict.rehash_millis(1);
            } else if !child && db.dict.needs_resize() {
                db.dict.resize();
            }
            if db.expires.is_rehashing() {
                db.expires.rehash_millis(1);
            }

            // Active expiry: sample random volatile keys and drop the dead.
            for _ in 0..Self::EXPIRE_SAMPLES_PER_TICK {
                if db.expires.len() == 0 {
                    break;
                }
                let victim = match db.expires.random_entry() {
                    Some((key, deadline)) if *deadline <= now => key.clone(),
                    _ => continue,
                };
                db.delete(victim.as_bytes());
                expired_events += 1;
            }
        }

        if expired_events > 0 {
            if child {
                self.deferred_expire_events += expired_events;
            } else {
                debug!("actively expired {} keys", expired_events);
            }
        }
    }

    // -- persistence status ------------------------------------------------

    pub fn dirty(&self) -> u64 {
        self.dirty
    }

    /// Unix seconds of the last successful save.
    pub fn lastsave(&self) -> u64 {
        self.lastsave
    }

    pub fn last_bgsave_ok(&self) -> bool {
        self.lastbgsave_ok
    }
}
