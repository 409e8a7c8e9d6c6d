// rdbstore — in-memory key-value storage core with RDB snapshot persistence.
//
// The crate is the storage half of a key-value server: typed values under
// adaptive encodings, numbered logical databases with per-key expiry, and a
// self-describing binary snapshot format with a fork-based background
// writer. The network loop, command parsing, and reply formatting belong to
// the embedding server, which drives this crate through the `Server` API.

pub mod bgsave;
pub mod config;
pub mod crc64;
pub mod db;
pub mod dict;
pub mod error;
pub mod intset;
pub mod lzf;
pub mod obj;
pub mod rdb;
pub mod rio;
pub mod sds;
pub mod skiplist;
pub mod types;
pub mod util;
pub mod ziplist;
pub mod zmalloc;

// ─────────────────────────────────────────────────────────────────────────────
// Primary entry points
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime options: encoding-promotion thresholds and snapshot settings.
pub use config::Config;

/// The server state: logical databases, type commands, persistence.
pub use db::Server;

/// Crate-wide error and result types.
pub use error::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Value model
// ─────────────────────────────────────────────────────────────────────────────

/// Typed value objects and their encodings.
pub use obj::{Encoding, Value, ValueType};

/// Binary-safe dynamic string used for keys and string values.
pub use sds::Sds;

/// Score interval for sorted-set range operations.
pub use skiplist::ScoreRange;

/// Push direction for list operations.
pub use ziplist::End;

// ─────────────────────────────────────────────────────────────────────────────
// Persistence building blocks
// ─────────────────────────────────────────────────────────────────────────────

/// Background-save status reported by the reaping tick.
#[cfg(unix)]
pub use bgsave::BgsaveStatus;

/// Uniform checksumming I/O used by the snapshot codec.
pub use rio::Rio;

/// Format version written by the snapshot saver.
pub use rdb::VERSION as RDB_VERSION;

// ─────────────────────────────────────────────────────────────────────────────
// Memory accounting
// ─────────────────────────────────────────────────────────────────────────────

/// Opt-in tracking allocator; install with `#[global_allocator]`.
pub use zmalloc::TrackingAlloc;
