// bgsave.rs — Fork-based background snapshot worker.
//
// The parent forks; the child inherits a copy-on-write view of the heap at
// exactly that instant, writes the snapshot to `temp-<childpid>.rdb`, and
// exits 0 on success. The parent keeps serving writes. While the child is
// alive the parent throttles hash-table resizing so bucket-array moves do
// not dirty pages the child still shares.
//
// Reaping is cooperative: the driver calls [`Server::check_bgsave_done`]
// from its tick. The child performs the atomic rename itself, so on success
// the parent only settles the counters; on failure (or death by a signal
// other than the cooperative-cancel one) the parent unlinks the temp file
// and records the failure.

#![cfg(unix)]

use std::path::Path;

use log::{info, warn};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::db::{mstime, Server};
use crate::dict;
use crate::error::{Error, Result};
use crate::rdb::save::save_file;

/// Signal used to cancel the child cooperatively; death by it is not a
/// failed save.
pub const CANCEL_SIGNAL: Signal = Signal::SIGUSR1;

/// Outcome reported by [`Server::check_bgsave_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgsaveStatus {
    /// No background save is running.
    Idle,
    /// The child is still writing.
    InProgress,
    /// The child finished; `true` means the snapshot was published.
    Done(bool),
}

impl Server {
    pub fn bgsave_in_progress(&self) -> bool {
        self.rdb_child_pid.is_some()
    }

    /// Starts a background save to `path` (the configured file when
    /// `None`). Refuses when one is already running.
    pub fn bgsave(&mut self, path: Option<&str>) -> Result<Pid> {
        if self.rdb_child_pid.is_some() {
            return Err(Error::Busy("background save in progress"));
        }
        let path = path.unwrap_or(&self.config.rdb_filename).to_string();
        self.dirty_before_bgsave = self.dirty;

        match unsafe { fork() }.map_err(|e| Error::Io(e.into()))? {
            ForkResult::Child => {
                // Snapshot the copy-on-write heap image. Nothing here may
                // mutate shared values; only the serializer runs.
                let code = match save_file(self, &path) {
                    Ok(()) => 0,
                    Err(_) => 1,
                };
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                info!("background saving started by pid {}", child);
                self.rdb_child_pid = Some(child);
                self.rdb_save_time_start = Some(mstime());
                // Keep copy-on-write pages clean while the child runs.
                dict::set_resize_enabled(false);
                Ok(child)
            }
        }
    }

    /// Non-blocking reap of the snapshot child. Call from the driver tick.
    pub fn check_bgsave_done(&mut self) -> BgsaveStatus {
        let Some(pid) = self.rdb_child_pid else {
            return BgsaveStatus::Idle;
        };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => BgsaveStatus::InProgress,
            Ok(WaitStatus::Exited(_, code)) => {
                let ok = code == 0;
                self.background_save_done(pid, ok, None);
                BgsaveStatus::Done(ok)
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                self.background_save_done(pid, false, Some(sig));
                BgsaveStatus::Done(false)
            }
            Ok(_) => BgsaveStatus::InProgress,
            Err(e) => {
                warn!("waitpid on snapshot child failed: {}", e);
                self.background_save_done(pid, false, None);
                BgsaveStatus::Done(false)
            }
        }
    }

    fn background_save_done(&mut self, child: Pid, ok: bool, by_signal: Option<Signal>) {
        if ok {
            // The child already renamed the temp file over the target.
            self.dirty -= self.dirty_before_bgsave;
            self.lastsave = mstime() / 1000;
            self.lastbgsave_ok = true;
            let took = self
                .rdb_save_time_start
                .map(|t| mstime().saturating_sub(t))
                .unwrap_or(0);
            info!("background saving terminated with success ({} ms)", took);
        } else {
            remove_child_temp_file(&self.config.rdb_filename, child);
            match by_signal {
                Some(sig) if sig == CANCEL_SIGNAL => {
                    info!("background saving cancelled cooperatively");
                    // A requested cancel is not a persistence failure.
                }
                Some(sig) => {
                    warn!("background saving terminated by signal {}", sig);
                    self.lastbgsave_ok = false;
                }
                None => {
                    warn!("background saving error");
                    self.lastbgsave_ok = false;
                }
            }
        }
        self.rdb_child_pid = None;
        self.rdb_save_time_start = None;
        dict::set_resize_enabled(true);
        if self.deferred_expire_events > 0 {
            info!(
                "flushing {} deferred expired-key notifications",
                self.deferred_expire_events
            );
            self.deferred_expire_events = 0;
        }
    }

    /// Signals the child to stop. The reap treats this as a cooperative
    /// cancel, not a failure.
    pub fn cancel_bgsave(&mut self) -> Result<()> {
        match self.rdb_child_pid {
            None => Err(Error::NotFound),
            Some(pid) => {
                kill(pid, CANCEL_SIGNAL).map_err(|e| Error::Io(e.into()))?;
                Ok(())
            }
        }
    }
}

/// Unlinks the temp file a dead child may have left behind. The child names
/// it after its own pid, so the path is reconstructed here. Best effort.
fn remove_child_temp_file(target: &str, child: Pid) {
    let name = format!("temp-{}.rdb", child);
    let tmp = match Path::new(target).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => std::path::PathBuf::from(name),
    };
    let _ = std::fs::remove_file(&tmp);
}
