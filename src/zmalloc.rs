// zmalloc.rs — Allocator-aware memory accounting.
//
// A `GlobalAlloc` wrapper keeps an atomic counter of live heap bytes. Each
// request is rounded up to machine-word alignment before accounting, so the
// counter tracks what the allocator actually hands out rather than the sum of
// requested sizes. `dealloc` receives the original `Layout`, which makes the
// C-style hidden size prefix unnecessary.
//
// Opt in from the embedding binary:
//
// ```ignore
// #[global_allocator]
// static ALLOC: rdbstore::zmalloc::TrackingAlloc = rdbstore::zmalloc::TrackingAlloc;
// ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

static USED_MEMORY: AtomicUsize = AtomicUsize::new(0);

type OomHandler = fn(usize);

// Function pointer stored as usize; 0 means "default handler".
static OOM_HANDLER: AtomicUsize = AtomicUsize::new(0);

const WORD: usize = std::mem::size_of::<usize>();

#[inline]
fn rounded(size: usize) -> usize {
    if size % WORD != 0 {
        size + (WORD - size % WORD)
    } else {
        size
    }
}

/// System allocator wrapper that maintains the live-byte counter.
pub struct TrackingAlloc;

unsafe impl GlobalAlloc for TrackingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let p = System.alloc(layout);
        if p.is_null() {
            oom(layout.size());
        } else {
            USED_MEMORY.fetch_add(rounded(layout.size()), Ordering::Relaxed);
        }
        p
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        USED_MEMORY.fetch_sub(rounded(layout.size()), Ordering::Relaxed);
        System.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let p = System.realloc(ptr, layout, new_size);
        if p.is_null() {
            oom(new_size);
        } else {
            USED_MEMORY.fetch_sub(rounded(layout.size()), Ordering::Relaxed);
            USED_MEMORY.fetch_add(rounded(new_size), Ordering::Relaxed);
        }
        p
    }
}

/// Live heap bytes currently tracked. Zero until [`TrackingAlloc`] is
/// installed as the global allocator.
pub fn used_memory() -> usize {
    USED_MEMORY.load(Ordering::Relaxed)
}

/// Installs the handler invoked when the allocator reports failure.
/// The default handler logs the failed size and aborts the process.
pub fn set_oom_handler(handler: OomHandler) {
    OOM_HANDLER.store(handler as usize, Ordering::SeqCst);
}

fn oom(size: usize) {
    let raw = OOM_HANDLER.load(Ordering::SeqCst);
    if raw != 0 {
        // SAFETY: only ever stored from a valid `fn(usize)` in set_oom_handler.
        let handler: OomHandler = unsafe { std::mem::transmute(raw) };
        handler(size);
        return;
    }
    log::error!("out of memory allocating {} bytes", size);
    std::process::abort();
}

/// Samples the resident set size of this process in bytes.
///
/// Reads `/proc/self/statm` where available; elsewhere falls back to the
/// tracked counter, which under-reports but never lies upward.
pub fn rss() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            let mut fields = statm.split_ascii_whitespace();
            // statm: size resident shared ...
            if let Some(resident) = fields.nth(1).and_then(|s| s.parse::<usize>().ok()) {
                let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                if page > 0 {
                    return resident * page as usize;
                }
            }
        }
    }
    used_memory()
}

/// Ratio of resident pages to tracked bytes. Greater than 1.0 means
/// fragmentation or untracked allocations; meaningless when the tracking
/// allocator is not installed.
pub fn fragmentation_ratio() -> f64 {
    let used = used_memory();
    if used == 0 {
        return 0.0;
    }
    rss() as f64 / used as f64
}
