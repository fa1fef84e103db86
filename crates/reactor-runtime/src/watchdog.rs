//! Process-wide fault detector (spec §4.3, §7 `WatchdogExceeded`), grounded
//! on `examples/original_source/include/xtils/logging/watchdog.h`'s
//! `RunTaskWithWatchdogGuard` / `Watchdog::Timer` RAII pattern.
//!
//! A single background thread polls an atomic deadline; any single task
//! invocation armed through [`Watchdog::guard`] that outlives its deadline
//! without being disarmed (the guard dropping) aborts the process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DEFAULT_TASK_DEADLINE_MS: u64 = 180_000;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `0` means "no task currently running".
const NO_DEADLINE: u64 = 0;

struct Inner {
    /// Absolute deadline (ms since `origin`) of the currently-running task,
    /// or `NO_DEADLINE` if the loop is idle.
    deadline_ms: AtomicU64,
    origin: Instant,
}

pub struct Watchdog {
    inner: Arc<Inner>,
    task_deadline: Duration,
    _thread: JoinHandle<()>,
}

impl Watchdog {
    pub fn new() -> Arc<Self> {
        Self::with_task_deadline(Duration::from_millis(DEFAULT_TASK_DEADLINE_MS))
    }

    pub fn with_task_deadline(task_deadline: Duration) -> Arc<Self> {
        let inner = Arc::new(Inner {
            deadline_ms: AtomicU64::new(NO_DEADLINE),
            origin: Instant::now(),
        });
        let bg = inner.clone();
        let thread = std::thread::Builder::new()
            .name("reactor-watchdog".into())
            .spawn(move || watchdog_loop(bg))
            .expect("failed to spawn watchdog thread");
        Arc::new(Watchdog { inner, task_deadline, _thread: thread })
    }

    /// Arms the watchdog for the duration of the returned guard. Dropping
    /// the guard (including via unwind) disarms it again, so a task that
    /// panics still clears its own deadline.
    pub fn guard(self: &Arc<Self>) -> WatchdogGuard {
        let deadline = self.inner.origin.elapsed() + self.task_deadline;
        self.inner.deadline_ms.store(deadline.as_millis() as u64, SeqCst);
        WatchdogGuard { inner: self.inner.clone() }
    }
}

fn watchdog_loop(inner: Arc<Inner>) {
    loop {
        std::thread::sleep(POLL_INTERVAL);
        let deadline_ms = inner.deadline_ms.load(SeqCst);
        if deadline_ms == NO_DEADLINE {
            continue;
        }
        let now_ms = inner.origin.elapsed().as_millis() as u64;
        if now_ms >= deadline_ms {
            tracing::error!("task exceeded watchdog deadline; aborting process");
            std::process::abort();
        }
    }
}

pub struct WatchdogGuard {
    inner: Arc<Inner>,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        self.inner.deadline_ms.store(NO_DEADLINE, SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_disarms_on_drop() {
        let watchdog = Watchdog::with_task_deadline(Duration::from_secs(60));
        {
            let _guard = watchdog.guard();
            assert_ne!(watchdog.inner.deadline_ms.load(SeqCst), NO_DEADLINE);
        }
        assert_eq!(watchdog.inner.deadline_ms.load(SeqCst), NO_DEADLINE);
    }
}
