//! Timer service (spec §4.6), grounded on
//! `examples/original_source/include/xtils/tasks/timer.h` and
//! `src/tasks/timer.cc`: one-shot/repeating/absolute timers layered on a
//! [`TaskGroup`], identified by an opaque, monotonically increasing
//! [`TimerId`] (`0` is reserved as invalid).
//!
//! The original's `BaseTimer<TimePoint, TimerInfoType>` template becomes a
//! single generic `Timer<C>` here, parameterised over a clock; `SteadyTimer`
//! and `SystemTimer` are thin aliases over [`MonotonicClock`] and
//! [`WallClock`] respectively. The original's raw-`this` weak pointer
//! becomes a `std::sync::Weak<Inner<C>>` captured by the re-posting
//! trampoline: if the timer (and its owner) are dropped while a trampoline
//! is in flight, the upgrade fails and the trampoline is a no-op, matching
//! `CancelAllTimers` running from the destructor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering::SeqCst};
use std::sync::{Arc, Mutex, Weak};

use reactor_common::clock::{MonotonicClock, WallClock};

use crate::task_group::TaskGroup;

pub type TimerId = u64;
pub const INVALID_TIMER_ID: TimerId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Repeating,
}

/// A source of "now", in the same millisecond units the timer schedules
/// against. Implemented for both clocks in `reactor_common::clock` so a
/// single generic `Timer<C>` serves both timer flavours.
pub trait TimeSource: Clone + Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

impl TimeSource for MonotonicClock {
    fn now_ms(&self) -> i64 {
        MonotonicClock::now_ms(self)
    }
}

impl TimeSource for WallClock {
    fn now_ms(&self) -> i64 {
        WallClock::now_unix_ms(self)
    }
}

type Callback = Box<dyn FnMut() + Send + 'static>;

struct TimerInfo {
    callback: Mutex<Callback>,
    mode: TimerMode,
    interval_ms: u32,
    cancelled: AtomicBool,
    next_execution_ms: AtomicI64,
}

struct Inner<C: TimeSource> {
    task_group: Arc<TaskGroup>,
    clock: C,
    active_timers: Mutex<HashMap<TimerId, Arc<TimerInfo>>>,
    next_id: AtomicU64,
}

impl<C: TimeSource> Inner<C> {
    fn generate_id(&self) -> TimerId {
        self.next_id.fetch_add(1, SeqCst)
    }

    fn schedule(self: &Arc<Self>, timer_id: TimerId, info: &Arc<TimerInfo>) {
        let delay_ms = (info.next_execution_ms.load(SeqCst) - self.clock.now_ms()).max(0) as u32;
        let weak: Weak<Inner<C>> = Arc::downgrade(self);
        self.task_group.post_async_task(
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.execute(timer_id);
                }
            },
            delay_ms,
        );
    }

    fn execute(self: &Arc<Self>, timer_id: TimerId) {
        let info = {
            let timers = self.active_timers.lock().unwrap();
            match timers.get(&timer_id) {
                Some(info) if !info.cancelled.load(SeqCst) => info.clone(),
                _ => return,
            }
        };

        (info.callback.lock().unwrap())();

        if info.mode == TimerMode::Repeating && !info.cancelled.load(SeqCst) {
            let next = info.next_execution_ms.load(SeqCst) + i64::from(info.interval_ms);
            info.next_execution_ms.store(next, SeqCst);
            self.schedule(timer_id, &info);
        } else {
            self.active_timers.lock().unwrap().remove(&timer_id);
        }
    }
}

/// A single timer flavour, generic over its clock. See the aliases
/// [`SteadyTimer`] and [`SystemTimer`].
pub struct Timer<C: TimeSource> {
    inner: Arc<Inner<C>>,
}

impl<C: TimeSource> Timer<C> {
    pub fn new(task_group: Arc<TaskGroup>, clock: C) -> Self {
        Timer {
            inner: Arc::new(Inner {
                task_group,
                clock,
                active_timers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn insert(&self, next_execution_ms: i64, interval_ms: u32, mode: TimerMode, callback: Callback) -> TimerId {
        let timer_id = self.inner.generate_id();
        let info = Arc::new(TimerInfo {
            callback: Mutex::new(callback),
            mode,
            interval_ms,
            cancelled: AtomicBool::new(false),
            next_execution_ms: AtomicI64::new(next_execution_ms),
        });
        self.inner.active_timers.lock().unwrap().insert(timer_id, info.clone());
        self.inner.schedule(timer_id, &info);
        timer_id
    }

    /// Fires once, `delay_ms` from now.
    pub fn set_relative_timer(&self, delay_ms: u32, callback: impl FnMut() + Send + 'static) -> TimerId {
        let now = self.inner.clock.now_ms();
        self.insert(now + i64::from(delay_ms), 0, TimerMode::OneShot, Box::new(callback))
    }

    /// Fires once, at `when_ms` (same epoch as this timer's clock).
    pub fn set_absolute_timer(&self, when_ms: i64, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.insert(when_ms, 0, TimerMode::OneShot, Box::new(callback))
    }

    /// Fires every `interval_ms`, starting `interval_ms` from now.
    pub fn set_repeating_timer(&self, interval_ms: u32, callback: impl FnMut() + Send + 'static) -> TimerId {
        assert!(interval_ms > 0, "repeating timer interval cannot be zero");
        let now = self.inner.clock.now_ms();
        self.insert(now + i64::from(interval_ms), interval_ms, TimerMode::Repeating, Box::new(callback))
    }

    /// Returns `true` if `timer_id` was live and has now been cancelled.
    pub fn cancel_timer(&self, timer_id: TimerId) -> bool {
        let mut timers = self.inner.active_timers.lock().unwrap();
        match timers.remove(&timer_id) {
            Some(info) => {
                info.cancelled.store(true, SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all_timers(&self) {
        let mut timers = self.inner.active_timers.lock().unwrap();
        for info in timers.values() {
            info.cancelled.store(true, SeqCst);
        }
        timers.clear();
    }

    pub fn active_timer_count(&self) -> usize {
        self.inner.active_timers.lock().unwrap().len()
    }
}

impl<C: TimeSource> Drop for Timer<C> {
    fn drop(&mut self) {
        self.cancel_all_timers();
    }
}

/// Monotonic-clock timer: immune to wall-clock jumps, right choice for
/// "fire in N ms" work.
pub type SteadyTimer = Timer<MonotonicClock>;

/// Wall-clock timer, e.g. for "fire at this UTC instant". Internally still
/// schedules against the task group's delayed-task queue in milliseconds,
/// so a wall-clock jump during the wait shifts the fire time with it.
pub type SystemTimer = Timer<WallClock>;

impl SteadyTimer {
    pub fn create(task_group: Arc<TaskGroup>) -> Self {
        Timer::new(task_group, MonotonicClock::system())
    }
}

impl SystemTimer {
    pub fn create(task_group: Arc<TaskGroup>) -> Self {
        Timer::new(task_group, WallClock::System)
    }

    pub fn set_absolute_utc_timer(&self, unix_ms: i64, callback: impl FnMut() + Send + 'static) -> TimerId {
        self.set_absolute_timer(unix_ms, callback)
    }
}
