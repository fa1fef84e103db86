//! The task-runner substrate (spec.md §4.1-4.7): a wakeup primitive, a
//! single-threaded event loop that merges immediate/delayed/FD-watch
//! tasks, a dedicated-thread wrapper around it, a worker-thread task
//! group, timers layered on the task group, and an event dispatcher.

pub mod dispatcher;
pub mod event_loop;
pub mod task_group;
pub mod task_runner;
pub mod thread_task_runner;
pub mod timer;
pub mod wakeup;
pub mod watchdog;

pub use dispatcher::{Event, EventDispatcher, EventId, EventPayload, PARALLEL_PREFIX};
pub use event_loop::{EventLoop, Task};
pub use task_group::TaskGroup;
pub use task_runner::TaskRunner;
pub use thread_task_runner::ThreadTaskRunner;
pub use timer::{INVALID_TIMER_ID, SteadyTimer, SystemTimer, TimerId, TimerMode};
pub use wakeup::Wakeup;
pub use watchdog::Watchdog;
