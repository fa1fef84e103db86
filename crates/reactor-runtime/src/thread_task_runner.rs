//! A single-threaded [`EventLoop`] pinned to its own dedicated OS thread
//! (spec §4.4), grounded on
//! `examples/original_source/src/tasks/thread_task_runner.cc`: the loop is
//! constructed *on* the new thread and `Drop` quits and joins it, so the
//! thread never outlives the runner and the runner never outlives its
//! thread.

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::event_loop::EventLoop;

pub struct ThreadTaskRunner {
    event_loop: Arc<EventLoop>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadTaskRunner {
    pub fn create_and_start(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let event_loop = Arc::new(
                    EventLoop::new().expect("failed to create event loop on task thread"),
                );
                // Matches tasks_.push(initializer) in the original: the first
                // thing the new loop does is hand its handle back, then run.
                tx.send(event_loop.clone()).expect("creator gone before handoff");
                event_loop.run();
            })
            .expect("failed to spawn task thread");

        let event_loop = rx.recv().expect("task thread died before initializing");
        ThreadTaskRunner { event_loop, thread: Some(thread) }
    }

    pub fn post_task(&self, task: impl FnOnce() + Send + 'static) {
        self.event_loop.post_task(task);
    }

    pub fn post_delayed_task(&self, task: impl FnOnce() + Send + 'static, delay_ms: u32) {
        self.event_loop.post_delayed_task(task, delay_ms);
    }

    pub fn add_file_descriptor_watch(
        &self,
        fd: RawFd,
        callback: impl FnMut() + Send + 'static,
    ) -> io::Result<()> {
        self.event_loop.add_file_descriptor_watch(fd, callback)
    }

    pub fn remove_file_descriptor_watch(&self, fd: RawFd) {
        self.event_loop.remove_file_descriptor_watch(fd);
    }

    pub fn runs_tasks_on_current_thread(&self) -> bool {
        self.event_loop.runs_tasks_on_current_thread()
    }

    /// Direct access to the underlying loop, e.g. for layering a
    /// [`crate::timer::TimerService`] or [`crate::dispatcher::EventDispatcher`]
    /// on top. Do not call `quit()` on it: shutdown is owned by `Drop`.
    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }
}

impl Drop for ThreadTaskRunner {
    fn drop(&mut self) {
        self.event_loop.quit();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc::channel;

    #[test]
    fn runs_tasks_on_its_own_thread() {
        let runner = ThreadTaskRunner::create_and_start("test-runner");
        let (tx, rx) = channel();
        runner.post_task(move || {
            tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
        });
        let name = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("test-runner"));
    }

    #[test]
    fn tasks_preserve_post_order() {
        let runner = ThreadTaskRunner::create_and_start("order-runner");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = channel();
        for i in 0..10 {
            let seen = seen.clone();
            let tx = tx.clone();
            runner.post_task(move || {
                seen.lock().unwrap().push(i);
                if i == 9 {
                    tx.send(()).unwrap();
                }
            });
        }
        rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn drop_joins_the_thread() {
        let runner = ThreadTaskRunner::create_and_start("join-runner");
        drop(runner);
        // Reaching here without hanging is the assertion.
    }
}
