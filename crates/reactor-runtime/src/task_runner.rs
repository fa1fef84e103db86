//! The `TaskRunner` interface (spec §4.3-4.4), grounded on
//! `examples/original_source/task_runner.h`: the common surface shared by
//! [`crate::event_loop::EventLoop`] and [`crate::thread_task_runner::ThreadTaskRunner`],
//! letting callers like the socket adapter depend on "a place to post tasks
//! and watch FDs" without caring whether that's a bare loop or one pinned to
//! its own thread.

use std::io;
use std::os::fd::RawFd;

use crate::event_loop::EventLoop;
use crate::thread_task_runner::ThreadTaskRunner;

/// All methods may be called from any thread; `runs_tasks_on_current_thread`
/// lets a caller that happens to already be on the runner's thread skip a
/// round-trip through `post_task`.
pub trait TaskRunner: Send + Sync {
    fn post_task(&self, task: Box<dyn FnOnce() + Send + 'static>);
    fn post_delayed_task(&self, task: Box<dyn FnOnce() + Send + 'static>, delay_ms: u32);
    fn add_file_descriptor_watch(
        &self,
        fd: RawFd,
        callback: Box<dyn FnMut() + Send + 'static>,
    ) -> io::Result<()>;
    fn remove_file_descriptor_watch(&self, fd: RawFd);
    fn runs_tasks_on_current_thread(&self) -> bool;
}

impl TaskRunner for EventLoop {
    fn post_task(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        EventLoop::post_task(self, task);
    }
    fn post_delayed_task(&self, task: Box<dyn FnOnce() + Send + 'static>, delay_ms: u32) {
        EventLoop::post_delayed_task(self, task, delay_ms);
    }
    fn add_file_descriptor_watch(
        &self,
        fd: RawFd,
        callback: Box<dyn FnMut() + Send + 'static>,
    ) -> io::Result<()> {
        EventLoop::add_file_descriptor_watch(self, fd, callback)
    }
    fn remove_file_descriptor_watch(&self, fd: RawFd) {
        EventLoop::remove_file_descriptor_watch(self, fd);
    }
    fn runs_tasks_on_current_thread(&self) -> bool {
        EventLoop::runs_tasks_on_current_thread(self)
    }
}

impl TaskRunner for ThreadTaskRunner {
    fn post_task(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        ThreadTaskRunner::post_task(self, task);
    }
    fn post_delayed_task(&self, task: Box<dyn FnOnce() + Send + 'static>, delay_ms: u32) {
        ThreadTaskRunner::post_delayed_task(self, task, delay_ms);
    }
    fn add_file_descriptor_watch(
        &self,
        fd: RawFd,
        callback: Box<dyn FnMut() + Send + 'static>,
    ) -> io::Result<()> {
        ThreadTaskRunner::add_file_descriptor_watch(self, fd, callback)
    }
    fn remove_file_descriptor_watch(&self, fd: RawFd) {
        ThreadTaskRunner::remove_file_descriptor_watch(self, fd);
    }
    fn runs_tasks_on_current_thread(&self) -> bool {
        ThreadTaskRunner::runs_tasks_on_current_thread(self)
    }
}
