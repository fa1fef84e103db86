//! Event dispatcher (spec §4.7), grounded on
//! `examples/original_source/include/xtils/tasks/event.h` and
//! `src/tasks/event.cc`: a registry mapping an [`EventId`] to an ordered
//! list of callbacks, with `connect`/`emit` both hopping through the task
//! group's main runner so the registry itself never needs its own mutex —
//! it's only ever touched from that one serialising loop.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::task_group::TaskGroup;

pub type EventId = u32;

/// High bit of an [`EventId`]: set it to request parallel (one task per
/// callback) dispatch instead of the default ordered (one task for the
/// whole callback list) dispatch.
pub const PARALLEL_PREFIX: EventId = 0x0100_0000;

pub fn is_parallel_event(id: EventId) -> bool {
    id & PARALLEL_PREFIX == PARALLEL_PREFIX
}

pub type EventPayload = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
pub struct Event {
    pub id: EventId,
    pub data: EventPayload,
}

impl Event {
    pub fn new(id: EventId, data: EventPayload) -> Self {
        Event { id, data }
    }

    pub fn data_as<T: 'static>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

struct Registry {
    callbacks: HashMap<EventId, Vec<Callback>>,
}

/// Registers listeners against [`EventId`]s and fans out emitted events to
/// them through a [`TaskGroup`].
pub struct EventDispatcher {
    task_group: Arc<TaskGroup>,
    registry: Arc<std::sync::Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new(task_group: Arc<TaskGroup>) -> Self {
        EventDispatcher {
            task_group,
            registry: Arc::new(std::sync::Mutex::new(Registry { callbacks: HashMap::new() })),
        }
    }

    /// Appends `callback` to `id`'s callback list. The append itself runs
    /// on the main runner, so a `connect` racing an in-flight `emit` for
    /// the same id never observes a half-updated list.
    pub fn connect(&self, id: EventId, callback: impl Fn(&Event) + Send + Sync + 'static) {
        let registry = self.registry.clone();
        let callback: Callback = Arc::new(callback);
        self.task_group.post_task(move || {
            registry.lock().unwrap().callbacks.entry(id).or_default().push(callback);
        });
    }

    pub fn emit(&self, id: EventId, data: EventPayload) {
        let registry = self.registry.clone();
        let task_group = self.task_group.clone();
        self.task_group.post_task(move || {
            let callbacks = {
                let reg = registry.lock().unwrap();
                reg.callbacks.get(&id).cloned()
            };
            let Some(callbacks) = callbacks else { return };
            let event = Event::new(id, data);

            if is_parallel_event(id) {
                for cb in callbacks {
                    let event = event.clone();
                    task_group.post_async_task(move || cb(&event), 0);
                }
            } else {
                task_group.post_async_task(
                    move || {
                        for cb in &callbacks {
                            cb(&event);
                        }
                    },
                    0,
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn ordered_event_runs_callbacks_in_registration_order() {
        let group = Arc::new(TaskGroup::new(2));
        let dispatcher = EventDispatcher::new(group);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = channel();

        for i in 0..3 {
            let order = order.clone();
            let tx = tx.clone();
            dispatcher.connect(7, move |_| {
                order.lock().unwrap().push(i);
                if i == 2 {
                    tx.send(()).unwrap();
                }
            });
        }

        dispatcher.emit(7, Arc::new(()));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn parallel_event_runs_every_callback() {
        let group = Arc::new(TaskGroup::new(4));
        let dispatcher = EventDispatcher::new(group);
        let (tx, rx) = channel();

        for _ in 0..3 {
            let tx = tx.clone();
            dispatcher.connect(PARALLEL_PREFIX | 1, move |_| tx.send(()).unwrap());
        }

        dispatcher.emit(PARALLEL_PREFIX | 1, Arc::new(()));
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
    }

    #[test]
    fn emit_with_no_listeners_is_a_no_op() {
        let group = Arc::new(TaskGroup::new(1));
        let dispatcher = EventDispatcher::new(group);
        dispatcher.emit(99, Arc::new(()));
        // Reaching here without panicking is the assertion.
    }

    #[test]
    fn payload_downcasts_to_the_emitted_type() {
        let group = Arc::new(TaskGroup::new(1));
        let dispatcher = EventDispatcher::new(group);
        let (tx, rx) = channel();
        dispatcher.connect(1, move |e| {
            tx.send(*e.data_as::<u32>().unwrap()).unwrap();
        });
        dispatcher.emit(1, Arc::new(42u32));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }
}
