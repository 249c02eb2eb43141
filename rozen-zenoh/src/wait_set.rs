//! Condition-variable fan-in across all engines.
//!
//! A [`WaitSet`] is a `{mutex, condvar, triggered}` triple. Engines with
//! queues record an attached wait set while their queue is empty and
//! trigger it when data arrives; guard conditions trigger it directly.
//! One wait set can be attached to any number of heterogeneous sources,
//! letting a caller block on all of them with a single condition variable.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Readiness primitive shared between a waiting caller and the engines.
#[derive(Default)]
pub struct WaitSet {
    triggered: Mutex<bool>,
    condvar: Condvar,
}

impl WaitSet {
    /// Create a fresh, untriggered wait set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark the wait set ready and wake the waiter.
    pub fn trigger(&self) {
        let mut triggered = self.triggered.lock();
        *triggered = true;
        self.condvar.notify_all();
    }

    /// Block until triggered or until `timeout` elapses.
    ///
    /// Consumes the trigger and reports whether it fired. `None` waits
    /// indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut triggered = self.triggered.lock();
        match timeout {
            None => {
                while !*triggered {
                    self.condvar.wait(&mut triggered);
                }
            }
            Some(timeout) => {
                let deadline = std::time::Instant::now() + timeout;
                while !*triggered {
                    if self.condvar.wait_until(&mut triggered, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        std::mem::take(&mut *triggered)
    }
}

/// Slot through which an engine holds its (at most one) attached waiter.
///
/// Attach is idempotent per caller; detach clears the slot before the
/// wait set can be destroyed.
#[derive(Default)]
pub struct Waiter {
    attached: Mutex<Option<Arc<WaitSet>>>,
}

impl Waiter {
    /// Record `wait_set` as the attached waiter.
    pub fn attach(&self, wait_set: &Arc<WaitSet>) {
        *self.attached.lock() = Some(Arc::clone(wait_set));
    }

    /// Clear the attached waiter.
    pub fn detach(&self) {
        *self.attached.lock() = None;
    }

    /// Trigger the attached waiter, if any.
    pub fn notify(&self) {
        if let Some(wait_set) = self.attached.lock().as_ref() {
            wait_set.trigger();
        }
    }
}

/// A manually triggered event source, used for graph-change notification.
#[derive(Default)]
pub struct GuardCondition {
    triggered: Mutex<bool>,
    waiter: Waiter,
}

impl GuardCondition {
    /// Create an untriggered guard condition.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Raise the condition and wake any attached wait set.
    pub fn trigger(&self) {
        *self.triggered.lock() = true;
        self.waiter.notify();
    }

    /// Report whether the condition fired, consuming the flag, otherwise
    /// attach `wait_set` to be woken by the next trigger.
    pub fn has_triggered_or_attach(&self, wait_set: &Arc<WaitSet>) -> bool {
        let mut triggered = self.triggered.lock();
        if *triggered {
            return true;
        }
        self.waiter.attach(wait_set);
        false
    }

    /// Detach any waiter and report whether the condition fired, consuming
    /// the flag.
    pub fn detach_and_take_triggered(&self) -> bool {
        self.waiter.detach();
        std::mem::take(&mut *self.triggered.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_times_out_untriggered() {
        let ws = WaitSet::new();
        assert!(!ws.wait(Some(Duration::from_millis(20))));
    }

    #[test]
    fn trigger_wakes_and_is_consumed() {
        let ws = WaitSet::new();
        ws.trigger();
        assert!(ws.wait(Some(Duration::from_millis(20))));
        assert!(!ws.wait(Some(Duration::from_millis(20))));
    }

    #[test]
    fn trigger_from_other_thread_wakes_waiter() {
        let ws = WaitSet::new();
        let ws2 = Arc::clone(&ws);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            ws2.trigger();
        });
        assert!(ws.wait(Some(Duration::from_secs(5))));
        handle.join().unwrap();
    }

    #[test]
    fn waiter_notifies_only_while_attached() {
        let waiter = Waiter::default();
        let ws = WaitSet::new();
        waiter.attach(&ws);
        waiter.notify();
        assert!(ws.wait(Some(Duration::from_millis(20))));

        waiter.detach();
        waiter.notify();
        assert!(!ws.wait(Some(Duration::from_millis(20))));
    }

    #[test]
    fn guard_condition_attach_then_trigger() {
        let guard = GuardCondition::new();
        let ws = WaitSet::new();
        assert!(!guard.has_triggered_or_attach(&ws));
        guard.trigger();
        assert!(ws.wait(Some(Duration::from_secs(1))));
        assert!(guard.detach_and_take_triggered());
        assert!(!guard.detach_and_take_triggered());
    }

    #[test]
    fn guard_condition_pre_triggered() {
        let guard = GuardCondition::new();
        guard.trigger();
        let ws = WaitSet::new();
        assert!(guard.has_triggered_or_attach(&ws));
    }
}
