use std::io;

use tracing::warn;

/// Controls the scheduling class of the calling thread.
pub trait Scheduler {
    /// Moves the thread to the highest real-time priority available.
    fn set_max_priority(&mut self) -> io::Result<()>;
    /// Returns the thread to the default time-shared scheduler.
    fn set_default_priority(&mut self) -> io::Result<()>;
}

/// Uses `SCHED_FIFO` for elevated priority and `SCHED_OTHER` otherwise.
///
/// Elevating requires root or `CAP_SYS_NICE`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealtimeScheduler;

impl RealtimeScheduler {
    fn set_scheduler(policy: libc::c_int, priority: libc::c_int) -> io::Result<()> {
        // SAFETY: sched_param is plain data; all-zero is a valid value.
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        param.sched_priority = priority;
        // SAFETY: `param` is a valid sched_param and pid 0 names the calling thread.
        if unsafe { libc::sched_setscheduler(0, policy, &param) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Scheduler for RealtimeScheduler {
    fn set_max_priority(&mut self) -> io::Result<()> {
        // SAFETY: plain query with a valid policy constant.
        let priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        if priority == -1 {
            return Err(io::Error::last_os_error());
        }
        RealtimeScheduler::set_scheduler(libc::SCHED_FIFO, priority)
    }

    fn set_default_priority(&mut self) -> io::Result<()> {
        RealtimeScheduler::set_scheduler(libc::SCHED_OTHER, 0)
    }
}

/// Holds the thread at maximum priority until dropped.
///
/// Failing to change the scheduler is logged and otherwise ignored: sampling still
/// works without real-time priority, just with more jitter.
#[must_use = "priority is restored as soon as the guard is dropped"]
pub struct PriorityGuard<'s, S: Scheduler> {
    scheduler: &'s mut S,
}

impl<'s, S: Scheduler> PriorityGuard<'s, S> {
    pub fn elevate(scheduler: &'s mut S) -> PriorityGuard<'s, S> {
        if let Err(err) = scheduler.set_max_priority() {
            warn!(error = %err, "unable to raise scheduling priority");
        }
        PriorityGuard { scheduler }
    }
}

impl<'s, S: Scheduler> Drop for PriorityGuard<'s, S> {
    fn drop(&mut self) {
        if let Err(err) = self.scheduler.set_default_priority() {
            warn!(error = %err, "unable to restore default scheduling priority");
        }
    }
}
