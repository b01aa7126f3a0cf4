//! The vireo kernel: a small priority-scheduled RTOS for a single-core
//! microcontroller.
//!
//! The kernel is a pure state machine over three fixed-capacity tables
//! (tasks, one-shot events, recursive mutexes with priority inheritance), a
//! rotor-based priority scheduler, and a batch tick handler. It performs no
//! context switching itself: a *port* owns the machine contexts and drives
//! the kernel through three entry points that together form the full-served
//! trap loop:
//!
//!  1. [`Kernel::service_current`] - the current task has trapped with a
//!     [`Request`] recorded in its descriptor; handle it and report whether
//!     the port must pick a new task to run.
//!  2. [`Kernel::dispatch`] - pick the next task. `None` means nothing is
//!     ready; the port is expected to keep feeding ticks through
//!     [`Kernel::process_ticks`] and retry (the idle loop).
//!  3. [`Kernel::process_ticks`] - credit timer ticks accumulated by the
//!     tick interrupt to every sleeping task, in one batch.
//!
//! Everything here is safe, heap-free code; all mutation happens behind
//! whatever critical-section lock the port wraps the [`Kernel`] value in.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test
#![forbid(unsafe_code)]

pub mod cfg;
mod error;
mod event;
mod mutex;
mod sched;
mod task;

pub use self::error::{
    CreateEventError, CreateMutexError, CreateTaskError, LockMutexError, ResultCode,
    ResumeTaskError, SignalEventError, SleepError, SuspendTaskError, UnlockMutexError,
    WaitEventError, YieldError,
};
pub use self::event::EventCb;
pub use self::mutex::MutexCb;
pub use self::task::{TaskCb, TaskSt};

/// Task identifier. `0` is never a valid id; identifiers are assigned from a
/// monotonic counter and not reused within a boot.
pub type TaskId = u16;

/// Event identifier. Same numbering rules as [`TaskId`].
pub type EventId = u16;

/// Mutex identifier. Same numbering rules as [`TaskId`].
pub type MutexId = u16;

/// Task priority. Numerically smaller is more favourable;
/// [`cfg::LOWEST_PRIORITY`] is the least favourable valid value.
pub type Priority = u8;

/// A duration counted in timer tick periods.
pub type Ticks = u32;

/// A task entry point.
pub type TaskEntry = fn();

/// A system-call request, recorded in the caller's descriptor before the
/// caller traps into the kernel.
#[derive(Debug, Clone, Copy)]
pub enum Request {
    /// No pending request. Also the trap code of a voluntary yield forced by
    /// an interrupt return path, which is why it is serviced like [`Yield`].
    ///
    /// [`Yield`]: Request::Yield
    None,
    CreateTask {
        entry: TaskEntry,
        pri: Priority,
        arg: i32,
    },
    Terminate,
    Suspend(TaskId),
    Resume(TaskId),
    Sleep(Ticks),
    CreateEvent,
    WaitEvent(EventId),
    SignalEvent(EventId),
    CreateMutex,
    LockMutex(MutexId),
    UnlockMutex(MutexId),
    Yield,
}

/// The outcome of a serviced request, left in the caller's descriptor for
/// its syscall wrapper to read after it resumes.
///
/// Reporting outcomes through globals (a lone `err` register plus the last
/// assigned identifier) would let any intervening task clobber them before
/// the caller ran again; a per-task reply keeps the information race-free.
#[derive(Debug, Clone, Copy)]
pub struct Reply {
    /// Result code of the serviced request.
    pub code: ResultCode,
    /// Identifier produced by a creation request, `0` otherwise.
    pub id: u16,
}

impl Reply {
    pub(crate) const INIT: Self = Self {
        code: ResultCode::Success,
        id: 0,
    };
}

/// The whole kernel state: the three object tables and the scheduler
/// bookkeeping. A port wraps one of these in its critical-section lock (the
/// stand-in for the global interrupt mask) and drives it from its trap loop.
pub struct Kernel {
    pub(crate) tasks: [TaskCb; cfg::MAX_TASKS],
    pub(crate) events: [EventCb; cfg::MAX_EVENTS],
    pub(crate) mutexes: [MutexCb; cfg::MAX_MUTEXES],

    /// Rotor position of the dispatch scan. Scanning starts one past the
    /// previous winner so that equal-priority tasks take turns.
    pub(crate) rotor: usize,
    /// Slot of the task currently considered RUNNING, if any.
    pub(crate) current: Option<usize>,
    /// Set by `OS_Start`; most system calls are refused while clear.
    pub(crate) active: bool,

    pub(crate) task_count: usize,
    pub(crate) event_count: usize,
    pub(crate) mutex_count: usize,

    pub(crate) last_pid: TaskId,
    pub(crate) last_event_id: EventId,
    pub(crate) last_mutex_id: MutexId,

    /// The kernel-wide last-error register. Updated by every serviced
    /// request; also readable through [`Kernel::last_error`] as a diagnostic.
    pub(crate) last_error: ResultCode,
}

impl Kernel {
    /// An inactive kernel with every table empty.
    pub const fn new() -> Self {
        Self {
            tasks: [TaskCb::INIT; cfg::MAX_TASKS],
            events: [EventCb::INIT; cfg::MAX_EVENTS],
            mutexes: [MutexCb::INIT; cfg::MAX_MUTEXES],
            rotor: 0,
            current: None,
            active: false,
            task_count: 0,
            event_count: 0,
            mutex_count: 0,
            last_pid: 0,
            last_event_id: 0,
            last_mutex_id: 0,
            last_error: ResultCode::Success,
        }
    }

    /// Reinitialize everything (`OS_Init`).
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Whether `OS_Start` has been reached.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Mark the kernel active or inactive. Called by the port around its
    /// main loop.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Slot index of the task currently considered RUNNING.
    #[inline]
    pub fn current_slot(&self) -> Option<usize> {
        self.current
    }

    /// The last-error register.
    #[inline]
    pub fn last_error(&self) -> ResultCode {
        self.last_error
    }

    /// Overwrite the last-error register. Used by the port for failures it
    /// detects outside the service loop (e.g. system calls before start).
    pub fn record_code(&mut self, code: ResultCode) {
        self.last_error = code;
    }

    /// Record a request in a task's descriptor. The port calls this from the
    /// syscall wrapper side of the trap, with the critical section held.
    pub fn post(&mut self, slot: usize, request: Request) {
        self.tasks[slot].request = request;
    }

    /// The reply left by the most recent request serviced for `slot`.
    pub fn reply(&self, slot: usize) -> Reply {
        self.tasks[slot].reply
    }

    /// Number of live (non-DEAD) tasks.
    #[inline]
    pub fn task_count(&self) -> usize {
        self.task_count
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
