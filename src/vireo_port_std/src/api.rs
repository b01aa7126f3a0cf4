//! The user-side system-call interface.
//!
//! These are the hosted counterparts of the `Task_*`/`Event_*`/`Mutex_*`
//! wrappers of the hardware build: each
//! call records a request in the calling task's descriptor and traps into
//! the kernel loop, resuming when the task is dispatched again. The three
//! creation calls also work before [`start`] by invoking the kernel
//! routines directly, which is how an application's `a_main` builds its
//! initial task set.
//!
//! A typical application (or test) boots the way an `a_main` does on
//! hardware:
//!
//! ```no_run
//! use vireo_port_std::api;
//!
//! fn chatter() {
//!     vireo_port_std::api::yield_now().unwrap();
//! }
//!
//! api::init();
//! api::create_task(chatter, 5, 0).unwrap();
//! api::start();
//! ```
use std::sync::atomic::Ordering;

use vireo_kernel::{
    CreateEventError, CreateMutexError, CreateTaskError, EventId, LockMutexError, MutexId,
    Priority, Request, ResultCode, ResumeTaskError, SignalEventError, SleepError,
    SuspendTaskError, TaskEntry, TaskId, TaskSt, Ticks, UnlockMutexError, WaitEventError,
    YieldError,
};

use crate::threading::Gate;
use crate::{current_task_slot, in_task_context, kernel_loop, post_terminate, trap, STATE};

/// `OS_Init`: reset the kernel tables and the port bookkeeping. Must not be
/// called while [`start`] is running.
pub fn init() {
    let mut kernel = STATE.kernel.lock();
    assert!(!kernel.is_active(), "init while the kernel is running");
    kernel.reset();
    drop(kernel);

    STATE.workers.clear();
    *STATE.bindings.lock() = [None; vireo_kernel::cfg::MAX_TASKS];
    STATE.tick_count.store(0, Ordering::Relaxed);
    STATE.shutdown.store(false, Ordering::Relaxed);
    STATE.kernel_gate.drain();
    *STATE.failure.lock() = None;
}

/// `OS_Start`: run the kernel main loop on the calling thread.
///
/// On real hardware this never returns. In the simulation it returns once
/// [`shutdown`] is requested; a panic raised inside any task is re-raised
/// here. A start with no created tasks, or while already active, is a
/// logged no-op.
pub fn start() {
    {
        let mut kernel = STATE.kernel.lock();
        if kernel.is_active() || kernel.task_count() == 0 {
            log::warn!("start refused: already active or no tasks created");
            return;
        }
        kernel.set_active(true);
    }

    STATE.shutdown.store(false, Ordering::Relaxed);
    STATE.tick_count.store(0, Ordering::Relaxed);
    STATE.kernel_gate.drain();

    log::trace!("starting the timer thread");
    let timer = std::thread::spawn(|| {
        while !STATE.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(crate::TICK_PERIOD);
            STATE.tick_count.fetch_add(1, Ordering::Relaxed);
        }
    });

    kernel_loop();

    timer.join().expect("timer thread panicked");
    STATE.kernel.lock().set_active(false);
    log::trace!("kernel loop stopped");

    if let Some(payload) = STATE.failure.lock().take() {
        std::panic::resume_unwind(payload);
    }
}

/// Stop the kernel loop and make [`start`] return. Simulation-only test
/// support; there is no such call on hardware. When called from a task, the
/// calling worker never runs again.
pub fn shutdown() {
    STATE.shutdown.store(true, Ordering::Relaxed);
    STATE.kernel_gate.open();
    if in_task_context() {
        Gate::new().wait();
        unreachable!();
    }
}

/// `Task_Create`. Before [`start`] the task table is edited directly; from
/// inside a task this is a system call like any other. The new task never
/// preempts its creator.
pub fn create_task(
    entry: TaskEntry,
    pri: Priority,
    arg: i32,
) -> Result<TaskId, CreateTaskError> {
    if in_task_context() {
        let reply = trap(Request::CreateTask { entry, pri, arg });
        match CreateTaskError::from_code(reply.code) {
            Some(e) => Err(e),
            None => Ok(reply.id),
        }
    } else {
        let mut kernel = STATE.kernel.lock();
        let r = kernel.create_task(entry, pri, arg);
        kernel.record_code(match r {
            Ok(_) => ResultCode::Success,
            Err(e) => e.into(),
        });
        r
    }
}

/// `Task_Terminate`: the calling task terminates itself, handing any owned
/// mutexes to their best waiters. Never returns once the kernel is active;
/// before [`start`] it only records `KernelInactive`.
pub fn terminate() {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return;
    }
    let slot = current_task_slot().expect("terminate from outside a task");
    post_terminate(slot);
    Gate::new().wait();
    unreachable!();
}

/// `Task_Yield`: give up the processor voluntarily. Equal-priority peers
/// take turns through yields; without one, a task runs until it blocks.
pub fn yield_now() -> Result<(), YieldError> {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return Err(YieldError::KernelInactive);
    }
    let reply = trap(Request::Yield);
    match YieldError::from_code(reply.code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `Task_Sleep`: block for *at least* `ticks` tick periods. Ticks that
/// arrive while the kernel is busy are credited late, never dropped, so the
/// sleep can only overshoot.
pub fn sleep(ticks: Ticks) -> Result<(), SleepError> {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return Err(SleepError::KernelInactive);
    }
    let reply = trap(Request::Sleep(ticks));
    match SleepError::from_code(reply.code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `Task_Suspend`. Refused when the target is dead, already suspended, or
/// owns a mutex.
pub fn suspend(pid: TaskId) -> Result<(), SuspendTaskError> {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return Err(SuspendTaskError::KernelInactive);
    }
    let reply = trap(Request::Suspend(pid));
    match SuspendTaskError::from_code(reply.code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `Task_Resume`: put a suspended task back into the state it was
/// suspended from (a sleep that expired in the meantime resumes as READY).
pub fn resume(pid: TaskId) -> Result<(), ResumeTaskError> {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return Err(ResumeTaskError::KernelInactive);
    }
    let reply = trap(Request::Resume(pid));
    match ResumeTaskError::from_code(reply.code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `Task_GetArg`: the integer argument captured at creation, or -1 when the
/// kernel is inactive.
pub fn get_arg() -> i32 {
    if !STATE.kernel.lock().is_active() {
        return -1;
    }
    match current_task_slot() {
        Some(slot) => STATE.kernel.lock().task_arg(slot),
        None => -1,
    }
}

/// `Event_Init`: allocate a fresh one-shot event.
pub fn create_event() -> Result<EventId, CreateEventError> {
    if in_task_context() {
        let reply = trap(Request::CreateEvent);
        match CreateEventError::from_code(reply.code) {
            Some(e) => Err(e),
            None => Ok(reply.id),
        }
    } else {
        let mut kernel = STATE.kernel.lock();
        let r = kernel.create_event();
        kernel.record_code(match r {
            Ok(_) => ResultCode::Success,
            Err(e) => e.into(),
        });
        r
    }
}

/// `Event_Wait`: block until the event is signaled. A signal that arrived
/// first is consumed immediately without blocking - and consumes the event
/// object with it, so the identifier is dead afterwards either way.
pub fn wait_event(id: EventId) -> Result<(), WaitEventError> {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return Err(WaitEventError::KernelInactive);
    }
    let reply = trap(Request::WaitEvent(id));
    match WaitEventError::from_code(reply.code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `Event_Signal`: wake the waiter, or record the signal for a future wait.
/// The no-waiter case reports [`SignalEventError::SignalUnownedEvent`] as a
/// soft warning; the signal itself is not lost.
pub fn signal_event(id: EventId) -> Result<(), SignalEventError> {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return Err(SignalEventError::KernelInactive);
    }
    let reply = trap(Request::SignalEvent(id));
    match SignalEventError::from_code(reply.code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `Mutex_Init`: allocate a fresh recursive mutex.
pub fn create_mutex() -> Result<MutexId, CreateMutexError> {
    if in_task_context() {
        let reply = trap(Request::CreateMutex);
        match CreateMutexError::from_code(reply.code) {
            Some(e) => Err(e),
            None => Ok(reply.id),
        }
    } else {
        let mut kernel = STATE.kernel.lock();
        let r = kernel.create_mutex();
        kernel.record_code(match r {
            Ok(_) => ResultCode::Success,
            Err(e) => e.into(),
        });
        r
    }
}

/// `Mutex_Lock`: recursive lock with one-step priority inheritance. Blocks
/// while another task owns the mutex; while blocked, the owner runs with at
/// least the caller's priority.
pub fn lock_mutex(id: MutexId) -> Result<(), LockMutexError> {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return Err(LockMutexError::KernelInactive);
    }
    let reply = trap(Request::LockMutex(id));
    match LockMutexError::from_code(reply.code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `Mutex_Unlock`: undo one level of locking. Releasing the last level
/// hands the mutex to the waiter with the most favourable priority
/// (earliest arrival among equals) and may preempt the caller. An unlock by
/// a non-owner is ignored.
pub fn unlock_mutex(id: MutexId) -> Result<(), UnlockMutexError> {
    if !STATE.kernel.lock().is_active() {
        STATE.kernel.lock().record_code(ResultCode::KernelInactive);
        return Err(UnlockMutexError::KernelInactive);
    }
    let reply = trap(Request::UnlockMutex(id));
    match UnlockMutexError::from_code(reply.code) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// The kernel's last-error register: the result code of the most recently
/// serviced request, whoever issued it.
pub fn last_error() -> ResultCode {
    STATE.kernel.lock().last_error()
}

/// Diagnostic: the state of the task with the given identifier.
pub fn task_state(pid: TaskId) -> Option<TaskSt> {
    STATE.kernel.lock().task_state(pid)
}

/// Diagnostic: the current effective priority of a task. Differs from the
/// creation priority while the task holds a mutex a higher-priority task is
/// blocked on.
pub fn task_priority(pid: TaskId) -> Option<Priority> {
    STATE.kernel.lock().task_priority(pid)
}

/// Diagnostic: a mutex's recursive lock depth.
pub fn mutex_hold_count(id: MutexId) -> Option<u32> {
    STATE.kernel.lock().mutex_hold_count(id)
}

/// Diagnostic: a mutex's owner pid, `0` when unlocked.
pub fn mutex_owner(id: MutexId) -> Option<TaskId> {
    STATE.kernel.lock().mutex_owner(id)
}
