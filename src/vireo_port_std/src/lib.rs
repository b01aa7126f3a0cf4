//! Simulation environment for running the vireo kernel on a hosted target.
//!
//! On the real target the kernel owns one stack per task and a pair of
//! assembly routines (`Enter_Kernel`/`Exit_Kernel`) saves and restores
//! register state across stack switches. This port substitutes host threads
//! for stacks: every live task slot is backed by a worker thread parked
//! behind a gate, and "switching contexts" means opening exactly one gate.
//! The kernel main loop runs on the thread that called [`api::start`] (the
//! kernel stack), a timer thread plays the tick ISR by bumping an atomic
//! counter, and the lock around the [`Kernel`] value stands in for the
//! global interrupt mask.
//!
//! At any instant at most one of {kernel loop, some worker} is running,
//! which is what makes the simulation single-core. The scheduling is
//! utterly inefficient and entirely faithful.
mod threading;

pub mod api;

use std::any::Any;
use std::cell::OnceCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use spin::Mutex as SpinMutex;
use vireo_kernel::{cfg, Kernel, Reply, Request, TaskId, TaskSt};

use crate::threading::{Gate, ThreadId, WorkerPool};

/// Wall-clock length of one timer tick, matching the ~10 ms compare-match
/// period the hardware build programs into its timer.
pub const TICK_PERIOD: Duration = Duration::from_millis(10);

/// Association between a task slot and the worker thread backing it. The
/// pid disambiguates reuse: a slot whose task died and was replaced gets a
/// fresh worker.
#[derive(Debug, Clone, Copy)]
struct SlotBinding {
    pid: TaskId,
    thread: ThreadId,
}

/// The internal state of the port.
struct PortState {
    /// The kernel singleton. Holding this lock is the critical section that
    /// disabling interrupts provides on the real target.
    kernel: SpinMutex<Kernel>,
    workers: WorkerPool,
    bindings: SpinMutex<[Option<SlotBinding>; cfg::MAX_TASKS]>,
    /// Opened by a trapping task to hand the processor to the kernel loop.
    kernel_gate: Gate,
    /// The tick ISR: the timer thread increments, the kernel loop drains.
    tick_count: AtomicU32,
    shutdown: AtomicBool,
    /// First panic captured from a worker, re-raised by [`api::start`].
    failure: SpinMutex<Option<Box<dyn Any + Send>>>,
}

static STATE: Lazy<PortState> = Lazy::new(|| PortState {
    kernel: SpinMutex::new(Kernel::new()),
    workers: WorkerPool::new(),
    bindings: SpinMutex::new([None; cfg::MAX_TASKS]),
    kernel_gate: Gate::new(),
    tick_count: AtomicU32::new(0),
    shutdown: AtomicBool::new(false),
    failure: SpinMutex::new(None),
});

/// Per-worker identity, set before the task entry runs.
struct TaskThreadBlock {
    slot: usize,
    gate: Arc<Gate>,
}

thread_local! {
    static TLB: OnceCell<TaskThreadBlock> = const { OnceCell::new() };
}

fn in_task_context() -> bool {
    TLB.with(|cell| cell.get().is_some())
}

fn current_task_slot() -> Option<usize> {
    TLB.with(|cell| cell.get().map(|tlb| tlb.slot))
}

/// `Enter_Kernel`: record the request, wake the kernel loop, and park until
/// this task is dispatched again. Returns the reply the service step left
/// in the caller's descriptor.
fn trap(request: Request) -> Reply {
    let (slot, gate) = TLB.with(|cell| {
        let tlb = cell.get().expect("system call from outside a task");
        (tlb.slot, Arc::clone(&tlb.gate))
    });

    STATE.kernel.lock().post(slot, request);
    STATE.kernel_gate.open();
    gate.wait();

    STATE.kernel.lock().reply(slot)
}

/// Notify the kernel of a TERMINATE request without parking: the calling
/// worker is about to disappear and must never be scheduled again.
fn post_terminate(slot: usize) {
    STATE.kernel.lock().post(slot, Request::Terminate);
    STATE.kernel_gate.open();
}

/// Body of every worker thread. Runs the task entry and turns its return
/// into an implicit `Task_Terminate`; a panic aborts the whole simulation
/// and is re-raised from [`api::start`].
fn task_thread_main(slot: usize, gate: Arc<Gate>) {
    TLB.with(|cell| {
        cell.set(TaskThreadBlock { slot, gate })
            .ok()
            .expect("worker thread reused");
    });

    let entry = STATE
        .kernel
        .lock()
        .task_entry(slot)
        .expect("dispatched an empty slot");

    match catch_unwind(AssertUnwindSafe(entry)) {
        Ok(()) => post_terminate(slot),
        Err(payload) => {
            let mut failure = STATE.failure.lock();
            if failure.is_none() {
                *failure = Some(payload);
            }
            drop(failure);
            STATE.shutdown.store(true, Ordering::Relaxed);
            STATE.kernel_gate.open();
        }
    }
}

/// `Exit_Kernel`: make sure the chosen slot has a live worker behind it and
/// let that worker through its gate.
fn resume(slot: usize) {
    let pid = STATE.kernel.lock().task_pid(slot);

    let thread = {
        let mut bindings = STATE.bindings.lock();
        match bindings[slot] {
            Some(binding) if binding.pid == pid => binding.thread,
            stale => {
                if let Some(binding) = stale {
                    STATE.workers.remove(binding.thread);
                }
                let thread = STATE
                    .workers
                    .spawn(cfg::WORKSPACE, move |gate| task_thread_main(slot, gate));
                bindings[slot] = Some(SlotBinding { pid, thread });
                thread
            }
        }
    };

    STATE.workers.schedule(thread);
}

/// Drop the worker association of a slot whose task died.
fn unbind(slot: usize) {
    if let Some(binding) = STATE.bindings.lock()[slot].take() {
        STATE.workers.remove(binding.thread);
    }
}

/// Dispatch, busy-idling through the tick stream when nothing is READY.
/// `None` means a shutdown was requested while idle.
fn dispatch_or_idle(kernel: &mut Kernel) -> Option<usize> {
    loop {
        if let Some(slot) = kernel.dispatch() {
            return Some(slot);
        }
        if STATE.shutdown.load(Ordering::Relaxed) {
            return None;
        }
        // Idle: every task is waiting on time or on another task. The tick
        // counter keeps accumulating while we spin, the way re-enabled
        // interrupts keep firing through the idle scan on hardware.
        kernel.process_ticks(STATE.tick_count.swap(0, Ordering::Relaxed));
        std::thread::yield_now();
    }
}

/// The kernel main loop (`Next_Kernel_Request`): resume the current task,
/// wait for its next trap, credit pending ticks, service the request, and
/// re-dispatch when the caller lost the processor.
fn kernel_loop() {
    let mut slot = {
        let mut kernel = STATE.kernel.lock();
        match dispatch_or_idle(&mut kernel) {
            Some(slot) => slot,
            None => return,
        }
    };

    loop {
        resume(slot);
        STATE.kernel_gate.wait();
        if STATE.shutdown.load(Ordering::Relaxed) {
            break;
        }

        let mut kernel = STATE.kernel.lock();
        kernel.process_ticks(STATE.tick_count.swap(0, Ordering::Relaxed));
        let must_dispatch = kernel.service_current();

        if kernel.task_state_at(slot) == TaskSt::Dead {
            unbind(slot);
        }

        if must_dispatch {
            slot = match dispatch_or_idle(&mut kernel) {
                Some(next) => next,
                None => break,
            };
        }
    }
}
