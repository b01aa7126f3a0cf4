//! Compile-time kernel parameters.
//!
//! Everything the kernel allocates is sized here, at compile time. There is
//! no heap; a table that fills up refuses further requests with an error
//! code instead of growing.
use crate::Priority;

/// Capacity of the task table.
pub const MAX_TASKS: usize = 16;

/// Capacity of the event table.
pub const MAX_EVENTS: usize = 16;

/// Capacity of the mutex table.
pub const MAX_MUTEXES: usize = 8;

/// Per-task stack size in bytes.
///
/// The kernel itself does not own task stacks; the port consumes this value
/// when it allocates the machine context backing a task (the hosted port
/// passes it to `std::thread::Builder::stack_size`).
pub const WORKSPACE: usize = 256 * 1024;

/// The numerically largest (least favourable) valid task priority.
///
/// Smaller values dispatch first; `0` is the most favourable priority.
pub const LOWEST_PRIORITY: Priority = 10;

/// Upper bound on pending signals recorded by an event with no waiter.
///
/// Signals beyond the bound are dropped. `0` disables the bound and lets the
/// pending count grow without limit.
pub const MAX_EVENT_SIG_MISS: u32 = 1;
