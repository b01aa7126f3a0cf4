//! Tasks
use crate::{
    cfg,
    error::{CreateTaskError, ResumeTaskError, SuspendTaskError},
    Kernel, Priority, Reply, Request, TaskEntry, TaskId, Ticks,
};

/// Task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSt {
    /// Free slot, eligible for reuse by task creation.
    Dead,
    Ready,
    Running,
    /// Counting down `remaining_ticks`; made Ready by the tick handler.
    Sleeping,
    /// Parked by `Task_Suspend`; the pre-suspension state is kept in
    /// `last_st` and restored by `Task_Resume`.
    Suspended,
    WaitEvent,
    WaitMutex,
}

/// *Task control block* - the state data of one task slot.
///
/// The machine context (stack and saved registers) is deliberately absent:
/// it belongs to the port, which associates one with each live slot.
pub struct TaskCb {
    /// Task identifier. `0` only while the slot has never been used; a DEAD
    /// slot keeps its stale id until reused, so lookups must check `st`.
    pub(crate) pid: TaskId,
    /// Current effective priority. Priority inheritance raises it in place;
    /// the pre-lock value is kept by the owning mutex (`own_pri`) and
    /// restored on release.
    pub(crate) pri: Priority,
    /// Integer argument captured at creation, exposed via `Task_GetArg`.
    pub(crate) arg: i32,
    pub(crate) st: TaskSt,
    /// State to restore when a SUSPENDED task is resumed.
    pub(crate) last_st: TaskSt,
    /// Pending system-call request, recorded by the caller before trapping.
    pub(crate) request: Request,
    /// Sleep budget in ticks. Signed: the batch decrement may overshoot.
    pub(crate) remaining_ticks: i64,
    pub(crate) entry: Option<TaskEntry>,
    /// Outcome of the most recently serviced request.
    pub(crate) reply: Reply,
}

impl TaskCb {
    pub(crate) const INIT: Self = Self {
        pid: 0,
        pri: 0,
        arg: 0,
        st: TaskSt::Dead,
        last_st: TaskSt::Dead,
        request: Request::None,
        remaining_ticks: 0,
        entry: None,
        reply: Reply::INIT,
    };
}

impl Kernel {
    /// Allocate a slot and build the descriptor for a new task
    /// (`Kernel_Create_Task`). The task becomes READY but is not dispatched;
    /// it first runs at the creator's next scheduling point.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        pri: Priority,
        arg: i32,
    ) -> Result<TaskId, CreateTaskError> {
        if self.task_count == cfg::MAX_TASKS {
            return Err(CreateTaskError::MaxProcess);
        }

        let slot = self
            .tasks
            .iter()
            .position(|t| t.st == TaskSt::Dead)
            .ok_or(CreateTaskError::MaxProcess)?;

        self.last_pid += 1;
        self.task_count += 1;

        let t = &mut self.tasks[slot];
        t.pid = self.last_pid;
        t.pri = pri;
        t.arg = arg;
        t.st = TaskSt::Ready;
        t.last_st = TaskSt::Ready;
        t.request = Request::None;
        t.remaining_ticks = 0;
        t.entry = Some(entry);
        t.reply = Reply::INIT;

        log::trace!("created task {} with priority {pri}", t.pid);
        Ok(self.last_pid)
    }

    /// Tear down the current task (`Kernel_Terminate_Task`): every mutex it
    /// owns is handed to its best waiter (or freed), then the slot is marked
    /// DEAD for reuse.
    pub(crate) fn terminate_current(&mut self) {
        let slot = self.current.expect("terminate with no running task");
        let pid = self.tasks[slot].pid;

        self.release_owned_mutexes(pid);

        self.tasks[slot].st = TaskSt::Dead;
        self.task_count -= 1;
        log::trace!("task {pid} terminated");
    }

    /// `Kernel_Suspend_Task`. Refused when the target is DEAD, already
    /// SUSPENDED, or owns any mutex (suspending a lock holder would invert
    /// the priority-inheritance protocol).
    pub(crate) fn suspend_task(&mut self, pid: TaskId) -> Result<(), SuspendTaskError> {
        let slot = self
            .slot_by_pid(pid)
            .ok_or(SuspendTaskError::PidNotFound)?;

        match self.tasks[slot].st {
            TaskSt::Dead | TaskSt::Suspended => {
                return Err(SuspendTaskError::SuspendNonrunningTask)
            }
            _ => {}
        }

        if self.mutexes.iter().any(|m| m.id != 0 && m.owner == pid) {
            return Err(SuspendTaskError::SuspendNonrunningTask);
        }

        let t = &mut self.tasks[slot];
        // A suspended RUNNING task (self-suspension) resumes as READY; it
        // has to win a dispatch again before it may run.
        t.last_st = match t.st {
            TaskSt::Running => TaskSt::Ready,
            st => st,
        };
        t.st = TaskSt::Suspended;
        log::trace!("task {pid} suspended (was {:?})", t.last_st);
        Ok(())
    }

    /// `Kernel_Resume_Task`. Restores the state saved at suspension; a sleep
    /// that expired while suspended resumes as READY.
    pub(crate) fn resume_task(&mut self, pid: TaskId) -> Result<(), ResumeTaskError> {
        let slot = self
            .slot_by_pid(pid)
            .ok_or(ResumeTaskError::PidNotFound)?;

        if self.tasks[slot].st != TaskSt::Suspended {
            return Err(ResumeTaskError::ResumeNonsuspendedTask);
        }

        let t = &mut self.tasks[slot];
        t.st = t.last_st;
        t.last_st = TaskSt::Suspended;
        log::trace!("task {pid} resumed into {:?}", t.st);
        Ok(())
    }

    /// Put the current task to sleep for at least `ticks` tick periods.
    pub(crate) fn sleep_current(&mut self, ticks: Ticks) {
        let slot = self.current.expect("sleep with no running task");
        let t = &mut self.tasks[slot];
        t.st = TaskSt::Sleeping;
        t.remaining_ticks = i64::from(ticks);
    }

    /// Find the slot holding `pid`. Stale pids in DEAD slots are found too;
    /// callers that care must check the state.
    pub(crate) fn slot_by_pid(&self, pid: TaskId) -> Option<usize> {
        if pid == 0 {
            return None;
        }
        self.tasks.iter().position(|t| t.pid == pid)
    }

    /// Identifier of the task in `slot`.
    pub fn task_pid(&self, slot: usize) -> TaskId {
        self.tasks[slot].pid
    }

    /// State of the task in `slot` (port-side bookkeeping).
    pub fn task_state_at(&self, slot: usize) -> TaskSt {
        self.tasks[slot].st
    }

    /// Entry function of the task in `slot`, if the slot was ever used.
    pub fn task_entry(&self, slot: usize) -> Option<TaskEntry> {
        self.tasks[slot].entry
    }

    /// Creation argument of the task in `slot`.
    pub fn task_arg(&self, slot: usize) -> i32 {
        self.tasks[slot].arg
    }

    /// Identifier of the currently RUNNING task.
    pub fn current_pid(&self) -> Option<TaskId> {
        self.current.map(|slot| self.tasks[slot].pid)
    }

    /// State of the task with the given identifier (diagnostic).
    pub fn task_state(&self, pid: TaskId) -> Option<TaskSt> {
        self.slot_by_pid(pid).map(|slot| self.tasks[slot].st)
    }

    /// Current effective priority of the task with the given identifier
    /// (diagnostic; differs from the creation priority while the task holds
    /// a mutex some higher-priority task is blocked on).
    pub fn task_priority(&self, pid: TaskId) -> Option<Priority> {
        self.slot_by_pid(pid).map(|slot| self.tasks[slot].pri)
    }
}
