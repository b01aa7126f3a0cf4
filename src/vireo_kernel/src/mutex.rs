//! Recursive mutexes with priority inheritance
use arrayvec::ArrayVec;

use crate::{
    cfg,
    error::{CreateMutexError, LockMutexError, UnlockMutexError},
    Kernel, MutexId, Priority, TaskId, TaskSt,
};

/// A blocked lock request parked on a mutex.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Waiter {
    pub(crate) pid: TaskId,
    /// The waiter's priority at enqueue time. This value both drives the
    /// handoff choice and becomes the new owner's `own_pri`.
    pub(crate) pri: Priority,
    /// Arrival ordinal from the per-mutex counter; breaks priority ties in
    /// favour of the earliest arrival.
    pub(crate) order: u32,
}

/// *Mutex control block* - the state data of a mutex.
pub struct MutexCb {
    /// Mutex identifier. `0` marks a free slot.
    pub(crate) id: MutexId,
    /// Pid of the owning task; `0` when unlocked.
    pub(crate) owner: TaskId,
    /// Recursive lock depth. The owner must unlock as many times as it
    /// locked.
    pub(crate) count: u32,
    /// The owner's priority recorded when it took the lock, restored on
    /// release (undoing any inheritance the ownership picked up).
    pub(crate) own_pri: Priority,
    pub(crate) waiters: ArrayVec<Waiter, { cfg::MAX_TASKS }>,
    /// Monotonic arrival counter feeding [`Waiter::order`].
    pub(crate) next_order: u32,
}

impl MutexCb {
    pub(crate) const INIT: Self = Self {
        id: 0,
        owner: 0,
        count: 0,
        own_pri: 0,
        waiters: ArrayVec::new_const(),
        next_order: 0,
    };
}

/// Index of the waiter to hand the mutex to: numerically smallest priority,
/// ties broken by the smallest arrival ordinal.
pub(crate) fn best_waiter(waiters: &[Waiter]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, w) in waiters.iter().enumerate() {
        best = match best {
            None => Some(i),
            Some(b) => {
                let cur = &waiters[b];
                if w.pri < cur.pri || (w.pri == cur.pri && w.order < cur.order) {
                    Some(i)
                } else {
                    Some(b)
                }
            }
        };
    }
    best
}

impl Kernel {
    /// Allocate a mutex slot and assign it a fresh identifier
    /// (`Kernel_Create_Mutex`).
    pub fn create_mutex(&mut self) -> Result<MutexId, CreateMutexError> {
        if self.mutex_count >= cfg::MAX_MUTEXES {
            return Err(CreateMutexError::MaxMutex);
        }

        let slot = self
            .mutexes
            .iter()
            .position(|m| m.id == 0)
            .ok_or(CreateMutexError::MaxMutex)?;

        self.last_mutex_id += 1;
        self.mutex_count += 1;
        self.mutexes[slot] = MutexCb {
            id: self.last_mutex_id,
            ..MutexCb::INIT
        };

        log::trace!("created mutex {}", self.last_mutex_id);
        Ok(self.last_mutex_id)
    }

    /// `Kernel_Lock_Mutex`. Free mutexes are taken immediately and reentrant
    /// locks just deepen the count; otherwise the caller joins the waiter
    /// set, lends its priority to the owner if more favourable, and blocks.
    pub(crate) fn lock_mutex_current(&mut self, id: MutexId) -> Result<(), LockMutexError> {
        let slot = self.current.expect("lock with no running task");
        let (pid, pri) = {
            let t = &self.tasks[slot];
            (t.pid, t.pri)
        };

        let mi = self
            .mutex_index(id)
            .map_err(|code| LockMutexError::from_code(code).unwrap_or(LockMutexError::MutexNotFound))?;

        let m = &mut self.mutexes[mi];
        if m.owner == 0 {
            m.owner = pid;
            m.count = 1;
            m.own_pri = pri;
            log::trace!("task {pid} locked mutex {id}");
            return Ok(());
        }

        if m.owner == pid {
            m.count += 1;
            return Ok(());
        }

        m.next_order += 1;
        let order = m.next_order;
        m.waiters.push(Waiter { pid, pri, order });
        let owner = m.owner;

        // One-step priority inheritance: raise the owner, and only the
        // owner, to the blocked caller's priority.
        if let Some(owner_slot) = self.slot_by_pid(owner) {
            if pri < self.tasks[owner_slot].pri {
                self.tasks[owner_slot].pri = pri;
                log::trace!("task {owner} inherits priority {pri} from task {pid}");
            }
        }

        self.tasks[slot].st = TaskSt::WaitMutex;
        log::trace!("task {pid} blocked on mutex {id}");
        Ok(())
    }

    /// `Kernel_Unlock_Mutex`. A non-owner's unlock is rejected silently; a
    /// recursive unlock just shrinks the count; releasing the last level
    /// hands the mutex to the best waiter (demoting the caller to READY so
    /// the wakeup can preempt) or frees it.
    pub(crate) fn unlock_mutex_current(&mut self, id: MutexId) -> Result<(), UnlockMutexError> {
        let slot = self.current.expect("unlock with no running task");
        let pid = self.tasks[slot].pid;

        let mi = self
            .mutex_index(id)
            .map_err(|code| UnlockMutexError::from_code(code).unwrap_or(UnlockMutexError::MutexNotFound))?;

        if self.mutexes[mi].owner != pid {
            log::debug!("task {pid} tried to unlock mutex {id} it does not own");
            return Ok(());
        }

        if self.mutexes[mi].count > 1 {
            self.mutexes[mi].count -= 1;
            return Ok(());
        }

        if self.mutexes[mi].waiters.is_empty() {
            let own_pri = self.mutexes[mi].own_pri;
            self.mutexes[mi].owner = 0;
            self.mutexes[mi].count = 0;
            self.tasks[slot].pri = own_pri;
            log::trace!("task {pid} released mutex {id}");
            return Ok(());
        }

        self.hand_off(mi);
        self.tasks[slot].st = TaskSt::Ready;
        Ok(())
    }

    /// Hand a mutex to its best waiter: the winner becomes the owner with
    /// `count = 1`, the former owner's priority reverts to the value stored
    /// at lock time, and the winner wakes to READY.
    fn hand_off(&mut self, mi: usize) {
        let m = &mut self.mutexes[mi];
        let wi = best_waiter(&m.waiters).expect("hand_off on empty waiter set");
        let winner = m.waiters.swap_remove(wi);

        let former = m.owner;
        let restore_pri = m.own_pri;
        m.owner = winner.pid;
        m.own_pri = winner.pri;
        m.count = 1;
        let id = m.id;

        if let Some(former_slot) = self.slot_by_pid(former) {
            self.tasks[former_slot].pri = restore_pri;
        }
        if let Some(winner_slot) = self.slot_by_pid(winner.pid) {
            self.tasks[winner_slot].st = TaskSt::Ready;
        }
        log::trace!("mutex {id} handed from task {former} to task {}", winner.pid);
    }

    /// Terminate-time sweep: every mutex owned by `pid` is handed to its
    /// best waiter, or freed when nobody is waiting.
    pub(crate) fn release_owned_mutexes(&mut self, pid: TaskId) {
        for mi in 0..cfg::MAX_MUTEXES {
            if self.mutexes[mi].id == 0 || self.mutexes[mi].owner != pid {
                continue;
            }
            if self.mutexes[mi].waiters.is_empty() {
                self.mutexes[mi].owner = 0;
                self.mutexes[mi].count = 0;
            } else {
                self.hand_off(mi);
            }
        }
    }

    /// Recursive lock depth of a mutex (diagnostic). `None` for unknown ids.
    pub fn mutex_hold_count(&self, id: MutexId) -> Option<u32> {
        self.mutex_index(id).ok().map(|mi| self.mutexes[mi].count)
    }

    /// Pid of a mutex's owner, `0` when unlocked (diagnostic).
    pub fn mutex_owner(&self, id: MutexId) -> Option<TaskId> {
        self.mutex_index(id).ok().map(|mi| self.mutexes[mi].owner)
    }

    /// Resolve a mutex id to its table index.
    fn mutex_index(&self, id: MutexId) -> Result<usize, crate::ResultCode> {
        if id == 0 {
            return Err(crate::ResultCode::InvalidArg);
        }
        self.mutexes
            .iter()
            .position(|m| m.id == id)
            .ok_or(crate::ResultCode::MutexNotFound)
    }
}
