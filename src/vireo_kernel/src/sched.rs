//! The dispatcher, the tick handler, and the system-call service step.
use core::mem;

use crate::{
    cfg,
    error::{ResultCode, SleepError, YieldError},
    Kernel, Priority, Reply, Request, TaskSt, Ticks,
};

impl Kernel {
    /// Pick the next task to run.
    ///
    /// One pass over the task table, starting one slot past the previous
    /// winner: the READY task with the numerically smallest priority wins,
    /// and the strict comparison makes rotor order the tie-breaker, so
    /// equal-priority tasks take turns. The winner becomes RUNNING.
    ///
    /// Returns `None` when nothing is READY. The port is expected to treat
    /// that as the idle loop: keep feeding [`Kernel::process_ticks`] until a
    /// sleeper expires, then retry.
    pub fn dispatch(&mut self) -> Option<usize> {
        let mut best: Option<(usize, Priority)> = None;

        for _ in 0..cfg::MAX_TASKS {
            self.rotor = (self.rotor + 1) % cfg::MAX_TASKS;
            let t = &self.tasks[self.rotor];
            if t.st != TaskSt::Ready {
                continue;
            }
            match best {
                Some((_, pri)) if t.pri >= pri => {}
                _ => best = Some((self.rotor, t.pri)),
            }
        }

        let (slot, _) = best?;
        self.rotor = slot;
        self.current = Some(slot);
        self.tasks[slot].st = TaskSt::Running;
        log::trace!("dispatching task {}", self.tasks[slot].pid);
        Some(slot)
    }

    /// Credit `elapsed` accumulated timer ticks to every sleeping task, in
    /// one batch (`Kernel_Tick_Handler`).
    ///
    /// Ticks that pile up while the kernel is busy are subtracted together
    /// rather than dropped, so a sleep lasts *at least* its budget. A
    /// SUSPENDED task whose saved state is SLEEPING keeps counting down and
    /// wakes into `last_st = READY`, ready to run as soon as it is resumed.
    pub fn process_ticks(&mut self, elapsed: Ticks) {
        if elapsed == 0 {
            return;
        }

        for t in &mut self.tasks {
            if t.st == TaskSt::Sleeping {
                t.remaining_ticks -= i64::from(elapsed);
                if t.remaining_ticks <= 0 {
                    t.st = TaskSt::Ready;
                    t.remaining_ticks = 0;
                }
            } else if t.st == TaskSt::Suspended && t.last_st == TaskSt::Sleeping {
                t.remaining_ticks -= i64::from(elapsed);
                if t.remaining_ticks <= 0 {
                    t.last_st = TaskSt::Ready;
                    t.remaining_ticks = 0;
                }
            }
        }
    }

    /// Service the current task's pending request - the body of the kernel
    /// main loop's dispatch switch.
    ///
    /// Returns `true` when the caller is no longer RUNNING and the port must
    /// pick a new task ([`Kernel::dispatch`]) before resuming anyone.
    /// Handlers that can make another task READY (resume, signal, an unlock
    /// that hands the mutex over) demote the still-running caller to READY
    /// first, so the wakeup can preempt it and so no two tasks are ever
    /// RUNNING at once.
    pub fn service_current(&mut self) -> bool {
        let slot = match self.current {
            Some(slot) => slot,
            None => return true,
        };

        let request = mem::replace(&mut self.tasks[slot].request, Request::None);
        log::trace!("task {} requested {request:?}", self.tasks[slot].pid);

        match request {
            // NONE can only reach the kernel through an interrupt return
            // path, which is serviced exactly like a voluntary yield.
            Request::None | Request::Yield => {
                self.tasks[slot].st = TaskSt::Ready;
                self.reply_unit::<YieldError>(slot, Ok(()));
            }
            Request::CreateTask { entry, pri, arg } => {
                let r = self.create_task(entry, pri, arg);
                self.reply_id(slot, r);
            }
            Request::Terminate => {
                self.terminate_current();
                self.reply_unit::<YieldError>(slot, Ok(()));
            }
            Request::Suspend(pid) => {
                let r = self.suspend_task(pid);
                self.reply_unit(slot, r);
            }
            Request::Resume(pid) => {
                let r = self.resume_task(pid);
                self.demote_current();
                self.reply_unit(slot, r);
            }
            Request::Sleep(ticks) => {
                self.sleep_current(ticks);
                self.reply_unit::<SleepError>(slot, Ok(()));
            }
            Request::CreateEvent => {
                let r = self.create_event();
                self.reply_id(slot, r);
            }
            Request::WaitEvent(id) => {
                let r = self.wait_event_current(id);
                self.reply_unit(slot, r);
            }
            Request::SignalEvent(id) => {
                let r = self.signal_event(id);
                self.demote_current();
                self.reply_unit(slot, r);
            }
            Request::CreateMutex => {
                let r = self.create_mutex();
                self.reply_id(slot, r);
            }
            Request::LockMutex(id) => {
                let r = self.lock_mutex_current(id);
                self.reply_unit(slot, r);
            }
            Request::UnlockMutex(id) => {
                let r = self.unlock_mutex_current(id);
                self.reply_unit(slot, r);
            }
        }

        self.tasks[slot].st != TaskSt::Running
    }

    /// RUNNING → READY, applied to the current task ahead of a re-dispatch
    /// that might wake somebody more favourable.
    fn demote_current(&mut self) {
        if let Some(slot) = self.current {
            if self.tasks[slot].st == TaskSt::Running {
                self.tasks[slot].st = TaskSt::Ready;
            }
        }
    }

    fn reply_unit<E: Into<ResultCode>>(&mut self, slot: usize, r: Result<(), E>) {
        let code = match r {
            Ok(()) => ResultCode::Success,
            Err(e) => e.into(),
        };
        self.tasks[slot].reply = Reply { code, id: 0 };
        self.last_error = code;
    }

    fn reply_id<E: Into<ResultCode>>(&mut self, slot: usize, r: Result<u16, E>) {
        let reply = match r {
            Ok(id) => Reply {
                code: ResultCode::Success,
                id,
            },
            Err(e) => Reply {
                code: e.into(),
                id: 0,
            },
        };
        self.tasks[slot].reply = reply;
        self.last_error = reply.code;
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use crate::test_utils::{boot, noop, syscall};
    use crate::{Request, ResultCode, TaskSt};

    #[test]
    fn dispatch_picks_the_most_favourable_priority() {
        let (mut k, pids) = boot(&[7, 2, 5]);
        k.dispatch().unwrap();
        assert_eq!(k.current_pid(), Some(pids[1]));
        assert_eq!(k.task_state(pids[1]), Some(TaskSt::Running));
    }

    #[test]
    fn equal_priorities_take_turns() {
        let (mut k, pids) = boot(&[5, 5, 5]);

        // The rotor starts one past slot 0, so the second-created task goes
        // first; yields then cycle through the peers.
        k.dispatch().unwrap();
        assert_eq!(k.current_pid(), Some(pids[1]));

        for &expected in &[pids[2], pids[0], pids[1]] {
            assert!(syscall(&mut k, Request::Yield));
            k.dispatch().unwrap();
            assert_eq!(k.current_pid(), Some(expected));
        }
    }

    #[test]
    fn dispatch_reports_idle_when_nothing_is_ready() {
        let (mut k, _) = boot(&[5]);
        k.dispatch().unwrap();
        assert!(syscall(&mut k, Request::Sleep(3)));
        assert_eq!(k.dispatch(), None);

        // Two ticks are not enough; the third wakes the sleeper.
        k.process_ticks(2);
        assert_eq!(k.dispatch(), None);
        k.process_ticks(1);
        assert!(k.dispatch().is_some());
    }

    #[test]
    fn tick_batches_may_overshoot_the_budget() {
        let (mut k, pids) = boot(&[5, 9]);
        k.dispatch().unwrap();
        assert!(syscall(&mut k, Request::Sleep(3)));
        k.process_ticks(100);
        assert_eq!(k.task_state(pids[0]), Some(TaskSt::Ready));
    }

    #[test]
    fn a_suspended_sleeper_keeps_counting_down() {
        let (mut k, pids) = boot(&[5, 9]);
        k.dispatch().unwrap();

        assert!(syscall(&mut k, Request::Sleep(5)));
        k.dispatch().unwrap();
        assert_eq!(k.current_pid(), Some(pids[1]));

        assert!(!syscall(&mut k, Request::Suspend(pids[0])));
        k.process_ticks(5);
        assert_eq!(k.task_state(pids[0]), Some(TaskSt::Suspended));

        assert!(syscall(&mut k, Request::Resume(pids[0])));
        assert_eq!(k.task_state(pids[0]), Some(TaskSt::Ready));
    }

    #[test]
    fn creating_a_task_does_not_preempt_the_creator() {
        let (mut k, pids) = boot(&[5]);
        k.dispatch().unwrap();

        let slot = k.current_slot().unwrap();
        k.post(
            slot,
            Request::CreateTask {
                entry: noop,
                pri: 1,
                arg: 0,
            },
        );
        assert!(!k.service_current());
        assert_eq!(k.current_pid(), Some(pids[0]));

        let created = k.reply(slot).id;
        assert_eq!(k.task_state(created), Some(TaskSt::Ready));
    }

    #[test]
    fn the_last_error_register_tracks_every_service() {
        let (mut k, _) = boot(&[5]);
        k.dispatch().unwrap();

        syscall(&mut k, Request::Suspend(999));
        assert_eq!(k.last_error(), ResultCode::PidNotFound);

        syscall(&mut k, Request::Yield);
        assert_eq!(k.last_error(), ResultCode::Success);
    }

    /// A sleeping task wakes exactly when the cumulative processed ticks
    /// reach its budget (and never before), no matter how the ticks are
    /// batched.
    #[quickcheck]
    fn sleep_never_wakes_early(budget: u8, batches: Vec<u8>) -> bool {
        let (mut k, pids) = boot(&[5, 9]);
        k.dispatch();
        syscall(&mut k, Request::Sleep(u32::from(budget)));

        let mut cumulative = 0u64;
        for batch in batches {
            k.process_ticks(u32::from(batch));
            cumulative += u64::from(batch);

            let awake = k.task_state(pids[0]) == Some(TaskSt::Ready);
            let should_be_awake = cumulative >= u64::from(budget).max(1);
            if awake != should_be_awake {
                return false;
            }
        }
        true
    }
}
