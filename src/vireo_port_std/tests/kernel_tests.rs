//! End-to-end scenarios driving the hosted port with real worker threads
//! and the real timer.
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Mutex;

use vireo_kernel::{ResultCode, SignalEventError, SuspendTaskError, TaskSt, WaitEventError};
use vireo_port_std::api;

/// The port owns one kernel singleton per process, so scenarios take turns.
static SEQUENCE_LOCK: Mutex<()> = Mutex::new(());

/// An atomic counter for checking an execution sequence.
struct SeqTracker {
    counter: AtomicUsize,
}

impl SeqTracker {
    const fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Assert that the counter is equal to `old` and then replace it with
    /// `new`.
    #[track_caller]
    fn expect_and_replace(&self, old: usize, new: usize) {
        let got = self.counter.load(Ordering::Relaxed);
        log::debug!("{got} (expected: {old}) → {new}");
        assert_eq!(got, old, "expected {old}, got {got}");
        self.counter.store(new, Ordering::Relaxed);
    }
}

struct KernelTestUtil {
    is_successful: AtomicBool,
}

static TEST_UTIL: KernelTestUtil = KernelTestUtil {
    is_successful: AtomicBool::new(false),
};

impl KernelTestUtil {
    fn success(&self) {
        self.is_successful.store(true, Ordering::Relaxed);
        api::shutdown();
    }

    /// Boot the kernel with `a_main` building the initial task set, run it
    /// until a task reports success, and propagate any task panic.
    fn run(&self, a_main: impl FnOnce()) {
        let _ = env_logger::try_init();
        let _guard = SEQUENCE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        self.is_successful.store(false, Ordering::Relaxed);
        api::init();
        a_main();
        api::start();

        assert!(
            self.is_successful.load(Ordering::Relaxed),
            "the kernel shut down without reaching success"
        );
    }
}

mod ping_pong {
    use super::*;

    pub static SEQ: SeqTracker = SeqTracker::new();
    pub static FORTH: AtomicU16 = AtomicU16::new(0);
    pub static BACK: AtomicU16 = AtomicU16::new(0);

    pub fn a_main() {
        FORTH.store(api::create_event().unwrap(), Ordering::Relaxed);
        BACK.store(api::create_event().unwrap(), Ordering::Relaxed);
        api::create_task(one, 3, 0).unwrap();
        api::create_task(two, 2, 0).unwrap();
    }

    fn one() {
        SEQ.expect_and_replace(1, 2);
        api::signal_event(FORTH.load(Ordering::Relaxed)).unwrap();

        // `two` (more favourable priority) preempted us and ran to
        // completion; its reply signal is still pending on BACK.
        SEQ.expect_and_replace(4, 5);
        api::wait_event(BACK.load(Ordering::Relaxed)).unwrap();
        SEQ.expect_and_replace(5, 6);
        TEST_UTIL.success();
    }

    fn two() {
        SEQ.expect_and_replace(0, 1);
        api::wait_event(FORTH.load(Ordering::Relaxed)).unwrap();
        SEQ.expect_and_replace(2, 3);

        let err = api::signal_event(BACK.load(Ordering::Relaxed)).unwrap_err();
        assert_eq!(err, SignalEventError::SignalUnownedEvent);
        SEQ.expect_and_replace(3, 4);
    }
}

/// Two-task ping-pong over one-shot events: the waiter wakes first, and a
/// signal with no waiter stays pending until consumed.
#[test]
fn event_ping_pong() {
    TEST_UTIL.run(ping_pong::a_main);
}

mod sleep_order {
    use super::*;

    pub static SEQ: SeqTracker = SeqTracker::new();

    pub fn a_main() {
        api::create_task(slow, 5, 0).unwrap();
        api::create_task(fast, 5, 0).unwrap();
    }

    fn slow() {
        SEQ.expect_and_replace(1, 2);
        api::sleep(10).unwrap();
        SEQ.expect_and_replace(3, 4);
        TEST_UTIL.success();
    }

    fn fast() {
        SEQ.expect_and_replace(0, 1);
        api::sleep(5).unwrap();
        SEQ.expect_and_replace(2, 3);
    }
}

/// The shorter sleep wakes first and runs to completion before the longer
/// one resumes.
#[test]
fn sleep_ordering() {
    TEST_UTIL.run(sleep_order::a_main);
}

mod inherit {
    use super::*;

    pub static SEQ: SeqTracker = SeqTracker::new();
    pub static M: AtomicU16 = AtomicU16::new(0);
    pub static LOW: AtomicU16 = AtomicU16::new(0);
    pub static HIGH: AtomicU16 = AtomicU16::new(0);

    pub fn a_main() {
        M.store(api::create_mutex().unwrap(), Ordering::Relaxed);
        LOW.store(api::create_task(low, 9, 0).unwrap(), Ordering::Relaxed);
    }

    fn low() {
        let m = M.load(Ordering::Relaxed);
        SEQ.expect_and_replace(0, 1);
        api::lock_mutex(m).unwrap();
        HIGH.store(api::create_task(high, 1, 0).unwrap(), Ordering::Relaxed);
        api::create_task(mid, 5, 0).unwrap();
        api::yield_now().unwrap();

        // Back before `mid` ever ran: the blocked high-priority task lent us
        // its priority.
        SEQ.expect_and_replace(2, 3);
        assert_eq!(api::task_priority(LOW.load(Ordering::Relaxed)), Some(1));
        api::unlock_mutex(m).unwrap();

        SEQ.expect_and_replace(6, 7);
        TEST_UTIL.success();
    }

    fn high() {
        let m = M.load(Ordering::Relaxed);
        SEQ.expect_and_replace(1, 2);
        api::lock_mutex(m).unwrap();

        SEQ.expect_and_replace(3, 4);
        assert_eq!(api::mutex_owner(m), Some(HIGH.load(Ordering::Relaxed)));
        assert_eq!(
            api::task_priority(LOW.load(Ordering::Relaxed)),
            Some(9),
            "inheritance must be undone on release"
        );
        api::unlock_mutex(m).unwrap();
        SEQ.expect_and_replace(4, 5);
    }

    fn mid() {
        SEQ.expect_and_replace(5, 6);
    }
}

/// Priority inheritance: while a high-priority task is blocked on the
/// mutex, the low-priority owner outranks the middle task; the handoff
/// restores everything.
#[test]
fn mutex_priority_inheritance() {
    TEST_UTIL.run(inherit::a_main);
}

mod reentrant {
    use super::*;

    pub static SEQ: SeqTracker = SeqTracker::new();
    pub static M: AtomicU16 = AtomicU16::new(0);
    pub static T1: AtomicU16 = AtomicU16::new(0);
    pub static T2: AtomicU16 = AtomicU16::new(0);

    pub fn a_main() {
        M.store(api::create_mutex().unwrap(), Ordering::Relaxed);
        T1.store(api::create_task(one, 2, 0).unwrap(), Ordering::Relaxed);
        T2.store(api::create_task(two, 3, 0).unwrap(), Ordering::Relaxed);
    }

    fn one() {
        let m = M.load(Ordering::Relaxed);
        SEQ.expect_and_replace(0, 1);

        api::lock_mutex(m).unwrap();
        api::lock_mutex(m).unwrap();
        api::lock_mutex(m).unwrap();
        assert_eq!(api::mutex_hold_count(m), Some(3));

        api::unlock_mutex(m).unwrap();
        api::unlock_mutex(m).unwrap();
        assert_eq!(api::mutex_hold_count(m), Some(1));
        assert_eq!(api::mutex_owner(m), Some(T1.load(Ordering::Relaxed)));

        // Let `two` run and block on the mutex.
        api::sleep(3).unwrap();
        SEQ.expect_and_replace(2, 3);

        api::unlock_mutex(m).unwrap();
        // The handoff woke `two`, but we still outrank it.
        SEQ.expect_and_replace(3, 4);
        assert_eq!(api::mutex_owner(m), Some(T2.load(Ordering::Relaxed)));
        assert_eq!(api::mutex_hold_count(m), Some(1));
    }

    fn two() {
        let m = M.load(Ordering::Relaxed);
        SEQ.expect_and_replace(1, 2);

        api::lock_mutex(m).unwrap();
        SEQ.expect_and_replace(4, 5);
        api::unlock_mutex(m).unwrap();
        TEST_UTIL.success();
    }
}

/// A recursive lock must be unlocked as many times as it was locked; the
/// lock transfers only on the last unlock.
#[test]
fn mutex_reentrant_lock() {
    TEST_UTIL.run(reentrant::a_main);
}

mod terminate_releases {
    use super::*;

    pub static SEQ: SeqTracker = SeqTracker::new();
    pub static M: AtomicU16 = AtomicU16::new(0);
    pub static LOW: AtomicU16 = AtomicU16::new(0);
    pub static HIGH: AtomicU16 = AtomicU16::new(0);

    pub fn a_main() {
        M.store(api::create_mutex().unwrap(), Ordering::Relaxed);
        LOW.store(api::create_task(low, 9, 0).unwrap(), Ordering::Relaxed);
    }

    fn low() {
        SEQ.expect_and_replace(0, 1);
        api::lock_mutex(M.load(Ordering::Relaxed)).unwrap();
        HIGH.store(api::create_task(high, 1, 0).unwrap(), Ordering::Relaxed);
        api::yield_now().unwrap();

        SEQ.expect_and_replace(2, 3);
        api::terminate();
    }

    fn high() {
        let m = M.load(Ordering::Relaxed);
        SEQ.expect_and_replace(1, 2);
        api::lock_mutex(m).unwrap();

        SEQ.expect_and_replace(3, 4);
        assert_eq!(api::mutex_owner(m), Some(HIGH.load(Ordering::Relaxed)));
        assert_eq!(api::mutex_hold_count(m), Some(1));
        assert_eq!(
            api::task_state(LOW.load(Ordering::Relaxed)),
            Some(TaskSt::Dead)
        );
        TEST_UTIL.success();
    }
}

/// A terminating owner hands its mutex to the blocked waiter.
#[test]
fn terminator_releases_mutex() {
    TEST_UTIL.run(terminate_releases::a_main);
}

mod suspend_refusal {
    use super::*;

    pub static SEQ: SeqTracker = SeqTracker::new();
    pub static M: AtomicU16 = AtomicU16::new(0);
    pub static HOLDER: AtomicU16 = AtomicU16::new(0);

    pub fn a_main() {
        M.store(api::create_mutex().unwrap(), Ordering::Relaxed);
        HOLDER.store(api::create_task(holder, 3, 0).unwrap(), Ordering::Relaxed);
    }

    fn holder() {
        SEQ.expect_and_replace(0, 1);
        api::lock_mutex(M.load(Ordering::Relaxed)).unwrap();
        api::create_task(observer, 5, 0).unwrap();
        api::sleep(5).unwrap();

        SEQ.expect_and_replace(2, 3);
        api::unlock_mutex(M.load(Ordering::Relaxed)).unwrap();
        TEST_UTIL.success();
    }

    fn observer() {
        let holder_pid = HOLDER.load(Ordering::Relaxed);
        SEQ.expect_and_replace(1, 2);

        let err = api::suspend(holder_pid).unwrap_err();
        assert_eq!(err, SuspendTaskError::SuspendNonrunningTask);
        assert_eq!(api::task_state(holder_pid), Some(TaskSt::Sleeping));
        assert_eq!(api::last_error(), ResultCode::SuspendNonrunningTask);
    }
}

/// Suspending a mutex holder is refused and leaves its state untouched.
#[test]
fn suspend_refused_for_mutex_holder() {
    TEST_UTIL.run(suspend_refusal::a_main);
}

mod suspend_resume_sleeper {
    use super::*;

    pub static SEQ: SeqTracker = SeqTracker::new();
    pub static SLEEPER: AtomicU16 = AtomicU16::new(0);

    pub fn a_main() {
        SLEEPER.store(api::create_task(sleeper, 3, 0).unwrap(), Ordering::Relaxed);
        api::create_task(manager, 5, 0).unwrap();
    }

    fn sleeper() {
        SEQ.expect_and_replace(0, 1);
        api::sleep(8).unwrap();

        // Runs again immediately after the resume: the 8-tick budget expired
        // during the suspension, so the resume restored READY, not SLEEPING.
        SEQ.expect_and_replace(3, 4);
        TEST_UTIL.success();
    }

    fn manager() {
        let sleeper_pid = SLEEPER.load(Ordering::Relaxed);
        SEQ.expect_and_replace(1, 2);

        api::suspend(sleeper_pid).unwrap();
        api::sleep(4).unwrap();
        assert_eq!(api::task_state(sleeper_pid), Some(TaskSt::Suspended));

        api::sleep(8).unwrap();
        SEQ.expect_and_replace(2, 3);
        api::resume(sleeper_pid).unwrap();
    }
}

/// Suspend/resume round trip across a sleep: the tick budget keeps counting
/// down while suspended.
#[test]
fn suspend_resume_restores_a_finished_sleep() {
    TEST_UTIL.run(suspend_resume_sleeper::a_main);
}

mod presignal {
    use super::*;

    pub static E: AtomicU16 = AtomicU16::new(0);

    pub fn a_main() {
        E.store(api::create_event().unwrap(), Ordering::Relaxed);
        api::create_task(solo, 5, 0).unwrap();
    }

    fn solo() {
        let e = E.load(Ordering::Relaxed);

        let err = api::signal_event(e).unwrap_err();
        assert_eq!(err, SignalEventError::SignalUnownedEvent);

        // The pending signal satisfies the wait without blocking, and the
        // event object dies with it.
        api::wait_event(e).unwrap();
        assert_eq!(api::wait_event(e).unwrap_err(), WaitEventError::EventNotFound);
        TEST_UTIL.success();
    }
}

/// Signal-then-wait on the same identifier completes without blocking and
/// consumes the event object.
#[test]
fn presignaled_event_wait_does_not_block() {
    TEST_UTIL.run(presignal::a_main);
}
