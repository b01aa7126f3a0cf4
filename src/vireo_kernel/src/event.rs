//! One-shot events
use crate::{
    cfg,
    error::{CreateEventError, SignalEventError, WaitEventError},
    EventId, Kernel, TaskId, TaskSt,
};

/// *Event control block* - a one-shot signal with at most one waiter.
///
/// Lifecycle: allocated by `Event_Init`, freed implicitly the moment a wait
/// and a signal meet (whichever arrives second clears the slot). After that
/// the identifier is invalid; callers that need a persistent rendezvous
/// create a fresh event per round.
pub struct EventCb {
    /// Event identifier. `0` marks a free slot.
    pub(crate) id: EventId,
    /// Pid of the task blocked in `WAIT_EVENT` on this event; `0` if none.
    pub(crate) owner: TaskId,
    /// Pending signals observed before any wait, saturating at
    /// [`cfg::MAX_EVENT_SIG_MISS`] (`0` = unbounded).
    pub(crate) count: u32,
}

impl EventCb {
    pub(crate) const INIT: Self = Self {
        id: 0,
        owner: 0,
        count: 0,
    };
}

impl Kernel {
    /// Allocate an event slot and assign it a fresh identifier
    /// (`Kernel_Create_Event`).
    pub fn create_event(&mut self) -> Result<EventId, CreateEventError> {
        if self.event_count >= cfg::MAX_EVENTS {
            return Err(CreateEventError::MaxEvent);
        }

        let slot = self
            .events
            .iter()
            .position(|e| e.id == 0)
            .ok_or(CreateEventError::MaxEvent)?;

        self.last_event_id += 1;
        self.event_count += 1;
        self.events[slot] = EventCb {
            id: self.last_event_id,
            owner: 0,
            count: 0,
        };

        log::trace!("created event {}", self.last_event_id);
        Ok(self.last_event_id)
    }

    /// `Kernel_Wait_Event`. A pending signal is consumed in place - the
    /// event slot is freed and the caller keeps running; otherwise the
    /// caller becomes the event's single waiter and blocks.
    pub(crate) fn wait_event_current(&mut self, id: EventId) -> Result<(), WaitEventError> {
        let slot = self.current.expect("wait with no running task");
        let pid = self.tasks[slot].pid;

        let ei = self
            .event_index(id)
            .map_err(|code| WaitEventError::from_code(code).unwrap_or(WaitEventError::EventNotFound))?;

        let e = &mut self.events[ei];
        if e.owner != 0 && e.owner != pid {
            // One waiter per event; a second one is turned away.
            return Err(WaitEventError::EventNotFound);
        }

        if e.count > 0 {
            // Already signaled: consume the signal and the event with it.
            *e = EventCb::INIT;
            self.event_count -= 1;
            log::trace!("task {pid} consumed pre-signaled event {id}");
            return Ok(());
        }

        e.owner = pid;
        self.tasks[slot].st = TaskSt::WaitEvent;
        log::trace!("task {pid} waiting on event {id}");
        Ok(())
    }

    /// `Kernel_Signal_Event`. Wakes the waiter if there is one (freeing the
    /// event); otherwise records the signal, saturating, and reports the
    /// soft [`SignalEventError::SignalUnownedEvent`] warning.
    pub(crate) fn signal_event(&mut self, id: EventId) -> Result<(), SignalEventError> {
        let ei = self
            .event_index(id)
            .map_err(|code| SignalEventError::from_code(code).unwrap_or(SignalEventError::EventNotFound))?;

        let e = &mut self.events[ei];
        if cfg::MAX_EVENT_SIG_MISS == 0 || e.count < cfg::MAX_EVENT_SIG_MISS {
            e.count += 1;
        }

        let owner = e.owner;
        if owner == 0 {
            log::debug!("event {id} signaled with no waiter");
            return Err(SignalEventError::SignalUnownedEvent);
        }

        let owner_slot = self
            .slot_by_pid(owner)
            .ok_or(SignalEventError::PidNotFound)?;

        // Deliver only if the waiter is actually parked on this event; a
        // waiter that was forced elsewhere (e.g. suspended and then woken
        // through another path) leaves the pending count in place.
        if self.tasks[owner_slot].st == TaskSt::WaitEvent {
            self.events[ei] = EventCb::INIT;
            self.event_count -= 1;
            self.tasks[owner_slot].st = TaskSt::Ready;
            log::trace!("event {id} woke task {owner}");
        }
        Ok(())
    }

    /// Resolve an event id to its table index.
    fn event_index(&self, id: EventId) -> Result<usize, crate::ResultCode> {
        if id == 0 {
            return Err(crate::ResultCode::InvalidArg);
        }
        self.events
            .iter()
            .position(|e| e.id == id)
            .ok_or(crate::ResultCode::EventNotFound)
    }
}
