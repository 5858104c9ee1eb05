//! Schedule runner: drives every schedule through its state machine.
//!
//! ```text
//! Idle ──due──▶ Pending ──▶ Running ──ok──▶ Idle
//!                              └──err──▶ Failed ──recorded──▶ Idle
//! ```
//!
//! [`tick`](ScheduleRunner::tick) is the only thing that moves a schedule out
//! of `Idle`. Edits are refused while a schedule is `Pending` or `Running`,
//! enabling and disabling is always accepted.

use std::collections::BTreeMap;
use std::sync::Mutex;

use ccuhub_domain::error::{CcuError, NotFoundError, ValidationError};
use ccuhub_domain::event::Event;
use ccuhub_domain::id::ScheduleId;
use ccuhub_domain::schedule::{Schedule, ScheduleAction, ScheduleState};
use ccuhub_domain::time::Timestamp;

use crate::action_executor::ActionExecutor;
use crate::ports::{EventLog, ScheduleRepository};
use crate::sync::lock;

struct Slot {
    schedule: Schedule,
    state: ScheduleState,
    next_due: Option<Timestamp>,
    /// An edit is being persisted; the slot must not become due meanwhile.
    editing: bool,
}

impl Slot {
    fn new(schedule: Schedule, now: Timestamp) -> Self {
        let next_due = schedule.trigger.next_after(now);
        Self {
            schedule,
            state: ScheduleState::Idle,
            next_due,
            editing: false,
        }
    }

    fn advance(&mut self, next: ScheduleState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                schedule = %self.schedule.id,
                from = %self.state,
                to = %next,
                "unexpected schedule transition"
            );
        }
        self.state = next;
    }

    fn is_due(&self, now: Timestamp) -> bool {
        self.schedule.enabled
            && !self.editing
            && self.state == ScheduleState::Idle
            && self.next_due.is_some_and(|due| due <= now)
    }

    fn check_editable(&self) -> Result<(), CcuError> {
        if self.editing || !self.state.accepts_edits() {
            return Err(ValidationError::ScheduleBusy {
                state: self.state.as_str(),
            }
            .into());
        }
        Ok(())
    }
}

/// What happened during one [`ScheduleRunner::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub succeeded: Vec<ScheduleId>,
    pub failed: Vec<ScheduleId>,
}

impl TickReport {
    #[must_use]
    pub fn fired(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

pub struct ScheduleRunner<S, L, X> {
    repo: S,
    log: L,
    executor: X,
    slots: Mutex<BTreeMap<ScheduleId, Slot>>,
    ticking: tokio::sync::Mutex<()>,
}

impl<S, L, X> ScheduleRunner<S, L, X>
where
    S: ScheduleRepository,
    L: EventLog,
    X: ActionExecutor,
{
    pub fn new(repo: S, log: L, executor: X) -> Self {
        Self {
            repo,
            log,
            executor,
            slots: Mutex::new(BTreeMap::new()),
            ticking: tokio::sync::Mutex::new(()),
        }
    }

    /// Load persisted schedules; their next due time is computed from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Storage`] when the repository cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn load(&self, now: Timestamp) -> Result<usize, CcuError> {
        let schedules = self.repo.get_all().await?;
        let mut slots = lock(&self.slots);
        for schedule in schedules {
            if slots.contains_key(&schedule.id) {
                continue;
            }
            slots.insert(schedule.id, Slot::new(schedule, now));
        }
        tracing::info!(count = slots.len(), "schedules loaded");
        Ok(slots.len())
    }

    /// Validate, persist and start tracking a new schedule.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed schedules or
    /// [`CcuError::Storage`] when it cannot be persisted.
    #[tracing::instrument(skip(self, schedule), fields(schedule = %schedule.id))]
    pub async fn add(&self, schedule: Schedule, now: Timestamp) -> Result<Schedule, CcuError> {
        schedule.validate()?;
        let saved = self.repo.save(schedule).await?;
        lock(&self.slots).insert(saved.id, Slot::new(saved.clone(), now));
        tracing::info!(name = %saved.name, "schedule added");
        Ok(saved)
    }

    /// Replace a schedule's definition.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ScheduleBusy`] while the schedule is
    /// pending or running, [`CcuError::NotFound`] for unknown ids, a
    /// validation error for malformed schedules and [`CcuError::Storage`]
    /// when persisting fails.
    #[tracing::instrument(skip(self, schedule), fields(schedule = %schedule.id))]
    pub async fn update(&self, schedule: Schedule, now: Timestamp) -> Result<Schedule, CcuError> {
        schedule.validate()?;
        let id = schedule.id;
        self.begin_edit(id)?;

        let saved = self.repo.save(schedule).await;
        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(&id) else {
            return saved;
        };
        slot.editing = false;
        let saved = saved?;
        slot.next_due = saved.trigger.next_after(now);
        slot.schedule = saved.clone();
        drop(slots);

        tracing::info!("schedule updated");
        Ok(saved)
    }

    /// Stop tracking a schedule and delete it from the repository.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ScheduleBusy`] while the schedule is
    /// pending or running, [`CcuError::NotFound`] for unknown ids and
    /// [`CcuError::Storage`] when deletion fails.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, id: ScheduleId) -> Result<(), CcuError> {
        self.begin_edit(id)?;

        let deleted = self.repo.delete(id).await;
        let mut slots = lock(&self.slots);
        match deleted {
            Ok(()) => {
                slots.remove(&id);
                tracing::info!("schedule removed");
                Ok(())
            }
            Err(err) => {
                if let Some(slot) = slots.get_mut(&id) {
                    slot.editing = false;
                }
                Err(err)
            }
        }
    }

    /// Enable or disable a schedule. Always accepted; an action that is
    /// already running completes regardless.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::NotFound`] for unknown ids or
    /// [`CcuError::Storage`] when persisting fails.
    #[tracing::instrument(skip(self))]
    pub async fn set_enabled(&self, id: ScheduleId, enabled: bool) -> Result<Schedule, CcuError> {
        let schedule = {
            let mut slots = lock(&self.slots);
            let slot = slots.get_mut(&id).ok_or_else(|| not_found(id))?;
            slot.schedule.enabled = enabled;
            slot.schedule.clone()
        };
        self.repo.save(schedule).await
    }

    #[must_use]
    pub fn state(&self, id: ScheduleId) -> Option<ScheduleState> {
        lock(&self.slots).get(&id).map(|s| s.state)
    }

    #[must_use]
    pub fn next_due(&self, id: ScheduleId) -> Option<Timestamp> {
        lock(&self.slots).get(&id).and_then(|s| s.next_due)
    }

    #[must_use]
    pub fn list(&self) -> Vec<(Schedule, ScheduleState)> {
        lock(&self.slots)
            .values()
            .map(|s| (s.schedule.clone(), s.state))
            .collect()
    }

    /// Fire every schedule that is due at `now`.
    ///
    /// All due schedules move to `Pending` first and then run one after
    /// another. Each execution appends a `ScheduleFired` event; a failed
    /// action leaves the schedule enabled.
    ///
    /// # Errors
    ///
    /// Returns the first [`CcuError::Storage`] raised while appending a
    /// `ScheduleFired` event. The remaining due schedules still run and every
    /// schedule is back in `Idle` when this returns. Action failures are
    /// reported in the [`TickReport`].
    pub async fn tick(&self, now: Timestamp) -> Result<TickReport, CcuError> {
        let _ticking = self.ticking.lock().await;

        let due: Vec<ScheduleId> = {
            let mut slots = lock(&self.slots);
            slots
                .values_mut()
                .filter(|s| s.is_due(now))
                .map(|s| {
                    s.advance(ScheduleState::Pending);
                    s.schedule.id
                })
                .collect()
        };

        let mut report = TickReport::default();
        let mut append_error = None;
        for id in due {
            let Some((name, action)) = self.start(id) else {
                continue;
            };

            tracing::info!(schedule = %id, %name, %action, "schedule running");
            let outcome = self.executor.execute(&action).await;
            let error = outcome.as_ref().err().map(ToString::to_string);

            {
                let mut slots = lock(&self.slots);
                if let Some(slot) = slots.get_mut(&id) {
                    slot.next_due = slot.schedule.trigger.next_after(now);
                    slot.advance(if error.is_some() {
                        ScheduleState::Failed
                    } else {
                        ScheduleState::Idle
                    });
                }
            }

            match &error {
                None => report.succeeded.push(id),
                Some(message) => {
                    tracing::warn!(schedule = %id, %name, error = %message, "schedule action failed");
                    report.failed.push(id);
                }
            }

            let appended = self
                .log
                .append(Event::schedule_fired(id, &name, error, now))
                .await;
            self.settle(id);
            if let Err(err) = appended {
                tracing::error!(schedule = %id, error = %err, "failed to record schedule run");
                append_error.get_or_insert(err);
            }
        }
        match append_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Move a pending schedule to `Running`, returning what to execute.
    fn start(&self, id: ScheduleId) -> Option<(String, ScheduleAction)> {
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(&id)?;
        if slot.state != ScheduleState::Pending {
            return None;
        }
        if !slot.schedule.enabled {
            tracing::debug!(schedule = %id, "disabled before it started");
            slot.state = ScheduleState::Idle;
            return None;
        }
        slot.advance(ScheduleState::Running);
        Some((slot.schedule.name.clone(), slot.schedule.action.clone()))
    }

    /// The outcome has been recorded; a failed schedule becomes idle again.
    fn settle(&self, id: ScheduleId) {
        if let Some(slot) = lock(&self.slots).get_mut(&id)
            && slot.state == ScheduleState::Failed
        {
            slot.advance(ScheduleState::Idle);
        }
    }

    fn begin_edit(&self, id: ScheduleId) -> Result<(), CcuError> {
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(&id).ok_or_else(|| not_found(id))?;
        slot.check_editable()?;
        slot.editing = true;
        Ok(())
    }
}

fn not_found(id: ScheduleId) -> NotFoundError {
    NotFoundError {
        entity: "Schedule",
        id: id.to_string(),
    }
}
