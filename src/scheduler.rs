//! Registering and cancelling wake timers for alarm occurrences.
//!
//! Timer ids are never stored: both registration and cancellation derive them
//! with [`occurrence_id`], and a reschedule always clears all seven possible ids
//! of an alarm before registering the current ones. The timer facility may fire
//! more than once or after a cancel, so whoever handles a fire should check it
//! with [`is_current`] first.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDateTime, NaiveTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    alarm::{occurrence_id, timer_id, Alarm},
    calendar::{self, to_epoch_millis, Day, DaySet, Occurrence},
    communication::AlarmEvent,
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FireKind {
    Occurrence,
    Snooze,
}

/// The payload a timer carries back when it fires.
///
/// Holds every field that decides when the alarm rings so the fire can be
/// checked without loading the alarm first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRef {
    pub id: i64,
    pub day: Day,
    #[serde(with = "toml_datetime_compat")]
    pub time: NaiveTime,
    pub days: DaySet,
    pub repeat: bool,
    pub enabled: bool,
    pub kind: FireKind,
}

impl AlarmRef {
    #[must_use]
    pub fn new(alarm: &Alarm, day: Day, kind: FireKind) -> Self {
        Self {
            id: alarm.id(),
            day,
            time: alarm.time(),
            days: alarm.days(),
            repeat: alarm.repeat(),
            enabled: alarm.enabled(),
            kind,
        }
    }

    #[must_use]
    pub const fn timer_id(&self) -> i64 {
        timer_id(self.id, self.day)
    }

    /// # Errors
    /// if serialization fails
    pub fn encode(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// # Errors
    /// if `payload` is not an encoded [`AlarmRef`]
    pub fn decode(payload: &str) -> Result<Self> {
        Ok(toml::from_str(payload)?)
    }
}

/// The operating system's wake-capable, exact, single-fire timer facility.
pub trait TimerService {
    /// Registers a timer, replacing any existing timer with the same id.
    fn register(&mut self, timer_id: i64, fire_at_millis: i64, payload: AlarmRef);
    /// returns false if no such timer was registered
    fn cancel(&mut self, timer_id: i64) -> bool;
    fn registered(&self) -> Vec<i64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub fire_at_millis: i64,
    pub payload: AlarmRef,
}

/// In-process timer table, polled by the daemon loop.
#[derive(Debug, Default)]
pub struct LocalTimers {
    timers: BTreeMap<i64, Timer>,
}

impl LocalTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every timer due at `now_millis`, earliest first.
    pub fn due(&mut self, now_millis: i64) -> Vec<AlarmRef> {
        let ids: Vec<i64> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.fire_at_millis <= now_millis)
            .map(|(id, _)| *id)
            .collect();
        let mut fired: Vec<Timer> = ids
            .into_iter()
            .filter_map(|id| self.timers.remove(&id))
            .collect();
        fired.sort_by_key(|timer| timer.fire_at_millis);
        fired.into_iter().map(|timer| timer.payload).collect()
    }

    #[must_use]
    pub fn get(&self, timer_id: i64) -> Option<&Timer> {
        self.timers.get(&timer_id)
    }

    #[must_use]
    pub fn next_fire(&self) -> Option<i64> {
        self.timers.values().map(|timer| timer.fire_at_millis).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl TimerService for LocalTimers {
    fn register(&mut self, timer_id: i64, fire_at_millis: i64, payload: AlarmRef) {
        self.timers.insert(
            timer_id,
            Timer {
                fire_at_millis,
                payload,
            },
        );
    }

    fn cancel(&mut self, timer_id: i64) -> bool {
        self.timers.remove(&timer_id).is_some()
    }

    fn registered(&self) -> Vec<i64> {
        self.timers.keys().copied().collect()
    }
}

/// Whether a fired timer still matches the alarm it refers to. Fires for
/// disabled alarms, removed days or an old time are spurious.
#[must_use]
pub fn is_current(alarm: &Alarm, fire: &AlarmRef) -> bool {
    if fire.id != alarm.id() || !alarm.enabled() {
        return false;
    }
    match fire.kind {
        FireKind::Snooze => true,
        FireKind::Occurrence => {
            alarm.time() == fire.time
                && (alarm.days().contains(fire.day) || alarm.days().is_empty())
        }
    }
}

/// The occurrences an alarm should have timers for right now.
#[must_use]
pub fn planned_occurrences(alarm: &Alarm, now: NaiveDateTime) -> Vec<Occurrence> {
    if !alarm.enabled() {
        return vec![];
    }
    if alarm.days().is_empty() {
        // no days picked: ring once at the next matching time
        let at = calendar::nearest_occurrence(alarm, now);
        return vec![Occurrence {
            day: Day::of(at),
            at,
        }];
    }
    calendar::all_occurrences(alarm, now)
}

#[derive(Debug)]
pub struct Scheduler<T: TimerService> {
    timers: T,
}

impl<T: TimerService> Scheduler<T> {
    pub const fn new(timers: T) -> Self {
        Self { timers }
    }

    pub const fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    /// Clears every timer the alarm could own and registers one per planned
    /// occurrence. Returns how many timers were registered.
    ///
    /// # Errors
    /// if the alarm has no id yet
    pub fn reschedule(&mut self, alarm: &Alarm, now: NaiveDateTime) -> Result<usize> {
        if !alarm.is_assigned() {
            return Err(Error::UnassignedAlarm);
        }
        self.cancel_all(alarm);
        let occurrences = planned_occurrences(alarm, now);
        for occurrence in &occurrences {
            self.register_one(alarm, occurrence.day, occurrence.at);
        }
        info!(
            "alarm {} scheduled {} occurrence(s)",
            alarm.id(),
            occurrences.len()
        );
        Ok(occurrences.len())
    }

    /// Cancels the timers of all seven possible days, returns how many existed.
    pub fn cancel_all(&mut self, alarm: &Alarm) -> usize {
        Day::ALL
            .into_iter()
            .filter(|day| match self.cancel_one(alarm, *day) {
                Ok(()) => true,
                Err(e) => {
                    debug!("{e}");
                    false
                }
            })
            .count()
    }

    /// # Errors
    /// [`Error::SchedulingMismatch`] if nothing was registered for that day
    pub fn cancel_one(&mut self, alarm: &Alarm, day: Day) -> Result<()> {
        let id = occurrence_id(alarm, day);
        if self.timers.cancel(id) {
            Ok(())
        } else {
            Err(Error::SchedulingMismatch(id))
        }
    }

    pub fn register_one(&mut self, alarm: &Alarm, day: Day, at: NaiveDateTime) {
        self.register(alarm, day, at, FireKind::Occurrence);
    }

    /// Replaces the firing occurrence's timer with a single one at `at`.
    ///
    /// # Errors
    /// if the alarm has no id yet
    pub fn snooze(&mut self, alarm: &Alarm, day: Day, at: NaiveDateTime) -> Result<()> {
        if !alarm.is_assigned() {
            return Err(Error::UnassignedAlarm);
        }
        if let Err(e) = self.cancel_one(alarm, day) {
            debug!("{e}");
        }
        self.register(alarm, day, at, FireKind::Snooze);
        Ok(())
    }

    fn register(&mut self, alarm: &Alarm, day: Day, at: NaiveDateTime, kind: FireKind) {
        let id = occurrence_id(alarm, day);
        debug!("registering timer {id} for alarm {} at {at}", alarm.id());
        self.timers
            .register(id, to_epoch_millis(at), AlarmRef::new(alarm, day, kind));
    }

    /// Startup pass: drops timers that belong to no enabled alarm, then
    /// reschedules every alarm. Returns how many stray timers were dropped.
    pub fn reconcile<'a>(
        &mut self,
        alarms: impl IntoIterator<Item = &'a Alarm>,
        now: NaiveDateTime,
    ) -> usize {
        let alarms: Vec<&Alarm> = alarms.into_iter().collect();
        let expected: BTreeSet<i64> = alarms
            .iter()
            .filter(|alarm| alarm.enabled() && alarm.is_assigned())
            .flat_map(|alarm| Day::ALL.map(|day| occurrence_id(alarm, day)))
            .collect();
        let stray: Vec<i64> = self
            .timers
            .registered()
            .into_iter()
            .filter(|id| !expected.contains(id))
            .collect();
        for id in &stray {
            warn!("cancelling stray timer {id}");
            self.timers.cancel(*id);
        }
        for alarm in alarms {
            if let Err(e) = self.reschedule(alarm, now) {
                warn!("couldn't schedule alarm: {e}");
            }
        }
        stray.len()
    }

    /// Reacts to a change in the alarm book.
    ///
    /// # Errors
    /// if the alarm in the event has no id
    pub fn handle(&mut self, event: &AlarmEvent, now: NaiveDateTime) -> Result<()> {
        match event {
            AlarmEvent::Added(alarm) => self.reschedule(alarm, now).map(drop),
            AlarmEvent::Changed(change) if !change.timing_changed => {
                debug!(
                    "alarm {} changed without touching its schedule",
                    change.alarm.id()
                );
                Ok(())
            }
            AlarmEvent::Changed(change) => self.reschedule(&change.alarm, now).map(drop),
            AlarmEvent::Removed(alarm) => {
                self.cancel_all(alarm);
                Ok(())
            }
        }
    }
}
