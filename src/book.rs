use std::collections::BTreeMap;

use crossbeam_channel::Receiver;
use log::debug;

use crate::{
    alarm::Alarm,
    calendar::DAYS_PER_WEEK,
    communication::{AlarmChange, AlarmEvent, AlarmEvents},
    error::{Error, Result},
};

/// The alarms currently known, keyed by id.
///
/// Every mutation goes through here and is published exactly once to all
/// subscribers. Ids are handed out in steps of a week so the per-day timer ids
/// of two alarms never overlap.
#[derive(Debug, Default)]
pub struct AlarmBook {
    alarms: BTreeMap<i64, Alarm>,
    next_id: i64,
    events: AlarmEvents,
}

fn next_free_id(last: i64) -> i64 {
    (last.div_euclid(DAYS_PER_WEEK) + 1) * DAYS_PER_WEEK
}

/// An id from outside is only kept if it sits on a week boundary.
const fn keeps_id(alarm: &Alarm) -> bool {
    alarm.is_assigned() && alarm.id() % DAYS_PER_WEEK == 0
}

impl AlarmBook {
    /// Alarms without an id, or whose id is taken, get a fresh one.
    #[must_use]
    pub fn new(alarms: impl IntoIterator<Item = Alarm>) -> Self {
        let mut book = Self::default();
        let mut unassigned = vec![];
        for alarm in alarms {
            if keeps_id(&alarm) && !book.alarms.contains_key(&alarm.id()) {
                book.next_id = book.next_id.max(next_free_id(alarm.id()));
                book.alarms.insert(alarm.id(), alarm);
            } else {
                unassigned.push(alarm);
            }
        }
        for mut alarm in unassigned {
            alarm.set_id(book.allocate_id());
            book.alarms.insert(alarm.id(), alarm);
        }
        book
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += DAYS_PER_WEEK;
        id
    }

    pub fn subscribe(&mut self) -> Receiver<AlarmEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn get(&self, id: i64) -> Option<&Alarm> {
        self.alarms.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Alarm> {
        self.alarms.values().cloned().collect()
    }

    /// stores a new alarm under a fresh id and returns the id
    pub fn add(&mut self, mut alarm: Alarm) -> i64 {
        let id = self.allocate_id();
        alarm.set_id(id);
        alarm.clear_repeat_if_no_days();
        debug!("added alarm {id}");
        self.alarms.insert(id, alarm.clone());
        self.events.publish(&AlarmEvent::Added(alarm));
        id
    }

    /// Applies `edit` to the alarm and publishes the result.
    ///
    /// # Errors
    /// if there is no alarm with that id
    pub fn edit<R>(&mut self, id: i64, edit: impl FnOnce(&mut Alarm) -> R) -> Result<R> {
        let alarm = self.alarms.get_mut(&id).ok_or(Error::AlarmNotFound(id))?;
        let before = alarm.schedule_key();
        let ret = edit(alarm);
        // the id is not editable
        alarm.set_id(id);
        alarm.clear_repeat_if_no_days();
        let after = alarm.schedule_key();
        let change = AlarmChange {
            alarm: alarm.clone(),
            timing_changed: before != after,
            re_enabled: !before.enabled && after.enabled,
        };
        self.events.publish(&AlarmEvent::Changed(change));
        Ok(ret)
    }

    /// Replaces the stored alarm with a snapshot that was changed elsewhere,
    /// such as by a finished wake-up.
    ///
    /// # Errors
    /// if there is no alarm with the snapshot's id
    pub fn apply(&mut self, snapshot: Alarm) -> Result<()> {
        self.edit(snapshot.id(), |alarm| *alarm = snapshot)
    }

    /// # Errors
    /// if there is no alarm with that id
    pub fn remove(&mut self, id: i64) -> Result<Alarm> {
        let alarm = self.alarms.remove(&id).ok_or(Error::AlarmNotFound(id))?;
        self.events.publish(&AlarmEvent::Removed(alarm.clone()));
        Ok(alarm)
    }

    /// Brings the book in line with `alarms` (for example a reloaded config
    /// file), publishing one event per alarm that was added, changed or removed.
    pub fn sync(&mut self, alarms: Vec<Alarm>) {
        let base = self.to_vec();
        self.merge(&base, alarms);
    }

    /// Takes over the changes someone else made to the alarms.
    ///
    /// `base` is the list both sides started from, `theirs` what the other
    /// side has now. Alarms that are the same in `base` and `theirs` keep
    /// whatever this book did to them. Alarms without a usable id are added
    /// under a fresh one.
    pub fn merge(&mut self, base: &[Alarm], theirs: Vec<Alarm>) {
        let mut incoming = BTreeMap::new();
        let mut fresh = vec![];
        for alarm in theirs {
            if keeps_id(&alarm) && !incoming.contains_key(&alarm.id()) {
                incoming.insert(alarm.id(), alarm);
            } else if !base.contains(&alarm) {
                fresh.push(alarm);
            }
        }
        let base: BTreeMap<i64, &Alarm> = base
            .iter()
            .filter(|alarm| keeps_id(alarm))
            .map(|alarm| (alarm.id(), alarm))
            .collect();
        let removed: Vec<i64> = base
            .keys()
            .filter(|id| !incoming.contains_key(id) && self.alarms.contains_key(id))
            .copied()
            .collect();
        for id in removed {
            // can't fail, the id was just checked
            let _ = self.remove(id);
        }
        for (id, alarm) in incoming {
            if base.get(&id).is_some_and(|old| **old == alarm) {
                continue;
            }
            match self.alarms.get(&id) {
                Some(current) if *current == alarm => {}
                Some(_) => {
                    let _ = self.apply(alarm);
                }
                None => {
                    self.next_id = self.next_id.max(next_free_id(id));
                    self.alarms.insert(id, alarm.clone());
                    self.events.publish(&AlarmEvent::Added(alarm));
                }
            }
        }
        for alarm in fresh {
            let id = self.add(alarm);
            debug!("alarm without a usable id stored as {id}");
        }
    }

    /// Stores what a finished wake-up did to its alarm. Only the day
    /// bookkeeping is copied, a snoozed time stays with the wake-up. Returns
    /// the stored record.
    ///
    /// # Errors
    /// if there is no alarm with the snapshot's id
    pub fn settle(&mut self, snapshot: &Alarm) -> Result<Alarm> {
        let id = snapshot.id();
        self.edit(id, |record| {
            record.set_days(snapshot.days());
            record.set_enabled(snapshot.enabled());
        })?;
        self.get(id).cloned().ok_or(Error::AlarmNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alarm::{AlarmBuilder, UNASSIGNED_ID},
        calendar::{Day, DaySet},
    };

    fn alarm(id: i64) -> Alarm {
        AlarmBuilder::new().id(id).time(6, 0).build().unwrap()
    }

    #[test]
    fn ids_are_spaced_a_week_apart() {
        let mut book = AlarmBook::default();
        let first = book.add(alarm(UNASSIGNED_ID));
        let second = book.add(alarm(UNASSIGNED_ID));
        assert_eq!(first, 0);
        assert_eq!(second, 7);
    }

    #[test]
    fn loading_keeps_valid_ids_and_reassigns_the_rest() {
        let book = AlarmBook::new(vec![alarm(14), alarm(UNASSIGNED_ID), alarm(3), alarm(14)]);
        let ids: Vec<i64> = book.iter().map(Alarm::id).collect();
        assert_eq!(ids, vec![14, 21, 28, 35]);
    }

    #[test]
    fn one_event_per_mutation() {
        let mut book = AlarmBook::default();
        let events = book.subscribe();
        let id = book.add(alarm(UNASSIGNED_ID));
        book.edit(id, |alarm| alarm.set_name("gym")).unwrap();
        book.remove(id).unwrap();
        let received: Vec<AlarmEvent> = events.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert!(matches!(received[0], AlarmEvent::Added(_)));
        assert!(matches!(
            received[1],
            AlarmEvent::Changed(AlarmChange {
                timing_changed: false,
                ..
            })
        ));
        assert!(matches!(received[2], AlarmEvent::Removed(_)));
    }

    #[test]
    fn timing_edits_are_flagged() {
        let mut book = AlarmBook::default();
        let id = book.add(alarm(UNASSIGNED_ID));
        book.edit(id, |alarm| alarm.set_enabled(false)).unwrap();
        let events = book.subscribe();
        book.edit(id, |alarm| {
            alarm.set_enabled(true);
            alarm.toggle_day(Day::Monday);
        })
        .unwrap();
        let Ok(AlarmEvent::Changed(change)) = events.try_recv() else {
            panic!("expected a change event");
        };
        assert!(change.timing_changed);
        assert!(change.re_enabled);
    }

    #[test]
    fn removing_every_day_clears_repeat() {
        let mut book = AlarmBook::default();
        let id = book.add(alarm(UNASSIGNED_ID));
        book.edit(id, |alarm| alarm.toggle_day(Day::Friday)).unwrap();
        book.edit(id, |alarm| alarm.set_repeat(true)).unwrap();
        assert!(book.get(id).unwrap().repeat());
        book.edit(id, |alarm| alarm.toggle_day(Day::Friday)).unwrap();
        assert!(!book.get(id).unwrap().repeat());
    }

    #[test]
    fn editing_a_missing_alarm_fails() {
        let mut book = AlarmBook::default();
        assert!(matches!(
            book.edit(42, |alarm| alarm.set_enabled(false)),
            Err(Error::AlarmNotFound(42))
        ));
    }

    #[test]
    fn sync_publishes_the_difference() {
        let mut book = AlarmBook::new(vec![alarm(0), alarm(7)]);
        let events = book.subscribe();
        let mut changed = alarm(7);
        changed.set_name("renamed");
        book.sync(vec![changed, alarm(14)]);
        let received: Vec<AlarmEvent> = events.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert!(matches!(&received[0], AlarmEvent::Removed(a) if a.id() == 0));
        assert!(matches!(&received[1], AlarmEvent::Changed(c) if c.alarm.name() == "renamed"));
        assert!(matches!(&received[2], AlarmEvent::Added(a) if a.id() == 14));
        assert_eq!(book.add(alarm(UNASSIGNED_ID)), 21);
    }

    #[test]
    fn reloaded_alarms_without_an_id_are_kept() {
        let mut book = AlarmBook::new(vec![alarm(0)]);
        let events = book.subscribe();
        book.sync(vec![alarm(0), alarm(UNASSIGNED_ID)]);
        assert_eq!(book.len(), 2);
        assert!(book.get(7).is_some());
        let received: Vec<AlarmEvent> = events.try_iter().collect();
        assert!(matches!(received.as_slice(), [AlarmEvent::Added(a)] if a.id() == 7));
    }

    #[test]
    fn reloaded_ids_off_the_week_grid_are_reassigned() {
        let mut wednesday = alarm(0);
        wednesday.set_days([Day::Wednesday].into_iter().collect());
        let mut sunday = alarm(3);
        sunday.set_days([Day::Sunday].into_iter().collect());
        let mut book = AlarmBook::new(vec![wednesday.clone()]);
        book.sync(vec![wednesday, sunday]);
        let ids: Vec<i64> = book.iter().map(Alarm::id).collect();
        assert_eq!(ids, vec![0, 7]);
        assert_eq!(
            book.get(7).unwrap().days(),
            [Day::Sunday].into_iter().collect::<DaySet>()
        );
    }

    #[test]
    fn duplicate_reloaded_ids_get_their_own_id() {
        let mut other = alarm(0);
        other.set_name("second");
        let mut book = AlarmBook::default();
        book.sync(vec![alarm(0), other]);
        assert_eq!(book.len(), 2);
        assert_eq!(book.get(7).unwrap().name(), "second");
    }

    #[test]
    fn merge_keeps_local_edits_and_takes_outside_ones() {
        let base = vec![alarm(0), alarm(7)];
        let mut book = AlarmBook::new(base.clone());
        // a finished wake-up turned alarm 0 off locally
        book.edit(0, |alarm| alarm.set_enabled(false)).unwrap();
        let events = book.subscribe();
        // meanwhile another command removed alarm 7 and added one without an id
        book.merge(&base, vec![alarm(0), alarm(UNASSIGNED_ID)]);
        assert!(!book.get(0).unwrap().enabled());
        assert!(book.get(7).is_none());
        assert!(book.get(14).is_some());
        let received: Vec<AlarmEvent> = events.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert!(matches!(&received[0], AlarmEvent::Removed(a) if a.id() == 7));
        assert!(matches!(&received[1], AlarmEvent::Added(a) if a.id() == 14));
    }

    #[test]
    fn merge_does_not_add_an_unchanged_alarm_twice() {
        let base = vec![alarm(0), alarm(UNASSIGNED_ID)];
        let mut book = AlarmBook::new(base.clone());
        assert_eq!(book.len(), 2);
        book.merge(&base, base.clone());
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn settling_copies_only_the_day_bookkeeping() {
        let mut record = alarm(0);
        record.set_repeat(false);
        record.set_days([Day::Monday, Day::Friday].into_iter().collect());
        let mut book = AlarmBook::new(vec![record]);
        let mut snapshot = book.get(0).cloned().unwrap();
        snapshot.set_time(6, 10).unwrap();
        snapshot.consume_day(Day::Monday);
        let stored = book.settle(&snapshot).unwrap();
        assert_eq!(stored.days(), [Day::Friday].into_iter().collect::<DaySet>());
        assert_eq!((stored.hour(), stored.minute()), (6, 0));
        assert_eq!(book.get(0), Some(&stored));
    }
}
