//! Weekday sets and the arithmetic that turns an alarm's repeat pattern into
//! concrete fire times.
//!
//! All functions take the current wall-clock time as a [`NaiveDateTime`] so the
//! caller decides what "now" is; conversion to epoch millis for the timer
//! facility happens at the edge with [`to_epoch_millis`].

use std::{fmt, str::FromStr};

use chrono::{Datelike, Duration, Local, NaiveDateTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::alarm::Alarm;

pub const DAYS_PER_WEEK: i64 = 7;

/// Days of the week in canonical (Sunday-first) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Day {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Day {
    pub const ALL: [Self; 7] = [
        Self::Sunday,
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
    ];

    /// index of the day within the week, Sunday = 0
    #[must_use]
    pub const fn offset(self) -> i64 {
        self as i64
    }

    /// the bit this day occupies in a [`DaySet`] value, Sunday = 1 .. Saturday = 64
    #[must_use]
    pub const fn value(self) -> u8 {
        1 << (self as u8)
    }

    #[must_use]
    pub fn from_offset(offset: i64) -> Option<Self> {
        usize::try_from(offset)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    #[must_use]
    pub fn of(now: NaiveDateTime) -> Self {
        now.weekday().into()
    }

    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Sunday => "Sun",
            Self::Monday => "Mon",
            Self::Tuesday => "Tue",
            Self::Wednesday => "Wed",
            Self::Thursday => "Thu",
            Self::Friday => "Fri",
            Self::Saturday => "Sat",
        }
    }
}

impl From<Weekday> for Day {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sun => Self::Sunday,
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDayError(String);

impl fmt::Display for ParseDayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown day {:?}", self.0)
    }
}

impl std::error::Error for ParseDayError {}

impl FromStr for Day {
    type Err = ParseDayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|day| {
                let short = day.short_name().to_lowercase();
                lower == short || lower == format!("{day:?}").to_lowercase()
            })
            .ok_or_else(|| ParseDayError(s.to_string()))
    }
}

/// A subset of the seven weekdays, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct DaySet(u8);

impl DaySet {
    const MASK: u8 = 0x7f;

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn every_day() -> Self {
        Self(Self::MASK)
    }

    #[must_use]
    pub const fn contains(self, day: Day) -> bool {
        self.0 & day.value() != 0
    }

    pub fn insert(&mut self, day: Day) {
        self.0 |= day.value();
    }

    pub fn remove(&mut self, day: Day) {
        self.0 &= !day.value();
    }

    /// adds the day if absent, removes it if present.
    /// returns whether the day is in the set afterwards
    pub fn toggle(&mut self, day: Day) -> bool {
        self.0 ^= day.value();
        self.contains(day)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// days in canonical order
    pub fn iter(self) -> impl Iterator<Item = Day> {
        Day::ALL.into_iter().filter(move |day| self.contains(*day))
    }
}

impl From<u8> for DaySet {
    fn from(value: u8) -> Self {
        value_to_days(value)
    }
}

impl From<DaySet> for u8 {
    fn from(days: DaySet) -> Self {
        days_to_value(days)
    }
}

impl FromIterator<Day> for DaySet {
    fn from_iter<T: IntoIterator<Item = Day>>(iter: T) -> Self {
        let mut days = Self::empty();
        iter.into_iter().for_each(|day| days.insert(day));
        days
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("never");
        }
        if *self == Self::every_day() {
            return f.write_str("every day");
        }
        let names: Vec<&str> = self.iter().map(Day::short_name).collect();
        f.write_str(&names.join(", "))
    }
}

#[must_use]
pub const fn days_to_value(days: DaySet) -> u8 {
    days.0
}

/// bits outside the seven weekdays are dropped
#[must_use]
pub const fn value_to_days(value: u8) -> DaySet {
    DaySet(value & DaySet::MASK)
}

/// A concrete upcoming fire time of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub day: Day,
    pub at: NaiveDateTime,
}

/// The next time strictly after `now` that falls on `day` at the alarm's time.
#[must_use]
pub fn next_occurrence(alarm: &Alarm, day: Day, now: NaiveDateTime) -> NaiveDateTime {
    let ahead = (day.offset() - Day::of(now).offset()).rem_euclid(DAYS_PER_WEEK);
    let candidate = (now.date() + Duration::days(ahead)).and_time(alarm.time());
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(DAYS_PER_WEEK)
    }
}

/// One occurrence per day in the alarm's day set.
///
/// A non-repeating alarm skips days that are earlier in the week than today,
/// since those have already passed for this week.
#[must_use]
pub fn all_occurrences(alarm: &Alarm, now: NaiveDateTime) -> Vec<Occurrence> {
    let today = Day::of(now);
    alarm
        .days()
        .iter()
        .filter(|day| alarm.repeat() || day.offset() >= today.offset())
        .map(|day| Occurrence {
            day,
            at: next_occurrence(alarm, day, now),
        })
        .collect()
}

/// Today at the alarm's time, or tomorrow if that has already passed.
#[must_use]
pub fn nearest_occurrence(alarm: &Alarm, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(alarm.time());
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// The soonest occurrence an enabled alarm will fire at.
#[must_use]
pub fn next_alarm(alarm: &Alarm, now: NaiveDateTime) -> Option<Occurrence> {
    if !alarm.enabled() {
        return None;
    }
    if alarm.days().is_empty() {
        let at = nearest_occurrence(alarm, now);
        return Some(Occurrence {
            day: Day::of(at),
            at,
        });
    }
    all_occurrences(alarm, now)
        .into_iter()
        .min_by_key(|occurrence| occurrence.at)
}

#[must_use]
pub fn format_time(hour: u32, minute: u32, use_24h: bool) -> String {
    let hour = if use_24h {
        hour
    } else if hour == 0 {
        12
    } else if hour > 12 {
        hour - 12
    } else {
        hour
    };
    format!("{hour}:{minute:02}")
}

#[must_use]
pub const fn meridian(hour: u32, use_24h: bool) -> &'static str {
    if use_24h {
        ""
    } else if hour < 12 {
        "AM"
    } else {
        "PM"
    }
}

/// "5 h 3 min", "12 min", "less than a minute"
#[must_use]
pub fn format_remaining(now: NaiveDateTime, at: NaiveDateTime) -> String {
    let remaining = at - now;
    if remaining < Duration::zero() {
        return "now".to_string();
    }
    let days = remaining.num_days();
    let hours = remaining.num_hours() % 24;
    let minutes = remaining.num_minutes() % 60;
    match (days, hours, minutes) {
        (0, 0, 0) => "less than a minute".to_string(),
        (0, 0, m) => format!("{m} min"),
        (0, h, m) => format!("{h} h {m} min"),
        (d, h, m) => format!("{d} d {h} h {m} min"),
    }
}

/// Local wall-clock time to epoch milliseconds. Times that fall into a DST gap
/// are pushed forward by an hour.
#[must_use]
pub fn to_epoch_millis(at: NaiveDateTime) -> i64 {
    Local
        .from_local_datetime(&at)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(at + Duration::hours(1))).earliest())
        .map_or_else(
            || Utc.from_utc_datetime(&at).timestamp_millis(),
            |local| local.timestamp_millis(),
        )
}

#[must_use]
pub fn from_epoch_millis(millis: i64) -> Option<NaiveDateTime> {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|local| local.naive_local())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Timelike};

    use super::*;
    use crate::alarm::AlarmBuilder;

    // 2024-01-03 was a Wednesday
    fn wednesday(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn alarm(hour: u32, minute: u32, days: &[Day], repeat: bool) -> Alarm {
        AlarmBuilder::new()
            .time(hour, minute)
            .days(days.iter().copied().collect())
            .repeat(repeat)
            .build()
            .unwrap()
    }

    #[test]
    fn day_values_are_powers_of_two() {
        let values: Vec<u8> = Day::ALL.iter().map(|d| d.value()).collect();
        assert_eq!(values, vec![1, 2, 4, 8, 16, 32, 64]);
    }

    #[test]
    fn every_day_set_round_trips_through_its_value() {
        for value in 0..=0x7f_u8 {
            let days = value_to_days(value);
            assert_eq!(days_to_value(days), value);
            assert_eq!(value_to_days(days_to_value(days)), days);
        }
    }

    #[test]
    fn value_to_days_drops_unknown_bits() {
        assert_eq!(value_to_days(0xff), DaySet::every_day());
    }

    #[test]
    fn toggle_is_symmetric() {
        let mut days = DaySet::empty();
        assert!(days.toggle(Day::Friday));
        assert!(!days.toggle(Day::Friday));
        assert!(days.is_empty());
    }

    #[test]
    fn parses_day_names() {
        assert_eq!("mon".parse::<Day>(), Ok(Day::Monday));
        assert_eq!("Saturday".parse::<Day>(), Ok(Day::Saturday));
        assert!("someday".parse::<Day>().is_err());
    }

    #[test]
    fn monday_alarm_on_a_wednesday_is_five_days_ahead() {
        let now = wednesday(12, 0);
        let alarm = alarm(8, 0, &[Day::Monday], true);
        let occurrences = all_occurrences(&alarm, now);
        assert_eq!(occurrences.len(), 1);
        let expected = NaiveDate::from_ymd_opt(2024, 1, 8)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(occurrences[0].at, expected);
        assert_eq!(occurrences[0].day, Day::Monday);
        assert!(occurrences[0].at > now);
        assert_eq!((occurrences[0].at - now.date().and_hms_opt(8, 0, 0).unwrap()).num_days(), 5);
    }

    #[test]
    fn same_day_later_today_is_not_rolled() {
        let now = wednesday(6, 30);
        let alarm = alarm(7, 0, &[Day::Wednesday], true);
        assert_eq!(next_occurrence(&alarm, Day::Wednesday, now), wednesday(7, 0));
    }

    #[test]
    fn same_day_exact_time_rolls_a_week() {
        let now = wednesday(7, 0);
        let alarm = alarm(7, 0, &[Day::Wednesday], true);
        let next = next_occurrence(&alarm, Day::Wednesday, now);
        assert_eq!(next, wednesday(7, 0) + Duration::days(7));
    }

    #[test]
    fn occurrences_are_always_within_a_week() {
        let now = wednesday(23, 59);
        let alarm = alarm(0, 0, &DaySet::every_day().iter().collect::<Vec<_>>(), true);
        for occurrence in all_occurrences(&alarm, now) {
            assert!(occurrence.at > now);
            assert!(occurrence.at - now <= Duration::days(7));
            assert_eq!(occurrence.at.second(), 0);
            assert_eq!(Day::of(occurrence.at), occurrence.day);
        }
    }

    #[test]
    fn non_repeating_alarm_skips_days_already_past_this_week() {
        let now = wednesday(12, 0);
        let alarm = alarm(8, 0, &[Day::Monday, Day::Wednesday, Day::Friday], false);
        let days: Vec<Day> = all_occurrences(&alarm, now).iter().map(|o| o.day).collect();
        // wednesday's slot has passed but it is not earlier in the week, so it rolls
        assert_eq!(days, vec![Day::Wednesday, Day::Friday]);
    }

    #[test]
    fn nearest_rolls_to_tomorrow() {
        let alarm = alarm(9, 15, &[], false);
        assert_eq!(nearest_occurrence(&alarm, wednesday(8, 0)), wednesday(9, 15));
        assert_eq!(
            nearest_occurrence(&alarm, wednesday(10, 0)),
            wednesday(9, 15) + Duration::days(1)
        );
    }

    #[test]
    fn next_alarm_picks_the_soonest() {
        let alarm = alarm(8, 0, &[Day::Monday, Day::Thursday], true);
        let next = next_alarm(&alarm, wednesday(12, 0)).unwrap();
        assert_eq!(next.day, Day::Thursday);
        assert_eq!(next.at, wednesday(8, 0) + Duration::days(1));
    }

    #[test]
    fn formats_times() {
        assert_eq!(format_time(0, 5, false), "12:05");
        assert_eq!(format_time(13, 5, false), "1:05");
        assert_eq!(format_time(13, 5, true), "13:05");
        assert_eq!(format_time(12, 30, false), "12:30");
        assert_eq!(meridian(0, false), "AM");
        assert_eq!(meridian(12, false), "PM");
        assert_eq!(meridian(12, true), "");
    }

    #[test]
    fn formats_remaining_time() {
        let now = wednesday(8, 0);
        assert_eq!(format_remaining(now, wednesday(8, 0)), "less than a minute");
        assert_eq!(format_remaining(now, wednesday(8, 12)), "12 min");
        assert_eq!(format_remaining(now, wednesday(13, 3)), "5 h 3 min");
        assert_eq!(format_remaining(now, wednesday(7, 30)), "now");
        assert_eq!(format_remaining(now, wednesday(7, 59)), "now");
    }

    #[test]
    fn epoch_millis_round_trip_for_ordinary_times() {
        let at = wednesday(8, 0);
        assert_eq!(from_epoch_millis(to_epoch_millis(at)), Some(at));
    }
}
