use std::fmt;

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{
    calendar::{self, Day, DaySet},
    error::{Error, Result},
};

/// id of an alarm that has not been stored yet
pub const UNASSIGNED_ID: i64 = -1;

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

#[inline]
#[must_use]
pub const fn unassigned() -> i64 {
    UNASSIGNED_ID
}

#[inline]
#[must_use]
pub const fn full_volume() -> u8 {
    100
}

/// Which audio stream the alarm plays on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    Media,
    #[default]
    Alarm,
    Notification,
    Ringtone,
    System,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    /// the built in alarm tone
    #[default]
    Default,
    File,
    Ringtone,
    Uri,
}

/// What the alarm plays.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub kind: MediaKind,
}

impl Media {
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: MediaKind::File,
        }
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MediaKind::Default => f.write_str("default tone"),
            _ => write!(f, "{:?}: {}", self.kind, self.path),
        }
    }
}

/// An alarm record.
///
/// Fields are only changed through the setters so the time and day set always
/// stay within range. Records are plain values: the scheduler and the wake-up
/// process each work on their own copy and report changes back through
/// [`crate::book::AlarmBook`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    #[serde(default = "unassigned")]
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(with = "toml_datetime_compat")]
    time: NaiveTime,
    #[serde(default)]
    days: DaySet,
    #[serde(default = "always_true")]
    repeat: bool,
    #[serde(default = "always_true")]
    enabled: bool,
    #[serde(default = "always_true")]
    vibrate: bool,
    #[serde(default)]
    use_nfc: bool,
    /// empty means any tag dismisses the alarm
    #[serde(default)]
    nfc_tag_id: String,
    #[serde(default = "full_volume")]
    volume: u8,
    #[serde(default)]
    audio_source: AudioSource,
    #[serde(default)]
    media: Media,
}

/// The fields that decide when an alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleKey {
    pub id: i64,
    pub time: NaiveTime,
    pub days: DaySet,
    pub repeat: bool,
    pub enabled: bool,
}

/// Identity of the timer registered for `alarm` on `day`.
///
/// Registration and cancellation must both derive ids through here, nothing
/// stores the result.
#[must_use]
pub const fn occurrence_id(alarm: &Alarm, day: Day) -> i64 {
    timer_id(alarm.id, day)
}

/// [`occurrence_id`] for when only the alarm's id is at hand.
#[must_use]
pub const fn timer_id(alarm_id: i64, day: Day) -> i64 {
    alarm_id + day.offset()
}

fn valid_time(hour: u32, minute: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or(Error::InvalidTime { hour, minute })
}

impl Alarm {
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        self.id >= 0
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn time(&self) -> NaiveTime {
        self.time
    }

    #[must_use]
    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    #[must_use]
    pub fn minute(&self) -> u32 {
        self.time.minute()
    }

    #[must_use]
    pub const fn days(&self) -> DaySet {
        self.days
    }

    #[must_use]
    pub const fn repeat(&self) -> bool {
        self.repeat
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn vibrate(&self) -> bool {
        self.vibrate
    }

    #[must_use]
    pub const fn use_nfc(&self) -> bool {
        self.use_nfc
    }

    #[must_use]
    pub fn nfc_tag_id(&self) -> &str {
        &self.nfc_tag_id
    }

    #[must_use]
    pub const fn volume(&self) -> u8 {
        self.volume
    }

    #[must_use]
    pub const fn audio_source(&self) -> AudioSource {
        self.audio_source
    }

    #[must_use]
    pub const fn media(&self) -> &Media {
        &self.media
    }

    #[must_use]
    pub const fn schedule_key(&self) -> ScheduleKey {
        ScheduleKey {
            id: self.id,
            time: self.time,
            days: self.days,
            repeat: self.repeat,
            enabled: self.enabled,
        }
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// # Errors
    /// if `hour` is not in 0..24 or `minute` not in 0..60
    pub fn set_time(&mut self, hour: u32, minute: u32) -> Result<()> {
        self.time = valid_time(hour, minute)?;
        Ok(())
    }

    pub fn set_days(&mut self, days: DaySet) {
        self.days = days;
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_vibrate(&mut self, vibrate: bool) {
        self.vibrate = vibrate;
    }

    pub fn set_use_nfc(&mut self, use_nfc: bool) {
        self.use_nfc = use_nfc;
    }

    pub fn set_nfc_tag_id(&mut self, tag: impl Into<String>) {
        self.nfc_tag_id = tag.into();
    }

    /// clamped to 100
    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
    }

    pub fn set_audio_source(&mut self, source: AudioSource) {
        self.audio_source = source;
    }

    pub fn set_media(&mut self, media: Media) {
        self.media = media;
    }

    /// returns whether the day is set afterwards
    pub fn toggle_day(&mut self, day: Day) -> bool {
        self.days.toggle(day)
    }

    pub fn toggle_today(&mut self, now: NaiveDateTime) -> bool {
        self.toggle_day(Day::of(now))
    }

    /// `index` is the Sunday-first offset of the day, anything outside 0..7 is ignored
    pub fn toggle_weekday_index(&mut self, index: i64) -> Option<bool> {
        Day::from_offset(index).map(|day| self.toggle_day(day))
    }

    /// flips every day whose bit is set in `value`
    pub fn toggle_bitmask(&mut self, value: u8) {
        let flip = calendar::value_to_days(value);
        flip.iter().for_each(|day| {
            self.days.toggle(day);
        });
    }

    /// An alarm without days can't repeat.
    pub fn clear_repeat_if_no_days(&mut self) {
        if self.days.is_empty() {
            self.repeat = false;
        }
    }

    /// Bookkeeping after a fired occurrence was dismissed: a one-shot alarm
    /// forgets the day that fired and turns itself off when no days are left.
    pub fn consume_day(&mut self, day: Day) {
        if self.repeat {
            return;
        }
        self.days.remove(day);
        if self.days.is_empty() {
            self.enabled = false;
        }
    }

    #[must_use]
    pub fn display_time(&self, use_24h: bool) -> String {
        let time = calendar::format_time(self.hour(), self.minute(), use_24h);
        match calendar::meridian(self.hour(), use_24h) {
            "" => time,
            meridian => format!("{time} {meridian}"),
        }
    }

    #[must_use]
    pub fn describe(&self, use_24h: bool) -> String {
        let name = if self.name.is_empty() {
            "alarm"
        } else {
            self.name.as_str()
        };
        format!(
            "#{} {name} at {} ({}{}){}{}",
            self.id,
            self.display_time(use_24h),
            self.days,
            if self.repeat { "" } else { ", once" },
            if self.use_nfc { " [nfc]" } else { "" },
            if self.enabled { "" } else { " [off]" },
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmBuilder {
    id: i64,
    name: String,
    hour: u32,
    minute: u32,
    days: DaySet,
    repeat: bool,
    enabled: bool,
    vibrate: bool,
    use_nfc: bool,
    nfc_tag_id: String,
    volume: u8,
    audio_source: AudioSource,
    media: Media,
}

impl Default for AlarmBuilder {
    fn default() -> Self {
        let time = chrono::Local::now().naive_local().time();
        Self {
            id: UNASSIGNED_ID,
            name: String::new(),
            hour: time.hour(),
            minute: time.minute(),
            days: DaySet::empty(),
            repeat: true,
            enabled: true,
            vibrate: true,
            use_nfc: false,
            nfc_tag_id: String::new(),
            volume: full_volume(),
            audio_source: AudioSource::default(),
            media: Media::default(),
        }
    }
}

impl AlarmBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub const fn time(mut self, hour: u32, minute: u32) -> Self {
        self.hour = hour;
        self.minute = minute;
        self
    }

    #[must_use]
    pub const fn days(mut self, days: DaySet) -> Self {
        self.days = days;
        self
    }

    #[must_use]
    pub const fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn vibrate(mut self, vibrate: bool) -> Self {
        self.vibrate = vibrate;
        self
    }

    /// requires a scan of `tag` to dismiss, an empty tag accepts any tag
    #[must_use]
    pub fn nfc(mut self, tag: impl Into<String>) -> Self {
        self.use_nfc = true;
        self.nfc_tag_id = tag.into();
        self
    }

    #[must_use]
    pub fn volume(mut self, volume: u8) -> Self {
        self.volume = volume.min(100);
        self
    }

    #[must_use]
    pub const fn audio_source(mut self, source: AudioSource) -> Self {
        self.audio_source = source;
        self
    }

    #[must_use]
    pub fn media(mut self, media: Media) -> Self {
        self.media = media;
        self
    }

    /// # Errors
    /// if the hour or minute is out of range
    pub fn build(self) -> Result<Alarm> {
        Ok(Alarm {
            id: self.id,
            name: self.name,
            time: valid_time(self.hour, self.minute)?,
            days: self.days,
            repeat: self.repeat,
            enabled: self.enabled,
            vibrate: self.vibrate,
            use_nfc: self.use_nfc,
            nfc_tag_id: self.nfc_tag_id,
            volume: self.volume,
            audio_source: self.audio_source,
            media: self.media,
        })
    }
}

impl From<Alarm> for AlarmBuilder {
    /// used when editing so the editor starts from the alarm's current settings
    fn from(alarm: Alarm) -> Self {
        Self {
            id: alarm.id,
            hour: alarm.hour(),
            minute: alarm.minute(),
            name: alarm.name,
            days: alarm.days,
            repeat: alarm.repeat,
            enabled: alarm.enabled,
            vibrate: alarm.vibrate,
            use_nfc: alarm.use_nfc,
            nfc_tag_id: alarm.nfc_tag_id,
            volume: alarm.volume,
            audio_source: alarm.audio_source,
            media: alarm.media,
        }
    }
}
