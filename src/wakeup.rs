//! What happens once an alarm fires.
//!
//! A [`WakeUp`] owns one alarm snapshot and the devices it rings on. It moves
//! through [`WakeState`]s as speech finishes, deferred tasks come due and the
//! user (or the auto-dismiss timeout) ends it. The first of snooze, dismiss and
//! auto-dismiss to finish wins; anything arriving afterwards is ignored.
//!
//! Nothing here sleeps or spawns: the owner feeds in completions through
//! [`WakeUp::on_speech_done`] and drives deferred work with [`WakeUp::tick`].

use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDateTime, Timelike};
use log::{debug, info, warn};

use crate::{
    alarm::{Alarm, Media},
    calendar::{self, Day},
    config::Settings,
    devices::{Devices, Notification, NotificationAction, Utterance},
    error::{Error, Result},
    nfc,
    scheduler::{Scheduler, TimerService},
    tasks::{TaskKind, Tasks},
};

/// Auto-dismiss fires this much before the configured timeout so it never
/// lands on the same instant as the alarm's next occurrence.
pub const AUTO_DISMISS_LEAD_MS: i64 = 2000;

/// Where the per-alarm snooze counts are kept.
pub trait SnoozeCounter {
    fn snooze_count(&self, alarm_id: i64) -> u32;
    fn set_snooze_count(&mut self, alarm_id: i64, count: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    Idle,
    Started,
    Speaking,
    AudioPlaying,
    Snoozed,
    Dismissed,
    CleanedUp,
}

impl WakeState {
    #[must_use]
    pub const fn is_ringing(self) -> bool {
        matches!(self, Self::Started | Self::Speaking | Self::AudioPlaying)
    }
}

/// How a wake-up ended. Carries the alarm snapshot so the caller can store
/// what changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Snoozed {
        alarm: Alarm,
        until: NaiveDateTime,
        count: u32,
    },
    Dismissed {
        alarm: Alarm,
    },
    /// nobody reacted before the timeout
    Missed {
        alarm: Alarm,
    },
    /// the wake-up had already ended
    Ignored,
}

#[derive(Debug)]
pub struct WakeUp {
    alarm: Alarm,
    day: Day,
    settings: Settings,
    devices: Devices,
    state: WakeState,
    paused: bool,
    tasks: Tasks,
    started_at: Option<NaiveDateTime>,
    speech_pending: bool,
    speech_interrupted: bool,
    vibrating: bool,
    released: bool,
}

impl WakeUp {
    /// `day` is the weekday of the occurrence that fired.
    #[must_use]
    pub fn new(alarm: Alarm, day: Day, settings: Settings, devices: Devices) -> Self {
        Self {
            alarm,
            day,
            settings,
            devices,
            state: WakeState::Idle,
            paused: false,
            tasks: Tasks::new(),
            started_at: None,
            speech_pending: false,
            speech_interrupted: false,
            vibrating: false,
            released: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> WakeState {
        self.state
    }

    #[must_use]
    pub const fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    #[must_use]
    pub const fn day(&self) -> Day {
        self.day
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(
            self.state,
            WakeState::Snoozed | WakeState::Dismissed | WakeState::CleanedUp
        )
    }

    #[must_use]
    pub const fn started_at(&self) -> Option<NaiveDateTime> {
        self.started_at
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn auto_dismiss_at(&self) -> Option<NaiveDateTime> {
        self.tasks.due_at(TaskKind::AutoDismiss)
    }

    /// when [`Self::tick`] next has something to do
    #[must_use]
    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.tasks.next_due()
    }

    /// Starts ringing. A second call is ignored.
    pub fn start(&mut self, now: NaiveDateTime) {
        if self.begin(now) {
            if self.settings.speak_time {
                self.speak(now);
            } else {
                self.play(now);
            }
        }
    }

    /// Picks an alarm that was already ringing back up after a restart,
    /// skipping the spoken time.
    pub fn reattach(&mut self, now: NaiveDateTime) {
        if self.begin(now) {
            self.play(now);
        }
    }

    fn begin(&mut self, now: NaiveDateTime) -> bool {
        if self.state != WakeState::Idle {
            debug!("alarm {} is already {:?}", self.alarm.id(), self.state);
            return false;
        }
        info!("alarm {} ringing", self.alarm.id());
        self.state = WakeState::Started;
        self.started_at = Some(now);
        let notification = self.notification();
        self.devices.notifier.ringing(&notification);
        if self.alarm.use_nfc() {
            self.devices.nfc.enable();
        }
        self.wait_for_auto_dismiss(now);
        true
    }

    fn wait_for_auto_dismiss(&mut self, now: NaiveDateTime) {
        let minutes = self.settings.auto_dismiss_minutes;
        if minutes == 0 {
            return;
        }
        let delay = i64::from(minutes) * 60_000 - AUTO_DISMISS_LEAD_MS;
        self.tasks
            .schedule(TaskKind::AutoDismiss, now + Duration::milliseconds(delay));
    }

    #[must_use]
    pub fn speech_text(&self, now: NaiveDateTime) -> String {
        let use_24h = self.settings.use_24h;
        let time = calendar::format_time(now.hour(), now.minute(), use_24h);
        match calendar::meridian(now.hour(), use_24h) {
            "" => format!("It's {time}"),
            meridian => format!("It's {time} {meridian}"),
        }
    }

    fn speak(&mut self, now: NaiveDateTime) {
        self.state = WakeState::Speaking;
        self.stop_vibration();
        let text = self.speech_text(now);
        self.speech_pending = true;
        match self.devices.speaker.speak(&text) {
            Ok(Utterance::Pending) => {}
            Ok(Utterance::Finished) => self.on_speech_done(now),
            Err(e) => {
                warn!("couldn't speak the time: {e}");
                self.on_speech_done(now);
            }
        }
    }

    /// The speech engine started talking.
    pub fn on_speech_started(&mut self) {
        if self.state == WakeState::Speaking {
            self.stop_vibration();
        }
    }

    /// The speech engine finished; the alarm sound takes over.
    pub fn on_speech_done(&mut self, now: NaiveDateTime) {
        if self.state != WakeState::Speaking {
            debug!("speech finished while {:?}", self.state);
            return;
        }
        self.speech_pending = false;
        self.play(now);
    }

    fn play(&mut self, now: NaiveDateTime) {
        self.state = WakeState::AudioPlaying;
        if let Err(e) = self.devices.audio.request_focus() {
            warn!("{e}, playing without ducking other audio");
        }
        let (source, volume) = (self.alarm.audio_source(), self.alarm.volume());
        if let Err(e) = self.devices.audio.play(self.alarm.media(), source, volume) {
            warn!("{e}");
            let fallback = Media::default();
            if *self.alarm.media() == fallback {
                self.devices.notifier.transient(&e.to_string());
            } else if let Err(e) = self.devices.audio.play(&fallback, source, volume) {
                warn!("default tone failed too: {e}");
                self.devices.notifier.transient(&e.to_string());
            }
        }
        if self.alarm.vibrate() {
            self.vibrating = true;
            self.pulse(now);
        }
    }

    fn pulse_length(&self) -> StdDuration {
        StdDuration::from_millis(self.settings.vibration_pulse_ms)
    }

    fn pulse(&mut self, now: NaiveDateTime) {
        let length = self.pulse_length();
        self.devices.vibrator.pulse(length);
        // on for one pulse, off for one pulse
        let period = i64::try_from(self.settings.vibration_pulse_ms.saturating_mul(2))
            .unwrap_or(i64::MAX / 2);
        self.tasks.schedule(
            TaskKind::VibrationPulse,
            now + Duration::milliseconds(period.max(1)),
        );
    }

    fn stop_vibration(&mut self) {
        self.vibrating = false;
        self.tasks.cancel(TaskKind::VibrationPulse);
        self.devices.vibrator.stop();
    }

    /// Runs whatever deferred work is due. Returns the outcome if the
    /// auto-dismiss timeout ended the wake-up.
    pub fn tick(
        &mut self,
        now: NaiveDateTime,
        snoozes: &mut dyn SnoozeCounter,
    ) -> Option<Outcome> {
        for (kind, _) in self.tasks.take_due(now) {
            match kind {
                TaskKind::VibrationPulse if self.vibrating && !self.is_finished() => {
                    self.pulse(now);
                }
                TaskKind::VibrationPulse => {}
                TaskKind::AutoDismiss => return Some(self.on_auto_dismiss_fire(snoozes)),
            }
        }
        None
    }

    /// Puts the alarm off for the configured snooze time.
    ///
    /// # Errors
    /// [`Error::SnoozeLimitExceeded`] when the alarm has been snoozed the
    /// maximum number of times, in which case nothing changes
    pub fn snooze<T: TimerService>(
        &mut self,
        now: NaiveDateTime,
        scheduler: &mut Scheduler<T>,
        snoozes: &mut dyn SnoozeCounter,
    ) -> Result<Outcome> {
        if self.is_finished() {
            debug!("late snooze for alarm {} ignored", self.alarm.id());
            return Ok(Outcome::Ignored);
        }
        let count = snoozes.snooze_count(self.alarm.id());
        let max = self.settings.max_snooze;
        if let Ok(limit) = u32::try_from(max) {
            if count.saturating_add(1) > limit {
                let e = Error::SnoozeLimitExceeded { max };
                self.devices.notifier.transient(&e.to_string());
                return Err(e);
            }
        }
        let until = now + Duration::minutes(i64::from(self.settings.snooze_minutes));
        scheduler.snooze(&self.alarm, self.day, until)?;
        let count = count.saturating_add(1);
        snoozes.set_snooze_count(self.alarm.id(), count);
        self.alarm.set_time(until.hour(), until.minute())?;
        info!("alarm {} snoozed until {until} ({count} in a row)", self.alarm.id());
        self.state = WakeState::Snoozed;
        self.cleanup();
        Ok(Outcome::Snoozed {
            alarm: self.alarm.clone(),
            until,
            count,
        })
    }

    /// Turns the alarm off, if the NFC gate lets it.
    ///
    /// `scanned` is the id of the tag presented while ringing. A tag scanned
    /// while paused does not count.
    ///
    /// # Errors
    /// the gate's refusal ([`Error::NfcMismatch`], [`Error::NfcTagMissing`] or
    /// [`Error::NfcUnsupported`]); the alarm keeps ringing
    pub fn dismiss(
        &mut self,
        scanned: Option<&str>,
        snoozes: &mut dyn SnoozeCounter,
    ) -> Result<Outcome> {
        if self.is_finished() {
            debug!("late dismiss for alarm {} ignored", self.alarm.id());
            return Ok(Outcome::Ignored);
        }
        // the reader is off while paused
        let scanned = if self.paused {
            if scanned.is_some() {
                debug!("tag scanned while alarm {} is paused ignored", self.alarm.id());
            }
            None
        } else {
            scanned
        };
        let hardware = self.devices.nfc.hardware();
        if let Err(e) = nfc::check(&self.alarm, scanned, hardware, self.settings.require_nfc) {
            self.devices.notifier.transient(&e.to_string());
            return Err(e);
        }
        self.finish(snoozes);
        Ok(Outcome::Dismissed {
            alarm: self.alarm.clone(),
        })
    }

    /// The auto-dismiss timeout: a dismiss that skips the NFC gate since
    /// nobody is around to scan a tag.
    pub fn on_auto_dismiss_fire(&mut self, snoozes: &mut dyn SnoozeCounter) -> Outcome {
        if self.is_finished() {
            return Outcome::Ignored;
        }
        let notification = Notification {
            alarm_id: self.alarm.id(),
            title: "Missed alarm".to_string(),
            body: format!(
                "{} at {}",
                self.title(),
                self.alarm.display_time(self.settings.use_24h)
            ),
            actions: vec![],
        };
        warn!("alarm {} was not dismissed in time", self.alarm.id());
        self.devices.notifier.missed(&notification);
        self.finish(snoozes);
        Outcome::Missed {
            alarm: self.alarm.clone(),
        }
    }

    fn finish(&mut self, snoozes: &mut dyn SnoozeCounter) {
        self.alarm.consume_day(self.day);
        snoozes.set_snooze_count(self.alarm.id(), 0);
        info!("alarm {} dismissed", self.alarm.id());
        self.state = WakeState::Dismissed;
        self.cleanup();
    }

    /// The ringing screen went out of view.
    pub fn pause(&mut self) {
        if !self.state.is_ringing() || self.paused {
            return;
        }
        self.paused = true;
        self.devices.nfc.disable();
        if self.speech_pending {
            self.devices.speaker.stop();
            self.speech_interrupted = true;
        }
    }

    /// The ringing screen is back. Speech that was cut off by the pause is not
    /// repeated, the alarm sound starts instead.
    pub fn resume(&mut self, now: NaiveDateTime) {
        if !self.paused {
            return;
        }
        self.paused = false;
        if self.alarm.use_nfc() && self.state.is_ringing() {
            self.devices.nfc.enable();
        }
        if self.speech_interrupted && self.state == WakeState::Speaking {
            self.speech_interrupted = false;
            self.speech_pending = false;
            self.play(now);
        }
    }

    /// Releases everything the wake-up holds. Safe to call any number of
    /// times and from any state.
    pub fn cleanup(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.tasks.cancel_all();
        self.vibrating = false;
        self.devices.vibrator.stop();
        self.devices.audio.release();
        self.devices.speaker.shutdown();
        self.devices.nfc.disable();
        self.devices.notifier.clear(self.alarm.id());
        self.speech_pending = false;
        self.state = WakeState::CleanedUp;
        debug!("alarm {} cleaned up", self.alarm.id());
    }

    fn title(&self) -> String {
        if self.alarm.name().is_empty() {
            "Alarm".to_string()
        } else {
            self.alarm.name().to_string()
        }
    }

    #[must_use]
    pub fn notification(&self) -> Notification {
        Notification {
            alarm_id: self.alarm.id(),
            title: self.title(),
            body: self.alarm.display_time(self.settings.use_24h),
            actions: vec![NotificationAction::Snooze, NotificationAction::Dismiss],
        }
    }
}

impl Drop for WakeUp {
    fn drop(&mut self) {
        self.cleanup();
    }
}
