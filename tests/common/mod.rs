//! Recording stand-ins for the devices a wake-up drives.

#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc, time::Duration};

use chrono::{NaiveDate, NaiveDateTime};
use wakeup_clock::{
    alarm::{AudioSource, Media, MediaKind},
    devices::{
        AudioOutput, Devices, NfcReader, Notification, Notifier, Speaker, Utterance, Vibrator,
    },
    nfc::NfcHardware,
    Error, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Speak(String),
    SpeechStop,
    SpeechShutdown,
    Focus,
    Play(Media),
    AudioStop,
    AudioRelease,
    Pulse(Duration),
    VibrateStop,
    Ringing(Notification),
    Missed(Notification),
    Transient(String),
    Clear(i64),
    NfcOn,
    NfcOff,
}

pub type Log = Rc<RefCell<Vec<Call>>>;

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub speech: Utterance,
    pub focus_denied: bool,
    /// anything but the default tone fails to play
    pub only_default_media: bool,
    pub nfc: NfcHardware,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            speech: Utterance::Pending,
            focus_denied: false,
            only_default_media: false,
            nfc: NfcHardware::Ready,
        }
    }
}

struct FakeSpeaker(Log, Utterance);

impl Speaker for FakeSpeaker {
    fn speak(&mut self, text: &str) -> Result<Utterance> {
        self.0.borrow_mut().push(Call::Speak(text.to_string()));
        Ok(self.1)
    }

    fn stop(&mut self) {
        self.0.borrow_mut().push(Call::SpeechStop);
    }

    fn shutdown(&mut self) {
        self.0.borrow_mut().push(Call::SpeechShutdown);
    }
}

struct FakeAudio(Log, Options);

impl AudioOutput for FakeAudio {
    fn request_focus(&mut self) -> Result<()> {
        if self.1.focus_denied {
            return Err(Error::AudioFocusDenied);
        }
        self.0.borrow_mut().push(Call::Focus);
        Ok(())
    }

    fn play(&mut self, media: &Media, _source: AudioSource, _volume: u8) -> Result<()> {
        self.0.borrow_mut().push(Call::Play(media.clone()));
        if self.1.only_default_media && media.kind != MediaKind::Default {
            return Err(Error::MediaUnavailable(media.path.clone()));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.0.borrow_mut().push(Call::AudioStop);
    }

    fn release(&mut self) {
        self.0.borrow_mut().push(Call::AudioRelease);
    }
}

struct FakeVibrator(Log);

impl Vibrator for FakeVibrator {
    fn pulse(&mut self, length: Duration) {
        self.0.borrow_mut().push(Call::Pulse(length));
    }

    fn stop(&mut self) {
        self.0.borrow_mut().push(Call::VibrateStop);
    }
}

struct FakeNotifier(Log);

impl Notifier for FakeNotifier {
    fn ringing(&mut self, notification: &Notification) {
        self.0.borrow_mut().push(Call::Ringing(notification.clone()));
    }

    fn missed(&mut self, notification: &Notification) {
        self.0.borrow_mut().push(Call::Missed(notification.clone()));
    }

    fn transient(&mut self, message: &str) {
        self.0.borrow_mut().push(Call::Transient(message.to_string()));
    }

    fn clear(&mut self, alarm_id: i64) {
        self.0.borrow_mut().push(Call::Clear(alarm_id));
    }
}

struct FakeNfc(Log, NfcHardware);

impl NfcReader for FakeNfc {
    fn hardware(&self) -> NfcHardware {
        self.1
    }

    fn enable(&mut self) {
        self.0.borrow_mut().push(Call::NfcOn);
    }

    fn disable(&mut self) {
        self.0.borrow_mut().push(Call::NfcOff);
    }
}

pub fn devices(options: Options) -> (Devices, Log) {
    let log: Log = Rc::default();
    let devices = Devices {
        speaker: Box::new(FakeSpeaker(log.clone(), options.speech)),
        audio: Box::new(FakeAudio(log.clone(), options)),
        vibrator: Box::new(FakeVibrator(log.clone())),
        notifier: Box::new(FakeNotifier(log.clone())),
        nfc: Box::new(FakeNfc(log.clone(), options.nfc)),
    };
    (devices, log)
}

pub fn count(log: &Log, call: &Call) -> usize {
    log.borrow().iter().filter(|c| *c == call).count()
}

pub fn position(log: &Log, matches: impl Fn(&Call) -> bool) -> Option<usize> {
    log.borrow().iter().position(matches)
}

/// 2024-01-03 was a Wednesday
pub fn wednesday(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}
