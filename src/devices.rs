//! The hardware a ringing alarm drives: speech, audio, vibration, notifications
//! and the NFC reader. The wake-up process only sequences calls to these.

use std::time::Duration;

use log::{info, warn};

use crate::{
    alarm::{AudioSource, Media},
    error::Result,
    nfc::NfcHardware,
};

/// Whether speech finished during the call or will report back later through
/// [`crate::wakeup::WakeUp::on_speech_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utterance {
    Finished,
    Pending,
}

pub trait Speaker {
    /// # Errors
    /// if the speech engine can't speak
    fn speak(&mut self, text: &str) -> Result<Utterance>;
    /// stops the current utterance, the engine stays usable
    fn stop(&mut self);
    fn shutdown(&mut self);
}

pub trait AudioOutput {
    /// Ducks other audio for the alarm.
    ///
    /// # Errors
    /// [`crate::Error::AudioFocusDenied`], playback can still go ahead
    fn request_focus(&mut self) -> Result<()>;
    /// starts looping `media`, `volume` is 0..=100
    ///
    /// # Errors
    /// [`crate::Error::MediaUnavailable`] if the media can't be played
    fn play(&mut self, media: &Media, source: AudioSource, volume: u8) -> Result<()>;
    fn stop(&mut self);
    /// stops playback and gives back audio focus
    fn release(&mut self);
}

pub trait Vibrator {
    fn pulse(&mut self, length: Duration);
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Snooze,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub alarm_id: i64,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
}

pub trait Notifier {
    fn ringing(&mut self, notification: &Notification);
    fn missed(&mut self, notification: &Notification);
    /// a short message such as "snooze limit reached"
    fn transient(&mut self, message: &str);
    fn clear(&mut self, alarm_id: i64);
}

pub trait NfcReader {
    fn hardware(&self) -> NfcHardware;
    fn enable(&mut self);
    fn disable(&mut self);
}

/// Everything one ringing alarm needs.
pub struct Devices {
    pub speaker: Box<dyn Speaker>,
    pub audio: Box<dyn AudioOutput>,
    pub vibrator: Box<dyn Vibrator>,
    pub notifier: Box<dyn Notifier>,
    pub nfc: Box<dyn NfcReader>,
}

impl std::fmt::Debug for Devices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Devices").finish_non_exhaustive()
    }
}

impl Devices {
    /// devices that write to the terminal and the log
    #[must_use]
    pub fn console() -> Self {
        Self {
            speaker: Box::new(ConsoleSpeaker),
            audio: Box::new(ConsoleAudio::default()),
            vibrator: Box::new(ConsoleVibrator),
            notifier: Box::new(ConsoleNotifier),
            nfc: Box::new(NoNfc),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsoleSpeaker;

impl Speaker for ConsoleSpeaker {
    fn speak(&mut self, text: &str) -> Result<Utterance> {
        println!("🗣 {text}");
        Ok(Utterance::Finished)
    }

    fn stop(&mut self) {}

    fn shutdown(&mut self) {}
}

#[derive(Debug, Default)]
pub struct ConsoleAudio {
    playing: bool,
}

impl AudioOutput for ConsoleAudio {
    fn request_focus(&mut self) -> Result<()> {
        Ok(())
    }

    fn play(&mut self, media: &Media, source: AudioSource, volume: u8) -> Result<()> {
        info!("playing {media} on the {source:?} stream at {volume}%");
        println!("\u{7}🔔 ringing ({media}, {volume}%)");
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.playing {
            info!("playback stopped");
        }
        self.playing = false;
    }

    fn release(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Default)]
pub struct ConsoleVibrator;

impl Vibrator for ConsoleVibrator {
    fn pulse(&mut self, length: Duration) {
        log::trace!("vibrating for {length:?}");
    }

    fn stop(&mut self) {}
}

#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn ringing(&mut self, notification: &Notification) {
        println!("⏰ {}: {}", notification.title, notification.body);
        println!("   type `snooze` or `dismiss` (`scan <tag>` to present a tag)");
    }

    fn missed(&mut self, notification: &Notification) {
        warn!("{}: {}", notification.title, notification.body);
        println!("❗ {}: {}", notification.title, notification.body);
    }

    fn transient(&mut self, message: &str) {
        println!("   {message}");
    }

    fn clear(&mut self, _alarm_id: i64) {}
}

/// A device without an NFC reader.
#[derive(Debug, Default)]
pub struct NoNfc;

impl NfcReader for NoNfc {
    fn hardware(&self) -> NfcHardware {
        NfcHardware::Absent
    }

    fn enable(&mut self) {}

    fn disable(&mut self) {}
}

/// Tags are typed into the daemon with `scan <tag>`, so the reader is always
/// there.
#[derive(Debug, Default)]
pub struct TypedNfc {
    listening: bool,
}

impl TypedNfc {
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.listening
    }
}

impl NfcReader for TypedNfc {
    fn hardware(&self) -> NfcHardware {
        NfcHardware::Ready
    }

    fn enable(&mut self) {
        self.listening = true;
    }

    fn disable(&mut self) {
        self.listening = false;
    }
}

#[cfg(feature = "sound")]
pub use sound::RodioAudio;

#[cfg(feature = "sound")]
mod sound {
    use std::{
        fmt::Display,
        fs::File,
        io::BufReader,
        path::{Path, PathBuf},
    };

    use log::{debug, info};
    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};

    use super::AudioOutput;
    use crate::{
        alarm::{AudioSource, Media, MediaKind},
        error::{Error, Result},
    };

    fn unavailable(path: &Path, e: impl Display) -> Error {
        Error::MediaUnavailable(format!("{}: {e}", path.display()))
    }

    /// Plays alarms through the default output device.
    pub struct RodioAudio {
        default_tone: PathBuf,
        stream: Option<(OutputStream, OutputStreamHandle)>,
        sink: Option<Sink>,
    }

    impl RodioAudio {
        #[must_use]
        pub const fn new(default_tone: PathBuf) -> Self {
            Self {
                default_tone,
                stream: None,
                sink: None,
            }
        }

        fn path(&self, media: &Media) -> Result<PathBuf> {
            match media.kind {
                MediaKind::Default => Ok(self.default_tone.clone()),
                MediaKind::File | MediaKind::Ringtone => Ok(PathBuf::from(&media.path)),
                MediaKind::Uri => Err(Error::MediaUnavailable(format!(
                    "can't stream {}",
                    media.path
                ))),
            }
        }
    }

    impl AudioOutput for RodioAudio {
        fn request_focus(&mut self) -> Result<()> {
            if self.stream.is_none() {
                let stream = OutputStream::try_default().map_err(|e| {
                    debug!("{e}");
                    Error::AudioFocusDenied
                })?;
                self.stream = Some(stream);
            }
            Ok(())
        }

        fn play(&mut self, media: &Media, source: AudioSource, volume: u8) -> Result<()> {
            let path = self.path(media)?;
            let file = File::open(&path).map_err(|e| unavailable(&path, e))?;
            // create source that repeatedly plays the sound
            let input = Decoder::new(BufReader::new(file))
                .map_err(|e| unavailable(&path, e))?
                .repeat_infinite();
            if self.stream.is_none() {
                self.stream = Some(OutputStream::try_default().map_err(|e| unavailable(&path, e))?);
            }
            let Some((_, handle)) = &self.stream else {
                return Err(Error::MediaUnavailable("no output device".to_string()));
            };
            let sink = Sink::try_new(handle).map_err(|e| unavailable(&path, e))?;
            sink.set_volume(f32::from(volume) / 100.0);
            sink.append(input);
            sink.play();
            info!("playing {} on the {source:?} stream", path.display());
            self.sink = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(sink) = self.sink.take() {
                sink.stop();
            }
        }

        fn release(&mut self) {
            self.stop();
            self.stream = None;
        }
    }
}
