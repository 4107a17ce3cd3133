//! Error types for the scheduling and wake-up engine.
//!
//! None of these are fatal: every failure leaves the engine in a state that can
//! be re-derived from the alarm records and the current wall-clock time.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A cancel found no matching timer. Tolerated: timers are re-derived on
    /// every reschedule.
    #[error("no timer registered under id {0}")]
    SchedulingMismatch(i64),

    #[error("snooze limit of {max} reached")]
    SnoozeLimitExceeded { max: i32 },

    #[error("scanned tag {scanned} does not match the tag assigned to this alarm")]
    NfcMismatch { scanned: String },

    #[error("no nfc tag scanned")]
    NfcTagMissing,

    #[error("nfc is required to dismiss this alarm but is unavailable on this device")]
    NfcUnsupported,

    #[error("audio focus denied")]
    AudioFocusDenied,

    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("invalid time {hour}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },

    #[error("alarm has not been assigned an id yet")]
    UnassignedAlarm,

    #[error("no alarm with id {0}")]
    AlarmNotFound(i64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("couldn't parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("couldn't serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("couldn't determine the config directory")]
    NoConfigDir,
}

impl Error {
    /// Errors that are shown to the user as a transient message, with no state
    /// change in the wake-up process.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::SnoozeLimitExceeded { .. }
                | Self::NfcMismatch { .. }
                | Self::NfcTagMissing
                | Self::NfcUnsupported
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_refusals_are_user_facing() {
        assert!(Error::SnoozeLimitExceeded { max: 3 }.is_user_facing());
        assert!(Error::NfcTagMissing.is_user_facing());
        assert!(!Error::SchedulingMismatch(14).is_user_facing());
        assert!(!Error::AudioFocusDenied.is_user_facing());
    }

    #[test]
    fn messages_name_the_details() {
        assert_eq!(
            Error::InvalidTime { hour: 25, minute: 3 }.to_string(),
            "invalid time 25:03"
        );
        assert_eq!(
            Error::SnoozeLimitExceeded { max: 3 }.to_string(),
            "snooze limit of 3 reached"
        );
    }
}
