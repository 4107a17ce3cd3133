//! Deciding whether an alarm may be dismissed, given what the NFC reader saw.

use std::fmt::Write;

use crate::{
    alarm::Alarm,
    error::{Error, Result},
};

/// State of the device's NFC hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NfcHardware {
    Ready,
    Disabled,
    #[default]
    Absent,
}

impl NfcHardware {
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Checks a dismiss attempt.
///
/// `scanned` is the parsed id of the tag scanned while ringing, if any.
/// `require_nfc` is the app-wide setting: when it is off, an alarm that wants a
/// tag can still be dismissed on a device that can't read one.
///
/// # Errors
/// - [`Error::NfcUnsupported`] if a tag is needed but the hardware can't read one
/// - [`Error::NfcTagMissing`] if a tag is needed and none was scanned
/// - [`Error::NfcMismatch`] if the wrong tag was scanned
pub fn check(
    alarm: &Alarm,
    scanned: Option<&str>,
    hardware: NfcHardware,
    require_nfc: bool,
) -> Result<()> {
    if !alarm.use_nfc() {
        return Ok(());
    }
    if !hardware.is_ready() {
        return if require_nfc {
            Err(Error::NfcUnsupported)
        } else {
            Ok(())
        };
    }
    let scanned = scanned.ok_or(Error::NfcTagMissing)?;
    let expected = alarm.nfc_tag_id();
    if expected.is_empty() || scanned == expected {
        Ok(())
    } else {
        Err(Error::NfcMismatch {
            scanned: scanned.to_string(),
        })
    }
}

/// Formats a raw tag id the way tags are stored: uppercase hex, no separators.
#[must_use]
pub fn tag_id(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut id, byte| {
        let _ = write!(id, "{byte:02X}");
        id
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmBuilder;

    fn nfc_alarm(tag: &str) -> Alarm {
        AlarmBuilder::new().time(6, 0).nfc(tag).build().unwrap()
    }

    #[test]
    fn alarms_without_nfc_always_pass() {
        let alarm = AlarmBuilder::new().time(6, 0).build().unwrap();
        assert!(check(&alarm, None, NfcHardware::Absent, true).is_ok());
    }

    #[test]
    fn matching_tag_is_required() {
        let alarm = nfc_alarm("ABC123");
        assert!(matches!(
            check(&alarm, Some("XYZ"), NfcHardware::Ready, true),
            Err(Error::NfcMismatch { scanned }) if scanned == "XYZ"
        ));
        assert!(check(&alarm, Some("ABC123"), NfcHardware::Ready, true).is_ok());
    }

    #[test]
    fn no_scan_is_distinct_from_a_mismatch() {
        let alarm = nfc_alarm("ABC123");
        assert!(matches!(
            check(&alarm, None, NfcHardware::Ready, true),
            Err(Error::NfcTagMissing)
        ));
    }

    #[test]
    fn empty_tag_accepts_any_scan() {
        let alarm = nfc_alarm("");
        assert!(check(&alarm, Some("04A1"), NfcHardware::Ready, true).is_ok());
        assert!(check(&alarm, None, NfcHardware::Ready, true).is_err());
    }

    #[test]
    fn missing_hardware_depends_on_the_app_setting() {
        let alarm = nfc_alarm("ABC123");
        assert!(check(&alarm, None, NfcHardware::Disabled, false).is_ok());
        assert!(matches!(
            check(&alarm, None, NfcHardware::Absent, true),
            Err(Error::NfcUnsupported)
        ));
    }

    #[test]
    fn formats_tag_ids() {
        assert_eq!(tag_id(&[0x04, 0xa2, 0xff]), "04A2FF");
        assert_eq!(tag_id(&[]), "");
    }
}
