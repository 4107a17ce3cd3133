use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    alarm::{always_true, Alarm},
    error::{Error, Result},
    scheduler::AlarmRef,
    wakeup::SnoozeCounter,
};

const fn default_auto_dismiss() -> u32 {
    10
}

const fn default_snooze() -> u32 {
    10
}

const fn unlimited() -> i32 {
    -1
}

const fn default_pulse() -> u64 {
    500
}

/// App-wide wake-up behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// read the time out loud before the alarm sound starts
    #[serde(default)]
    pub speak_time: bool,
    #[serde(default)]
    pub use_24h: bool,
    /// minutes of ringing before the alarm dismisses itself, 0 rings forever
    #[serde(default = "default_auto_dismiss")]
    pub auto_dismiss_minutes: u32,
    #[serde(default = "default_snooze")]
    pub snooze_minutes: u32,
    /// how often an alarm may be snoozed in a row, negative for no limit
    #[serde(default = "unlimited")]
    pub max_snooze: i32,
    /// when off, alarms that want a tag can be dismissed without one on
    /// devices that can't read tags
    #[serde(default)]
    pub require_nfc: bool,
    #[serde(default = "default_pulse")]
    pub vibration_pulse_ms: u64,
    #[serde(default = "always_true")]
    pub nfc_reader: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speak_time: false,
            use_24h: false,
            auto_dismiss_minutes: default_auto_dismiss(),
            snooze_minutes: default_snooze(),
            max_snooze: unlimited(),
            require_nfc: false,
            vibration_pulse_ms: default_pulse(),
            nfc_reader: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnoozeEntry {
    pub alarm_id: i64,
    pub count: u32,
}

/// Consecutive snoozes per alarm. Stored as a list since TOML keys are strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SnoozeEntry>", into = "Vec<SnoozeEntry>")]
pub struct SnoozeCounts {
    counts: BTreeMap<i64, u32>,
}

impl From<Vec<SnoozeEntry>> for SnoozeCounts {
    fn from(entries: Vec<SnoozeEntry>) -> Self {
        Self {
            counts: entries
                .into_iter()
                .map(|entry| (entry.alarm_id, entry.count))
                .collect(),
        }
    }
}

impl From<SnoozeCounts> for Vec<SnoozeEntry> {
    fn from(counts: SnoozeCounts) -> Self {
        counts
            .counts
            .into_iter()
            .map(|(alarm_id, count)| SnoozeEntry { alarm_id, count })
            .collect()
    }
}

impl SnoozeCounter for SnoozeCounts {
    fn snooze_count(&self, alarm_id: i64) -> u32 {
        self.counts.get(&alarm_id).copied().unwrap_or_default()
    }

    fn set_snooze_count(&mut self, alarm_id: i64, count: u32) {
        if count == 0 {
            self.counts.remove(&alarm_id);
        } else {
            self.counts.insert(alarm_id, count);
        }
    }
}

/// Everything that is kept on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub alarms: Vec<Alarm>,
    #[serde(default)]
    pub snoozes: SnoozeCounts,
    /// the alarm that was ringing when the daemon stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<AlarmRef>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// if the file can't be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let config = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&config)?)
    }

    /// a missing file gives the default config
    ///
    /// # Errors
    /// if the file exists but can't be read or parsed
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::warn!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// # Errors
    /// if the config directory or file can't be written
    pub fn save(&self, path: &Path) -> Result<()> {
        let config = toml::to_string(self)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, config)?;
        Ok(())
    }

    /// # Errors
    /// if the platform has no config directory
    pub fn config_path() -> Result<PathBuf> {
        let mut path = directories::ProjectDirs::from("", "", "wakeup_clock")
            .ok_or(Error::NoConfigDir)?
            .config_dir()
            .to_path_buf();
        path.push("config.toml");
        Ok(path)
    }

    /// # Errors
    /// if the platform has no data directory
    pub fn sounds_path() -> Result<PathBuf> {
        let mut path = directories::ProjectDirs::from("", "", "wakeup_clock")
            .ok_or(Error::NoConfigDir)?
            .data_dir()
            .to_path_buf();
        path.push("sounds");
        Ok(path)
    }

    #[must_use]
    pub fn is_config_present(path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alarm::AlarmBuilder,
        calendar::Day,
        scheduler::FireKind,
    };

    #[test]
    fn settings_default_when_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.settings, Settings::default());
        assert!(config.alarms.is_empty());
        assert!(config.active.is_none());
    }

    #[test]
    fn partial_settings_keep_other_defaults() {
        let config: Config = toml::from_str("[settings]\nmax_snooze = 3\n").unwrap();
        assert_eq!(config.settings.max_snooze, 3);
        assert_eq!(config.settings.auto_dismiss_minutes, 10);
    }

    #[test]
    fn snooze_counts_reset_to_zero_are_dropped() {
        let mut counts = SnoozeCounts::default();
        counts.set_snooze_count(7, 2);
        assert_eq!(counts.snooze_count(7), 2);
        counts.set_snooze_count(7, 0);
        assert_eq!(counts, SnoozeCounts::default());
        assert_eq!(counts.snooze_count(14), 0);
    }

    #[test]
    fn parses_a_hand_written_alarm() {
        let config: Config = toml::from_str(
            r#"
            [[alarms]]
            id = 7
            name = "work"
            time = 06:45:00
            days = 62
            use_nfc = true
            nfc_tag_id = "04A2FF"
            "#,
        )
        .unwrap();
        let alarm = &config.alarms[0];
        assert_eq!((alarm.hour(), alarm.minute()), (6, 45));
        assert!(alarm.days().contains(Day::Monday));
        assert!(!alarm.days().contains(Day::Sunday));
        assert!(alarm.repeat());
        assert!(alarm.enabled());
        assert_eq!(alarm.nfc_tag_id(), "04A2FF");
    }

    #[test]
    fn keeps_the_active_alarm() {
        let alarm = AlarmBuilder::new().id(0).time(6, 0).build().unwrap();
        let config = Config {
            active: Some(AlarmRef::new(&alarm, Day::Monday, FireKind::Snooze)),
            ..Config::default()
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.active, config.active);
    }
}
