#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! Alarm scheduling and wake-up engine.
//!
//! Alarms ([`alarm::Alarm`]) repeat on a set of weekdays. The [`scheduler`]
//! turns them into one wake timer per upcoming day using the [`calendar`]
//! arithmetic, and once a timer fires a [`wakeup::WakeUp`] rings the alarm
//! until it is snoozed, dismissed (possibly behind an [`nfc`] tag) or times out.

pub mod alarm;
pub mod book;
pub mod calendar;
pub mod communication;
pub mod config;
pub mod devices;
pub mod error;
pub mod nfc;
pub mod scheduler;
pub mod tasks;
pub mod wakeup;

pub use error::{Error, Result};
