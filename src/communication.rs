//! Messages passed between the alarm book, the scheduler, persistence and the
//! daemon loop.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::alarm::Alarm;

/// A change to the set of alarms. Every subscriber gets its own copy.
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmEvent {
    Added(Alarm),
    Changed(AlarmChange),
    // carries the whole alarm so timers can still be derived from it
    Removed(Alarm),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmChange {
    pub alarm: Alarm,
    /// false when only fields like the name, volume or vibration changed
    pub timing_changed: bool,
    /// the alarm went from disabled to enabled
    pub re_enabled: bool,
}

impl AlarmEvent {
    #[must_use]
    pub const fn alarm(&self) -> &Alarm {
        match self {
            Self::Added(alarm)
            | Self::Removed(alarm)
            | Self::Changed(AlarmChange { alarm, .. }) => alarm,
        }
    }
}

/// Observer list for alarm mutations.
///
/// Subscribers whose receiving end has been dropped are forgotten on the next
/// publish.
#[derive(Debug, Default)]
pub struct AlarmEvents {
    subscribers: Vec<Sender<AlarmEvent>>,
}

impl AlarmEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<AlarmEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.push(sender);
        receiver
    }

    pub fn publish(&mut self, event: &AlarmEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Something the user asked the ringing alarm to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Snooze,
    Dismiss,
    /// a tag was scanned, carries the parsed tag id
    Scan(String),
    Pause,
    Resume,
    Reload,
    Quit,
}

impl UserAction {
    /// parses a line typed into the daemon
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let action = match words.next()?.to_lowercase().as_str() {
            "snooze" | "s" => Self::Snooze,
            "dismiss" | "d" | "stop" => Self::Dismiss,
            "scan" => Self::Scan(words.next()?.to_string()),
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "reload" => Self::Reload,
            "quit" | "q" | "exit" => Self::Quit,
            _ => return None,
        };
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmBuilder;

    #[test]
    fn every_subscriber_gets_each_event() {
        let mut events = AlarmEvents::new();
        let persistence = events.subscribe();
        let scheduler = events.subscribe();
        let alarm = AlarmBuilder::new().id(0).time(6, 0).build().unwrap();
        events.publish(&AlarmEvent::Added(alarm.clone()));
        assert_eq!(persistence.try_recv(), Ok(AlarmEvent::Added(alarm.clone())));
        assert_eq!(scheduler.try_recv(), Ok(AlarmEvent::Added(alarm)));
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let mut events = AlarmEvents::new();
        let kept = events.subscribe();
        drop(events.subscribe());
        let alarm = AlarmBuilder::new().id(0).time(6, 0).build().unwrap();
        events.publish(&AlarmEvent::Removed(alarm));
        assert_eq!(events.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn parses_user_actions() {
        assert_eq!(UserAction::parse("snooze"), Some(UserAction::Snooze));
        assert_eq!(
            UserAction::parse("scan 04A2B3"),
            Some(UserAction::Scan("04A2B3".to_string()))
        );
        assert_eq!(UserAction::parse("scan"), None);
        assert_eq!(UserAction::parse("   "), None);
        assert_eq!(UserAction::parse("dance"), None);
    }
}
