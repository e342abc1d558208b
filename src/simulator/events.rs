use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const EVENT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Start,
    Phase,
    Complete,
    Interlock,
    Alarm,
    Aqc,
    Reset,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub sim_time: f64,
    pub kind: EventKind,
    pub description: String,
}

impl Event {
    pub fn new(sim_time: f64, kind: EventKind, description: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            sim_time,
            kind,
            description: description.into(),
        }
    }
}

/// Bounded history; the oldest entries are dropped first.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: VecDeque<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        if self.entries.len() == EVENT_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_keeps_most_recent() {
        let mut log = EventLog::new();
        for i in 0..(EVENT_LOG_CAPACITY + 20) {
            log.push(Event::new(i as f64, EventKind::Note, format!("event {i}")));
        }
        assert_eq!(log.iter().count(), EVENT_LOG_CAPACITY);
        assert_eq!(log.iter().next().map(|e| e.sim_time), Some(20.0));
    }

    #[test]
    fn kinds_serialize_upper_case() {
        let json = serde_json::to_string(&EventKind::Interlock).unwrap_or_default();
        assert_eq!(json, "\"INTERLOCK\"");
    }
}
