use super::events::{Event, EventKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    HighTemperature,
    HighVibration,
    LowOilEfficiency,
    LowSolidsEfficiency,
    HighDischargeOiw,
    HighFilterDp,
    OilTankHigh,
    LowChemicalInventory,
    HighFoam,
}

impl AlarmKind {
    pub fn label(self) -> &'static str {
        match self {
            AlarmKind::HighTemperature => "High feed temperature",
            AlarmKind::HighVibration => "High bowl vibration",
            AlarmKind::LowOilEfficiency => "Low oil separation efficiency",
            AlarmKind::LowSolidsEfficiency => "Low solids separation efficiency",
            AlarmKind::HighDischargeOiw => "High discharge OiW",
            AlarmKind::HighFilterDp => "High filter differential pressure",
            AlarmKind::OilTankHigh => "Oil tank level high",
            AlarmKind::LowChemicalInventory => "Low chemical inventory",
            AlarmKind::HighFoam => "High foam level",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRule {
    pub kind: AlarmKind,
    pub comparison: Comparison,
    pub limit: f64,
    /// Added beyond the limit in the alarming direction
    pub margin: f64,
    pub severity: Severity,
    #[serde(default)]
    pub only_while_running: bool,
}

impl AlarmRule {
    fn new(kind: AlarmKind, comparison: Comparison, limit: f64, margin: f64, severity: Severity) -> Self {
        Self {
            kind,
            comparison,
            limit,
            margin,
            severity,
            only_while_running: false,
        }
    }

    fn while_running(mut self) -> Self {
        self.only_while_running = true;
        self
    }

    pub fn threshold(&self) -> f64 {
        match self.comparison {
            Comparison::Above => self.limit + self.margin.abs(),
            Comparison::Below => self.limit - self.margin.abs(),
        }
    }

    pub fn is_violated(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self.comparison {
            Comparison::Above => value > self.threshold(),
            Comparison::Below => value < self.threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// s a condition must hold before it becomes active
    pub delay: f64,
    pub rules: Vec<AlarmRule>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        use AlarmKind::*;
        use Comparison::*;
        Self {
            delay: 3.0,
            rules: vec![
                AlarmRule::new(HighTemperature, Above, 90.0, 1.0, Severity::Critical),
                AlarmRule::new(HighVibration, Above, 7.1, 0.2, Severity::Critical),
                AlarmRule::new(LowOilEfficiency, Below, 95.0, 0.5, Severity::Warning).while_running(),
                AlarmRule::new(LowSolidsEfficiency, Below, 90.0, 0.5, Severity::Warning).while_running(),
                AlarmRule::new(HighDischargeOiw, Above, 30.0, 1.0, Severity::Critical),
                AlarmRule::new(HighFilterDp, Above, 1.0, 0.02, Severity::Warning),
                AlarmRule::new(OilTankHigh, Above, 85.0, 0.5, Severity::Warning),
                AlarmRule::new(LowChemicalInventory, Below, 10.0, 0.5, Severity::Warning),
                AlarmRule::new(HighFoam, Above, 25.0, 1.0, Severity::Warning),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub kind: AlarmKind,
    pub severity: Severity,
    pub value: f64,
    pub limit: f64,
    /// Sim time the condition was first seen
    pub since: f64,
    /// Sim time the alarm was promoted; `None` while still pending
    pub confirmed_at: Option<f64>,
}

/// Delay-confirmed condition monitor.
///
/// Conditions must hold for `delay` seconds before they alarm, but clear
/// the moment they stop holding.
#[derive(Debug, Clone)]
pub struct AlarmManager {
    config: AlarmConfig,
    slots: Vec<Option<Alarm>>,
}

impl AlarmManager {
    pub fn new(config: AlarmConfig) -> Self {
        let slots = vec![None; config.rules.len()];
        Self { config, slots }
    }

    pub fn active(&self) -> Vec<Alarm> {
        self.slots.iter().flatten().filter(|a| a.confirmed_at.is_some()).cloned().collect()
    }

    pub fn pending(&self) -> Vec<Alarm> {
        self.slots.iter().flatten().filter(|a| a.confirmed_at.is_none()).cloned().collect()
    }

    /// `reading` returns the current value for a rule, or `None` when the
    /// rule does not apply this tick.
    pub fn evaluate<F>(&mut self, sim_time: f64, running: bool, reading: F) -> Vec<Event>
    where
        F: Fn(AlarmKind) -> Option<f64>,
    {
        let delay = self.config.delay.max(0.0);
        let mut events = Vec::new();

        for (rule, slot) in self.config.rules.iter().zip(self.slots.iter_mut()) {
            let value = if rule.only_while_running && !running {
                None
            } else {
                reading(rule.kind)
            };

            match value.filter(|v| rule.is_violated(*v)) {
                Some(value) => {
                    let alarm = slot.get_or_insert_with(|| Alarm {
                        kind: rule.kind,
                        severity: rule.severity,
                        value,
                        limit: rule.limit,
                        since: sim_time,
                        confirmed_at: None,
                    });
                    alarm.value = value;
                    if alarm.confirmed_at.is_none() && sim_time - alarm.since >= delay {
                        alarm.confirmed_at = Some(sim_time);
                        tracing::warn!("alarm {:?}: {:.2} vs limit {:.2}", rule.kind, value, rule.limit);
                        events.push(Event::new(
                            sim_time,
                            EventKind::Alarm,
                            format!("{}: {:.2} (limit {:.2})", rule.kind.label(), value, rule.limit),
                        ));
                    }
                }
                None => {
                    if let Some(alarm) = slot.take() {
                        if alarm.confirmed_at.is_some() {
                            tracing::info!("alarm {:?} cleared", rule.kind);
                            events.push(Event::new(
                                sim_time,
                                EventKind::Note,
                                format!("{} cleared", rule.kind.label()),
                            ));
                        }
                    }
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temperature(value: f64) -> impl Fn(AlarmKind) -> Option<f64> {
        move |kind| (kind == AlarmKind::HighTemperature).then_some(value)
    }

    #[test]
    fn promotes_only_after_delay() {
        let mut alarms = AlarmManager::new(AlarmConfig::default());
        let mut events = Vec::new();
        let mut t = 0.0;
        while t < 2.9 {
            events.extend(alarms.evaluate(t, true, temperature(93.0)));
            t += 0.1;
        }
        assert!(events.is_empty());
        assert_eq!(alarms.pending().len(), 1);

        events.extend(alarms.evaluate(3.0, true, temperature(93.0)));
        events.extend(alarms.evaluate(3.1, true, temperature(93.0)));
        assert_eq!(events.iter().filter(|e| e.kind == EventKind::Alarm).count(), 1);
        assert!(alarms.active().iter().any(|a| a.kind == AlarmKind::HighTemperature));
    }

    #[test]
    fn clears_immediately() {
        let mut alarms = AlarmManager::new(AlarmConfig::default());
        alarms.evaluate(0.0, true, temperature(93.0));
        alarms.evaluate(5.0, true, temperature(93.0));
        let events = alarms.evaluate(5.1, true, temperature(85.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Note);
        assert!(alarms.active().is_empty());
    }

    #[test]
    fn margin_suppresses_chatter_at_limit() {
        let mut alarms = AlarmManager::new(AlarmConfig::default());
        alarms.evaluate(0.0, true, temperature(90.5));
        alarms.evaluate(10.0, true, temperature(90.5));
        assert!(alarms.active().is_empty());
        assert!(alarms.pending().is_empty());
    }

    #[test]
    fn interrupted_condition_restarts_delay() {
        let mut alarms = AlarmManager::new(AlarmConfig::default());
        alarms.evaluate(0.0, true, temperature(93.0));
        alarms.evaluate(2.0, true, temperature(80.0));
        alarms.evaluate(2.5, true, temperature(93.0));
        alarms.evaluate(4.0, true, temperature(93.0));
        assert!(alarms.active().is_empty());
        alarms.evaluate(5.5, true, temperature(93.0));
        assert!(alarms.active().iter().any(|a| a.kind == AlarmKind::HighTemperature));
    }

    #[test]
    fn running_only_rules_hold_off_when_stopped() {
        let mut alarms = AlarmManager::new(AlarmConfig::default());
        let efficiency = |kind| (kind == AlarmKind::LowOilEfficiency).then_some(0.0);
        alarms.evaluate(0.0, false, efficiency);
        alarms.evaluate(10.0, false, efficiency);
        assert!(alarms.active().is_empty());
    }
}
