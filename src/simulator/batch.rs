//! Debounced batch phase sequencer.

use serde::{Deserialize, Serialize};

/// s a newly detected phase must persist before it is committed
pub const PHASE_DEBOUNCE: f64 = 10.0;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPhase {
    pub name: String,
    /// m³ processed in this phase
    pub volume: f64,
    pub temperature: f64,
    pub flow: f64,
    pub bowl_speed: f64,
    pub water_fraction: f64,
    pub oil_fraction: f64,
    pub solids_fraction: f64,
}

impl BatchPhase {
    #[allow(clippy::too_many_arguments)]
    fn new(name: &str, volume: f64, temperature: f64, flow: f64, bowl_speed: f64, w: f64, o: f64, s: f64) -> Self {
        Self {
            name: name.to_string(),
            volume,
            temperature,
            flow,
            bowl_speed,
            water_fraction: w,
            oil_fraction: o,
            solids_fraction: s,
        }
    }
}

pub fn default_recipe() -> Vec<BatchPhase> {
    vec![
        BatchPhase::new("Sludge & water draw", 8.0, 70.0, 10.0, 4000.0, 0.80, 0.08, 0.12),
        BatchPhase::new("Bulk emulsion", 35.0, 65.0, 12.0, 3500.0, 0.76, 0.20, 0.04),
        BatchPhase::new("Oil-rich top", 12.0, 75.0, 9.0, 4200.0, 0.55, 0.43, 0.02),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerStep {
    Hold,
    Committed(usize),
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSequencer {
    pub recipe: Vec<BatchPhase>,
    pub current: usize,
    /// (detected phase, sim time it was first detected)
    pub pending: Option<(usize, f64)>,
    pub batch_volume: f64,
    pub processed: f64,
    pub active: bool,
    /// Cumulative phase end volumes scaled to the batch
    boundaries: Vec<f64>,
}

impl BatchSequencer {
    pub fn new(recipe: Vec<BatchPhase>) -> Self {
        Self {
            recipe,
            current: 0,
            pending: None,
            batch_volume: 0.0,
            processed: 0.0,
            active: false,
            boundaries: Vec::new(),
        }
    }

    /// Arms the sequencer for a batch of `volume` m³. Recipe boundaries are
    /// stretched so every phase runs whatever the tank holds.
    pub fn start(&mut self, volume: f64) -> Option<&BatchPhase> {
        self.batch_volume = volume.max(0.0);
        self.processed = 0.0;
        self.current = 0;
        self.pending = None;
        self.active = true;

        let recipe_total: f64 = self.recipe.iter().map(|p| p.volume.max(0.0)).sum();
        let scale = if recipe_total > EPS { self.batch_volume / recipe_total } else { 0.0 };
        let mut cumulative = 0.0;
        self.boundaries = self
            .recipe
            .iter()
            .map(|p| {
                cumulative += p.volume.max(0.0) * scale;
                cumulative
            })
            .collect();
        self.recipe.first()
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.pending = None;
    }

    pub fn remaining(&self) -> f64 {
        (self.batch_volume - self.processed).max(0.0)
    }

    pub fn phase(&self) -> Option<&BatchPhase> {
        self.recipe.get(self.current)
    }

    /// Phase index the processed volume currently falls in; past the last
    /// boundary the last phase stays detected.
    pub fn detect(&self, processed: f64) -> usize {
        self.boundaries
            .iter()
            .position(|&end| processed < end)
            .unwrap_or_else(|| self.recipe.len().saturating_sub(1))
    }

    /// Debounce step. Returns the phase index when a transition commits.
    pub fn observe(&mut self, detected: usize, sim_time: f64) -> Option<usize> {
        if detected == self.current {
            self.pending = None;
            return None;
        }
        match self.pending {
            Some((index, since)) if index == detected => {
                if sim_time - since >= PHASE_DEBOUNCE {
                    self.current = detected;
                    self.pending = None;
                    Some(detected)
                } else {
                    None
                }
            }
            _ => {
                self.pending = Some((detected, sim_time));
                None
            }
        }
    }

    pub fn update(&mut self, sim_time: f64, processed: f64) -> SequencerStep {
        if !self.active {
            return SequencerStep::Hold;
        }
        self.processed = processed.max(0.0);
        if self.batch_volume - self.processed <= EPS {
            self.active = false;
            self.pending = None;
            return SequencerStep::Complete;
        }
        let detected = self.detect(self.processed);
        match self.observe(detected, sim_time) {
            Some(index) => SequencerStep::Committed(index),
            None => SequencerStep::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed() -> BatchSequencer {
        let mut seq = BatchSequencer::new(default_recipe());
        seq.start(55.0);
        seq
    }

    #[test]
    fn detection_follows_cumulative_boundaries() {
        let seq = armed();
        assert_eq!(seq.detect(0.0), 0);
        assert_eq!(seq.detect(7.99), 0);
        assert_eq!(seq.detect(8.0), 1);
        assert_eq!(seq.detect(42.9), 1);
        assert_eq!(seq.detect(43.0), 2);
        assert_eq!(seq.detect(1000.0), 2);
    }

    #[test]
    fn reverting_within_debounce_cancels() {
        let mut seq = armed();
        let mut t = 0.0;
        while t < 9.9 {
            assert_eq!(seq.observe(1, t), None);
            t += 0.1;
        }
        assert_eq!(seq.observe(0, t), None);
        assert_eq!(seq.pending, None);
        assert_eq!(seq.current, 0);
    }

    #[test]
    fn holding_commits_exactly_once() {
        let mut seq = armed();
        let mut commits = 0;
        for i in 0..=200 {
            if seq.observe(1, i as f64 * 0.1).is_some() {
                commits += 1;
            }
        }
        assert_eq!(commits, 1);
        assert_eq!(seq.current, 1);
    }

    #[test]
    fn smaller_tank_still_runs_every_phase() {
        let mut seq = BatchSequencer::new(default_recipe());
        seq.start(27.5);
        assert_eq!(seq.detect(4.1), 1);
        assert_eq!(seq.detect(21.6), 2);
    }

    #[test]
    fn completes_when_volume_is_processed() {
        let mut seq = armed();
        assert_eq!(seq.update(0.0, 10.0), SequencerStep::Hold);
        assert_eq!(seq.update(1.0, 55.0), SequencerStep::Complete);
        assert!(!seq.active);
        assert_eq!(seq.update(2.0, 55.0), SequencerStep::Hold);
    }
}
