//! Volume integrators for the feed tanks, product oil tanks and the
//! discharge pond, plus the run's mass-balance totals.

use super::feed::FeedPreset;
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedTankConfig {
    pub id: String,
    pub name: String,
    /// m³
    pub capacity: f64,
    pub volume: f64,
    pub preset: FeedPreset,
}

impl Default for FeedTankConfig {
    fn default() -> Self {
        Self {
            id: "TK-101".into(),
            name: "Refinery slop".into(),
            capacity: 60.0,
            volume: 55.0,
            preset: FeedPreset::RefinerySlop,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OilTankConfig {
    pub id: String,
    pub capacity: f64,
    /// %
    pub initial_level: f64,
    pub high: f64,
    pub high_high: f64,
}

impl Default for OilTankConfig {
    fn default() -> Self {
        Self {
            id: "TK-201".into(),
            capacity: 20.0,
            initial_level: 10.0,
            high: 85.0,
            high_high: 95.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TankConfig {
    pub feed_tanks: Vec<FeedTankConfig>,
    pub oil_tanks: Vec<OilTankConfig>,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            feed_tanks: vec![
                FeedTankConfig::default(),
                FeedTankConfig {
                    id: "TK-102".into(),
                    name: "Tank bottoms".into(),
                    capacity: 40.0,
                    volume: 30.0,
                    preset: FeedPreset::TankBottoms,
                },
            ],
            oil_tanks: vec![
                OilTankConfig::default(),
                OilTankConfig {
                    id: "TK-202".into(),
                    ..Default::default()
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PondConfig {
    pub capacity: f64,
    pub initial_volume: f64,
    /// m³/h
    pub evaporation: f64,
    /// 1/s, first-order loss of oil and turbidity
    pub settling_rate: f64,
}

impl Default for PondConfig {
    fn default() -> Self {
        Self {
            capacity: 5000.0,
            initial_volume: 1500.0,
            evaporation: 0.5,
            settling_rate: 2e-5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FeedTankStatus {
    Ready,
    Feeding,
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedTank {
    pub id: String,
    pub name: String,
    pub capacity: f64,
    pub volume: f64,
    pub preset: FeedPreset,
    pub status: FeedTankStatus,
}

impl FeedTank {
    pub fn new(config: &FeedTankConfig) -> Self {
        let capacity = config.capacity.max(EPS);
        let volume = config.volume.clamp(0.0, capacity);
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            capacity,
            volume,
            preset: config.preset,
            status: if volume > EPS { FeedTankStatus::Ready } else { FeedTankStatus::Empty },
        }
    }

    pub fn level(&self) -> f64 {
        (self.volume / self.capacity * 100.0).clamp(0.0, 100.0)
    }

    /// Withdraws up to `volume` m³ and returns what was actually taken.
    pub fn draw(&mut self, volume: f64) -> f64 {
        let taken = volume.clamp(0.0, self.volume);
        self.volume -= taken;
        if self.volume <= EPS {
            self.volume = 0.0;
            self.status = FeedTankStatus::Empty;
        }
        taken
    }

    pub fn mark_empty(&mut self) {
        self.volume = 0.0;
        self.status = FeedTankStatus::Empty;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OilTankStatus {
    Normal,
    High,
    HighHigh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OilTank {
    pub id: String,
    pub capacity: f64,
    pub volume: f64,
    pub high: f64,
    pub high_high: f64,
    pub status: OilTankStatus,
}

impl OilTank {
    pub fn new(config: &OilTankConfig) -> Self {
        let capacity = config.capacity.max(EPS);
        let mut tank = Self {
            id: config.id.clone(),
            capacity,
            volume: capacity * config.initial_level.clamp(0.0, 100.0) / 100.0,
            high: config.high,
            high_high: config.high_high.max(config.high),
            status: OilTankStatus::Normal,
        };
        tank.update_status();
        tank
    }

    pub fn level(&self) -> f64 {
        (self.volume / self.capacity * 100.0).clamp(0.0, 100.0)
    }

    fn update_status(&mut self) {
        let level = self.level();
        self.status = if level >= self.high_high {
            OilTankStatus::HighHigh
        } else if level >= self.high {
            OilTankStatus::High
        } else {
            OilTankStatus::Normal
        };
    }

    /// Adds product; returns `true` only on the tick the level crosses high-high.
    pub fn fill(&mut self, volume: f64) -> bool {
        let was_tripped = self.level() >= self.high_high;
        self.volume = (self.volume + volume.max(0.0)).clamp(0.0, self.capacity);
        self.update_status();
        !was_tripped && self.status == OilTankStatus::HighHigh
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pond {
    pub capacity: f64,
    pub volume: f64,
    /// ppm
    pub oiw: f64,
    /// NTU
    pub turbidity: f64,
    pub trh: f64,
    pub cod: f64,
    pub total_inflow: f64,
    /// m³ of inflow turned away because the pond was full
    pub overflow: f64,
    pub overflowing: bool,
    #[serde(skip)]
    config: PondConfig,
}

/// Water quality of a stream entering the pond.
#[derive(Debug, Clone, Copy, Default)]
pub struct PondInflow {
    /// m³/h
    pub flow: f64,
    pub oiw: f64,
    pub turbidity: f64,
    pub trh: f64,
    pub cod: f64,
}

impl Pond {
    pub fn new(config: &PondConfig) -> Self {
        let capacity = config.capacity.max(EPS);
        Self {
            capacity,
            volume: config.initial_volume.clamp(0.0, capacity),
            oiw: 0.0,
            turbidity: 0.0,
            trh: 0.0,
            cod: 0.0,
            total_inflow: 0.0,
            overflow: 0.0,
            overflowing: false,
            config: config.clone(),
        }
    }

    pub fn level(&self) -> f64 {
        (self.volume / self.capacity * 100.0).clamp(0.0, 100.0)
    }

    /// Receives one tick of inflow; returns `true` only on the tick the pond
    /// starts turning water away.
    pub fn tick(&mut self, dt: f64, inflow: &PondInflow) -> bool {
        let dt = dt.max(0.0);
        let offered = inflow.flow.max(0.0) * dt / 3600.0;
        let added = offered.min(self.capacity - self.volume).max(0.0);
        let spilled = offered - added;
        let was_overflowing = self.overflowing;
        self.overflowing = spilled > EPS;
        self.overflow += spilled.max(0.0);
        let total = self.volume + added;
        if total > EPS {
            let existing = self.volume;
            let blend = |current: f64, incoming: f64| (current * existing + incoming.max(0.0) * added) / total;
            self.oiw = blend(self.oiw, inflow.oiw);
            self.turbidity = blend(self.turbidity, inflow.turbidity);
            self.trh = blend(self.trh, inflow.trh);
            self.cod = blend(self.cod, inflow.cod);
        }
        self.volume = total;
        self.total_inflow += added;

        self.volume = (self.volume - self.config.evaporation.max(0.0) * dt / 3600.0).clamp(0.0, self.capacity);
        let settle = (-self.config.settling_rate.max(0.0) * dt).exp();
        self.oiw *= settle;
        self.turbidity *= settle;
        self.trh *= settle;
        self.overflowing && !was_overflowing
    }
}

/// Cumulative volumes for the current run, m³.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MassBalance {
    pub feed_in: f64,
    pub water_out: f64,
    pub oil_out: f64,
    pub solids_out: f64,
}

impl MassBalance {
    pub fn record(&mut self, feed: f64, water: f64, oil: f64, solids: f64) {
        self.feed_in += feed.max(0.0);
        self.water_out += water.max(0.0);
        self.oil_out += oil.max(0.0);
        self.solids_out += solids.max(0.0);
    }

    /// Outputs over input, %. A run with no feed yet reads 100.
    pub fn closure(&self) -> f64 {
        if self.feed_in <= EPS {
            return 100.0;
        }
        (self.water_out + self.oil_out + self.solids_out) / self.feed_in * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn feed_tank_draw_clips_to_volume() {
        let mut tank = FeedTank::new(&FeedTankConfig {
            volume: 1.0,
            ..Default::default()
        });
        assert_relative_eq!(tank.draw(0.4), 0.4);
        assert_relative_eq!(tank.draw(5.0), 0.6);
        assert_eq!(tank.status, FeedTankStatus::Empty);
    }

    #[test]
    fn oil_tank_trips_once_on_high_high() {
        let mut tank = OilTank::new(&OilTankConfig {
            initial_level: 94.9,
            ..Default::default()
        });
        assert!(tank.fill(0.05));
        assert_eq!(tank.status, OilTankStatus::HighHigh);
        assert!(!tank.fill(0.05));
        assert!(tank.level() <= 100.0);
    }

    #[test]
    fn pond_blends_by_volume() {
        let mut pond = Pond::new(&PondConfig {
            initial_volume: 100.0,
            evaporation: 0.0,
            settling_rate: 0.0,
            ..Default::default()
        });
        pond.tick(3600.0, &PondInflow { flow: 100.0, oiw: 20.0, ..Default::default() });
        assert_relative_eq!(pond.volume, 200.0);
        assert_relative_eq!(pond.oiw, 10.0);
    }

    #[test]
    fn pond_settles_and_evaporates() {
        let mut pond = Pond::new(&PondConfig::default());
        pond.oiw = 10.0;
        pond.tick(3600.0, &PondInflow::default());
        assert!(pond.oiw < 10.0);
        assert_relative_eq!(pond.volume, 1499.5);
    }

    #[test]
    fn full_pond_counts_overflow_once_per_episode() {
        let config = PondConfig {
            capacity: 100.0,
            initial_volume: 99.5,
            evaporation: 0.0,
            ..Default::default()
        };
        let mut pond = Pond::new(&config);
        let inflow = PondInflow { flow: 3600.0, ..Default::default() };

        assert!(pond.tick(1.0, &inflow));
        assert_relative_eq!(pond.volume, 100.0);
        assert_relative_eq!(pond.overflow, 0.5, epsilon = 1e-9);
        assert!(!pond.tick(1.0, &inflow));
        assert_relative_eq!(pond.overflow, 1.5, epsilon = 1e-9);

        assert!(!pond.tick(1.0, &PondInflow::default()));
        assert!(!pond.overflowing);
        assert!(pond.tick(1.0, &inflow));
    }

    #[test]
    fn closure_is_outputs_over_feed() {
        let mut balance = MassBalance::default();
        assert_eq!(balance.closure(), 100.0);
        balance.record(10.0, 7.5, 2.0, 0.4);
        assert_relative_eq!(balance.closure(), 99.0);
    }
}
