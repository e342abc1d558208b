//! Chemical dosing: seven dosers plus the cross-chemical process state
//! they produce for the next physics tick.

pub mod kinetics;

use self::kinetics::ChemistryParams;
use super::feed::{EquipmentSpec, FeedProperties};
use super::physics::ProcessState;
use super::pid::{Action, Gains, Pid};
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-9;
const ACID_MG_PER_MMOL: f64 = 49.0;
const CAUSTIC_MG_PER_MMOL: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChemicalKind {
    Demulsifier,
    Flocculant,
    Coagulant,
    Acid,
    Caustic,
    ScaleInhibitor,
    Antifoam,
}

impl ChemicalKind {
    pub const ALL: [ChemicalKind; 7] = [
        ChemicalKind::Demulsifier,
        ChemicalKind::Flocculant,
        ChemicalKind::Coagulant,
        ChemicalKind::Acid,
        ChemicalKind::Caustic,
        ChemicalKind::ScaleInhibitor,
        ChemicalKind::Antifoam,
    ];

    pub fn index(self) -> usize {
        match self {
            ChemicalKind::Demulsifier => 0,
            ChemicalKind::Flocculant => 1,
            ChemicalKind::Coagulant => 2,
            ChemicalKind::Acid => 3,
            ChemicalKind::Caustic => 4,
            ChemicalKind::ScaleInhibitor => 5,
            ChemicalKind::Antifoam => 6,
        }
    }

    pub fn supported_modes(self) -> &'static [DosingMode] {
        use DosingMode::*;
        match self {
            ChemicalKind::Demulsifier => &[Manual, Ratio, Feedback, Cascade, Adaptive],
            ChemicalKind::Flocculant | ChemicalKind::Coagulant => &[Manual, Ratio, Feedback],
            ChemicalKind::Acid | ChemicalKind::Caustic => &[Feedback],
            ChemicalKind::ScaleInhibitor => &[Ratio, Adaptive],
            ChemicalKind::Antifoam => &[Manual, Feedback],
        }
    }

    fn feedback_action(self) -> Action {
        match self {
            ChemicalKind::Caustic => Action::Direct,
            _ => Action::Reverse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DosingMode {
    Manual,
    Ratio,
    Feedback,
    Cascade,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    Ppm,
    MlPerM3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChemicalConfig {
    pub name: String,
    pub enabled: bool,
    pub mode: DosingMode,
    /// Manual dose; also the base dose for adaptive mode
    pub dose: f64,
    pub ratio: f64,
    pub setpoint: f64,
    /// Filtered OiW target for cascade mode, ppm
    pub cascade_setpoint: f64,
    pub max_dose: f64,
    pub unit: DoseUnit,
    /// Active fraction of the neat product
    pub concentration: f64,
    /// kg/L
    pub density: f64,
    /// L/h
    pub pump_capacity: f64,
    /// L
    pub inventory_capacity: f64,
    pub initial_inventory: f64,
    /// $/L
    pub cost_per_litre: f64,
    pub gains: Gains,
    /// Outer filtered-OiW loop of cascade mode
    pub cascade_gains: Gains,
}

impl Default for ChemicalConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: false,
            mode: DosingMode::Manual,
            dose: 0.0,
            ratio: 0.0,
            setpoint: 0.0,
            cascade_setpoint: 15.0,
            max_dose: 100.0,
            unit: DoseUnit::Ppm,
            concentration: 1.0,
            density: 1.0,
            pump_capacity: 10.0,
            inventory_capacity: 1000.0,
            initial_inventory: 800.0,
            cost_per_litre: 1.0,
            gains: Gains::new(1.0, 0.05, 0.0),
            cascade_gains: Gains::new(2.0, 0.05, 0.0),
        }
    }
}

/// One entry per chemical; lookups are exhaustive matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChemicalTable {
    pub demulsifier: ChemicalConfig,
    pub flocculant: ChemicalConfig,
    pub coagulant: ChemicalConfig,
    pub acid: ChemicalConfig,
    pub caustic: ChemicalConfig,
    pub scale_inhibitor: ChemicalConfig,
    pub antifoam: ChemicalConfig,
}

impl ChemicalTable {
    pub fn get(&self, kind: ChemicalKind) -> &ChemicalConfig {
        match kind {
            ChemicalKind::Demulsifier => &self.demulsifier,
            ChemicalKind::Flocculant => &self.flocculant,
            ChemicalKind::Coagulant => &self.coagulant,
            ChemicalKind::Acid => &self.acid,
            ChemicalKind::Caustic => &self.caustic,
            ChemicalKind::ScaleInhibitor => &self.scale_inhibitor,
            ChemicalKind::Antifoam => &self.antifoam,
        }
    }
}

impl Default for ChemicalTable {
    fn default() -> Self {
        Self {
            demulsifier: ChemicalConfig {
                name: "Demulsifier".into(),
                enabled: true,
                mode: DosingMode::Manual,
                dose: 50.0,
                ratio: 2.5,
                setpoint: 500.0,
                max_dose: 250.0,
                concentration: 0.6,
                density: 0.95,
                pump_capacity: 20.0,
                cost_per_litre: 4.5,
                gains: Gains::new(0.05, 0.002, 0.0),
                ..Default::default()
            },
            flocculant: ChemicalConfig {
                name: "Flocculant".into(),
                dose: 5.0,
                ratio: 1.0,
                setpoint: 80.0,
                max_dose: 30.0,
                concentration: 0.005,
                pump_capacity: 40.0,
                inventory_capacity: 2000.0,
                initial_inventory: 1500.0,
                cost_per_litre: 0.8,
                gains: Gains::new(0.5, 0.01, 0.0),
                ..Default::default()
            },
            coagulant: ChemicalConfig {
                name: "Coagulant".into(),
                dose: 20.0,
                ratio: 4.0,
                setpoint: 5.0,
                concentration: 0.4,
                density: 1.3,
                cost_per_litre: 1.2,
                ..Default::default()
            },
            acid: ChemicalConfig {
                name: "Sulphuric acid".into(),
                enabled: true,
                mode: DosingMode::Feedback,
                max_dose: 500.0,
                concentration: 0.98,
                density: 1.84,
                pump_capacity: 5.0,
                inventory_capacity: 500.0,
                initial_inventory: 400.0,
                cost_per_litre: 0.9,
                gains: Gains::new(5.0, 0.1, 0.0),
                ..Default::default()
            },
            caustic: ChemicalConfig {
                name: "Caustic soda".into(),
                enabled: true,
                mode: DosingMode::Feedback,
                max_dose: 500.0,
                concentration: 0.5,
                density: 1.52,
                cost_per_litre: 0.7,
                gains: Gains::new(5.0, 0.1, 0.0),
                ..Default::default()
            },
            scale_inhibitor: ChemicalConfig {
                name: "Scale inhibitor".into(),
                enabled: true,
                mode: DosingMode::Ratio,
                dose: 5.0,
                ratio: 1.5,
                max_dose: 30.0,
                concentration: 0.3,
                density: 1.1,
                pump_capacity: 2.0,
                inventory_capacity: 200.0,
                initial_inventory: 150.0,
                cost_per_litre: 6.0,
                ..Default::default()
            },
            antifoam: ChemicalConfig {
                name: "Antifoam".into(),
                enabled: true,
                mode: DosingMode::Manual,
                dose: 10.0,
                setpoint: 5.0,
                max_dose: 50.0,
                unit: DoseUnit::MlPerM3,
                pump_capacity: 2.0,
                inventory_capacity: 200.0,
                initial_inventory: 150.0,
                cost_per_litre: 9.0,
                gains: Gains::new(2.0, 0.05, 0.0),
                ..Default::default()
            },
        }
    }
}

/// Chemical-specific quantities; each model fills the fields it owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChemicalDerived {
    pub effectiveness: f64,
    pub surface_coverage: f64,
    pub floc_size_multiplier: f64,
    pub zeta_potential: f64,
    pub lsi: f64,
    pub scaling_risk: f64,
    pub foam_level: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChemicalDoser {
    pub kind: ChemicalKind,
    pub name: String,
    pub enabled: bool,
    pub mode: DosingMode,
    pub manual_dose: f64,
    pub ratio: f64,
    pub setpoint: f64,
    pub cascade_setpoint: f64,
    /// Multiplier on the requested dose, raised by AQC
    pub trim: f64,
    pub target_dose: f64,
    pub actual_dose: f64,
    /// L/h
    pub pump_rate: f64,
    /// L
    pub inventory: f64,
    pub inventory_capacity: f64,
    pub used: f64,
    pub cost: f64,
    pub pid: Pid,
    pub cascade_pid: Pid,
    pub derived: ChemicalDerived,
    #[serde(skip)]
    config: ChemicalConfig,
    #[serde(skip)]
    empty_warned: bool,
}

impl ChemicalDoser {
    pub fn new(kind: ChemicalKind, config: &ChemicalConfig) -> Self {
        let mode = if kind.supported_modes().contains(&config.mode) {
            config.mode
        } else {
            kind.supported_modes()[0]
        };
        Self {
            kind,
            name: config.name.clone(),
            enabled: config.enabled,
            mode,
            manual_dose: config.dose.max(0.0),
            ratio: config.ratio.max(0.0),
            setpoint: config.setpoint,
            cascade_setpoint: config.cascade_setpoint,
            trim: 1.0,
            target_dose: 0.0,
            actual_dose: 0.0,
            pump_rate: 0.0,
            inventory: config.initial_inventory.clamp(0.0, config.inventory_capacity.max(0.0)),
            inventory_capacity: config.inventory_capacity.max(EPS),
            used: 0.0,
            cost: 0.0,
            pid: Pid::new(config.gains, kind.feedback_action()),
            cascade_pid: Pid::new(config.cascade_gains, Action::Reverse),
            derived: ChemicalDerived::default(),
            config: config.clone(),
            empty_warned: false,
        }
    }

    pub fn max_dose(&self) -> f64 {
        self.config.max_dose.max(0.0)
    }

    pub fn inventory_percent(&self) -> f64 {
        (self.inventory / self.inventory_capacity * 100.0).clamp(0.0, 100.0)
    }

    /// Unsupported modes are ignored and reported as `false`.
    pub fn set_mode(&mut self, mode: DosingMode) -> bool {
        if !self.kind.supported_modes().contains(&mode) {
            tracing::warn!("{:?} does not support {:?} dosing", self.kind, mode);
            return false;
        }
        self.mode = mode;
        true
    }

    pub fn set_manual_dose(&mut self, dose: f64) {
        if dose.is_finite() {
            self.manual_dose = dose.clamp(0.0, self.max_dose());
        }
    }

    pub fn set_ratio(&mut self, ratio: f64) {
        if ratio.is_finite() {
            self.ratio = ratio.max(0.0);
        }
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        if setpoint.is_finite() {
            self.setpoint = setpoint.max(0.0);
        }
    }

    /// Litres per hour per unit of dose at 1 m³/h.
    fn litres_per_dose(&self) -> f64 {
        match self.config.unit {
            DoseUnit::Ppm => 1.0 / (self.config.concentration.max(EPS) * self.config.density.max(EPS) * 1000.0),
            DoseUnit::MlPerM3 => 1.0 / (1000.0 * self.config.concentration.max(EPS)),
        }
    }

    /// Converts the target dose to a pump rate, clamps it, back-calculates
    /// the delivered dose and draws down inventory.
    fn deliver(&mut self, target: f64, flow: f64, dt: f64) {
        self.target_dose = target.clamp(0.0, self.max_dose());
        if !self.enabled || flow <= EPS || self.inventory <= 0.0 {
            if self.enabled && self.inventory <= 0.0 && !self.empty_warned {
                tracing::warn!("{} inventory exhausted", self.name);
                self.empty_warned = true;
            }
            self.pump_rate = 0.0;
            self.actual_dose = 0.0;
            return;
        }

        let per_dose = self.litres_per_dose();
        let required = self.target_dose * flow * per_dose;
        self.pump_rate = required.clamp(0.0, self.config.pump_capacity.max(0.0));

        let consumed = (self.pump_rate * dt.max(0.0) / 3600.0).min(self.inventory);
        self.inventory = (self.inventory - consumed).max(0.0);
        self.used += consumed;
        self.cost += consumed * self.config.cost_per_litre;

        self.actual_dose = self.pump_rate / (flow.max(EPS) * per_dose);
    }
}

/// Emergent quantities consumed by the separation physics on the next tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChemicalProcessState {
    /// mV
    pub zeta_potential: f64,
    /// µm
    pub effective_floc_diameter: f64,
    pub floc_size_ratio: f64,
    pub emulsion_breaking_factor: f64,
    /// cm
    pub foam_height: f64,
    pub scaling_risk: f64,
    pub lsi: f64,
    pub mixing_efficiency: f64,
    /// s
    pub residence_time: f64,
    /// mg/L delivered
    pub acid_dose: f64,
    pub caustic_dose: f64,
    /// mmol/(L·pH)
    pub buffer_capacity: f64,
    /// mg/L COD from organic chemicals
    pub organic_load: f64,
}

impl Default for ChemicalProcessState {
    fn default() -> Self {
        Self {
            zeta_potential: -35.0,
            effective_floc_diameter: 0.0,
            floc_size_ratio: 1.0,
            emulsion_breaking_factor: 0.0,
            foam_height: 0.0,
            scaling_risk: 0.0,
            lsi: 0.0,
            mixing_efficiency: 1.0,
            residence_time: 0.0,
            acid_dose: 0.0,
            caustic_dose: 0.0,
            buffer_capacity: 1.0,
            organic_load: 0.0,
        }
    }
}

pub struct DosingInputs<'a> {
    pub feed: &'a FeedProperties,
    pub equipment: &'a EquipmentSpec,
    pub process: &'a ProcessState,
    /// Polishing filter outlet from the previous tick, ppm
    pub filtered_oiw: f64,
    pub dt: f64,
}

pub struct DosingSystem {
    pub dosers: Vec<ChemicalDoser>,
    pub params: ChemistryParams,
    pub ph_setpoint: f64,
    state: ChemicalProcessState,
}

impl DosingSystem {
    pub fn new(table: &ChemicalTable, params: ChemistryParams) -> Self {
        let dosers = ChemicalKind::ALL
            .iter()
            .map(|&kind| ChemicalDoser::new(kind, table.get(kind)))
            .collect();
        let ph_setpoint = params.ph.setpoint;
        Self {
            dosers,
            params,
            ph_setpoint,
            state: ChemicalProcessState::default(),
        }
    }

    pub fn doser(&self, kind: ChemicalKind) -> &ChemicalDoser {
        &self.dosers[kind.index()]
    }

    pub fn doser_mut(&mut self, kind: ChemicalKind) -> &mut ChemicalDoser {
        &mut self.dosers[kind.index()]
    }

    pub fn state(&self) -> &ChemicalProcessState {
        &self.state
    }

    pub fn total_cost(&self) -> f64 {
        self.dosers.iter().map(|d| d.cost).sum()
    }

    pub fn set_ph_setpoint(&mut self, setpoint: f64) {
        if setpoint.is_finite() {
            self.ph_setpoint = setpoint.clamp(0.0, 14.0);
        }
    }

    /// Lowest inventory among enabled dosers, %.
    pub fn min_enabled_inventory(&self) -> Option<f64> {
        self.dosers
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.inventory_percent())
            .reduce(f64::min)
    }

    /// Computes every dose for this tick and the chemical state for the next.
    pub fn update(&mut self, inputs: &DosingInputs) -> &ChemicalProcessState {
        let feed = inputs.feed;
        let process = inputs.process;
        let flow = process.feed_flow.max(0.0);
        let dt = inputs.dt.max(0.0);
        let temperature = process.temperature;
        let previous = self.state.clone();

        let residence_time = (inputs.equipment.conditioning_tank_volume / flow.max(0.01) * 3600.0).min(86_400.0);
        let mixing = (1.0 - 0.5 * (flow - 10.0).abs() / 10.0).clamp(0.5, 1.0);

        // Demulsifier
        let demulsifier_target = {
            let d = &mut self.dosers[ChemicalKind::Demulsifier.index()];
            let ratio_dose = d.ratio * feed.oil_fraction * 100.0;
            let max = d.max_dose();
            let target = match d.mode {
                DosingMode::Manual => d.manual_dose,
                DosingMode::Ratio => ratio_dose,
                DosingMode::Feedback => max * d.pid.update(d.setpoint, process.water_quality, dt) / 100.0,
                // Outer loop output of 50 % leaves the ratio dose as is, 0-100 % spans 0-2x
                DosingMode::Cascade => {
                    let outer = d.cascade_pid.update(d.cascade_setpoint, inputs.filtered_oiw, dt);
                    ratio_dose * outer / 50.0
                }
                DosingMode::Adaptive => {
                    let stability = feed.emulsion_stability.clamp(0.0, 1.0) / 0.3;
                    let thermal = (-0.01 * (temperature - 60.0)).exp();
                    let quality = (process.water_quality / d.setpoint.max(1.0)).clamp(0.5, 2.0);
                    d.manual_dose * stability * thermal * quality
                }
            };
            target * d.trim
        };
        self.dosers[ChemicalKind::Demulsifier.index()].deliver(demulsifier_target, flow, dt);
        let demulsifier_dose = self.doser(ChemicalKind::Demulsifier).actual_dose;
        let (coverage, effectiveness) =
            kinetics::demulsifier_effect(&self.params.demulsifier, demulsifier_dose, temperature, feed.demulsifier_efficacy);
        {
            let d = self.doser_mut(ChemicalKind::Demulsifier);
            d.derived.surface_coverage = coverage;
            d.derived.effectiveness = effectiveness;
        }

        // Flocculant
        let target = {
            let d = &mut self.dosers[ChemicalKind::Flocculant.index()];
            let max = d.max_dose();
            let target = match d.mode {
                DosingMode::Ratio => d.ratio * feed.solids_fraction * 100.0,
                DosingMode::Feedback => max * d.pid.update(d.setpoint, process.turbidity, dt) / 100.0,
                _ => d.manual_dose,
            };
            target * d.trim
        };
        self.dosers[ChemicalKind::Flocculant.index()].deliver(target, flow, dt);
        let flocculant_dose = self.doser(ChemicalKind::Flocculant).actual_dose;
        let floc_ratio = kinetics::floc_size_ratio(
            &self.params.flocculant,
            flocculant_dose,
            mixing,
            residence_time,
            feed.flocculant_efficacy,
        );
        self.doser_mut(ChemicalKind::Flocculant).derived.floc_size_multiplier = floc_ratio;

        // Coagulant
        let target = {
            let d = &mut self.dosers[ChemicalKind::Coagulant.index()];
            let max = d.max_dose();
            let target = match d.mode {
                DosingMode::Ratio => d.ratio * feed.solids_fraction * 100.0,
                DosingMode::Feedback => max * d.pid.update(d.setpoint, previous.zeta_potential.abs(), dt) / 100.0,
                _ => d.manual_dose,
            };
            target * d.trim
        };
        self.dosers[ChemicalKind::Coagulant.index()].deliver(target, flow, dt);
        let coagulant_dose = self.doser(ChemicalKind::Coagulant).actual_dose;
        let zeta = kinetics::zeta_potential(&self.params.coagulant, coagulant_dose, feed.salinity);
        self.doser_mut(ChemicalKind::Coagulant).derived.zeta_potential = zeta;

        // Acid / caustic
        let (acid_target, caustic_target, buffer) = self.ph_demand(feed, process, &previous, dt);
        self.dosers[ChemicalKind::Acid.index()].deliver(acid_target, flow, dt);
        self.dosers[ChemicalKind::Caustic.index()].deliver(caustic_target, flow, dt);
        let acid_dose = self.doser(ChemicalKind::Acid).actual_dose;
        let caustic_dose = self.doser(ChemicalKind::Caustic).actual_dose;

        // Scale inhibitor
        let lsi = kinetics::langelier_index(
            process.ph,
            temperature,
            feed.salinity,
            feed.calcium_hardness,
            feed.alkalinity,
        );
        let target = {
            let threshold = self.params.scale.lsi_threshold;
            let d = &mut self.dosers[ChemicalKind::ScaleInhibitor.index()];
            let target = if lsi <= threshold {
                0.0
            } else {
                match d.mode {
                    DosingMode::Adaptive => d.manual_dose * (1.0 + 2.0 * (lsi - threshold)),
                    _ => d.ratio * feed.calcium_hardness / 100.0,
                }
            };
            target * d.trim
        };
        self.dosers[ChemicalKind::ScaleInhibitor.index()].deliver(target, flow, dt);
        let inhibitor_dose = self.doser(ChemicalKind::ScaleInhibitor).actual_dose;
        let risk = kinetics::scaling_risk(&self.params.scale, lsi, inhibitor_dose);
        {
            let d = self.doser_mut(ChemicalKind::ScaleInhibitor);
            d.derived.lsi = lsi;
            d.derived.scaling_risk = risk;
        }

        // Antifoam
        let target = {
            let d = &mut self.dosers[ChemicalKind::Antifoam.index()];
            let max = d.max_dose();
            let target = match d.mode {
                DosingMode::Feedback => max * d.pid.update(d.setpoint, previous.foam_height, dt) / 100.0,
                _ => d.manual_dose,
            };
            target * d.trim
        };
        self.dosers[ChemicalKind::Antifoam.index()].deliver(target, flow, dt);
        let antifoam_dose = self.doser(ChemicalKind::Antifoam).actual_dose;
        let generation_driver = feed.dissolved_gas
            * feed.oil_fraction
            * (flow / inputs.equipment.max_flow.max(EPS))
            * (process.bowl_speed / 3500.0);
        let foam = kinetics::foam_step(
            &self.params.antifoam,
            previous.foam_height,
            generation_driver,
            antifoam_dose,
            temperature,
            dt,
        );
        self.doser_mut(ChemicalKind::Antifoam).derived.foam_level = foam;

        self.state = ChemicalProcessState {
            zeta_potential: zeta,
            effective_floc_diameter: feed.solids_particles.d50 * floc_ratio,
            floc_size_ratio: floc_ratio,
            emulsion_breaking_factor: effectiveness,
            foam_height: foam,
            scaling_risk: risk,
            lsi,
            mixing_efficiency: mixing,
            residence_time,
            acid_dose,
            caustic_dose,
            buffer_capacity: buffer,
            organic_load: 1.5 * (demulsifier_dose + antifoam_dose + flocculant_dose),
        };
        &self.state
    }

    /// Henderson–Hasselbalch sizing of the acid or caustic dose.
    ///
    /// The error is taken against the pH the stream would have without
    /// last tick's acid/caustic, so a steady feed settles on a steady dose.
    /// Returns (acid mg/L, caustic mg/L, buffer capacity).
    fn ph_demand(
        &mut self,
        feed: &FeedProperties,
        process: &ProcessState,
        previous: &ChemicalProcessState,
        dt: f64,
    ) -> (f64, f64, f64) {
        let setpoint = self.ph_setpoint;
        let pka = self.params.ph.pka;
        let deadband = self.params.ph.deadband;

        let applied = (previous.caustic_dose / CAUSTIC_MG_PER_MMOL - previous.acid_dose / ACID_MG_PER_MMOL)
            / previous.buffer_capacity.max(0.1);
        let undosed = process.ph - applied;
        let buffer = kinetics::buffer_capacity(feed.alkalinity, 0.5 * (undosed + setpoint), pka);
        let error = setpoint - undosed;

        if error > deadband {
            let d = &mut self.dosers[ChemicalKind::Caustic.index()];
            let trim = (d.pid.update(setpoint, process.ph, dt) / 50.0).clamp(0.0, 2.0);
            (0.0, buffer * error * trim * CAUSTIC_MG_PER_MMOL * d.trim, buffer)
        } else if error < -deadband {
            let d = &mut self.dosers[ChemicalKind::Acid.index()];
            let trim = (d.pid.update(setpoint, process.ph, dt) / 50.0).clamp(0.0, 2.0);
            (buffer * -error * trim * ACID_MG_PER_MMOL * d.trim, 0.0, buffer)
        } else {
            (0.0, 0.0, buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn process(flow: f64) -> ProcessState {
        ProcessState {
            temperature: 65.0,
            feed_flow: flow,
            bowl_speed: 3500.0,
            water_quality: 700.0,
            turbidity: 90.0,
            ph: 6.2,
            ..Default::default()
        }
    }

    fn run(system: &mut DosingSystem, process: &ProcessState, dt: f64) {
        run_with(system, &FeedProperties::default(), process, 12.0, dt);
    }

    fn run_with(system: &mut DosingSystem, feed: &FeedProperties, process: &ProcessState, filtered_oiw: f64, dt: f64) {
        let equipment = EquipmentSpec::default();
        system.update(&DosingInputs {
            feed,
            equipment: &equipment,
            process,
            filtered_oiw,
            dt,
        });
    }

    fn system_in(kind: ChemicalKind, mode: DosingMode) -> DosingSystem {
        let mut system = DosingSystem::new(&ChemicalTable::default(), ChemistryParams::default());
        assert!(system.doser_mut(kind).set_mode(mode));
        system
    }

    #[test]
    fn manual_dose_is_delivered_and_costed() {
        let mut system = DosingSystem::new(&ChemicalTable::default(), ChemistryParams::default());
        run(&mut system, &process(12.0), 3600.0);
        let d = system.doser(ChemicalKind::Demulsifier);
        assert_relative_eq!(d.actual_dose, 50.0, epsilon = 1e-9);
        // 50 mg/L · 12 m³/h / (0.6 · 0.95 kg/L)
        let expected = 50.0 * 12.0 / (0.6 * 0.95 * 1000.0);
        assert_relative_eq!(d.pump_rate, expected, epsilon = 1e-9);
        assert_relative_eq!(d.used, expected, epsilon = 1e-9);
        assert_relative_eq!(d.cost, expected * 4.5, epsilon = 1e-9);
    }

    #[test]
    fn pump_capacity_limits_delivered_dose() {
        let mut table = ChemicalTable::default();
        table.demulsifier.pump_capacity = 0.5;
        let mut system = DosingSystem::new(&table, ChemistryParams::default());
        run(&mut system, &process(12.0), 1.0);
        let d = system.doser(ChemicalKind::Demulsifier);
        assert_relative_eq!(d.pump_rate, 0.5);
        assert!(d.actual_dose < d.target_dose);
        assert_relative_eq!(d.actual_dose, 0.5 * 0.6 * 0.95 * 1000.0 / 12.0, epsilon = 1e-9);
    }

    #[test]
    fn inventory_floors_at_zero() {
        let mut table = ChemicalTable::default();
        table.antifoam.initial_inventory = 0.01;
        let mut system = DosingSystem::new(&table, ChemistryParams::default());
        for _ in 0..10 {
            run(&mut system, &process(12.0), 3600.0);
        }
        let d = system.doser(ChemicalKind::Antifoam);
        assert_eq!(d.inventory, 0.0);
        assert_eq!(d.actual_dose, 0.0);
        assert_relative_eq!(d.used, 0.01, epsilon = 1e-12);
    }

    #[test]
    fn acid_and_caustic_are_exclusive() {
        let mut system = DosingSystem::new(&ChemicalTable::default(), ChemistryParams::default());
        run(&mut system, &process(12.0), 1.0);
        assert!(system.doser(ChemicalKind::Caustic).actual_dose > 0.0);
        assert_eq!(system.doser(ChemicalKind::Acid).actual_dose, 0.0);

        let mut high = process(12.0);
        high.ph = 8.5;
        let mut system = DosingSystem::new(&ChemicalTable::default(), ChemistryParams::default());
        run(&mut system, &high, 1.0);
        assert!(system.doser(ChemicalKind::Acid).actual_dose > 0.0);
        assert_eq!(system.doser(ChemicalKind::Caustic).actual_dose, 0.0);
    }

    #[test]
    fn caustic_dose_closes_ph_error() {
        let mut table = ChemicalTable::default();
        // Untrimmed: the PID factor sits at its 50 % bias
        table.caustic.gains = Gains::new(0.0, 0.0, 0.0);
        let mut system = DosingSystem::new(&table, ChemistryParams::default());
        run(&mut system, &process(12.0), 1.0);
        let state = system.state().clone();
        let shift = state.caustic_dose / CAUSTIC_MG_PER_MMOL / state.buffer_capacity;
        assert_relative_eq!(6.2 + shift, 7.0, epsilon = 1e-6);
    }

    #[test]
    fn unsupported_mode_is_rejected() {
        let mut system = DosingSystem::new(&ChemicalTable::default(), ChemistryParams::default());
        assert!(!system.doser_mut(ChemicalKind::Acid).set_mode(DosingMode::Manual));
        assert_eq!(system.doser(ChemicalKind::Acid).mode, DosingMode::Feedback);
        assert!(system.doser_mut(ChemicalKind::Demulsifier).set_mode(DosingMode::Cascade));
    }

    #[test]
    fn no_flow_no_dosing() {
        let mut system = DosingSystem::new(&ChemicalTable::default(), ChemistryParams::default());
        run(&mut system, &process(0.0), 1.0);
        for d in &system.dosers {
            assert_eq!(d.pump_rate, 0.0);
        }
    }

    #[test]
    fn flocculant_grows_flocs_when_enabled() {
        let mut table = ChemicalTable::default();
        table.flocculant.enabled = true;
        let mut system = DosingSystem::new(&table, ChemistryParams::default());
        run(&mut system, &process(12.0), 1.0);
        assert!(system.state().floc_size_ratio > 1.0);
        assert!(system.state().effective_floc_diameter > 80.0);
    }

    #[test]
    fn ratio_mode_follows_oil_content() {
        let mut system = DosingSystem::new(&ChemicalTable::default(), ChemistryParams::default());
        system.doser_mut(ChemicalKind::Demulsifier).set_mode(DosingMode::Ratio);
        run(&mut system, &process(12.0), 1.0);
        // 2.5 ppm per % oil at 20 % oil
        assert_relative_eq!(system.doser(ChemicalKind::Demulsifier).actual_dose, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn feedback_demulsifier_raises_dose_on_poor_quality() {
        let mut system = DosingSystem::new(&ChemicalTable::default(), ChemistryParams::default());
        system.doser_mut(ChemicalKind::Demulsifier).set_mode(DosingMode::Feedback);
        let mut poor = process(12.0);
        poor.water_quality = 1500.0;
        run(&mut system, &poor, 1.0);
        let first = system.doser(ChemicalKind::Demulsifier).target_dose;
        run(&mut system, &poor, 1.0);
        assert!(system.doser(ChemicalKind::Demulsifier).target_dose > first * 0.99);
        assert!(first > 0.5 * system.doser(ChemicalKind::Demulsifier).max_dose());
    }

    #[test]
    fn cascade_demulsifier_trims_ratio_dose_on_filtered_oiw() {
        let feed = FeedProperties::default();
        let cascade_dose = |filtered_oiw: f64| {
            let mut system = system_in(ChemicalKind::Demulsifier, DosingMode::Cascade);
            for _ in 0..5 {
                run_with(&mut system, &feed, &process(12.0), filtered_oiw, 1.0);
            }
            system.doser(ChemicalKind::Demulsifier).actual_dose
        };
        let poor = cascade_dose(40.0);
        let good = cascade_dose(2.0);
        // Ratio dose is 2.5 ppm per % oil at 20 % oil
        assert!(poor > 90.0, "poor {poor}");
        assert!(good < 30.0, "good {good}");
        // On target the outer loop holds its bias
        assert_relative_eq!(cascade_dose(15.0), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn adaptive_demulsifier_scales_with_stability_and_quality() {
        let mut feed = FeedProperties::default();
        let mut system = system_in(ChemicalKind::Demulsifier, DosingMode::Adaptive);
        run_with(&mut system, &feed, &process(12.0), 12.0, 1.0);
        let base = system.doser(ChemicalKind::Demulsifier).target_dose;
        // 50 ppm · stability 1 · exp(-0.01 · 5 K) · 700/500
        assert_relative_eq!(base, 50.0 * (-0.05f64).exp() * 1.4, epsilon = 1e-9);

        feed.emulsion_stability = 0.6;
        run_with(&mut system, &feed, &process(12.0), 12.0, 1.0);
        assert_relative_eq!(system.doser(ChemicalKind::Demulsifier).target_dose, 2.0 * base, epsilon = 1e-9);

        let mut hot = process(12.0);
        hot.temperature = 85.0;
        run_with(&mut system, &feed, &hot, 12.0, 1.0);
        assert!(system.doser(ChemicalKind::Demulsifier).target_dose < 2.0 * base);
    }

    #[test]
    fn adaptive_scale_inhibitor_follows_lsi() {
        let feed = FeedProperties::default();
        let mut system = system_in(ChemicalKind::ScaleInhibitor, DosingMode::Adaptive);
        run_with(&mut system, &feed, &process(12.0), 12.0, 1.0);
        // Undersaturated at pH 6.2
        assert!(system.state().lsi < 0.0);
        assert_eq!(system.doser(ChemicalKind::ScaleInhibitor).target_dose, 0.0);

        let mut scaling = process(12.0);
        scaling.ph = 8.5;
        run_with(&mut system, &feed, &scaling, 12.0, 1.0);
        let lsi = kinetics::langelier_index(8.5, 65.0, feed.salinity, feed.calcium_hardness, feed.alkalinity);
        assert!(lsi > 1.0);
        let d = system.doser(ChemicalKind::ScaleInhibitor);
        assert_relative_eq!(d.target_dose, 5.0 * (1.0 + 2.0 * lsi), epsilon = 1e-9);
        assert_relative_eq!(d.derived.lsi, lsi, epsilon = 1e-12);
    }

    #[test]
    fn feedback_antifoam_answers_last_foam_height() {
        let mut calm = system_in(ChemicalKind::Antifoam, DosingMode::Feedback);
        let mut foaming = system_in(ChemicalKind::Antifoam, DosingMode::Feedback);
        foaming.state.foam_height = 40.0;
        run(&mut calm, &process(12.0), 1.0);
        run(&mut foaming, &process(12.0), 1.0);
        let calm_dose = calm.doser(ChemicalKind::Antifoam).target_dose;
        let foaming_dose = foaming.doser(ChemicalKind::Antifoam).target_dose;
        assert!(calm_dose < 25.0, "calm {calm_dose}");
        assert_relative_eq!(foaming_dose, foaming.doser(ChemicalKind::Antifoam).max_dose());
        assert!(foaming.state().foam_height < 40.0);
    }

    #[test]
    fn feedback_coagulant_answers_zeta_magnitude() {
        let mut charged = system_in(ChemicalKind::Coagulant, DosingMode::Feedback);
        let mut neutral = system_in(ChemicalKind::Coagulant, DosingMode::Feedback);
        neutral.state.zeta_potential = -3.0;
        run(&mut charged, &process(12.0), 1.0);
        run(&mut neutral, &process(12.0), 1.0);
        let charged_dose = charged.doser(ChemicalKind::Coagulant).target_dose;
        let neutral_dose = neutral.doser(ChemicalKind::Coagulant).target_dose;
        // 30 mV error at unit gain
        assert_relative_eq!(charged_dose, 81.5, epsilon = 1e-9);
        assert!(neutral_dose < 50.0, "neutral {neutral_dose}");
    }
}
