use super::alarms::{Alarm, AlarmConfig, AlarmKind, AlarmManager};
use super::aqc::{ActionKind, AqcAction, AqcConfig, AqcController, AqcInputs, AqcMode, AqcState};
use super::batch::{default_recipe, BatchPhase, BatchSequencer, SequencerStep};
use super::chemicals::kinetics::ChemistryParams;
use super::chemicals::{
    ChemicalDoser, ChemicalKind, ChemicalProcessState, ChemicalTable, DosingInputs, DosingMode, DosingSystem,
};
use super::devices::{Centrifuge, FeedPump, Heater};
use super::events::{Event, EventKind, EventLog};
use super::feed::{EquipmentSpec, FeedPreset, FeedProperties, Phase};
use super::filter::{FilterEvent, FilterInlet, FilterParams, FilterStatus, PolishingFilter};
use super::physics::{self, OperatingPoint, ProcessNoise, ProcessState};
use super::pid::{ControlLoop, Gains, LoopMode};
use super::scheduler::SchedulerConfig;
use super::tanks::{FeedTank, FeedTankStatus, MassBalance, OilTank, OilTankStatus, Pond, PondConfig, PondInflow, TankConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const TREND_INTERVAL: f64 = 5.0;
pub const TREND_CAPACITY: usize = 720;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopId {
    Temperature,
    Flow,
    Speed,
}

/// A loop named in a config file must carry all four values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopTuning {
    pub setpoint: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl LoopTuning {
    fn gains(&self) -> Gains {
        Gains::new(self.kp, self.ki, self.kd)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopsConfig {
    pub temperature: LoopTuning,
    pub flow: LoopTuning,
    pub speed: LoopTuning,
}

impl Default for LoopsConfig {
    fn default() -> Self {
        Self {
            temperature: LoopTuning { setpoint: 65.0, kp: 2.0, ki: 0.05, kd: 0.5 },
            flow: LoopTuning { setpoint: 12.0, kp: 4.0, ki: 0.2, kd: 0.0 },
            speed: LoopTuning { setpoint: 3500.0, kp: 0.02, ki: 0.005, kd: 0.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Disturbances {
    /// 0-1; scales feed composition jitter and efficiency noise
    pub composition_variability: f64,
}

impl Default for Disturbances {
    fn default() -> Self {
        Self { composition_variability: 0.1 }
    }
}

impl Disturbances {
    pub fn none() -> Self {
        Self { composition_variability: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub feed: FeedProperties,
    pub equipment: EquipmentSpec,
    pub loops: LoopsConfig,
    pub chemicals: ChemicalTable,
    pub chemistry: ChemistryParams,
    pub filter: FilterParams,
    pub aqc: AqcConfig,
    pub alarms: AlarmConfig,
    pub tanks: TankConfig,
    pub pond: PondConfig,
    pub recipe: Vec<BatchPhase>,
    pub scheduler: SchedulerConfig,
    pub disturbances: Disturbances,
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed: FeedProperties::default(),
            equipment: EquipmentSpec::default(),
            loops: LoopsConfig::default(),
            chemicals: ChemicalTable::default(),
            chemistry: ChemistryParams::default(),
            filter: FilterParams::default(),
            aqc: AqcConfig::default(),
            alarms: AlarmConfig::default(),
            tanks: TankConfig::default(),
            pond: PondConfig::default(),
            recipe: default_recipe(),
            scheduler: SchedulerConfig::default(),
            disturbances: Disturbances::default(),
            seed: 7,
        }
    }
}

/// Operator and supervisor inputs, applied at the start of the next step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "snake_case")]
pub enum Command {
    SetSetpoint { loop_id: LoopId, value: f64 },
    SetLoopMode { loop_id: LoopId, mode: LoopMode },
    SetLoopOutput { loop_id: LoopId, value: f64 },
    SetTuning { loop_id: LoopId, kp: f64, ki: f64, kd: f64 },
    SetChemicalEnabled { chemical: ChemicalKind, enabled: bool },
    SetChemicalMode { chemical: ChemicalKind, mode: DosingMode },
    SetChemicalDose { chemical: ChemicalKind, dose: f64 },
    SetChemicalRatio { chemical: ChemicalKind, ratio: f64 },
    SetChemicalSetpoint { chemical: ChemicalKind, setpoint: f64 },
    SetPhSetpoint { value: f64 },
    SetFeedFraction { phase: Phase, value: f64 },
    LoadFeedPreset { preset: FeedPreset },
    SetDisturbance { composition_variability: f64 },
    StartBatch { tank: String },
    StopBatch,
    SelectOilTank { tank: String },
    TriggerBackwash,
    SetFilterStatus { status: FilterStatus },
    SetAutoBackwash { enabled: bool },
    SetAqcEnabled { enabled: bool },
    SetAqcMode { mode: AqcMode },
    ApplyAqcAction { action: ActionKind },
    Reset,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunTotals {
    /// kWh
    pub heater_energy: f64,
    pub drive_energy: f64,
    pub backwash_energy: f64,
    /// m³
    pub backwash_water: f64,
    /// L across all chemicals
    pub chemical_used: f64,
    /// $
    pub chemical_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub sim_time: f64,
    pub temperature: f64,
    pub feed_flow: f64,
    pub bowl_speed: f64,
    pub oil_efficiency: f64,
    pub solids_efficiency: f64,
    pub centrifuge_oiw: f64,
    pub filtered_oiw: f64,
    pub turbidity: f64,
    pub ph: f64,
    pub filter_dp: f64,
    pub foam_height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub active: bool,
    pub source_tank: Option<String>,
    pub phase_index: usize,
    pub phase_name: Option<String>,
    pub pending_phase: Option<usize>,
    pub batch_volume: f64,
    pub processed: f64,
    pub remaining: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub sim_time: f64,
    pub running: bool,
    pub interlock: bool,
    pub feed: FeedProperties,
    pub process: ProcessState,
    pub heater: Heater,
    pub feed_pump: FeedPump,
    pub centrifuge: Centrifuge,
    pub loops: Vec<ControlLoop>,
    pub chemicals: Vec<ChemicalDoser>,
    pub chemical_state: ChemicalProcessState,
    pub ph_setpoint: f64,
    pub filter: PolishingFilter,
    pub feed_tanks: Vec<FeedTank>,
    pub oil_tanks: Vec<OilTank>,
    pub selected_oil_tank: String,
    pub pond: Pond,
    pub aqc: AqcState,
    pub alarms: Vec<Alarm>,
    pub pending_alarms: Vec<Alarm>,
    pub batch: BatchProgress,
    pub mass_balance: MassBalance,
    pub mass_balance_closure: f64,
    pub totals: RunTotals,
    pub trend: Option<TrendPoint>,
}

/// One tick's output as broadcast to clients.
#[derive(Debug, Clone, Serialize)]
pub struct TickFrame {
    pub snapshot: ProcessSnapshot,
    pub events: Vec<Event>,
}

/// Values read by the alarm rules this tick.
#[derive(Debug, Clone, Copy)]
struct AlarmReadings {
    temperature: f64,
    vibration: f64,
    oil_efficiency: f64,
    solids_efficiency: f64,
    discharge_oiw: Option<f64>,
    filter_dp: f64,
    oil_tank_level: Option<f64>,
    chemical_inventory: Option<f64>,
    foam: f64,
}

impl AlarmReadings {
    fn get(&self, kind: AlarmKind) -> Option<f64> {
        match kind {
            AlarmKind::HighTemperature => Some(self.temperature),
            AlarmKind::HighVibration => Some(self.vibration),
            AlarmKind::LowOilEfficiency => Some(self.oil_efficiency),
            AlarmKind::LowSolidsEfficiency => Some(self.solids_efficiency),
            AlarmKind::HighDischargeOiw => self.discharge_oiw,
            AlarmKind::HighFilterDp => Some(self.filter_dp),
            AlarmKind::OilTankHigh => self.oil_tank_level,
            AlarmKind::LowChemicalInventory => self.chemical_inventory,
            AlarmKind::HighFoam => Some(self.foam),
        }
    }
}

/// The whole separation train. One owned context; every tick runs the
/// components in a fixed order inside [`Engine::step`].
pub struct Engine {
    config: EngineConfig,
    /// Largest simulated step integrated at once, s
    max_step: f64,
    sim_time: f64,
    running: bool,
    interlock: bool,

    feed: FeedProperties,
    equipment: EquipmentSpec,
    noise: ProcessNoise,

    heater: Heater,
    feed_pump: FeedPump,
    centrifuge: Centrifuge,
    tic: ControlLoop,
    fic: ControlLoop,
    sic: ControlLoop,

    process: ProcessState,
    dosing: DosingSystem,
    chemistry_primed: bool,
    filter: PolishingFilter,
    aqc: AqcController,
    sequencer: BatchSequencer,
    alarms: AlarmManager,

    feed_tanks: Vec<FeedTank>,
    source_tank: Option<usize>,
    oil_tanks: Vec<OilTank>,
    selected_oil_tank: usize,
    pond: Pond,
    balance: MassBalance,
    processed: f64,

    heater_energy: f64,
    drive_energy: f64,
    trends: VecDeque<TrendPoint>,
    next_trend: f64,
    log: EventLog,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let equipment = config.equipment.clone().sanitized();
        let mut feed = config.feed.clone();
        feed.normalize();

        let loops = &config.loops;
        let tic = ControlLoop::new(
            "TIC-101",
            loops.temperature.setpoint,
            20.0,
            equipment.heater_max_outlet,
            loops.temperature.gains(),
        );
        let fic = ControlLoop::new(
            "FIC-101",
            loops.flow.setpoint,
            equipment.min_flow,
            equipment.max_flow,
            loops.flow.gains(),
        );
        let sic = ControlLoop::new(
            "SIC-101",
            loops.speed.setpoint,
            equipment.min_rpm,
            equipment.max_rpm,
            loops.speed.gains(),
        );

        let mut oil_tanks: Vec<OilTank> = config.tanks.oil_tanks.iter().map(OilTank::new).collect();
        if oil_tanks.is_empty() {
            oil_tanks.push(OilTank::new(&Default::default()));
        }

        let filter = PolishingFilter::new("F-301", config.filter.clone());
        let max_step = match config.scheduler.max_frame() {
            step if step.is_finite() && step > 0.0 => step,
            _ => SchedulerConfig::default().max_frame(),
        };

        Self {
            max_step,
            sim_time: 0.0,
            running: false,
            interlock: false,
            noise: ProcessNoise::new(config.seed, config.disturbances.composition_variability),
            heater: Heater::new("E-101", feed.temperature),
            feed_pump: FeedPump::new("P-101"),
            centrifuge: Centrifuge::new("CF-101"),
            tic,
            fic,
            sic,
            process: ProcessState {
                temperature: feed.temperature,
                ph: feed.ph,
                ..Default::default()
            },
            dosing: DosingSystem::new(&config.chemicals, config.chemistry.clone()),
            chemistry_primed: false,
            filter,
            aqc: AqcController::new(config.aqc.clone()),
            sequencer: BatchSequencer::new(config.recipe.clone()),
            alarms: AlarmManager::new(config.alarms.clone()),
            feed_tanks: config.tanks.feed_tanks.iter().map(FeedTank::new).collect(),
            source_tank: None,
            oil_tanks,
            selected_oil_tank: 0,
            pond: Pond::new(&config.pond),
            balance: MassBalance::default(),
            processed: 0.0,
            heater_energy: 0.0,
            drive_energy: 0.0,
            trends: VecDeque::new(),
            next_trend: TREND_INTERVAL,
            log: EventLog::new(),
            feed,
            equipment,
            config,
        }
    }

    /// Restores everything to the configured defaults.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
        tracing::info!("engine reset");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn max_step(&self) -> f64 {
        self.max_step
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn trends(&self) -> impl Iterator<Item = &TrendPoint> {
        self.trends.iter()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.log.iter()
    }

    /// Applies `commands`, advances the train by `dt` seconds and returns
    /// the resulting snapshot with the events raised along the way.
    pub fn step(&mut self, dt: f64, commands: Vec<Command>) -> (ProcessSnapshot, Vec<Event>) {
        let mut events = Vec::new();
        for command in commands {
            self.apply(command, &mut events);
        }

        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        if dt > self.max_step {
            tracing::warn!("step of {:.1}s clamped to {:.1}s", dt, self.max_step);
        }
        let dt = dt.min(self.max_step);
        if dt > 0.0 {
            self.tick(dt, &mut events);
        }

        self.log.extend(events.iter().cloned());
        (self.snapshot(), events)
    }

    fn tick(&mut self, dt: f64, events: &mut Vec<Event>) {
        self.sim_time += dt;
        let sampled = self.sample_feed();

        // Actuators move on last tick's controller outputs
        let (duty, pump_speed, drive) = if self.running {
            (self.tic.output(), self.fic.output(), self.sic.output())
        } else {
            (0.0, 0.0, 0.0)
        };
        let flow_before = self.feed_pump.flow_rate;
        self.feed_pump.tick(dt, pump_speed, &self.equipment);
        self.heater.tick(dt, duty, sampled.temperature, flow_before, &self.equipment);
        self.centrifuge.tick(dt, drive, self.running, &self.equipment);

        let flow = if self.running { self.feed_pump.flow_rate } else { 0.0 };
        let op = OperatingPoint {
            temperature: self.heater.outlet_temperature,
            bowl_speed: self.centrifuge.bowl_speed,
            feed_flow: flow,
        };
        let chemistry = self.chemistry_primed.then(|| self.dosing.state());
        self.process = physics::separate(&sampled, &self.equipment, &op, chemistry, &mut self.noise);
        self.process.heater_power = self.heater.power_kw;
        self.process.total_power = self.process.drive_power + self.heater.power_kw;

        if self.running {
            self.tic.update(self.heater.outlet_temperature, dt);
            self.fic.update(self.feed_pump.flow_rate, dt);
            self.sic.update(self.centrifuge.bowl_speed, dt);
        } else {
            self.tic.pv = self.heater.outlet_temperature;
            self.fic.pv = self.feed_pump.flow_rate;
            self.sic.pv = self.centrifuge.bowl_speed;
        }

        self.dosing.update(&DosingInputs {
            feed: &sampled,
            equipment: &self.equipment,
            process: &self.process,
            filtered_oiw: self.filter.outlet_oiw,
            dt,
        });
        self.chemistry_primed = true;

        self.accumulate(dt, flow, events);

        let inlet = FilterInlet {
            flow: if self.running { self.process.water_out_flow } else { 0.0 },
            oiw: self.process.water_quality,
            suspended_solids: self.process.suspended_solids,
            turbidity: self.process.turbidity,
            organic_cod: sampled.background_cod + self.dosing.state().organic_load,
        };
        match self.filter.tick(dt, &inlet) {
            Some(FilterEvent::BackwashStarted) => {
                events.push(Event::new(self.sim_time, EventKind::Note, format!("{} backwash started", self.filter.id)));
            }
            Some(FilterEvent::BackwashCompleted) => {
                events.push(Event::new(self.sim_time, EventKind::Note, format!("{} backwash complete", self.filter.id)));
            }
            None => {}
        }

        let inputs = self.aqc_inputs();
        if let Some(action) = self.aqc.evaluate(dt, self.sim_time, self.running, &inputs) {
            self.apply_aqc_action(&action, events);
        }

        self.sequence(events);

        let readings = self.alarm_readings();
        events.extend(self.alarms.evaluate(self.sim_time, self.running, |kind| readings.get(kind)));

        self.heater_energy += self.heater.power_kw * dt / 3600.0;
        self.drive_energy += self.process.drive_power * dt / 3600.0;
        if self.sim_time + EPS >= self.next_trend {
            self.record_trend();
            while self.next_trend <= self.sim_time + EPS {
                self.next_trend += TREND_INTERVAL;
            }
        }
    }

    fn sample_feed(&mut self) -> FeedProperties {
        let mut feed = self.feed.clone();
        let variability = self.noise.variability;
        if variability > 0.0 {
            let oil = self.noise.add_noise(feed.oil_fraction, 5.0 * variability).max(0.0);
            let solids = self.noise.add_noise(feed.solids_fraction, 5.0 * variability).max(0.0);
            feed.set_fractions(feed.water_fraction, oil, solids);
            feed.temperature += self.noise.gaussian(0.5 * variability);
        }
        feed
    }

    /// Feed draw, product tanks and the pond for this tick.
    fn accumulate(&mut self, dt: f64, flow: f64, events: &mut Vec<Event>) {
        // Pond receives last tick's polished water
        let overflowing = self.pond.tick(
            dt,
            &PondInflow {
                flow: self.filter.outlet_flow,
                oiw: self.filter.outlet_oiw,
                turbidity: self.filter.outlet_turbidity,
                trh: self.filter.trh,
                cod: self.filter.cod,
            },
        );
        if overflowing {
            let message = format!("Pond full at {:.0} m³, polished water overflowing", self.pond.volume);
            tracing::warn!("{}", message);
            events.push(Event::new(self.sim_time, EventKind::Note, message));
        }

        let Some(source) = self.source_tank.filter(|_| self.running) else {
            return;
        };
        let requested = flow * dt / 3600.0;
        if requested <= EPS {
            return;
        }
        let allowed = requested.min(self.sequencer.remaining());
        let drawn = self.feed_tanks.get_mut(source).map_or(0.0, |tank| tank.draw(allowed));
        // Last tick of a batch: every stream shrinks with the feed
        let fraction = drawn / requested;
        let hours = dt / 3600.0 * fraction;

        let oil = self.process.oil_out_flow * hours;
        self.balance.record(
            drawn,
            self.process.water_out_flow * hours,
            oil,
            self.process.solids_out_flow * hours,
        );
        self.processed += drawn;

        let Some(tank) = self.oil_tanks.get_mut(self.selected_oil_tank) else {
            return;
        };
        if tank.fill(oil) {
            let message = format!("{} high-high level {:.1}%, run halted", tank.id, tank.level());
            tracing::error!("interlock: {}", message);
            self.running = false;
            self.interlock = true;
            self.sequencer.stop();
            if let Some(feed_tank) = self.feed_tanks.get_mut(source) {
                if feed_tank.volume > EPS {
                    feed_tank.status = FeedTankStatus::Ready;
                }
            }
            events.push(Event::new(self.sim_time, EventKind::Interlock, message));
        }
    }

    fn sequence(&mut self, events: &mut Vec<Event>) {
        if !self.running {
            return;
        }
        match self.sequencer.update(self.sim_time, self.processed) {
            SequencerStep::Hold => {}
            SequencerStep::Committed(index) => {
                if let Some(phase) = self.sequencer.recipe.get(index).cloned() {
                    tracing::info!("batch phase {} committed: {}", index + 1, phase.name);
                    self.apply_phase(&phase);
                    events.push(Event::new(
                        self.sim_time,
                        EventKind::Phase,
                        format!("Phase {}: {}", index + 1, phase.name),
                    ));
                }
            }
            SequencerStep::Complete => {
                self.running = false;
                if let Some(tank) = self.source_tank.take().and_then(|i| self.feed_tanks.get_mut(i)) {
                    tank.mark_empty();
                }
                let closure = self.balance.closure();
                tracing::info!("batch complete: {:.1} m³, closure {:.1}%", self.processed, closure);
                events.push(Event::new(
                    self.sim_time,
                    EventKind::Complete,
                    format!("Batch complete: {:.1} m³ processed, mass balance {:.1}%", self.processed, closure),
                ));
            }
        }
    }

    fn apply_phase(&mut self, phase: &BatchPhase) {
        self.tic.set_setpoint(phase.temperature);
        self.fic.set_setpoint(phase.flow);
        self.sic.set_setpoint(phase.bowl_speed);
        self.feed
            .set_fractions(phase.water_fraction, phase.oil_fraction, phase.solids_fraction);
    }

    fn aqc_inputs(&self) -> AqcInputs {
        let demulsifier = self.dosing.doser(ChemicalKind::Demulsifier);
        let flocculant = self.dosing.doser(ChemicalKind::Flocculant);
        AqcInputs {
            oiw: self.filter.outlet_oiw,
            trh: self.filter.trh,
            cod: self.filter.cod,
            turbidity: self.filter.outlet_turbidity,
            ph: self.process.ph,
            heater_setpoint: self.tic.setpoint,
            speed_setpoint: self.sic.setpoint,
            speed_max: self.equipment.max_rpm,
            flow_setpoint: self.fic.setpoint,
            flow_min: self.equipment.min_flow,
            demulsifier_trim: demulsifier.trim,
            flocculant_enabled: flocculant.enabled,
            flocculant_trim: flocculant.trim,
        }
    }

    fn apply_aqc_action(&mut self, action: &AqcAction, events: &mut Vec<Event>) {
        match action.kind {
            ActionKind::IncreaseHeater => self.tic.set_setpoint(action.target),
            ActionKind::IncreaseBowlSpeed => self.sic.set_setpoint(action.target),
            ActionKind::ReduceFeedFlow => self.fic.set_setpoint(action.target),
            ActionKind::IncreaseDemulsifier => {
                self.dosing.doser_mut(ChemicalKind::Demulsifier).trim = action.target;
            }
            ActionKind::IncreaseFlocculant => {
                let doser = self.dosing.doser_mut(ChemicalKind::Flocculant);
                if doser.enabled {
                    doser.trim = action.target;
                } else {
                    doser.enabled = true;
                }
            }
        }
        events.push(Event::new(self.sim_time, EventKind::Aqc, action.description.clone()));
    }

    fn alarm_readings(&self) -> AlarmReadings {
        AlarmReadings {
            temperature: self.heater.outlet_temperature,
            vibration: self.process.vibration,
            oil_efficiency: self.process.oil_efficiency,
            solids_efficiency: self.process.solids_efficiency,
            discharge_oiw: (self.filter.outlet_flow > EPS).then_some(self.filter.outlet_oiw),
            filter_dp: self.filter.differential_pressure,
            oil_tank_level: self.oil_tanks.get(self.selected_oil_tank).map(OilTank::level),
            chemical_inventory: self.dosing.min_enabled_inventory(),
            foam: self.dosing.state().foam_height,
        }
    }

    fn record_trend(&mut self) {
        if self.trends.len() == TREND_CAPACITY {
            self.trends.pop_front();
        }
        self.trends.push_back(TrendPoint {
            sim_time: self.sim_time,
            temperature: self.heater.outlet_temperature,
            feed_flow: self.process.feed_flow,
            bowl_speed: self.centrifuge.bowl_speed,
            oil_efficiency: self.process.oil_efficiency,
            solids_efficiency: self.process.solids_efficiency,
            centrifuge_oiw: self.process.water_quality,
            filtered_oiw: self.filter.outlet_oiw,
            turbidity: self.filter.outlet_turbidity,
            ph: self.process.ph,
            filter_dp: self.filter.differential_pressure,
            foam_height: self.dosing.state().foam_height,
        });
    }

    fn control_loop(&mut self, id: LoopId) -> &mut ControlLoop {
        match id {
            LoopId::Temperature => &mut self.tic,
            LoopId::Flow => &mut self.fic,
            LoopId::Speed => &mut self.sic,
        }
    }

    fn note(&self, events: &mut Vec<Event>, description: String) {
        events.push(Event::new(self.sim_time, EventKind::Note, description));
    }

    fn apply(&mut self, command: Command, events: &mut Vec<Event>) {
        tracing::debug!("command {:?}", command);
        match command {
            Command::SetSetpoint { loop_id, value } => self.control_loop(loop_id).set_setpoint(value),
            Command::SetLoopMode { loop_id, mode } => self.control_loop(loop_id).set_mode(mode),
            Command::SetLoopOutput { loop_id, value } => self.control_loop(loop_id).set_output(value),
            Command::SetTuning { loop_id, kp, ki, kd } => {
                if [kp, ki, kd].iter().all(|g| g.is_finite()) {
                    self.control_loop(loop_id).pid.gains = Gains::new(kp, ki, kd);
                }
            }
            Command::SetChemicalEnabled { chemical, enabled } => self.dosing.doser_mut(chemical).enabled = enabled,
            Command::SetChemicalMode { chemical, mode } => {
                self.dosing.doser_mut(chemical).set_mode(mode);
            }
            Command::SetChemicalDose { chemical, dose } => self.dosing.doser_mut(chemical).set_manual_dose(dose),
            Command::SetChemicalRatio { chemical, ratio } => self.dosing.doser_mut(chemical).set_ratio(ratio),
            Command::SetChemicalSetpoint { chemical, setpoint } => {
                self.dosing.doser_mut(chemical).set_setpoint(setpoint)
            }
            Command::SetPhSetpoint { value } => self.dosing.set_ph_setpoint(value),
            Command::SetFeedFraction { phase, value } => self.feed.set_fraction(phase, value),
            Command::LoadFeedPreset { preset } => self.feed = FeedProperties::preset(preset),
            Command::SetDisturbance { composition_variability } => {
                if composition_variability.is_finite() {
                    self.noise.variability = composition_variability.clamp(0.0, 1.0);
                }
            }
            Command::StartBatch { tank } => self.start_batch(&tank, events),
            Command::StopBatch => self.stop_batch(events),
            Command::SelectOilTank { tank } => match self.oil_tanks.iter().position(|t| t.id == tank) {
                Some(index) => self.selected_oil_tank = index,
                None => tracing::warn!("unknown oil tank {}", tank),
            },
            Command::TriggerBackwash => {
                if self.filter.trigger_backwash().is_some() {
                    self.note(events, format!("{} backwash started", self.filter.id));
                }
            }
            Command::SetFilterStatus { status } => {
                if self.filter.set_status(status).is_some() {
                    self.note(events, format!("{} backwash started", self.filter.id));
                }
            }
            Command::SetAutoBackwash { enabled } => self.filter.auto_backwash = enabled,
            Command::SetAqcEnabled { enabled } => self.aqc.set_enabled(enabled),
            Command::SetAqcMode { mode } => self.aqc.set_mode(mode),
            Command::ApplyAqcAction { action } => match self.aqc.apply(action, self.sim_time) {
                Some(action) => self.apply_aqc_action(&action, events),
                None => tracing::warn!("AQC action {:?} is not available", action),
            },
            Command::Reset => {
                events.clear();
                self.reset();
                events.push(Event::new(0.0, EventKind::Reset, "Simulation reset"));
            }
        }
    }

    fn start_batch(&mut self, tank_id: &str, events: &mut Vec<Event>) {
        if self.running {
            tracing::warn!("batch already running");
            return;
        }
        let Some(index) = self.feed_tanks.iter().position(|t| t.id == tank_id) else {
            tracing::warn!("unknown feed tank {}", tank_id);
            return;
        };
        if self.feed_tanks[index].volume <= EPS {
            self.note(events, format!("{} is empty, batch not started", tank_id));
            return;
        }
        if self
            .oil_tanks
            .get(self.selected_oil_tank)
            .is_some_and(|t| t.status == OilTankStatus::HighHigh)
        {
            self.note(events, "Selected oil tank at high-high level, batch not started".to_string());
            return;
        }

        let tank = &mut self.feed_tanks[index];
        tank.status = FeedTankStatus::Feeding;
        let volume = tank.volume;
        let name = format!("{} ({})", tank.id, tank.name);
        self.feed = FeedProperties::preset(tank.preset);

        self.source_tank = Some(index);
        self.balance = MassBalance::default();
        self.processed = 0.0;
        self.interlock = false;
        self.running = true;
        if let Some(phase) = self.sequencer.start(volume).cloned() {
            self.apply_phase(&phase);
        }

        tracing::info!("batch started from {}: {:.1} m³", name, volume);
        events.push(Event::new(
            self.sim_time,
            EventKind::Start,
            format!("Batch started from {name}, {volume:.1} m³"),
        ));
    }

    fn stop_batch(&mut self, events: &mut Vec<Event>) {
        if !self.running {
            return;
        }
        self.running = false;
        self.sequencer.stop();
        if let Some(tank) = self.source_tank.and_then(|i| self.feed_tanks.get_mut(i)) {
            tank.status = FeedTankStatus::Ready;
        }
        tracing::info!("batch stopped after {:.1} m³", self.processed);
        self.note(events, format!("Batch stopped after {:.1} m³", self.processed));
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let phase = self.sequencer.phase();
        ProcessSnapshot {
            sim_time: self.sim_time,
            running: self.running,
            interlock: self.interlock,
            feed: self.feed.clone(),
            process: self.process.clone(),
            heater: self.heater.clone(),
            feed_pump: self.feed_pump.clone(),
            centrifuge: self.centrifuge.clone(),
            loops: vec![self.tic.clone(), self.fic.clone(), self.sic.clone()],
            chemicals: self.dosing.dosers.clone(),
            chemical_state: self.dosing.state().clone(),
            ph_setpoint: self.dosing.ph_setpoint,
            filter: self.filter.clone(),
            feed_tanks: self.feed_tanks.clone(),
            oil_tanks: self.oil_tanks.clone(),
            selected_oil_tank: self
                .oil_tanks
                .get(self.selected_oil_tank)
                .map(|t| t.id.clone())
                .unwrap_or_default(),
            pond: self.pond.clone(),
            aqc: self.aqc.state().clone(),
            alarms: self.alarms.active(),
            pending_alarms: self.alarms.pending(),
            batch: BatchProgress {
                active: self.sequencer.active,
                source_tank: self
                    .source_tank
                    .and_then(|i| self.feed_tanks.get(i))
                    .map(|t| t.id.clone()),
                phase_index: self.sequencer.current,
                phase_name: phase.map(|p| p.name.clone()),
                pending_phase: self.sequencer.pending.map(|(index, _)| index),
                batch_volume: self.sequencer.batch_volume,
                processed: self.processed,
                remaining: self.sequencer.remaining(),
            },
            mass_balance: self.balance.clone(),
            mass_balance_closure: self.balance.closure(),
            totals: RunTotals {
                heater_energy: self.heater_energy,
                drive_energy: self.drive_energy,
                backwash_energy: self.filter.backwash_energy,
                backwash_water: self.filter.backwash_water,
                chemical_used: self.dosing.dosers.iter().map(|d| d.used).sum(),
                chemical_cost: self.dosing.total_cost(),
            },
            trend: self.trends.back().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quiet() -> EngineConfig {
        EngineConfig {
            disturbances: Disturbances::none(),
            ..Default::default()
        }
    }

    fn start(engine: &mut Engine) -> Vec<Event> {
        engine
            .step(0.0, vec![Command::StartBatch { tank: "TK-101".into() }])
            .1
    }

    #[test]
    fn start_batch_applies_first_phase() {
        let mut engine = Engine::new(quiet());
        let events = start(&mut engine);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Start);
        assert!(engine.is_running());
        assert_relative_eq!(engine.tic.setpoint, 70.0);
        assert_relative_eq!(engine.sic.setpoint, 4000.0);
        assert_relative_eq!(engine.feed.solids_fraction, 0.12, epsilon = 1e-9);
    }

    #[test]
    fn high_high_oil_tank_trips_once() {
        let mut engine = Engine::new(quiet());
        let tank = &mut engine.oil_tanks[0];
        tank.volume = tank.capacity * (tank.high_high / 100.0) - 1e-7;
        start(&mut engine);

        let mut interlocks = 0;
        for _ in 0..60 {
            let (snapshot, events) = engine.step(1.0, Vec::new());
            interlocks += events.iter().filter(|e| e.kind == EventKind::Interlock).count();
            if snapshot.interlock {
                assert!(!snapshot.running);
            }
        }
        assert_eq!(interlocks, 1);
        assert!(!engine.is_running());
        assert!(engine.interlock);
    }

    #[test]
    fn auto_aqc_raises_heater_on_critical_oiw() {
        let mut config = quiet();
        config.aqc.mode = AqcMode::Auto;
        config.filter.base_oil_removal = 0.0;
        let mut engine = Engine::new(config);
        start(&mut engine);
        let heater_sp = engine.tic.setpoint;

        let (snapshot, events) = engine.step(1.0, Vec::new());
        assert!(snapshot.filter.outlet_oiw > 27.0);
        assert!(events.iter().any(|e| e.kind == EventKind::Aqc));
        assert_relative_eq!(engine.tic.setpoint, heater_sp + 2.0);
        assert!(engine.aqc.cooldown(ActionKind::IncreaseHeater) > 0.0);
    }

    #[test]
    fn advisory_action_applies_on_command() {
        let mut config = quiet();
        config.filter.base_oil_removal = 0.0;
        let mut engine = Engine::new(config);
        start(&mut engine);
        engine.step(1.0, Vec::new());
        let flow_sp = engine.fic.setpoint;
        engine.step(
            0.0,
            vec![Command::ApplyAqcAction { action: ActionKind::ReduceFeedFlow }],
        );
        assert_relative_eq!(engine.fic.setpoint, flow_sp - 1.0);
    }

    #[test]
    fn loops_hold_while_stopped() {
        let mut engine = Engine::new(quiet());
        for _ in 0..50 {
            engine.step(1.0, Vec::new());
        }
        assert_relative_eq!(engine.tic.output(), 50.0);
        assert_eq!(engine.feed_pump.flow_rate, 0.0);
        assert_eq!(engine.centrifuge.bowl_speed, 0.0);
    }

    #[test]
    fn step_sanitises_dt() {
        let mut engine = Engine::new(quiet());
        engine.step(f64::NAN, Vec::new());
        assert_eq!(engine.sim_time(), 0.0);
        engine.step(-3.0, Vec::new());
        assert_eq!(engine.sim_time(), 0.0);
        engine.step(600.0, Vec::new());
        assert_relative_eq!(engine.sim_time(), engine.max_step());
    }

    #[test]
    fn largest_scheduler_frame_is_integrated_whole() {
        let mut engine = Engine::new(quiet());
        let frame = SchedulerConfig::default().max_frame();
        engine.step(frame, Vec::new());
        assert_relative_eq!(engine.sim_time(), frame);
        assert_relative_eq!(engine.sim_time(), 25.0);
    }

    #[test]
    fn max_step_follows_scheduler_config() {
        let mut config = quiet();
        config.scheduler.max_speed = 100.0;
        assert_relative_eq!(Engine::new(config.clone()).max_step(), 50.0);
        config.scheduler.nominal_tick = f64::NAN;
        assert_relative_eq!(Engine::new(config).max_step(), 25.0);
    }

    #[test]
    fn full_pond_overflow_is_reported_once() {
        let mut config = quiet();
        config.pond.capacity = 1500.0;
        config.pond.evaporation = 0.0;
        let mut engine = Engine::new(config);
        start(&mut engine);

        let mut notes = 0;
        for _ in 0..20 {
            let (_, events) = engine.step(1.0, Vec::new());
            notes += events
                .iter()
                .filter(|e| e.kind == EventKind::Note && e.description.contains("overflowing"))
                .count();
        }
        let snapshot = engine.snapshot();
        assert_eq!(notes, 1);
        assert!(snapshot.pond.overflowing);
        assert!(snapshot.pond.overflow > 0.0);
        assert_relative_eq!(snapshot.pond.volume, 1500.0);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut engine = Engine::new(quiet());
        start(&mut engine);
        for _ in 0..30 {
            engine.step(1.0, Vec::new());
        }
        engine.step(0.0, vec![Command::StopBatch]);
        assert!(engine.events().count() >= 2);

        let (snapshot, events) = engine.step(0.0, vec![Command::Reset]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Reset);
        assert!(!snapshot.running);
        assert_eq!(snapshot.sim_time, 0.0);
        assert_relative_eq!(snapshot.feed_tanks[0].volume, 55.0);
        assert_relative_eq!(snapshot.loops[0].setpoint, 65.0);
        assert_relative_eq!(snapshot.loops[0].output(), 50.0);
        assert!(snapshot.alarms.is_empty() && snapshot.pending_alarms.is_empty());
        assert!(snapshot.aqc.history.is_empty());
        // Only the reset itself survives in the log
        assert_eq!(engine.events().count(), 1);
    }

    #[test]
    fn reset_keeps_the_configured_scheduler_limits() {
        let mut config = quiet();
        config.scheduler.max_speed = 10.0;
        let mut engine = Engine::new(config);
        engine.step(0.0, vec![Command::Reset]);
        assert_relative_eq!(engine.max_step(), 5.0);
        assert_eq!(engine.config().scheduler.max_speed, 10.0);
    }

    #[test]
    fn first_tick_uses_fallback_chemistry() {
        let mut engine = Engine::new(quiet());
        assert!(!engine.chemistry_primed);
        engine.step(0.1, Vec::new());
        assert!(engine.chemistry_primed);
    }

    #[test]
    fn trend_points_every_five_seconds() {
        let mut engine = Engine::new(quiet());
        for _ in 0..100 {
            engine.step(0.5, Vec::new());
        }
        // t = 5, 10 .. 50
        assert_eq!(engine.trends().count(), 10);
    }

    #[test]
    fn commands_round_trip_through_json() {
        let json = r#"{"type":"set_setpoint","args":{"loop_id":"speed","value":4200.0}}"#;
        let command: Command = serde_json::from_str(json).expect("valid command");
        let mut engine = Engine::new(quiet());
        engine.step(0.0, vec![command]);
        assert_relative_eq!(engine.sic.setpoint, 4200.0);
    }

    #[test]
    fn float_and_unit_commands_parse() {
        let commands: Vec<Command> = serde_json::from_str(
            r#"[
                {"type":"set_chemical_dose","args":{"chemical":"demulsifier","dose":62.5}},
                {"type":"set_ph_setpoint","args":{"value":7.2}},
                {"type":"set_disturbance","args":{"composition_variability":0.25}},
                {"type":"trigger_backwash"},
                {"type":"stop_batch"}
            ]"#,
        )
        .expect("valid commands");
        assert_eq!(commands.len(), 5);

        let mut engine = Engine::new(quiet());
        engine.step(0.0, commands);
        assert_relative_eq!(engine.dosing.doser(ChemicalKind::Demulsifier).manual_dose, 62.5);
        assert_relative_eq!(engine.dosing.ph_setpoint, 7.2);
        assert_relative_eq!(engine.noise.variability, 0.25);
    }

    #[test]
    fn command_serialises_with_args() {
        let command = Command::SetSetpoint { loop_id: LoopId::Flow, value: 10.0 };
        let json = serde_json::to_value(&command).expect("serialisable");
        assert_eq!(json["type"], "set_setpoint");
        assert_eq!(json["args"]["loop_id"], "flow");
    }
}
