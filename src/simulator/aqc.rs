//! Automatic quality control: grades the polished water against discharge
//! limits and proposes prioritised corrective actions.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const HISTORY_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AqcMode {
    Monitor,
    Advisory,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum QualityStatus {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AqcStatus {
    Ok,
    Warning,
    Correcting,
    Alarm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityParameter {
    Oiw,
    Trh,
    Cod,
    Turbidity,
    Ph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    IncreaseHeater,
    IncreaseBowlSpeed,
    ReduceFeedFlow,
    IncreaseDemulsifier,
    IncreaseFlocculant,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::IncreaseHeater,
        ActionKind::IncreaseBowlSpeed,
        ActionKind::ReduceFeedFlow,
        ActionKind::IncreaseDemulsifier,
        ActionKind::IncreaseFlocculant,
    ];

    fn index(self) -> usize {
        match self {
            ActionKind::IncreaseHeater => 0,
            ActionKind::IncreaseBowlSpeed => 1,
            ActionKind::ReduceFeedFlow => 2,
            ActionKind::IncreaseDemulsifier => 3,
            ActionKind::IncreaseFlocculant => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AqcLimits {
    /// ppm
    pub oiw: f64,
    /// mg/L
    pub trh: f64,
    pub cod: f64,
    /// NTU
    pub turbidity: f64,
    pub ph_min: f64,
    pub ph_max: f64,
    /// % of limit
    pub warning: f64,
    pub critical: f64,
}

impl Default for AqcLimits {
    fn default() -> Self {
        Self {
            oiw: 30.0,
            trh: 50.0,
            cod: 1000.0,
            turbidity: 50.0,
            ph_min: 6.0,
            ph_max: 9.0,
            warning: 70.0,
            critical: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionTuning {
    pub heater_step: f64,
    pub heater_cap: f64,
    pub speed_step: f64,
    pub flow_step: f64,
    pub trim_step: f64,
    pub trim_cap: f64,
    /// s
    pub heater_cooldown: f64,
    pub speed_cooldown: f64,
    pub flow_cooldown: f64,
    pub demulsifier_cooldown: f64,
    pub flocculant_cooldown: f64,
}

impl Default for ActionTuning {
    fn default() -> Self {
        Self {
            heater_step: 2.0,
            heater_cap: 85.0,
            speed_step: 200.0,
            flow_step: 1.0,
            trim_step: 0.1,
            trim_cap: 2.0,
            heater_cooldown: 300.0,
            speed_cooldown: 180.0,
            flow_cooldown: 240.0,
            demulsifier_cooldown: 120.0,
            flocculant_cooldown: 120.0,
        }
    }
}

impl ActionTuning {
    fn cooldown(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::IncreaseHeater => self.heater_cooldown,
            ActionKind::IncreaseBowlSpeed => self.speed_cooldown,
            ActionKind::ReduceFeedFlow => self.flow_cooldown,
            ActionKind::IncreaseDemulsifier => self.demulsifier_cooldown,
            ActionKind::IncreaseFlocculant => self.flocculant_cooldown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AqcConfig {
    pub enabled: bool,
    pub mode: AqcMode,
    pub limits: AqcLimits,
    pub actions: ActionTuning,
}

impl Default for AqcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: AqcMode::Advisory,
            limits: AqcLimits::default(),
            actions: ActionTuning::default(),
        }
    }
}

/// Current plant values AQC reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct AqcInputs {
    pub oiw: f64,
    pub trh: f64,
    pub cod: f64,
    pub turbidity: f64,
    pub ph: f64,
    pub heater_setpoint: f64,
    pub speed_setpoint: f64,
    pub speed_max: f64,
    pub flow_setpoint: f64,
    pub flow_min: f64,
    pub demulsifier_trim: f64,
    pub flocculant_enabled: bool,
    pub flocculant_trim: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterAssessment {
    pub parameter: QualityParameter,
    pub value: f64,
    pub limit: f64,
    pub pct_of_limit: f64,
    pub status: QualityStatus,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AqcAction {
    pub kind: ActionKind,
    /// 1 is most urgent
    pub priority: u8,
    /// New setpoint, trim multiplier, or 1.0 to enable the flocculant
    pub target: f64,
    pub ready: bool,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AqcRecord {
    pub sim_time: f64,
    pub kind: ActionKind,
    pub automatic: bool,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AqcState {
    pub enabled: bool,
    pub mode: AqcMode,
    pub status: AqcStatus,
    pub quality_score: f64,
    pub assessments: Vec<ParameterAssessment>,
    pub actions: Vec<AqcAction>,
    pub cooldowns: [f64; 5],
    pub history: VecDeque<AqcRecord>,
}

pub struct AqcController {
    config: AqcConfig,
    state: AqcState,
}

impl AqcController {
    pub fn new(config: AqcConfig) -> Self {
        let state = AqcState {
            enabled: config.enabled,
            mode: config.mode,
            status: AqcStatus::Ok,
            quality_score: 100.0,
            assessments: Vec::new(),
            actions: Vec::new(),
            cooldowns: [0.0; 5],
            history: VecDeque::new(),
        };
        Self { config, state }
    }

    pub fn state(&self) -> &AqcState {
        &self.state
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
        if !enabled {
            self.state.actions.clear();
            self.state.status = AqcStatus::Ok;
        }
    }

    pub fn set_mode(&mut self, mode: AqcMode) {
        self.state.mode = mode;
    }

    pub fn cooldown(&self, kind: ActionKind) -> f64 {
        self.state.cooldowns[kind.index()]
    }

    fn assess(&self, parameter: QualityParameter, value: f64) -> ParameterAssessment {
        let limits = &self.config.limits;
        let (limit, pct) = match parameter {
            QualityParameter::Oiw => (limits.oiw, value / limits.oiw.max(1e-9) * 100.0),
            QualityParameter::Trh => (limits.trh, value / limits.trh.max(1e-9) * 100.0),
            QualityParameter::Cod => (limits.cod, value / limits.cod.max(1e-9) * 100.0),
            QualityParameter::Turbidity => (limits.turbidity, value / limits.turbidity.max(1e-9) * 100.0),
            QualityParameter::Ph => {
                let mid = 0.5 * (limits.ph_min + limits.ph_max);
                let half = (0.5 * (limits.ph_max - limits.ph_min)).max(1e-9);
                (limits.ph_max, (value - mid).abs() / half * 100.0)
            }
        };
        let pct = if pct.is_finite() { pct.max(0.0) } else { 0.0 };
        let status = if pct >= limits.critical {
            QualityStatus::Critical
        } else if pct >= limits.warning {
            QualityStatus::Warning
        } else {
            QualityStatus::Ok
        };
        ParameterAssessment {
            parameter,
            value,
            limit,
            pct_of_limit: pct,
            status,
            score: (100.0 - pct).max(0.0),
        }
    }

    fn candidates(&self, inputs: &AqcInputs, oil: QualityStatus, turbidity: QualityStatus) -> Vec<AqcAction> {
        let tuning = &self.config.actions;
        let ready = |kind: ActionKind| self.state.cooldowns[kind.index()] <= 0.0;
        let mut actions = Vec::new();

        if oil != QualityStatus::Ok {
            let critical = oil == QualityStatus::Critical;
            let (heater, speed, flow, demulsifier) = if critical { (1, 2, 3, 4) } else { (2, 3, 4, 1) };

            if inputs.heater_setpoint < tuning.heater_cap {
                let target = (inputs.heater_setpoint + tuning.heater_step).min(tuning.heater_cap);
                actions.push(AqcAction {
                    kind: ActionKind::IncreaseHeater,
                    priority: heater,
                    target,
                    ready: ready(ActionKind::IncreaseHeater),
                    description: format!("Raise TIC-101 setpoint to {target:.1} °C"),
                });
            }
            if inputs.speed_setpoint < inputs.speed_max {
                let target = (inputs.speed_setpoint + tuning.speed_step).min(inputs.speed_max);
                actions.push(AqcAction {
                    kind: ActionKind::IncreaseBowlSpeed,
                    priority: speed,
                    target,
                    ready: ready(ActionKind::IncreaseBowlSpeed),
                    description: format!("Raise SIC-101 setpoint to {target:.0} rpm"),
                });
            }
            if inputs.flow_setpoint > inputs.flow_min {
                let target = (inputs.flow_setpoint - tuning.flow_step).max(inputs.flow_min);
                actions.push(AqcAction {
                    kind: ActionKind::ReduceFeedFlow,
                    priority: flow,
                    target,
                    ready: ready(ActionKind::ReduceFeedFlow),
                    description: format!("Reduce FIC-101 setpoint to {target:.1} m³/h"),
                });
            }
            if inputs.demulsifier_trim < tuning.trim_cap {
                let target = (inputs.demulsifier_trim + tuning.trim_step).min(tuning.trim_cap);
                actions.push(AqcAction {
                    kind: ActionKind::IncreaseDemulsifier,
                    priority: demulsifier,
                    target,
                    ready: ready(ActionKind::IncreaseDemulsifier),
                    description: format!("Increase demulsifier dose to {:.0}% of demand", target * 100.0),
                });
            }
        }

        if turbidity != QualityStatus::Ok && (!inputs.flocculant_enabled || inputs.flocculant_trim < tuning.trim_cap) {
            let priority = if turbidity == QualityStatus::Critical { 1 } else { 3 };
            let (target, description) = if inputs.flocculant_enabled {
                let target = (inputs.flocculant_trim + tuning.trim_step).min(tuning.trim_cap);
                (target, format!("Increase flocculant dose to {:.0}% of demand", target * 100.0))
            } else {
                (1.0, "Enable flocculant dosing".to_string())
            };
            actions.push(AqcAction {
                kind: ActionKind::IncreaseFlocculant,
                priority,
                target,
                ready: ready(ActionKind::IncreaseFlocculant),
                description,
            });
        }

        // Stable sort keeps the heater ahead of the flocculant on ties
        actions.sort_by_key(|a| a.priority);
        actions
    }

    /// Advances cooldowns, grades quality and refreshes the action list.
    ///
    /// In AUTO mode returns the action to apply this tick, with its cooldown
    /// already restarted.
    pub fn evaluate(&mut self, dt: f64, sim_time: f64, running: bool, inputs: &AqcInputs) -> Option<AqcAction> {
        for cooldown in self.state.cooldowns.iter_mut() {
            *cooldown = (*cooldown - dt.max(0.0)).max(0.0);
        }
        if !self.state.enabled {
            return None;
        }

        self.state.assessments = vec![
            self.assess(QualityParameter::Oiw, inputs.oiw),
            self.assess(QualityParameter::Trh, inputs.trh),
            self.assess(QualityParameter::Cod, inputs.cod),
            self.assess(QualityParameter::Turbidity, inputs.turbidity),
            self.assess(QualityParameter::Ph, inputs.ph),
        ];
        let status_of = |p: QualityParameter| {
            self.state
                .assessments
                .iter()
                .find(|a| a.parameter == p)
                .map_or(QualityStatus::Ok, |a| a.status)
        };
        let oil = status_of(QualityParameter::Oiw).max(status_of(QualityParameter::Trh));
        let turbidity = status_of(QualityParameter::Turbidity);
        let worst = self
            .state
            .assessments
            .iter()
            .map(|a| a.status)
            .max()
            .unwrap_or(QualityStatus::Ok);
        self.state.quality_score =
            self.state.assessments.iter().map(|a| a.score).sum::<f64>() / self.state.assessments.len() as f64;
        self.state.actions = self.candidates(inputs, oil, turbidity);

        let mut applied = None;
        if self.state.mode == AqcMode::Auto && running {
            if let Some(action) = self.state.actions.iter().find(|a| a.ready).cloned() {
                tracing::info!("AQC auto action: {}", action.description);
                self.commit(&action, sim_time, true);
                applied = Some(action);
            }
        }

        let correcting = self.state.mode == AqcMode::Auto && self.state.cooldowns.iter().any(|&c| c > 0.0);
        self.state.status = match worst {
            QualityStatus::Critical => AqcStatus::Alarm,
            QualityStatus::Warning if correcting => AqcStatus::Correcting,
            QualityStatus::Warning => AqcStatus::Warning,
            QualityStatus::Ok => AqcStatus::Ok,
        };
        applied
    }

    /// Operator application of a surfaced action.
    pub fn apply(&mut self, kind: ActionKind, sim_time: f64) -> Option<AqcAction> {
        let action = self.state.actions.iter().find(|a| a.kind == kind && a.ready).cloned()?;
        self.commit(&action, sim_time, false);
        Some(action)
    }

    fn commit(&mut self, action: &AqcAction, sim_time: f64, automatic: bool) {
        self.state.cooldowns[action.kind.index()] = self.config.actions.cooldown(action.kind).max(0.0);
        for candidate in self.state.actions.iter_mut().filter(|a| a.kind == action.kind) {
            candidate.ready = false;
        }
        if self.state.history.len() == HISTORY_LEN {
            self.state.history.pop_front();
        }
        self.state.history.push_back(AqcRecord {
            sim_time,
            kind: action.kind,
            automatic,
            description: action.description.clone(),
        });
    }
}
