use serde::{Deserialize, Serialize};

/// Errors smaller than this hold the last output.
pub const DEADBAND: f64 = 0.5;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LoopMode {
    Auto,
    Man,
}

/// Direct-acting loops raise output when PV is below SP; reverse-acting
/// loops (dosing against a contaminant) raise output when PV is above SP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Action {
    Direct,
    Reverse,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Gains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

/// PID primitive with a 50 % bias, explicit deadband and integral clamp.
///
/// The derivative acts on error, so a setpoint step produces a kick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pid {
    pub gains: Gains,
    pub action: Action,
    pub integral: f64,
    pub last_error: f64,
    pub output: f64,
}

impl Pid {
    pub fn new(gains: Gains, action: Action) -> Self {
        Self {
            gains,
            action,
            integral: 0.0,
            last_error: 0.0,
            output: 50.0,
        }
    }

    pub fn integral_limit(&self) -> f64 {
        50.0 / self.gains.ki.abs().max(EPS)
    }

    pub fn update(&mut self, setpoint: f64, pv: f64, dt: f64) -> f64 {
        if dt <= 0.0 || !pv.is_finite() || !setpoint.is_finite() {
            return self.output;
        }

        let error = match self.action {
            Action::Direct => setpoint - pv,
            Action::Reverse => pv - setpoint,
        };

        if error.abs() < DEADBAND {
            return self.output;
        }

        let limit = self.integral_limit();
        self.integral = (self.integral + error * dt).clamp(-limit, limit);

        let derivative = (error - self.last_error) / dt.max(EPS);
        self.last_error = error;

        let Gains { kp, ki, kd } = self.gains;
        self.output = (50.0 + kp * error + ki * self.integral + kd * derivative).clamp(0.0, 100.0);
        self.output
    }
}

/// One of the three main loops: TIC, FIC or SIC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlLoop {
    pub tag: String,
    pub pv: f64,
    pub setpoint: f64,
    pub mode: LoopMode,
    pub sp_min: f64,
    pub sp_max: f64,
    pub pid: Pid,
}

impl ControlLoop {
    pub fn new(tag: &str, setpoint: f64, sp_min: f64, sp_max: f64, gains: Gains) -> Self {
        Self {
            tag: tag.to_string(),
            pv: 0.0,
            setpoint: setpoint.clamp(sp_min, sp_max),
            mode: LoopMode::Auto,
            sp_min,
            sp_max,
            pid: Pid::new(gains, Action::Direct),
        }
    }

    pub fn output(&self) -> f64 {
        self.pid.output
    }

    pub fn set_setpoint(&mut self, value: f64) {
        if value.is_finite() {
            self.setpoint = value.clamp(self.sp_min, self.sp_max);
        }
    }

    /// Only takes effect in manual; auto owns the output.
    pub fn set_output(&mut self, value: f64) {
        if self.mode == LoopMode::Man && value.is_finite() {
            self.pid.output = value.clamp(0.0, 100.0);
        }
    }

    /// Switching modes leaves the output where it was.
    pub fn set_mode(&mut self, mode: LoopMode) {
        self.mode = mode;
    }

    pub fn update(&mut self, pv: f64, dt: f64) -> f64 {
        self.pv = pv;
        match self.mode {
            LoopMode::Man => self.pid.output,
            LoopMode::Auto => self.pid.update(self.setpoint, pv, dt),
        }
    }
}
