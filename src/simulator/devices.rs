use super::feed::EquipmentSpec;
use serde::{Deserialize, Serialize};

/// Volumetric heat capacity of the feed, J/(m³·K)
const FEED_RHO_CP: f64 = 3.9e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HeaterStatus {
    Off,
    Heating,
    Steady,
    Overheat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heater {
    pub id: String,
    pub outlet_temperature: f64,
    pub duty: f64,
    pub power_kw: f64,
    pub status: HeaterStatus,
}

impl Heater {
    pub fn new(id: &str, inlet_temperature: f64) -> Self {
        Self {
            id: id.to_string(),
            outlet_temperature: inlet_temperature,
            duty: 0.0,
            power_kw: 0.0,
            status: HeaterStatus::Off,
        }
    }

    pub fn tick(&mut self, dt: f64, duty: f64, inlet_temperature: f64, flow_m3h: f64, spec: &EquipmentSpec) {
        self.duty = duty.clamp(0.0, 100.0);
        self.power_kw = spec.heater_rated_kw * self.duty / 100.0;

        let flow_m3s = (flow_m3h / 3600.0).max(1e-4);
        let rise = self.power_kw * 1000.0 * spec.heater_efficiency / (flow_m3s * FEED_RHO_CP);
        let target = (inlet_temperature + rise).min(spec.heater_max_outlet);

        // First-order lag toward the steady outlet temperature
        let alpha = (dt / spec.heater_time_constant).clamp(0.0, 1.0);
        self.outlet_temperature += (target - self.outlet_temperature) * alpha;
        self.outlet_temperature = self.outlet_temperature.clamp(0.0, spec.heater_max_outlet.max(inlet_temperature));

        self.status = if self.duty < 1.0 {
            HeaterStatus::Off
        } else if self.outlet_temperature >= spec.heater_max_outlet - 0.5 {
            HeaterStatus::Overheat
        } else if (target - self.outlet_temperature).abs() > 0.5 {
            HeaterStatus::Heating
        } else {
            HeaterStatus::Steady
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PumpStatus {
    Stopped,
    Running,
    Low,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPump {
    pub id: String,
    pub flow_rate: f64,
    pub speed: f64,
    pub status: PumpStatus,
}

impl FeedPump {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            flow_rate: 0.0,
            speed: 0.0,
            status: PumpStatus::Stopped,
        }
    }

    pub fn tick(&mut self, dt: f64, speed: f64, spec: &EquipmentSpec) {
        self.speed = speed.clamp(0.0, 100.0);
        let target = spec.max_flow * self.speed / 100.0;
        let alpha = (dt / spec.pump_time_constant).clamp(0.0, 1.0);
        self.flow_rate += (target - self.flow_rate) * alpha;
        self.flow_rate = self.flow_rate.clamp(0.0, spec.max_flow);

        self.status = if self.flow_rate < 0.01 {
            PumpStatus::Stopped
        } else if self.flow_rate < spec.min_flow {
            PumpStatus::Low
        } else if self.flow_rate > spec.max_flow * 0.98 {
            PumpStatus::High
        } else {
            PumpStatus::Running
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CentrifugeStatus {
    Stopped,
    Accelerating,
    Running,
    Decelerating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Centrifuge {
    pub id: String,
    pub bowl_speed: f64,
    pub drive_output: f64,
    pub status: CentrifugeStatus,
}

impl Centrifuge {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            bowl_speed: 0.0,
            drive_output: 0.0,
            status: CentrifugeStatus::Stopped,
        }
    }

    /// `running == false` spins the bowl down regardless of drive output.
    pub fn tick(&mut self, dt: f64, drive_output: f64, running: bool, spec: &EquipmentSpec) {
        self.drive_output = drive_output.clamp(0.0, 100.0);
        let target = if running {
            spec.min_rpm + (spec.max_rpm - spec.min_rpm) * self.drive_output / 100.0
        } else {
            0.0
        };

        // Ramp toward target at the drive's rate limit
        let diff = target - self.bowl_speed;
        let step = spec.rpm_ramp_rate * dt.max(0.0);
        if diff.abs() > step {
            self.bowl_speed += diff.signum() * step;
            self.status = if diff > 0.0 {
                CentrifugeStatus::Accelerating
            } else {
                CentrifugeStatus::Decelerating
            };
        } else {
            self.bowl_speed = target;
            self.status = if target > 0.0 {
                CentrifugeStatus::Running
            } else {
                CentrifugeStatus::Stopped
            };
        }
        self.bowl_speed = self.bowl_speed.clamp(0.0, spec.max_rpm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heater_tracks_steady_rise() {
        let spec = EquipmentSpec::default();
        let mut heater = Heater::new("E-101", 25.0);
        for _ in 0..6000 {
            heater.tick(0.1, 50.0, 25.0, 12.0, &spec);
        }
        // 450 kW · 0.9 over 12 m³/h
        let expected = 25.0 + 450_000.0 * 0.9 / (12.0 / 3600.0 * FEED_RHO_CP);
        assert!((heater.outlet_temperature - expected).abs() < 0.5);
        assert_eq!(heater.status, HeaterStatus::Steady);
    }

    #[test]
    fn heater_caps_at_max_outlet_with_no_flow() {
        let spec = EquipmentSpec::default();
        let mut heater = Heater::new("E-101", 25.0);
        for _ in 0..10_000 {
            heater.tick(1.0, 100.0, 25.0, 0.0, &spec);
        }
        assert!(heater.outlet_temperature <= spec.heater_max_outlet);
        assert_eq!(heater.status, HeaterStatus::Overheat);
    }

    #[test]
    fn pump_approaches_commanded_flow() {
        let spec = EquipmentSpec::default();
        let mut pump = FeedPump::new("P-101");
        for _ in 0..1000 {
            pump.tick(0.1, 80.0, &spec);
        }
        assert!((pump.flow_rate - 12.0).abs() < 0.01);
        assert_eq!(pump.status, PumpStatus::Running);
    }

    #[test]
    fn centrifuge_ramps_and_spins_down() {
        let spec = EquipmentSpec::default();
        let mut bowl = Centrifuge::new("CF-101");
        bowl.tick(1.0, 100.0, true, &spec);
        assert_eq!(bowl.bowl_speed, 50.0);
        assert_eq!(bowl.status, CentrifugeStatus::Accelerating);
        for _ in 0..200 {
            bowl.tick(1.0, 100.0, true, &spec);
        }
        assert_eq!(bowl.bowl_speed, spec.max_rpm);
        for _ in 0..200 {
            bowl.tick(1.0, 100.0, false, &spec);
        }
        assert_eq!(bowl.bowl_speed, 0.0);
        assert_eq!(bowl.status, CentrifugeStatus::Stopped);
    }
}
