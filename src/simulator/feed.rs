use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Water,
    Oil,
    Solids,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPreset {
    RefinerySlop,
    TankBottoms,
    LightEmulsion,
}

/// Percentile diameters in microns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizeDistribution {
    pub d10: f64,
    pub d50: f64,
    pub d90: f64,
}

impl SizeDistribution {
    pub fn span(&self) -> f64 {
        self.d90.max(1e-6) / self.d10.max(1e-6)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedProperties {
    pub water_fraction: f64,
    pub oil_fraction: f64,
    pub solids_fraction: f64,

    /// kg/m³
    pub water_density: f64,
    pub oil_density: f64,
    pub solids_density: f64,

    pub oil_droplets: SizeDistribution,
    pub solids_particles: SizeDistribution,
    pub oil_sphericity: f64,
    pub solids_sphericity: f64,

    /// Continuous phase, mPa·s at 25 °C
    pub viscosity: f64,
    /// 1/°C
    pub viscosity_temp_coeff: f64,
    /// Pa
    pub yield_stress: f64,
    pub flow_behavior_index: f64,

    /// 0-1
    pub emulsion_stability: f64,
    /// mN/m
    pub interfacial_tension: f64,

    pub demulsifier_baseline: f64,
    pub demulsifier_efficacy: f64,
    pub flocculant_baseline: f64,
    pub flocculant_efficacy: f64,

    /// mg/L
    pub salinity: f64,
    /// volume fraction
    pub dissolved_gas: f64,

    pub max_packing_fraction: f64,
    pub hindered_settling_exp: f64,

    pub temperature: f64,
    pub ph: f64,
    /// mg/L as CaCO3
    pub alkalinity: f64,
    pub calcium_hardness: f64,
    pub fines_sensitivity: f64,
    /// mg/L
    pub background_cod: f64,
}

impl Default for FeedProperties {
    fn default() -> Self {
        Self::preset(FeedPreset::RefinerySlop)
    }
}

impl FeedProperties {
    pub fn preset(preset: FeedPreset) -> Self {
        let slop = Self {
            water_fraction: 0.75,
            oil_fraction: 0.20,
            solids_fraction: 0.05,
            water_density: 1000.0,
            oil_density: 890.0,
            solids_density: 2650.0,
            oil_droplets: SizeDistribution { d10: 8.0, d50: 25.0, d90: 60.0 },
            solids_particles: SizeDistribution { d10: 20.0, d50: 80.0, d90: 200.0 },
            oil_sphericity: 1.0,
            solids_sphericity: 0.8,
            viscosity: 1.0,
            viscosity_temp_coeff: 0.02,
            yield_stress: 0.0,
            flow_behavior_index: 1.0,
            emulsion_stability: 0.3,
            interfacial_tension: 25.0,
            demulsifier_baseline: 50.0,
            demulsifier_efficacy: 0.7,
            flocculant_baseline: 0.0,
            flocculant_efficacy: 0.8,
            salinity: 35_000.0,
            dissolved_gas: 0.02,
            max_packing_fraction: 0.64,
            hindered_settling_exp: 4.65,
            temperature: 25.0,
            ph: 6.8,
            alkalinity: 200.0,
            calcium_hardness: 400.0,
            fines_sensitivity: 0.5,
            background_cod: 250.0,
        };

        match preset {
            FeedPreset::RefinerySlop => slop,
            FeedPreset::TankBottoms => Self {
                water_fraction: 0.68,
                oil_fraction: 0.14,
                solids_fraction: 0.18,
                oil_density: 920.0,
                oil_droplets: SizeDistribution { d10: 5.0, d50: 18.0, d90: 50.0 },
                solids_particles: SizeDistribution { d10: 8.0, d50: 45.0, d90: 160.0 },
                viscosity: 1.6,
                yield_stress: 4.0,
                flow_behavior_index: 0.8,
                emulsion_stability: 0.55,
                fines_sensitivity: 0.9,
                background_cod: 420.0,
                ..slop
            },
            FeedPreset::LightEmulsion => Self {
                water_fraction: 0.92,
                oil_fraction: 0.07,
                solids_fraction: 0.01,
                oil_density: 860.0,
                oil_droplets: SizeDistribution { d10: 3.0, d50: 12.0, d90: 35.0 },
                emulsion_stability: 0.6,
                interfacial_tension: 15.0,
                dissolved_gas: 0.05,
                salinity: 12_000.0,
                background_cod: 180.0,
                ..slop
            },
        }
    }

    /// Sets one fraction and rescales the other two so the total stays 1.
    pub fn set_fraction(&mut self, phase: Phase, value: f64) {
        let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { return };
        let (a, b) = match phase {
            Phase::Water => (self.oil_fraction, self.solids_fraction),
            Phase::Oil => (self.water_fraction, self.solids_fraction),
            Phase::Solids => (self.water_fraction, self.oil_fraction),
        };
        let rest = 1.0 - value;
        let (a, b) = if a + b > 1e-12 {
            (rest * a / (a + b), rest * b / (a + b))
        } else {
            (rest / 2.0, rest / 2.0)
        };
        match phase {
            Phase::Water => {
                self.water_fraction = value;
                self.oil_fraction = a;
                self.solids_fraction = b;
            }
            Phase::Oil => {
                self.oil_fraction = value;
                self.water_fraction = a;
                self.solids_fraction = b;
            }
            Phase::Solids => {
                self.solids_fraction = value;
                self.water_fraction = a;
                self.oil_fraction = b;
            }
        }
    }

    pub fn set_fractions(&mut self, water: f64, oil: f64, solids: f64) {
        self.water_fraction = water;
        self.oil_fraction = oil;
        self.solids_fraction = solids;
        self.normalize();
    }

    /// Clamps negatives and rescales to a unit sum; all-zero becomes pure water.
    pub fn normalize(&mut self) {
        let clean = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };
        let (w, o, s) = (clean(self.water_fraction), clean(self.oil_fraction), clean(self.solids_fraction));
        let total = w + o + s;
        if total < 1e-12 {
            self.water_fraction = 1.0;
            self.oil_fraction = 0.0;
            self.solids_fraction = 0.0;
        } else {
            self.water_fraction = w / total;
            self.oil_fraction = o / total;
            self.solids_fraction = s / total;
        }
    }

    pub fn fraction_sum(&self) -> f64 {
        self.water_fraction + self.oil_fraction + self.solids_fraction
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentSpec {
    pub heater_rated_kw: f64,
    pub heater_efficiency: f64,
    pub heater_max_outlet: f64,
    pub heater_time_constant: f64,

    /// mm
    pub bowl_diameter: f64,
    pub bowl_length: f64,
    pub pool_fraction: f64,
    pub min_rpm: f64,
    pub max_rpm: f64,
    /// rpm/s
    pub rpm_ramp_rate: f64,

    /// m³/h
    pub min_flow: f64,
    pub max_flow: f64,
    pub pump_time_constant: f64,

    pub drive_rated_kw: f64,
    pub drive_efficiency: f64,
    /// 0-1
    pub bearing_condition: f64,

    /// m³
    pub conditioning_tank_volume: f64,
}

impl Default for EquipmentSpec {
    fn default() -> Self {
        Self {
            heater_rated_kw: 900.0,
            heater_efficiency: 0.9,
            heater_max_outlet: 95.0,
            heater_time_constant: 60.0,
            bowl_diameter: 400.0,
            bowl_length: 1100.0,
            pool_fraction: 0.30,
            min_rpm: 1500.0,
            max_rpm: 5000.0,
            rpm_ramp_rate: 50.0,
            min_flow: 2.0,
            max_flow: 15.0,
            pump_time_constant: 5.0,
            drive_rated_kw: 45.0,
            drive_efficiency: 0.92,
            bearing_condition: 0.95,
            conditioning_tank_volume: 2.0,
        }
    }
}

impl EquipmentSpec {
    /// Swaps inverted ranges and floors ratings so later divisions are safe.
    pub fn sanitized(mut self) -> Self {
        if self.min_rpm > self.max_rpm {
            std::mem::swap(&mut self.min_rpm, &mut self.max_rpm);
        }
        if self.min_flow > self.max_flow {
            std::mem::swap(&mut self.min_flow, &mut self.max_flow);
        }
        self.max_rpm = self.max_rpm.max(1.0);
        self.max_flow = self.max_flow.max(0.01);
        self.bowl_diameter = self.bowl_diameter.max(1.0);
        self.bowl_length = self.bowl_length.max(1.0);
        self.pool_fraction = self.pool_fraction.clamp(0.01, 1.0);
        self.heater_efficiency = self.heater_efficiency.clamp(0.01, 1.0);
        self.drive_efficiency = self.drive_efficiency.clamp(0.01, 1.0);
        self.bearing_condition = self.bearing_condition.clamp(0.0, 1.0);
        self.heater_time_constant = self.heater_time_constant.max(0.1);
        self.pump_time_constant = self.pump_time_constant.max(0.1);
        self.conditioning_tank_volume = self.conditioning_tank_volume.max(0.01);
        self
    }

    pub fn bowl_radius(&self) -> f64 {
        self.bowl_diameter / 2000.0
    }
}
