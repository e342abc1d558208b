//! Centrifuge separation physics.
//!
//! Stokes settling with Richardson–Zaki hindrance, evaluated through a
//! logistic sigma curve. Chemical effects come from the *previous* tick's
//! [`ChemicalProcessState`]; on the very first tick a dose-based fallback
//! is used instead.

use super::chemicals::ChemicalProcessState;
use super::feed::{EquipmentSpec, FeedProperties};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

pub const G: f64 = 9.81;
const EPS: f64 = 1e-9;
const NATIVE_ZETA: f64 = -35.0;
const MAX_OIL_EFFICIENCY: f64 = 99.9;
const MAX_SOLIDS_EFFICIENCY: f64 = 99.9;

/// Seeded Gaussian noise source shared by the feed sampler and the
/// efficiency calculation.
pub struct ProcessNoise {
    rng: StdRng,
    pub variability: f64,
}

impl ProcessNoise {
    pub fn new(seed: u64, variability: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            variability: variability.clamp(0.0, 1.0),
        }
    }

    pub fn gaussian(&mut self, std_dev: f64) -> f64 {
        if std_dev <= 0.0 || !std_dev.is_finite() {
            return 0.0;
        }
        match Normal::new(0.0, std_dev) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.0,
        }
    }

    /// Multiplies `value` by `1 + N(0, noise_percent/100)`.
    pub fn add_noise(&mut self, value: f64, noise_percent: f64) -> f64 {
        value * (1.0 + self.gaussian(noise_percent / 100.0))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub temperature: f64,
    pub bowl_speed: f64,
    pub feed_flow: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessState {
    pub temperature: f64,
    pub feed_flow: f64,
    pub bowl_speed: f64,
    pub g_force: f64,
    /// mPa·s
    pub viscosity: f64,
    /// mm/s
    pub oil_settling_velocity: f64,
    pub solids_settling_velocity: f64,
    /// s
    pub residence_time: f64,
    pub oil_efficiency: f64,
    pub solids_efficiency: f64,

    /// m³/h
    pub water_out_flow: f64,
    pub oil_out_flow: f64,
    pub solids_out_flow: f64,
    pub oil_carryover: f64,
    pub solids_carryover: f64,

    /// OiW, ppm
    pub water_quality: f64,
    /// mg/L
    pub suspended_solids: f64,
    /// NTU
    pub turbidity: f64,
    pub ph: f64,
    /// %
    pub oil_moisture: f64,
    pub cake_moisture: f64,

    /// mm/s RMS
    pub vibration: f64,
    pub heater_power: f64,
    pub drive_power: f64,
    pub total_power: f64,
}

/// Arrhenius viscosity referenced to 25 °C, Pa·s.
pub fn arrhenius_viscosity(visc_25_mpas: f64, temp_coeff: f64, temperature: f64) -> f64 {
    let exponent = (-temp_coeff * (temperature - 25.0)).clamp(-50.0, 50.0);
    (visc_25_mpas.max(0.0) * 1e-3 * exponent.exp()).max(1e-5)
}

/// Continuous-phase viscosity including the power-law shear correction.
pub fn continuous_viscosity(feed: &FeedProperties, temperature: f64, omega: f64) -> f64 {
    let mu = arrhenius_viscosity(feed.viscosity, feed.viscosity_temp_coeff, temperature);
    let n = feed.flow_behavior_index;
    if (n - 1.0).abs() < 1e-6 || !n.is_finite() {
        return mu;
    }
    let shear_rate = (omega / 0.3).max(1.0);
    let factor = (shear_rate / 100.0).powf(n - 1.0).clamp(0.1, 10.0);
    (mu * factor).max(1e-5)
}

pub fn g_accel(bowl_radius: f64, rpm: f64) -> f64 {
    let omega = rpm.max(0.0) * 2.0 * std::f64::consts::PI / 60.0;
    omega * omega * bowl_radius.max(0.0)
}

/// v = d²·Δρ·g·φ / (18·μ)
pub fn stokes_velocity(diameter_m: f64, delta_rho: f64, viscosity: f64, accel: f64, sphericity: f64) -> f64 {
    (diameter_m * diameter_m * delta_rho * accel * sphericity / (18.0 * viscosity.max(1e-5))).abs()
}

/// (1 − φ/φmax)^n, zero at or beyond the packing limit.
pub fn hindered_settling_factor(dispersed_fraction: f64, max_packing: f64, exponent: f64) -> f64 {
    let max_packing = max_packing.max(EPS);
    if dispersed_fraction >= max_packing {
        return 0.0;
    }
    (1.0 - dispersed_fraction.max(0.0) / max_packing).powf(exponent.max(0.0))
}

pub fn spread_factor(span: f64) -> f64 {
    (1.0 / (1.0 + 0.08 * (span - 1.0).max(0.0))).clamp(0.3, 1.0)
}

pub fn sigma_efficiency(sigma: f64) -> f64 {
    let exponent = (-2.5 * (sigma - 1.0)).clamp(-50.0, 50.0);
    100.0 / (1.0 + exponent.exp())
}

/// θ = KC/(1+KC)·θmax
pub fn langmuir_coverage(dose_ppm: f64, k: f64, theta_max: f64) -> f64 {
    if dose_ppm <= 0.0 {
        return 0.0;
    }
    let kc = k.max(0.0) * dose_ppm;
    (kc / (1.0 + kc) * theta_max).min(theta_max)
}

fn fallback_emulsion_breaking(feed: &FeedProperties) -> f64 {
    feed.demulsifier_efficacy * langmuir_coverage(feed.demulsifier_baseline, 0.05, 0.95)
}

pub fn separate(
    feed: &FeedProperties,
    spec: &EquipmentSpec,
    op: &OperatingPoint,
    chem: Option<&ChemicalProcessState>,
    noise: &mut ProcessNoise,
) -> ProcessState {
    let temperature = op.temperature;
    let flow = op.feed_flow.max(0.0);
    let rpm = op.bowl_speed.max(0.0);

    let r = spec.bowl_radius();
    let omega = rpm * 2.0 * std::f64::consts::PI / 60.0;
    let accel = g_accel(r, rpm);
    let g_force = accel / G;
    let mu = continuous_viscosity(feed, temperature, omega);

    // Salinity makes the water phase denser
    let water_density = (feed.water_density + feed.salinity.max(0.0) * 0.0007).max(1.0);
    let oil_delta_rho = (water_density - feed.oil_density).abs().max(0.1);
    let solids_delta_rho = (feed.solids_density - water_density).max(0.1);

    let emulsion_breaking = chem
        .map(|c| c.emulsion_breaking_factor)
        .unwrap_or_else(|| fallback_emulsion_breaking(feed))
        .clamp(0.0, 1.0);
    let floc_ratio = chem.map(|c| c.floc_size_ratio).unwrap_or(1.0).max(0.1);
    let zeta = chem.map(|c| c.zeta_potential).unwrap_or(NATIVE_ZETA);
    let foam = chem.map(|c| c.foam_height).unwrap_or(0.0);

    let hindrance = hindered_settling_factor(
        feed.oil_fraction + feed.solids_fraction,
        feed.max_packing_fraction,
        feed.hindered_settling_exp,
    );
    let oil_velocity = stokes_velocity(
        feed.oil_droplets.d50 * 1e-6,
        oil_delta_rho,
        mu,
        accel,
        feed.oil_sphericity,
    ) * spread_factor(feed.oil_droplets.span())
        * hindrance;
    let solids_velocity = stokes_velocity(
        feed.solids_particles.d50 * 1e-6,
        solids_delta_rho,
        mu,
        accel,
        feed.solids_sphericity,
    ) * spread_factor(feed.solids_particles.span())
        * hindrance;

    let pool_volume = std::f64::consts::PI * r * r * (spec.bowl_length / 1000.0) * spec.pool_fraction;
    let flow_m3s = (flow / 3600.0).max(1e-6);
    let residence_time = pool_volume / flow_m3s;
    let radial_distance = (0.3 * r).max(EPS);

    let interfacial = (feed.interfacial_tension / 25.0).max(0.05);
    let emulsion_factor =
        (1.0 - feed.emulsion_stability.clamp(0.0, 1.0) * 0.3 * (1.0 - emulsion_breaking) / interfacial).max(0.3);
    let floc_factor = (1.0 + 0.1 * (floc_ratio - 1.0)).clamp(0.8, 1.5);
    let coagulation = (1.0 - zeta.abs() / 30.0).max(0.0);
    let temp_factor = (1.0 + (temperature - 60.0) * 0.008).clamp(0.7, 1.2);
    let flow_factor = (1.0 - (flow - 10.0) * 0.04).clamp(0.6, 1.1);
    let yield_factor = 1.0 - (0.02 * feed.yield_stress.max(0.0)).min(0.5);
    let gas_factor = 1.0 - (2.0 * feed.dissolved_gas.max(0.0)).min(0.3);
    let foam_factor = 1.0 - (foam.max(0.0) / 200.0).min(0.2);

    let oil_sigma = oil_velocity * residence_time / radial_distance
        * emulsion_factor
        * (1.0 + 0.02 * coagulation)
        * temp_factor
        * flow_factor
        * yield_factor
        * gas_factor
        * foam_factor;
    let solids_sigma = solids_velocity * residence_time / radial_distance
        * floc_factor
        * (1.0 + 0.05 * coagulation)
        * temp_factor
        * flow_factor
        * yield_factor;

    let spread = 0.5 * noise.variability;
    let oil_efficiency = (sigma_efficiency(oil_sigma) + noise.gaussian(spread)).clamp(0.0, MAX_OIL_EFFICIENCY);
    let solids_efficiency =
        (sigma_efficiency(solids_sigma) + noise.gaussian(spread)).clamp(0.0, MAX_SOLIDS_EFFICIENCY);

    let g_ref = g_force.max(1.0);
    let oil_moisture = (8.0 * (2700.0 / g_ref).sqrt() * (1.0 - 0.5 * emulsion_breaking)
        * (-0.01 * (temperature - 60.0)).exp())
    .clamp(0.5, 30.0);
    let cake_moisture = (45.0 * (2700.0 / g_ref).powf(0.3) * (1.0 - 0.04 * (floc_ratio - 1.0))).clamp(15.0, 80.0);

    // Stream balance, m³/h
    let water_in = flow * feed.water_fraction;
    let oil_in = flow * feed.oil_fraction;
    let solids_in = flow * feed.solids_fraction;

    let oil_recovered = oil_in * oil_efficiency / 100.0;
    let oil_carryover = oil_in - oil_recovered;
    let solids_recovered = solids_in * solids_efficiency / 100.0;
    let solids_carryover = solids_in - solids_recovered;

    let mut water_in_oil = oil_recovered * oil_moisture / (100.0 - oil_moisture);
    let mut water_in_cake = solids_recovered * cake_moisture / (100.0 - cake_moisture);
    let entrained = water_in_oil + water_in_cake;
    if entrained > water_in && entrained > EPS {
        let scale = water_in / entrained;
        water_in_oil *= scale;
        water_in_cake *= scale;
    }

    let oil_out_flow = oil_recovered + water_in_oil;
    let solids_out_flow = solids_recovered + water_in_cake;
    let water_out_flow = (water_in - water_in_oil - water_in_cake + oil_carryover + solids_carryover).max(0.0);

    let (water_quality, suspended_solids) = if water_out_flow > EPS {
        (
            oil_carryover / water_out_flow * 1e6 * feed.oil_density / water_density,
            solids_carryover / water_out_flow * feed.solids_density * 1000.0,
        )
    } else {
        (0.0, 0.0)
    };
    let water_quality = water_quality.clamp(0.0, 1e6);
    let suspended_solids = suspended_solids.clamp(0.0, 1e6);

    let fines_d10 = (feed.solids_particles.d10 * floc_ratio).max(0.1);
    let turbidity = (suspended_solids * 0.5 * (1.0 + feed.fines_sensitivity.max(0.0) * 10.0 / fines_d10)).clamp(0.0, 4000.0);

    let ph = process_ph(feed, temperature, chem);

    let speed_ratio = rpm / 3500.0;
    let vibration = 2.0 * speed_ratio * speed_ratio * (1.0 + 5.0 * (1.0 - spec.bearing_condition))
        + 10.0 * feed.solids_fraction;

    let drive_power = spec.drive_rated_kw * (rpm / spec.max_rpm).powi(3)
        * (0.3 + 0.7 * (flow / spec.max_flow).min(1.0))
        / spec.drive_efficiency;

    ProcessState {
        temperature,
        feed_flow: flow,
        bowl_speed: rpm,
        g_force,
        viscosity: mu * 1000.0,
        oil_settling_velocity: oil_velocity * 1000.0,
        solids_settling_velocity: solids_velocity * 1000.0,
        residence_time,
        oil_efficiency,
        solids_efficiency,
        water_out_flow,
        oil_out_flow,
        solids_out_flow,
        oil_carryover,
        solids_carryover,
        water_quality,
        suspended_solids,
        turbidity,
        ph,
        oil_moisture,
        cake_moisture,
        vibration,
        heater_power: 0.0,
        drive_power,
        total_power: drive_power,
    }
}

fn process_ph(feed: &FeedProperties, temperature: f64, chem: Option<&ChemicalProcessState>) -> f64 {
    let dosing = chem
        .map(|c| (c.caustic_dose / 40.0 - c.acid_dose / 49.0) / c.buffer_capacity.max(0.1))
        .unwrap_or(0.0);
    (feed.ph + dosing
        - 0.1 * feed.salinity.max(0.0) / 35_000.0
        - 0.5 * feed.oil_fraction
        - 0.01 * (temperature - 25.0))
        .clamp(0.0, 14.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::feed::FeedPreset;
    use approx::assert_relative_eq;

    fn nominal() -> OperatingPoint {
        OperatingPoint {
            temperature: 65.0,
            bowl_speed: 3500.0,
            feed_flow: 12.0,
        }
    }

    fn quiet() -> ProcessNoise {
        ProcessNoise::new(1, 0.0)
    }

    #[test]
    fn g_force_matches_bowl_geometry() {
        // 400 mm bowl at 3500 rpm is roughly 2740 g
        let g = g_accel(0.2, 3500.0) / G;
        assert!((g - 2740.0).abs() < 10.0, "g = {g}");
    }

    #[test]
    fn viscosity_falls_with_temperature() {
        let cold = arrhenius_viscosity(1.0, 0.02, 25.0);
        let hot = arrhenius_viscosity(1.0, 0.02, 65.0);
        assert_relative_eq!(cold, 1e-3, epsilon = 1e-12);
        assert!(hot < cold);
    }

    #[test]
    fn shear_thinning_lowers_viscosity_at_speed() {
        let mut feed = FeedProperties::default();
        feed.flow_behavior_index = 0.7;
        let omega = 3500.0 * 2.0 * std::f64::consts::PI / 60.0;
        let thinned = continuous_viscosity(&feed, 25.0, omega);
        assert!(thinned < arrhenius_viscosity(1.0, 0.02, 25.0));
    }

    #[test]
    fn hindered_settling_bounds() {
        assert_relative_eq!(hindered_settling_factor(0.0, 0.64, 4.65), 1.0);
        assert_eq!(hindered_settling_factor(0.7, 0.64, 4.65), 0.0);
        let f = hindered_settling_factor(0.25, 0.64, 4.65);
        assert!(f > 0.0 && f < 1.0);
    }

    #[test]
    fn langmuir_saturates() {
        let low = langmuir_coverage(10.0, 0.05, 0.95);
        let high = langmuir_coverage(10_000.0, 0.05, 0.95);
        assert!(low < high && high <= 0.95);
        assert_eq!(langmuir_coverage(0.0, 0.05, 0.95), 0.0);
    }

    #[test]
    fn nominal_separation_is_high_and_bounded() {
        let s = separate(&FeedProperties::default(), &EquipmentSpec::default(), &nominal(), None, &mut quiet());
        assert!(s.oil_efficiency > 95.0 && s.oil_efficiency <= 99.9, "oil {}", s.oil_efficiency);
        assert!(s.solids_efficiency > 95.0 && s.solids_efficiency <= 99.9);
        assert!(s.water_quality > 0.0);
    }

    #[test]
    fn streams_conserve_feed_volume() {
        let s = separate(&FeedProperties::default(), &EquipmentSpec::default(), &nominal(), None, &mut quiet());
        assert_relative_eq!(s.water_out_flow + s.oil_out_flow + s.solids_out_flow, 12.0, epsilon = 1e-9);
    }

    #[test]
    fn faster_bowl_separates_better() {
        let feed = FeedProperties::default();
        let spec = EquipmentSpec::default();
        let slow = separate(&feed, &spec, &OperatingPoint { bowl_speed: 2000.0, ..nominal() }, None, &mut quiet());
        let fast = separate(&feed, &spec, &OperatingPoint { bowl_speed: 4500.0, ..nominal() }, None, &mut quiet());
        assert!(fast.oil_efficiency > slow.oil_efficiency);
        assert!(fast.water_quality < slow.water_quality);
    }

    #[test]
    fn no_nan_across_operating_envelope() {
        let feeds = [
            FeedProperties::default(),
            FeedProperties::preset(FeedPreset::TankBottoms),
            FeedProperties {
                water_fraction: 0.0,
                oil_fraction: 0.5,
                solids_fraction: 0.5,
                ..Default::default()
            },
        ];
        let spec = EquipmentSpec::default();
        let mut noise = ProcessNoise::new(3, 1.0);
        for feed in &feeds {
            for flow in [0.0, 0.001, 5.0, 15.0] {
                for rpm in [0.0, 1500.0, 5000.0] {
                    for temperature in [0.0, 25.0, 95.0] {
                        let op = OperatingPoint { temperature, bowl_speed: rpm, feed_flow: flow };
                        let s = separate(feed, &spec, &op, None, &mut noise);
                        for v in [
                            s.oil_efficiency,
                            s.solids_efficiency,
                            s.water_quality,
                            s.turbidity,
                            s.ph,
                            s.oil_moisture,
                            s.cake_moisture,
                            s.residence_time,
                            s.water_out_flow,
                        ] {
                            assert!(v.is_finite(), "non-finite at flow={flow} rpm={rpm} T={temperature}");
                        }
                        assert!((0.0..=99.9).contains(&s.oil_efficiency));
                        assert!((0.0..=99.9).contains(&s.solids_efficiency));
                        assert!((0.0..=14.0).contains(&s.ph));
                    }
                }
            }
        }
    }

    #[test]
    fn zero_variability_is_deterministic() {
        let feed = FeedProperties::default();
        let spec = EquipmentSpec::default();
        let a = separate(&feed, &spec, &nominal(), None, &mut ProcessNoise::new(1, 0.0));
        let b = separate(&feed, &spec, &nominal(), None, &mut ProcessNoise::new(99, 0.0));
        assert_eq!(a.oil_efficiency, b.oil_efficiency);
    }
}
