//! Kinetic models behind the seven dosers.

use serde::{Deserialize, Serialize};

const R_GAS: f64 = 8.314;
const T_REF_K: f64 = 298.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemulsifierKinetics {
    /// L/mg at 25 °C
    pub k_ref: f64,
    /// J/mol
    pub activation_energy: f64,
    pub theta_max: f64,
    pub overdose_threshold: f64,
}

impl Default for DemulsifierKinetics {
    fn default() -> Self {
        Self {
            k_ref: 0.05,
            activation_energy: 20_000.0,
            theta_max: 0.95,
            overdose_threshold: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlocculantKinetics {
    pub growth: f64,
    pub reference_dose: f64,
    pub overdose_threshold: f64,
    /// s
    pub time_constant: f64,
    pub max_ratio: f64,
}

impl Default for FlocculantKinetics {
    fn default() -> Self {
        Self {
            growth: 2.5,
            reference_dose: 5.0,
            overdose_threshold: 15.0,
            time_constant: 120.0,
            max_ratio: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoagulantKinetics {
    pub valence: f64,
    /// mg/L for a monovalent counter-ion
    pub ccc_monovalent: f64,
    pub valence_exponent: f64,
    /// mV
    pub native_zeta: f64,
}

impl Default for CoagulantKinetics {
    fn default() -> Self {
        Self {
            valence: 3.0,
            ccc_monovalent: 14_580.0,
            valence_exponent: 6.0,
            native_zeta: -35.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhControl {
    pub setpoint: f64,
    pub pka: f64,
    pub deadband: f64,
}

impl Default for PhControl {
    fn default() -> Self {
        Self {
            setpoint: 7.0,
            pka: 6.35,
            deadband: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleKinetics {
    pub lsi_threshold: f64,
    /// ppm giving 50 % inhibition
    pub half_inhibition_dose: f64,
}

impl Default for ScaleKinetics {
    fn default() -> Self {
        Self {
            lsi_threshold: 0.0,
            half_inhibition_dose: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntifoamKinetics {
    pub generation: f64,
    pub breaking: f64,
    pub collapse: f64,
}

impl Default for AntifoamKinetics {
    fn default() -> Self {
        Self {
            generation: 30.0,
            breaking: 0.02,
            collapse: 0.01,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChemistryParams {
    pub demulsifier: DemulsifierKinetics,
    pub flocculant: FlocculantKinetics,
    pub coagulant: CoagulantKinetics,
    pub ph: PhControl,
    pub scale: ScaleKinetics,
    pub antifoam: AntifoamKinetics,
}

/// Langmuir constant corrected for temperature, L/mg.
pub fn langmuir_k(params: &DemulsifierKinetics, temperature_c: f64) -> f64 {
    let t_k = (temperature_c + 273.15).max(1.0);
    let exponent = (params.activation_energy / R_GAS * (1.0 / T_REF_K - 1.0 / t_k)).clamp(-50.0, 50.0);
    params.k_ref.max(0.0) * exponent.exp()
}

/// Returns (surface coverage θ, emulsion-breaking effectiveness).
pub fn demulsifier_effect(params: &DemulsifierKinetics, dose: f64, temperature_c: f64, efficacy: f64) -> (f64, f64) {
    if dose <= 0.0 {
        return (0.0, 0.0);
    }
    let k = langmuir_k(params, temperature_c);
    let kc = k * dose;
    let theta = (kc / (1.0 + kc) * params.theta_max).min(params.theta_max);
    let threshold = params.overdose_threshold.max(1e-6);
    let overdose = if dose > threshold {
        (-(dose - threshold) / threshold).exp()
    } else {
        1.0
    };
    (theta, (theta * efficacy * overdose).clamp(0.0, 1.0))
}

/// Smoluchowski-style floc growth; collision rate scales with C^1.5.
pub fn floc_size_ratio(params: &FlocculantKinetics, dose: f64, mixing: f64, residence_s: f64, efficacy: f64) -> f64 {
    if dose <= 0.0 {
        return 1.0;
    }
    let reference = params.reference_dose.max(1e-6);
    let contact = 1.0 - (-residence_s.max(0.0) / params.time_constant.max(1e-6)).exp();
    let mut growth = params.growth * (dose / reference).powf(1.5) * mixing * contact * efficacy;
    let threshold = params.overdose_threshold.max(1e-6);
    if dose > threshold {
        // Excess polymer re-stabilises the particles
        growth *= (-(dose - threshold) / threshold).exp();
    }
    (1.0 + growth).clamp(0.8, params.max_ratio.max(1.0))
}

/// Critical coagulation concentration from the Schulze–Hardy rule, mg/L.
pub fn critical_coagulation_concentration(params: &CoagulantKinetics) -> f64 {
    (params.ccc_monovalent * params.valence.max(1.0).powf(-params.valence_exponent)).max(1e-6)
}

/// Charge neutralisation; overdosing reverses the sign of ζ.
pub fn zeta_potential(params: &CoagulantKinetics, dose: f64, salinity: f64) -> f64 {
    let screened = params.native_zeta / (1.0 + salinity.max(0.0) / 50_000.0);
    let ccc = critical_coagulation_concentration(params);
    (screened * (1.0 - dose.max(0.0) / ccc)).clamp(-60.0, 30.0)
}

/// Carbonate buffer capacity β, mmol/(L·pH).
pub fn buffer_capacity(alkalinity_caco3: f64, ph: f64, pka: f64) -> f64 {
    let total_carbonate = alkalinity_caco3.max(0.0) / 50.0;
    let alpha = 1.0 / (1.0 + 10f64.powf((pka - ph).clamp(-20.0, 20.0)));
    (2.303 * total_carbonate * alpha * (1.0 - alpha)).max(0.1)
}

/// Langelier Saturation Index.
pub fn langelier_index(ph: f64, temperature_c: f64, tds: f64, calcium_caco3: f64, alkalinity_caco3: f64) -> f64 {
    let a = (tds.max(1.0).log10() - 1.0) / 10.0;
    let b = -13.12 * (temperature_c + 273.15).max(1.0).log10() + 34.55;
    let c = calcium_caco3.max(1.0).log10() - 0.4;
    let d = alkalinity_caco3.max(1.0).log10();
    let ph_s = 9.3 + a + b - (c + d);
    ph - ph_s
}

pub fn scaling_risk(params: &ScaleKinetics, lsi: f64, dose: f64) -> f64 {
    let inhibition = dose.max(0.0) / (dose.max(0.0) + params.half_inhibition_dose.max(1e-6));
    (lsi.max(0.0) / 2.0 * 100.0 * (1.0 - inhibition)).clamp(0.0, 100.0)
}

/// Advances foam height (cm) with an exact exponential step.
pub fn foam_step(
    params: &AntifoamKinetics,
    height: f64,
    generation_driver: f64,
    dose: f64,
    temperature_c: f64,
    dt: f64,
) -> f64 {
    let persistence = (-(temperature_c - 25.0) / 100.0).exp();
    let generation = params.generation * generation_driver.max(0.0);
    let decay = params.breaking * dose.max(0.0) * persistence + params.collapse.max(1e-6);
    let steady = generation / decay;
    (steady + (height - steady) * (-decay * dt.max(0.0)).exp()).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn langmuir_k_rises_with_temperature() {
        let p = DemulsifierKinetics::default();
        assert_relative_eq!(langmuir_k(&p, 25.0), 0.05, epsilon = 1e-12);
        assert!(langmuir_k(&p, 65.0) > langmuir_k(&p, 25.0));
    }

    #[test]
    fn demulsifier_overdose_loses_effect() {
        let p = DemulsifierKinetics::default();
        let (_, normal) = demulsifier_effect(&p, 150.0, 65.0, 0.7);
        let (_, over) = demulsifier_effect(&p, 600.0, 65.0, 0.7);
        assert!(over < normal);
    }

    #[test]
    fn flocculant_restabilises_above_threshold() {
        let p = FlocculantKinetics::default();
        let optimal = floc_size_ratio(&p, 10.0, 1.0, 600.0, 0.8);
        let over = floc_size_ratio(&p, 60.0, 1.0, 600.0, 0.8);
        assert!(optimal > 1.0);
        assert!(over < optimal);
        assert_eq!(floc_size_ratio(&p, 0.0, 1.0, 600.0, 0.8), 1.0);
    }

    #[test]
    fn schulze_hardy_scales_with_valence() {
        let trivalent = CoagulantKinetics::default();
        let divalent = CoagulantKinetics { valence: 2.0, ..Default::default() };
        let ratio = critical_coagulation_concentration(&divalent) / critical_coagulation_concentration(&trivalent);
        assert_relative_eq!(ratio, 1.5f64.powi(6), epsilon = 1e-9);
        assert_relative_eq!(critical_coagulation_concentration(&trivalent), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn coagulant_neutralises_then_reverses_charge() {
        let p = CoagulantKinetics::default();
        assert!(zeta_potential(&p, 0.0, 0.0) < -30.0);
        assert_relative_eq!(zeta_potential(&p, 20.0, 0.0), 0.0, epsilon = 1e-9);
        assert!(zeta_potential(&p, 30.0, 0.0) > 0.0);
    }

    #[test]
    fn buffer_capacity_peaks_at_pka() {
        let at_pka = buffer_capacity(200.0, 6.35, 6.35);
        assert!(at_pka > buffer_capacity(200.0, 8.5, 6.35));
        assert!(at_pka > buffer_capacity(200.0, 4.5, 6.35));
    }

    #[test]
    fn lsi_increases_with_ph_and_temperature() {
        let base = langelier_index(7.0, 25.0, 35_000.0, 400.0, 200.0);
        assert!(langelier_index(8.0, 25.0, 35_000.0, 400.0, 200.0) > base);
        assert!(langelier_index(7.0, 65.0, 35_000.0, 400.0, 200.0) > base);
    }

    #[test]
    fn inhibitor_reduces_scaling_risk() {
        let p = ScaleKinetics::default();
        assert!(scaling_risk(&p, 1.0, 6.0) < scaling_risk(&p, 1.0, 0.0));
        assert_eq!(scaling_risk(&p, -0.5, 0.0), 0.0);
    }

    #[test]
    fn antifoam_knocks_down_foam() {
        let p = AntifoamKinetics::default();
        let mut without = 0.0;
        let mut with = 0.0;
        for _ in 0..600 {
            without = foam_step(&p, without, 0.0032, 0.0, 65.0, 1.0);
            with = foam_step(&p, with, 0.0032, 10.0, 65.0, 1.0);
        }
        assert!(with < without);
        assert!(without <= 100.0);
    }
}
