use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-9;
const MIN_MEDIA_CONDITION: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FilterStatus {
    Filtering,
    Backwash,
    Standby,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub base_oil_removal: f64,
    pub base_turbidity_removal: f64,
    /// bar at design flow
    pub clean_bed_dp: f64,
    /// m³/h
    pub design_flow: f64,
    pub backwash_trigger_dp: f64,
    /// kg of captured oil and solids at 100 % saturation
    pub bed_capacity: f64,
    /// s
    pub backwash_duration: f64,
    /// m³/h
    pub backwash_flow: f64,
    /// kW
    pub backwash_pump_power: f64,
    /// Fraction of OiW that shows up as dissolved hydrocarbons in TRH
    pub dissolved_fraction: f64,
    pub gac_hydrocarbon_efficiency: f64,
    pub gac_organic_efficiency: f64,
    pub auto_backwash: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            base_oil_removal: 0.985,
            base_turbidity_removal: 0.95,
            clean_bed_dp: 0.25,
            design_flow: 12.0,
            backwash_trigger_dp: 0.8,
            bed_capacity: 40.0,
            backwash_duration: 600.0,
            backwash_flow: 30.0,
            backwash_pump_power: 15.0,
            dissolved_fraction: 0.3,
            gac_hydrocarbon_efficiency: 0.95,
            gac_organic_efficiency: 0.40,
            auto_backwash: true,
        }
    }
}

/// Centrifuge water stream entering the bed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterInlet {
    /// m³/h
    pub flow: f64,
    /// ppm
    pub oiw: f64,
    /// mg/L
    pub suspended_solids: f64,
    /// NTU
    pub turbidity: f64,
    /// mg/L COD not from oil (feed background plus dosed organics)
    pub organic_cod: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterEvent {
    BackwashStarted,
    BackwashCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolishingFilter {
    pub id: String,
    pub status: FilterStatus,
    pub auto_backwash: bool,

    pub inlet_flow: f64,
    pub outlet_flow: f64,
    pub inlet_oiw: f64,
    pub outlet_oiw: f64,
    pub inlet_turbidity: f64,
    pub outlet_turbidity: f64,
    /// mg/L
    pub trh: f64,
    pub cod: f64,

    pub oil_removal: f64,
    pub turbidity_removal: f64,
    /// kg
    pub bed_loading: f64,
    /// %
    pub bed_saturation: f64,
    /// bar
    pub differential_pressure: f64,
    /// %
    pub media_condition: f64,

    pub backwash_remaining: f64,
    pub backwash_cycles: u32,
    /// m³
    pub total_filtered: f64,
    /// kg
    pub total_captured: f64,
    pub backwash_water: f64,
    /// kWh
    pub backwash_energy: f64,

    #[serde(skip)]
    params: FilterParams,
}

impl PolishingFilter {
    pub fn new(id: &str, params: FilterParams) -> Self {
        Self {
            id: id.to_string(),
            status: FilterStatus::Filtering,
            auto_backwash: params.auto_backwash,
            inlet_flow: 0.0,
            outlet_flow: 0.0,
            inlet_oiw: 0.0,
            outlet_oiw: 0.0,
            inlet_turbidity: 0.0,
            outlet_turbidity: 0.0,
            trh: 0.0,
            cod: 0.0,
            oil_removal: 0.0,
            turbidity_removal: 0.0,
            bed_loading: 0.0,
            bed_saturation: 0.0,
            differential_pressure: 0.0,
            media_condition: 100.0,
            backwash_remaining: 0.0,
            backwash_cycles: 0,
            total_filtered: 0.0,
            total_captured: 0.0,
            backwash_water: 0.0,
            backwash_energy: 0.0,
            params,
        }
    }

    /// Iwasaki-style loss of collector efficiency as the bed fills.
    pub fn loading_factor(&self) -> f64 {
        1.0 - (self.bed_saturation.clamp(0.0, 100.0) / 100.0).powf(0.7)
    }

    fn clean_dp(&self, flow: f64) -> f64 {
        self.params.clean_bed_dp * flow.max(0.0) / self.params.design_flow.max(EPS)
    }

    /// Starts a backwash unless one is already running or the bed is offline.
    pub fn trigger_backwash(&mut self) -> Option<FilterEvent> {
        match self.status {
            FilterStatus::Filtering | FilterStatus::Standby => {
                self.status = FilterStatus::Backwash;
                self.backwash_remaining = self.params.backwash_duration.max(0.0);
                tracing::info!(
                    "{} backwash started at {:.2} bar, {:.0}% saturated",
                    self.id,
                    self.differential_pressure,
                    self.bed_saturation
                );
                Some(FilterEvent::BackwashStarted)
            }
            FilterStatus::Backwash | FilterStatus::Offline => None,
        }
    }

    /// Operator status change. Entering `Backwash` goes through
    /// [`Self::trigger_backwash`]; leaving it early abandons the cycle.
    pub fn set_status(&mut self, status: FilterStatus) -> Option<FilterEvent> {
        if status == FilterStatus::Backwash {
            return self.trigger_backwash();
        }
        self.status = status;
        self.backwash_remaining = 0.0;
        None
    }

    pub fn tick(&mut self, dt: f64, inlet: &FilterInlet) -> Option<FilterEvent> {
        let dt = dt.max(0.0);
        let flow = inlet.flow.max(0.0);
        self.inlet_flow = flow;
        self.outlet_flow = flow;
        self.inlet_oiw = inlet.oiw.max(0.0);
        self.inlet_turbidity = inlet.turbidity.max(0.0);

        let mut event = None;
        match self.status {
            FilterStatus::Filtering => {
                self.filter(dt, flow, inlet);
                if self.auto_backwash && self.differential_pressure >= self.params.backwash_trigger_dp {
                    event = self.trigger_backwash();
                }
            }
            FilterStatus::Backwash => {
                self.bypass(inlet);
                self.backwash_water += self.params.backwash_flow * dt / 3600.0;
                self.backwash_energy += self.params.backwash_pump_power * dt / 3600.0;
                self.backwash_remaining -= dt;
                if self.backwash_remaining <= 0.0 {
                    event = Some(self.finish_backwash());
                }
            }
            FilterStatus::Standby | FilterStatus::Offline => self.bypass(inlet),
        }
        event
    }

    fn filter(&mut self, dt: f64, flow: f64, inlet: &FilterInlet) {
        let media = self.media_condition / 100.0;
        let loading = self.loading_factor();
        self.oil_removal = (self.params.base_oil_removal * (0.85 + 0.15 * loading) * media).clamp(0.0, 1.0);
        self.turbidity_removal = (self.params.base_turbidity_removal * (0.85 + 0.15 * loading) * media).clamp(0.0, 1.0);

        self.outlet_oiw = self.inlet_oiw * (1.0 - self.oil_removal);
        self.outlet_turbidity = self.inlet_turbidity * (1.0 - self.turbidity_removal);

        let dissolved = self.params.dissolved_fraction * self.inlet_oiw;
        self.trh = self.outlet_oiw + dissolved * (1.0 - self.params.gac_hydrocarbon_efficiency * media);
        self.cod =
            self.outlet_oiw * 3.5 + inlet.organic_cod.max(0.0) * (1.0 - self.params.gac_organic_efficiency * media);

        // g/m³ · m³ → kg
        let volume = flow * dt / 3600.0;
        let oil_captured = self.inlet_oiw * self.oil_removal * volume / 1000.0;
        let solids_captured = inlet.suspended_solids.max(0.0) * self.turbidity_removal * volume / 1000.0;
        self.bed_loading += oil_captured + solids_captured;
        self.total_captured += oil_captured + solids_captured;
        self.total_filtered += volume;
        self.media_condition = (self.media_condition - 0.01 * oil_captured).max(MIN_MEDIA_CONDITION);

        self.bed_saturation = (self.bed_loading / self.params.bed_capacity.max(EPS) * 100.0).clamp(0.0, 100.0);
        self.differential_pressure = self.clean_dp(flow) * (1.0 + 6.0 * self.bed_saturation / 100.0);
    }

    fn bypass(&mut self, inlet: &FilterInlet) {
        self.oil_removal = 0.0;
        self.turbidity_removal = 0.0;
        self.outlet_oiw = self.inlet_oiw;
        self.outlet_turbidity = self.inlet_turbidity;
        self.trh = self.inlet_oiw * (1.0 + self.params.dissolved_fraction);
        self.cod = self.inlet_oiw * 3.5 + inlet.organic_cod.max(0.0);
        self.differential_pressure = if self.status == FilterStatus::Backwash {
            self.clean_dp(self.params.backwash_flow)
        } else {
            0.0
        };
    }

    fn finish_backwash(&mut self) -> FilterEvent {
        self.bed_loading *= 0.05;
        self.bed_saturation = (self.bed_loading / self.params.bed_capacity.max(EPS) * 100.0).clamp(0.0, 100.0);
        self.backwash_cycles += 1;
        self.backwash_remaining = 0.0;
        self.media_condition = (self.media_condition - 0.5).max(MIN_MEDIA_CONDITION);
        self.status = FilterStatus::Filtering;
        tracing::info!("{} backwash complete, cycle {}", self.id, self.backwash_cycles);
        FilterEvent::BackwashCompleted
    }
}
