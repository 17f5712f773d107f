//! Forecast/observation consensus checking.
//!
//! Pure computation: given one telemetry snapshot and one seed, compare
//! what the sensors say against what the forecast predicted for that grid
//! cell and classify the agreement. Persistence of divergence events is the
//! caller's concern.
//!
//! The classifier is four-state over continuous deltas, not a binary
//! threshold. Ambiguity resolves toward the more alarmed state: a falsely
//! reassuring "agree" is the dangerous failure mode out here.

use tracing::{debug, warn};

use crate::config::ConsensusConfig;
use crate::geo::MPS_TO_KTS;
use crate::seed::{cache::SeedCache, WeatherSeed};
use crate::types::{ConsensusLevel, ConsensusReport, TelemetrySnapshot};

/// Name of the mean-sea-level pressure variable. Seeds carry it in Pa
/// (model convention); the checker converts to hPa at this boundary.
const MSL_NAME: &str = "msl";
const WIND_U_NAME: &str = "u10";
const WIND_V_NAME: &str = "v10";

/// Compares live telemetry against seed-predicted state.
pub struct TruthChecker {
    config: ConsensusConfig,
}

impl TruthChecker {
    /// Checker with explicit policy thresholds.
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    /// Checker with the default policy.
    pub fn with_defaults() -> Self {
        Self::new(ConsensusConfig::default())
    }

    /// Classify agreement between a telemetry snapshot and the seed's
    /// prediction at `time_index`.
    ///
    /// Returns the `Unknown` report (not divergent, never an error) when
    /// the seed carries no wind prediction for the position and step, or
    /// when the vessel reports no wind observation to compare.
    pub fn check(
        &self,
        telemetry: &TelemetrySnapshot,
        seed: &WeatherSeed,
        time_index: usize,
    ) -> ConsensusReport {
        let Some(prediction) = predicted_state(seed, telemetry.lat, telemetry.lon, time_index)
        else {
            return ConsensusReport::unknown();
        };
        let Some(observed_wind_kts) = telemetry.true_wind_speed_kts else {
            return ConsensusReport::unknown();
        };

        let wind_delta_kts = (observed_wind_kts - prediction.wind_kts).abs();
        let pressure_delta_hpa = match (telemetry.barometer_hpa, prediction.pressure_hpa) {
            (Some(observed), Some(predicted)) => Some((observed - predicted).abs()),
            _ => None,
        };

        let level = self.classify(
            observed_wind_kts,
            prediction.wind_kts,
            wind_delta_kts,
            pressure_delta_hpa,
        );
        let is_divergent = level == ConsensusLevel::Disagree;

        if is_divergent {
            warn!(
                wind_delta_kts,
                pressure_delta_hpa = pressure_delta_hpa.unwrap_or(0.0),
                seed_id = %seed.id,
                "forecast divergence detected"
            );
        } else {
            debug!(?level, wind_delta_kts, "consensus check complete");
        }

        ConsensusReport {
            is_divergent,
            level,
            wind_delta_kts,
            pressure_delta_hpa: pressure_delta_hpa.unwrap_or(0.0),
        }
    }

    /// Resolve the best covering seed and nearest time step from the cache,
    /// then run [`check`](Self::check). A cache miss yields the `Unknown`
    /// report.
    pub fn check_against_cache(
        &self,
        telemetry: &TelemetrySnapshot,
        cache: &SeedCache,
    ) -> ConsensusReport {
        let Some(seed) = cache.find_covering_seed(telemetry.lat, telemetry.lon, telemetry.timestamp)
        else {
            return ConsensusReport::unknown();
        };
        let Some(time_index) = seed.nearest_time_index(telemetry.timestamp) else {
            return ConsensusReport::unknown();
        };
        self.check(telemetry, &seed, time_index)
    }

    fn classify(
        &self,
        observed_wind_kts: f64,
        predicted_wind_kts: f64,
        wind_delta_kts: f64,
        pressure_delta_hpa: Option<f64>,
    ) -> ConsensusLevel {
        let wind_agrees = wind_delta_kts <= self.config.wind_agree_kts;
        // Without a barometer the pressure criterion is skipped; wind alone
        // decides. Never assume the missing sample agreed.
        let pressure_agrees = pressure_delta_hpa
            .map(|delta| delta <= self.config.pressure_agree_hpa)
            .unwrap_or(true);

        if wind_agrees && pressure_agrees {
            return ConsensusLevel::Agree;
        }

        let observed_family = self.config.family_label(observed_wind_kts);
        let predicted_family = self.config.family_label(predicted_wind_kts);
        if families_match(observed_family, predicted_family) {
            // Same qualitative story, differing magnitude.
            return ConsensusLevel::Partial;
        }

        ConsensusLevel::Disagree
    }
}

/// Keyword comparison of qualitative family labels. Substring matching in
/// either direction, so variants like "near-gale" and "gale" land in the
/// same family.
fn families_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let a = a.to_ascii_lowercase();
    let b = b.to_ascii_lowercase();
    a == b || a.contains(b.as_str()) || b.contains(a.as_str())
}

struct PredictedState {
    wind_kts: f64,
    pressure_hpa: Option<f64>,
}

fn predicted_state(
    seed: &WeatherSeed,
    lat: f64,
    lon: f64,
    time_index: usize,
) -> Option<PredictedState> {
    let (lat_idx, lon_idx) = seed.nearest_cell(lat, lon)?;
    let u = seed.value_at(WIND_U_NAME, time_index, lat_idx, lon_idx)?;
    let v = seed.value_at(WIND_V_NAME, time_index, lat_idx, lon_idx)?;
    let wind_kts = f64::from(u).hypot(f64::from(v)) * MPS_TO_KTS;

    let pressure_hpa = seed
        .value_at(MSL_NAME, time_index, lat_idx, lon_idx)
        .map(|pa| f64::from(pa) / 100.0);

    Some(PredictedState {
        wind_kts,
        pressure_hpa,
    })
}
