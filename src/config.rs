//! Policy-constant configuration.
//!
//! Thresholds in this module are empirically observed operating policy, not
//! physically derived values. They are exposed as plain config structs with
//! defaults so shore-side tooling can tune them per deployment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::HazardType;

/// Consensus classification policy for [`crate::truth::TruthChecker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Wind delta (knots) at or below which forecast and observation agree.
    pub wind_agree_kts: f64,

    /// Pressure delta (hPa) at or below which forecast and observation agree.
    /// Skipped when the telemetry carries no barometer sample.
    pub pressure_agree_hpa: f64,

    /// Wind speed band edges (knots) separating qualitative weather
    /// families, ascending. Observed and predicted speeds falling between
    /// the same pair of edges belong to the same family.
    pub family_band_edges_kts: Vec<f64>,

    /// Human-readable family labels, one more than `family_band_edges_kts`.
    /// Compared by keyword when classifying partial agreement.
    pub family_labels: Vec<String>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            wind_agree_kts: 8.0,
            pressure_agree_hpa: 3.0,
            family_band_edges_kts: vec![12.0, 24.0, 34.0, 48.0],
            family_labels: vec![
                "calm".to_string(),
                "breeze".to_string(),
                "strong-wind".to_string(),
                "gale".to_string(),
                "storm".to_string(),
            ],
        }
    }
}

impl ConsensusConfig {
    /// Qualitative family label for a wind speed in knots.
    pub fn family_label(&self, wind_kts: f64) -> &str {
        let idx = self
            .family_band_edges_kts
            .iter()
            .position(|edge| wind_kts < *edge)
            .unwrap_or(self.family_band_edges_kts.len());
        self.family_labels
            .get(idx)
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

/// Seed cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedCacheConfig {
    /// Storage budget for backing artifacts, in megabytes.
    pub max_storage_mb: u64,

    /// Upper bound on entry count, independent of byte budget.
    pub max_entries: usize,
}

impl Default for SeedCacheConfig {
    fn default() -> Self {
        Self {
            max_storage_mb: 100,
            max_entries: 64,
        }
    }
}

impl SeedCacheConfig {
    /// Budget in bytes.
    pub fn max_storage_bytes(&self) -> u64 {
        self.max_storage_mb * 1024 * 1024
    }
}

/// Telemetry ingestion and pattern alerting policy for
/// [`crate::matcher::PatternMatcher`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Ring buffer capacity. Oldest samples drop on overflow.
    pub buffer_capacity: usize,

    /// Median filter window applied to the barometer series. Kept odd;
    /// shrinks symmetrically at the series edges.
    pub median_window: usize,

    /// Divisor mapping a pressure slope in hPa/hour onto the ±1 vector
    /// feature range. 10 hPa/h is treated as full-severity.
    pub pressure_trend_norm_hpa_per_hr: f64,

    /// Minimum seconds between similarity queries against the store, so
    /// 10 Hz emergency-mode ingestion stays O(1) per sample.
    pub min_check_interval_secs: i64,

    /// Geographic radius for the hybrid pattern query, nautical miles.
    pub search_radius_nm: f64,

    /// Cosine-distance ceiling for a stored pattern to count as a match.
    pub max_vector_distance: f64,

    /// Keywords marking a stored pattern label as dangerous. Substring
    /// match, case-insensitive.
    pub danger_keywords: Vec<String>,

    /// Seconds between automatic self-recordings of the current vector.
    /// Zero disables self-recording.
    pub record_interval_secs: i64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 60,
            median_window: 5,
            pressure_trend_norm_hpa_per_hr: 10.0,
            min_check_interval_secs: 30,
            search_radius_nm: 50.0,
            max_vector_distance: 0.15,
            danger_keywords: vec![
                "gale".to_string(),
                "storm".to_string(),
                "squall".to_string(),
                "hurricane".to_string(),
                "waterspout".to_string(),
            ],
            record_interval_secs: 600,
        }
    }
}

/// Drift integration policy for [`crate::drift::DebrisPredictor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Leeway factor per hazard type: the fraction of wind velocity a
    /// floating object picks up on top of surface current. High-freeboard
    /// objects (containers) ride the wind; low-freeboard ones (marine
    /// mammals, waterlogged debris) barely feel it. Tunable, not physics.
    pub leeway_factors: HashMap<HazardType, f64>,

    /// Leeway applied to hazard types absent from the table.
    pub default_leeway: f64,

    /// Hazards reported more than this many hours ago are no longer
    /// integrated.
    pub active_window_hours: i64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        let mut leeway_factors = HashMap::new();
        leeway_factors.insert(HazardType::Container, 0.06);
        leeway_factors.insert(HazardType::AdriftVessel, 0.05);
        leeway_factors.insert(HazardType::Debris, 0.03);
        leeway_factors.insert(HazardType::FishingGear, 0.02);
        leeway_factors.insert(HazardType::MarineMammal, 0.01);
        Self {
            leeway_factors,
            default_leeway: 0.03,
            active_window_hours: 72,
        }
    }
}

impl DriftConfig {
    /// Leeway factor for a hazard type, falling back to the default.
    pub fn leeway_for(&self, kind: HazardType) -> f64 {
        self.leeway_factors
            .get(&kind)
            .copied()
            .unwrap_or(self.default_leeway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_labels_cover_bands() {
        let config = ConsensusConfig::default();
        assert_eq!(config.family_label(5.0), "calm");
        assert_eq!(config.family_label(18.0), "breeze");
        assert_eq!(config.family_label(28.0), "strong-wind");
        assert_eq!(config.family_label(40.0), "gale");
        assert_eq!(config.family_label(60.0), "storm");
    }

    #[test]
    fn family_label_band_edges_are_exclusive_below() {
        let config = ConsensusConfig::default();
        assert_eq!(config.family_label(12.0), "breeze");
        assert_eq!(config.family_label(11.9), "calm");
    }

    #[test]
    fn leeway_falls_back_to_default() {
        let config = DriftConfig::default();
        assert!(config.leeway_for(HazardType::Container) > config.leeway_for(HazardType::MarineMammal));
        assert_eq!(config.leeway_for(HazardType::Other), config.default_leeway);
    }

    #[test]
    fn cache_budget_converts_to_bytes() {
        let config = SeedCacheConfig {
            max_storage_mb: 10,
            ..Default::default()
        };
        assert_eq!(config.max_storage_bytes(), 10 * 1024 * 1024);
    }
}
