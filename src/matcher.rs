//! Live telemetry ingestion and pattern matching.
//!
//! The matcher owns a bounded ring buffer of recent telemetry, derives a
//! noise-robust atmospheric vector from it, and
//! periodically runs the hybrid store query to ask: "have conditions like
//! these been recorded nearby, and did they end badly?" Per-sample cost is
//! constant (a fixed-capacity buffer and a fixed median window), so the
//! degraded 10 Hz emergency polling mode neither grows memory nor falls
//! behind.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::MatcherConfig;
use crate::error::Result;
use crate::seed::cache::SeedCache;
use crate::store::SpatialVectorStore;
use crate::types::{AtmosphericVector, HazardAlert, TelemetrySnapshot};

/// Kelvin offset for the seed's 2 m temperature field.
const KELVIN_OFFSET: f64 = 273.15;

/// Counters and timing exposed by [`PatternMatcher::stats`].
#[derive(Debug, Clone, Default)]
pub struct MatcherStats {
    /// When the last store query ran, by telemetry clock.
    pub last_check_time: Option<DateTime<Utc>>,
    pub samples_processed: u64,
    pub alerts_raised: u64,
    pub patterns_recorded: u64,
    pub buffer_len: usize,
}

struct MatcherState {
    buffer: VecDeque<TelemetrySnapshot>,
    current: AtmosphericVector,
    trend_hpa_per_hour: f64,
    last_check_time: Option<DateTime<Utc>>,
    last_record_time: Option<DateTime<Utc>>,
    samples_processed: u64,
    alerts_raised: u64,
    patterns_recorded: u64,
}

/// Ingests telemetry, derives features, and raises pattern alerts.
pub struct PatternMatcher {
    config: MatcherConfig,
    store: Arc<SpatialVectorStore>,
    cache: Arc<SeedCache>,
    state: Mutex<MatcherState>,
}

impl PatternMatcher {
    pub fn new(
        store: Arc<SpatialVectorStore>,
        cache: Arc<SeedCache>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            state: Mutex::new(MatcherState {
                buffer: VecDeque::with_capacity(config.buffer_capacity),
                current: AtmosphericVector::default(),
                trend_hpa_per_hour: 0.0,
                last_check_time: None,
                last_record_time: None,
                samples_processed: 0,
                alerts_raised: 0,
                patterns_recorded: 0,
            }),
            config,
            store,
            cache,
        }
    }

    /// Push one telemetry sample, recompute derived features, and return a
    /// hazard alert when the live state strongly matches a dangerous
    /// stored pattern.
    ///
    /// Store queries are rate-limited by `min_check_interval_secs`; most
    /// calls return `Ok(None)` after the O(1) buffer-and-features update.
    pub fn process_telemetry(&self, snapshot: TelemetrySnapshot) -> Result<Option<HazardAlert>> {
        let (query_due, record_due) = {
            let mut state = self.state.lock();

            state.buffer.push_back(snapshot.clone());
            while state.buffer.len() > self.config.buffer_capacity {
                state.buffer.pop_front();
            }
            state.samples_processed += 1;

            let trend = pressure_trend_hpa_per_hour(&state.buffer, self.config.median_window);
            state.trend_hpa_per_hour = trend;
            state.current = self.derive_vector(&snapshot, trend);

            let query_due = interval_elapsed(
                state.last_check_time,
                snapshot.timestamp,
                self.config.min_check_interval_secs,
            );
            let record_due = self.config.record_interval_secs > 0
                && interval_elapsed(
                    state.last_record_time,
                    snapshot.timestamp,
                    self.config.record_interval_secs,
                );
            (query_due, record_due)
        };

        if record_due {
            self.record_current(&snapshot, "observed-conditions")?;
            self.state.lock().last_record_time = Some(snapshot.timestamp);
        }

        if !query_due {
            return Ok(None);
        }

        let embedding = self.state.lock().current.to_fixed();
        self.state.lock().last_check_time = Some(snapshot.timestamp);

        let matches = self.store.find_similar_nearby(
            &embedding,
            snapshot.lat,
            snapshot.lon,
            self.config.search_radius_nm,
            8,
            Some(self.config.max_vector_distance),
        )?;

        for hit in matches {
            if self.is_dangerous_label(&hit.pattern.label) {
                let alert = HazardAlert {
                    label: hit.pattern.label.clone(),
                    distance: hit.distance,
                    range_nm: hit.range_nm,
                    pattern_id: hit.pattern.id,
                    at: snapshot.timestamp,
                };
                info!(
                    label = %alert.label,
                    distance = alert.distance,
                    "live conditions match dangerous pattern"
                );
                self.state.lock().alerts_raised += 1;
                return Ok(Some(alert));
            }
        }
        Ok(None)
    }

    /// Latest derived atmospheric vector.
    pub fn current_conditions(&self) -> AtmosphericVector {
        self.state.lock().current.clone()
    }

    /// Raw pressure tendency, hPa per hour, before feature normalization.
    pub fn pressure_trend_hpa_per_hour(&self) -> f64 {
        self.state.lock().trend_hpa_per_hour
    }

    /// Persist the current vector as a labelled pattern at the vessel's
    /// latest position. Returns the stored row id, or `None` when no
    /// telemetry has arrived yet.
    pub fn record_pattern(&self, label: &str) -> Result<Option<i64>> {
        let Some(snapshot) = self.state.lock().buffer.back().cloned() else {
            return Ok(None);
        };
        self.record_current(&snapshot, label).map(Some)
    }

    /// Counters snapshot.
    pub fn stats(&self) -> MatcherStats {
        let state = self.state.lock();
        MatcherStats {
            last_check_time: state.last_check_time,
            samples_processed: state.samples_processed,
            alerts_raised: state.alerts_raised,
            patterns_recorded: state.patterns_recorded,
            buffer_len: state.buffer.len(),
        }
    }

    fn record_current(&self, snapshot: &TelemetrySnapshot, label: &str) -> Result<i64> {
        let embedding = self.state.lock().current.to_fixed();
        let id = self.store.store_pattern(
            &embedding,
            snapshot.lat,
            snapshot.lon,
            snapshot.timestamp,
            label,
        )?;
        let mut state = self.state.lock();
        state.patterns_recorded += 1;
        debug!(pattern_id = id, label, "recorded pattern");
        Ok(id)
    }

    fn is_dangerous_label(&self, label: &str) -> bool {
        let label = label.to_ascii_lowercase();
        self.config
            .danger_keywords
            .iter()
            .any(|keyword| label.contains(&keyword.to_ascii_lowercase()))
    }

    /// Derive the live vector from the newest sample, the filtered trend,
    /// and, when a covering seed exists, the forecast-only fields the
    /// instruments cannot measure.
    fn derive_vector(&self, snapshot: &TelemetrySnapshot, trend_hpa_per_hour: f64) -> AtmosphericVector {
        let normalized_trend = (trend_hpa_per_hour / self.config.pressure_trend_norm_hpa_per_hr)
            .clamp(-1.0, 1.0);

        let mut vector = AtmosphericVector {
            pressure_hpa: snapshot.barometer_hpa,
            pressure_trend: normalized_trend,
            ..Default::default()
        };
        if let Some((u, v)) = snapshot.wind_components_mps() {
            vector.wind_u_mps = Some(u);
            vector.wind_v_mps = Some(v);
        }

        if let Some(seed) =
            self.cache
                .find_covering_seed(snapshot.lat, snapshot.lon, snapshot.timestamp)
        {
            if let (Some(time_idx), Some((lat_idx, lon_idx))) = (
                seed.nearest_time_index(snapshot.timestamp),
                seed.nearest_cell(snapshot.lat, snapshot.lon),
            ) {
                let at = |name: &str| seed.value_at(name, time_idx, lat_idx, lon_idx);
                vector.temperature_c = at("t2m").map(|k| f64::from(k) - KELVIN_OFFSET);
                vector.wave_height_m = at("swh").map(f64::from);
                vector.wave_period_s = at("mwp").map(f64::from);
                vector.cloud_cover_pct = at("tcc").map(|frac| f64::from(frac) * 100.0);
            }
        }
        vector
    }
}

/// Whether `interval_secs` has elapsed since `last` as of `now`. A fresh
/// matcher is always due.
fn interval_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_secs: i64) -> bool {
    match last {
        None => true,
        Some(last) => (now - last).num_seconds() >= interval_secs,
    }
}

/// Median-filtered first-difference pressure slope, hPa per hour.
///
/// The median window is centered and only fully-populated windows
/// contribute, so a single extreme sample anywhere in the series, even at
/// an edge, cannot move the slope. Returns 0 until the buffer holds enough
/// barometer samples to place two full windows.
fn pressure_trend_hpa_per_hour(buffer: &VecDeque<TelemetrySnapshot>, window: usize) -> f64 {
    let series: Vec<(i64, f64)> = buffer
        .iter()
        .filter_map(|s| s.barometer_hpa.map(|p| (s.timestamp.timestamp(), p)))
        .collect();

    let window = window.max(1) | 1; // keep odd
    let half = window / 2;
    if series.len() < window || series.len() < 2 * half + 2 {
        return 0.0;
    }

    let first_idx = half;
    let last_idx = series.len() - 1 - half;
    let p_first = window_median(&series, first_idx, half);
    let p_last = window_median(&series, last_idx, half);

    let dt_secs = series[last_idx].0 - series[first_idx].0;
    if dt_secs <= 0 {
        return 0.0;
    }
    (p_last - p_first) / (dt_secs as f64 / 3600.0)
}

fn window_median(series: &[(i64, f64)], center: usize, half: usize) -> f64 {
    let mut values: Vec<f64> = series[center - half..=center + half]
        .iter()
        .map(|(_, p)| *p)
        .collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values[values.len() / 2]
}
