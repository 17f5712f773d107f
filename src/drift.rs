//! Hazard drift forecasting.
//!
//! Forward Euler over simplified drift physics: at each step a floating
//! object moves with the surface current plus a per-type leeway fraction of
//! the wind. High-freeboard objects (containers) ride the wind hard;
//! low-freeboard ones (marine mammals) barely feel it. The integrator
//! samples its environment through the [`DriftField`] trait so it runs
//! identically over a cached seed or a uniform test field.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::config::DriftConfig;
use crate::error::Result;
use crate::geo::{displacement_nm, offset_position_nm};
use crate::seed::cache::SeedCache;
use crate::store::SpatialVectorStore;
use crate::types::PathPoint;

/// Environmental sampler for drift integration. Either component may be
/// unavailable offline; missing data integrates as zero velocity rather
/// than failing.
pub trait DriftField {
    /// 10 m wind vector (east, north) in m/s at a position and time.
    fn wind_mps(&self, lat: f64, lon: f64, at: DateTime<Utc>) -> Option<(f64, f64)>;

    /// Surface current vector (east, north) in m/s at a position and time.
    fn current_mps(&self, lat: f64, lon: f64, at: DateTime<Utc>) -> Option<(f64, f64)>;
}

/// Spatially uniform field. Test and dead-reckoning fallback.
#[derive(Debug, Clone, Copy)]
pub struct UniformField {
    pub wind_mps: (f64, f64),
    pub current_mps: (f64, f64),
}

impl DriftField for UniformField {
    fn wind_mps(&self, _lat: f64, _lon: f64, _at: DateTime<Utc>) -> Option<(f64, f64)> {
        Some(self.wind_mps)
    }

    fn current_mps(&self, _lat: f64, _lon: f64, _at: DateTime<Utc>) -> Option<(f64, f64)> {
        Some(self.current_mps)
    }
}

/// Field backed by the seed cache: wind from `u10`/`v10`, surface current
/// from `uo`/`vo` when a seed carries them.
pub struct SeedDriftField {
    cache: Arc<SeedCache>,
}

impl SeedDriftField {
    pub fn new(cache: Arc<SeedCache>) -> Self {
        Self { cache }
    }

    fn sample(&self, names: (&str, &str), lat: f64, lon: f64, at: DateTime<Utc>) -> Option<(f64, f64)> {
        let seed = self.cache.find_covering_seed(lat, lon, at)?;
        let time_idx = seed.nearest_time_index(at)?;
        let (lat_idx, lon_idx) = seed.nearest_cell(lat, lon)?;
        let east = seed.value_at(names.0, time_idx, lat_idx, lon_idx)?;
        let north = seed.value_at(names.1, time_idx, lat_idx, lon_idx)?;
        Some((f64::from(east), f64::from(north)))
    }
}

impl DriftField for SeedDriftField {
    fn wind_mps(&self, lat: f64, lon: f64, at: DateTime<Utc>) -> Option<(f64, f64)> {
        self.sample(("u10", "v10"), lat, lon, at)
    }

    fn current_mps(&self, lat: f64, lon: f64, at: DateTime<Utc>) -> Option<(f64, f64)> {
        self.sample(("uo", "vo"), lat, lon, at)
    }
}

/// Integrates drift trajectories for active hazards and writes the
/// predicted paths back to the hazard table.
pub struct DebrisPredictor {
    store: Arc<SpatialVectorStore>,
    config: DriftConfig,
}

impl DebrisPredictor {
    pub fn new(store: Arc<SpatialVectorStore>, config: DriftConfig) -> Self {
        Self { store, config }
    }

    /// Forecast drift for every active hazard.
    ///
    /// Each path holds exactly `floor(horizon_hours / step_hours)` points;
    /// the first timestamp is strictly after the call time and timestamps
    /// strictly increase. Returns the number of hazard paths written.
    pub fn forecast_drift(
        &self,
        horizon_hours: f64,
        step_hours: f64,
        field: &dyn DriftField,
    ) -> Result<usize> {
        if !(horizon_hours > 0.0) || !(step_hours > 0.0) {
            return Ok(0);
        }
        let steps = (horizon_hours / step_hours).floor() as usize;
        if steps == 0 {
            return Ok(0);
        }

        let now = Utc::now();
        let since = now - Duration::hours(self.config.active_window_hours);
        let hazards = self.store.active_hazards(since)?;

        let dt_secs = step_hours * 3600.0;
        let step_duration = Duration::milliseconds((step_hours * 3_600_000.0) as i64);

        let mut written = 0;
        for hazard in &hazards {
            let leeway = self.config.leeway_for(hazard.kind);
            let mut lat = hazard.lat;
            let mut lon = hazard.lon;
            let mut at = now;
            let mut path = Vec::with_capacity(steps);

            for _ in 0..steps {
                let (wind_u, wind_v) = field.wind_mps(lat, lon, at).unwrap_or((0.0, 0.0));
                let (cur_u, cur_v) = field.current_mps(lat, lon, at).unwrap_or((0.0, 0.0));
                let east_mps = cur_u + leeway * wind_u;
                let north_mps = cur_v + leeway * wind_v;

                let (next_lat, next_lon) = offset_position_nm(
                    lat,
                    lon,
                    displacement_nm(north_mps, dt_secs),
                    displacement_nm(east_mps, dt_secs),
                );
                lat = next_lat;
                lon = next_lon;
                at += step_duration;
                path.push(PathPoint {
                    lat,
                    lon,
                    timestamp: at,
                });
            }

            self.store.update_hazard_path(&hazard.id, &path)?;
            debug!(hazard_id = %hazard.id, kind = %hazard.kind, points = path.len(), "drift path updated");
            written += 1;
        }

        if written > 0 {
            info!(hazards = written, horizon_hours, step_hours, "drift forecast complete");
        }
        Ok(written)
    }

    /// Render every hazard carrying a predicted path as a GeoJSON
    /// FeatureCollection of LineStrings. Coordinates are `[lon, lat]`;
    /// per-point timestamps ride in the feature properties.
    pub fn predicted_paths_geojson(&self) -> Result<serde_json::Value> {
        let hazards = self.store.hazards_with_paths()?;

        let features: Vec<serde_json::Value> = hazards
            .iter()
            .map(|hazard| {
                let coordinates: Vec<serde_json::Value> = hazard
                    .predicted_path
                    .iter()
                    .map(|p| json!([p.lon, p.lat]))
                    .collect();
                let times: Vec<String> = hazard
                    .predicted_path
                    .iter()
                    .map(|p| p.timestamp.to_rfc3339())
                    .collect();
                json!({
                    "type": "Feature",
                    "geometry": {
                        "type": "LineString",
                        "coordinates": coordinates,
                    },
                    "properties": {
                        "hazard_id": hazard.id,
                        "hazard_type": hazard.kind.as_str(),
                        "reported_at": hazard.reported_at.to_rfc3339(),
                        "times": times,
                    },
                })
            })
            .collect();

        Ok(json!({
            "type": "FeatureCollection",
            "features": features,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedCacheConfig;
    use crate::geo::haversine_nm;
    use crate::seed::cache::SeedMetadata;
    use crate::seed::testutil::uniform_seed;
    use crate::types::{HazardType, SpatialHazard};
    use chrono::TimeZone;

    fn predictor() -> (Arc<SpatialVectorStore>, DebrisPredictor) {
        let store = Arc::new(SpatialVectorStore::open_in_memory().unwrap());
        let predictor = DebrisPredictor::new(store.clone(), DriftConfig::default());
        (store, predictor)
    }

    fn westerly() -> UniformField {
        // 10 m/s wind blowing toward the east, no current.
        UniformField {
            wind_mps: (10.0, 0.0),
            current_mps: (0.0, 0.0),
        }
    }

    #[test]
    fn path_has_exact_step_count_and_future_timestamps() {
        let (store, predictor) = predictor();
        store
            .upsert_hazard(&SpatialHazard::report(HazardType::Container, 36.5, -123.5))
            .unwrap();

        let before = Utc::now();
        let written = predictor.forecast_drift(24.0, 1.0, &westerly()).unwrap();
        assert_eq!(written, 1);

        let hazards = store.hazards_with_paths().unwrap();
        let path = &hazards[0].predicted_path;
        assert_eq!(path.len(), 24);
        assert!(path[0].timestamp > before);
        for pair in path.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
    }

    #[test]
    fn fractional_horizon_floors_step_count() {
        let (store, predictor) = predictor();
        store
            .upsert_hazard(&SpatialHazard::report(HazardType::Debris, 36.5, -123.5))
            .unwrap();
        predictor.forecast_drift(10.0, 3.0, &westerly()).unwrap();

        let hazards = store.hazards_with_paths().unwrap();
        assert_eq!(hazards[0].predicted_path.len(), 3);
    }

    #[test]
    fn high_leeway_drifts_farther_than_low() {
        let (store, predictor) = predictor();
        let container = SpatialHazard::report(HazardType::Container, 36.5, -123.5);
        let mammal = SpatialHazard::report(HazardType::MarineMammal, 36.5, -123.5);
        store.upsert_hazard(&container).unwrap();
        store.upsert_hazard(&mammal).unwrap();

        predictor.forecast_drift(24.0, 1.0, &westerly()).unwrap();

        let hazards = store.hazards_with_paths().unwrap();
        let end_range = |id: &str| {
            let hazard = hazards.iter().find(|h| h.id == id).unwrap();
            let end = hazard.predicted_path.last().unwrap();
            haversine_nm(36.5, -123.5, end.lat, end.lon)
        };
        let container_nm = end_range(&container.id);
        let mammal_nm = end_range(&mammal.id);
        assert!(
            container_nm > mammal_nm * 2.0,
            "container {container_nm} nm vs mammal {mammal_nm} nm"
        );
    }

    #[test]
    fn current_moves_everything_equally() {
        let (store, predictor) = predictor();
        let hazard = SpatialHazard::report(HazardType::MarineMammal, 0.0, 0.0);
        store.upsert_hazard(&hazard).unwrap();

        // Pure 1 kt-ish northward current, no wind: ~12 nm over 24 h.
        let field = UniformField {
            wind_mps: (0.0, 0.0),
            current_mps: (0.0, 0.5144),
        };
        predictor.forecast_drift(24.0, 1.0, &field).unwrap();

        let hazards = store.hazards_with_paths().unwrap();
        let end = hazards[0].predicted_path.last().unwrap();
        let travelled = haversine_nm(0.0, 0.0, end.lat, end.lon);
        assert!((travelled - 24.0).abs() < 1.0, "got {travelled}");
        assert!(end.lat > 0.0);
    }

    #[test]
    fn stale_hazards_are_skipped() {
        let (store, predictor) = predictor();
        let mut stale = SpatialHazard::report(HazardType::Debris, 10.0, 10.0);
        stale.reported_at = Utc::now() - Duration::hours(100);
        store.upsert_hazard(&stale).unwrap();

        let written = predictor.forecast_drift(24.0, 1.0, &westerly()).unwrap();
        assert_eq!(written, 0);
        assert!(store.hazards_with_paths().unwrap().is_empty());
    }

    #[test]
    fn zero_or_negative_inputs_write_nothing() {
        let (store, predictor) = predictor();
        store
            .upsert_hazard(&SpatialHazard::report(HazardType::Debris, 0.0, 0.0))
            .unwrap();
        assert_eq!(predictor.forecast_drift(0.0, 1.0, &westerly()).unwrap(), 0);
        assert_eq!(predictor.forecast_drift(24.0, 0.0, &westerly()).unwrap(), 0);
        assert_eq!(predictor.forecast_drift(0.5, 1.0, &westerly()).unwrap(), 0);
    }

    #[test]
    fn geojson_uses_lon_lat_order_with_per_point_times() {
        let (store, predictor) = predictor();
        store
            .upsert_hazard(&SpatialHazard::report(HazardType::Container, 36.5, -123.5))
            .unwrap();
        predictor.forecast_drift(6.0, 1.0, &westerly()).unwrap();

        let geojson = predictor.predicted_paths_geojson().unwrap();
        assert_eq!(geojson["type"], "FeatureCollection");
        let features = geojson["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);

        let feature = &features[0];
        assert_eq!(feature["geometry"]["type"], "LineString");
        let coordinates = feature["geometry"]["coordinates"].as_array().unwrap();
        assert_eq!(coordinates.len(), 6);
        // Eastward drift from (-123.5, 36.5): first slot is the longitude.
        let first = coordinates[0].as_array().unwrap();
        assert!(first[0].as_f64().unwrap() < -120.0);
        assert!((first[1].as_f64().unwrap() - 36.5).abs() < 0.2);

        let times = feature["properties"]["times"].as_array().unwrap();
        assert_eq!(times.len(), coordinates.len());
        assert_eq!(feature["properties"]["hazard_type"], "container");
    }

    #[test]
    fn seed_drift_field_samples_cached_wind() {
        let store = Arc::new(SpatialVectorStore::open_in_memory().unwrap());
        let cache = Arc::new(SeedCache::new(store, SeedCacheConfig::default()));
        let base = Utc.with_ymd_and_hms(2026, 8, 5, 0, 0, 0).unwrap();
        cache
            .add_seed(
                uniform_seed("field", base, 6, 5.0, -2.0, 101_300.0),
                SeedMetadata {
                    file_size_bytes: 1024,
                    expires_at: Utc::now() + Duration::days(2),
                    artifact_path: None,
                },
            )
            .unwrap();

        let field = SeedDriftField::new(cache);
        let wind = field.wind_mps(37.0, -123.0, base + Duration::hours(1)).unwrap();
        assert_eq!(wind, (5.0, -2.0));
        // No ocean-current variables in this seed.
        assert!(field.current_mps(37.0, -123.0, base + Duration::hours(1)).is_none());
        // Outside coverage: no data, not an error.
        assert!(field.wind_mps(50.0, 0.0, base).is_none());
    }
}
