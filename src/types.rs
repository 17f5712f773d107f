//! Domain value objects shared across the Circular Truth components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed dimensionality of every atmospheric feature vector. Stable
/// regardless of which optional fields a sample carries, so vectors written
/// months apart remain comparable.
pub const VECTOR_DIM: usize = 16;

// Unit scales mapping physical values onto comparable feature ranges before
// cosine comparison. A raw 1013 hPa component would otherwise drown every
// other feature.
const TEMP_SCALE_C: f32 = 40.0;
const PRESSURE_CENTER_HPA: f32 = 1013.25;
const PRESSURE_SCALE_HPA: f32 = 50.0;
const WIND_SCALE_MPS: f32 = 30.0;
const WAVE_HEIGHT_SCALE_M: f32 = 15.0;
const WAVE_PERIOD_SCALE_S: f32 = 25.0;

/// Snapshot of atmospheric state at one position and time.
///
/// The common currency between pattern search and truth comparison. Optional
/// fields missing from a sensor suite or a seed simply vectorize to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtmosphericVector {
    /// Air temperature, degrees Celsius.
    pub temperature_c: Option<f64>,
    /// Sea-level pressure, hPa.
    pub pressure_hpa: Option<f64>,
    /// Relative humidity, percent.
    pub humidity_pct: Option<f64>,
    /// Eastward wind component, m/s.
    pub wind_u_mps: Option<f64>,
    /// Northward wind component, m/s.
    pub wind_v_mps: Option<f64>,
    /// Pressure tendency scaled to ±1 (−1.0 is a 10 hPa/h fall).
    pub pressure_trend: f64,
    /// Total cloud cover, percent.
    pub cloud_cover_pct: Option<f64>,
    /// Significant wave height, metres.
    pub wave_height_m: Option<f64>,
    /// Mean wave period, seconds.
    pub wave_period_s: Option<f64>,
}

impl AtmosphericVector {
    /// Project onto the fixed [`VECTOR_DIM`]-length feature vector.
    ///
    /// Missing optional fields default to 0; trailing components are
    /// reserved padding so the stored dimensionality never changes.
    pub fn to_fixed(&self) -> [f32; VECTOR_DIM] {
        let mut v = [0.0f32; VECTOR_DIM];
        v[0] = self.temperature_c.unwrap_or(0.0) as f32 / TEMP_SCALE_C;
        v[1] = self
            .pressure_hpa
            .map(|p| (p as f32 - PRESSURE_CENTER_HPA) / PRESSURE_SCALE_HPA)
            .unwrap_or(0.0);
        v[2] = self.humidity_pct.unwrap_or(0.0) as f32 / 100.0;
        v[3] = self.wind_u_mps.unwrap_or(0.0) as f32 / WIND_SCALE_MPS;
        v[4] = self.wind_v_mps.unwrap_or(0.0) as f32 / WIND_SCALE_MPS;
        v[5] = self.pressure_trend as f32;
        v[6] = self.cloud_cover_pct.unwrap_or(0.0) as f32 / 100.0;
        v[7] = self.wave_height_m.unwrap_or(0.0) as f32 / WAVE_HEIGHT_SCALE_M;
        v[8] = self.wave_period_s.unwrap_or(0.0) as f32 / WAVE_PERIOD_SCALE_S;
        v
    }

    /// Wind speed magnitude in knots, when both components are present.
    pub fn wind_speed_kts(&self) -> Option<f64> {
        let u = self.wind_u_mps?;
        let v = self.wind_v_mps?;
        Some((u * u + v * v).sqrt() * crate::geo::MPS_TO_KTS)
    }
}

/// One sample from the vessel's instrument bridge.
///
/// Transient: held only in the matcher's rolling buffer. Units are
/// normalized at the bridge boundary: hPa for pressure, knots for speeds,
/// true degrees for angles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Latitude, degrees.
    pub lat: f64,
    /// Longitude, degrees.
    pub lon: f64,
    /// True heading, degrees.
    pub heading_deg: f64,
    /// Speed over ground, knots.
    pub sog_kts: f64,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Barometer reading, hPa.
    pub barometer_hpa: Option<f64>,
    /// True wind speed, knots.
    pub true_wind_speed_kts: Option<f64>,
    /// True wind angle relative to the bow, degrees.
    pub true_wind_angle_deg: Option<f64>,
}

impl TelemetrySnapshot {
    /// Wind vector in m/s, meteorological convention (a wind *from* the
    /// north blows southward, so u/v point down-wind). Requires both wind
    /// instruments.
    pub fn wind_components_mps(&self) -> Option<(f64, f64)> {
        let speed_mps = self.true_wind_speed_kts? / crate::geo::MPS_TO_KTS;
        let angle = self.true_wind_angle_deg?;
        let from_deg = (self.heading_deg + angle).rem_euclid(360.0);
        let from_rad = from_deg.to_radians();
        let u = -speed_mps * from_rad.sin();
        let v = -speed_mps * from_rad.cos();
        Some((u, v))
    }
}

/// Geographic bounding box, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Whether the box contains a position. Edges are inclusive.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }
}

/// One point of a predicted drift path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

/// Category of a crowd-reported floating hazard. Drives the leeway factor
/// used by drift integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardType {
    /// Shipping container, mostly submerged but high effective freeboard.
    Container,
    /// Unmanned vessel adrift.
    AdriftVessel,
    /// General floating debris.
    Debris,
    /// Lost nets and longlines.
    FishingGear,
    /// Whale or other large animal on the surface.
    MarineMammal,
    /// Anything else worth reporting.
    Other,
}

impl HazardType {
    /// Stable string form used in the hazard table.
    pub fn as_str(&self) -> &'static str {
        match self {
            HazardType::Container => "container",
            HazardType::AdriftVessel => "adrift_vessel",
            HazardType::Debris => "debris",
            HazardType::FishingGear => "fishing_gear",
            HazardType::MarineMammal => "marine_mammal",
            HazardType::Other => "other",
        }
    }

    /// Parse the stable string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "container" => Some(HazardType::Container),
            "adrift_vessel" => Some(HazardType::AdriftVessel),
            "debris" => Some(HazardType::Debris),
            "fishing_gear" => Some(HazardType::FishingGear),
            "marine_mammal" => Some(HazardType::MarineMammal),
            "other" => Some(HazardType::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for HazardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reported floating hazard. The predicted path is written only by the
/// drift predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialHazard {
    pub id: String,
    pub kind: HazardType,
    pub lat: f64,
    pub lon: f64,
    pub reported_at: DateTime<Utc>,
    /// Ordered predicted positions, empty until forecast.
    #[serde(default)]
    pub predicted_path: Vec<PathPoint>,
}

impl SpatialHazard {
    /// New hazard report at a position, stamped now.
    pub fn report(kind: HazardType, lat: f64, lon: f64) -> Self {
        Self {
            id: format!("hz-{}", Uuid::new_v4()),
            kind,
            lat,
            lon,
            reported_at: Utc::now(),
            predicted_path: Vec::new(),
        }
    }
}

/// A persisted atmospheric pattern. Write-once; deleted only by
/// maintenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPattern {
    /// Row id assigned by the store.
    pub id: i64,
    /// Fixed-dimension embedding.
    pub embedding: Vec<f32>,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    /// Outcome or condition label, e.g. `"gale-onset"`.
    pub label: String,
}

/// A pattern returned from similarity search, with its computed distances.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern: StoredPattern,
    /// Cosine distance to the query, 0 = identical direction.
    pub distance: f64,
    /// Great-circle range to the query position, when the query was
    /// geographic.
    pub range_nm: Option<f64>,
}

/// Agreement level between forecast and observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusLevel {
    /// Forecast and sensors tell the same story.
    Agree,
    /// Same qualitative weather family, differing magnitude.
    Partial,
    /// Qualitatively different outcomes.
    Disagree,
    /// No prediction available to compare against.
    Unknown,
}

/// Outcome of one truth check. Ephemeral; persistence of divergence events
/// belongs to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusReport {
    pub is_divergent: bool,
    pub level: ConsensusLevel,
    pub wind_delta_kts: f64,
    pub pressure_delta_hpa: f64,
}

impl ConsensusReport {
    /// The "no data" report: unknown, not divergent.
    pub fn unknown() -> Self {
        Self {
            is_divergent: false,
            level: ConsensusLevel::Unknown,
            wind_delta_kts: 0.0,
            pressure_delta_hpa: 0.0,
        }
    }
}

/// Raised when live conditions strongly match a stored dangerous pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardAlert {
    /// Label of the matched pattern.
    pub label: String,
    /// Cosine distance between live vector and the pattern.
    pub distance: f64,
    /// Range to where the pattern was recorded, nautical miles.
    pub range_nm: Option<f64>,
    /// Row id of the matched pattern.
    pub pattern_id: i64,
    /// When the alert was raised.
    pub at: DateTime<Utc>,
}

/// One grid cell of wind extracted from a seed time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindSample {
    pub lat: f64,
    pub lon: f64,
    /// Eastward 10 m wind, m/s.
    pub u10: f64,
    /// Northward 10 m wind, m/s.
    pub v10: f64,
    pub timestamp: DateTime<Utc>,
}
