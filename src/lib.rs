//! Circular Truth: offline-first marine weather intelligence core.
//!
//! This crate is the on-device reasoning layer of a vessel's weather
//! system. It ingests compact quantized regional forecasts ("seeds"),
//! keeps a storage-bounded cache of them, encodes live and historical
//! atmospheric state as fixed-length vectors, answers hybrid
//! geographic+similarity queries over those vectors and crowd-reported
//! hazards, reconciles live telemetry against forecast predictions to
//! detect divergence, and integrates simplified drift physics to predict
//! hazard trajectories.
//!
//! ## Components
//!
//! ```text
//! +-----------+     +-----------+     +--------------------+
//! | SeedCodec | --> | SeedCache | <-- | PatternMatcher     |
//! +-----------+     +-----+-----+     +---------+----------+
//!                         |                     |
//!                         v                     v
//!                   +-----+------+    +---------+----------+
//!                   |TruthChecker|    | SpatialVectorStore |
//!                   +------------+    +---------+----------+
//!                                               ^
//!                                     +---------+----------+
//!                                     | DebrisPredictor    |
//!                                     +--------------------+
//! ```
//!
//! - [`seed::codec`]: decodes zstd-wrapped seed artifacts, dequantizes
//!   variables, extracts wind fields.
//! - [`seed::cache`]: LRU cache of decoded seeds under a byte budget,
//!   metadata mirrored to the persistent store.
//! - [`store`]: SQLite-backed store of pattern vectors, hazards, and seed
//!   metadata; exact cosine ranking with geographic pre-filtering.
//! - [`matcher`]: bounded telemetry ring buffer, noise-robust derived
//!   features, dangerous-pattern alerting.
//! - [`truth`]: four-state forecast/observation consensus classification.
//! - [`drift`]: leeway-aware drift integration and GeoJSON path output.
//!
//! ## Offline-first contract
//!
//! No network I/O happens anywhere in this crate. A cache miss, an empty
//! similarity result, or an absent prediction is a well-defined "no data"
//! outcome, never an error and never a block; the vessel may be out of
//! satellite coverage for weeks.

pub mod config;
pub mod drift;
pub mod error;
pub mod geo;
pub mod matcher;
pub mod seed;
pub mod store;
pub mod truth;

mod types;

// ============================================================================
// Re-exports: error handling
// ============================================================================

pub use error::{Result, TruthError};

// ============================================================================
// Re-exports: configuration
// ============================================================================

pub use config::{ConsensusConfig, DriftConfig, MatcherConfig, SeedCacheConfig};

// ============================================================================
// Re-exports: domain types
// ============================================================================

pub use types::{
    AtmosphericVector, BoundingBox, ConsensusLevel, ConsensusReport, HazardAlert, HazardType,
    PathPoint, PatternMatch, SpatialHazard, StoredPattern, TelemetrySnapshot, WindSample,
    VECTOR_DIM,
};

// ============================================================================
// Re-exports: components
// ============================================================================

pub use drift::{DebrisPredictor, DriftField, SeedDriftField, UniformField};
pub use matcher::{MatcherStats, PatternMatcher};
pub use seed::cache::{CachedSeedEntry, SeedCache, SeedCacheStats, SeedMetadata};
pub use seed::codec::{decode as decode_seed, extract_wind_data, SeedArtifact};
pub use seed::{Variable, WeatherSeed};
pub use store::{SeedMetaRow, SpatialVectorStore};
pub use truth::TruthChecker;
