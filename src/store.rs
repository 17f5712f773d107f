//! Persistent spatial-vector store.
//!
//! One SQLite database holds the three durable tables of the subsystem:
//! atmospheric pattern vectors, crowd-reported hazards, and seed cache
//! metadata. The store is the single suspension point for every component;
//! callers share it behind an `Arc` and the internal mutex hands writes to
//! the engine one at a time, relying on SQLite's own transaction boundaries
//! rather than inventing locking above it.
//!
//! Similarity search is exact: candidates are pre-filtered geographically
//! in SQL where the query is geographic, then ranked in process by cosine
//! distance. Pattern tables on a vessel stay small enough (thousands of
//! rows) that exact ranking beats maintaining an approximate index.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::{Result, TruthError};
use crate::geo::haversine_nm;
use crate::types::{
    AtmosphericVector, BoundingBox, PathPoint, PatternMatch, SpatialHazard, StoredPattern,
    VECTOR_DIM,
};

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    embedding BLOB NOT NULL,
    dimension INTEGER NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    timestamp INTEGER NOT NULL,
    label TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_patterns_position ON patterns(lat, lon);
CREATE INDEX IF NOT EXISTS idx_patterns_timestamp ON patterns(timestamp);

CREATE TABLE IF NOT EXISTS hazards (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    reported_at INTEGER NOT NULL,
    predicted_path_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_hazards_reported_at ON hazards(reported_at);

CREATE TABLE IF NOT EXISTS seed_meta (
    id TEXT PRIMARY KEY,
    lat_min REAL NOT NULL,
    lat_max REAL NOT NULL,
    lon_min REAL NOT NULL,
    lon_max REAL NOT NULL,
    downloaded_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    file_size_bytes INTEGER NOT NULL,
    artifact_path TEXT
);
";

/// One row of the seed-metadata table.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedMetaRow {
    pub id: String,
    pub bbox: BoundingBox,
    pub downloaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub file_size_bytes: u64,
    pub artifact_path: Option<String>,
}

/// Persistent store of fixed-dimension atmospheric vectors, hazards, and
/// seed metadata.
pub struct SpatialVectorStore {
    conn: Mutex<Connection>,
}

impl SpatialVectorStore {
    /// Open or create the store at a filesystem path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory store. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create the schema. Idempotent; safe to call on every startup.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Project an [`AtmosphericVector`] onto the store's fixed dimension.
    /// Missing optional fields become 0, so dimensionality never varies.
    pub fn to_fixed_vector(vector: &AtmosphericVector) -> [f32; VECTOR_DIM] {
        vector.to_fixed()
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    /// Persist one pattern vector. Returns the assigned row id.
    pub fn store_pattern(
        &self,
        embedding: &[f32],
        lat: f64,
        lon: f64,
        timestamp: DateTime<Utc>,
        label: &str,
    ) -> Result<i64> {
        validate_embedding(embedding)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO patterns (embedding, dimension, lat, lon, timestamp, label)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                encode_embedding(embedding),
                embedding.len() as i64,
                lat,
                lon,
                timestamp.timestamp(),
                label
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Nearest stored patterns by cosine distance, closest first.
    ///
    /// An empty table yields an empty sequence, never an error: pattern
    /// search keeps working for arbitrarily long offline stretches.
    pub fn find_similar(&self, query: &[f32], limit: usize) -> Result<Vec<PatternMatch>> {
        validate_embedding(query)?;
        let candidates = self.load_patterns(None)?;
        Ok(rank_by_distance(candidates, query, None, None, limit))
    }

    /// Hybrid query: patterns within `radius_nm` of a position, ranked by
    /// cosine distance, optionally capped by a distance ceiling.
    pub fn find_similar_nearby(
        &self,
        query: &[f32],
        lat: f64,
        lon: f64,
        radius_nm: f64,
        limit: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<PatternMatch>> {
        validate_embedding(query)?;
        let candidates = self.load_patterns(Some(coarse_window(lat, lon, radius_nm)))?;
        Ok(rank_by_distance(
            candidates,
            query,
            Some((lat, lon, radius_nm)),
            max_distance,
            limit,
        ))
    }

    /// Number of stored patterns.
    pub fn pattern_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Maintenance: drop patterns recorded before a cutoff. Returns the
    /// number removed.
    pub fn prune_patterns_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM patterns WHERE timestamp < ?1",
            params![cutoff.timestamp()],
        )?;
        if removed > 0 {
            info!(removed, "pruned aged patterns");
        }
        Ok(removed)
    }

    fn load_patterns(&self, window: Option<CoarseWindow>) -> Result<Vec<StoredPattern>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, embedding, dimension, lat, lon, timestamp, label FROM patterns
             WHERE dimension = ?1",
        );
        if let Some(window) = &window {
            sql.push_str(" AND lat BETWEEN ?2 AND ?3");
            if window.lon_bounded {
                sql.push_str(" AND lon BETWEEN ?4 AND ?5");
            }
        }

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(i64, Vec<u8>, i64, f64, f64, i64, String)> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        };
        let rows: Vec<_> = match &window {
            None => stmt
                .query_map(params![VECTOR_DIM as i64], map_row)?
                .collect::<rusqlite::Result<_>>()?,
            Some(w) if w.lon_bounded => stmt
                .query_map(
                    params![VECTOR_DIM as i64, w.lat_min, w.lat_max, w.lon_min, w.lon_max],
                    map_row,
                )?
                .collect::<rusqlite::Result<_>>()?,
            Some(w) => stmt
                .query_map(params![VECTOR_DIM as i64, w.lat_min, w.lat_max], map_row)?
                .collect::<rusqlite::Result<_>>()?,
        };

        let mut patterns = Vec::with_capacity(rows.len());
        for (id, blob, dimension, lat, lon, ts, label) in rows {
            let embedding = decode_embedding(&blob, dimension as usize)?;
            patterns.push(StoredPattern {
                id,
                embedding,
                lat,
                lon,
                timestamp: epoch_to_utc(ts)?,
                label,
            });
        }
        Ok(patterns)
    }

    // ------------------------------------------------------------------
    // Hazards
    // ------------------------------------------------------------------

    /// Insert or refresh a hazard report.
    pub fn upsert_hazard(&self, hazard: &SpatialHazard) -> Result<()> {
        let path_json = if hazard.predicted_path.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&hazard.predicted_path)?)
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hazards (id, kind, lat, lon, reported_at, predicted_path_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                lat = excluded.lat,
                lon = excluded.lon,
                reported_at = excluded.reported_at,
                predicted_path_json = excluded.predicted_path_json",
            params![
                hazard.id,
                hazard.kind.as_str(),
                hazard.lat,
                hazard.lon,
                hazard.reported_at.timestamp(),
                path_json
            ],
        )?;
        Ok(())
    }

    /// Hazards reported at or after a cutoff.
    pub fn active_hazards(&self, since: DateTime<Utc>) -> Result<Vec<SpatialHazard>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, lat, lon, reported_at, predicted_path_json FROM hazards
             WHERE reported_at >= ?1 ORDER BY reported_at DESC",
        )?;
        let rows: Vec<_> = stmt
            .query_map(params![since.timestamp()], hazard_row)?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().map(decode_hazard_row).collect()
    }

    /// Hazards that carry a predicted path.
    pub fn hazards_with_paths(&self) -> Result<Vec<SpatialHazard>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, lat, lon, reported_at, predicted_path_json FROM hazards
             WHERE predicted_path_json IS NOT NULL ORDER BY reported_at DESC",
        )?;
        let rows: Vec<_> = stmt
            .query_map([], hazard_row)?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().map(decode_hazard_row).collect()
    }

    /// Replace a hazard's predicted path. Only the drift predictor writes
    /// this column.
    pub fn update_hazard_path(&self, hazard_id: &str, path: &[PathPoint]) -> Result<()> {
        let path_json = serde_json::to_string(path)?;
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE hazards SET predicted_path_json = ?2 WHERE id = ?1",
            params![hazard_id, path_json],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Seed metadata
    // ------------------------------------------------------------------

    /// Insert or refresh a seed metadata row.
    pub fn upsert_seed_meta(&self, row: &SeedMetaRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO seed_meta (id, lat_min, lat_max, lon_min, lon_max,
                                    downloaded_at, expires_at, file_size_bytes, artifact_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                lat_min = excluded.lat_min,
                lat_max = excluded.lat_max,
                lon_min = excluded.lon_min,
                lon_max = excluded.lon_max,
                downloaded_at = excluded.downloaded_at,
                expires_at = excluded.expires_at,
                file_size_bytes = excluded.file_size_bytes,
                artifact_path = excluded.artifact_path",
            params![
                row.id,
                row.bbox.lat_min,
                row.bbox.lat_max,
                row.bbox.lon_min,
                row.bbox.lon_max,
                row.downloaded_at.timestamp(),
                row.expires_at.timestamp(),
                row.file_size_bytes as i64,
                row.artifact_path
            ],
        )?;
        Ok(())
    }

    /// Bump a seed's recency stamp after a covering-seed read.
    pub fn touch_seed_meta(&self, id: &str, downloaded_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE seed_meta SET downloaded_at = ?2 WHERE id = ?1",
            params![id, downloaded_at.timestamp()],
        )?;
        Ok(())
    }

    /// Remove a seed metadata row.
    pub fn delete_seed_meta(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM seed_meta WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// All seed metadata rows, oldest recency first.
    pub fn load_seed_meta(&self) -> Result<Vec<SeedMetaRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, lat_min, lat_max, lon_min, lon_max,
                    downloaded_at, expires_at, file_size_bytes, artifact_path
             FROM seed_meta ORDER BY downloaded_at ASC",
        )?;
        let rows: Vec<_> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, lat_min, lat_max, lon_min, lon_max, downloaded, expires, size, path) in rows {
            out.push(SeedMetaRow {
                id,
                bbox: BoundingBox {
                    lat_min,
                    lat_max,
                    lon_min,
                    lon_max,
                },
                downloaded_at: epoch_to_utc(downloaded)?,
                expires_at: epoch_to_utc(expires)?,
                file_size_bytes: size.max(0) as u64,
                artifact_path: path,
            });
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Periodic index maintenance. Safe to run while idle readers exist.
    pub fn optimize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA optimize;")?;
        debug!("store optimize pass complete");
        Ok(())
    }

    /// Reclaim file space. Safe to run while idle readers exist; SQLite
    /// serializes it against writers internally.
    pub fn compact(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("VACUUM;")?;
        debug!("store compacted");
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Row and blob helpers
// ----------------------------------------------------------------------

type HazardRow = (String, String, f64, f64, i64, Option<String>);

fn hazard_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HazardRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_hazard_row(row: HazardRow) -> Result<SpatialHazard> {
    let (id, kind_raw, lat, lon, reported, path_json) = row;
    let kind = crate::types::HazardType::parse(&kind_raw).ok_or_else(|| {
        TruthError::InvalidStoredValue(format!("unknown hazard kind: {kind_raw}"))
    })?;
    let predicted_path = match path_json {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };
    Ok(SpatialHazard {
        id,
        kind,
        lat,
        lon,
        reported_at: epoch_to_utc(reported)?,
        predicted_path,
    })
}

fn epoch_to_utc(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| TruthError::InvalidStoredValue(format!("bad epoch seconds: {secs}")))
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.len() != VECTOR_DIM {
        return Err(TruthError::InvalidVector(format!(
            "expected dimension {VECTOR_DIM}, got {}",
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(TruthError::InvalidVector(
            "vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(embedding));
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if blob.len() != dimension * std::mem::size_of::<f32>() {
        return Err(TruthError::InvalidStoredValue(format!(
            "embedding blob is {} bytes, dimension {dimension} needs {}",
            blob.len(),
            dimension * 4
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// ----------------------------------------------------------------------
// Similarity ranking
// ----------------------------------------------------------------------

/// Cosine distance in [0, 2]; `None` when either vector has zero norm.
fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x = f64::from(x);
        let y = f64::from(y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(1.0 - dot / denom)
}

fn rank_by_distance(
    candidates: Vec<StoredPattern>,
    query: &[f32],
    geo: Option<(f64, f64, f64)>,
    max_distance: Option<f64>,
    limit: usize,
) -> Vec<PatternMatch> {
    let mut matches: Vec<PatternMatch> = candidates
        .into_iter()
        .filter_map(|pattern| {
            let range_nm = geo.map(|(lat, lon, _)| haversine_nm(lat, lon, pattern.lat, pattern.lon));
            if let (Some(range), Some((_, _, radius))) = (range_nm, geo) {
                if range > radius {
                    return None;
                }
            }
            let distance = cosine_distance(query, &pattern.embedding)?;
            if let Some(ceiling) = max_distance {
                if distance > ceiling {
                    return None;
                }
            }
            Some(PatternMatch {
                pattern,
                distance,
                range_nm,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.pattern.id.cmp(&b.pattern.id))
    });
    matches.truncate(limit);
    matches
}

/// Coarse SQL pre-filter window around a position. Over-covers on purpose;
/// the exact haversine check runs afterwards.
struct CoarseWindow {
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
    /// False when the window wraps the antimeridian or nears a pole, in
    /// which case the longitude clause is skipped and haversine decides.
    lon_bounded: bool,
}

fn coarse_window(lat: f64, lon: f64, radius_nm: f64) -> CoarseWindow {
    let lat_pad = radius_nm / 60.0;
    let lat_min = (lat - lat_pad).max(-90.0);
    let lat_max = (lat + lat_pad).min(90.0);

    let cos_lat = lat.to_radians().cos();
    if cos_lat < 0.05 {
        return CoarseWindow {
            lat_min,
            lat_max,
            lon_min: -180.0,
            lon_max: 180.0,
            lon_bounded: false,
        };
    }
    let lon_pad = radius_nm / (60.0 * cos_lat);
    let lon_min = lon - lon_pad;
    let lon_max = lon + lon_pad;
    let wraps = lon_min < -180.0 || lon_max > 180.0;
    CoarseWindow {
        lat_min,
        lat_max,
        lon_min,
        lon_max,
        lon_bounded: !wraps,
    }
}
