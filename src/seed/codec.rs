//! Seed artifact codec.
//!
//! The wire artifact is a zstd-compressed binary record produced by the
//! shore-side slicing pipeline and shipped over satellite. This module is
//! the consuming half: container decompression, record decoding, grid
//! validation, dequantization, and wind extraction. Artifact production
//! lives shore-side; [`encode`] exists for tooling and test fixtures.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TruthError};
use crate::seed::{Variable, WeatherSeed};
use crate::types::{BoundingBox, WindSample};

/// Zstd level used when encoding fixtures. The shore pipeline uses the same
/// balanced setting for satellite payloads.
pub const ARTIFACT_ZSTD_LEVEL: i32 = 9;

/// CF names of the 10 m wind components carried by marine seeds.
const WIND_U_NAME: &str = "u10";
const WIND_V_NAME: &str = "v10";

/// The documented serialized record inside the zstd container.
///
/// Times travel as RFC 3339 strings so the record stays language-neutral;
/// numeric payloads are the [`Variable`] tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedArtifact {
    pub seed_id: String,
    pub model_source: String,
    pub model_run_iso: String,
    pub created_at_iso: String,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub resolution_deg: f64,
    pub time_steps_iso: Vec<String>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub variables: Vec<ArtifactVariable>,
}

/// One named variable in the artifact record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVariable {
    pub name: String,
    pub data: Variable,
}

/// Decode a seed artifact into a validated [`WeatherSeed`].
///
/// Fails with [`TruthError::SeedFormat`] when the container is corrupt
/// (zstd failure, undecodable record, unparseable timestamps) and with
/// [`TruthError::SeedValidation`] when the record decodes but its grid
/// dimensions do not reconcile. Either way the failure is local to this
/// seed; callers keep ingesting.
pub fn decode(bytes: &[u8]) -> Result<WeatherSeed> {
    let payload = zstd::decode_all(bytes)
        .map_err(|err| TruthError::SeedFormat(format!("zstd decompression failed: {err}")))?;

    let artifact: SeedArtifact = bincode::deserialize(&payload)
        .map_err(|err| TruthError::SeedFormat(format!("undecodable artifact record: {err}")))?;

    let seed = seed_from_artifact(artifact)?;
    seed.validate()?;
    debug!(
        seed_id = %seed.id,
        variables = seed.variables.len(),
        time_steps = seed.time_steps.len(),
        "decoded seed artifact"
    );
    Ok(seed)
}

/// Encode a [`SeedArtifact`] into its wire form. The inverse of [`decode`],
/// used by fixtures and shore-side tooling.
pub fn encode(artifact: &SeedArtifact) -> Result<Vec<u8>> {
    let payload = bincode::serialize(artifact)
        .map_err(|err| TruthError::SeedFormat(format!("artifact encode failed: {err}")))?;
    zstd::encode_all(payload.as_slice(), ARTIFACT_ZSTD_LEVEL)
        .map_err(|err| TruthError::SeedFormat(format!("zstd compression failed: {err}")))
}

/// Dequantize a variable into physical floats.
///
/// `Quantized` values map through `offset + v * scale`; `Raw` values pass
/// through unchanged. Fails with [`TruthError::SeedValidation`] when the
/// variable does not span `expected_len` grid points.
pub fn dequantize(variable: &Variable, expected_len: usize) -> Result<Vec<f32>> {
    if variable.len() != expected_len {
        return Err(TruthError::SeedValidation(format!(
            "variable carries {} values, grid needs {expected_len}",
            variable.len()
        )));
    }
    Ok(match variable {
        Variable::Quantized {
            values,
            scale,
            offset,
        } => values
            .iter()
            .map(|v| offset + f32::from(*v) * scale)
            .collect(),
        Variable::Raw { values } => values.clone(),
    })
}

/// Extract one wind record per grid cell at a time step.
///
/// Wind components are located by CF name (`u10`/`v10`). Returns an empty
/// sequence, not an error, when either component is absent or the time
/// index is out of range: offline consumers treat "no wind field" as a
/// normal outcome.
pub fn extract_wind_data(seed: &WeatherSeed, time_index: usize) -> Vec<WindSample> {
    let (Some(u_var), Some(v_var)) = (
        seed.variables.get(WIND_U_NAME),
        seed.variables.get(WIND_V_NAME),
    ) else {
        return Vec::new();
    };
    let Some(timestamp) = seed.time_steps.get(time_index).copied() else {
        return Vec::new();
    };

    let n_lons = seed.longitudes.len();
    let n_lats = seed.latitudes.len();
    let step_base = time_index * n_lats * n_lons;

    let mut samples = Vec::with_capacity(n_lats * n_lons);
    for (lat_idx, lat) in seed.latitudes.iter().enumerate() {
        for (lon_idx, lon) in seed.longitudes.iter().enumerate() {
            let flat = step_base + lat_idx * n_lons + lon_idx;
            let (Some(u10), Some(v10)) = (u_var.value_at(flat), v_var.value_at(flat)) else {
                continue;
            };
            samples.push(WindSample {
                lat: *lat,
                lon: *lon,
                u10: f64::from(u10),
                v10: f64::from(v10),
                timestamp,
            });
        }
    }
    samples
}

fn seed_from_artifact(artifact: SeedArtifact) -> Result<WeatherSeed> {
    let time_steps = artifact
        .time_steps_iso
        .iter()
        .map(|iso| parse_timestamp(iso))
        .collect::<Result<Vec<_>>>()?;

    let mut variables = BTreeMap::new();
    for variable in artifact.variables {
        variables.insert(variable.name, variable.data);
    }

    Ok(WeatherSeed {
        id: artifact.seed_id,
        model_source: artifact.model_source,
        model_run: parse_timestamp(&artifact.model_run_iso)?,
        created_at: parse_timestamp(&artifact.created_at_iso)?,
        bounding_box: BoundingBox {
            lat_min: artifact.lat_min,
            lat_max: artifact.lat_max,
            lon_min: artifact.lon_min,
            lon_max: artifact.lon_max,
        },
        resolution_deg: artifact.resolution_deg,
        time_steps,
        latitudes: artifact.latitudes,
        longitudes: artifact.longitudes,
        variables,
    })
}

fn parse_timestamp(iso: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| TruthError::SeedFormat(format!("bad timestamp {iso:?}: {err}")))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Wire-encode an artifact with a uniform 2x2x`hours` grid.
    pub fn artifact_bytes(seed_id: &str, hours: usize, u10: f32, v10: f32) -> Vec<u8> {
        encode(&uniform_artifact(seed_id, hours, u10, v10)).unwrap()
    }

    pub fn uniform_artifact(seed_id: &str, hours: usize, u10: f32, v10: f32) -> SeedArtifact {
        let grid = hours * 2 * 2;
        SeedArtifact {
            seed_id: seed_id.to_string(),
            model_source: "ecmwf-ifs".to_string(),
            model_run_iso: "2026-08-05T00:00:00Z".to_string(),
            created_at_iso: "2026-08-05T01:00:00Z".to_string(),
            lat_min: 36.0,
            lat_max: 37.0,
            lon_min: -123.0,
            lon_max: -122.0,
            resolution_deg: 1.0,
            time_steps_iso: (0..hours)
                .map(|h| format!("2026-08-05T{h:02}:00:00Z"))
                .collect(),
            latitudes: vec![36.0, 37.0],
            longitudes: vec![-123.0, -122.0],
            variables: vec![
                ArtifactVariable {
                    name: "u10".to_string(),
                    data: Variable::Raw {
                        values: vec![u10; grid],
                    },
                },
                ArtifactVariable {
                    name: "v10".to_string(),
                    data: Variable::Raw {
                        values: vec![v10; grid],
                    },
                },
                ArtifactVariable {
                    name: "msl".to_string(),
                    data: Variable::Quantized {
                        values: vec![1300; grid],
                        scale: 10.0,
                        offset: 88_000.0,
                    },
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_container() {
        let bytes = testutil::artifact_bytes("seed-rt", 3, 5.0, -2.0);
        let seed = decode(&bytes).unwrap();
        assert_eq!(seed.id, "seed-rt");
        assert_eq!(seed.time_steps.len(), 3);
        assert_eq!(seed.grid_len(), 12);
        assert_eq!(seed.value_at("u10", 0, 0, 0), Some(5.0));
        // Quantized msl: 88_000 + 1300 * 10 = 101_000 Pa.
        assert_eq!(seed.value_at("msl", 2, 1, 1), Some(101_000.0));
    }

    #[test]
    fn corrupt_container_is_format_error() {
        let err = decode(b"definitely not zstd").unwrap_err();
        assert!(matches!(err, TruthError::SeedFormat(_)), "got {err:?}");
    }

    #[test]
    fn corrupt_payload_is_format_error() {
        // Valid zstd frame around garbage.
        let bytes = zstd::encode_all(&b"not an artifact record"[..], 1).unwrap();
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, TruthError::SeedFormat(_)), "got {err:?}");
    }

    #[test]
    fn bad_timestamp_is_format_error() {
        let mut artifact = testutil::uniform_artifact("seed-ts", 2, 0.0, 0.0);
        artifact.time_steps_iso[1] = "tuesday-ish".to_string();
        let bytes = encode(&artifact).unwrap();
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            TruthError::SeedFormat(_)
        ));
    }

    #[test]
    fn short_variable_is_validation_error() {
        let mut artifact = testutil::uniform_artifact("seed-bad", 2, 0.0, 0.0);
        artifact.variables.push(ArtifactVariable {
            name: "swh".to_string(),
            data: Variable::Raw {
                values: vec![1.5; 3],
            },
        });
        let bytes = encode(&artifact).unwrap();
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            TruthError::SeedValidation(_)
        ));
    }

    #[test]
    fn dequantize_applies_affine_map() {
        let variable = Variable::Quantized {
            values: vec![0, 1, 2, 40],
            scale: 0.25,
            offset: -5.0,
        };
        let values = dequantize(&variable, 4).unwrap();
        assert_eq!(values, vec![-5.0, -4.75, -4.5, 5.0]);
    }

    #[test]
    fn dequantize_raw_passes_through() {
        let variable = Variable::Raw {
            values: vec![1.0, 2.5, -3.25],
        };
        assert_eq!(dequantize(&variable, 3).unwrap(), vec![1.0, 2.5, -3.25]);
    }

    #[test]
    fn dequantize_rejects_length_mismatch() {
        let variable = Variable::Raw {
            values: vec![1.0, 2.0],
        };
        assert!(matches!(
            dequantize(&variable, 12).unwrap_err(),
            TruthError::SeedValidation(_)
        ));
    }

    #[test]
    fn wind_extraction_covers_every_cell() {
        let bytes = testutil::artifact_bytes("seed-wind", 2, 7.0, -3.0);
        let seed = decode(&bytes).unwrap();
        let samples = extract_wind_data(&seed, 1);
        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.u10 == 7.0 && s.v10 == -3.0));
        assert!(samples.iter().all(|s| s.timestamp == seed.time_steps[1]));
    }

    #[test]
    fn wind_extraction_missing_component_is_empty() {
        let mut artifact = testutil::uniform_artifact("seed-nowind", 2, 0.0, 0.0);
        artifact.variables.retain(|v| v.name != "v10");
        let seed = decode(&encode(&artifact).unwrap()).unwrap();
        assert!(extract_wind_data(&seed, 0).is_empty());
    }

    #[test]
    fn wind_extraction_out_of_range_step_is_empty() {
        let bytes = testutil::artifact_bytes("seed-oob", 2, 1.0, 1.0);
        let seed = decode(&bytes).unwrap();
        assert!(extract_wind_data(&seed, 99).is_empty());
    }
}
