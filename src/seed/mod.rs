//! Decoded weather seed model and grid addressing.
//!
//! A seed is a compact, quantized slice of a regional forecast: a regular
//! lat/lon grid crossed with an ordered run of time steps, carrying a small
//! set of named surface variables. Seeds are immutable once decoded; the
//! cache hands out shared references and discards whole seeds on eviction.

pub mod cache;
pub mod codec;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TruthError};
use crate::types::BoundingBox;

/// A forecast variable, either fixed-point quantized or raw floats.
///
/// The two representations are a tagged union at the type level: a variable
/// is exactly one of them, and an artifact that encodes neither fails to
/// decode instead of passing silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// 16-bit fixed-point values; physical value = `offset + v * scale`.
    Quantized {
        values: Vec<u16>,
        scale: f32,
        offset: f32,
    },
    /// Unquantized pass-through values.
    Raw { values: Vec<f32> },
}

impl Variable {
    /// Number of grid points carried.
    pub fn len(&self) -> usize {
        match self {
            Variable::Quantized { values, .. } => values.len(),
            Variable::Raw { values } => values.len(),
        }
    }

    /// Whether the variable carries no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical value at one flat grid index, without materializing the
    /// whole series.
    pub fn value_at(&self, index: usize) -> Option<f32> {
        match self {
            Variable::Quantized {
                values,
                scale,
                offset,
            } => values.get(index).map(|v| offset + f32::from(*v) * scale),
            Variable::Raw { values } => values.get(index).copied(),
        }
    }
}

/// A decoded regional forecast snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSeed {
    /// Stable artifact identifier, e.g. `"ifs-20260805-00z-na-pacific"`.
    pub id: String,
    /// Producing model, e.g. `"ecmwf-ifs"`.
    pub model_source: String,
    /// Model cycle this seed was sliced from.
    pub model_run: DateTime<Utc>,
    /// When the artifact was produced.
    pub created_at: DateTime<Utc>,
    /// Geographic extent of the grid.
    pub bounding_box: BoundingBox,
    /// Grid spacing, degrees.
    pub resolution_deg: f64,
    /// Ordered forecast valid times.
    pub time_steps: Vec<DateTime<Utc>>,
    /// Ordered grid latitudes.
    pub latitudes: Vec<f64>,
    /// Ordered grid longitudes.
    pub longitudes: Vec<f64>,
    /// Named variables, each spanning the full grid.
    pub variables: BTreeMap<String, Variable>,
}

impl WeatherSeed {
    /// Expected flat length of every variable:
    /// `time_steps × latitudes × longitudes`.
    pub fn grid_len(&self) -> usize {
        self.time_steps.len() * self.latitudes.len() * self.longitudes.len()
    }

    /// Flat index of `(time, lat, lon)` in the time-major grid layout.
    fn flat_index(&self, time_idx: usize, lat_idx: usize, lon_idx: usize) -> usize {
        (time_idx * self.latitudes.len() + lat_idx) * self.longitudes.len() + lon_idx
    }

    /// Indices of the grid cell nearest a position.
    pub fn nearest_cell(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        let lat_idx = nearest_axis_index(&self.latitudes, lat)?;
        let lon_idx = nearest_axis_index(&self.longitudes, lon)?;
        Some((lat_idx, lon_idx))
    }

    /// Index of the time step nearest a timestamp, or `None` for an empty
    /// time axis.
    pub fn nearest_time_index(&self, at: DateTime<Utc>) -> Option<usize> {
        self.time_steps
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (**t - at).num_seconds().abs())
            .map(|(idx, _)| idx)
    }

    /// Physical value of a named variable at a grid cell, or `None` when
    /// the variable is absent or the indices are out of range.
    pub fn value_at(
        &self,
        name: &str,
        time_idx: usize,
        lat_idx: usize,
        lon_idx: usize,
    ) -> Option<f32> {
        if time_idx >= self.time_steps.len()
            || lat_idx >= self.latitudes.len()
            || lon_idx >= self.longitudes.len()
        {
            return None;
        }
        let variable = self.variables.get(name)?;
        variable.value_at(self.flat_index(time_idx, lat_idx, lon_idx))
    }

    /// First and last forecast valid times.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((*self.time_steps.first()?, *self.time_steps.last()?))
    }

    /// Whether the seed's box and time range contain a point in spacetime.
    pub fn covers(&self, lat: f64, lon: f64, at: DateTime<Utc>) -> bool {
        let Some((start, end)) = self.time_range() else {
            return false;
        };
        self.bounding_box.contains(lat, lon) && at >= start && at <= end
    }

    /// Check internal consistency: non-empty axes and every variable
    /// spanning the full grid.
    pub fn validate(&self) -> Result<()> {
        if self.time_steps.is_empty() || self.latitudes.is_empty() || self.longitudes.is_empty() {
            return Err(TruthError::SeedValidation(format!(
                "seed {} has an empty grid axis ({} times, {} lats, {} lons)",
                self.id,
                self.time_steps.len(),
                self.latitudes.len(),
                self.longitudes.len()
            )));
        }
        let expected = self.grid_len();
        for (name, variable) in &self.variables {
            if variable.len() != expected {
                return Err(TruthError::SeedValidation(format!(
                    "seed {} variable {name} carries {} values, grid needs {expected}",
                    self.id,
                    variable.len()
                )));
            }
        }
        Ok(())
    }
}

fn nearest_axis_index(axis: &[f64], value: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - value)
                .abs()
                .partial_cmp(&(*b - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Build a small uniform seed for unit tests: a 3x3 grid, hourly steps,
    /// with constant wind and pressure fields.
    pub fn uniform_seed(
        id: &str,
        base: DateTime<Utc>,
        hours: usize,
        u10: f32,
        v10: f32,
        msl_pa: f32,
    ) -> WeatherSeed {
        let latitudes = vec![36.0, 37.0, 38.0];
        let longitudes = vec![-124.0, -123.0, -122.0];
        let time_steps: Vec<_> = (0..hours)
            .map(|h| base + chrono::Duration::hours(h as i64))
            .collect();
        let grid = time_steps.len() * latitudes.len() * longitudes.len();

        let mut variables = BTreeMap::new();
        variables.insert(
            "u10".to_string(),
            Variable::Raw {
                values: vec![u10; grid],
            },
        );
        variables.insert(
            "v10".to_string(),
            Variable::Raw {
                values: vec![v10; grid],
            },
        );
        variables.insert(
            "msl".to_string(),
            Variable::Raw {
                values: vec![msl_pa; grid],
            },
        );

        WeatherSeed {
            id: id.to_string(),
            model_source: "test-model".to_string(),
            model_run: base,
            created_at: base,
            bounding_box: BoundingBox {
                lat_min: 36.0,
                lat_max: 38.0,
                lon_min: -124.0,
                lon_max: -122.0,
            },
            resolution_deg: 1.0,
            time_steps,
            latitudes,
            longitudes,
            variables,
        }
    }
}
