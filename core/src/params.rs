use serde::{Deserialize, Serialize};

use crate::prelude::{FkError, FkResult};

/// Upper limit on simultaneous frequency bands per call.
pub const MAX_BANDS: usize = 16;

/// One analysis band, Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub fmin: f64,
    pub fmax: f64,
}

impl FrequencyBand {
    pub fn new(fmin: f64, fmax: f64) -> Self {
        Self { fmin, fmax }
    }

    pub fn width(&self) -> f64 {
        self.fmax - self.fmin
    }
}

/// Taper applied to each window before the transform. The cosine taper
/// carries separate leading and trailing percentages of the window length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Taper {
    None,
    Hann,
    Hamming,
    Parzen,
    Welch,
    Blackman,
    Cosine { lead_pct: f64, trail_pct: f64 },
}

/// Restriction of the peak search to a slowness-magnitude range and an
/// azimuth range. The azimuth range may wrap through 0/360: with
/// `az_min_deg = 300` and `az_max_deg = 30` the sector spans north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchRegion {
    pub slow_min: f64,
    pub slow_max: f64,
    pub az_min_deg: f64,
    pub az_max_deg: f64,
}

impl SearchRegion {
    /// True when the slowness vector falls inside the region.
    pub fn contains(&self, sx: f64, sy: f64) -> bool {
        let slo = (sx * sx + sy * sy).sqrt();
        if slo < self.slow_min || slo > self.slow_max {
            return false;
        }
        self.contains_azimuth(azimuth_deg(sx, sy))
    }

    pub fn contains_azimuth(&self, az: f64) -> bool {
        let az = wrap_azimuth(az);
        let lo = wrap_azimuth(self.az_min_deg);
        let hi = wrap_azimuth(self.az_max_deg);
        if lo <= hi {
            az >= lo && az <= hi
        } else {
            // Sector wraps through north.
            az >= lo || az <= hi
        }
    }
}

/// Back-azimuth of a slowness vector, degrees clockwise from north in [0,360).
pub fn azimuth_deg(sx: f64, sy: f64) -> f64 {
    if sx == 0.0 && sy == 0.0 {
        return 0.0;
    }
    wrap_azimuth(sx.atan2(sy).to_degrees())
}

pub fn wrap_azimuth(az: f64) -> f64 {
    let mut az = az % 360.0;
    if az < 0.0 {
        az += 360.0;
    }
    az
}

/// Immutable per-call parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FkParams {
    /// Half-width of the slowness grid, s/km. Zero collapses the grid to a
    /// single node at the origin.
    pub slowness_max: f64,
    /// Nodes per grid axis; forced odd so the origin is always a node.
    pub num_slowness: usize,
    pub bands: Vec<FrequencyBand>,
    pub taper: Taper,
    /// True for raw normalized power, false for the dB rescaling.
    pub output_power: bool,
    pub fine_grid: bool,
    /// Retain the per-discrete-frequency cube for later re-banding.
    pub full_compute: bool,
    pub three_component: bool,
    /// Slide a fixed-width sub-band across the spectrum and keep the
    /// position that maximizes the F-statistic.
    pub band_scan: bool,
    pub search: Option<SearchRegion>,
}

impl Default for FkParams {
    fn default() -> Self {
        Self {
            slowness_max: 0.4,
            num_slowness: 81,
            bands: vec![FrequencyBand::new(0.5, 6.0)],
            taper: Taper::Hann,
            output_power: true,
            fine_grid: false,
            full_compute: false,
            three_component: false,
            band_scan: false,
            search: None,
        }
    }
}

impl FkParams {
    /// Apply the silent adjustments: an even node count is incremented, and
    /// a zero slowness range collapses the grid to its single origin node.
    pub fn normalized(mut self) -> Self {
        if self.slowness_max == 0.0 {
            self.num_slowness = 1;
        } else if self.num_slowness % 2 == 0 {
            self.num_slowness += 1;
        }
        self
    }

    pub fn validate(&self) -> FkResult<()> {
        if self.bands.is_empty() || self.bands.len() > MAX_BANDS {
            return Err(FkError::InvalidConfig(format!(
                "band count {} outside [1,{}]",
                self.bands.len(),
                MAX_BANDS
            )));
        }
        for band in &self.bands {
            if !(band.fmin < band.fmax) {
                return Err(FkError::InvalidConfig(format!(
                    "band [{},{}] requires fmin < fmax",
                    band.fmin, band.fmax
                )));
            }
            if band.fmin < 0.0 {
                return Err(FkError::InvalidConfig(format!(
                    "band fmin {} is negative",
                    band.fmin
                )));
            }
        }
        if self.slowness_max < 0.0 {
            return Err(FkError::InvalidConfig(format!(
                "slowness_max {} is negative",
                self.slowness_max
            )));
        }
        if self.slowness_max > 0.0 && self.num_slowness < 2 {
            return Err(FkError::InvalidConfig(format!(
                "num_slowness {} must exceed 1",
                self.num_slowness
            )));
        }
        if let Some(region) = &self.search {
            if !(region.slow_min <= region.slow_max) {
                return Err(FkError::InvalidConfig(
                    "search region slowness range is inverted".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Grid spacing along one slowness axis.
    pub fn slowness_step(&self) -> f64 {
        if self.num_slowness > 1 {
            2.0 * self.slowness_max / (self.num_slowness - 1) as f64
        } else {
            0.0
        }
    }
}
