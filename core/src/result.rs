//! Value objects produced by the driver: per-band grids and scalars for one
//! window, and the accumulated series across windows. Populated once by the
//! driver, read-only thereafter.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::beam::SpectralCube;
use crate::params::{azimuth_deg, FrequencyBand};

/// Index-to-coordinate mapping of a rectangular grid. Column `ix` sits at
/// `x0 + ix*dx`, row `iy` at `y0 + iy*dy`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridAxes {
    pub x0: f64,
    pub y0: f64,
    pub dx: f64,
    pub dy: f64,
}

impl GridAxes {
    /// Axes of a slowness grid symmetric about the origin.
    pub fn symmetric(slowness_max: f64, n: usize) -> Self {
        let step = if n > 1 {
            2.0 * slowness_max / (n - 1) as f64
        } else {
            0.0
        };
        Self {
            x0: -slowness_max,
            y0: -slowness_max,
            dx: step,
            dy: step,
        }
    }

    pub fn x(&self, ix: usize) -> f64 {
        self.x0 + ix as f64 * self.dx
    }

    pub fn y(&self, iy: usize) -> f64 {
        self.y0 + iy as f64 * self.dy
    }
}

/// A beam-power grid with its axis mapping. For the array case both axes are
/// horizontal slowness in s/km; the three-component variant stores azimuth
/// along x (degrees) and incidence along y (degrees).
#[derive(Debug, Clone)]
pub struct SlownessGrid {
    pub axes: GridAxes,
    /// `values[[iy, ix]]`.
    pub values: Array2<f64>,
}

impl SlownessGrid {
    pub fn nx(&self) -> usize {
        self.values.ncols()
    }

    pub fn ny(&self) -> usize {
        self.values.nrows()
    }

    /// True when the node is not on the grid boundary.
    pub fn is_interior(&self, ix: usize, iy: usize) -> bool {
        ix > 0 && iy > 0 && ix + 1 < self.nx() && iy + 1 < self.ny()
    }
}

/// Location and value of a grid maximum. `x`/`y` follow the grid's axis
/// meaning (slowness for the array case, azimuth/incidence for 3C).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPeak {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

impl GridPeak {
    /// Back-azimuth of a slowness-plane peak, degrees clockwise from north.
    pub fn azimuth_deg(&self) -> f64 {
        azimuth_deg(self.x, self.y)
    }

    /// Slowness magnitude, s/km.
    pub fn slowness(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Apparent horizontal velocity, km/s.
    pub fn apparent_velocity(&self) -> f64 {
        let s = self.slowness();
        if s > 0.0 {
            1.0 / s
        } else {
            f64::INFINITY
        }
    }
}

/// Higher-resolution grid computed around the coarse peak.
#[derive(Debug, Clone)]
pub struct FineGrid {
    pub grid: SlownessGrid,
    pub peak: GridPeak,
}

/// One band's share of a window result.
#[derive(Debug, Clone)]
pub struct BandResult {
    pub band: FrequencyBand,
    pub grid: SlownessGrid,
    pub peak: GridPeak,
    pub total_power: f64,
    pub fstat: f64,
    /// Maximum inside the caller-supplied search region, when one was set.
    pub restricted_peak: Option<GridPeak>,
    pub fine: Option<FineGrid>,
}

/// Grids and derived scalars for one analysis window.
#[derive(Debug, Clone)]
pub struct SingleWindowResult {
    pub tbeg: f64,
    pub tend: f64,
    pub bands: Vec<BandResult>,
    /// Per-discrete-frequency cube, retained in full-compute mode.
    pub cube: Option<SpectralCube>,
}

/// The FK-gram: ordered window results plus the windowing that produced
/// them.
#[derive(Debug, Clone, Default)]
pub struct FkSeries {
    pub window_length: f64,
    pub overlap: f64,
    pub results: Vec<SingleWindowResult>,
}

impl FkSeries {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn last_tend(&self) -> Option<f64> {
        self.results.last().map(|r| r.tend)
    }

    /// Drop results older than `keep_duration` seconds behind the newest.
    pub fn truncate_trailing(&mut self, keep_duration: f64) {
        if let Some(newest) = self.last_tend() {
            let cutoff = newest - keep_duration;
            self.results.retain(|r| r.tend > cutoff);
        }
    }

    /// Drop results ending at or before `tmin`.
    pub fn truncate_before(&mut self, tmin: f64) {
        self.results.retain(|r| r.tend > tmin);
    }
}
