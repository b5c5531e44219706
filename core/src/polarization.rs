//! Azimuth/incidence polarization search from one three-component sensor.
//!
//! The grid is (incidence, azimuth) on a unit-sphere cap instead of
//! horizontal slowness, and the "beam" is the time-domain projection of the
//! band-filtered motion vector onto each candidate direction; everything
//! else (normalization, arg-max, fine refinement) parallels the array path.

use ndarray::Array2;
use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::beam::refine::{locate_peak, quadratic_offset, PeakLocation, FINE_GRID_NODES};
use crate::channel::Orientation;
use crate::params::{FrequencyBand, Taper};
use crate::result::{FineGrid, GridAxes, SlownessGrid};
use crate::spectral::{next_pow2, taper as taper_mod, BandBins};

/// Unit direction for azimuth (clockwise from north) and incidence (down
/// from vertical), as (east, north, vertical) components.
fn direction(az_deg: f64, inc_deg: f64) -> [f64; 3] {
    let az = az_deg.to_radians();
    let inc = inc_deg.to_radians();
    [inc.sin() * az.sin(), inc.sin() * az.cos(), inc.cos()]
}

/// One window's band-filtered motion resolved into east/north/vertical.
pub struct PolarizedWindow {
    east: Vec<f64>,
    north: Vec<f64>,
    vertical: Vec<f64>,
    /// Total vector power, clamped to 1 when the window is silent.
    pub total_power: f64,
}

impl PolarizedWindow {
    /// Projection power for one candidate direction, normalized by the
    /// total vector power.
    pub fn power_at(&self, az_deg: f64, inc_deg: f64) -> f64 {
        let d = direction(az_deg, inc_deg);
        let mut sum = 0.0;
        for i in 0..self.east.len() {
            let proj = d[0] * self.east[i] + d[1] * self.north[i] + d[2] * self.vertical[i];
            sum += proj * proj;
        }
        sum / self.total_power
    }

    /// Normalized projection power over the full direction grid:
    /// `n_az` azimuth columns over [0,360), `n_inc` incidence rows over
    /// [0,90].
    pub fn grid(&self, n_az: usize, n_inc: usize) -> Array2<f64> {
        let axes = direction_axes(n_az, n_inc);
        let mut out = Array2::<f64>::zeros((n_inc, n_az));
        for iy in 0..n_inc {
            for ix in 0..n_az {
                out[[iy, ix]] = self.power_at(axes.x(ix), axes.y(iy));
            }
        }
        out
    }
}

/// Axis mapping of the direction grid.
pub fn direction_axes(n_az: usize, n_inc: usize) -> GridAxes {
    GridAxes {
        x0: 0.0,
        y0: 0.0,
        dx: 360.0 / n_az as f64,
        dy: if n_inc > 1 {
            90.0 / (n_inc - 1) as f64
        } else {
            0.0
        },
    }
}

/// Owns the transform plan and scratch reused across windows.
pub struct PolarizationEngine {
    planner: FftPlanner<f64>,
    freq: Vec<Complex64>,
    time: Vec<f64>,
}

impl std::fmt::Debug for PolarizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolarizationEngine")
            .field("freq", &self.freq)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl PolarizationEngine {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            freq: Vec::new(),
            time: Vec::new(),
        }
    }

    /// Band-filter the three component windows and resolve them into
    /// east/north/vertical motion using the sensor orientations.
    pub fn prepare(
        &mut self,
        windows: [&[f64]; 3],
        orientations: &[Orientation; 3],
        band: FrequencyBand,
        window_taper: Taper,
        dt: f64,
    ) -> PolarizedWindow {
        let nwin = windows[0].len();
        let mut east = vec![0.0; nwin];
        let mut north = vec![0.0; nwin];
        let mut vertical = vec![0.0; nwin];

        for (comp, orient) in windows.iter().zip(orientations) {
            let filtered = self.band_filter(comp, band, window_taper, dt);
            let axis = direction(orient.azimuth_deg, orient.incidence_deg);
            for i in 0..nwin {
                east[i] += axis[0] * filtered[i];
                north[i] += axis[1] * filtered[i];
                vertical[i] += axis[2] * filtered[i];
            }
        }

        let mut total_power = 0.0;
        for i in 0..nwin {
            total_power += east[i] * east[i] + north[i] * north[i] + vertical[i] * vertical[i];
        }
        if total_power == 0.0 {
            total_power = 1.0;
        }

        PolarizedWindow {
            east,
            north,
            vertical,
            total_power,
        }
    }

    /// Demean, taper, zero-pad, transform, zero everything outside the
    /// band, transform back.
    fn band_filter(&mut self, samples: &[f64], band: FrequencyBand, window_taper: Taper, dt: f64) -> Vec<f64> {
        let nwin = samples.len();
        let nfft = next_pow2(nwin);
        let df = 1.0 / (nfft as f64 * dt);
        let bins = BandBins::from_band(band.fmin, band.fmax, df, nfft);

        self.time.clear();
        self.time.extend_from_slice(samples);
        let mean = self.time.iter().sum::<f64>() / nwin.max(1) as f64;
        for v in &mut self.time {
            *v -= mean;
        }
        taper_mod::apply(window_taper, &mut self.time);

        self.freq.clear();
        self.freq
            .extend(self.time.iter().map(|&v| Complex64::new(v, 0.0)));
        self.freq.resize(nfft, Complex64::new(0.0, 0.0));

        let forward = self.planner.plan_fft_forward(nfft);
        forward.process(&mut self.freq);

        for k in 0..nfft {
            // Positive-frequency index of this bin and its mirror.
            let pos = k.min(nfft - k);
            if pos < bins.k_lo || pos > bins.k_hi {
                self.freq[k] = Complex64::new(0.0, 0.0);
            }
        }

        let inverse = self.planner.plan_fft_inverse(nfft);
        inverse.process(&mut self.freq);

        let scale = 1.0 / nfft as f64;
        self.freq[..nwin].iter().map(|c| c.re * scale).collect()
    }
}

impl Default for PolarizationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Fine refinement over the direction grid, mirroring the slowness-plane
/// refiner: a [`FINE_GRID_NODES`]-square patch one coarse cell to each
/// side, then the quadratic fit when the patch maximum is interior.
pub fn refine_direction(
    window: &PolarizedWindow,
    coarse_axes: &GridAxes,
    coarse_peak: &PeakLocation,
    accept: Option<&dyn Fn(f64, f64) -> bool>,
) -> FineGrid {
    let n = FINE_GRID_NODES;
    let step_x = 2.0 * coarse_axes.dx / (n - 1) as f64;
    let step_y = 2.0 * coarse_axes.dy / (n - 1) as f64;
    let x0 = coarse_peak.x - coarse_axes.dx;
    let y0 = coarse_peak.y - coarse_axes.dy;

    let mut values = Array2::<f64>::zeros((n, n));
    for iy in 0..n {
        for ix in 0..n {
            values[[iy, ix]] = window.power_at(x0 + ix as f64 * step_x, y0 + iy as f64 * step_y);
        }
    }
    let axes = GridAxes {
        x0,
        y0,
        dx: step_x,
        dy: step_y,
    };

    let mut peak = match locate_peak(&values, &axes, accept) {
        Some(p) => p,
        None => PeakLocation {
            ix: n / 2,
            iy: n / 2,
            x: coarse_peak.x,
            y: coarse_peak.y,
            value: coarse_peak.value,
        },
    };

    let interior = peak.ix > 0 && peak.iy > 0 && peak.ix + 1 < n && peak.iy + 1 < n;
    if interior {
        let mut z = [[0.0; 3]; 3];
        for dy in 0..3 {
            for dx in 0..3 {
                z[dy][dx] = values[[peak.iy + dy - 1, peak.ix + dx - 1]];
            }
        }
        let (ox, oy, fitted) = quadratic_offset(&z);
        peak.x += ox * step_x;
        peak.y += oy * step_y;
        peak.value = peak.value.max(fitted);
    }

    FineGrid {
        grid: SlownessGrid { axes, values },
        peak: peak.to_peak(),
    }
}
