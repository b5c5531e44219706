//! Grid maximum location and sub-cell refinement: masked arg-max, a fine
//! grid recomputed around the coarse peak, and a quadratic-surface fit over
//! the 3x3 neighborhood.

use ndarray::Array2;

use crate::beam::engine::BeamPowerEngine;
use crate::channel::PlaneOffset;
use crate::result::{FineGrid, GridAxes, GridPeak, SlownessGrid};
use crate::spectral::{BandBins, WindowSpectrum};

/// Nodes per axis of the refinement grid.
pub const FINE_GRID_NODES: usize = 11;

/// A grid maximum with both its node indices and its coordinates.
#[derive(Debug, Clone, Copy)]
pub struct PeakLocation {
    pub ix: usize,
    pub iy: usize,
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

impl PeakLocation {
    pub fn to_peak(self) -> GridPeak {
        GridPeak {
            x: self.x,
            y: self.y,
            value: self.value,
        }
    }
}

/// Arg-max over the grid, restricted to nodes the `accept` predicate admits.
/// Returns `None` when no node is admitted. Ties keep the first node in
/// row-major order, so the result is deterministic.
pub fn locate_peak(
    values: &Array2<f64>,
    axes: &GridAxes,
    accept: Option<&dyn Fn(f64, f64) -> bool>,
) -> Option<PeakLocation> {
    let mut best: Option<PeakLocation> = None;
    for (iy, row) in values.outer_iter().enumerate() {
        let y = axes.y(iy);
        for (ix, &value) in row.iter().enumerate() {
            let x = axes.x(ix);
            if let Some(accept) = accept {
                if !accept(x, y) {
                    continue;
                }
            }
            if best.map_or(true, |b| value > b.value) {
                best = Some(PeakLocation { ix, iy, x, y, value });
            }
        }
    }
    best
}

/// Least-squares quadratic surface through a 3x3 neighborhood on unit node
/// spacing. Returns the stationary-point offset clamped to [-1,1]^2 and the
/// surface value there; a non-maximum fit keeps the center.
pub fn quadratic_offset(z: &[[f64; 3]; 3]) -> (f64, f64, f64) {
    let mut s = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (iy, row) in z.iter().enumerate() {
        let y = iy as f64 - 1.0;
        for (ix, &v) in row.iter().enumerate() {
            let x = ix as f64 - 1.0;
            s += v;
            sx += x * v;
            sy += y * v;
            sxx += x * x * v;
            syy += y * y * v;
            sxy += x * y * v;
        }
    }

    let c1 = sx / 6.0;
    let c2 = sy / 6.0;
    let c4 = sxy / 4.0;
    let u = (sxx + syy - 4.0 / 3.0 * s) / 2.0;
    let d = (sxx - syy) / 2.0;
    let c3 = (u + d) / 2.0;
    let c5 = (u - d) / 2.0;
    let c0 = (s - 6.0 * u) / 9.0;

    let det = 4.0 * c3 * c5 - c4 * c4;
    if det <= 0.0 || c3 >= 0.0 {
        return (0.0, 0.0, z[1][1]);
    }
    let ox = ((-2.0 * c5) * c1 + c4 * c2) / det;
    let oy = (c4 * c1 - 2.0 * c3 * c2) / det;
    let ox = ox.clamp(-1.0, 1.0);
    let oy = oy.clamp(-1.0, 1.0);
    let value = c0 + c1 * ox + c2 * oy + c3 * ox * ox + c4 * ox * oy + c5 * oy * oy;
    (ox, oy, value)
}

/// Recompute a [`FINE_GRID_NODES`]-square grid spanning one coarse cell to
/// each side of the coarse peak, locate its maximum, and refine a strictly
/// interior maximum with the quadratic fit.
#[allow(clippy::too_many_arguments)]
pub fn fine_refine(
    engine: &mut BeamPowerEngine,
    spectra: &[WindowSpectrum],
    offsets: &[PlaneOffset],
    bins: BandBins,
    total: f64,
    coarse_axes: &GridAxes,
    coarse_peak: &PeakLocation,
    accept: Option<&dyn Fn(f64, f64) -> bool>,
) -> FineGrid {
    let n = FINE_GRID_NODES;
    let step_x = 2.0 * coarse_axes.dx / (n - 1) as f64;
    let step_y = 2.0 * coarse_axes.dy / (n - 1) as f64;
    let x0 = coarse_peak.x - coarse_axes.dx;
    let y0 = coarse_peak.y - coarse_axes.dy;
    let xs: Vec<f64> = (0..n).map(|i| x0 + i as f64 * step_x).collect();
    let ys: Vec<f64> = (0..n).map(|i| y0 + i as f64 * step_y).collect();

    let values = engine.grid_at(spectra, offsets, bins, &xs, &ys, total);
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
