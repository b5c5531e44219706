//! Sliding-window orchestration: validates the whole configuration up
//! front, then walks the common data coverage window by window, feeding the
//! spectral front end, the beam engine, and the peak refiner, accumulating
//! one result per window. Streaming callers append from the previous end
//! time and truncate old results; a progress callback checked every few
//! windows is the only cancellation mechanism.

use ndarray::Array2;

use crate::beam::engine::{self, BeamPowerEngine};
use crate::beam::refine::{self, PeakLocation};
use crate::channel::{Orientation, PlaneOffset, WaveformSegment};
use crate::coverage::{common_coverage, group_channels, ChannelGroup, TimeSpan};
use crate::geometry::ArrayGeometry;
use crate::params::{FkParams, FrequencyBand};
use crate::polarization::{self, PolarizationEngine};
use crate::prelude::{FkError, FkResult};
use crate::result::{BandResult, FkSeries, GridAxes, SingleWindowResult, SlownessGrid};
use crate::spectral::{next_pow2, BandBins, SpectralFrontEnd, WindowSpectrum};
use crate::telemetry::{LogManager, MetricsRecorder};

/// The progress callback fires after every this many windows.
pub const PROGRESS_STRIDE: usize = 5;

/// Relative sample-interval mismatch tolerated across channels.
const DT_TOLERANCE: f64 = 1e-4;

/// Driver lifecycle. `Idle` exists only between construction and the
/// validation that construction performs; callers observe `Configured`
/// onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Configured,
    Running,
    Appending,
    Complete,
}

/// Context handed to the progress callback by reference; there is no
/// process-wide "currently computing" state.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub windows_done: usize,
    pub windows_planned: usize,
    /// End time of the newest completed window.
    pub tend: f64,
}

/// Cancellation hook. Return false to abandon the remaining windows; the
/// driving call still reports the partial count.
pub trait ProgressMonitor {
    fn on_progress(&mut self, update: &ProgressUpdate) -> bool;
}

impl<F> ProgressMonitor for F
where
    F: FnMut(&ProgressUpdate) -> bool,
{
    fn on_progress(&mut self, update: &ProgressUpdate) -> bool {
        self(update)
    }
}

/// Everything resolved by the validation gate. Once this exists, the
/// per-window loop cannot fail.
struct Prepared<'a> {
    groups: Vec<ChannelGroup<'a>>,
    geometry: Option<ArrayGeometry>,
    orientations: Option<[Orientation; 3]>,
    runs: Vec<TimeSpan>,
    dt: f64,
    nwin: usize,
    nfft: usize,
    df: f64,
    keep: BandBins,
    band_bins: Vec<BandBins>,
    retain_cube: bool,
}

#[derive(Debug)]
pub struct FkDriver {
    params: FkParams,
    state: DriverState,
    series: FkSeries,
    /// Continuation point for streaming append.
    next_start: Option<f64>,
    front_end: SpectralFrontEnd,
    engine: BeamPowerEngine,
    polarization: PolarizationEngine,
    /// Per-channel window buffers, grown on demand, never shrunk.
    window_scratch: Vec<Vec<f64>>,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl FkDriver {
    /// Validates the parameter set and the windowing; a driver that
    /// constructs successfully is `Configured`.
    pub fn new(params: FkParams, window_length: f64, overlap: f64) -> FkResult<Self> {
        let mut driver = Self {
            params: params.normalized(),
            state: DriverState::Idle,
            series: FkSeries {
                window_length,
                overlap,
                results: Vec::new(),
            },
            next_start: None,
            front_end: SpectralFrontEnd::new(),
            engine: BeamPowerEngine::new(),
            polarization: PolarizationEngine::new(),
            window_scratch: Vec::new(),
            logger: LogManager::new(),
            metrics: MetricsRecorder::new(),
        };
        driver.params.validate()?;
        if !(window_length > 0.0) {
            return Err(FkError::InvalidConfig(format!(
                "window length {} must be positive",
                window_length
            )));
        }
        if overlap >= window_length {
            return Err(FkError::InvalidConfig(format!(
                "overlap {} must stay below the window length {}",
                overlap, window_length
            )));
        }
        driver.state = DriverState::Configured;
        Ok(driver)
    }

    pub fn params(&self) -> &FkParams {
        &self.params
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn series(&self) -> &FkSeries {
        &self.series
    }

    pub fn results(&self) -> &[SingleWindowResult] {
        &self.series.results
    }

    /// (windows computed, runs cancelled) over this driver's lifetime.
    pub fn metrics(&self) -> (usize, usize) {
        self.metrics.snapshot()
    }

    /// Analyze every window the coverage admits, replacing any prior
    /// series. Returns the number of windows computed (which is partial
    /// when the monitor cancelled).
    pub fn run(
        &mut self,
        channels: &[WaveformSegment],
        span: Option<TimeSpan>,
        monitor: &mut dyn ProgressMonitor,
    ) -> FkResult<usize> {
        let prepared = self.prepare(channels, span, self.params.full_compute)?;
        self.series.results.clear();
        self.next_start = None;
        self.state = DriverState::Running;
        let count = self.iterate(&prepared, monitor);
        self.state = DriverState::Complete;
        self.logger
            .record(&format!("FkDriver run complete, {} windows", count));
        Ok(count)
    }

    /// Continue from the previous end time over whatever new coverage the
    /// channels provide. Returns the number of windows appended.
    pub fn append(
        &mut self,
        channels: &[WaveformSegment],
        monitor: &mut dyn ProgressMonitor,
    ) -> FkResult<usize> {
        let prepared = self.prepare(channels, None, self.params.full_compute)?;
        self.state = DriverState::Appending;
        let count = self.iterate(&prepared, monitor);
        self.state = DriverState::Complete;
        self.logger
            .record(&format!("FkDriver appended {} windows", count));
        Ok(count)
    }

    /// Drop results older than `keep_duration` seconds behind the newest.
    pub fn truncate_trailing(&mut self, keep_duration: f64) {
        self.series.truncate_trailing(keep_duration);
    }

    /// Drop results ending at or before `tmin`.
    pub fn truncate_before(&mut self, tmin: f64) {
        self.series.truncate_before(tmin);
    }

    /// Recompute one existing window at full spectral resolution, retaining
    /// the per-frequency cube, and replace it in place.
    pub fn full_compute(
        &mut self,
        channels: &[WaveformSegment],
        index: usize,
    ) -> FkResult<()> {
        let tbeg = self
            .series
            .results
            .get(index)
            .map(|r| r.tbeg)
            .ok_or_else(|| {
                FkError::InvalidConfig(format!("result index {} out of range", index))
            })?;
        let prepared = self.prepare(channels, None, true)?;
        let wlen = self.series.window_length;
        let tol = prepared.dt * 0.25;
        let covered = prepared
            .runs
            .iter()
            .any(|run| tbeg >= run.tbeg - tol && tbeg + wlen <= run.tend + tol);
        if !covered {
            return Err(FkError::NoCoverage);
        }
        let replacement = self.compute_window(&prepared, tbeg);
        self.series.results[index] = replacement;
        Ok(())
    }

    /// The single validation gate.
    fn prepare<'a>(
        &self,
        channels: &'a [WaveformSegment],
        span: Option<TimeSpan>,
        retain_cube: bool,
    ) -> FkResult<Prepared<'a>> {
        let groups = group_channels(channels);
        if groups.is_empty() {
            return Err(FkError::InvalidConfig("no channels supplied".to_string()));
        }

        let dt = groups[0].head().dt;
        if !(dt > 0.0) {
            return Err(FkError::InvalidConfig(format!(
                "sample interval {} must be positive",
                dt
            )));
        }
        for group in &groups {
            for seg in &group.segments {
                if (seg.dt - dt).abs() > dt * DT_TOLERANCE {
                    return Err(FkError::InvalidConfig(format!(
                        "channel {} sample interval {} incompatible with {}",
                        group.id, seg.dt, dt
                    )));
                }
            }
        }

        let nwin = (self.series.window_length / dt).round() as usize;
        if nwin < 5 {
            return Err(FkError::InvalidConfig(format!(
                "window of {} samples is shorter than 5",
                nwin
            )));
        }

        let (geometry, orientations) = if self.params.three_component {
            (None, Some(self.three_component_set(&groups)?))
        } else {
            if groups.len() < 2 {
                return Err(FkError::InvalidConfig(
                    "array analysis needs at least 2 channels".to_string(),
                ));
            }
            let heads: Vec<&WaveformSegment> = groups.iter().map(|g| g.head()).collect();
            (Some(ArrayGeometry::resolve(&heads)?), None)
        };

        let runs = common_coverage(&groups, span);
        let usable: Vec<TimeSpan> = runs
            .into_iter()
            .filter(|run| run.duration() + dt * 0.25 >= self.series.window_length)
            .collect();
        if usable.is_empty() {
            return Err(FkError::NoCoverage);
        }

        let nfft = next_pow2(nwin);
        let df = 1.0 / (nfft as f64 * dt);
        let band_bins: Vec<BandBins> = self
            .params
            .bands
            .iter()
            .map(|band| BandBins::from_band(band.fmin, band.fmax, df, nfft))
            .collect();
        let keep = if retain_cube || self.params.band_scan {
            BandBins {
                k_lo: 1,
                k_hi: nfft / 2,
            }
        } else {
            band_bins
                .iter()
                .skip(1)
                .fold(band_bins[0], |acc, b| acc.union(b))
        };

        Ok(Prepared {
            groups,
            geometry,
            orientations,
            runs: usable,
            dt,
            nwin,
            nfft,
            df,
            keep,
            band_bins,
            retain_cube,
        })
    }

    fn three_component_set(&self, groups: &[ChannelGroup<'_>]) -> FkResult<[Orientation; 3]> {
        if groups.len() != 3 {
            return Err(FkError::InvalidConfig(format!(
                "three-component analysis needs exactly 3 channels, got {}",
                groups.len()
            )));
        }
        let station = &groups[0].head().station;
        let mut orientations = [Orientation {
            azimuth_deg: 0.0,
            incidence_deg: 0.0,
        }; 3];
        for (slot, group) in orientations.iter_mut().zip(groups) {
            let head = group.head();
            if &head.station != station {
                return Err(FkError::InvalidConfig(format!(
                    "three-component channels span stations {} and {}",
                    station, head.station
                )));
            }
            *slot = head.orientation.ok_or_else(|| FkError::Geometry {
                channel: group.id.clone(),
                reason: "missing component orientation".to_string(),
            })?;
        }
        Ok(orientations)
    }

    /// Window loop over the prepared coverage. Infallible; only the
    /// monitor can stop it early.
    fn iterate(&mut self, p: &Prepared<'_>, monitor: &mut dyn ProgressMonitor) -> usize {
        let wlen = self.series.window_length;
        let step = wlen - self.series.overlap;
        let tol = p.dt * 0.25;

        let planned: usize = p
            .runs
            .iter()
            .map(|run| {
                let usable = run.duration() - wlen;
                if usable >= -tol {
                    (usable / step + tol).floor() as usize + 1
                } else {
                    0
                }
            })
            .sum();

        let mut count = 0usize;
        for run in &p.runs {
            let mut start = run.tbeg;
            if let Some(next) = self.next_start {
                if next > start {
                    start = next;
                }
            }
            while start + wlen <= run.tend + tol {
                let result = self.compute_window(p, start);
                let tend = result.tend;
                self.series.results.push(result);
                self.metrics.record_window();
                self.next_start = Some(start + step);
                count += 1;

                if count % PROGRESS_STRIDE == 0 {
                    let update = ProgressUpdate {
                        windows_done: count,
                        windows_planned: planned,
                        tend,
                    };
                    if !monitor.on_progress(&update) {
                        self.metrics.record_cancelled();
                        self.logger.record(&format!(
                            "FkDriver cancelled after {} of {} windows",
                            count, planned
                        ));
                        return count;
                    }
                }
                start += step;
            }
        }
        count
    }

    fn compute_window(&mut self, p: &Prepared<'_>, tbeg: f64) -> SingleWindowResult {
        if self.params.three_component {
            self.compute_direction_window(p, tbeg)
        } else {
            self.compute_array_window(p, tbeg)
        }
    }

    fn fill_scratch(&mut self, p: &Prepared<'_>, tbeg: f64) {
        if self.window_scratch.len() < p.groups.len() {
            self.window_scratch.resize_with(p.groups.len(), Vec::new);
        }
        for (buf, group) in self.window_scratch.iter_mut().zip(&p.groups) {
            if buf.len() < p.nwin {
                buf.resize(p.nwin, 0.0);
            }
            group.fill_window(tbeg, p.dt, &mut buf[..p.nwin]);
        }
    }

    fn compute_array_window(&mut self, p: &Prepared<'_>, tbeg: f64) -> SingleWindowResult {
        self.fill_scratch(p, tbeg);
        let spectra: Vec<WindowSpectrum> = (0..p.groups.len())
            .map(|i| {
                self.front_end.transform(
                    &self.window_scratch[i][..p.nwin],
                    self.params.taper,
                    p.nfft,
                    p.keep,
                    p.dt,
                )
            })
            .collect();

        let geometry = p.geometry.as_ref().expect("array mode resolved geometry");
        let offsets = geometry.offsets();
        let n = self.params.num_slowness;
        let smax = self.params.slowness_max;
        let axes = GridAxes::symmetric(smax, n);

        let cube = if p.retain_cube || self.params.band_scan {
            Some(self.engine.freq_cube(&spectra, offsets, p.keep, n, smax))
        } else {
            None
        };

        let mut bands = Vec::new();
        if self.params.band_scan {
            let cube_ref = cube.as_ref().expect("scan mode built the cube");
            let width = self.params.bands[0].width();
            let width_bins = ((width / p.df).round() as usize).max(1);
            let outcome = cube_ref.scan_best(width_bins);
            let band = FrequencyBand::new(
                outcome.bins.k_lo as f64 * p.df,
                outcome.bins.k_hi as f64 * p.df,
            );
            bands.push(self.finish_band(
                &spectra,
                offsets,
                outcome.bins,
                band,
                outcome.grid,
                outcome.total_power,
                axes,
            ));
        } else {
            let band_list = self.params.bands.clone();
            for (band, bins) in band_list.iter().zip(&p.band_bins) {
                let (grid, total) = match &cube {
                    Some(cube) => cube.band_power_bins(*bins),
                    None => {
                        let total = BeamPowerEngine::total_band_power(&spectra, *bins);
                        let grid = self.engine.symmetric_grid(
                            &spectra, offsets, *bins, n, smax, total,
                        );
                        (grid, total)
                    }
                };
                bands.push(self.finish_band(&spectra, offsets, *bins, *band, grid, total, axes));
            }
        }

        SingleWindowResult {
            tbeg,
            tend: tbeg + self.series.window_length,
            bands,
            cube: if p.retain_cube { cube } else { None },
        }
    }

    /// Shared tail of one band: arg-max, restricted arg-max, fine-grid
    /// refinement, F-statistic, optional dB rescale.
    #[allow(clippy::too_many_arguments)]
    fn finish_band(
        &mut self,
        spectra: &[WindowSpectrum],
        offsets: &[PlaneOffset],
        bins: BandBins,
        band: FrequencyBand,
        mut grid: Array2<f64>,
        total: f64,
        axes: GridAxes,
    ) -> BandResult {
        let region = self.params.search;
        let accept_fn;
        let accept: Option<&dyn Fn(f64, f64) -> bool> = match region {
            Some(region) => {
                accept_fn = move |x: f64, y: f64| region.contains(x, y);
                Some(&accept_fn)
            }
            None => None,
        };

        let n = grid.ncols();
        let coarse = refine::locate_peak(&grid, &axes, None)
            .expect("beam grid always has at least one node");
        let restricted = accept.and_then(|a| refine::locate_peak(&grid, &axes, Some(a)));

        let mut fine = None;
        let mut peak = coarse.to_peak();
        let interior =
            coarse.ix > 0 && coarse.iy > 0 && coarse.ix + 1 < n && coarse.iy + 1 < n;
        if self.params.fine_grid && interior {
            let refined = refine::fine_refine(
                &mut self.engine,
                spectra,
                offsets,
                bins,
                total,
                &axes,
                &coarse,
                accept,
            );
            if refined.peak.value > peak.value {
                peak = refined.peak;
            }
            fine = Some(refined);
        }

        let fstat = engine::fstat(coarse.value, spectra.len());

        let mut restricted_peak = restricted.map(PeakLocation::to_peak);
        if !self.params.output_power {
            let pmax = engine::rescale_db(&mut grid);
            peak.value = engine::db_value(peak.value, pmax);
            if let Some(r) = &mut restricted_peak {
                r.value = engine::db_value(r.value, pmax);
            }
            if let Some(f) = &mut fine {
                f.grid.values.mapv_inplace(|v| engine::db_value(v, pmax));
                f.peak.value = engine::db_value(f.peak.value, pmax);
            }
        }

        BandResult {
            band,
            grid: SlownessGrid { axes, values: grid },
            peak,
            total_power: total,
            fstat,
            restricted_peak,
            fine,
        }
    }

    fn compute_direction_window(&mut self, p: &Prepared<'_>, tbeg: f64) -> SingleWindowResult {
        self.fill_scratch(p, tbeg);
        let orientations = p
            .orientations
            .as_ref()
            .expect("three-component mode resolved orientations");

        let n_az = self.params.num_slowness;
        let n_inc = if n_az > 1 { n_az / 2 + 1 } else { 1 };
        let axes = polarization::direction_axes(n_az, n_inc);
        let region = self.params.search;
        let accept_fn;
        let accept: Option<&dyn Fn(f64, f64) -> bool> = match region {
            Some(region) => {
                accept_fn = move |x: f64, _y: f64| region.contains_azimuth(x);
                Some(&accept_fn)
            }
            None => None,
        };

        let mut bands = Vec::new();
        let band_list = self.params.bands.clone();
        for band in band_list {
            let window = self.polarization.prepare(
                [
                    &self.window_scratch[0][..p.nwin],
                    &self.window_scratch[1][..p.nwin],
                    &self.window_scratch[2][..p.nwin],
                ],
                orientations,
                band,
                self.params.taper,
                p.dt,
            );
            let mut grid = window.grid(n_az, n_inc);
            let total = window.total_power;

            let coarse = refine::locate_peak(&grid, &axes, None)
                .expect("direction grid always has at least one node");
            let restricted = accept.and_then(|a| refine::locate_peak(&grid, &axes, Some(a)));

            let mut peak = coarse.to_peak();
            let mut fine = None;
            let interior = coarse.ix > 0
                && coarse.iy > 0
                && coarse.ix + 1 < n_az
                && coarse.iy + 1 < n_inc;
            if self.params.fine_grid && interior {
                let refined = polarization::refine_direction(&window, &axes, &coarse, accept);
                if refined.peak.value > peak.value {
                    peak = refined.peak;
                }
                fine = Some(refined);
            }

            let fstat = engine::fstat(coarse.value, 3);

            let mut restricted_peak = restricted.map(PeakLocation::to_peak);
            if !self.params.output_power {
                let pmax = engine::rescale_db(&mut grid);
                peak.value = engine::db_value(peak.value, pmax);
                if let Some(r) = &mut restricted_peak {
                    r.value = engine::db_value(r.value, pmax);
                }
                if let Some(f) = &mut fine {
                    f.grid.values.mapv_inplace(|v| engine::db_value(v, pmax));
                    f.peak.value = engine::db_value(f.peak.value, pmax);
                }
            }

            bands.push(BandResult {
                band,
                grid: SlownessGrid { axes, values: grid },
                peak,
                total_power: total,
                fstat,
                restricted_peak,
                fine,
            });
        }

        SingleWindowResult {
            tbeg,
            tend: tbeg + self.series.window_length,
            bands,
            cube: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PlaneOffset;
    use crate::params::{SearchRegion, Taper};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const DT: f64 = 0.05;

    fn no_progress() -> impl FnMut(&ProgressUpdate) -> bool {
        |_: &ProgressUpdate| true
    }

    /// Line of stations along east carrying a plane wave with the given
    /// eastward slowness.
    fn plane_wave_channels(
        nsta: usize,
        slowness_east: f64,
        freq: f64,
        nsamp: usize,
    ) -> Vec<WaveformSegment> {
        (0..nsta)
            .map(|i| {
                let east = i as f64;
                let samples: Vec<f64> = (0..nsamp)
                    .map(|n| (2.0 * PI * freq * (n as f64 * DT - slowness_east * east)).sin())
                    .collect();
                WaveformSegment::new(&format!("S{}", i), "sz", samples, DT, 0.0).with_offset(
                    PlaneOffset {
                        east_km: east,
                        north_km: 0.0,
                    },
                )
            })
            .collect()
    }

    fn basic_params() -> FkParams {
        FkParams {
            slowness_max: 0.4,
            num_slowness: 11,
            bands: vec![FrequencyBand::new(0.5, 6.0)],
            taper: Taper::None,
            ..Default::default()
        }
    }

    #[test]
    fn overlap_not_below_window_length_fails_up_front() {
        match FkDriver::new(basic_params(), 10.0, 10.0) {
            Err(FkError::InvalidConfig(_)) => {}
            other => panic!("expected invalid configuration, got {:?}", other),
        }
        assert!(FkDriver::new(basic_params(), 10.0, 12.0).is_err());
    }

    #[test]
    fn short_window_fails_before_any_transform() {
        let channels = plane_wave_channels(3, 0.0, 1.25, 512);
        let mut driver = FkDriver::new(basic_params(), 0.1, 0.0).unwrap();
        match driver.run(&channels, None, &mut no_progress()) {
            Err(FkError::InvalidConfig(_)) => {}
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    #[test]
    fn disjoint_channels_report_no_coverage() {
        let mut a = plane_wave_channels(1, 0.0, 1.25, 256).remove(0);
        a.tbeg = 0.0;
        let mut b = plane_wave_channels(2, 0.0, 1.25, 256).remove(1);
        b.tbeg = 100.0;
        let mut driver = FkDriver::new(basic_params(), 5.0, 0.0).unwrap();
        match driver.run(&[a, b], None, &mut no_progress()) {
            Err(FkError::NoCoverage) => {}
            other => panic!("expected no coverage, got {:?}", other),
        }
    }

    #[test]
    fn plane_wave_slowness_is_recovered_within_one_cell() {
        // Five stations offset east by 0..4 km, on-bin 1.25 Hz tone with
        // 0.2 s/km eastward slowness, one 12.8 s window.
        let channels = plane_wave_channels(5, 0.2, 1.25, 256);
        let params = FkParams {
            slowness_max: 0.4,
            num_slowness: 81,
            bands: vec![FrequencyBand::new(0.5, 6.0)],
            taper: Taper::None,
            ..Default::default()
        };
        let mut driver = FkDriver::new(params, 12.8, 0.0).unwrap();
        let count = driver.run(&channels, None, &mut no_progress()).unwrap();
        assert_eq!(count, 1);

        let result = &driver.results()[0];
        assert_eq!(result.bands.len(), 1);
        let band = &result.bands[0];
        assert_eq!(band.grid.values.ncols(), 81);
        assert!((band.peak.x - 0.2).abs() <= 0.01 + 1e-9);
        assert_relative_eq!(band.peak.value, 1.0, epsilon = 1e-6);
        assert!(band.fstat > 100.0);
    }

    #[test]
    fn silent_channels_produce_finite_deterministic_output() {
        let channels: Vec<WaveformSegment> = (0..3)
            .map(|i| {
                WaveformSegment::new(&format!("S{}", i), "sz", vec![0.0; 512], DT, 0.0)
                    .with_offset(PlaneOffset {
                        east_km: i as f64,
                        north_km: 0.0,
                    })
            })
            .collect();
        let mut driver = FkDriver::new(basic_params(), 10.0, 0.0).unwrap();
        driver.run(&channels, None, &mut no_progress()).unwrap();

        let band = &driver.results()[0].bands[0];
        assert_eq!(band.total_power, 1.0);
        assert!(band.grid.values.iter().all(|v| v.is_finite()));
        assert_eq!(band.peak.value, 0.0);
    }

    #[test]
    fn sliding_windows_advance_by_length_minus_overlap() {
        let channels = plane_wave_channels(2, 0.0, 1.25, 1200); // 60 s
        let mut driver = FkDriver::new(basic_params(), 10.0, 5.0).unwrap();
        let count = driver.run(&channels, None, &mut no_progress()).unwrap();
        assert_eq!(count, 11);
        for pair in driver.results().windows(2) {
            assert_relative_eq!(pair[1].tbeg - pair[0].tbeg, 5.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn append_continues_with_strictly_increasing_start_times() {
        let long = plane_wave_channels(2, 0.0, 1.25, 1200); // 60 s
        let short: Vec<WaveformSegment> = long
            .iter()
            .map(|seg| {
                let mut seg = seg.clone();
                seg.samples.truncate(600); // first 30 s
                seg
            })
            .collect();

        let mut driver = FkDriver::new(basic_params(), 5.0, 2.5).unwrap();
        let first = driver.run(&short, None, &mut no_progress()).unwrap();
        assert!(first > 0);
        let appended = driver.append(&long, &mut no_progress()).unwrap();
        assert!(appended > 0);
        assert_eq!(driver.state(), DriverState::Complete);

        let tbegs: Vec<f64> = driver.results().iter().map(|r| r.tbeg).collect();
        for pair in tbegs.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert_eq!(driver.results().len(), first + appended);
    }

    #[test]
    fn truncation_drops_old_windows_in_streaming_mode() {
        let channels = plane_wave_channels(2, 0.0, 1.25, 1200);
        let mut driver = FkDriver::new(basic_params(), 5.0, 0.0).unwrap();
        driver.run(&channels, None, &mut no_progress()).unwrap();
        let before = driver.results().len();
        driver.truncate_trailing(20.0);
        assert!(driver.results().len() < before);
        driver.truncate_before(50.0);
        assert!(driver.results().iter().all(|r| r.tend > 50.0));
    }

    #[test]
    fn monitor_cancellation_reports_the_partial_count() {
        let channels = plane_wave_channels(2, 0.0, 1.25, 2400); // 120 s
        let mut driver = FkDriver::new(basic_params(), 5.0, 0.0).unwrap();
        let mut calls = 0usize;
        let mut monitor = |_: &ProgressUpdate| {
            calls += 1;
            false
        };
        let count = driver.run(&channels, None, &mut monitor).unwrap();
        assert_eq!(count, PROGRESS_STRIDE);
        assert_eq!(calls, 1);
        assert_eq!(driver.results().len(), PROGRESS_STRIDE);
        let (windows, cancelled) = driver.metrics();
        assert_eq!(windows, PROGRESS_STRIDE);
        assert_eq!(cancelled, 1);
    }

    #[test]
    fn full_compute_replaces_one_window_with_a_cube() {
        let channels = plane_wave_channels(3, 0.2, 1.25, 512);
        // 17 nodes put 0.2 s/km exactly on a node, keeping the arg-max
        // insensitive to summation order.
        let params = FkParams {
            num_slowness: 17,
            ..basic_params()
        };
        let mut driver = FkDriver::new(params, 12.8, 0.0).unwrap();
        driver.run(&channels, None, &mut no_progress()).unwrap();
        assert!(driver.results()[0].cube.is_none());
        let peak_before = driver.results()[0].bands[0].peak;

        driver.full_compute(&channels, 0).unwrap();
        let result = &driver.results()[0];
        let cube = result.cube.as_ref().expect("cube retained");
        assert_eq!(cube.nch, 3);
        let band = &result.bands[0];
        assert_relative_eq!(band.peak.x, peak_before.x, epsilon = 1e-9);
        assert_relative_eq!(band.peak.value, peak_before.value, epsilon = 1e-6);

        assert!(driver.full_compute(&channels, 99).is_err());
    }

    /// L-shaped array so both slowness components are constrained and the
    /// coarse peak sits strictly inside the grid.
    fn l_shaped_channels(slowness_east: f64, freq: f64, nsamp: usize) -> Vec<WaveformSegment> {
        let stations = [
            (0.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
            (0.0, 1.3),
            (0.0, 2.6),
        ];
        stations
            .iter()
            .enumerate()
            .map(|(i, &(east, north))| {
                let samples: Vec<f64> = (0..nsamp)
                    .map(|n| (2.0 * PI * freq * (n as f64 * DT - slowness_east * east)).sin())
                    .collect();
                WaveformSegment::new(&format!("S{}", i), "sz", samples, DT, 0.0).with_offset(
                    PlaneOffset {
                        east_km: east,
                        north_km: north,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn fine_grid_refines_an_interior_peak() {
        let channels = l_shaped_channels(0.2, 1.25, 512);
        let params = FkParams {
            fine_grid: true,
            num_slowness: 21,
            taper: Taper::None,
            ..basic_params()
        };
        let mut driver = FkDriver::new(params, 12.8, 0.0).unwrap();
        driver.run(&channels, None, &mut no_progress()).unwrap();
        let band = &driver.results()[0].bands[0];
        let fine = band.fine.as_ref().expect("interior peak was refined");
        assert!((fine.peak.x - band.peak.x).abs() <= 1e-9 || band.peak.value >= fine.peak.value);
        assert!((fine.peak.x - 0.2).abs() <= 0.04 + 1e-9);
    }

    #[test]
    fn restricted_search_reports_a_masked_maximum() {
        let channels = plane_wave_channels(5, 0.2, 1.25, 512);
        let params = FkParams {
            search: Some(SearchRegion {
                slow_min: 0.0,
                slow_max: 0.4,
                az_min_deg: 180.0,
                az_max_deg: 359.0,
            }),
            ..basic_params()
        };
        let mut driver = FkDriver::new(params, 12.8, 0.0).unwrap();
        driver.run(&channels, None, &mut no_progress()).unwrap();
        let band = &driver.results()[0].bands[0];
        // Global peak sits east (az 90), outside the restricted sector.
        let restricted = band.restricted_peak.expect("restriction was configured");
        assert!(restricted.value <= band.peak.value);
        assert!(band.peak.x > 0.0);
        assert!(restricted.x <= 0.0);
    }

    #[test]
    fn db_output_pins_the_grid_maximum_at_ten() {
        let channels = plane_wave_channels(4, 0.1, 1.25, 512);
        let params = FkParams {
            output_power: false,
            ..basic_params()
        };
        let mut driver = FkDriver::new(params, 12.8, 0.0).unwrap();
        driver.run(&channels, None, &mut no_progress()).unwrap();
        let band = &driver.results()[0].bands[0];
        let max = band.grid.values.iter().cloned().fold(f64::MIN, f64::max);
        assert_relative_eq!(max, 10.0, epsilon = 1e-9);
        assert_relative_eq!(band.peak.value, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn band_scan_locks_onto_the_occupied_sub_band() {
        let channels = plane_wave_channels(3, 0.0, 2.5, 512);
        let params = FkParams {
            band_scan: true,
            bands: vec![FrequencyBand::new(1.0, 2.0)], // 1 Hz scan width
            ..basic_params()
        };
        let mut driver = FkDriver::new(params, 12.8, 0.0).unwrap();
        driver.run(&channels, None, &mut no_progress()).unwrap();
        let band = &driver.results()[0].bands[0];
        assert!(band.band.fmin <= 2.5 + 1e-9 && 2.5 <= band.band.fmax + 1e-9);
    }

    #[test]
    fn three_component_window_recovers_the_polarization_direction() {
        let (az0, inc0) = (135.0f64, 60.0f64);
        let az = az0.to_radians();
        let inc = inc0.to_radians();
        let d = [inc.sin() * az.sin(), inc.sin() * az.cos(), inc.cos()];
        let carrier: Vec<f64> = (0..512)
            .map(|n| (2.0 * PI * 2.0 * n as f64 * DT).sin())
            .collect();
        let orient = [
            Orientation { azimuth_deg: 90.0, incidence_deg: 90.0 },
            Orientation { azimuth_deg: 0.0, incidence_deg: 90.0 },
            Orientation { azimuth_deg: 0.0, incidence_deg: 0.0 },
        ];
        let names = ["se", "sn", "sz"];
        let channels: Vec<WaveformSegment> = (0..3)
            .map(|c| {
                let samples: Vec<f64> = carrier.iter().map(|v| v * d[c]).collect();
                WaveformSegment::new("S3C", names[c], samples, DT, 0.0)
                    .with_orientation(orient[c])
            })
            .collect();

        let params = FkParams {
            three_component: true,
            num_slowness: 73,
            bands: vec![FrequencyBand::new(0.5, 6.0)],
            taper: Taper::None,
            ..Default::default()
        };
        let mut driver = FkDriver::new(params, 12.8, 0.0).unwrap();
        let count = driver.run(&channels, None, &mut no_progress()).unwrap();
        assert_eq!(count, 2);

        let band = &driver.results()[0].bands[0];
        let daz = band.grid.axes.dx;
        let dinc = band.grid.axes.dy;
        assert!((band.peak.x - az0).abs() <= daz + 1e-9);
        assert!((band.peak.y - inc0).abs() <= dinc + 1e-9);
        assert_relative_eq!(band.peak.value, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn three_component_requires_orientations() {
        let channels: Vec<WaveformSegment> = (0..3)
            .map(|c| WaveformSegment::new("S3C", &format!("c{}", c), vec![0.0; 512], DT, 0.0))
            .collect();
        let params = FkParams {
            three_component: true,
            ..basic_params()
        };
        let mut driver = FkDriver::new(params, 10.0, 0.0).unwrap();
        match driver.run(&channels, None, &mut no_progress()) {
            Err(FkError::Geometry { .. }) => {}
            other => panic!("expected geometry error, got {:?}", other),
        }
    }
}
