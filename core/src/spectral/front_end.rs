//! Per-window spectral preparation: demean, taper, zero-pad, transform,
//! clip to the frequency range any band needs.

use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::params::Taper;
use crate::spectral::taper;

/// Smallest power of two that holds `n` samples.
pub fn next_pow2(n: usize) -> usize {
    n.next_power_of_two()
}

/// Inclusive discrete-frequency index range of one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandBins {
    pub k_lo: usize,
    pub k_hi: usize,
}

impl BandBins {
    /// Map a band in Hz onto transform bins, clamped to (0, Nyquist].
    /// Bands narrower than one bin collapse onto the nearest single bin.
    pub fn from_band(fmin: f64, fmax: f64, df: f64, nfft: usize) -> Self {
        let nyquist = nfft / 2;
        let mut k_lo = (fmin / df).ceil() as usize;
        k_lo = k_lo.clamp(1, nyquist);
        let mut k_hi = (fmax / df).floor() as usize;
        k_hi = k_hi.min(nyquist).max(k_lo);
        Self { k_lo, k_hi }
    }

    pub fn count(&self) -> usize {
        self.k_hi - self.k_lo + 1
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &BandBins) -> BandBins {
        BandBins {
            k_lo: self.k_lo.min(other.k_lo),
            k_hi: self.k_hi.max(other.k_hi),
        }
    }
}

/// Spectrum of one windowed channel, clipped to the retained index range.
/// `bins[0]` holds discrete frequency `k_lo`, spaced by `df` Hz, already
/// scaled by 1/N.
#[derive(Debug, Clone)]
pub struct WindowSpectrum {
    pub k_lo: usize,
    pub df: f64,
    pub bins: Vec<Complex64>,
}

impl WindowSpectrum {
    pub fn bin(&self, k: usize) -> Complex64 {
        self.bins[k - self.k_lo]
    }

    pub fn k_hi(&self) -> usize {
        self.k_lo + self.bins.len() - 1
    }
}

/// Owns the transform plan and the scratch buffers reused across windows.
pub struct SpectralFrontEnd {
    planner: FftPlanner<f64>,
    time: Vec<f64>,
    freq: Vec<Complex64>,
}

impl std::fmt::Debug for SpectralFrontEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralFrontEnd")
            .field("time", &self.time)
            .field("freq", &self.freq)
            .finish_non_exhaustive()
    }
}

impl SpectralFrontEnd {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            time: Vec::new(),
            freq: Vec::new(),
        }
    }

    /// Transform one window. `nfft` must be a power of two not smaller than
    /// `samples.len()`; `keep` is the retained bin range.
    pub fn transform(
        &mut self,
        samples: &[f64],
        window_taper: Taper,
        nfft: usize,
        keep: BandBins,
        dt: f64,
    ) -> WindowSpectrum {
        debug_assert!(nfft >= samples.len());
        debug_assert!(nfft.is_power_of_two());

        self.time.clear();
        self.time.extend_from_slice(samples);
        let mean = self.time.iter().sum::<f64>() / self.time.len().max(1) as f64;
        for v in &mut self.time {
            *v -= mean;
        }
        taper::apply(window_taper, &mut self.time);

        self.freq.clear();
        self.freq
            .extend(self.time.iter().map(|&v| Complex64::new(v, 0.0)));
        self.freq.resize(nfft, Complex64::new(0.0, 0.0));

        let fft = self.planner.plan_fft_forward(nfft);
        fft.process(&mut self.freq);

        let scale = 1.0 / nfft as f64;
        let bins = self.freq[keep.k_lo..=keep.k_hi]
            .iter()
            .map(|c| c * scale)
            .collect();

        WindowSpectrum {
            k_lo: keep.k_lo,
            df: 1.0 / (nfft as f64 * dt),
            bins,
        }
    }
}

impl Default for SpectralFrontEnd {
    fn default() -> Self {
        Self::new()
    }
}
