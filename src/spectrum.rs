//! Per-second spectral analysis of one accelerometer axis

use std::fmt::Write;

use num_complex::Complex;
use rustfft::FftPlanner;

/// Bins reported per axis unless configured otherwise
pub const DEFAULT_TOP_BINS: usize = 20;

/// One frequency bin of the transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    pub bin: usize,
    pub magnitude: f64,
}

/// Strongest-bins FFT analyzer
///
/// Plans are cached by the planner, so repeated seconds of similar length
/// reuse the same FFT.
pub struct SpectralAnalyzer {
    planner: FftPlanner<f64>,
    top_bins: usize,
    buffer: Vec<Complex<f64>>,
}

impl SpectralAnalyzer {
    pub fn new(top_bins: usize) -> Self {
        Self {
            planner: FftPlanner::new(),
            top_bins,
            buffer: Vec::new(),
        }
    }

    pub fn top_bins(&self) -> usize {
        self.top_bins
    }

    /// Length the input is zero padded to before the transform
    pub fn padded_len(samples: usize) -> usize {
        samples.next_power_of_two()
    }

    /// Strongest bins of the first half of the spectrum, magnitude descending
    ///
    /// Equal magnitudes keep ascending bin order. Returns fewer than
    /// `top_bins` peaks only when the half spectrum is shorter than that.
    pub fn analyze(&mut self, samples: &[f64]) -> Vec<SpectralPeak> {
        if samples.is_empty() {
            return Vec::new();
        }

        let len = Self::padded_len(samples.len());
        self.buffer.clear();
        self.buffer
            .extend(samples.iter().map(|&x| Complex::new(x, 0.0)));
        self.buffer.resize(len, Complex::new(0.0, 0.0));

        let fft = self.planner.plan_fft_forward(len);
        fft.process(&mut self.buffer);

        // Only first half, as second half is mirror
        let half = (len / 2).max(1);
        let mut peaks: Vec<SpectralPeak> = self.buffer[..half]
            .iter()
            .enumerate()
            .map(|(bin, c)| SpectralPeak {
                bin,
                magnitude: c.norm(),
            })
            .collect();

        // Stable: ties stay in bin order
        peaks.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
        peaks.truncate(self.top_bins);
        peaks
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_BINS)
    }
}

/// Format peaks as `,<bin>,<magnitude>` pairs with 8 fractional digits
pub fn format_peaks(peaks: &[SpectralPeak]) -> String {
    let mut out = String::with_capacity(peaks.len() * 24);
    for peak in peaks {
        let _ = write!(out, ",{},{:.8}", peak.bin, peak.magnitude);
    }
    out
}
