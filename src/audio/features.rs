//! # Spectral Features
//!
//! MFCC and energy extraction for the speech risk score. The pipeline only
//! consumes two scalars per window:
//!
//! - `mfcc_mean`: mean over all MFCC coefficients of all frames
//! - `energy`: RMS of the window
//!
//! and the documented heuristic `risk_score = mfcc_mean * energy`.
//!
//! Extraction is deterministic and pure; the analyzer is a trait so the
//! audio processor can be tested with fixed feature values.

use crate::audio::pcm::PcmWindow;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// Features of one analyzed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcousticFeatures {
    pub mfcc_mean: f32,
    pub energy: f32,
    pub risk_score: f32,
}

impl AcousticFeatures {
    pub fn from_parts(mfcc_mean: f32, energy: f32) -> Self {
        Self {
            mfcc_mean,
            energy,
            risk_score: mfcc_mean * energy,
        }
    }
}

/// Window-level feature extraction.
pub trait AcousticAnalyzer: Send + Sync {
    fn analyze(&self, window: &PcmWindow) -> AcousticFeatures;
}

/// Default analyzer: STFT power spectrum → mel filterbank → DCT-II MFCCs.
pub struct SpectralAnalyzer {
    n_fft: usize,
    hop_length: usize,
    n_mels: usize,
    n_mfcc: usize,
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop_length: 512,
            n_mels: 40,
            n_mfcc: 13,
        }
    }
}

impl AcousticAnalyzer for SpectralAnalyzer {
    fn analyze(&self, window: &PcmWindow) -> AcousticFeatures {
        let energy = rms(&window.samples);
        let mfcc_mean = self.mfcc_mean(&window.samples, window.sample_rate);
        AcousticFeatures::from_parts(mfcc_mean, energy)
    }
}

impl SpectralAnalyzer {
    /// Mean over all MFCC coefficients of all frames. Returns 0 for windows
    /// too short to frame.
    fn mfcc_mean(&self, samples: &[f32], sample_rate: u32) -> f32 {
        let power = self.stft_power(samples);
        if power.is_empty() {
            return 0.0;
        }

        let filterbank = mel_filterbank(self.n_mels, self.n_fft, sample_rate);
        let mut sum = 0.0f64;
        let mut count = 0usize;

        for frame in &power {
            // Log mel energies.
            let mut mels = Vec::with_capacity(self.n_mels);
            for filter in &filterbank {
                let mut acc = 0.0f64;
                for &(bin, weight) in filter {
                    acc += weight * frame[bin];
                }
                mels.push((acc + 1e-10).ln());
            }

            // DCT-II over the log mel energies yields the cepstrum.
            for k in 0..self.n_mfcc.min(self.n_mels) {
                let mut coeff = 0.0f64;
                for (m, &mel) in mels.iter().enumerate() {
                    coeff += mel * (PI * k as f64 * (m as f64 + 0.5) / self.n_mels as f64).cos();
                }
                sum += coeff;
                count += 1;
            }
        }

        if count == 0 {
            0.0
        } else {
            (sum / count as f64) as f32
        }
    }

    /// Hann-windowed power spectrogram, one `n_fft/2 + 1` bin row per frame.
    fn stft_power(&self, samples: &[f32]) -> Vec<Vec<f64>> {
        if samples.len() < self.n_fft {
            return Vec::new();
        }

        let hann: Vec<f64> = (0..self.n_fft)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / self.n_fft as f64).cos())
            .collect();

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(self.n_fft);
        let n_frames = (samples.len() - self.n_fft) / self.hop_length + 1;
        let n_bins = self.n_fft / 2 + 1;

        let mut frames = Vec::with_capacity(n_frames);
        for frame_idx in 0..n_frames {
            let start = frame_idx * self.hop_length;
            let mut buffer: Vec<Complex<f64>> = (0..self.n_fft)
                .map(|i| Complex::new(samples[start + i] as f64 * hann[i], 0.0))
                .collect();
            fft.process(&mut buffer);
            frames.push(buffer[..n_bins].iter().map(|c| c.norm_sqr()).collect());
        }
        frames
    }
}

/// Root-mean-square amplitude of the window.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank as sparse `(bin, weight)` lists.
fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<Vec<(usize, f64)>> {
    let n_bins = n_fft / 2 + 1;
    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);

    // n_mels + 2 equally spaced mel points, converted back to FFT bins.
    let bin_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| {
            let hz = mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64);
            hz * n_fft as f64 / sample_rate as f64
        })
        .collect();

    let mut filters = Vec::with_capacity(n_mels);
    for m in 1..=n_mels {
        let (left, center, right) = (bin_points[m - 1], bin_points[m], bin_points[m + 1]);
        let mut filter = Vec::new();
        for bin in left.floor() as usize..=(right.ceil() as usize).min(n_bins - 1) {
            let b = bin as f64;
            let weight = if b < center {
                (b - left) / (center - left).max(1e-9)
            } else {
                (right - b) / (right - center).max(1e-9)
            };
            if weight > 0.0 {
                filter.push((bin, weight));
            }
        }
        filters.push(filter);
    }
    filters
}
