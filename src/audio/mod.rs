//! # Acoustic Analysis
//!
//! Turns a window of raw audio track frames into a risk assessment:
//!
//! - **PCM assembly** (`pcm`): decode 16-bit frames, downmix to mono,
//!   resample to a uniform rate, concatenate, materialize WAV bytes
//! - **Spectral features** (`features`): MFCC mean and RMS energy; the
//!   documented risk heuristic is `risk_score = mfcc_mean * energy`
//! - **Emotion** (`emotion`): optional classifier seam fed with the WAV
//!   window, loaded lazily like the local detector
//!
//! All of this is CPU-bound and runs on the blocking worker pool, never on
//! the async executor threads.

pub mod emotion;
pub mod features;
pub mod pcm;

pub use features::{AcousticAnalyzer, AcousticFeatures, SpectralAnalyzer};
pub use pcm::{assemble_window, AudioFramePayload, PcmWindow};
