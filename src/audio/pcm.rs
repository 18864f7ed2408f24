//! # PCM Window Assembly
//!
//! Decodes buffered audio track frames into one contiguous mono PCM window
//! at a uniform sample rate, and materializes a WAV representation for
//! consumers that want a container (the emotion classifier).
//!
//! ## Frame Format:
//! Track frames carry interleaved 16-bit little-endian PCM at the rate and
//! channel count the media stack negotiated. Mixed-rate windows are brought
//! to the configured target rate with linear resampling before
//! concatenation.

use byteorder::{LittleEndian, ReadBytesExt};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use thiserror::Error;

/// One opaque audio frame as delivered by the track producer.
#[derive(Debug, Clone)]
pub struct AudioFramePayload {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved 16-bit little-endian PCM.
    pub data: Vec<u8>,
}

impl AudioFramePayload {
    /// Duration of this frame in seconds: `total_samples / (rate * channels)`.
    pub fn seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let total_samples = (self.data.len() / 2) as f64;
        total_samples / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// A decoded, mono, uniform-rate window of speech.
#[derive(Debug, Clone)]
pub struct PcmWindow {
    /// Normalized samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Analyzed duration, accumulated from the source frames.
    pub seconds: f64,
}

#[derive(Debug, Error)]
pub enum PcmError {
    #[error("frame of {len} bytes is not a whole number of {channels}-channel 16-bit samples")]
    MisalignedFrame { len: usize, channels: u16 },

    #[error("frame declares zero sample rate or zero channels")]
    EmptyFormat,

    #[error("window contains no samples")]
    EmptyWindow,

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Decode and concatenate `frames` into one mono window at `target_rate`.
pub fn assemble_window(
    frames: &[AudioFramePayload],
    target_rate: u32,
) -> Result<PcmWindow, PcmError> {
    let mut samples = Vec::new();
    let mut seconds = 0.0;

    for frame in frames {
        if frame.sample_rate == 0 || frame.channels == 0 {
            return Err(PcmError::EmptyFormat);
        }
        let frame_stride = 2 * frame.channels as usize;
        if frame.data.len() % frame_stride != 0 {
            return Err(PcmError::MisalignedFrame {
                len: frame.data.len(),
                channels: frame.channels,
            });
        }

        let mono = decode_mono(frame)?;
        seconds += frame.seconds();

        if frame.sample_rate == target_rate {
            samples.extend(mono);
        } else {
            samples.extend(resample_linear(&mono, frame.sample_rate, target_rate));
        }
    }

    if samples.is_empty() {
        return Err(PcmError::EmptyWindow);
    }

    Ok(PcmWindow {
        samples,
        sample_rate: target_rate,
        seconds,
    })
}

/// Decode one frame to normalized mono samples, averaging channels.
fn decode_mono(frame: &AudioFramePayload) -> Result<Vec<f32>, PcmError> {
    let channels = frame.channels as usize;
    let mut cursor = Cursor::new(frame.data.as_slice());
    let mut mono = Vec::with_capacity(frame.data.len() / (2 * channels));

    loop {
        let mut sum = 0i32;
        for ch in 0..channels {
            match cursor.read_i16::<LittleEndian>() {
                Ok(sample) => sum += sample as i32,
                Err(_) if ch == 0 => return Ok(mono), // clean end of frame
                Err(_) => {
                    return Err(PcmError::MisalignedFrame {
                        len: frame.data.len(),
                        channels: frame.channels,
                    })
                }
            }
        }
        mono.push((sum / channels as i32) as f32 / 32768.0);
    }
}

/// Linear interpolation resampler. Adequate for feature extraction; the
/// analyzer works on broadband statistics, not on phase.
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        if idx + 1 < samples.len() {
            let frac = (pos - idx as f64) as f32;
            out.push(samples[idx] * (1.0 - frac) + samples[idx + 1] * frac);
        } else {
            out.push(samples[samples.len() - 1]);
        }
    }

    out
}

/// Materialize a 16-bit mono WAV file image of the window.
pub fn to_wav_bytes(window: &PcmWindow) -> Result<Vec<u8>, PcmError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: window.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in &window.samples {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
