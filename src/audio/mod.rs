//! Audio frame types and capture front end

pub mod capture;

pub use capture::{AudioCapture, samples_to_wav};

use crate::{Error, Result};

/// Sample rate the whole pipeline runs at (16kHz speech audio)
pub const SAMPLE_RATE: u32 = 16_000;

/// Frame size consumed by the wake word feature extractor (80ms at 16kHz)
pub const WAKE_FRAME_SAMPLES: usize = 1280;

/// Frame size consumed by the voice activity detector (32ms at 16kHz)
pub const VAD_FRAME_SAMPLES: usize = 512;

/// A fixed-length chunk of mono PCM audio, normalized to [-1, 1]
///
/// Frames are immutable once produced and owned transiently by whichever
/// detector consumes them.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from normalized f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if `samples` is empty
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::Audio("empty audio frame".to_string()));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create a frame from raw i16 PCM, normalizing to [-1, 1]
    ///
    /// # Errors
    ///
    /// Returns error if `samples` is empty
    pub fn from_i16(samples: &[i16], sample_rate: u32) -> Result<Self> {
        let normalized = samples
            .iter()
            .map(|&s| f32::from(s) / 32768.0)
            .collect::<Vec<_>>();
        Self::new(normalized, sample_rate)
    }

    /// The normalized samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples in this frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame is empty (never true for constructed frames)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Root-mean-square amplitude of this frame
    ///
    /// Squares accumulate in f64; sequential f32 summation drifts measurably
    /// over frame-sized sample counts.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum();
        (sum_squares / self.samples.len() as f64).sqrt() as f32
    }
}
