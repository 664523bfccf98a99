//! Mel-spectrogram frame buffering

use std::collections::VecDeque;

/// Width of one mel-spectrogram frame
pub const MEL_BINS: usize = 32;

/// One mel-spectrogram frame
pub type MelFrame = [f32; MEL_BINS];

/// FIFO buffer of mel frames feeding the embedder
///
/// The pipeline keeps this bounded by draining a stride of frames per
/// processed window; the buffer itself only stores and slices.
#[derive(Debug, Default)]
pub struct MelBuffer {
    frames: VecDeque<MelFrame>,
}

impl MelBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one frame
    pub fn push(&mut self, frame: MelFrame) {
        self.frames.push_back(frame);
    }

    /// Number of buffered frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Flatten the oldest `window` frames row-major, if available
    #[must_use]
    pub fn window(&self, window: usize) -> Option<Vec<f32>> {
        if self.frames.len() < window {
            return None;
        }
        let mut data = Vec::with_capacity(window * MEL_BINS);
        for frame in self.frames.iter().take(window) {
            data.extend_from_slice(frame);
        }
        Some(data)
    }

    /// Evict up to `count` oldest frames
    pub fn evict(&mut self, count: usize) {
        let count = count.min(self.frames.len());
        self.frames.drain(..count);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
