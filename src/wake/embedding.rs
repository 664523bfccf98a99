//! Embedding history ring buffer

use std::collections::VecDeque;

/// Fixed-length ring of the classifier's temporal input window
///
/// Always holds exactly `depth` vectors of width `dim`, zero-initialized so
/// the classifier sees a full window from the first call. Pushing evicts the
/// oldest vector.
#[derive(Debug)]
pub struct EmbeddingHistory {
    depth: usize,
    dim: usize,
    buffer: VecDeque<Vec<f32>>,
}

impl EmbeddingHistory {
    /// Create a zero-filled history
    #[must_use]
    pub fn new(depth: usize, dim: usize) -> Self {
        let mut buffer = VecDeque::with_capacity(depth);
        for _ in 0..depth {
            buffer.push_back(vec![0.0; dim]);
        }
        Self { depth, dim, buffer }
    }

    /// Temporal depth (always equals the buffered length)
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Embedding width
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// Push a vector, evicting the oldest
    ///
    /// Vectors of the wrong width are truncated or zero-padded rather than
    /// rejected; the embedder's width was negotiated at load time and a
    /// disagreement here is already logged upstream.
    pub fn push(&mut self, mut vector: Vec<f32>) {
        vector.resize(self.dim, 0.0);
        self.buffer.pop_front();
        self.buffer.push_back(vector);
        debug_assert_eq!(self.buffer.len(), self.depth);
    }

    /// Flatten to the classifier's `[depth * dim]` input layout, oldest first
    #[must_use]
    pub fn flatten(&self) -> Vec<f32> {
        let mut data = Vec::with_capacity(self.depth * self.dim);
        for vector in &self.buffer {
            data.extend_from_slice(vector);
        }
        data
    }

    /// Change the temporal depth, keeping the most recent vectors
    ///
    /// Growing zero-pads at the old end; shrinking drops the oldest.
    pub fn resize_depth(&mut self, depth: usize) {
        while self.buffer.len() > depth {
            self.buffer.pop_front();
        }
        while self.buffer.len() < depth {
            self.buffer.push_front(vec![0.0; self.dim]);
        }
        self.depth = depth;
    }

    /// Zero every vector
    pub fn reset(&mut self) {
        for vector in &mut self.buffer {
            vector.iter_mut().for_each(|v| *v = 0.0);
        }
    }
}
