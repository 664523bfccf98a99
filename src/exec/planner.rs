//! Execution profile ranking and fallback
//!
//! Builds the ordered chain of viable execution configurations from a
//! capability snapshot, selects one by performance score, and walks down the
//! chain when a mode misbehaves. Per-mode latency samples feed the tuning
//! advice routine.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use super::capability::{CapabilitySnapshot, performance_score};
use crate::{Error, Result};

/// Rolling latency window per execution mode
const LATENCY_WINDOW: usize = 100;

/// Worker p95 above this suggests falling back (ms)
const FALLBACK_P95_MS: f64 = 100.0;

/// Worker mean above this suggests falling back (ms)
const FALLBACK_MEAN_MS: f64 = 50.0;

/// Main-thread mean below this suggests promoting to a worker mode (ms)
const PROMOTE_MEAN_MS: f64 = 20.0;

/// A named combination of concurrency/acceleration features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Dedicated worker with accelerator offload
    WorkerAccelerated,
    /// Dedicated worker, SIMD kernels, multi-threaded ops
    WorkerSimdThreads,
    /// Dedicated worker with SIMD kernels
    WorkerSimd,
    /// Dedicated worker, scalar kernels
    WorkerBasic,
    /// Main-thread inference with accelerator offload
    MainAccelerated,
    /// Main-thread scalar inference
    MainBasic,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WorkerAccelerated => "worker-accelerated",
            Self::WorkerSimdThreads => "worker-simd-threads",
            Self::WorkerSimd => "worker-simd",
            Self::WorkerBasic => "worker-basic",
            Self::MainAccelerated => "main-accelerated",
            Self::MainBasic => "main-basic",
        };
        write!(f, "{s}")
    }
}

/// An immutable execution configuration record
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExecutionProfile {
    /// Mode identifier
    pub mode: ExecutionMode,
    /// Inference runs on a dedicated worker
    pub uses_worker: bool,
    /// Inference offloads to an accelerator
    pub uses_accelerator: bool,
    /// Kernels use wide-vector instructions
    pub uses_simd: bool,
    /// Ops may use shared-memory multi-threading
    pub uses_threads: bool,
    /// Human description
    pub description: &'static str,
    /// Static priority score, higher is better
    pub score: u32,
}

/// All known profiles, best first
const PROFILES: [ExecutionProfile; 6] = [
    ExecutionProfile {
        mode: ExecutionMode::WorkerAccelerated,
        uses_worker: true,
        uses_accelerator: true,
        uses_simd: true,
        uses_threads: true,
        description: "dedicated worker with accelerator offload",
        score: 100,
    },
    ExecutionProfile {
        mode: ExecutionMode::WorkerSimdThreads,
        uses_worker: true,
        uses_accelerator: false,
        uses_simd: true,
        uses_threads: true,
        description: "dedicated worker, SIMD kernels, threaded ops",
        score: 90,
    },
    ExecutionProfile {
        mode: ExecutionMode::WorkerSimd,
        uses_worker: true,
        uses_accelerator: false,
        uses_simd: true,
        uses_threads: false,
        description: "dedicated worker with SIMD kernels",
        score: 80,
    },
    ExecutionProfile {
        mode: ExecutionMode::WorkerBasic,
        uses_worker: true,
        uses_accelerator: false,
        uses_simd: false,
        uses_threads: false,
        description: "dedicated worker, scalar kernels",
        score: 60,
    },
    ExecutionProfile {
        mode: ExecutionMode::MainAccelerated,
        uses_worker: false,
        uses_accelerator: true,
        uses_simd: false,
        uses_threads: false,
        description: "main-thread inference with accelerator offload",
        score: 40,
    },
    ExecutionProfile {
        mode: ExecutionMode::MainBasic,
        uses_worker: false,
        uses_accelerator: false,
        uses_simd: false,
        uses_threads: false,
        description: "main-thread scalar inference",
        score: 10,
    },
];

fn feasible(profile: &ExecutionProfile, caps: &CapabilitySnapshot) -> bool {
    if profile.uses_worker && !caps.workers {
        return false;
    }
    if profile.uses_accelerator && !caps.has_accelerator() {
        return false;
    }
    if profile.uses_simd && !caps.simd {
        return false;
    }
    if profile.uses_threads && !caps.threads {
        return false;
    }
    true
}

/// The ranked, feasible profiles for a host
pub type ExecutionChain = Vec<ExecutionProfile>;

/// Tuning recommendation derived from latency samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningAdvice {
    /// Current mode is fine
    Stay,
    /// Worker latency is pathological; fall back one step
    FallBack,
    /// Main-thread latency is comfortable; a worker mode would do better
    Promote,
}

/// Rolling latency statistics for one execution mode
#[derive(Debug, Default)]
pub struct LatencyStats {
    samples: VecDeque<f64>,
}

impl LatencyStats {
    /// Record one latency sample in milliseconds
    pub fn record(&mut self, ms: f64) {
        if self.samples.len() >= LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
    }

    /// Number of recorded samples
    #[must_use]
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Arithmetic mean, 0 when empty
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Median, 0 when empty
    #[must_use]
    pub fn median(&self) -> f64 {
        self.percentile(0.5)
    }

    /// 95th percentile, 0 when empty
    #[must_use]
    pub fn p95(&self) -> f64 {
        self.percentile(0.95)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn percentile(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((sorted.len() - 1) as f64 * q).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    }
}

/// Ranks viable execution configurations and supports ordered fallback
pub struct ExecutionPlanner {
    chain: ExecutionChain,
    caps: CapabilitySnapshot,
    // Serialized: one fallback in flight at a time
    current: Mutex<usize>,
    stats: Mutex<HashMap<ExecutionMode, LatencyStats>>,
}

impl ExecutionPlanner {
    /// Build the chain for a host and select the starting profile
    ///
    /// The chain is never empty: the main-thread scalar profile has no
    /// capability gates.
    #[must_use]
    pub fn plan(caps: &CapabilitySnapshot) -> Self {
        let chain: ExecutionChain = PROFILES
            .iter()
            .filter(|p| feasible(p, caps))
            .copied()
            .collect();

        let score = performance_score(caps);
        let start = select_index(&chain, score);

        tracing::info!(
            score,
            chain_len = chain.len(),
            selected = %chain[start].mode,
            "execution chain planned"
        );

        Self {
            chain,
            caps: caps.clone(),
            current: Mutex::new(start),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// The ranked feasible profiles
    #[must_use]
    pub fn chain(&self) -> &[ExecutionProfile] {
        &self.chain
    }

    /// The currently selected profile
    ///
    /// # Panics
    ///
    /// Never panics; the chain is non-empty and the index stays in bounds.
    #[must_use]
    pub fn current(&self) -> ExecutionProfile {
        let index = *self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.chain[index]
    }

    /// Advance one step down the chain
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainExhausted`] at the last entry; the current
    /// profile is left unchanged.
    pub fn fallback_to_next_mode(&self) -> Result<ExecutionProfile> {
        let mut index = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *index + 1 >= self.chain.len() {
            let mode = self.chain[*index].mode.to_string();
            tracing::warn!(mode = %mode, "execution chain exhausted");
            return Err(Error::ChainExhausted(mode));
        }
        *index += 1;
        let profile = self.chain[*index];
        tracing::info!(mode = %profile.mode, "fell back to next execution mode");
        Ok(profile)
    }

    /// Record one inference latency sample for a mode (milliseconds)
    pub fn record_latency(&self, mode: ExecutionMode, ms: f64) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.entry(mode).or_default().record(ms);
        }
    }

    /// Snapshot of (count, mean, median, p95) for a mode
    #[must_use]
    pub fn latency_summary(&self, mode: ExecutionMode) -> Option<(usize, f64, f64, f64)> {
        let stats = self.stats.lock().ok()?;
        let s = stats.get(&mode)?;
        Some((s.count(), s.mean(), s.median(), s.p95()))
    }

    /// Recommend a mode change based on recorded latency
    #[must_use]
    pub fn advice(&self) -> TuningAdvice {
        let profile = self.current();
        let Some((count, mean, _median, p95)) = self.latency_summary(profile.mode) else {
            return TuningAdvice::Stay;
        };
        if count < 10 {
            return TuningAdvice::Stay;
        }
        if profile.uses_worker && p95 > FALLBACK_P95_MS && mean > FALLBACK_MEAN_MS {
            return TuningAdvice::FallBack;
        }
        if !profile.uses_worker && mean < PROMOTE_MEAN_MS && self.caps.workers {
            return TuningAdvice::Promote;
        }
        TuningAdvice::Stay
    }
}

fn select_index(chain: &[ExecutionProfile], score: f32) -> usize {
    if score >= 200.0 {
        return 0;
    }
    if score >= 100.0 {
        // Second available worker-based entry, or the top of the chain when
        // fewer than two exist
        let mut seen = 0usize;
        for (index, profile) in chain.iter().enumerate() {
            if profile.uses_worker {
                seen += 1;
                if seen == 2 {
                    return index;
                }
            }
        }
        return 0;
    }
    chain
        .iter()
        .position(|p| !p.uses_worker)
        .unwrap_or(chain.len() - 1)
}
