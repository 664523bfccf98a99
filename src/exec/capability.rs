//! Host capability detection and scoring
//!
//! Probes the concurrency and acceleration features available on this host,
//! microbenchmarks task-dispatch overhead, and condenses everything into a
//! single deterministic performance score the planner selects against.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;

/// Accelerator class available for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorTier {
    /// No GPU-compute backend
    None,
    /// Integrated accelerator (e.g. CoreML on Apple silicon)
    Integrated,
    /// Discrete accelerator (e.g. CUDA device)
    Discrete,
}

impl AcceleratorTier {
    const fn points(self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::Integrated => 50.0,
            Self::Discrete => 100.0,
        }
    }
}

/// Immutable record of what this host can do
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySnapshot {
    /// Logical core count
    pub cores: usize,
    /// Total system memory in GiB (0 when unknown)
    pub memory_gb: f32,
    /// Dedicated inference workers can be spawned
    pub workers: bool,
    /// Accelerator class
    pub accelerator: AcceleratorTier,
    /// Wide-vector instruction support
    pub simd: bool,
    /// Shared-memory multi-threading within an inference call
    pub threads: bool,
    /// Shared memory between workers
    pub shared_memory: bool,
    /// Network quality factor in [0, 1] (local pipeline: always 1)
    pub network_quality: f32,
    /// Measured dispatch round-trip overhead, when benchmarked
    pub dispatch_overhead_us: Option<u64>,
}

impl CapabilitySnapshot {
    /// Whether any accelerator is present
    #[must_use]
    pub fn has_accelerator(&self) -> bool {
        self.accelerator != AcceleratorTier::None
    }
}

/// Weighted linear combination of capabilities — deterministic given the
/// same snapshot
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn performance_score(caps: &CapabilitySnapshot) -> f32 {
    let mut score = caps.cores as f32 * 20.0;
    score += caps.memory_gb * 5.0;
    score += caps.accelerator.points();
    if caps.simd {
        score += 25.0;
    }
    if caps.threads {
        score += 25.0;
    }
    if caps.shared_memory {
        score += 15.0;
    }
    score += caps.network_quality * 20.0;
    score
}

/// Detects host capabilities
pub struct CapabilityProbe;

impl CapabilityProbe {
    /// Probe the host, including the dispatch microbenchmark
    pub async fn detect() -> CapabilitySnapshot {
        let overhead = measure_dispatch_overhead(32).await;
        let snapshot = CapabilitySnapshot {
            cores: detect_cores(),
            memory_gb: detect_memory_gb(),
            workers: true,
            accelerator: detect_accelerator(),
            simd: detect_simd(),
            threads: detect_cores() > 1,
            shared_memory: true,
            network_quality: 1.0,
            dispatch_overhead_us: Some(u64::try_from(overhead.as_micros()).unwrap_or(u64::MAX)),
        };
        tracing::info!(
            cores = snapshot.cores,
            memory_gb = snapshot.memory_gb,
            accelerator = ?snapshot.accelerator,
            simd = snapshot.simd,
            overhead_us = snapshot.dispatch_overhead_us,
            score = performance_score(&snapshot),
            "capability probe complete"
        );
        snapshot
    }
}

fn detect_cores() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

#[allow(clippy::cast_precision_loss)]
fn detect_memory_gb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    let kb: u64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kb as f32 / (1024.0 * 1024.0);
                }
            }
        }
    }
    0.0
}

fn detect_simd() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::is_x86_feature_detected!("avx2")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("neon")
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

fn detect_accelerator() -> AcceleratorTier {
    // Explicit override first; ONNX Runtime execution providers are not
    // queryable before session creation.
    match std::env::var("WAKELINE_ACCELERATOR").as_deref() {
        Ok("cuda") | Ok("discrete") => return AcceleratorTier::Discrete,
        Ok("coreml") | Ok("integrated") => return AcceleratorTier::Integrated,
        Ok("none") => return AcceleratorTier::None,
        _ => {}
    }
    if cfg!(target_os = "macos") {
        AcceleratorTier::Integrated
    } else {
        AcceleratorTier::None
    }
}

/// Time the round trip of a trivial compute task through a spawned task and
/// a oneshot channel, averaged over `iterations`
pub async fn measure_dispatch_overhead(iterations: u32) -> Duration {
    let start = Instant::now();
    for _ in 0..iterations {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let sum: u64 = (0..64u64).sum();
            let _ = tx.send(sum);
        });
        let _ = rx.await;
    }
    start.elapsed() / iterations.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(
        cores: usize,
        memory_gb: f32,
        accelerator: AcceleratorTier,
        simd: bool,
        threads: bool,
    ) -> CapabilitySnapshot {
        CapabilitySnapshot {
            cores,
            memory_gb,
            workers: threads,
            accelerator,
            simd,
            threads,
            shared_memory: threads,
            network_quality: 0.0,
            dispatch_overhead_us: None,
        }
    }

    #[test]
    fn score_is_deterministic() {
        let caps = snapshot(4, 8.0, AcceleratorTier::Discrete, true, true);
        assert!((performance_score(&caps) - performance_score(&caps)).abs() < f32::EPSILON);
    }

    #[test]
    fn minimal_host_scores_low() {
        let caps = snapshot(1, 0.0, AcceleratorTier::None, false, false);
        assert!(performance_score(&caps) < 100.0);
    }

    #[test]
    fn capable_host_scores_high() {
        let caps = snapshot(8, 16.0, AcceleratorTier::Discrete, true, true);
        assert!(performance_score(&caps) >= 200.0);
    }

    #[test]
    fn cores_dominate_over_bonuses() {
        let many_cores = snapshot(16, 0.0, AcceleratorTier::None, false, false);
        let few_with_simd = snapshot(2, 0.0, AcceleratorTier::None, true, false);
        assert!(performance_score(&many_cores) > performance_score(&few_with_simd));
    }

    #[tokio::test]
    async fn dispatch_benchmark_returns_nonzero() {
        let overhead = measure_dispatch_overhead(4).await;
        assert!(overhead > Duration::ZERO);
    }
}
