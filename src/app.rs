//! Application context wiring the detectors, planner, and session together
//!
//! Owns one of everything: one wake pipeline, one voice activity detector,
//! one session controller, one worker orchestrator. Frames arrive one at a
//! time through [`App::process_frame`] and are routed by session state —
//! wake scanning while Idle, voice activity tracking while Listening.

use std::sync::Arc;
use std::time::Instant;

use crate::audio::{AudioFrame, VAD_FRAME_SAMPLES, WAKE_FRAME_SAMPLES};
use crate::config::Config;
use crate::events::{EventBus, SessionEvent};
use crate::exec::{
    CapabilityProbe, CapabilitySnapshot, ExecutionPlanner, TuningAdvice, WorkerHandle,
    WorkerKind, WorkerOptions, WorkerOrchestrator,
};
use crate::inference::InferenceBackend;
use crate::session::{SessionConfig, SessionController, SessionState};
use crate::vad::{VadEdge, VoiceActivityDetector};
use crate::wake::WakeWordPipeline;
use crate::{Error, Result};

/// Frames between tuning-advice checks
const ADVICE_INTERVAL: u32 = 100;

/// The assembled always-listening pipeline
pub struct App {
    orchestrator: WorkerOrchestrator,
    planner: ExecutionPlanner,
    caps: CapabilitySnapshot,
    bus: EventBus,
    session: SessionController,
    wake: WakeWordPipeline,
    vad: VoiceActivityDetector,
    wake_handle: WorkerHandle,
    vad_handle: WorkerHandle,
    worker_options: WorkerOptions,
    frames_since_advice: u32,
}

impl App {
    /// Probe the host, plan execution, create workers, and load models
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] when a wake model fails to load; the voice
    /// activity model degrades to an energy fallback instead of failing
    pub async fn initialize(config: Config, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        let caps = CapabilityProbe::detect().await;
        let planner = ExecutionPlanner::plan(&caps);
        let profile = planner.current();

        let orchestrator = WorkerOrchestrator::new(backend);
        let worker_options = WorkerOptions {
            use_worker: profile.uses_worker,
            auto_restart: config.execution.auto_restart,
            restart_backoff: config.execution.restart_backoff(),
        };
        let wake_handle = orchestrator.create_worker(
            "wake-word",
            WorkerKind::WakeWord,
            worker_options.clone(),
        );
        let vad_handle =
            orchestrator.create_worker("vad", WorkerKind::Vad, worker_options.clone());

        let bus = EventBus::new();
        let timeout = config.execution.dispatch_timeout();
        let model_dir = config.model_dir();

        let mut wake = WakeWordPipeline::new(
            orchestrator.clone(),
            wake_handle.clone(),
            config.wake.clone(),
            timeout,
        );
        wake.init(&model_dir).await?;

        let mut vad = VoiceActivityDetector::new(
            orchestrator.clone(),
            vad_handle.clone(),
            config.vad.clone(),
            timeout,
        );
        vad.init(&model_dir).await;

        let session = SessionController::new(config.session.clone(), bus.clone());

        Ok(Self {
            orchestrator,
            planner,
            caps,
            bus,
            session,
            wake,
            vad,
            wake_handle,
            vad_handle,
            worker_options,
            frames_since_advice: 0,
        })
    }

    /// Assemble from already-constructed parts (test seam)
    #[doc(hidden)]
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        orchestrator: WorkerOrchestrator,
        planner: ExecutionPlanner,
        caps: CapabilitySnapshot,
        bus: EventBus,
        session_config: SessionConfig,
        wake: WakeWordPipeline,
        vad: VoiceActivityDetector,
        wake_handle: WorkerHandle,
        vad_handle: WorkerHandle,
    ) -> Self {
        let session = SessionController::new(session_config, bus.clone());
        Self {
            orchestrator,
            planner,
            caps,
            bus,
            session,
            wake,
            vad,
            wake_handle,
            vad_handle,
            worker_options: WorkerOptions::default(),
            frames_since_advice: 0,
        }
    }

    /// Begin scanning: Initialization → Idle
    pub fn start(&mut self) -> bool {
        let started = self.session.start();
        if started {
            self.enter_idle();
        }
        started
    }

    /// Stop everything: flush in-flight dispatches, reset detectors
    pub fn stop(&mut self) {
        self.orchestrator.cancel_pending(&self.wake_handle);
        self.orchestrator.cancel_pending(&self.vad_handle);
        self.wake.reset();
        self.vad.reset();
        self.session.stop();
    }

    /// Manual Idle → Listening
    pub fn manual_start(&mut self) -> bool {
        self.session.manual_start()
    }

    /// Manual Listening → Idle
    pub fn manual_stop(&mut self) -> bool {
        let stopped = self.session.manual_stop();
        if stopped {
            self.enter_idle();
        }
        stopped
    }

    /// Frame size the current state expects
    #[must_use]
    pub fn required_frame_samples(&self) -> usize {
        match self.session.state() {
            SessionState::Listening => VAD_FRAME_SAMPLES,
            SessionState::Initialization | SessionState::Idle => WAKE_FRAME_SAMPLES,
        }
    }

    /// Route one frame to whichever detector the session state selects
    ///
    /// Retryable failures (worker death, timeout) are logged and absorbed so
    /// the frame loop keeps running; only fatal errors propagate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] when called before `start`, and
    /// non-retryable dispatch errors
    pub async fn process_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        if self.session.tick() {
            self.enter_idle();
        }

        let started = Instant::now();
        let result = if self.session.wake_scanning_active() {
            self.scan_for_wake(frame).await
        } else if self.session.vad_active() {
            self.track_voice(frame).await
        } else {
            return Err(Error::NotInitialized(
                "session has not been started".to_string(),
            ));
        };

        match result {
            Ok(()) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.planner
                    .record_latency(self.planner.current().mode, elapsed_ms);
                self.maybe_retune();
                Ok(())
            }
            Err(error) if error.is_retryable() => {
                tracing::warn!(%error, "frame processing failed, continuing");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn scan_for_wake(&mut self, frame: &AudioFrame) -> Result<()> {
        let score = self.wake.process_frame(frame).await?;
        self.bus.emit(SessionEvent::WakeScore(score));
        if self.wake.is_detection(score) {
            tracing::info!(seq = score.seq, value = score.value, "wake word detected");
            self.bus.emit(SessionEvent::WakeDetected { score });
            self.session.on_wake_detection();
        }
        Ok(())
    }

    async fn track_voice(&mut self, frame: &AudioFrame) -> Result<()> {
        let report = self.vad.process_frame(frame).await?;
        match report.edge {
            Some(VadEdge::SpeechStart) => {
                self.bus.emit(SessionEvent::SpeechStart);
                self.session.on_speech_start();
            }
            Some(VadEdge::SpeechEnd) => {
                self.bus.emit(SessionEvent::SpeechEnd);
                if self.session.on_speech_end() {
                    self.enter_idle();
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Entry actions for Idle: clear detector state so a stale detection
    /// cannot immediately re-fire
    fn enter_idle(&mut self) {
        self.wake.reset_buffers();
        self.vad.reset();
    }

    /// Periodically consult the planner and act on its advice
    fn maybe_retune(&mut self) {
        self.frames_since_advice += 1;
        if self.frames_since_advice < ADVICE_INTERVAL {
            return;
        }
        self.frames_since_advice = 0;

        match self.planner.advice() {
            TuningAdvice::Stay => {}
            TuningAdvice::FallBack => match self.planner.fallback_to_next_mode() {
                Ok(profile) => self.apply_profile(profile.uses_worker),
                Err(error) => tracing::warn!(%error, "cannot fall back further"),
            },
            TuningAdvice::Promote => {
                // Promotion is advisory only; the chain index never moves up
                // automatically. Surface it for the operator.
                tracing::info!("latency suggests a worker mode would perform better");
            }
        }
    }

    /// Recreate both worker handles under a new worker policy
    ///
    /// The detectors keep their own handle copies, so the replacements must
    /// reach them too or they would keep dispatching under the old policy.
    fn apply_profile(&mut self, use_worker: bool) {
        let options = WorkerOptions {
            use_worker,
            ..self.worker_options.clone()
        };
        self.wake_handle =
            self.orchestrator
                .create_worker("wake-word", WorkerKind::WakeWord, options.clone());
        self.vad_handle = self
            .orchestrator
            .create_worker("vad", WorkerKind::Vad, options);
        self.wake.set_handle(self.wake_handle.clone());
        self.vad.set_handle(self.vad_handle.clone());
        tracing::info!(use_worker, "workers recreated for new execution profile");
    }

    /// Event bus for downstream subscribers
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Detected host capabilities
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySnapshot {
        &self.caps
    }

    /// Execution planner (latency stats, current profile)
    #[must_use]
    pub const fn planner(&self) -> &ExecutionPlanner {
        &self.planner
    }

    /// Current session state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Adjust the wake detection threshold at runtime
    pub fn set_threshold(&mut self, threshold: f32) {
        self.wake.set_threshold(threshold);
    }

    /// Rolling wake score history, oldest first
    #[must_use]
    pub fn score_history(&self) -> Vec<crate::wake::DetectionScore> {
        self.wake.score_history()
    }

    /// Swap the wake classifier model
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] if the new model cannot be loaded
    pub async fn switch_model(&mut self, id: &str, path: &std::path::Path) -> Result<()> {
        self.wake.switch_model(id, path).await
    }
}
