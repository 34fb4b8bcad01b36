//! Live hunt pipeline: capture → inference → processing.
//!
//! Architecture:
//!   capture thread (FrameSource, blocking)
//!     → frame_tx (flume bounded 1, at most one frame in flight)
//!       → inference worker (ObjectDetector, blocking)
//!         → events (flume bounded) ← decay timers, award timer, handle
//!           → processing task (owns the HuntSession, no locks)
//!             → watch::Sender<HuntSnapshot>
//!
//! The capture loop drops frames while an inference is in flight or while the
//! mission is complete, so the processing task never falls behind the camera.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::hunt_capture::{Frame, FrameSource};
use crate::hunt_config::HuntConfig;
use crate::hunt_decay::{DecayElapsed, TokioDecayTimers};
use crate::hunt_detector::{Detection, ObjectDetector};
use crate::hunt_error::HuntError;
use crate::hunt_progress::ProgressChange;
use crate::hunt_session::{HuntSession, HuntSnapshot};

/// Capture backoff after a source returns no frame or an error.
const CAPTURE_IDLE: Duration = Duration::from_millis(2);

// ─── Messages flowing into the processing task ──────────────────────────────

#[derive(Debug)]
pub enum HuntEvent {
    /// Inference result for one frame.
    Detections {
        sequence:   u64,
        timestamp:  DateTime<Utc>,
        detections: Vec<Detection>,
    },
    /// A per-class decay timer fired.
    DecayElapsed(DecayElapsed),
    /// Start the session over (manual reset).
    Reset,
    /// The award display time after a completion ran out.
    AwardElapsed { ticket: u64 },
    /// The frame source ended and the last inference was delivered.
    SourceExhausted,
}

impl From<DecayElapsed> for HuntEvent {
    fn from(elapsed: DecayElapsed) -> Self {
        HuntEvent::DecayElapsed(elapsed)
    }
}

// ─── Pipeline handle ────────────────────────────────────────────────────────

/// A running pipeline. Dropping the handle does not stop it; call [`stop`].
///
/// [`stop`]: PipelineHandle::stop
pub struct PipelineHandle {
    stop_tx:        watch::Sender<bool>,
    events:         flume::Sender<HuntEvent>,
    snapshots:      watch::Receiver<HuntSnapshot>,
    processor:      JoinHandle<HuntSnapshot>,
}

impl PipelineHandle {
    /// Signal capture and processing to stop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Ask the processing task to reset the session. Cancels a pending
    /// automatic reset after completion.
    pub async fn reset(&self) -> Result<(), HuntError> {
        self.events
            .send_async(HuntEvent::Reset)
            .await
            .map_err(|_| HuntError::PipelineClosed)
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<HuntSnapshot> {
        self.snapshots.clone()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> HuntSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.processor.is_finished()
    }

    /// Wait for the processing task to end (stop signal or exhausted source)
    /// and return its final snapshot.
    pub async fn join(self) -> Result<HuntSnapshot, HuntError> {
        Ok(self.processor.await?)
    }
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

pub struct Pipeline {
    cfg: HuntConfig,
}

impl Pipeline {
    pub fn new(cfg: HuntConfig) -> Self {
        Self { cfg }
    }

    /// Start the pipeline in background tasks. Must be called from within a
    /// tokio runtime.
    pub fn start<S, D>(self, source: S, detector: D) -> Result<PipelineHandle, HuntError>
    where
        S: FrameSource + 'static,
        D: ObjectDetector + 'static,
    {
        self.cfg.validate()?;
        let cfg = self.cfg;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(HuntSnapshot::default());

        // Channel: capture → inference. One slot: a frame is either in flight or dropped.
        let (frame_tx, frame_rx) = flume::bounded::<Frame>(1);

        // Channel: inference, timers, handle → processing
        let (events_tx, events_rx) = flume::bounded::<HuntEvent>(cfg.pipeline.event_buffer);

        let in_flight = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));

        info!(
            "Hunt pipeline starting: {} targets, timer {:.1}s",
            cfg.game.target_objects.len(),
            cfg.game.object_timer_length
        );

        // ── Spawn processing task ───────────────────────────────────────────
        let mut processor = Processor {
            session: HuntSession::new(cfg.clone(), TokioDecayTimers::new(events_tx.clone())),
            award_display: cfg.award_display(),
            award: None,
            award_ticket: 0,
            events: events_tx.clone(),
            snapshots: snapshot_tx,
            in_flight: Arc::clone(&in_flight),
            paused: Arc::clone(&paused),
        };
        let mut stop_rx_proc = stop_rx.clone();
        let processor_handle = tokio::spawn(async move {
            processor.publish();
            loop {
                if *stop_rx_proc.borrow_and_update() {
                    info!("Pipeline stop signal received");
                    break;
                }
                tokio::select! {
                    changed = stop_rx_proc.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    event = events_rx.recv_async() => match event {
                        Ok(event) => {
                            if !processor.handle(event) {
                                break;
                            }
                        }
                        Err(_) => break,
                    },
                }
            }
            processor.finish()
        });

        // ── Spawn inference worker (blocking thread) ────────────────────────
        let det_events = events_tx.clone();
        let det_in_flight = Arc::clone(&in_flight);
        let mut detector = detector;
        tokio::task::spawn_blocking(move || {
            while let Ok(frame) = frame_rx.recv() {
                match detector.detect(&frame) {
                    Ok(detections) => {
                        trace!("frame #{}: {} detections", frame.sequence, detections.len());
                        let event = HuntEvent::Detections {
                            sequence: frame.sequence,
                            timestamp: frame.captured_at,
                            detections,
                        };
                        if det_events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Detector error on frame #{}: {:#}", frame.sequence, e);
                        det_in_flight.store(false, Ordering::Release);
                    }
                }
            }
            let _ = det_events.send(HuntEvent::SourceExhausted);
            debug!("Inference worker exited");
        });

        // ── Spawn capture loop (blocking thread) ────────────────────────────
        let stop_rx_cap = stop_rx;
        let mut source = source;
        tokio::task::spawn_blocking(move || {
            let mut dropped = 0u64;
            loop {
                if *stop_rx_cap.borrow() {
                    break;
                }
                if source.is_exhausted() {
                    info!("Frame source exhausted");
                    break;
                }

                let frame = match source.next_frame() {
                    Ok(Some(f)) => f,
                    Ok(None) => {
                        std::thread::sleep(CAPTURE_IDLE);
                        continue;
                    }
                    Err(e) => {
                        warn!("Capture error: {:#}", e);
                        std::thread::sleep(CAPTURE_IDLE);
                        continue;
                    }
                };

                if paused.load(Ordering::Acquire) {
                    trace!("frame #{} skipped: mission complete", frame.sequence);
                    continue;
                }

                // Non-blocking handoff: drop the frame if an inference is running
                if in_flight.swap(true, Ordering::AcqRel) {
                    dropped += 1;
                    trace!("frame #{} dropped: inference in flight", frame.sequence);
                    continue;
                }
                if frame_tx.try_send(frame).is_err() {
                    in_flight.store(false, Ordering::Release);
                    dropped += 1;
                }
            }
            info!("Capture loop exited ({} frames dropped under load)", dropped);
        });

        Ok(PipelineHandle {
            stop_tx,
            events: events_tx,
            snapshots: snapshot_rx,
            processor: processor_handle,
        })
    }
}

// ─── Processing task state ──────────────────────────────────────────────────

struct Processor {
    session:       HuntSession<TokioDecayTimers<HuntEvent>>,
    award_display: Duration,
    award:         Option<(u64, AbortHandle)>,
    award_ticket:  u64,
    events:        flume::Sender<HuntEvent>,
    snapshots:     watch::Sender<HuntSnapshot>,
    in_flight:     Arc<AtomicBool>,
    paused:        Arc<AtomicBool>,
}

impl Processor {
    /// Apply one event. Returns `false` when processing should end.
    fn handle(&mut self, event: HuntEvent) -> bool {
        match event {
            HuntEvent::Detections { sequence, timestamp, detections } => {
                let processed = self.session.process_frame(timestamp, &detections);
                self.in_flight.store(false, Ordering::Release);
                match processed {
                    Some(snapshot) => {
                        if snapshot.mission_complete() && self.award.is_none() {
                            self.schedule_award_reset();
                        }
                        self.paused.store(snapshot.mission_complete(), Ordering::Release);
                        self.snapshots.send_replace(snapshot);
                    }
                    None => trace!("frame #{} ignored: mission complete", sequence),
                }
            }
            HuntEvent::DecayElapsed(elapsed) => {
                if self.session.timers_mut().acknowledge(&elapsed)
                    && matches!(self.session.decay(&elapsed.class_id), ProgressChange::Updated { .. })
                {
                    self.publish();
                }
            }
            HuntEvent::Reset => {
                info!("Manual reset requested");
                self.reset();
            }
            HuntEvent::AwardElapsed { ticket } => match &self.award {
                Some((current, _)) if *current == ticket => {
                    info!("Award display over, starting a new hunt");
                    self.reset();
                }
                _ => trace!("Stale award timer #{} ignored", ticket),
            },
            HuntEvent::SourceExhausted => {
                info!("No more frames, pipeline finishing");
                return false;
            }
        }
        true
    }

    fn schedule_award_reset(&mut self) {
        self.award_ticket += 1;
        let ticket = self.award_ticket;
        let delay = self.award_display;
        let tx = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send_async(HuntEvent::AwardElapsed { ticket }).await;
        });
        debug!("Automatic reset in {:.1}s", delay.as_secs_f64());
        self.award = Some((ticket, task.abort_handle()));
    }

    fn reset(&mut self) {
        if let Some((_, handle)) = self.award.take() {
            handle.abort();
        }
        self.session.reset();
        self.paused.store(false, Ordering::Release);
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }

    fn finish(mut self) -> HuntSnapshot {
        if let Some((_, handle)) = self.award.take() {
            handle.abort();
        }
        let last = self.session.snapshot();
        debug!("Processing task exited, mission complete: {}", last.mission_complete());
        last
    }
}
