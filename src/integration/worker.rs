//! Long-lived per-session monitoring loop.
//!
//! One worker thread owns one pipeline. It pulls frames, attaches the latest
//! audio event, fuses, appends to the session registry and forwards the
//! result. Stopping is cooperative through a shared flag; a frame in flight
//! when the flag flips is dropped, not flushed.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::AudioMonitor;
use crate::integration::detector::{AudioSource, FrameSource};
use crate::integration::pipeline::{DegradedCounters, FrameFusionPipeline, FusedResult};
use crate::session::{SessionId, SessionRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between polls when a source has nothing new
    pub idle_poll_millis: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_poll_millis: 10,
        }
    }
}

impl WorkerConfig {
    /// Idle poll interval as a `Duration`.
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_millis)
    }
}

/// Why a worker loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerExit {
    Stopped,
    /// The session was ended, expired or deleted underneath the worker
    SessionClosed,
    SourceFailed(String),
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Frames fused by the pipeline
    pub frames: u64,
    /// Frames recorded in the session registry
    pub appended: u64,
    pub degraded: DegradedCounters,
    pub exit: WorkerExit,
}

/// Handle to a running monitoring loop.
pub struct MonitorWorker {
    session_id: SessionId,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<WorkerReport>>,
}

impl MonitorWorker {
    /// Start a worker with the default [`WorkerConfig`].
    pub fn spawn<S>(
        pipeline: FrameFusionPipeline,
        source: S,
        audio: Option<AudioMonitor>,
        registry: Arc<SessionRegistry>,
        session_id: SessionId,
        results: Sender<FusedResult>,
    ) -> io::Result<Self>
    where
        S: FrameSource + Send + 'static,
    {
        Self::spawn_with_config(
            WorkerConfig::default(),
            pipeline,
            source,
            audio,
            registry,
            session_id,
            results,
        )
    }

    /// Start a worker on its own named thread.
    pub fn spawn_with_config<S>(
        config: WorkerConfig,
        pipeline: FrameFusionPipeline,
        source: S,
        audio: Option<AudioMonitor>,
        registry: Arc<SessionRegistry>,
        session_id: SessionId,
        results: Sender<FusedResult>,
    ) -> io::Result<Self>
    where
        S: FrameSource + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = WorkerLoop {
            pipeline,
            audio,
            registry,
            session_id,
            results,
            stop: Arc::clone(&stop),
            idle_poll: config.idle_poll(),
        };

        let handle = thread::Builder::new()
            .name(format!("monitor-{session_id}"))
            .spawn(move || worker.run(source))?;

        Ok(Self {
            session_id,
            stop,
            handle: Some(handle),
        })
    }

    /// Session this worker feeds.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Ask the loop to exit after the current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Shared stop flag, e.g. for an audio producer of the same session.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the loop to exit. Does not stop it; call [`stop`](Self::stop) first.
    pub fn join(mut self) -> WorkerReport {
        let panicked = WorkerReport {
            frames: 0,
            appended: 0,
            degraded: DegradedCounters::default(),
            exit: WorkerExit::Panicked,
        };
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(panicked),
            None => panicked,
        }
    }
}

impl Drop for MonitorWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

struct WorkerLoop {
    pipeline: FrameFusionPipeline,
    audio: Option<AudioMonitor>,
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
    results: Sender<FusedResult>,
    stop: Arc<AtomicBool>,
    idle_poll: Duration,
}

impl WorkerLoop {
    fn run<S: FrameSource>(mut self, mut source: S) -> WorkerReport {
        let session_id = self.session_id;
        info!(session_id = %session_id, "monitor worker started");

        let mut appended = 0u64;
        let exit = loop {
            if self.stop.load(Ordering::Acquire) {
                break WorkerExit::Stopped;
            }

            let mut frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    thread::sleep(self.idle_poll);
                    continue;
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "frame source failed");
                    break WorkerExit::SourceFailed(err.to_string());
                }
            };

            if frame.audio.is_none() {
                frame.audio = self.audio.as_ref().and_then(AudioMonitor::latest);
            }

            let result = self.pipeline.process(frame);

            if let Err(err) =
                self.registry
                    .append_frame_result(session_id, result.score, &result.alerts)
            {
                info!(session_id = %session_id, error = %err, "session closed, worker exiting");
                break WorkerExit::SessionClosed;
            }
            appended += 1;

            if self.results.send(result).is_err() {
                debug!(session_id = %session_id, "result receiver dropped");
            }
        };

        let report = WorkerReport {
            frames: self.pipeline.frames_processed(),
            appended,
            degraded: self.pipeline.degraded(),
            exit,
        };
        info!(
            session_id = %session_id,
            frames = report.frames,
            exit = ?report.exit,
            "monitor worker stopped"
        );
        report
    }
}

/// Producer loop feeding an [`AudioMonitor`] until the flag is set or the
/// source fails. Returns the number of blocks analysed.
pub fn spawn_audio_loop<A>(
    mut source: A,
    monitor: AudioMonitor,
    stop: Arc<AtomicBool>,
    idle_poll: Duration,
) -> io::Result<JoinHandle<u64>>
where
    A: AudioSource + Send + 'static,
{
    thread::Builder::new()
        .name("audio-monitor".to_string())
        .spawn(move || {
            let mut blocks = 0u64;
            while !stop.load(Ordering::Acquire) {
                match source.next_block() {
                    Ok(Some(block)) => {
                        monitor.push_block(&block);
                        blocks += 1;
                    }
                    Ok(None) => thread::sleep(idle_poll),
                    Err(err) => {
                        debug!(error = %err, "audio source ended");
                        break;
                    }
                }
            }
            blocks
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::detector::{ReplaySource, SlotFrameSource};
    use crate::integration::pipeline::FrameObservation;
    use crate::scoring::PoseObservation;
    use crate::session::SessionOwners;
    use chrono::{Duration as ChronoDuration, Utc};
    use ndarray::Array1;
    use std::collections::BTreeMap;
    use std::sync::mpsc;

    fn frames(n: u64) -> Vec<FrameObservation> {
        let start = Utc::now();
        (1..=n)
            .map(|i| {
                FrameObservation::new(
                    i,
                    start + ChronoDuration::milliseconds(33 * i as i64),
                    PoseObservation::facing(85.0),
                )
            })
            .collect()
    }

    fn session(registry: &SessionRegistry) -> SessionId {
        registry
            .create(SessionOwners::new("uni", "exam", "student"), BTreeMap::new())
            .unwrap()
    }

    #[test]
    fn test_worker_appends_every_frame() {
        let registry = Arc::new(SessionRegistry::default());
        let id = session(&registry);
        let (tx, rx) = mpsc::channel();

        let worker = MonitorWorker::spawn(
            FrameFusionPipeline::default(),
            ReplaySource::new(frames(5)),
            None,
            Arc::clone(&registry),
            id,
            tx,
        )
        .unwrap();
        let report = worker.join();

        assert!(matches!(report.exit, WorkerExit::SourceFailed(_)));
        assert_eq!(report.frames, 5);
        assert_eq!(report.appended, 5);
        assert_eq!(rx.try_iter().count(), 5);
        assert_eq!(registry.peek(id).unwrap().score_series.len(), 5);
    }

    #[test]
    fn test_worker_exits_when_session_ends() {
        let registry = Arc::new(SessionRegistry::default());
        let id = session(&registry);
        registry.end(id).unwrap();
        let (tx, _rx) = mpsc::channel();

        let worker = MonitorWorker::spawn(
            FrameFusionPipeline::default(),
            ReplaySource::new(frames(3)),
            None,
            registry,
            id,
            tx,
        )
        .unwrap();
        let report = worker.join();
        assert_eq!(report.exit, WorkerExit::SessionClosed);
        assert_eq!(report.appended, 0);
    }

    #[test]
    fn test_stop_ends_idle_worker() {
        let registry = Arc::new(SessionRegistry::default());
        let id = session(&registry);
        let (tx, _rx) = mpsc::channel();

        let worker = MonitorWorker::spawn(
            FrameFusionPipeline::default(),
            SlotFrameSource::default(),
            None,
            registry,
            id,
            tx,
        )
        .unwrap();
        worker.stop();
        assert_eq!(worker.join().exit, WorkerExit::Stopped);
    }

    #[test]
    fn test_audio_loop_drains_source() {
        let monitor = AudioMonitor::default();
        let blocks = vec![Array1::<f32>::zeros(1600); 3];
        let handle = spawn_audio_loop(
            ReplaySource::new(blocks),
            monitor.clone(),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(1),
        )
        .unwrap();
        assert_eq!(handle.join().unwrap(), 3);
        assert_eq!(monitor.statistics().blocks_analyzed, 3);
    }
}
