//! Wiring between detector backends, the fusion pipeline and the session store.
//!
//! Backends feed [`FrameObservation`]s through a [`FrameSource`]; a
//! [`MonitorWorker`] drives one [`FrameFusionPipeline`] per session.

mod alerts;
mod builder;
mod detector;
mod pipeline;
mod worker;

pub use alerts::{Alert, AlertCategory, AlertDebouncer, prioritize};
pub use builder::{DetectionBuilder, coco_label};
pub use detector::{
    AudioSource, FrameSource, IntoDetections, ReplaySource, SlotFrameSource, SourceExhausted,
};
pub use pipeline::{
    DegradedCounters, FrameFusionPipeline, FrameObservation, FusedResult, FusionConfig,
    PipelineStats,
};
pub use worker::{MonitorWorker, WorkerConfig, WorkerExit, WorkerReport, spawn_audio_loop};
