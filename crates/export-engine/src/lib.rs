//! Reframe Export Engine
//!
//! Re-encodes a source asset into a cropped, resized and trimmed output
//! file. Decoding and encoding are delegated to a [`MediaBackend`]; this
//! crate builds the composition, derives the crop transform and drives the
//! two sample pipelines into one muxed file.
//!
//! # Pipeline Architecture
//!
//! ```text
//! SourceAsset ──► build_composition ──► Composition (trimmed video + optional audio)
//!                        │                        │
//! crop, output size ──► resolve_transform ──► MediaReader
//!                                                 │
//!                         ┌───────────────────────┴───────────────────────┐
//!                   video output                                    audio output
//!                         │  worker                                worker  │
//!                         ▼                                                ▼
//!                    video input ──────────► MediaWriter ◄────────── audio input
//!                                                 │
//!                                                 ▼
//!                                            output.mp4
//! ```
//!
//! The worker that drains the last track finalizes the writer. Progress is
//! reported from the video track's presentation times.

pub mod composition;
pub mod control;
pub mod geometry;
pub mod media;
pub mod notify;
pub mod probe;
pub mod pump;
pub mod session;

pub use composition::{
    build_composition, BuiltComposition, Composition, CompositionTrack, ExportRequest,
    ResolvedSettings,
};
pub use control::{ExportOutcome, SessionState};
pub use geometry::{resolve_transform, RenderDescription, RenderInstruction, RenderTransform};
pub use media::*;
pub use notify::{EventReceiver, ExportEvent};
pub use probe::{ffprobe_available, probe_asset};
pub use pump::{Completion, PipelineState};
pub use session::{export, CancelHandle, ExportSession, ProgressCallback};
