//! Export sessions.
//!
//! A session owns one export from setup to its terminal event. Observers
//! read [`ExportEvent`]s from the receiver returned by
//! [`ExportSession::new`]; any thread may cancel through the session or a
//! [`CancelHandle`].

use std::path::Path;
use std::sync::Arc;

use reframe_common::config::EngineConfig;
use reframe_common::error::{ReframeError, ReframeResult, TrackKind};

use crate::composition::{build_composition, ExportRequest};
use crate::control::{ExportControl, ExportOutcome, SessionState};
use crate::geometry::{resolve_transform, RenderDescription};
use crate::media::{
    AudioEncodeSettings, AudioOutputSettings, MediaBackend, VideoEncodeSettings,
    VideoOutputSettings,
};
use crate::notify::{EventReceiver, ExportEvent, Notifier};
use crate::pump::{TrackLane, TranscodePump};

/// Progress callback for [`export`].
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// One export of one request.
pub struct ExportSession {
    request: ExportRequest,
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    control: Arc<ExportControl>,
}

/// Cloneable handle that cancels a session from anywhere.
#[derive(Clone)]
pub struct CancelHandle {
    control: Arc<ExportControl>,
}

impl CancelHandle {
    /// See [`ExportSession::cancel`].
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }
}

impl ExportSession {
    pub fn new(
        request: ExportRequest,
        backend: Arc<dyn MediaBackend>,
        config: EngineConfig,
    ) -> (Self, EventReceiver) {
        let (notifier, events) = Notifier::channel();
        let session = Self {
            request,
            backend,
            config,
            control: Arc::new(ExportControl::new(notifier)),
        };
        (session, events)
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Cancel the export. Never blocks.
    ///
    /// Returns `true` for the call that actually ended the session; that
    /// call halts the reader and writer and emits `Failure(None)`. Calls
    /// after any terminal outcome do nothing.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Run the export to its end.
    ///
    /// A session runs once. A session cancelled before `run` returns
    /// [`ExportOutcome::Cancelled`] without touching the backend.
    pub async fn run(&self) -> ExportOutcome {
        if let Err(err) = self.control.start() {
            return match err {
                ReframeError::Cancelled => {
                    tracing::debug!("Session cancelled before start");
                    ExportOutcome::Cancelled
                }
                other => {
                    tracing::warn!(error = %other, "Session not started");
                    ExportOutcome::Failed(Arc::new(other))
                }
            };
        }

        tracing::info!(
            source = %self.request.asset.location().display(),
            output = %self.request.destination.display(),
            backend = self.backend.name(),
            "Starting export"
        );

        match self.setup() {
            Ok(pump) => {
                if let Err(err) = pump.join().await {
                    self.control.fail(err);
                }
            }
            Err(err) => {
                self.control.fail(err);
            }
        }

        self.outcome()
    }

    fn outcome(&self) -> ExportOutcome {
        if let Some(outcome) = self.control.outcome(self.request.destination.clone()) {
            return outcome;
        }
        self.control.fail(ReframeError::Other(anyhow::anyhow!(
            "Transcode workers exited before the export finished"
        )));
        self.control
            .outcome(self.request.destination.clone())
            .unwrap_or(ExportOutcome::Cancelled)
    }

    fn setup(&self) -> ReframeResult<TranscodePump> {
        let defaults = &self.config.export;
        let built = build_composition(&self.request, defaults)?;
        let settings = &built.settings;
        let video = built.video_track()?;

        let transform = resolve_transform(
            video.natural_size,
            video.orientation,
            &settings.crop,
            settings.output_size,
        );
        let render = RenderDescription::new(
            video,
            &transform,
            settings.output_size,
            defaults.fallback_frame_rate,
        );

        prepare_destination(&settings.destination, defaults.overwrite_existing)?;

        if !self.backend.is_available() {
            return Err(ReframeError::unsupported(format!(
                "Media backend {} is not available",
                self.backend.name()
            )));
        }

        let reader = self
            .backend
            .open_reader(&built.composition)
            .map_err(|e| ReframeError::setup(format!("Could not open reader: {e}")))?;
        remove_existing(&settings.destination)?;
        let writer = self
            .backend
            .open_writer(&settings.destination, settings.container)
            .map_err(|e| ReframeError::setup(format!("Could not open writer: {e}")))?;
        self.control
            .register(Arc::clone(&reader), Arc::clone(&writer))?;

        let mut lanes = Vec::with_capacity(2);

        let video_output = reader
            .add_video_output(VideoOutputSettings::new(video.id, render))
            .map_err(|e| ReframeError::setup(format!("Could not add video output: {e}")))?;
        let video_input = writer
            .add_video_input(VideoEncodeSettings::from_settings(
                settings,
                defaults.clean_aperture_offset,
            ))
            .map_err(|e| ReframeError::setup(format!("Could not add video input: {e}")))?;
        lanes.push(TrackLane::new(TrackKind::Video, video_output, video_input));

        if let Some(audio) = built.composition.audio_track() {
            let audio_output = reader
                .add_audio_output(AudioOutputSettings::new(audio.id))
                .map_err(|e| ReframeError::setup(format!("Could not add audio output: {e}")))?;
            let audio_input = writer
                .add_audio_input(AudioEncodeSettings::mono_aac(
                    self.backend.audio_sample_rate(),
                ))
                .map_err(|e| ReframeError::setup(format!("Could not add audio input: {e}")))?;
            lanes.push(TrackLane::new(TrackKind::Audio, audio_output, audio_input));
        }

        tracing::debug!(
            rotation = transform.rotation_degrees(),
            scale = transform.scale,
            has_audio = built.has_audio(),
            "Export pipeline configured"
        );

        TranscodePump::start(
            reader,
            writer,
            lanes,
            Arc::clone(&self.control),
            settings.destination.clone(),
            settings.time_range.duration,
        )
    }
}

/// Make sure the writer can create `destination`. An existing file is left
/// in place until [`remove_existing`].
fn prepare_destination(destination: &Path, overwrite: bool) -> ReframeResult<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    if !overwrite && destination.exists() {
        return Err(ReframeError::setup(format!(
            "Destination already exists: {}",
            destination.display()
        )));
    }
    Ok(())
}

/// Clear an old output right before the writer opens its file.
fn remove_existing(destination: &Path) -> ReframeResult<()> {
    if destination.exists() {
        tracing::debug!(output = %destination.display(), "Removing existing output");
        std::fs::remove_file(destination)?;
    }
    Ok(())
}

/// Run one export, forwarding progress to `progress`.
pub async fn export(
    request: ExportRequest,
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    progress: Option<ProgressCallback>,
) -> ExportOutcome {
    let (session, mut events) = ExportSession::new(request, backend, config);

    let forward = |event: ExportEvent| {
        if let (ExportEvent::Progress(value), Some(cb)) = (&event, &progress) {
            cb(*value);
        }
    };

    let run = session.run();
    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            Some(event) = events.recv() => forward(event),
        }
    };
    while let Ok(event) = events.try_recv() {
        forward(event);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_destination_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested/out/clip.mp4");
        prepare_destination(&destination, true).unwrap();
        assert!(destination.parent().unwrap().is_dir());
    }

    #[test]
    fn test_prepare_destination_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("clip.mp4");
        std::fs::write(&destination, b"old").unwrap();

        let err = prepare_destination(&destination, false).unwrap_err();
        assert!(matches!(err, ReframeError::Setup { .. }));
        assert!(destination.exists());

        prepare_destination(&destination, true).unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"old");

        remove_existing(&destination).unwrap();
        assert!(!destination.exists());
        remove_existing(&destination).unwrap();
    }
}
